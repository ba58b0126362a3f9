use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Defines a fixed-size byte array newtype with `0x`-prefixed lowercase hex (de)serialization,
/// matching the interchange format's string encoding (§4.3, §6).
macro_rules! impl_fixed_bytes {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LENGTH: usize = $len;

            pub fn zero() -> Self {
                Self([0; $len])
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
                if bytes.len() != $len {
                    return Err(format!(
                        "expected {} bytes, got {}",
                        $len,
                        bytes.len()
                    ));
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(bytes);
                Ok(Self(out))
            }

            pub fn to_hex_string(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            pub fn from_hex_str(s: &str) -> Result<Self, String> {
                let stripped = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(stripped).map_err(|e| e.to_string())?;
                Self::from_slice(&bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::zero()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex_str(&s).map_err(DeError::custom)
            }
        }
    };
}

impl_fixed_bytes!(Hash256, 32);
impl_fixed_bytes!(PublicKey, 48);
impl_fixed_bytes!(Signature, 96);
impl_fixed_bytes!(Domain, 32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let h = Hash256([7u8; 32]);
        let s = h.to_hex_string();
        assert_eq!(Hash256::from_hex_str(&s).unwrap(), h);
    }

    #[test]
    fn json_roundtrip() {
        let pk = PublicKey([3u8; 48]);
        let json = serde_json::to_string(&pk).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(pk, back);
    }
}
