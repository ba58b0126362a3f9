//! Small `clap` argument-parsing helpers shared by the validator client's CLI (§6 CLI surface).
//!
//! Mirrors the upstream lighthouse `clap_utils` crate: `parse_required`/`parse_optional` wrap
//! `ArgMatches::get_one` with a `FromStr` bound and a uniform error string, and
//! `parse_path_with_default_in_home_dir` resolves a directory flag against `$HOME` when absent.

use clap::ArgMatches;
use std::path::PathBuf;
use std::str::FromStr;

pub fn parse_optional<T>(matches: &ArgMatches, name: &str) -> Result<Option<T>, String>
where
    T: FromStr + Clone + Send + Sync + 'static,
    T::Err: std::fmt::Display,
{
    matches
        .get_one::<String>(name)
        .map(|s| {
            s.parse()
                .map_err(|e| format!("Unable to parse {}: {}", name, e))
        })
        .transpose()
}

pub fn parse_required<T>(matches: &ArgMatches, name: &str) -> Result<T, String>
where
    T: FromStr + Clone + Send + Sync + 'static,
    T::Err: std::fmt::Display,
{
    parse_optional(matches, name)?.ok_or_else(|| format!("{} is required", name))
}

/// Resolves a path-valued flag, defaulting to `$HOME/<default_relative>` when not supplied.
pub fn parse_path_with_default_in_home_dir(
    matches: &ArgMatches,
    name: &str,
    default_relative: PathBuf,
) -> Result<PathBuf, String> {
    match parse_optional::<String>(matches, name)? {
        Some(raw) => Ok(PathBuf::from(raw)),
        None => dirs::home_dir()
            .map(|home| home.join(default_relative))
            .ok_or_else(|| "Unable to locate home directory".to_string()),
    }
}

/// Splits a `host1:port,host2:port` multi-endpoint address list (§6 CLI surface).
pub fn parse_endpoint_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
