//! Operator-surfaced counters for the error kinds §7 calls out as metrics-worthy: slashable
//! signing attempts and store corruption. Transient/cancelled/deadline kinds are log-only.

use lighthouse_metrics::{try_create_int_counter, IntCounter};
use std::sync::LazyLock;

pub static SLASHABLE_ATTESTATIONS_TOTAL: LazyLock<prometheus::Result<IntCounter>> =
    LazyLock::new(|| {
        try_create_int_counter(
            "vc_slashable_attestations_total",
            "Number of attestation signing attempts refused by the slashing-protection store",
        )
    });

pub static SLASHABLE_PROPOSALS_TOTAL: LazyLock<prometheus::Result<IntCounter>> =
    LazyLock::new(|| {
        try_create_int_counter(
            "vc_slashable_proposals_total",
            "Number of block proposal signing attempts refused by the slashing-protection store",
        )
    });

pub static STORE_CORRUPTION_TOTAL: LazyLock<prometheus::Result<IntCounter>> = LazyLock::new(|| {
    try_create_int_counter(
        "vc_store_corruption_total",
        "Number of slashing-protection store errors other than a slashable refusal",
    )
});
