//! Shared metadata primitives for filescope.
//!
//! This crate is the single source of truth for the values every checker
//! reports and the aggregator merges: the `(:unav)` / `(:unap)` sentinels,
//! the tri-state well-formed verdict and the per-stream metadata record.

mod stream;
mod verdict;

pub use stream::{FieldConflict, MetadataStream, ParseStreamTypeError, StreamType};
pub use verdict::WellFormed;

/// Sentinel for a value that no checker that ran could resolve.
pub const UNAV: &str = "(:unav)";

/// Sentinel for a value that does not apply to the format or stream.
pub const UNAP: &str = "(:unap)";

/// Whether `value` carries real information.
///
/// `UNAP` counts as concrete: "not applicable" is a resolved answer.
/// Only `UNAV` and the empty string are placeholders.
#[inline]
#[must_use]
pub fn is_concrete(value: &str) -> bool {
    !value.is_empty() && value != UNAV
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_distinct() {
        assert_ne!(UNAV, UNAP);
        assert!(!is_concrete(UNAV));
        assert!(is_concrete(UNAP));
        assert!(!is_concrete(""));
        assert!(is_concrete("1.4"));
    }
}
