//! Capacity policy: minimum provisioning size and the hard upper bound.

use crate::error::{Error, Result};

/// The smallest volume this driver will ever provision.
pub const MIN_CAPACITY_BYTES: i64 = 1024 * 1024 * 1024; // 1 GiB

/// The largest volume this driver will ever provision.
pub const MAX_CAPACITY_BYTES: i64 = 16 * 1024 * 1024 * 1024 * 1024; // 16 TiB

/// Resolves a requested capacity range into a concrete provisioning size.
///
/// `required` is raised to [`MIN_CAPACITY_BYTES`] if smaller. If
/// `limit` is set and positive, the result must not exceed it; in any
/// case it must not exceed [`MAX_CAPACITY_BYTES`]. A non-positive
/// `required` is treated as zero (and thus raised to the minimum).
pub fn resolve_capacity(required: i64, limit: Option<i64>) -> Result<i64> {
    let required = required.max(0);
    let resolved = required.max(MIN_CAPACITY_BYTES);

    if resolved > MAX_CAPACITY_BYTES {
        return Err(Error::CapacityOutOfRange {
            requested: resolved,
            limit: MAX_CAPACITY_BYTES,
        });
    }

    if let Some(limit) = limit {
        if limit > 0 && resolved > limit {
            return Err(Error::CapacityOutOfRange {
                requested: resolved,
                limit,
            });
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, None, MIN_CAPACITY_BYTES; "zero raises to minimum")]
    #[test_case(MIN_CAPACITY_BYTES, None, MIN_CAPACITY_BYTES; "minimum passes through")]
    #[test_case(MAX_CAPACITY_BYTES, None, MAX_CAPACITY_BYTES; "maximum is accepted")]
    fn accepted_sizes(required: i64, limit: Option<i64>, expected: i64) {
        assert_eq!(resolve_capacity(required, limit).expect("ok"), expected);
    }

    #[test]
    fn rejects_over_sixteen_tebibytes() {
        let err = resolve_capacity(MAX_CAPACITY_BYTES + 1, None);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_i64_max() {
        let err = resolve_capacity(i64::MAX, None);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_over_an_explicit_limit() {
        let err = resolve_capacity(MIN_CAPACITY_BYTES * 4, Some(MIN_CAPACITY_BYTES * 2));
        assert!(err.is_err());
    }

    #[test]
    fn ignores_a_non_positive_limit() {
        let resolved = resolve_capacity(MIN_CAPACITY_BYTES, Some(0)).expect("ok");
        assert_eq!(resolved, MIN_CAPACITY_BYTES);
    }
}
