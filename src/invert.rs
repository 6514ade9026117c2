//! Sizing loops for a target point count.
//!
//! [`parameters_for`] picks loop bounds that produce at least a given number of lattice
//! points, which is how benchmark inputs of a chosen size are generated.

use std::cmp::max;

use log::debug;
use num_bigint::BigUint;
use num_traits::ToPrimitive;

use crate::error::{Error, Result};
use crate::expr::Params;
use crate::pattern::Pattern;

/// Smallest `n >= 1` with `n*(n + offset)/2 >= target`, where `offset` is `-1` or `+1`.
fn invert_triangle(target: u128, offset: i128) -> Result<i64> {
    let points = |n: u128| -> u128 { (n as i128 * (n as i128 + offset) / 2) as u128 };

    // Positive root of n^2 + offset*n - 2*target = 0.
    let disc = BigUint::from(1 + 8 * target).sqrt();
    let root = disc.to_u128().unwrap_or(u128::MAX);
    let mut n = max(1, ((root as i128 - offset) / 2) as u128);
    while points(n) < target {
        n += 1;
    }
    while n > 1 && points(n - 1) >= target {
        n -= 1;
    }
    i64::try_from(n).map_err(|_| Error::invalid_argument(format!("no 64-bit bound reaches {} points", target)))
}

/// Returns bound parameters whose loop nest has at least `target` points.
///
/// For the two triangles this is the exact inverse of the closed form: the smallest `n`
/// reaching `target`. Every other pattern, and `None`, falls back to
/// `n = max(1, floor(sqrt(target)))`.
pub fn parameters_for(target: i64, pattern: Option<Pattern>) -> Result<Params> {
    if target <= 0 {
        return Err(Error::invalid_argument(format!(
            "target point count must be positive, got {}",
            target
        )));
    }
    let t = target as u128;
    let n = match pattern {
        Some(Pattern::LowerTriangle) => invert_triangle(t, -1)?,
        Some(Pattern::UpperTriangle) => invert_triangle(t, 1)?,
        _ => max(1, BigUint::from(t).sqrt().to_i64().unwrap_or(i64::MAX)),
    };
    debug!("{} points -> n = {} for {:?}", target, n, pattern);
    Ok(Params::from([("n".to_string(), n)]))
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::formula::{lower_triangle, upper_triangle};

    fn n_for(target: i64, pattern: Option<Pattern>) -> i64 {
        parameters_for(target, pattern).unwrap()["n"]
    }

    #[test]
    fn test_lower_triangle_known_values() {
        assert_eq!(n_for(1, Some(Pattern::LowerTriangle)), 2);
        assert_eq!(n_for(10, Some(Pattern::LowerTriangle)), 5);
        assert_eq!(n_for(1_000_000, Some(Pattern::LowerTriangle)), 1415);
    }

    #[test]
    fn test_triangle_inverse_is_minimal() {
        for target in 1..2000i64 {
            let n = n_for(target, Some(Pattern::LowerTriangle)) as u64;
            assert!(lower_triangle(n) >= BigUint::from(target as u64), "target {}", target);
            assert!(n == 1 || lower_triangle(n - 1) < BigUint::from(target as u64), "target {}", target);

            let n = n_for(target, Some(Pattern::UpperTriangle)) as u64;
            assert!(upper_triangle(n) >= BigUint::from(target as u64));
            assert!(n == 1 || upper_triangle(n - 1) < BigUint::from(target as u64));
        }
    }

    #[test]
    fn test_large_target() {
        let n = n_for(i64::MAX, Some(Pattern::UpperTriangle)) as u64;
        assert!(upper_triangle(n) >= BigUint::from(i64::MAX as u64));
        assert!(upper_triangle(n - 1) < BigUint::from(i64::MAX as u64));
    }

    #[test]
    fn test_fallback() {
        assert_eq!(n_for(1, None), 1);
        assert_eq!(n_for(99, None), 9);
        assert_eq!(n_for(100, Some(Pattern::BandMatrix)), 10);
    }

    #[test]
    fn test_non_positive_target() {
        for pattern in Pattern::ALL.into_iter().map(Some).chain([None]) {
            assert!(matches!(parameters_for(0, pattern), Err(Error::InvalidArgument(_))));
        }
        assert!(parameters_for(-5, None).is_err());
    }
}
