//! Closed-form lattice point counts.
//!
//! One function per [`Pattern`], each taking only the pattern's integer parameters. All
//! results are exact [`BigUint`]s; the triangle numbers divide an always-even product by
//! two.
//!
//! | pattern        | parameters | points                    |
//! |----------------|------------|---------------------------|
//! | lower-triangle | `n`        | `n*(n-1)/2`               |
//! | upper-triangle | `n`        | `n*(n+1)/2`               |
//! | trapezoid      | `n, k`     | `n*(2k+1) - k*(k+1)`      |
//! | diagonal       | `n, m`     | `n*m`                     |
//! | parallelogram  | `n, k`     | `n*(2k+1) - k*(k+1)`      |
//! | band-matrix    | `n, b`     | `n*(2b+1) - b*(b+1)`      |
//!
//! The band formula assumes `k < n`. For wider bands the band covers the whole `n x n`
//! square; the half-width is clamped to `n - 1`, which yields exactly `n*n`.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::error::{Error, Result};
use crate::expr::{BoundExpr, Params};
use crate::pattern::Pattern;

/// Pairs `(i, j)` with `0 <= j < i < n`.
pub fn lower_triangle(n: u64) -> BigUint {
    if n == 0 {
        return BigUint::zero();
    }
    (BigUint::from(n) * BigUint::from(n - 1)) >> 1
}

/// Pairs `(i, j)` with `0 <= i <= j < n`.
pub fn upper_triangle(n: u64) -> BigUint {
    (BigUint::from(n) * (BigUint::from(n) + 1u32)) >> 1
}

/// Points within distance `k` of the main diagonal of an `n x n` grid.
fn band(n: u64, k: u64) -> BigUint {
    if n == 0 {
        return BigUint::zero();
    }
    let k = BigUint::from(k.min(n - 1));
    let n = BigUint::from(n);
    n * (&k * 2u32 + 1u32) - &k * (&k + 1u32)
}

/// Time-skewed stencil: `t in [0, n)`, `i in [max(0, t-k), min(n, t+k+1))`.
pub fn trapezoid(n: u64, k: u64) -> BigUint {
    band(n, k)
}

/// Anti-diagonal traversal of an `n x m` grid; every grid point is visited once.
pub fn diagonal(n: u64, m: u64) -> BigUint {
    BigUint::from(n) * BigUint::from(m)
}

pub fn parallelogram(n: u64, k: u64) -> BigUint {
    band(n, k)
}

pub fn band_matrix(n: u64, b: u64) -> BigUint {
    band(n, b)
}

impl Pattern {
    /// Evaluates the closed form with the parameters taken from `params` by name.
    ///
    /// Every name in [`Pattern::parameter_names`] must be present. A negative value
    /// describes an empty range and is treated as zero.
    pub fn evaluate(self, params: &Params) -> Result<BigUint> {
        let names = self.parameter_names();
        let mut args = [0u64; 2];
        for (slot, name) in args.iter_mut().zip(names) {
            let value = params.get(*name).copied().ok_or_else(|| {
                Error::invalid_argument(format!("{} needs parameter `{}`", self, name))
            })?;
            *slot = value.max(0) as u64;
        }
        let [a, b] = args;
        Ok(match self {
            Pattern::LowerTriangle => lower_triangle(a),
            Pattern::UpperTriangle => upper_triangle(a),
            Pattern::Trapezoid => trapezoid(a, b),
            Pattern::Diagonal => diagonal(a, b),
            Pattern::Parallelogram => parallelogram(a, b),
            Pattern::BandMatrix => band_matrix(a, b),
        })
    }

    /// The closed form as an expression over [`Pattern::parameter_names`].
    ///
    /// Valid for non-negative parameters and, for the band shapes, half-width below `n`.
    pub fn closed_form(self) -> BoundExpr {
        let n = || BoundExpr::var("n");
        let band = |k: &str| {
            let k = || BoundExpr::var(k);
            n() * (2 * k() + 1) - k() * (k() + 1)
        };
        match self {
            Pattern::LowerTriangle => BoundExpr::div(n() * (n() - 1), 2.into()),
            Pattern::UpperTriangle => BoundExpr::div(n() * (n() + 1), 2.into()),
            Pattern::Trapezoid | Pattern::Parallelogram => band("k"),
            Pattern::Diagonal => n() * BoundExpr::var("m"),
            Pattern::BandMatrix => band("b"),
        }
    }
}
