//! Brute-force counting by walking the nest.
//!
//! This is the reference every other counting path is tested against. It honours
//! non-unit steps and evaluates guards at every innermost point, so it is exact for any
//! nest whose bounds evaluate to integers, linear or not. Running time is proportional to
//! the number of points of all levels but the innermost.

use log::trace;
use num_bigint::BigUint;
use num_traits::Zero;

use crate::error::{Error, Result};
use crate::expr::Params;
use crate::loops::LoopStructure;

impl LoopStructure {
    /// Counts the points of a fully concrete nest.
    ///
    /// Every symbol must be a loop variable; use [`LoopStructure::substitute`] first, or
    /// [`LoopStructure::count_points_with`].
    pub fn count_points(&self) -> Result<BigUint> {
        let free = self.free_parameters();
        if !free.is_empty() {
            let names: Vec<&str> = free.iter().map(|s| s.as_str()).collect();
            return Err(Error::invalid_argument(format!(
                "cannot enumerate a nest with free parameters: {}",
                names.join(", ")
            )));
        }
        let mut env = Params::new();
        let mut total = BigUint::zero();
        self.walk(0, &mut env, &mut total)?;
        trace!("enumerated {} points over [{}]", total, self.variables().join(", "));
        Ok(total)
    }

    /// Substitutes `params` and counts the resulting nest.
    pub fn count_points_with(&self, params: &Params) -> Result<BigUint> {
        self.substitute(params).count_points()
    }

    fn walk(&self, level: usize, env: &mut Params, total: &mut BigUint) -> Result<()> {
        if level == self.bounds.len() {
            for condition in &self.conditions {
                if !condition.holds(env)? {
                    return Ok(());
                }
            }
            *total += 1u32;
            return Ok(());
        }

        let bound = &self.bounds[level];
        let start = bound.start.eval(env)?;
        let end = bound.end.eval(env)?;
        let step = bound.step.eval(env)?;
        if step <= 0 {
            return Err(Error::invalid_argument(format!(
                "loop `{}` has non-positive step {}",
                bound.variable, step
            )));
        }
        if start >= end {
            return Ok(());
        }

        // Unguarded innermost level: the trip count is ceil((end - start) / step).
        if level + 1 == self.bounds.len() && self.conditions.is_empty() {
            let span = (end as i128) - (start as i128);
            let trips = (span + step as i128 - 1) / step as i128;
            *total += BigUint::from(trips as u128);
            return Ok(());
        }

        let mut value = start;
        while value < end {
            env.insert(bound.variable.clone(), value);
            self.walk(level + 1, env, total)?;
            value = match value.checked_add(step) {
                Some(v) => v,
                None => break,
            };
        }
        env.remove(&bound.variable);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::expr::BoundExpr;
    use crate::loops::LoopBound;

    fn params(pairs: &[(&str, i64)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_lower_triangle() {
        let s = LoopStructure::new(vec![LoopBound::new("i", 0, 5), LoopBound::new("j", 0, "i")], vec![]).unwrap();
        assert_eq!(s.count_points().unwrap(), BigUint::from(10u32));
    }

    #[test]
    fn test_steps() {
        let s = LoopStructure::new(vec![LoopBound::new("i", 0, 10).with_step(3)], vec![]).unwrap();
        // 0, 3, 6, 9
        assert_eq!(s.count_points().unwrap(), BigUint::from(4u32));

        let s = LoopStructure::new(
            vec![LoopBound::new("i", 1, 10).with_step(4), LoopBound::new("j", 0, "i").with_step(2)],
            vec![],
        )
        .unwrap();
        // i = 1, 5, 9 -> 1 + 3 + 5
        assert_eq!(s.count_points().unwrap(), BigUint::from(9u32));
    }

    #[test]
    fn test_guard() {
        let s = LoopStructure::new(
            vec![LoopBound::new("i", 0, "n"), LoopBound::new("j", 0, "n")],
            vec!["i + j < n".parse().unwrap()],
        )
        .unwrap();
        // Pairs with i + j <= n - 1: n(n+1)/2.
        assert_eq!(s.count_points_with(&params(&[("n", 6)])).unwrap(), BigUint::from(21u32));
    }

    #[test]
    fn test_non_linear_guard() {
        let s = LoopStructure::new(
            vec![LoopBound::new("i", 0, 4), LoopBound::new("j", 0, 4)],
            vec!["i * j == 0".parse().unwrap()],
        )
        .unwrap();
        assert_eq!(s.count_points().unwrap(), BigUint::from(7u32));
    }

    #[test]
    fn test_empty_and_negative_ranges() {
        let s = LoopStructure::new(vec![LoopBound::new("i", 5, 2)], vec![]).unwrap();
        assert!(s.count_points().unwrap().is_zero());
        let s = LoopStructure::new(vec![LoopBound::new("i", -3, 3)], vec![]).unwrap();
        assert_eq!(s.count_points().unwrap(), BigUint::from(6u32));
    }

    #[test]
    fn test_free_parameters_rejected() {
        let s = LoopStructure::new(vec![LoopBound::new("i", 0, "n")], vec![]).unwrap();
        assert!(matches!(s.count_points(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_bad_step_rejected() {
        let s = LoopStructure::new(vec![LoopBound::new("i", 0, 4).with_step(BoundExpr::int(0))], vec![]).unwrap();
        assert!(s.count_points().is_err());
    }
}
