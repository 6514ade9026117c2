//! Symbolic bound expressions.
//!
//! A [`BoundExpr`] is the value a loop extractor hands us for a loop's `start`, `end` or
//! `step`, and for either side of a guard condition. It is a plain recursive tree over
//! integer literals, named symbols, `+ - * /`, negation, `min` and `max`.
//!
//! Expressions are values: [`BoundExpr::substitute`] and [`BoundExpr::simplify`] build new
//! trees and never touch the original.
//!
//! ```
//! use std::collections::BTreeMap;
//! use lattice_rs::expr::BoundExpr;
//!
//! let lo = BoundExpr::max(0.into(), BoundExpr::var("t") - BoundExpr::var("k"));
//! assert_eq!(lo.to_string(), "max(0, t - k)");
//!
//! let params = BTreeMap::from([("t".to_string(), 7), ("k".to_string(), 2)]);
//! assert_eq!(lo.eval(&params).unwrap(), 5);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Concrete values for named symbols.
pub type Params = BTreeMap<String, i64>;

/// A symbolic integer expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BoundExpr {
    /// Integer literal.
    Int(i64),
    /// Reference to a loop variable or a free parameter.
    Var(String),
    Add(Box<BoundExpr>, Box<BoundExpr>),
    Sub(Box<BoundExpr>, Box<BoundExpr>),
    Mul(Box<BoundExpr>, Box<BoundExpr>),
    /// Floor division.
    Div(Box<BoundExpr>, Box<BoundExpr>),
    Neg(Box<BoundExpr>),
    Min(Box<BoundExpr>, Box<BoundExpr>),
    Max(Box<BoundExpr>, Box<BoundExpr>),
}

impl BoundExpr {
    pub fn int(value: i64) -> Self {
        BoundExpr::Int(value)
    }

    pub fn var(name: impl Into<String>) -> Self {
        BoundExpr::Var(name.into())
    }

    pub fn min(lhs: Self, rhs: Self) -> Self {
        BoundExpr::Min(Box::new(lhs), Box::new(rhs))
    }

    pub fn max(lhs: Self, rhs: Self) -> Self {
        BoundExpr::Max(Box::new(lhs), Box::new(rhs))
    }

    pub fn div(lhs: Self, rhs: Self) -> Self {
        BoundExpr::Div(Box::new(lhs), Box::new(rhs))
    }

    /// Returns the literal value, if this is an integer literal.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            BoundExpr::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.as_int().is_some()
    }

    /// Checks whether this expression is exactly a reference to `name`.
    pub fn is_var(&self, name: &str) -> bool {
        matches!(self, BoundExpr::Var(v) if v == name)
    }

    /// Returns `true` if the tree contains a `min` or `max` node anywhere.
    pub fn contains_min_max(&self) -> bool {
        match self {
            BoundExpr::Int(_) | BoundExpr::Var(_) => false,
            BoundExpr::Min(_, _) | BoundExpr::Max(_, _) => true,
            BoundExpr::Neg(a) => a.contains_min_max(),
            BoundExpr::Add(a, b) | BoundExpr::Sub(a, b) | BoundExpr::Mul(a, b) | BoundExpr::Div(a, b) => {
                a.contains_min_max() || b.contains_min_max()
            }
        }
    }

    /// Names of all symbols referenced by the expression.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut symbols = BTreeSet::new();
        self.collect_symbols(&mut symbols);
        symbols
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            BoundExpr::Int(_) => {}
            BoundExpr::Var(name) => {
                out.insert(name.clone());
            }
            BoundExpr::Neg(a) => a.collect_symbols(out),
            BoundExpr::Add(a, b)
            | BoundExpr::Sub(a, b)
            | BoundExpr::Mul(a, b)
            | BoundExpr::Div(a, b)
            | BoundExpr::Min(a, b)
            | BoundExpr::Max(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
        }
    }

    pub fn depends_on(&self, name: &str) -> bool {
        match self {
            BoundExpr::Int(_) => false,
            BoundExpr::Var(v) => v == name,
            BoundExpr::Neg(a) => a.depends_on(name),
            BoundExpr::Add(a, b)
            | BoundExpr::Sub(a, b)
            | BoundExpr::Mul(a, b)
            | BoundExpr::Div(a, b)
            | BoundExpr::Min(a, b)
            | BoundExpr::Max(a, b) => a.depends_on(name) || b.depends_on(name),
        }
    }

    /// Rebuilds the tree bottom-up, letting `leaf` replace symbol references.
    fn map_vars<F>(&self, leaf: &mut F) -> BoundExpr
    where
        F: FnMut(&str) -> BoundExpr,
    {
        match self {
            BoundExpr::Int(v) => BoundExpr::Int(*v),
            BoundExpr::Var(name) => leaf(name),
            BoundExpr::Neg(a) => BoundExpr::Neg(Box::new(a.map_vars(leaf))),
            BoundExpr::Add(a, b) => BoundExpr::Add(Box::new(a.map_vars(leaf)), Box::new(b.map_vars(leaf))),
            BoundExpr::Sub(a, b) => BoundExpr::Sub(Box::new(a.map_vars(leaf)), Box::new(b.map_vars(leaf))),
            BoundExpr::Mul(a, b) => BoundExpr::Mul(Box::new(a.map_vars(leaf)), Box::new(b.map_vars(leaf))),
            BoundExpr::Div(a, b) => BoundExpr::Div(Box::new(a.map_vars(leaf)), Box::new(b.map_vars(leaf))),
            BoundExpr::Min(a, b) => BoundExpr::Min(Box::new(a.map_vars(leaf)), Box::new(b.map_vars(leaf))),
            BoundExpr::Max(a, b) => BoundExpr::Max(Box::new(a.map_vars(leaf)), Box::new(b.map_vars(leaf))),
        }
    }

    /// Replaces every symbol that has an entry in `params` by its integer value.
    ///
    /// Symbols without an entry are left alone, so substituting twice with the same
    /// mapping is the same as substituting once.
    pub fn substitute(&self, params: &Params) -> BoundExpr {
        self.map_vars(&mut |name| match params.get(name) {
            Some(&value) => BoundExpr::Int(value),
            None => BoundExpr::Var(name.to_string()),
        })
    }

    /// Evaluates the expression; every symbol must be bound in `params`.
    pub fn eval(&self, params: &Params) -> Result<i64> {
        let overflow = || Error::invalid_argument(format!("integer overflow while evaluating `{}`", self));
        match self {
            BoundExpr::Int(v) => Ok(*v),
            BoundExpr::Var(name) => params
                .get(name)
                .copied()
                .ok_or_else(|| Error::invalid_argument(format!("no value for symbol `{}`", name))),
            BoundExpr::Neg(a) => a.eval(params)?.checked_neg().ok_or_else(overflow),
            BoundExpr::Add(a, b) => a.eval(params)?.checked_add(b.eval(params)?).ok_or_else(overflow),
            BoundExpr::Sub(a, b) => a.eval(params)?.checked_sub(b.eval(params)?).ok_or_else(overflow),
            BoundExpr::Mul(a, b) => a.eval(params)?.checked_mul(b.eval(params)?).ok_or_else(overflow),
            BoundExpr::Div(a, b) => {
                let (a, b) = (a.eval(params)?, b.eval(params)?);
                if b == 0 {
                    return Err(Error::invalid_argument(format!("division by zero in `{}`", self)));
                }
                floor_div(a, b).ok_or_else(overflow)
            }
            BoundExpr::Min(a, b) => Ok(a.eval(params)?.min(b.eval(params)?)),
            BoundExpr::Max(a, b) => Ok(a.eval(params)?.max(b.eval(params)?)),
        }
    }

    /// Folds literal arithmetic and removes neutral elements.
    ///
    /// Only rewrites that hold for every value of the free symbols are applied;
    /// `min`/`max` over non-literal operands stay symbolic.
    pub fn simplify(&self) -> BoundExpr {
        use BoundExpr as E;

        match self {
            E::Int(_) | E::Var(_) => self.clone(),
            E::Neg(a) => match a.simplify() {
                E::Int(v) => v.checked_neg().map(E::Int).unwrap_or_else(|| E::Neg(Box::new(E::Int(v)))),
                E::Neg(inner) => *inner,
                other => E::Neg(Box::new(other)),
            },
            E::Add(a, b) => match (a.simplify(), b.simplify()) {
                (E::Int(x), E::Int(y)) if x.checked_add(y).is_some() => E::Int(x + y),
                (E::Int(0), e) | (e, E::Int(0)) => e,
                (e, E::Int(y)) if y < 0 && y != i64::MIN => E::Sub(Box::new(e), Box::new(E::Int(-y))),
                (a, b) => E::Add(Box::new(a), Box::new(b)),
            },
            E::Sub(a, b) => match (a.simplify(), b.simplify()) {
                (E::Int(x), E::Int(y)) if x.checked_sub(y).is_some() => E::Int(x - y),
                (e, E::Int(0)) => e,
                (E::Int(0), e) => E::Neg(Box::new(e)).simplify(),
                (a, b) if a == b => E::Int(0),
                (a, b) => E::Sub(Box::new(a), Box::new(b)),
            },
            E::Mul(a, b) => match (a.simplify(), b.simplify()) {
                (E::Int(x), E::Int(y)) if x.checked_mul(y).is_some() => E::Int(x * y),
                (E::Int(0), _) | (_, E::Int(0)) => E::Int(0),
                (E::Int(1), e) | (e, E::Int(1)) => e,
                (a, b) => E::Mul(Box::new(a), Box::new(b)),
            },
            E::Div(a, b) => match (a.simplify(), b.simplify()) {
                (E::Int(x), E::Int(y)) if y != 0 => match floor_div(x, y) {
                    Some(q) => E::Int(q),
                    None => E::Div(Box::new(E::Int(x)), Box::new(E::Int(y))),
                },
                (e, E::Int(1)) => e,
                (a, b) => E::Div(Box::new(a), Box::new(b)),
            },
            E::Min(a, b) => match (a.simplify(), b.simplify()) {
                (E::Int(x), E::Int(y)) => E::Int(x.min(y)),
                (a, b) if a == b => a,
                (a, b) => E::Min(Box::new(a), Box::new(b)),
            },
            E::Max(a, b) => match (a.simplify(), b.simplify()) {
                (E::Int(x), E::Int(y)) => E::Int(x.max(y)),
                (a, b) if a == b => a,
                (a, b) => E::Max(Box::new(a), Box::new(b)),
            },
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            BoundExpr::Add(_, _) | BoundExpr::Sub(_, _) => 1,
            BoundExpr::Mul(_, _) | BoundExpr::Div(_, _) => 2,
            BoundExpr::Neg(_) => 3,
            BoundExpr::Int(v) if *v < 0 => 3,
            _ => 4,
        }
    }
}

/// Floor division, `None` on overflow (`i64::MIN / -1`).
pub(crate) fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

impl From<i64> for BoundExpr {
    fn from(value: i64) -> Self {
        BoundExpr::Int(value)
    }
}

impl From<i32> for BoundExpr {
    fn from(value: i32) -> Self {
        BoundExpr::Int(value as i64)
    }
}

impl From<&str> for BoundExpr {
    fn from(name: &str) -> Self {
        BoundExpr::Var(name.to_string())
    }
}

impl Add for BoundExpr {
    type Output = BoundExpr;

    fn add(self, rhs: Self) -> Self::Output {
        BoundExpr::Add(Box::new(self), Box::new(rhs))
    }
}

impl Add<i64> for BoundExpr {
    type Output = BoundExpr;

    fn add(self, rhs: i64) -> Self::Output {
        self + BoundExpr::Int(rhs)
    }
}

impl Sub for BoundExpr {
    type Output = BoundExpr;

    fn sub(self, rhs: Self) -> Self::Output {
        BoundExpr::Sub(Box::new(self), Box::new(rhs))
    }
}

impl Sub<i64> for BoundExpr {
    type Output = BoundExpr;

    fn sub(self, rhs: i64) -> Self::Output {
        self - BoundExpr::Int(rhs)
    }
}

impl Mul for BoundExpr {
    type Output = BoundExpr;

    fn mul(self, rhs: Self) -> Self::Output {
        BoundExpr::Mul(Box::new(self), Box::new(rhs))
    }
}

impl Mul<BoundExpr> for i64 {
    type Output = BoundExpr;

    fn mul(self, rhs: BoundExpr) -> Self::Output {
        BoundExpr::Int(self) * rhs
    }
}

impl Neg for BoundExpr {
    type Output = BoundExpr;

    fn neg(self) -> Self::Output {
        BoundExpr::Neg(Box::new(self))
    }
}

impl fmt::Display for BoundExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Left operands need parens only when they bind looser; right operands of `-`,
        // `*` and `/` also when they bind equally.
        let operand = |f: &mut fmt::Formatter<'_>, e: &BoundExpr, min_prec: u8| {
            if e.precedence() < min_prec {
                write!(f, "({})", e)
            } else {
                write!(f, "{}", e)
            }
        };
        match self {
            BoundExpr::Int(v) => write!(f, "{}", v),
            BoundExpr::Var(name) => write!(f, "{}", name),
            BoundExpr::Neg(a) => {
                write!(f, "-")?;
                operand(f, a, 4)
            }
            BoundExpr::Add(a, b) => {
                operand(f, a, 1)?;
                write!(f, " + ")?;
                operand(f, b, 2)
            }
            BoundExpr::Sub(a, b) => {
                operand(f, a, 1)?;
                write!(f, " - ")?;
                operand(f, b, 2)
            }
            BoundExpr::Mul(a, b) => {
                operand(f, a, 2)?;
                write!(f, "*")?;
                operand(f, b, 3)
            }
            BoundExpr::Div(a, b) => {
                operand(f, a, 2)?;
                write!(f, " / ")?;
                operand(f, b, 3)
            }
            BoundExpr::Min(a, b) => write!(f, "min({}, {})", a, b),
            BoundExpr::Max(a, b) => write!(f, "max({}, {})", a, b),
        }
    }
}

impl FromStr for BoundExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parser = crate::parser::Parser::new(s)?;
        let expr = parser.expr()?;
        parser.finish()?;
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn params(pairs: &[(&str, i64)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_substitute_replaces_only_bound_symbols() {
        let e = BoundExpr::var("n") - BoundExpr::var("k") + 1;
        let s = e.substitute(&params(&[("n", 10)]));
        assert_eq!(s, BoundExpr::int(10) - BoundExpr::var("k") + 1);
        assert_eq!(s.free_symbols(), BTreeSet::from(["k".to_string()]));
    }

    #[test]
    fn test_substitute_without_match_is_identity() {
        let e = BoundExpr::min(BoundExpr::var("n"), BoundExpr::var("i") + 3);
        assert_eq!(e.substitute(&params(&[("m", 4)])), e);
    }

    #[test]
    fn test_substitute_is_idempotent() {
        let e = BoundExpr::max(0.into(), BoundExpr::var("t") - BoundExpr::var("k"));
        let p = params(&[("t", 3), ("x", 1)]);
        let once = e.substitute(&p);
        assert_eq!(once.substitute(&p), once);
    }

    #[test]
    fn test_eval() {
        let e: BoundExpr = "min(n, i + k + 1)".parse().unwrap();
        assert_eq!(e.eval(&params(&[("n", 10), ("i", 2), ("k", 3)])).unwrap(), 6);
        assert_eq!(e.eval(&params(&[("n", 4), ("i", 2), ("k", 3)])).unwrap(), 4);
    }

    #[test]
    fn test_eval_unbound_symbol() {
        let e = BoundExpr::var("n");
        assert!(matches!(e.eval(&Params::new()), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_eval_floor_division() {
        let p = Params::new();
        assert_eq!(BoundExpr::div((-7).into(), 2.into()).eval(&p).unwrap(), -4);
        assert_eq!(BoundExpr::div(7.into(), 2.into()).eval(&p).unwrap(), 3);
        assert_eq!(BoundExpr::div(7.into(), (-2).into()).eval(&p).unwrap(), -4);
        assert!(BoundExpr::div(1.into(), 0.into()).eval(&p).is_err());
    }

    #[test]
    fn test_simplify() {
        let e: BoundExpr = "max(0, 3 - 5) + 1 * n - 0".parse().unwrap();
        assert_eq!(e.simplify(), BoundExpr::var("n"));

        let e: BoundExpr = "min(n, n)".parse().unwrap();
        assert_eq!(e.simplify(), BoundExpr::var("n"));

        let e: BoundExpr = "max(0, t - k)".parse().unwrap();
        assert_eq!(e.simplify(), e);

        let e: BoundExpr = "7 / -2".parse().unwrap();
        assert_eq!(e.simplify(), BoundExpr::int(-4));
    }

    #[test]
    fn test_display() {
        let e = BoundExpr::var("n") - (BoundExpr::var("i") + 1);
        assert_eq!(e.to_string(), "n - (i + 1)");
        let e = 2 * (BoundExpr::var("k") + 1);
        assert_eq!(e.to_string(), "2*(k + 1)");
        let e = BoundExpr::min("n".into(), BoundExpr::var("t") + BoundExpr::var("k") + 1);
        assert_eq!(e.to_string(), "min(n, t + k + 1)");
    }

    #[test]
    fn test_display_parse_agree() {
        for src in ["n - (i + 1)", "max(0, diag - m + 1)", "-(a + b)*c", "n / 2 - 1"] {
            let e: BoundExpr = src.parse().unwrap();
            let again: BoundExpr = e.to_string().parse().unwrap();
            assert_eq!(e, again, "{}", src);
        }
    }

    #[test]
    fn test_contains_min_max() {
        assert!(!BoundExpr::var("n").contains_min_max());
        let e: BoundExpr = "1 + min(n, 3)".parse().unwrap();
        assert!(e.contains_min_max());
    }
}
