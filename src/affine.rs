//! Affine forms `c0 + c1*x1 + ... + ck*xk` over named symbols.
//!
//! [`AffineForm::try_from_expr`] linearizes a [`BoundExpr`] that is already affine.
//! [`max_of_affine`] and [`min_of_affine`] go one step further: they rewrite a bound that
//! contains `min`/`max` into the list of affine operands it is the maximum (minimum) of,
//! distributing sums, differences, negation and constant scaling through nested
//! `min`/`max` nodes. A `min` that ends up in a maximum position (or vice versa) would
//! need a disjunction and is rejected.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::expr::{BoundExpr, Params};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AffineForm {
    /// Non-zero coefficients only.
    coeffs: BTreeMap<String, i64>,
    constant: i64,
}

fn overflow() -> Error {
    Error::domain("integer overflow in affine arithmetic")
}

/// `Some(c / d)` when `d` divides `c`, `None` when it does not.
fn exact_div(c: i64, d: i64) -> Result<Option<i64>> {
    match c.checked_rem(d).ok_or_else(overflow)? {
        0 => c.checked_div(d).map(Some).ok_or_else(overflow),
        _ => Ok(None),
    }
}

impl AffineForm {
    pub fn constant(value: i64) -> Self {
        Self {
            coeffs: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::term(1, name)
    }

    pub fn term(coeff: i64, name: impl Into<String>) -> Self {
        let mut coeffs = BTreeMap::new();
        if coeff != 0 {
            coeffs.insert(name.into(), coeff);
        }
        Self { coeffs, constant: 0 }
    }

    /// Builds a form from a coefficient map, dropping zero entries.
    pub fn from_parts(coeffs: impl IntoIterator<Item = (String, i64)>, constant: i64) -> Self {
        let coeffs = coeffs.into_iter().filter(|(_, c)| *c != 0).collect();
        Self { coeffs, constant }
    }

    pub fn constant_term(&self) -> i64 {
        self.constant
    }

    pub fn coefficient(&self, name: &str) -> i64 {
        self.coeffs.get(name).copied().unwrap_or(0)
    }

    pub fn coefficients(&self) -> &BTreeMap<String, i64> {
        &self.coeffs
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn symbols(&self) -> BTreeSet<String> {
        self.coeffs.keys().cloned().collect()
    }

    pub fn checked_add(&self, rhs: &AffineForm) -> Result<AffineForm> {
        let mut out = self.clone();
        out.constant = out.constant.checked_add(rhs.constant).ok_or_else(overflow)?;
        for (name, c) in &rhs.coeffs {
            let entry = out.coeffs.entry(name.clone()).or_insert(0);
            *entry = entry.checked_add(*c).ok_or_else(overflow)?;
        }
        out.coeffs.retain(|_, c| *c != 0);
        Ok(out)
    }

    pub fn checked_sub(&self, rhs: &AffineForm) -> Result<AffineForm> {
        self.checked_add(&rhs.checked_scale(-1)?)
    }

    pub fn checked_scale(&self, factor: i64) -> Result<AffineForm> {
        if factor == 0 {
            return Ok(AffineForm::default());
        }
        let mut coeffs = BTreeMap::new();
        for (name, c) in &self.coeffs {
            coeffs.insert(name.clone(), c.checked_mul(factor).ok_or_else(overflow)?);
        }
        Ok(AffineForm {
            coeffs,
            constant: self.constant.checked_mul(factor).ok_or_else(overflow)?,
        })
    }

    pub fn checked_add_constant(&self, value: i64) -> Result<AffineForm> {
        let mut out = self.clone();
        out.constant = out.constant.checked_add(value).ok_or_else(overflow)?;
        Ok(out)
    }

    /// Evaluates the form; `None` if a symbol is unbound or the result overflows.
    pub fn eval(&self, values: &Params) -> Option<i64> {
        let mut acc = self.constant;
        for (name, c) in &self.coeffs {
            let v = *values.get(name)?;
            acc = acc.checked_add(c.checked_mul(v)?)?;
        }
        Some(acc)
    }

    /// Linearizes an expression that contains no `min`/`max` and only affine operators.
    pub fn try_from_expr(expr: &BoundExpr) -> Result<AffineForm> {
        match expr {
            BoundExpr::Int(v) => Ok(AffineForm::constant(*v)),
            BoundExpr::Var(name) => Ok(AffineForm::var(name.clone())),
            BoundExpr::Neg(a) => AffineForm::try_from_expr(a)?.checked_scale(-1),
            BoundExpr::Add(a, b) => AffineForm::try_from_expr(a)?.checked_add(&AffineForm::try_from_expr(b)?),
            BoundExpr::Sub(a, b) => AffineForm::try_from_expr(a)?.checked_sub(&AffineForm::try_from_expr(b)?),
            BoundExpr::Mul(a, b) => {
                let (a, b) = (AffineForm::try_from_expr(a)?, AffineForm::try_from_expr(b)?);
                if a.is_constant() {
                    b.checked_scale(a.constant)
                } else if b.is_constant() {
                    a.checked_scale(b.constant)
                } else {
                    Err(Error::domain(format!("`{}` is a product of two non-constant terms", expr)))
                }
            }
            BoundExpr::Div(a, b) => {
                let (a, b) = (AffineForm::try_from_expr(a)?, AffineForm::try_from_expr(b)?);
                match b.is_constant().then_some(b.constant) {
                    Some(0) => Err(Error::domain(format!("division by zero in `{}`", expr))),
                    Some(d) if a.is_constant() => {
                        let q = crate::expr::floor_div(a.constant, d).ok_or_else(overflow)?;
                        Ok(AffineForm::constant(q))
                    }
                    // Exact division keeps the form affine.
                    Some(d) => {
                        let constant = exact_div(a.constant, d)?;
                        let coeffs = a
                            .coeffs
                            .iter()
                            .map(|(n, &c)| Ok(exact_div(c, d)?.map(|q| (n.clone(), q))))
                            .collect::<Result<Option<BTreeMap<_, _>>>>()?;
                        match (constant, coeffs) {
                            (Some(constant), Some(coeffs)) => Ok(AffineForm { coeffs, constant }),
                            _ => Err(Error::domain(format!("`{}` is not affine (floor division)", expr))),
                        }
                    }
                    None => Err(Error::domain(format!("`{}` is not affine (floor division)", expr))),
                }
            }
            BoundExpr::Min(_, _) | BoundExpr::Max(_, _) => Err(Error::domain(format!(
                "`{}` contains min/max and has no single affine form",
                expr
            ))),
        }
    }

    /// Converts back into an expression tree.
    pub fn to_expr(&self) -> BoundExpr {
        let mut acc: Option<BoundExpr> = None;
        for (name, &c) in &self.coeffs {
            let term = match c {
                1 => BoundExpr::var(name.clone()),
                -1 => -BoundExpr::var(name.clone()),
                _ => c * BoundExpr::var(name.clone()),
            };
            acc = Some(match acc {
                None => term,
                Some(e) => e + term,
            });
        }
        match acc {
            None => BoundExpr::Int(self.constant),
            Some(e) if self.constant == 0 => e,
            Some(e) => (e + self.constant).simplify(),
        }
    }
}

impl fmt::Display for AffineForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}

/// Cross-combines two operand lists with `op`, deduplicating the result.
fn combine<F>(lhs: &[AffineForm], rhs: &[AffineForm], op: F) -> Result<Vec<AffineForm>>
where
    F: Fn(&AffineForm, &AffineForm) -> Result<AffineForm>,
{
    let mut out: Vec<AffineForm> = Vec::with_capacity(lhs.len() * rhs.len());
    for a in lhs {
        for b in rhs {
            let c = op(a, b)?;
            if !out.contains(&c) {
                out.push(c);
            }
        }
    }
    Ok(out)
}

fn scale_all(forms: &[AffineForm], factor: i64) -> Result<Vec<AffineForm>> {
    forms.iter().map(|f| f.checked_scale(factor)).collect()
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Extremum {
    Max,
    Min,
}

impl Extremum {
    fn flip(self) -> Self {
        match self {
            Extremum::Max => Extremum::Min,
            Extremum::Min => Extremum::Max,
        }
    }
}

fn operands_of(expr: &BoundExpr, want: Extremum) -> Result<Vec<AffineForm>> {
    if !expr.contains_min_max() {
        return Ok(vec![AffineForm::try_from_expr(expr)?]);
    }
    match expr {
        BoundExpr::Max(a, b) | BoundExpr::Min(a, b) => {
            let is_max = matches!(expr, BoundExpr::Max(_, _));
            if is_max != (want == Extremum::Max) {
                return Err(Error::domain(format!(
                    "`{}` would need a disjunction of constraints in this position",
                    expr
                )));
            }
            let mut out = operands_of(a, want)?;
            for f in operands_of(b, want)? {
                if !out.contains(&f) {
                    out.push(f);
                }
            }
            Ok(out)
        }
        BoundExpr::Add(a, b) => combine(&operands_of(a, want)?, &operands_of(b, want)?, |x, y| x.checked_add(y)),
        BoundExpr::Sub(a, b) => combine(&operands_of(a, want)?, &operands_of(b, want.flip())?, |x, y| {
            x.checked_sub(y)
        }),
        BoundExpr::Neg(a) => scale_all(&operands_of(a, want.flip())?, -1),
        BoundExpr::Mul(a, b) => {
            let (factor, inner) = match (a.simplify().as_int(), b.simplify().as_int()) {
                (Some(c), _) => (c, b),
                (_, Some(c)) => (c, a),
                _ => {
                    return Err(Error::domain(format!(
                        "`{}` multiplies a min/max by a non-constant",
                        expr
                    )))
                }
            };
            if factor >= 0 {
                scale_all(&operands_of(inner, want)?, factor)
            } else {
                scale_all(&operands_of(inner, want.flip())?, factor)
            }
        }
        _ => Err(Error::domain(format!("`{}` is not affine", expr))),
    }
}

/// Returns affine forms `a1..ak` with `expr == max(a1, ..., ak)`.
///
/// A lower bound `v >= expr` is then equivalent to `v >= a1 and ... and v >= ak`.
pub fn max_of_affine(expr: &BoundExpr) -> Result<Vec<AffineForm>> {
    operands_of(&expr.simplify(), Extremum::Max)
}

/// Returns affine forms `b1..bk` with `expr == min(b1, ..., bk)`.
pub fn min_of_affine(expr: &BoundExpr) -> Result<Vec<AffineForm>> {
    operands_of(&expr.simplify(), Extremum::Min)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn affine(src: &str) -> AffineForm {
        AffineForm::try_from_expr(&src.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_linearize() {
        let f = affine("2*(i + 1) - j + n - 3");
        assert_eq!(f.coefficient("i"), 2);
        assert_eq!(f.coefficient("j"), -1);
        assert_eq!(f.coefficient("n"), 1);
        assert_eq!(f.constant_term(), -1);
    }

    #[test]
    fn test_linearize_cancels_terms() {
        let f = affine("i + j - i");
        assert_eq!(f.symbols(), BTreeSet::from(["j".to_string()]));
    }

    #[test]
    fn test_linearize_rejects_non_affine() {
        let e: BoundExpr = "i * j".parse().unwrap();
        assert!(matches!(AffineForm::try_from_expr(&e), Err(Error::DomainConstruction(_))));
        let e: BoundExpr = "n / 2".parse().unwrap();
        assert!(AffineForm::try_from_expr(&e).is_err());
        let e: BoundExpr = "max(0, n)".parse().unwrap();
        assert!(AffineForm::try_from_expr(&e).is_err());
    }

    #[test]
    fn test_linearize_exact_division() {
        assert_eq!(affine("(4*n + 2) / 2"), affine("2*n + 1"));
        assert_eq!(affine("7 / 2"), AffineForm::constant(3));
    }

    #[test]
    fn test_linearize_division_overflow() {
        let e = BoundExpr::div(2 * BoundExpr::var("n") + BoundExpr::Int(i64::MIN), BoundExpr::Int(-1));
        assert!(matches!(AffineForm::try_from_expr(&e), Err(Error::DomainConstruction(_))));
        let e = BoundExpr::div(i64::MIN * BoundExpr::var("n"), BoundExpr::Int(-1));
        assert!(matches!(AffineForm::try_from_expr(&e), Err(Error::DomainConstruction(_))));
    }

    #[test]
    fn test_max_operands() {
        let e: BoundExpr = "max(0, t - k)".parse().unwrap();
        let ops = max_of_affine(&e).unwrap();
        assert_eq!(ops, vec![AffineForm::constant(0), affine("t - k")]);
    }

    #[test]
    fn test_nested_distribution() {
        // max(0, i - k) + 1 == max(1, i - k + 1)
        let e: BoundExpr = "max(0, i - k) + 1".parse().unwrap();
        assert_eq!(max_of_affine(&e).unwrap(), vec![AffineForm::constant(1), affine("i - k + 1")]);

        // n - min(a, b) == max(n - a, n - b)
        let e: BoundExpr = "n - min(a, b)".parse().unwrap();
        assert_eq!(max_of_affine(&e).unwrap(), vec![affine("n - a"), affine("n - b")]);

        // -max(a, b) == min(-a, -b)
        let e: BoundExpr = "-max(a, b)".parse().unwrap();
        assert_eq!(min_of_affine(&e).unwrap(), vec![affine("-a"), affine("-b")]);

        // 2*min(a, max(b, c)) cannot be expressed as a plain min.
        let e: BoundExpr = "2*min(a, max(b, c))".parse().unwrap();
        assert!(min_of_affine(&e).is_err());

        let e: BoundExpr = "min(a, min(b, c + 1))".parse().unwrap();
        assert_eq!(min_of_affine(&e).unwrap().len(), 3);
    }

    #[test]
    fn test_wrong_extremum_is_rejected() {
        let e: BoundExpr = "min(n, t + k + 1)".parse().unwrap();
        assert!(matches!(max_of_affine(&e), Err(Error::DomainConstruction(_))));
        assert_eq!(min_of_affine(&e).unwrap().len(), 2);
    }

    #[test]
    fn test_constant_min_max_folds() {
        let e: BoundExpr = "min(5, 2 + 1)".parse().unwrap();
        assert_eq!(max_of_affine(&e).unwrap(), vec![AffineForm::constant(3)]);
    }

    #[test]
    fn test_display() {
        assert_eq!(affine("n - 1 - i").to_string(), "-i + n - 1");
        assert_eq!(AffineForm::constant(-4).to_string(), "-4");
    }
}
