//! Affine domain construction.
//!
//! [`to_domain`] turns a [`LoopStructure`] into a conjunction of affine inequalities over
//! its loop variables. Each level contributes `v >= start` and `v <= end - 1`; a `max` in
//! the start (a `min` in the end) becomes one constraint per operand, so symbolic
//! comparisons are never resolved by guessing. Linear guards contribute their normal form.
//!
//! The textual form is the isl set syntax understood by `iscc`:
//!
//! ```text
//! [n] -> {[i, j]: i >= 0 and i - n <= -1 and j >= 0 and -i + j <= -1}
//! ```
//!
//! Terms are written loop variables first, in declaration order, then parameters in
//! lexicographic order; every constraint is `terms <= constant` or `terms >= constant`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use log::{debug, trace};
use num_bigint::BigUint;
use num_traits::Zero;

use crate::affine::{max_of_affine, min_of_affine, AffineForm};
use crate::error::{Error, Result};
use crate::expr::Params;
use crate::loops::{LoopStructure, RelOp};
use crate::parser::{Parser, Token};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Relation {
    Le,
    Ge,
}

impl Relation {
    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Relation::Le => lhs <= rhs,
            Relation::Ge => lhs >= rhs,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Relation::Le => "<=",
            Relation::Ge => ">=",
        })
    }
}

/// A single inequality `form relation bound`.
///
/// `form` never carries a constant term; constants live in `bound`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub form: AffineForm,
    pub relation: Relation,
    pub bound: i64,
}

impl Constraint {
    /// Normalizes `lhs relation 0`.
    pub fn new(lhs: AffineForm, relation: Relation) -> Result<Self> {
        let bound = lhs
            .constant_term()
            .checked_neg()
            .ok_or_else(|| Error::domain("integer overflow in constraint constant"))?;
        Ok(Self {
            form: AffineForm::from_parts(lhs.coefficients().clone(), 0),
            relation,
            bound,
        })
    }

    /// Constraints equivalent to `lhs op 0` over the integers.
    ///
    /// Strict comparisons are tightened by one; `==` yields two constraints.
    pub fn from_relation(lhs: AffineForm, op: RelOp) -> Result<Vec<Self>> {
        Ok(match op {
            RelOp::Le => vec![Constraint::new(lhs, Relation::Le)?],
            RelOp::Ge => vec![Constraint::new(lhs, Relation::Ge)?],
            RelOp::Lt => vec![Constraint::new(lhs.checked_add_constant(1)?, Relation::Le)?],
            RelOp::Gt => vec![Constraint::new(lhs.checked_add_constant(-1)?, Relation::Ge)?],
            RelOp::Eq => vec![
                Constraint::new(lhs.clone(), Relation::Le)?,
                Constraint::new(lhs, Relation::Ge)?,
            ],
        })
    }

    /// Evaluates the constraint; `None` if a symbol is unbound.
    pub fn holds(&self, values: &Params) -> Option<bool> {
        Some(self.relation.holds(self.form.eval(values)?, self.bound))
    }

    /// A constraint without symbols that is always satisfied.
    pub fn is_tautology(&self) -> bool {
        self.form.is_constant() && self.relation.holds(0, self.bound)
    }

    /// The same constraint as `form <= bound`, returned as `(coefficients, bound)` over
    /// `columns`.
    fn as_upper_row(&self, columns: &[String]) -> Result<(Vec<i64>, i64)> {
        let overflow = || Error::invalid_argument(format!("cannot negate `{}`", self));
        let sign = match self.relation {
            Relation::Le => 1,
            Relation::Ge => -1,
        };
        let mut row = Vec::with_capacity(columns.len());
        for name in columns {
            row.push(self.form.coefficient(name).checked_mul(sign).ok_or_else(overflow)?);
        }
        Ok((row, self.bound.checked_mul(sign).ok_or_else(overflow)?))
    }

    fn write_terms(&self, f: &mut fmt::Formatter<'_>, order: &[&str]) -> fmt::Result {
        let mut first = true;
        for name in order {
            let c = self.form.coefficient(name);
            if c == 0 {
                continue;
            }
            if first {
                if c < 0 {
                    write!(f, "-")?;
                }
            } else {
                write!(f, " {} ", if c < 0 { '-' } else { '+' })?;
            }
            if c.unsigned_abs() != 1 {
                write!(f, "{}*", c.unsigned_abs())?;
            }
            write!(f, "{}", name)?;
            first = false;
        }
        if first {
            write!(f, "0")?;
        }
        write!(f, " {} {}", self.relation, self.bound)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbols = self.form.symbols();
        let order: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
        self.write_terms(f, &order)
    }
}

/// An ordered tuple of variables constrained by a conjunction of affine inequalities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub variables: Vec<String>,
    /// Symbols that appear in constraints but are not variables, sorted.
    pub parameters: Vec<String>,
    pub constraints: Vec<Constraint>,
}

impl Domain {
    /// Builds a domain, dropping duplicate and trivially true constraints.
    pub fn new(variables: Vec<String>, constraints: impl IntoIterator<Item = Constraint>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for v in &variables {
            if !seen.insert(v.as_str()) {
                return Err(Error::invalid_argument(format!("variable `{}` is declared twice", v)));
            }
        }
        let mut domain = Self {
            variables,
            parameters: Vec::new(),
            constraints: Vec::new(),
        };
        for c in constraints {
            domain.push(c);
        }
        Ok(domain)
    }

    /// Adds a constraint, keeping the parameter list up to date.
    pub fn push(&mut self, constraint: Constraint) {
        if constraint.is_tautology() || self.constraints.contains(&constraint) {
            return;
        }
        for symbol in constraint.form.symbols() {
            if !self.variables.contains(&symbol) && !self.parameters.contains(&symbol) {
                self.parameters.push(symbol);
            }
        }
        self.parameters.sort();
        self.constraints.push(constraint);
    }

    pub fn is_parametric(&self) -> bool {
        !self.parameters.is_empty()
    }

    /// Variables followed by parameters; the column order of [`Domain::to_matrix`].
    pub fn columns(&self) -> Vec<String> {
        self.variables.iter().chain(&self.parameters).cloned().collect()
    }

    /// Checks whether a point (with every parameter bound) satisfies all constraints.
    pub fn contains(&self, point: &Params) -> Result<bool> {
        for c in &self.constraints {
            match c.holds(point) {
                Some(true) => {}
                Some(false) => return Ok(false),
                None => return Err(Error::invalid_argument(format!("point does not bind every symbol of `{}`", c))),
            }
        }
        Ok(true)
    }

    /// Matrix form `A x <= b` over [`Domain::columns`].
    pub fn to_matrix(&self) -> Result<(Vec<Vec<i64>>, Vec<i64>)> {
        let columns = self.columns();
        let mut a = Vec::with_capacity(self.constraints.len());
        let mut b = Vec::with_capacity(self.constraints.len());
        for c in &self.constraints {
            let (row, bound) = c.as_upper_row(&columns)?;
            a.push(row);
            b.push(bound);
        }
        Ok((a, b))
    }

    /// Inverse of [`Domain::to_matrix`]: columns are `variables` followed by `parameters`.
    pub fn from_matrix(variables: Vec<String>, parameters: Vec<String>, a: &[Vec<i64>], b: &[i64]) -> Result<Self> {
        if a.len() != b.len() {
            return Err(Error::invalid_argument(format!(
                "matrix has {} rows but bound vector has {} entries",
                a.len(),
                b.len()
            )));
        }
        let columns: Vec<String> = variables.iter().chain(&parameters).cloned().collect();
        let mut constraints = Vec::with_capacity(a.len());
        for (k, (row, &bound)) in a.iter().zip(b).enumerate() {
            if row.len() != columns.len() {
                return Err(Error::invalid_argument(format!(
                    "row {} has {} coefficients for {} columns",
                    k,
                    row.len(),
                    columns.len()
                )));
            }
            constraints.push(Constraint {
                form: AffineForm::from_parts(columns.iter().cloned().zip(row.iter().copied()), 0),
                relation: Relation::Le,
                bound,
            });
        }
        let mut domain = Domain::new(variables, constraints)?;
        // Declared parameters stay declared even if every coefficient is zero.
        for p in parameters {
            if !domain.parameters.contains(&p) {
                domain.parameters.push(p);
            }
        }
        domain.parameters.sort();
        Ok(domain)
    }

    /// Counts the integer points of a non-parametric, bounded domain.
    ///
    /// Bounds for outer variables are obtained by Fourier-Motzkin elimination of the
    /// inner ones, so the domain need not be written level by level.
    pub fn count_points(&self) -> Result<BigUint> {
        if self.is_parametric() {
            return Err(Error::invalid_argument(format!(
                "cannot enumerate a parametric domain (parameters: {})",
                self.parameters.join(", ")
            )));
        }
        let Some(levels) = Projection::new(self)? else {
            return Ok(BigUint::zero());
        };
        let mut values = Vec::with_capacity(self.variables.len());
        let mut total = BigUint::zero();
        levels.walk(&self.variables, &mut values, &mut total)?;
        Ok(total)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_parametric() {
            write!(f, "[{}] -> ", self.parameters.join(", "))?;
        }
        write!(f, "{{[{}]", self.variables.join(", "))?;
        let order: Vec<&str> = self.variables.iter().chain(&self.parameters).map(|s| s.as_str()).collect();
        for (k, c) in self.constraints.iter().enumerate() {
            write!(f, "{}", if k == 0 { ": " } else { " and " })?;
            c.write_terms(f, &order)?;
        }
        write!(f, "}}")
    }
}

fn name_list(parser: &mut Parser) -> Result<Vec<String>> {
    parser.expect(&Token::LBracket)?;
    let mut names = Vec::new();
    if parser.eat(&Token::RBracket) {
        return Ok(names);
    }
    loop {
        names.push(parser.ident()?);
        if parser.eat(&Token::RBracket) {
            return Ok(names);
        }
        parser.expect(&Token::Comma)?;
    }
}

/// Parses `a op b [op c ...]`; chains such as `0 <= i < n` are split pairwise.
fn comparison_chain(parser: &mut Parser) -> Result<Vec<Constraint>> {
    let mut lhs = parser.expr()?;
    let mut out = Vec::new();
    while let Some(op) = parser.rel_op() {
        let rhs = parser.expr()?;
        let form = AffineForm::try_from_expr(&(lhs.clone() - rhs.clone()))?;
        out.extend(Constraint::from_relation(form, op)?);
        lhs = rhs;
    }
    if out.is_empty() {
        return Err(Error::invalid_argument(format!("expected a comparison after `{}`", lhs)));
    }
    Ok(out)
}

impl FromStr for Domain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parser = Parser::new(s)?;
        let mut declared = Vec::new();
        if parser.peek() == Some(&Token::LBracket) {
            declared = name_list(&mut parser)?;
            parser.expect(&Token::Arrow)?;
        }
        parser.expect(&Token::LBrace)?;
        let variables = name_list(&mut parser)?;
        let mut constraints = Vec::new();
        if parser.eat(&Token::Colon) {
            loop {
                constraints.extend(comparison_chain(&mut parser)?);
                if !parser.eat(&Token::Ident("and".to_string())) {
                    break;
                }
            }
        }
        parser.expect(&Token::RBrace)?;
        parser.finish()?;

        let domain = Domain::new(variables, constraints)?;
        if let Some(p) = domain.parameters.iter().find(|p| !declared.contains(p)) {
            return Err(Error::invalid_argument(format!("symbol `{}` is neither a variable nor a parameter", p)));
        }
        Ok(domain)
    }
}

/// Builds the affine domain of `structure`.
///
/// Fails with [`Error::DomainConstruction`] when a bound is not a max (lower) or min
/// (upper) of affine expressions, when a guard is not linear, or when a step is not 1.
pub fn to_domain(structure: &LoopStructure) -> Result<Domain> {
    structure.validate()?;
    let mut domain = Domain::new(structure.variables().into_iter().map(String::from).collect(), [])?;

    for bound in &structure.bounds {
        if !bound.has_unit_step() {
            return Err(Error::domain(format!(
                "loop `{}` has step `{}`; only unit steps are supported",
                bound.variable, bound.step
            )));
        }
        let v = AffineForm::var(bound.variable.clone());
        for lower in max_of_affine(&bound.start)? {
            let c = Constraint::new(v.checked_sub(&lower)?, Relation::Ge)?;
            trace!("{}: lower bound {}", bound.variable, c);
            domain.push(c);
        }
        for upper in min_of_affine(&bound.end)? {
            // v < upper  <=>  v - upper + 1 <= 0
            let c = Constraint::new(v.checked_sub(&upper)?.checked_add_constant(1)?, Relation::Le)?;
            trace!("{}: upper bound {}", bound.variable, c);
            domain.push(c);
        }
    }

    for condition in &structure.conditions {
        let form = condition
            .linear_form()
            .ok_or_else(|| Error::domain(format!("guard `{}` is not linear", condition.expression)))?;
        for c in Constraint::from_relation(form, condition.expression.op)? {
            trace!("guard: {}", c);
            domain.push(c);
        }
    }

    debug!("built domain {}", domain);
    Ok(domain)
}

impl LoopStructure {
    /// Shorthand for [`to_domain`].
    pub fn to_domain(&self) -> Result<Domain> {
        to_domain(self)
    }
}

/// `coeffs . x <= bound` over the domain variables, widened to avoid overflow during
/// elimination.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Row {
    coeffs: Vec<i128>,
    bound: i128,
}

impl Row {
    /// Divides by the gcd of the coefficients, rounding the bound down.
    fn normalized(mut self) -> Self {
        let g = self.coeffs.iter().fold(0i128, |g, &c| gcd(g, c.abs()));
        if g > 1 {
            for c in &mut self.coeffs {
                *c /= g;
            }
            self.bound = self.bound.div_euclid(g);
        }
        self
    }

    fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0)
    }
}

fn gcd(a: i128, b: i128) -> i128 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn div_floor(a: i128, b: i128) -> i128 {
    let q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn div_ceil(a: i128, b: i128) -> i128 {
    -div_floor(-a, b)
}

/// Per-level bounding rows: `levels[k]` holds rows whose last non-zero coefficient is at
/// `k`. Every original constraint lands on its own last level; the rest are implied rows
/// produced by elimination.
struct Projection {
    levels: Vec<Vec<Row>>,
}

impl Projection {
    /// Returns `None` when elimination proves the domain empty.
    fn new(domain: &Domain) -> Result<Option<Self>> {
        let columns = domain.columns();
        let mut current = Vec::with_capacity(domain.constraints.len());
        for c in &domain.constraints {
            let (row, bound) = c.as_upper_row(&columns)?;
            let row = Row {
                coeffs: row.into_iter().map(i128::from).collect(),
                bound: bound.into(),
            }
            .normalized();
            if row.is_constant() {
                if row.bound < 0 {
                    return Ok(None);
                }
                continue;
            }
            current.push(row);
        }

        let n = domain.variables.len();
        let mut levels = vec![Vec::new(); n];
        for k in (0..n).rev() {
            let (with_k, mut next): (Vec<Row>, Vec<Row>) = current.into_iter().partition(|r| r.coeffs[k] != 0);
            for p in with_k.iter().filter(|r| r.coeffs[k] > 0) {
                for q in with_k.iter().filter(|r| r.coeffs[k] < 0) {
                    let (a, b) = (-q.coeffs[k], p.coeffs[k]);
                    let combine = |x: i128, y: i128| {
                        a.checked_mul(x)
                            .zip(b.checked_mul(y))
                            .and_then(|(ax, by)| ax.checked_add(by))
                            .filter(|&v| v != i128::MIN)
                            .ok_or_else(|| Error::invalid_argument("coefficient overflow while projecting domain"))
                    };
                    let combined = Row {
                        coeffs: p
                            .coeffs
                            .iter()
                            .zip(&q.coeffs)
                            .map(|(&x, &y)| combine(x, y))
                            .collect::<Result<_>>()?,
                        bound: combine(p.bound, q.bound)?,
                    }
                    .normalized();
                    if combined.is_constant() {
                        if combined.bound < 0 {
                            return Ok(None);
                        }
                    } else if !next.contains(&combined) {
                        next.push(combined);
                    }
                }
            }
            levels[k] = with_k;
            current = next;
        }
        Ok(Some(Self { levels }))
    }

    /// Inclusive range of variable `k` given the values of the enclosing ones.
    fn range(&self, k: usize, values: &[i64], name: &str) -> Result<(i128, i128)> {
        let mut lo: Option<i128> = None;
        let mut hi: Option<i128> = None;
        for row in &self.levels[k] {
            let overflow = || Error::invalid_argument(format!("bound of `{}` overflows", name));
            let mut rest: i128 = 0;
            for (c, &v) in row.coeffs[..k].iter().zip(values) {
                rest = c
                    .checked_mul(i128::from(v))
                    .and_then(|t| rest.checked_add(t))
                    .ok_or_else(overflow)?;
            }
            let c = row.coeffs[k];
            let limit = row
                .bound
                .checked_sub(rest)
                .filter(|&v| v != i128::MIN)
                .ok_or_else(overflow)?;
            if c > 0 {
                let h = div_floor(limit, c);
                hi = Some(hi.map_or(h, |x| x.min(h)));
            } else {
                let l = div_ceil(limit, c);
                lo = Some(lo.map_or(l, |x| x.max(l)));
            }
        }
        match (lo, hi) {
            (Some(lo), Some(hi)) => Ok((lo, hi)),
            _ => Err(Error::invalid_argument(format!("domain is unbounded in `{}`", name))),
        }
    }

    fn walk(&self, names: &[String], values: &mut Vec<i64>, total: &mut BigUint) -> Result<()> {
        let k = values.len();
        if k == names.len() {
            *total += 1u32;
            return Ok(());
        }
        let (lo, hi) = self.range(k, values, &names[k])?;
        if lo > hi {
            return Ok(());
        }
        if k + 1 == names.len() {
            *total += BigUint::from(hi.abs_diff(lo)) + 1u32;
            return Ok(());
        }
        let (lo, hi) = match (i64::try_from(lo), i64::try_from(hi)) {
            (Ok(lo), Ok(hi)) => (lo, hi),
            _ => return Err(Error::invalid_argument(format!("range of `{}` exceeds 64 bits", names[k]))),
        };
        for v in lo..=hi {
            values.push(v);
            self.walk(names, values, total)?;
            values.pop();
        }
        Ok(())
    }
}
