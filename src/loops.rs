//! Loop nest data model.
//!
//! A [`LoopStructure`] is what the extractor produces for one loop nest: the bounds of
//! every level (outermost first) and the guard conditions found in the body. The
//! classifier later fills in [`LoopStructure::pattern_type`] and
//! [`LoopStructure::parameters`]; everything else is treated as a value and concretized
//! copies are made with [`LoopStructure::substitute`].
//!
//! # Semantics
//!
//! A level `LoopBound { start, end, step, variable }` iterates
//! `variable = start, start + step, start + 2*step, ...` while `variable < end`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::affine::AffineForm;
use crate::error::{Error, Result};
use crate::expr::{BoundExpr, Params};
use crate::pattern::Pattern;

/// Bounds of a single loop level: `for variable in (start..end).step_by(step)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoopBound {
    pub start: BoundExpr,
    pub end: BoundExpr,
    pub step: BoundExpr,
    pub variable: String,
}

impl LoopBound {
    /// Creates a unit-step level.
    pub fn new(variable: impl Into<String>, start: impl Into<BoundExpr>, end: impl Into<BoundExpr>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            step: BoundExpr::Int(1),
            variable: variable.into(),
        }
    }

    pub fn with_step(mut self, step: impl Into<BoundExpr>) -> Self {
        self.step = step.into();
        self
    }

    pub fn has_unit_step(&self) -> bool {
        self.step.simplify() == BoundExpr::Int(1)
    }

    pub fn substitute(&self, params: &Params) -> Self {
        Self {
            start: self.start.substitute(params),
            end: self.end.substitute(params),
            step: self.step.substitute(params),
            variable: self.variable.clone(),
        }
    }

    /// Symbols referenced by start, end or step.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut symbols = self.start.free_symbols();
        symbols.extend(self.end.free_symbols());
        symbols.extend(self.step.free_symbols());
        symbols
    }
}

impl fmt::Display for LoopBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "for {} in [{}, {})", self.variable, self.start, self.end)?;
        if self.step != BoundExpr::Int(1) {
            write!(f, " step {}", self.step)?;
        }
        Ok(())
    }
}

/// Relational operator of a guard.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RelOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl RelOp {
    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            RelOp::Lt => lhs < rhs,
            RelOp::Le => lhs <= rhs,
            RelOp::Gt => lhs > rhs,
            RelOp::Ge => lhs >= rhs,
            RelOp::Eq => lhs == rhs,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
            RelOp::Eq => "==",
        }
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A boolean comparison `lhs op rhs`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub lhs: BoundExpr,
    pub op: RelOp,
    pub rhs: BoundExpr,
}

impl Predicate {
    pub fn new(lhs: impl Into<BoundExpr>, op: RelOp, rhs: impl Into<BoundExpr>) -> Self {
        Self {
            lhs: lhs.into(),
            op,
            rhs: rhs.into(),
        }
    }

    pub fn substitute(&self, params: &Params) -> Self {
        Self {
            lhs: self.lhs.substitute(params),
            op: self.op,
            rhs: self.rhs.substitute(params),
        }
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut symbols = self.lhs.free_symbols();
        symbols.extend(self.rhs.free_symbols());
        symbols
    }

    pub fn eval(&self, values: &Params) -> Result<bool> {
        Ok(self.op.holds(self.lhs.eval(values)?, self.rhs.eval(values)?))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

impl FromStr for Predicate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parser = crate::parser::Parser::new(s)?;
        let predicate = parser.predicate()?;
        parser.finish()?;
        Ok(predicate)
    }
}

/// A guard inside the loop body.
///
/// The derived fields describe the normal form `sum(coefficients[x] * x) + constant  op  0`,
/// obtained by moving everything to the left-hand side. They are only meaningful when
/// `is_linear` holds; otherwise `coefficients` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopCondition {
    pub expression: Predicate,
    pub variables: BTreeSet<String>,
    pub is_linear: bool,
    pub coefficients: BTreeMap<String, i64>,
    pub constant: i64,
}

impl LoopCondition {
    pub fn new(expression: Predicate) -> Self {
        let variables = expression.free_symbols();
        let diff = expression.lhs.clone() - expression.rhs.clone();
        match AffineForm::try_from_expr(&diff) {
            Ok(form) => Self {
                variables,
                is_linear: true,
                coefficients: form.coefficients().clone(),
                constant: form.constant_term(),
                expression,
            },
            Err(_) => Self {
                variables,
                is_linear: false,
                coefficients: BTreeMap::new(),
                constant: 0,
                expression,
            },
        }
    }

    /// The left-hand side of the normal form, if the guard is linear.
    pub fn linear_form(&self) -> Option<AffineForm> {
        self.is_linear
            .then(|| AffineForm::from_parts(self.coefficients.clone(), self.constant))
    }

    /// Substitutes into the guard and recomputes the derived fields.
    pub fn substitute(&self, params: &Params) -> Self {
        LoopCondition::new(self.expression.substitute(params))
    }

    pub fn holds(&self, values: &Params) -> Result<bool> {
        self.expression.eval(values)
    }
}

impl FromStr for LoopCondition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(LoopCondition::new(s.parse()?))
    }
}

impl fmt::Display for LoopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if {}", self.expression)
    }
}

/// A nest of bounded loops plus body guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopStructure {
    /// Outermost level first.
    pub bounds: Vec<LoopBound>,
    pub conditions: Vec<LoopCondition>,
    pub nesting_depth: usize,
    pub pattern_type: Option<Pattern>,
    /// Formula parameters, filled in by the classifier.
    pub parameters: BTreeMap<String, BoundExpr>,
}

impl LoopStructure {
    /// Builds a structure and checks its invariants.
    pub fn new(bounds: Vec<LoopBound>, conditions: Vec<LoopCondition>) -> Result<Self> {
        let structure = Self {
            nesting_depth: bounds.len(),
            bounds,
            conditions,
            pattern_type: None,
            parameters: BTreeMap::new(),
        };
        structure.validate()?;
        Ok(structure)
    }

    /// Checks that:
    ///
    /// - `nesting_depth` equals the number of levels and there is at least one level;
    /// - loop variables are non-empty and pairwise distinct;
    /// - the bounds of a level only refer to variables of enclosing levels;
    /// - every guard's recorded `variables` are exactly the symbols its predicate refers to.
    ///   Guards sit in the innermost body, so every loop variable is in scope for them and
    ///   any other symbol is a free parameter.
    pub fn validate(&self) -> Result<()> {
        if self.bounds.is_empty() {
            return Err(Error::invalid_structure("a loop nest needs at least one level"));
        }
        if self.nesting_depth != self.bounds.len() {
            return Err(Error::invalid_structure(format!(
                "nesting depth {} does not match {} bound levels",
                self.nesting_depth,
                self.bounds.len()
            )));
        }

        let all: HashSet<&str> = self.bounds.iter().map(|b| b.variable.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        for bound in &self.bounds {
            if bound.variable.is_empty() {
                return Err(Error::invalid_structure("loop variable name is empty"));
            }
            if !seen.insert(bound.variable.as_str()) {
                return Err(Error::invalid_structure(format!(
                    "loop variable `{}` is declared twice",
                    bound.variable
                )));
            }
            // `seen` now holds this level and every enclosing one.
            for symbol in bound.free_symbols() {
                let is_loop_var = all.contains(symbol.as_str());
                let in_scope = seen.contains(symbol.as_str()) && symbol != bound.variable;
                if is_loop_var && !in_scope {
                    return Err(Error::invalid_structure(format!(
                        "bounds of `{}` refer to `{}`, which is not an enclosing loop variable",
                        bound.variable, symbol
                    )));
                }
            }
        }

        for condition in &self.conditions {
            let referenced = condition.expression.free_symbols();
            if let Some(undeclared) = condition.variables.symmetric_difference(&referenced).next() {
                return Err(Error::invalid_structure(format!(
                    "guard `{}` does not agree with its declared variables on `{}`",
                    condition.expression, undeclared
                )));
            }
        }
        Ok(())
    }

    pub fn variables(&self) -> Vec<&str> {
        self.bounds.iter().map(|b| b.variable.as_str()).collect()
    }

    pub fn is_loop_variable(&self, name: &str) -> bool {
        self.bounds.iter().any(|b| b.variable == name)
    }

    /// Symbols that are referenced somewhere but are not loop variables.
    pub fn free_parameters(&self) -> BTreeSet<String> {
        let mut symbols = BTreeSet::new();
        for bound in &self.bounds {
            symbols.extend(bound.free_symbols());
        }
        for condition in &self.conditions {
            symbols.extend(condition.variables.iter().cloned());
        }
        symbols.retain(|s| !self.is_loop_variable(s));
        symbols
    }

    /// Returns a copy with every free parameter named in `params` replaced by its value.
    ///
    /// Keys that name loop variables are ignored, so the result is still a well-formed
    /// nest. Applying the same mapping twice gives the same result as applying it once.
    pub fn substitute(&self, params: &Params) -> LoopStructure {
        let effective: Params = params
            .iter()
            .filter(|(k, _)| !self.is_loop_variable(k))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        if effective.len() != params.len() {
            debug!("substitute: ignoring keys that name loop variables of {}", self.variables().join(", "));
        }

        LoopStructure {
            bounds: self.bounds.iter().map(|b| b.substitute(&effective)).collect(),
            conditions: self.conditions.iter().map(|c| c.substitute(&effective)).collect(),
            nesting_depth: self.nesting_depth,
            pattern_type: self.pattern_type,
            parameters: self
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.substitute(&effective)))
                .collect(),
        }
    }

    /// Bound-simplification pass: folds constants in every bound expression in place.
    pub fn simplify_bounds(&mut self) {
        for bound in &mut self.bounds {
            bound.start = bound.start.simplify();
            bound.end = bound.end.simplify();
            bound.step = bound.step.simplify();
        }
    }
}

impl fmt::Display for LoopStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, bound) in self.bounds.iter().enumerate() {
            writeln!(f, "{:indent$}{}", "", bound, indent = 2 * depth)?;
        }
        for condition in &self.conditions {
            writeln!(f, "{:indent$}{}", "", condition, indent = 2 * self.bounds.len())?;
        }
        if let Some(pattern) = self.pattern_type {
            write!(f, "pattern: {}", pattern)?;
            for (name, value) in &self.parameters {
                write!(f, ", {} = {}", name, value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
