//! Shape classifier.
//!
//! Every [`Pattern`] variant bundles its recognizer and its parameter extractor in one
//! `match` arm of [`Pattern::recognize`]. [`classify`] tries the recognizable patterns in
//! a fixed order (most specific first) and the first match wins.
//!
//! Only the two triangles have recognizers. The remaining shapes have closed forms in
//! [`crate::formula`] but are never detected automatically.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::expr::BoundExpr;
use crate::loops::{LoopBound, LoopStructure};

/// Named iteration-space shapes with a closed-form point count.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Pattern {
    /// `for i in 0..n { for j in 0..i }`
    LowerTriangle,
    /// `for i in 0..n { for j in i..n }`
    UpperTriangle,
    /// `for t in 0..n { for i in max(0, t-k)..min(n, t+k+1) }`
    Trapezoid,
    /// `for d in 0..n+m-1 { for i in max(0, d-m+1)..min(d+1, n) }`
    Diagonal,
    /// `for i in 0..n { for j in max(0, i-k)..min(n, i+k+1) }`
    Parallelogram,
    /// `for i in 0..n { for j in max(0, i-b)..min(n, i+b+1) }`
    BandMatrix,
}

type Parameters = BTreeMap<String, BoundExpr>;

impl Pattern {
    pub const ALL: [Pattern; 6] = [
        Pattern::LowerTriangle,
        Pattern::UpperTriangle,
        Pattern::Trapezoid,
        Pattern::Diagonal,
        Pattern::Parallelogram,
        Pattern::BandMatrix,
    ];

    /// Patterns with a recognizer, in the order the classifier tries them.
    pub const DETECTABLE: [Pattern; 2] = [Pattern::LowerTriangle, Pattern::UpperTriangle];

    /// Names of the integer parameters the closed form takes, in argument order.
    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            Pattern::LowerTriangle | Pattern::UpperTriangle => &["n"],
            Pattern::Trapezoid | Pattern::Parallelogram => &["n", "k"],
            Pattern::Diagonal => &["n", "m"],
            Pattern::BandMatrix => &["n", "b"],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Pattern::LowerTriangle => "lower-triangle",
            Pattern::UpperTriangle => "upper-triangle",
            Pattern::Trapezoid => "trapezoid",
            Pattern::Diagonal => "diagonal",
            Pattern::Parallelogram => "parallelogram",
            Pattern::BandMatrix => "band-matrix",
        }
    }

    /// Checks whether `structure` has this shape and, if so, extracts the formula
    /// parameters as expressions over the structure's free parameters.
    pub fn recognize(self, structure: &LoopStructure) -> Option<Parameters> {
        match self {
            Pattern::LowerTriangle => {
                let (outer, inner) = two_level_origin_nest(structure)?;
                let matched = is_zero(&inner.start) && inner.end.is_var(&outer.variable);
                matched.then(|| BTreeMap::from([("n".to_string(), outer.end.simplify())]))
            }
            Pattern::UpperTriangle => {
                let (outer, inner) = two_level_origin_nest(structure)?;
                let matched = inner.start.is_var(&outer.variable) && inner.end.simplify() == outer.end.simplify();
                matched.then(|| BTreeMap::from([("n".to_string(), outer.end.simplify())]))
            }
            // Closed form only; no recognizer.
            Pattern::Trapezoid | Pattern::Diagonal | Pattern::Parallelogram | Pattern::BandMatrix => None,
        }
    }
}

fn is_zero(expr: &BoundExpr) -> bool {
    expr.simplify() == BoundExpr::Int(0)
}

/// Common precondition of both triangles: exactly two unit-step levels, no guards, and an
/// outer loop starting at the constant origin.
fn two_level_origin_nest(structure: &LoopStructure) -> Option<(&LoopBound, &LoopBound)> {
    if structure.nesting_depth != 2 || structure.bounds.len() != 2 || !structure.conditions.is_empty() {
        return None;
    }
    let (outer, inner) = (&structure.bounds[0], &structure.bounds[1]);
    if !outer.has_unit_step() || !inner.has_unit_step() || !is_zero(&outer.start) {
        return None;
    }
    Some((outer, inner))
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Pattern::ALL
            .into_iter()
            .find(|p| p.name() == normalized)
            .ok_or_else(|| Error::invalid_argument(format!("unknown pattern `{}`", s)))
    }
}

/// Finds the first detectable pattern matching `structure` without modifying it.
pub fn recognize(structure: &LoopStructure) -> Option<(Pattern, Parameters)> {
    for pattern in Pattern::DETECTABLE {
        trace!("trying {} on {}-level nest", pattern, structure.nesting_depth);
        if let Some(parameters) = pattern.recognize(structure) {
            return Some((pattern, parameters));
        }
    }
    None
}

/// Classifies `structure`, recording the pattern and its parameters on success.
///
/// Returns `None` when no shape matches; the caller should fall back to exact counting.
pub fn classify(structure: &mut LoopStructure) -> Option<Pattern> {
    match recognize(structure) {
        Some((pattern, parameters)) => {
            debug!("classified nest over [{}] as {}", structure.variables().join(", "), pattern);
            structure.pattern_type = Some(pattern);
            structure.parameters = parameters;
            Some(pattern)
        }
        None => {
            debug!("nest over [{}] matches no known pattern", structure.variables().join(", "));
            None
        }
    }
}

/// Like [`classify`], but reports a miss as [`Error::UnrecognizedPattern`].
pub fn try_classify(structure: &mut LoopStructure) -> Result<Pattern> {
    classify(structure).ok_or(Error::UnrecognizedPattern)
}
