//! Hybrid counting: closed form when the shape is known, backend count always.
//!
//! The two paths never feed each other. A recognized pattern gives the fast count; the
//! exact count comes from substituting the parameters, building the affine domain and
//! handing it to a [`Backend`]. Comparing both is how the formula library is validated.

use log::{debug, warn};
use num_bigint::BigUint;

use crate::backend::{Backend, Cardinality};
use crate::domain::to_domain;
use crate::error::{Error, Result};
use crate::expr::Params;
use crate::loops::LoopStructure;
use crate::pattern::{classify, Pattern};

/// Outcome of the exact path.
#[derive(Debug)]
pub enum ExactCount {
    Counted { count: BigUint, elapsed_ms: f64 },
    /// The domain could not be built or the backend failed. Never means zero points.
    Unavailable { reason: Error },
}

impl ExactCount {
    pub fn count(&self) -> Option<&BigUint> {
        match self {
            ExactCount::Counted { count, .. } => Some(count),
            ExactCount::Unavailable { .. } => None,
        }
    }

    pub fn elapsed_ms(&self) -> Option<f64> {
        match self {
            ExactCount::Counted { elapsed_ms, .. } => Some(*elapsed_ms),
            ExactCount::Unavailable { .. } => None,
        }
    }
}

impl From<Result<Cardinality>> for ExactCount {
    fn from(result: Result<Cardinality>) -> Self {
        match result {
            Ok(Cardinality { count, elapsed_ms }) => ExactCount::Counted { count, elapsed_ms },
            Err(reason) => ExactCount::Unavailable { reason },
        }
    }
}

#[derive(Debug)]
pub struct HybridCount {
    /// Pattern recognized on the unsubstituted structure.
    pub pattern: Option<Pattern>,
    /// Closed-form count; `None` when no pattern matched.
    pub fast: Option<BigUint>,
    pub exact: ExactCount,
}

impl HybridCount {
    /// `Some(true)` when both counts exist and agree.
    pub fn agrees(&self) -> Option<bool> {
        Some(self.fast.as_ref()? == self.exact.count()?)
    }
}

pub struct HybridCounter<B> {
    backend: B,
}

impl<B: Backend> HybridCounter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs both paths on `structure` under `params`.
    ///
    /// Errors from classification or formula evaluation propagate; exact-path failures
    /// are reported as [`ExactCount::Unavailable`].
    pub fn count(&self, structure: &LoopStructure, params: &Params) -> Result<HybridCount> {
        let (pattern, fast) = match fast_count(structure, params)? {
            Some((pattern, count)) => (Some(pattern), Some(count)),
            None => (None, None),
        };

        let exact = ExactCount::from(self.count_exact(structure, params));
        if let ExactCount::Unavailable { reason } = &exact {
            warn!("exact count unavailable via {}: {}", self.backend.name(), reason);
        }

        Ok(HybridCount { pattern, fast, exact })
    }

    /// Exact path only: substitute, build the domain, ask the backend.
    pub fn count_exact(&self, structure: &LoopStructure, params: &Params) -> Result<Cardinality> {
        let concrete = structure.substitute(params);
        let domain = to_domain(&concrete)?;
        let text = domain.to_string();
        debug!("counting {} via {}", text, self.backend.name());
        self.backend.count(&text)
    }
}

/// Fast path only: classify the unsubstituted structure and evaluate the closed form.
///
/// The classifier's parameters are expressions over the structure's symbols (for example
/// `n = m + 1`), so they are evaluated under `params` before the formula is applied.
pub fn fast_count(structure: &LoopStructure, params: &Params) -> Result<Option<(Pattern, BigUint)>> {
    let mut classified = structure.clone();
    let Some(pattern) = classify(&mut classified) else {
        return Ok(None);
    };
    let mut values = Params::new();
    for (name, expr) in &classified.parameters {
        values.insert(name.clone(), expr.eval(params)?);
    }
    let count = pattern.evaluate(&values)?;
    debug!("{} with {:?} has {} points", pattern, values, count);
    Ok(Some((pattern, count)))
}
