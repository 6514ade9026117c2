//! # lattice-rs: Counting loop iterations
//!
//! **`lattice-rs`** counts the integer lattice points of nested-loop iteration spaces.
//! A loop nest is given as symbolic bound expressions (for example `j in [max(0, i - k), min(n, i + k + 1))`);
//! the library either recognizes a known shape and evaluates its closed form, or turns the nest into an affine
//! domain and lets an exact polytope counter (barvinok's `iscc`) count it.
//!
//! ## Two ways to count
//!
//! - **Fast path**: the [`pattern`] classifier tags the nest with a [`Pattern`][crate::pattern::Pattern] and
//!   extracts the formula parameters; the [`formula`] library evaluates the closed form with exact big integers.
//! - **Exact path**: [`domain::to_domain`] rewrites every bound into affine inequalities. A `max` in a lower bound
//!   (or a `min` in an upper bound) becomes one inequality per operand, never a guessed value. The domain is
//!   serialized as an isl set and counted by a [`Backend`][crate::backend::Backend].
//!
//! The [`counter`] runs both paths independently and reports both counts, so the formulas can be checked against
//! ground truth.
//!
//! ## Basic Usage
//!
//! ```rust
//! use lattice_rs::backend::Enumerator;
//! use lattice_rs::counter::HybridCounter;
//! use lattice_rs::expr::Params;
//! use lattice_rs::loops::{LoopBound, LoopStructure};
//! use lattice_rs::pattern::Pattern;
//!
//! // for i in 0..n { for j in 0..i { ... } }
//! let nest = LoopStructure::new(
//!     vec![LoopBound::new("i", 0, "n"), LoopBound::new("j", 0, "i")],
//!     vec![],
//! )?;
//!
//! let counter = HybridCounter::new(Enumerator);
//! let result = counter.count(&nest, &Params::from([("n".to_string(), 100)]))?;
//!
//! assert_eq!(result.pattern, Some(Pattern::LowerTriangle));
//! assert_eq!(result.fast, Some(4950u32.into()));
//! assert_eq!(result.agrees(), Some(true));
//! # Ok::<(), lattice_rs::error::Error>(())
//! ```
//!
//! Use [`backend::Iscc::locate`] instead of [`backend::Enumerator`] to count with barvinok.
//!
//! ## Core Components
//!
//! - **[`loops`]**: The loop nest model and parametric substitution.
//! - **[`domain`]**: Affine domain construction, isl serialization and parsing.
//! - **[`invert`]**: Choosing loop bounds for a target number of points.

pub mod affine;
pub mod backend;
pub mod counter;
pub mod domain;
pub mod enumerate;
pub mod error;
pub mod expr;
pub mod formula;
pub mod invert;
pub mod loops;
mod parser;
pub mod pattern;
