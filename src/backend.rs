//! Exact-counting backends.
//!
//! A [`Backend`] takes a serialized [`Domain`](crate::domain::Domain) and returns its
//! cardinality together with the time the count took. [`Iscc`] drives the `iscc`
//! calculator from barvinok as a subprocess; [`Enumerator`] parses the domain and counts
//! in-process, which is only practical for small domains but needs nothing installed.
//!
//! Nothing is initialized implicitly: an [`Iscc`] handle comes from [`Iscc::locate`] (or
//! [`Iscc::new`] with a known path) and is passed to whoever needs it.

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use log::{debug, trace};
use num_bigint::BigUint;
use num_traits::Zero;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::Domain;
use crate::error::{Error, Result};

/// A lattice point count and the wall-clock time spent producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cardinality {
    pub count: BigUint,
    pub elapsed_ms: f64,
}

pub trait Backend {
    /// Short name for log messages.
    fn name(&self) -> &str;

    /// Counts the integer points of a domain given in isl set syntax.
    ///
    /// Every failure is reported as [`Error::BackendUnavailable`]; a failure is never a
    /// count of zero.
    fn count(&self, domain: &str) -> Result<Cardinality>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn count(&self, domain: &str) -> Result<Cardinality> {
        (**self).count(domain)
    }
}

impl<B: Backend + ?Sized> Backend for &B {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn count(&self, domain: &str) -> Result<Cardinality> {
        (**self).count(domain)
    }
}

/// Where to look for the `iscc` executable.
#[derive(Debug, Clone)]
pub struct IsccConfig {
    /// Executable name, or a path to it.
    pub program: String,
    /// Directories searched in order. When empty, `PATH` is searched instead.
    pub search_paths: Vec<PathBuf>,
}

impl Default for IsccConfig {
    fn default() -> Self {
        Self {
            program: "iscc".to_string(),
            search_paths: Vec::new(),
        }
    }
}

/// Handle to a located `iscc` executable.
#[derive(Debug, Clone)]
pub struct Iscc {
    path: PathBuf,
}

impl Iscc {
    /// Uses `path` as the executable without searching.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Finds the executable described by `config`.
    pub fn locate(config: &IsccConfig) -> Result<Self> {
        let program = Path::new(&config.program);
        if program.components().count() > 1 {
            return if program.is_file() {
                Ok(Iscc::new(program))
            } else {
                Err(Error::backend(format!("`{}` does not exist", program.display())))
            };
        }

        let dirs: Vec<PathBuf> = if config.search_paths.is_empty() {
            env::var_os("PATH").map(|p| env::split_paths(&p).collect()).unwrap_or_default()
        } else {
            config.search_paths.clone()
        };
        for dir in &dirs {
            let candidate = dir.join(program);
            trace!("looking for {} at {}", config.program, candidate.display());
            if candidate.is_file() {
                debug!("using {}", candidate.display());
                return Ok(Iscc::new(candidate));
            }
        }
        Err(Error::backend(format!(
            "`{}` not found in {} search director{}; install barvinok or configure the search paths",
            config.program,
            dirs.len(),
            if dirs.len() == 1 { "y" } else { "ies" }
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for Iscc {
    fn name(&self) -> &str {
        "iscc"
    }

    fn count(&self, domain: &str) -> Result<Cardinality> {
        let script = format!("S := {}; card S;\n", domain);
        trace!("iscc input: {}", script.trim_end());

        let start = Instant::now();
        let mut child = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::backend(format!("cannot start {}: {}", self.path.display(), e)))?;
        // The child is reaped before a failed write is reported.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(script.as_bytes()),
            None => Ok(()),
        };
        let output = child.wait_with_output()?;
        written.map_err(|e| Error::backend(format!("cannot write to iscc: {}", e)))?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        if !output.status.success() {
            return Err(Error::backend(format!(
                "iscc exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let count = parse_cardinality(&stdout)?;
        debug!("iscc counted {} points in {:.3} ms", count, elapsed_ms);
        Ok(Cardinality { count, elapsed_ms })
    }
}

static CARDINALITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*\}").expect("valid regex"));

/// Extracts the brace-delimited cardinality from an `iscc` report, e.g. `{ 4950 }`.
///
/// Scientific notation is accepted as long as the value is a non-negative integer.
pub fn parse_cardinality(report: &str) -> Result<BigUint> {
    let numeral = CARDINALITY
        .captures(report)
        .and_then(|c| c.get(1))
        .ok_or_else(|| Error::backend(format!("no cardinality in backend output: {:?}", report.trim())))?
        .as_str();
    parse_numeral(numeral)
}

/// Largest power of ten a cardinality report may scale by.
const MAX_DECIMAL_SHIFT: i64 = 4096;

fn parse_numeral(numeral: &str) -> Result<BigUint> {
    let bad = || Error::backend(format!("`{}` is not a non-negative integer", numeral));

    let (negative, unsigned) = match numeral.as_bytes().first() {
        Some(b'-') => (true, &numeral[1..]),
        Some(b'+') => (false, &numeral[1..]),
        _ => (false, numeral),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => (&unsigned[..at], unsigned[at + 1..].parse::<i64>().map_err(|_| bad())?),
        None => (unsigned, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{}{}", int_part, frac_part);
    let mut value = if digits.is_empty() {
        BigUint::zero()
    } else {
        digits.parse::<BigUint>().map_err(|_| bad())?
    };

    // value * 10^(exponent - fraction digits)
    let shift = exponent
        .checked_sub(frac_part.len() as i64)
        .filter(|s| s.abs() <= MAX_DECIMAL_SHIFT)
        .ok_or_else(|| Error::backend(format!("exponent of `{}` is out of range", numeral)))?;
    let ten = BigUint::from(10u32);
    if shift >= 0 {
        let shift = u32::try_from(shift).map_err(|_| bad())?;
        value *= ten.pow(shift);
    } else {
        let shift = u32::try_from(-shift).map_err(|_| bad())?;
        let divisor = ten.pow(shift);
        if !(&value % &divisor).is_zero() {
            return Err(bad());
        }
        value /= divisor;
    }

    if negative && !value.is_zero() {
        return Err(bad());
    }
    Ok(value)
}

/// In-process backend: parses the domain and enumerates its points.
#[derive(Debug, Copy, Clone, Default)]
pub struct Enumerator;

impl Backend for Enumerator {
    fn name(&self) -> &str {
        "enumerator"
    }

    fn count(&self, domain: &str) -> Result<Cardinality> {
        let start = Instant::now();
        let count = domain
            .parse::<Domain>()
            .and_then(|d| d.count_points())
            .map_err(|e| Error::backend(format!("cannot enumerate `{}`: {}", domain, e)))?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok(Cardinality { count, elapsed_ms })
    }
}

/// Backend that always fails; stands in for a missing `iscc`.
#[derive(Debug, Clone)]
pub struct Unavailable {
    pub reason: String,
}

impl Backend for Unavailable {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn count(&self, _domain: &str) -> Result<Cardinality> {
        Err(Error::backend(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn big(v: u64) -> BigUint {
        BigUint::from(v)
    }

    #[test]
    fn test_parse_plain() {
        let report = "S := { [i, j] : 0 <= j < i < 100 };\n{ 4950 }\n";
        assert_eq!(parse_cardinality(report).unwrap(), big(4950));
    }

    #[test]
    fn test_parse_scientific() {
        assert_eq!(parse_cardinality("{ 1e6 }").unwrap(), big(1_000_000));
        assert_eq!(parse_cardinality("{ 1.5E3 }").unwrap(), big(1500));
        assert_eq!(parse_cardinality("{ +42 }").unwrap(), big(42));
        assert_eq!(parse_cardinality("{ 1200e-2 }").unwrap(), big(12));
        assert_eq!(parse_cardinality("{ 0 }").unwrap(), big(0));
    }

    #[test]
    fn test_parse_large_exact() {
        let report = "{ 123456789012345678901234567890 }";
        assert_eq!(
            parse_cardinality(report).unwrap(),
            "123456789012345678901234567890".parse::<BigUint>().unwrap()
        );
    }

    #[test]
    fn test_parse_rejects_non_integers() {
        assert!(parse_cardinality("{ 2.5 }").is_err());
        assert!(parse_cardinality("{ -3 }").is_err());
    }

    #[test]
    fn test_parse_rejects_huge_exponents() {
        assert!(matches!(parse_cardinality("{ 1e4000000000 }"), Err(Error::BackendUnavailable(_))));
        assert!(matches!(parse_cardinality("{ 1e-4000000000 }"), Err(Error::BackendUnavailable(_))));
        assert_eq!(parse_cardinality("{ 1e40 }").unwrap(), BigUint::from(10u32).pow(40));
    }

    #[cfg(unix)]
    #[test]
    fn test_child_exiting_before_reading_input() {
        // `true` ignores stdin, so a large script hits a closed pipe.
        let iscc = Iscc::new("/bin/true");
        let domain = format!("{{[i]: {}}}", vec!["i >= 0"; 100_000].join(" and "));
        assert!(matches!(iscc.count(&domain), Err(Error::BackendUnavailable(_))));
    }

    #[test]
    fn test_missing_cardinality_is_failure() {
        let r = parse_cardinality("syntax error");
        assert!(matches!(r, Err(Error::BackendUnavailable(_))));
        // Parametric results are piecewise polynomials, not numerals.
        assert!(parse_cardinality("[n] -> { (-1/2 * n + 1/2 * n^2) : n >= 1 }").is_err());
    }

    #[test]
    fn test_enumerator() {
        let c = Enumerator.count("{[i, j]: 0 <= i < 5 and 0 <= j < i}").unwrap();
        assert_eq!(c.count, big(10));
        assert!(c.elapsed_ms >= 0.0);
        let r = Enumerator.count("{[i]: i >= 0}");
        assert!(matches!(r, Err(Error::BackendUnavailable(_))));
        assert!(Enumerator.count("not a domain").unwrap_err().is_backend_failure());
    }

    #[test]
    fn test_locate_missing() {
        let config = IsccConfig {
            program: "iscc-does-not-exist".to_string(),
            search_paths: vec![PathBuf::from("/nonexistent")],
        };
        assert!(matches!(Iscc::locate(&config), Err(Error::BackendUnavailable(_))));
    }

    #[test]
    fn test_missing_executable_fails() {
        let iscc = Iscc::new("/nonexistent/iscc");
        assert!(iscc.count("{[i]: 0 <= i < 3}").unwrap_err().is_backend_failure());
    }

    #[test]
    fn test_boxed_backend() {
        let backend: Box<dyn Backend> = Box::new(Unavailable {
            reason: "disabled".to_string(),
        });
        assert_eq!(backend.name(), "unavailable");
        assert!(backend.count("{[i]: 0 <= i < 3}").is_err());
    }
}
