//! End-to-end tests for the counting pipeline.
//!
//! Tests cover classification, closed forms, domain construction, both counting paths,
//! and parameter inversion. The exact path always uses the in-process enumerator.

use std::collections::BTreeMap;

use lattice_rs::backend::{Backend, Enumerator};
use lattice_rs::counter::{ExactCount, HybridCounter};
use lattice_rs::domain::{to_domain, Domain};
use lattice_rs::error::Error;
use lattice_rs::expr::{BoundExpr, Params};
use lattice_rs::invert::parameters_for;
use lattice_rs::loops::{LoopBound, LoopCondition, LoopStructure};
use lattice_rs::pattern::{classify, Pattern};
use num_bigint::BigUint;
use test_log::test;

fn params(pairs: &[(&str, i64)]) -> Params {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn expr(src: &str) -> BoundExpr {
    src.parse().unwrap()
}

fn lower_triangle(end: impl Into<BoundExpr>) -> LoopStructure {
    LoopStructure::new(vec![LoopBound::new("i", 0, end), LoopBound::new("j", 0, "i")], vec![]).unwrap()
}

fn upper_triangle() -> LoopStructure {
    LoopStructure::new(vec![LoopBound::new("i", 0, "n"), LoopBound::new("j", "i", "n")], vec![]).unwrap()
}

/// Builds the canonical nest of every pattern over its declared parameters.
fn nest_of(pattern: Pattern) -> LoopStructure {
    let (outer, inner) = match pattern {
        Pattern::LowerTriangle => (LoopBound::new("i", 0, "n"), LoopBound::new("j", 0, "i")),
        Pattern::UpperTriangle => (LoopBound::new("i", 0, "n"), LoopBound::new("j", "i", "n")),
        Pattern::Trapezoid => (
            LoopBound::new("t", 0, "n"),
            LoopBound::new("x", expr("max(0, t - k)"), expr("min(n, t + k + 1)")),
        ),
        Pattern::Diagonal => (
            LoopBound::new("d", 0, expr("n + m - 1")),
            LoopBound::new("i", expr("max(0, d - m + 1)"), expr("min(d + 1, n)")),
        ),
        Pattern::Parallelogram => (
            LoopBound::new("i", 0, "n"),
            LoopBound::new("j", expr("max(0, i - k)"), expr("min(n, i + k + 1)")),
        ),
        Pattern::BandMatrix => (
            LoopBound::new("i", 0, "n"),
            LoopBound::new("j", expr("max(0, i - b)"), expr("min(n, i + b + 1)")),
        ),
    };
    LoopStructure::new(vec![outer, inner], vec![]).unwrap()
}

// ─── Classification ────────────────────────────────────────────────────────────

#[test]
fn end_to_end_lower_triangle_of_five() {
    let mut nest = lower_triangle(5);
    assert_eq!(classify(&mut nest), Some(Pattern::LowerTriangle));
    assert_eq!(nest.parameters, BTreeMap::from([("n".to_string(), BoundExpr::int(5))]));

    let r = HybridCounter::new(Enumerator).count(&nest, &Params::new()).unwrap();
    assert_eq!(r.fast, Some(BigUint::from(10u32)));

    let mut pairs = 0;
    for i in 0..5 {
        for _j in 0..i {
            pairs += 1;
        }
    }
    assert_eq!(pairs, 10);
    assert_eq!(nest.count_points().unwrap(), BigUint::from(10u32));
}

#[test]
fn classifier_leaves_other_shapes_alone() {
    for pattern in [Pattern::Trapezoid, Pattern::Diagonal, Pattern::Parallelogram, Pattern::BandMatrix] {
        let mut nest = nest_of(pattern);
        assert_eq!(classify(&mut nest), None, "{}", pattern);
    }
}

// ─── Formula / ground truth agreement ──────────────────────────────────────────

#[test]
fn lower_triangle_both_paths() {
    let counter = HybridCounter::new(Enumerator);
    let nest = lower_triangle("n");
    for n in 1..=40i64 {
        let r = counter.count(&nest, &params(&[("n", n)])).unwrap();
        let expected = BigUint::from((n * (n - 1) / 2) as u64);
        assert_eq!(r.fast.as_ref(), Some(&expected), "n = {}", n);
        assert_eq!(r.exact.count(), Some(&expected), "n = {}", n);
    }
}

#[test]
fn upper_triangle_fast_count() {
    let counter = HybridCounter::new(Enumerator);
    for n in 1..=40i64 {
        let r = counter.count(&upper_triangle(), &params(&[("n", n)])).unwrap();
        assert_eq!(r.pattern, Some(Pattern::UpperTriangle));
        assert_eq!(r.fast, Some(BigUint::from((n * (n + 1) / 2) as u64)));
        assert_eq!(r.agrees(), Some(true));
    }
}

#[test]
fn every_formula_matches_enumeration() {
    for pattern in Pattern::ALL {
        let nest = nest_of(pattern);
        for n in 1..9 {
            // Half-widths at or beyond n cover the whole square, as the clamped formula does.
            for w in 0..n + 2 {
                let p = params(&[("n", n), ("k", w), ("m", w), ("b", w)]);
                let expected = nest.count_points_with(&p).unwrap();
                assert_eq!(pattern.evaluate(&p).unwrap(), expected, "{} n={} w={}", pattern, n, w);
            }
        }
    }
}

#[test]
fn every_pattern_builds_a_countable_domain() {
    for pattern in Pattern::ALL {
        let nest = nest_of(pattern);
        let p = params(&[("n", 7), ("k", 2), ("m", 4), ("b", 3)]);
        let exact = Enumerator.count(&to_domain(&nest.substitute(&p)).unwrap().to_string()).unwrap();
        assert_eq!(exact.count, pattern.evaluate(&p).unwrap(), "{}", pattern);
    }
}

// ─── Substitution ──────────────────────────────────────────────────────────────

#[test]
fn substitute_is_idempotent() {
    let mut nest = nest_of(Pattern::Trapezoid);
    nest.conditions.push("t + x <= n + k".parse::<LoopCondition>().unwrap());
    for p in [params(&[("n", 10)]), params(&[("n", 3), ("k", 1)]), params(&[("zzz", 1)]), Params::new()] {
        let once = nest.substitute(&p);
        assert_eq!(once.substitute(&p), once);
    }
}

// ─── Domain construction ───────────────────────────────────────────────────────

#[test]
fn lower_triangle_domain_is_symbolic() {
    let d = to_domain(&lower_triangle("n")).unwrap();
    let expected: Domain = "[n] -> {[i, j]: i >= 0 and i <= n - 1 and j >= 0 and j <= i - 1}".parse().unwrap();
    assert_eq!(d, expected);
}

#[test]
fn max_lower_bound_becomes_two_constraints() {
    let d = to_domain(&nest_of(Pattern::Trapezoid)).unwrap();
    let text = d.to_string();
    assert!(text.starts_with("[k, n] -> {[t, x]: "), "{}", text);
    assert!(text.contains("x >= 0"), "{}", text);
    assert!(text.contains("-t + x + k >= 0"), "{}", text);
}

#[test]
fn unresolvable_bound_is_an_error() {
    let nest = LoopStructure::new(
        vec![LoopBound::new("i", expr("min(0, n - 5)"), "n"), LoopBound::new("j", 0, "i")],
        vec![],
    )
    .unwrap();
    assert!(matches!(to_domain(&nest), Err(Error::DomainConstruction(_))));

    let r = HybridCounter::new(Enumerator).count(&nest, &params(&[("n", 9)])).unwrap();
    // After substitution the min folds to a constant and the exact path succeeds.
    assert_eq!(r.exact.count(), Some(&BigUint::from(36u32)));
}

#[test]
fn guard_restricts_exact_count() {
    let nest = LoopStructure::new(
        vec![LoopBound::new("i", 0, "n"), LoopBound::new("j", 0, "n")],
        vec!["i + j < n".parse().unwrap()],
    )
    .unwrap();
    let r = HybridCounter::new(Enumerator).count(&nest, &params(&[("n", 12)])).unwrap();
    assert_eq!(r.fast, None);
    assert!(matches!(r.exact, ExactCount::Counted { ref count, .. } if *count == BigUint::from(78u32)));
}

// ─── Parameter inversion ───────────────────────────────────────────────────────

#[test]
fn inversion_round_trips_through_counting() {
    let counter = HybridCounter::new(Enumerator);
    for target in [1, 10, 1000, 5000] {
        let p = parameters_for(target, Some(Pattern::LowerTriangle)).unwrap();
        let r = counter.count(&lower_triangle("n"), &p).unwrap();
        assert!(r.fast.unwrap() >= BigUint::from(target as u64));
    }
    assert_eq!(parameters_for(1_000_000, Some(Pattern::LowerTriangle)).unwrap()["n"], 1415);
}

#[test]
fn inversion_rejects_zero() {
    for pattern in Pattern::ALL {
        assert!(matches!(parameters_for(0, Some(pattern)), Err(Error::InvalidArgument(_))));
    }
}
