//! Pass/fail gates over parsed test output

use crate::parsers::{StatusMap, TestStatus, TimingMap};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Decision for one work item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub pass_to_pass_ok: bool,
    pub fail_to_pass_ok: bool,
    /// `false` when the pipeline produced no usable parsed output
    pub run_state: bool,
    pub score: f64,
}

impl GateResult {
    fn decide(pass_to_pass_ok: bool, fail_to_pass_ok: bool, run_state: bool) -> Self {
        let score = if run_state && pass_to_pass_ok && fail_to_pass_ok {
            1.0
        } else {
            0.0
        };
        Self {
            pass_to_pass_ok,
            fail_to_pass_ok,
            run_state,
            score,
        }
    }

    /// Nothing usable was produced (missing, empty or unreadable parse)
    pub fn not_run() -> Self {
        Self::decide(false, false, false)
    }

    pub fn passed(&self) -> bool {
        self.score > 0.0
    }
}

/// Functional correctness gate.
///
/// PASS_TO_PASS holds when none of its names is FAILED; FAIL_TO_PASS holds
/// when every name is PASSED. An absent or empty map is `run_state=false`.
pub fn functional_gate(
    status: Option<&StatusMap>,
    pass_to_pass: &[String],
    fail_to_pass: &[String],
) -> GateResult {
    let Some(status) = status else {
        return GateResult::not_run();
    };

    let pass_to_pass_ok = pass_to_pass
        .iter()
        .all(|name| status.get(name) != Some(TestStatus::Failed));
    let fail_to_pass_ok = fail_to_pass
        .iter()
        .all(|name| status.get(name) == Some(TestStatus::Passed));

    GateResult::decide(pass_to_pass_ok, fail_to_pass_ok, !status.is_empty())
}

/// Performance regression gate over pre/post timing maps
#[derive(Clone, Debug, PartialEq)]
pub struct PerformanceGate {
    /// A test is improved when `before * acceleration_rate > after`
    pub acceleration_rate: f64,
    /// Minimum share of FAIL_TO_PASS names that must be improved
    pub threshold: f64,
}

impl Default for PerformanceGate {
    fn default() -> Self {
        Self {
            acceleration_rate: 0.8,
            threshold: 0.5,
        }
    }
}

impl PerformanceGate {
    pub fn new(acceleration_rate: f64, threshold: f64) -> Self {
        Self {
            acceleration_rate,
            threshold,
        }
    }

    /// Names present in both maps with positive durations that got faster
    pub fn improved_tests<'a>(&self, before: &'a TimingMap, after: &TimingMap) -> HashSet<&'a str> {
        before
            .iter()
            .filter(|(name, t1)| {
                matches!(after.positive(name), Some(t2) if *t1 > 0.0 && t1 * self.acceleration_rate > t2)
            })
            .map(|(name, _)| name)
            .collect()
    }

    /// Share of `fail_to_pass` that improved; `None` for an empty list
    pub fn improved_ratio(
        &self,
        before: &TimingMap,
        after: &TimingMap,
        fail_to_pass: &[String],
    ) -> Option<f64> {
        let targets: HashSet<&str> = fail_to_pass.iter().map(String::as_str).collect();
        if targets.is_empty() {
            return None;
        }
        let improved = self.improved_tests(before, after);
        let hits = targets.iter().filter(|name| improved.contains(*name)).count();
        Some(hits as f64 / targets.len() as f64)
    }

    /// Evaluate T1 (tests only) against T2 (tests + change).
    ///
    /// A missing T2 means nothing ran; an empty one is `run_state=false`.
    /// A missing T1 only means nothing can count as improved.
    pub fn evaluate(
        &self,
        before: Option<&TimingMap>,
        after: Option<&TimingMap>,
        pass_to_pass: &[String],
        fail_to_pass: &[String],
    ) -> GateResult {
        let Some(after) = after else {
            return GateResult::not_run();
        };
        let empty = TimingMap::new();
        let before = before.unwrap_or(&empty);

        let pass_to_pass_ok = pass_to_pass
            .iter()
            .all(|name| after.positive(name).is_some());
        let fail_to_pass_ok = match self.improved_ratio(before, after, fail_to_pass) {
            Some(ratio) => ratio >= self.threshold,
            None => true,
        };

        GateResult::decide(pass_to_pass_ok, fail_to_pass_ok, !after.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn status(entries: &[(&str, TestStatus)]) -> StatusMap {
        entries
            .iter()
            .map(|(name, st)| (name.to_string(), *st))
            .collect()
    }

    fn timing(entries: &[(&str, f64)]) -> TimingMap {
        entries.iter().map(|(name, t)| (name.to_string(), *t)).collect()
    }

    #[test]
    fn test_functional_all_passing() {
        let map = status(&[
            ("a", TestStatus::Passed),
            ("b", TestStatus::Passed),
            ("c", TestStatus::Passed),
        ]);
        let result = functional_gate(Some(&map), &names(&["a", "b"]), &names(&["c"]));
        assert!(result.pass_to_pass_ok);
        assert!(result.fail_to_pass_ok);
        assert!(result.run_state);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_functional_regression_fails() {
        let map = status(&[
            ("a", TestStatus::Passed),
            ("b", TestStatus::Failed),
            ("c", TestStatus::Passed),
        ]);
        let result = functional_gate(Some(&map), &names(&["a", "b"]), &names(&["c"]));
        assert!(!result.pass_to_pass_ok);
        assert!(result.fail_to_pass_ok);
        assert!(result.run_state);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_functional_missing_names() {
        // absent PASS_TO_PASS names are tolerated, absent FAIL_TO_PASS names are not
        let map = status(&[("a", TestStatus::Skipped)]);
        let result = functional_gate(Some(&map), &names(&["gone"]), &names(&["c"]));
        assert!(result.pass_to_pass_ok);
        assert!(!result.fail_to_pass_ok);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_functional_error_is_not_passed() {
        let map = status(&[("c", TestStatus::Error)]);
        let result = functional_gate(Some(&map), &[], &names(&["c"]));
        assert!(!result.fail_to_pass_ok);
    }

    #[test]
    fn test_functional_not_run_is_distinct() {
        let empty = StatusMap::new();
        for result in [
            functional_gate(None, &[], &[]),
            functional_gate(Some(&empty), &[], &[]),
        ] {
            assert!(!result.run_state);
            assert_eq!(result.score, 0.0);
        }

        let semantic = functional_gate(
            Some(&status(&[("c", TestStatus::Failed)])),
            &[],
            &names(&["c"]),
        );
        assert!(semantic.run_state);
        assert_eq!(semantic.score, 0.0);
    }

    #[test]
    fn test_improved_tests() {
        let gate = PerformanceGate::default();
        let t1 = timing(&[("fast", 10.0), ("same", 10.0), ("gone", 5.0), ("zero", 0.0)]);
        let t2 = timing(&[("fast", 7.9), ("same", 8.0), ("zero", 0.0)]);
        let improved = gate.improved_tests(&t1, &t2);
        assert_eq!(improved, HashSet::from(["fast"]));
    }

    #[test]
    fn test_performance_half_improved_meets_threshold() {
        let gate = PerformanceGate::default();
        let t1 = timing(&[("x", 10.0), ("y", 10.0)]);
        let t2 = timing(&[("x", 5.0), ("y", 10.0)]);
        let result = gate.evaluate(Some(&t1), Some(&t2), &[], &names(&["x", "y"]));
        assert!(result.fail_to_pass_ok);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_performance_just_below_threshold() {
        let gate = PerformanceGate::default();
        let targets: Vec<String> = (0..100).map(|i| format!("t{}", i)).collect();
        let t1: TimingMap = targets.iter().map(|n| (n.clone(), 10.0)).collect();
        let t2: TimingMap = targets
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), if i < 49 { 1.0 } else { 10.0 }))
            .collect();

        assert_eq!(gate.improved_ratio(&t1, &t2, &targets), Some(0.49));
        let result = gate.evaluate(Some(&t1), Some(&t2), &[], &targets);
        assert!(!result.fail_to_pass_ok);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_performance_stricter_threshold() {
        let gate = PerformanceGate::new(0.8, 0.75);
        let t1 = timing(&[("x", 10.0), ("y", 10.0)]);
        let t2 = timing(&[("x", 5.0), ("y", 10.0)]);
        let result = gate.evaluate(Some(&t1), Some(&t2), &[], &names(&["x", "y"]));
        assert!(!result.fail_to_pass_ok);
    }

    #[test]
    fn test_performance_pass_to_pass_must_still_run() {
        let gate = PerformanceGate::default();
        let t1 = timing(&[("keep", 1.0)]);
        let t2 = timing(&[("keep", 0.0), ("other", 1.0)]);
        let result = gate.evaluate(Some(&t1), Some(&t2), &names(&["keep"]), &[]);
        assert!(!result.pass_to_pass_ok);
        assert!(result.fail_to_pass_ok);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_performance_empty_fail_to_pass_trivially_holds() {
        let gate = PerformanceGate::default();
        let t2 = timing(&[("keep", 2.0)]);
        let result = gate.evaluate(None, Some(&t2), &names(&["keep"]), &[]);
        assert!(result.pass_to_pass_ok);
        assert!(result.fail_to_pass_ok);
        assert!(result.run_state);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_performance_missing_after_map() {
        let gate = PerformanceGate::default();
        let t1 = timing(&[("x", 1.0)]);
        let result = gate.evaluate(Some(&t1), None, &[], &[]);
        assert_eq!(result, GateResult::not_run());

        let empty = TimingMap::new();
        let result = gate.evaluate(Some(&t1), Some(&empty), &[], &[]);
        assert!(!result.run_state);
    }
}
