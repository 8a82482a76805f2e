//! pytest variants, sympy's own runner and micropython's run-tests

use super::{StatusMap, TestStatus};

const PYTEST_VERDICTS: [&str; 6] = ["PASSED", "FAILED", "SKIPPED", "XFAIL", "XPASS", "ERROR"];

fn is_verdict(word: &str) -> bool {
    PYTEST_VERDICTS.contains(&word)
}

/// `keras/src/layers/foo_test.py::FooTest::test_call PASSED`
pub fn parse_keras(log: &str) -> StatusMap {
    let re = regex!(r"(keras/[^:]+::[^:]+::[^\s]+)\s+(PASSED|FAILED|SKIPPED)");
    let mut map = StatusMap::new();
    for caps in re.captures_iter(log) {
        map.record_token(caps[1].trim(), &caps[2]);
    }
    map
}

/// pytest-xdist: `[gw3] [ 42%] PASSED mypy/test/testcheck.py::TypeCheckSuite::case`
pub fn parse_mypy(log: &str) -> StatusMap {
    let re = regex!(r"\[gw\d+\]\s+\[\s*\d+%\]\s+(PASSED|FAILED|SKIPPED)\s+(.+)");
    let mut map = StatusMap::new();
    for line in log.trim().lines() {
        if let Some(caps) = re.captures(line.trim()) {
            map.record_token(caps[2].trim(), &caps[1]);
        }
    }
    map
}

/// pytest -v with ANSI colours, where the verdict may trail on a later line
pub fn parse_pytest_verbose(log: &str) -> StatusMap {
    let ansi_re = regex!(r"\x1b\[\d+m");

    let mut map = StatusMap::new();
    let mut current: Option<String> = None;
    for line in log.lines() {
        let clean = ansi_re.replace_all(line, "");
        let clean = clean.trim();
        if clean.is_empty() {
            continue;
        }

        if clean.contains("::") {
            let path = clean
                .split_whitespace()
                .take_while(|w| !is_verdict(w))
                .collect::<Vec<_>>()
                .join(" ");
            if path.contains("::") {
                current = Some(path);
            }
        }

        let verdict = clean.split_whitespace().find(|w| is_verdict(w));
        if let (Some(verdict), Some(path)) = (verdict, current.as_deref()) {
            map.record_token(path, verdict);
            current = None;
        }
    }
    map
}

/// pytest -rA style `path::test VERDICT ...` columns
pub fn parse_pytest_columns(log: &str) -> StatusMap {
    let mut map = StatusMap::new();
    for line in log.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let Some(index) = parts.iter().position(|w| is_verdict(w)) else {
            continue;
        };
        let path = parts[..index].join(" ");
        if path.contains("::") {
            map.record_token(path, parts[index]);
        }
    }
    map
}

/// sympy's bin/test: a `file.py[N]` header, then `[OK]` or `[FAIL]` at the
/// end of the same or a later line
pub fn parse_sympy(log: &str) -> StatusMap {
    let path_re = regex!(r"^(?P<path>.*?\.py)\[.*");
    let status_re = regex!(r"\[(?P<status>OK|FAIL)\]\s*$");

    let mut map = StatusMap::new();
    let mut current: Option<String> = None;
    for line in log.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = path_re.captures(line) {
            current = Some(caps["path"].to_string());
        }
        if let Some(caps) = status_re.captures(line) {
            if let Some(path) = current.take() {
                map.record_token(path, &caps["status"]);
            }
        }
    }
    map
}

/// pytest progress lines (`a::b PASSED [ 10%]`) plus a `TEST_SESSION`
/// verdict from the final summary
pub fn parse_frr(log: &str) -> StatusMap {
    let case_re = regex!(
        r"^(.+?::.+?)\s+(PASSED|FAILED|SKIPPED|ERROR|XFAIL|XPASS|TODO)\s+\[\s*\d+%\](?:\s*|$)"
    );
    let summary_re = regex!(r"(?i)===\s*(\d+)\s+passed,\s*(\d+)\s+failed,\s*(\d+)\s+skipped");

    let mut map = StatusMap::new();
    for line in log.lines() {
        let line = line.trim();

        if let Some(caps) = case_re.captures(line) {
            map.record_token(&caps[1], &caps[2]);
            continue;
        }

        if let Some(caps) = summary_re.captures(line) {
            let n = |i: usize| caps[i].parse::<u64>().unwrap_or(0);
            let (passed, failed, skipped) = (n(1), n(2), n(3));
            let status = if failed > 0 {
                TestStatus::Failed
            } else if skipped > 0 && passed == 0 {
                TestStatus::Skipped
            } else if passed > 0 {
                TestStatus::Passed
            } else {
                TestStatus::Unknown
            };
            map.set("TEST_SESSION", status);
        }
    }
    map
}

/// micropython run-tests: per-file `pass`/`skip`/`fail` lines and a
/// `TEST_SUMMARY` derived from the trailing counts
pub fn parse_micropython(log: &str) -> StatusMap {
    let file_re = regex!(r"(?i)^(pass|skip|fail)\s+([\w/._\-]+\.py)\s*");
    let passed_re = regex!(r"^(\d+)\s+tests?\s+passed");
    let failed_re = regex!(r"^(\d+)\s+tests?\s+failed:\s*(.+)");
    let counted_re = regex!(r"^(\d+)\s+tests?\s+(performed|skipped:)");
    let make_re = regex!(r"(?i)make.*:\s*\*\*\*.*error");
    let build_re = regex!(r"(?i)(compilation|build)\s+(error|failed)");

    let mut map = StatusMap::new();
    if log.trim().is_empty() {
        map.record("EMPTY_LOG", TestStatus::Error);
        return map;
    }

    let mut passed = 0u64;
    let mut failed = 0u64;
    let mut saw_counts = false;
    for line in log.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = file_re.captures(line) {
            map.record_token(&caps[2], &caps[1]);
        } else if let Some(caps) = passed_re.captures(line) {
            passed = caps[1].parse().unwrap_or(0);
            saw_counts = true;
        } else if let Some(caps) = failed_re.captures(line) {
            failed = caps[1].parse().unwrap_or(0);
            saw_counts = true;
        } else if counted_re.is_match(line) {
            saw_counts = true;
        } else if make_re.is_match(line) {
            map.set("MAKE_ERROR", TestStatus::Error);
        } else if build_re.is_match(line) {
            map.set("BUILD_ERROR", TestStatus::Error);
        }
    }

    if failed > 0 {
        map.set("TEST_SUMMARY", TestStatus::Failed);
    } else if passed > 0 {
        map.set("TEST_SUMMARY", TestStatus::Passed);
    }

    let only_errors = map.names().all(|k| k.ends_with("_ERROR"));
    if !saw_counts && only_errors {
        map.set("NO_RESULTS_PARSED", TestStatus::Unknown);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keras() {
        let log = "\
keras/src/layers/dense_test.py::DenseTest::test_basic PASSED [ 10%]
keras/src/layers/conv_test.py::ConvTest::test_conv[channels_last] FAILED [ 20%]
keras/src/ops/math_test.py::MathTest::test_fft SKIPPED (no backend) [ 30%]
";
        let map = parse_keras(log);
        assert_eq!(
            map.get("keras/src/layers/dense_test.py::DenseTest::test_basic"),
            Some(TestStatus::Passed)
        );
        assert_eq!(
            map.get("keras/src/layers/conv_test.py::ConvTest::test_conv[channels_last]"),
            Some(TestStatus::Failed)
        );
        assert_eq!(
            map.get("keras/src/ops/math_test.py::MathTest::test_fft"),
            Some(TestStatus::Skipped)
        );
    }

    #[test]
    fn test_mypy_xdist() {
        let log = "\
[gw0] [ 10%] PASSED mypy/test/testcheck.py::TypeCheckSuite::check-basic.test::testA
[gw1] [ 20%] FAILED mypy/test/testcheck.py::TypeCheckSuite::check-basic.test::testB
";
        let map = parse_mypy(log);
        assert_eq!(
            map.get("mypy/test/testcheck.py::TypeCheckSuite::check-basic.test::testA"),
            Some(TestStatus::Passed)
        );
        assert_eq!(
            map.get("mypy/test/testcheck.py::TypeCheckSuite::check-basic.test::testB"),
            Some(TestStatus::Failed)
        );
    }

    #[test]
    fn test_pytest_verbose_strips_ansi_and_joins_lines() {
        let log = "\
tests/core/test_batch.py::test_one \x1b[32mPASSED\x1b[0m [ 10%]
tests/core/test_batch.py::test_two
some captured output
\x1b[31mFAILED\x1b[0m
tests/core/test_batch.py::test_three XFAIL
stray PASSED line
";
        let map = parse_pytest_verbose(log);
        assert_eq!(
            map.get("tests/core/test_batch.py::test_one"),
            Some(TestStatus::Passed)
        );
        assert_eq!(
            map.get("tests/core/test_batch.py::test_two"),
            Some(TestStatus::Failed)
        );
        assert_eq!(
            map.get("tests/core/test_batch.py::test_three"),
            Some(TestStatus::Unknown)
        );
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_pytest_columns() {
        let log = "\
scipy/linalg/tests/test_basic.py::TestSolve::test_20Sx20S PASSED
scipy/sparse/tests/test_base.py::test_sum FAILED [ 5%]
PASSED no path here
";
        let map = parse_pytest_columns(log);
        assert_eq!(
            map.get("scipy/linalg/tests/test_basic.py::TestSolve::test_20Sx20S"),
            Some(TestStatus::Passed)
        );
        assert_eq!(
            map.get("scipy/sparse/tests/test_base.py::test_sum"),
            Some(TestStatus::Failed)
        );
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_sympy() {
        let log = "\
sympy/core/tests/test_basic.py[22] ......................                   [OK]
sympy/core/tests/test_expr.py[104] ....F
                                                                         [FAIL]
[OK]
";
        let map = parse_sympy(log);
        assert_eq!(
            map.get("sympy/core/tests/test_basic.py"),
            Some(TestStatus::Passed)
        );
        assert_eq!(
            map.get("sympy/core/tests/test_expr.py"),
            Some(TestStatus::Failed)
        );
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_frr() {
        let log = "\
tests/topotests/bgp/test_bgp.py::test_convergence PASSED            [ 50%]
tests/topotests/ospf/test_ospf.py::test_neighbors XFAIL              [100%]
======== 1 passed, 0 failed, 0 skipped in 12.3s ========
";
        let map = parse_frr(log);
        assert_eq!(
            map.get("tests/topotests/bgp/test_bgp.py::test_convergence"),
            Some(TestStatus::Passed)
        );
        assert_eq!(
            map.get("tests/topotests/ospf/test_ospf.py::test_neighbors"),
            Some(TestStatus::Unknown)
        );
        assert_eq!(map.get("TEST_SESSION"), Some(TestStatus::Passed));
    }

    #[test]
    fn test_micropython() {
        let log = "\
pass  basics/int_big.py
skip  extmod/ssl_basic.py
FAIL  basics/string_format.py
812 tests performed (24000 individual testcases)
811 tests passed
1 tests failed: string_format
";
        let map = parse_micropython(log);
        assert_eq!(map.get("basics/int_big.py"), Some(TestStatus::Passed));
        assert_eq!(map.get("extmod/ssl_basic.py"), Some(TestStatus::Skipped));
        assert_eq!(map.get("basics/string_format.py"), Some(TestStatus::Failed));
        assert_eq!(map.get("TEST_SUMMARY"), Some(TestStatus::Failed));
        assert!(!map.contains("NO_RESULTS_PARSED"));
    }

    #[test]
    fn test_micropython_nothing_parsed() {
        assert_eq!(
            parse_micropython("").get("EMPTY_LOG"),
            Some(TestStatus::Error)
        );
        let map = parse_micropython("make: *** [all] Error 2\n");
        assert_eq!(map.get("MAKE_ERROR"), Some(TestStatus::Error));
        assert_eq!(map.get("NO_RESULTS_PARSED"), Some(TestStatus::Unknown));
    }
}
