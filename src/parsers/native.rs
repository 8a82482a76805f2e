//! C and C++ runners: meson, ctest, Boost.Test, gtest, JUnit XML

use super::{substring_status, StatusMap, TestStatus};
use xmlparser::{ElementEnd, Token, Tokenizer};

/// `1/42 systemd:test-foo  OK  0.12s`
pub fn parse_systemd(log: &str) -> StatusMap {
    let re = regex!(r"(?i)^\s*\d+/\d+\s+systemd:\s*(.+?)\s+(OK|FAIL|SKIP|TIMEOUT)\b");
    let mut map = StatusMap::new();
    for line in log.lines() {
        let Some(caps) = re.captures(line.trim()) else {
            continue;
        };
        let status = match caps[2].to_ascii_uppercase().as_str() {
            "OK" => TestStatus::Passed,
            "SKIP" => TestStatus::Skipped,
            _ => TestStatus::Failed,
        };
        map.record(caps[1].trim(), status);
    }
    map
}

/// Meson output where an expected failure counts as a pass
pub fn parse_mpv(log: &str) -> StatusMap {
    let re = regex!(r"(?i)^\s*\d+/\d+\s+(.+?)\s+(OK|FAIL|SKIP|TIMEOUT|Expected\s+Fail)\b");
    let mut map = StatusMap::new();
    for line in log.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let token = caps[2].to_ascii_uppercase();
        let status = match token.as_str() {
            "OK" => TestStatus::Passed,
            "SKIP" => TestStatus::Skipped,
            "FAIL" | "TIMEOUT" => TestStatus::Failed,
            _ if token.starts_with("EXPECTED") => TestStatus::Passed,
            _ => TestStatus::Unknown,
        };
        map.record(caps[1].trim(), status);
    }
    map
}

/// CTest progress lines: `3/10 Test #3: name ....   Passed    0.01 sec`
pub fn parse_ctest(log: &str) -> StatusMap {
    let re = regex!(r"(?i)\d+/\d+\s+Test\s+#\d+:\s+(\S+).*?sec");
    let mut map = StatusMap::new();
    for line in log.lines() {
        if let Some(caps) = re.captures(line) {
            map.record(&caps[1], substring_status(line));
        }
    }
    map
}

/// CTest without the progress counter; `***Failed` counts as failed
pub fn parse_arrow(log: &str) -> StatusMap {
    let re = regex!(r"(?i)Test\s+#\d+:\s+(\S+).*?\b(Passed|\*\*\*Failed|Failed)\b");
    let mut map = StatusMap::new();
    for line in log.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let status = if caps[2].eq_ignore_ascii_case("passed") {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };
        map.record(&caps[1], status);
    }
    map
}

/// Boost.Test suite verdicts, refined by the case count on the next line
pub fn parse_boost_suites(log: &str) -> StatusMap {
    let suite_re = regex!(r#"(?i)Test suite "([^"]+)" has (\w+)"#);
    let count_re = regex!(r"(?i)(\d+)\s+test cases out of\s+(\d+)\s+passed");

    let lines: Vec<&str> = log.lines().collect();
    let mut map = StatusMap::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = suite_re.captures(line) else {
            continue;
        };
        let counted = lines
            .get(i + 1)
            .and_then(|next| count_re.captures(next))
            .and_then(|c| Some((c[1].parse::<u64>().ok()?, c[2].parse::<u64>().ok()?)));
        let status = match counted {
            Some((passed, total)) if passed == total => TestStatus::Passed,
            Some(_) => TestStatus::Failed,
            None => TestStatus::from_token(&caps[2]).unwrap_or(TestStatus::Unknown),
        };
        map.record(&caps[1], status);
    }
    map
}

/// gtest `[  OK  ] Suite.Case` lines; summary lines carry a bare count and
/// are ignored. The first verdict per test wins.
pub fn parse_gtest(log: &str) -> StatusMap {
    let re = regex!(r"\[\s*(OK|PASSED|FAILED|SKIPPED)\s*\]\s+(\S+)");
    let mut map = StatusMap::new();
    for caps in re.captures_iter(log) {
        let name = &caps[2];
        if name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Some(status) = TestStatus::from_token(&caps[1]) {
            map.record_first(name, status);
        }
    }
    map
}

#[derive(Default)]
struct JunitCase<'a> {
    classname: &'a str,
    name: &'a str,
    skipped: bool,
    failed: bool,
}

impl JunitCase<'_> {
    fn status(&self) -> TestStatus {
        if self.skipped {
            TestStatus::Skipped
        } else if self.failed {
            TestStatus::Failed
        } else {
            TestStatus::Passed
        }
    }
}

/// JUnit XML embedded in the log between `<testsuites` and the last
/// `</testsuites>`, keyed `classname::name`
pub fn parse_junit_xml(log: &str) -> StatusMap {
    const CLOSE: &str = "</testsuites>";
    let mut map = StatusMap::new();
    let (Some(start), Some(end)) = (log.find("<testsuites"), log.rfind(CLOSE)) else {
        return map;
    };
    if end < start {
        return map;
    }
    let xml = &log[start..end + CLOSE.len()];

    let mut case: Option<JunitCase> = None;
    let mut in_case_tag = false;
    for token in Tokenizer::from(xml) {
        let Ok(token) = token else {
            break;
        };
        match token {
            Token::ElementStart { local, .. } => match local.as_str() {
                "testcase" => {
                    case = Some(JunitCase::default());
                    in_case_tag = true;
                }
                "skipped" => {
                    if let Some(c) = case.as_mut() {
                        c.skipped = true;
                    }
                }
                "failure" | "error" => {
                    if let Some(c) = case.as_mut() {
                        c.failed = true;
                    }
                }
                _ => {}
            },
            Token::Attribute { local, value, .. } if in_case_tag => {
                if let Some(c) = case.as_mut() {
                    match local.as_str() {
                        "classname" => c.classname = value.as_str(),
                        "name" => c.name = value.as_str(),
                        _ => {}
                    }
                }
            }
            Token::ElementEnd { end, .. } => match end {
                ElementEnd::Open => in_case_tag = false,
                ElementEnd::Empty if in_case_tag => {
                    in_case_tag = false;
                    if let Some(c) = case.take() {
                        map.record(format!("{}::{}", c.classname, c.name), c.status());
                    }
                }
                ElementEnd::Close(_, local) if local.as_str() == "testcase" => {
                    if let Some(c) = case.take() {
                        map.record(format!("{}::{}", c.classname, c.name), c.status());
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemd() {
        let log = "\
 1/120 systemd:test-acl-util                OK              0.21s
 2/120 systemd:test-bus-util                FAIL            1.02s
 3/120 systemd:test-cgroup                  SKIP            0.01s   exit status 77
 4/120 systemd:test-slow                    TIMEOUT         30.00s
random noise
";
        let map = parse_systemd(log);
        assert_eq!(map.get("test-acl-util"), Some(TestStatus::Passed));
        assert_eq!(map.get("test-bus-util"), Some(TestStatus::Failed));
        assert_eq!(map.get("test-cgroup"), Some(TestStatus::Skipped));
        assert_eq!(map.get("test-slow"), Some(TestStatus::Failed));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_mpv_expected_fail_passes() {
        let log = "\
1/5 mpv:json         OK              0.02s
2/5 mpv:paths        Expected Fail   0.01s
3/5 mpv:codecs       FAIL            0.03s
";
        let map = parse_mpv(log);
        assert_eq!(map.get("mpv:json"), Some(TestStatus::Passed));
        assert_eq!(map.get("mpv:paths"), Some(TestStatus::Passed));
        assert_eq!(map.get("mpv:codecs"), Some(TestStatus::Failed));
    }

    #[test]
    fn test_ctest() {
        let log = "\
 1/3 Test #1: validate_args ....................   Passed    0.01 sec
 2/3 Test #2: convolution ......................***Failed    2.30 sec
 3/3 Test #3: gemm .............................***Skipped   0.00 sec
";
        let map = parse_ctest(log);
        assert_eq!(map.get("validate_args"), Some(TestStatus::Passed));
        assert_eq!(map.get("convolution"), Some(TestStatus::Failed));
        assert_eq!(map.get("gemm"), Some(TestStatus::Skipped));
    }

    #[test]
    fn test_arrow() {
        let log = "\
    Start 1: arrow-array-test
1/2 Test #1: arrow-array-test .........   Passed    1.20 sec
2/2 Test #2: arrow-io-test ............***Failed    0.40 sec
";
        let map = parse_arrow(log);
        assert_eq!(map.get("arrow-array-test"), Some(TestStatus::Passed));
        assert_eq!(map.get("arrow-io-test"), Some(TestStatus::Failed));
    }

    #[test]
    fn test_boost_suites_use_counts() {
        let log = "\
Test suite \"util_tests\" has passed with:
  12 test cases out of 12 passed
Test suite \"net_tests\" has failed with:
  3 test cases out of 5 passed
Test suite \"key_tests\" has passed
";
        let map = parse_boost_suites(log);
        assert_eq!(map.get("util_tests"), Some(TestStatus::Passed));
        assert_eq!(map.get("net_tests"), Some(TestStatus::Failed));
        assert_eq!(map.get("key_tests"), Some(TestStatus::Passed));
    }

    #[test]
    fn test_gtest_first_verdict_wins() {
        let log = "\
[ RUN      ] ArenaTest.Basic
[       OK ] ArenaTest.Basic (0 ms)
[ RUN      ] ArenaTest.Fail
[  FAILED  ] ArenaTest.Fail (1 ms)
[  PASSED  ] 1 test.
[  FAILED  ] 1 test, listed below:
[  FAILED  ] ArenaTest.Basic
";
        let map = parse_gtest(log);
        assert_eq!(map.get("ArenaTest.Basic"), Some(TestStatus::Passed));
        assert_eq!(map.get("ArenaTest.Fail"), Some(TestStatus::Failed));
        assert!(!map.contains("1"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_junit_xml() {
        let log = r#"build output
<?xml version="1.0"?>
<testsuites name="godot">
  <testsuite name="core">
    <testcase classname="Core" name="string_ops" time="0.1"/>
    <testcase classname="Core" name="math">
      <failure message="boom">trace</failure>
    </testcase>
    <testcase classname="Scene" name="tree"><skipped/></testcase>
    <testcase classname="Scene" name="errored"><error/></testcase>
  </testsuite>
</testsuites>
trailing noise"#;
        let map = parse_junit_xml(log);
        assert_eq!(map.get("Core::string_ops"), Some(TestStatus::Passed));
        assert_eq!(map.get("Core::math"), Some(TestStatus::Failed));
        assert_eq!(map.get("Scene::tree"), Some(TestStatus::Skipped));
        assert_eq!(map.get("Scene::errored"), Some(TestStatus::Failed));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_junit_xml_absent() {
        assert!(parse_junit_xml("no xml here").is_empty());
    }
}
