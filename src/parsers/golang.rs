//! `go test` output, plain and `-json`

use super::{StatusMap, TestStatus};
use serde_json::Value;

/// `go test -json` events, with plain `--- PASS:` lines filling gaps
pub fn parse_matrixone(log: &str) -> StatusMap {
    let verdict_re = regex!(r"--- (PASS|FAIL|SKIP):\s+(\w+)");
    let mut map = StatusMap::new();

    for line in log.trim().lines() {
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with(r#"{"Time""#) {
            match serde_json::from_str::<Value>(line) {
                Ok(event) => record_json_event(&mut map, &event),
                Err(_) => continue,
            }
        }

        if let Some(caps) = verdict_re.captures(line) {
            if let Some(status) = TestStatus::from_token(&caps[1]) {
                map.record_first(&caps[2], status);
            }
        }
    }
    map
}

fn record_json_event(map: &mut StatusMap, event: &Value) {
    let Some(action) = event.get("Action").and_then(Value::as_str) else {
        return;
    };
    let action = action.to_ascii_lowercase();

    if let Some(test) = event.get("Test").and_then(Value::as_str) {
        let status = match action.as_str() {
            "pass" => TestStatus::Passed,
            "fail" => TestStatus::Failed,
            "skip" => TestStatus::Skipped,
            _ => return,
        };
        map.record(test, status);
    } else if action == "skip" {
        if let Some(package) = event.get("Package").and_then(Value::as_str) {
            let short = package.rsplit('/').next().unwrap_or(package);
            map.record(format!("Package_{}", short), TestStatus::Skipped);
        }
    }
}

/// Package verdicts plus `pkg::Test` entries for individual failures
pub fn parse_loki(log: &str) -> StatusMap {
    let ok_re = regex!(r"^ok\s+([^\s]+)\s+.*$");
    let build_fail_re = regex!(r"^FAIL\s+([^\s]+)\s+\[build failed\]");
    let fail_re = regex!(r"^FAIL\s+([^\s]+)\s+.*$");
    let no_files_re = regex!(r"^\?\s+([^\s]+)\s+\[no test files\]");
    let fail_test_re = regex!(r"^--- FAIL: (\w+)");

    let mut map = StatusMap::new();
    let mut current_package: Option<String> = None;

    for line in log.split('\n') {
        let line = line.trim();

        if let Some(caps) = ok_re.captures(line) {
            map.record(&caps[1], TestStatus::Passed);
            current_package = Some(caps[1].to_string());
            continue;
        }
        if let Some(caps) = build_fail_re
            .captures(line)
            .or_else(|| fail_re.captures(line))
        {
            map.record(&caps[1], TestStatus::Failed);
            current_package = Some(caps[1].to_string());
            continue;
        }
        if let Some(caps) = no_files_re.captures(line) {
            map.record(&caps[1], TestStatus::Skipped);
            continue;
        }
        if let (Some(caps), Some(package)) = (fail_test_re.captures(line), &current_package) {
            map.record(format!("{}::{}", package, &caps[1]), TestStatus::Failed);
        }
    }
    map
}

/// Package verdicts; build failures and Maven errors count as ERROR
pub fn parse_terraform(log: &str) -> StatusMap {
    let ok_re = regex!(r"^ok\s+(\S+)\s+(.*)$");
    let fail_re = regex!(r"^FAIL\s+(\S+)\s+(.*)$");
    let no_files_re = regex!(r"^\?\s+(\S+)\s+\[no test files\]$");

    let mut map = StatusMap::new();
    for line in log.lines() {
        let line = line.trim();

        if let Some(caps) = ok_re.captures(line) {
            map.record(&caps[1], TestStatus::Passed);
        } else if let Some(caps) = fail_re.captures(line) {
            let status = if caps[2].contains("build failed") {
                TestStatus::Error
            } else {
                TestStatus::Failed
            };
            map.record(&caps[1], status);
        } else if let Some(caps) = no_files_re.captures(line) {
            map.record(&caps[1], TestStatus::Skipped);
        } else if line.contains("COMPILATION ERROR") {
            map.record("COMPILATION_ERROR", TestStatus::Error);
        } else if line.contains("Failed to execute goal") && line.contains("[ERROR]") {
            map.record("BUILD_ERROR", TestStatus::Error);
        }
    }
    map
}

/// Verbose `go test -v` with package entries (`PKG__<pkg>`), synthetic
/// error markers and an overall `TEST_SUMMARY`
pub fn parse_cosmos_sdk(log: &str) -> StatusMap {
    let run_re = regex!(r"^===\s+RUN\s+([\w/]+)");
    let verdict_re = regex!(r"^---\s+(PASS|FAIL|SKIP):\s+([\w/]+)\s+\(([0-9.]+s)\)");
    let package_re = regex!(r"^(ok|FAIL)\s+([\w/.\-]+)\s+([0-9.]+s)(?:\s+coverage:\s+([0-9.]+)%)?");
    let timeout_re = regex!(r"(?i)panic.*timed?\s*out");
    let build_re = regex!(r"(?i)\[build failed\]");
    let make_re = regex!(r"(?i)make.*:\s*\*\*\*.*error");

    let mut map = StatusMap::new();
    if log.trim().is_empty() {
        map.record("EMPTY_LOG", TestStatus::Error);
        return map;
    }

    let mut tests: Vec<String> = Vec::new();
    let mut running: Vec<String> = Vec::new();
    let mut has_packages = false;
    let mut current_package = String::new();

    for line in log.lines() {
        let line = line.trim();
        if line.is_empty() || line == "PASS" {
            continue;
        }

        if let Some(caps) = run_re.captures(line) {
            if !running.iter().any(|t| t == &caps[1]) {
                running.push(caps[1].to_string());
            }
            continue;
        }

        if let Some(caps) = verdict_re.captures(line) {
            let name = caps[2].to_string();
            if let Some(status) = TestStatus::from_token(&caps[1]) {
                map.set(name.clone(), status);
            }
            running.retain(|t| t != &name);
            if !tests.contains(&name) {
                tests.push(name);
            }
            continue;
        }

        if let Some(caps) = package_re.captures(line) {
            current_package = caps[2].to_string();
            has_packages = true;
            let status = if &caps[1] == "ok" {
                TestStatus::Passed
            } else {
                TestStatus::Failed
            };
            map.set(format!("PKG__{}", current_package), status);
            continue;
        }

        if timeout_re.is_match(line) {
            map.set("TEST_TIMEOUT", TestStatus::Error);
        } else if build_re.is_match(line) {
            map.set("BUILD_ERROR", TestStatus::Error);
            if !current_package.is_empty() {
                map.set(format!("PKG__{}", current_package), TestStatus::Error);
            }
        } else if line.starts_with("go:") && {
            let lower = line.to_ascii_lowercase();
            lower.contains("error") || lower.contains("requires")
        } {
            map.set("GO_ERROR", TestStatus::Error);
        } else if make_re.is_match(line) {
            map.set("MAKE_ERROR", TestStatus::Error);
        }
    }

    let mut incomplete = 0;
    for name in running {
        if !map.contains(&name) {
            map.set(name.clone(), TestStatus::Unknown);
            tests.push(name);
            incomplete += 1;
        }
    }

    let count = |wanted: TestStatus| {
        tests
            .iter()
            .filter(|t| map.get(t) == Some(wanted))
            .count()
    };
    let passed = count(TestStatus::Passed);
    let failed = count(TestStatus::Failed);
    let skipped = count(TestStatus::Skipped);

    let has_error = ["BUILD_ERROR", "GO_ERROR", "MAKE_ERROR"]
        .iter()
        .any(|k| map.contains(k));
    let summary = if failed > 0 || incomplete > 0 {
        TestStatus::Failed
    } else if passed > 0 {
        TestStatus::Passed
    } else if has_error {
        TestStatus::Error
    } else if skipped > 0 {
        TestStatus::Skipped
    } else {
        TestStatus::Unknown
    };
    map.set("TEST_SUMMARY", summary);

    if tests.is_empty() && !has_packages {
        map.set("NO_RESULTS_PARSED", TestStatus::Unknown);
    }
    map
}
