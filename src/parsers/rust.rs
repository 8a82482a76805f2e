//! libtest output and deno's mixed cmake/cargo logs

use super::{StatusMap, TestStatus};

/// `test path::to::case ... ok`
pub fn parse_libtest(log: &str) -> StatusMap {
    let re = regex!(r"(?m)^test\s+(.+?)\s+\.\.\.\s+(ok|FAILED|ignored|ERROR)");
    let mut map = StatusMap::new();
    for caps in re.captures_iter(log) {
        let status = match &caps[2] {
            "ok" => TestStatus::Passed,
            "FAILED" => TestStatus::Failed,
            "ignored" => TestStatus::Skipped,
            "ERROR" => TestStatus::Error,
            _ => TestStatus::Unknown,
        };
        map.record(caps[1].trim(), status);
    }
    map
}

fn cmake_check_status(word: Option<&str>, line: &str) -> TestStatus {
    let word = word.map(str::to_ascii_lowercase).unwrap_or_default();
    match word.as_str() {
        "success" | "succeeded" | "passed" | "pass" | "ok" => TestStatus::Passed,
        "failed" | "fail" | "failure" | "error" => TestStatus::Failed,
        "skipped" | "skip" | "ignored" | "disable" | "disabled" => TestStatus::Skipped,
        _ => {
            let lower = line.to_ascii_lowercase();
            if lower.contains("success") || lower.contains("passed") {
                TestStatus::Passed
            } else if lower.contains("fail") || lower.contains("error") {
                TestStatus::Failed
            } else if lower.contains("skip") || lower.contains("ignore") {
                TestStatus::Skipped
            } else {
                TestStatus::Unknown
            }
        }
    }
}

/// Deno builds C dependencies before running cargo tests, so the log mixes
/// cmake feature checks with libtest lines. A later line mentioning a test
/// alongside an error or panic marks that test as ERROR.
pub fn parse_deno(log: &str) -> StatusMap {
    let cmake_re =
        regex!(r"(?i)(?:\[[\w\-\s\.]+\]\s*)?--\s*Performing\s+Test\s+(\S+)(?:\s*-\s*(\w+))?");
    let test_re = regex!(r"(?i)test\s+([\w:]+)\s*\.\.\.\s*(\w+)");
    let running_re = regex!(r"(?i)([\w:]+)\s*\.\.\.\s*(ok|FAILED|ignored|test\s+result)");
    let error_re =
        regex!(r"(?i)(?:error|panic|thread\s+'[\w\s]+'\s+panicked|SIGABRT|assertion\s+failed)");

    let mut map = StatusMap::new();
    for line in log.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = cmake_re.captures(line) {
            let status = cmake_check_status(caps.get(2).map(|m| m.as_str()), line);
            map.set(&caps[1], status);
            continue;
        }

        if let Some(caps) = test_re.captures(line) {
            let status = match caps[2].to_ascii_lowercase().as_str() {
                "ok" | "passed" | "pass" => TestStatus::Passed,
                "failed" | "fail" | "failure" => TestStatus::Failed,
                "ignored" | "skip" | "skipped" => TestStatus::Skipped,
                "error" | "panic" | "panicked" => TestStatus::Error,
                _ => TestStatus::Unknown,
            };
            map.set(&caps[1], status);
            continue;
        }

        if line.to_ascii_lowercase().contains("test result") {
            continue;
        }
        if let Some(caps) = running_re.captures(line) {
            let status = match caps[2].to_ascii_lowercase().as_str() {
                "ok" => TestStatus::Passed,
                "failed" => TestStatus::Failed,
                "ignored" => TestStatus::Skipped,
                _ => continue,
            };
            map.set(&caps[1], status);
        }
    }

    for line in log.lines().filter(|l| error_re.is_match(l)) {
        let hit = map.names().find(|name| line.contains(name)).map(str::to_string);
        if let Some(name) = hit {
            map.set(name, TestStatus::Error);
        }
    }
    map
}
