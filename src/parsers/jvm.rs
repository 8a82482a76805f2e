//! Gradle and Maven (surefire) output

use super::{StatusMap, TestStatus};

/// Gradle's trailing `Class.method PASSED` block. Only the contiguous
/// block at the end of the log is read; blank lines inside it are allowed.
pub fn parse_gradle_summary(log: &str) -> StatusMap {
    let re = regex!(r"^([\w.$]+)\s+(PASSED|FAILED|ERROR|SKIPPED|NO_TESTS)$");

    let mut block: Vec<&str> = Vec::new();
    let mut started = false;
    for line in log.split('\n').rev() {
        let line = line.trim();
        if re.is_match(line) {
            block.push(line);
            started = true;
        } else if started && !line.is_empty() {
            break;
        }
    }

    let mut map = StatusMap::new();
    for line in block.into_iter().rev() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let name = &caps[1];
        let qualified = name.contains('.') || name.starts_with(|c: char| c.is_uppercase());
        if qualified {
            map.record_token(name, &caps[2]);
        }
    }
    map
}

/// Gradle test events: `com.example.FooTest > bar() PASSED`
pub fn parse_gradle_events(log: &str) -> StatusMap {
    let re = regex!(r"(?m)^([\w.]+)\s*>\s*(.+?)\s+(PASSED|FAILED|STARTED|SKIPPED|ERROR)$");
    let mut map = StatusMap::new();
    for caps in re.captures_iter(log) {
        if &caps[3] == "STARTED" {
            continue;
        }
        map.record_token(format!("{} > {}", &caps[1], &caps[2]), &caps[3]);
    }
    map
}

/// Surefire class summaries with the class name at the end of the line,
/// starting at `class_prefix` (e.g. `net.` or `com.`)
pub fn parse_surefire_summary(log: &str, class_prefix: &str) -> StatusMap {
    let re = regex!(r"(?i).*?Failures:\s+(\d+).*?Errors:\s+(\d+).*?Skipped:\s+(\d+)(.*)$");
    let mut map = StatusMap::new();
    for line in log.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let tail = &caps[4];
        let Some(start) = tail.find(class_prefix) else {
            continue;
        };
        let count = |i: usize| caps[i].parse::<u64>().unwrap_or(0);
        let status = if count(1) > 0 {
            TestStatus::Failed
        } else if count(2) > 0 {
            TestStatus::Error
        } else if count(3) > 0 {
            TestStatus::Skipped
        } else {
            TestStatus::Passed
        };
        map.record(&tail[start..], status);
    }
    map
}

/// Maven reactor summary: `[INFO] module ....... SUCCESS [  1.2 s]`
pub fn parse_maven_reactor(log: &str) -> StatusMap {
    let re = regex!(r"(?i)\[INFO\]\s+(\w+)\s+\.+\s+\w+\s+\[");
    let mut map = StatusMap::new();
    for line in log.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let status = if line.contains("SUCCESS") {
            TestStatus::Passed
        } else if line.contains("FAILURE") {
            TestStatus::Failed
        } else if line.contains("SKIPPED") {
            TestStatus::Skipped
        } else {
            TestStatus::Unknown
        };
        map.record(&caps[1], status);
    }
    map
}

fn num(caps: &regex::Captures<'_>, i: usize) -> u64 {
    caps[i].parse().unwrap_or(0)
}

fn counts_status(run: u64, failures: u64, errors: u64, skipped: u64) -> TestStatus {
    if errors > 0 {
        TestStatus::Error
    } else if failures > 0 {
        TestStatus::Failed
    } else if skipped == run && run > 0 {
        TestStatus::Skipped
    } else if run > 0 {
        TestStatus::Passed
    } else {
        TestStatus::Unknown
    }
}

/// Full surefire run: per-class results, failing methods keyed
/// `Class::method`, the module total and build breakage markers
pub fn parse_maven_tests(log: &str) -> StatusMap {
    let running_re = regex!(r"^\[INFO\]\s+Running\s+(.+)");
    let class_re = regex!(
        r"Tests run:\s*(\d+),\s*Failures:\s*(\d+),\s*Errors:\s*(\d+),\s*Skipped:\s*(\d+).*?--\s*in\s+(.+)"
    );
    let module_re = regex!(
        r"^\[INFO\]\s+Tests run:\s*(\d+),\s*Failures:\s*(\d+),\s*Errors:\s*(\d+),\s*Skipped:\s*(\d+)\s*$"
    );
    let method_re = regex!(r"^(\w+)\([^)]+\)\s+Time elapsed:.*?<<<\s*(FAILURE|ERROR)!");

    let mut map = StatusMap::new();
    let mut current_class: Option<String> = None;

    for line in log.lines() {
        let line = line.trim();

        if let Some(caps) = running_re.captures(line) {
            current_class = Some(caps[1].to_string());
            continue;
        }

        if let Some(caps) = class_re.captures(line) {
            let status = counts_status(
                num(&caps, 1),
                num(&caps, 2),
                num(&caps, 3),
                num(&caps, 4),
            );
            map.set(&caps[5], status);
            continue;
        }

        if let Some(caps) = module_re.captures(line) {
            let status = counts_status(
                num(&caps, 1),
                num(&caps, 2),
                num(&caps, 3),
                num(&caps, 4),
            );
            map.set("MODULE_SUMMARY", status);
            continue;
        }

        if let Some(caps) = method_re.captures(line) {
            let key = match &current_class {
                Some(class) => format!("{}::{}", class, &caps[1]),
                None => caps[1].to_string(),
            };
            let status = if &caps[2] == "FAILURE" {
                TestStatus::Failed
            } else {
                TestStatus::Error
            };
            map.set(key, status);
            continue;
        }

        if line.contains("[ERROR]") && line.contains("Failed to execute goal") {
            map.set("BUILD_ERROR", TestStatus::Error);
        } else if line.contains("[ERROR]") && line.contains("COMPILATION ERROR") {
            map.set("COMPILATION_ERROR", TestStatus::Error);
        } else if line.contains("[INFO]") && line.contains("No tests to run") {
            map.set("NO_TESTS", TestStatus::Skipped);
        }
    }
    map
}
