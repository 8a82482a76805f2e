//! Mocha, Jest and Vitest reporters

use super::{StatusMap, TestStatus};

/// Mocha spec reporter: `✓ name (12ms)` passes, numbered `1) name` lines fail
pub fn parse_mocha_checks(log: &str) -> StatusMap {
    let duration_re = regex!(r"\s*\(\d+ms\)\s*$");
    let failure_re = regex!(r"^(\d+)\)\s*(.+)");

    let mut map = StatusMap::new();
    let mut seen_failures: Vec<String> = Vec::new();
    for line in log.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix('✓') {
            let name = duration_re.replace(rest.trim(), "");
            map.record(name.into_owned(), TestStatus::Passed);
        } else if let Some(caps) = failure_re.captures(line) {
            if seen_failures.iter().any(|n| n == &caps[1]) {
                continue;
            }
            seen_failures.push(caps[1].to_string());
            map.record(caps[2].trim(), TestStatus::Failed);
        }
    }
    map
}

fn vitest_files(log: &str, strip_duration: bool) -> StatusMap {
    let duration_re = regex!(r"\s+\d+ms$");
    let clean = |path: &str| -> String {
        if strip_duration {
            duration_re.replace(path, "").into_owned()
        } else {
            path.to_string()
        }
    };

    let mut map = StatusMap::new();
    for line in log.lines() {
        let line = line.trim();
        let Some((_, rest)) = line.split_once(' ') else {
            continue;
        };
        if line.starts_with('✓') {
            map.record(clean(rest), TestStatus::Passed);
        } else if line.starts_with("FAIL") {
            let path = rest.split('[').next().unwrap_or(rest).trim();
            map.record(clean(path), TestStatus::Failed);
        }
    }
    map
}

/// Vitest per-file lines, dropping trailing `123ms` durations
pub fn parse_vitest_files(log: &str) -> StatusMap {
    vitest_files(log, true)
}

/// Vitest per-file lines with durations kept in the name
pub fn parse_vitest_files_raw(log: &str) -> StatusMap {
    vitest_files(log, false)
}

/// Jest `PASS path (1.2 s)` / `FAIL path` file verdicts
pub fn parse_jest_files(log: &str) -> StatusMap {
    let mut map = StatusMap::new();
    for line in log.lines() {
        let line = line.trim();
        let status = if line.starts_with("PASS") {
            TestStatus::Passed
        } else if line.starts_with("FAIL") {
            TestStatus::Failed
        } else {
            continue;
        };
        if let Some((_, rest)) = line.split_once(' ') {
            let path = rest.split('(').next().unwrap_or(rest).trim();
            map.record(path, status);
        }
    }
    map
}

/// Workspace-prefixed jest output: `pkg test: PASS src/foo.test.ts`
pub fn parse_prisma(log: &str) -> StatusMap {
    let re = regex!(r" test:\s+(PASS|FAIL|[✓✗])\s+([\S]+\.test\.(?:ts|js))");
    let mut map = StatusMap::new();
    for line in log.lines() {
        if let Some(caps) = re.captures(line) {
            let status = match &caps[1] {
                "PASS" | "✓" => TestStatus::Passed,
                _ => TestStatus::Failed,
            };
            map.record(&caps[2], status);
        }
    }
    map
}

/// Turbo-prefixed jest output: `pkg:test: PASS src/foo.test.tsx`
pub fn parse_polaris(log: &str) -> StatusMap {
    let re = regex!(r":test:\s+(PASS|FAIL)\s+([\S]+\.test\.(?:ts|js|tsx))");
    let mut map = StatusMap::new();
    for line in log.lines() {
        if let Some(caps) = re.captures(line) {
            let status = if &caps[1] == "PASS" {
                TestStatus::Passed
            } else {
                TestStatus::Failed
            };
            map.record(&caps[2], status);
        }
    }
    map
}

/// Vitest verbose cases, where a `stderr | case` line fails that case or
/// every case nested under it
pub fn parse_vitest_cases(log: &str) -> StatusMap {
    let case_re = regex!(r"^\s*(✓|✗)\s+(.+?)\s*$");
    let stderr_re = regex!(r"^stderr\s*\|\s*(.+?)\s*$");

    let mut map = StatusMap::new();
    let mut cases: Vec<String> = Vec::new();
    let mut stderr_cases: Vec<String> = Vec::new();

    for line in log.lines() {
        if let Some(caps) = case_re.captures(line) {
            let status = if &caps[1] == "✓" {
                TestStatus::Passed
            } else {
                TestStatus::Failed
            };
            map.record(&caps[2], status);
            cases.push(caps[2].to_string());
        } else if let Some(caps) = stderr_re.captures(line) {
            stderr_cases.push(caps[1].trim().to_string());
        }
    }

    for failed in stderr_cases {
        if map.contains(&failed) {
            map.set(failed, TestStatus::Failed);
            continue;
        }
        let nested = format!("{} >", failed);
        for case in cases.iter().filter(|c| c.starts_with(&nested)) {
            map.set(case.clone(), TestStatus::Failed);
        }
    }
    map
}

fn suite_path(context: &[(usize, &str)], name: &str) -> String {
    context
        .iter()
        .map(|(_, suite)| *suite)
        .chain(std::iter::once(name))
        .collect::<Vec<_>>()
        .join(" :: ")
}

/// Mocha output where nesting comes from indentation; names are the
/// suite path joined with ` :: `
pub fn parse_mocha_tree(log: &str) -> StatusMap {
    let failure_re = regex!(r"^\s*\d+\)");
    let summary_re = regex!(r"^\d+\s+(passing|pending|failing)");
    const NOISE: [&str; 6] = [
        "at ",
        "Error:",
        "AssertionError",
        "TypeError",
        "+ expected",
        "- actual",
    ];

    let mut map = StatusMap::new();
    let mut context: Vec<(usize, &str)> = Vec::new();

    for line in log.lines() {
        let stripped = line.trim_start_matches(' ');
        if stripped.is_empty() {
            continue;
        }
        let indent = line.len() - stripped.len();

        while context.last().is_some_and(|(level, _)| indent <= *level) {
            context.pop();
        }

        if stripped.starts_with("✔ ") {
            let name = stripped.trim_start_matches(['✔', ' ']);
            let name = name.split('(').next().unwrap_or(name).trim();
            map.record(suite_path(&context, name), TestStatus::Passed);
        } else if failure_re.is_match(stripped) {
            let name = stripped.split_once(')').map(|(_, n)| n.trim()).unwrap_or("");
            map.record(suite_path(&context, name), TestStatus::Failed);
        } else if !summary_re.is_match(stripped)
            && !NOISE.iter().any(|p| stripped.starts_with(p))
            && !(stripped.starts_with('>') || stripped.starts_with('=') || stripped.starts_with("npm "))
        {
            context.push((indent, stripped));
        }
    }
    map
}

fn is_check_line(line: &str) -> bool {
    line.starts_with('✔') || line.starts_with('✓')
}

/// Mocha output split into blank-line separated sections: the first line
/// names the suite, the rest must all be check or failure lines
pub fn parse_mocha_sections(log: &str) -> StatusMap {
    let failure_re = regex!(r"^\d+\)");

    let mut map = StatusMap::new();
    for section in log.split("\n\n") {
        let section = section.trim();
        let lines: Vec<&str> = section.lines().collect();
        if lines.len() < 2 {
            continue;
        }

        let name = lines[0].trim();
        if is_check_line(name) || failure_re.is_match(name) {
            continue;
        }

        let mut failed = false;
        let mut valid = true;
        for line in lines[1..].iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            if is_check_line(line) {
                continue;
            }
            if failure_re.is_match(line) {
                failed = true;
            } else {
                valid = false;
                break;
            }
        }

        if valid {
            let status = if failed {
                TestStatus::Failed
            } else {
                TestStatus::Passed
            };
            map.record(name, status);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mocha_checks() {
        let log = "\
  RuleTester
    ✓ should not throw (12ms)
    ✓ handles empty input
  1) fails on bad config
  1) fails on bad config again
  2) another failure
";
        let map = parse_mocha_checks(log);
        assert_eq!(map.get("should not throw"), Some(TestStatus::Passed));
        assert_eq!(map.get("handles empty input"), Some(TestStatus::Passed));
        assert_eq!(map.get("fails on bad config"), Some(TestStatus::Failed));
        assert!(!map.contains("fails on bad config again"));
        assert_eq!(map.get("another failure"), Some(TestStatus::Failed));
    }

    #[test]
    fn test_vitest_files() {
        let log = "\
 ✓ packages/svelte/tests/runtime/test.ts  1234ms
 FAIL packages/svelte/tests/css/test.ts [ packages/svelte ]
 ✓ packages/svelte/tests/css/test.ts  10ms
";
        let map = parse_vitest_files(log);
        assert_eq!(
            map.get("packages/svelte/tests/runtime/test.ts"),
            Some(TestStatus::Passed)
        );
        assert_eq!(
            map.get("packages/svelte/tests/css/test.ts"),
            Some(TestStatus::Failed)
        );

        let raw = parse_vitest_files_raw(log);
        assert!(raw.contains("packages/svelte/tests/runtime/test.ts  1234ms"));
    }

    #[test]
    fn test_jest_files() {
        let log = "\
PASS test/Compiler.test.js (12.3 s)
FAIL test/Watch.test.js
PASSING summary
";
        let map = parse_jest_files(log);
        assert_eq!(map.get("test/Compiler.test.js"), Some(TestStatus::Passed));
        assert_eq!(map.get("test/Watch.test.js"), Some(TestStatus::Failed));
        assert_eq!(map.get("summary"), Some(TestStatus::Passed));
    }

    #[test]
    fn test_prisma_and_polaris() {
        let log = "\
@prisma/client test: PASS src/a.test.ts (5 s)
@prisma/client test: FAIL src/b.test.ts
@prisma/client test: ✓ src/b.test.ts
@prisma/client test: ✗ src/c.test.js
";
        let map = parse_prisma(log);
        assert_eq!(map.get("src/a.test.ts"), Some(TestStatus::Passed));
        assert_eq!(map.get("src/b.test.ts"), Some(TestStatus::Failed));
        assert_eq!(map.get("src/c.test.js"), Some(TestStatus::Failed));

        let log = "\
polaris-react:test: PASS src/Button.test.tsx
polaris-react:test: FAIL src/Card.test.tsx
polaris-react:test: PASS src/Card.test.tsx
";
        let map = parse_polaris(log);
        assert_eq!(map.get("src/Button.test.tsx"), Some(TestStatus::Passed));
        assert_eq!(map.get("src/Card.test.tsx"), Some(TestStatus::Failed));
    }

    #[test]
    fn test_vitest_cases_with_stderr() {
        let log = "\
 ✓ Button > renders
 ✓ Button > clicks
 ✓ Input > types
 ✗ Input > clears
stderr | Button
stderr | Input > types
";
        let map = parse_vitest_cases(log);
        assert_eq!(map.get("Button > renders"), Some(TestStatus::Failed));
        assert_eq!(map.get("Button > clicks"), Some(TestStatus::Failed));
        assert_eq!(map.get("Input > types"), Some(TestStatus::Failed));
        assert_eq!(map.get("Input > clears"), Some(TestStatus::Failed));
    }

    #[test]
    fn test_mocha_tree() {
        let log = "\
> generator-jhipster@8.0.0 test
  generator - app
    with default config
      ✔ creates files (120ms)
      1) writes package.json
    with blueprint
      ✔ runs blueprint
  2 passing (3s)
  1 failing
";
        let map = parse_mocha_tree(log);
        assert_eq!(
            map.get("generator - app :: with default config :: creates files"),
            Some(TestStatus::Passed)
        );
        assert_eq!(
            map.get("generator - app :: with default config :: writes package.json"),
            Some(TestStatus::Failed)
        );
        assert_eq!(
            map.get("generator - app :: with blueprint :: runs blueprint"),
            Some(TestStatus::Passed)
        );
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_mocha_sections() {
        let log = "\
icons
  ✓ has valid slugs
  ✓ has valid hex

titles
  ✓ sorted
  1) unique

noise
some output line
";
        let map = parse_mocha_sections(log);
        assert_eq!(map.get("icons"), Some(TestStatus::Passed));
        assert_eq!(map.get("titles"), Some(TestStatus::Failed));
        assert!(!map.contains("noise"));
    }
}
