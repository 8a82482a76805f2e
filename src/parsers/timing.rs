//! Per-test durations for the performance track
//!
//! Units follow the runner (seconds or milliseconds); both sides of a
//! comparison always come from the same parser, so they are never mixed.
//! Entries below each parser's noise floor are dropped.

use super::normalize_key;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Test name to duration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimingMap(IndexMap<String, f64>);

impl TimingMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, duration: f64) {
        self.0.insert(name.into(), duration);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Duration if present and strictly positive
    pub fn positive(&self, name: &str) -> Option<f64> {
        self.get(name).filter(|d| *d > 0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for TimingMap {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub trait TimingParser: Send + Sync {
    fn parse(&self, log: &str) -> TimingMap;
}

impl<F> TimingParser for F
where
    F: Fn(&str) -> TimingMap + Send + Sync,
{
    fn parse(&self, log: &str) -> TimingMap {
        self(log)
    }
}

#[derive(Default)]
pub struct TimingRegistry {
    parsers: HashMap<String, Box<dyn TimingParser>>,
}

impl TimingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: &str, parser: impl TimingParser + 'static) {
        self.parsers.insert(normalize_key(key), Box::new(parser));
    }

    pub fn get(&self, repo_key: &str) -> Option<&dyn TimingParser> {
        self.parsers
            .get(repo_key)
            .or_else(|| self.parsers.get(&normalize_key(repo_key)))
            .map(|p| p.as_ref())
    }

    pub fn parse(&self, repo_key: &str, log: &str) -> Option<TimingMap> {
        self.get(repo_key).map(|p| p.parse(log))
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn standard() -> Self {
        let mut r = Self::new();
        r.register("arrow", time_ctest);
        r.register("checkstyle", time_surefire);
        r.register("kiota", time_dotnet);
        r.register("matrixone", time_go_json);
        r.register("mypy_po", time_mypy);
        r.register("protobuf", time_gtest);
        r.register("svelte", time_tap);
        r.register("systemd", time_meson);
        r
    }
}

/// Passed CTest cases, seconds
pub fn time_ctest(log: &str) -> TimingMap {
    let re = regex!(r"(?i)Test\s+#\d+:\s*(\S+).*?Passed\s+([\d.]+)\s*sec");
    let mut map = TimingMap::new();
    for line in log.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        if let Ok(t) = caps[2].parse::<f64>() {
            if t >= 0.1 {
                map.insert(caps[1].trim(), t);
            }
        }
    }
    map
}

/// Surefire classes with no failures or errors, seconds
pub fn time_surefire(log: &str) -> TimingMap {
    let re = regex!(
        r"Tests run:\s+\d+,\s+Failures:\s+(\d+),\s+Errors:\s+(\d+),\s+Skipped:\s+\d+,\s+Time elapsed:\s+([\d.]+)\s+s\s+--\s+in\s+(\S+)"
    );
    let mut map = TimingMap::new();
    for line in log.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let clean = &caps[1] == "0" && &caps[2] == "0";
        if let Ok(t) = caps[3].parse::<f64>() {
            if clean && t >= 0.01 {
                map.insert(&caps[4], t);
            }
        }
    }
    map
}

/// `Passed Name [12 ms]`, milliseconds; sub-millisecond `[< 1 ms]` skipped
pub fn time_dotnet(log: &str) -> TimingMap {
    let mut map = TimingMap::new();
    for line in log.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("Passed ") else {
            continue;
        };
        let (Some(open), Some(close)) = (line.rfind('['), line.rfind(']')) else {
            continue;
        };
        if close < open {
            continue;
        }
        let name_end = open.saturating_sub("Passed ".len());
        let name = rest.get(..name_end).unwrap_or(rest).trim();
        let time = line[open + 1..close].trim();
        if time.starts_with('<') {
            continue;
        }
        let Some(ms) = time.strip_suffix("ms") else {
            continue;
        };
        if let Ok(ms) = ms.trim().parse::<i64>() {
            if ms >= 10 {
                map.insert(name, ms as f64);
            }
        }
    }
    map
}

/// `go test -json` output events carrying `--- PASS: Name (0.12s)`, seconds
pub fn time_go_json(log: &str) -> TimingMap {
    let mut map = TimingMap::new();
    for line in log.lines().filter(|l| l.contains("--- PASS")) {
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let output = event.get("Output").and_then(Value::as_str).unwrap_or("");
        if !output.starts_with("--- PASS") {
            continue;
        }
        let parts: Vec<&str> = output.split_whitespace().collect();
        if parts.len() < 3 || parts[1] != "PASS:" {
            continue;
        }
        let Some((_, tail)) = output.rsplit_once('(') else {
            continue;
        };
        let Some((time, _)) = tail.split_once(')') else {
            continue;
        };
        if let Ok(t) = time.trim_end_matches('s').parse::<f64>() {
            if t >= 0.1 {
                map.insert(parts[2], t);
            }
        }
    }
    map
}

/// mypy's runtest output: `[success] ... mypy/...: 1.23s`, seconds
pub fn time_mypy(log: &str) -> TimingMap {
    let re = regex!(r"(?i)\[success\]\s+.*?\s+(mypy/.*?):\s*([0-9.]+)s");
    let mut map = TimingMap::new();
    for line in log.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        if let Ok(t) = caps[2].parse::<f64>() {
            if t >= 0.01 {
                map.insert(caps[1].trim(), t);
            }
        }
    }
    map
}

/// `[ OK ] Suite.Case (12 ms)`, converted to seconds
pub fn time_gtest(log: &str) -> TimingMap {
    let re = regex!(r"(?i)\[\s*OK\s*\]\s+(\S+)\s+\((\d+)\s*ms\)");
    let mut map = TimingMap::new();
    for line in log.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        if let Ok(ms) = caps[2].parse::<u64>() {
            let secs = ms as f64 / 1000.0;
            if secs > 0.01 {
                map.insert(caps[1].trim(), secs);
            }
        }
    }
    map
}

/// TAP `ok 3 - name # time=12.5ms`, whole milliseconds; file-level lines
/// are skipped
pub fn time_tap(log: &str) -> TimingMap {
    let re = regex!(r"^\s*ok\s+\d+\s+-\s+(.+?)\s+#\s+time=(\d+(?:\.\d+)?)ms");
    let mut map = TimingMap::new();
    for line in log.lines() {
        let line = line.trim();
        if line.contains(".ts") || line.contains(".js") {
            continue;
        }
        let Some(caps) = re.captures(line) else {
            continue;
        };
        if let Ok(ms) = caps[2].parse::<f64>() {
            let ms = ms.trunc();
            if ms >= 10.0 {
                map.insert(caps[1].trim(), ms);
            }
        }
    }
    map
}

/// Meson `OK` lines for systemd tests, seconds
pub fn time_meson(log: &str) -> TimingMap {
    let re = regex!(r"(?i)^\s*\d+/\d+\s+systemd:(.+?)\s+(OK|FAIL|SKIP|TIMEOUT)\s+([0-9.]+)s");
    let mut map = TimingMap::new();
    for line in log.lines() {
        let Some(caps) = re.captures(line.trim()) else {
            continue;
        };
        if !caps[2].eq_ignore_ascii_case("OK") {
            continue;
        }
        if let Ok(t) = caps[3].parse::<f64>() {
            map.insert(caps[1].trim(), t);
        }
    }
    map
}
