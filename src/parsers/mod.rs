//! Log normalization
//!
//! Test runners print results in wildly different shapes. Each supported
//! repository gets one pure parser turning its raw log into a [`StatusMap`]
//! over a single vocabulary (PASSED, FAILED, SKIPPED, ERROR, UNKNOWN).
//! Parsers are registered by repository key in a [`ParserRegistry`]; an
//! unknown key is reported as "not found" rather than guessed.

/// Lazily compiled literal regex
macro_rules! regex {
    ($re:literal $(,)?) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($re).unwrap());
        &*RE
    }};
}

pub mod dotnet;
pub mod golang;
pub mod javascript;
pub mod jvm;
pub mod native;
pub mod python;
pub mod rust;
pub mod timing;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use timing::{TimingMap, TimingParser, TimingRegistry};

/// Canonical test status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
    Unknown,
}

impl TestStatus {
    /// Map a runner-specific token onto the canonical vocabulary.
    ///
    /// Returns `None` for tokens that are not statuses at all (durations,
    /// counters, boolean flags); callers drop those entries.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "PASSED" | "PASS" | "OK" | "SUCCESS" => Some(Self::Passed),
            "FAILED" | "FAIL" | "FAILURE" => Some(Self::Failed),
            "SKIPPED" | "SKIP" | "NO_TESTS" => Some(Self::Skipped),
            "ERROR" | "BUILD_FAILED" => Some(Self::Error),
            "UNKNOWN" | "XFAIL" | "XPASS" | "INCOMPLETE" | "TODO" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test name to status, in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusMap(IndexMap<String, TestStatus>);

impl StatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status; a FAILED entry is never replaced by PASSED.
    pub fn record(&mut self, name: impl Into<String>, status: TestStatus) {
        let name = name.into();
        if status == TestStatus::Passed && self.0.get(&name) == Some(&TestStatus::Failed) {
            return;
        }
        self.0.insert(name, status);
    }

    /// Record only if the name has not been seen yet.
    pub fn record_first(&mut self, name: impl Into<String>, status: TestStatus) {
        self.0.entry(name.into()).or_insert(status);
    }

    /// Record a raw runner token, dropping tokens that are not statuses.
    pub fn record_token(&mut self, name: impl Into<String>, token: &str) {
        if let Some(status) = TestStatus::from_token(token) {
            self.record(name, status);
        }
    }

    /// Overwrite unconditionally
    pub fn set(&mut self, name: impl Into<String>, status: TestStatus) {
        self.0.insert(name.into(), status);
    }

    pub fn get(&self, name: &str) -> Option<TestStatus> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, TestStatus)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<(String, TestStatus)> for StatusMap {
    fn from_iter<I: IntoIterator<Item = (String, TestStatus)>>(iter: I) -> Self {
        let mut map = StatusMap::new();
        for (name, status) in iter {
            map.record(name, status);
        }
        map
    }
}

/// A parser from one runner's raw log to a status map
pub trait LogParser: Send + Sync {
    fn parse(&self, log: &str) -> StatusMap;
}

impl<F> LogParser for F
where
    F: Fn(&str) -> StatusMap + Send + Sync,
{
    fn parse(&self, log: &str) -> StatusMap {
        self(log)
    }
}

/// Status from the first verdict word found anywhere in a line
pub(crate) fn substring_status(line: &str) -> TestStatus {
    const VERDICTS: [(&str, TestStatus); 5] = [
        ("Passed", TestStatus::Passed),
        ("Failed", TestStatus::Failed),
        ("Error", TestStatus::Error),
        ("Skipped", TestStatus::Skipped),
        ("XFAIL", TestStatus::Unknown),
    ];
    VERDICTS
        .iter()
        .find(|(word, _)| line.contains(word))
        .map(|(_, status)| *status)
        .unwrap_or(TestStatus::Unknown)
}

/// Repository keys match exactly or with `-` normalised to `_`.
pub fn normalize_key(repo_key: &str) -> String {
    repo_key.replace('-', "_")
}

/// Repository key -> parser dispatch table
#[derive(Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Box<dyn LogParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: &str, parser: impl LogParser + 'static) {
        self.parsers.insert(normalize_key(key), Box::new(parser));
    }

    pub fn get(&self, repo_key: &str) -> Option<&dyn LogParser> {
        self.parsers
            .get(repo_key)
            .or_else(|| self.parsers.get(&normalize_key(repo_key)))
            .map(|p| p.as_ref())
    }

    /// `None` when no parser is registered for the key
    pub fn parse(&self, repo_key: &str, log: &str) -> Option<StatusMap> {
        self.get(repo_key).map(|p| p.parse(log))
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Parsers for functional and performance-free evaluation
    pub fn functional() -> Self {
        let mut r = Self::new();

        r.register("systemd", native::parse_systemd);
        r.register("mpv", native::parse_mpv);
        r.register("xnnpack", native::parse_ctest);
        r.register("bitcoin", native::parse_ctest);
        r.register("bitcoin_old", native::parse_boost_suites);
        r.register("arrow", native::parse_arrow);
        r.register("godot", native::parse_junit_xml);
        r.register("protobuf", native::parse_gtest);

        r.register("matrixone", golang::parse_matrixone);
        r.register("loki", golang::parse_loki);
        r.register("terraform", golang::parse_terraform);
        r.register("cosmos_sdk", golang::parse_cosmos_sdk);

        r.register("cargo", rust::parse_libtest);
        r.register("rust_analyzer", rust::parse_libtest);
        r.register("rust_clippy", rust::parse_libtest);
        r.register("deno", rust::parse_deno);

        r.register("eslint", javascript::parse_mocha_checks);
        r.register("svelte", javascript::parse_vitest_files);
        r.register("webpack", javascript::parse_jest_files);
        r.register("prisma", javascript::parse_prisma);
        r.register("polaris", javascript::parse_polaris);
        r.register("element_plus", javascript::parse_vitest_cases);
        r.register("generator_jhipster", javascript::parse_mocha_tree);
        r.register("simple_icons", javascript::parse_mocha_sections);

        r.register("dgs_framework", jvm::parse_gradle_summary);
        r.register("graphql_kotlin", jvm::parse_gradle_summary);
        r.register("kotlinpoet", jvm::parse_gradle_summary);
        r.register("ort", jvm::parse_gradle_events);
        r.register("runelite", |log: &str| jvm::parse_surefire_summary(log, "net."));
        r.register("google_cloud_java", |log: &str| {
            jvm::parse_surefire_summary(log, "com.")
        });
        r.register("checkstyle", |log: &str| jvm::parse_surefire_summary(log, "com."));
        r.register("dropwizard", jvm::parse_maven_reactor);
        r.register("shardingsphere", jvm::parse_maven_tests);
        r.register("camel", jvm::parse_maven_tests);

        r.register("kiota", dotnet::parse_kiota);
        r.register("openra", dotnet::parse_openra);

        r.register("keras", python::parse_keras);
        r.register("mypy", python::parse_mypy);
        r.register("great_expectations", python::parse_pytest_verbose);
        r.register("scipy", python::parse_pytest_columns);
        r.register("frr", python::parse_frr);
        r.register("sympy", python::parse_sympy);
        r.register("micropython", python::parse_micropython);

        r
    }

    /// Parsers for configuration-deployment tasks
    pub fn deployment() -> Self {
        let mut r = Self::functional();
        r.register("runelite", jvm::parse_maven_reactor);
        r.register("svelte", javascript::parse_vitest_files_raw);
        r
    }
}

static FUNCTIONAL: Lazy<ParserRegistry> = Lazy::new(ParserRegistry::functional);
static DEPLOYMENT: Lazy<ParserRegistry> = Lazy::new(ParserRegistry::deployment);
static TIMING: Lazy<TimingRegistry> = Lazy::new(TimingRegistry::standard);

/// Which parser table a stage uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserTable {
    Functional,
    Deployment,
    Timing,
}

impl ParserTable {
    /// Parse a raw log; `None` when the table has no parser for the key.
    pub fn parse(&self, repo_key: &str, log: &str) -> Option<ParsedLog> {
        match self {
            Self::Functional => FUNCTIONAL.parse(repo_key, log).map(ParsedLog::Status),
            Self::Deployment => DEPLOYMENT.parse(repo_key, log).map(ParsedLog::Status),
            Self::Timing => TIMING.parse(repo_key, log).map(ParsedLog::Timing),
        }
    }

    pub fn has_parser(&self, repo_key: &str) -> bool {
        match self {
            Self::Functional => FUNCTIONAL.get(repo_key).is_some(),
            Self::Deployment => DEPLOYMENT.get(repo_key).is_some(),
            Self::Timing => TIMING.get(repo_key).is_some(),
        }
    }

    pub fn keys(&self) -> Vec<&'static str> {
        match self {
            Self::Functional => FUNCTIONAL.keys(),
            Self::Deployment => DEPLOYMENT.keys(),
            Self::Timing => TIMING.keys(),
        }
    }
}

/// Output of a stage's log parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParsedLog {
    Status(StatusMap),
    Timing(TimingMap),
}

impl ParsedLog {
    pub fn as_status(&self) -> Option<&StatusMap> {
        match self {
            Self::Status(map) => Some(map),
            Self::Timing(_) => None,
        }
    }

    pub fn as_timing(&self) -> Option<&TimingMap> {
        match self {
            Self::Timing(map) => Some(map),
            Self::Status(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Status(map) => map.is_empty(),
            Self::Timing(map) => map.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_sticks() {
        let mut map = StatusMap::new();
        map.record("t", TestStatus::Passed);
        map.record("t", TestStatus::Failed);
        map.record("t", TestStatus::Passed);
        assert_eq!(map.get("t"), Some(TestStatus::Failed));

        map.record("t", TestStatus::Error);
        assert_eq!(map.get("t"), Some(TestStatus::Error));
    }

    #[test]
    fn test_record_first() {
        let mut map = StatusMap::new();
        map.record_first("t", TestStatus::Failed);
        map.record_first("t", TestStatus::Passed);
        assert_eq!(map.get("t"), Some(TestStatus::Failed));
    }

    #[test]
    fn test_foreign_tokens() {
        assert_eq!(TestStatus::from_token("XFAIL"), Some(TestStatus::Unknown));
        assert_eq!(TestStatus::from_token("XPASS"), Some(TestStatus::Unknown));
        assert_eq!(TestStatus::from_token("NO_TESTS"), Some(TestStatus::Skipped));
        assert_eq!(TestStatus::from_token("BUILD_FAILED"), Some(TestStatus::Error));
        assert_eq!(TestStatus::from_token("pass"), Some(TestStatus::Passed));
        assert_eq!(TestStatus::from_token("0.12s"), None);
        assert_eq!(TestStatus::from_token("TRUE"), None);

        let mut map = StatusMap::new();
        map.record_token("a", "SKIP");
        map.record_token("a__DURATION", "0.1s");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("a"), Some(TestStatus::Skipped));
    }

    #[test]
    fn test_status_map_json_roundtrip_preserves_order() {
        let mut map = StatusMap::new();
        map.record("z", TestStatus::Passed);
        map.record("a", TestStatus::Failed);
        map.record("m", TestStatus::Unknown);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"z":"PASSED","a":"FAILED","m":"UNKNOWN"}"#);
        let back: StatusMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_registry_normalizes_keys() {
        let registry = ParserRegistry::functional();
        assert!(registry.get("rust-analyzer").is_some());
        assert!(registry.get("google-cloud-java").is_some());
        assert!(registry.get("bitcoin-old").is_some());
        assert!(registry.get("not-a-repo").is_none());
        assert!(registry.parse("not-a-repo", "anything").is_none());
        assert_eq!(registry.keys().len(), 43);
    }

    #[test]
    fn test_custom_parser_registration() {
        let mut registry = ParserRegistry::new();
        registry.register("my-repo", |log: &str| {
            log.lines()
                .map(|l| (l.to_string(), TestStatus::Passed))
                .collect()
        });
        let map = registry.parse("my_repo", "a\nb").unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_deployment_table_overrides() {
        let log = "[INFO] core ........ SUCCESS [  1.2 s]\n";
        let functional = ParserTable::Functional.parse("runelite", log).unwrap();
        assert!(functional.is_empty());

        let deployment = ParserTable::Deployment.parse("runelite", log).unwrap();
        assert_eq!(
            deployment.as_status().unwrap().get("core"),
            Some(TestStatus::Passed)
        );
    }

    #[test]
    fn test_parsed_log_untagged_json() {
        let status: ParsedLog = serde_json::from_str(r#"{"a": "PASSED"}"#).unwrap();
        assert!(status.as_status().is_some());
        let timing: ParsedLog = serde_json::from_str(r#"{"a": 1.5}"#).unwrap();
        assert_eq!(timing.as_timing().unwrap().get("a"), Some(1.5));
    }
}
