//! Run configuration
//!
//! Defines everything a single evaluation run needs:
//! - Output layout (work, scratch and result directories per run id)
//! - Worker budget and per-stage timeouts
//! - Container resource limits and the host admission policy
//! - Proxy settings forwarded into every stage
//! - Judge endpoint credentials for the code-understanding track

use crate::error::{EvalError, EvalResult};
use crate::runner::script::shell_quote;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Unique identifier of this run, used to key every output directory
    pub run_id: String,
    /// Root under which `work/`, `tmp/` and `results/` are created
    pub output_root: PathBuf,
    /// Maximum number of work items evaluated concurrently
    pub max_workers: usize,
    /// Judge model name (required by the code-understanding track)
    pub model_name: Option<String>,
    /// Judge API key
    pub api_key: String,
    /// Judge API base URL
    pub base_url: String,
    /// Proxy settings exported into each stage
    pub proxy: ProxyConfig,
    /// Resource limits for evaluation containers
    pub limits: ContainerLimits,
    /// Host load admission policy
    pub admission: AdmissionConfig,
    /// Timeout for a single stage script
    pub stage_timeout_secs: u64,
    /// Timeout for configuration-deployment stages
    pub deployment_timeout_secs: u64,
    /// Image repository; the tag is the work item's repo key
    pub image_prefix: String,
    /// Directory holding `<repo_key>.tar` image archives
    pub image_tar_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: default_run_id(),
            output_root: PathBuf::from("output"),
            max_workers: 5,
            model_name: None,
            api_key: String::new(),
            base_url: String::new(),
            proxy: ProxyConfig::default(),
            limits: ContainerLimits::default(),
            admission: AdmissionConfig::default(),
            stage_timeout_secs: 4000,
            deployment_timeout_secs: 6000,
            image_prefix: "swecompass/eval".to_string(),
            image_tar_dir: None,
        }
    }
}

/// Timestamp-based run id, e.g. `20250101_120000`
pub fn default_run_id() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Resolved per-run directories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub work_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub result_dir: PathBuf,
}

impl RunConfig {
    /// Load a configuration file; missing fields keep their defaults.
    pub fn from_toml_path(path: &Path) -> EvalResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EvalError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn paths(&self) -> RunPaths {
        RunPaths {
            work_dir: self.output_root.join("work").join(&self.run_id),
            tmp_dir: self.output_root.join("tmp").join(&self.run_id),
            result_dir: self.output_root.join("results").join(&self.run_id),
        }
    }

    /// Create the run directories
    pub fn prepare_dirs(&self) -> EvalResult<RunPaths> {
        let paths = self.paths();
        std::fs::create_dir_all(&paths.work_dir)?;
        std::fs::create_dir_all(&paths.tmp_dir)?;
        std::fs::create_dir_all(&paths.result_dir)?;
        info!(
            "Initialized directories: work={} tmp={} results={}",
            paths.work_dir.display(),
            paths.tmp_dir.display(),
            paths.result_dir.display()
        );
        Ok(paths)
    }

    /// Fill judge credentials from the environment when not set explicitly.
    pub fn resolve_credentials(&mut self) {
        if self.api_key.is_empty() {
            self.api_key = first_env(&["OPENAI_API_KEY", "API_KEY"]).unwrap_or_default();
        }
        if self.base_url.is_empty() {
            self.base_url = first_env(&["OPENAI_BASE_URL", "BASE_URL"]).unwrap_or_default();
        }
    }

    pub fn judge_config(&self) -> JudgeConfig {
        let mut judge = JudgeConfig::default();
        if !self.base_url.is_empty() {
            judge.api_base = self.base_url.trim_end_matches('/').to_string();
        }
        judge.api_key = self.api_key.clone();
        if let Some(model) = &self.model_name {
            judge.model = model.clone();
        }
        judge
    }

    /// Full image reference for a repository key
    pub fn image_for(&self, repo_key: &str) -> String {
        format!("{}:{}", self.image_prefix, repo_key)
    }

    /// Write `config.json` into the work directory with the API key redacted.
    pub fn save_snapshot(&self) -> EvalResult<PathBuf> {
        let paths = self.paths();
        std::fs::create_dir_all(&paths.work_dir)?;

        let mut redacted = self.clone();
        if !redacted.api_key.is_empty() {
            redacted.api_key = "***".to_string();
        }

        let mut run_config = serde_json::to_value(&redacted)?;
        if let Some(obj) = run_config.as_object_mut() {
            obj.insert(
                "work_dir".to_string(),
                paths.work_dir.display().to_string().into(),
            );
            obj.insert(
                "tmp_dir".to_string(),
                paths.tmp_dir.display().to_string().into(),
            );
            obj.insert(
                "result_dir".to_string(),
                paths.result_dir.display().to_string().into(),
            );
        }

        let snapshot = serde_json::json!({ "run_config": run_config });
        let path = paths.work_dir.join("config.json");
        std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
        info!("Config snapshot saved to {}", path.display());
        Ok(path)
    }
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.is_empty())
}

/// Proxy settings exported at the top of every stage script
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
}

impl ProxyConfig {
    /// Use the explicit proxy for both schemes, otherwise fall back to the environment.
    pub fn resolve(arg: Option<&str>) -> Self {
        let no_proxy = first_env(&["no_proxy", "NO_PROXY"]).unwrap_or_default();
        match arg.filter(|p| !p.is_empty()) {
            Some(proxy) => Self {
                http_proxy: proxy.to_string(),
                https_proxy: proxy.to_string(),
                no_proxy,
            },
            None => Self {
                http_proxy: first_env(&["http_proxy", "HTTP_PROXY"]).unwrap_or_default(),
                https_proxy: first_env(&["https_proxy", "HTTPS_PROXY"]).unwrap_or_default(),
                no_proxy,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.http_proxy.is_empty() && self.https_proxy.is_empty() && self.no_proxy.is_empty()
    }

    /// `export` lines for every non-empty variable, values shell-quoted
    pub fn exports(&self) -> Vec<String> {
        [
            ("http_proxy", &self.http_proxy),
            ("https_proxy", &self.https_proxy),
            ("HTTP_PROXY", &self.http_proxy),
            ("HTTPS_PROXY", &self.https_proxy),
            ("no_proxy", &self.no_proxy),
            ("NO_PROXY", &self.no_proxy),
        ]
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("export {}={}", k, shell_quote(v)))
        .collect()
    }
}

/// Resource limits applied when an evaluation container is created
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerLimits {
    /// Memory limit (e.g., "8g")
    pub memory_limit: String,
    /// CPU limit (e.g., 5.0 = 5 CPUs)
    pub cpu_limit: f64,
    /// Network mode (none, bridge, host)
    pub network_mode: String,
    /// Run containers privileged
    pub privileged: bool,
    /// Repository checkout inside the image
    pub workdir: String,
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self {
            memory_limit: "8g".to_string(),
            cpu_limit: 5.0,
            network_mode: "host".to_string(),
            privileged: true,
            workdir: "/testbed".to_string(),
        }
    }
}

impl ContainerLimits {
    pub fn memory_bytes(&self) -> EvalResult<i64> {
        parse_memory_limit(&self.memory_limit)
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }
}

/// Parse memory limit string (e.g., "2g", "512m") to bytes
pub fn parse_memory_limit(limit: &str) -> EvalResult<i64> {
    let limit = limit.trim().to_lowercase();
    let invalid = || EvalError::Config(format!("Invalid memory limit: {}", limit));

    let (digits, multiplier) = if let Some(num) = limit.strip_suffix('g') {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        (num, 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('k') {
        (num, 1024)
    } else {
        (limit.as_str(), 1)
    };

    let n: i64 = digits.parse().map_err(|_| invalid())?;
    Ok(n * multiplier)
}

/// Host load admission before a new container is created
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub enabled: bool,
    /// CPU utilisation (percent) that must not be reached
    pub cpu_threshold: f64,
    /// Memory utilisation (percent) that must not be reached
    pub mem_threshold: f64,
    /// Delay between load samples while the host is busy
    pub retry_delay_secs: u64,
    /// Give up after this many busy samples; `None` waits forever
    pub max_attempts: Option<u32>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: 80.0,
            mem_threshold: 80.0,
            retry_delay_secs: 30,
            max_attempts: Some(240),
        }
    }
}

/// OpenAI-compatible judge endpoint
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            api_base: std::env::var("LLM_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            timeout_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("2g").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1024k").unwrap(), 1024 * 1024);
        assert_eq!(parse_memory_limit("4096").unwrap(), 4096);
        assert!(parse_memory_limit("lots").is_err());
    }

    #[test]
    fn test_run_config_default() {
        let config = RunConfig::default();
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.stage_timeout_secs, 4000);
        assert_eq!(config.deployment_timeout_secs, 6000);
        assert_eq!(config.limits.memory_limit, "8g");
        assert_eq!(config.limits.nano_cpus(), 5_000_000_000);
        assert_eq!(config.admission.cpu_threshold, 80.0);
        assert_eq!(config.run_id.len(), "20250101_120000".len());
    }

    #[test]
    fn test_paths_are_keyed_by_run_id() {
        let config = RunConfig {
            run_id: "r1".to_string(),
            output_root: PathBuf::from("/data/out"),
            ..Default::default()
        };
        let paths = config.paths();
        assert_eq!(paths.work_dir, PathBuf::from("/data/out/work/r1"));
        assert_eq!(paths.tmp_dir, PathBuf::from("/data/out/tmp/r1"));
        assert_eq!(paths.result_dir, PathBuf::from("/data/out/results/r1"));
    }

    #[test]
    fn test_toml_overlay_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.toml");
        std::fs::write(
            &path,
            r#"
run_id = "nightly"
max_workers = 12

[limits]
memory_limit = "16g"

[admission]
max_attempts = 3
"#,
        )
        .unwrap();

        let config = RunConfig::from_toml_path(&path).unwrap();
        assert_eq!(config.run_id, "nightly");
        assert_eq!(config.max_workers, 12);
        assert_eq!(config.limits.memory_limit, "16g");
        assert_eq!(config.limits.cpu_limit, 5.0);
        assert_eq!(config.admission.max_attempts, Some(3));
        assert_eq!(config.admission.retry_delay_secs, 30);
    }

    #[test]
    fn test_snapshot_redacts_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            run_id: "snap".to_string(),
            output_root: dir.path().to_path_buf(),
            api_key: "sk-secret".to_string(),
            ..Default::default()
        };

        let path = config.save_snapshot().unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert_eq!(json["run_config"]["run_id"], "snap");
        assert_eq!(json["run_config"]["api_key"], "***");
        assert!(!content.contains("sk-secret"));
        assert!(json["run_config"]["work_dir"]
            .as_str()
            .unwrap()
            .ends_with("work/snap"));
    }

    #[test]
    fn test_proxy_exports_skip_empty_and_quote() {
        let proxy = ProxyConfig {
            http_proxy: "http://proxy:8080".to_string(),
            https_proxy: String::new(),
            no_proxy: "localhost,127.0.0.1".to_string(),
        };
        let exports = proxy.exports();
        assert_eq!(
            exports,
            vec![
                "export http_proxy=http://proxy:8080",
                "export HTTP_PROXY=http://proxy:8080",
                "export no_proxy=localhost,127.0.0.1",
                "export NO_PROXY=localhost,127.0.0.1",
            ]
        );
    }

    #[test]
    #[serial]
    fn test_proxy_resolve_prefers_argument() {
        std::env::set_var("http_proxy", "http://env:1");
        let proxy = ProxyConfig::resolve(Some("http://arg:2"));
        assert_eq!(proxy.http_proxy, "http://arg:2");
        assert_eq!(proxy.https_proxy, "http://arg:2");

        let proxy = ProxyConfig::resolve(None);
        assert_eq!(proxy.http_proxy, "http://env:1");
        std::env::remove_var("http_proxy");
    }

    #[test]
    #[serial]
    fn test_credentials_from_env() {
        std::env::remove_var("OPENAI_API_KEY");
        std::env::set_var("API_KEY", "fallback-key");
        std::env::set_var("OPENAI_BASE_URL", "http://judge.local/v1/");

        let mut config = RunConfig::default();
        config.resolve_credentials();
        assert_eq!(config.api_key, "fallback-key");

        config.model_name = Some("judge-model".to_string());
        let judge = config.judge_config();
        assert_eq!(judge.api_base, "http://judge.local/v1");
        assert_eq!(judge.model, "judge-model");

        std::env::remove_var("API_KEY");
        std::env::remove_var("OPENAI_BASE_URL");
    }
}
