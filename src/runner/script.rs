//! Stage script assembly

use crate::config::ProxyConfig;

/// Repositories whose setup must not run `git clean -fdx`
const NO_CLEAN_REPOS: &[&str] = &[
    "arrow",
    "loki",
    "matrixone",
    "bitcoin-old",
    "scipy",
    "mypy",
    "keras",
    "renovate",
    "docs",
];

/// Quote a string for a POSIX shell, leaving safe strings untouched.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let safe = s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// Whether setup should wipe untracked files before resetting
pub fn needs_clean(repo_key: &str) -> bool {
    !NO_CLEAN_REPOS.contains(&repo_key)
}

/// Setup script for one stage: checkout, patch application, pre-test command
#[derive(Debug, Clone)]
pub struct SetupScript<'a> {
    pub proxy: &'a ProxyConfig,
    pub workdir: &'a str,
    pub base_commit: &'a str,
    pub branch: &'a str,
    pub clean: bool,
    /// Container paths of patches to apply, in order
    pub patches: &'a [String],
    pub pre_test_cmd: &'a str,
}

impl SetupScript<'_> {
    pub fn render(&self) -> String {
        let mut lines = self.proxy.exports();
        lines.push(format!("cd {}", self.workdir));
        if self.clean {
            lines.push(format!(
                "git clean -fdx; git reset --hard {c}; git clean -fdx; git reset --hard {c}",
                c = self.base_commit
            ));
        } else {
            lines.push(format!("git reset --hard {}", self.base_commit));
        }
        lines.push(format!("git checkout -B {}", self.branch));
        for patch in self.patches {
            lines.push(format!("git apply -v --reject --whitespace=fix {}", patch));
        }
        lines.push(self.pre_test_cmd.to_string());
        lines.join("\n")
    }
}

/// Test script: proxy exports followed by the test command
pub fn test_script(proxy: &ProxyConfig, test_cmd: &str) -> String {
    let mut lines = proxy.exports();
    lines.push(test_cmd.to_string());
    lines.join("\n")
}
