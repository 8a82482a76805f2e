//! Test-case generation track (`test_case_generation`)
//!
//! The model patch contributes test files only. They run against the
//! reference change under a coverage tool, and the score is the line
//! coverage of that reference change.

use super::{Prepared, Stage, StageReport, Track, TrackOutcome, TrackPolicy, Workspace};
use crate::container::StagedAsset;
use crate::coverage::{split_file_sections, write_patch_coverage, write_result, PatchCoverage};
use crate::dataset::WorkItem;
use crate::error::EvalResult;
use crate::util::safe_file_name;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const TEST_FILE_PLACEHOLDER: &str = "<specific-test-file>";
const TEST_EXTENSIONS: [&str; 4] = [".js", ".ts", ".py", ".test"];
const TEST_WORDS: [&str; 4] = ["test", "tests", "e2e", "testing"];

/// How a repository installs coverage tooling and runs selected tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageCommand {
    pub repo: &'static str,
    pub pre_test_cmd: &'static str,
    /// Contains `<specific-test-file>`
    pub test_cmd: &'static str,
}

const COVERAGE_COMMANDS: [CoverageCommand; 9] = [
    CoverageCommand {
        repo: "sveltejs/svelte",
        pre_test_cmd: "cd /testbed && pnpm install && pnpm add -D -w c8",
        test_cmd: "npx c8 --reporter=text --reporter=html --reporter=json --reports-dir=/tmp/coverage npx vitest run --reporter=verbose <specific-test-file>",
    },
    CoverageCommand {
        repo: "sympy/sympy",
        pre_test_cmd: "cd /testbed && pip install -e . && pip install setuptools coverage pytest pytest-cov hypothesis",
        test_cmd: "cd /testbed && pytest <specific-test-file> --cov=. --cov-branch --cov-report=term-missing --cov-report=xml:/tmp/coverage/coverage.xml --cov-report=html:/tmp/coverage --cov-report=json:/tmp/coverage/coverage.json",
    },
    CoverageCommand {
        repo: "keras-team/keras",
        pre_test_cmd: "cd /testbed && pip install setuptools pytest pytest-cov coverage",
        test_cmd: "cd /testbed && pytest <specific-test-file> -v --cov=keras --cov-branch --cov-report=term --cov-report=xml:/tmp/coverage/coverage.xml --cov-report=html:/tmp/coverage --cov-report=json:/tmp/coverage/coverage.json",
    },
    CoverageCommand {
        repo: "eslint/eslint",
        pre_test_cmd: "cd /testbed && npm install --legacy-peer-deps && npm install --save-dev c8",
        test_cmd: "npx c8 --reporter=text --reporter=html --reporter=json --reports-dir=/tmp/coverage ./node_modules/.bin/mocha --reporter spec <specific-test-file>",
    },
    CoverageCommand {
        repo: "python/mypy",
        pre_test_cmd: "cd /testbed && pip install -e . && pip install setuptools coverage pytest pytest-cov",
        test_cmd: "cd /testbed && pytest -k <specific-test-file> -v -n0 --cov=mypy --cov-branch --cov-report=term-missing --cov-report=xml:/tmp/coverage/coverage.xml --cov-report=html:/tmp/coverage --cov-report=json:/tmp/coverage/coverage.json",
    },
    CoverageCommand {
        repo: "jhipster/generator-jhipster",
        pre_test_cmd: "cd /testbed && npm ci && npm link && npm install --save-dev c8",
        test_cmd: "cd /testbed && npx c8 --reporter=text --reporter=html --reporter=json --reports-dir=/tmp/coverage npm test -- <specific-test-file>",
    },
    CoverageCommand {
        repo: "webpack/webpack",
        pre_test_cmd: "cd /testbed && yarn install && yarn setup && yarn add -D c8",
        test_cmd: "cd /testbed && npx c8 --reporter=text --reporter=html --reporter=json --reports-dir=/tmp/coverage yarn test -- --testPathPattern=<specific-test-file>",
    },
    CoverageCommand {
        repo: "prisma/prisma",
        pre_test_cmd: "cd /testbed && npm install -g pnpm && pnpm install && pnpm build && pnpm add -D -w c8",
        test_cmd: "cd /testbed && GITHUB_REF_NAME=develop npx c8 --reporter=text --reporter=html --reporter=json --reports-dir=/tmp/coverage pnpm test <specific-test-file>",
    },
    CoverageCommand {
        repo: "simple-icons/simple-icons",
        pre_test_cmd: "cd /testbed && npm install --no-audit --no-fund && npm install --save-dev c8",
        test_cmd: "cd /testbed && npx c8 --reporter=text --reporter=html --reporter=json --reports-dir=/tmp/coverage npm test -- <specific-test-file>",
    },
];

pub fn coverage_command(repo: &str) -> Option<&'static CoverageCommand> {
    COVERAGE_COMMANDS.iter().find(|c| c.repo == repo)
}

/// Test file sections of the model patch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSelection {
    /// Concatenated diff text of the selected sections
    pub patch: String,
    /// Distinct paths in patch order
    pub files: Vec<String>,
}

fn is_test_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    if name == "__init__.py" || !TEST_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
        return false;
    }
    let lower = path.to_lowercase();
    TEST_WORDS.iter().any(|word| lower.contains(word))
}

pub fn select_test_files(model_patch: &str) -> TestSelection {
    let mut selection = TestSelection::default();
    for section in split_file_sections(model_patch) {
        if !is_test_file(&section.path) {
            continue;
        }
        selection.patch.push_str(&section.text);
        if !selection.files.contains(&section.path) {
            selection.files.push(section.path);
        }
    }
    selection
}

/// Longest shared directory of `paths`; a trailing file name is dropped.
pub fn common_parent(paths: &[String]) -> Option<String> {
    match paths {
        [] => None,
        [single] => Some(
            single
                .rsplit_once('/')
                .map(|(dir, _)| dir.to_string())
                .unwrap_or_default(),
        ),
        _ => {
            let split: Vec<Vec<&str>> = paths.iter().map(|p| p.split('/').collect()).collect();
            let shortest = split.iter().map(Vec::len).min().unwrap_or(0);
            let mut common: Vec<&str> = Vec::new();
            for i in 0..shortest {
                let part = split[0][i];
                if split.iter().all(|p| p[i] == part) {
                    common.push(part);
                } else {
                    break;
                }
            }
            if common.last().is_some_and(|last| last.contains('.')) {
                common.pop();
            }
            (!common.is_empty()).then(|| common.join("/"))
        }
    }
}

/// Names substituted for the placeholder, per repository conventions
pub fn test_targets(repo: &str, files: &[String]) -> Vec<String> {
    match repo {
        "python/mypy" => files
            .iter()
            .map(|path| {
                let name = path.rsplit('/').next().unwrap_or(path);
                if name.ends_with(".test") {
                    name.replace(".test", "")
                } else {
                    name.to_string()
                }
            })
            .collect(),
        "webpack/webpack" => match common_parent(files).filter(|dir| !dir.is_empty()) {
            Some(dir) => vec![dir
                .strip_prefix("test/")
                .map(str::to_string)
                .unwrap_or(dir)],
            None => files.to_vec(),
        },
        _ => files.to_vec(),
    }
}

/// Lines of `eval.sh`
pub fn eval_script(command: &CoverageCommand, base_commit: &str, targets: &[String]) -> Vec<String> {
    let test_cmd = command
        .test_cmd
        .replace(TEST_FILE_PLACEHOLDER, &targets.join(" "));
    vec![
        format!("cd /testbed && git checkout {}", base_commit),
        "cd /testbed && git apply -v /tmp/code.patch".to_string(),
        "cd /testbed && git apply -v /tmp/test.patch".to_string(),
        format!("cd /testbed && {}", command.pre_test_cmd),
        format!("cd /testbed && {}", test_cmd),
    ]
}

#[derive(Debug, Clone)]
pub struct CoveragePolicy {
    timeout: Duration,
}

impl CoveragePolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TrackPolicy for CoveragePolicy {
    fn track(&self) -> Track {
        Track::Coverage
    }

    fn container_name(&self, item: &WorkItem) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "swe_compass_eval_ut_{}_{}_{}",
            safe_file_name(&item.instance_id),
            &suffix[..7],
            &suffix[7..14]
        )
    }

    fn prepare(&self, item: &WorkItem, ws: &Workspace) -> EvalResult<Prepared> {
        let Some(command) = coverage_command(&item.repo) else {
            return Ok(Prepared::Skip(format!(
                "No coverage command for repository: {}",
                item.repo
            )));
        };
        let Some(reference) = item.test_patch.as_deref() else {
            return Ok(Prepared::Skip("Missing reference patch".to_string()));
        };

        let selection = select_test_files(&item.model_patch);
        if selection.files.is_empty() {
            return Ok(Prepared::Skip("No test files found in model patch".to_string()));
        }
        let targets = test_targets(&item.repo, &selection.files);
        debug!("{} test targets: {:?}", item.instance_id, targets);

        let script_path = ws.dir.join("eval.sh");
        let code_path = ws.dir.join("code.patch");
        let test_path = ws.dir.join("test.patch");
        let mut script = eval_script(command, &item.base_commit, &targets).join("\n");
        script.push('\n');
        std::fs::write(&script_path, script)?;
        std::fs::write(&code_path, reference)?;
        std::fs::write(&test_path, &selection.patch)?;

        Ok(Prepared::Run {
            assets: vec![
                StagedAsset::new(script_path, "/tmp/eval.sh"),
                StagedAsset::new(code_path, "/tmp/code.patch"),
                StagedAsset::new(test_path, "/tmp/test.patch"),
            ],
            stages: vec![Stage::Script {
                name: "eval".to_string(),
                script: "cp /tmp/eval.sh /testbed && bash /testbed/eval.sh".to_string(),
                log: ws.dir.join("eval.log"),
                timeout: self.timeout,
                collect: vec![("/tmp/coverage".to_string(), ws.dir.clone())],
            }],
        })
    }

    fn score(
        &self,
        item: &WorkItem,
        ws: &Workspace,
        reports: &[StageReport],
    ) -> EvalResult<TrackOutcome> {
        for report in reports {
            if let StageReport::Script { name, exit_code } = report {
                if *exit_code != 0 {
                    warn!("{} {} exited with {}", item.instance_id, name, exit_code);
                }
            }
        }
        let run_state = ws.dir.join("coverage").is_dir();
        if !run_state {
            warn!("No coverage collected for {}", item.instance_id);
        }
        let score = write_patch_coverage(&ws.dir);
        Ok(TrackOutcome::scored(self.track(), score, run_state))
    }

    fn record_failure(
        &self,
        _item: &WorkItem,
        ws: &Workspace,
        reason: &str,
    ) -> EvalResult<TrackOutcome> {
        write_result(&ws.dir, &PatchCoverage::failed(reason))?;
        Ok(TrackOutcome::failed(self.track(), reason))
    }
}
