//! Work dispatch
//!
//! Each work item is claimed through the filesystem before any work starts:
//! an existing result artifact, lock marker or instance directory means the
//! item belongs to someone else (or is done) and is skipped. Claims are
//! best effort; exclusive creates narrow the race but do not make it a lock
//! service.

use crate::dataset::WorkItem;
use crate::error::EvalResult;
use crate::track::{EvaluatorDispatcher, Track, TrackOutcome, Workspace};
use crate::util::{hostname, local_timestamp};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lock marker inside the instance directory
pub const LOCK_FILE: &str = ".lock";

/// Why an item was not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The result artifact already exists
    Done,
    /// Another worker holds the lock; carries the marker contents
    Locked(String),
    /// The instance directory exists without a result or lock
    DirExists,
}

#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(ClaimGuard),
    Skipped(SkipReason),
}

/// Ownership of one instance directory for the duration of an attempt.
///
/// Dropping the guard removes the lock marker and the scratch directory.
#[derive(Debug)]
pub struct ClaimGuard {
    workspace: Workspace,
    lock: PathBuf,
}

impl ClaimGuard {
    /// Claim `item` under `<work_dir>/<source>/<instance_id>`.
    pub fn try_claim(
        track: Track,
        item: &WorkItem,
        work_dir: &Path,
        tmp_dir: &Path,
    ) -> EvalResult<ClaimOutcome> {
        let dir = track.instance_dir(work_dir, &item.instance_id);
        let lock = dir.join(LOCK_FILE);

        if dir.join(track.artifact(&item.instance_id)).exists() {
            return Ok(ClaimOutcome::Skipped(SkipReason::Done));
        }
        if lock.exists() {
            let holder = match std::fs::read_to_string(&lock) {
                Ok(holder) => holder,
                Err(e) => {
                    debug!("Unreadable lock {}: {}", lock.display(), e);
                    String::new()
                }
            };
            return Ok(ClaimOutcome::Skipped(SkipReason::Locked(
                holder.trim().to_string(),
            )));
        }
        if dir.exists() {
            return Ok(ClaimOutcome::Skipped(SkipReason::DirExists));
        }

        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Ok(ClaimOutcome::Skipped(SkipReason::DirExists));
            }
            Err(e) => return Err(e.into()),
        }

        match Self::lock_and_stage(item, dir.clone(), lock, tmp_dir) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                    warn!("Failed to remove {}: {}", dir.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    /// Write the lock marker and create scratch inside a freshly created `dir`.
    fn lock_and_stage(
        item: &WorkItem,
        dir: PathBuf,
        lock: PathBuf,
        tmp_dir: &Path,
    ) -> EvalResult<ClaimOutcome> {
        let holder = format!("{} {}\n", hostname(), local_timestamp());
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock)
        {
            Ok(mut file) => file.write_all(holder.as_bytes())?,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Ok(ClaimOutcome::Skipped(SkipReason::Locked(String::new())));
            }
            Err(e) => return Err(e.into()),
        }

        let uid = format!(
            "{}-{}-{}",
            item.repo_key,
            item.pull_number,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let scratch = tmp_dir.join(&uid);
        let guard = ClaimGuard {
            workspace: Workspace { dir, scratch, uid },
            lock,
        };
        std::fs::create_dir_all(&guard.workspace.scratch)?;
        debug!("Claimed {}", guard.workspace.dir.display());
        Ok(ClaimOutcome::Claimed(guard))
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove lock {}: {}", self.lock.display(), e);
            }
        }
        if let Err(e) = std::fs::remove_dir_all(&self.workspace.scratch) {
            if e.kind() != ErrorKind::NotFound {
                warn!(
                    "Failed to remove scratch {}: {}",
                    self.workspace.scratch.display(),
                    e
                );
            }
        }
    }
}

/// What happened to one dispatched item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemStatus {
    Evaluated(TrackOutcome),
    Skipped(SkipReason),
    /// No track handles the item's source
    Unsupported,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchSummary {
    pub total: usize,
    pub evaluated: usize,
    pub skipped: usize,
    pub unsupported: usize,
    /// `(instance_id, error)` for items whose worker failed
    pub failed: Vec<(String, String)>,
}

impl DispatchSummary {
    fn record(&mut self, instance_id: &str, status: &ItemStatus) {
        self.total += 1;
        match status {
            ItemStatus::Evaluated(_) => self.evaluated += 1,
            ItemStatus::Skipped(_) => self.skipped += 1,
            ItemStatus::Unsupported => self.unsupported += 1,
            ItemStatus::Failed(e) => self.failed.push((instance_id.to_string(), e.clone())),
        }
    }
}

/// Fans work items out to a bounded pool of workers
pub struct DispatchEngine {
    dispatcher: Arc<EvaluatorDispatcher>,
    work_dir: PathBuf,
    tmp_dir: PathBuf,
    max_workers: usize,
    show_progress: bool,
}

impl DispatchEngine {
    pub fn new(
        dispatcher: Arc<EvaluatorDispatcher>,
        work_dir: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
        max_workers: usize,
    ) -> Self {
        Self {
            dispatcher,
            work_dir: work_dir.into(),
            tmp_dir: tmp_dir.into(),
            max_workers: max_workers.max(1),
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Evaluate every item once. A failing item is logged and the batch
    /// continues.
    pub async fn run(&self, items: Vec<WorkItem>) -> DispatchSummary {
        let total = items.len();
        info!(
            "Dispatching {} items with {} workers",
            total, self.max_workers
        );

        let bar = if self.show_progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut results = stream::iter(items)
            .map(|item| {
                let dispatcher = self.dispatcher.clone();
                let work_dir = self.work_dir.clone();
                let tmp_dir = self.tmp_dir.clone();
                async move {
                    let id = item.instance_id.clone();
                    let handle = tokio::spawn(async move {
                        dispatch_one(&dispatcher, &item, &work_dir, &tmp_dir).await
                    });
                    let status = handle
                        .await
                        .unwrap_or_else(|e| ItemStatus::Failed(format!("worker panicked: {}", e)));
                    (id, status)
                }
            })
            .buffer_unordered(self.max_workers);

        let mut summary = DispatchSummary::default();
        while let Some((id, status)) = results.next().await {
            if let ItemStatus::Failed(e) = &status {
                error!("Task {} generated an exception: {}", id, e);
            }
            summary.record(&id, &status);
            bar.inc(1);
            bar.set_message(id);
        }
        bar.finish_and_clear();

        info!(
            "Dispatch finished: {} evaluated, {} skipped, {} unsupported, {} failed",
            summary.evaluated,
            summary.skipped,
            summary.unsupported,
            summary.failed.len()
        );
        summary
    }
}

async fn dispatch_one(
    dispatcher: &EvaluatorDispatcher,
    item: &WorkItem,
    work_dir: &Path,
    tmp_dir: &Path,
) -> ItemStatus {
    let Some(track) = Track::from_source(&item.source) else {
        warn!(
            "Unknown source '{}' for {}; skipping",
            item.source, item.instance_id
        );
        return ItemStatus::Unsupported;
    };

    let guard = match ClaimGuard::try_claim(track, item, work_dir, tmp_dir) {
        Ok(ClaimOutcome::Claimed(guard)) => guard,
        Ok(ClaimOutcome::Skipped(reason)) => {
            info!("Skipping {}: {:?}", item.instance_id, reason);
            return ItemStatus::Skipped(reason);
        }
        Err(e) => return ItemStatus::Failed(e.to_string()),
    };

    match dispatcher.evaluate(track, item, guard.workspace()).await {
        Ok(outcome) => ItemStatus::Evaluated(outcome),
        Err(e) => ItemStatus::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;

    fn item(id: &str) -> WorkItem {
        WorkItem {
            instance_id: id.to_string(),
            repo_key: "svelte".to_string(),
            pull_number: "42".to_string(),
            source: "selected".to_string(),
            ..Default::default()
        }
    }

    fn claim(root: &Path, id: &str) -> ClaimOutcome {
        ClaimGuard::try_claim(
            Track::Functional,
            &item(id),
            &root.join("work"),
            &root.join("tmp"),
        )
        .unwrap()
    }

    #[test]
    fn test_claim_writes_lock_and_scratch() {
        let root = tempfile::tempdir().unwrap();
        let ClaimOutcome::Claimed(guard) = claim(root.path(), "svelte-42") else {
            panic!("expected a claim");
        };
        let ws = guard.workspace().clone();
        assert_eq!(ws.dir, root.path().join("work/selected/svelte-42"));
        assert!(ws.uid.starts_with("svelte-42-"));
        assert_eq!(ws.uid.len(), "svelte-42-".len() + 8);
        assert!(ws.scratch.is_dir());

        let holder = std::fs::read_to_string(ws.dir.join(LOCK_FILE)).unwrap();
        assert!(holder.starts_with(&hostname()));
        assert!(holder.ends_with('\n'));

        // a second worker sees the lock
        match claim(root.path(), "svelte-42") {
            ClaimOutcome::Skipped(SkipReason::Locked(h)) => assert_eq!(h, holder.trim()),
            other => panic!("unexpected {:?}", other),
        }

        drop(guard);
        assert!(!ws.dir.join(LOCK_FILE).exists());
        assert!(!ws.scratch.exists());
        assert!(ws.dir.exists());
    }

    #[test]
    fn test_existing_dir_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let ClaimOutcome::Claimed(guard) = claim(root.path(), "svelte-42") else {
            panic!("expected a claim");
        };
        drop(guard);

        assert!(matches!(
            claim(root.path(), "svelte-42"),
            ClaimOutcome::Skipped(SkipReason::DirExists)
        ));
    }

    #[test]
    fn test_result_artifact_means_done() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("work/selected/svelte-42");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("result.json"), "{}").unwrap();
        std::fs::write(dir.join(LOCK_FILE), "other 2025-01-01 00:00:00\n").unwrap();

        assert!(matches!(
            claim(root.path(), "svelte-42"),
            ClaimOutcome::Skipped(SkipReason::Done)
        ));
        assert_eq!(
            std::fs::read_to_string(dir.join("result.json")).unwrap(),
            "{}"
        );
    }

    #[test]
    fn test_failed_claim_leaves_no_instance_dir() {
        let root = tempfile::tempdir().unwrap();
        // scratch cannot be created under a regular file
        let blocked = root.path().join("tmp");
        std::fs::write(&blocked, "").unwrap();

        let err = ClaimGuard::try_claim(
            Track::Functional,
            &item("svelte-42"),
            &root.path().join("work"),
            &blocked,
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Io(_)), "got {:?}", err);
        assert!(!root.path().join("work/selected/svelte-42").exists());

        std::fs::remove_file(&blocked).unwrap();
        assert!(matches!(
            claim(root.path(), "svelte-42"),
            ClaimOutcome::Claimed(_)
        ));
    }

    #[test]
    fn test_unreadable_lock_reports_unknown_holder() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("work/selected/svelte-42");
        std::fs::create_dir_all(dir.join(LOCK_FILE)).unwrap();

        match claim(root.path(), "svelte-42") {
            ClaimOutcome::Skipped(SkipReason::Locked(h)) => assert!(h.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = DispatchSummary::default();
        summary.record("a", &ItemStatus::Skipped(SkipReason::Done));
        summary.record("b", &ItemStatus::Unsupported);
        summary.record("c", &ItemStatus::Failed("boom".to_string()));
        assert_eq!(summary.total, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.unsupported, 1);
        assert_eq!(summary.failed, vec![("c".to_string(), "boom".to_string())]);
    }
}
