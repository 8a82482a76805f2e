//! One container bound to one work item
//!
//! Lifecycle: acquire -> stage_assets -> run_stage (repeated) -> finalize.
//! `finalize` is also attempted from `Drop` when the session is abandoned.

use super::{Admission, ContainerRuntime, ContainerSpec};
use crate::error::{EvalError, EvalResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exit code recorded when a stage exceeds its timeout
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// A host file and where it goes inside the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAsset {
    pub host_path: PathBuf,
    pub container_path: String,
}

impl StagedAsset {
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
        }
    }
}

pub struct ContainerSession {
    runtime: Arc<dyn ContainerRuntime>,
    name: String,
    finalized: bool,
}

impl ContainerSession {
    /// Reuse the named container if present, otherwise create it.
    ///
    /// Creation requires the image (loaded from `image_tar` when absent) and
    /// host admission.
    pub async fn acquire(
        runtime: Arc<dyn ContainerRuntime>,
        spec: &ContainerSpec,
        image_tar: Option<&Path>,
        admission: &Admission,
    ) -> EvalResult<Self> {
        match runtime.container_state(&spec.name).await? {
            Some(running) => {
                info!(
                    "Container '{}' already exists. Starting if needed...",
                    spec.name
                );
                if !running {
                    runtime.start(&spec.name).await?;
                }
            }
            None => {
                ensure_image(runtime.as_ref(), &spec.image, image_tar).await?;
                admission.wait().await?;
                info!(
                    "Creating container '{}' from image '{}' ({} CPUs, {} RAM)",
                    spec.name, spec.image, spec.limits.cpu_limit, spec.limits.memory_limit
                );
                runtime.create_and_start(spec).await?;
            }
        }

        Ok(Self {
            runtime,
            name: spec.name.clone(),
            finalized: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy host files into the container, creating parent directories first.
    pub async fn stage_assets(&self, assets: &[StagedAsset]) -> EvalResult<()> {
        for asset in assets {
            let parent = asset
                .container_path
                .rsplit_once('/')
                .map(|(dir, _)| dir)
                .filter(|dir| !dir.is_empty());
            if let Some(dir) = parent {
                let mut discard = Vec::new();
                let code = self
                    .runtime
                    .exec(&self.name, &format!("mkdir -p {}", dir), &mut discard)
                    .await?;
                if code != 0 {
                    return Err(EvalError::Container(format!(
                        "mkdir -p {} failed in {} with exit code {}",
                        dir, self.name, code
                    )));
                }
            }
            self.runtime
                .copy_in(&self.name, &asset.host_path, &asset.container_path)
                .await?;
        }
        Ok(())
    }

    /// Run one stage script, appending its output to `log_path`.
    ///
    /// On timeout the partial output is kept, exit code 124 is returned and
    /// the container is restarted so nothing from the stage keeps running.
    pub async fn run_stage(
        &self,
        script: &str,
        log_path: &Path,
        timeout: Duration,
    ) -> EvalResult<i64> {
        let mut output = format!("\n\n[EXEC in {}] >>> {}\n", self.name, script).into_bytes();
        output.extend_from_slice(format!("{}\n", "=".repeat(80)).as_bytes());

        let outcome = tokio::time::timeout(
            timeout,
            self.runtime.exec(&self.name, script, &mut output),
        )
        .await;

        let result = match outcome {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(e)) => {
                output.extend_from_slice(format!("\n[ERROR] {}\n", e).as_bytes());
                Err(e)
            }
            Err(_) => {
                warn!(
                    "Command timeout after {} seconds in container {}",
                    timeout.as_secs(),
                    self.name
                );
                output.extend_from_slice(
                    format!(
                        "\n[ERROR] Command timed out after {} seconds\n",
                        timeout.as_secs()
                    )
                    .as_bytes(),
                );
                self.restart().await;
                Ok(TIMEOUT_EXIT_CODE)
            }
        };

        append_log(log_path, &output)?;
        result
    }

    /// Copy a container path out into a host directory
    pub async fn collect(&self, container_path: &str, host_dir: &Path) -> EvalResult<()> {
        self.runtime
            .copy_out(&self.name, container_path, host_dir)
            .await
    }

    async fn restart(&self) {
        if let Err(e) = self.runtime.stop(&self.name).await {
            warn!("Failed to stop container {}: {}", self.name, e);
        }
        if let Err(e) = self.runtime.start(&self.name).await {
            warn!("Failed to restart container {}: {}", self.name, e);
        }
    }

    /// Stop and remove the container; failures are logged only.
    pub async fn finalize(mut self) {
        self.finalized = true;
        release(self.runtime.as_ref(), &self.name).await;
    }
}

impl Drop for ContainerSession {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Container {} dropped outside a runtime; not removed", self.name);
            return;
        };
        let runtime = self.runtime.clone();
        let name = std::mem::take(&mut self.name);
        handle.spawn(async move {
            release(runtime.as_ref(), &name).await;
        });
    }
}

async fn release(runtime: &dyn ContainerRuntime, name: &str) {
    info!("Stopping and removing container: {}", name);
    if let Err(e) = runtime.stop(name).await {
        warn!("Failed to stop container {}: {}", name, e);
    }
    if let Err(e) = runtime.remove(name).await {
        warn!("Failed to remove container {}: {}", name, e);
    }
}

async fn ensure_image(
    runtime: &dyn ContainerRuntime,
    image: &str,
    image_tar: Option<&Path>,
) -> EvalResult<()> {
    if runtime.image_exists(image).await? {
        return Ok(());
    }
    let Some(tar_path) = image_tar else {
        return Err(EvalError::ImageMissing(image.to_string()));
    };
    if !tar_path.exists() {
        return Err(EvalError::ImageMissing(format!(
            "{} (no archive at {})",
            image,
            tar_path.display()
        )));
    }

    let tags = runtime.load_image(tar_path).await?;
    debug!("Loaded tags {:?} from {}", tags, tar_path.display());
    if !runtime.image_exists(image).await? {
        return Err(EvalError::ImageMissing(format!(
            "{} not among loaded tags {:?}",
            image, tags
        )));
    }
    Ok(())
}

fn append_log(path: &Path, bytes: &[u8]) -> EvalResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(bytes)?;
    Ok(())
}
