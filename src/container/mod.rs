//! Container runtime abstraction
//!
//! Evaluation stages run inside one long-lived container per work item.
//! The [`ContainerRuntime`] trait is the seam between the stage runner and
//! the Docker daemon so pipelines can be driven by an in-memory fake in tests.

pub mod admission;
pub mod docker;
pub mod session;

use crate::config::ContainerLimits;
use crate::error::EvalResult;
use async_trait::async_trait;
use std::path::Path;

pub use admission::{wait_for_admission, Admission, HostLoad, HostLoadProbe, ProcLoadProbe};
pub use docker::DockerRuntime;
pub use session::{ContainerSession, StagedAsset, TIMEOUT_EXIT_CODE};

/// Everything needed to create an evaluation container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub limits: ContainerLimits,
}

/// Operations the engine needs from a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> EvalResult<bool>;

    /// Load an image archive, returning the tags it contained
    async fn load_image(&self, tar_path: &Path) -> EvalResult<Vec<String>>;

    /// `None` when no container has this name, otherwise whether it is running
    async fn container_state(&self, name: &str) -> EvalResult<Option<bool>>;

    async fn create_and_start(&self, spec: &ContainerSpec) -> EvalResult<()>;

    async fn start(&self, name: &str) -> EvalResult<()>;

    /// Copy one host file to an absolute path inside the container
    async fn copy_in(&self, name: &str, host_path: &Path, container_path: &str) -> EvalResult<()>;

    /// Copy a container path (file or directory) into `host_dir`
    async fn copy_out(&self, name: &str, container_path: &str, host_dir: &Path)
        -> EvalResult<()>;

    /// Run `bash -lc <script>`, appending combined output to `sink`.
    ///
    /// Output is written to `sink` as it arrives so a caller that abandons
    /// the future on timeout still holds the partial log.
    async fn exec(&self, name: &str, script: &str, sink: &mut Vec<u8>) -> EvalResult<i64>;

    async fn stop(&self, name: &str) -> EvalResult<()>;

    async fn remove(&self, name: &str) -> EvalResult<()>;
}
