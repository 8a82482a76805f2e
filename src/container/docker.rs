//! Docker runtime backed by bollard

use super::{ContainerRuntime, ContainerSpec};
use crate::error::{EvalError, EvalResult};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
    LogOutput, RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::ImportImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Container runtime talking to the local Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    /// Containers created by this process and not yet removed
    live: Arc<Mutex<HashSet<String>>>,
}

impl DockerRuntime {
    /// Connect to the local daemon and verify it answers
    pub async fn connect() -> EvalResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EvalError::Container(format!("Failed to connect to Docker: {}", e)))?;

        docker
            .ping()
            .await
            .map_err(|e| EvalError::Container(format!("Failed to ping Docker: {}", e)))?;

        info!("Connected to Docker daemon");
        Ok(Self {
            docker,
            live: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Stop and remove every container this runtime created that is still
    /// around. Used when a run is interrupted.
    pub async fn release_all(&self) {
        let names: Vec<String> = self.live.lock().drain().collect();
        for name in names {
            warn!("Removing container {} of an interrupted item", name);
            if let Err(e) = self.stop(&name).await {
                debug!("Failed to stop container {}: {}", name, e);
            }
            if let Err(e) = self.remove(&name).await {
                warn!("Failed to remove container {}: {}", name, e);
            }
        }
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Single-file tar archive for `upload_to_container`
fn single_file_archive(entry_name: &str, contents: &[u8]) -> EvalResult<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut buf);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, entry_name, Cursor::new(contents))?;
        builder.finish()?;
    }
    Ok(buf)
}

fn split_container_path(container_path: &str) -> EvalResult<(&str, &str)> {
    let (dir, file) = container_path
        .rsplit_once('/')
        .ok_or_else(|| EvalError::InvalidInput(format!("not absolute: {}", container_path)))?;
    if file.is_empty() {
        return Err(EvalError::InvalidInput(format!(
            "not a file path: {}",
            container_path
        )));
    }
    Ok((if dir.is_empty() { "/" } else { dir }, file))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> EvalResult<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!("Image {} already exists", image);
                Ok(true)
            }
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_image(&self, tar_path: &Path) -> EvalResult<Vec<String>> {
        if !tar_path.exists() {
            return Err(EvalError::ImageMissing(format!(
                "Docker tar not found: {}",
                tar_path.display()
            )));
        }
        let archive = tokio::fs::read(tar_path).await?;
        info!("Loading image archive {}", tar_path.display());

        let mut tags = Vec::new();
        let mut stream =
            self.docker
                .import_image(ImportImageOptions::default(), archive.into(), None);
        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(line) = info.stream {
                debug!("docker load: {}", line.trim_end());
                if let Some(tag) = line.trim().strip_prefix("Loaded image:") {
                    tags.push(tag.trim().to_string());
                }
            }
            if let Some(error) = info.error {
                return Err(EvalError::Container(format!("Failed to load image: {}", error)));
            }
        }
        Ok(tags)
    }

    async fn container_state(&self, name: &str) -> EvalResult<Option<bool>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(Some(
                info.state.and_then(|s| s.running).unwrap_or(false),
            )),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> EvalResult<()> {
        let limits = &spec.limits;
        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["bash".to_string()]),
            tty: Some(true),
            open_stdin: Some(true),
            attach_stdin: Some(false),
            working_dir: Some(limits.workdir.clone()),
            host_config: Some(HostConfig {
                memory: Some(limits.memory_bytes()?),
                nano_cpus: Some(limits.nano_cpus()),
                network_mode: Some(limits.network_mode.clone()),
                privileged: Some(limits.privileged),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| EvalError::Container(format!("Failed to create container: {}", e)))?;
        info!("Created container {} ({})", spec.name, response.id);
        self.live.lock().insert(spec.name.clone());

        self.start(&spec.name).await
    }

    async fn start(&self, name: &str) -> EvalResult<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EvalError::Container(format!("Failed to start container: {}", e)))?;
        debug!("Started container: {}", name);
        Ok(())
    }

    async fn copy_in(&self, name: &str, host_path: &Path, container_path: &str) -> EvalResult<()> {
        let (dir, file) = split_container_path(container_path)?;
        let contents = tokio::fs::read(host_path).await?;
        let archive = single_file_archive(file, &contents)?;

        self.docker
            .upload_to_container(
                name,
                Some(UploadToContainerOptions {
                    path: dir.to_string(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .map_err(|e| {
                EvalError::Container(format!("Failed to copy into {}:{}: {}", name, container_path, e))
            })?;
        debug!("Copied {} -> {}:{}", host_path.display(), name, container_path);
        Ok(())
    }

    async fn copy_out(
        &self,
        name: &str,
        container_path: &str,
        host_dir: &Path,
    ) -> EvalResult<()> {
        let mut stream = self.docker.download_from_container(
            name,
            Some(DownloadFromContainerOptions {
                path: container_path.to_string(),
            }),
        );

        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                EvalError::Container(format!(
                    "Failed to copy out {}:{}: {}",
                    name, container_path, e
                ))
            })?;
            archive.extend_from_slice(&chunk);
        }

        std::fs::create_dir_all(host_dir)?;
        tar::Archive::new(Cursor::new(archive)).unpack(host_dir)?;
        debug!("Copied {}:{} -> {}", name, container_path, host_dir.display());
        Ok(())
    }

    async fn exec(&self, name: &str, script: &str, sink: &mut Vec<u8>) -> EvalResult<i64> {
        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(vec![
                        "bash".to_string(),
                        "-lc".to_string(),
                        script.to_string(),
                    ]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EvalError::Container(format!("Failed to create exec: {}", e)))?;

        match self.docker.start_exec(&exec.id, None).await {
            Ok(StartExecResults::Attached { mut output, .. }) => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message })
                        | Ok(LogOutput::StdErr { message })
                        | Ok(LogOutput::Console { message }) => sink.extend_from_slice(&message),
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Error reading exec output in {}: {}", name, e);
                            break;
                        }
                    }
                }
            }
            Ok(StartExecResults::Detached) => {}
            Err(e) => {
                return Err(EvalError::Container(format!("Failed to start exec: {}", e)));
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| EvalError::Container(format!("Failed to inspect exec: {}", e)))?;

        Ok(inspect.exit_code.unwrap_or(-1))
    }

    async fn stop(&self, name: &str) -> EvalResult<()> {
        self.docker.stop_container(name, None).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> EvalResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(name, Some(options)).await?;
        self.live.lock().remove(name);
        debug!("Removed container: {}", name);
        Ok(())
    }
}
