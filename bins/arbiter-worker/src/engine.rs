/// Docker execution engine
///
/// Runs one rendered unit per container. The engine knows how to isolate and
/// bound a run; it knows nothing about tests, verdicts or report formats.
///
/// Isolation per run:
/// - fresh container, fresh host temp dir mounted read-only at `/code`
/// - `/sandbox` (working dir) and `/tmp` as small tmpfs mounts
/// - no network, read-only root filesystem, all capabilities dropped,
///   `no-new-privileges`, unprivileged uid
/// - memory (swap equal to memory), CPU quota and pid limit from config
/// - hard wall-clock timeout, SIGKILL on expiry, container always removed

use crate::config::{ExecutionPlan, LanguageConfigManager, CODE_MOUNT};
use anyhow::{Context, Result};
use arbiter_common::error::JudgeError;
use arbiter_common::types::ResourceLimits;
use arbiter_harness::{RawExecution, RenderedUnit, Sandbox, SANDBOX_LABEL};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

/// nobody:nogroup
const SANDBOX_USER: &str = "65534:65534";

/// Per-stream cap on captured output.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution panics or is cancelled
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
    armed: bool,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self {
            docker,
            container_id,
            armed: true,
        }
    }

    /// Remove the container now and disarm the guard.
    async fn remove(mut self) {
        self.armed = false;
        if let Err(e) = self
            .docker
            .remove_container(&self.container_id, Some(force_remove()))
            .await
        {
            warn!(container_id = %self.container_id, error = %e, "Failed to remove container");
        }
    }
}

impl<'a> Drop for ContainerGuard<'a> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Drop cannot await; hand removal to the runtime
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            if let Err(e) = docker.remove_container(&container_id, Some(force_remove())).await {
                warn!(container_id = %container_id, error = %e, "Failed to cleanup container");
            }
        });
    }
}

fn force_remove() -> RemoveContainerOptions {
    RemoveContainerOptions {
        force: true,
        v: true,
        ..Default::default()
    }
}

/// Captured stream, bounded. Stdout keeps its tail (the report is the last
/// line); stderr keeps its head (the first error is the interesting one).
struct BoundedOutput {
    buffer: Vec<u8>,
    limit: usize,
    keep_tail: bool,
    truncated: bool,
}

impl BoundedOutput {
    fn new(limit: usize, keep_tail: bool) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            keep_tail,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.keep_tail {
            self.buffer.extend_from_slice(chunk);
            if self.buffer.len() > self.limit {
                let excess = self.buffer.len() - self.limit;
                self.buffer.drain(..excess);
                self.truncated = true;
            }
        } else {
            let room = self.limit.saturating_sub(self.buffer.len());
            if chunk.len() > room {
                self.truncated = true;
            }
            self.buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

/// Docker-backed [`Sandbox`].
pub struct DockerEngine {
    docker: Docker,
    configs: LanguageConfigManager,
    /// Parent of per-run temp dirs; must be visible to the Docker daemon at the
    /// same path.
    staging_root: Option<PathBuf>,
    output_limit_bytes: usize,
}

impl DockerEngine {
    /// Create a new Docker engine with language config manager
    pub fn new_with_config(configs: &LanguageConfigManager) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;

        Ok(DockerEngine {
            docker,
            configs: configs.clone(),
            staging_root: std::env::var("ARBITER_STAGING_DIR").ok().map(PathBuf::from),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        })
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.context("Docker daemon did not answer ping")?;
        Ok(())
    }

    /// Ensure Docker image is available (pull if needed)
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.with_context(|| format!("Failed to pull Docker image '{}'", image))?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    /// Remove sandbox containers left behind by a crashed worker. Only containers
    /// older than `older_than` are touched, so runs owned by live workers survive.
    pub async fn cleanup_stale(&self, older_than: Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now().timestamp() - older_than.as_secs() as i64;
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![SANDBOX_LABEL.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .context("Failed to list sandbox containers")?;

        let mut removed = 0;
        for container in containers {
            if container.created.map_or(false, |created| created > cutoff) {
                continue;
            }
            let Some(id) = container.id else { continue };
            match self.docker.remove_container(&id, Some(force_remove())).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(container_id = %id, error = %e, "Failed to remove stale container"),
            }
        }
        Ok(removed)
    }

    /// Write the unit into a fresh temp dir readable by the sandbox user.
    fn stage(&self, unit: &RenderedUnit) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("arbiter-");
        let dir = match &self.staging_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .context("Failed to create staging directory")?;

        let path = dir.path().join(unit.file_name);
        std::fs::write(&path, &unit.source)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755))?;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))?;
        }

        Ok(dir)
    }

    fn container_config(&self, plan: &ExecutionPlan, staged: &TempDir) -> Config<String> {
        let mut tmpfs = HashMap::new();
        tmpfs.insert("/sandbox".to_string(), "rw,nosuid,nodev,size=16m,mode=1777".to_string());
        tmpfs.insert("/tmp".to_string(), "rw,nosuid,nodev,size=64m,mode=1777".to_string());

        let mut labels = HashMap::new();
        labels.insert(SANDBOX_LABEL.to_string(), "true".to_string());

        Config {
            image: Some(plan.image.clone()),
            cmd: Some(plan.command.clone()),
            env: Some(vec![
                "HOME=/tmp".to_string(),
                "PYTHONDONTWRITEBYTECODE=1".to_string(),
            ]),
            user: Some(SANDBOX_USER.to_string()),
            working_dir: Some("/sandbox".to_string()),
            labels: Some(labels),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{}:ro", staged.path().display(), CODE_MOUNT)]),
                tmpfs: Some(tmpfs),
                network_mode: Some("none".to_string()),
                readonly_rootfs: Some(true),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                memory: Some(plan.memory_bytes),
                memory_swap: Some(plan.memory_bytes),
                nano_cpus: Some(plan.nano_cpus),
                pids_limit: Some(plan.pids_limit),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Run one unit to completion or timeout.
    #[instrument(skip(self, unit, limits), fields(language = %unit.language, tests = unit.test_count()))]
    pub async fn run(&self, unit: &RenderedUnit, limits: &ResourceLimits) -> Result<RawExecution> {
        let config = self.configs.get_config(&unit.language)?;
        let plan = config.plan(unit, limits);

        self.ensure_image(&plan.image).await?;

        // Dropped after the container is gone
        let staged = self.stage(unit)?;

        let container_name = format!("arbiter-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), self.container_config(&plan, &staged))
            .await
            .context("Failed to create Docker container")?;

        // Set up immediately so every exit path removes the container
        let guard = ContainerGuard::new(&self.docker, container.id.clone());
        let container_id = container.id;

        let start_time = Instant::now();

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        let wait = async {
            let wait_options = WaitContainerOptions {
                condition: "not-running",
            };
            let mut wait_stream = self.docker.wait_container(&container_id, Some(wait_options));
            match wait_stream.next().await {
                Some(Ok(response)) => Ok(Some(response.status_code)),
                // bollard reports a non-zero exit as an error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    Ok(Some(code))
                }
                Some(Err(e)) => Err(anyhow::Error::new(e).context("Failed waiting for container")),
                None => Ok(None),
            }
        };

        let timeout = Duration::from_millis(plan.wall_time_limit_ms);
        let (exit_code, timed_out) = match tokio::time::timeout(timeout, wait).await {
            Ok(code) => (code?, false),
            Err(_) => {
                warn!(
                    container_id = %container_id,
                    wall_time_limit_ms = plan.wall_time_limit_ms,
                    "Execution timed out, killing container"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, Some(KillContainerOptions { signal: "SIGKILL" }))
                    .await
                {
                    warn!(container_id = %container_id, error = %e, "Failed to kill timed-out container");
                }
                (None, true)
            }
        };
        let elapsed = start_time.elapsed();

        let oom_killed = if timed_out {
            false
        } else {
            self.docker
                .inspect_container(&container_id, None)
                .await
                .ok()
                .and_then(|inspect| inspect.state)
                .and_then(|state| state.oom_killed)
                .unwrap_or(false)
        };

        let (stdout, stderr, stdout_truncated) = self.collect_logs(&container_id).await;

        guard.remove().await;
        drop(staged);

        debug!(
            exit_code = ?exit_code,
            timed_out,
            oom_killed,
            elapsed_ms = elapsed.as_millis() as u64,
            stdout_bytes = stdout.len(),
            stdout_truncated,
            "Container finished"
        );

        Ok(RawExecution {
            stdout,
            stderr,
            stdout_truncated,
            exit_code,
            timed_out,
            oom_killed,
            elapsed,
            wall_time_limit_ms: plan.wall_time_limit_ms,
        })
    }

    /// Read both streams of a stopped container. The flag reports a cut stdout.
    async fn collect_logs(&self, container_id: &str) -> (String, String, bool) {
        let mut stdout = BoundedOutput::new(self.output_limit_bytes, true);
        let mut stderr = BoundedOutput::new(self.output_limit_bytes, false);

        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        });

        let mut logs_stream = self.docker.logs(container_id, logs_options);
        while let Some(output) = logs_stream.next().await {
            match output {
                Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                Ok(_) => {}
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Error reading container logs");
                    break;
                }
            }
        }

        let stdout_truncated = stdout.truncated;
        let stderr_truncated = stderr.truncated;
        let stdout = stdout.into_string();
        let mut stderr = stderr.into_string();
        if stdout_truncated {
            stderr.push_str("\n[stdout truncated]");
        }
        if stderr_truncated {
            stderr.push_str("\n[stderr truncated]");
        }
        (stdout, stderr, stdout_truncated)
    }
}

#[async_trait]
impl Sandbox for DockerEngine {
    async fn execute(
        &self,
        unit: &RenderedUnit,
        limits: &ResourceLimits,
    ) -> std::result::Result<RawExecution, JudgeError> {
        self.run(unit, limits)
            .await
            .map_err(|e| JudgeError::Sandbox(format!("{:#}", e)))
    }
}
