use std::time::Duration;

use async_trait::async_trait;

use arbiter_common::error::JudgeError;
use arbiter_common::types::ResourceLimits;

use crate::renderer::RenderedUnit;

/// Label carried by every sandbox container, used to find leftovers.
pub const SANDBOX_LABEL: &str = "arbiter.sandbox";

/// Everything observed about one sandboxed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExecution {
    pub stdout: String,
    pub stderr: String,
    /// Stdout hit the capture limit and was cut short.
    pub stdout_truncated: bool,
    /// `None` when the process was killed before it exited on its own.
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    pub oom_killed: bool,
    pub elapsed: Duration,
    /// Wall-clock ceiling the run was held to.
    pub wall_time_limit_ms: u64,
}

/// Isolated execution of a rendered unit.
///
/// Implementations must enforce the wall-clock and memory ceilings, deny network
/// access, keep the host filesystem out of reach and leave nothing running once
/// `execute` returns, whatever the outcome.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(
        &self,
        unit: &RenderedUnit,
        limits: &ResourceLimits,
    ) -> Result<RawExecution, JudgeError>;
}

#[async_trait]
impl<S: Sandbox + ?Sized> Sandbox for std::sync::Arc<S> {
    async fn execute(
        &self,
        unit: &RenderedUnit,
        limits: &ResourceLimits,
    ) -> Result<RawExecution, JudgeError> {
        (**self).execute(unit, limits).await
    }
}
