//! The errors surfaced at the boundary of an [`Instance`](crate::instance::Instance).

use thiserror::Error;

use crate::instance::InstanceStatus;

/// Errors returned by the lifecycle operations of an instance.
///
/// Failures at the process boundary are recovered into these variants so that callers never see
/// raw OS errors. Nothing is retried by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstanceError {
    /// The process could not be started or did not become ready.
    #[error("Failed to start process \"{name}\": {cause}")]
    StartupFailure {
        name: String,
        cause: StartupFailureCause,
    },

    /// `start` was called while a run was still in progress.
    #[error("Process \"{name}\" is already running (status: {status})")]
    AlreadyRunning { name: String, status: InstanceStatus },

    /// The running process could not be terminated.
    #[error("Failed to stop process \"{name}\": {reason}")]
    StopFailure { name: String, reason: String },
}

impl InstanceError {
    /// Returns a short stable label for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::StartupFailure { .. } => "startup_failure",
            Self::AlreadyRunning { .. } => "already_running",
            Self::StopFailure { .. } => "stop_failure",
        }
    }
}

/// Why a run failed before it became ready.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartupFailureCause {
    /// The process wrote this line to stderr before it became ready.
    #[error("{0}")]
    Stderr(String),

    /// The process exited before it became ready.
    #[error("{}", describe_exit(.code))]
    Exited { code: Option<i32> },

    /// The command could not be built from the instance parameters.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The process adapter failed to spawn the command.
    #[error("{0}")]
    Spawn(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "exited".to_string(),
    }
}
