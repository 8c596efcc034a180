use std::path::PathBuf;

use thiserror::Error;

pub type BpResult<T> = Result<T, BpError>;

#[derive(Debug, Error)]
pub enum BpError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml failure: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("stage `{name}` is already registered")]
    DuplicateStage { name: String },

    #[error("unknown stage `{name}`")]
    UnknownStage { name: String },

    #[error("failed to launch `{command}`: {reason}")]
    ProcessLaunch { command: String, reason: String },

    #[error("command failed: `{command}` (status: {status}){stderr_suffix}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("stage reported success but artifact is missing or empty: `{0}`")]
    IncompleteArtifact(PathBuf),

    #[error("invalid output group `{0}`: must be a plain directory name")]
    InvalidOutputGroup(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("no transform between `{from}` and `{to}`; known frames: [{available}]")]
    TransformMissing {
        from: String,
        to: String,
        available: String,
    },

    #[error("stage `{stage}` failed for session {session}: {source}")]
    Stage {
        session: String,
        stage: String,
        #[source]
        source: Box<BpError>,
    },

    #[error("interrupted by user")]
    Interrupted,
}

impl BpError {
    #[must_use]
    pub fn from_command_failure(command: String, status: i32, stderr: String) -> Self {
        let trimmed = stderr.trim();
        let stderr_suffix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("; stderr: {trimmed}")
        };
        Self::CommandFailed {
            command,
            status,
            stderr_suffix,
        }
    }

    /// Wrap an error with the (session, stage) pair it occurred in.
    ///
    /// The underlying cause is preserved as the `source`, never replaced.
    #[must_use]
    pub fn with_stage_context(self, session: &str, stage: &str) -> Self {
        Self::Stage {
            session: session.to_owned(),
            stage: stage.to_owned(),
            source: Box::new(self),
        }
    }

    /// Stable, unique, machine-readable error code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "BP-IO",
            Self::Yaml(_) => "BP-YAML",
            Self::Json(_) => "BP-JSON",
            Self::Configuration(_) => "BP-CONFIG",
            Self::DuplicateStage { .. } => "BP-STAGE-DUP",
            Self::UnknownStage { .. } => "BP-STAGE-UNKNOWN",
            Self::ProcessLaunch { .. } => "BP-PROC-LAUNCH",
            Self::CommandFailed { .. } => "BP-CMD-FAILED",
            Self::IncompleteArtifact(_) => "BP-ARTIFACT",
            Self::InvalidOutputGroup(_) => "BP-OUTPUT-GROUP",
            Self::Session(_) => "BP-SESSION",
            Self::TransformMissing { .. } => "BP-TF",
            Self::Stage { .. } => "BP-STAGE-FAILED",
            Self::Interrupted => "BP-INTERRUPTED",
        }
    }

    /// The error code of the innermost cause, unwrapping `Stage` context
    /// layers. Used by batch reporting so operators see the root cause.
    #[must_use]
    pub fn root_code(&self) -> &'static str {
        match self {
            Self::Stage { source, .. } => source.root_code(),
            other => other.error_code(),
        }
    }

    /// Returns `true` for errors that indicate a mis-wired registry rather
    /// than a bad session. These abort a batch instead of being isolated.
    #[must_use]
    pub const fn is_wiring_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownStage { .. } | Self::DuplicateStage { .. }
        )
    }

    /// Returns `true` if this error (or any wrapped cause) is an operator
    /// interrupt.
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        match self {
            Self::Interrupted => true,
            Self::Stage { source, .. } => source.is_interrupt(),
            _ => false,
        }
    }
}
