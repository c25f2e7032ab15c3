use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Failures callers may want to tell apart.
///
/// These travel inside `anyhow::Error`; use `downcast_ref::<DeployError>()`
/// to recover them.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("source not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}")]
    CommandFailed { program: String, status: ExitStatus },
}
