use std::time::Duration;

use thiserror::Error;

pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no {0} command configured")]
    NotConfigured(&'static str),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {code}: {stderr}")]
    Exit {
        program: String,
        code: String,
        stderr: String,
    },

    #[error("invalid command output: {0}")]
    Output(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The collaborator reported failure.
    #[error("{0}")]
    Failed(String),
}
