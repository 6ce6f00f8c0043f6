use buildmesh_protocol::{ProtocolError, SubmissionId};
use buildmesh_submission::SubmissionError;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("config error in {path}: {message}")]
    Config { path: String, message: String },

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("unknown submission {0}")]
    UnknownSubmission(SubmissionId),

    #[error("coordinator is shutting down")]
    ShuttingDown,

    #[error("node unavailable: {0}")]
    NodeUnavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoordinatorError {
    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }
}
