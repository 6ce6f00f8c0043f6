use buildmesh_protocol::SubmissionId;

pub type Result<T> = std::result::Result<T, SubmissionError>;

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// The submission was started twice, or started after completing.
    #[error("submission {id}: {reason}")]
    InvalidState { id: SubmissionId, reason: &'static str },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A result was delivered to the wrong submission.
    #[error("result for submission {actual} delivered to submission {expected}")]
    Consistency {
        expected: SubmissionId,
        actual: SubmissionId,
    },

    /// A second result arrived while duplicates are rejected.
    #[error("submission {id} already has a result")]
    DuplicateResult { id: SubmissionId },

    #[error("wait failed: {0}")]
    Wait(String),
}

impl SubmissionError {
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}
