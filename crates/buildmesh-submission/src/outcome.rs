use std::fmt;

use buildmesh_protocol::{BuildFailure, BuildRequestData, BuildResult, SubmissionId};

/// Request payload of a submission.
pub trait RequestData: fmt::Debug + Send + Sync + 'static {
    /// Reject payloads that do not describe any work.
    fn validate(&self) -> Result<(), String>;
}

/// Result payload of a submission.
pub trait BuildOutcome: fmt::Debug + Clone + Send + Sync + 'static {
    fn submission_id(&self) -> SubmissionId;

    /// Synthetic failed result carrying `failure` as its cause.
    fn from_failure(submission_id: SubmissionId, failure: BuildFailure) -> Self;

    fn succeeded(&self) -> bool;

    fn set_overall_result(&mut self, success: bool);
}

impl RequestData for BuildRequestData {
    fn validate(&self) -> Result<(), String> {
        if self.project_path.trim().is_empty() {
            return Err("request data has no project path".into());
        }
        Ok(())
    }
}

impl BuildOutcome for BuildResult {
    fn submission_id(&self) -> SubmissionId {
        self.submission_id
    }

    fn from_failure(submission_id: SubmissionId, failure: BuildFailure) -> Self {
        BuildResult::failed(submission_id, failure)
    }

    fn succeeded(&self) -> bool {
        BuildResult::succeeded(self)
    }

    fn set_overall_result(&mut self, success: bool) {
        BuildResult::set_overall_result(self, success)
    }
}
