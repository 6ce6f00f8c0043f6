use std::sync::Arc;

use buildmesh_protocol::SubmissionId;

use crate::Submission;

/// The coordinator side a submission talks to.
pub trait SubmissionHost<Req, Res>: Send + Sync {
    /// Hand a started submission to the execution engine. Must not block.
    ///
    /// `allow_main_thread_build` is set when the caller waits with a pumping
    /// wait, so work that must run on the caller's thread can be marshalled
    /// there.
    fn execute_submission(&self, submission: Arc<Submission<Req, Res>>, allow_main_thread_build: bool);

    /// Whether the logging pipeline recorded errors for the submission.
    /// Consulted once, when completion fires.
    fn has_logged_errors(&self, _id: SubmissionId) -> bool {
        false
    }

    /// Called once after the submission's wait handle has been signaled.
    fn submission_completed(&self, _id: SubmissionId) {}
}
