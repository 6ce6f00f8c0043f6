//! Seam to the execution engine.
//!
//! The engine evaluates build work; the coordinator only needs to hand it a
//! request and learn, through a [`BuildReporter`], which events the build
//! logged and how it ended.

use std::sync::Weak;

use buildmesh_protocol::{
    BuildFailure, BuildRequestData, BuildResult, FailureKind, LogMessage, Severity, SubmissionId,
};

use crate::BuildCoordinator;

pub trait ExecutionEngine: Send + Sync {
    /// Begin executing `request`. Must return without waiting for the build.
    /// The engine owns `reporter` until it calls [`BuildReporter::finish`].
    fn start(&self, request: BuildRequestData, reporter: BuildReporter);
}

/// Per-submission channel from the engine back to the coordinator.
///
/// Dropping a reporter without finishing it completes the submission with
/// an `EngineAborted` failure.
#[derive(Debug)]
pub struct BuildReporter {
    submission_id: SubmissionId,
    coordinator: Weak<BuildCoordinator>,
    finished: bool,
}

impl BuildReporter {
    pub(crate) fn new(submission_id: SubmissionId, coordinator: Weak<BuildCoordinator>) -> Self {
        Self {
            submission_id,
            coordinator,
            finished: false,
        }
    }

    pub fn submission_id(&self) -> SubmissionId {
        self.submission_id
    }

    pub fn log(&self, severity: Severity, text: impl Into<String>) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.log_event(LogMessage {
                submission_id: self.submission_id,
                severity,
                text: text.into(),
            });
        }
    }

    /// Report how the build ended. `Err` is an abnormal termination and
    /// becomes a failed result.
    pub fn finish(mut self, outcome: Result<BuildResult, BuildFailure>) {
        self.finished = true;
        self.deliver(outcome);
    }

    fn deliver(&self, outcome: Result<BuildResult, BuildFailure>) {
        match self.coordinator.upgrade() {
            Some(coordinator) => coordinator.report_result(self.submission_id, outcome),
            None => tracing::debug!(
                submission_id = %self.submission_id,
                "Coordinator gone; dropping build outcome"
            ),
        }
    }
}

impl Drop for BuildReporter {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(submission_id = %self.submission_id, "Engine dropped build without finishing it");
            self.deliver(Err(BuildFailure::new(
                FailureKind::EngineAborted,
                "execution engine dropped the build without reporting a result",
            )));
        }
    }
}
