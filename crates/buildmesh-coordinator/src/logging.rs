//! Ordered logging pipeline.
//!
//! Build events and drain markers share one queue. A drain marker for a
//! submission is only processed after every event queued before it, so
//! `on_drained` firing means the submission's events have all been emitted.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use buildmesh_protocol::{LogMessage, Severity, SubmissionId};

#[derive(Debug)]
enum LogEvent {
    Message(LogMessage),
    Drain(SubmissionId),
    Forget(SubmissionId),
}

#[derive(Debug, Clone)]
pub struct LoggingPipeline {
    tx: mpsc::UnboundedSender<LogEvent>,
    errors: Arc<Mutex<HashSet<SubmissionId>>>,
}

impl LoggingPipeline {
    /// Start the pipeline's worker on `handle`. `on_drained` runs on that
    /// worker once per drain marker.
    pub fn spawn<F>(handle: &tokio::runtime::Handle, warnings_as_errors: bool, on_drained: F) -> Self
    where
        F: Fn(SubmissionId) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let errors = Arc::new(Mutex::new(HashSet::new()));
        let worker_errors = errors.clone();

        handle.spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    LogEvent::Message(message) => {
                        let LogMessage {
                            submission_id,
                            severity,
                            text,
                        } = message;
                        match severity {
                            Severity::Message => {
                                tracing::info!(target: "build", %submission_id, "{text}")
                            }
                            Severity::Warning => {
                                tracing::warn!(target: "build", %submission_id, "{text}")
                            }
                            Severity::Error => {
                                tracing::error!(target: "build", %submission_id, "{text}")
                            }
                        }
                        let counts_as_error = severity == Severity::Error
                            || (warnings_as_errors && severity == Severity::Warning);
                        if counts_as_error {
                            lock(&worker_errors).insert(submission_id);
                        }
                    }
                    LogEvent::Drain(submission_id) => on_drained(submission_id),
                    LogEvent::Forget(submission_id) => {
                        lock(&worker_errors).remove(&submission_id);
                    }
                }
            }
            tracing::debug!("Logging pipeline stopped");
        });

        Self { tx, errors }
    }

    pub fn log(&self, message: LogMessage) {
        if self.tx.send(LogEvent::Message(message)).is_err() {
            tracing::warn!("Logging pipeline stopped; dropping build event");
        }
    }

    /// Queue a drain marker for `submission_id` behind every event logged so far.
    pub fn drain(&self, submission_id: SubmissionId) {
        if self.tx.send(LogEvent::Drain(submission_id)).is_err() {
            tracing::warn!(%submission_id, "Logging pipeline stopped; drain marker lost");
        }
    }

    pub fn has_logged_errors(&self, submission_id: SubmissionId) -> bool {
        lock(&self.errors).contains(&submission_id)
    }

    /// Drop what the pipeline remembers about a finished submission, once
    /// every event queued before this call has been processed.
    pub fn forget(&self, submission_id: SubmissionId) {
        if self.tx.send(LogEvent::Forget(submission_id)).is_err() {
            lock(&self.errors).remove(&submission_id);
        }
    }
}

fn lock(errors: &Mutex<HashSet<SubmissionId>>) -> MutexGuard<'_, HashSet<SubmissionId>> {
    errors.lock().unwrap_or_else(PoisonError::into_inner)
}
