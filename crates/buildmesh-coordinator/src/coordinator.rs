//! The build coordinator.
//!
//! Owns the active submissions, allocates their ids, starts them on the
//! execution engine and closes the loop between engine results and the
//! logging pipeline's drain signal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use buildmesh_protocol::{
    BuildFailure, BuildRequestData, BuildResult, FailureKind, LogMessage, SubmissionId,
};
use buildmesh_submission::{
    BlockingWait, BuildSubmission, CallInDispatcher, PumpingWait, Submission, SubmissionError,
    SubmissionHost, SubmissionServices, TokioCallbackQueue, WaitStrategy,
};

use crate::engine::{BuildReporter, ExecutionEngine};
use crate::logging::LoggingPipeline;
use crate::{CoordinatorConfig, CoordinatorError, Result};

/// First id handed out; ids only grow.
const FIRST_SUBMISSION_ID: i32 = 1;

pub struct BuildCoordinator {
    config: CoordinatorConfig,
    next_id: AtomicI32,
    accepting: AtomicBool,
    active: Mutex<HashMap<SubmissionId, Arc<BuildSubmission>>>,
    engine: Arc<dyn ExecutionEngine>,
    logging: LoggingPipeline,
    services: SubmissionServices<BuildRequestData, BuildResult>,
    pump: Option<Arc<PumpingWait>>,
    call_ins: Mutex<HashMap<SubmissionId, CallInDispatcher>>,
}

impl BuildCoordinator {
    /// Build a coordinator whose logging pipeline and callbacks run on
    /// `handle`.
    pub fn new(
        config: CoordinatorConfig,
        engine: Arc<dyn ExecutionEngine>,
        handle: tokio::runtime::Handle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let drained = me.clone();
            let logging = LoggingPipeline::spawn(
                &handle,
                config.logging.warnings_as_errors,
                move |id| {
                    if let Some(coordinator) = drained.upgrade() {
                        coordinator.logging_drained(id);
                    }
                },
            );

            let pump = config
                .submission
                .legacy_threading
                .then(|| Arc::new(PumpingWait::new()));
            let wait_strategy: Arc<dyn WaitStrategy> = match &pump {
                Some(pump) => pump.clone(),
                None => Arc::new(BlockingWait),
            };

            let services = SubmissionServices {
                host: Arc::new(CoordinatorHost {
                    coordinator: me.clone(),
                }),
                callbacks: Arc::new(TokioCallbackQueue::new(handle.clone())),
                wait_strategy,
                duplicate_policy: config.submission.duplicate_result_policy,
                legacy_threading: config.submission.legacy_threading,
            };

            tracing::info!(
                legacy_threading = config.submission.legacy_threading,
                warnings_as_errors = config.logging.warnings_as_errors,
                "Build coordinator created"
            );

            Self {
                config,
                next_id: AtomicI32::new(FIRST_SUBMISSION_ID),
                accepting: AtomicBool::new(true),
                active: Mutex::new(HashMap::new()),
                engine,
                logging,
                services,
                pump,
                call_ins: Mutex::new(HashMap::new()),
            }
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Accept a build request and return its pending submission. Nothing
    /// runs until the caller executes it.
    pub fn pend_build_request(&self, request: BuildRequestData) -> Result<Arc<BuildSubmission>> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(CoordinatorError::ShuttingDown);
        }
        let id = SubmissionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let submission = Submission::create(id, request, self.services.clone())?;
        self.lock_active().insert(id, submission.clone());
        tracing::debug!(
            submission_id = %id,
            project = %submission.request_data().project_path,
            "Build request pended"
        );
        Ok(submission)
    }

    /// Pend `request` and block the calling thread until it completes.
    ///
    /// Must not be called from inside an async task; use
    /// [`BuildCoordinator::build_async`] there.
    pub fn build(&self, request: BuildRequestData) -> Result<BuildResult> {
        let submission = self.pend_build_request(request)?;
        Ok(submission.execute()?)
    }

    /// Pend `request`, start it and await its completion.
    pub async fn build_async(&self, request: BuildRequestData) -> Result<BuildResult> {
        let submission = self.pend_build_request(request)?;
        submission.execute_async(None, None)?;
        submission.completion().await.ok_or_else(|| {
            CoordinatorError::Submission(SubmissionError::Wait(format!(
                "submission {} completed without a result",
                submission.id()
            )))
        })
    }

    pub fn submission(&self, id: SubmissionId) -> Option<Arc<BuildSubmission>> {
        self.lock_active().get(&id).cloned()
    }

    /// Ids of submissions that have not completed yet, ascending.
    pub fn active_submissions(&self) -> Vec<SubmissionId> {
        let mut ids: Vec<_> = self.lock_active().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Marshals work onto the thread blocked in the legacy-threading build
    /// of `id`. `None` unless `legacy_threading` is configured and the
    /// submission was started by a synchronous `build` still waiting on it.
    pub fn call_in_dispatcher(&self, id: SubmissionId) -> Option<CallInDispatcher> {
        self.call_ins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn has_logged_errors(&self, id: SubmissionId) -> bool {
        self.logging.has_logged_errors(id)
    }

    /// Route an engine event into the logging pipeline. Events for
    /// submissions that already completed are dropped.
    pub fn log_event(&self, message: LogMessage) {
        // Queued under the registry lock so the pipeline sees it before the
        // `forget` issued when the submission finishes.
        let active = self.lock_active();
        if !active.contains_key(&message.submission_id) {
            tracing::trace!(submission_id = %message.submission_id, "Dropping event for finished submission");
            return;
        }
        self.logging.log(message);
    }

    /// The engine finished `id`. Delivers the result and queues the drain
    /// marker that closes the submission's logging.
    pub fn report_result(&self, id: SubmissionId, outcome: std::result::Result<BuildResult, BuildFailure>) {
        let Some(submission) = self.submission(id) else {
            tracing::debug!(submission_id = %id, "Result for unknown or finished submission");
            return;
        };
        let delivered = match outcome {
            Ok(result) => submission.complete_result(result),
            Err(failure) => submission.complete_with_failure(failure).map(drop),
        };
        match delivered {
            Ok(()) => {}
            Err(e @ SubmissionError::DuplicateResult { .. }) => {
                tracing::debug!(submission_id = %id, error = %e, "Duplicate build result");
            }
            Err(e) => {
                tracing::warn!(submission_id = %id, error = %e, "Engine reported an unusable result");
                let failure = BuildFailure::new(FailureKind::Internal, e.to_string());
                if let Err(e) = submission.complete_with_failure(failure) {
                    tracing::debug!(submission_id = %id, error = %e, "Submission already had a result");
                }
            }
        }
        self.logging.drain(id);
    }

    /// Fail `id` with a cancellation. Any result the engine reports later
    /// is a duplicate.
    pub fn cancel(&self, id: SubmissionId, reason: &str) -> Result<()> {
        let submission = self
            .submission(id)
            .ok_or(CoordinatorError::UnknownSubmission(id))?;
        tracing::info!(submission_id = %id, reason, "Cancelling submission");
        submission.complete_with_failure(BuildFailure::new(FailureKind::Cancelled, reason))?;
        self.logging.drain(id);
        Ok(())
    }

    /// Stop accepting requests and cancel everything still active.
    pub fn shutdown(&self, reason: &str) {
        self.accepting.store(false, Ordering::SeqCst);
        let active: Vec<_> = self.lock_active().values().cloned().collect();
        tracing::info!(active = active.len(), reason, "Shutting down build coordinator");
        for submission in active {
            let failure = BuildFailure::new(FailureKind::Cancelled, reason);
            if let Err(e) = submission.complete_with_failure(failure) {
                tracing::debug!(submission_id = %submission.id(), error = %e, "Submission already had a result");
            }
            self.logging.drain(submission.id());
        }
    }

    fn logging_drained(&self, id: SubmissionId) {
        match self.submission(id) {
            Some(submission) => submission.on_logging_complete(),
            None => tracing::trace!(submission_id = %id, "Drain marker for finished submission"),
        }
    }

    fn submission_finished(&self, id: SubmissionId) {
        self.lock_active().remove(&id);
        self.logging.forget(id);
        self.call_ins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn start_on_engine(self: &Arc<Self>, submission: &BuildSubmission, allow_main_thread_build: bool) {
        let id = submission.id();
        tracing::debug!(submission_id = %id, allow_main_thread_build, "Starting build on engine");
        if allow_main_thread_build {
            // `execute` starts the build on the thread that then waits on it.
            if let Some(pump) = &self.pump {
                self.call_ins
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id, pump.dispatcher());
            }
        }
        let reporter = BuildReporter::new(id, Arc::downgrade(self));
        self.engine.start(submission.request_data().clone(), reporter);
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<SubmissionId, Arc<BuildSubmission>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BuildCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCoordinator")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("active", &self.active_submissions())
            .field("legacy_threading", &self.pump.is_some())
            .finish()
    }
}

/// The coordinator as seen by its submissions. Holds it weakly; submissions
/// are owned by the coordinator.
struct CoordinatorHost {
    coordinator: Weak<BuildCoordinator>,
}

impl SubmissionHost<BuildRequestData, BuildResult> for CoordinatorHost {
    fn execute_submission(&self, submission: Arc<BuildSubmission>, allow_main_thread_build: bool) {
        match self.coordinator.upgrade() {
            Some(coordinator) => coordinator.start_on_engine(&submission, allow_main_thread_build),
            None => {
                let failure = BuildFailure::new(FailureKind::Internal, "build coordinator is gone");
                if let Err(e) = submission.complete_with_failure(failure) {
                    tracing::debug!(submission_id = %submission.id(), error = %e, "Orphaned submission");
                }
                submission.on_logging_complete();
            }
        }
    }

    fn has_logged_errors(&self, id: SubmissionId) -> bool {
        self.coordinator
            .upgrade()
            .is_some_and(|coordinator| coordinator.has_logged_errors(id))
    }

    fn submission_completed(&self, id: SubmissionId) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.submission_finished(id);
        }
    }
}
