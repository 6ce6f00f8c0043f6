//! One outstanding unit of build work.
//!
//! Lifecycle:
//! 1. `create()` - the coordinator accepts the work (Pending)
//! 2. `execute_async()` or `execute()` - hand it to the engine (Running)
//! 3. `complete_result()` and `on_logging_complete()`, in either order,
//!    from any threads
//! 4. completion fires exactly once (Completed): finalize the result,
//!    signal the wait handle, queue the callback

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use buildmesh_protocol::{BuildFailure, SubmissionId};

use crate::{
    AmbientContext, BuildOutcome, CallbackQueue, RequestData, Result, SubmissionError,
    SubmissionHost, WaitHandle, WaitStrategy,
};

/// Invoked on a worker once the submission has completed.
pub type CompletionCallback<Req, Res> = Box<dyn FnOnce(Arc<Submission<Req, Res>>) + Send + 'static>;

/// Caller state handed back through [`Submission::async_context`].
pub type AsyncContext = Arc<dyn Any + Send + Sync>;

/// What happens when a result arrives for a submission that already has one.
/// The first result is kept either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateResultPolicy {
    /// Drop the later result, logged at debug.
    #[default]
    Ignore,
    /// Return `SubmissionError::DuplicateResult` to the later reporter.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionPhase {
    Pending,
    Running,
    Completed { succeeded: bool },
}

/// Collaborators shared by the submissions of one coordinator.
pub struct SubmissionServices<Req, Res> {
    pub host: Arc<dyn SubmissionHost<Req, Res>>,
    pub callbacks: Arc<dyn CallbackQueue>,
    pub wait_strategy: Arc<dyn WaitStrategy>,
    pub duplicate_policy: DuplicateResultPolicy,
    /// `execute()` asks the host for a main-thread build and waits with
    /// `wait_strategy`, expected to be a pumping wait.
    pub legacy_threading: bool,
}

impl<Req, Res> Clone for SubmissionServices<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            callbacks: self.callbacks.clone(),
            wait_strategy: self.wait_strategy.clone(),
            duplicate_policy: self.duplicate_policy,
            legacy_threading: self.legacy_threading,
        }
    }
}

struct RegisteredCallback<Req, Res> {
    callback: CompletionCallback<Req, Res>,
    ambient: AmbientContext,
}

struct Inner<Req, Res> {
    phase: SubmissionPhase,
    result: Option<Res>,
    callback: Option<RegisteredCallback<Req, Res>>,
    context: Option<AsyncContext>,
    completed_at: Option<DateTime<Utc>>,
}

/// A submitted unit of work and its completion state.
///
/// Thread-safe: the engine, the logging pipeline and the caller may all
/// touch it concurrently.
pub struct Submission<Req, Res> {
    id: SubmissionId,
    request: Req,
    created_at: DateTime<Utc>,
    inner: Mutex<Inner<Req, Res>>,
    logging_complete: AtomicBool,
    completion_fired: AtomicBool,
    wait_handle: WaitHandle,
    services: SubmissionServices<Req, Res>,
    me: Weak<Submission<Req, Res>>,
}

impl<Req, Res> Submission<Req, Res>
where
    Req: RequestData,
    Res: BuildOutcome,
{
    pub fn create(
        id: SubmissionId,
        request: Req,
        services: SubmissionServices<Req, Res>,
    ) -> Result<Arc<Self>> {
        request.validate().map_err(SubmissionError::InvalidArgument)?;
        Ok(Arc::new_cyclic(|me| Self {
            id,
            request,
            created_at: Utc::now(),
            inner: Mutex::new(Inner {
                phase: SubmissionPhase::Pending,
                result: None,
                callback: None,
                context: None,
                completed_at: None,
            }),
            logging_complete: AtomicBool::new(false),
            completion_fired: AtomicBool::new(false),
            wait_handle: WaitHandle::new(),
            services,
            me: me.clone(),
        }))
    }

    pub fn id(&self) -> SubmissionId {
        self.id
    }

    pub fn request_data(&self) -> &Req {
        &self.request
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.lock().completed_at
    }

    /// The result, once one has been delivered. Only final after
    /// `is_completed()` returns true.
    pub fn result(&self) -> Option<Res> {
        self.lock().result.clone()
    }

    pub fn phase(&self) -> SubmissionPhase {
        self.lock().phase
    }

    pub fn is_completed(&self) -> bool {
        self.wait_handle.is_set()
    }

    pub fn is_logging_complete(&self) -> bool {
        self.logging_complete.load(Ordering::SeqCst)
    }

    pub fn wait_handle(&self) -> &WaitHandle {
        &self.wait_handle
    }

    pub fn async_context(&self) -> Option<AsyncContext> {
        self.lock().context.clone()
    }

    /// Start the submission and return immediately. `callback` runs on a
    /// worker after completion.
    pub fn execute_async(
        &self,
        callback: Option<CompletionCallback<Req, Res>>,
        context: Option<AsyncContext>,
    ) -> Result<()> {
        self.execute_async_with(callback, context, false)
    }

    /// As `execute_async`, additionally telling the host whether the caller
    /// will wait with a reentrant (pumping) wait.
    pub fn execute_async_with(
        &self,
        callback: Option<CompletionCallback<Req, Res>>,
        context: Option<AsyncContext>,
        reentrant_wait: bool,
    ) -> Result<()> {
        {
            let mut inner = self.lock();
            match inner.phase {
                SubmissionPhase::Completed { .. } => {
                    return Err(self.invalid_state("submission is already complete"))
                }
                SubmissionPhase::Running => {
                    return Err(self.invalid_state("submission has already been started"))
                }
                SubmissionPhase::Pending => {}
            }
            inner.phase = SubmissionPhase::Running;
            inner.callback = callback.map(|callback| RegisteredCallback {
                callback,
                ambient: AmbientContext::capture(),
            });
            inner.context = context;
        }

        let me = self.arc()?;
        tracing::debug!(submission_id = %self.id, reentrant_wait, "Submission started");
        self.services.host.execute_submission(me, reentrant_wait);
        Ok(())
    }

    /// Start the submission and block until it completes.
    ///
    /// A failed build is returned as a failed result, never as an error.
    pub fn execute(&self) -> Result<Res> {
        let legacy = self.services.legacy_threading;
        self.execute_async_with(None, None, legacy)?;
        if !self.services.wait_strategy.wait(&self.wait_handle, None)? {
            return Err(SubmissionError::Wait(format!(
                "{} wait returned before submission {} completed",
                self.services.wait_strategy.name(),
                self.id
            )));
        }
        self.result().ok_or_else(|| {
            SubmissionError::Wait(format!("submission {} completed without a result", self.id))
        })
    }

    /// Block with the configured strategy; returns whether completion was
    /// observed before `timeout`.
    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> Result<bool> {
        self.services.wait_strategy.wait(&self.wait_handle, timeout)
    }

    /// Resolve once completion has fired.
    pub async fn completion(&self) -> Option<Res> {
        self.wait_handle.wait_async().await;
        self.result()
    }

    /// Deliver the result. The first result wins; a completion check runs
    /// on every call.
    pub fn complete_result(&self, result: Res) -> Result<()> {
        if result.submission_id() != self.id {
            return Err(SubmissionError::Consistency {
                expected: self.id,
                actual: result.submission_id(),
            });
        }

        let duplicate = {
            let mut inner = self.lock();
            if inner.result.is_none() {
                inner.result = Some(result);
                false
            } else {
                true
            }
        };

        self.check_for_completion();

        if duplicate {
            match self.services.duplicate_policy {
                DuplicateResultPolicy::Ignore => {
                    tracing::debug!(submission_id = %self.id, "Ignoring duplicate result");
                }
                DuplicateResultPolicy::Reject => {
                    return Err(SubmissionError::DuplicateResult { id: self.id });
                }
            }
        }
        Ok(())
    }

    /// Synthetic failed result for a build that ended abnormally.
    pub fn create_failed_result(&self, failure: BuildFailure) -> Res {
        Res::from_failure(self.id, failure)
    }

    /// Build a failed result from `failure` and deliver it.
    pub fn complete_with_failure(&self, failure: BuildFailure) -> Result<Res> {
        tracing::debug!(submission_id = %self.id, %failure, "Completing with failure");
        let result = self.create_failed_result(failure);
        self.complete_result(result.clone())?;
        Ok(result)
    }

    /// The logging pipeline has flushed every event of this submission.
    pub fn on_logging_complete(&self) {
        self.logging_complete.store(true, Ordering::SeqCst);
        self.check_for_completion();
    }

    fn check_for_completion(&self) {
        let has_result = self.lock().result.is_some();
        if !has_result || !self.logging_complete.load(Ordering::SeqCst) {
            return;
        }
        if self.completion_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        self.fire();
    }

    fn fire(&self) {
        let logged_errors = self.services.host.has_logged_errors(self.id);

        let (registered, succeeded) = {
            let mut inner = self.lock();
            if let Some(result) = inner.result.as_mut() {
                // Warnings elevated to errors fail an otherwise successful build.
                if logged_errors && result.succeeded() {
                    tracing::info!(submission_id = %self.id, "Errors were logged; marking result failed");
                    result.set_overall_result(false);
                }
            }
            let succeeded = inner.result.as_ref().is_some_and(|r| r.succeeded());
            inner.phase = SubmissionPhase::Completed { succeeded };
            inner.completed_at = Some(Utc::now());
            (inner.callback.take(), succeeded)
        };

        self.wait_handle.set();
        tracing::debug!(submission_id = %self.id, succeeded, "Submission completed");
        self.services.host.submission_completed(self.id);

        let Some(registered) = registered else {
            return;
        };
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let RegisteredCallback { callback, ambient } = registered;
        self.services
            .callbacks
            .queue(Box::new(move || ambient.in_scope(|| callback(me))));
    }

    fn arc(&self) -> Result<Arc<Self>> {
        self.me
            .upgrade()
            .ok_or_else(|| self.invalid_state("submission has been released"))
    }

    fn invalid_state(&self, reason: &'static str) -> SubmissionError {
        SubmissionError::InvalidState {
            id: self.id,
            reason,
        }
    }
}

impl<Req, Res> Submission<Req, Res> {
    fn lock(&self) -> MutexGuard<'_, Inner<Req, Res>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<Req: std::fmt::Debug, Res> std::fmt::Debug for Submission<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("phase", &self.lock().phase)
            .field("logging_complete", &self.logging_complete.load(Ordering::SeqCst))
            .finish()
    }
}
