//! Off-thread delivery of completion callbacks.
//!
//! Completion fires on whichever thread delivered the last of its two
//! signals. Callbacks never run there: they are queued to a worker so that
//! a callback re-entering the coordinator cannot deadlock against the
//! completing thread, and slow callbacks do not stall it.

use tracing::Span;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A queue that runs jobs on some thread other than the caller's.
pub trait CallbackQueue: Send + Sync {
    fn queue(&self, job: Job);
}

/// Runs jobs on the blocking pool of a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioCallbackQueue {
    handle: tokio::runtime::Handle,
}

impl TokioCallbackQueue {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Queue bound to the runtime of the calling context, if there is one.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl CallbackQueue for TokioCallbackQueue {
    fn queue(&self, job: Job) {
        // Callbacks may block (they often wait on other submissions).
        drop(self.handle.spawn_blocking(job));
    }
}

/// Runs every job on a fresh named thread. For hosts without a runtime.
#[derive(Debug, Clone)]
pub struct ThreadCallbackQueue {
    thread_name: String,
}

impl ThreadCallbackQueue {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }
}

impl Default for ThreadCallbackQueue {
    fn default() -> Self {
        Self::new("submission-callback")
    }
}

impl CallbackQueue for ThreadCallbackQueue {
    fn queue(&self, job: Job) {
        if let Err(e) = std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(job)
        {
            tracing::error!(error = %e, "Failed to spawn callback thread; callback dropped");
        }
    }
}

/// Ambient context captured where a callback is registered and restored on
/// the worker that eventually runs it.
#[derive(Debug, Clone)]
pub struct AmbientContext {
    span: Span,
}

impl AmbientContext {
    pub fn capture() -> Self {
        Self {
            span: Span::current(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        self.span.in_scope(f)
    }
}
