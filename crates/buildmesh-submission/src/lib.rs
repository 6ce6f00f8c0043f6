//! buildmesh submission - lifecycle of one unit of build work
//!
//! A [`Submission`] completes only once both its result and the logging
//! pipeline's drain signal have arrived. Completion signals the wait handle
//! and hands any registered callback to a [`CallbackQueue`], exactly once,
//! whatever order the two signals arrive in.

pub mod dispatch;
pub mod error;
pub mod host;
pub mod outcome;
pub mod submission;
pub mod wait;

pub use buildmesh_protocol::SubmissionId;
pub use dispatch::{AmbientContext, CallbackQueue, Job, ThreadCallbackQueue, TokioCallbackQueue};
pub use error::*;
pub use host::SubmissionHost;
pub use outcome::{BuildOutcome, RequestData};
pub use submission::{
    AsyncContext, CompletionCallback, DuplicateResultPolicy, Submission, SubmissionPhase,
    SubmissionServices,
};
pub use wait::{BlockingWait, CallInDispatcher, PumpingWait, WaitHandle, WaitStrategy};

/// The submission flavour the coordinator runs: one project build.
pub type BuildSubmission =
    Submission<buildmesh_protocol::BuildRequestData, buildmesh_protocol::BuildResult>;
