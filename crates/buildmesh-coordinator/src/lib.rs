//! buildmesh coordinator
//!
//! Accepts build submissions, hands them to an execution engine, runs the
//! logging pipeline that tells each submission when its events have been
//! flushed, and speaks the node wire protocol to remote nodes.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod logging;
pub mod node;
pub mod observability;

pub use config::CoordinatorConfig;
pub use coordinator::BuildCoordinator;
pub use engine::{BuildReporter, ExecutionEngine};
pub use error::*;
pub use logging::LoggingPipeline;
pub use node::NodeEngine;
