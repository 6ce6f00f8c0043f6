//! Execution engine backed by a remote node.
//!
//! Requests go out as `BuildRequest` packets. The node answers with
//! `LogMessage` packets followed by one `BuildResult` per request, and says
//! goodbye with `NodeShutdown`. Losing the node fails every build it still
//! owes a result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use buildmesh_protocol::{
    read_packet, write_packet, BuildFailure, BuildRequestData, BuildRequestPacket, BuildResult,
    FailureKind, Frame, LogMessage, NodePacket, NodePacketType, NodeShutdown, PacketCatalog,
    SubmissionId,
};

use crate::engine::{BuildReporter, ExecutionEngine};

type Pending = Arc<Mutex<HashMap<SubmissionId, BuildReporter>>>;

pub struct NodeEngine {
    outbound: mpsc::UnboundedSender<Frame>,
    pending: Pending,
    catalog: PacketCatalog,
    lost: Arc<AtomicBool>,
}

impl NodeEngine {
    /// Take over `stream` and start its reader and writer tasks on the
    /// current runtime.
    pub fn spawn<S>(stream: S, catalog: PacketCatalog) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let lost = Arc::new(AtomicBool::new(false));

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write_packet(&mut writer, &frame).await {
                    tracing::warn!(error = %e, "Failed to write packet to node");
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_lost = lost.clone();
        let reader_catalog = catalog.clone();
        tokio::spawn(async move {
            let reason = loop {
                let frame = match read_packet(&mut reader).await {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break "node closed the connection".to_string(),
                    Err(e) => break format!("node connection failed: {e}"),
                };
                if let Err(e) = frame.header.validate(&reader_catalog) {
                    tracing::warn!(error = %e, "Dropping packet from node");
                    continue;
                }
                match handle_frame(&frame, &reader_pending) {
                    Ok(Some(shutdown)) => {
                        tracing::info!(reason = ?shutdown.reason, detail = ?shutdown.detail, "Node shut down");
                        break format!("node shut down ({:?})", shutdown.reason);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, packet_type = %frame.packet_type(), "Malformed packet from node"),
                }
            };
            reader_lost.store(true, Ordering::SeqCst);
            fail_pending(&reader_pending, &reason);
        });

        Arc::new(Self {
            outbound,
            pending,
            catalog,
            lost,
        })
    }

    /// False once the node has shut down or the connection has dropped.
    pub fn is_connected(&self) -> bool {
        !self.lost.load(Ordering::SeqCst)
    }

    /// Builds sent to the node that have no result yet.
    pub fn outstanding(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl ExecutionEngine for NodeEngine {
    fn start(&self, request: BuildRequestData, reporter: BuildReporter) {
        let submission_id = reporter.submission_id();
        let packet = BuildRequestPacket {
            submission_id,
            request,
        };
        let frame = match packet.to_frame(&self.catalog) {
            Ok(frame) => frame,
            Err(e) => {
                reporter.finish(Err(BuildFailure::new(FailureKind::Internal, e.to_string())));
                return;
            }
        };

        lock(&self.pending).insert(submission_id, reporter);
        // The reader may already have drained `pending` for a lost node.
        if self.lost.load(Ordering::SeqCst) || self.outbound.send(frame).is_err() {
            fail_pending(&self.pending, "node is not connected");
            return;
        }
        tracing::debug!(%submission_id, "Build request sent to node");
    }
}

impl std::fmt::Debug for NodeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeEngine")
            .field("connected", &self.is_connected())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Route one packet; returns the shutdown notice when the node is leaving.
fn handle_frame(
    frame: &Frame,
    pending: &Pending,
) -> buildmesh_protocol::Result<Option<NodeShutdown>> {
    match frame.packet_type() {
        NodePacketType::BuildResult => {
            let result = BuildResult::from_frame(frame)?;
            let reporter = lock(pending).remove(&result.submission_id);
            match reporter {
                Some(reporter) => reporter.finish(Ok(result)),
                None => tracing::debug!(submission_id = %result.submission_id, "Result for a build the node does not owe"),
            }
        }
        NodePacketType::LogMessage => {
            let message = LogMessage::from_frame(frame)?;
            match lock(pending).get(&message.submission_id) {
                Some(reporter) => reporter.log(message.severity, message.text),
                None => tracing::debug!(submission_id = %message.submission_id, "Log event for unknown build"),
            }
        }
        NodePacketType::NodeShutdown => return Ok(Some(NodeShutdown::from_frame(frame)?)),
        other => tracing::debug!(packet_type = %other, "Ignoring packet from node"),
    }
    Ok(None)
}

fn fail_pending(pending: &Pending, reason: &str) {
    let reporters: Vec<_> = lock(pending).drain().map(|(_, reporter)| reporter).collect();
    if !reporters.is_empty() {
        tracing::warn!(count = reporters.len(), reason, "Failing builds owed by lost node");
    }
    for reporter in reporters {
        reporter.finish(Err(BuildFailure::new(FailureKind::NodeLost, reason)));
    }
}

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<SubmissionId, BuildReporter>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}
