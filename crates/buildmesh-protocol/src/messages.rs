use std::collections::BTreeMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Frame, NodePacketType, PacketCatalog, PacketHeader, ProtocolError, Result};

/// Coordinator-assigned identity of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub i32);

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A payload with a fixed packet type.
pub trait NodePacket: Serialize + DeserializeOwned {
    const PACKET_TYPE: NodePacketType;

    /// Serialize into a frame, with the header the catalog prescribes.
    fn to_frame(&self, catalog: &PacketCatalog) -> Result<Frame> {
        let header = PacketHeader::for_type(Self::PACKET_TYPE, catalog)?;
        let payload = serde_json::to_vec(self)?;
        Ok(Frame::new(header, Bytes::from(payload)))
    }

    fn from_frame(frame: &Frame) -> Result<Self> {
        let actual = frame.header.packet_type();
        if actual != Self::PACKET_TYPE {
            return Err(ProtocolError::UnexpectedPacket {
                expected: Self::PACKET_TYPE,
                actual,
            });
        }
        Ok(serde_json::from_slice(&frame.payload)?)
    }
}

/// What a caller asked to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequestData {
    pub project_path: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub global_properties: BTreeMap<String, String>,
}

impl BuildRequestData {
    pub fn new(project_path: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
            targets: Vec::new(),
            global_properties: BTreeMap::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_properties.insert(name.into(), value.into());
        self
    }
}

/// A request sent to a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequestPacket {
    pub submission_id: SubmissionId,
    pub request: BuildRequestData,
}

impl NodePacket for BuildRequestPacket {
    const PACKET_TYPE: NodePacketType = NodePacketType::BuildRequest;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallResult {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOutcome {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The engine terminated the build abnormally.
    EngineAborted,
    /// The node executing the build went away.
    NodeLost,
    /// The coordinator cancelled the build.
    Cancelled,
    Internal,
}

/// Cause carried by a result that did not come from a normal build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct BuildFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl BuildFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of one submission. Also the payload of a `BuildResult` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub submission_id: SubmissionId,
    pub overall_result: OverallResult,
    #[serde(default)]
    pub target_results: BTreeMap<String, TargetOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<BuildFailure>,
}

impl BuildResult {
    pub fn success(submission_id: SubmissionId) -> Self {
        Self {
            submission_id,
            overall_result: OverallResult::Success,
            target_results: BTreeMap::new(),
            failure: None,
        }
    }

    pub fn failed(submission_id: SubmissionId, failure: BuildFailure) -> Self {
        Self {
            submission_id,
            overall_result: OverallResult::Failure,
            target_results: BTreeMap::new(),
            failure: Some(failure),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>, outcome: TargetOutcome) -> Self {
        self.target_results.insert(target.into(), outcome);
        self
    }

    pub fn succeeded(&self) -> bool {
        self.overall_result == OverallResult::Success
    }

    pub fn set_overall_result(&mut self, success: bool) {
        self.overall_result = if success {
            OverallResult::Success
        } else {
            OverallResult::Failure
        };
    }
}

impl NodePacket for BuildResult {
    const PACKET_TYPE: NodePacketType = NodePacketType::BuildResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Message,
    Warning,
    Error,
}

/// A build event raised while a submission executes on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub submission_id: SubmissionId,
    pub severity: Severity,
    pub text: String,
}

impl NodePacket for LogMessage {
    const PACKET_TYPE: NodePacketType = NodePacketType::LogMessage;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    BuildComplete,
    Requested,
    Error,
}

/// The last packet a node sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeShutdown {
    pub reason: ShutdownReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl NodePacket for NodeShutdown {
    const PACKET_TYPE: NodePacketType = NodePacketType::NodeShutdown;
}
