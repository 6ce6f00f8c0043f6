use serde::{Deserialize, Serialize};

use crate::{ProtocolError, CONTROL_RANGE_START};

/// Every packet type exchanged between the coordinator and its nodes.
///
/// The numeric values are part of the wire format. The `ServerNode*`
/// values form the control range and are consumed by the command-line
/// driver; they must keep their values as the protocol evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodePacketType {
    /// Sent once per build before any request: environment, logging
    /// configuration, node id and startup directory.
    NodeConfiguration = 0,
    /// Maps a node-local build configuration to a global configuration id.
    BuildRequestConfiguration = 1,
    BuildRequestConfigurationResponse = 2,
    /// Initial and default targets of a project loaded on a node.
    ProjectLoadInfo = 3,
    /// A node's active request is blocked on other work.
    BuildRequestBlocker = 4,
    BuildRequestUnblocker = 5,
    /// A unit of work for a node.
    BuildRequest = 6,
    /// The outcome of a `BuildRequest`.
    BuildResult = 7,
    /// A build event raised on a node.
    LogMessage = 8,
    NodeBuildComplete = 9,
    /// Final packet received from a node before it goes away.
    NodeShutdown = 10,
    /// Task-specific setup for a task host; sent instead of `NodeConfiguration`.
    TaskHostConfiguration = 11,
    TaskHostTaskComplete = 12,
    TaskHostTaskCancelled = 13,
    ResolveSdkRequest = 14,
    ResolveSdkResponse = 15,
    /// A task requests or returns cores from the scheduler.
    ResourceRequest = 16,
    ResourceResponse = 17,
    FileAccessReport = 18,
    ProcessReport = 19,
    /// Command line for a server node.
    ServerNodeBuildCommand = 0xF0,
    ServerNodeBuildResult = 0xF1,
    /// Console activity forwarded from a server node.
    ServerNodeConsoleWrite = 0xF2,
    ServerNodeBuildCancel = 0xF3,
}

impl NodePacketType {
    pub const ALL: [NodePacketType; 24] = [
        Self::NodeConfiguration,
        Self::BuildRequestConfiguration,
        Self::BuildRequestConfigurationResponse,
        Self::ProjectLoadInfo,
        Self::BuildRequestBlocker,
        Self::BuildRequestUnblocker,
        Self::BuildRequest,
        Self::BuildResult,
        Self::LogMessage,
        Self::NodeBuildComplete,
        Self::NodeShutdown,
        Self::TaskHostConfiguration,
        Self::TaskHostTaskComplete,
        Self::TaskHostTaskCancelled,
        Self::ResolveSdkRequest,
        Self::ResolveSdkResponse,
        Self::ResourceRequest,
        Self::ResourceResponse,
        Self::FileAccessReport,
        Self::ProcessReport,
        Self::ServerNodeBuildCommand,
        Self::ServerNodeBuildResult,
        Self::ServerNodeConsoleWrite,
        Self::ServerNodeBuildCancel,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this type lives in the externally-contracted control range.
    pub fn is_control(self) -> bool {
        self.as_u8() >= CONTROL_RANGE_START
    }
}

impl TryFrom<u8> for NodePacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_u8() == value)
            .ok_or(ProtocolError::UnknownPacketType(value))
    }
}

impl From<NodePacketType> for u8 {
    fn from(value: NodePacketType) -> Self {
        value.as_u8()
    }
}

impl std::fmt::Display for NodePacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}(0x{:02x})", self, self.as_u8())
    }
}
