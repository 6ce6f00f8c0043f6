use crate::NodePacketType;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or validating node packets.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The header byte does not name any known packet type.
    #[error("unknown packet type 0x{0:02x}")]
    UnknownPacketType(u8),

    /// An extended header was requested for a type that cannot carry one.
    #[error("packet type 0x{0:02x} cannot carry an extended header")]
    ExtendedHeaderNotAllowed(u8),

    /// The header is well-formed but disagrees with the packet catalog.
    #[error("protocol violation on {packet_type:?}: {reason}")]
    Violation {
        packet_type: NodePacketType,
        reason: String,
    },

    /// The frame announced more payload than the reader accepts.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The buffer ended before the frame was complete.
    #[error("truncated frame: need {needed} more bytes")]
    Truncated { needed: usize },

    /// A payload arrived under a packet type other than the one expected.
    #[error("expected {expected:?} packet, got {actual:?}")]
    UnexpectedPacket {
        expected: NodePacketType,
        actual: NodePacketType,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn violation(packet_type: NodePacketType, reason: impl Into<String>) -> Self {
        Self::Violation {
            packet_type,
            reason: reason.into(),
        }
    }
}
