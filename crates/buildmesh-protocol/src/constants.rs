/// Bit 6 of the header byte marks an extended header (a version byte follows).
pub const EXTENDED_HEADER_FLAG: u8 = 0x40;

/// First raw header value of the control range. Values at or above this are
/// fixed constants shared with the command-line driver and are never
/// interpreted as carrying a version byte.
pub const CONTROL_RANGE_START: u8 = 0xF0;

/// Version assumed for every packet type without a catalog entry.
pub const DEFAULT_PACKET_VERSION: u8 = 1;

/// Size of the little-endian payload length that follows the header bytes.
pub const FRAME_LENGTH_SIZE: usize = 4;

/// Upper bound on a single payload accepted by `read_packet`.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;
