//! buildmesh protocol - node wire format and message definitions
//!
//! Every packet exchanged between the coordinator and a node starts with a
//! one-byte header carrying the packet type. Types that opted into
//! versioning set the extended-header flag and follow it with a version
//! byte. Payloads are JSON, length-delimited by the frame layer.

pub mod catalog;
pub mod constants;
pub mod error;
pub mod frame;
pub mod header;
pub mod messages;
pub mod packet_type;

pub use catalog::PacketCatalog;
pub use constants::*;
pub use error::*;
pub use frame::{decode_frame, encode_frame, read_packet, write_packet, Frame};
pub use header::{decode_header, encode_extended_header_type, PacketHeader};
pub use messages::*;
pub use packet_type::NodePacketType;
