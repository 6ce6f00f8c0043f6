//! Packet header envelope.
//!
//! On the wire a header is one byte `[type|flag]`, optionally followed by a
//! version byte when the flag (bit 6) is set. Inside the crate the packet
//! type and the presence of a version are kept apart in [`PacketHeader`];
//! the two are only combined into a byte in `encode`.

use bytes::{Buf, BufMut};

use crate::{
    NodePacketType, PacketCatalog, ProtocolError, Result, CONTROL_RANGE_START,
    DEFAULT_PACKET_VERSION, EXTENDED_HEADER_FLAG,
};

/// Split a raw header byte into its base type and extended-header flag.
///
/// Control-range bytes (`>= 0xF0`) are returned unchanged and never report an
/// extended header, even though their bit pattern includes bit 6. Masking
/// bit 6 off unconditionally would turn `0xF0` into `0xB0`.
pub fn decode_header(raw: u8) -> (u8, bool) {
    if raw >= CONTROL_RANGE_START {
        return (raw, false);
    }
    (raw & !EXTENDED_HEADER_FLAG, raw & EXTENDED_HEADER_FLAG != 0)
}

/// Set the extended-header flag on a base type.
///
/// Fails for bases that already use bit 6 and for bases whose flagged form
/// would land in the control range; neither could be decoded back.
pub fn encode_extended_header_type(base_type: u8) -> Result<u8> {
    let flagged = base_type | EXTENDED_HEADER_FLAG;
    if base_type & EXTENDED_HEADER_FLAG != 0 || flagged >= CONTROL_RANGE_START {
        return Err(ProtocolError::ExtendedHeaderNotAllowed(base_type));
    }
    Ok(flagged)
}

/// Decoded form of a packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    packet_type: NodePacketType,
    version: Option<u8>,
}

impl PacketHeader {
    /// A header without a version byte.
    pub fn plain(packet_type: NodePacketType) -> Self {
        Self {
            packet_type,
            version: None,
        }
    }

    /// A header carrying an explicit version byte.
    pub fn versioned(packet_type: NodePacketType, version: u8) -> Result<Self> {
        encode_extended_header_type(packet_type.as_u8())?;
        Ok(Self {
            packet_type,
            version: Some(version),
        })
    }

    /// The header a writer should emit for `packet_type` today: versioned at
    /// the catalog's current version when the type opted in, plain otherwise.
    pub fn for_type(packet_type: NodePacketType, catalog: &PacketCatalog) -> Result<Self> {
        if catalog.supports_versioning(packet_type) {
            Self::versioned(packet_type, catalog.current_version(packet_type))
        } else {
            Ok(Self::plain(packet_type))
        }
    }

    pub fn packet_type(&self) -> NodePacketType {
        self.packet_type
    }

    pub fn has_extended_header(&self) -> bool {
        self.version.is_some()
    }

    /// Payload version; types without an extended header are version 1.
    pub fn version(&self) -> u8 {
        self.version.unwrap_or(DEFAULT_PACKET_VERSION)
    }

    pub fn encoded_len(&self) -> usize {
        if self.version.is_some() {
            2
        } else {
            1
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        match self.version {
            Some(version) => {
                // The constructors only admit versions on encodable types.
                buf.put_u8(self.packet_type.as_u8() | EXTENDED_HEADER_FLAG);
                buf.put_u8(version);
            }
            None => buf.put_u8(self.packet_type.as_u8()),
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if !buf.has_remaining() {
            return Err(ProtocolError::Truncated { needed: 1 });
        }
        let (base, extended) = decode_header(buf.get_u8());
        let packet_type = NodePacketType::try_from(base)?;
        let version = if extended {
            if !buf.has_remaining() {
                return Err(ProtocolError::Truncated { needed: 1 });
            }
            Some(buf.get_u8())
        } else {
            None
        };
        Ok(Self {
            packet_type,
            version,
        })
    }

    /// Strict check of a received header against the local catalog.
    ///
    /// A version byte on a type that never opted into versioning, or a
    /// version newer than the one this process understands, is a violation.
    pub fn validate(&self, catalog: &PacketCatalog) -> Result<()> {
        let Some(version) = self.version else {
            return Ok(());
        };
        if !catalog.supports_versioning(self.packet_type) {
            return Err(ProtocolError::violation(
                self.packet_type,
                format!("version byte {version} on a type without versioning"),
            ));
        }
        let current = catalog.current_version(self.packet_type);
        if version > current {
            return Err(ProtocolError::violation(
                self.packet_type,
                format!("peer version {version} is newer than local version {current}"),
            ));
        }
        Ok(())
    }
}
