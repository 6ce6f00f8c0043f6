use std::collections::HashMap;
use std::sync::OnceLock;

use crate::{NodePacketType, DEFAULT_PACKET_VERSION};

/// Registry of packet types that opted into versioned payloads.
///
/// A type without an entry is frozen at version 1 and never sends an
/// extended header, which keeps it readable by peers built before
/// versioning existed. The catalog is filled at startup and only read
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct PacketCatalog {
    versions: HashMap<NodePacketType, u8>,
}

impl PacketCatalog {
    /// An empty catalog: every type is unversioned.
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog this build of the protocol ships with.
    pub fn builtin() -> &'static PacketCatalog {
        static BUILTIN: OnceLock<PacketCatalog> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            let mut catalog = PacketCatalog::new();
            catalog.register(NodePacketType::TaskHostConfiguration, 1);
            catalog
        })
    }

    /// Opt `packet_type` into versioning at `version`.
    ///
    /// Registering a control-range type is ignored: those values can never
    /// carry a version byte.
    pub fn register(&mut self, packet_type: NodePacketType, version: u8) -> &mut Self {
        if packet_type.is_control() {
            tracing::warn!(%packet_type, "Ignoring version registration for control packet");
            return self;
        }
        self.versions.insert(packet_type, version);
        self
    }

    pub fn current_version(&self, packet_type: NodePacketType) -> u8 {
        self.versions
            .get(&packet_type)
            .copied()
            .unwrap_or(DEFAULT_PACKET_VERSION)
    }

    pub fn supports_versioning(&self, packet_type: NodePacketType) -> bool {
        self.versions.contains_key(&packet_type)
    }

    /// Registered entries, ordered by packet type.
    pub fn entries(&self) -> Vec<(NodePacketType, u8)> {
        let mut entries: Vec<_> = self.versions.iter().map(|(t, v)| (*t, *v)).collect();
        entries.sort();
        entries
    }
}
