use buildmesh_protocol::{NodePacketType, PacketCatalog, PacketHeader};

#[test]
fn test_unregistered_type_defaults_to_version_one() {
    let catalog = PacketCatalog::builtin();
    assert_eq!(catalog.current_version(NodePacketType::BuildRequest), 1);
    assert!(!catalog.supports_versioning(NodePacketType::BuildRequest));
}

#[test]
fn test_builtin_registers_task_host_configuration() {
    let catalog = PacketCatalog::builtin();
    assert!(catalog.supports_versioning(NodePacketType::TaskHostConfiguration));
    assert_eq!(catalog.current_version(NodePacketType::TaskHostConfiguration), 1);
}

#[test]
fn test_register_affects_only_that_type() {
    let mut catalog = PacketCatalog::new();
    catalog.register(NodePacketType::BuildResult, 4);
    assert_eq!(catalog.current_version(NodePacketType::BuildResult), 4);
    assert!(catalog.supports_versioning(NodePacketType::BuildResult));
    for other in NodePacketType::ALL.iter().filter(|t| **t != NodePacketType::BuildResult) {
        assert!(!catalog.supports_versioning(*other), "{other} should stay unversioned");
        assert_eq!(catalog.current_version(*other), 1);
    }
}

#[test]
fn test_register_ignores_control_types() {
    let mut catalog = PacketCatalog::new();
    catalog.register(NodePacketType::ServerNodeBuildResult, 2);
    assert!(!catalog.supports_versioning(NodePacketType::ServerNodeBuildResult));
}

#[test]
fn test_header_for_type_follows_catalog() {
    let mut catalog = PacketCatalog::new();
    catalog.register(NodePacketType::LogMessage, 2);
    let header = PacketHeader::for_type(NodePacketType::LogMessage, &catalog).unwrap();
    assert!(header.has_extended_header());
    assert_eq!(header.version(), 2);
    let plain = PacketHeader::for_type(NodePacketType::BuildRequest, &catalog).unwrap();
    assert!(!plain.has_extended_header());
}

#[test]
fn test_entries_sorted() {
    let mut catalog = PacketCatalog::new();
    catalog
        .register(NodePacketType::ResourceRequest, 2)
        .register(NodePacketType::NodeConfiguration, 3);
    assert_eq!(
        catalog.entries(),
        vec![
            (NodePacketType::NodeConfiguration, 3),
            (NodePacketType::ResourceRequest, 2),
        ]
    );
}
