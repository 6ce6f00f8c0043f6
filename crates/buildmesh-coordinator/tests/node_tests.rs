use std::sync::Arc;
use std::time::Duration;

use tokio::io::DuplexStream;

use buildmesh_coordinator::{BuildCoordinator, CoordinatorConfig, NodeEngine};
use buildmesh_protocol::{
    read_packet, write_packet, BuildRequestData, BuildRequestPacket, BuildResult, FailureKind,
    LogMessage, NodePacket, NodePacketType, NodeShutdown, PacketCatalog, Severity,
    ShutdownReason, TargetOutcome,
};

fn connect() -> (Arc<BuildCoordinator>, Arc<NodeEngine>, DuplexStream) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let engine = NodeEngine::spawn(local, PacketCatalog::builtin().clone());
    let coordinator = BuildCoordinator::new(
        CoordinatorConfig::default(),
        engine.clone(),
        tokio::runtime::Handle::current(),
    );
    (coordinator, engine, remote)
}

async fn next_request(node: &mut DuplexStream) -> BuildRequestPacket {
    let frame = read_packet(node).await.unwrap().unwrap();
    assert_eq!(frame.packet_type(), NodePacketType::BuildRequest);
    BuildRequestPacket::from_frame(&frame).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_node_builds_request() {
    let (coordinator, engine, mut node) = connect();
    let catalog = PacketCatalog::builtin();

    let fake_node = tokio::spawn(async move {
        let packet = next_request(&mut node).await;
        assert_eq!(packet.request.project_path, "app.proj");
        assert_eq!(packet.request.targets, vec!["Build".to_string()]);

        let log = LogMessage {
            submission_id: packet.submission_id,
            severity: Severity::Message,
            text: "compiling".into(),
        };
        write_packet(&mut node, &log.to_frame(catalog).unwrap()).await.unwrap();
        let result = BuildResult::success(packet.submission_id).with_target("Build", TargetOutcome::Success);
        write_packet(&mut node, &result.to_frame(catalog).unwrap()).await.unwrap();
        node
    });

    let result = coordinator
        .build_async(BuildRequestData::new("app.proj").with_target("Build"))
        .await
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(result.target_results["Build"], TargetOutcome::Success);

    let _node = fake_node.await.unwrap();
    assert!(engine.is_connected());
    assert_eq!(engine.outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_node_error_event_fails_build() {
    let (coordinator, _engine, mut node) = connect();
    let catalog = PacketCatalog::builtin();

    let fake_node = tokio::spawn(async move {
        let packet = next_request(&mut node).await;
        let log = LogMessage {
            submission_id: packet.submission_id,
            severity: Severity::Error,
            text: "error CS0103".into(),
        };
        write_packet(&mut node, &log.to_frame(catalog).unwrap()).await.unwrap();
        let result = BuildResult::success(packet.submission_id);
        write_packet(&mut node, &result.to_frame(catalog).unwrap()).await.unwrap();
        node
    });

    let result = coordinator
        .build_async(BuildRequestData::new("app.proj"))
        .await
        .unwrap();
    assert!(!result.succeeded());
    let _node = fake_node.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_node_shutdown_fails_outstanding_builds() {
    let (coordinator, engine, mut node) = connect();
    let catalog = PacketCatalog::builtin();

    let fake_node = tokio::spawn(async move {
        next_request(&mut node).await;
        let shutdown = NodeShutdown {
            reason: ShutdownReason::Error,
            detail: Some("out of memory".into()),
        };
        write_packet(&mut node, &shutdown.to_frame(catalog).unwrap()).await.unwrap();
        node
    });

    let result = coordinator
        .build_async(BuildRequestData::new("app.proj"))
        .await
        .unwrap();
    assert_eq!(result.failure.unwrap().kind, FailureKind::NodeLost);
    assert!(!engine.is_connected());
    let _node = fake_node.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_fails_builds_and_later_requests() {
    let (coordinator, engine, mut node) = connect();

    let fake_node = tokio::spawn(async move {
        next_request(&mut node).await;
        drop(node);
    });

    let result = coordinator
        .build_async(BuildRequestData::new("app.proj"))
        .await
        .unwrap();
    assert_eq!(result.failure.unwrap().kind, FailureKind::NodeLost);
    fake_node.await.unwrap();

    for _ in 0..200 {
        if !engine.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.build_async(BuildRequestData::new("app.proj")),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(result.failure.unwrap().kind, FailureKind::NodeLost);
}
