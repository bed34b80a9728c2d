//! End-to-end test of the two-peer flow: discovery, chat, file transfer.

use peerlink::networking::events::Direction;
use peerlink::{DiscoveryServer, Event, NetworkConfig, NetworkManager};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc;

fn channel_config(
    username: &str,
    server_port: u16,
    download_dir: std::path::PathBuf,
) -> (NetworkConfig, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut config = NetworkConfig::new(username);
    config.server_port = server_port;
    config.download_dir = download_dir;
    config.passphrase = "integration-test-key".to_string();
    config.event_callback = Some(Arc::new(move |event| {
        let _ = tx.send(event);
    }));
    (config, rx)
}

async fn next_matching<F>(rx: &mut mpsc::UnboundedReceiver<Event>, mut predicate: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn discovery_chat_and_file_transfer() {
    let mut server = DiscoveryServer::new();
    let server_addr = server.start(0).await.unwrap();
    let server_port = server_addr.port();

    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();

    let (config_a, _events_a) = channel_config("A", server_port, dir_a.path().to_path_buf());
    let (config_b, mut events_b) = channel_config("B", server_port, dir_b.path().to_path_buf());

    let mut peer_a = NetworkManager::start(config_a).await.unwrap();
    let mut peer_b = NetworkManager::start(config_b).await.unwrap();

    assert!(peer_a.register_with_server("127.0.0.1").await.is_success());
    assert!(peer_b.register_with_server("127.0.0.1").await.is_success());

    // B's peer list contains exactly A, with A's advertised ports.
    let listed = peer_b.get_peer_list("127.0.0.1").await;
    let peers = listed.peers.expect("list response carries peers");
    assert_eq!(peers.len(), 1);
    let a_info = &peers["A"];
    assert_eq!(a_info.tcp_port, peer_a.tcp_port());
    assert_eq!(a_info.udp_port, peer_a.udp_port());

    // A resolves B the same way and sends "hello"; B's event stream yields
    // it as plaintext.
    let listed = peer_a.get_peer_list("127.0.0.1").await;
    let b_info = listed.peers.unwrap()["B"].clone();
    assert!(
        peer_a
            .send_message(&b_info.ip, b_info.tcp_port, "hello", "B")
            .await
    );
    let event = next_matching(&mut events_b, |event| {
        matches!(event, Event::ChatMessage { .. })
    })
    .await;
    match event {
        Event::ChatMessage {
            sender,
            text,
            direction,
            ..
        } => {
            assert_eq!(sender, "A");
            assert_eq!(text, "hello");
            assert_eq!(direction, Direction::Incoming);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // A streams a file to B over UDP; B reconstructs it byte-identically.
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 239) as u8).collect();
    let src_path = dir_a.path().join("report.bin");
    std::fs::write(&src_path, &payload).unwrap();

    assert!(
        peer_a
            .send_file(&b_info.ip, b_info.udp_port, &src_path)
            .await
    );
    let event = next_matching(&mut events_b, |event| {
        matches!(event, Event::FileComplete { .. })
    })
    .await;
    match event {
        Event::FileComplete {
            filename,
            save_path,
            sender,
        } => {
            assert_eq!(filename, "report.bin");
            assert_eq!(sender, "A");
            assert_eq!(std::fs::read(save_path).unwrap(), payload);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Clean unregister: A disappears from the next list.
    peer_a.unregister_from_server("127.0.0.1").await;
    let listed = peer_b.get_peer_list("127.0.0.1").await;
    assert!(listed.peers.unwrap().is_empty());

    peer_a.shutdown().await;
    peer_b.shutdown().await;
    server.stop().await;
}
