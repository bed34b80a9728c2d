//! Central discovery server.
//!
//! Accepts short-lived request/response connections: each handler reads one
//! JSON request, mutates the registry, writes exactly one JSON response, and
//! closes. The server holds no session state across requests; identity is
//! reasserted by username on every call.

pub mod registry;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::config::{PEER_PROBE_TIMEOUT, REQUEST_BUFFER_SIZE, STALE_PEER_THRESHOLD};
use crate::networking::protocol::{ServerRequest, ServerResponse};

use registry::{PeerRegistry, RegisterOutcome};

pub struct DiscoveryServer {
    registry: Arc<Mutex<PeerRegistry>>,
    shutdown_sender: Option<mpsc::Sender<()>>,
}

impl Default for DiscoveryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryServer {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(PeerRegistry::new())),
            shutdown_sender: None,
        }
    }

    /// Bind the listener and spawn the accept loop. Returns the bound
    /// address (pass port 0 to let the OS choose).
    pub async fn start(&mut self, port: u16) -> Result<SocketAddr> {
        let (tx, mut rx) = mpsc::channel(1);
        self.shutdown_sender = Some(tx);

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .context("Failed to bind discovery server")?;
        let local_addr = listener.local_addr()?;
        info!("Discovery server listening on {}", local_addr);

        let registry = self.registry.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    conn_result = listener.accept() => {
                        match conn_result {
                            Ok((socket, addr)) => {
                                let registry = registry.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_client(socket, addr, registry).await {
                                        warn!("Error handling client {}: {}", addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Error accepting connection: {}", e);
                            }
                        }
                    }
                    _ = rx.recv() => {
                        info!("Shutting down discovery server");
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_sender.take() {
            let _ = tx.send(()).await;
        }
    }
}

/// Serve one connection: one request in, one response out.
async fn handle_client(
    mut socket: TcpStream,
    addr: SocketAddr,
    registry: Arc<Mutex<PeerRegistry>>,
) -> Result<()> {
    let mut buf = vec![0u8; REQUEST_BUFFER_SIZE];
    let n = socket.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }

    let response = match serde_json::from_slice::<ServerRequest>(&buf[..n]) {
        Ok(request) => process_request(request, addr.ip(), &registry).await,
        // Distinguish a structurally valid document with missing or unknown
        // fields from outright garbage.
        Err(_) => match serde_json::from_slice::<serde_json::Value>(&buf[..n]) {
            Ok(value) => invalid_request_response(&value),
            Err(_) => ServerResponse::error("Invalid JSON"),
        },
    };

    socket.write_all(&serde_json::to_vec(&response)?).await?;
    Ok(())
}

async fn process_request(
    request: ServerRequest,
    remote_ip: IpAddr,
    registry: &Mutex<PeerRegistry>,
) -> ServerResponse {
    let mut registry = registry.lock().await;
    // Any request from a known peer counts as a liveness signal.
    registry.touch(request.username());

    match request {
        ServerRequest::Register {
            username,
            tcp_port,
            udp_port,
        } => {
            match registry.register(&username, remote_ip, tcp_port, udp_port) {
                RegisterOutcome::New => {
                    info!("Peer registered: {} from {}", username, remote_ip)
                }
                RegisterOutcome::Refreshed => {
                    info!("Peer re-registered: {} from {}", username, remote_ip)
                }
                RegisterOutcome::Replaced {
                    old_ip,
                    old_tcp_port,
                } => warn!(
                    "Replacing peer: {} (old: {}:{}, new: {}:{})",
                    username, old_ip, old_tcp_port, remote_ip, tcp_port
                ),
            }
            ServerResponse::success("Registered successfully")
        }

        ServerRequest::Unregister { username } => {
            if registry.unregister(&username) {
                info!("Peer unregistered: {}", username);
            }
            ServerResponse::success("Unregistered successfully")
        }

        ServerRequest::List { username } => {
            // The sweep runs synchronously with the list request, so its
            // latency is bounded by stale-peer-count x probe-timeout.
            if registry.len() > 1 {
                sweep_stale_peers(&mut registry).await;
            }
            let peers = registry.list_excluding(&username);
            info!(
                "Peer list requested by: {} ({} active peers)",
                username,
                peers.len()
            );
            ServerResponse::peer_list(peers)
        }
    }
}

fn invalid_request_response(value: &serde_json::Value) -> ServerResponse {
    match value.get("type").and_then(|t| t.as_str()) {
        Some("register") => ServerResponse::error("Missing registration fields"),
        Some("unregister") | Some("list") => ServerResponse::error("Missing username"),
        _ => ServerResponse::error("Unknown message type"),
    }
}

/// Probe every peer past the staleness threshold and evict the unreachable.
async fn sweep_stale_peers(registry: &mut PeerRegistry) {
    for (username, ip, tcp_port) in registry.stale_candidates(STALE_PEER_THRESHOLD) {
        if !peer_reachable(ip, tcp_port).await {
            registry.remove(&username);
            info!("Removed stale peer: {} (unreachable)", username);
        } else {
            debug!("Stale peer {} still reachable, keeping", username);
        }
    }
}

async fn peer_reachable(ip: IpAddr, tcp_port: u16) -> bool {
    matches!(
        tokio::time::timeout(PEER_PROBE_TIMEOUT, TcpStream::connect((ip, tcp_port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn send_raw(addr: SocketAddr, payload: &[u8]) -> Value {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut buf = vec![0u8; REQUEST_BUFFER_SIZE];
        let n = stream.read(&mut buf).await.unwrap();
        serde_json::from_slice(&buf[..n]).unwrap()
    }

    async fn send_json(addr: SocketAddr, payload: Value) -> Value {
        send_raw(addr, &serde_json::to_vec(&payload).unwrap()).await
    }

    fn register(username: &str, tcp_port: u16, udp_port: u16) -> Value {
        json!({"type": "register", "username": username, "tcp_port": tcp_port, "udp_port": udp_port})
    }

    #[tokio::test]
    async fn register_and_list_round_trip() {
        let mut server = DiscoveryServer::new();
        let addr = server.start(0).await.unwrap();

        let resp = send_json(addr, register("alice", 5001, 6001)).await;
        assert_eq!(resp["status"], "success");
        send_json(addr, register("bob", 5002, 6002)).await;

        let resp = send_json(addr, json!({"type": "list", "username": "bob"})).await;
        assert_eq!(resp["status"], "success");
        let peers = resp["peers"].as_object().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers["alice"]["tcp_port"], 5001);
        assert_eq!(peers["alice"]["udp_port"], 6001);

        server.stop().await;
    }

    #[tokio::test]
    async fn unregister_is_idempotent_over_the_wire() {
        let mut server = DiscoveryServer::new();
        let addr = server.start(0).await.unwrap();

        send_json(addr, register("alice", 5001, 6001)).await;
        for _ in 0..2 {
            let resp = send_json(addr, json!({"type": "unregister", "username": "alice"})).await;
            assert_eq!(resp["status"], "success");
        }
        let resp = send_json(addr, json!({"type": "unregister", "username": "ghost"})).await;
        assert_eq!(resp["status"], "success");

        server.stop().await;
    }

    #[tokio::test]
    async fn malformed_requests_get_error_responses() {
        let mut server = DiscoveryServer::new();
        let addr = server.start(0).await.unwrap();

        let resp = send_raw(addr, b"this is not json").await;
        assert_eq!(resp["status"], "error");
        assert_eq!(resp["message"], "Invalid JSON");

        let resp = send_json(addr, json!({"type": "register", "username": "alice"})).await;
        assert_eq!(resp["status"], "error");
        assert_eq!(resp["message"], "Missing registration fields");

        let resp = send_json(addr, json!({"type": "teleport", "username": "alice"})).await;
        assert_eq!(resp["status"], "error");
        assert_eq!(resp["message"], "Unknown message type");

        // The listener survives all of the above.
        let resp = send_json(addr, register("alice", 5001, 6001)).await;
        assert_eq!(resp["status"], "success");

        server.stop().await;
    }

    #[tokio::test]
    async fn stale_unreachable_peer_is_evicted() {
        let mut server = DiscoveryServer::new();
        let addr = server.start(0).await.unwrap();

        // A port with nothing listening on it.
        let dead_port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        // A port that stays reachable for the duration of the test.
        let live_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live_port = live_listener.local_addr().unwrap().port();

        send_json(addr, register("ghost", dead_port, 6001)).await;
        send_json(addr, register("sleeper", live_port, 6002)).await;
        send_json(addr, register("requester", dead_port, 6003)).await;

        {
            let mut registry = server.registry.lock().await;
            registry.backdate("ghost", Duration::from_secs(60));
            registry.backdate("sleeper", Duration::from_secs(60));
        }

        let resp = send_json(addr, json!({"type": "list", "username": "requester"})).await;
        let peers = resp["peers"].as_object().unwrap();
        assert!(!peers.contains_key("ghost"), "stale unreachable peer kept");
        assert!(peers.contains_key("sleeper"), "stale reachable peer evicted");

        server.stop().await;
    }

    #[tokio::test]
    async fn fresh_peer_is_never_probed() {
        let mut server = DiscoveryServer::new();
        let addr = server.start(0).await.unwrap();

        let dead_port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        // Both peers advertise unreachable ports, but neither is past the
        // staleness threshold, so the sweep leaves them alone.
        send_json(addr, register("alice", dead_port, 6001)).await;
        send_json(addr, register("bob", dead_port, 6002)).await;

        let resp = send_json(addr, json!({"type": "list", "username": "bob"})).await;
        assert!(resp["peers"].as_object().unwrap().contains_key("alice"));

        server.stop().await;
    }
}
