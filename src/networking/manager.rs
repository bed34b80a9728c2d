//! Composition of the chat channel, file transfer, and discovery-server
//! client calls into the single object the presentation layer talks to.

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

use crate::config::{
    DEFAULT_PASSPHRASE, DEFAULT_SERVER_PORT, DATAGRAM_BUFFER_SIZE, REQUEST_BUFFER_SIZE,
    TRANSFER_SWEEP_INTERVAL,
};
use crate::crypto::MessageCipher;

use super::chat::ChatChannel;
use super::events::{Event, EventCallback, EventSink};
use super::file_transfer::{self, FileReceiver};
use super::protocol::{ServerRequest, ServerResponse};

/// Configuration for a peer's networking core.
pub struct NetworkConfig {
    pub username: String,
    /// TCP port the discovery server listens on.
    pub server_port: u16,
    /// Directory received files are written into.
    pub download_dir: PathBuf,
    /// Shared passphrase the chat cipher key is derived from.
    pub passphrase: String,
    /// Callback receiving the outward event stream.
    pub event_callback: Option<EventCallback>,
}

impl NetworkConfig {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            download_dir: PathBuf::from("."),
            passphrase: DEFAULT_PASSPHRASE.to_string(),
            event_callback: None,
        }
    }
}

/// Owns the peer's TCP chat listener and UDP file socket, both bound to
/// OS-assigned ephemeral ports; the chosen ports are exactly what gets
/// advertised to the discovery server.
pub struct NetworkManager {
    username: String,
    server_port: u16,
    tcp_port: u16,
    udp_port: u16,
    events: EventSink,
    chat: ChatChannel,
    udp_socket: Arc<UdpSocket>,
    tasks: Vec<JoinHandle<()>>,
}

impl NetworkManager {
    /// Bind the sockets and spawn the chat listener, the UDP receive loop,
    /// and the abandoned-transfer sweep.
    pub async fn start(config: NetworkConfig) -> Result<Self> {
        let tcp_listener = TcpListener::bind("0.0.0.0:0")
            .await
            .context("Failed to bind chat listener")?;
        let tcp_port = tcp_listener.local_addr()?.port();

        let udp_socket = Arc::new(
            UdpSocket::bind("0.0.0.0:0")
                .await
                .context("Failed to bind file transfer socket")?,
        );
        let udp_port = udp_socket.local_addr()?.port();

        let events = match config.event_callback {
            Some(callback) => EventSink::new(callback),
            None => EventSink::none(),
        };
        let cipher = Arc::new(MessageCipher::new(&config.passphrase));
        let chat = ChatChannel::new(config.username.clone(), cipher, events.clone());
        let receiver = Arc::new(FileReceiver::new(config.download_dir, events.clone()));

        info!(
            "Network initialized for '{}': chat on tcp/{}, files on udp/{}",
            config.username, tcp_port, udp_port
        );

        let mut tasks = Vec::new();
        tasks.push(chat.spawn_listener(tcp_listener));
        tasks.push(spawn_udp_loop(udp_socket.clone(), receiver.clone()));
        tasks.push(spawn_transfer_sweep(receiver));

        Ok(Self {
            username: config.username,
            server_port: config.server_port,
            tcp_port,
            udp_port,
            events,
            chat,
            udp_socket,
            tasks,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    /// Register this peer with the discovery server. The outcome, including
    /// transport failure, is reported in the emitted event and returned.
    pub async fn register_with_server(&self, server_ip: &str) -> ServerResponse {
        let request = ServerRequest::Register {
            username: self.username.clone(),
            tcp_port: self.tcp_port,
            udp_port: self.udp_port,
        };
        let result = match self.server_request(server_ip, &request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Registration error: {}", e);
                ServerResponse::error(&e.to_string())
            }
        };
        self.events.emit(Event::RegistrationResult {
            result: result.clone(),
        });
        result
    }

    /// Best-effort clean unregister.
    pub async fn unregister_from_server(&self, server_ip: &str) {
        let request = ServerRequest::Unregister {
            username: self.username.clone(),
        };
        if let Err(e) = self.server_request(server_ip, &request).await {
            warn!("Unregister error: {}", e);
        }
    }

    /// Fetch the list of online peers, excluding this one.
    pub async fn get_peer_list(&self, server_ip: &str) -> ServerResponse {
        let request = ServerRequest::List {
            username: self.username.clone(),
        };
        let result = match self.server_request(server_ip, &request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Peer list request error: {}", e);
                ServerResponse::error(&e.to_string())
            }
        };
        self.events.emit(Event::PeerListResult {
            result: result.clone(),
        });
        result
    }

    /// Send one encrypted chat message to a peer.
    pub async fn send_message(
        &self,
        peer_ip: &str,
        peer_tcp_port: u16,
        plaintext: &str,
        to: &str,
    ) -> bool {
        self.chat.send(peer_ip, peer_tcp_port, plaintext, to).await
    }

    /// Stream a file to a peer over UDP. Fire-and-forget; progress and
    /// completion are reported through the event stream.
    pub async fn send_file(&self, peer_ip: &str, peer_udp_port: u16, path: &Path) -> bool {
        let target: SocketAddr = match format!("{}:{}", peer_ip, peer_udp_port).parse() {
            Ok(target) => target,
            Err(e) => {
                self.events
                    .status_error(format!("Invalid peer address {}: {}", peer_ip, e));
                return false;
            }
        };
        file_transfer::send_file(&self.udp_socket, target, &self.username, path, &self.events).await
    }

    /// Stop the listener and sweep tasks. Sockets close when the manager is
    /// dropped.
    pub async fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Network shut down for '{}'", self.username);
    }

    /// One short-lived request/response exchange with the discovery server.
    async fn server_request(
        &self,
        server_ip: &str,
        request: &ServerRequest,
    ) -> Result<ServerResponse> {
        let mut stream = TcpStream::connect((server_ip, self.server_port))
            .await
            .context("Failed to connect to discovery server")?;
        stream.write_all(&serde_json::to_vec(request)?).await?;
        stream.shutdown().await?;

        let mut buf = vec![0u8; REQUEST_BUFFER_SIZE];
        let n = stream.read(&mut buf).await?;
        serde_json::from_slice(&buf[..n]).context("Malformed server response")
    }
}

fn spawn_udp_loop(socket: Arc<UdpSocket>, receiver: Arc<FileReceiver>) -> JoinHandle<()> {
    tokio::spawn(async move {
        // All datagram processing for every concurrent session serializes
        // through this one task.
        let mut buf = vec![0u8; DATAGRAM_BUFFER_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, addr)) => receiver.handle_datagram(&buf[..n], addr).await,
                Err(e) => {
                    error!("UDP receive error: {}", e);
                    break;
                }
            }
        }
    })
}

fn spawn_transfer_sweep(receiver: Arc<FileReceiver>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TRANSFER_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            receiver.sweep_expired().await;
        }
    })
}
