//! Best-effort chunked file transfer over UDP.
//!
//! The sender streams FILE_START, FILE_CHUNK* and FILE_END datagrams with no
//! acknowledgment, retry, or flow control; chunks are applied in arrival
//! order, so correctness depends on an in-order, lossless link (loopback or
//! an otherwise ideal network). The receiver keeps one session per
//! `(remote address, filename)` key, multiplexed over the single shared UDP
//! socket, and sweeps sessions whose sender went silent without FILE_END.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::config::{FILE_CHUNK_SIZE, TRANSFER_EXPIRY};

use super::events::{Direction, Event, EventSink};
use super::protocol::Datagram;

/// Sessions are keyed by sender address and filename so concurrent inbound
/// transfers never collide, even from the same peer.
pub type TransferKey = (IpAddr, String);

struct IncomingTransfer {
    file: File,
    bytes_received: u64,
    total: u64,
    save_path: PathBuf,
    sender: String,
    last_activity: Instant,
}

/// Inbound side of the transfer protocol: a state machine per key, fed one
/// datagram at a time from the shared receive loop.
pub struct FileReceiver {
    download_dir: PathBuf,
    transfers: Mutex<HashMap<TransferKey, IncomingTransfer>>,
    events: EventSink,
}

impl FileReceiver {
    pub fn new(download_dir: PathBuf, events: EventSink) -> Self {
        Self {
            download_dir,
            transfers: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Process one raw datagram. Malformed payloads are dropped.
    pub async fn handle_datagram(&self, data: &[u8], remote: SocketAddr) {
        let datagram = match serde_json::from_slice::<Datagram>(data) {
            Ok(datagram) => datagram,
            Err(e) => {
                debug!("Ignoring non-protocol datagram from {}: {}", remote, e);
                return;
            }
        };

        match datagram {
            Datagram::FileStart {
                filename,
                size,
                from,
            } => self.handle_start(remote, filename, size, from).await,
            Datagram::FileChunk { filename, data } => {
                self.handle_chunk(remote, filename, &data).await
            }
            Datagram::FileEnd { filename } => self.handle_end(remote, filename).await,
        }
    }

    async fn handle_start(&self, remote: SocketAddr, filename: String, size: u64, from: String) {
        // Strip any path components a hostile sender smuggled in.
        let safe_name = match Path::new(&filename).file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => {
                warn!("Ignoring file start with unusable filename from {}", remote);
                return;
            }
        };
        let save_path = self.download_dir.join(format!("received_{}", safe_name));

        let file = match File::create(&save_path) {
            Ok(file) => file,
            Err(e) => {
                self.events.status_error(format!(
                    "Could not open {} for writing: {}",
                    save_path.display(),
                    e
                ));
                return;
            }
        };

        info!(
            "Incoming file '{}' ({} bytes) from {} ({})",
            filename, size, from, remote
        );
        self.events.emit(Event::FileStart {
            filename: filename.clone(),
            total: size,
            sender: from.clone(),
            save_path: save_path.clone(),
        });

        let key = (remote.ip(), filename);
        let mut transfers = self.transfers.lock().await;
        // A repeated start for the same key replaces the old session; the
        // previous partial file handle is dropped here.
        if transfers
            .insert(
                key,
                IncomingTransfer {
                    file,
                    bytes_received: 0,
                    total: size,
                    save_path,
                    sender: from,
                    last_activity: Instant::now(),
                },
            )
            .is_some()
        {
            warn!("Restarted in-progress transfer from {}", remote);
        }
    }

    async fn handle_chunk(&self, remote: SocketAddr, filename: String, data: &str) {
        let mut transfers = self.transfers.lock().await;
        // Chunks without a preceding start are silently discarded: there is
        // no buffering and no retransmission request in this protocol.
        let transfer = match transfers.get_mut(&(remote.ip(), filename.clone())) {
            Some(transfer) => transfer,
            None => return,
        };

        let chunk = match STANDARD.decode(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Dropping undecodable chunk for '{}': {}", filename, e);
                return;
            }
        };

        if let Err(e) = transfer.file.write_all(&chunk) {
            self.events
                .status_error(format!("Error writing chunk of '{}': {}", filename, e));
            return;
        }
        transfer.bytes_received += chunk.len() as u64;
        transfer.last_activity = Instant::now();

        self.events.emit(Event::FileProgress {
            filename,
            transferred: transfer.bytes_received,
            total: transfer.total,
            direction: Direction::Incoming,
        });
    }

    async fn handle_end(&self, remote: SocketAddr, filename: String) {
        let mut transfers = self.transfers.lock().await;
        // An end for an unknown key is ignored.
        let transfer = match transfers.remove(&(remote.ip(), filename.clone())) {
            Some(transfer) => transfer,
            None => return,
        };
        drop(transfers);

        info!(
            "Completed file '{}' from {} ({} of {} bytes)",
            filename, transfer.sender, transfer.bytes_received, transfer.total
        );
        self.events.emit(Event::FileComplete {
            filename,
            save_path: transfer.save_path,
            sender: transfer.sender,
        });
    }

    /// Drop sessions whose sender went silent without a FILE_END.
    pub async fn sweep_expired(&self) {
        self.sweep_older_than(TRANSFER_EXPIRY).await;
    }

    pub(crate) async fn sweep_older_than(&self, expiry: Duration) {
        let now = Instant::now();
        let mut abandoned = Vec::new();

        let mut transfers = self.transfers.lock().await;
        transfers.retain(|(_, filename), transfer| {
            if now.duration_since(transfer.last_activity) >= expiry {
                abandoned.push((filename.clone(), transfer.sender.clone()));
                false
            } else {
                true
            }
        });
        drop(transfers);

        for (filename, sender) in abandoned {
            warn!("Dropping abandoned transfer '{}' from {}", filename, sender);
            self.events.status_error(format!(
                "Transfer of '{}' from {} abandoned: no data received",
                filename, sender
            ));
        }
    }

    pub async fn active_transfers(&self) -> usize {
        self.transfers.lock().await.len()
    }
}

/// Stream a file to a peer: FILE_START, fixed-size base64 chunks, FILE_END.
///
/// Fire-and-forget in both directions; every failure is reported as a status
/// event and ends the send.
pub async fn send_file(
    socket: &UdpSocket,
    target: SocketAddr,
    username: &str,
    path: &Path,
    events: &EventSink,
) -> bool {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => {
            events.status_error(format!("File not found: {}", path.display()));
            return false;
        }
    };
    let total = metadata.len();
    let filename = match path.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        None => {
            events.status_error(format!("Invalid file path: {}", path.display()));
            return false;
        }
    };

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            events.status_error(format!("Could not open {}: {}", path.display(), e));
            return false;
        }
    };

    let start = Datagram::FileStart {
        filename: filename.clone(),
        size: total,
        from: username.to_string(),
    };
    if let Err(e) = send_datagram(socket, target, &start).await {
        events.status_error(format!("Error sending file start: {}", e));
        return false;
    }

    let mut buf = vec![0u8; FILE_CHUNK_SIZE];
    let mut bytes_sent = 0u64;
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                events.status_error(format!("Error reading {}: {}", path.display(), e));
                return false;
            }
        };

        let chunk = Datagram::FileChunk {
            filename: filename.clone(),
            data: STANDARD.encode(&buf[..n]),
        };
        if let Err(e) = send_datagram(socket, target, &chunk).await {
            events.status_error(format!("Error sending file chunk: {}", e));
            return false;
        }

        bytes_sent += n as u64;
        events.emit(Event::FileProgress {
            filename: filename.clone(),
            transferred: bytes_sent,
            total,
            direction: Direction::Outgoing,
        });
    }

    let end = Datagram::FileEnd {
        filename: filename.clone(),
    };
    if let Err(e) = send_datagram(socket, target, &end).await {
        events.status_error(format!("Error sending file end: {}", e));
        return false;
    }

    info!("Sent file '{}' ({} bytes) to {}", filename, bytes_sent, target);
    events.status_info(format!("File sent: {}", filename));
    true
}

async fn send_datagram(
    socket: &UdpSocket,
    target: SocketAddr,
    datagram: &Datagram,
) -> anyhow::Result<()> {
    socket.send_to(&serde_json::to_vec(datagram)?, target).await?;
    Ok(())
}
