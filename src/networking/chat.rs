//! TCP chat channel.
//!
//! Outbound sends are fire-and-connect-and-close: every message opens a
//! fresh connection, writes one framed JSON document, and closes. Inbound is
//! a persistent accept loop spawning one handler task per connection.

use log::{debug, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::REQUEST_BUFFER_SIZE;
use crate::crypto::MessageCipher;

use super::events::{Direction, Event, EventSink};
use super::protocol::ChatMessage;

pub struct ChatChannel {
    username: String,
    cipher: Arc<MessageCipher>,
    events: EventSink,
}

impl ChatChannel {
    pub fn new(username: String, cipher: Arc<MessageCipher>, events: EventSink) -> Self {
        Self {
            username,
            cipher,
            events,
        }
    }

    /// Send one encrypted chat message to a peer.
    ///
    /// Failures are reported as a status event; there is no retry. The
    /// outgoing event carries the original plaintext, never the ciphertext.
    pub async fn send(&self, peer_ip: &str, peer_port: u16, plaintext: &str, to: &str) -> bool {
        let ciphertext = match self.cipher.encrypt(plaintext) {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                self.events
                    .status_error(format!("Error encrypting message: {}", e));
                return false;
            }
        };

        let frame = ChatMessage {
            from: self.username.clone(),
            to: to.to_string(),
            text: ciphertext,
        };

        match self.write_frame(peer_ip, peer_port, &frame).await {
            Ok(()) => {
                self.events.emit(Event::ChatMessage {
                    sender: self.username.clone(),
                    recipient: to.to_string(),
                    text: plaintext.to_string(),
                    direction: Direction::Outgoing,
                });
                true
            }
            Err(e) => {
                self.events
                    .status_error(format!("Error sending message to {}: {}", to, e));
                false
            }
        }
    }

    async fn write_frame(
        &self,
        peer_ip: &str,
        peer_port: u16,
        frame: &ChatMessage,
    ) -> anyhow::Result<()> {
        let mut stream = TcpStream::connect((peer_ip, peer_port)).await?;
        stream.write_all(&serde_json::to_vec(frame)?).await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Spawn the persistent accept loop on an already-bound listener.
    pub fn spawn_listener(&self, listener: TcpListener) -> JoinHandle<()> {
        let cipher = self.cipher.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, addr)) => {
                        debug!("New chat connection from {}", addr);
                        let cipher = cipher.clone();
                        let events = events.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, addr, cipher, events).await;
                        });
                    }
                    Err(e) => {
                        warn!("Error accepting chat connection: {}", e);
                    }
                }
            }
        })
    }
}

/// Read chat frames until the remote closes the connection.
///
/// Each read is parsed as one JSON document; anything that does not parse as
/// a chat frame is dropped without tearing down the handler.
async fn handle_connection(
    mut socket: TcpStream,
    addr: SocketAddr,
    cipher: Arc<MessageCipher>,
    events: EventSink,
) {
    let mut buf = vec![0u8; REQUEST_BUFFER_SIZE];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Chat connection from {} errored: {}", addr, e);
                break;
            }
        };

        let frame = match serde_json::from_slice::<ChatMessage>(&buf[..n]) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unparseable chat payload from {}: {}", addr, e);
                continue;
            }
        };

        // Decryption failure falls back to the raw text. Documented
        // behavior inherited from the wire protocol: a peer keyed with a
        // different passphrase shows up as ciphertext, not as an error.
        let text = match cipher.decrypt(&frame.text) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(
                    "Could not decrypt message from {} ({}), passing raw text through",
                    frame.from, e
                );
                frame.text.clone()
            }
        };

        events.emit(Event::ChatMessage {
            sender: frame.from,
            recipient: frame.to,
            text,
            direction: Direction::Incoming,
        });
    }
}
