//! In-memory peer directory. Pure data structure: the server owns it behind
//! a mutex and performs all network I/O (liveness probes) itself.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::networking::protocol::PeerInfo;

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub ip: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub last_seen: Instant,
}

/// Outcome of a registration, so the server can log silent identity
/// replacement distinctly from a plain reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    New,
    Refreshed,
    Replaced { old_ip: IpAddr, old_tcp_port: u16 },
}

#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a peer record. Last registration wins.
    pub fn register(
        &mut self,
        username: &str,
        ip: IpAddr,
        tcp_port: u16,
        udp_port: u16,
    ) -> RegisterOutcome {
        let outcome = match self.peers.get(username) {
            Some(old) if old.ip != ip || old.tcp_port != tcp_port => RegisterOutcome::Replaced {
                old_ip: old.ip,
                old_tcp_port: old.tcp_port,
            },
            Some(_) => RegisterOutcome::Refreshed,
            None => RegisterOutcome::New,
        };

        self.peers.insert(
            username.to_string(),
            PeerRecord {
                ip,
                tcp_port,
                udp_port,
                last_seen: Instant::now(),
            },
        );
        outcome
    }

    /// Remove a peer. Idempotent; returns whether a record existed.
    pub fn unregister(&mut self, username: &str) -> bool {
        self.peers.remove(username).is_some()
    }

    /// Refresh `last_seen` for a peer making any request.
    pub fn touch(&mut self, username: &str) {
        if let Some(record) = self.peers.get_mut(username) {
            record.last_seen = Instant::now();
        }
    }

    pub fn remove(&mut self, username: &str) {
        self.peers.remove(username);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers not seen within the threshold, as probe targets.
    pub fn stale_candidates(&self, threshold: Duration) -> Vec<(String, IpAddr, u16)> {
        let now = Instant::now();
        self.peers
            .iter()
            .filter(|(_, record)| now.duration_since(record.last_seen) > threshold)
            .map(|(username, record)| (username.clone(), record.ip, record.tcp_port))
            .collect()
    }

    /// Everyone except the requester, in wire form.
    pub fn list_excluding(&self, requester: &str) -> HashMap<String, PeerInfo> {
        self.peers
            .iter()
            .filter(|(username, _)| username.as_str() != requester)
            .map(|(username, record)| {
                (
                    username.clone(),
                    PeerInfo {
                        ip: record.ip.to_string(),
                        tcp_port: record.tcp_port,
                        udp_port: record.udp_port,
                    },
                )
            })
            .collect()
    }

    /// Shift a peer's `last_seen` into the past. Test hook for exercising
    /// the staleness sweep without waiting out the threshold.
    #[cfg(test)]
    pub(crate) fn backdate(&mut self, username: &str, age: Duration) {
        if let Some(record) = self.peers.get_mut(username) {
            if let Some(when) = Instant::now().checked_sub(age) {
                record.last_seen = when;
            }
        }
    }
}
