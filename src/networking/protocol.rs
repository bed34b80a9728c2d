//! Wire types for the peerlink protocol.
//!
//! Every message on the wire is a single self-describing UTF-8 JSON document
//! carrying a `type` discriminant. Unknown or malformed payloads fail to
//! parse and are dropped by the listener that received them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Network location of a peer, as handed out by the discovery server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub ip: String,
    pub tcp_port: u16,
    pub udp_port: u16,
}

/// Client-to-server requests over the discovery TCP port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerRequest {
    Register {
        username: String,
        tcp_port: u16,
        udp_port: u16,
    },
    Unregister {
        username: String,
    },
    List {
        username: String,
    },
}

impl ServerRequest {
    /// Username asserted by the request. Identity is re-asserted per call;
    /// the server holds no session state.
    pub fn username(&self) -> &str {
        match self {
            ServerRequest::Register { username, .. } => username,
            ServerRequest::Unregister { username } => username,
            ServerRequest::List { username } => username,
        }
    }
}

/// Server response: `{"status": "success"|"error", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<HashMap<String, PeerInfo>>,
}

impl ServerResponse {
    pub fn success(message: &str) -> Self {
        Self {
            status: "success".to_string(),
            message: Some(message.to_string()),
            peers: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.to_string()),
            peers: None,
        }
    }

    pub fn peer_list(peers: HashMap<String, PeerInfo>) -> Self {
        Self {
            status: "success".to_string(),
            message: None,
            peers: Some(peers),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// One framed chat message on the peer-to-peer TCP side. The `text` field
/// carries ciphertext, never plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "chat")]
pub struct ChatMessage {
    pub from: String,
    pub to: String,
    pub text: String,
}

/// File-transfer control and data packets on the peer-to-peer UDP side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Datagram {
    FileStart {
        filename: String,
        size: u64,
        from: String,
    },
    FileChunk {
        filename: String,
        /// Chunk bytes, base64-encoded for JSON transport.
        data: String,
    },
    FileEnd {
        filename: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_request_wire_shape() {
        let req = ServerRequest::Register {
            username: "alice".to_string(),
            tcp_port: 5001,
            udp_port: 6001,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"type": "register", "username": "alice", "tcp_port": 5001, "udp_port": 6001})
        );
    }

    #[test]
    fn list_request_parses() {
        let req: ServerRequest =
            serde_json::from_str(r#"{"type":"list","username":"bob"}"#).unwrap();
        assert!(matches!(req, ServerRequest::List { ref username } if username == "bob"));
        assert_eq!(req.username(), "bob");
    }

    #[test]
    fn chat_message_wire_shape() {
        let msg = ChatMessage {
            from: "alice".to_string(),
            to: "bob".to_string(),
            text: "ciphertext".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "chat", "from": "alice", "to": "bob", "text": "ciphertext"})
        );
    }

    #[test]
    fn datagram_variants_round_trip_tags() {
        let start: Datagram = serde_json::from_value(
            json!({"type": "file_start", "filename": "a.bin", "size": 42, "from": "alice"}),
        )
        .unwrap();
        assert!(matches!(start, Datagram::FileStart { size: 42, .. }));

        let end = Datagram::FileEnd {
            filename: "a.bin".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&end).unwrap(),
            json!({"type": "file_end", "filename": "a.bin"})
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<Datagram>(r#"{"type":"file_nack","filename":"a"}"#).is_err());
        assert!(serde_json::from_str::<ChatMessage>(r#"{"type":"ping"}"#).is_err());
    }

    #[test]
    fn error_response_omits_peers() {
        let resp = ServerResponse::error("Invalid JSON");
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"status": "error", "message": "Invalid JSON"})
        );
    }
}
