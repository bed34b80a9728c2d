//! Protocol constants shared by the discovery server and peer clients.

use std::time::Duration;

/// Default TCP port for the discovery server.
pub const DEFAULT_SERVER_PORT: u16 = 9099;

/// Maximum size of a single JSON request/response on the TCP side.
pub const REQUEST_BUFFER_SIZE: usize = 4096;

/// Receive buffer for UDP datagrams. Must comfortably hold a file chunk
/// after base64 expansion plus the JSON envelope.
pub const DATAGRAM_BUFFER_SIZE: usize = 8192;

/// Raw bytes read from disk per file-transfer chunk.
pub const FILE_CHUNK_SIZE: usize = 2048;

/// How long a registered peer may go without contacting the server before
/// the list handler probes its chat port for liveness.
pub const STALE_PEER_THRESHOLD: Duration = Duration::from_secs(30);

/// Connect timeout for a single liveness probe.
pub const PEER_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// An inbound file transfer that sees no datagram for this long is
/// considered abandoned and dropped by the sweep.
pub const TRANSFER_EXPIRY: Duration = Duration::from_secs(60);

/// How often the abandoned-transfer sweep runs.
pub const TRANSFER_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Passphrase used when none is configured. Interoperability default, not a
/// secret; override via `PEERLINK_PASSPHRASE` or `NetworkConfig`.
pub const DEFAULT_PASSPHRASE: &str = "peerlink-default-key-2025";

/// Fixed KDF salt. Independently configured peers must derive the same key
/// from the same passphrase, so this is deliberately not per-installation.
pub const KDF_SALT: &[u8] = b"peerlink-salt-2025";

/// PBKDF2 iteration count for passphrase key derivation.
pub const KDF_ITERATIONS: u32 = 100_000;
