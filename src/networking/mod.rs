pub mod chat;
pub mod events;
pub mod file_transfer;
pub mod manager;
pub mod protocol;

// Re-export key components for easier access
pub use events::{Event, EventCallback, EventSink};
pub use manager::{NetworkConfig, NetworkManager};
pub use protocol::{PeerInfo, ServerResponse};
