pub mod config;
pub mod crypto;
pub mod networking;
pub mod server;

// Re-export key components for easier access
pub use crypto::MessageCipher;
pub use networking::events::{Event, EventCallback};
pub use networking::manager::{NetworkConfig, NetworkManager};
pub use server::DiscoveryServer;
