//! Console peer client.
//!
//! Registers with the discovery server and drives the networking core from
//! a small stdin command loop. This is a thin presentation shell over the
//! event stream; all protocol work happens in the library.

use anyhow::Result;
use dotenv::dotenv;
use log::warn;
use peerlink::networking::protocol::PeerInfo;
use peerlink::{Event, NetworkConfig, NetworkManager};
use std::collections::HashMap;
use std::env;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let username = match env::args().nth(1) {
        Some(name) => name,
        None => {
            eprintln!("Usage: peerlink <username> [server-ip]");
            std::process::exit(1);
        }
    };
    let server_ip = env::args()
        .nth(2)
        .or_else(|| env::var("PEERLINK_SERVER_IP").ok())
        .unwrap_or_else(|| "127.0.0.1".to_string());

    let mut config = NetworkConfig::new(&username);
    if let Some(port) = env::var("PEERLINK_SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        config.server_port = port;
    }
    if let Ok(passphrase) = env::var("PEERLINK_PASSPHRASE") {
        config.passphrase = passphrase;
    }
    config.event_callback = Some(Arc::new(print_event));

    let mut manager = NetworkManager::start(config).await?;
    println!(
        "Started as '{}' (chat tcp/{}, files udp/{})",
        username,
        manager.tcp_port(),
        manager.udp_port()
    );

    let result = manager.register_with_server(&server_ip).await;
    if !result.is_success() {
        warn!(
            "Registration with {} failed: {}",
            server_ip,
            result.message.unwrap_or_default()
        );
    }

    print_help();

    let mut peers: HashMap<String, PeerInfo> = HashMap::new();
    let mut input = String::new();
    loop {
        input.clear();
        print!("> ");
        std::io::stdout().flush()?;
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(3, ' ');
        match parts.next() {
            Some("peers") => {
                let result = manager.get_peer_list(&server_ip).await;
                if let Some(listed) = result.peers {
                    peers = listed;
                    if peers.is_empty() {
                        println!("No other peers online.");
                    }
                    for (name, info) in &peers {
                        println!("  {} at {} (tcp/{}, udp/{})", name, info.ip, info.tcp_port, info.udp_port);
                    }
                }
            }
            Some("msg") => match (parts.next(), parts.next()) {
                (Some(to), Some(text)) => match peers.get(to) {
                    Some(info) => {
                        manager.send_message(&info.ip, info.tcp_port, text, to).await;
                    }
                    None => println!("Unknown peer '{}'. Run 'peers' first.", to),
                },
                _ => println!("Usage: msg <peer> <text>"),
            },
            Some("send") => match (parts.next(), parts.next()) {
                (Some(to), Some(path)) => match peers.get(to) {
                    Some(info) => {
                        manager.send_file(&info.ip, info.udp_port, Path::new(path)).await;
                    }
                    None => println!("Unknown peer '{}'. Run 'peers' first.", to),
                },
                _ => println!("Usage: send <peer> <path>"),
            },
            Some("help") => print_help(),
            Some("quit") | Some("exit") => break,
            Some(other) => println!("Unknown command '{}'. Try 'help'.", other),
            None => {}
        }
    }

    manager.unregister_from_server(&server_ip).await;
    manager.shutdown().await;
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  peers              refresh and show the online peer list");
    println!("  msg <peer> <text>  send a chat message");
    println!("  send <peer> <path> send a file");
    println!("  quit               unregister and exit");
}

fn print_event(event: Event) {
    match event {
        Event::ChatMessage {
            sender,
            text,
            direction: peerlink::networking::events::Direction::Incoming,
            ..
        } => println!("\n[{}] {}", sender, text),
        Event::ChatMessage { .. } => {}
        Event::Status { level, message } => println!("\n[{:?}] {}", level, message),
        Event::FileStart {
            filename, sender, ..
        } => println!("\nReceiving '{}' from {}...", filename, sender),
        Event::FileProgress {
            filename,
            transferred,
            total,
            ..
        } => {
            if total > 0 && transferred == total {
                println!("\n'{}': {}/{} bytes", filename, transferred, total);
            }
        }
        Event::FileComplete {
            filename,
            save_path,
            sender,
        } => println!(
            "\nReceived '{}' from {} -> {}",
            filename,
            sender,
            save_path.display()
        ),
        Event::RegistrationResult { .. } | Event::PeerListResult { .. } => {}
    }
}
