//! select-chat: a single-threaded chat server and client
//!
//! Both sides speak a fixed-frame binary protocol over TCP and share one
//! readiness-driven connection engine:
//! - `serve` runs the server: login, channel fan-out, private messages, lists
//! - `connect` runs the interactive console client
//!
//! Configuration via CLI arguments or TOML file.

mod client;
mod config;
mod protocol;
mod runtime;
mod server;

use config::{Config, Mode};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.mode {
        Mode::Server(ref settings) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();

            info!(
                listen = %settings.listen,
                max_sessions = settings.max_sessions,
                poll_timeout_ms = config.poll_timeout.as_millis() as u64,
                "Starting select-chat server"
            );

            let mut server = server::Server::bind(settings, config.poll_timeout)?;
            if settings.console {
                server.attach_console();
            }
            server.run()?;
        }
        Mode::Client(ref settings) => {
            // stdout carries the chat transcript
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();

            let mut peer = client::Peer::connect(settings, config.poll_timeout)?;
            peer.attach_console();
            peer.run()?;
        }
    }

    Ok(())
}
