//! Packet dispatch and fan-out for the server.
//!
//! Handlers run to completion for one frame before the event loop moves on,
//! so registry mutations made here are atomic with respect to every other
//! connection's events.

use crate::protocol::{Channel, Chat, CommandKind, Name, Packet, ProtocolError};
use crate::runtime::Buffer;
use crate::server::registry::{Session, SessionRegistry};
use tracing::{debug, info, trace, warn};

/// What the event loop should do with the sender after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Disconnect,
}

/// Notice sent to a session that talks before logging in.
pub const LOGIN_REQUIRED: &str = "Send Login Packet";

/// Notice sent to a connection turned away at capacity.
pub const SERVER_FULL: &str = "Server is full.";

/// Frames written to a connection rejected because the server is full: a
/// notice followed by a logout.
pub fn rejection_frames() -> [Buffer; 2] {
    [
        Packet::server_notice(SERVER_FULL).encode(),
        Packet::server_logout().encode(),
    ]
}

/// Decode and dispatch a completed frame from session `key`.
pub fn on_frame<S>(registry: &mut SessionRegistry<S>, key: usize, frame: &Buffer) -> Outcome {
    match Packet::decode(frame) {
        Ok(packet) => dispatch(registry, key, packet),
        Err(e) => {
            warn!(conn_id = key, error = %e, "Dropping undecodable frame");
            Outcome::Continue
        }
    }
}

/// Apply protocol semantics for one packet from session `key`.
pub fn dispatch<S>(registry: &mut SessionRegistry<S>, key: usize, packet: Packet) -> Outcome {
    let session = match registry.get_mut(key) {
        Some(session) => session,
        None => return Outcome::Continue,
    };

    if !session.logged_in && !matches!(packet, Packet::Login { .. }) {
        debug!(
            conn_id = key,
            packet_type = ?packet.packet_type(),
            "Packet before login dropped"
        );
        session.send(&Packet::server_notice(LOGIN_REQUIRED).encode());
        return Outcome::Continue;
    }

    match packet {
        Packet::Login { name, .. } => handle_login(registry, key, name),
        Packet::Chat(chat) => handle_chat(registry, key, chat),
        Packet::Command { command, channel } => handle_command(registry, key, command, channel),
        Packet::Logout { .. } => return Outcome::Disconnect,
        Packet::NameId { client_id, .. } => {
            trace!(conn_id = key, client_id, "Ignoring NameId from client");
        }
    }

    Outcome::Continue
}

/// Remove session `key` and tell everyone left that it is gone.
///
/// Returns the removed session so the caller can release its socket.
pub fn disconnect<S>(registry: &mut SessionRegistry<S>, key: usize) -> Option<Session<S>> {
    let session = registry.remove(key)?;
    let logout = Packet::Logout {
        client_id: session.id,
    }
    .encode();
    let notified = registry.broadcast_all(&logout, None);

    info!(
        client_id = session.id,
        name = %session.name,
        notified,
        "Client disconnected"
    );
    Some(session)
}

fn handle_login<S>(registry: &mut SessionRegistry<S>, key: usize, name: Name) {
    let id = match registry.get_mut(key) {
        Some(session) => {
            session.name = name;
            session.logged_in = true;
            session.id
        }
        None => return,
    };

    let login = Packet::Login {
        client_id: id,
        name,
    }
    .encode();
    registry.broadcast_all(&login, None);

    // Warm the newcomer's peer cache with everyone already here
    let peers: Vec<Buffer> = registry
        .iter()
        .filter(|(other, session)| *other != key && session.logged_in)
        .map(|(_, session)| {
            Packet::NameId {
                client_id: session.id,
                name: session.name,
            }
            .encode()
        })
        .collect();
    for frame in &peers {
        registry.send_to(key, frame);
    }

    info!(client_id = id, name = %name, "[NOTICE] {} logged in.", name);
}

fn handle_chat<S>(registry: &mut SessionRegistry<S>, key: usize, mut chat: Chat) {
    let (from, sender_name) = match registry.get(key) {
        Some(session) => (session.id, session.name),
        None => return,
    };
    chat.from = from;

    match chat.channel {
        Channel::Private => match registry.key_for_id(chat.to) {
            Some(target) => {
                let frame = Packet::Chat(chat).encode();
                registry.send_to(target, &frame);
                let target_name = registry
                    .get(target)
                    .map(|session| session.name)
                    .unwrap_or_default();
                info!("{}->{}: {}", sender_name, target_name, chat.message);
            }
            None => {
                debug!(from, to = chat.to, "Private message to unknown id dropped");
            }
        },
        Channel::Global => {
            let frame = Packet::Chat(chat).encode();
            registry.broadcast_all(&frame, Some(key));
            info!("[Global] {}: {}", sender_name, chat.message);
        }
        Channel::Server => {
            info!("{}->Server : {}", sender_name, chat.message);
        }
        channel => {
            let frame = Packet::Chat(chat).encode();
            registry.broadcast_channel(&frame, channel, Some(key));
            match channel {
                Channel::Ios => info!("[iOS] {}: {}", sender_name, chat.message),
                Channel::Android => info!("[Android] {}: {}", sender_name, chat.message),
                _ => info!(channel = %channel, "{}: {}", sender_name, chat.message),
            }
        }
    }
}

fn handle_command<S>(
    registry: &mut SessionRegistry<S>,
    key: usize,
    command: CommandKind,
    channel: Channel,
) {
    match command {
        CommandKind::Switch => {
            if let Some(session) = registry.get_mut(key) {
                session.channel = channel;
                debug!(client_id = session.id, channel = %channel, "Channel switched");
            }
        }
        CommandKind::List => {
            let mut lines = vec![format!("List for channel {}", channel)];
            lines.extend(
                registry
                    .iter()
                    .filter(|(other, session)| {
                        *other != key
                            && session.logged_in
                            && (channel == Channel::Global || session.channel == channel)
                    })
                    .map(|(_, session)| format!("{} : {}", session.name, session.id)),
            );
            for line in &lines {
                registry.send_to(key, &Packet::server_notice(line).encode());
            }
        }
        CommandKind::Unknown(byte) => {
            debug!(conn_id = key, command = byte, "Unknown command ignored");
        }
    }
}

/// Handle a dropped type byte. A session that has not logged in is still
/// reminded to log in.
pub fn on_unknown_type<S>(registry: &mut SessionRegistry<S>, key: usize, byte: u8) {
    debug!(
        conn_id = key,
        error = %ProtocolError::UnknownPacketType(byte),
        "Discarded byte"
    );

    if let Some(session) = registry.get_mut(key) {
        if !session.logged_in {
            session.send(&Packet::server_notice(LOGIN_REQUIRED).encode());
        }
    }
}
