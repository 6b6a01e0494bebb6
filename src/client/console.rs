//! Translation of console lines into client actions.
//!
//! Commands:
//! - `/quit`
//! - `/msg <id> <text>`: private message
//! - `/channel <g|i|a>`: switch channel
//! - `/list`: list sessions on the current channel
//! - anything else: chat on the current channel

use crate::protocol::{Channel, Chat, CommandKind, Message, Packet, PLACEHOLDER_ID};

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Quit,
    Private { to: u8, message: Message },
    SwitchChannel(Channel),
    List,
    Say(Message),
    /// Blank line; nothing to send.
    Empty,
}

impl Input {
    /// Frame to send for this input, given the channel selected after it.
    pub fn to_packet(&self, channel: Channel) -> Option<Packet> {
        match *self {
            Input::Quit | Input::Empty => None,
            Input::Private { to, message } => Some(Packet::Chat(Chat {
                channel: Channel::Private,
                from: PLACEHOLDER_ID,
                to,
                message,
            })),
            Input::SwitchChannel(target) => Some(Packet::Command {
                command: CommandKind::Switch,
                channel: target,
            }),
            Input::List => Some(Packet::Command {
                command: CommandKind::List,
                channel,
            }),
            Input::Say(message) => Some(Packet::Chat(Chat {
                channel,
                from: PLACEHOLDER_ID,
                to: PLACEHOLDER_ID,
                message,
            })),
        }
    }
}

/// Rejected console input, shown to the user as a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputError {
    MsgUsage,
    ChannelUsage,
    InvalidChannel,
    MessageTooLong,
}

impl std::fmt::Display for InputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputError::MsgUsage => write!(f, "Usage: /msg [id] [msg]"),
            InputError::ChannelUsage => write!(f, "Usage: /channel [channel]"),
            InputError::InvalidChannel => write!(f, "Valid channels names: g, i, and a."),
            InputError::MessageTooLong => write!(
                f,
                "You can only send messages of {} characters of length.",
                crate::protocol::MESSAGE_LEN
            ),
        }
    }
}

impl std::error::Error for InputError {}

/// Parse one console line.
pub fn parse(line: &str) -> Result<Input, InputError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(Input::Empty);
    }

    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest),
        None => (line, ""),
    };

    match command {
        "/quit" => Ok(Input::Quit),
        "/list" => Ok(Input::List),
        "/msg" => parse_private(rest),
        "/channel" => parse_channel(rest),
        _ => Ok(Input::Say(message(line)?)),
    }
}

fn parse_private(rest: &str) -> Result<Input, InputError> {
    let (id, text) = rest.split_once(' ').ok_or(InputError::MsgUsage)?;
    let to = match id.parse::<u8>() {
        Ok(0) | Err(_) => return Err(InputError::MsgUsage),
        Ok(id) => id,
    };
    if text.is_empty() {
        return Err(InputError::MsgUsage);
    }
    Ok(Input::Private {
        to,
        message: message(text)?,
    })
}

fn parse_channel(rest: &str) -> Result<Input, InputError> {
    let name = rest.split_whitespace().next().ok_or(InputError::ChannelUsage)?;
    let channel = Channel::from_byte(name.as_bytes()[0]);
    if !channel.is_selectable() {
        return Err(InputError::InvalidChannel);
    }
    Ok(Input::SwitchChannel(channel))
}

fn message(text: &str) -> Result<Message, InputError> {
    Message::message(text).map_err(|_| InputError::MessageTooLong)
}
