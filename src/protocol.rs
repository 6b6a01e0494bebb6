//! Binary chat protocol codec.
//!
//! Every frame starts with a one-byte packet type, and the type alone fixes
//! the total frame length, so the stream needs no length prefix:
//!
//! ```text
//! type  name    size  layout (offset:len)
//! 0x00  Chat      44  0:1 type, 1:1 channel, 2:1 from, 3:1 to, 4:40 message
//! 0x01  Login     17  0:1 type, 1:1 client id, 2:15 name
//! 0x02  Logout     2  0:1 type, 1:1 client id
//! 0x03  Command    3  0:1 type, 1:1 command id, 2:1 channel
//! 0x04  NameId    17  0:1 type, 1:1 client id, 2:15 name
//! ```
//!
//! Text fields are zero-padded and not necessarily zero-terminated: a field
//! filled to its full width has no terminator, so `FixedText` carries an
//! explicit length instead of relying on one.

use crate::runtime::{Buffer, BufferError};
use std::borrow::Cow;
use tracing::warn;

/// Width of the name field in Login and NameId frames.
pub const NAME_LEN: usize = 15;

/// Width of the message field in Chat frames.
pub const MESSAGE_LEN: usize = 40;

/// Client id used by senders that don't know their id yet, and by the
/// server for its own notices.
pub const PLACEHOLDER_ID: u8 = 0xFF;

mod offset {
    pub const CHAT_CHANNEL: usize = 1;
    pub const CHAT_FROM: usize = 2;
    pub const CHAT_TO: usize = 3;
    pub const CHAT_MESSAGE: usize = 4;

    pub const CLIENT_ID: usize = 1;
    pub const NAME: usize = 2;

    pub const COMMAND_ID: usize = 1;
    pub const COMMAND_CHANNEL: usize = 2;
}

/// Packet discriminant carried in byte 0 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Chat = 0x00,
    Login = 0x01,
    Logout = 0x02,
    Command = 0x03,
    NameId = 0x04,
}

impl PacketType {
    /// Look up a type byte. Unknown types have no frame.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(PacketType::Chat),
            0x01 => Some(PacketType::Login),
            0x02 => Some(PacketType::Logout),
            0x03 => Some(PacketType::Command),
            0x04 => Some(PacketType::NameId),
            _ => None,
        }
    }

    /// Total frame size including the type byte.
    pub fn frame_size(self) -> usize {
        match self {
            PacketType::Chat => 4 + MESSAGE_LEN,
            PacketType::Login | PacketType::NameId => 2 + NAME_LEN,
            PacketType::Logout => 2,
            PacketType::Command => 3,
        }
    }

    /// Allocate an accumulation frame with the type byte already written.
    ///
    /// The frame is in write mode with the cursor just past byte 0.
    pub fn allocate(self) -> Buffer {
        let mut frame = Buffer::new(self.frame_size());
        frame.chunk_mut()[0] = self as u8;
        frame.advance(1);
        frame
    }
}

/// Allocate the frame a type byte announces, or report it as unknown.
pub fn frame_for(type_byte: u8) -> Result<Buffer, ProtocolError> {
    PacketType::from_byte(type_byte)
        .map(PacketType::allocate)
        .ok_or(ProtocolError::UnknownPacketType(type_byte))
}

/// Single-byte chat topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Global,
    Ios,
    Android,
    Private,
    /// Server notices. Never relayed when a client sends it.
    Server,
    /// Any other byte. Relayed like a platform channel.
    Other(u8),
}

impl Channel {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'g' => Channel::Global,
            b'i' => Channel::Ios,
            b'a' => Channel::Android,
            b'p' => Channel::Private,
            b's' => Channel::Server,
            other => Channel::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Channel::Global => b'g',
            Channel::Ios => b'i',
            Channel::Android => b'a',
            Channel::Private => b'p',
            Channel::Server => b's',
            Channel::Other(byte) => byte,
        }
    }

    /// Channels a client may switch to.
    pub fn is_selectable(self) -> bool {
        matches!(self, Channel::Global | Channel::Ios | Channel::Android)
    }
}

impl Default for Channel {
    fn default() -> Self {
        Channel::Global
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

/// Command carried by a Command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Switch the sender's channel.
    Switch,
    /// List sessions on a channel.
    List,
    Unknown(u8),
}

impl CommandKind {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => CommandKind::Switch,
            0x01 => CommandKind::List,
            other => CommandKind::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            CommandKind::Switch => 0x00,
            CommandKind::List => 0x01,
            CommandKind::Unknown(byte) => byte,
        }
    }
}

/// Zero-padded fixed-width text field with an explicit length.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedText<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

/// Display name as carried by Login and NameId frames.
pub type Name = FixedText<NAME_LEN>;

/// Chat message as carried by Chat frames.
pub type Message = FixedText<MESSAGE_LEN>;

impl<const N: usize> FixedText<N> {
    pub fn empty() -> Self {
        Self {
            bytes: [0; N],
            len: 0,
        }
    }

    /// Copy `bytes` into the field, or `None` if they exceed the width.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > N {
            return None;
        }
        let mut field = Self::empty();
        field.bytes[..bytes.len()].copy_from_slice(bytes);
        field.len = bytes.len();
        Some(field)
    }

    /// Read a field off the wire. The text ends at the first zero byte or at
    /// the field width, whichever comes first.
    pub fn from_wire(raw: &[u8]) -> Self {
        let raw = &raw[..raw.len().min(N)];
        let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let mut field = Self::empty();
        field.bytes[..len].copy_from_slice(&raw[..len]);
        field.len = len;
        field
    }

    /// Copy as much of `text` as fits, cutting at a character boundary.
    ///
    /// Returns the field and whether anything was cut.
    pub fn truncated(text: &str) -> (Self, bool) {
        if text.len() <= N {
            return (Self::from_wire(text.as_bytes()), false);
        }
        let mut end = N;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        (Self::from_wire(&text.as_bytes()[..end]), true)
    }

    /// Text bytes without padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Full padded field as written to the wire.
    pub fn wire(&self) -> &[u8; N] {
        &self.bytes
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl FixedText<NAME_LEN> {
    /// Validate a display name for sending.
    pub fn name(text: &str) -> Result<Self, ProtocolError> {
        Self::from_bytes(text.as_bytes()).ok_or(ProtocolError::NameTooLong { len: text.len() })
    }
}

impl FixedText<MESSAGE_LEN> {
    /// Validate a chat message for sending.
    pub fn message(text: &str) -> Result<Self, ProtocolError> {
        Self::from_bytes(text.as_bytes())
            .ok_or(ProtocolError::MessageTooLong { len: text.len() })
    }
}

impl<const N: usize> Default for FixedText<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> std::fmt::Debug for FixedText<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl<const N: usize> std::fmt::Display for FixedText<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// Body of a Chat frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chat {
    pub channel: Channel,
    pub from: u8,
    /// Recipient id, meaningful only on the private channel.
    pub to: u8,
    pub message: Message,
}

/// A decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    Chat(Chat),
    Login { client_id: u8, name: Name },
    Logout { client_id: u8 },
    Command { command: CommandKind, channel: Channel },
    NameId { client_id: u8, name: Name },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Chat(_) => PacketType::Chat,
            Packet::Login { .. } => PacketType::Login,
            Packet::Logout { .. } => PacketType::Logout,
            Packet::Command { .. } => PacketType::Command,
            Packet::NameId { .. } => PacketType::NameId,
        }
    }

    /// Server-originated notice on the server channel.
    ///
    /// Text past the message width is cut and logged.
    pub fn server_notice(text: &str) -> Packet {
        let (message, cut) = Message::truncated(text);
        if cut {
            warn!(text, sent = %message, "Server notice truncated");
        }
        Packet::Chat(Chat {
            channel: Channel::Server,
            from: PLACEHOLDER_ID,
            to: PLACEHOLDER_ID,
            message,
        })
    }

    /// Logout sent by the server to a connection it is turning away.
    pub fn server_logout() -> Packet {
        Packet::Logout {
            client_id: PLACEHOLDER_ID,
        }
    }

    /// Encode into a frame ready for the write queue (read mode).
    pub fn encode(&self) -> Buffer {
        let packet_type = self.packet_type();
        let mut raw = vec![0u8; packet_type.frame_size()];
        raw[0] = packet_type as u8;

        match self {
            Packet::Chat(chat) => {
                raw[offset::CHAT_CHANNEL] = chat.channel.as_byte();
                raw[offset::CHAT_FROM] = chat.from;
                raw[offset::CHAT_TO] = chat.to;
                raw[offset::CHAT_MESSAGE..].copy_from_slice(chat.message.wire());
            }
            Packet::Login { client_id, name } | Packet::NameId { client_id, name } => {
                raw[offset::CLIENT_ID] = *client_id;
                raw[offset::NAME..].copy_from_slice(name.wire());
            }
            Packet::Logout { client_id } => {
                raw[offset::CLIENT_ID] = *client_id;
            }
            Packet::Command { command, channel } => {
                raw[offset::COMMAND_ID] = command.as_byte();
                raw[offset::COMMAND_CHANNEL] = channel.as_byte();
            }
        }

        Buffer::filled(&raw)
    }

    /// Decode a complete frame.
    ///
    /// Only the bytes `0..limit` are trusted; the frame must have been
    /// flipped after accumulation.
    pub fn decode(frame: &Buffer) -> Result<Packet, ProtocolError> {
        let type_byte = frame.get_at(0)?;
        let packet_type =
            PacketType::from_byte(type_byte).ok_or(ProtocolError::UnknownPacketType(type_byte))?;

        if frame.limit() != packet_type.frame_size() {
            return Err(ProtocolError::IncompleteFrame {
                packet_type,
                received: frame.limit(),
            });
        }

        let packet = match packet_type {
            PacketType::Chat => Packet::Chat(Chat {
                channel: Channel::from_byte(frame.get_at(offset::CHAT_CHANNEL)?),
                from: frame.get_at(offset::CHAT_FROM)?,
                to: frame.get_at(offset::CHAT_TO)?,
                message: Message::from_wire(frame.slice_at(offset::CHAT_MESSAGE, MESSAGE_LEN)?),
            }),
            PacketType::Login => Packet::Login {
                client_id: frame.get_at(offset::CLIENT_ID)?,
                name: Name::from_wire(frame.slice_at(offset::NAME, NAME_LEN)?),
            },
            PacketType::NameId => Packet::NameId {
                client_id: frame.get_at(offset::CLIENT_ID)?,
                name: Name::from_wire(frame.slice_at(offset::NAME, NAME_LEN)?),
            },
            PacketType::Logout => Packet::Logout {
                client_id: frame.get_at(offset::CLIENT_ID)?,
            },
            PacketType::Command => Packet::Command {
                command: CommandKind::from_byte(frame.get_at(offset::COMMAND_ID)?),
                channel: Channel::from_byte(frame.get_at(offset::COMMAND_CHANNEL)?),
            },
        };

        Ok(packet)
    }
}

/// Codec and input validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Type byte not in the schema table.
    UnknownPacketType(u8),
    /// Display name wider than the name field.
    NameTooLong { len: usize },
    /// Message wider than the message field.
    MessageTooLong { len: usize },
    /// Frame handed to the decoder before all of its bytes arrived.
    IncompleteFrame {
        packet_type: PacketType,
        received: usize,
    },
    /// Field access outside the frame.
    Frame(BufferError),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::UnknownPacketType(byte) => {
                write!(f, "Unknown packet type: {:#04x}", byte)
            }
            ProtocolError::NameTooLong { len } => write!(
                f,
                "Name is {} bytes, names can be at most {} bytes",
                len, NAME_LEN
            ),
            ProtocolError::MessageTooLong { len } => write!(
                f,
                "Message is {} bytes, messages can be at most {} bytes",
                len, MESSAGE_LEN
            ),
            ProtocolError::IncompleteFrame {
                packet_type,
                received,
            } => write!(
                f,
                "Incomplete {:?} frame: {} of {} bytes",
                packet_type,
                received,
                packet_type.frame_size()
            ),
            ProtocolError::Frame(e) => write!(f, "Malformed frame: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<BufferError> for ProtocolError {
    fn from(e: BufferError) -> Self {
        ProtocolError::Frame(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        assert_eq!(PacketType::Chat.frame_size(), 44);
        assert_eq!(PacketType::Login.frame_size(), 17);
        assert_eq!(PacketType::Logout.frame_size(), 2);
        assert_eq!(PacketType::Command.frame_size(), 3);
        assert_eq!(PacketType::NameId.frame_size(), 17);
    }

    #[test]
    fn test_frame_for_known_type() {
        let frame = frame_for(0x01).unwrap();
        assert_eq!(frame.capacity(), 17);
        assert_eq!(frame.position(), 1);
        assert_eq!(frame.get_at(0), Ok(0x01));
    }

    #[test]
    fn test_frame_for_unknown_type() {
        assert_eq!(
            frame_for(0x7A).unwrap_err(),
            ProtocolError::UnknownPacketType(0x7A)
        );
        assert!(PacketType::from_byte(0x05).is_none());
    }

    #[test]
    fn test_login_encode_layout() {
        let packet = Packet::Login {
            client_id: PLACEHOLDER_ID,
            name: Name::name("Alice").unwrap(),
        };
        let frame = packet.encode();

        assert_eq!(frame.position(), 0);
        assert_eq!(frame.limit(), 17);
        assert_eq!(&frame.as_bytes()[..7], &[0x01, 0xFF, b'A', b'l', b'i', b'c', b'e']);
        assert!(frame.as_bytes()[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_login_decode_name() {
        let mut raw = [0u8; 17];
        raw[0] = 0x01;
        raw[1] = 3;
        raw[2..7].copy_from_slice(b"Alice");

        match Packet::decode(&Buffer::filled(&raw)).unwrap() {
            Packet::Login { client_id, name } => {
                assert_eq!(client_id, 3);
                assert_eq!(name.as_bytes(), b"Alice");
                assert_eq!(name.wire()[5..], [0u8; 10]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_chat_full_width_message_has_explicit_length() {
        let text = "x".repeat(MESSAGE_LEN);
        let packet = Packet::Chat(Chat {
            channel: Channel::Global,
            from: 3,
            to: PLACEHOLDER_ID,
            message: Message::message(&text).unwrap(),
        });
        let frame = packet.encode();
        assert_eq!(frame.limit(), 44);

        match Packet::decode(&frame).unwrap() {
            Packet::Chat(chat) => {
                assert_eq!(chat.message.len(), MESSAGE_LEN);
                assert_eq!(chat.message.to_string_lossy(), text);
                assert_eq!(chat.from, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_command_layout() {
        let frame = Packet::Command {
            command: CommandKind::List,
            channel: Channel::Android,
        }
        .encode();
        assert_eq!(frame.chunk(), &[0x03, 0x01, b'a']);
    }

    #[test]
    fn test_decode_rejects_incomplete_frame() {
        let mut frame = PacketType::Chat.allocate();
        frame.put(b'g').unwrap();
        frame.flip();

        match Packet::decode(&frame) {
            Err(ProtocolError::IncompleteFrame {
                packet_type: PacketType::Chat,
                received: 2,
            }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_name_and_message_limits() {
        assert!(Name::name("fifteen-chars!!").is_ok());
        assert_eq!(
            Name::name("sixteen-chars!!!").unwrap_err(),
            ProtocolError::NameTooLong { len: 16 }
        );
        assert_eq!(
            Message::message(&"m".repeat(41)).unwrap_err(),
            ProtocolError::MessageTooLong { len: 41 }
        );
    }

    #[test]
    fn test_truncated_respects_char_boundary() {
        // 14 ASCII bytes followed by a two-byte character straddling the limit
        let text = format!("{}é", "a".repeat(14));
        let (name, cut) = Name::truncated(&text);
        assert!(cut);
        assert_eq!(name.len(), 14);
        assert_eq!(name.to_string_lossy(), "a".repeat(14));
    }

    #[test]
    fn test_server_notice() {
        match Packet::server_notice("Server is full.") {
            Packet::Chat(chat) => {
                assert_eq!(chat.channel, Channel::Server);
                assert_eq!(chat.from, PLACEHOLDER_ID);
                assert_eq!(chat.to, PLACEHOLDER_ID);
                assert_eq!(chat.message.to_string_lossy(), "Server is full.");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_channel_bytes() {
        for byte in [b'g', b'i', b'a', b'p', b's', b'z'] {
            assert_eq!(Channel::from_byte(byte).as_byte(), byte);
        }
        assert!(Channel::Ios.is_selectable());
        assert!(!Channel::Private.is_selectable());
        assert!(!Channel::Server.is_selectable());
    }
}
