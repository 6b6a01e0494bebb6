//! Single-threaded readiness runtime shared by server and client.
//!
//! Building blocks:
//! - `Buffer`: fixed-capacity byte cursor holding one frame
//! - `Connection`: framing state machine plus outbound queue
//! - `Console`: stdin polled through the same `mio::Poll`

mod buffer;
mod connection;
mod console;
#[cfg(test)]
pub(crate) mod mock;

pub use buffer::{Buffer, BufferError};
pub use connection::{Connection, ReadEvent, WriteEvent};
pub use console::Console;

use mio::Token;
use std::io;
use std::net::SocketAddr;

/// Token for the listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Token for stdin.
pub const CONSOLE_TOKEN: Token = Token(usize::MAX - 1);

/// Create a non-blocking TCP listener.
pub fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    Ok(socket.into())
}
