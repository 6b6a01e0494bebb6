//! Chat client: one connection to the server plus the local console.
//!
//! Uses the same connection engine as the server, with a single session.
//! Received frames update the peer cache and print an annotated line to
//! stdout. Nothing received is ever sent back out.

mod cache;
mod console;

use cache::PeerCache;
use console::Input;

use crate::config::ClientSettings;
use crate::protocol::{Channel, Chat, Packet, PLACEHOLDER_ID};
use crate::runtime::{Connection, Console, ReadEvent, CONSOLE_TOKEN};
use chrono::Local;
use mio::net::TcpStream;
use mio::{Events, Poll, Token};
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};

const SERVER_TOKEN: Token = Token(0);

const EVENTS_CAPACITY: usize = 16;

/// Received packets applied to local state, rendered as console lines.
#[derive(Debug)]
pub struct ChatView {
    me: String,
    cache: PeerCache,
}

impl ChatView {
    pub fn new(me: &str) -> Self {
        Self {
            me: me.to_string(),
            cache: PeerCache::new(),
        }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &PeerCache {
        &self.cache
    }

    /// Update the cache from `packet` and return the line to show, if any.
    pub fn apply(&mut self, packet: &Packet) -> Option<String> {
        match *packet {
            Packet::Chat(ref chat) => self.render_chat(chat),
            Packet::Login { client_id, name } => {
                self.cache.insert(client_id, name);
                Some(format!("[NOTICE] {} logged in.", name))
            }
            Packet::Logout { client_id } => self
                .cache
                .remove(client_id)
                .map(|entry| format!("[NOTICE] {} logged out.", entry.name)),
            Packet::NameId { client_id, name } => {
                self.cache.insert(client_id, name);
                None
            }
            Packet::Command { .. } => None,
        }
    }

    fn render_chat(&self, chat: &Chat) -> Option<String> {
        let sender = match self.cache.get(chat.from) {
            Some(entry) => format!("{}({})", entry.name, entry.id),
            None => chat.from.to_string(),
        };

        let line = match chat.channel {
            Channel::Private => format!("{}->{} : {}", sender, self.me, chat.message),
            Channel::Global => format!("[GLOBAL] {} : {}", sender, chat.message),
            Channel::Android => format!("[Android] {} : {}", sender, chat.message),
            Channel::Ios => format!("[iOS] {} : {}", sender, chat.message),
            Channel::Server => format!("[SERVER] : {}", chat.message),
            Channel::Other(byte) => {
                debug!(channel = byte, "Chat on unknown channel ignored");
                return None;
            }
        };
        Some(line)
    }
}

/// Print a console line with a local timestamp.
fn show(line: &str) {
    println!("{} {}", Local::now().format("[%H:%M:%S]"), line);
}

pub struct Peer {
    poll: Poll,
    events: Events,
    conn: Connection<TcpStream>,
    console: Option<Console>,
    view: ChatView,
    channel: Channel,
    poll_timeout: Duration,
    running: bool,
}

impl Peer {
    /// Connect to the server and queue the login frame.
    pub fn connect(settings: &ClientSettings, poll_timeout: Duration) -> io::Result<Self> {
        let stream = std::net::TcpStream::connect(settings.server.as_str())?;
        stream.set_nonblocking(true)?;
        let peer_addr = stream.peer_addr()?;

        let poll = Poll::new()?;
        let mut conn = Connection::new(TcpStream::from_std(stream));
        conn.register(poll.registry(), SERVER_TOKEN)?;

        let login = Packet::Login {
            client_id: PLACEHOLDER_ID,
            name: settings.name,
        };
        conn.enqueue(&login.encode());

        info!(server = %peer_addr, name = %settings.name, "Connected");

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            conn,
            console: None,
            view: ChatView::new(&settings.name.to_string_lossy()),
            channel: Channel::default(),
            poll_timeout,
            running: true,
        })
    }

    #[cfg(test)]
    pub fn view(&self) -> &ChatView {
        &self.view
    }

    #[cfg(test)]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn attach_console(&mut self) {
        match Console::register(self.poll.registry(), CONSOLE_TOKEN) {
            Ok(console) => self.console = Some(console),
            Err(e) => warn!(error = %e, "Console unavailable, input disabled"),
        }
    }

    pub fn run(&mut self) -> io::Result<()> {
        println!("Client started and connected!");
        while self.running {
            self.poll_once(self.poll_timeout)?;
        }
        Ok(())
    }

    /// One iteration of the client loop.
    pub fn poll_once(&mut self, timeout: Duration) -> io::Result<()> {
        let timeout = if self.conn.wants_service() {
            Duration::ZERO
        } else {
            timeout
        };

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut console_ready = false;
        for event in self.events.iter() {
            match event.token() {
                SERVER_TOKEN => self.conn.note_readiness(event),
                CONSOLE_TOKEN => console_ready = true,
                _ => {}
            }
        }

        if console_ready {
            self.handle_console();
        }
        if !self.running {
            return Ok(());
        }

        if self.conn.is_readable() {
            match self.conn.pump_read()? {
                ReadEvent::Pending => {}
                ReadEvent::Frame(frame) => match Packet::decode(&frame) {
                    Ok(packet) => {
                        if let Some(line) = self.view.apply(&packet) {
                            show(&line);
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping undecodable frame"),
                },
                ReadEvent::UnknownType(byte) => {
                    debug!(packet_type = byte, "Unknown packet type from server");
                }
                ReadEvent::Closed => {
                    println!("Server disconnected! Quitting...");
                    self.running = false;
                    return Ok(());
                }
            }
        }

        if self.conn.can_write() {
            self.conn.pump_write()?;
        }

        self.conn.sync_interest(self.poll.registry(), SERVER_TOKEN)
    }

    fn handle_console(&mut self) {
        let console = match self.console.as_mut() {
            Some(console) => console,
            None => return,
        };

        let input = match console.read_lines(self.poll.registry()) {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "Console read failed, input disabled");
                console.deregister(self.poll.registry());
                self.console = None;
                return;
            }
        };

        if input.closed {
            debug!("Console closed");
            self.console = None;
        }

        for line in &input.lines {
            self.handle_line(line);
            if !self.running {
                break;
            }
        }
    }

    /// Act on one console line.
    pub fn handle_line(&mut self, line: &str) {
        let input = match console::parse(line) {
            Ok(input) => input,
            Err(e) => {
                show(&format!("[NOTICE] {}", e));
                return;
            }
        };

        match input {
            Input::Quit => {
                println!("Quitting...");
                self.running = false;
                return;
            }
            Input::SwitchChannel(channel) => {
                self.channel = channel;
                show(&format!("[NOTICE] Channel switched to {}", channel));
            }
            _ => {}
        }

        if let Some(packet) = input.to_packet(self.channel) {
            self.conn.enqueue(&packet.encode());
        }
    }
}
