//! Chat server event loop.
//!
//! Readiness-based model: one `mio::Poll` covers the listener, every session
//! socket and the admin console. Each iteration:
//!
//! 1. poll (zero timeout while some connection can still make progress,
//!    otherwise the configured timeout)
//! 2. record readiness hints, accept, read console lines
//! 3. run at most one read pump and one write pump per session, dispatching
//!    any completed frame before moving to the next session
//! 4. re-sync each session's registered interest with its write queue

mod registry;
mod router;

pub use registry::MAX_SESSIONS;
use registry::SessionRegistry;
use router::Outcome;

use crate::config::ServerSettings;
use crate::runtime::{
    create_listener, Connection, Console, ReadEvent, WriteEvent, CONSOLE_TOKEN, LISTENER_TOKEN,
};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const EVENTS_CAPACITY: usize = 256;

/// Syscall attempts spent on a connection turned away at capacity.
const REJECT_WRITE_ATTEMPTS: usize = 8;

pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    registry: SessionRegistry<TcpStream>,
    console: Option<Console>,
    poll_timeout: Duration,
    running: bool,
}

impl Server {
    /// Bind the listener and set up the poller.
    pub fn bind(settings: &ServerSettings, poll_timeout: Duration) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(create_listener(settings.listen)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        info!(
            addr = %listener.local_addr()?,
            max_sessions = settings.max_sessions,
            "Server listening"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener,
            registry: SessionRegistry::new(settings.max_sessions),
            console: None,
            poll_timeout,
            running: true,
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(test)]
    pub fn registry(&self) -> &SessionRegistry<TcpStream> {
        &self.registry
    }

    /// Poll stdin for admin commands. Runs without a console if stdin
    /// cannot be polled.
    pub fn attach_console(&mut self) {
        match Console::register(self.poll.registry(), CONSOLE_TOKEN) {
            Ok(console) => self.console = Some(console),
            Err(e) => warn!(error = %e, "Console unavailable, running without admin input"),
        }
    }

    /// Run until the admin console asks to quit.
    pub fn run(&mut self) -> io::Result<()> {
        info!("Server started, waiting for clients");
        while self.running {
            self.poll_once(self.poll_timeout)?;
        }
        self.shutdown();
        Ok(())
    }

    /// One iteration of the event loop.
    pub fn poll_once(&mut self, timeout: Duration) -> io::Result<()> {
        let timeout = if self.has_ready_work() {
            Duration::ZERO
        } else {
            timeout
        };

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut listener_ready = false;
        let mut console_ready = false;
        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => listener_ready = true,
                CONSOLE_TOKEN => console_ready = true,
                Token(key) => {
                    if let Some(session) = self.registry.get_mut(key) {
                        session.conn.note_readiness(event);
                    }
                }
            }
        }

        if console_ready {
            self.handle_console();
        }
        if listener_ready {
            self.accept_connections();
        }

        for key in self.registry.keys() {
            self.service(key);
        }

        self.sync_interests();
        Ok(())
    }

    fn has_ready_work(&self) -> bool {
        self.registry
            .iter()
            .any(|(_, session)| session.conn.wants_service())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => match self.registry.insert(stream) {
                    Ok(key) => self.register_session(key, peer),
                    Err(stream) => reject(stream, peer),
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn register_session(&mut self, key: usize, peer: SocketAddr) {
        let registry = self.poll.registry();
        let result = match self.registry.get_mut(key) {
            Some(session) => session.conn.register(registry, Token(key)),
            None => return,
        };

        match result {
            Ok(()) => {
                let id = self.registry.get(key).map(|session| session.id);
                info!(
                    conn_id = key,
                    client_id = ?id,
                    peer = %peer,
                    "Client connected, waiting for login packet"
                );
            }
            Err(e) => {
                warn!(conn_id = key, peer = %peer, error = %e, "Failed to register connection");
                self.registry.remove(key);
            }
        }
    }

    /// Run the read and write pumps for one session.
    fn service(&mut self, key: usize) {
        let session = match self.registry.get_mut(key) {
            Some(session) => session,
            None => return,
        };

        if session.conn.is_readable() {
            match session.conn.pump_read() {
                Ok(ReadEvent::Pending) => {}
                Ok(ReadEvent::Frame(frame)) => {
                    if router::on_frame(&mut self.registry, key, &frame) == Outcome::Disconnect {
                        self.close_session(key);
                        return;
                    }
                }
                Ok(ReadEvent::UnknownType(byte)) => {
                    router::on_unknown_type(&mut self.registry, key, byte)
                }
                Ok(ReadEvent::Closed) => {
                    debug!(conn_id = key, "Peer closed connection");
                    self.close_session(key);
                    return;
                }
                Err(e) => {
                    debug!(conn_id = key, error = %e, "Read failed");
                    self.close_session(key);
                    return;
                }
            }
        }

        let session = match self.registry.get_mut(key) {
            Some(session) => session,
            None => return,
        };

        if session.conn.can_write() {
            if let Err(e) = session.conn.pump_write() {
                debug!(conn_id = key, error = %e, "Write failed");
                self.close_session(key);
            }
        }
    }

    fn sync_interests(&mut self) {
        let registry = self.poll.registry();
        let failed: Vec<usize> = self
            .registry
            .iter_mut()
            .filter_map(|(key, session)| {
                session
                    .conn
                    .sync_interest(registry, Token(key))
                    .err()
                    .map(|e| {
                        debug!(conn_id = key, error = %e, "Interest update failed");
                        key
                    })
            })
            .collect();

        for key in failed {
            self.close_session(key);
        }
    }

    fn close_session(&mut self, key: usize) {
        if let Some(mut session) = router::disconnect(&mut self.registry, key) {
            session.conn.deregister(self.poll.registry());
        }
    }

    fn handle_console(&mut self) {
        let console = match self.console.as_mut() {
            Some(console) => console,
            None => return,
        };

        let input = match console.read_lines(self.poll.registry()) {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "Console read failed, detaching console");
                console.deregister(self.poll.registry());
                self.console = None;
                return;
            }
        };

        for line in &input.lines {
            match line.trim() {
                "quit" => {
                    info!("Quitting...");
                    self.running = false;
                }
                "" => {}
                other => debug!(command = other, "Unknown console command"),
            }
        }

        if input.closed {
            info!("Console closed");
            self.console = None;
        }
    }

    fn shutdown(&mut self) {
        let registry = self.poll.registry();
        for mut session in self.registry.drain() {
            session.conn.deregister(registry);
        }
        if let Some(mut console) = self.console.take() {
            console.deregister(registry);
        }
        info!("Server stopped");
    }
}

/// Turn away a connection that arrived at capacity: a notice and a logout,
/// written best-effort, then close. The connection never enters the registry.
fn reject(stream: TcpStream, peer: SocketAddr) {
    let mut conn = Connection::new(stream);
    for frame in &router::rejection_frames() {
        conn.enqueue(frame);
    }

    for _ in 0..REJECT_WRITE_ATTEMPTS {
        match conn.pump_write() {
            Ok(WriteEvent::Drained) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(peer = %peer, error = %e, "Failed to send rejection");
                break;
            }
        }
    }

    // Discard anything the peer already sent so closing doesn't reset the
    // connection before the notice is read.
    let _ = conn.stream().shutdown(Shutdown::Write);
    let mut scratch = [0u8; 64];
    for _ in 0..REJECT_WRITE_ATTEMPTS {
        match conn.stream_mut().read(&mut scratch) {
            Ok(n) if n > 0 => {}
            _ => break,
        }
    }

    warn!(peer = %peer, "Client tried to connect but server is full");
}
