//! Registry of live sessions.
//!
//! Sessions live in a slab keyed by connection handle (the slab key, which
//! doubles as the mio token). The registry is the only owner of sessions;
//! everything else refers to them by key and must re-check existence, since
//! a disconnect can remove a session at any readiness event.

use crate::protocol::{Channel, Name};
use crate::runtime::{Buffer, Connection};
use slab::Slab;

/// Upper bound on concurrent sessions. Ids are single bytes derived from the
/// slab key; `0` is never assigned and `0xFF` is the placeholder id.
pub const MAX_SESSIONS: usize = 254;

/// Server-side state for one connection.
#[derive(Debug)]
pub struct Session<S> {
    pub conn: Connection<S>,
    /// Id assigned by the server, stamped into outgoing frames.
    pub id: u8,
    /// Display name; empty until login.
    pub name: Name,
    pub logged_in: bool,
    /// Channel the session listens on besides global.
    pub channel: Channel,
}

impl<S> Session<S> {
    fn new(id: u8, stream: S) -> Self {
        Self {
            conn: Connection::new(stream),
            id,
            name: Name::empty(),
            logged_in: false,
            channel: Channel::default(),
        }
    }

    /// Queue a copy of `frame` on this session's write queue.
    pub fn send(&mut self, frame: &Buffer) {
        self.conn.enqueue(frame);
    }
}

/// Live sessions with a fixed capacity.
pub struct SessionRegistry<S> {
    sessions: Slab<Session<S>>,
    max_sessions: usize,
}

impl<S> SessionRegistry<S> {
    /// Create a registry holding at most `max_sessions` sessions, capped at
    /// `MAX_SESSIONS`.
    pub fn new(max_sessions: usize) -> Self {
        let max_sessions = max_sessions.min(MAX_SESSIONS);
        Self {
            sessions: Slab::with_capacity(max_sessions),
            max_sessions,
        }
    }

    /// Register a new, not yet logged in session.
    ///
    /// Hands the stream back if the registry is full.
    pub fn insert(&mut self, stream: S) -> Result<usize, S> {
        if self.is_full() {
            return Err(stream);
        }
        let entry = self.sessions.vacant_entry();
        let key = entry.key();
        // key < max_sessions <= MAX_SESSIONS, so the id fits in 1..=254
        entry.insert(Session::new((key + 1) as u8, stream));
        Ok(key)
    }

    pub fn get(&self, key: usize) -> Option<&Session<S>> {
        self.sessions.get(key)
    }

    pub fn get_mut(&mut self, key: usize) -> Option<&mut Session<S>> {
        self.sessions.get_mut(key)
    }

    pub fn remove(&mut self, key: usize) -> Option<Session<S>> {
        self.sessions.try_remove(key)
    }

    #[cfg(test)]
    pub fn contains(&self, key: usize) -> bool {
        self.sessions.contains(key)
    }

    /// Key of the session with the given client id.
    pub fn key_for_id(&self, id: u8) -> Option<usize> {
        let key = (id as usize).checked_sub(1)?;
        self.sessions.contains(key).then_some(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    /// Snapshot of live keys in key order.
    pub fn keys(&self) -> Vec<usize> {
        self.sessions.iter().map(|(key, _)| key).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Session<S>)> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Session<S>)> {
        self.sessions.iter_mut()
    }

    /// Remove every session, returning them for cleanup.
    pub fn drain(&mut self) -> Vec<Session<S>> {
        self.sessions.drain().collect()
    }

    /// Queue `frame` on one session.
    pub fn send_to(&mut self, key: usize, frame: &Buffer) -> bool {
        match self.sessions.get_mut(key) {
            Some(session) => {
                session.send(frame);
                true
            }
            None => false,
        }
    }

    /// Queue `frame` on every session, optionally skipping one.
    ///
    /// Returns the number of recipients.
    pub fn broadcast_all(&mut self, frame: &Buffer, except: Option<usize>) -> usize {
        let targets: Vec<usize> = self
            .sessions
            .iter()
            .filter(|(key, _)| Some(*key) != except)
            .map(|(key, _)| key)
            .collect();
        self.send_each(&targets, frame)
    }

    /// Queue `frame` on sessions listening on `channel` or on global,
    /// optionally skipping one.
    pub fn broadcast_channel(
        &mut self,
        frame: &Buffer,
        channel: Channel,
        except: Option<usize>,
    ) -> usize {
        let targets: Vec<usize> = self
            .sessions
            .iter()
            .filter(|(key, session)| {
                Some(*key) != except
                    && (session.channel == channel || session.channel == Channel::Global)
            })
            .map(|(key, _)| key)
            .collect();
        self.send_each(&targets, frame)
    }

    fn send_each(&mut self, targets: &[usize], frame: &Buffer) -> usize {
        targets
            .iter()
            .filter(|&&key| self.send_to(key, frame))
            .count()
    }
}
