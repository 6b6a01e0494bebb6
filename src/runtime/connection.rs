//! Connection state machine for framing a byte stream into packets.
//!
//! Read side: `Idle -> Accumulating -> Complete -> Idle`. In `Idle` a single
//! type byte is read; a known type allocates its schema-sized frame, an
//! unknown one is dropped. In `Accumulating` each pump reads whatever the
//! socket yields into the rest of the frame. A full frame is flipped and
//! handed back to the caller.
//!
//! Write side: a FIFO of flipped frames. Each pump writes from the front
//! frame's cursor toward its limit and pops it once exhausted.
//!
//! mio readiness is edge-triggered, so each connection also keeps
//! `readable`/`writable` hints. They are raised by poll events and cleared
//! only when a syscall reports `WouldBlock`, which lets the event loop run
//! one pump per connection per iteration without losing wakeups.

use crate::protocol;
use crate::runtime::Buffer;
use mio::event::{Event, Source};
use mio::{Interest, Registry, Token};
use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Read-side state.
#[derive(Debug)]
pub enum ReadState {
    /// Waiting for a type byte.
    Idle,
    /// Filling a frame of known size.
    Accumulating(Buffer),
}

/// Result of one read pump.
#[derive(Debug)]
pub enum ReadEvent {
    /// No complete frame yet.
    Pending,
    /// A complete frame, flipped to read mode.
    Frame(Buffer),
    /// A type byte outside the schema was consumed and dropped.
    UnknownType(u8),
    /// The peer shut the stream down.
    Closed,
}

/// Result of one write pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEvent {
    /// The front frame still has bytes to send.
    Pending,
    /// The front frame was fully sent and more frames are queued.
    Sent,
    /// The queue is empty.
    Drained,
}

/// A single framed connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    read_state: ReadState,
    write_queue: VecDeque<Buffer>,
    readable: bool,
    writable: bool,
    /// Interest currently registered with the poller, if any.
    registered: Option<Interest>,
}

impl<S> Connection<S> {
    /// Wrap a stream. No interest is registered yet.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_state: ReadState::Idle,
            write_queue: VecDeque::new(),
            readable: false,
            writable: false,
            registered: None,
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    #[cfg(test)]
    pub fn read_state(&self) -> &ReadState {
        &self.read_state
    }

    /// Queue a copy of `frame` for sending.
    ///
    /// The frame must already be in read mode.
    pub fn enqueue(&mut self, frame: &Buffer) {
        self.write_queue.push_back(frame.copy());
    }

    #[cfg(test)]
    /// Frames waiting to be sent, front first.
    pub fn queued(&self) -> impl Iterator<Item = &Buffer> {
        self.write_queue.iter()
    }

    #[cfg(test)]
    pub fn queued_len(&self) -> usize {
        self.write_queue.len()
    }

    /// Record readiness reported by the poller.
    pub fn note_readiness(&mut self, event: &Event) {
        if event.is_readable() || event.is_read_closed() || event.is_error() {
            self.readable = true;
        }
        if event.is_writable() || event.is_write_closed() {
            self.writable = true;
        }
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    /// Writable and with something to write.
    pub fn can_write(&self) -> bool {
        self.writable && !self.write_queue.is_empty()
    }

    /// Whether a pump could make progress without waiting on the poller.
    pub fn wants_service(&self) -> bool {
        self.readable || self.can_write()
    }

    /// Read interest always; write interest iff the queue is non-empty.
    pub fn desired_interest(&self) -> Interest {
        if self.write_queue.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    #[cfg(test)]
    pub(crate) fn set_ready(&mut self, readable: bool, writable: bool) {
        self.readable = readable;
        self.writable = writable;
    }

    #[cfg(test)]
    pub(crate) fn registered_interest(&self) -> Option<Interest> {
        self.registered
    }
}

impl<S: Read> Connection<S> {
    /// Run one step of the read state machine.
    pub fn pump_read(&mut self) -> io::Result<ReadEvent> {
        if let ReadState::Idle = self.read_state {
            let mut type_byte = [0u8; 1];
            match self.stream.read(&mut type_byte) {
                Ok(0) => return Ok(ReadEvent::Closed),
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.readable = false;
                    return Ok(ReadEvent::Pending);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    return Ok(ReadEvent::Pending);
                }
                Err(e) => return Err(e),
            }

            match protocol::frame_for(type_byte[0]) {
                Ok(frame) => self.read_state = ReadState::Accumulating(frame),
                Err(_) => return Ok(ReadEvent::UnknownType(type_byte[0])),
            }
        }

        let frame = match &mut self.read_state {
            ReadState::Accumulating(frame) => frame,
            ReadState::Idle => return Ok(ReadEvent::Pending),
        };

        match self.stream.read(frame.chunk_mut()) {
            // Every frame is at least two bytes, so a body read always
            // expects more data here.
            Ok(0) => return Ok(ReadEvent::Closed),
            Ok(n) => frame.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.readable = false;
                return Ok(ReadEvent::Pending);
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok(ReadEvent::Pending);
            }
            Err(e) => return Err(e),
        }

        if frame.has_remaining() {
            return Ok(ReadEvent::Pending);
        }

        match std::mem::replace(&mut self.read_state, ReadState::Idle) {
            ReadState::Accumulating(mut frame) => {
                frame.flip();
                Ok(ReadEvent::Frame(frame))
            }
            ReadState::Idle => Ok(ReadEvent::Pending),
        }
    }
}

impl<S: Write> Connection<S> {
    /// Send as much of the front frame as the socket accepts in one write.
    pub fn pump_write(&mut self) -> io::Result<WriteEvent> {
        let frame = match self.write_queue.front_mut() {
            Some(frame) => frame,
            None => return Ok(WriteEvent::Drained),
        };

        match self.stream.write(frame.chunk()) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => frame.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.writable = false;
                return Ok(WriteEvent::Pending);
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok(WriteEvent::Pending);
            }
            Err(e) => return Err(e),
        }

        if frame.has_remaining() {
            return Ok(WriteEvent::Pending);
        }

        self.write_queue.pop_front();
        if self.write_queue.is_empty() {
            Ok(WriteEvent::Drained)
        } else {
            Ok(WriteEvent::Sent)
        }
    }
}

impl<S: Source> Connection<S> {
    /// Register with the poller using the current desired interest.
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let interest = self.desired_interest();
        registry.register(&mut self.stream, token, interest)?;
        self.registered = Some(interest);
        Ok(())
    }

    /// Bring the registered interest in line with the write queue.
    ///
    /// Called after every loop iteration, so any enqueue or dequeue is
    /// reflected before the next poll.
    pub fn sync_interest(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let desired = self.desired_interest();
        match self.registered {
            Some(current) if current == desired => Ok(()),
            Some(_) => {
                registry.reregister(&mut self.stream, token, desired)?;
                self.registered = Some(desired);
                Ok(())
            }
            None => self.register(registry, token),
        }
    }

    pub fn deregister(&mut self, registry: &Registry) {
        if self.registered.take().is_some() {
            let _ = registry.deregister(&mut self.stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Channel, Chat, Message, Name, Packet, PLACEHOLDER_ID};
    use crate::runtime::mock::MockStream;

    fn login_bytes(name: &str) -> Vec<u8> {
        Packet::Login {
            client_id: PLACEHOLDER_ID,
            name: Name::name(name).unwrap(),
        }
        .encode()
        .chunk()
        .to_vec()
    }

    /// Pump until something other than `Pending` comes back.
    fn pump_until_event(conn: &mut Connection<MockStream>, max: usize) -> ReadEvent {
        for _ in 0..max {
            match conn.pump_read().unwrap() {
                ReadEvent::Pending => continue,
                other => return other,
            }
        }
        ReadEvent::Pending
    }

    #[test]
    fn test_frame_assembled_across_partial_reads() {
        let bytes = login_bytes("Alice");
        let mut stream = MockStream::new();
        stream.feed(&bytes[..1]);
        stream.feed_would_block();
        stream.feed(&bytes[1..6]);
        stream.feed(&bytes[6..]);

        let mut conn = Connection::new(stream);
        conn.set_ready(true, false);

        // Type byte, then a body read that finds nothing yet
        assert!(matches!(conn.pump_read().unwrap(), ReadEvent::Pending));
        assert!(!conn.is_readable());
        match conn.read_state() {
            ReadState::Accumulating(frame) => assert_eq!(frame.position(), 1),
            other => panic!("unexpected: {:?}", other),
        }

        assert!(matches!(conn.pump_read().unwrap(), ReadEvent::Pending));
        match conn.read_state() {
            ReadState::Accumulating(frame) => assert_eq!(frame.position(), 6),
            other => panic!("unexpected: {:?}", other),
        }

        match conn.pump_read().unwrap() {
            ReadEvent::Frame(frame) => {
                assert_eq!(frame.position(), 0);
                assert_eq!(frame.limit(), 17);
                assert_eq!(frame.chunk(), &bytes[..]);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(conn.read_state(), ReadState::Idle));
    }

    #[test]
    fn test_unknown_type_consumes_one_byte() {
        let logout = Packet::Logout { client_id: 4 }.encode();
        let mut stream = MockStream::new();
        stream.feed(&[0x42]);
        stream.feed(logout.chunk());

        let mut conn = Connection::new(stream);
        assert!(matches!(
            conn.pump_read().unwrap(),
            ReadEvent::UnknownType(0x42)
        ));
        assert!(matches!(conn.read_state(), ReadState::Idle));

        match pump_until_event(&mut conn, 4) {
            ReadEvent::Frame(frame) => assert_eq!(frame.chunk(), &[0x02, 4]),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_eof_while_idle_is_closed() {
        let mut stream = MockStream::new();
        stream.feed_eof();
        let mut conn = Connection::new(stream);
        assert!(matches!(conn.pump_read().unwrap(), ReadEvent::Closed));
    }

    #[test]
    fn test_eof_mid_frame_is_closed() {
        let bytes = login_bytes("Bob");
        let mut stream = MockStream::new();
        stream.feed(&bytes[..4]);
        stream.feed_eof();

        let mut conn = Connection::new(stream);
        assert!(matches!(pump_until_event(&mut conn, 4), ReadEvent::Closed));
    }

    #[test]
    fn test_would_block_clears_readable_hint() {
        let mut conn = Connection::new(MockStream::new());
        conn.set_ready(true, false);
        assert!(matches!(conn.pump_read().unwrap(), ReadEvent::Pending));
        assert!(!conn.is_readable());
    }

    #[test]
    fn test_read_error_propagates() {
        let mut stream = MockStream::new();
        stream.fail_next_read(io::ErrorKind::ConnectionReset);
        let mut conn = Connection::new(stream);
        let err = conn.pump_read().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_registered_interest_follows_write_queue() {
        use mio::{Events, Poll};
        use std::time::Duration;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_accepted, _) = listener.accept().unwrap();
        stream.set_nonblocking(true).unwrap();

        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(8);
        let token = Token(7);
        let mut conn = Connection::new(mio::net::TcpStream::from_std(stream));

        conn.register(poll.registry(), token).unwrap();
        assert_eq!(conn.registered_interest(), Some(Interest::READABLE));

        conn.enqueue(&Packet::Logout { client_id: 4 }.encode());
        conn.sync_interest(poll.registry(), token).unwrap();
        assert_eq!(
            conn.registered_interest(),
            Some(Interest::READABLE | Interest::WRITABLE)
        );

        poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        for event in events.iter() {
            assert_eq!(event.token(), token);
            conn.note_readiness(event);
        }
        assert!(conn.can_write());
        assert_eq!(conn.pump_write().unwrap(), WriteEvent::Drained);

        conn.sync_interest(poll.registry(), token).unwrap();
        assert_eq!(conn.registered_interest(), Some(Interest::READABLE));

        conn.deregister(poll.registry());
        assert_eq!(conn.registered_interest(), None);
    }

    #[test]
    fn test_write_queue_drains_with_partial_writes() {
        let mut stream = MockStream::new();
        stream.set_write_budget(Some(10));
        let mut conn = Connection::new(stream);

        let chat = Packet::Chat(Chat {
            channel: Channel::Global,
            from: 1,
            to: PLACEHOLDER_ID,
            message: Message::message("hello").unwrap(),
        })
        .encode();
        let logout = Packet::Logout { client_id: 1 }.encode();

        conn.enqueue(&chat);
        conn.enqueue(&logout);
        assert_eq!(conn.desired_interest(), Interest::READABLE | Interest::WRITABLE);

        let mut events = Vec::new();
        for _ in 0..10 {
            let event = conn.pump_write().unwrap();
            events.push(event);
            if event == WriteEvent::Drained {
                break;
            }
        }

        // 44 bytes in 10-byte writes, then the 2-byte logout
        assert_eq!(
            events,
            vec![
                WriteEvent::Pending,
                WriteEvent::Pending,
                WriteEvent::Pending,
                WriteEvent::Pending,
                WriteEvent::Sent,
                WriteEvent::Drained,
            ]
        );

        let mut expected = chat.chunk().to_vec();
        expected.extend_from_slice(logout.chunk());
        assert_eq!(conn.stream().written(), &expected[..]);
        assert_eq!(conn.desired_interest(), Interest::READABLE);
    }

    #[test]
    fn test_enqueue_copies_frame() {
        let mut conn = Connection::new(MockStream::new());
        let mut frame = Packet::Logout { client_id: 9 }.encode();
        conn.enqueue(&frame);

        frame.set_at(1, 0).unwrap();
        frame.advance(2);

        let queued = conn.queued().next().unwrap();
        assert_eq!(queued.chunk(), &[0x02, 9]);
    }

    #[test]
    fn test_write_would_block_keeps_frame() {
        let mut stream = MockStream::new();
        stream.set_write_budget(Some(0));
        let mut conn = Connection::new(stream);
        conn.set_ready(false, true);
        conn.enqueue(&Packet::Logout { client_id: 2 }.encode());

        assert_eq!(conn.pump_write().unwrap(), WriteEvent::Pending);
        assert_eq!(conn.queued_len(), 1);
        assert!(!conn.can_write());
        assert!(!conn.wants_service());
    }
}
