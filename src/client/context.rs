//! The client session context.
//!
//! A [`Context`] owns one connection to the daemon: it runs the cookie/name
//! handshake, routes tagged replies and daemon events, tracks in-flight
//! operations, and fans terminal states out to its child streams. All
//! callbacks run synchronously on the event-loop thread and receive the
//! context back as their first argument.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::time::Instant;

use bytes::Bytes;

use crate::config::ClientConfig;
use crate::error::{Error, ErrorCode};
use crate::mainloop::{EventSource, Interest};
use crate::proto::command::Command;
use crate::proto::tagstruct::{TagstructReader, TagstructWriter};

use super::cookie::{AuthCookie, default_cookie_path};
use super::dispatch::{ReplyDispatcher, ReplyHandler};
use super::memblock::{MemblockStat, MemblockStatSnapshot};
use super::operation::{Operation, OperationCallback, OperationRegistry, OperationState};
use super::pstream::{Inbound, Pstream, PstreamError};
use super::server::resolve_server;
use super::socket::{SessionSocket, SocketClient};
use super::stream::{StreamDirection, StreamId, StreamSlot};
use super::subscribe::{SubscriptionEvent, SubscriptionMask};

/// Connection lifecycle states. `Failed` and `Terminated` are terminal;
/// once entered, no further transitions happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unconnected,
    Connecting,
    Authorizing,
    SettingName,
    Ready,
    Failed,
    Terminated,
}

impl ContextState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ContextState::Failed | ContextState::Terminated)
    }

    pub fn is_ready(self) -> bool {
        self == ContextState::Ready
    }
}

/// Daemon-side memory block counters, as answered to a STAT request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonStats {
    pub allocated_blocks: u32,
    pub allocated_bytes: u32,
}

/// What a registered reply handler receives: the server's answer, a locally
/// synthesized timeout, or the terminal sweep.
pub(crate) enum ReplyOutcome<'a> {
    Reply(TagstructReader<'a>),
    Error(ErrorCode),
    Timeout,
    Aborted,
}

type StateCallback = Box<dyn FnMut(&mut Context, ContextState)>;
type SubscribeCallback = Box<dyn FnMut(&mut Context, SubscriptionEvent)>;

pub struct Context {
    name: String,
    pub(crate) config: ClientConfig,
    state: ContextState,
    error: ErrorCode,
    /// Tag counter for outgoing requests; wraps, the daemon treats tags as
    /// opaque.
    ctag: u32,
    cookie: Option<AuthCookie>,

    client: Option<SocketClient>,
    pub(crate) pstream: Option<Pstream>,
    dispatch: Option<ReplyDispatcher>,
    stat: MemblockStat,

    pub(crate) ops: OperationRegistry,
    pub(crate) streams: BTreeMap<StreamId, StreamSlot>,
    next_stream_id: u64,
    pub(crate) playback_channels: BTreeMap<u32, StreamId>,
    pub(crate) record_channels: BTreeMap<u32, StreamId>,
    drain_ops: Vec<u64>,

    state_callback: Option<StateCallback>,
    subscribe_callback: Option<SubscribeCallback>,

    // Transitions triggered from inside a callback queue up behind the one
    // being delivered.
    queued_transitions: VecDeque<ContextState>,
    delivering_transitions: bool,
}

impl Context {
    /// Create an unconnected context. `name` is the display name announced
    /// to the daemon and must not be empty.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, ClientConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: ClientConfig) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "client name must not be empty");
        Self {
            name,
            config,
            state: ContextState::Unconnected,
            error: ErrorCode::Ok,
            ctag: 0,
            cookie: None,
            client: None,
            pstream: None,
            dispatch: None,
            stat: MemblockStat::new(),
            ops: OperationRegistry::new(),
            streams: BTreeMap::new(),
            next_stream_id: 0,
            playback_channels: BTreeMap::new(),
            record_channels: BTreeMap::new(),
            drain_ops: Vec::new(),
            state_callback: None,
            subscribe_callback: None,
            queued_transitions: VecDeque::new(),
            delivering_transitions: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// The last error recorded on this context. Meaningful after a failure
    /// or a failed operation.
    pub fn last_error(&self) -> ErrorCode {
        self.error
    }

    /// Local memory-block accounting shared with the transport and streams.
    pub fn memblock_usage(&self) -> MemblockStatSnapshot {
        self.stat.snapshot()
    }

    pub fn set_state_callback(&mut self, cb: impl FnMut(&mut Context, ContextState) + 'static) {
        self.state_callback = Some(Box::new(cb));
    }

    pub fn set_subscribe_callback(
        &mut self,
        cb: impl FnMut(&mut Context, SubscriptionEvent) + 'static,
    ) {
        self.subscribe_callback = Some(Box::new(cb));
    }

    /// Start connecting. Resolution order for the server: explicit
    /// argument, `SONANCE_SERVER`, configured server, per-user default
    /// socket. Returns `Ok` iff transport initiation started; the outcome
    /// arrives through the state callback.
    pub fn connect(&mut self, server: Option<&str>) -> crate::Result<()> {
        if self.state != ContextState::Unconnected {
            return Err(Error::InvalidState("connect requires an unconnected context"));
        }

        let cookie_path = self.config.cookie_path.clone().or_else(default_cookie_path);
        let cookie = cookie_path.as_deref().map(AuthCookie::load);
        match cookie {
            Some(Ok(cookie)) => self.cookie = Some(cookie),
            Some(Err(err)) => {
                tracing::warn!("auth cookie unavailable: {err}");
                self.fail(ErrorCode::AuthKey);
                return Err(Error::Daemon(ErrorCode::AuthKey));
            }
            None => {
                tracing::warn!("no home directory; cannot locate auth cookie");
                self.fail(ErrorCode::AuthKey);
                return Err(Error::Daemon(ErrorCode::AuthKey));
            }
        }

        let addr = match resolve_server(server, &self.config) {
            Ok(addr) => addr,
            Err(code) => {
                self.fail(code);
                return Err(Error::Daemon(code));
            }
        };

        debug_assert!(self.client.is_none());
        self.client = Some(SocketClient::begin(&addr, self.config.connect_timeout()));
        self.set_state(ContextState::Connecting);
        Ok(())
    }

    /// Terminate the session regardless of its current state.
    pub fn disconnect(&mut self) {
        self.set_state(ContextState::Terminated);
    }

    /// True while the send queue or the pending-reply set has outstanding
    /// work. Always false outside `Ready`.
    pub fn is_pending(&self) -> bool {
        if self.state != ContextState::Ready {
            return false;
        }
        self.pstream.as_ref().is_some_and(Pstream::is_pending)
            || self.dispatch.as_ref().is_some_and(ReplyDispatcher::is_pending)
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Ask the daemon to exit. Fire-and-forget: no reply is registered.
    pub fn exit_daemon(&mut self) -> crate::Result<()> {
        if self.state != ContextState::Ready {
            return Err(Error::InvalidState("exit_daemon requires a ready context"));
        }
        let tag = self.next_tag();
        let mut body = TagstructWriter::new();
        body.put_u32(Command::Exit.to_wire()).put_u32(tag);
        self.enqueue_packet(body.finish());
        Ok(())
    }

    /// Fetch the daemon's memory block counters.
    pub fn stat(
        &mut self,
        cb: impl FnOnce(&mut Context, Option<DaemonStats>) + 'static,
    ) -> crate::Result<Operation> {
        self.submit(
            Command::Stat,
            |_| {},
            OperationCallback::Stat(Box::new(cb)),
            |op| ReplyHandler::Stat { op },
        )
    }

    /// Select which daemon events to receive through the subscribe
    /// callback.
    pub fn subscribe(
        &mut self,
        mask: SubscriptionMask,
        cb: impl FnOnce(&mut Context, bool) + 'static,
    ) -> crate::Result<Operation> {
        self.submit(
            Command::Subscribe,
            |body| {
                body.put_u32(mask.bits());
            },
            OperationCallback::Ack(Box::new(cb)),
            |op| ReplyHandler::SimpleAck { op },
        )
    }

    /// Fire `cb` once both the send queue and the pending-reply set are
    /// empty. Returns `None` when there is nothing to wait for.
    pub fn drain(&mut self, cb: impl FnOnce(&mut Context) + 'static) -> Option<Operation> {
        if !self.is_pending() {
            return None;
        }
        let (id, handle) = self
            .ops
            .insert(Some(OperationCallback::Drain(Box::new(cb))));
        self.drain_ops.push(id);
        Some(handle)
    }

    fn submit(
        &mut self,
        command: Command,
        write_body: impl FnOnce(&mut TagstructWriter),
        callback: OperationCallback,
        to_handler: fn(u64) -> ReplyHandler,
    ) -> crate::Result<Operation> {
        if self.state != ContextState::Ready {
            return Err(Error::InvalidState("request requires a ready context"));
        }
        let (op, handle) = self.ops.insert(Some(callback));
        let tag = self.next_tag();
        let mut body = TagstructWriter::new();
        body.put_u32(command.to_wire()).put_u32(tag);
        write_body(&mut body);
        self.send_with_reply(tag, body.finish(), to_handler(op));
        Ok(handle)
    }

    pub(crate) fn next_tag(&mut self) -> u32 {
        let tag = self.ctag;
        self.ctag = self.ctag.wrapping_add(1);
        tag
    }

    pub(crate) fn alloc_stream_id(&mut self) -> StreamId {
        let id = StreamId(self.next_stream_id);
        self.next_stream_id += 1;
        id
    }

    fn enqueue_packet(&mut self, payload: Bytes) {
        let result = match self.pstream.as_mut() {
            Some(pstream) => pstream.send_packet(&payload),
            None => {
                debug_assert!(false, "no transport for outgoing packet");
                return;
            }
        };
        if let Err(err) = result {
            tracing::warn!("failed to encode outgoing packet: {err}");
            self.fail(ErrorCode::Internal);
        }
    }

    /// Queue a request and register its tag with the reply dispatcher under
    /// the default timeout.
    pub(crate) fn send_with_reply(&mut self, tag: u32, payload: Bytes, handler: ReplyHandler) {
        self.enqueue_packet(payload);
        if self.state.is_terminal() {
            return;
        }
        let deadline = Instant::now() + self.config.reply_timeout();
        if let Some(dispatch) = self.dispatch.as_mut() {
            dispatch.register(tag, handler, deadline);
        }
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    pub(crate) fn fail(&mut self, error: ErrorCode) {
        if self.state.is_terminal() {
            return;
        }
        self.error = error;
        self.set_state(ContextState::Failed);
    }

    pub(crate) fn set_state(&mut self, state: ContextState) {
        self.queued_transitions.push_back(state);
        if self.delivering_transitions {
            return;
        }
        self.delivering_transitions = true;
        while let Some(next) = self.queued_transitions.pop_front() {
            self.apply_transition(next);
        }
        self.delivering_transitions = false;
    }

    fn apply_transition(&mut self, state: ContextState) {
        if self.state == state || self.state.is_terminal() {
            return;
        }
        self.state = state;

        if state.is_terminal() {
            // Child streams first, on a snapshot of ids: a stream callback
            // may release its own or a sibling's slot.
            let target = if state == ContextState::Failed {
                super::stream::StreamState::Failed
            } else {
                super::stream::StreamState::Terminated
            };
            let ids: Vec<StreamId> = self.streams.keys().copied().collect();
            for id in ids {
                self.stream_set_state(id, target);
            }

            // Complete every pending reply in terminal form.
            if let Some(mut dispatch) = self.dispatch.take() {
                for (_tag, handler) in dispatch.drain_all() {
                    self.run_reply_handler(handler, ReplyOutcome::Aborted);
                }
            }

            // Drain waiters and anything else left in the registry are
            // cancelled without completing.
            for id in std::mem::take(&mut self.drain_ops) {
                if let Some(slot) = self.ops.take(id) {
                    slot.shared.set(OperationState::Cancelled);
                }
            }
            for (_, slot) in self.ops.drain() {
                slot.shared.set(OperationState::Cancelled);
            }

            self.pstream = None;
            self.client = None;
        }

        self.fire_state_callback(state);
    }

    fn fire_state_callback(&mut self, state: ContextState) {
        if let Some(mut cb) = self.state_callback.take() {
            cb(self, state);
            // the callback may have installed a replacement
            if self.state_callback.is_none() {
                self.state_callback = Some(cb);
            }
        }
    }

    // ------------------------------------------------------------------
    // Socket readiness and handshake
    // ------------------------------------------------------------------

    fn on_connection(&mut self, outcome: io::Result<SessionSocket>) {
        debug_assert_eq!(self.state, ContextState::Connecting);
        let socket = match outcome {
            Ok(socket) => socket,
            Err(err) => {
                tracing::warn!("connection failed: {err}");
                self.fail(ErrorCode::ConnectionRefused);
                return;
            }
        };

        debug_assert!(self.pstream.is_none());
        self.pstream = Some(Pstream::new(
            socket,
            self.stat.clone(),
            self.config.max_frame_bytes,
        ));
        self.dispatch = Some(ReplyDispatcher::new());

        let Some(cookie) = self.cookie.clone() else {
            self.fail(ErrorCode::AuthKey);
            return;
        };
        let tag = self.next_tag();
        let mut body = TagstructWriter::new();
        body.put_u32(Command::Auth.to_wire())
            .put_u32(tag)
            .put_arbitrary(cookie.as_bytes());
        self.send_with_reply(tag, body.finish(), ReplyHandler::Setup);
        self.set_state(ContextState::Authorizing);
    }

    fn setup_step(&mut self, outcome: ReplyOutcome<'_>) {
        debug_assert!(matches!(
            self.state,
            ContextState::Authorizing
                | ContextState::SettingName
                | ContextState::Failed
                | ContextState::Terminated
        ));
        match outcome {
            ReplyOutcome::Reply(_reply) => match self.state {
                ContextState::Authorizing => {
                    let name = self.name.clone();
                    let tag = self.next_tag();
                    let mut body = TagstructWriter::new();
                    body.put_u32(Command::SetName.to_wire())
                        .put_u32(tag)
                        .put_string(&name);
                    self.send_with_reply(tag, body.finish(), ReplyHandler::Setup);
                    self.set_state(ContextState::SettingName);
                }
                ContextState::SettingName => self.set_state(ContextState::Ready),
                _ => {}
            },
            ReplyOutcome::Error(code) => self.fail(code),
            ReplyOutcome::Timeout => self.fail(ErrorCode::Timeout),
            ReplyOutcome::Aborted => {}
        }
    }

    // ------------------------------------------------------------------
    // Packet and reply routing
    // ------------------------------------------------------------------

    pub(crate) fn run_reply_handler(&mut self, handler: ReplyHandler, outcome: ReplyOutcome<'_>) {
        match handler {
            ReplyHandler::Setup => self.setup_step(outcome),
            ReplyHandler::SimpleAck { op } => self.complete_simple_ack(op, outcome),
            ReplyHandler::Stat { op } => self.complete_stat(op, outcome),
            ReplyHandler::CreateStream { stream } => self.complete_create_stream(stream, outcome),
        }
    }

    fn complete_simple_ack(&mut self, op: u64, outcome: ReplyOutcome<'_>) {
        let Some(slot) = self.ops.take(op) else {
            return;
        };
        let (success, aborted) = match outcome {
            ReplyOutcome::Reply(reply) => {
                if reply.expect_eof().is_err() {
                    self.fail(ErrorCode::Protocol);
                    (false, false)
                } else {
                    (true, false)
                }
            }
            ReplyOutcome::Error(code) => {
                self.error = code;
                (false, false)
            }
            ReplyOutcome::Timeout => {
                self.error = ErrorCode::Timeout;
                (false, false)
            }
            ReplyOutcome::Aborted => (false, true),
        };
        slot.shared.set(if aborted {
            OperationState::Cancelled
        } else {
            OperationState::Done
        });
        if let Some(OperationCallback::Ack(cb)) = slot.callback {
            cb(self, success);
        }
    }

    fn complete_stat(&mut self, op: u64, outcome: ReplyOutcome<'_>) {
        let Some(slot) = self.ops.take(op) else {
            return;
        };
        let (stats, aborted) = match outcome {
            ReplyOutcome::Reply(mut reply) => {
                let blocks = reply.get_u32();
                let bytes = reply.get_u32();
                match (blocks, bytes) {
                    (Ok(allocated_blocks), Ok(allocated_bytes)) if reply.eof() => (
                        Some(DaemonStats {
                            allocated_blocks,
                            allocated_bytes,
                        }),
                        false,
                    ),
                    _ => {
                        self.fail(ErrorCode::Protocol);
                        (None, false)
                    }
                }
            }
            ReplyOutcome::Error(code) => {
                self.error = code;
                (None, false)
            }
            ReplyOutcome::Timeout => {
                self.error = ErrorCode::Timeout;
                (None, false)
            }
            ReplyOutcome::Aborted => (None, true),
        };
        slot.shared.set(if aborted {
            OperationState::Cancelled
        } else {
            OperationState::Done
        });
        if let Some(OperationCallback::Stat(cb)) = slot.callback {
            cb(self, stats);
        }
    }

    fn dispatch_packet(&mut self, payload: Bytes) {
        let mut reader = TagstructReader::new(&payload);
        let header = (reader.get_u32(), reader.get_u32());
        let (Ok(raw_command), Ok(tag)) = header else {
            self.fail(ErrorCode::Protocol);
            return;
        };
        let Some(command) = Command::from_wire(raw_command) else {
            tracing::warn!(raw_command, "unrecognized command");
            self.fail(ErrorCode::Protocol);
            return;
        };

        if command.is_reply() {
            let Some(handler) = self.dispatch.as_mut().and_then(|d| d.take(tag)) else {
                tracing::warn!(tag, "reply for unknown tag");
                self.fail(ErrorCode::Protocol);
                return;
            };
            let outcome = match command {
                Command::Reply => ReplyOutcome::Reply(reader),
                Command::Error => match reader.get_u32() {
                    Ok(code) => ReplyOutcome::Error(ErrorCode::from_wire(code)),
                    Err(_) => {
                        self.fail(ErrorCode::Protocol);
                        ReplyOutcome::Aborted
                    }
                },
                _ => unreachable!(),
            };
            self.run_reply_handler(handler, outcome);
            self.maybe_complete_drains();
        } else {
            self.handle_event_command(command, reader);
        }
    }

    fn handle_event_command(&mut self, command: Command, mut reader: TagstructReader<'_>) {
        match command {
            Command::Request => {
                let parsed = (reader.get_u32(), reader.get_u32(), reader.expect_eof());
                let (Ok(channel), Ok(bytes), Ok(())) = parsed else {
                    self.fail(ErrorCode::Protocol);
                    return;
                };
                self.handle_request(channel, bytes);
            }
            Command::PlaybackStreamKilled | Command::RecordStreamKilled => {
                let parsed = (reader.get_u32(), reader.expect_eof());
                let (Ok(channel), Ok(())) = parsed else {
                    self.fail(ErrorCode::Protocol);
                    return;
                };
                let direction = if command == Command::PlaybackStreamKilled {
                    StreamDirection::Playback
                } else {
                    StreamDirection::Record
                };
                self.handle_stream_killed(direction, channel);
            }
            Command::SubscribeEvent => {
                let parsed = (reader.get_u32(), reader.get_u32(), reader.expect_eof());
                let (Ok(event), Ok(index), Ok(())) = parsed else {
                    self.fail(ErrorCode::Protocol);
                    return;
                };
                let Some(event) = SubscriptionEvent::decode(event, index) else {
                    self.fail(ErrorCode::Protocol);
                    return;
                };
                self.fire_subscribe_callback(event);
            }
            other => {
                tracing::warn!(command = ?other, "unexpected command from daemon");
                self.fail(ErrorCode::Protocol);
            }
        }
    }

    fn fire_subscribe_callback(&mut self, event: SubscriptionEvent) {
        if let Some(mut cb) = self.subscribe_callback.take() {
            cb(self, event);
            if self.subscribe_callback.is_none() {
                self.subscribe_callback = Some(cb);
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport plumbing
    // ------------------------------------------------------------------

    fn transport_failed(&mut self, err: PstreamError) {
        tracing::warn!("transport failed: {err}");
        match err {
            PstreamError::Frame(_) => self.fail(ErrorCode::Protocol),
            PstreamError::Io(_) => self.fail(ErrorCode::ConnectionTerminated),
        }
    }

    fn flush_pstream(&mut self) {
        let result = match self.pstream.as_mut() {
            Some(pstream) => pstream.flush(),
            None => return,
        };
        match result {
            Ok(true) => self.maybe_complete_drains(),
            Ok(false) => {}
            Err(err) => self.transport_failed(err),
        }
    }

    fn read_pstream(&mut self) {
        let outcome = match self.pstream.as_mut() {
            Some(pstream) => pstream.read_ready(),
            None => return,
        };
        match outcome {
            Ok(outcome) => {
                for item in outcome.items {
                    if self.state.is_terminal() {
                        break;
                    }
                    match item {
                        Inbound::Packet(payload) => self.dispatch_packet(payload),
                        Inbound::Memblock {
                            channel,
                            delta,
                            chunk,
                        } => self.handle_memblock(channel, delta, chunk),
                    }
                }
                if outcome.eof && !self.state.is_terminal() {
                    self.fail(ErrorCode::ConnectionTerminated);
                }
            }
            Err(err) => self.transport_failed(err),
        }
    }

    fn maybe_complete_drains(&mut self) {
        if self.drain_ops.is_empty() || self.is_pending() {
            return;
        }
        for id in std::mem::take(&mut self.drain_ops) {
            if let Some(slot) = self.ops.take(id) {
                slot.shared.set(OperationState::Done);
                if let Some(OperationCallback::Drain(cb)) = slot.callback {
                    cb(self);
                }
            }
        }
    }
}

impl EventSource for Context {
    fn poll_fd(&self) -> Option<(RawFd, Interest)> {
        self.pstream.as_ref().map(|pstream| {
            (
                pstream.fd(),
                Interest {
                    read: true,
                    write: pstream.is_pending(),
                },
            )
        })
    }

    fn dispatch_deferred(&mut self) -> bool {
        let Some(mut client) = self.client.take() else {
            return false;
        };
        match client.finish() {
            Some(outcome) => {
                self.on_connection(outcome);
                true
            }
            None => false,
        }
    }

    fn dispatch_io(&mut self, readable: bool, writable: bool) {
        if writable {
            self.flush_pstream();
        }
        if readable && !self.state.is_terminal() {
            self.read_pstream();
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.dispatch.as_ref().and_then(ReplyDispatcher::next_deadline)
    }

    fn dispatch_deadline(&mut self, now: Instant) {
        let expired = match self.dispatch.as_mut() {
            Some(dispatch) => dispatch.expire(now),
            None => return,
        };
        for (_tag, handler) in expired {
            self.run_reply_handler(handler, ReplyOutcome::Timeout);
        }
        self.maybe_complete_drains();
    }
}
