//! Playback and record streams.
//!
//! Streams are children of a [`Context`]: created over the wire, addressed
//! by a daemon-assigned channel id while the session is ready, and forced
//! into a matching terminal state when the session ends.

use crate::error::{Error, ErrorCode};
use crate::proto::command::Command;
use crate::proto::tagstruct::TagstructWriter;
use crate::sample::SampleSpec;

use super::context::{Context, ContextState, ReplyOutcome};
use super::dispatch::ReplyHandler;
use super::memblock::Memchunk;

/// Stable handle to a stream owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Playback,
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Creation request in flight.
    Creating,
    /// Channel assigned; data may flow.
    Ready,
    /// The stream or its session failed.
    Failed,
    /// Cleanly shut down.
    Terminated,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Failed | StreamState::Terminated)
    }
}

pub(crate) type StreamStateCallback = Box<dyn FnMut(&mut Context, StreamId, StreamState)>;
pub(crate) type StreamReadCallback = Box<dyn FnMut(&mut Context, StreamId, &[u8])>;
pub(crate) type StreamWriteCallback = Box<dyn FnMut(&mut Context, StreamId, usize)>;

pub(crate) struct StreamSlot {
    pub name: String,
    pub direction: StreamDirection,
    pub spec: SampleSpec,
    pub state: StreamState,
    pub error: ErrorCode,
    pub channel: Option<u32>,
    /// Write credit granted by the daemon (playback only).
    pub requested_bytes: usize,
    pub state_callback: Option<StreamStateCallback>,
    pub read_callback: Option<StreamReadCallback>,
    pub write_callback: Option<StreamWriteCallback>,
}

impl StreamSlot {
    fn new(name: String, direction: StreamDirection, spec: SampleSpec) -> Self {
        Self {
            name,
            direction,
            spec,
            state: StreamState::Creating,
            error: ErrorCode::Ok,
            channel: None,
            requested_bytes: 0,
            state_callback: None,
            read_callback: None,
            write_callback: None,
        }
    }
}

impl Context {
    /// Ask the daemon for a playback stream. The stream starts in
    /// [`StreamState::Creating`]; watch its state callback for the outcome.
    pub fn create_playback_stream(
        &mut self,
        name: &str,
        spec: SampleSpec,
        target_length: u32,
    ) -> crate::Result<StreamId> {
        let id = self.new_stream(name, StreamDirection::Playback, spec)?;
        let tag = self.next_tag();
        let mut body = TagstructWriter::new();
        body.put_u32(Command::CreatePlaybackStream.to_wire())
            .put_u32(tag)
            .put_string(name)
            .put_sample_spec(&spec)
            .put_u32(target_length);
        self.send_with_reply(tag, body.finish(), ReplyHandler::CreateStream { stream: id });
        Ok(id)
    }

    /// Ask the daemon for a record stream.
    pub fn create_record_stream(
        &mut self,
        name: &str,
        spec: SampleSpec,
    ) -> crate::Result<StreamId> {
        let id = self.new_stream(name, StreamDirection::Record, spec)?;
        let tag = self.next_tag();
        let mut body = TagstructWriter::new();
        body.put_u32(Command::CreateRecordStream.to_wire())
            .put_u32(tag)
            .put_string(name)
            .put_sample_spec(&spec);
        self.send_with_reply(tag, body.finish(), ReplyHandler::CreateStream { stream: id });
        Ok(id)
    }

    fn new_stream(
        &mut self,
        name: &str,
        direction: StreamDirection,
        spec: SampleSpec,
    ) -> crate::Result<StreamId> {
        if self.state() != ContextState::Ready {
            return Err(Error::InvalidState("stream creation requires a ready context"));
        }
        if !spec.is_valid() {
            return Err(Error::Daemon(ErrorCode::InvalidArgument));
        }
        let id = self.alloc_stream_id();
        self.streams
            .insert(id, StreamSlot::new(name.to_owned(), direction, spec));
        Ok(id)
    }

    /// Tear down a ready stream: tell the daemon, then terminate locally.
    pub fn delete_stream(&mut self, id: StreamId) -> crate::Result<()> {
        let (direction, channel) = match self.streams.get(&id) {
            Some(slot) if slot.state == StreamState::Ready => (slot.direction, slot.channel),
            Some(_) => return Err(Error::InvalidState("stream is not ready")),
            None => return Err(Error::Daemon(ErrorCode::NoSuchEntity)),
        };
        let Some(channel) = channel else {
            return Err(Error::InvalidState("stream has no channel"));
        };

        let command = match direction {
            StreamDirection::Playback => Command::DeletePlaybackStream,
            StreamDirection::Record => Command::DeleteRecordStream,
        };
        let tag = self.next_tag();
        let mut body = TagstructWriter::new();
        body.put_u32(command.to_wire()).put_u32(tag).put_u32(channel);
        let (op, _) = self.ops.insert(None);
        self.send_with_reply(tag, body.finish(), ReplyHandler::SimpleAck { op });

        self.stream_set_state(id, StreamState::Terminated);
        Ok(())
    }

    /// Drop a terminal stream slot. Live streams are deleted first.
    pub fn release_stream(&mut self, id: StreamId) {
        let terminal = self
            .streams
            .get(&id)
            .is_some_and(|slot| slot.state.is_terminal());
        if terminal {
            self.unlink_stream_channel(id);
            self.streams.remove(&id);
        }
    }

    pub fn stream_state(&self, id: StreamId) -> Option<StreamState> {
        self.streams.get(&id).map(|slot| slot.state)
    }

    pub fn stream_error(&self, id: StreamId) -> Option<ErrorCode> {
        self.streams.get(&id).map(|slot| slot.error)
    }

    pub fn stream_channel(&self, id: StreamId) -> Option<u32> {
        self.streams.get(&id).and_then(|slot| slot.channel)
    }

    pub fn stream_spec(&self, id: StreamId) -> Option<SampleSpec> {
        self.streams.get(&id).map(|slot| slot.spec)
    }

    pub fn stream_name(&self, id: StreamId) -> Option<&str> {
        self.streams.get(&id).map(|slot| slot.name.as_str())
    }

    /// Outstanding write credit for a playback stream.
    pub fn stream_requested_bytes(&self, id: StreamId) -> usize {
        self.streams
            .get(&id)
            .map(|slot| slot.requested_bytes)
            .unwrap_or(0)
    }

    pub fn set_stream_state_callback(
        &mut self,
        id: StreamId,
        cb: impl FnMut(&mut Context, StreamId, StreamState) + 'static,
    ) {
        if let Some(slot) = self.streams.get_mut(&id) {
            slot.state_callback = Some(Box::new(cb));
        }
    }

    /// Install the record data callback. The slice handed to the callback
    /// points into the transport chunk; copy it before returning.
    pub fn set_stream_read_callback(
        &mut self,
        id: StreamId,
        cb: impl FnMut(&mut Context, StreamId, &[u8]) + 'static,
    ) {
        if let Some(slot) = self.streams.get_mut(&id) {
            slot.read_callback = Some(Box::new(cb));
        }
    }

    /// Install the write-credit callback for a playback stream.
    pub fn set_stream_write_callback(
        &mut self,
        id: StreamId,
        cb: impl FnMut(&mut Context, StreamId, usize) + 'static,
    ) {
        if let Some(slot) = self.streams.get_mut(&id) {
            slot.write_callback = Some(Box::new(cb));
        }
    }

    /// Queue audio on a ready playback stream, consuming write credit.
    pub fn stream_write(&mut self, id: StreamId, data: &[u8]) -> crate::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let channel = match self.streams.get(&id) {
            Some(slot)
                if slot.direction == StreamDirection::Playback
                    && slot.state == StreamState::Ready =>
            {
                slot.channel
            }
            Some(_) => return Err(Error::InvalidState("stream is not a ready playback stream")),
            None => return Err(Error::Daemon(ErrorCode::NoSuchEntity)),
        };
        let Some(channel) = channel else {
            return Err(Error::InvalidState("stream has no channel"));
        };

        let max = self.config.max_frame_bytes;
        let send_result = match self.pstream.as_mut() {
            Some(pstream) => {
                let mut result = Ok(());
                for piece in data.chunks(max) {
                    result = pstream.send_memblock(channel, 0, piece);
                    if result.is_err() {
                        break;
                    }
                }
                result
            }
            None => return Err(Error::InvalidState("context has no transport")),
        };
        if send_result.is_err() {
            self.fail(ErrorCode::Internal);
            return Err(Error::Daemon(ErrorCode::Internal));
        }

        if let Some(slot) = self.streams.get_mut(&id) {
            slot.requested_bytes = slot.requested_bytes.saturating_sub(data.len());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Wire-side entry points, called from packet routing
    // ------------------------------------------------------------------

    pub(crate) fn complete_create_stream(&mut self, id: StreamId, outcome: ReplyOutcome<'_>) {
        if !self
            .streams
            .get(&id)
            .is_some_and(|slot| slot.state == StreamState::Creating)
        {
            return;
        }

        match outcome {
            ReplyOutcome::Reply(mut reply) => {
                let direction = self.streams[&id].direction;
                let channel = match reply.get_u32() {
                    Ok(channel) => channel,
                    Err(_) => {
                        self.fail(ErrorCode::Protocol);
                        return;
                    }
                };
                let initial_request = match direction {
                    StreamDirection::Playback => match reply.get_u32() {
                        Ok(bytes) => bytes as usize,
                        Err(_) => {
                            self.fail(ErrorCode::Protocol);
                            return;
                        }
                    },
                    StreamDirection::Record => 0,
                };
                if reply.expect_eof().is_err() {
                    self.fail(ErrorCode::Protocol);
                    return;
                }

                let channels = match direction {
                    StreamDirection::Playback => &mut self.playback_channels,
                    StreamDirection::Record => &mut self.record_channels,
                };
                if channels.insert(channel, id).is_some() {
                    tracing::warn!(channel, "daemon reassigned a live channel");
                    self.fail(ErrorCode::Protocol);
                    return;
                }

                if let Some(slot) = self.streams.get_mut(&id) {
                    slot.channel = Some(channel);
                    slot.requested_bytes = initial_request;
                }
                self.stream_set_state(id, StreamState::Ready);
            }
            ReplyOutcome::Error(code) => {
                if let Some(slot) = self.streams.get_mut(&id) {
                    slot.error = code;
                }
                self.stream_set_state(id, StreamState::Failed);
            }
            ReplyOutcome::Timeout => {
                if let Some(slot) = self.streams.get_mut(&id) {
                    slot.error = ErrorCode::Timeout;
                }
                self.stream_set_state(id, StreamState::Failed);
            }
            ReplyOutcome::Aborted => {}
        }
    }

    pub(crate) fn handle_request(&mut self, channel: u32, bytes: u32) {
        let Some(&id) = self.playback_channels.get(&channel) else {
            // benign race against a local delete
            tracing::debug!(channel, "write request for unknown channel");
            return;
        };
        let requested = match self.streams.get_mut(&id) {
            Some(slot) => {
                slot.requested_bytes = slot.requested_bytes.saturating_add(bytes as usize);
                slot.requested_bytes
            }
            None => return,
        };
        self.fire_stream_write_callback(id, requested);
    }

    pub(crate) fn handle_stream_killed(&mut self, direction: StreamDirection, channel: u32) {
        let channels = match direction {
            StreamDirection::Playback => &self.playback_channels,
            StreamDirection::Record => &self.record_channels,
        };
        let Some(&id) = channels.get(&channel) else {
            tracing::debug!(channel, "kill for unknown channel");
            return;
        };
        if let Some(slot) = self.streams.get_mut(&id) {
            slot.error = ErrorCode::Killed;
        }
        self.stream_set_state(id, StreamState::Failed);
    }

    pub(crate) fn handle_memblock(&mut self, channel: u32, _delta: i32, chunk: Memchunk) {
        let Some(&id) = self.record_channels.get(&channel) else {
            tracing::trace!(channel, "memblock for unknown channel dropped");
            return;
        };
        let Some(mut cb) = self
            .streams
            .get_mut(&id)
            .and_then(|slot| slot.read_callback.take())
        else {
            return;
        };
        cb(self, id, chunk.data());
        if let Some(slot) = self.streams.get_mut(&id)
            && slot.read_callback.is_none()
        {
            slot.read_callback = Some(cb);
        }
    }

    // ------------------------------------------------------------------
    // State plumbing
    // ------------------------------------------------------------------

    /// Move a stream to `state` and notify its observer. Terminal states
    /// unlink the channel mapping first.
    pub(crate) fn stream_set_state(&mut self, id: StreamId, state: StreamState) {
        let changed = match self.streams.get_mut(&id) {
            Some(slot) if slot.state != state && !slot.state.is_terminal() => {
                slot.state = state;
                true
            }
            _ => false,
        };
        if !changed {
            return;
        }
        if state.is_terminal() {
            self.unlink_stream_channel(id);
        }

        let Some(mut cb) = self
            .streams
            .get_mut(&id)
            .and_then(|slot| slot.state_callback.take())
        else {
            return;
        };
        cb(self, id, state);
        if let Some(slot) = self.streams.get_mut(&id)
            && slot.state_callback.is_none()
        {
            slot.state_callback = Some(cb);
        }
    }

    fn fire_stream_write_callback(&mut self, id: StreamId, requested: usize) {
        let Some(mut cb) = self
            .streams
            .get_mut(&id)
            .and_then(|slot| slot.write_callback.take())
        else {
            return;
        };
        cb(self, id, requested);
        if let Some(slot) = self.streams.get_mut(&id)
            && slot.write_callback.is_none()
        {
            slot.write_callback = Some(cb);
        }
    }

    fn unlink_stream_channel(&mut self, id: StreamId) {
        let Some(slot) = self.streams.get(&id) else {
            return;
        };
        if let Some(channel) = slot.channel {
            match slot.direction {
                StreamDirection::Playback => {
                    self.playback_channels.remove(&channel);
                }
                StreamDirection::Record => {
                    self.record_channels.remove(&channel);
                }
            }
        }
    }
}
