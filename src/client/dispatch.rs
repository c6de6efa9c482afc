//! Reply dispatch registry.
//!
//! Every outgoing request registers its tag here together with a deadline.
//! Incoming `REPLY`/`ERROR` packets claim the entry by tag; the event loop
//! expires overdue entries, which the session turns into synthesized
//! timeouts.

use std::collections::BTreeMap;
use std::time::Instant;

use super::stream::StreamId;

/// What to do with the reply once it arrives. Matched by the session; the
/// user-facing callback, if any, lives in the operation registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyHandler {
    /// Handshake step (AUTH or SET_NAME).
    Setup,
    /// Success/failure acknowledgment for the given operation.
    SimpleAck { op: u64 },
    /// Daemon statistics reply for the given operation.
    Stat { op: u64 },
    /// Stream creation reply.
    CreateStream { stream: StreamId },
}

#[derive(Debug)]
struct PendingReply {
    handler: ReplyHandler,
    deadline: Instant,
}

#[derive(Debug)]
pub(crate) struct ReplyDispatcher {
    pending: BTreeMap<u32, PendingReply>,
}

impl ReplyDispatcher {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tag: u32, handler: ReplyHandler, deadline: Instant) {
        let prev = self.pending.insert(tag, PendingReply { handler, deadline });
        debug_assert!(prev.is_none(), "tag {tag} registered twice");
    }

    /// Claim the entry for `tag`, removing it from the pending set.
    pub fn take(&mut self, tag: u32) -> Option<ReplyHandler> {
        self.pending.remove(&tag).map(|entry| entry.handler)
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|entry| entry.deadline).min()
    }

    /// Remove and return every entry whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<(u32, ReplyHandler)> {
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(tag, _)| *tag)
            .collect();
        expired
            .into_iter()
            .filter_map(|tag| self.take(tag).map(|handler| (tag, handler)))
            .collect()
    }

    /// Remove and return every entry; used for the terminal sweep.
    pub fn drain_all(&mut self) -> Vec<(u32, ReplyHandler)> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(tag, entry)| (tag, entry.handler))
            .collect()
    }
}
