//! Framed packet transport over the session socket.
//!
//! Owns the non-blocking socket, an incremental frame decoder for the read
//! side and a queue of fully encoded frames for the write side. Decoded
//! frames surface as either tagged control packets or per-channel memory
//! blocks; the session routes them.

use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;

use bytes::Bytes;
use thiserror::Error;

use super::memblock::{Memblock, MemblockStat, Memchunk};
use super::socket::SessionSocket;
use crate::proto::frame::{CONTROL_CHANNEL, FrameDecoder, FrameError, encode_frame};

const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum PstreamError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// One decoded inbound frame.
#[derive(Debug)]
pub enum Inbound {
    /// Tagged control packet.
    Packet(Bytes),
    /// Audio memory for a record channel.
    Memblock {
        channel: u32,
        delta: i32,
        chunk: Memchunk,
    },
}

/// What one read-readiness dispatch produced.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub items: Vec<Inbound>,
    /// Peer closed the connection cleanly.
    pub eof: bool,
}

pub struct Pstream {
    socket: SessionSocket,
    decoder: FrameDecoder,
    send_queue: VecDeque<Bytes>,
    send_offset: usize,
    stat: MemblockStat,
    max_frame_bytes: usize,
}

impl Pstream {
    pub fn new(socket: SessionSocket, stat: MemblockStat, max_frame_bytes: usize) -> Self {
        Self {
            socket,
            decoder: FrameDecoder::new(max_frame_bytes),
            send_queue: VecDeque::new(),
            send_offset: 0,
            stat,
            max_frame_bytes,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.socket.fd()
    }

    /// True while encoded frames are waiting in the send queue.
    pub fn is_pending(&self) -> bool {
        !self.send_queue.is_empty()
    }

    pub fn send_packet(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let frame = encode_frame(CONTROL_CHANNEL, 0, payload, self.max_frame_bytes)?;
        self.send_queue.push_back(frame);
        Ok(())
    }

    pub fn send_memblock(&mut self, channel: u32, delta: i32, data: &[u8]) -> Result<(), FrameError> {
        let frame = encode_frame(channel, delta, data, self.max_frame_bytes)?;
        self.send_queue.push_back(frame);
        Ok(())
    }

    /// Write queued frames until the queue drains or the socket would block.
    /// Returns true once the queue is empty.
    pub fn flush(&mut self) -> Result<bool, PstreamError> {
        while let Some(front) = self.send_queue.front() {
            match self.socket.write(&front[self.send_offset..]) {
                Ok(n) => {
                    self.send_offset += n;
                    if self.send_offset == front.len() {
                        self.send_queue.pop_front();
                        self.send_offset = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PstreamError::Io(e)),
            }
        }
        Ok(true)
    }

    /// Drain readable bytes and decode complete frames.
    pub fn read_ready(&mut self) -> Result<ReadOutcome, PstreamError> {
        let mut outcome = ReadOutcome::default();
        let mut buf = [0u8; READ_CHUNK];

        loop {
            match self.socket.read(&mut buf) {
                Ok(0) => {
                    outcome.eof = true;
                    break;
                }
                Ok(n) => {
                    self.decoder.extend(&buf[..n]);
                    while let Some((header, payload)) = self.decoder.next_frame()? {
                        if header.channel == CONTROL_CHANNEL {
                            outcome.items.push(Inbound::Packet(payload));
                        } else {
                            let block = Memblock::new(payload, &self.stat);
                            outcome.items.push(Inbound::Memblock {
                                channel: header.channel,
                                delta: header.delta,
                                chunk: Memchunk::from_block(block),
                            });
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PstreamError::Io(e)),
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    fn pair() -> (Pstream, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let pstream = Pstream::new(
            SessionSocket::Unix(ours),
            MemblockStat::new(),
            1024 * 1024,
        );
        (pstream, theirs)
    }

    #[test]
    fn queued_packets_flush_and_arrive_framed() {
        let (mut pstream, mut peer) = pair();

        pstream.send_packet(b"control").unwrap();
        assert!(pstream.is_pending());
        assert!(pstream.flush().unwrap());
        assert!(!pstream.is_pending());

        let mut decoder = FrameDecoder::new(1024);
        let mut buf = [0u8; 256];
        let n = std::io::Read::read(&mut peer, &mut buf).unwrap();
        decoder.extend(&buf[..n]);
        let (header, payload) = decoder.next_frame().unwrap().unwrap();
        assert_eq!(header.channel, CONTROL_CHANNEL);
        assert_eq!(&payload[..], b"control");
    }

    #[test]
    fn inbound_frames_split_into_packets_and_memblocks() {
        let (mut pstream, mut peer) = pair();

        let packet = encode_frame(CONTROL_CHANNEL, 0, b"tagged", 1024).unwrap();
        let block = encode_frame(5, 3, b"samples", 1024).unwrap();
        peer.write_all(&packet).unwrap();
        peer.write_all(&block).unwrap();

        let outcome = pstream.read_ready().unwrap();
        assert!(!outcome.eof);
        assert_eq!(outcome.items.len(), 2);
        match &outcome.items[0] {
            Inbound::Packet(payload) => assert_eq!(&payload[..], b"tagged"),
            other => panic!("expected packet, got {other:?}"),
        }
        match &outcome.items[1] {
            Inbound::Memblock {
                channel,
                delta,
                chunk,
            } => {
                assert_eq!(*channel, 5);
                assert_eq!(*delta, 3);
                assert_eq!(chunk.data(), b"samples");
            }
            other => panic!("expected memblock, got {other:?}"),
        }
    }

    #[test]
    fn peer_close_reports_eof() {
        let (mut pstream, peer) = pair();
        drop(peer);
        let outcome = pstream.read_ready().unwrap();
        assert!(outcome.eof);
        assert!(outcome.items.is_empty());
    }

    #[test]
    fn memblocks_are_accounted_until_dropped() {
        let (ours, mut peer) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let stat = MemblockStat::new();
        let mut pstream = Pstream::new(SessionSocket::Unix(ours), stat.clone(), 1024);

        let block = encode_frame(1, 0, b"abcd", 1024).unwrap();
        peer.write_all(&block).unwrap();

        let outcome = pstream.read_ready().unwrap();
        assert_eq!(stat.snapshot().allocated, 1);
        drop(outcome);
        assert_eq!(stat.snapshot().allocated, 0);
    }
}
