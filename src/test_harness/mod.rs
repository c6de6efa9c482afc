//! In-process fake daemon for integration tests.
//!
//! Listens on a real UNIX socket inside a caller-provided directory, speaks
//! the native wire protocol, and lets tests script daemon-initiated traffic
//! and observe what the client sent.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, unbounded};

use crate::client::cookie::AuthCookie;
use crate::client::subscribe::SubscriptionEvent;
use crate::config::ClientConfig;
use crate::proto::command::Command;
use crate::proto::frame::{CONTROL_CHANNEL, FrameDecoder, encode_frame};
use crate::proto::tagstruct::{TagstructReader, TagstructWriter};

const MAX_FRAME: usize = 1024 * 1024;

/// Scripted daemon behavior.
#[derive(Debug, Clone)]
pub struct FakeDaemonConfig {
    /// Reject AUTH with an `AuthKey` error even when the cookie matches.
    pub reject_auth: bool,
    /// Wire command ids to swallow without replying (for timeout tests).
    pub mute: BTreeSet<u32>,
    /// Wire command ids to reject with an `AccessDenied` error.
    pub error_on: BTreeSet<u32>,
    /// Counters answered to STAT.
    pub stats: (u32, u32),
    /// Channel id assigned to the next playback stream.
    pub playback_channel: u32,
    /// Initial write credit granted with a playback stream.
    pub initial_request: u32,
    /// Channel id assigned to the next record stream.
    pub record_channel: u32,
}

impl Default for FakeDaemonConfig {
    fn default() -> Self {
        Self {
            reject_auth: false,
            mute: BTreeSet::new(),
            error_on: BTreeSet::new(),
            stats: (7, 4096),
            playback_channel: 0,
            initial_request: 8192,
            record_channel: 0,
        }
    }
}

/// A control packet header observed from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedCommand {
    pub command: u32,
    pub tag: u32,
}

/// A memory block observed from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMemblock {
    pub channel: u32,
    pub delta: i32,
    pub data: Vec<u8>,
}

enum Push {
    Frame(Bytes),
    CloseConnection,
}

pub struct FakeDaemon {
    socket_path: PathBuf,
    cookie_path: PathBuf,
    commands: Receiver<ReceivedCommand>,
    memblocks: Receiver<ReceivedMemblock>,
    push_tx: Sender<Push>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeDaemon {
    /// Spawn a daemon inside `dir`, writing its socket and cookie there.
    pub fn spawn(dir: &Path) -> std::io::Result<Self> {
        Self::spawn_with(dir, FakeDaemonConfig::default())
    }

    pub fn spawn_with(dir: &Path, config: FakeDaemonConfig) -> std::io::Result<Self> {
        let socket_path = dir.join("native");
        let cookie_path = dir.join("cookie");

        let cookie = AuthCookie::generate();
        cookie.save(&cookie_path)?;

        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;

        let (cmd_tx, commands) = unbounded();
        let (mb_tx, memblocks) = unbounded();
        let (push_tx, push_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_shutdown = Arc::clone(&shutdown);
        let handle = std::thread::spawn(move || {
            accept_loop(
                listener,
                config,
                cookie,
                cmd_tx,
                mb_tx,
                push_rx,
                thread_shutdown,
            );
        });

        Ok(Self {
            socket_path,
            cookie_path,
            commands,
            memblocks,
            push_tx,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Server string to hand to `Context::connect`.
    pub fn server_str(&self) -> String {
        self.socket_path.display().to_string()
    }

    pub fn cookie_path(&self) -> &Path {
        &self.cookie_path
    }

    /// A client config pointed at this daemon's cookie, with test-friendly
    /// timeouts.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            cookie_path: Some(self.cookie_path.clone()),
            reply_timeout_ms: 2_000,
            connect_timeout_ms: 1_000,
            ..ClientConfig::default()
        }
    }

    pub fn next_command(&self, timeout: Duration) -> Option<ReceivedCommand> {
        self.commands.recv_timeout(timeout).ok()
    }

    pub fn next_memblock(&self, timeout: Duration) -> Option<ReceivedMemblock> {
        self.memblocks.recv_timeout(timeout).ok()
    }

    /// Ship a raw control packet to the client.
    pub fn push_packet(&self, body: Bytes) {
        let frame = encode_frame(CONTROL_CHANNEL, 0, &body, MAX_FRAME).expect("encode push frame");
        let _ = self.push_tx.send(Push::Frame(frame));
    }

    pub fn push_request(&self, channel: u32, bytes: u32) {
        let mut body = TagstructWriter::new();
        body.put_u32(Command::Request.to_wire())
            .put_u32(0)
            .put_u32(channel)
            .put_u32(bytes);
        self.push_packet(body.finish());
    }

    pub fn push_subscribe_event(&self, event: SubscriptionEvent) {
        let mut body = TagstructWriter::new();
        body.put_u32(Command::SubscribeEvent.to_wire())
            .put_u32(0)
            .put_u32(event.encode())
            .put_u32(event.index);
        self.push_packet(body.finish());
    }

    pub fn push_kill_playback(&self, channel: u32) {
        let mut body = TagstructWriter::new();
        body.put_u32(Command::PlaybackStreamKilled.to_wire())
            .put_u32(0)
            .put_u32(channel);
        self.push_packet(body.finish());
    }

    pub fn push_kill_record(&self, channel: u32) {
        let mut body = TagstructWriter::new();
        body.put_u32(Command::RecordStreamKilled.to_wire())
            .put_u32(0)
            .put_u32(channel);
        self.push_packet(body.finish());
    }

    /// Ship audio to a record channel.
    pub fn push_memblock(&self, channel: u32, delta: i32, data: &[u8]) {
        let frame = encode_frame(channel, delta, data, MAX_FRAME).expect("encode memblock frame");
        let _ = self.push_tx.send(Push::Frame(frame));
    }

    /// Drop the client connection, producing an EOF on the client side.
    pub fn close_connection(&self) {
        let _ = self.push_tx.send(Push::CloseConnection);
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: UnixListener,
    config: FakeDaemonConfig,
    cookie: AuthCookie,
    cmd_tx: Sender<ReceivedCommand>,
    mb_tx: Sender<ReceivedMemblock>,
    push_rx: Receiver<Push>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                serve(
                    stream,
                    &config,
                    &cookie,
                    &cmd_tx,
                    &mb_tx,
                    &push_rx,
                    &shutdown,
                );
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(_) => return,
        }
    }
}

fn serve(
    mut stream: UnixStream,
    config: &FakeDaemonConfig,
    cookie: &AuthCookie,
    cmd_tx: &Sender<ReceivedCommand>,
    mb_tx: &Sender<ReceivedMemblock>,
    push_rx: &Receiver<Push>,
    shutdown: &AtomicBool,
) {
    if stream.set_nonblocking(false).is_err()
        || stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .is_err()
    {
        return;
    }

    let mut decoder = FrameDecoder::new(MAX_FRAME);
    let mut buf = [0u8; 16 * 1024];

    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        while let Ok(push) = push_rx.try_recv() {
            match push {
                Push::Frame(frame) => {
                    if stream.write_all(&frame).is_err() {
                        return;
                    }
                }
                Push::CloseConnection => {
                    let _ = stream.shutdown(Shutdown::Both);
                    return;
                }
            }
        }

        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                decoder.extend(&buf[..n]);
                loop {
                    match decoder.next_frame() {
                        Ok(Some((header, payload))) => {
                            if header.channel == CONTROL_CHANNEL {
                                if !handle_packet(&mut stream, config, cookie, cmd_tx, &payload) {
                                    return;
                                }
                            } else {
                                let _ = mb_tx.send(ReceivedMemblock {
                                    channel: header.channel,
                                    delta: header.delta,
                                    data: payload.to_vec(),
                                });
                            }
                        }
                        Ok(None) => break,
                        Err(_) => return,
                    }
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => return,
        }
    }
}

/// Returns false when the connection should be dropped.
fn handle_packet(
    stream: &mut UnixStream,
    config: &FakeDaemonConfig,
    cookie: &AuthCookie,
    cmd_tx: &Sender<ReceivedCommand>,
    payload: &[u8],
) -> bool {
    let mut reader = TagstructReader::new(payload);
    let (Ok(raw_command), Ok(tag)) = (reader.get_u32(), reader.get_u32()) else {
        return false;
    };
    let _ = cmd_tx.send(ReceivedCommand {
        command: raw_command,
        tag,
    });

    if config.mute.contains(&raw_command) {
        return true;
    }

    if config.error_on.contains(&raw_command) {
        let frame = match encode_frame(
            CONTROL_CHANNEL,
            0,
            &error_packet(tag, crate::ErrorCode::AccessDenied),
            MAX_FRAME,
        ) {
            Ok(frame) => frame,
            Err(_) => return false,
        };
        return stream.write_all(&frame).is_ok();
    }

    let response = match Command::from_wire(raw_command) {
        Some(Command::Auth) => match reader.get_arbitrary() {
            Ok(presented) if presented == cookie.as_bytes() && !config.reject_auth => {
                reply_packet(tag)
            }
            _ => error_packet(tag, crate::ErrorCode::AuthKey),
        },
        Some(Command::SetName) => match reader.get_string() {
            Ok(name) if !name.is_empty() => reply_packet(tag),
            _ => error_packet(tag, crate::ErrorCode::InvalidArgument),
        },
        Some(Command::Exit) => return true,
        Some(Command::Stat) => {
            let mut body = reply_header(tag);
            body.put_u32(config.stats.0).put_u32(config.stats.1);
            body.finish()
        }
        Some(Command::Subscribe) => match reader.get_u32() {
            Ok(_mask) => reply_packet(tag),
            Err(_) => error_packet(tag, crate::ErrorCode::InvalidArgument),
        },
        Some(Command::CreatePlaybackStream) => {
            let mut body = reply_header(tag);
            body.put_u32(config.playback_channel)
                .put_u32(config.initial_request);
            body.finish()
        }
        Some(Command::CreateRecordStream) => {
            let mut body = reply_header(tag);
            body.put_u32(config.record_channel);
            body.finish()
        }
        Some(Command::DeletePlaybackStream) | Some(Command::DeleteRecordStream) => {
            reply_packet(tag)
        }
        _ => error_packet(tag, crate::ErrorCode::InvalidCommand),
    };

    let frame = match encode_frame(CONTROL_CHANNEL, 0, &response, MAX_FRAME) {
        Ok(frame) => frame,
        Err(_) => return false,
    };
    stream.write_all(&frame).is_ok()
}

fn reply_header(tag: u32) -> TagstructWriter {
    let mut body = TagstructWriter::new();
    body.put_u32(Command::Reply.to_wire()).put_u32(tag);
    body
}

fn reply_packet(tag: u32) -> Bytes {
    reply_header(tag).finish()
}

fn error_packet(tag: u32, code: crate::ErrorCode) -> Bytes {
    let mut body = TagstructWriter::new();
    body.put_u32(Command::Error.to_wire())
        .put_u32(tag)
        .put_u32(code.to_wire());
    body.finish()
}
