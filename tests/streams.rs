//! Stream lifecycle, flow control, and memblock delivery.

mod support;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use sonance_client::proto::Command;
use sonance_client::test_harness::{FakeDaemon, FakeDaemonConfig};
use sonance_client::{
    ContextState, ErrorCode, SampleFormat, SampleSpec, StreamState,
};

use support::{SETTLE, pump, ready_context};

fn spec() -> SampleSpec {
    SampleSpec::new(SampleFormat::S16Le, 44_100, 2)
}

#[test]
fn playback_stream_creation_assigns_channel_and_credit() {
    let dir = tempfile::tempdir().unwrap();
    let mut fake = FakeDaemonConfig::default();
    fake.playback_channel = 4;
    fake.initial_request = 8192;
    let daemon = FakeDaemon::spawn_with(dir.path(), fake).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let id = ctx
        .create_playback_stream("music", spec(), 16_384)
        .unwrap();
    assert_eq!(ctx.stream_state(id), Some(StreamState::Creating));

    let settled = ml
        .run_until(&mut ctx, SETTLE, |c| {
            c.stream_state(id) != Some(StreamState::Creating)
        })
        .unwrap();
    assert!(settled);
    assert_eq!(ctx.stream_state(id), Some(StreamState::Ready));
    assert_eq!(ctx.stream_channel(id), Some(4));
    assert_eq!(ctx.stream_requested_bytes(id), 8192);
    assert_eq!(ctx.stream_spec(id), Some(spec()));
}

#[test]
fn invalid_sample_spec_is_rejected_locally() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (_ml, mut ctx) = ready_context(&daemon);

    let bad = SampleSpec::new(SampleFormat::U8, 0, 1);
    assert!(ctx.create_playback_stream("music", bad, 1024).is_err());
}

#[test]
fn request_event_grants_credit_and_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let id = ctx.create_playback_stream("music", spec(), 0).unwrap();
    ml.run_until(&mut ctx, SETTLE, |c| {
        c.stream_state(id) == Some(StreamState::Ready)
    })
    .unwrap();
    let base = ctx.stream_requested_bytes(id);

    let granted = Rc::new(Cell::new(0usize));
    let granted2 = Rc::clone(&granted);
    ctx.set_stream_write_callback(id, move |_, _, requested| granted2.set(requested));

    let channel = ctx.stream_channel(id).unwrap();
    daemon.push_request(channel, 1000);

    let settled = ml
        .run_until(&mut ctx, SETTLE, |_| granted.get() > 0)
        .unwrap();
    assert!(settled);
    assert_eq!(granted.get(), base + 1000);
    assert_eq!(ctx.stream_requested_bytes(id), base + 1000);
}

#[test]
fn stream_write_ships_a_memblock_and_consumes_credit() {
    let dir = tempfile::tempdir().unwrap();
    let mut fake = FakeDaemonConfig::default();
    fake.playback_channel = 9;
    let daemon = FakeDaemon::spawn_with(dir.path(), fake).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let id = ctx.create_playback_stream("music", spec(), 0).unwrap();
    ml.run_until(&mut ctx, SETTLE, |c| {
        c.stream_state(id) == Some(StreamState::Ready)
    })
    .unwrap();
    let credit = ctx.stream_requested_bytes(id);

    let audio = vec![0x5Au8; 400];
    ctx.stream_write(id, &audio).unwrap();
    assert_eq!(ctx.stream_requested_bytes(id), credit - 400);

    pump(&mut ml, &mut ctx, 200);
    let block = daemon.next_memblock(SETTLE).unwrap();
    assert_eq!(block.channel, 9);
    assert_eq!(block.data, audio);
}

#[test]
fn record_stream_delivers_chunks_to_the_read_callback() {
    let dir = tempfile::tempdir().unwrap();
    let mut fake = FakeDaemonConfig::default();
    fake.record_channel = 2;
    let daemon = FakeDaemon::spawn_with(dir.path(), fake).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let id = ctx.create_record_stream("capture", spec()).unwrap();
    ml.run_until(&mut ctx, SETTLE, |c| {
        c.stream_state(id) == Some(StreamState::Ready)
    })
    .unwrap();

    let chunks = Rc::new(RefCell::new(Vec::new()));
    let chunks2 = Rc::clone(&chunks);
    ctx.set_stream_read_callback(id, move |_, _, data| {
        chunks2.borrow_mut().push(data.to_vec())
    });

    daemon.push_memblock(2, 0, b"pcm-data");
    let settled = ml
        .run_until(&mut ctx, SETTLE, |_| !chunks.borrow().is_empty())
        .unwrap();
    assert!(settled);
    assert_eq!(*chunks.borrow(), vec![b"pcm-data".to_vec()]);
    // The transport chunk was released after the callback returned.
    assert_eq!(ctx.memblock_usage().allocated, 0);
}

#[test]
fn memblock_for_unknown_channel_is_silently_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    daemon.push_memblock(7, 0, b"orphan");
    pump(&mut ml, &mut ctx, 200);

    assert_eq!(ctx.state(), ContextState::Ready);
    assert_eq!(ctx.last_error(), ErrorCode::Ok);
}

#[test]
fn killed_stream_fails_with_killed_error() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let id = ctx.create_playback_stream("music", spec(), 0).unwrap();
    ml.run_until(&mut ctx, SETTLE, |c| {
        c.stream_state(id) == Some(StreamState::Ready)
    })
    .unwrap();

    let observed = Rc::new(RefCell::new(Vec::new()));
    let observed2 = Rc::clone(&observed);
    ctx.set_stream_state_callback(id, move |_, _, state| {
        observed2.borrow_mut().push(state)
    });

    let channel = ctx.stream_channel(id).unwrap();
    daemon.push_kill_playback(channel);

    let settled = ml
        .run_until(&mut ctx, SETTLE, |c| {
            c.stream_state(id) == Some(StreamState::Failed)
        })
        .unwrap();
    assert!(settled);
    assert_eq!(ctx.stream_error(id), Some(ErrorCode::Killed));
    assert_eq!(*observed.borrow(), vec![StreamState::Failed]);
    // Session-level state is unaffected.
    assert_eq!(ctx.state(), ContextState::Ready);
}

#[test]
fn terminal_context_sweeps_all_streams() {
    let dir = tempfile::tempdir().unwrap();
    let mut fake = FakeDaemonConfig::default();
    fake.playback_channel = 1;
    fake.record_channel = 2;
    let daemon = FakeDaemon::spawn_with(dir.path(), fake).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let playback = ctx.create_playback_stream("music", spec(), 0).unwrap();
    let record = ctx.create_record_stream("capture", spec()).unwrap();
    ml.run_until(&mut ctx, SETTLE, |c| {
        c.stream_state(playback) == Some(StreamState::Ready)
            && c.stream_state(record) == Some(StreamState::Ready)
    })
    .unwrap();

    daemon.close_connection();
    let settled = ml
        .run_until(&mut ctx, SETTLE, |c| c.state().is_terminal())
        .unwrap();
    assert!(settled);
    assert_eq!(ctx.state(), ContextState::Failed);
    assert_eq!(ctx.stream_state(playback), Some(StreamState::Failed));
    assert_eq!(ctx.stream_state(record), Some(StreamState::Failed));
}

#[test]
fn disconnect_terminates_streams() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let id = ctx.create_playback_stream("music", spec(), 0).unwrap();
    ml.run_until(&mut ctx, SETTLE, |c| {
        c.stream_state(id) == Some(StreamState::Ready)
    })
    .unwrap();

    ctx.disconnect();
    assert_eq!(ctx.stream_state(id), Some(StreamState::Terminated));

    // Terminal slots can be released.
    ctx.release_stream(id);
    assert_eq!(ctx.stream_state(id), None);
}

#[test]
fn delete_stream_notifies_the_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let id = ctx.create_playback_stream("music", spec(), 0).unwrap();
    ml.run_until(&mut ctx, SETTLE, |c| {
        c.stream_state(id) == Some(StreamState::Ready)
    })
    .unwrap();

    ctx.delete_stream(id).unwrap();
    assert_eq!(ctx.stream_state(id), Some(StreamState::Terminated));
    pump(&mut ml, &mut ctx, 200);

    let mut saw_delete = false;
    while let Some(cmd) = daemon.next_command(Duration::from_millis(200)) {
        if cmd.command == Command::DeletePlaybackStream.to_wire() {
            saw_delete = true;
            break;
        }
    }
    assert!(saw_delete, "daemon never saw the delete request");
    assert_eq!(ctx.state(), ContextState::Ready);
}
