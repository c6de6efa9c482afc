//! Request/reply operations: acks, stats, drain, timeouts.

mod support;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use sonance_client::proto::Command;
use sonance_client::proto::TagstructWriter;
use sonance_client::test_harness::{FakeDaemon, FakeDaemonConfig};
use sonance_client::{
    ContextState, DaemonStats, ErrorCode, OperationState, SubscriptionEvent, SubscriptionFacility,
    SubscriptionMask, SubscriptionOperation,
};

use support::{SETTLE, ready_context, ready_context_with};

#[test]
fn stat_reply_reaches_the_callback() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let result: Rc<Cell<Option<Option<DaemonStats>>>> = Rc::new(Cell::new(None));
    let result2 = Rc::clone(&result);
    let op = ctx
        .stat(move |_, stats| result2.set(Some(stats)))
        .unwrap();

    let settled = ml
        .run_until(&mut ctx, SETTLE, |_| result.get().is_some())
        .unwrap();
    assert!(settled);
    assert_eq!(
        result.get().unwrap(),
        Some(DaemonStats {
            allocated_blocks: 7,
            allocated_bytes: 4096,
        })
    );
    assert_eq!(op.state(), OperationState::Done);
    assert_eq!(ctx.state(), ContextState::Ready);
}

#[test]
fn subscribe_ack_then_event_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let events = Rc::new(RefCell::new(Vec::new()));
    let events2 = Rc::clone(&events);
    ctx.set_subscribe_callback(move |_, event| events2.borrow_mut().push(event));

    let acked = Rc::new(Cell::new(None));
    let acked2 = Rc::clone(&acked);
    ctx.subscribe(
        SubscriptionMask::SINK | SubscriptionMask::CLIENT,
        move |_, success| acked2.set(Some(success)),
    )
    .unwrap();

    let settled = ml
        .run_until(&mut ctx, SETTLE, |_| acked.get().is_some())
        .unwrap();
    assert!(settled);
    assert_eq!(acked.get(), Some(true));

    let pushed = SubscriptionEvent {
        facility: SubscriptionFacility::Sink,
        operation: SubscriptionOperation::Changed,
        index: 3,
    };
    daemon.push_subscribe_event(pushed);
    let settled = ml
        .run_until(&mut ctx, SETTLE, |_| !events.borrow().is_empty())
        .unwrap();
    assert!(settled);
    assert_eq!(*events.borrow(), vec![pushed]);
    assert_eq!(ctx.state(), ContextState::Ready);
}

#[test]
fn request_level_error_keeps_the_context_ready() {
    let dir = tempfile::tempdir().unwrap();
    let mut fake = FakeDaemonConfig::default();
    fake.error_on.insert(Command::Subscribe.to_wire());
    let daemon = FakeDaemon::spawn_with(dir.path(), fake).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let acked = Rc::new(Cell::new(None));
    let acked2 = Rc::clone(&acked);
    let op = ctx
        .subscribe(SubscriptionMask::ALL, move |_, success| {
            acked2.set(Some(success))
        })
        .unwrap();

    let settled = ml
        .run_until(&mut ctx, SETTLE, |_| acked.get().is_some())
        .unwrap();
    assert!(settled);
    assert_eq!(acked.get(), Some(false));
    assert_eq!(op.state(), OperationState::Done);
    assert_eq!(ctx.state(), ContextState::Ready);
    assert_eq!(ctx.last_error(), ErrorCode::AccessDenied);
}

#[test]
fn silent_request_times_out_but_session_survives() {
    let dir = tempfile::tempdir().unwrap();
    let mut fake = FakeDaemonConfig::default();
    fake.mute.insert(Command::Stat.to_wire());
    let daemon = FakeDaemon::spawn_with(dir.path(), fake).unwrap();

    let mut config = daemon.client_config();
    config.reply_timeout_ms = 150;
    let (mut ml, mut ctx) = ready_context_with(&daemon, config);

    let result = Rc::new(Cell::new(None));
    let result2 = Rc::clone(&result);
    let op = ctx.stat(move |_, stats| result2.set(Some(stats))).unwrap();

    let settled = ml
        .run_until(&mut ctx, SETTLE, |_| result.get().is_some())
        .unwrap();
    assert!(settled);
    assert_eq!(result.get(), Some(None));
    assert_eq!(op.state(), OperationState::Done);
    assert_eq!(ctx.state(), ContextState::Ready);
    assert_eq!(ctx.last_error(), ErrorCode::Timeout);
}

#[test]
fn eof_completes_inflight_operations_unsuccessfully() {
    let dir = tempfile::tempdir().unwrap();
    let mut fake = FakeDaemonConfig::default();
    fake.mute.insert(Command::Stat.to_wire());
    let daemon = FakeDaemon::spawn_with(dir.path(), fake).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let calls = Rc::new(RefCell::new(Vec::new()));
    let calls2 = Rc::clone(&calls);
    ctx.stat(move |_, stats| calls2.borrow_mut().push(stats))
        .unwrap();

    // Flush the request, wait until the daemon has seen it, then cut the
    // wire.
    support::pump(&mut ml, &mut ctx, 200);
    assert!(daemon.next_command(SETTLE).is_some()); // AUTH
    assert!(daemon.next_command(SETTLE).is_some()); // SET_NAME
    assert!(daemon.next_command(SETTLE).is_some()); // STAT
    daemon.close_connection();

    let settled = ml
        .run_until(&mut ctx, SETTLE, |c| c.state().is_terminal())
        .unwrap();
    assert!(settled);
    assert_eq!(ctx.state(), ContextState::Failed);
    assert_eq!(ctx.last_error(), ErrorCode::ConnectionTerminated);
    // The operation callback fired exactly once, unsuccessfully.
    assert_eq!(*calls.borrow(), vec![None]);
}

#[test]
fn exit_daemon_is_fire_and_forget() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    assert!(daemon.next_command(SETTLE).is_some()); // AUTH
    let set_name = daemon.next_command(SETTLE).unwrap();

    ctx.exit_daemon().unwrap();
    assert!(ctx.is_pending());

    let settled = ml
        .run_until(&mut ctx, SETTLE, |c| !c.is_pending())
        .unwrap();
    assert!(settled);

    let exit = daemon.next_command(SETTLE).unwrap();
    assert_eq!(exit.command, Command::Exit.to_wire());
    assert!(exit.tag > set_name.tag);
    assert_eq!(ctx.state(), ContextState::Ready);
}

#[test]
fn drain_on_idle_context_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    // Let the handshake traffic fully drain first.
    ml.run_until(&mut ctx, SETTLE, |c| !c.is_pending()).unwrap();
    assert!(ctx.drain(|_| {}).is_none());
}

#[test]
fn drain_fires_once_after_pending_work_completes() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let stat_done = Rc::new(Cell::new(false));
    let stat_done2 = Rc::clone(&stat_done);
    ctx.stat(move |_, _| stat_done2.set(true)).unwrap();
    assert!(ctx.is_pending());

    let drained = Rc::new(Cell::new(0u32));
    let drained2 = Rc::clone(&drained);
    let op = ctx.drain(move |_| drained2.set(drained2.get() + 1)).unwrap();
    assert!(op.is_running());

    let settled = ml
        .run_until(&mut ctx, SETTLE, |_| drained.get() > 0)
        .unwrap();
    assert!(settled);
    assert_eq!(drained.get(), 1);
    assert!(stat_done.get(), "drain fired before the request completed");
    assert_eq!(op.state(), OperationState::Done);
    assert!(!ctx.is_pending());
}

#[test]
fn reply_with_unknown_tag_is_a_protocol_failure() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let mut body = TagstructWriter::new();
    body.put_u32(Command::Reply.to_wire()).put_u32(0xDEAD_BEEF);
    daemon.push_packet(body.finish());

    let settled = ml
        .run_until(&mut ctx, SETTLE, |c| c.state().is_terminal())
        .unwrap();
    assert!(settled);
    assert_eq!(ctx.state(), ContextState::Failed);
    assert_eq!(ctx.last_error(), ErrorCode::Protocol);
}

#[test]
fn unknown_command_is_a_protocol_failure() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = FakeDaemon::spawn(dir.path()).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let mut body = TagstructWriter::new();
    body.put_u32(999).put_u32(0);
    daemon.push_packet(body.finish());

    let settled = ml
        .run_until(&mut ctx, SETTLE, |c| c.state().is_terminal())
        .unwrap();
    assert!(settled);
    assert_eq!(ctx.state(), ContextState::Failed);
    assert_eq!(ctx.last_error(), ErrorCode::Protocol);
}

#[test]
fn trailing_bytes_in_an_ack_poison_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut fake = FakeDaemonConfig::default();
    fake.mute.insert(Command::Subscribe.to_wire());
    let daemon = FakeDaemon::spawn_with(dir.path(), fake).unwrap();
    let (mut ml, mut ctx) = ready_context(&daemon);

    let acked = Rc::new(Cell::new(None));
    let acked2 = Rc::clone(&acked);
    ctx.subscribe(SubscriptionMask::ALL, move |_, success| {
        acked2.set(Some(success))
    })
    .unwrap();

    support::pump(&mut ml, &mut ctx, 200);
    assert!(daemon.next_command(SETTLE).is_some()); // AUTH
    assert!(daemon.next_command(SETTLE).is_some()); // SET_NAME
    let subscribe = daemon.next_command(SETTLE).unwrap();

    // Hand-craft the reply with a stray trailing field.
    let mut body = TagstructWriter::new();
    body.put_u32(Command::Reply.to_wire())
        .put_u32(subscribe.tag)
        .put_u32(1234);
    daemon.push_packet(body.finish());

    let settled = ml
        .run_until(&mut ctx, SETTLE, |c| c.state().is_terminal())
        .unwrap();
    assert!(settled);
    assert_eq!(ctx.state(), ContextState::Failed);
    assert_eq!(ctx.last_error(), ErrorCode::Protocol);
    assert_eq!(acked.get(), Some(false));
}
