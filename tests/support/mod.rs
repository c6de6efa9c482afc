//! Shared plumbing for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use sonance_client::test_harness::FakeDaemon;
use sonance_client::{Context, ContextState, Mainloop};

pub const SETTLE: Duration = Duration::from_secs(5);

/// Records every state-callback invocation.
#[derive(Clone, Default)]
pub struct StateLog {
    states: Rc<RefCell<Vec<ContextState>>>,
}

impl StateLog {
    pub fn attach(ctx: &mut Context) -> Self {
        let log = Self::default();
        let states = Rc::clone(&log.states);
        ctx.set_state_callback(move |_, state| states.borrow_mut().push(state));
        log
    }

    pub fn states(&self) -> Vec<ContextState> {
        self.states.borrow().clone()
    }
}

/// Drive the loop for `ms` milliseconds regardless of progress.
pub fn pump(ml: &mut Mainloop, ctx: &mut Context, ms: u64) {
    let _ = ml.run_until(ctx, Duration::from_millis(ms), |_| false);
}

/// Connect a fresh context to `daemon` and drive it to `Ready`.
pub fn ready_context(daemon: &FakeDaemon) -> (Mainloop, Context) {
    ready_context_with(daemon, daemon.client_config())
}

pub fn ready_context_with(
    daemon: &FakeDaemon,
    config: sonance_client::ClientConfig,
) -> (Mainloop, Context) {
    let mut ml = Mainloop::new();
    let mut ctx = Context::with_config("sonance-tests", config);
    ctx.connect(Some(&daemon.server_str())).unwrap();
    let settled = ml
        .run_until(&mut ctx, SETTLE, |c| {
            c.state().is_ready() || c.state().is_terminal()
        })
        .unwrap();
    assert!(settled, "context never settled");
    assert_eq!(
        ctx.state(),
        ContextState::Ready,
        "connect failed: {:?}",
        ctx.last_error()
    );
    (ml, ctx)
}
