//! Single-threaded event loop.
//!
//! The loop owns `poll(2)` and the clock; anything driven by it implements
//! [`EventSource`]: it exposes at most one poll fd with its interest set,
//! a queue of deferred work, and its earliest deadline. All dispatching
//! happens on the caller's thread.

use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};

/// Poll interest for an event source's fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

/// Something the mainloop can drive.
pub trait EventSource {
    /// The fd to poll, if any, with its current interest.
    fn poll_fd(&self) -> Option<(RawFd, Interest)>;

    /// Run work that is ready without waiting (e.g. a completed connection
    /// attempt). Returns true if anything was dispatched.
    fn dispatch_deferred(&mut self) -> bool;

    /// The fd became readable and/or writable.
    fn dispatch_io(&mut self, readable: bool, writable: bool);

    /// Earliest pending deadline, if any.
    fn next_deadline(&self) -> Option<Instant>;

    /// A deadline at or before `now` expired.
    fn dispatch_deadline(&mut self, now: Instant);
}

#[derive(Debug, Default)]
pub struct Mainloop {
    _private: (),
}

impl Mainloop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one iteration: deferred work, then a bounded poll, then io and
    /// deadline dispatch. Returns true if anything was dispatched.
    pub fn iterate(
        &mut self,
        source: &mut impl EventSource,
        timeout: Option<Duration>,
    ) -> io::Result<bool> {
        if source.dispatch_deferred() {
            return Ok(true);
        }

        let now = Instant::now();
        let poll_timeout = Self::poll_timeout_ms(timeout, source.next_deadline(), now);

        let mut readable = false;
        let mut writable = false;
        match source.poll_fd() {
            Some((fd, interest)) => {
                let mut flags = PollFlags::empty();
                if interest.read {
                    flags |= PollFlags::POLLIN;
                }
                if interest.write {
                    flags |= PollFlags::POLLOUT;
                }
                let mut fds = [PollFd::new(fd, flags)];
                match poll(&mut fds, poll_timeout) {
                    Ok(n) if n > 0 => {
                        let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
                        readable = revents
                            .intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR);
                        writable = revents.intersects(PollFlags::POLLOUT | PollFlags::POLLERR);
                    }
                    Ok(_) => {}
                    Err(Errno::EINTR) => {}
                    Err(errno) => return Err(io::Error::from_raw_os_error(errno as i32)),
                }
            }
            None => {
                if poll_timeout != 0 {
                    // Nothing to watch; poll is just a sleep bounded by the
                    // next deadline.
                    let mut fds: [PollFd; 0] = [];
                    match poll(&mut fds, poll_timeout) {
                        Ok(_) | Err(Errno::EINTR) => {}
                        Err(errno) => return Err(io::Error::from_raw_os_error(errno as i32)),
                    }
                }
            }
        }

        let mut dispatched = false;
        if readable || writable {
            source.dispatch_io(readable, writable);
            dispatched = true;
        }

        let now = Instant::now();
        if source.next_deadline().is_some_and(|deadline| deadline <= now) {
            source.dispatch_deadline(now);
            dispatched = true;
        }

        Ok(dispatched)
    }

    /// Iterate until `done` returns true or `timeout` elapses. Returns
    /// whether the predicate was satisfied.
    pub fn run_until<S: EventSource>(
        &mut self,
        source: &mut S,
        timeout: Duration,
        mut done: impl FnMut(&S) -> bool,
    ) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if done(source) {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            // Bound each step so external progress (another thread, another
            // process) is picked up promptly even without fd events.
            let step = (deadline - now).min(Duration::from_millis(25));
            self.iterate(source, Some(step))?;
        }
    }

    fn poll_timeout_ms(timeout: Option<Duration>, deadline: Option<Instant>, now: Instant) -> i32 {
        let mut ms: i64 = match timeout {
            Some(t) => t.as_millis().min(i64::MAX as u128) as i64,
            None => -1,
        };
        if let Some(deadline) = deadline {
            let until = deadline
                .saturating_duration_since(now)
                .as_millis()
                .min(i64::MAX as u128) as i64;
            ms = if ms < 0 { until } else { ms.min(until) };
        }
        ms.clamp(-1, i32::MAX as i64) as i32
    }
}
