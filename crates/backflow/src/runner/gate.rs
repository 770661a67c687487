use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// A reason for keeping the source paused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hold {
    /// The runner has `max_workers` units in flight.
    Workers,
    /// The pool's ready set is empty.
    Pool,
    /// A response handler is running in strict (`is_await`) mode. Counted, as
    /// several handlers may overlap.
    Response,
}

#[derive(Debug, Default)]
struct Holds {
    workers: bool,
    pool: bool,
    responses: usize,
}

impl Holds {
    const fn is_open(&self) -> bool {
        !self.workers && !self.pool && self.responses == 0
    }
}

#[derive(Debug, Default)]
struct Inner {
    holds: Mutex<Holds>,
    notify: Notify,
}

/// The single source of truth for whether a session's source may emit.
///
/// Anyone who needs the source stopped registers a [`Hold`]; the source may
/// emit only while no hold is registered. Holds are registered from the
/// runner, the pool and response handlers alike, but only the runner turns
/// gate edges into [`Source::pause`](crate::Source::pause) and
/// [`Source::resume`](crate::Source::resume) calls.
#[derive(Clone, Debug, Default)]
pub struct FlowGate {
    inner: Arc<Inner>,
}

impl FlowGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self, hold: Hold) {
        let changed = {
            let mut holds = self.inner.holds.lock();
            let was_open = holds.is_open();
            match hold {
                Hold::Workers => holds.workers = true,
                Hold::Pool => holds.pool = true,
                Hold::Response => holds.responses += 1,
            }
            was_open != holds.is_open()
        };
        if changed {
            self.inner.notify.notify_one();
        }
    }

    pub fn release(&self, hold: Hold) {
        let changed = {
            let mut holds = self.inner.holds.lock();
            let was_open = holds.is_open();
            match hold {
                Hold::Workers => holds.workers = false,
                Hold::Pool => holds.pool = false,
                Hold::Response => holds.responses = holds.responses.saturating_sub(1),
            }
            was_open != holds.is_open()
        };
        if changed {
            self.inner.notify.notify_one();
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.holds.lock().is_open()
    }

    pub fn is_held(&self, hold: Hold) -> bool {
        let holds = self.inner.holds.lock();
        match hold {
            Hold::Workers => holds.workers,
            Hold::Pool => holds.pool,
            Hold::Response => holds.responses > 0,
        }
    }

    /// Resolves after the gate flips between open and closed. A flip that
    /// happened while nobody waited is delivered to the next waiter.
    pub(crate) async fn changed(&self) {
        self.inner.notify.notified().await;
    }
}

/// Releases a [`Hold`] when dropped.
#[must_use = "the hold is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct HoldGuard {
    gate: FlowGate,
    hold: Hold,
}

impl HoldGuard {
    pub fn new(gate: &FlowGate, hold: Hold) -> Self {
        gate.hold(hold);
        Self {
            gate: gate.clone(),
            hold,
        }
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        self.gate.release(self.hold);
    }
}
