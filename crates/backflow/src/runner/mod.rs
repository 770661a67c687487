//! Bounded-concurrency draining of a [`Source`].
//!
//! The [`Runner`] pulls units from a source and hands each to a worker
//! function whose future is spawned onto the Tokio runtime. At most
//! `max_workers` of those futures are outstanding at any time: when the
//! ceiling is reached the source is paused *before* the worker is invoked,
//! and it is resumed as soon as a worker settles.
//!
//! A session settles exactly once:
//!
//! - with a [`RunReport`] once the source has ended and every worker has
//!   settled, or
//! - with the first error, from either a worker or the source.
//!
//! Workers still in flight when the session rejects are not cancelled. They
//! run to completion on their own and their outcome is discarded. A worker
//! that panics rejects the session with [`Error::Worker`].
//!
//! Flow control goes through a [`FlowGate`]. Other components (the client
//! pool, strict-mode response handling) register holds on the same gate
//! through [`Runner::gate`], and the runner converts gate edges into
//! `pause`/`resume` calls on the source.

mod gate;

pub use gate::{FlowGate, Hold, HoldGuard};

use crate::{
    error::{Error, Result},
    source::Source,
    telemetry::{increment_items_processed, increment_source_pauses},
};
use core::future::Future;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// What a settled session processed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Units (items or whole batches) handed to the worker function.
    pub units: usize,
    /// Items contained in those units.
    pub items: usize,
}

/// One unit of spawned work and the number of items it accounts for.
pub(crate) struct Work<Fut> {
    pub(crate) size: usize,
    pub(crate) future: Fut,
}

struct Outcome {
    size: usize,
    result: Result<()>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Draining,
    Ended,
}

/// Mutable state of a running session. Consumed by [`Session::settle`], so
/// there is no way to settle twice.
struct Session {
    phase: Phase,
    active: usize,
    paused: bool,
    report: RunReport,
}

impl Session {
    const fn new() -> Self {
        Self {
            phase: Phase::Draining,
            active: 0,
            paused: false,
            report: RunReport { units: 0, items: 0 },
        }
    }

    /// Applies the gate's current state to the source, calling `pause` or
    /// `resume` only when the state actually changes.
    fn reconcile<S: Source>(&mut self, gate: &FlowGate, source: &mut S) {
        if self.phase == Phase::Ended {
            return;
        }
        let open = gate.is_open();
        if open && self.paused {
            #[cfg(feature = "tracing")]
            tracing::trace!(active = self.active, "resuming source");
            source.resume();
            self.paused = false;
        } else if !open && !self.paused {
            #[cfg(feature = "tracing")]
            tracing::trace!(active = self.active, "pausing source");
            source.pause();
            self.paused = true;
            increment_source_pauses();
        }
    }

    const fn can_pull(&self) -> bool {
        matches!(self.phase, Phase::Draining) && !self.paused
    }

    const fn is_drained(&self) -> bool {
        matches!(self.phase, Phase::Ended) && self.active == 0
    }

    fn settle(self, result: Result<()>) -> Result<RunReport> {
        match result {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    units = self.report.units,
                    items = self.report.items,
                    "session drained"
                );
                Ok(self.report)
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    in_flight = self.active,
                    processed = self.report.items,
                    "session rejected: {err}"
                );
                Err(err)
            }
        }
    }
}

/// Drains a source under a hard ceiling on concurrent workers.
pub struct Runner<S> {
    source: S,
    max_workers: usize,
    gate: FlowGate,
    cancel: CancellationToken,
}

impl<S: Source> Runner<S> {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `max_workers` is zero.
    pub fn new(source: S, max_workers: usize) -> Result<Self> {
        if max_workers == 0 {
            return Err(Error::invalid("max workers must be greater than 0"));
        }
        Ok(Self {
            source,
            max_workers,
            gate: FlowGate::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Settles the session with [`Error::Cancelled`] once `token` fires. Work
    /// already spawned keeps running.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The gate governing this session's source.
    pub fn gate(&self) -> FlowGate {
        self.gate.clone()
    }

    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs `process_one` on every unit, counting each unit as one item.
    ///
    /// # Errors
    ///
    /// Returns the first error from a worker or from the source, or
    /// [`Error::Cancelled`].
    pub async fn run<F, Fut>(self, mut process_one: F) -> Result<RunReport>
    where
        F: FnMut(S::Item) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.drive(|unit| {
            Ok(Work {
                size: 1,
                future: process_one(unit),
            })
        })
        .await
    }

    pub(crate) async fn drive<F, Fut>(self, mut process_one: F) -> Result<RunReport>
    where
        F: FnMut(S::Item) -> Result<Work<Fut>>,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let Self {
            mut source,
            max_workers,
            gate,
            cancel,
        } = self;
        let mut workers = JoinSet::new();
        let mut session = Session::new();

        #[cfg(feature = "tracing")]
        tracing::debug!(max_workers, "session started");

        loop {
            session.reconcile(&gate, &mut source);

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    source.close();
                    workers.detach_all();
                    return session.settle(Err(Error::Cancelled));
                }

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    session.active -= 1;
                    let size = match joined.map_err(worker_lost) {
                        Ok(Outcome { size, result: Ok(()) }) => size,
                        Ok(Outcome { result: Err(err), .. }) | Err(err) => {
                            source.close();
                            workers.detach_all();
                            return session.settle(Err(err));
                        }
                    };
                    if session.active < max_workers {
                        gate.release(Hold::Workers);
                    }
                    session.report.units += 1;
                    session.report.items += size;
                    increment_items_processed(size as u64);
                    if session.is_drained() {
                        return session.settle(Ok(()));
                    }
                }

                () = gate.changed() => {}

                event = source.next(), if session.can_pull() => match event {
                    Some(Ok(unit)) => {
                        session.active += 1;
                        if session.active >= max_workers {
                            gate.hold(Hold::Workers);
                            session.reconcile(&gate, &mut source);
                        }
                        let Work { size, future } = match process_one(unit) {
                            Ok(work) => work,
                            Err(err) => {
                                source.close();
                                workers.detach_all();
                                return session.settle(Err(err));
                            }
                        };
                        // Pool selection inside `process_one` may have closed
                        // the gate too; apply it before pulling again.
                        session.reconcile(&gate, &mut source);
                        workers.spawn(async move {
                            Outcome { size, result: future.await }
                        });
                    }
                    Some(Err(err)) => {
                        source.close();
                        workers.detach_all();
                        return session.settle(Err(Error::Source(err)));
                    }
                    None => {
                        session.phase = Phase::Ended;
                        if session.is_drained() {
                            return session.settle(Ok(()));
                        }
                    }
                },
            }
        }
    }
}

fn worker_lost(err: JoinError) -> Error {
    #[cfg(feature = "tracing")]
    tracing::error!(panicked = err.is_panic(), "worker ended without an outcome: {err}");
    Error::Worker {
        message: err.to_string(),
    }
}

impl<S, T> Runner<S>
where
    S: Source<Item = Vec<T>>,
    T: Send + 'static,
{
    /// Runs batches as single units for the worker ceiling while fanning each
    /// batch out to `process_one` item by item. Every item of a batch is
    /// counted.
    ///
    /// # Errors
    ///
    /// Same as [`Runner::run`]; a batch fails as soon as one of its items
    /// does.
    pub async fn run_batches<F, Fut>(self, mut process_one: F) -> Result<RunReport>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.drive(|batch: Vec<T>| {
            let size = batch.len();
            let futures: Vec<Fut> = batch.into_iter().map(&mut process_one).collect();
            Ok(Work {
                size,
                future: async move { futures::future::try_join_all(futures).await.map(|_| ()) },
            })
        })
        .await
    }
}

/// Drains `source` with at most `max_workers` concurrent calls to
/// `process_one` and returns the number of items processed.
///
/// # Errors
///
/// See [`Runner::run`].
pub async fn run<S, F, Fut>(source: S, max_workers: usize, process_one: F) -> Result<usize>
where
    S: Source,
    F: FnMut(S::Item) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Ok(Runner::new(source, max_workers)?.run(process_one).await?.items)
}
