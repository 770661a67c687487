//! A fixed pool of interchangeable endpoints with per-endpoint ceilings.
//!
//! [`ClientPool`] owns the endpoints and their in-flight counts, which live
//! as long as the pool and are shared by every session. Each dispatch session
//! opens a [`PoolSession`] that registers its gate with the pool:
//!
//! - [`PoolSession::select`] picks a ready endpoint per the configured
//!   [`SelectionStrategy`] and returns a [`Lease`]. When the last ready
//!   endpoint saturates, [`Hold::Pool`] goes on every registered gate.
//! - Dropping the lease releases the endpoint and lifts those holds as soon
//!   as one endpoint is ready again.
//!
//! Calls left in flight by a finished session keep counting against their
//! endpoint until they settle.

mod lease;
mod ready;

pub use lease::Lease;

use crate::{
    config::{DispatchConfig, SelectionStrategy},
    error::{Error, Result},
    runner::{FlowGate, Hold},
    telemetry::{
        decrement_calls_inflight, increment_calls_inflight, increment_dispatch_errors,
        increment_dispatches, record_call_duration,
    },
    transport::{Params, RemoteCall},
};
use core::time::Duration;
use parking_lot::Mutex;
use ready::ReadySet;
use serde_json::Value;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::time::Instant;

/// One downstream endpoint: a stable index, its address and its client.
#[derive(Debug)]
pub struct Endpoint<C> {
    id: usize,
    address: String,
    client: C,
    in_flight: AtomicUsize,
}

impl<C> Endpoint<C> {
    pub const fn id(&self) -> usize {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Calls on this endpoint still awaiting a response, from sessions and
    /// direct requests alike.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl<C: RemoteCall> Endpoint<C> {
    /// Issues exactly one call under `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] naming `function` if the client fails or
    /// the timeout expires.
    pub async fn dispatch(
        &self,
        function: &str,
        params: &Params,
        timeout: Duration,
    ) -> Result<Value> {
        increment_dispatches();
        let inflight = Inflight::enter(&self.in_flight);
        let started = Instant::now();

        let outcome = tokio::time::timeout(timeout, self.client.call(function, params)).await;

        drop(inflight);
        record_call_duration(started.elapsed().as_secs_f64() * 1_000.0);

        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::transport(function, err)),
            Err(_) => Err(Error::transport(
                function,
                format!("request timed out after {}ms", timeout.as_millis()),
            )),
        };

        if let Err(_err) = &result {
            increment_dispatch_errors();
            #[cfg(feature = "tracing")]
            tracing::warn!(endpoint = self.id, address = %self.address, "{_err}");
        }
        result
    }
}

/// Counts one call against its endpoint and the `calls_inflight` gauge until
/// dropped, including when the dispatch future is dropped mid-call.
struct Inflight<'a> {
    count: &'a AtomicUsize,
}

impl<'a> Inflight<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        increment_calls_inflight();
        Self { count }
    }
}

impl Drop for Inflight<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
        decrement_calls_inflight();
    }
}

/// Pool-wide accounting and the gates of the sessions drawing on it.
#[derive(Debug)]
struct Shared {
    ready: ReadySet,
    gates: Vec<(u64, FlowGate)>,
    next_session: u64,
}

impl Shared {
    fn hold_gates(&self) {
        for (_, gate) in &self.gates {
            gate.hold(Hold::Pool);
        }
    }

    fn release_gates(&self) {
        for (_, gate) in &self.gates {
            gate.release(Hold::Pool);
        }
    }
}

/// The endpoints a dispatcher balances across.
pub struct ClientPool<C> {
    endpoints: Arc<[Endpoint<C>]>,
    shared: Arc<Mutex<Shared>>,
    ceiling: usize,
    strategy: SelectionStrategy,
}

impl<C> Clone for ClientPool<C> {
    fn clone(&self) -> Self {
        Self {
            endpoints: Arc::clone(&self.endpoints),
            shared: Arc::clone(&self.shared),
            ceiling: self.ceiling,
            strategy: self.strategy,
        }
    }
}

impl<C> ClientPool<C> {
    /// Builds `config.endpoint_count` endpoints, calling `make_client` with
    /// each endpoint's index and `config.base_address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if the endpoint count or the
    /// per-client ceiling is zero, or the first error from `make_client`.
    pub fn new<F>(config: &DispatchConfig, mut make_client: F) -> Result<Self>
    where
        F: FnMut(usize, &str) -> Result<C>,
    {
        if config.endpoint_count == 0 {
            return Err(Error::invalid("endpoint count must be greater than 0"));
        }
        if config.maximum_request_per_client == 0 {
            return Err(Error::invalid(
                "maximum requests per client must be greater than 0",
            ));
        }

        let endpoints = (0..config.endpoint_count)
            .map(|id| {
                Ok(Endpoint {
                    id,
                    address: config.base_address.clone(),
                    client: make_client(id, &config.base_address)?,
                    in_flight: AtomicUsize::new(0),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            endpoints = endpoints.len(),
            ceiling = config.maximum_request_per_client,
            strategy = %config.strategy,
            "client pool initialized"
        );

        let shared = Shared {
            ready: ReadySet::new(
                endpoints.len(),
                config.maximum_request_per_client,
                config.strategy,
            ),
            gates: Vec::new(),
            next_session: 0,
        };

        Ok(Self {
            endpoints: endpoints.into(),
            shared: Arc::new(Mutex::new(shared)),
            ceiling: config.maximum_request_per_client,
            strategy: config.strategy,
        })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always `false`; a pool has at least one endpoint.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub const fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub const fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    pub fn endpoints(&self) -> &[Endpoint<C>] {
        &self.endpoints
    }

    pub fn endpoint(&self, id: usize) -> Option<&Endpoint<C>> {
        self.endpoints.get(id)
    }

    /// A uniformly random endpoint, for calls made outside any session.
    pub fn random(&self) -> &Endpoint<C> {
        &self.endpoints[rand::random_range(0..self.endpoints.len())]
    }

    /// In-flight calls on endpoint `id`, across every session.
    pub fn active_requests(&self, id: usize) -> usize {
        self.shared.lock().ready.active(id)
    }

    /// In-flight calls across the whole pool.
    pub fn total_active(&self) -> usize {
        self.shared.lock().ready.total_active()
    }

    /// Registers `gate` for exhaustion holds until the returned session and
    /// all of its leases are dropped. The gate is held at once if every
    /// endpoint is already saturated.
    pub fn session(&self, gate: &FlowGate) -> PoolSession<C> {
        let mut shared = self.shared.lock();
        let id = shared.next_session;
        shared.next_session += 1;
        if shared.ready.is_empty() {
            gate.hold(Hold::Pool);
        }
        shared.gates.push((id, gate.clone()));

        #[cfg(feature = "tracing")]
        tracing::trace!(
            session = id,
            sessions = shared.gates.len(),
            in_flight = shared.ready.total_active(),
            "pool session opened"
        );
        drop(shared);

        PoolSession {
            inner: Arc::new(Registration {
                endpoints: Arc::clone(&self.endpoints),
                shared: Arc::clone(&self.shared),
                gate: gate.clone(),
                id,
            }),
        }
    }
}

/// A session's seat on a [`ClientPool`].
pub struct PoolSession<C> {
    inner: Arc<Registration<C>>,
}

impl<C> Clone for PoolSession<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Registration<C> {
    endpoints: Arc<[Endpoint<C>]>,
    shared: Arc<Mutex<Shared>>,
    gate: FlowGate,
    id: u64,
}

impl<C> Drop for Registration<C> {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        shared.gates.retain(|(id, _)| *id != self.id);
    }
}

impl<C> PoolSession<C> {
    /// Leases a ready endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no endpoint is ready. The gate
    /// should have kept the source paused, so this indicates a flow-control
    /// bug rather than load.
    pub fn select(&self) -> Result<Lease<C>> {
        let mut shared = self.inner.shared.lock();
        let Some(id) = shared.ready.select() else {
            #[cfg(feature = "tracing")]
            tracing::error!(
                in_flight = shared.ready.total_active(),
                "no ready client; selection ran while the pool was saturated"
            );
            return Err(Error::PoolExhausted);
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(
            client = id,
            active = shared.ready.active(id),
            ready = shared.ready.len(),
            "selected client"
        );

        if shared.ready.is_empty() {
            shared.hold_gates();
        }
        drop(shared);

        Ok(Lease::new(self.clone(), id))
    }

    /// In-flight calls on endpoint `id`, across every session.
    pub fn active_requests(&self, id: usize) -> usize {
        self.inner.shared.lock().ready.active(id)
    }

    /// In-flight calls across the whole pool.
    pub fn total_active(&self) -> usize {
        self.inner.shared.lock().ready.total_active()
    }

    /// Endpoints that can take another call.
    pub fn ready_len(&self) -> usize {
        self.inner.shared.lock().ready.len()
    }

    pub fn gate(&self) -> &FlowGate {
        &self.inner.gate
    }
}
