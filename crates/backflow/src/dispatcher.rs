//! The composition root: source → (batcher) → runner → pool → remote call →
//! response handler.

use crate::{
    batcher::Batcher,
    config::DispatchConfig,
    error::{BoxError, Error, Result},
    pool::ClientPool,
    runner::{Hold, HoldGuard, Runner, Work},
    source::Source,
    transport::{Call, Params, RemoteCall},
};
use core::future::Future;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Drains sources through a pool of remote endpoints with backpressure.
///
/// Every `process_*` call is one session. Sessions on the same dispatcher
/// take turns, and all of them draw on the pool's accounting, so at most
/// `endpoint_count * maximum_request_per_client` calls run at once and never
/// more than `maximum_request_per_client` per endpoint, counting calls a
/// previous session left in flight. The source is paused whenever no
/// endpoint could take another call and resumed as soon as one can.
///
/// ```no_run
/// # async fn demo() -> backflow::Result<()> {
/// use backflow::{Call, DispatchConfig, Dispatcher, HttpClient, StreamSource};
/// use serde_json::json;
///
/// let config = DispatchConfig {
///     endpoint_count: 3,
///     base_address: "http://settlement:8080".into(),
///     ..DispatchConfig::default()
/// };
/// let timeout = config.request_timeout;
/// let dispatcher = Dispatcher::new(config, |_, address| HttpClient::new(address, timeout))?;
///
/// let source = StreamSource::from_items((0..100).map(|n| json!({ "id": n })));
/// let processed = dispatcher
///     .process_stream(source, |item| Some(Call::with_param("transfer", "item", item)))
///     .await?;
/// assert_eq!(processed, 100);
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher<C> {
    config: DispatchConfig,
    pool: ClientPool<C>,
    cancel: Option<CancellationToken>,
    turn: Mutex<()>,
}

impl<C: RemoteCall> Dispatcher<C> {
    /// Validates `config` and builds one client per endpoint with
    /// `make_client(index, base_address)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for out-of-range sizing, or
    /// the first error from `make_client`.
    pub fn new<F>(config: DispatchConfig, make_client: F) -> Result<Self>
    where
        F: FnMut(usize, &str) -> Result<C>,
    {
        config.validate()?;
        let pool = ClientPool::new(&config, make_client)?;
        Ok(Self {
            config,
            pool,
            cancel: None,
            turn: Mutex::new(()),
        })
    }

    /// Cancels every session of this dispatcher once `token` fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub const fn pool(&self) -> &ClientPool<C> {
        &self.pool
    }

    /// One call on a random endpoint, outside any session and its
    /// accounting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the call fails or times out.
    pub async fn request(&self, function: &str, params: &Params) -> Result<Value> {
        self.pool
            .random()
            .dispatch(function, params, self.config.request_timeout)
            .await
    }

    /// Drains `source`, sending one call per item that `make_request` maps to
    /// a [`Call`]. An item mapped to `None` is counted but not sent.
    ///
    /// Resolves with the number of items once the source has ended and every
    /// call has settled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `config.batch_size` is set;
    /// batched configurations go through [`Dispatcher::process_batches`].
    /// Otherwise rejects with the first call, source or selection error, or
    /// [`Error::Cancelled`]. Calls already in flight are left to finish.
    pub async fn process_stream<S, M>(&self, source: S, make_request: M) -> Result<usize>
    where
        S: Source,
        M: FnMut(S::Item) -> Option<Call>,
    {
        self.process_stream_with(source, make_request, ignore_response)
            .await
    }

    /// Like [`Dispatcher::process_stream`], passing every response to
    /// `process_response`. With `is_await` set the source stays paused while
    /// a handler runs.
    ///
    /// # Errors
    ///
    /// As [`Dispatcher::process_stream`]; a failed handler rejects with
    /// [`Error::Response`].
    pub async fn process_stream_with<S, M, H, HF>(
        &self,
        source: S,
        make_request: M,
        process_response: H,
    ) -> Result<usize>
    where
        S: Source,
        M: FnMut(S::Item) -> Option<Call>,
        H: Fn(Value) -> HF + Send + Sync + 'static,
        HF: Future<Output = core::result::Result<(), BoxError>> + Send,
    {
        if self.config.batch_size.is_some() {
            return Err(Error::invalid(
                "batch size is configured; use process_batches",
            ));
        }
        self.drain(source, |_| 1, make_request, process_response)
            .await
    }

    /// Groups items into batches of `config.batch_size` and sends one call
    /// per batch. Every item of a batch is counted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if no batch size is
    /// configured; otherwise as [`Dispatcher::process_stream`].
    pub async fn process_batches<S, M>(&self, source: S, make_request: M) -> Result<usize>
    where
        S: Source,
        M: FnMut(Vec<S::Item>) -> Option<Call>,
    {
        self.process_batches_with(source, make_request, ignore_response)
            .await
    }

    /// Batched form of [`Dispatcher::process_stream_with`].
    ///
    /// # Errors
    ///
    /// As [`Dispatcher::process_batches`] and
    /// [`Dispatcher::process_stream_with`].
    pub async fn process_batches_with<S, M, H, HF>(
        &self,
        source: S,
        make_request: M,
        process_response: H,
    ) -> Result<usize>
    where
        S: Source,
        M: FnMut(Vec<S::Item>) -> Option<Call>,
        H: Fn(Value) -> HF + Send + Sync + 'static,
        HF: Future<Output = core::result::Result<(), BoxError>> + Send,
    {
        let batch_size = self
            .config
            .batch_size
            .ok_or_else(|| Error::invalid("batch size is not configured"))?;
        let batcher = Batcher::new(source, batch_size)?;
        self.drain(batcher, Vec::len, make_request, process_response)
            .await
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            skip_all,
            fields(
                endpoints = self.pool.len(),
                strategy = %self.config.strategy,
                is_await = self.config.is_await
            )
        )
    )]
    async fn drain<S, Z, M, H, HF>(
        &self,
        source: S,
        size_of: Z,
        mut make_request: M,
        process_response: H,
    ) -> Result<usize>
    where
        S: Source,
        Z: Fn(&S::Item) -> usize,
        M: FnMut(S::Item) -> Option<Call>,
        H: Fn(Value) -> HF + Send + Sync + 'static,
        HF: Future<Output = core::result::Result<(), BoxError>> + Send,
    {
        let _turn = match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(Error::Cancelled),
                turn = self.turn.lock() => turn,
            },
            None => self.turn.lock().await,
        };

        let mut runner = Runner::new(source, self.config.max_workers()?)?;
        if let Some(token) = &self.cancel {
            runner = runner.with_cancellation(token.clone());
        }
        let gate = runner.gate();
        let session = self.pool.session(&gate);
        let process_response = Arc::new(process_response);
        let timeout = self.config.request_timeout;
        let is_await = self.config.is_await;

        let report = runner
            .drive(|unit| {
                let size = size_of(&unit);
                // Select only for units that issue a call, so a skipped unit
                // never holds a client.
                let dispatch = match make_request(unit) {
                    Some(call) => Some((session.select()?, call)),
                    None => None,
                };
                let process_response = Arc::clone(&process_response);
                let gate = gate.clone();

                Ok(Work {
                    size,
                    future: async move {
                        let Some((lease, call)) = dispatch else {
                            return Ok(());
                        };
                        let response = lease.dispatch(&call.function, &call.params, timeout).await?;
                        let _hold = is_await.then(|| HoldGuard::new(&gate, Hold::Response));
                        process_response(response)
                            .await
                            .map_err(|e| Error::Response {
                                message: e.to_string(),
                            })
                    },
                })
            })
            .await?;

        #[cfg(feature = "tracing")]
        tracing::info!(units = report.units, items = report.items, "stream processed");

        Ok(report.items)
    }
}

#[allow(clippy::unused_async)]
async fn ignore_response(_: Value) -> core::result::Result<(), BoxError> {
    Ok(())
}
