use super::{Endpoint, PoolSession};
use crate::{
    error::Result,
    transport::{Params, RemoteCall},
};
use core::time::Duration;
use serde_json::Value;

/// One call's claim on a client.
///
/// Created by [`PoolSession::select`]. Dropping the lease settles the call:
/// the client's in-flight count is decremented, and a client that was
/// saturated rejoins the ready set, lifting the pool's hold on every
/// session's source. This runs on every exit path, including failed and
/// timed-out calls.
#[must_use = "dropping a lease immediately releases its client"]
pub struct Lease<C> {
    session: PoolSession<C>,
    id: usize,
}

impl<C> Lease<C> {
    pub(super) fn new(session: PoolSession<C>, id: usize) -> Self {
        Self { session, id }
    }

    pub const fn id(&self) -> usize {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint<C> {
        &self.session.inner.endpoints[self.id]
    }
}

impl<C: RemoteCall> Lease<C> {
    /// Issues one call on the leased client. See [`Endpoint::dispatch`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::Error::Transport) if the call fails
    /// or exceeds `timeout`.
    pub async fn dispatch(
        &self,
        function: &str,
        params: &Params,
        timeout: Duration,
    ) -> Result<Value> {
        self.endpoint().dispatch(function, params, timeout).await
    }
}

impl<C> Drop for Lease<C> {
    fn drop(&mut self) {
        let mut shared = self.session.inner.shared.lock();
        let rejoined = shared.ready.release(self.id);

        #[cfg(feature = "tracing")]
        tracing::trace!(
            client = self.id,
            active = shared.ready.active(self.id),
            rejoined,
            "released client"
        );

        // Gate updates happen under the lock so the holds track the ready set.
        if rejoined {
            shared.release_gates();
        }
    }
}
