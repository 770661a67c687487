//! The remote-call seam.
//!
//! [`RemoteCall`] is all the dispatcher knows about a downstream endpoint: a
//! single-attempt async call of a named function with a JSON parameter map.
//! Retries, authentication and wire details belong to implementations.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpClient;

use crate::error::BoxError;
use core::future::Future;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named parameters of a remote call.
pub type Params = serde_json::Map<String, Value>;

/// A remote-call descriptor: which function to invoke and with what.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub function: String,
    pub params: Params,
}

impl Call {
    pub fn new(function: impl Into<String>, params: Params) -> Self {
        Self {
            function: function.into(),
            params,
        }
    }

    /// Builds a call whose parameters are `{ key: value }`.
    pub fn with_param(function: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        let mut params = Params::new();
        params.insert(key.into(), value);
        Self::new(function, params)
    }
}

/// One downstream endpoint.
///
/// Implementations make exactly one attempt per call. The dispatcher applies
/// its own timeout on top and wraps any failure with the function name.
pub trait RemoteCall: Send + Sync + 'static {
    fn call(
        &self,
        function: &str,
        params: &Params,
    ) -> impl Future<Output = Result<Value, BoxError>> + Send;
}
