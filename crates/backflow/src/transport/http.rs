use super::{Params, RemoteCall};
use crate::error::{BoxError, Error, Result};
use core::time::Duration;
use serde_json::Value;

/// JSON-over-HTTP endpoint.
///
/// `call(function, params)` POSTs `params` as a JSON body to
/// `{base_url}/{function}`. Non-success statuses and timeouts are errors. An
/// empty response body reads as `null`.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if the underlying HTTP client
    /// cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::invalid(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Uses a preconfigured [`reqwest::Client`], for example one shared by
    /// every endpoint of a pool.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, function: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            function.trim_start_matches('/')
        )
    }
}

impl RemoteCall for HttpClient {
    async fn call(&self, function: &str, params: &Params) -> core::result::Result<Value, BoxError> {
        let response = self
            .client
            .post(self.url(function))
            .json(params)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_base_and_function() {
        let client = HttpClient::new("http://settle:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("transfer"), "http://settle:8080/transfer");
        assert_eq!(client.url("/transfer"), "http://settle:8080/transfer");
        assert_eq!(client.base_url(), "http://settle:8080/");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let client = HttpClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let result = client.call("transfer", &Params::new()).await;
        assert!(result.is_err());
    }
}
