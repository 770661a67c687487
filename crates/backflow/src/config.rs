use crate::error::{Error, Result};
use core::{fmt, str::FromStr, time::Duration};
use serde::{Deserialize, Serialize};

/// Default per-endpoint concurrency ceiling.
pub const DEFAULT_MAX_REQUESTS_PER_CLIENT: usize = 10;

/// Default timeout applied to every remote call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// How the pool picks a client out of its ready set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Most-recently-released client first. Concentrates load on warm
    /// clients.
    #[default]
    Lifo,
    /// Cycle through ready clients in order.
    RoundRobin,
    /// Ready client with the fewest in-flight requests, lowest index first.
    LeastLoaded,
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lifo => write!(f, "lifo"),
            Self::RoundRobin => write!(f, "round-robin"),
            Self::LeastLoaded => write!(f, "least-loaded"),
        }
    }
}

impl FromStr for SelectionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lifo" => Ok(Self::Lifo),
            "round-robin" | "roundrobin" | "rr" => Ok(Self::RoundRobin),
            "least-loaded" | "leastloaded" => Ok(Self::LeastLoaded),
            other => Err(Error::invalid(format!(
                "unknown selection strategy `{other}`"
            ))),
        }
    }
}

/// Sizing and behavior of a [`Dispatcher`](crate::Dispatcher).
///
/// The worker ceiling of a session is derived from the pool:
/// `endpoint_count * maximum_request_per_client`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Number of interchangeable endpoints in the pool.
    pub endpoint_count: usize,
    /// Base address shared by every endpoint.
    pub base_address: String,
    /// Concurrent in-flight calls allowed per endpoint.
    pub maximum_request_per_client: usize,
    /// Items per batch for the batched entry points. `None` disables batching.
    pub batch_size: Option<usize>,
    /// Upper bound on each remote call.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Hold the source paused while each response handler runs.
    pub is_await: bool,
    pub strategy: SelectionStrategy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            endpoint_count: 1,
            base_address: String::new(),
            maximum_request_per_client: DEFAULT_MAX_REQUESTS_PER_CLIENT,
            batch_size: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            is_await: false,
            strategy: SelectionStrategy::default(),
        }
    }
}

impl DispatchConfig {
    /// Checks every sizing parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if the endpoint count, the
    /// per-client ceiling, the batch size or the timeout is zero, or if the
    /// combined worker ceiling overflows.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint_count == 0 {
            return Err(Error::invalid("endpoint count must be greater than 0"));
        }
        if self.maximum_request_per_client == 0 {
            return Err(Error::invalid(
                "maximum requests per client must be greater than 0",
            ));
        }
        if self.batch_size == Some(0) {
            return Err(Error::invalid("batch size must be greater than 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::invalid("request timeout must be greater than 0"));
        }
        self.max_workers().map(|_| ())
    }

    /// Total in-flight calls the pool can absorb.
    pub fn max_workers(&self) -> Result<usize> {
        self.endpoint_count
            .checked_mul(self.maximum_request_per_client)
            .ok_or_else(|| Error::invalid("overflow in worker ceiling computation"))
    }
}

mod duration_secs {
    use core::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
