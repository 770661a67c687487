use anyhow::bail;
use backflow::{DEFAULT_MAX_REQUESTS_PER_CLIENT, DispatchConfig, SelectionStrategy};
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `backflow` binary.
///
/// Every value can come from a CLI flag or an environment variable (a `.env`
/// file in the working directory is loaded first). Items are read as
/// newline-delimited JSON objects and each one, or each batch, becomes a
/// call to `FUNCTION` on one of `SETTLEMENT_PROCESS` endpoints at
/// `SETTLEMENT_URL`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "backflow",
    version,
    about = "Drain newline-delimited JSON through a pool of HTTP endpoints"
)]
pub struct CliArgs {
    /// Number of interchangeable endpoints to balance across.
    ///
    /// Environment variable: `SETTLEMENT_PROCESS`
    #[arg(long, env = "SETTLEMENT_PROCESS", default_value_t = 1)]
    pub endpoints: usize,

    /// Base URL shared by every endpoint. Calls are POSTed to
    /// `{url}/{function}`.
    ///
    /// Environment variable: `SETTLEMENT_URL`
    #[arg(long, env = "SETTLEMENT_URL")]
    pub url: String,

    /// Concurrent in-flight calls allowed per endpoint.
    ///
    /// Environment variable: `MAX_REQUESTS_PER_CLIENT`
    #[arg(long, env = "MAX_REQUESTS_PER_CLIENT", default_value_t = DEFAULT_MAX_REQUESTS_PER_CLIENT)]
    pub max_requests_per_client: usize,

    /// Group this many items into each call. Unset sends one call per item.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Upper bound on each call, in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_SECS`
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    pub request_timeout_secs: u64,

    /// Keep the input paused while each response is handled.
    ///
    /// Environment variable: `AWAIT_RESPONSES`
    #[arg(long, env = "AWAIT_RESPONSES", default_value_t = false)]
    pub await_responses: bool,

    /// How a ready endpoint is picked: `lifo`, `round-robin` or
    /// `least-loaded`.
    ///
    /// Environment variable: `SELECTION_STRATEGY`
    #[arg(long, env = "SELECTION_STRATEGY", default_value_t = SelectionStrategy::Lifo)]
    pub strategy: SelectionStrategy,

    /// Remote function every call invokes.
    ///
    /// Environment variable: `FUNCTION`
    #[arg(long, env = "FUNCTION")]
    pub function: String,

    /// File to read items from. Reads stdin when unset.
    ///
    /// Environment variable: `INPUT`
    #[arg(long, env = "INPUT")]
    pub input: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub dispatch: DispatchConfig,
    pub function: String,
    pub input: Option<PathBuf>,
}

impl CliConfig {
    pub const fn is_batched(&self) -> bool {
        self.dispatch.batch_size.is_some()
    }
}

impl TryFrom<CliArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.endpoints == 0 {
            bail!("SETTLEMENT_PROCESS must be greater than 0");
        }

        if args.url.trim().is_empty() {
            bail!("SETTLEMENT_URL must not be empty");
        }

        if args.max_requests_per_client == 0 {
            bail!("MAX_REQUESTS_PER_CLIENT must be greater than 0");
        }

        if args.batch_size == Some(0) {
            bail!("BATCH_SIZE must be greater than 0");
        }

        if args.request_timeout_secs == 0 {
            bail!("REQUEST_TIMEOUT_SECS must be greater than 0");
        }

        if args.function.trim().is_empty() {
            bail!("FUNCTION must not be empty");
        }

        let dispatch = DispatchConfig {
            endpoint_count: args.endpoints,
            base_address: args.url,
            maximum_request_per_client: args.max_requests_per_client,
            batch_size: args.batch_size,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            is_await: args.await_responses,
            strategy: args.strategy,
        };
        dispatch.validate()?;

        Ok(Self {
            dispatch,
            function: args.function,
            input: args.input,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> anyhow::Result<CliConfig> {
        let mut argv = vec![
            "backflow",
            "--url",
            "http://settlement:8080",
            "--function",
            "settle",
        ];
        argv.extend_from_slice(extra);
        CliConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn flags_map_onto_the_dispatch_config() {
        let config = parse(&[
            "--endpoints",
            "3",
            "--max-requests-per-client",
            "2",
            "--batch-size",
            "50",
            "--request-timeout-secs",
            "5",
            "--await-responses",
            "--strategy",
            "round-robin",
            "--input",
            "items.ndjson",
        ])
        .unwrap();

        assert_eq!(config.dispatch.endpoint_count, 3);
        assert_eq!(config.dispatch.base_address, "http://settlement:8080");
        assert_eq!(config.dispatch.maximum_request_per_client, 2);
        assert_eq!(config.dispatch.batch_size, Some(50));
        assert_eq!(config.dispatch.request_timeout, Duration::from_secs(5));
        assert!(config.dispatch.is_await);
        assert_eq!(config.dispatch.strategy, SelectionStrategy::RoundRobin);
        assert_eq!(config.function, "settle");
        assert_eq!(config.input, Some(PathBuf::from("items.ndjson")));
        assert!(config.is_batched());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        for flags in [
            ["--endpoints", "0"],
            ["--max-requests-per-client", "0"],
            ["--batch-size", "0"],
            ["--request-timeout-secs", "0"],
        ] {
            assert!(parse(&flags).is_err(), "{flags:?}");
        }
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(parse(&["--strategy", "random"]).is_err());
    }
}
