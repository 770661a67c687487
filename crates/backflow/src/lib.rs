#![doc = include_str!("../README.md")]

mod batcher;
mod config;
mod dispatcher;
mod error;
mod pool;
mod runner;
mod source;
pub mod telemetry;
mod transport;

pub use crate::batcher::*;
pub use crate::config::*;
pub use crate::dispatcher::*;
pub use crate::error::*;
pub use crate::pool::*;
pub use crate::runner::{FlowGate, Hold, HoldGuard, RunReport, Runner, run};
pub use crate::source::*;
pub use crate::transport::*;
