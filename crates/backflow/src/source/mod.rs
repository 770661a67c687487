//! Flow-controlled sources of work.
//!
//! A [`Source`] is pulled with [`Source::next`] and steered with
//! [`Source::pause`] and [`Source::resume`]. Consumers in this crate only call
//! `pause` and `resume` on a change of state, but implementations must still
//! treat redundant calls as no-ops.
//!
//! Two adapters are provided:
//!
//! - [`StreamSource`] wraps any fallible [`futures::Stream`]. Pulling is
//!   already demand-driven, so pausing only records the state.
//! - [`channel`] returns an [`Emitter`] / [`ChannelSource`] pair for push-based
//!   producers. Emitters wait while the consumer is paused.

mod channel;
mod stream;

pub use channel::{ChannelSource, Emitter, channel};
pub use stream::StreamSource;

use crate::error::SourceError;
use core::future::Future;

/// A push-style producer of items exposed through a pull-based `next()`.
///
/// `next` yields `Some(Ok(item))` zero or more times, then either `None`
/// (the end) or `Some(Err(_))`. The future returned by `next` must be
/// cancel-safe: dropping it before completion must not lose an item.
pub trait Source: Send {
    type Item: Send + 'static;

    /// Waits for the next event of the source.
    fn next(&mut self) -> impl Future<Output = Option<Result<Self::Item, SourceError>>> + Send;

    /// Asks the source to stop emitting until [`resume`](Self::resume).
    fn pause(&mut self);

    /// Lets a paused source emit again.
    fn resume(&mut self);

    /// Stops the source early. No-op unless the source supports it.
    fn close(&mut self) {}

    /// Stops the source and drops anything it has buffered. No-op unless the
    /// source supports it.
    fn destroy(&mut self) {}
}

impl<S: Source + ?Sized> Source for &mut S {
    type Item = S::Item;

    fn next(&mut self) -> impl Future<Output = Option<Result<Self::Item, SourceError>>> + Send {
        (**self).next()
    }

    fn pause(&mut self) {
        (**self).pause();
    }

    fn resume(&mut self) {
        (**self).resume();
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn destroy(&mut self) {
        (**self).destroy();
    }
}
