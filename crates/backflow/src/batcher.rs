//! Fixed-size batching over any [`Source`].
//!
//! [`Batcher`] turns an item-at-a-time source into a batch-at-a-time source
//! with the same flow-control contract. All flow control is forwarded to the
//! wrapped source; the batcher never throttles on its own.

use crate::{
    error::{Error, Result, SourceError},
    source::Source,
};

/// A [`Source`] of `Vec<S::Item>` batches.
///
/// Batches preserve arrival order and hold between 1 and `max_batch_size`
/// items. Every batch except possibly the last is full; the last partial batch
/// is emitted once when the inner source ends. An inner error discards the
/// partial batch and is forwarded as-is.
pub struct Batcher<S: Source> {
    inner: S,
    max_batch_size: usize,
    batch: Vec<S::Item>,
    finished: bool,
}

impl<S: Source> Batcher<S> {
    /// Wraps `inner` so it yields batches of up to `max_batch_size` items.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `max_batch_size` is zero.
    pub fn new(inner: S, max_batch_size: usize) -> Result<Self> {
        if max_batch_size == 0 {
            return Err(Error::invalid("batch size must be greater than 0"));
        }
        Ok(Self {
            inner,
            max_batch_size,
            batch: Vec::with_capacity(max_batch_size),
            finished: false,
        })
    }

    pub const fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub const fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn take_batch(&mut self) -> Vec<S::Item> {
        core::mem::replace(&mut self.batch, Vec::with_capacity(self.max_batch_size))
    }
}

impl<S: Source> Source for Batcher<S> {
    type Item = Vec<S::Item>;

    // Items accumulated so far live in `self.batch`, so dropping this future
    // between inner events loses nothing.
    async fn next(&mut self) -> Option<core::result::Result<Self::Item, SourceError>> {
        if self.finished {
            return None;
        }
        loop {
            match self.inner.next().await {
                Some(Ok(item)) => {
                    self.batch.push(item);
                    if self.batch.len() >= self.max_batch_size {
                        return Some(Ok(self.take_batch()));
                    }
                }
                Some(Err(err)) => {
                    self.batch.clear();
                    self.finished = true;
                    return Some(Err(err));
                }
                None => {
                    self.finished = true;
                    if self.batch.is_empty() {
                        return None;
                    }
                    return Some(Ok(self.take_batch()));
                }
            }
        }
    }

    fn pause(&mut self) {
        self.inner.pause();
    }

    fn resume(&mut self) {
        self.inner.resume();
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn destroy(&mut self) {
        self.inner.destroy();
    }
}
