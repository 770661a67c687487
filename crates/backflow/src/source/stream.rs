use super::Source;
use crate::error::SourceError;
use core::{convert::Infallible, fmt};
use futures::{Stream, StreamExt, stream};

type IterStream<I> = stream::Iter<
    core::iter::Map<I, fn(<I as Iterator>::Item) -> Result<<I as Iterator>::Item, Infallible>>,
>;

/// A [`Source`] over any fallible [`Stream`].
///
/// The inner stream is only polled from [`Source::next`], so a paused
/// consumer naturally stops it. Pause and resume calls are still tracked so
/// callers can observe the flow-control conversation.
#[derive(Debug)]
pub struct StreamSource<St> {
    inner: St,
    paused: bool,
    closed: bool,
    pauses: usize,
    resumes: usize,
}

impl<St> StreamSource<St> {
    pub const fn new(inner: St) -> Self {
        Self {
            inner,
            paused: false,
            closed: false,
            pauses: 0,
            resumes: 0,
        }
    }

    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of times the source went from flowing to paused.
    pub const fn pause_count(&self) -> usize {
        self.pauses
    }

    /// Number of times the source went from paused to flowing.
    pub const fn resume_count(&self) -> usize {
        self.resumes
    }

    pub fn into_inner(self) -> St {
        self.inner
    }
}

impl<I: Iterator> StreamSource<IterStream<I>> {
    /// Builds an infallible source that yields every element of `items`.
    pub fn from_items<T: IntoIterator<IntoIter = I>>(items: T) -> Self {
        let ok: fn(I::Item) -> Result<I::Item, Infallible> = Ok;
        Self::new(stream::iter(items.into_iter().map(ok)))
    }
}

impl<St, T, E> Source for StreamSource<St>
where
    St: Stream<Item = Result<T, E>> + Unpin + Send,
    T: Send + 'static,
    E: fmt::Display,
{
    type Item = T;

    async fn next(&mut self) -> Option<Result<T, SourceError>> {
        if self.closed {
            return None;
        }
        self.inner
            .next()
            .await
            .map(|event| event.map_err(SourceError::new))
    }

    fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            self.pauses += 1;
        }
    }

    fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.resumes += 1;
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn destroy(&mut self) {
        self.closed = true;
    }
}
