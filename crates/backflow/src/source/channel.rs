use super::Source;
use crate::error::{Error, Result, SourceError};
use tokio::sync::{mpsc, watch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Flowing,
    Paused,
    Closed,
}

/// Creates a push-based source and the handle producers push into.
///
/// `capacity` bounds how many events may sit between the producer and the
/// consumer. Independently of that buffer, [`Emitter::send`] waits for as long
/// as the consumer has paused the source. Dropping every [`Emitter`] ends the
/// source once its buffer is drained.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel<T>(capacity: usize) -> (Emitter<T>, ChannelSource<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let (flow_tx, flow_rx) = watch::channel(Flow::Flowing);
    (
        Emitter { tx, flow: flow_rx },
        ChannelSource {
            rx,
            flow: flow_tx,
            destroyed: false,
        },
    )
}

/// Producer half of [`channel`].
#[derive(Debug)]
pub struct Emitter<T> {
    tx: mpsc::Sender<core::result::Result<T, SourceError>>,
    flow: watch::Receiver<Flow>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            flow: self.flow.clone(),
        }
    }
}

impl<T> Emitter<T> {
    /// Pushes one item, waiting first while the consumer is paused and then
    /// for buffer space.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceClosed`] once the consumer has closed, destroyed
    /// or dropped the source.
    pub async fn send(&self, item: T) -> Result<()> {
        let mut flow = self.flow.clone();
        let closed = {
            let state = flow
                .wait_for(|state| *state != Flow::Paused)
                .await
                .map_err(|_| Error::SourceClosed)?;
            *state == Flow::Closed
        };
        if closed {
            return Err(Error::SourceClosed);
        }
        self.tx.send(Ok(item)).await.map_err(|_| Error::SourceClosed)
    }

    /// Emits an error event. Errors are delivered even while paused.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceClosed`] if the consumer is gone.
    pub async fn fail(&self, err: SourceError) -> Result<()> {
        self.tx.send(Err(err)).await.map_err(|_| Error::SourceClosed)
    }

    /// Whether the consumer currently asks producers to hold off.
    pub fn is_paused(&self) -> bool {
        *self.flow.borrow() == Flow::Paused
    }

    /// Whether the consumer has stopped accepting items.
    pub fn is_closed(&self) -> bool {
        *self.flow.borrow() == Flow::Closed || self.tx.is_closed()
    }
}

/// Consumer half of [`channel`].
#[derive(Debug)]
pub struct ChannelSource<T> {
    rx: mpsc::Receiver<core::result::Result<T, SourceError>>,
    flow: watch::Sender<Flow>,
    destroyed: bool,
}

impl<T> ChannelSource<T> {
    fn transition(&self, from: Flow, to: Flow) {
        self.flow.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
    }

    pub fn is_paused(&self) -> bool {
        *self.flow.borrow() == Flow::Paused
    }
}

impl<T: Send + 'static> Source for ChannelSource<T> {
    type Item = T;

    async fn next(&mut self) -> Option<core::result::Result<T, SourceError>> {
        if self.destroyed {
            return None;
        }
        self.rx.recv().await
    }

    fn pause(&mut self) {
        self.transition(Flow::Flowing, Flow::Paused);
    }

    fn resume(&mut self) {
        self.transition(Flow::Paused, Flow::Flowing);
    }

    /// Refuses further items; anything already buffered is still delivered.
    fn close(&mut self) {
        self.flow.send_replace(Flow::Closed);
        self.rx.close();
    }

    fn destroy(&mut self) {
        self.close();
        while self.rx.try_recv().is_ok() {}
        self.destroyed = true;
    }
}
