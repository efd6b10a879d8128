use crate::{sink::Sink, FlowError, TransformerState};
use futures_channel::mpsc::UnboundedReceiver;
use futures_util::{Stream, StreamExt};
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio_util::sync::{CancellationToken, DropGuard};

type Producer = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The downstream side of a [`crate::LatestFlowTransformer`].
///
/// Yields `Ok` values in emission order. At most one `Err` is yielded, and it is always the last
/// item. The producer is spawned on the first poll, and dropping the stream shuts it down.
pub struct LatestStream<R, E> {
    rx: UnboundedReceiver<Result<R, FlowError<E>>>,
    sink: Arc<Sink<R, E>>,
    producer: Option<Producer>,
    _shutdown: DropGuard,
}

impl<R, E> LatestStream<R, E> {
    pub(crate) fn new(
        rx: UnboundedReceiver<Result<R, FlowError<E>>>,
        sink: Arc<Sink<R, E>>,
        shutdown: CancellationToken,
        producer: Producer,
    ) -> Self {
        Self {
            rx,
            sink,
            producer: Some(producer),
            _shutdown: shutdown.drop_guard(),
        }
    }

    /// Where the transformer is in its lifecycle.
    pub fn state(&self) -> TransformerState {
        self.sink.state()
    }

    /// Whether the producer has been started by a poll yet.
    pub fn is_started(&self) -> bool {
        self.producer.is_none()
    }
}

impl<R, E> Stream for LatestStream<R, E> {
    type Item = Result<R, FlowError<E>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(producer) = self.producer.take() {
            tokio::spawn(producer);
        }
        self.rx.poll_next_unpin(cx)
    }
}

impl<R, E> Drop for LatestStream<R, E> {
    fn drop(&mut self) {
        if !self.state().is_terminal() && self.producer.is_none() {
            tracing::debug!("downstream dropped, cancelling the current run");
        }
    }
}
