use crate::{LatestFlowTransformer, LatestStream, TaskContext};
use futures_util::{pin_mut, Stream, StreamExt};
use std::{convert::Infallible, future::Future};

/// Latest-wins adapters for any [`Stream`].
///
/// These all use the default [`crate::TransformerConfig`]. Build a [`LatestFlowTransformer`]
/// directly to change it.
pub trait TransformLatestExt: Stream + Sized + Send + 'static {
    /// Run `transform` for every item, cancelling the previous run when a new item arrives.
    fn transform_latest<R, E, F, Fut>(self, transform: F) -> LatestStream<R, E>
    where
        Self::Item: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: FnMut(Self::Item, TaskContext<R>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        LatestFlowTransformer::default().subscribe(self.map(Ok::<Self::Item, E>), transform)
    }

    /// Like [`TransformLatestExt::transform_latest`] for a fallible upstream. An upstream error
    /// ends the stream with [`crate::FlowError::Upstream`].
    fn try_transform_latest<T, R, E, F, Fut>(self, transform: F) -> LatestStream<R, E>
    where
        Self: Stream<Item = Result<T, E>>,
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: FnMut(T, TaskContext<R>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        LatestFlowTransformer::default().subscribe(self, transform)
    }

    /// Map every item through an async function, keeping only the result for the latest item.
    ///
    /// A future that is still pending when the next item arrives is dropped.
    fn map_latest<R, F, Fut>(self, mut map: F) -> LatestStream<R, Infallible>
    where
        Self::Item: Send + 'static,
        R: Send + 'static,
        F: FnMut(Self::Item) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        self.transform_latest(move |item, cx| {
            let fut = map(item);
            async move {
                cx.emit(fut.await).await;
                Ok(())
            }
        })
    }

    /// Map every item to an inner stream and forward the inner stream of the latest item.
    ///
    /// The previous inner stream is dropped as soon as a new item arrives.
    fn flat_map_latest<R, F, Inner>(self, mut map: F) -> LatestStream<R, Infallible>
    where
        Self::Item: Send + 'static,
        R: Send + 'static,
        F: FnMut(Self::Item) -> Inner + Send + 'static,
        Inner: Stream<Item = R> + Send + 'static,
    {
        self.transform_latest(move |item, cx| {
            let inner = map(item);
            async move {
                pin_mut!(inner);
                while let Some(value) = inner.next().await {
                    cx.emit(value).await;
                }
                Ok(())
            }
        })
    }
}

impl<S> TransformLatestExt for S where S: Stream + Sized + Send + 'static {}
