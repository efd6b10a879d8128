use crate::{
    sink::Sink, task::ActiveTask, Emitter, FlowError, LatestStream, TaskContext,
    TransformerConfig,
};
use futures_channel::mpsc::unbounded;
use futures_util::{pin_mut, FutureExt, Stream, StreamExt};
use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Turns an upstream sequence into a downstream one where only the latest value's run produces.
///
/// For every upstream value a new run of the transform is started. The run is driven up to its
/// first suspension point before the next upstream value is pulled. When the next value arrives
/// the previous run is cancelled (cooperatively, at its next suspension point) and anything it
/// still tries to emit is dropped. Downstream order follows upstream arrival order, and values
/// from two runs never interleave.
///
/// ```rust, no_run
/// # async fn demo() {
/// use futures_util::{stream, StreamExt};
/// use latest_flow::LatestFlowTransformer;
///
/// let upstream = stream::iter([Ok::<_, std::io::Error>(1), Ok(2), Ok(3)]);
/// let mut downstream = LatestFlowTransformer::default().subscribe(upstream, |value, cx| async move {
///     cx.emit(format!("page {value}")).await;
///     Ok(())
/// });
///
/// while let Some(item) = downstream.next().await {
///     println!("{item:?}");
/// }
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct LatestFlowTransformer {
    config: TransformerConfig,
}

impl LatestFlowTransformer {
    /// Create a transformer with the given settings.
    pub fn new(config: TransformerConfig) -> Self {
        Self { config }
    }

    /// The settings this transformer was built with.
    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Subscribe `transform` to `upstream`.
    ///
    /// Nothing runs until the returned stream is first polled, which must happen inside a tokio
    /// runtime. Dropping the returned stream stops the upstream and cancels the current run.
    pub fn subscribe<S, T, R, E, F, Fut>(&self, upstream: S, transform: F) -> LatestStream<R, E>
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: FnMut(T, TaskContext<R>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let sink = Arc::new(Sink::new(tx));
        let shutdown = CancellationToken::new();

        let span = tracing::debug_span!("transform_latest", label = %self.config.label);
        let producer = drive(
            upstream,
            transform,
            sink.clone(),
            shutdown.clone(),
            self.config.clone(),
        )
        .instrument(span);

        LatestStream::new(rx, sink, shutdown, Box::pin(producer))
    }
}

/// The producer loop: pull upstream values, supersede the active run, start the next one.
async fn drive<S, T, R, E, F, Fut>(
    upstream: S,
    mut transform: F,
    sink: Arc<Sink<R, E>>,
    shutdown: CancellationToken,
    config: TransformerConfig,
) where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: FnMut(T, TaskContext<R>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    pin_mut!(upstream);
    let mut active: Option<ActiveTask> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                stop(active.take());
                sink.close();
                return;
            }
            next = AssertUnwindSafe(upstream.next()).catch_unwind() => next,
        };

        let Ok(next) = next else {
            stop(active.take());
            tracing::warn!("upstream panicked");
            sink.fail(FlowError::UpstreamPanicked, config.superseded_errors);
            return;
        };

        match next {
            Some(Ok(value)) => {
                // Retire the old epoch before signalling the old run, so nothing it emits from
                // here on can reach the downstream.
                let Some(epoch) = sink.advance() else {
                    stop(active.take());
                    return;
                };
                if let Some(previous) = active.take() {
                    if previous.cancel() {
                        tracing::trace!(previous = %previous.epoch(), %epoch, "superseded run");
                    }
                }

                let token = CancellationToken::new();
                let emitter = Emitter::new(sink.clone(), epoch);
                let cx = TaskContext::new(epoch, token.clone(), emitter);
                let Ok(run) = std::panic::catch_unwind(AssertUnwindSafe(|| transform(value, cx)))
                else {
                    tracing::warn!(%epoch, "transform panicked before returning its future");
                    sink.fail(FlowError::Panicked(epoch), config.superseded_errors);
                    return;
                };

                active = Some(
                    ActiveTask::start(
                        epoch,
                        token,
                        run,
                        sink.clone(),
                        shutdown.clone(),
                        config.superseded_errors,
                    )
                    .await,
                );
            }
            Some(Err(error)) => {
                stop(active.take());
                sink.fail(FlowError::Upstream(error), config.superseded_errors);
                tracing::debug!("upstream failed");
                return;
            }
            None => break,
        }
    }

    // The upstream is done. The last run gets to finish on its own terms.
    if let Some(last) = active {
        let epoch = last.epoch();
        let token = last.token();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                token.cancel();
                sink.close();
                return;
            }
            _ = last.join() => {}
        }
        tracing::debug!(%epoch, "last run finished");
    }

    sink.complete();
}

fn stop(task: Option<ActiveTask>) {
    if let Some(task) = task {
        task.cancel();
    }
}
