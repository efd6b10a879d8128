use crate::{
    epoch::RunScope, sink::Sink, EmitError, Emitter, Epoch, FlowError, Superseded,
    SupersededErrorPolicy,
};
use futures_util::{future::poll_fn, FutureExt};
use std::{future::Future, panic::AssertUnwindSafe, sync::Arc, task::Poll};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::Instrument;

/// What a transform gets for the duration of one run.
///
/// The context carries the run's epoch, its cancellation flag and an [`Emitter`]. Cancellation is
/// cooperative: the run's future is dropped the next time it suspends after a newer value
/// arrives. Runs that spin without suspending should call [`TaskContext::checkpoint`].
pub struct TaskContext<R> {
    epoch: Epoch,
    token: CancellationToken,
    emitter: Emitter<R>,
}

impl<R> TaskContext<R> {
    pub(crate) fn new(epoch: Epoch, token: CancellationToken, emitter: Emitter<R>) -> Self {
        Self {
            epoch,
            token,
            emitter,
        }
    }

    /// The epoch of this run.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// A handle that may be kept and used after this run has ended.
    pub fn emitter(&self) -> Emitter<R> {
        self.emitter.clone()
    }

    /// Push a value downstream. See [`Emitter::emit`].
    pub async fn emit(&self, value: R) {
        self.emitter.emit(value).await
    }

    /// Push a value downstream without suspending. See [`Emitter::try_emit`].
    pub fn try_emit(&self, value: R) -> Result<(), EmitError<R>> {
        self.emitter.try_emit(value)
    }

    /// Whether a newer value has superseded this run.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once this run has been superseded.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Yield to the scheduler and report whether this run should stop.
    pub async fn checkpoint(&self) -> Result<(), Superseded> {
        tokio::task::yield_now().await;
        match self.token.is_cancelled() {
            true => Err(Superseded { epoch: self.epoch }),
            false => Ok(()),
        }
    }
}

/// The run for one epoch.
///
/// `handle` is `None` when the run already finished during its first poll.
pub(crate) struct ActiveTask {
    epoch: Epoch,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

enum RunOutcome<E> {
    Finished,
    Cancelled,
    Failed(E),
    Panicked,
}

impl ActiveTask {
    /// Start `run` as the run for `epoch`.
    ///
    /// The run is polled in place until it first suspends, so everything it emits before its
    /// first `.await` point lands before the caller pulls the next upstream value. Whatever is
    /// left is spawned on the current tokio runtime.
    ///
    /// If the run fails, the error is handed to the sink and `shutdown` is cancelled so the
    /// producer loop stops pulling from upstream.
    pub(crate) async fn start<R, E, F>(
        epoch: Epoch,
        token: CancellationToken,
        run: F,
        sink: Arc<Sink<R, E>>,
        shutdown: CancellationToken,
        policy: SupersededErrorPolicy,
    ) -> Self
    where
        R: Send + 'static,
        E: Send + 'static,
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let scope = RunScope {
            epoch,
            token: token.clone(),
        };
        let cancel = token.clone();

        let body = async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => RunOutcome::Cancelled,
                res = AssertUnwindSafe(run).catch_unwind() => match res {
                    Ok(Ok(())) => RunOutcome::Finished,
                    Ok(Err(error)) => RunOutcome::Failed(error),
                    Err(_) => RunOutcome::Panicked,
                },
            };

            let error = match outcome {
                RunOutcome::Finished => {
                    tracing::trace!("run finished");
                    return;
                }
                RunOutcome::Cancelled => {
                    tracing::trace!("run cancelled");
                    return;
                }
                RunOutcome::Failed(error) => FlowError::Transform { epoch, error },
                RunOutcome::Panicked => {
                    tracing::warn!("run panicked");
                    FlowError::Panicked(epoch)
                }
            };

            if sink.fail(error, policy) {
                shutdown.cancel();
            } else {
                tracing::debug!("discarding error from a superseded run");
            }
        };

        let span = tracing::trace_span!("run", %epoch);
        let mut body = Box::pin(scope.enter(body).instrument(span));

        let handle = match poll_fn(|cx| Poll::Ready(body.as_mut().poll(cx))).await {
            Poll::Ready(()) => None,
            Poll::Pending => Some(tokio::spawn(body)),
        };

        Self {
            epoch,
            token,
            handle,
        }
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Ask the run to stop.
    ///
    /// Returns `true` only if a run that was still going got the signal. Cancelling a run that
    /// already finished or was already cancelled does nothing.
    pub(crate) fn cancel(&self) -> bool {
        if self.is_finished() || self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the run to end, whether it finished, failed or was cancelled.
    pub(crate) async fn join(self) {
        let Some(handle) = self.handle else {
            return;
        };
        if let Err(err) = handle.await {
            tracing::debug!(epoch = %self.epoch, "run did not join cleanly: {err}");
        }
    }
}
