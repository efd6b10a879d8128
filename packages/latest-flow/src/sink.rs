use crate::{EmitError, Epoch, FlowError, SupersededErrorPolicy};
use futures_channel::mpsc::UnboundedSender;
use parking_lot::Mutex;

/// The lifecycle of a transformer instance.
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum TransformerState {
    /// No upstream value has arrived yet.
    Idle,

    /// The run for this epoch is current.
    Running(Epoch),

    /// The upstream ended and the last run finished.
    Completed,

    /// An error was delivered downstream.
    Failed,
}

impl TransformerState {
    /// Whether the transformer has stopped for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransformerState::Completed | TransformerState::Failed)
    }
}

/// The side of the downstream queue that emitters push into.
pub(crate) trait EmitTarget<R>: Send + Sync {
    fn push(&self, caller: Option<Epoch>, value: R) -> Result<(), EmitError<R>>;

    fn current(&self) -> Epoch;
}

/// The downstream queue, gated by the current epoch.
///
/// Every accepted emission and every epoch change happens under the same lock, so a value from
/// epoch N can never land after epoch N+1 has become current.
pub(crate) struct Sink<R, E> {
    inner: Mutex<SinkInner<R, E>>,
}

struct SinkInner<R, E> {
    current: Epoch,
    state: TransformerState,
    tx: Option<UnboundedSender<Result<R, FlowError<E>>>>,
}

impl<R, E> Sink<R, E> {
    pub(crate) fn new(tx: UnboundedSender<Result<R, FlowError<E>>>) -> Self {
        Self {
            inner: Mutex::new(SinkInner {
                current: Epoch::IDLE,
                state: TransformerState::Idle,
                tx: Some(tx),
            }),
        }
    }

    pub(crate) fn state(&self) -> TransformerState {
        self.inner.lock().state
    }

    /// Make the next epoch current, retiring the previous one.
    ///
    /// Returns `None` once the sink is closed.
    pub(crate) fn advance(&self) -> Option<Epoch> {
        let mut inner = self.inner.lock();
        if inner.tx.is_none() {
            return None;
        }
        inner.current = inner.current.next();
        inner.state = TransformerState::Running(inner.current);
        Some(inner.current)
    }

    /// Deliver an error and close the queue.
    ///
    /// Returns `false` if the error was dropped, either because the queue was already closed or
    /// because `policy` discards errors from the failing epoch.
    pub(crate) fn fail(&self, error: FlowError<E>, policy: SupersededErrorPolicy) -> bool {
        let mut inner = self.inner.lock();
        if let Some(failed) = error.epoch() {
            if !policy.should_propagate(failed, inner.current) {
                return false;
            }
        }
        let Some(tx) = inner.tx.take() else {
            return false;
        };
        inner.state = TransformerState::Failed;
        _ = tx.unbounded_send(Err(error));
        true
    }

    /// Close the queue after the last run finished.
    pub(crate) fn complete(&self) {
        let mut inner = self.inner.lock();
        if inner.tx.take().is_some() {
            inner.state = TransformerState::Completed;
        }
    }

    /// Close the queue without changing the state. Used when the downstream went away.
    pub(crate) fn close(&self) {
        self.inner.lock().tx.take();
    }
}

impl<R, E> EmitTarget<R> for Sink<R, E>
where
    R: Send,
    E: Send,
{
    fn push(&self, caller: Option<Epoch>, value: R) -> Result<(), EmitError<R>> {
        let inner = self.inner.lock();

        if let Some(caller) = caller {
            if caller != inner.current {
                return Err(EmitError::Superseded {
                    value,
                    caller,
                    current: inner.current,
                });
            }
        }

        match inner.tx.as_ref() {
            Some(tx) if !tx.is_closed() => {
                _ = tx.unbounded_send(Ok(value));
                Ok(())
            }
            _ => Err(EmitError::Closed(value)),
        }
    }

    fn current(&self) -> Epoch {
        self.inner.lock().current
    }
}
