use crate::Epoch;

/// An error that ends a latest-wins stream.
///
/// Exactly one of these is delivered to the downstream consumer, after which the stream ends.
/// Cancellation of a superseded run is never reported as an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum FlowError<E> {
    /// The upstream sequence failed.
    #[error("upstream failed: {0}")]
    Upstream(E),

    /// The transform failed while handling the value for `epoch`.
    #[error("transform for epoch {epoch} failed: {error}")]
    Transform {
        /// The run that failed.
        epoch: Epoch,
        /// What the transform returned.
        error: E,
    },

    /// The transform panicked while handling the value for this epoch.
    #[error("transform for epoch {0} panicked")]
    Panicked(Epoch),

    /// Polling the upstream sequence panicked.
    #[error("upstream panicked")]
    UpstreamPanicked,
}

impl<E> FlowError<E> {
    /// The epoch of the run that failed, if the failure came from a run.
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            FlowError::Upstream(_) | FlowError::UpstreamPanicked => None,
            FlowError::Transform { epoch, .. } | FlowError::Panicked(epoch) => Some(*epoch),
        }
    }
}

/// A value that could not be emitted. The value is handed back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError<R> {
    /// The emitting run belongs to an epoch that is no longer current.
    #[error("run {caller} was superseded by {current}")]
    Superseded {
        /// The rejected value.
        value: R,
        /// The epoch of the run that tried to emit.
        caller: Epoch,
        /// The epoch that is current now.
        current: Epoch,
    },

    /// The downstream has completed, failed or been dropped.
    #[error("downstream is closed")]
    Closed(R),
}

impl<R> EmitError<R> {
    /// Take back the value that was not emitted.
    pub fn into_inner(self) -> R {
        match self {
            EmitError::Superseded { value, .. } | EmitError::Closed(value) => value,
        }
    }
}

/// Returned from a cancellation checkpoint once a newer epoch has taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("run {epoch} was superseded")]
pub struct Superseded {
    /// The run that should stop.
    pub epoch: Epoch,
}
