use std::{
    fmt::{Debug, Display},
    future::Future,
};
use tokio_util::sync::CancellationToken;

/// A monotonically increasing identifier for one upstream value and the run it spawned.
///
/// The first value a transformer receives is tagged with epoch `1`. Epochs are never reused
/// within a transformer instance.
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub(crate) u64);

impl Epoch {
    /// The epoch before any upstream value has arrived.
    pub(crate) const IDLE: Epoch = Epoch(0);

    pub(crate) fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }

    /// The raw sequence number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Debug for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

impl Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marker for the run a piece of code is executing inside of.
#[derive(Clone)]
pub(crate) struct RunScope {
    pub(crate) epoch: Epoch,
    pub(crate) token: CancellationToken,
}

tokio::task_local! {
    static CURRENT_RUN: RunScope;
}

impl RunScope {
    /// Run a future with this scope installed as the current run.
    pub(crate) fn enter<F: Future>(self, fut: F) -> impl Future<Output = F::Output> {
        CURRENT_RUN.scope(self, fut)
    }

    /// The epoch of the run calling us, if any.
    pub(crate) fn current_epoch() -> Option<Epoch> {
        CURRENT_RUN.try_with(|run| run.epoch).ok()
    }

    /// Whether the calling run has been asked to stop. `false` outside of a run.
    pub(crate) fn current_cancelled() -> bool {
        CURRENT_RUN
            .try_with(|run| run.token.is_cancelled())
            .unwrap_or(false)
    }
}
