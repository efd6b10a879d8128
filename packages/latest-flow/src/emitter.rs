use crate::{epoch::RunScope, sink::EmitTarget, EmitError, Epoch};
use std::sync::Arc;

/// A handle through which a run pushes values downstream.
///
/// Emitters are reference counted and are not tied to the run that handed them out. A later run
/// may keep using an emitter it got from an earlier one; the emission is attributed to whichever
/// run makes the call, so it is delivered as long as that run is still current.
///
/// Calls made outside of any run are attributed to the current epoch.
pub struct Emitter<R> {
    target: Arc<dyn EmitTarget<R>>,
    origin: Epoch,
}

impl<R> Clone for Emitter<R> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            origin: self.origin,
        }
    }
}

impl<R> std::fmt::Debug for Emitter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("origin", &self.origin)
            .field("current", &self.target.current())
            .finish()
    }
}

impl<R> Emitter<R> {
    pub(crate) fn new(target: Arc<dyn EmitTarget<R>>, origin: Epoch) -> Self {
        Self { target, origin }
    }

    /// The epoch of the run this emitter was created for.
    pub fn origin(&self) -> Epoch {
        self.origin
    }

    /// Push a value downstream without suspending.
    pub fn try_emit(&self, value: R) -> Result<(), EmitError<R>> {
        let caller = RunScope::current_epoch();
        if let Some(caller) = caller {
            if caller != self.origin {
                tracing::trace!(origin = %self.origin, %caller, "emitting through a handed-off emitter");
            }
        }
        self.target.push(caller, value)
    }

    /// Push a value downstream.
    ///
    /// If the calling run has been superseded this never returns: the run is parked until its
    /// cancellation drops it, so no code after a stale `emit` ever executes. Outside of a run a
    /// rejected value is simply dropped.
    pub async fn emit(&self, value: R) {
        match self.try_emit(value) {
            Ok(()) => {}
            Err(EmitError::Superseded { caller, current, .. }) => {
                tracing::trace!(%caller, %current, "dropping emission from a superseded run");
                std::future::pending::<()>().await;
            }
            Err(EmitError::Closed(_)) => {
                if RunScope::current_cancelled() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}
