//! Injectable log sink for the store and the connection factory.
//!
//! Events are emitted with `tracing`. A [`Logger`] built from a [`Dispatch`] routes them to that
//! subscriber only; the default logger emits to whatever dispatcher is current, which discards
//! everything until the application installs a subscriber.

use std::fmt;

use tracing::Dispatch;

#[derive(Clone, Default)]
pub struct Logger {
    dispatch: Option<Dispatch>,
}

impl Logger {
    /// Routes every event to `dispatch`.
    pub fn new(dispatch: Dispatch) -> Self {
        Logger { dispatch: Some(dispatch) }
    }

    /// Emits through the current default dispatcher.
    pub fn ambient() -> Self {
        Self::default()
    }

    /// Discards every event, regardless of any globally installed subscriber.
    pub fn disabled() -> Self {
        Logger { dispatch: Some(Dispatch::none()) }
    }

    /// Runs `f`, which emits `tracing` events, against this logger's sink.
    pub(crate) fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("injected", &self.dispatch.is_some())
            .finish()
    }
}
