//! The code buffer and its run action.
//!
//! One `CodeStore` exists per application instance, constructed explicitly at
//! startup and shared by `Arc`. Views subscribe to the buffer instead of
//! keeping their own copy.

use std::sync::Arc;

use tokio::sync::watch;

use crate::loader::{EngineLoader, RunError};
use crate::model::{ExecutionRequest, RunOutcome};
use crate::util::placeholder_buffer;

pub struct CodeStore {
    // The watch channel is the buffer: one writer, any number of subscribers.
    buffer: watch::Sender<String>,
    loader: Arc<EngineLoader>,
}

impl CodeStore {
    /// A store holding the default placeholder buffer.
    pub fn new(loader: Arc<EngineLoader>) -> Self {
        let (buffer, _) = watch::channel(placeholder_buffer());
        Self { buffer, loader }
    }

    /// Snapshot of the current buffer.
    pub fn code(&self) -> String {
        self.buffer.borrow().clone()
    }

    /// Replace the buffer unconditionally and wake subscribers.
    pub fn set_code(&self, text: impl Into<String>) {
        self.buffer.send_replace(text.into());
    }

    /// Read/subscribe surface for views; never hands out a divergent copy.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.buffer.subscribe()
    }

    /// Run whatever the buffer holds right now.
    ///
    /// The snapshot is taken before the first suspension point, so a run
    /// always executes the buffer as it was at trigger time, not as it is
    /// when a slow engine load finishes. Failures propagate to the caller and
    /// leave the buffer untouched.
    pub async fn run_current_code(&self) -> Result<RunOutcome, RunError> {
        let request = ExecutionRequest::new(self.code());
        self.loader.dispatch(request).await
    }

    pub fn loader(&self) -> &Arc<EngineLoader> {
        &self.loader
    }
}
