//! Debounced validation
//!
//! Each edit replaces the pending validation task; diagnostics are published
//! only after the text stayed unchanged for the configured delay.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Diagnostic, Validator};

/// Reruns [`Validator::validate`] after a quiet period
pub struct ValidationDebouncer {
    delay: Duration,
    sender: Arc<watch::Sender<Vec<Diagnostic>>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl ValidationDebouncer {
    pub fn new(delay: Duration) -> Self {
        let (sender, _) = watch::channel(Vec::new());
        Self {
            delay,
            sender: Arc::new(sender),
            pending: Mutex::new(None),
        }
    }

    /// Receiver of published diagnostics
    pub fn subscribe(&self) -> watch::Receiver<Vec<Diagnostic>> {
        self.sender.subscribe()
    }

    /// Last published diagnostics
    pub fn latest(&self) -> Vec<Diagnostic> {
        self.sender.borrow().clone()
    }

    /// Validate `text` once the delay passes without another call
    ///
    /// Outside a tokio runtime the text is validated immediately.
    pub fn schedule(&self, text: String, known_fields: Option<BTreeSet<String>>) {
        self.cancel();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.publish(Validator::validate(&text, known_fields.as_ref()));
            return;
        };

        let sender = Arc::clone(&self.sender);
        let delay = self.delay;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let diagnostics = Validator::validate(&text, known_fields.as_ref());
            debug!("Publishing {} diagnostics", diagnostics.len());
            sender.send_replace(diagnostics);
        });

        *self.lock_pending() = Some(handle);
    }

    /// Validate right away, dropping any pending run
    pub fn validate_now(
        &self,
        text: &str,
        known_fields: Option<&BTreeSet<String>>,
    ) -> Vec<Diagnostic> {
        self.cancel();
        let diagnostics = Validator::validate(text, known_fields);
        self.publish(diagnostics.clone());
        diagnostics
    }

    /// Drop the pending run, if any
    pub fn cancel(&self) {
        if let Some(handle) = self.lock_pending().take() {
            handle.abort();
        }
    }

    fn publish(&self, diagnostics: Vec<Diagnostic>) {
        self.sender.send_replace(diagnostics);
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ValidationDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
