//! Active/exited state of a view, observable from in-flight work.
//!
//! Every visit to a view gets its own `ViewLifecycle`. Work started during the
//! visit holds an `ActiveSignal`; once the visit ends the signal reports
//! inactive forever, even if the view is entered again.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug)]
pub struct ViewLifecycle {
    tx: watch::Sender<bool>,
}

impl ViewLifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }

    pub fn signal(&self) -> ActiveSignal {
        ActiveSignal {
            rx: self.tx.subscribe(),
            _keep_open: None,
        }
    }

    /// End the visit. Wakes every task waiting on `ActiveSignal::cancelled`.
    pub fn deactivate(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_active(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ViewLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ViewLifecycle {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[derive(Debug, Clone)]
pub struct ActiveSignal {
    rx: watch::Receiver<bool>,
    _keep_open: Option<Arc<watch::Sender<bool>>>,
}

impl ActiveSignal {
    /// A signal that never goes inactive, for work not tied to a view.
    pub fn detached() -> Self {
        let (tx, rx) = watch::channel(true);
        Self {
            rx,
            _keep_open: Some(Arc::new(tx)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.rx.has_changed().is_ok() && *self.rx.borrow()
    }

    /// Resolves once the owning visit has ended.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the sender is gone, which also ends the visit.
        let _ = rx.wait_for(|active| !*active).await;
    }
}
