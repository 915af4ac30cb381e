//! Device connectivity observer.
//!
//! A pure observer: the platform layer reports transitions via
//! [`NetworkMonitor::set_online`] and consumers watch them. No retry or
//! backoff logic lives here.

use std::sync::Arc;

use tokio::sync::watch;

/// Observes connectivity transitions and exposes the current state.
///
/// Subscribers get a lazy, restartable stream of states with one event per
/// observed transition; reporting the same state twice emits nothing.
#[derive(Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    /// Create a monitor with the given initial connectivity state
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Whether the device is currently online
    #[must_use]
    pub fn currently_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Report the current connectivity state (platform layer entry point)
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                *state = online;
                true
            }
        });
        if changed {
            tracing::debug!(online, "connectivity transition");
        }
    }

    /// Subscribe to connectivity transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn reports_current_state() {
        let monitor = NetworkMonitor::new(false);
        assert!(!monitor.currently_online());

        monitor.set_online(true);
        assert!(monitor.currently_online());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscriber_sees_each_transition() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();
        rx.mark_unchanged();

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        monitor.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_reports_emit_no_event() {
        let monitor = NetworkMonitor::new(true);
        let mut rx = monitor.subscribe();
        rx.mark_unchanged();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
