//! Notification fan-out to per-method listeners.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

use super::codec::Notification;

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener = Arc<dyn Fn(&Notification) -> Result<(), ListenerError> + Send + Sync>;

/// Routes id-less notifications to listeners registered by method name.
///
/// Listeners for one method run in registration order, once each per
/// notification. A listener that returns an error or panics is logged and
/// skipped; the remaining listeners still run.
#[derive(Default)]
pub struct SubscriptionDispatcher {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl SubscriptionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(&Notification) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(event.into())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Register a listener that forwards every notification for `event` into
    /// an unbounded channel. Forwarding stops silently once the receiver is
    /// dropped.
    pub fn channel(&self, event: impl Into<String>) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(event, move |notification: &Notification| {
            let _ = tx.send(notification.clone());
            Ok(())
        });
        rx
    }

    /// Deliver `notification` to its listeners. Returns how many listeners
    /// completed without error.
    pub fn dispatch(&self, notification: &Notification) -> usize {
        // Snapshot so listeners may subscribe without deadlocking.
        let listeners: Vec<Listener> = match self.listeners.read().get(&notification.method) {
            Some(list) => list.clone(),
            None => {
                trace!(rpc.method = %notification.method, "notification without listeners");
                return 0;
            }
        };

        let mut delivered = 0;
        for (index, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(notification))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => warn!(
                    rpc.method = %notification.method,
                    listener = index,
                    error = %err,
                    "notification listener failed"
                ),
                Err(_) => error!(
                    rpc.method = %notification.method,
                    listener = index,
                    "notification listener panicked"
                ),
            }
        }
        delivered
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }
}
