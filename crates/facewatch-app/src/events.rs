//! Change notifications between the flows.
//!
//! Enrollment and roster publish after their writes complete; views that
//! depend on the roster subscribe and call [`Reload::reload`].

use crate::error::ReloadError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    UserAdded(String),
    UserDeleted(String),
    /// The enrollment dialog went away, with or without a new user.
    EnrollmentClosed,
}

impl RosterEvent {
    /// Whether stored users changed and dependents must reload.
    pub fn changes_roster(&self) -> bool {
        matches!(self, RosterEvent::UserAdded(_) | RosterEvent::UserDeleted(_))
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RosterEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: RosterEvent) {
        tracing::debug!(?event, "roster event");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RosterEvent> {
        self.tx.subscribe()
    }
}

/// A component that rebuilds its state from storage on demand.
#[async_trait]
pub trait Reload: Send {
    fn name(&self) -> &'static str;

    async fn reload(&mut self) -> Result<(), ReloadError>;
}

/// Reload every target after each roster change until the bus closes.
pub fn spawn_reload_listener(
    bus: &EventBus,
    targets: Vec<Arc<Mutex<dyn Reload>>>,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.changes_roster() => reload_all(&targets).await,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "reload listener lagged; reloading");
                    reload_all(&targets).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn reload_all(targets: &[Arc<Mutex<dyn Reload>>]) {
    for target in targets {
        let mut target = target.lock().await;
        if let Err(e) = target.reload().await {
            tracing::warn!(target = target.name(), error = %e, "reload failed");
        }
    }
}
