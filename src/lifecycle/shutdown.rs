//! Graceful shutdown orchestration.
//!
//! # Shutdown Sequence
//! 1. Stop accepting new connections
//! 2. Drain in-flight requests (bounded)
//! 3. Stop background tasks (probe scheduler, watchers)
//! 4. Exit
//!
//! # Design Decisions
//! - One broadcast channel; every long-lived task holds a receiver
//! - Drain has a deadline; the process never hangs on a stuck stream

use tokio::sync::broadcast;

/// Broadcast-based shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Obtain a receiver for a long-lived task.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signal all subscribers to stop.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
