//! Boot-file watcher for hot reload.
//!
//! Service definitions inlined in the boot file are re-applied through the
//! same path as an admin PUT whenever the file changes. Listener-level
//! settings are not hot-reloadable and keep their boot values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_boot_config;
use crate::config::schema::ServiceConfig;

/// Watches the boot file and emits the service set on each valid reload.
pub struct BootFileWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<Vec<ServiceConfig>>,
}

impl BootFileWatcher {
    /// Create a watcher and the receiver its reloads are delivered on.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<Vec<ServiceConfig>>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = ?path, "boot file change detected, reloading services");
                        match load_boot_config(Some(&path)) {
                            Ok(config) => {
                                let _ = tx.send(config.services);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "boot file reload failed, keeping current services");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "boot file watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "boot file watcher started");
        Ok(watcher)
    }
}
