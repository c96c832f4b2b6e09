//! Filesystem watching and modification fan-out.

use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use muster_core::{Modification, StorageError};

use crate::storage::DirectoryStorage;

impl DirectoryStorage {
    /// Watch the inventory directory and deliver non-empty modification
    /// lists to `on_modify`.
    ///
    /// Writes to `.yaml`/`.yml` files go through the regular bounded
    /// refresh; files appearing, disappearing or being renamed force a
    /// directory re-scan. The callback runs on a dedicated worker thread
    /// with the storage lock released, so it may call back into the storage;
    /// it must not block indefinitely.
    ///
    /// Dropping (or [`WatchHandle::stop`]ping) the returned handle ends the
    /// watch and joins the worker.
    ///
    /// # Errors
    ///
    /// Creation or registration failure of the watch backend.
    pub fn watch<F>(self: &Arc<Self>, on_modify: F) -> Result<WatchHandle, StorageError>
    where
        F: Fn(&[Modification]) + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |event| {
            if event_tx.send(event).is_err() {
                log::debug!("watch event dropped because the worker has stopped");
            }
        })
        .map_err(watch_error)?;
        watcher
            .watch(self.path(), RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        let storage = Arc::clone(self);
        let worker = thread::Builder::new()
            .name("muster-watch".to_string())
            .spawn(move || run_watch_loop(&storage, &event_rx, &on_modify))
            .map_err(|e| StorageError::Internal(format!("unable to spawn watch worker: {e}")))?;

        Ok(WatchHandle {
            watcher: Some(watcher),
            worker: Some(worker),
        })
    }
}

// The loop ends when the event channel disconnects, which happens when the
// backend watcher held by the WatchHandle is dropped.
fn run_watch_loop<F>(
    storage: &DirectoryStorage,
    events: &mpsc::Receiver<notify::Result<Event>>,
    on_modify: &F,
) where
    F: Fn(&[Modification]),
{
    while let Ok(event) = events.recv() {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                log::error!("watch backend error: {e}");
                continue;
            }
        };

        let refreshed = if rescans_directory(&event.kind) {
            storage.force_refresh()
        } else if is_inventory_write(&event) {
            storage.refresh()
        } else {
            continue;
        };

        match refreshed {
            Ok(mods) if !mods.is_empty() => on_modify(&mods),
            Ok(_) => {}
            Err(e) => log::error!("inventory refresh failed: {e}"),
        }
    }
}

fn rescans_directory(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}

fn is_inventory_write(event: &Event) -> bool {
    matches!(event.kind, EventKind::Modify(_))
        && event.paths.iter().any(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("yaml") | Some("yml")
            )
        })
}

fn watch_error(error: notify::Error) -> StorageError {
    StorageError::Io(io::Error::other(format!("watch backend error: {error}")))
}

/// Owns the watch backend and its worker thread.
pub struct WatchHandle {
    watcher: Option<RecommendedWatcher>,
    worker: Option<thread::JoinHandle<()>>,
}

impl WatchHandle {
    /// End the watch and join the worker thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the backend closes the event channel; the worker loop
        // sees the disconnect and returns.
        self.watcher.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("watch worker panicked during shutdown");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
