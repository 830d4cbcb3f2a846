//! Watches `dbFolder` for edits to the primary document and triggers a sync
//! (spec §4.8). Bridges `notify`'s callback-based API into an async stream,
//! the same pattern the file watcher underlying this project's ancestor LSP
//! mode used to debounce editor save events.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::bot::AdminBotHandle;
use crate::config_store::{ConfigStore, is_primary_document};
use crate::mutator::swap_state_with_bot;
use crate::remote_api::RemoteApiClient;
use crate::sync_engine::SyncOptions;

/// How long to wait after the last filesystem event before syncing, so a
/// sequence of writes from an editor's save (temp file + rename) collapses
/// into a single sync instead of several.
const DEBOUNCE: Duration = Duration::from_millis(500);

pub struct DocumentWatcher {
    _inner: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<()>,
}

impl DocumentWatcher {
    /// Start watching `db_folder`. Events for any path other than the
    /// primary document are ignored at the source.
    pub fn start(db_folder: PathBuf) -> notify::Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if event.paths.iter().any(|p| is_primary_document(p)) {
                let _ = tx.send(());
            }
        })?;
        watcher.watch(&db_folder, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _inner: watcher,
            events,
        })
    }

    /// Drive the watch loop forever: debounce bursts of filesystem events,
    /// skip syncs where the document's content didn't actually change (a
    /// write we ourselves just made lands back in this watcher as an
    /// event), and otherwise run a full sync through the mutator.
    pub async fn run(mut self, store: Arc<ConfigStore>, api: Arc<RemoteApiClient>, bot: AdminBotHandle, options: SyncOptions) {
        let last_seen_sha: Mutex<Option<String>> = Mutex::new(store.current_sha().await.ok());

        // Generation counter: each incoming event bumps it; a debounce task
        // only acts if its generation is still the latest when it wakes,
        // so a burst of events yields one sync, not one per event.
        let mut generation: u64 = 0;

        loop {
            if self.events.recv().await.is_none() {
                break;
            }
            // Drain any events that arrived while we were idle, so a burst
            // collapses to the generation at the end of the burst.
            while self.events.try_recv().is_ok() {}

            generation = generation.wrapping_add(1);
            let this_generation = generation;
            tokio::time::sleep(DEBOUNCE).await;

            // If more events arrived during the sleep, a newer generation
            // will have already been scheduled to run after us; skip.
            if this_generation != generation {
                continue;
            }

            let current_sha = match store.current_sha().await {
                Ok(sha) => sha,
                Err(e) => {
                    tracing::warn!(error = %e, "could not read document to check for changes");
                    continue;
                }
            };

            {
                let mut guard = last_seen_sha.lock().await;
                if guard.as_deref() == Some(current_sha.as_str()) {
                    continue; // our own write, or a no-op touch
                }
                *guard = Some(current_sha.clone());
            }

            tracing::info!("filesystem change detected, syncing");
            let result = swap_state_with_bot(
                &store,
                &api,
                Some(bot.clone()),
                options.clone(),
                "filesystem change",
                |_document| Ok(()),
            )
            .await;
            match result {
                Ok(outcome) => {
                    if outcome.has_changes() {
                        tracing::info!(entries = outcome.entries.len(), "sync applied filesystem change");
                    } else {
                        tracing::info!("sync found nothing to change");
                    }
                }
                Err(e) => tracing::error!(error = %e, "sync triggered by filesystem change failed"),
            }

            // The write inside swap_state changes the on-disk SHA again;
            // remember it so that event doesn't trigger a second sync.
            if let Ok(new_sha) = store.current_sha().await {
                *last_seen_sha.lock().await = Some(new_sha);
            }
        }
    }
}
