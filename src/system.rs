//! Process-lifetime wiring: owns every long-lived component in startup
//! order and exposes `suspend`/`resume` for a future config-reload signal
//! (spec §4.9).

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use jid::BareJid;
use tokio_util::sync::CancellationToken;

use crate::bot::{self, AdminBotHandle};
use crate::config_store::ConfigStore;
use crate::remote_api::RemoteApiClient;
use crate::sync_engine::{Env, SyncOptions};
use crate::watcher::DocumentWatcher;

pub struct SystemConfig {
    pub db_folder: PathBuf,
    pub admin_api_url: String,
    pub xmpp_domain: String,
    pub muc_service: String,
    pub bot_jid: BareJid,
    pub env: Env,
    pub default_test_password: String,
    pub managed_muc_options: Vec<(String, String)>,
    pub sync_timeout: std::time::Duration,
}

/// The running process: config store, remote API client, admin bot, and
/// file watcher, wired together and kept alive for the process lifetime.
pub struct System {
    store: Arc<ConfigStore>,
    api: Arc<RemoteApiClient>,
    bot_handle: AdminBotHandle,
    suspended: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl System {
    /// Build and start every component. `db_folder` is seeded with the
    /// default document if it doesn't already exist.
    pub async fn start(config: SystemConfig) -> Result<Self, crate::config_store::ConfigStoreError> {
        let store = Arc::new(ConfigStore::new(config.db_folder.clone()));
        store.ensure_seeded().await?;

        let api = Arc::new(RemoteApiClient::new(
            config.admin_api_url,
            config.xmpp_domain,
            config.muc_service,
        ));

        let managed_muc_options = if config.managed_muc_options.is_empty() {
            crate::sync_engine::default_muc_options()
        } else {
            config.managed_muc_options
        };
        let options = SyncOptions {
            env: config.env,
            default_test_password: config.default_test_password,
            managed_muc_options,
            sync_timeout: config.sync_timeout,
        };

        let (bot_handle, _bot_join) = bot::spawn(store.clone(), api.clone(), config.bot_jid, options.clone());

        let watcher = DocumentWatcher::start(config.db_folder)
            .map_err(|e| crate::config_store::ConfigStoreError::Write {
                path: "<watch>".to_string(),
                source: std::io::Error::other(e),
            })?;
        let watcher_store = store.clone();
        let watcher_api = api.clone();
        let watcher_bot = bot_handle.clone();
        let shutdown = CancellationToken::new();
        let watcher_shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watcher.run(watcher_store, watcher_api, watcher_bot, options) => {}
                _ = watcher_shutdown.cancelled() => {}
            }
        });

        Ok(Self {
            store,
            api,
            bot_handle,
            suspended: Arc::new(AtomicBool::new(false)),
            shutdown,
        })
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn api(&self) -> &RemoteApiClient {
        &self.api
    }

    /// Run until the process receives a shutdown signal. Currently waits
    /// on ctrl-c; a config-reload signal would call `suspend`/`resume`
    /// around a fresh `ConfigStore`/`RemoteApiClient` pair instead of
    /// tearing down the whole process. Cancelling `shutdown` also stops
    /// the background watcher task cleanly, so no sync starts after a
    /// shutdown has been requested.
    pub async fn run(&self) {
        let _ = tokio::signal::ctrl_c().await;
        self.shutdown.cancel();
        self.bot_handle.shutdown();
    }

    /// Mark the system suspended: the watcher and bot keep running but
    /// mutations should be refused until [`Self::resume`]. Not yet wired
    /// to an external signal — reserved for the config-reload feature
    /// this lifecycle was generalized to support.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }
}
