//! Owned runtime context for the AnyList bridge.
//!
//! `AnylistRuntime` is created once at setup and passed to every operation;
//! there is no ambient global server handle. Setup validates configuration,
//! optionally starts the supervised server binary, builds the HTTP client,
//! enumerates the server's lists and spawns one polling coordinator per
//! list. Mutating operations refresh the affected list's coordinator after
//! the write completes, so reads that follow a write see fresh data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use reqwest::StatusCode;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use anylist_client::AnylistClient;
use anylist_coordinator::ListCoordinator;
use anylist_core::{BridgeConfig, Result};
use anylist_sidecar::{ServerSupervisor, SupervisorState};
use anylist_types::{ItemUpdates, ListSnapshot, ShoppingItem};

pub struct AnylistRuntime {
    config: Arc<BridgeConfig>,
    client: AnylistClient,
    supervisor: Option<Arc<ServerSupervisor>>,
    coordinators: RwLock<HashMap<String, Arc<ListCoordinator>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for AnylistRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnylistRuntime").finish_non_exhaustive()
    }
}

impl AnylistRuntime {
    /// Validates the configuration and brings the bridge up. A supervised
    /// binary that fails to start is logged and degrades the runtime to
    /// remote-only operation; it does not fail setup.
    pub async fn setup(config: BridgeConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let config = Arc::new(config);

        let supervisor = if config.server_binary.is_some() {
            let supervisor = ServerSupervisor::from_config(&config)?;
            if let Err(e) = supervisor.start().await {
                tracing::error!("failed to start server binary, continuing without it: {e}");
            } else {
                tracing::info!("server binary successfully started");
            }
            Some(supervisor)
        } else {
            None
        };

        let client = AnylistClient::new(Arc::clone(&config), supervisor.clone())?;

        let runtime = Arc::new(Self {
            config,
            client,
            supervisor,
            coordinators: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        runtime.discover_lists().await;
        Ok(runtime)
    }

    /// Enumerates the server's lists and spawns a coordinator for any list
    /// that doesn't have one yet. A failed enumeration leaves the existing
    /// coordinators untouched.
    pub async fn discover_lists(&self) {
        let lists = match self.client.get_lists().await {
            Ok((StatusCode::OK, lists)) => lists,
            Ok((code, _)) => {
                tracing::warn!("list enumeration returned status {code}");
                return;
            }
            Err(e) => {
                tracing::warn!("list enumeration failed: {e}");
                return;
            }
        };

        let interval = self.config.refresh_interval();
        let mut coordinators = self.coordinators.write().await;
        let mut tasks = self.tasks.lock().await;
        for list_name in lists {
            if coordinators.contains_key(&list_name) {
                continue;
            }
            let coordinator = ListCoordinator::new(
                list_name.clone(),
                Arc::new(self.client.clone()),
                interval,
                self.cancel.child_token(),
            );
            tasks.push(Arc::clone(&coordinator).spawn());
            coordinators.insert(list_name, coordinator);
        }
    }

    pub fn client(&self) -> &AnylistClient {
        &self.client
    }

    pub async fn is_server_available(&self) -> bool {
        self.client.server_available().await
    }

    pub async fn supervisor_state(&self) -> Option<SupervisorState> {
        match &self.supervisor {
            Some(supervisor) => Some(supervisor.state().await),
            None => None,
        }
    }

    pub async fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.coordinators.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// The coordinator's current snapshot for a list, if one exists.
    pub async fn snapshot(&self, list_name: &str) -> Option<ListSnapshot> {
        let coordinator = self.coordinators.read().await.get(list_name).cloned()?;
        coordinator.snapshot().await
    }

    /// When the list's snapshot was last refreshed successfully. `None` for
    /// an unknown list or one that has never refreshed; consumers use this
    /// to report staleness after transient failures.
    pub async fn last_refreshed(&self, list_name: &str) -> Option<Instant> {
        let coordinator = self.coordinators.read().await.get(list_name).cloned()?;
        coordinator.last_success().await
    }

    async fn coordinator_for(&self, list_name: Option<&str>) -> Option<Arc<ListCoordinator>> {
        let resolved = self.config.resolved_list_name(list_name);
        self.coordinators.read().await.get(&resolved).cloned()
    }

    /// Refreshes the affected list's snapshot after a write. The write has
    /// already completed (or failed) by the time this runs, so the refresh
    /// can't race it.
    async fn refresh_after_write(&self, list_name: Option<&str>) {
        if let Some(coordinator) = self.coordinator_for(list_name).await {
            if let Err(e) = coordinator.refresh().await {
                tracing::warn!(
                    list = coordinator.list_name(),
                    "post-write refresh failed: {e}"
                );
            }
        }
    }

    pub async fn add_item(
        &self,
        name: &str,
        updates: Option<&ItemUpdates>,
        list_name: Option<&str>,
    ) -> Result<StatusCode> {
        let code = self.client.add_item(name, updates, list_name).await?;
        self.refresh_after_write(list_name).await;
        Ok(code)
    }

    pub async fn remove_item_by_name(
        &self,
        name: &str,
        list_name: Option<&str>,
    ) -> Result<StatusCode> {
        let code = self.client.remove_item_by_name(name, list_name).await?;
        self.refresh_after_write(list_name).await;
        Ok(code)
    }

    pub async fn remove_item_by_id(
        &self,
        id: &str,
        list_name: Option<&str>,
    ) -> Result<StatusCode> {
        let code = self.client.remove_item_by_id(id, list_name).await?;
        self.refresh_after_write(list_name).await;
        Ok(code)
    }

    pub async fn check_item(
        &self,
        name: &str,
        list_name: Option<&str>,
        checked: bool,
    ) -> Result<StatusCode> {
        let code = self.client.check_item(name, list_name, checked).await?;
        self.refresh_after_write(list_name).await;
        Ok(code)
    }

    pub async fn update_item(
        &self,
        id: &str,
        updates: &ItemUpdates,
        list_name: Option<&str>,
    ) -> Result<StatusCode> {
        let code = self.client.update_item(id, updates, list_name).await?;
        self.refresh_after_write(list_name).await;
        Ok(code)
    }

    pub async fn get_detailed_items(
        &self,
        list_name: Option<&str>,
    ) -> Result<(StatusCode, Vec<ShoppingItem>)> {
        self.client.get_detailed_items(list_name).await
    }

    pub async fn get_items(
        &self,
        list_name: Option<&str>,
    ) -> Result<(StatusCode, (Vec<String>, Vec<String>))> {
        self.client.get_items(list_name).await
    }

    pub async fn get_lists(&self) -> Result<(StatusCode, Vec<String>)> {
        self.client.get_lists().await
    }

    /// Tears the bridge down: coordinator loops are cancelled, the
    /// supervised binary receives its termination signal without being
    /// awaited, and in-flight HTTP calls finish under their own timeouts.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        if let Some(supervisor) = &self.supervisor {
            supervisor.stop().await;
        }
        tracing::info!("anylist runtime shut down");
    }
}
