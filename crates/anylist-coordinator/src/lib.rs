//! Per-list polling coordinator.
//!
//! Each list gets one coordinator holding the last successfully fetched
//! snapshot. Refreshes happen on a fixed interval and on demand after
//! writes; concurrent refresh requests for the same list collapse into a
//! single in-flight fetch. A failed refresh never discards data: consumers
//! keep seeing the previous snapshot, stale by at most one interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use anylist_client::AnylistClient;
use anylist_core::{AnylistError, Result};
use anylist_types::{ListSnapshot, ShoppingItem};

/// Where refreshed items come from. A seam so the coordinator can be
/// exercised without a live server.
#[async_trait]
pub trait ItemsSource: Send + Sync {
    async fn fetch_items(&self, list_name: &str) -> Result<(StatusCode, Vec<ShoppingItem>)>;
}

#[async_trait]
impl ItemsSource for AnylistClient {
    async fn fetch_items(&self, list_name: &str) -> Result<(StatusCode, Vec<ShoppingItem>)> {
        self.get_detailed_items(Some(list_name)).await
    }
}

pub struct ListCoordinator {
    list_name: String,
    source: Arc<dyn ItemsSource>,
    interval: Duration,
    cancel: CancellationToken,
    snapshot: RwLock<Option<ListSnapshot>>,
    /// Held for the duration of a fetch; combined with `generation` it
    /// collapses concurrent refresh requests into one fetch.
    refresh_gate: Mutex<()>,
    generation: AtomicU64,
    last_success: RwLock<Option<Instant>>,
    last_error: RwLock<Option<String>>,
}

impl ListCoordinator {
    pub fn new(
        list_name: impl Into<String>,
        source: Arc<dyn ItemsSource>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            list_name: list_name.into(),
            source,
            interval,
            cancel,
            snapshot: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
            last_success: RwLock::new(None),
            last_error: RwLock::new(None),
        })
    }

    pub fn list_name(&self) -> &str {
        &self.list_name
    }

    /// The last successfully fetched snapshot, if any.
    pub async fn snapshot(&self) -> Option<ListSnapshot> {
        self.snapshot.read().await.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    pub async fn last_success(&self) -> Option<Instant> {
        *self.last_success.read().await
    }

    /// Fetches the list and replaces the snapshot wholesale. A caller that
    /// blocked while another refresh completed observes the bumped
    /// generation and reuses that result instead of fetching again.
    pub async fn refresh(&self) -> Result<()> {
        let observed = self.generation.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;
        if self.generation.load(Ordering::Acquire) != observed {
            return Ok(());
        }

        let outcome = self.source.fetch_items(&self.list_name).await;
        self.generation.fetch_add(1, Ordering::Release);

        match outcome {
            Ok((StatusCode::OK, items)) => {
                let snapshot = ListSnapshot::new(self.list_name.clone(), items);
                *self.snapshot.write().await = Some(snapshot);
                *self.last_success.write().await = Some(Instant::now());
                *self.last_error.write().await = None;
                Ok(())
            }
            Ok((code, _)) => {
                let message = format!("refresh returned status {code}");
                *self.last_error.write().await = Some(message);
                Err(AnylistError::RequestFailed {
                    endpoint: "items".to_string(),
                    status: code.as_u16(),
                })
            }
            Err(e) => {
                *self.last_error.write().await = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Runs the interval loop until the cancellation token fires. The first
    /// tick is immediate, so a freshly spawned coordinator populates its
    /// snapshot right away.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let coordinator = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(coordinator.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = coordinator.cancel.cancelled() => {
                        tracing::debug!(list = %coordinator.list_name, "coordinator loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.refresh().await {
                            tracing::warn!(
                                list = %coordinator.list_name,
                                "list refresh failed, keeping previous snapshot: {e}"
                            );
                        }
                    }
                }
            }
        })
    }
}
