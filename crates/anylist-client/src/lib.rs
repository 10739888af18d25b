//! HTTP client for the AnyList list-management server.
//!
//! Every operation resolves a base URL first: an explicitly configured
//! remote address wins, otherwise the supervised local binary serves, and
//! with neither the call fails with `ServerUnavailable`. Application-level
//! failures (non-tolerated status codes) are returned to the caller as
//! status codes and logged once here; errors are reserved for transport
//! faults, malformed bodies and the no-server case.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;

use anylist_core::{AnylistError, BridgeConfig, Result};
use anylist_sidecar::ServerSupervisor;
use anylist_types::{
    partition_item_names, AddItemRequest, CheckItemRequest, ItemAddress, ItemUpdates,
    ItemsResponse, ListsResponse, RemoveItemRequest, ShoppingItem, UpdateItemRequest,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `200 OK` or `304 Not Modified`: the server reports "not modified" for
/// writes that change nothing observable, which callers treat as success.
fn tolerated(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::NOT_MODIFIED
}

#[derive(Clone)]
pub struct AnylistClient {
    http: Client,
    config: Arc<BridgeConfig>,
    supervisor: Option<Arc<ServerSupervisor>>,
}

impl AnylistClient {
    pub fn new(
        config: Arc<BridgeConfig>,
        supervisor: Option<Arc<ServerSupervisor>>,
    ) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            config,
            supervisor,
        })
    }

    /// Resolution order: configured remote address, then the supervised
    /// local server if it is up, then `ServerUnavailable`.
    async fn base_url(&self) -> Result<String> {
        if let Some(addr) = &self.config.server_address {
            return Ok(addr.trim_end_matches('/').to_string());
        }
        if let Some(supervisor) = &self.supervisor {
            if supervisor.available().await {
                return Ok(supervisor.base_url());
            }
        }
        Err(AnylistError::ServerUnavailable)
    }

    async fn endpoint_url(&self, endpoint: &str) -> Result<String> {
        Ok(format!("{}/{}", self.base_url().await?, endpoint))
    }

    pub async fn server_available(&self) -> bool {
        self.base_url().await.is_ok()
    }

    async fn post_json<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<StatusCode> {
        let url = self.endpoint_url(endpoint).await?;
        let response = self.http.post(&url).json(body).send().await?;
        Ok(response.status())
    }

    /// Adds an item; the name is trimmed and capitalized before
    /// transmission. Success codes are 200 and 304.
    pub async fn add_item(
        &self,
        name: &str,
        updates: Option<&ItemUpdates>,
        list_name: Option<&str>,
    ) -> Result<StatusCode> {
        let body = AddItemRequest::new(name, self.config.resolved_list_name(list_name), updates);
        let code = self.post_json("add", &body).await?;
        if !tolerated(code) {
            tracing::error!("failed to add item, received error code {code}");
        }
        Ok(code)
    }

    pub async fn remove_item_by_name(
        &self,
        name: &str,
        list_name: Option<&str>,
    ) -> Result<StatusCode> {
        self.remove_item(ItemAddress::Name(name.to_string()), list_name)
            .await
    }

    pub async fn remove_item_by_id(&self, id: &str, list_name: Option<&str>) -> Result<StatusCode> {
        self.remove_item(ItemAddress::Id(id.to_string()), list_name)
            .await
    }

    async fn remove_item(
        &self,
        address: ItemAddress,
        list_name: Option<&str>,
    ) -> Result<StatusCode> {
        let body = RemoveItemRequest {
            address,
            list: self.config.resolved_list_name(list_name),
        };
        let code = self.post_json("remove", &body).await?;
        if !tolerated(code) {
            tracing::error!("failed to remove item, received error code {code}");
        }
        Ok(code)
    }

    /// Sets an item's checked flag. Re-checking an already-checked item is
    /// not an error: the server answers 304.
    pub async fn check_item(
        &self,
        name: &str,
        list_name: Option<&str>,
        checked: bool,
    ) -> Result<StatusCode> {
        let body = CheckItemRequest::new(name, self.config.resolved_list_name(list_name), checked);
        let code = self.post_json("check", &body).await?;
        if !tolerated(code) {
            tracing::error!("failed to update item status, received error code {code}");
        }
        Ok(code)
    }

    /// Updates an existing item by id. An update always changes something
    /// observable, so only 200 counts as success here.
    pub async fn update_item(
        &self,
        id: &str,
        updates: &ItemUpdates,
        list_name: Option<&str>,
    ) -> Result<StatusCode> {
        let body = UpdateItemRequest::new(
            id.to_string(),
            self.config.resolved_list_name(list_name),
            updates,
        );
        let code = self.post_json("update", &body).await?;
        if code != StatusCode::OK {
            tracing::error!("failed to update item, received error code {code}");
        }
        Ok(code)
    }

    /// Fetches full item records for a list. Non-200 responses yield an
    /// empty collection alongside the status code.
    pub async fn get_detailed_items(
        &self,
        list_name: Option<&str>,
    ) -> Result<(StatusCode, Vec<ShoppingItem>)> {
        let url = self.endpoint_url("items").await?;
        let mut request = self.http.get(&url);
        let resolved = self.config.resolved_list_name(list_name);
        if !resolved.is_empty() {
            request = request.query(&[("list", resolved.as_str())]);
        }

        let response = request.send().await?;
        let code = response.status();
        if code != StatusCode::OK {
            tracing::error!("failed to get items, received error code {code}");
            return Ok((code, Vec::new()));
        }

        let body: ItemsResponse = response
            .json()
            .await
            .map_err(|e| AnylistError::MalformedResponse(format!("items response: {e}")))?;
        Ok((code, body.into_items()))
    }

    /// Name-only view for legacy callers: a stable partition of the list
    /// into (unchecked, checked) item names.
    pub async fn get_items(
        &self,
        list_name: Option<&str>,
    ) -> Result<(StatusCode, (Vec<String>, Vec<String>))> {
        let (code, items) = self.get_detailed_items(list_name).await?;
        if code != StatusCode::OK {
            return Ok((code, (Vec::new(), Vec::new())));
        }
        Ok((code, partition_item_names(&items)))
    }

    /// Enumerates list names known to the server; a null `lists` array is
    /// treated as empty.
    pub async fn get_lists(&self) -> Result<(StatusCode, Vec<String>)> {
        let url = self.endpoint_url("lists").await?;
        let response = self.http.get(&url).send().await?;
        let code = response.status();
        if code != StatusCode::OK {
            tracing::error!("failed to get lists, received error code {code}");
            return Ok((code, Vec::new()));
        }

        let body: ListsResponse = response
            .json()
            .await
            .map_err(|e| AnylistError::MalformedResponse(format!("lists response: {e}")))?;
        Ok((code, body.into_lists()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerated_accepts_ok_and_not_modified() {
        assert!(tolerated(StatusCode::OK));
        assert!(tolerated(StatusCode::NOT_MODIFIED));
        assert!(!tolerated(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!tolerated(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn unavailable_without_address_or_supervisor() {
        let config = Arc::new(BridgeConfig {
            server_binary: Some("/opt/anylist/server".into()),
            email: Some("user@example.com".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        });
        let client = AnylistClient::new(config, None).unwrap();

        let err = client.add_item("milk", None, None).await.unwrap_err();
        assert!(matches!(err, AnylistError::ServerUnavailable));
        assert!(!client.server_available().await);
    }
}
