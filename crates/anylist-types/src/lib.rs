// Shared data model and wire payloads for the AnyList bridge.
//
// Everything the remote list server sends is treated as untrusted: fields
// may be missing, arrays may be null, and two payload revisions exist for
// item addressing (`name`-keyed and `id`-keyed). The types here absorb all
// of that so the client and coordinator can stay schema-agnostic.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// A single item on a shopping list, as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingItem {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The most recently fetched state of one list. Replaced wholesale on every
/// successful refresh; never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListSnapshot {
    pub list_name: String,
    pub items: Vec<ShoppingItem>,
    #[serde(skip)]
    pub fetched_at: Option<SystemTime>,
}

impl ListSnapshot {
    pub fn new(list_name: impl Into<String>, items: Vec<ShoppingItem>) -> Self {
        Self {
            list_name: list_name.into(),
            items,
            fetched_at: Some(SystemTime::now()),
        }
    }

    /// Names of items that are not checked off, in list order.
    pub fn unchecked_names(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|item| !item.checked)
            .map(|item| item.name.clone())
            .collect()
    }

    /// Names of checked-off items, in list order.
    pub fn checked_names(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|item| item.checked)
            .map(|item| item.name.clone())
            .collect()
    }
}

/// Optional field set applied to add/update payloads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemUpdates {
    pub name: Option<String>,
    pub checked: Option<bool>,
    pub notes: Option<String>,
}

impl ItemUpdates {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.checked.is_none() && self.notes.is_none()
    }
}

/// How a mutation addresses an existing item. The server accepts either a
/// `name`-keyed or an `id`-keyed body depending on payload revision; both
/// are carried as first-class addressing modes.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemAddress {
    Name(String),
    Id(String),
}

impl ItemAddress {
    fn apply(&self, body: &mut serde_json::Map<String, serde_json::Value>) {
        match self {
            ItemAddress::Name(name) => {
                body.insert("name".into(), serde_json::Value::String(name.trim().into()));
            }
            ItemAddress::Id(id) => {
                body.insert("id".into(), serde_json::Value::String(id.clone()));
            }
        }
    }
}

/// Body for `POST /add`.
#[derive(Debug, Clone, Serialize)]
pub struct AddItemRequest {
    pub name: String,
    pub list: String,
    pub checked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AddItemRequest {
    /// Builds the add payload: normalized name, resolved list, optional
    /// updates folded in, and `checked` forced to false (a freshly added
    /// item is never pre-checked).
    pub fn new(raw_name: &str, list: String, updates: Option<&ItemUpdates>) -> Self {
        let mut request = Self {
            name: normalize_item_name(raw_name),
            list,
            checked: false,
            notes: None,
        };
        if let Some(updates) = updates {
            if let Some(name) = &updates.name {
                request.name = normalize_item_name(name);
            }
            if let Some(notes) = &updates.notes {
                request.notes = Some(notes.clone());
            }
        }
        request
    }
}

/// Body for `POST /remove`. Serialized by hand because the addressing key
/// changes with the payload revision.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveItemRequest {
    pub address: ItemAddress,
    pub list: String,
}

impl Serialize for RemoveItemRequest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut body = serde_json::Map::new();
        self.address.apply(&mut body);
        body.insert("list".into(), serde_json::Value::String(self.list.clone()));
        serde_json::Value::Object(body).serialize(serializer)
    }
}

/// Body for `POST /check`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckItemRequest {
    pub name: String,
    pub list: String,
    pub checked: bool,
}

impl CheckItemRequest {
    pub fn new(raw_name: &str, list: String, checked: bool) -> Self {
        Self {
            name: raw_name.trim().to_string(),
            list,
            checked,
        }
    }
}

/// Body for `POST /update`. Always id-keyed: updates target an item the
/// caller already identified.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateItemRequest {
    pub id: String,
    pub list: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl UpdateItemRequest {
    pub fn new(id: String, list: String, updates: &ItemUpdates) -> Self {
        Self {
            id,
            list,
            name: updates.name.as_deref().map(normalize_item_name),
            checked: updates.checked,
            notes: updates.notes.clone(),
        }
    }
}

/// Response body of `GET /items`. The server sends `{"items": null}` for an
/// empty list, so the array is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemsResponse {
    #[serde(default)]
    pub items: Option<Vec<ShoppingItem>>,
}

impl ItemsResponse {
    pub fn into_items(self) -> Vec<ShoppingItem> {
        self.items.unwrap_or_default()
    }
}

/// Response body of `GET /lists`; `{"lists": null}` means no lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListsResponse {
    #[serde(default)]
    pub lists: Option<Vec<String>>,
}

impl ListsResponse {
    pub fn into_lists(self) -> Vec<String> {
        self.lists.unwrap_or_default()
    }
}

/// Trims surrounding whitespace and capitalizes: first character uppercased,
/// the rest lowercased. `"  milk "` becomes `"Milk"`, `"MILK"` too.
pub fn normalize_item_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => {
            let mut out: String = first.to_uppercase().collect();
            out.extend(chars.flat_map(|c| c.to_lowercase()));
            out
        }
    }
}

/// Splits items into (unchecked names, checked names), preserving input
/// order within each half.
pub fn partition_item_names(items: &[ShoppingItem]) -> (Vec<String>, Vec<String>) {
    let mut unchecked = Vec::new();
    let mut checked = Vec::new();
    for item in items {
        if item.checked {
            checked.push(item.name.clone());
        } else {
            unchecked.push(item.name.clone());
        }
    }
    (unchecked, checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(name: &str, checked: bool) -> ShoppingItem {
        ShoppingItem {
            id: format!("id-{name}"),
            name: name.to_string(),
            checked,
            notes: None,
        }
    }

    #[test]
    fn normalize_trims_and_capitalizes() {
        assert_eq!(normalize_item_name("  milk "), "Milk");
        assert_eq!(normalize_item_name("MILK"), "Milk");
        assert_eq!(normalize_item_name("olive oil"), "Olive oil");
        assert_eq!(normalize_item_name(""), "");
        assert_eq!(normalize_item_name("   "), "");
    }

    #[test]
    fn partition_is_stable_and_disjoint() {
        let items = vec![
            item("bread", false),
            item("milk", true),
            item("eggs", false),
            item("salt", true),
        ];
        let (unchecked, checked) = partition_item_names(&items);
        assert_eq!(unchecked, vec!["bread", "eggs"]);
        assert_eq!(checked, vec!["milk", "salt"]);
        assert_eq!(unchecked.len() + checked.len(), items.len());
    }

    #[test]
    fn add_request_normalizes_and_folds_updates() {
        let updates = ItemUpdates {
            notes: Some("two dozen".into()),
            ..Default::default()
        };
        let request = AddItemRequest::new("  eggs ", "Groceries".into(), Some(&updates));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"name": "Eggs", "list": "Groceries", "checked": false, "notes": "two dozen"})
        );
    }

    #[test]
    fn remove_request_keys_by_address_mode() {
        let by_name = RemoveItemRequest {
            address: ItemAddress::Name(" milk ".into()),
            list: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&by_name).unwrap(),
            json!({"name": "milk", "list": ""})
        );

        let by_id = RemoveItemRequest {
            address: ItemAddress::Id("abc123".into()),
            list: "Groceries".into(),
        };
        assert_eq!(
            serde_json::to_value(&by_id).unwrap(),
            json!({"id": "abc123", "list": "Groceries"})
        );
    }

    #[test]
    fn update_request_skips_absent_fields() {
        let updates = ItemUpdates {
            checked: Some(true),
            ..Default::default()
        };
        let request = UpdateItemRequest::new("abc".into(), "".into(), &updates);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"id": "abc", "list": "", "checked": true})
        );
    }

    #[test]
    fn null_arrays_deserialize_as_empty() {
        let items: ItemsResponse = serde_json::from_value(json!({"items": null})).unwrap();
        assert!(items.into_items().is_empty());

        let lists: ListsResponse = serde_json::from_value(json!({"lists": null})).unwrap();
        assert!(lists.into_lists().is_empty());

        let missing: ListsResponse = serde_json::from_value(json!({})).unwrap();
        assert!(missing.into_lists().is_empty());
    }

    #[test]
    fn shopping_item_tolerates_missing_fields() {
        let item: ShoppingItem = serde_json::from_value(json!({"name": "Milk"})).unwrap();
        assert_eq!(item.name, "Milk");
        assert_eq!(item.id, "");
        assert!(!item.checked);
        assert!(item.notes.is_none());
    }

    #[test]
    fn snapshot_partitions_by_checked_flag() {
        let snapshot = ListSnapshot::new(
            "Groceries",
            vec![item("bread", false), item("milk", true)],
        );
        assert_eq!(snapshot.unchecked_names(), vec!["bread"]);
        assert_eq!(snapshot.checked_names(), vec!["milk"]);
    }
}
