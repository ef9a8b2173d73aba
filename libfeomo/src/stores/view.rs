//! Display preferences
//!
//! Persisted as `{"orderByTimeAsc": bool, "layout": "LIST" | "MASONRY"}`
//! under [`VIEW_SETTINGS_KEY`]. Invalid stored fields are ignored one by
//! one, so a bad layout does not reset the sort order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use super::Observable;
use crate::platform::{self, StorageAdapter};

pub const VIEW_SETTINGS_KEY: &str = "feomo_view_setting";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LayoutMode {
    #[default]
    List,
    Masonry,
}

impl LayoutMode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "LIST" => Some(LayoutMode::List),
            "MASONRY" => Some(LayoutMode::Masonry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSettings {
    /// Oldest first when set
    pub order_by_time_asc: bool,
    pub layout: LayoutMode,
}

impl ViewSettings {
    fn from_stored(raw: &str) -> Self {
        let mut settings = ViewSettings::default();

        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable view settings");
                return settings;
            }
        };

        if let Some(order) = value.get("orderByTimeAsc").and_then(Value::as_bool) {
            settings.order_by_time_asc = order;
        }
        if let Some(layout) = value.get("layout").and_then(Value::as_str) {
            match LayoutMode::parse(layout) {
                Some(layout) => settings.layout = layout,
                None => tracing::warn!(layout = %layout, "Ignoring unknown layout"),
            }
        }

        settings
    }
}

pub struct ViewStore {
    storage: Arc<dyn StorageAdapter>,
    state: Observable<ViewSettings>,
}

impl ViewStore {
    /// Load settings from `storage`, falling back to defaults.
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        let settings = match storage.get_item(VIEW_SETTINGS_KEY) {
            Ok(Some(raw)) => ViewSettings::from_stored(&raw),
            Ok(None) => ViewSettings::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load view settings");
                ViewSettings::default()
            }
        };

        Self {
            storage,
            state: Observable::new(settings),
        }
    }

    /// Store over the active platform environment's storage.
    pub fn from_platform() -> Self {
        Self::new(platform::get_storage_adapter())
    }

    pub fn settings(&self) -> ViewSettings {
        *self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ViewSettings>> {
        self.state.subscribe()
    }

    pub fn toggle_sort_order(&self) {
        self.apply(|settings| settings.order_by_time_asc = !settings.order_by_time_asc);
    }

    pub fn set_layout(&self, layout: LayoutMode) {
        self.apply(|settings| settings.layout = layout);
    }

    pub fn reset_to_defaults(&self) {
        self.apply(|settings| *settings = ViewSettings::default());
    }

    /// Remove the persisted settings. The in-memory values stay as they are.
    pub fn clear_storage(&self) {
        if let Err(e) = self.storage.remove_item(VIEW_SETTINGS_KEY) {
            tracing::warn!(error = %e, "Failed to clear view settings");
        }
    }

    fn apply(&self, change: impl FnOnce(&mut ViewSettings)) {
        self.state.update(change);
        self.persist();
    }

    fn persist(&self) {
        let settings = self.settings();
        let result = serde_json::to_string(&settings)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.storage
                    .set_item(VIEW_SETTINGS_KEY, &json)
                    .map_err(|e| e.to_string())
            });

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist view settings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryStorage;

    fn store_with(raw: Option<&str>) -> (Arc<MemoryStorage>, ViewStore) {
        let storage = Arc::new(MemoryStorage::new());
        if let Some(raw) = raw {
            storage.set_item(VIEW_SETTINGS_KEY, raw).unwrap();
        }
        let store = ViewStore::new(storage.clone());
        (storage, store)
    }

    #[test]
    fn test_defaults_when_nothing_stored() {
        let (_, store) = store_with(None);
        assert_eq!(
            store.settings(),
            ViewSettings {
                order_by_time_asc: false,
                layout: LayoutMode::List
            }
        );
    }

    #[test]
    fn test_loads_stored_settings() {
        let (_, store) = store_with(Some(r#"{"orderByTimeAsc":true,"layout":"MASONRY"}"#));
        assert!(store.settings().order_by_time_asc);
        assert_eq!(store.settings().layout, LayoutMode::Masonry);
    }

    #[test]
    fn test_invalid_fields_are_ignored_individually() {
        let (_, store) = store_with(Some(r#"{"orderByTimeAsc":true,"layout":"GRID"}"#));
        assert!(store.settings().order_by_time_asc);
        assert_eq!(store.settings().layout, LayoutMode::List);
    }

    #[test]
    fn test_corrupt_json_yields_defaults() {
        let (_, store) = store_with(Some("{not json"));
        assert_eq!(store.settings(), ViewSettings::default());
    }

    #[test]
    fn test_changes_are_persisted() {
        let (storage, store) = store_with(None);

        store.toggle_sort_order();
        store.set_layout(LayoutMode::Masonry);

        let raw = storage.get_item(VIEW_SETTINGS_KEY).unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["orderByTimeAsc"], Value::Bool(true));
        assert_eq!(value["layout"], Value::String("MASONRY".to_string()));

        let reloaded = ViewStore::new(storage.clone());
        assert_eq!(reloaded.settings(), store.settings());
    }

    #[test]
    fn test_reset_and_clear() {
        let (storage, store) = store_with(Some(r#"{"orderByTimeAsc":true,"layout":"MASONRY"}"#));

        store.reset_to_defaults();
        assert_eq!(store.settings(), ViewSettings::default());

        store.clear_storage();
        assert_eq!(storage.get_item(VIEW_SETTINGS_KEY).unwrap(), None);
        assert_eq!(store.settings(), ViewSettings::default());
    }
}
