//! Platform environment abstraction
//!
//! Shared logic never talks to the host runtime directly. Instead each
//! platform registers a [`PlatformEnvironment`] describing:
//!
//! - a synchronous key/value [`StorageAdapter`] (browser local storage, the
//!   mobile SQLite mirror, a JSON file on desktop, memory in tests)
//! - the public origin used to derive OAuth redirect URIs
//! - optionally a [`NavigationAdapter`] for reading URL state
//!
//! Exactly one environment is active at a time. Registration swaps an
//! `Arc` under a lock, so readers always see a complete environment. When
//! nothing has been registered an inert in-memory environment is returned.
//!
//! ```
//! use std::sync::Arc;
//! use libfeomo::platform::{self, MemoryStorage, PlatformEnvironment};
//!
//! platform::register_platform_environment(PlatformEnvironment::new(
//!     Arc::new(MemoryStorage::new()),
//!     "https://feomo.example",
//! ));
//! assert_eq!(platform::get_platform_environment().origin(), "https://feomo.example");
//! ```

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use url::Url;

use crate::error::StorageError;

pub mod native;
pub mod storage;

pub use storage::{JsonFileStorage, KeyValueBackend, MemoryStorage, MirroredStorage};

/// Key/value persistence as seen by shared code.
///
/// Calls are synchronous from the caller's point of view. Adapters over
/// asynchronous storage keep an in-memory mirror and persist in the
/// background (see [`MirroredStorage`]).
pub trait StorageAdapter: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// Read access to the current navigation state (URL query string).
pub trait NavigationAdapter: Send + Sync {
    /// Current query parameters, or `None` if the platform has no URL state.
    fn search_params(&self) -> Option<Vec<(String, String)>>;
}

/// Navigation adapter over a fixed URL, for deep links and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticNavigation {
    params: Vec<(String, String)>,
}

impl StaticNavigation {
    pub fn new(params: Vec<(String, String)>) -> Self {
        Self { params }
    }

    /// Parse the query string of an absolute URL. Returns an empty adapter
    /// when the URL does not parse.
    pub fn from_url(url: &str) -> Self {
        match Url::parse(url) {
            Ok(parsed) => Self {
                params: parsed.query_pairs().into_owned().collect(),
            },
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Failed to parse navigation URL");
                Self::default()
            }
        }
    }
}

impl NavigationAdapter for StaticNavigation {
    fn search_params(&self) -> Option<Vec<(String, String)>> {
        Some(self.params.clone())
    }
}

#[derive(Clone)]
pub struct PlatformEnvironment {
    storage: Arc<dyn StorageAdapter>,
    origin: String,
    navigation: Option<Arc<dyn NavigationAdapter>>,
}

impl PlatformEnvironment {
    pub fn new(storage: Arc<dyn StorageAdapter>, origin: impl Into<String>) -> Self {
        Self {
            storage,
            origin: origin.into(),
            navigation: None,
        }
    }

    pub fn with_navigation(mut self, navigation: Arc<dyn NavigationAdapter>) -> Self {
        self.navigation = Some(navigation);
        self
    }

    /// Memory-backed environment with an empty origin.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), "")
    }

    pub fn storage(&self) -> Arc<dyn StorageAdapter> {
        Arc::clone(&self.storage)
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn navigation(&self) -> Option<&Arc<dyn NavigationAdapter>> {
        self.navigation.as_ref()
    }

    /// First value of a query parameter in the current navigation state.
    pub fn search_param(&self, name: &str) -> Option<String> {
        self.navigation
            .as_ref()?
            .search_params()?
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

impl std::fmt::Debug for PlatformEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformEnvironment")
            .field("origin", &self.origin)
            .field("navigation", &self.navigation.is_some())
            .finish_non_exhaustive()
    }
}

static CURRENT: RwLock<Option<Arc<PlatformEnvironment>>> = RwLock::new(None);

fn fallback() -> Arc<PlatformEnvironment> {
    static FALLBACK: OnceLock<Arc<PlatformEnvironment>> = OnceLock::new();
    Arc::clone(FALLBACK.get_or_init(|| Arc::new(PlatformEnvironment::in_memory())))
}

/// Make `environment` the active environment, replacing any previous one.
pub fn register_platform_environment(environment: PlatformEnvironment) {
    install(Arc::new(environment));
    native::clear_ready();
}

pub(crate) fn install(environment: Arc<PlatformEnvironment>) {
    tracing::debug!(origin = %environment.origin(), "Registering platform environment");
    let mut current = CURRENT.write().unwrap_or_else(PoisonError::into_inner);
    *current = Some(environment);
}

/// The active environment, or the in-memory fallback if none is registered.
pub fn get_platform_environment() -> Arc<PlatformEnvironment> {
    let current = CURRENT.read().unwrap_or_else(PoisonError::into_inner);
    match current.as_ref() {
        Some(environment) => Arc::clone(environment),
        None => fallback(),
    }
}

pub fn get_storage_adapter() -> Arc<dyn StorageAdapter> {
    get_platform_environment().storage()
}

/// Drop the registered environment so the fallback is active again.
pub fn reset_platform_environment() {
    let mut current = CURRENT.write().unwrap_or_else(PoisonError::into_inner);
    *current = None;
    native::clear_ready();
}
