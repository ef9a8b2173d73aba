//! Mobile bootstrap
//!
//! On mobile the key/value store lives in the SQLite `kv_store` table. The
//! table is loaded into a [`MirroredStorage`] once at startup so the shared
//! code keeps its synchronous storage contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use url::Url;

use super::{install, MirroredStorage, PlatformEnvironment};
use crate::db::Database;

/// Origin used when no deep-link origin is configured
pub const FALLBACK_ORIGIN: &str = "app://feomo";

/// Environment variables holding the app's deep-link base URL, in lookup
/// order. The web name is accepted so one env file can serve both builds.
pub const ORIGIN_ENV_VARS: [&str; 2] = ["FEOMO_NATIVE_ORIGIN", "FEOMO_WEB_ORIGIN"];

static NATIVE: Mutex<Option<Arc<PlatformEnvironment>>> = Mutex::const_new(None);

/// Set while the native environment is the registered one
static READY: AtomicBool = AtomicBool::new(false);

/// `scheme://host[:port]` of `raw`, or [`FALLBACK_ORIGIN`] when it is absent
/// or not an absolute URL.
pub fn resolve_origin(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return FALLBACK_ORIGIN.to_string();
    };

    match Url::parse(raw) {
        Ok(url) => match url.host_str() {
            Some(host) => match url.port() {
                Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                None => format!("{}://{}", url.scheme(), host),
            },
            None => {
                tracing::warn!(origin = %raw, "Origin has no host, using fallback");
                FALLBACK_ORIGIN.to_string()
            }
        },
        Err(e) => {
            tracing::warn!(origin = %raw, error = %e, "Failed to resolve origin, using fallback");
            FALLBACK_ORIGIN.to_string()
        }
    }
}

/// Hydrate a storage mirror from `db` and pair it with `origin`.
pub async fn build_native_environment(db: &Database, origin: &str) -> PlatformEnvironment {
    let storage = MirroredStorage::hydrate(Arc::new(db.clone())).await;
    PlatformEnvironment::new(Arc::new(storage), origin)
}

/// First non-empty value of [`ORIGIN_ENV_VARS`] according to `lookup`.
pub fn origin_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    ORIGIN_ENV_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.trim().is_empty())
}

/// Register the SQLite-backed environment once and return it.
///
/// Concurrent callers wait for the first initialization. Later calls return
/// the same environment and ignore `db`, until the registry is reset or
/// another environment is registered.
pub async fn ensure_platform_environment(db: &Database) -> Arc<PlatformEnvironment> {
    let mut native = NATIVE.lock().await;

    if let Some(environment) = native.as_ref().filter(|_| is_platform_environment_ready()) {
        return Arc::clone(environment);
    }

    let raw_origin = origin_from_env(|name| std::env::var(name).ok());
    let origin = resolve_origin(raw_origin.as_deref());
    let environment = Arc::new(build_native_environment(db, &origin).await);

    install(Arc::clone(&environment));
    *native = Some(Arc::clone(&environment));
    READY.store(true, Ordering::Release);

    tracing::info!(origin = %origin, "Native platform environment ready");
    environment
}

pub fn is_platform_environment_ready() -> bool {
    READY.load(Ordering::Acquire)
}

pub(super) fn clear_ready() {
    READY.store(false, Ordering::Release);
}
