//! Feomo - client data layer for GoToSocial
//!
//! This library holds everything below the UI of a GoToSocial (or other
//! Mastodon-compatible) client: configuration, OAuth sign-in, entity stores
//! with pagination and request deduplication, and a SQLite cache for fast
//! cold starts.

pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod platform;
pub mod stores;
pub mod types;

// Re-export commonly used types
pub use client::GoToSocialClient;
pub use config::{AppConfig, ConfigKey, ConfigProvider};
pub use db::Database;
pub use dedup::{create_request_key, RequestDeduplicator};
pub use error::{FeomoError, Result};
pub use platform::{PlatformEnvironment, StorageAdapter};
pub use stores::{AccountStore, MediaStore, StatusStore, ViewStore};
pub use types::{Account, AccountCredentials, MediaAttachment, Status};
