//! Configuration management for Feomo
//!
//! The effective [`AppConfig`] is derived from two layers:
//!
//! 1. environment variables (process environment, optionally backed by an
//!    env-defaults TOML file)
//! 2. user overrides persisted as one JSON object through the active
//!    platform storage adapter
//!
//! Overrides win over the environment. The derived config is memoized and
//! recomputed after any override write or an explicit [`reset_app_config`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::platform::{self, StorageAdapter};

/// Instance URL used until the user configures one
pub const PLACEHOLDER_INSTANCE_URL: &str = "https://placeholder.invalid";

pub const DEFAULT_APP_NAME: &str = "Memos for GoToSocial";

pub const DEFAULT_REDIRECT_PATH: &str = "/auth/callback";

pub const DEFAULT_SCOPES: [&str; 3] = ["read", "write", "follow"];

/// Storage key of the persisted override map
pub const OVERRIDES_STORAGE_KEY: &str = "feomo_app_config_overrides";

/// Environment variable pointing at an env-defaults file
pub const ENV_FILE_VAR: &str = "FEOMO_ENV_FILE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Always carries a scheme and never ends with `/`
    pub instance_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub app_name: String,
    pub app_website: String,
    /// Never empty
    pub scopes: Vec<String>,
    /// Always absolute
    pub redirect_uri: String,
}

/// Scopes as typed by a user (`"read, write"`) or as an explicit list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopesInput {
    Joined(String),
    List(Vec<String>),
}

/// Raw, possibly missing inputs to [`build_app_config`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfigInput {
    pub instance_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub app_name: Option<String>,
    pub app_website: Option<String>,
    pub scopes: Option<ScopesInput>,
    /// Absolute redirect URI. When absent, `origin` + `default_redirect_path`
    pub redirect_uri: Option<String>,
    /// Application origin, e.g. `https://feomo.example`
    pub origin: String,
    pub default_redirect_path: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Normalize a user-supplied instance URL.
///
/// Blank input yields [`PLACEHOLDER_INSTANCE_URL`] so the app can start
/// unconfigured. Otherwise trailing slashes are removed and `https://` is
/// added when no scheme is present.
pub fn normalize_instance_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return PLACEHOLDER_INSTANCE_URL.to_string();
    }

    let (scheme, rest) = ["https://", "http://"]
        .iter()
        .find_map(|scheme| trimmed.strip_prefix(scheme).map(|rest| (*scheme, rest)))
        .unwrap_or(("https://", trimmed));

    let host = rest.trim_end_matches(|c: char| c == '/' || c.is_whitespace());
    if host.is_empty() {
        return PLACEHOLDER_INSTANCE_URL.to_string();
    }

    format!("{}{}", scheme, host)
}

/// Split scopes on commas and whitespace. Missing or empty input yields
/// [`DEFAULT_SCOPES`].
pub fn normalize_scopes(scopes: Option<&ScopesInput>) -> Vec<String> {
    let parts: Vec<String> = match scopes {
        Some(ScopesInput::Joined(joined)) => joined
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        Some(ScopesInput::List(list)) => list
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };

    if parts.is_empty() {
        DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
    } else {
        parts
    }
}

/// Explicit redirect URI, else `origin` joined with the default path.
pub fn resolve_redirect_uri(input: &AppConfigInput) -> std::result::Result<String, ConfigError> {
    if let Some(explicit) = non_blank(input.redirect_uri.as_deref()) {
        return Ok(explicit.to_string());
    }

    let path = input
        .default_redirect_path
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or(ConfigError::MissingRedirectPath)?;

    if input.origin.is_empty() {
        return Err(ConfigError::MissingOrigin);
    }

    let base = input.origin.strip_suffix('/').unwrap_or(&input.origin);
    if path.starts_with('/') {
        Ok(format!("{}{}", base, path))
    } else {
        Ok(format!("{}/{}", base, path))
    }
}

pub fn build_app_config(input: &AppConfigInput) -> std::result::Result<AppConfig, ConfigError> {
    let instance_url = normalize_instance_url(input.instance_url.as_deref().unwrap_or(""));
    let scopes = normalize_scopes(input.scopes.as_ref());
    let redirect_uri = resolve_redirect_uri(input)?;

    let app_website = match non_blank(input.app_website.as_deref()) {
        Some(website) => website.to_string(),
        None if !input.origin.is_empty() => input.origin.clone(),
        None => instance_url.clone(),
    };

    Ok(AppConfig {
        client_id: non_blank(input.client_id.as_deref()).map(str::to_string),
        client_secret: non_blank(input.client_secret.as_deref()).map(str::to_string),
        app_name: non_blank(input.app_name.as_deref())
            .unwrap_or(DEFAULT_APP_NAME)
            .to_string(),
        app_website,
        scopes,
        redirect_uri,
        instance_url,
    })
}

// ---------------------------------------------------------------------------
// Keys and environment
// ---------------------------------------------------------------------------

/// Configuration fields that can be set from the environment or overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKey {
    InstanceUrl,
    ClientId,
    ClientSecret,
    AppName,
    AppWebsite,
    Scopes,
    RedirectUri,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::InstanceUrl,
        ConfigKey::ClientId,
        ConfigKey::ClientSecret,
        ConfigKey::AppName,
        ConfigKey::AppWebsite,
        ConfigKey::Scopes,
        ConfigKey::RedirectUri,
    ];

    /// Name used in the persisted override map
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::InstanceUrl => "INSTANCE_URL",
            ConfigKey::ClientId => "CLIENT_ID",
            ConfigKey::ClientSecret => "CLIENT_SECRET",
            ConfigKey::AppName => "APP_NAME",
            ConfigKey::AppWebsite => "APP_WEBSITE",
            ConfigKey::Scopes => "SCOPES",
            ConfigKey::RedirectUri => "REDIRECT_URI",
        }
    }

    fn env_name(&self) -> &'static str {
        match self {
            ConfigKey::InstanceUrl => "GOTOSOCIAL_INSTANCE_URL",
            ConfigKey::ClientId => "GOTOSOCIAL_CLIENT_ID",
            ConfigKey::ClientSecret => "GOTOSOCIAL_CLIENT_SECRET",
            ConfigKey::AppName => "APP_NAME",
            ConfigKey::AppWebsite => "APP_WEBSITE",
            ConfigKey::Scopes => "GOTOSOCIAL_SCOPES",
            ConfigKey::RedirectUri => "GOTOSOCIAL_REDIRECT_URI",
        }
    }

    /// Environment variables consulted for this key, highest priority first.
    pub fn env_aliases(&self) -> [String; 3] {
        let name = self.env_name();
        [
            format!("FEOMO_NATIVE_{}", name),
            format!("FEOMO_WEB_{}", name),
            format!("FEOMO_{}", name),
        ]
    }
}

impl FromStr for ConfigKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ConfigKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| format!("Unknown config key '{}'", s))
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A snapshot of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSource {
    vars: HashMap<String, String>,
}

impl EnvSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse a flat TOML table. Non-string scalars are stringified and
    /// string arrays joined with `,`; nested tables are rejected.
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, ConfigError> {
        let table: toml::Table =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut vars = HashMap::with_capacity(table.len());
        for (name, value) in table {
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        toml::Value::String(s) => Ok(s.clone()),
                        other => Err(ConfigError::Parse(format!(
                            "'{}' must be an array of strings, found {}",
                            name,
                            other.type_str()
                        ))),
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?
                    .join(","),
                other => {
                    return Err(ConfigError::Parse(format!(
                        "'{}' must be a plain value, found {}",
                        name,
                        other.type_str()
                    )))
                }
            };
            vars.insert(name, value);
        }

        Ok(Self { vars })
    }

    pub fn load_env_file(path: &Path) -> std::result::Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Fill in variables missing from `self` with those of `defaults`.
    pub fn with_defaults(mut self, defaults: EnvSource) -> Self {
        for (name, value) in defaults.vars {
            self.vars.entry(name).or_insert(value);
        }
        self
    }

    /// Value of `name`, treating empty values as unset.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// First non-empty alias of `key`.
    pub fn lookup(&self, key: ConfigKey) -> Option<&str> {
        key.env_aliases().iter().find_map(|alias| self.get(alias))
    }
}

/// Resolve the env-defaults file path: `FEOMO_ENV_FILE` if set, else
/// `<config_dir>/feomo/env.toml`.
pub fn resolve_env_file_path() -> std::result::Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(ENV_FILE_VAR) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::Read {
        path: "config directory".to_string(),
        message: "no configuration directory for this platform".to_string(),
    })?;

    Ok(config_dir.join("feomo").join("env.toml"))
}

/// Process environment with the env-defaults file (if any) underneath.
pub fn default_env_source() -> EnvSource {
    let process = EnvSource::from_process();

    let path = match resolve_env_file_path() {
        Ok(path) => path,
        Err(e) => {
            tracing::debug!(error = %e, "No env file location");
            return process;
        }
    };

    if !path.exists() {
        return process;
    }

    match EnvSource::load_env_file(&path) {
        Ok(file) => process.with_defaults(file),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable env file");
            process
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Derives and memoizes [`AppConfig`] from environment and overrides.
pub struct ConfigProvider {
    env: EnvSource,
    default_redirect_path: String,
    /// Fixed storage; `None` means the active platform storage
    storage: Option<Arc<dyn StorageAdapter>>,
    /// Fixed origin; `None` means the active platform origin
    origin: Option<String>,
    memo: RwLock<Option<Arc<AppConfig>>>,
    generation: AtomicU64,
}

impl ConfigProvider {
    pub fn new(env: EnvSource) -> Self {
        Self {
            env,
            default_redirect_path: DEFAULT_REDIRECT_PATH.to_string(),
            storage: None,
            origin: None,
            memo: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_default_redirect_path(mut self, path: impl Into<String>) -> Self {
        self.default_redirect_path = path.into();
        self
    }

    fn storage(&self) -> Arc<dyn StorageAdapter> {
        match &self.storage {
            Some(storage) => Arc::clone(storage),
            None => platform::get_storage_adapter(),
        }
    }

    fn origin(&self) -> String {
        match &self.origin {
            Some(origin) => origin.clone(),
            None => platform::get_platform_environment().origin().to_string(),
        }
    }

    /// The effective configuration.
    ///
    /// Fails when no redirect URI is configured and there is no origin to
    /// derive one from.
    pub fn app_config(&self) -> Result<Arc<AppConfig>> {
        if let Some(config) = self.memo.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(Arc::clone(config));
        }

        let generation = self.generation.load(Ordering::Acquire);
        let config = Arc::new(self.compute()?);

        // A write that raced with compute() already invalidated this result
        if self.generation.load(Ordering::Acquire) == generation {
            let mut memo = self.memo.write().unwrap_or_else(PoisonError::into_inner);
            *memo = Some(Arc::clone(&config));
        }

        Ok(config)
    }

    fn compute(&self) -> Result<AppConfig> {
        let overrides = self.read_raw_overrides();
        let value = |key: ConfigKey| -> Option<String> {
            non_blank(overrides.get(key.as_str()).map(String::as_str))
                .or_else(|| self.env.lookup(key))
                .map(str::to_string)
        };

        let input = AppConfigInput {
            instance_url: value(ConfigKey::InstanceUrl),
            client_id: value(ConfigKey::ClientId),
            client_secret: value(ConfigKey::ClientSecret),
            app_name: value(ConfigKey::AppName),
            app_website: value(ConfigKey::AppWebsite),
            scopes: value(ConfigKey::Scopes).map(ScopesInput::Joined),
            redirect_uri: value(ConfigKey::RedirectUri),
            origin: self.origin(),
            default_redirect_path: Some(self.default_redirect_path.clone()),
        };

        Ok(build_app_config(&input)?)
    }

    /// Drop the memoized config so the next read recomputes it.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let mut memo = self.memo.write().unwrap_or_else(PoisonError::into_inner);
        *memo = None;
    }

    fn read_raw_overrides(&self) -> BTreeMap<String, String> {
        let raw = match self.storage().get_item(OVERRIDES_STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read config overrides");
                return BTreeMap::new();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring corrupt config overrides");
            BTreeMap::new()
        })
    }

    fn write_raw_overrides(&self, overrides: &BTreeMap<String, String>) -> Result<()> {
        let storage = self.storage();
        if overrides.is_empty() {
            storage.remove_item(OVERRIDES_STORAGE_KEY)?;
        } else {
            let json = serde_json::to_string(overrides)
                .map_err(|e| crate::error::StorageError::Serialization(e.to_string()))?;
            storage.set_item(OVERRIDES_STORAGE_KEY, &json)?;
        }
        Ok(())
    }

    /// The persisted overrides, restricted to known keys.
    pub fn overrides(&self) -> BTreeMap<ConfigKey, String> {
        self.read_raw_overrides()
            .into_iter()
            .filter_map(|(name, value)| name.parse().ok().map(|key| (key, value)))
            .collect()
    }

    /// Merge `overrides` into the persisted map. An empty value removes the
    /// key so it falls back to the environment.
    pub fn set_overrides<I, V>(&self, overrides: I) -> Result<()>
    where
        I: IntoIterator<Item = (ConfigKey, V)>,
        V: Into<String>,
    {
        let mut stored = self.read_raw_overrides();
        for (key, value) in overrides {
            let value: String = value.into();
            if value.trim().is_empty() {
                stored.remove(key.as_str());
            } else {
                stored.insert(key.as_str().to_string(), value);
            }
        }

        let result = self.write_raw_overrides(&stored);
        self.invalidate();
        result
    }

    /// Remove the listed override keys, or every override when `keys` is
    /// `None`.
    pub fn clear_overrides(&self, keys: Option<&[ConfigKey]>) -> Result<()> {
        let result = match keys {
            Some(keys) => {
                let mut stored = self.read_raw_overrides();
                for key in keys {
                    stored.remove(key.as_str());
                }
                self.write_raw_overrides(&stored)
            }
            None => self
                .storage()
                .remove_item(OVERRIDES_STORAGE_KEY)
                .map_err(Into::into),
        };

        self.invalidate();
        result
    }

    // ------------------------------------------------------------------
    // Instance selection
    // ------------------------------------------------------------------

    /// Validate, normalize and persist `instance_url` as an override.
    /// Returns the normalized URL.
    pub fn set_instance_url(&self, instance_url: &str) -> Result<String> {
        let trimmed = instance_url.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyInstanceUrl.into());
        }

        let normalized = normalize_instance_url(trimmed);
        self.set_overrides([(ConfigKey::InstanceUrl, normalized.clone())])?;
        tracing::info!(instance_url = %normalized, "Instance URL override set");
        Ok(normalized)
    }

    pub fn active_instance_url(&self) -> Result<String> {
        Ok(self.app_config()?.instance_url.clone())
    }

    pub fn overridden_instance_url(&self) -> Option<String> {
        self.overrides().remove(&ConfigKey::InstanceUrl)
    }

    pub fn clear_instance_override(&self) -> Result<()> {
        self.clear_overrides(Some(&[ConfigKey::InstanceUrl]))
    }
}

impl std::fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigProvider")
            .field("default_redirect_path", &self.default_redirect_path)
            .field("fixed_storage", &self.storage.is_some())
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Process-wide provider
// ---------------------------------------------------------------------------

/// The process-wide provider over [`default_env_source`] and the active
/// platform environment.
pub fn global() -> &'static ConfigProvider {
    static GLOBAL: OnceLock<ConfigProvider> = OnceLock::new();
    GLOBAL.get_or_init(|| ConfigProvider::new(default_env_source()))
}

pub fn get_app_config() -> Result<Arc<AppConfig>> {
    global().app_config()
}

pub fn get_app_config_overrides() -> BTreeMap<ConfigKey, String> {
    global().overrides()
}

pub fn set_app_config_overrides<I, V>(overrides: I) -> Result<()>
where
    I: IntoIterator<Item = (ConfigKey, V)>,
    V: Into<String>,
{
    global().set_overrides(overrides)
}

pub fn clear_app_config_overrides(keys: Option<&[ConfigKey]>) -> Result<()> {
    global().clear_overrides(keys)
}

/// Forget the memoized global config, e.g. after switching platform
/// environments.
pub fn reset_app_config() {
    global().invalidate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeomoError;
    use crate::platform::{MemoryStorage, PlatformEnvironment};
    use serial_test::serial;
    use tempfile::TempDir;

    fn provider(env: EnvSource) -> (ConfigProvider, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let provider = ConfigProvider::new(env)
            .with_storage(storage.clone())
            .with_origin("https://feomo.example");
        (provider, storage)
    }

    fn input() -> AppConfigInput {
        AppConfigInput {
            origin: "https://feomo.example".to_string(),
            default_redirect_path: Some(DEFAULT_REDIRECT_PATH.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_instance_url_adds_scheme() {
        assert_eq!(normalize_instance_url("example.social"), "https://example.social");
        assert_eq!(normalize_instance_url("http://local.test/"), "http://local.test");
        assert_eq!(normalize_instance_url(" https://gts.example/// "), "https://gts.example");
    }

    #[test]
    fn test_normalize_instance_url_blank_is_placeholder() {
        assert_eq!(normalize_instance_url(""), PLACEHOLDER_INSTANCE_URL);
        assert_eq!(normalize_instance_url("   "), PLACEHOLDER_INSTANCE_URL);
        assert_eq!(normalize_instance_url("///"), PLACEHOLDER_INSTANCE_URL);
        assert_eq!(normalize_instance_url("https://"), PLACEHOLDER_INSTANCE_URL);
    }

    #[test]
    fn test_normalize_instance_url_is_idempotent() {
        let samples = [
            "example.social",
            "https://example.social/",
            "http://a.b/c/",
            "https://",
            "http:/",
            "a /",
            "  /x// ",
            "https:// spaced",
            "ftp://odd.example",
            "gts.example:8080/",
            "HTTPS://upper.example",
            "https://http://nested",
            "/",
            "ü.example",
        ];

        for sample in samples {
            let once = normalize_instance_url(sample);
            assert_eq!(normalize_instance_url(&once), once, "input {:?}", sample);
            assert!(once.starts_with("https://") || once.starts_with("http://"));
            assert!(!once.ends_with('/'));
        }
    }

    #[test]
    fn test_normalize_scopes() {
        assert_eq!(
            normalize_scopes(Some(&ScopesInput::Joined("read, write".to_string()))),
            vec!["read", "write"]
        );
        assert_eq!(
            normalize_scopes(Some(&ScopesInput::Joined("read\twrite,,follow".to_string()))),
            vec!["read", "write", "follow"]
        );
        assert_eq!(normalize_scopes(None), DEFAULT_SCOPES.to_vec());
        assert_eq!(
            normalize_scopes(Some(&ScopesInput::Joined(" , ".to_string()))),
            DEFAULT_SCOPES.to_vec()
        );
        assert_eq!(
            normalize_scopes(Some(&ScopesInput::List(vec![]))),
            DEFAULT_SCOPES.to_vec()
        );
        assert_eq!(
            normalize_scopes(Some(&ScopesInput::List(vec!["read".to_string()]))),
            vec!["read"]
        );
    }

    #[test]
    fn test_resolve_redirect_uri() {
        let mut explicit = input();
        explicit.redirect_uri = Some(" feomo://callback ".to_string());
        assert_eq!(resolve_redirect_uri(&explicit).unwrap(), "feomo://callback");

        assert_eq!(
            resolve_redirect_uri(&input()).unwrap(),
            "https://feomo.example/auth/callback"
        );

        let mut slashes = input();
        slashes.origin = "https://feomo.example/".to_string();
        slashes.default_redirect_path = Some("auth/callback".to_string());
        assert_eq!(
            resolve_redirect_uri(&slashes).unwrap(),
            "https://feomo.example/auth/callback"
        );
    }

    #[test]
    fn test_resolve_redirect_uri_errors() {
        let mut no_path = input();
        no_path.default_redirect_path = None;
        assert_eq!(
            resolve_redirect_uri(&no_path),
            Err(ConfigError::MissingRedirectPath)
        );

        let mut no_origin = input();
        no_origin.origin = String::new();
        assert_eq!(resolve_redirect_uri(&no_origin), Err(ConfigError::MissingOrigin));
    }

    #[test]
    fn test_build_app_config_defaults() {
        let config = build_app_config(&input()).unwrap();

        assert_eq!(config.instance_url, PLACEHOLDER_INSTANCE_URL);
        assert_eq!(config.app_name, DEFAULT_APP_NAME);
        assert_eq!(config.app_website, "https://feomo.example");
        assert_eq!(config.scopes, DEFAULT_SCOPES.to_vec());
        assert_eq!(config.client_id, None);
    }

    #[test]
    fn test_build_app_config_website_falls_back_to_instance() {
        let config = build_app_config(&AppConfigInput {
            instance_url: Some("gts.example".to_string()),
            redirect_uri: Some("feomo://callback".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(config.app_website, "https://gts.example");
    }

    #[test]
    fn test_env_aliases_checked_in_order() {
        let env = EnvSource::from_pairs([
            ("FEOMO_GOTOSOCIAL_INSTANCE_URL", "generic.example"),
            ("FEOMO_WEB_GOTOSOCIAL_INSTANCE_URL", "web.example"),
            ("FEOMO_NATIVE_GOTOSOCIAL_INSTANCE_URL", ""),
            ("FEOMO_APP_NAME", "Feomo"),
        ]);

        assert_eq!(env.lookup(ConfigKey::InstanceUrl), Some("web.example"));
        assert_eq!(env.lookup(ConfigKey::AppName), Some("Feomo"));
        assert_eq!(env.lookup(ConfigKey::ClientId), None);
    }

    #[test]
    fn test_provider_reads_environment() {
        let (provider, _) = provider(EnvSource::from_pairs([
            ("FEOMO_GOTOSOCIAL_INSTANCE_URL", "example.social"),
            ("FEOMO_GOTOSOCIAL_CLIENT_ID", "static-id"),
            ("FEOMO_GOTOSOCIAL_SCOPES", "read"),
        ]));

        let config = provider.app_config().unwrap();
        assert_eq!(config.instance_url, "https://example.social");
        assert_eq!(config.client_id.as_deref(), Some("static-id"));
        assert_eq!(config.scopes, vec!["read"]);
        assert_eq!(config.redirect_uri, "https://feomo.example/auth/callback");
    }

    #[test]
    fn test_provider_memoizes_until_override_write() {
        let (provider, _) = provider(EnvSource::new());

        let first = provider.app_config().unwrap();
        let second = provider.app_config().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        provider.set_overrides([(ConfigKey::AppName, "Renamed")]).unwrap();
        let third = provider.app_config().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.app_name, "Renamed");
    }

    #[test]
    fn test_override_round_trip_restores_environment() {
        let (provider, _) = provider(EnvSource::from_pairs([(
            "FEOMO_GOTOSOCIAL_INSTANCE_URL",
            "env.example",
        )]));

        provider
            .set_overrides([(ConfigKey::InstanceUrl, "override.example/")])
            .unwrap();
        assert_eq!(
            provider.app_config().unwrap().instance_url,
            "https://override.example"
        );

        provider.clear_overrides(None).unwrap();
        assert_eq!(provider.app_config().unwrap().instance_url, "https://env.example");
    }

    #[test]
    fn test_scopes_override_is_split() {
        let (provider, _) = provider(EnvSource::new());
        provider.set_overrides([(ConfigKey::Scopes, "read, write")]).unwrap();
        assert_eq!(provider.app_config().unwrap().scopes, vec!["read", "write"]);
    }

    #[test]
    fn test_overrides_merge_and_empty_value_deletes() {
        let (provider, storage) = provider(EnvSource::new());

        provider
            .set_overrides([(ConfigKey::AppName, "A"), (ConfigKey::ClientId, "id")])
            .unwrap();
        provider.set_overrides([(ConfigKey::ClientId, "")]).unwrap();

        let overrides = provider.overrides();
        assert_eq!(overrides.get(&ConfigKey::AppName).map(String::as_str), Some("A"));
        assert!(!overrides.contains_key(&ConfigKey::ClientId));

        let raw = storage.get_item(OVERRIDES_STORAGE_KEY).unwrap().unwrap();
        assert_eq!(raw, r#"{"APP_NAME":"A"}"#);
    }

    #[test]
    fn test_clear_selected_overrides() {
        let (provider, storage) = provider(EnvSource::new());
        provider
            .set_overrides([(ConfigKey::AppName, "A"), (ConfigKey::InstanceUrl, "x.example")])
            .unwrap();

        provider.clear_overrides(Some(&[ConfigKey::AppName])).unwrap();
        assert_eq!(
            provider.overridden_instance_url().as_deref(),
            Some("x.example")
        );

        provider.clear_overrides(Some(&[ConfigKey::InstanceUrl])).unwrap();
        assert!(provider.overrides().is_empty());
        assert_eq!(storage.get_item(OVERRIDES_STORAGE_KEY).unwrap(), None);
    }

    #[test]
    fn test_corrupt_overrides_are_ignored() {
        let (provider, storage) = provider(EnvSource::from_pairs([(
            "FEOMO_GOTOSOCIAL_INSTANCE_URL",
            "env.example",
        )]));
        storage.set_item(OVERRIDES_STORAGE_KEY, "[not an object").unwrap();

        assert!(provider.overrides().is_empty());
        assert_eq!(provider.app_config().unwrap().instance_url, "https://env.example");
    }

    #[test]
    fn test_missing_origin_is_a_config_error() {
        let provider = ConfigProvider::new(EnvSource::new())
            .with_storage(Arc::new(MemoryStorage::new()))
            .with_origin("");

        match provider.app_config() {
            Err(FeomoError::Config(ConfigError::MissingOrigin)) => {}
            other => panic!("Expected MissingOrigin, got {:?}", other),
        }

        provider
            .set_overrides([(ConfigKey::RedirectUri, "feomo://callback")])
            .unwrap();
        assert_eq!(provider.app_config().unwrap().redirect_uri, "feomo://callback");
    }

    #[test]
    fn test_instance_helpers() {
        let (provider, _) = provider(EnvSource::new());

        let err = provider.set_instance_url("   ").unwrap_err();
        assert!(matches!(err, FeomoError::Config(ConfigError::EmptyInstanceUrl)));

        assert_eq!(provider.set_instance_url("gts.example/").unwrap(), "https://gts.example");
        assert_eq!(provider.active_instance_url().unwrap(), "https://gts.example");
        assert_eq!(
            provider.overridden_instance_url().as_deref(),
            Some("https://gts.example")
        );

        provider.clear_instance_override().unwrap();
        assert_eq!(provider.overridden_instance_url(), None);
        assert_eq!(provider.active_instance_url().unwrap(), PLACEHOLDER_INSTANCE_URL);
    }

    #[test]
    fn test_env_file_parsing() {
        let env = EnvSource::from_toml_str(
            r#"
            FEOMO_GOTOSOCIAL_INSTANCE_URL = "file.example"
            FEOMO_GOTOSOCIAL_SCOPES = ["read", "write"]
            FEOMO_PORT = 8080
            "#,
        )
        .unwrap();

        assert_eq!(env.lookup(ConfigKey::InstanceUrl), Some("file.example"));
        assert_eq!(env.lookup(ConfigKey::Scopes), Some("read,write"));
        assert_eq!(env.get("FEOMO_PORT"), Some("8080"));

        let err = EnvSource::from_toml_str("[nested]\nkey = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_process_env_wins_over_file_defaults() {
        let process = EnvSource::from_pairs([("FEOMO_APP_NAME", "Process")]);
        let file = EnvSource::from_pairs([
            ("FEOMO_APP_NAME", "File"),
            ("FEOMO_APP_WEBSITE", "https://file.example"),
        ]);

        let env = process.with_defaults(file);
        assert_eq!(env.lookup(ConfigKey::AppName), Some("Process"));
        assert_eq!(env.lookup(ConfigKey::AppWebsite), Some("https://file.example"));
    }

    #[test]
    fn test_load_env_file_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent.toml");

        match EnvSource::load_env_file(&missing) {
            Err(ConfigError::Read { path, .. }) => assert!(path.contains("absent.toml")),
            other => panic!("Expected read error, got {:?}", other),
        }

        let present = temp_dir.path().join("env.toml");
        std::fs::write(&present, "FEOMO_APP_NAME = \"From file\"").unwrap();
        let env = EnvSource::load_env_file(&present).unwrap();
        assert_eq!(env.lookup(ConfigKey::AppName), Some("From file"));
    }

    #[test]
    #[serial]
    fn test_env_file_path_override() {
        std::env::set_var(ENV_FILE_VAR, "/tmp/feomo-test/env.toml");
        let path = resolve_env_file_path().unwrap();
        std::env::remove_var(ENV_FILE_VAR);

        assert_eq!(path, PathBuf::from("/tmp/feomo-test/env.toml"));
    }

    #[test]
    fn test_config_key_parsing() {
        for key in ConfigKey::ALL {
            assert_eq!(key.as_str().parse::<ConfigKey>().unwrap(), key);
        }
        assert!("VITE_SOMETHING".parse::<ConfigKey>().is_err());
    }

    #[test]
    #[serial]
    fn test_global_provider_uses_platform_environment() {
        platform::register_platform_environment(PlatformEnvironment::new(
            Arc::new(MemoryStorage::new()),
            "https://web.example",
        ));
        reset_app_config();

        set_app_config_overrides([(ConfigKey::InstanceUrl, "global.example")]).unwrap();
        let config = get_app_config().unwrap();
        assert_eq!(config.instance_url, "https://global.example");
        assert_eq!(config.redirect_uri, "https://web.example/auth/callback");
        assert_eq!(
            get_app_config_overrides().get(&ConfigKey::InstanceUrl).map(String::as_str),
            Some("global.example")
        );

        clear_app_config_overrides(None).unwrap();
        assert!(get_app_config_overrides().is_empty());

        platform::reset_platform_environment();
        reset_app_config();
    }
}
