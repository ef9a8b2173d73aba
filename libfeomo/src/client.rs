//! GoToSocial client facade
//!
//! Owns the OAuth lifecycle (app registration, authorization URL, code
//! exchange, revocation) and the authenticated API handle. Auth state is
//! persisted through a [`StorageAdapter`] and restored on construction.
//!
//! The facade is either unauthenticated or authenticated. It becomes
//! authenticated through [`GoToSocialClient::exchange_code_for_token`] or
//! [`GoToSocialClient::initialize_with_token`] and leaves that state through
//! [`GoToSocialClient::logout`] or [`GoToSocialClient::clear_all`].

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use url::Url;

use crate::api::gotosocial::GoToSocialConnector;
use crate::api::{ApiConnector, MastodonApi};
use crate::config::{self, AppConfig, ConfigProvider};
use crate::error::{ApiError, FeomoError, Result};
use crate::platform::{self, StorageAdapter};
use crate::types::{
    AccountCredentials, AppRegistration, AuthState, OAuthApp, RevokeRequest, TokenRequest,
};

/// Storage keys of the persisted auth state
pub mod storage_keys {
    pub const ACCESS_TOKEN: &str = "gts_access_token";
    pub const CLIENT_ID: &str = "gts_client_id";
    pub const CLIENT_SECRET: &str = "gts_client_secret";
    pub const CURRENT_ACCOUNT: &str = "gts_current_account";
}

/// Supplies the current configuration on every use, so an instance switch
/// is picked up without rebuilding the client.
pub type ConfigSource = Arc<dyn Fn() -> Result<Arc<AppConfig>> + Send + Sync>;

struct Session {
    api: Arc<dyn MastodonApi>,
    auth: AuthState,
}

pub struct GoToSocialClient {
    storage: Arc<dyn StorageAdapter>,
    config: ConfigSource,
    connector: Arc<dyn ApiConnector>,
    session: RwLock<Option<Session>>,
}

impl GoToSocialClient {
    /// Create a client and restore any persisted auth state.
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        config: ConfigSource,
        connector: Arc<dyn ApiConnector>,
    ) -> Self {
        let client = Self {
            storage,
            config,
            connector,
            session: RwLock::new(None),
        };
        client.restore_auth_state();
        client
    }

    /// Client over a fixed configuration.
    pub fn with_config(
        storage: Arc<dyn StorageAdapter>,
        config: AppConfig,
        connector: Arc<dyn ApiConnector>,
    ) -> Self {
        let config = Arc::new(config);
        let source: ConfigSource = Arc::new(move || Ok(Arc::clone(&config)));
        Self::new(storage, source, connector)
    }

    /// Client that reads its configuration from `provider` on every use.
    pub fn with_provider(
        storage: Arc<dyn StorageAdapter>,
        provider: Arc<ConfigProvider>,
        connector: Arc<dyn ApiConnector>,
    ) -> Self {
        Self::new(storage, Arc::new(move || provider.app_config()), connector)
    }

    /// Client over the active platform storage, the global configuration
    /// and the megalodon transport.
    pub fn from_platform() -> Self {
        Self::new(
            platform::get_storage_adapter(),
            Arc::new(config::get_app_config),
            Arc::new(GoToSocialConnector::new()),
        )
    }

    fn config(&self) -> Result<Arc<AppConfig>> {
        (self.config)()
    }

    /// The authenticated API handle.
    pub fn client(&self) -> Result<Arc<dyn MastodonApi>> {
        self.read_session()
            .as_ref()
            .map(|session| Arc::clone(&session.api))
            .ok_or_else(|| ApiError::NotAuthenticated.into())
    }

    /// An anonymous handle for public reads.
    pub fn public_client(&self) -> Result<Arc<dyn MastodonApi>> {
        let config = self.config()?;
        self.connector.connect(&config.instance_url, None)
    }

    /// The authenticated handle when signed in, else an anonymous one.
    pub fn readable_client(&self) -> Result<Arc<dyn MastodonApi>> {
        match self.client() {
            Ok(api) => Ok(api),
            Err(_) => self.public_client(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_session().is_some()
    }

    pub fn current_account(&self) -> Option<AccountCredentials> {
        self.read_session()
            .as_ref()
            .map(|session| session.auth.account.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read_session()
            .as_ref()
            .map(|session| session.auth.access_token.clone())
    }

    /// Replace the signed-in account (after a profile update) and persist it.
    /// Does nothing when signed out.
    pub fn set_current_account(&self, account: AccountCredentials) {
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = session.as_mut() {
            self.persist_account(&account);
            session.auth.account = account;
        }
    }

    /// OAuth client credentials for the configured instance.
    ///
    /// Stored credentials win, then statically configured ones, and only
    /// then is a new app registered. Whatever is obtained is persisted, so
    /// repeated calls never register twice.
    pub async fn register_app(&self) -> Result<OAuthApp> {
        if let (Some(client_id), Some(client_secret)) = (
            self.safe_get(storage_keys::CLIENT_ID),
            self.safe_get(storage_keys::CLIENT_SECRET),
        ) {
            return Ok(OAuthApp {
                client_id,
                client_secret,
                vapid_key: None,
            });
        }

        let config = self.config()?;

        if let (Some(client_id), Some(client_secret)) =
            (config.client_id.clone(), config.client_secret.clone())
        {
            self.safe_set(storage_keys::CLIENT_ID, &client_id);
            self.safe_set(storage_keys::CLIENT_SECRET, &client_secret);
            return Ok(OAuthApp {
                client_id,
                client_secret,
                vapid_key: None,
            });
        }

        let registration = AppRegistration {
            client_name: config.app_name.clone(),
            redirect_uris: config.redirect_uri.clone(),
            scopes: config.scopes.join(" "),
            website: config.app_website.clone(),
        };

        tracing::info!(instance_url = %config.instance_url, "Registering OAuth application");
        let app = self
            .connector
            .connect(&config.instance_url, None)?
            .create_app(&registration)
            .await?;

        let (Some(client_id), Some(client_secret)) = (app.client_id, app.client_secret) else {
            return Err(ApiError::Authentication(
                "Failed to register OAuth application: instance returned no client credentials"
                    .to_string(),
            )
            .into());
        };

        self.safe_set(storage_keys::CLIENT_ID, &client_id);
        self.safe_set(storage_keys::CLIENT_SECRET, &client_secret);

        Ok(OAuthApp {
            client_id,
            client_secret,
            vapid_key: app.vapid_key,
        })
    }

    /// `<instance>/oauth/authorize?client_id=…&redirect_uri=…&response_type=code&scope=…`
    pub async fn authorization_url(&self) -> Result<String> {
        let config = self.config()?;
        let app = self.register_app().await?;
        let scope = config.scopes.join(" ");

        let url = Url::parse_with_params(
            &format!("{}/oauth/authorize", config.instance_url),
            &[
                ("client_id", app.client_id.as_str()),
                ("redirect_uri", config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
            ],
        )
        .map_err(|e| FeomoError::InvalidInput(format!("instance URL: {}", e)))?;

        Ok(url.to_string())
    }

    /// Exchange an authorization code and sign in with the issued token.
    pub async fn exchange_code_for_token(&self, code: &str) -> Result<()> {
        let config = self.config()?;
        let app = self.register_app().await?;

        let request = TokenRequest {
            grant_type: "authorization_code".to_string(),
            code: code.to_string(),
            client_id: app.client_id,
            client_secret: app.client_secret,
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scopes.join(" "),
        };

        let token = self
            .connector
            .connect(&config.instance_url, None)?
            .create_token(&request)
            .await?;

        self.initialize_with_token(&token.access_token).await
    }

    /// Verify `access_token` and sign in with it.
    ///
    /// Token and account are persisted together only after verification
    /// succeeds; a rejected token leaves the previous state untouched.
    pub async fn initialize_with_token(&self, access_token: &str) -> Result<()> {
        let config = self.config()?;
        let api = self.connector.connect(&config.instance_url, Some(access_token))?;
        let account = api.verify_credentials().await?;

        self.persist_auth(access_token, &account);

        tracing::info!(account_id = %account.id(), "Signed in");
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        *session = Some(Session {
            api,
            auth: AuthState {
                access_token: access_token.to_string(),
                account,
            },
        });
        Ok(())
    }

    /// Revoke the token on a best-effort basis, then clear local auth state.
    /// Revocation failures are logged and never returned.
    pub async fn logout(&self) {
        let token = self.access_token();

        if let Some(token) = token {
            if let Err(e) = self.revoke(token).await {
                tracing::error!(error = %e, "Failed to revoke token");
            }
        }

        self.clear_auth_state();
    }

    async fn revoke(&self, token: String) -> Result<()> {
        let (Some(client_id), Some(client_secret)) = (
            self.safe_get(storage_keys::CLIENT_ID),
            self.safe_get(storage_keys::CLIENT_SECRET),
        ) else {
            tracing::debug!("No client credentials stored, skipping token revocation");
            return Ok(());
        };

        self.public_client()?
            .revoke_token(&RevokeRequest {
                client_id,
                client_secret,
                token,
            })
            .await
    }

    /// Forget token, account and client credentials, e.g. before switching
    /// instances.
    pub fn clear_all(&self) {
        self.safe_remove(storage_keys::CLIENT_ID);
        self.safe_remove(storage_keys::CLIENT_SECRET);
        self.clear_auth_state();
    }

    fn restore_auth_state(&self) {
        let (Some(access_token), Some(account_json)) = (
            self.safe_get(storage_keys::ACCESS_TOKEN),
            self.safe_get(storage_keys::CURRENT_ACCOUNT),
        ) else {
            return;
        };

        let account: AccountCredentials = match serde_json::from_str(&account_json) {
            Ok(account) => account,
            Err(e) => {
                tracing::error!(error = %e, "Failed to restore auth state, discarding it");
                self.clear_auth_state();
                return;
            }
        };

        let config = match self.config() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Cannot restore auth state without configuration");
                return;
            }
        };

        let api = match self.connector.connect(&config.instance_url, Some(&access_token)) {
            Ok(api) => api,
            Err(e) => {
                tracing::error!(error = %e, "Cannot restore auth state without an API client");
                return;
            }
        };
        tracing::debug!(account_id = %account.id(), "Restored auth state");

        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        *session = Some(Session {
            api,
            auth: AuthState {
                access_token,
                account,
            },
        });
    }

    fn clear_auth_state(&self) {
        self.safe_remove(storage_keys::ACCESS_TOKEN);
        self.safe_remove(storage_keys::CURRENT_ACCOUNT);
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        *session = None;
    }

    fn read_session(&self) -> std::sync::RwLockReadGuard<'_, Option<Session>> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store token and account as a pair.
    ///
    /// The account is serialized and written first; the token follows only
    /// once the account is stored, so storage never holds a token without
    /// its account.
    fn persist_auth(&self, access_token: &str, account: &AccountCredentials) {
        let account_json = match serde_json::to_string(account) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize current account, session not persisted");
                self.safe_remove(storage_keys::ACCESS_TOKEN);
                return;
            }
        };

        if let Err(e) = self.storage.set_item(storage_keys::CURRENT_ACCOUNT, &account_json) {
            tracing::warn!(error = %e, "Failed to persist current account, session not persisted");
            self.safe_remove(storage_keys::ACCESS_TOKEN);
            return;
        }

        self.safe_set(storage_keys::ACCESS_TOKEN, access_token);
    }

    fn persist_account(&self, account: &AccountCredentials) {
        match serde_json::to_string(account) {
            Ok(json) => self.safe_set(storage_keys::CURRENT_ACCOUNT, &json),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize current account"),
        }
    }

    fn safe_get(&self, key: &str) -> Option<String> {
        match self.storage.get_item(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read from storage");
                None
            }
        }
    }

    fn safe_set(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set_item(key, value) {
            tracing::warn!(key = %key, error = %e, "Failed to persist to storage");
        }
    }

    fn safe_remove(&self, key: &str) {
        if let Err(e) = self.storage.remove_item(key) {
            tracing::warn!(key = %key, error = %e, "Failed to remove from storage");
        }
    }
}

/// The process-wide client, created from the platform environment on
/// first use.
pub fn shared() -> Arc<GoToSocialClient> {
    static SHARED: OnceLock<Arc<GoToSocialClient>> = OnceLock::new();
    Arc::clone(SHARED.get_or_init(|| Arc::new(GoToSocialClient::from_platform())))
}
