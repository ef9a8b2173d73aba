//! Account store
//!
//! Caches accounts and relationships by id and mirrors the signed-in
//! account of the [`GoToSocialClient`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use super::Observable;
use crate::client::GoToSocialClient;
use crate::dedup::{create_request_key, RequestDeduplicator};
use crate::error::{ApiError, Result};
use crate::types::{Account, AccountCredentials, Relationship, UpdateCredentialsParams};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountState {
    pub current_account: Option<AccountCredentials>,
    pub account_map_by_id: HashMap<String, Account>,
    pub relationships_by_id: HashMap<String, Relationship>,
}

struct Inner {
    client: Arc<GoToSocialClient>,
    state: Observable<AccountState>,
    accounts: RequestDeduplicator<Account>,
}

#[derive(Clone)]
pub struct AccountStore {
    inner: Arc<Inner>,
}

impl AccountStore {
    pub fn new(client: Arc<GoToSocialClient>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                state: Observable::default(),
                accounts: RequestDeduplicator::new(),
            }),
        }
    }

    pub fn state(&self) -> Arc<AccountState> {
        self.inner.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<AccountState>> {
        self.inner.state.subscribe()
    }

    /// Seed the current account from the client's restored auth state.
    pub fn initialize(&self) {
        if let Some(account) = self.inner.client.current_account() {
            self.inner
                .state
                .update(|state| state.current_account = Some(account));
        }
    }

    pub fn current_account(&self) -> Option<AccountCredentials> {
        self.inner.state.get().current_account.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.client.is_authenticated()
    }

    pub fn cached_account(&self, id: &str) -> Option<Account> {
        self.inner.state.get().account_map_by_id.get(id).cloned()
    }

    pub fn cached_relationship(&self, id: &str) -> Option<Relationship> {
        self.inner.state.get().relationships_by_id.get(id).cloned()
    }

    pub async fn fetch_account(&self, id: &str) -> Result<Account> {
        let key = create_request_key("fetch_account", &serde_json::json!({ "id": id }));
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();

        self.inner
            .accounts
            .execute(&key, move || async move {
                let api = inner.client.readable_client()?;
                let account = api.fetch_account(&id).await?;
                inner.cache_account(&account);
                Ok(account)
            })
            .await
    }

    pub async fn get_or_fetch_account(&self, id: &str) -> Result<Account> {
        match self.cached_account(id) {
            Some(account) => Ok(account),
            None => self.fetch_account(id).await,
        }
    }

    /// Resolve `user` or `user@domain` and cache the result under its id.
    pub async fn lookup_account(&self, acct: &str) -> Result<Account> {
        let api = self.inner.client.readable_client()?;
        let account = api.lookup_account(acct).await?;
        self.inner.cache_account(&account);
        Ok(account)
    }

    pub async fn fetch_relationship(&self, id: &str) -> Result<Relationship> {
        let api = self.inner.client.client()?;
        let relationship = api
            .fetch_relationships(&[id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(format!("relationship with {}", id)))?;
        self.inner.cache_relationship(id, &relationship);
        Ok(relationship)
    }

    pub async fn follow_account(&self, id: &str) -> Result<Relationship> {
        let api = self.inner.client.client()?;
        let relationship = api.follow_account(id).await?;
        self.inner.cache_relationship(id, &relationship);
        Ok(relationship)
    }

    pub async fn unfollow_account(&self, id: &str) -> Result<Relationship> {
        let api = self.inner.client.client()?;
        let relationship = api.unfollow_account(id).await?;
        self.inner.cache_relationship(id, &relationship);
        Ok(relationship)
    }

    pub async fn update_profile(&self, params: &UpdateCredentialsParams) -> Result<AccountCredentials> {
        let api = self.inner.client.client()?;
        let account = api.update_credentials(params).await?;

        self.inner.client.set_current_account(account.clone());
        let updated = account.clone();
        self.inner.state.update(|state| {
            state
                .account_map_by_id
                .insert(updated.id().to_string(), updated.account.clone());
            state.current_account = Some(updated);
        });
        Ok(account)
    }

    /// Sign out and forget every cached account and relationship.
    pub async fn logout(&self) {
        self.inner.client.logout().await;
        self.inner.accounts.clear();
        self.inner.state.update(|state| *state = AccountState::default());
    }
}

impl Inner {
    fn cache_account(&self, account: &Account) {
        let account = account.clone();
        self.state.update(|state| {
            state.account_map_by_id.insert(account.id.clone(), account);
        });
    }

    fn cache_relationship(&self, id: &str, relationship: &Relationship) {
        let relationship = relationship.clone();
        self.state.update(|state| {
            state.relationships_by_id.insert(id.to_string(), relationship);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{account_fixture, credentials_fixture, MockApi, MockConnector};
    use crate::config::{build_app_config, AppConfigInput};
    use crate::error::FeomoError;
    use crate::platform::MemoryStorage;
    use std::time::Duration;

    fn client_for(api: &Arc<MockApi>) -> Arc<GoToSocialClient> {
        let config = build_app_config(&AppConfigInput {
            instance_url: Some("gts.example".to_string()),
            origin: "https://feomo.example".to_string(),
            default_redirect_path: Some("/auth/callback".to_string()),
            ..Default::default()
        })
        .unwrap();
        Arc::new(GoToSocialClient::with_config(
            Arc::new(MemoryStorage::new()),
            config,
            Arc::new(MockConnector::new(api.clone())),
        ))
    }

    async fn signed_in() -> (Arc<MockApi>, AccountStore) {
        let api = Arc::new(MockApi::new().with_credentials(credentials_fixture("me")));
        let client = client_for(&api);
        client.initialize_with_token("token").await.unwrap();
        let store = AccountStore::new(client);
        store.initialize();
        (api, store)
    }

    #[tokio::test]
    async fn test_initialize_seeds_current_account() {
        let (_, store) = signed_in().await;
        assert!(store.is_authenticated());
        assert_eq!(store.current_account().unwrap().id(), "me");
    }

    #[tokio::test]
    async fn test_initialize_when_signed_out_is_noop() {
        let api = Arc::new(MockApi::new());
        let store = AccountStore::new(client_for(&api));
        store.initialize();
        assert_eq!(store.current_account(), None);
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_fetch_account_anonymously_caches() {
        let api = Arc::new(MockApi::new());
        api.add_account(account_fixture("42"));
        let store = AccountStore::new(client_for(&api));

        let account = store.fetch_account("42").await.unwrap();

        assert_eq!(account.id, "42");
        assert_eq!(store.cached_account("42"), Some(account));
    }

    #[tokio::test]
    async fn test_get_or_fetch_hits_cache() {
        let (api, store) = signed_in().await;
        api.add_account(account_fixture("42"));

        store.get_or_fetch_account("42").await.unwrap();
        store.get_or_fetch_account("42").await.unwrap();

        assert_eq!(api.call_count("fetch_account"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_fetch_account_is_deduplicated() {
        let api = Arc::new(MockApi::new().with_delay(Duration::from_millis(30)));
        api.add_account(account_fixture("42"));
        let store = AccountStore::new(client_for(&api));

        let (a, b) = tokio::join!(store.fetch_account("42"), store.fetch_account("42"));

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(api.call_count("fetch_account"), 1);
    }

    #[tokio::test]
    async fn test_lookup_caches_by_id() {
        let (api, store) = signed_in().await;
        api.add_account(account_fixture("7"));

        let account = store.lookup_account("user7").await.unwrap();

        assert_eq!(account.id, "7");
        assert!(store.cached_account("7").is_some());
    }

    #[tokio::test]
    async fn test_follow_then_unfollow_overwrites_relationship() {
        let (_, store) = signed_in().await;

        assert!(store.follow_account("7").await.unwrap().following);
        assert!(store.cached_relationship("7").unwrap().following);

        assert!(!store.unfollow_account("7").await.unwrap().following);
        assert!(!store.cached_relationship("7").unwrap().following);
    }

    #[tokio::test]
    async fn test_fetch_relationship_requires_sign_in() {
        let api = Arc::new(MockApi::new());
        let store = AccountStore::new(client_for(&api));

        let err = store.fetch_relationship("7").await.unwrap_err();
        assert!(matches!(err, FeomoError::Api(ApiError::NotAuthenticated)));
        assert_eq!(api.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_relationship_caches() {
        let (_, store) = signed_in().await;
        let relationship = store.fetch_relationship("7").await.unwrap();
        assert_eq!(relationship.id, "7");
        assert_eq!(store.cached_relationship("7"), Some(relationship));
    }

    #[tokio::test]
    async fn test_update_profile_replaces_current_account() {
        let (_, store) = signed_in().await;

        let updated = store
            .update_profile(&UpdateCredentialsParams {
                display_name: Some("New Name".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.account.display_name, "New Name");
        assert_eq!(store.current_account(), Some(updated.clone()));
        assert_eq!(
            store.inner.client.current_account().unwrap().account.display_name,
            "New Name"
        );
    }

    #[tokio::test]
    async fn test_logout_clears_caches() {
        let (api, store) = signed_in().await;
        api.add_account(account_fixture("42"));
        store.fetch_account("42").await.unwrap();
        store.follow_account("42").await.unwrap();

        store.logout().await;

        let state = store.state();
        assert_eq!(state.current_account, None);
        assert!(state.account_map_by_id.is_empty());
        assert!(state.relationships_by_id.is_empty());
        assert!(!store.is_authenticated());
    }
}
