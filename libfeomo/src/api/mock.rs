//! In-memory instance for testing
//!
//! [`MockApi`] simulates a small GoToSocial instance: statuses are kept in
//! arrival order and served newest first, mutations update the stored copy
//! and return it the way a real server would. Per-operation call counters,
//! an artificial delay and injectable failures make it usable for
//! concurrency and error-path tests without network access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::sleep;

use super::{ApiConnector, MastodonApi, DEFAULT_PAGE_LIMIT};
use crate::error::{ApiError, Result};
use crate::types::{
    Account, AccountCredentials, AccountTimelineParams, AppRegistration, Application, Context,
    CreateStatusParams, MediaAttachment, MediaParams, MediaUpload, Relationship, RevokeRequest,
    SearchParams, SearchResults, Status, TimelineParams, Token, TokenRequest,
    UpdateCredentialsParams, UpdateStatusParams, Visibility,
};

fn fixture_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

/// Minimal account with the given id; `username` and `acct` derive from it.
pub fn account_fixture(id: &str) -> Account {
    Account {
        id: id.to_string(),
        username: format!("user{}", id),
        acct: format!("user{}", id),
        display_name: format!("User {}", id),
        locked: false,
        bot: false,
        discoverable: None,
        created_at: fixture_time(),
        note: String::new(),
        url: None,
        avatar: String::new(),
        avatar_static: String::new(),
        header: String::new(),
        header_static: String::new(),
        followers_count: 0,
        following_count: 0,
        statuses_count: 0,
        last_status_at: None,
        fields: Vec::new(),
    }
}

pub fn credentials_fixture(id: &str) -> AccountCredentials {
    AccountCredentials {
        account: account_fixture(id),
        source: None,
    }
}

/// Public status `id` authored by `account_id`.
pub fn status_fixture(id: &str, account_id: &str) -> Status {
    Status {
        id: id.to_string(),
        uri: format!("https://mock.invalid/statuses/{}", id),
        url: None,
        account: account_fixture(account_id),
        in_reply_to_id: None,
        in_reply_to_account_id: None,
        reblog: None,
        content: format!("<p>status {}</p>", id),
        created_at: fixture_time(),
        edited_at: None,
        replies_count: 0,
        reblogs_count: 0,
        favourites_count: 0,
        favourited: Some(false),
        reblogged: Some(false),
        bookmarked: Some(false),
        muted: None,
        pinned: None,
        sensitive: false,
        spoiler_text: String::new(),
        visibility: Visibility::Public,
        language: None,
        media_attachments: Vec::new(),
        mentions: Vec::new(),
        tags: Vec::new(),
    }
}

#[derive(Default)]
struct MockState {
    /// Oldest first
    order: Vec<String>,
    statuses: HashMap<String, Status>,
    accounts: HashMap<String, Account>,
    relationships: HashMap<String, Relationship>,
    media: HashMap<String, MediaAttachment>,
    bookmarks: Vec<String>,
    contexts: HashMap<String, Context>,
    credentials: Option<AccountCredentials>,
    revoked: Vec<String>,
    omit_app_credentials: bool,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// Newest-first page of `ids` strictly older than `max_id`.
    fn page(&self, ids: Vec<&String>, max_id: Option<&str>, limit: Option<u32>) -> Vec<Status> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT) as usize;
        let newest_first = ids.into_iter().rev();

        let older: Vec<&String> = match max_id {
            Some(max_id) => newest_first.skip_while(|id| id.as_str() != max_id).skip(1).collect(),
            None => newest_first.collect(),
        };

        older
            .into_iter()
            .filter_map(|id| self.statuses.get(id).cloned())
            .take(limit)
            .collect()
    }

    fn status_mut(&mut self, id: &str) -> Result<&mut Status> {
        self.statuses
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("status {}", id)).into())
    }
}

/// Configurable in-memory instance.
#[derive(Default)]
pub struct MockApi {
    state: Mutex<MockState>,
    delay: Mutex<Duration>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, ApiError>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed statuses given newest first, as a timeline lists them.
    pub fn with_timeline(self, newest_first: Vec<Status>) -> Self {
        for status in newest_first.into_iter().rev() {
            self.push_status(status);
        }
        self
    }

    pub fn with_credentials(self, credentials: AccountCredentials) -> Self {
        self.set_credentials(Some(credentials));
        self
    }

    /// Answer every call after `delay`.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `status` as the newest status on the instance.
    pub fn push_status(&self, status: Status) {
        let mut state = self.state();
        state.accounts.insert(status.account.id.clone(), status.account.clone());
        state.order.retain(|id| id != &status.id);
        state.order.push(status.id.clone());
        state.statuses.insert(status.id.clone(), status);
    }

    pub fn remove_status(&self, id: &str) {
        let mut state = self.state();
        state.order.retain(|existing| existing != id);
        state.statuses.remove(id);
    }

    pub fn stored_status(&self, id: &str) -> Option<Status> {
        self.state().statuses.get(id).cloned()
    }

    pub fn add_account(&self, account: Account) {
        self.state().accounts.insert(account.id.clone(), account);
    }

    pub fn set_context(&self, id: &str, context: Context) {
        let mut state = self.state();
        for status in context.ancestors.iter().chain(context.descendants.iter()) {
            state.statuses.insert(status.id.clone(), status.clone());
        }
        state.contexts.insert(id.to_string(), context);
    }

    /// Account returned by `verify_credentials`; `None` rejects every token.
    pub fn set_credentials(&self, credentials: Option<AccountCredentials>) {
        let mut state = self.state();
        if let Some(credentials) = &credentials {
            state
                .accounts
                .insert(credentials.account.id.clone(), credentials.account.clone());
        }
        state.credentials = credentials;
    }

    /// Answer app registration without client credentials.
    pub fn omit_app_credentials(&self) {
        self.state().omit_app_credentials = true;
    }

    /// Make every call to `operation` fail with `error` until [`recover`](Self::recover).
    pub fn fail(&self, operation: &'static str, error: ApiError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation, error);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(operation);
    }

    /// Number of calls made to `operation`, including failed ones.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    /// Tokens passed to `revoke_token` so far.
    pub fn revoked_tokens(&self) -> Vec<String> {
        self.state().revoked.clone()
    }

    async fn enter(&self, operation: &'static str) -> Result<()> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(operation)
            .or_insert(0) += 1;

        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .cloned();
        match failure {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    fn flag(&self, id: &str, apply: impl FnOnce(&mut Status)) -> Result<Status> {
        let mut state = self.state();
        let status = state.status_mut(id)?;
        apply(status);
        Ok(status.clone())
    }
}

#[async_trait]
impl MastodonApi for MockApi {
    async fn create_app(&self, registration: &AppRegistration) -> Result<Application> {
        self.enter("create_app").await?;
        let mut state = self.state();
        let n = state.next_id("app");
        let issued = !state.omit_app_credentials;
        let app = Application {
            id: Some(n.clone()),
            name: registration.client_name.clone(),
            website: Some(registration.website.clone()),
            client_id: issued.then(|| format!("{}-client-id", n)),
            client_secret: issued.then(|| format!("{}-client-secret", n)),
            vapid_key: None,
        };
        Ok(app)
    }

    async fn create_token(&self, request: &TokenRequest) -> Result<Token> {
        self.enter("create_token").await?;
        if request.code.is_empty() {
            return Err(ApiError::Authentication("invalid_grant".to_string()).into());
        }
        Ok(Token {
            access_token: format!("token-for-{}", request.code),
            token_type: "Bearer".to_string(),
            scope: request.scope.clone(),
            created_at: Some(fixture_time().timestamp()),
        })
    }

    async fn revoke_token(&self, request: &RevokeRequest) -> Result<()> {
        self.enter("revoke_token").await?;
        self.state().revoked.push(request.token.clone());
        Ok(())
    }

    async fn verify_credentials(&self) -> Result<AccountCredentials> {
        self.enter("verify_credentials").await?;
        self.state()
            .credentials
            .clone()
            .ok_or_else(|| ApiError::Authentication("The access token is invalid".to_string()).into())
    }

    async fn fetch_account(&self, id: &str) -> Result<Account> {
        self.enter("fetch_account").await?;
        self.state()
            .accounts
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("account {}", id)).into())
    }

    async fn lookup_account(&self, acct: &str) -> Result<Account> {
        self.enter("lookup_account").await?;
        self.state()
            .accounts
            .values()
            .find(|account| account.acct == acct)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("account {}", acct)).into())
    }

    async fn fetch_relationships(&self, ids: &[String]) -> Result<Vec<Relationship>> {
        self.enter("fetch_relationships").await?;
        let state = self.state();
        Ok(ids
            .iter()
            .map(|id| {
                state.relationships.get(id).cloned().unwrap_or_else(|| Relationship {
                    id: id.clone(),
                    ..Default::default()
                })
            })
            .collect())
    }

    async fn follow_account(&self, id: &str) -> Result<Relationship> {
        self.enter("follow_account").await?;
        let mut state = self.state();
        let relationship = state
            .relationships
            .entry(id.to_string())
            .or_insert_with(|| Relationship {
                id: id.to_string(),
                ..Default::default()
            });
        relationship.following = true;
        relationship.showing_reblogs = true;
        Ok(relationship.clone())
    }

    async fn unfollow_account(&self, id: &str) -> Result<Relationship> {
        self.enter("unfollow_account").await?;
        let mut state = self.state();
        let relationship = state
            .relationships
            .entry(id.to_string())
            .or_insert_with(|| Relationship {
                id: id.to_string(),
                ..Default::default()
            });
        relationship.following = false;
        relationship.showing_reblogs = false;
        Ok(relationship.clone())
    }

    async fn update_credentials(
        &self,
        params: &UpdateCredentialsParams,
    ) -> Result<AccountCredentials> {
        self.enter("update_credentials").await?;
        let mut state = self.state();
        let mut credentials = state
            .credentials
            .clone()
            .ok_or_else(|| ApiError::Authentication("The access token is invalid".to_string()))?;

        let account = &mut credentials.account;
        if let Some(display_name) = &params.display_name {
            account.display_name = display_name.clone();
        }
        if let Some(note) = &params.note {
            account.note = note.clone();
        }
        if let Some(locked) = params.locked {
            account.locked = locked;
        }
        if let Some(bot) = params.bot {
            account.bot = bot;
        }
        if params.discoverable.is_some() {
            account.discoverable = params.discoverable;
        }

        state
            .accounts
            .insert(credentials.account.id.clone(), credentials.account.clone());
        state.credentials = Some(credentials.clone());
        Ok(credentials)
    }

    async fn fetch_status(&self, id: &str) -> Result<Status> {
        self.enter("fetch_status").await?;
        let mut state = self.state();
        Ok(state.status_mut(id)?.clone())
    }

    async fn status_context(&self, id: &str) -> Result<Context> {
        self.enter("status_context").await?;
        Ok(self.state().contexts.get(id).cloned().unwrap_or_default())
    }

    async fn create_status(&self, params: &CreateStatusParams) -> Result<Status> {
        self.enter("create_status").await?;
        if params.status.trim().is_empty() && params.media_ids.is_empty() {
            return Err(ApiError::Validation("status text cannot be empty".to_string()).into());
        }

        let (id, author, media) = {
            let mut state = self.state();
            let author = state
                .credentials
                .as_ref()
                .map(|c| c.account.clone())
                .ok_or_else(|| ApiError::Authentication("The access token is invalid".to_string()))?;
            let media: Vec<MediaAttachment> = params
                .media_ids
                .iter()
                .filter_map(|id| state.media.get(id).cloned())
                .collect();
            (state.next_id("status"), author, media)
        };

        let mut status = status_fixture(&id, &author.id);
        status.account = author;
        status.content = format!("<p>{}</p>", params.status);
        status.in_reply_to_id = params.in_reply_to_id.clone();
        status.sensitive = params.sensitive.unwrap_or(false);
        status.spoiler_text = params.spoiler_text.clone().unwrap_or_default();
        status.visibility = params.visibility.unwrap_or_default();
        status.language = params.language.clone();
        status.media_attachments = media;

        self.push_status(status.clone());
        Ok(status)
    }

    async fn update_status(&self, id: &str, params: &UpdateStatusParams) -> Result<Status> {
        self.enter("update_status").await?;
        self.flag(id, |status| {
            status.content = format!("<p>{}</p>", params.status);
            if let Some(spoiler_text) = &params.spoiler_text {
                status.spoiler_text = spoiler_text.clone();
            }
            if let Some(sensitive) = params.sensitive {
                status.sensitive = sensitive;
            }
            status.edited_at = Some(fixture_time());
        })
    }

    async fn delete_status(&self, id: &str) -> Result<()> {
        self.enter("delete_status").await?;
        let mut state = self.state();
        state.status_mut(id)?;
        state.order.retain(|existing| existing != id);
        state.statuses.remove(id);
        Ok(())
    }

    async fn favourite_status(&self, id: &str) -> Result<Status> {
        self.enter("favourite_status").await?;
        self.flag(id, |status| {
            if status.favourited != Some(true) {
                status.favourites_count += 1;
            }
            status.favourited = Some(true);
        })
    }

    async fn unfavourite_status(&self, id: &str) -> Result<Status> {
        self.enter("unfavourite_status").await?;
        self.flag(id, |status| {
            if status.favourited == Some(true) {
                status.favourites_count = status.favourites_count.saturating_sub(1);
            }
            status.favourited = Some(false);
        })
    }

    async fn reblog_status(&self, id: &str) -> Result<Status> {
        self.enter("reblog_status").await?;
        let mut state = self.state();
        let reblogger = state
            .credentials
            .as_ref()
            .map(|c| c.account.clone())
            .ok_or_else(|| ApiError::Authentication("The access token is invalid".to_string()))?;

        let original = {
            let status = state.status_mut(id)?;
            if status.reblogged != Some(true) {
                status.reblogs_count += 1;
            }
            status.reblogged = Some(true);
            status.clone()
        };

        let wrapper_id = state.next_id("reblog");
        let mut wrapper = status_fixture(&wrapper_id, &reblogger.id);
        wrapper.account = reblogger;
        wrapper.content = String::new();
        wrapper.reblogged = Some(true);
        wrapper.reblog = Some(Box::new(original));
        Ok(wrapper)
    }

    async fn unreblog_status(&self, id: &str) -> Result<Status> {
        self.enter("unreblog_status").await?;
        self.flag(id, |status| {
            if status.reblogged == Some(true) {
                status.reblogs_count = status.reblogs_count.saturating_sub(1);
            }
            status.reblogged = Some(false);
        })
    }

    async fn bookmark_status(&self, id: &str) -> Result<Status> {
        self.enter("bookmark_status").await?;
        let status = self.flag(id, |status| status.bookmarked = Some(true))?;
        let mut state = self.state();
        state.bookmarks.retain(|existing| existing != id);
        state.bookmarks.push(id.to_string());
        Ok(status)
    }

    async fn unbookmark_status(&self, id: &str) -> Result<Status> {
        self.enter("unbookmark_status").await?;
        let status = self.flag(id, |status| status.bookmarked = Some(false))?;
        self.state().bookmarks.retain(|existing| existing != id);
        Ok(status)
    }

    async fn home_timeline(&self, params: &TimelineParams) -> Result<Vec<Status>> {
        self.enter("home_timeline").await?;
        let state = self.state();
        let ids: Vec<&String> = state.order.iter().collect();
        Ok(state.page(ids, params.max_id.as_deref(), params.limit))
    }

    async fn public_timeline(&self, params: &TimelineParams) -> Result<Vec<Status>> {
        self.enter("public_timeline").await?;
        let state = self.state();
        let ids: Vec<&String> = state
            .order
            .iter()
            .filter(|id| {
                state
                    .statuses
                    .get(*id)
                    .is_some_and(|s| s.visibility == Visibility::Public)
            })
            .collect();
        Ok(state.page(ids, params.max_id.as_deref(), params.limit))
    }

    async fn account_statuses(
        &self,
        account_id: &str,
        params: &AccountTimelineParams,
    ) -> Result<Vec<Status>> {
        self.enter("account_statuses").await?;
        let state = self.state();
        let ids: Vec<&String> = state
            .order
            .iter()
            .filter(|id| {
                state.statuses.get(*id).is_some_and(|s| {
                    s.account.id == account_id
                        && !(params.only_media == Some(true) && s.media_attachments.is_empty())
                        && !(params.exclude_replies == Some(true) && s.in_reply_to_id.is_some())
                        && !(params.exclude_reblogs == Some(true) && s.reblog.is_some())
                })
            })
            .collect();
        Ok(state.page(ids, params.max_id.as_deref(), params.limit))
    }

    async fn bookmarks(&self, params: &TimelineParams) -> Result<Vec<Status>> {
        self.enter("bookmarks").await?;
        let state = self.state();
        let ids: Vec<&String> = state.bookmarks.iter().collect();
        Ok(state.page(ids, params.max_id.as_deref(), params.limit))
    }

    async fn search(&self, query: &str, params: &SearchParams) -> Result<SearchResults> {
        self.enter("search").await?;
        let needle = query.to_lowercase();
        let state = self.state();
        let ids: Vec<&String> = state
            .order
            .iter()
            .filter(|id| {
                state.statuses.get(*id).is_some_and(|s| {
                    s.content.to_lowercase().contains(&needle)
                        && params.account_id.as_ref().map_or(true, |a| &s.account.id == a)
                })
            })
            .collect();

        Ok(SearchResults {
            statuses: state.page(ids, params.max_id.as_deref(), params.limit),
            ..Default::default()
        })
    }

    async fn upload_media(
        &self,
        upload: &MediaUpload,
        params: &MediaParams,
    ) -> Result<MediaAttachment> {
        self.enter("upload_media").await?;
        if upload.bytes.is_empty() {
            return Err(ApiError::Validation("file is empty".to_string()).into());
        }

        let mut state = self.state();
        let id = state.next_id("media");
        let kind = match upload.mime_type.split('/').next() {
            Some("image") if upload.mime_type == "image/gif" => crate::types::AttachmentKind::Gifv,
            Some("image") => crate::types::AttachmentKind::Image,
            Some("video") => crate::types::AttachmentKind::Video,
            Some("audio") => crate::types::AttachmentKind::Audio,
            _ => crate::types::AttachmentKind::Unknown,
        };
        let attachment = MediaAttachment {
            id: id.clone(),
            kind,
            url: Some(format!("https://mock.invalid/media/{}/{}", id, upload.file_name)),
            preview_url: None,
            remote_url: None,
            description: params.description.clone(),
            blurhash: None,
            meta: None,
        };
        state.media.insert(id, attachment.clone());
        Ok(attachment)
    }

    async fn update_media(&self, id: &str, params: &MediaParams) -> Result<MediaAttachment> {
        self.enter("update_media").await?;
        let mut state = self.state();
        let attachment = state
            .media
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("media {}", id)))?;
        if params.description.is_some() {
            attachment.description = params.description.clone();
        }
        Ok(attachment.clone())
    }

    async fn fetch_media(&self, id: &str) -> Result<MediaAttachment> {
        self.enter("fetch_media").await?;
        self.state()
            .media
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("media {}", id)).into())
    }
}

/// Connector that hands every caller the same [`MockApi`] and records the
/// connections made.
pub struct MockConnector {
    api: Arc<MockApi>,
    connections: Mutex<Vec<(String, Option<String>)>>,
}

impl MockConnector {
    pub fn new(api: Arc<MockApi>) -> Self {
        Self {
            api,
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn api(&self) -> &Arc<MockApi> {
        &self.api
    }

    /// `(instance_url, access_token)` of every `connect` call so far.
    pub fn connections(&self) -> Vec<(String, Option<String>)> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ApiConnector for MockConnector {
    fn connect(&self, instance_url: &str, access_token: Option<&str>) -> Result<Arc<dyn MastodonApi>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((instance_url.to_string(), access_token.map(str::to_string)));
        Ok(Arc::clone(&self.api) as Arc<dyn MastodonApi>)
    }
}
