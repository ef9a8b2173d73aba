//! Status store
//!
//! Statuses are cached by id; the home, public and per-account timelines
//! are ordered id lists into that cache, each with a pagination cursor
//! (the id of the oldest status fetched so far).
//!
//! A timeline fetch without `max_id` loads the newest page and replaces the
//! list. A fetch with `max_id` appends the ids that are not listed yet.
//! Mutations only ever store what the server returned.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use super::{append_unique, prepend_unique, Observable};
use crate::api::DEFAULT_PAGE_LIMIT;
use crate::client::GoToSocialClient;
use crate::db::Database;
use crate::dedup::{create_request_key, RequestDeduplicator};
use crate::error::Result;
use crate::types::{
    AccountTimelineParams, Context, CreateStatusParams, SearchParams, Status, TimelineParams,
    UpdateStatusParams,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusState {
    pub status_map_by_id: HashMap<String, Status>,
    pub home_timeline: Vec<String>,
    pub public_timeline: Vec<String>,
    pub account_timeline: Vec<String>,
    pub home_timeline_next_token: Option<String>,
    pub public_timeline_next_token: Option<String>,
    pub account_timeline_next_token: Option<String>,
    /// Owner of `account_timeline`
    pub account_timeline_account_id: Option<String>,
}

impl StatusState {
    fn resolve(&self, ids: &[String]) -> Vec<Status> {
        // Ids whose status was deleted are skipped
        ids.iter()
            .filter_map(|id| self.status_map_by_id.get(id).cloned())
            .collect()
    }

    fn timeline_mut(&mut self, timeline: Timeline) -> (&mut Vec<String>, &mut Option<String>) {
        match timeline {
            Timeline::Home => (&mut self.home_timeline, &mut self.home_timeline_next_token),
            Timeline::Public => (&mut self.public_timeline, &mut self.public_timeline_next_token),
        }
    }

    fn timeline(&self, timeline: Timeline) -> (&[String], Option<&str>) {
        match timeline {
            Timeline::Home => (&self.home_timeline, self.home_timeline_next_token.as_deref()),
            Timeline::Public => (
                &self.public_timeline,
                self.public_timeline_next_token.as_deref(),
            ),
        }
    }

    fn insert_all(&mut self, statuses: &[Status]) {
        for status in statuses {
            self.status_map_by_id
                .insert(status.id.clone(), status.clone());
        }
    }
}

/// The shared timelines that can be mirrored to the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeline {
    Home,
    Public,
}

impl Timeline {
    /// Name under which the timeline is stored in the local cache.
    pub fn cache_name(&self) -> &'static str {
        match self {
            Timeline::Home => "home",
            Timeline::Public => "public",
        }
    }
}

#[derive(Serialize)]
struct AccountTimelineKey<'a> {
    account_id: &'a str,
    #[serde(flatten)]
    params: &'a AccountTimelineParams,
}

#[derive(Serialize)]
struct SearchKey<'a> {
    query: &'a str,
    #[serde(flatten)]
    params: &'a SearchParams,
}

struct Inner {
    client: Arc<GoToSocialClient>,
    state: Observable<StatusState>,
    pages: RequestDeduplicator<Vec<Status>>,
    statuses: RequestDeduplicator<Status>,
    contexts: RequestDeduplicator<Context>,
}

#[derive(Clone)]
pub struct StatusStore {
    inner: Arc<Inner>,
}

impl StatusStore {
    pub fn new(client: Arc<GoToSocialClient>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                state: Observable::default(),
                pages: RequestDeduplicator::new(),
                statuses: RequestDeduplicator::new(),
                contexts: RequestDeduplicator::new(),
            }),
        }
    }

    pub fn state(&self) -> Arc<StatusState> {
        self.inner.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusState>> {
        self.inner.state.subscribe()
    }

    pub fn cached_status(&self, id: &str) -> Option<Status> {
        self.inner.state.get().status_map_by_id.get(id).cloned()
    }

    pub fn home_statuses(&self) -> Vec<Status> {
        let state = self.inner.state.get();
        state.resolve(&state.home_timeline)
    }

    pub fn public_statuses(&self) -> Vec<Status> {
        let state = self.inner.state.get();
        state.resolve(&state.public_timeline)
    }

    pub fn account_statuses(&self) -> Vec<Status> {
        let state = self.inner.state.get();
        state.resolve(&state.account_timeline)
    }

    // ------------------------------------------------------------------
    // Timelines
    // ------------------------------------------------------------------

    pub async fn fetch_home_timeline(&self, params: TimelineParams) -> Result<Vec<Status>> {
        self.fetch_timeline(Timeline::Home, params).await
    }

    /// Anonymous when signed out.
    pub async fn fetch_public_timeline(&self, params: TimelineParams) -> Result<Vec<Status>> {
        self.fetch_timeline(Timeline::Public, params).await
    }

    async fn fetch_timeline(&self, timeline: Timeline, mut params: TimelineParams) -> Result<Vec<Status>> {
        params.limit.get_or_insert(DEFAULT_PAGE_LIMIT);
        if timeline == Timeline::Home {
            params.local = None;
        }

        let operation = match timeline {
            Timeline::Home => "home_timeline",
            Timeline::Public => "public_timeline",
        };
        let key = create_request_key(operation, &params);
        let inner = Arc::clone(&self.inner);

        self.inner
            .pages
            .execute(&key, move || async move {
                let statuses = match timeline {
                    Timeline::Home => inner.client.client()?.home_timeline(&params).await?,
                    Timeline::Public => {
                        inner.client.readable_client()?.public_timeline(&params).await?
                    }
                };

                let continuation = params.max_id.is_some();
                inner.state.update(|state| {
                    state.insert_all(&statuses);
                    let (list, cursor) = state.timeline_mut(timeline);
                    if !continuation {
                        list.clear();
                    }
                    append_unique(list, statuses.iter().map(|s| s.id.as_str()));
                    *cursor = statuses.last().map(|s| s.id.clone());
                });

                tracing::debug!(
                    timeline = %operation,
                    count = statuses.len(),
                    continuation,
                    "Fetched timeline page"
                );
                Ok(statuses)
            })
            .await
    }

    /// Next page of the home timeline, or the newest page if nothing is
    /// loaded yet. Returns an empty page without a request once exhausted.
    pub async fn fetch_next_home_timeline(&self) -> Result<Vec<Status>> {
        self.fetch_next(Timeline::Home, TimelineParams::default()).await
    }

    pub async fn fetch_next_public_timeline(&self, local: Option<bool>) -> Result<Vec<Status>> {
        self.fetch_next(
            Timeline::Public,
            TimelineParams {
                local,
                ..Default::default()
            },
        )
        .await
    }

    async fn fetch_next(&self, timeline: Timeline, mut params: TimelineParams) -> Result<Vec<Status>> {
        {
            let state = self.inner.state.get();
            match state.timeline(timeline) {
                (_, Some(cursor)) => params.max_id = Some(cursor.to_string()),
                (list, None) if !list.is_empty() => return Ok(Vec::new()),
                (_, None) => params.max_id = None,
            }
        }
        self.fetch_timeline(timeline, params).await
    }

    pub async fn refresh_home_timeline(&self) -> Result<Vec<Status>> {
        self.clear_home_timeline();
        self.fetch_home_timeline(TimelineParams::default()).await
    }

    pub async fn refresh_public_timeline(&self, local: Option<bool>) -> Result<Vec<Status>> {
        self.clear_public_timeline();
        self.fetch_public_timeline(TimelineParams {
            local,
            ..Default::default()
        })
        .await
    }

    /// Statuses posted by `account_id`.
    ///
    /// `max_id` only continues the current list when it belongs to the same
    /// account; for any other account the list is replaced by a fresh first
    /// page and a stale cursor is ignored.
    pub async fn fetch_account_timeline(
        &self,
        account_id: &str,
        mut params: AccountTimelineParams,
    ) -> Result<Vec<Status>> {
        params.limit.get_or_insert(DEFAULT_PAGE_LIMIT);

        let same_account = self.inner.state.get().account_timeline_account_id.as_deref()
            == Some(account_id);
        if !same_account && params.max_id.take().is_some() {
            tracing::debug!(account_id = %account_id, "Ignoring cursor of another account's timeline");
        }

        let key = create_request_key(
            "account_timeline",
            &AccountTimelineKey {
                account_id,
                params: &params,
            },
        );
        let inner = Arc::clone(&self.inner);
        let account_id = account_id.to_string();

        self.inner
            .pages
            .execute(&key, move || async move {
                let statuses = inner
                    .client
                    .readable_client()?
                    .account_statuses(&account_id, &params)
                    .await?;

                inner.state.update(|state| {
                    state.insert_all(&statuses);
                    let continuation = params.max_id.is_some()
                        && state.account_timeline_account_id.as_deref() == Some(account_id.as_str());
                    if !continuation {
                        state.account_timeline.clear();
                    }
                    append_unique(
                        &mut state.account_timeline,
                        statuses.iter().map(|s| s.id.as_str()),
                    );
                    state.account_timeline_next_token = statuses.last().map(|s| s.id.clone());
                    state.account_timeline_account_id = Some(account_id);
                });

                Ok(statuses)
            })
            .await
    }

    pub async fn fetch_next_account_timeline(&self, account_id: &str) -> Result<Vec<Status>> {
        let mut params = AccountTimelineParams::default();
        {
            let state = self.inner.state.get();
            if state.account_timeline_account_id.as_deref() == Some(account_id) {
                match &state.account_timeline_next_token {
                    Some(cursor) => params.max_id = Some(cursor.clone()),
                    None if !state.account_timeline.is_empty() => return Ok(Vec::new()),
                    None => {}
                }
            }
        }
        self.fetch_account_timeline(account_id, params).await
    }

    pub async fn refresh_account_timeline(&self, account_id: &str) -> Result<Vec<Status>> {
        self.clear_account_timeline();
        self.fetch_account_timeline(account_id, AccountTimelineParams::default())
            .await
    }

    pub fn clear_home_timeline(&self) {
        self.inner.state.update(|state| {
            state.home_timeline.clear();
            state.home_timeline_next_token = None;
        });
    }

    pub fn clear_public_timeline(&self) {
        self.inner.state.update(|state| {
            state.public_timeline.clear();
            state.public_timeline_next_token = None;
        });
    }

    pub fn clear_account_timeline(&self) {
        self.inner.state.update(|state| {
            state.account_timeline.clear();
            state.account_timeline_next_token = None;
            state.account_timeline_account_id = None;
        });
    }

    pub fn clear_timelines(&self) {
        self.inner.state.update(|state| {
            state.home_timeline.clear();
            state.home_timeline_next_token = None;
            state.public_timeline.clear();
            state.public_timeline_next_token = None;
            state.account_timeline.clear();
            state.account_timeline_next_token = None;
            state.account_timeline_account_id = None;
        });
    }

    // ------------------------------------------------------------------
    // Single statuses
    // ------------------------------------------------------------------

    pub async fn fetch_status(&self, id: &str) -> Result<Status> {
        let key = create_request_key("fetch_status", &serde_json::json!({ "id": id }));
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();

        self.inner
            .statuses
            .execute(&key, move || async move {
                let status = inner.client.client()?.fetch_status(&id).await?;
                inner.store(&id, &status);
                Ok(status)
            })
            .await
    }

    pub async fn get_or_fetch_status(&self, id: &str) -> Result<Status> {
        match self.cached_status(id) {
            Some(status) => Ok(status),
            None => self.fetch_status(id).await,
        }
    }

    /// Ancestors and descendants of `id`; all of them are cached.
    pub async fn fetch_status_context(&self, id: &str) -> Result<Context> {
        let key = create_request_key("status_context", &serde_json::json!({ "id": id }));
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();

        self.inner
            .contexts
            .execute(&key, move || async move {
                let context = inner.client.client()?.status_context(&id).await?;
                inner.state.update(|state| {
                    state.insert_all(&context.ancestors);
                    state.insert_all(&context.descendants);
                });
                Ok(context)
            })
            .await
    }

    /// Post a status. It goes to the front of the home timeline, and of the
    /// account timeline when that timeline shows the author.
    pub async fn create_status(&self, params: &CreateStatusParams) -> Result<Status> {
        let status = self.inner.client.client()?.create_status(params).await?;

        let created = status.clone();
        self.inner.state.update(|state| {
            prepend_unique(&mut state.home_timeline, &created.id);
            if state.account_timeline_account_id.as_deref() == Some(created.account.id.as_str()) {
                prepend_unique(&mut state.account_timeline, &created.id);
            }
            state.status_map_by_id.insert(created.id.clone(), created);
        });

        tracing::info!(status_id = %status.id, "Created status");
        Ok(status)
    }

    pub async fn update_status(&self, id: &str, params: &UpdateStatusParams) -> Result<Status> {
        let status = self.inner.client.client()?.update_status(id, params).await?;
        self.inner.store(id, &status);
        Ok(status)
    }

    /// Delete a status and prune it from the home and public timelines.
    /// The account timeline keeps the id until it is refreshed.
    pub async fn delete_status(&self, id: &str) -> Result<()> {
        self.inner.client.client()?.delete_status(id).await?;

        self.inner.state.update(|state| {
            state.status_map_by_id.remove(id);
            state.home_timeline.retain(|existing| existing != id);
            state.public_timeline.retain(|existing| existing != id);
        });

        tracing::info!(status_id = %id, "Deleted status");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------

    pub async fn favourite_status(&self, id: &str) -> Result<Status> {
        let status = self.inner.client.client()?.favourite_status(id).await?;
        self.inner.store(id, &status);
        Ok(status)
    }

    pub async fn unfavourite_status(&self, id: &str) -> Result<Status> {
        let status = self.inner.client.client()?.unfavourite_status(id).await?;
        self.inner.store(id, &status);
        Ok(status)
    }

    /// Boost `id`. Returns the boosted status as the server now reports it.
    pub async fn boost_status(&self, id: &str) -> Result<Status> {
        let response = self.inner.client.client()?.reblog_status(id).await?;
        Ok(self.inner.store_boost_response(id, response))
    }

    pub async fn unboost_status(&self, id: &str) -> Result<Status> {
        let response = self.inner.client.client()?.unreblog_status(id).await?;
        Ok(self.inner.store_boost_response(id, response))
    }

    pub async fn bookmark_status(&self, id: &str) -> Result<Status> {
        let status = self.inner.client.client()?.bookmark_status(id).await?;
        self.inner.store(id, &status);
        Ok(status)
    }

    pub async fn unbookmark_status(&self, id: &str) -> Result<Status> {
        let status = self.inner.client.client()?.unbookmark_status(id).await?;
        self.inner.store(id, &status);
        Ok(status)
    }

    // ------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------

    pub async fn fetch_bookmarks(&self, mut params: TimelineParams) -> Result<Vec<Status>> {
        params.limit.get_or_insert(DEFAULT_PAGE_LIMIT);
        params.local = None;
        let key = create_request_key("bookmarks", &params);
        let inner = Arc::clone(&self.inner);

        self.inner
            .pages
            .execute(&key, move || async move {
                let statuses = inner.client.client()?.bookmarks(&params).await?;
                inner.state.update(|state| state.insert_all(&statuses));
                Ok(statuses)
            })
            .await
    }

    pub async fn search_statuses(&self, query: &str, mut params: SearchParams) -> Result<Vec<Status>> {
        params.limit.get_or_insert(DEFAULT_PAGE_LIMIT);
        let key = create_request_key(
            "search",
            &SearchKey {
                query,
                params: &params,
            },
        );
        let inner = Arc::clone(&self.inner);
        let query = query.to_string();

        self.inner
            .pages
            .execute(&key, move || async move {
                let results = inner.client.client()?.search(&query, &params).await?;
                inner.state.update(|state| state.insert_all(&results.statuses));
                Ok(results.statuses)
            })
            .await
    }

    // ------------------------------------------------------------------
    // Local cache
    // ------------------------------------------------------------------

    /// Mirror `timeline` and its cursor into the local cache.
    ///
    /// The cache is best-effort: a failed save is logged and the previous
    /// cached copy stays in place.
    pub async fn save_to_cache(&self, db: &Database, timeline: Timeline) {
        let state = self.inner.state.get();
        let (ids, cursor) = state.timeline(timeline);
        let statuses = state.resolve(ids);

        if let Err(e) = db.save_timeline(timeline.cache_name(), &statuses, cursor).await {
            tracing::warn!(timeline = %timeline.cache_name(), error = %e, "Failed to save timeline cache");
        }
    }

    /// Replace `timeline` with its cached copy, if there is one. Returns the
    /// number of statuses restored; an unreadable cache restores nothing.
    pub async fn restore_from_cache(&self, db: &Database, timeline: Timeline) -> usize {
        let cached = match db.load_timeline(timeline.cache_name()).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(timeline = %timeline.cache_name(), error = %e, "Failed to load timeline cache");
                return 0;
            }
        };
        if cached.statuses.is_empty() {
            return 0;
        }

        let count = cached.statuses.len();
        self.inner.state.update(|state| {
            state.insert_all(&cached.statuses);
            let (list, cursor) = state.timeline_mut(timeline);
            list.clear();
            append_unique(list, cached.statuses.iter().map(|s| s.id.as_str()));
            *cursor = cached.next_token;
        });

        tracing::debug!(timeline = %timeline.cache_name(), count, "Restored timeline from cache");
        count
    }
}

impl Inner {
    fn store(&self, id: &str, status: &Status) {
        let status = status.clone();
        self.state.update(|state| {
            state.status_map_by_id.insert(id.to_string(), status);
        });
    }

    /// Servers answer a boost with the boost wrapper and an unboost with the
    /// original. Either way `id` ends up mapped to the status it names.
    fn store_boost_response(&self, id: &str, response: Status) -> Status {
        let affected = match &response.reblog {
            Some(inner) if response.id != id && inner.id == id => Some((**inner).clone()),
            _ => None,
        };

        match affected {
            Some(affected) => {
                let result = affected.clone();
                self.state.update(|state| {
                    state.status_map_by_id.insert(id.to_string(), affected);
                    state.status_map_by_id.insert(response.id.clone(), response);
                });
                result
            }
            None => {
                self.store(id, &response);
                response
            }
        }
    }
}
