//! Remote API abstraction
//!
//! [`MastodonApi`] is the seam between the data layer and the instance. It
//! covers the Mastodon-compatible REST surface GoToSocial implements: OAuth
//! app registration and tokens, accounts, statuses, timelines, media and
//! search. Every call is a single request/response.
//!
//! Handles are created by an [`ApiConnector`] for one instance URL and an
//! optional access token. [`gotosocial::GoToSocialConnector`] talks to a
//! real instance through megalodon; [`mock::MockConnector`] serves an
//! in-memory instance for tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    Account, AccountCredentials, AccountTimelineParams, AppRegistration, Application, Context,
    CreateStatusParams, MediaAttachment, MediaParams, MediaUpload, Relationship, RevokeRequest,
    SearchParams, SearchResults, Status, TimelineParams, Token, TokenRequest,
    UpdateCredentialsParams, UpdateStatusParams,
};

pub mod gotosocial;

// Available in all builds so integration tests and host apps can use it
pub mod mock;

/// Default page size for list endpoints
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

#[async_trait]
pub trait MastodonApi: Send + Sync {
    // ------------------------------------------------------------------
    // OAuth
    // ------------------------------------------------------------------

    /// Register an OAuth application (`POST /api/v1/apps`).
    async fn create_app(&self, registration: &AppRegistration) -> Result<Application>;

    /// Exchange an authorization code (`POST /oauth/token`).
    ///
    /// A rejected code is reported as `ApiError::Authentication`.
    async fn create_token(&self, request: &TokenRequest) -> Result<Token>;

    async fn revoke_token(&self, request: &RevokeRequest) -> Result<()>;

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    async fn verify_credentials(&self) -> Result<AccountCredentials>;

    async fn fetch_account(&self, id: &str) -> Result<Account>;

    /// Resolve `user` or `user@domain`.
    async fn lookup_account(&self, acct: &str) -> Result<Account>;

    async fn fetch_relationships(&self, ids: &[String]) -> Result<Vec<Relationship>>;

    async fn follow_account(&self, id: &str) -> Result<Relationship>;

    async fn unfollow_account(&self, id: &str) -> Result<Relationship>;

    async fn update_credentials(
        &self,
        params: &UpdateCredentialsParams,
    ) -> Result<AccountCredentials>;

    // ------------------------------------------------------------------
    // Statuses
    // ------------------------------------------------------------------

    async fn fetch_status(&self, id: &str) -> Result<Status>;

    async fn status_context(&self, id: &str) -> Result<Context>;

    async fn create_status(&self, params: &CreateStatusParams) -> Result<Status>;

    async fn update_status(&self, id: &str, params: &UpdateStatusParams) -> Result<Status>;

    async fn delete_status(&self, id: &str) -> Result<()>;

    async fn favourite_status(&self, id: &str) -> Result<Status>;

    async fn unfavourite_status(&self, id: &str) -> Result<Status>;

    /// Boost a status. Servers answer with the boost wrapper whose `reblog`
    /// is the boosted status.
    async fn reblog_status(&self, id: &str) -> Result<Status>;

    async fn unreblog_status(&self, id: &str) -> Result<Status>;

    async fn bookmark_status(&self, id: &str) -> Result<Status>;

    async fn unbookmark_status(&self, id: &str) -> Result<Status>;

    // ------------------------------------------------------------------
    // Timelines and search
    // ------------------------------------------------------------------

    async fn home_timeline(&self, params: &TimelineParams) -> Result<Vec<Status>>;

    async fn public_timeline(&self, params: &TimelineParams) -> Result<Vec<Status>>;

    async fn account_statuses(
        &self,
        account_id: &str,
        params: &AccountTimelineParams,
    ) -> Result<Vec<Status>>;

    async fn bookmarks(&self, params: &TimelineParams) -> Result<Vec<Status>>;

    async fn search(&self, query: &str, params: &SearchParams) -> Result<SearchResults>;

    // ------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------

    async fn upload_media(
        &self,
        upload: &MediaUpload,
        params: &MediaParams,
    ) -> Result<MediaAttachment>;

    async fn update_media(&self, id: &str, params: &MediaParams) -> Result<MediaAttachment>;

    async fn fetch_media(&self, id: &str) -> Result<MediaAttachment>;
}

/// Creates API handles bound to an instance and an optional access token.
pub trait ApiConnector: Send + Sync {
    fn connect(&self, instance_url: &str, access_token: Option<&str>) -> Result<Arc<dyn MastodonApi>>;
}
