//! GoToSocial transport
//!
//! Implements [`MastodonApi`] with the megalodon client library. Megalodon
//! speaks to GoToSocial, Mastodon and the other Mastodon-compatible servers;
//! its entities are converted into this crate's types at the boundary.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use megalodon::megalodon::{
    AppInputOptions, EditStatusInputOptions, GetAccountStatusesInputOptions,
    GetBookmarksInputOptions, GetHomeTimelineInputOptions, GetLocalTimelineInputOptions,
    GetPublicTimelineInputOptions, PostStatusInputOptions, PostStatusOutput, SearchInputOptions,
    UpdateCredentialsInputOptions, UpdateMediaInputOptions, UploadMediaInputOptions,
};
use megalodon::{entities, Megalodon, SNS};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ApiConnector, MastodonApi};
use crate::error::{ApiError, Result};
use crate::types::{
    Account, AccountCredentials, AccountTimelineParams, AppRegistration, Application, Context,
    CreateStatusParams, MediaAttachment, MediaParams, MediaUpload, Relationship, RevokeRequest,
    SearchParams, SearchResults, Status, TimelineParams, Token, TokenRequest,
    UpdateCredentialsParams, UpdateStatusParams, Visibility,
};

/// Creates megalodon-backed handles for GoToSocial instances.
#[derive(Debug, Clone, Default)]
pub struct GoToSocialConnector {
    user_agent: Option<String>,
}

impl GoToSocialConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
        }
    }
}

impl ApiConnector for GoToSocialConnector {
    fn connect(&self, instance_url: &str, access_token: Option<&str>) -> Result<Arc<dyn MastodonApi>> {
        let instance_url = instance_url.trim_end_matches('/').to_string();
        let client = megalodon::generator(
            SNS::Gotosocial,
            instance_url.clone(),
            access_token.map(str::to_string),
            self.user_agent.clone(),
        )
        .map_err(|e| {
            ApiError::Network(format!("Failed to create client for {}: {}", instance_url, e))
        })?;

        Ok(Arc::new(GoToSocialApi {
            client,
            instance_url,
        }))
    }
}

/// One instance, one (optional) access token.
pub struct GoToSocialApi {
    client: Box<dyn Megalodon + Send + Sync>,
    instance_url: String,
}

impl std::fmt::Debug for GoToSocialApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoToSocialApi")
            .field("instance_url", &self.instance_url)
            .finish_non_exhaustive()
    }
}

/// Re-shape a megalodon entity into the matching local type via its JSON form.
fn convert<S: Serialize, T: DeserializeOwned>(value: &S, context: &str) -> Result<T> {
    serde_json::to_value(value)
        .and_then(serde_json::from_value)
        .map_err(|e| ApiError::Decode(format!("{}: {}", context, e)).into())
}

fn status_visibility(visibility: Visibility) -> entities::StatusVisibility {
    match visibility {
        Visibility::Public => entities::StatusVisibility::Public,
        Visibility::Unlisted => entities::StatusVisibility::Unlisted,
        Visibility::Private => entities::StatusVisibility::Private,
        Visibility::Direct => entities::StatusVisibility::Direct,
    }
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}

fn optional_ids(ids: &[String]) -> Option<Vec<String>> {
    Some(ids.to_vec()).filter(|ids| !ids.is_empty())
}

/// Map an HTTP status to an [`ApiError`].
pub fn map_http_status(status: u16, message: String) -> ApiError {
    match status {
        401 | 403 => ApiError::Authentication(message),
        404 => ApiError::NotFound(message),
        422 => ApiError::Validation(message),
        429 => ApiError::RateLimit(message),
        500..=599 => ApiError::Server(message),
        _ => ApiError::Network(format!("HTTP {}: {}", status, message)),
    }
}

/// Like [`map_http_status`], but a 400 from the OAuth endpoints means the
/// grant was rejected.
pub fn map_oauth_status(status: u16, message: String) -> ApiError {
    match status {
        400 | 401 => ApiError::Authentication(message),
        other => map_http_status(other, message),
    }
}

fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> ApiError {
    classify_error(&error.to_string(), context, map_http_status)
}

fn map_oauth_error(error: megalodon::error::Error, context: &str) -> ApiError {
    classify_error(&error.to_string(), context, map_oauth_status)
}

/// Classify a megalodon error message.
///
/// The status code is taken from the message when present; otherwise the
/// wording decides, and anything unrecognised is a network error.
fn classify_error(message: &str, context: &str, map_status: fn(u16, String) -> ApiError) -> ApiError {
    let detail = format!("{} failed: {}", context, message);
    tracing::debug!(context = %context, error = %message, "Instance request failed");

    if let Some(status) = extract_http_status(message) {
        return map_status(status, detail);
    }

    let lower = message.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("forbidden") {
        ApiError::Authentication(detail)
    } else if lower.contains("not found") {
        ApiError::NotFound(detail)
    } else if lower.contains("rate limit") || lower.contains("too many requests") {
        ApiError::RateLimit(detail)
    } else if lower.contains("unprocessable") || lower.contains("validation") {
        ApiError::Validation(detail)
    } else if lower.contains("parse") || lower.contains("json") || lower.contains("deserialize") {
        ApiError::Decode(detail)
    } else {
        ApiError::Network(detail)
    }
}

/// HTTP status code mentioned in an error message, if any.
///
/// Recognises `HTTP 401`, `status 403`, `code: 404` and a bare three-digit
/// code followed by `:` or a space.
fn extract_http_status(message: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = message.find(prefix) {
            let after = &message[pos + prefix.len()..];
            if let Some(code) = after.get(0..3).and_then(|s| s.parse::<u16>().ok()) {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }

    let bytes = message.as_bytes();
    bytes.windows(4).enumerate().find_map(|(i, window)| {
        let is_code = window[..3].iter().all(u8::is_ascii_digit)
            && (window[3] == b':' || window[3] == b' ')
            && (i == 0 || !bytes[i - 1].is_ascii_digit());
        if !is_code {
            return None;
        }
        std::str::from_utf8(&window[..3])
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .filter(|code| (100..=599).contains(code))
    })
}

#[async_trait]
impl MastodonApi for GoToSocialApi {
    async fn create_app(&self, registration: &AppRegistration) -> Result<Application> {
        let options = AppInputOptions {
            scopes: Some(
                registration
                    .scopes
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            ),
            redirect_uris: Some(registration.redirect_uris.clone()),
            website: Some(registration.website.clone()),
        };

        let app = self
            .client
            .create_app(registration.client_name.clone(), &options)
            .await
            .map_err(|e| map_megalodon_error(e, "register app"))?;

        Ok(Application {
            id: None,
            name: registration.client_name.clone(),
            website: Some(registration.website.clone()),
            client_id: non_empty(app.client_id),
            client_secret: non_empty(app.client_secret),
            vapid_key: None,
        })
    }

    async fn create_token(&self, request: &TokenRequest) -> Result<Token> {
        let token = self
            .client
            .fetch_access_token(
                request.client_id.clone(),
                request.client_secret.clone(),
                request.code.clone(),
                request.redirect_uri.clone(),
            )
            .await
            .map_err(|e| map_oauth_error(e, "token exchange"))?;

        Ok(Token {
            access_token: token.access_token,
            token_type: token.token_type,
            scope: request.scope.clone(),
            created_at: None,
        })
    }

    async fn revoke_token(&self, request: &RevokeRequest) -> Result<()> {
        self.client
            .revoke_access_token(
                request.client_id.clone(),
                request.client_secret.clone(),
                request.token.clone(),
            )
            .await
            .map(|_| ())
            .map_err(|e| map_oauth_error(e, "revoke token").into())
    }

    async fn verify_credentials(&self) -> Result<AccountCredentials> {
        let response = self
            .client
            .verify_account_credentials()
            .await
            .map_err(|e| map_megalodon_error(e, "verify credentials"))?;
        convert(&response.json, "verify credentials")
    }

    async fn fetch_account(&self, id: &str) -> Result<Account> {
        let response = self
            .client
            .get_account(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "fetch account"))?;
        convert(&response.json, "fetch account")
    }

    async fn lookup_account(&self, acct: &str) -> Result<Account> {
        let response = self
            .client
            .lookup_account(acct.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "lookup account"))?;
        convert(&response.json, "lookup account")
    }

    async fn fetch_relationships(&self, ids: &[String]) -> Result<Vec<Relationship>> {
        let response = self
            .client
            .get_relationships(ids.to_vec())
            .await
            .map_err(|e| map_megalodon_error(e, "fetch relationships"))?;
        convert(&response.json, "fetch relationships")
    }

    async fn follow_account(&self, id: &str) -> Result<Relationship> {
        let response = self
            .client
            .follow_account(id.to_string(), None)
            .await
            .map_err(|e| map_megalodon_error(e, "follow account"))?;
        convert(&response.json, "follow account")
    }

    async fn unfollow_account(&self, id: &str) -> Result<Relationship> {
        let response = self
            .client
            .unfollow_account(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "unfollow account"))?;
        convert(&response.json, "unfollow account")
    }

    async fn update_credentials(
        &self,
        params: &UpdateCredentialsParams,
    ) -> Result<AccountCredentials> {
        let options = UpdateCredentialsInputOptions {
            display_name: params.display_name.clone(),
            note: params.note.clone(),
            locked: params.locked,
            bot: params.bot,
            discoverable: params.discoverable,
            ..Default::default()
        };

        let response = self
            .client
            .update_credentials(Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "update credentials"))?;
        convert(&response.json, "update credentials")
    }

    async fn fetch_status(&self, id: &str) -> Result<Status> {
        let response = self
            .client
            .get_status(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "fetch status"))?;
        convert(&response.json, "fetch status")
    }

    async fn status_context(&self, id: &str) -> Result<Context> {
        let response = self
            .client
            .get_status_context(id.to_string(), None)
            .await
            .map_err(|e| map_megalodon_error(e, "fetch context"))?;
        convert(&response.json, "fetch context")
    }

    async fn create_status(&self, params: &CreateStatusParams) -> Result<Status> {
        let options = PostStatusInputOptions {
            media_ids: optional_ids(&params.media_ids),
            in_reply_to_id: params.in_reply_to_id.clone(),
            sensitive: params.sensitive,
            spoiler_text: params.spoiler_text.clone(),
            visibility: params.visibility.map(status_visibility),
            language: params.language.clone(),
            ..Default::default()
        };

        let response = self
            .client
            .post_status(params.status.clone(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "create status"))?;

        match response.json {
            PostStatusOutput::Status(status) => convert(&status, "create status"),
            PostStatusOutput::ScheduledStatus(scheduled) => Err(ApiError::Validation(format!(
                "create status: instance scheduled the status ({}) instead of publishing it",
                scheduled.id
            ))
            .into()),
        }
    }

    async fn update_status(&self, id: &str, params: &UpdateStatusParams) -> Result<Status> {
        let options = EditStatusInputOptions {
            status: Some(params.status.clone()),
            spoiler_text: params.spoiler_text.clone(),
            sensitive: params.sensitive,
            media_ids: optional_ids(&params.media_ids),
            language: params.language.clone(),
            ..Default::default()
        };

        let response = self
            .client
            .edit_status(id.to_string(), &options)
            .await
            .map_err(|e| map_megalodon_error(e, "update status"))?;
        convert(&response.json, "update status")
    }

    async fn delete_status(&self, id: &str) -> Result<()> {
        self.client
            .delete_status(id.to_string())
            .await
            .map(|_| ())
            .map_err(|e| map_megalodon_error(e, "delete status").into())
    }

    async fn favourite_status(&self, id: &str) -> Result<Status> {
        let response = self
            .client
            .favourite_status(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "favourite"))?;
        convert(&response.json, "favourite")
    }

    async fn unfavourite_status(&self, id: &str) -> Result<Status> {
        let response = self
            .client
            .unfavourite_status(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "unfavourite"))?;
        convert(&response.json, "unfavourite")
    }

    async fn reblog_status(&self, id: &str) -> Result<Status> {
        let response = self
            .client
            .reblog_status(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "reblog"))?;
        convert(&response.json, "reblog")
    }

    async fn unreblog_status(&self, id: &str) -> Result<Status> {
        let response = self
            .client
            .unreblog_status(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "unreblog"))?;
        convert(&response.json, "unreblog")
    }

    async fn bookmark_status(&self, id: &str) -> Result<Status> {
        let response = self
            .client
            .bookmark_status(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "bookmark"))?;
        convert(&response.json, "bookmark")
    }

    async fn unbookmark_status(&self, id: &str) -> Result<Status> {
        let response = self
            .client
            .unbookmark_status(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "unbookmark"))?;
        convert(&response.json, "unbookmark")
    }

    async fn home_timeline(&self, params: &TimelineParams) -> Result<Vec<Status>> {
        let options = GetHomeTimelineInputOptions {
            limit: params.limit,
            max_id: params.max_id.clone(),
            ..Default::default()
        };

        let response = self
            .client
            .get_home_timeline(Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "home timeline"))?;
        convert(&response.json, "home timeline")
    }

    async fn public_timeline(&self, params: &TimelineParams) -> Result<Vec<Status>> {
        let result = if params.local == Some(true) {
            let options = GetLocalTimelineInputOptions {
                limit: params.limit,
                max_id: params.max_id.clone(),
                ..Default::default()
            };
            self.client.get_local_timeline(Some(&options)).await
        } else {
            let options = GetPublicTimelineInputOptions {
                limit: params.limit,
                max_id: params.max_id.clone(),
                ..Default::default()
            };
            self.client.get_public_timeline(Some(&options)).await
        };

        let response = result.map_err(|e| map_megalodon_error(e, "public timeline"))?;
        convert(&response.json, "public timeline")
    }

    async fn account_statuses(
        &self,
        account_id: &str,
        params: &AccountTimelineParams,
    ) -> Result<Vec<Status>> {
        let options = GetAccountStatusesInputOptions {
            limit: params.limit,
            max_id: params.max_id.clone(),
            only_media: params.only_media,
            exclude_replies: params.exclude_replies,
            exclude_reblogs: params.exclude_reblogs,
            ..Default::default()
        };

        let response = self
            .client
            .get_account_statuses(account_id.to_string(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "account statuses"))?;
        convert(&response.json, "account statuses")
    }

    async fn bookmarks(&self, params: &TimelineParams) -> Result<Vec<Status>> {
        let options = GetBookmarksInputOptions {
            limit: params.limit,
            max_id: params.max_id.clone(),
            ..Default::default()
        };

        let response = self
            .client
            .get_bookmarks(Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "bookmarks"))?;
        convert(&response.json, "bookmarks")
    }

    async fn search(&self, query: &str, params: &SearchParams) -> Result<SearchResults> {
        let options = SearchInputOptions {
            limit: params.limit,
            max_id: params.max_id.clone(),
            account_id: params.account_id.clone(),
            ..Default::default()
        };

        let response = self
            .client
            .search(query.to_string(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "search"))?;
        convert(&response.json, "search")
    }

    async fn upload_media(
        &self,
        upload: &MediaUpload,
        params: &MediaParams,
    ) -> Result<MediaAttachment> {
        let options = UploadMediaInputOptions {
            description: params.description.clone(),
            focus: params.focus.clone(),
        };

        tracing::debug!(file_name = %upload.file_name, len = upload.bytes.len(), "Uploading media");
        let response = self
            .client
            .upload_media_reader(Box::new(Cursor::new(upload.bytes.clone())), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "upload media"))?;

        // Large files are processed asynchronously and come back without a URL yet
        match response.json {
            entities::UploadMedia::Attachment(attachment) => convert(&attachment, "upload media"),
            entities::UploadMedia::AsyncAttachment(attachment) => {
                convert(&attachment, "upload media")
            }
        }
    }

    async fn update_media(&self, id: &str, params: &MediaParams) -> Result<MediaAttachment> {
        let options = UpdateMediaInputOptions {
            description: params.description.clone(),
            focus: params.focus.clone(),
            ..Default::default()
        };

        let response = self
            .client
            .update_media(id.to_string(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "update media"))?;
        convert(&response.json, "update media")
    }

    async fn fetch_media(&self, id: &str) -> Result<MediaAttachment> {
        let response = self
            .client
            .get_media(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "fetch media"))?;
        convert(&response.json, "fetch media")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_http_status() {
        let m = || "boom".to_string();

        assert_eq!(map_http_status(401, m()), ApiError::Authentication(m()));
        assert_eq!(map_http_status(403, m()), ApiError::Authentication(m()));
        assert_eq!(map_http_status(404, m()), ApiError::NotFound(m()));
        assert_eq!(map_http_status(422, m()), ApiError::Validation(m()));
        assert_eq!(map_http_status(429, m()), ApiError::RateLimit(m()));
        assert_eq!(map_http_status(502, m()), ApiError::Server(m()));
        assert_eq!(
            map_http_status(418, m()),
            ApiError::Network("HTTP 418: boom".to_string())
        );
    }

    #[test]
    fn test_map_oauth_status_treats_bad_request_as_rejected_grant() {
        assert_eq!(
            map_oauth_status(400, "invalid_grant".to_string()),
            ApiError::Authentication("invalid_grant".to_string())
        );
        assert_eq!(
            map_oauth_status(503, "down".to_string()),
            ApiError::Server("down".to_string())
        );
        assert!(matches!(map_http_status(400, String::new()), ApiError::Network(_)));
    }

    #[test]
    fn test_extract_http_status() {
        assert_eq!(extract_http_status("HTTP 401 Unauthorized"), Some(401));
        assert_eq!(extract_http_status("request failed with status 503"), Some(503));
        assert_eq!(extract_http_status("code: 422"), Some(422));
        assert_eq!(extract_http_status("404: Record not found"), Some(404));
        assert_eq!(extract_http_status("connection refused"), None);
        assert_eq!(extract_http_status("HTTP 999 nonsense"), None);
        assert_eq!(extract_http_status("id 12345: gone"), None);
    }

    #[test]
    fn test_classify_error_by_status() {
        assert!(matches!(
            classify_error("HTTP 401 Unauthorized", "fetch status", map_http_status),
            ApiError::Authentication(_)
        ));
        assert!(matches!(
            classify_error("404: Record not found", "fetch status", map_http_status),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            classify_error("status 400: invalid_grant", "token exchange", map_oauth_status),
            ApiError::Authentication(_)
        ));
    }

    #[test]
    fn test_classify_error_by_wording() {
        let classify = |message: &str| classify_error(message, "home timeline", map_http_status);

        assert!(matches!(classify("Forbidden"), ApiError::Authentication(_)));
        assert!(matches!(classify("Too Many Requests"), ApiError::RateLimit(_)));
        assert!(matches!(classify("failed to parse json body"), ApiError::Decode(_)));
        assert_eq!(
            classify("connection refused"),
            ApiError::Network("home timeline failed: connection refused".to_string())
        );
    }

    #[test]
    fn test_visibility_mapping() {
        assert!(matches!(
            status_visibility(Visibility::Unlisted),
            entities::StatusVisibility::Unlisted
        ));
        assert!(matches!(
            status_visibility(Visibility::Direct),
            entities::StatusVisibility::Direct
        ));
    }

    #[test]
    fn test_empty_media_ids_are_omitted() {
        assert_eq!(optional_ids(&[]), None);
        assert_eq!(optional_ids(&["m1".to_string()]), Some(vec!["m1".to_string()]));
        assert_eq!(non_empty(String::new()), None);
    }

    #[test]
    fn test_debug_output_hides_token() {
        let api = GoToSocialApi {
            client: megalodon::generator(
                SNS::Gotosocial,
                "https://gts.example".to_string(),
                Some("secret".to_string()),
                None,
            )
            .unwrap(),
            instance_url: "https://gts.example".to_string(),
        };

        let debug = format!("{:?}", api);
        assert!(debug.contains("https://gts.example"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_connector_accepts_trailing_slash() {
        assert!(GoToSocialConnector::with_user_agent("feomo-test")
            .connect("https://gts.example/", None)
            .is_ok());
    }
}
