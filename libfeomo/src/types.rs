//! Core data types
//!
//! Entities mirror the Mastodon REST API JSON (snake_case field names).
//! GoToSocial omits several optional fields, so most collections and counts
//! default when absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Treat an explicit `null` like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub acct: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub display_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub locked: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bot: bool,
    #[serde(default)]
    pub discoverable: Option<bool>,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub note: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub avatar: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub avatar_static: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub header: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub header_static: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub followers_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub following_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub statuses_count: u64,
    #[serde(default)]
    pub last_status_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<AccountField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
}

/// The signed-in account as returned by `verify_credentials`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCredentials {
    #[serde(flatten)]
    pub account: Account,
    #[serde(default)]
    pub source: Option<AccountSource>,
}

impl AccountCredentials {
    pub fn id(&self) -> &str {
        &self.account.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSource {
    #[serde(default)]
    pub privacy: Option<Visibility>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sensitive: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub note: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub following: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub showing_reblogs: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub notifying: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub followed_by: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub blocking: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub blocked_by: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub muting: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub muting_notifications: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub requested: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub domain_blocking: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub endorsed: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub note: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
            Visibility::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uri: String,
    #[serde(default)]
    pub url: Option<String>,
    pub account: Account,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub in_reply_to_account_id: Option<String>,
    #[serde(default)]
    pub reblog: Option<Box<Status>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub replies_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reblogs_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub favourites_count: u64,
    #[serde(default)]
    pub favourited: Option<bool>,
    #[serde(default)]
    pub reblogged: Option<bool>,
    #[serde(default)]
    pub bookmarked: Option<bool>,
    #[serde(default)]
    pub muted: Option<bool>,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sensitive: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spoiler_text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub visibility: Visibility,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub media_attachments: Vec<MediaAttachment>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mentions: Vec<Mention>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub username: String,
    pub acct: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

/// Kind of a media attachment. Unrecognised kinds from newer servers
/// deserialize as `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Gifv,
    Video,
    Audio,
    #[default]
    #[serde(other)]
    Unknown,
}

impl AttachmentKind {
    /// Whether the attachment renders as a picture or moving picture.
    pub fn is_visual(&self) -> bool {
        match self {
            AttachmentKind::Image | AttachmentKind::Gifv | AttachmentKind::Video => true,
            AttachmentKind::Audio | AttachmentKind::Unknown => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: AttachmentKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub blurhash: Option<String>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, deserialize_with = "null_as_default")]
    pub ancestors: Vec<Status>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub descendants: Vec<Status>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default, deserialize_with = "null_as_default")]
    pub accounts: Vec<Account>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub statuses: Vec<Status>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hashtags: Vec<Tag>,
}

/// Response of the app registration endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub vapid_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub token_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub scope: String,
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// OAuth client credentials for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
    pub vapid_key: Option<String>,
}

/// A verified access token together with the account it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub access_token: String,
    pub account: AccountCredentials,
}

// ---------------------------------------------------------------------------
// Request parameters
// ---------------------------------------------------------------------------

/// Body of the app registration request.
#[derive(Debug, Clone, Serialize)]
pub struct AppRegistration {
    pub client_name: String,
    pub redirect_uris: String,
    pub scopes: String,
    pub website: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevokeRequest {
    pub client_id: String,
    pub client_secret: String,
    pub token: String,
}

/// Paging for home, public and bookmark listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimelineParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Public timeline only: restrict to the local instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<bool>,
}

impl TimelineParams {
    pub fn older_than(max_id: impl Into<String>) -> Self {
        Self {
            max_id: Some(max_id.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountTimelineParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_media: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_replies: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_reblogs: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreateStatusParams {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spoiler_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateStatusParams {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spoiler_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateCredentialsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discoverable: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Focal point as `"x,y"` in the range -1.0..=1.0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
}

/// A file to upload as a media attachment.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for MediaUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaUpload")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GTS_STATUS: &str = r#"{
        "id": "01HQ",
        "created_at": "2024-02-01T10:00:00.000Z",
        "content": "<p>hello #rust</p>",
        "visibility": "unlisted",
        "favourited": false,
        "account": {
            "id": "01ACC",
            "username": "alice",
            "acct": "alice",
            "created_at": "2023-01-01T00:00:00.000Z"
        },
        "media_attachments": [
            {"id": "m1", "type": "image", "url": "https://gts.example/m1.png"},
            {"id": "m2", "type": "hologram"}
        ],
        "tags": [{"name": "rust", "url": "https://gts.example/tags/rust"}]
    }"#;

    #[test]
    fn test_status_deserializes_sparse_payload() {
        let status: Status = serde_json::from_str(GTS_STATUS).unwrap();

        assert_eq!(status.id, "01HQ");
        assert_eq!(status.visibility, Visibility::Unlisted);
        assert_eq!(status.favourited, Some(false));
        assert_eq!(status.bookmarked, None);
        assert_eq!(status.account.acct, "alice");
        assert_eq!(status.replies_count, 0);
        assert_eq!(status.tags[0].name, "rust");
    }

    #[test]
    fn test_unknown_attachment_kind_is_tolerated() {
        let status: Status = serde_json::from_str(GTS_STATUS).unwrap();

        assert_eq!(status.media_attachments[0].kind, AttachmentKind::Image);
        assert!(status.media_attachments[0].kind.is_visual());
        assert_eq!(status.media_attachments[1].kind, AttachmentKind::Unknown);
        assert!(!status.media_attachments[1].kind.is_visual());
    }

    #[test]
    fn test_credentials_flatten_account_fields() {
        let json = r#"{
            "id": "01ACC",
            "username": "alice",
            "acct": "alice",
            "created_at": "2023-01-01T00:00:00.000Z",
            "source": {"privacy": "private", "sensitive": true}
        }"#;

        let credentials: AccountCredentials = serde_json::from_str(json).unwrap();
        assert_eq!(credentials.id(), "01ACC");
        assert_eq!(
            credentials.source.as_ref().and_then(|s| s.privacy),
            Some(Visibility::Private)
        );
    }

    #[test]
    fn test_null_fields_fall_back_to_defaults() {
        let json = r#"{
            "id": "r1",
            "following": true,
            "blocking": null,
            "note": null
        }"#;
        let relationship: Relationship = serde_json::from_str(json).unwrap();
        assert!(relationship.following);
        assert!(!relationship.blocking);
        assert_eq!(relationship.note, "");

        let mut status: serde_json::Value = serde_json::from_str(GTS_STATUS).unwrap();
        status["spoiler_text"] = serde_json::Value::Null;
        status["mentions"] = serde_json::Value::Null;
        let status: Status = serde_json::from_value(status).unwrap();
        assert_eq!(status.spoiler_text, "");
        assert!(status.mentions.is_empty());
    }

    #[test]
    fn test_timeline_params_skip_absent_fields() {
        let params = TimelineParams::older_than("42");
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json, serde_json::json!({"max_id": "42"}));
    }

    #[test]
    fn test_media_upload_debug_hides_bytes() {
        let upload = MediaUpload {
            file_name: "a.png".to_string(),
            mime_type: "image/png".to_string(),
            bytes: vec![0; 1024],
        };
        let debug = format!("{:?}", upload);
        assert!(debug.contains("len: 1024"));
        assert!(!debug.contains("0, 0"));
    }
}
