//! Row models for the funnel tables
//!
//! Every entity has a row type (what a select returns), an insert type (what
//! an insert sends) and, for operator-edited entities, a patch type (only the
//! fields that are present are sent, and an explicit `null` clears a
//! nullable column). Rows are owned by the hosted backend;
//! these types never outlive a single request.
//!
//! Missing or `null` optional values deserialize to `None`, `0` or `false`
//! instead of failing the whole row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Treat JSON `null` like a missing field and fall back to `T::default()`
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Keep an explicit `null` in a patch as `Some(None)` so it clears the column
///
/// Paired with `#[serde(default)]`, an absent field stays `None` and is not sent.
fn clearable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

/// UTM query tags identifying traffic origin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utm {
    #[serde(default)]
    pub utm_source: Option<String>,
    #[serde(default)]
    pub utm_medium: Option<String>,
    #[serde(default)]
    pub utm_campaign: Option<String>,
}

impl Utm {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            utm_source: Some(source.into()),
            ..Self::default()
        }
    }
}

// ========================================
// Event tables (append-only)
// ========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pageview {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub session_id: String,
    #[serde(default)]
    pub visitor_hash: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub page_path: String,
    #[serde(flatten)]
    pub utm: Utm,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageviewInsert {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitor_hash: Option<String>,
    pub page_path: String,
    #[serde(flatten)]
    pub utm: Utm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Click on the outbound call-to-action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundClick {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub session_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub page_path: String,
    #[serde(flatten)]
    pub utm: Utm,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundClickInsert {
    pub session_id: String,
    pub page_path: String,
    #[serde(flatten)]
    pub utm: Utm,
}

/// Email captured by a landing page form
///
/// `opened` and `clicked` are flipped later by the email system, never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSignup {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(flatten)]
    pub utm: Utm,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub opened: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub clicked: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailSignupInsert {
    pub email: String,
    pub source: String,
    #[serde(flatten)]
    pub utm: Utm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

// ========================================
// Operator-entered tables
// ========================================

/// Batch of new subscriptions entered by an operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub new_subs: i64,
    #[serde(default)]
    pub attributed_source: Option<String>,
    #[serde(default)]
    pub attributed_medium: Option<String>,
    #[serde(default)]
    pub attributed_campaign: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionInsert {
    pub new_subs: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributed_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributed_medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributed_campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_subs: Option<i64>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub attributed_source: Option<Option<String>>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub attributed_medium: Option<Option<String>>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub attributed_campaign: Option<Option<String>>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmCampaign {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub platform: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dms_sent: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub responses: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DmCampaignInsert {
    pub platform: String,
    pub dms_sent: i64,
    pub responses: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DmCampaignPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dms_sent: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses: Option<i64>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

/// Publication state of a scheduled post
///
/// Only an operator moves a post between states; nothing publishes automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Scheduled,
    Posted,
    Failed,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
        }
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(PostStatus::Scheduled),
            "posted" => Ok(PostStatus::Posted),
            "failed" => Ok(PostStatus::Failed),
            other => Err(format!("unknown post status: {}", other)),
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_post_type() -> String {
    "image".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub platform: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_post_type")]
    pub post_type: String,
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default)]
    pub posted_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPostInsert {
    pub scheduled_at: DateTime<Utc>,
    pub platform: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default = "default_post_type")]
    pub post_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_url: Option<String>,
}

impl ScheduledPostInsert {
    /// Subreddit only applies to reddit posts
    pub fn normalized(mut self) -> Self {
        if self.platform != "reddit" {
            self.subreddit = None;
        }
        if self.subreddit.as_deref() == Some("") {
            self.subreddit = None;
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledPostPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub body: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_type: Option<String>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PostStatus>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub posted_url: Option<Option<String>>,
}

fn default_category() -> String {
    "Preview".to_string()
}

fn default_asset_status() -> String {
    "processing".to_string()
}

/// Gallery item hosted on RedGifs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedgifsAsset {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub redgifs_id: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub direct_link: Option<String>,
    #[serde(default)]
    pub embed_code: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub views: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub likes: i64,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default = "default_asset_status")]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedgifsAssetInsert {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redgifs_id: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub likes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default = "default_asset_status")]
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedgifsAssetPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub redgifs_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub direct_link: Option<Option<String>>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub embed_code: Option<Option<String>>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<i64>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}
