use crate::models::{
    ClickEvent, Enrichment, KeyCount, NewClick, PendingClick, ShortLink, ShortLinkSummary,
    TimeBucketCount, User,
};
use crate::permission::Permission;
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unique constraint violated")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Click dimensions that can be grouped into `(key, count)` pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickDimension {
    Country,
    Os,
    Browser,
}

impl ClickDimension {
    pub(crate) fn column(self) -> &'static str {
        match self {
            ClickDimension::Country => "country_code",
            ClickDimension::Os => "os_name",
            ClickDimension::Browser => "browser_name",
        }
    }
}

/// Key reported for clicks whose dimension is not (yet) known
pub const UNKNOWN_KEY: &str = "unknown";

/// Seconds per time bucket in click aggregation
pub const DAY_SECS: i64 = 86_400;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    // Short links

    /// Insert a link; a taken short path yields [`StorageError::Conflict`]
    async fn create_link(
        &self,
        short_path: &str,
        original_url: &str,
        user_id: i64,
    ) -> StorageResult<ShortLink>;

    async fn get_link_by_path(&self, short_path: &str) -> Result<Option<ShortLink>>;

    async fn get_link_by_id(&self, id: i64) -> Result<Option<ShortLink>>;

    /// Delete a link together with its clicks
    async fn delete_link(&self, id: i64) -> Result<bool>;

    async fn list_links_by_owner(&self, user_id: i64) -> Result<Vec<ShortLinkSummary>>;

    async fn list_all_links(&self) -> Result<Vec<ShortLinkSummary>>;

    // Users

    /// Insert a user; a taken username yields [`StorageError::Conflict`]
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        permissions: Permission,
    ) -> StorageResult<User>;

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn get_user_by_chat_id(&self, chat_id: i64) -> Result<Option<User>>;

    async fn update_permissions(&self, user_id: i64, permissions: Permission) -> Result<bool>;

    /// Link an external chat account; a chat already linked elsewhere yields
    /// [`StorageError::Conflict`]
    async fn update_chat_id(&self, user_id: i64, chat_id: Option<i64>) -> StorageResult<bool>;

    /// Delete a user along with their links and those links' clicks
    async fn delete_user(&self, user_id: i64) -> Result<bool>;

    async fn list_users(&self) -> Result<Vec<User>>;

    // Clicks

    async fn insert_click(&self, click: &NewClick) -> Result<i64>;

    async fn get_click(&self, id: i64) -> Result<Option<ClickEvent>>;

    async fn count_clicks(&self, short_link_id: i64) -> Result<i64>;

    /// Clicks in `[from, to)` grouped per day, oldest bucket first
    async fn clicks_by_day(
        &self,
        short_link_id: i64,
        from: i64,
        to: i64,
    ) -> Result<Vec<TimeBucketCount>>;

    /// Clicks in `[from, to)` grouped by `dimension`; missing values are
    /// reported under [`UNKNOWN_KEY`]
    async fn clicks_by_dimension(
        &self,
        short_link_id: i64,
        from: i64,
        to: i64,
        dimension: ClickDimension,
    ) -> Result<Vec<KeyCount>>;

    /// Oldest clicks still pending enrichment
    async fn fetch_pending_clicks(&self, limit: i64) -> Result<Vec<PendingClick>>;

    /// Write enrichment results; only applies to clicks still pending
    async fn apply_enrichment(&self, click_id: i64, enrichment: &Enrichment) -> Result<bool>;

    /// Count a failed lookup; the click becomes terminally failed once
    /// `max_attempts` is reached
    async fn record_enrichment_failure(&self, click_id: i64, max_attempts: i32) -> Result<bool>;
}
