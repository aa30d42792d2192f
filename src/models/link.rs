use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted mapping from a short path to a destination URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ShortLink {
    pub id: i64,
    pub short_path: String,
    pub original_url: String,
    pub user_id: i64,
    pub created_at: i64,
}

/// A link annotated with its owner's name and current click count
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ShortLinkSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub link: ShortLink,
    pub owner_username: String,
    pub total_clicks: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUrlRequest {
    pub original_url: String,
    #[serde(default)]
    pub custom_path: Option<String>,
}
