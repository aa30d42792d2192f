use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Progress of the geolocation enrichment for a click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
pub enum EnrichStatus {
    Pending = 0,
    Enriched = 1,
    /// Lookup was attempted and gave up; never retried
    Failed = 2,
}

/// One recorded redirect traversal
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClickEvent {
    pub id: i64,
    pub short_link_id: i64,
    pub clicked_at: i64,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub os_name: Option<String>,
    pub browser_name: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub isp: Option<String>,
    pub as_info: Option<String>,
    pub enrich_status: EnrichStatus,
    pub enrich_attempts: i32,
}

/// Click data captured on the redirect path
#[derive(Debug, Clone, Default)]
pub struct NewClick {
    pub short_link_id: i64,
    pub clicked_at: i64,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub os_name: Option<String>,
    pub browser_name: Option<String>,
}

/// A click still waiting for geolocation
#[derive(Debug, Clone, FromRow)]
pub struct PendingClick {
    pub id: i64,
    pub ip_address: Option<String>,
    pub enrich_attempts: i32,
}

/// Geolocation and network data written back onto a click
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub isp: Option<String>,
    pub as_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TimeBucketCount {
    /// Start of the bucket (Unix timestamp)
    pub bucket_start: i64,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct KeyCount {
    pub key: String,
    pub count: i64,
}
