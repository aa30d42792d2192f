use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::auth::Caller;
use crate::error::{Error, Result};
use crate::models::{KeyCount, ShortLink, TimeBucketCount};
use crate::permission::{can_act_on, Permission};
use crate::storage::{ClickDimension, Storage, DAY_SECS};

/// Range used when a query leaves either bound open
pub const DEFAULT_RANGE_DAYS: i64 = 30;

/// Click statistics for one link over `[from, to)`
#[derive(Debug, Clone, Serialize)]
pub struct LinkOverview {
    pub link: ShortLink,
    pub from: i64,
    pub to: i64,
    pub total: i64,
    pub by_time: Vec<TimeBucketCount>,
    pub by_country: Vec<KeyCount>,
    pub by_os: Vec<KeyCount>,
    pub by_browser: Vec<KeyCount>,
}

pub struct AnalyticsService {
    storage: Arc<dyn Storage>,
}

impl AnalyticsService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Aggregate a link's clicks. Clicks still awaiting enrichment count
    /// toward every total and are reported under `unknown` in breakdowns.
    pub async fn overview(
        &self,
        caller: &Caller,
        link_id: i64,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<LinkOverview> {
        let link = self
            .storage
            .get_link_by_id(link_id)
            .await?
            .ok_or(Error::ShortUrlNotFound)?;

        let user = caller.user().ok_or(Error::NoPermission)?;
        if !can_act_on(
            user.permissions,
            user.id,
            link.user_id,
            Permission::VIEW_ANY_STATS,
            Permission::VIEW_OWN_STATS,
        ) {
            return Err(Error::NoPermission);
        }

        let (from, to) = resolve_range(from, to, Utc::now().timestamp());
        let storage = &self.storage;

        let (by_time, by_country, by_os, by_browser) = tokio::try_join!(
            storage.clicks_by_day(link.id, from, to),
            storage.clicks_by_dimension(link.id, from, to, ClickDimension::Country),
            storage.clicks_by_dimension(link.id, from, to, ClickDimension::Os),
            storage.clicks_by_dimension(link.id, from, to, ClickDimension::Browser),
        )?;
        let total = by_time.iter().map(|b| b.count).sum();

        Ok(LinkOverview {
            link,
            from,
            to,
            total,
            by_time,
            by_country,
            by_os,
            by_browser,
        })
    }
}

/// Both bounds or the last [`DEFAULT_RANGE_DAYS`] days ending at `now`.
/// An inverted range collapses to empty.
pub fn resolve_range(from: Option<i64>, to: Option<i64>, now: i64) -> (i64, i64) {
    match (from, to) {
        (Some(from), Some(to)) => (from, to.max(from)),
        _ => (now - DEFAULT_RANGE_DAYS * DAY_SECS, now + 1),
    }
}
