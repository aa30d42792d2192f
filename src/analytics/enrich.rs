//! Background geolocation enrichment of recorded clicks
//!
//! Every tick the enricher takes the oldest pending clicks, looks their
//! addresses up in batches no larger than the provider accepts and writes the
//! results back. Each click is
//! written independently so one bad row never sinks the batch. Lookups the
//! provider answers with a failure count against the click's attempt budget;
//! once it is spent the click is marked failed and never fetched again. If
//! the provider cannot be reached, the clicks of the failed request are left
//! for the next tick.

use moka::future::Cache;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use super::geoip::{GeoLookup, GeoOutcome};
use crate::config::EnrichConfig;
use crate::models::{Enrichment, PendingClick};
use crate::storage::Storage;

const CACHE_CAPACITY: u64 = 10_000;

/// What a single pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Pending clicks picked up
    pub fetched: usize,
    pub enriched: usize,
    /// Failed attempts recorded, terminal or not
    pub failed: usize,
    /// Left pending because the provider was unreachable
    pub deferred: usize,
}

pub struct GeoEnricher {
    storage: Arc<dyn Storage>,
    lookup: Arc<dyn GeoLookup>,
    /// Successful lookups only; failures are never cached
    cache: Cache<String, Enrichment>,
    interval: Duration,
    batch_size: i64,
    max_attempts: i32,
}

impl GeoEnricher {
    pub fn new(
        storage: Arc<dyn Storage>,
        lookup: Arc<dyn GeoLookup>,
        config: &EnrichConfig,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs.max(1)))
            .build();

        Self {
            storage,
            lookup,
            cache,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            batch_size: config.batch_size.max(1),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Process one batch of pending clicks
    pub async fn run_once(&self) -> anyhow::Result<BatchOutcome> {
        let pending = self.storage.fetch_pending_clicks(self.batch_size).await?;
        let mut outcome = BatchOutcome {
            fetched: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(outcome);
        }

        let mut to_lookup: Vec<(PendingClick, String)> = Vec::with_capacity(pending.len());
        for click in pending {
            let ip = click.ip_address.as_deref().map(str::trim).unwrap_or_default();
            if ip.is_empty() {
                // Nothing to look up; give up on the click straight away
                self.record_failure(&click, 1, &mut outcome).await;
                continue;
            }
            let ip = ip.to_string();
            if let Some(cached) = self.cache.get(&ip).await {
                self.apply(&click, &cached, &mut outcome).await;
            } else {
                to_lookup.push((click, ip));
            }
        }

        if to_lookup.is_empty() {
            return Ok(outcome);
        }

        let mut seen = HashSet::new();
        let queries: Vec<String> = to_lookup
            .iter()
            .filter(|(_, ip)| seen.insert(ip.as_str()))
            .map(|(_, ip)| ip.clone())
            .collect();

        let mut by_query: HashMap<String, GeoOutcome> = HashMap::with_capacity(queries.len());
        let mut unreachable: HashSet<&str> = HashSet::new();
        for chunk in queries.chunks(self.lookup.max_batch().max(1)) {
            match self.lookup.lookup_batch(chunk).await {
                Ok(records) => by_query.extend(
                    records
                        .into_iter()
                        .map(|record| (record.query, record.outcome)),
                ),
                Err(e) => {
                    warn!(
                        provider = self.lookup.name(),
                        addresses = chunk.len(),
                        "Geolocation lookup failed, deferring: {e:#}"
                    );
                    unreachable.extend(chunk.iter().map(String::as_str));
                }
            }
        }

        for (click, ip) in &to_lookup {
            if unreachable.contains(ip.as_str()) {
                outcome.deferred += 1;
                continue;
            }
            match by_query.get(ip) {
                Some(GeoOutcome::Success(enrichment)) => {
                    self.cache.insert(ip.clone(), enrichment.clone()).await;
                    self.apply(click, enrichment, &mut outcome).await;
                }
                Some(GeoOutcome::Fail(reason)) => {
                    debug!(click_id = click.id, %ip, ?reason, "Geolocation lookup failed");
                    self.record_failure(click, self.max_attempts, &mut outcome)
                        .await;
                }
                None => {
                    debug!(click_id = click.id, %ip, "Address missing from lookup response");
                    self.record_failure(click, self.max_attempts, &mut outcome)
                        .await;
                }
            }
        }

        Ok(outcome)
    }

    async fn apply(
        &self,
        click: &PendingClick,
        enrichment: &Enrichment,
        outcome: &mut BatchOutcome,
    ) {
        match self.storage.apply_enrichment(click.id, enrichment).await {
            Ok(true) => outcome.enriched += 1,
            Ok(false) => debug!(click_id = click.id, "Click no longer pending, skipped"),
            Err(e) => warn!(click_id = click.id, "Failed to store enrichment: {e:#}"),
        }
    }

    async fn record_failure(
        &self,
        click: &PendingClick,
        max_attempts: i32,
        outcome: &mut BatchOutcome,
    ) {
        match self
            .storage
            .record_enrichment_failure(click.id, max_attempts)
            .await
        {
            Ok(true) => outcome.failed += 1,
            Ok(false) => debug!(click_id = click.id, "Click no longer pending, skipped"),
            Err(e) => warn!(click_id = click.id, "Failed to record enrichment failure: {e:#}"),
        }
    }

    /// Run until `shutdown` flips to true. A pass in progress when the signal
    /// arrives is abandoned; its completed writes stand.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                provider = self.lookup.name(),
                interval_secs = self.interval.as_secs(),
                batch_size = self.batch_size,
                "Geo enrichment started"
            );
            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => {
                        tokio::select! {
                            result = self.run_once() => match result {
                                Ok(outcome) if outcome.fetched > 0 => {
                                    debug!(?outcome, "Enrichment pass finished");
                                }
                                Ok(_) => {}
                                Err(e) => warn!("Enrichment pass failed: {e:#}"),
                            },
                            _ = shutdown.changed() => {}
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("Geo enrichment stopped");
        })
    }
}
