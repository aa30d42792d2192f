//! Click analytics
//!
//! Clicks are recorded raw by [`ClickIngestor`], enriched with geolocation
//! in the background by [`GeoEnricher`] and aggregated on demand by
//! [`AnalyticsService`].

pub mod enrich;
pub mod geoip;
pub mod ingest;
pub mod overview;
pub mod user_agent;

pub use enrich::{BatchOutcome, GeoEnricher};
pub use geoip::{GeoLookup, GeoOutcome, GeoRecord, IpApiClient, MaxMindLookup};
pub use ingest::ClickIngestor;
pub use overview::{AnalyticsService, LinkOverview};
pub use user_agent::{parse_user_agent, UserAgentInfo};
