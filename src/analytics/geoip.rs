//! Geolocation lookups used by the enrichment pipeline
//!
//! Two providers implement [`GeoLookup`]: the ip-api.com batch endpoint and
//! local MaxMind GeoLite2/GeoIP2 databases.

use anyhow::{Context, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Mmap, Reader};
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::models::Enrichment;

/// Outcome of looking up one address
#[derive(Debug, Clone, PartialEq)]
pub enum GeoOutcome {
    Success(Enrichment),
    /// The provider answered but could not locate the address
    Fail(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoRecord {
    /// The address as echoed back by the provider
    pub query: String,
    pub outcome: GeoOutcome,
}

/// Batch geolocation provider.
///
/// Results may come back in any order and may omit addresses; callers match
/// them by [`GeoRecord::query`]. An `Err` means the provider could not be
/// reached at all and nothing should be concluded about the batch.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup_batch(&self, ips: &[String]) -> Result<Vec<GeoRecord>>;

    /// Largest number of addresses one `lookup_batch` call accepts
    fn max_batch(&self) -> usize {
        usize::MAX
    }

    fn name(&self) -> &'static str;
}

// ip-api.com

/// The batch endpoint answers 422 for more addresses than this
pub const IP_API_MAX_BATCH: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    query: Option<String>,
    status: Option<String>,
    message: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
    region_name: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    isp: Option<String>,
    #[serde(rename = "as")]
    as_info: Option<String>,
}

impl IpApiResponse {
    fn into_record(self) -> Option<GeoRecord> {
        let query = self.query?;
        let outcome = if self.status.as_deref() == Some("success") {
            GeoOutcome::Success(Enrichment {
                country: non_empty(self.country),
                country_code: non_empty(self.country_code),
                region: non_empty(self.region_name),
                city: non_empty(self.city),
                lat: self.lat,
                lon: self.lon,
                isp: non_empty(self.isp),
                as_info: non_empty(self.as_info),
            })
        } else {
            GeoOutcome::Fail(self.message)
        };
        Some(GeoRecord { query, outcome })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Client for the ip-api.com batch endpoint
#[derive(Clone)]
pub struct IpApiClient {
    client: Client,
    url: String,
}

impl IpApiClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("onelink-geo/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for geolocation lookups")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl GeoLookup for IpApiClient {
    async fn lookup_batch(&self, ips: &[String]) -> Result<Vec<GeoRecord>> {
        let mut records = Vec::with_capacity(ips.len());
        for chunk in ips.chunks(IP_API_MAX_BATCH) {
            let response = self
                .client
                .post(&self.url)
                .json(chunk)
                .send()
                .await
                .context("geolocation request failed")?
                .error_for_status()
                .context("geolocation service returned an error status")?;

            let body: Vec<IpApiResponse> = response
                .json()
                .await
                .context("failed to decode geolocation response")?;

            records.extend(body.into_iter().filter_map(IpApiResponse::into_record));
        }
        Ok(records)
    }

    fn max_batch(&self) -> usize {
        IP_API_MAX_BATCH
    }

    fn name(&self) -> &'static str {
        "ip-api"
    }
}

// MaxMind

/// Lookups against memory-mapped MaxMind City and ASN databases
#[derive(Clone)]
pub struct MaxMindLookup {
    city_reader: Option<Arc<Reader<Mmap>>>,
    asn_reader: Option<Arc<Reader<Mmap>>>,
}

impl MaxMindLookup {
    pub fn new(city_path: Option<&str>, asn_path: Option<&str>) -> Result<Self> {
        let city_reader = match city_path {
            Some(path) => Some(Arc::new(
                unsafe { Reader::open_mmap(path) }
                    .with_context(|| format!("Failed to open GeoIP City database at {}", path))?,
            )),
            None => None,
        };

        let asn_reader = match asn_path {
            Some(path) => Some(Arc::new(
                unsafe { Reader::open_mmap(path) }
                    .with_context(|| format!("Failed to open GeoIP ASN database at {}", path))?,
            )),
            None => None,
        };

        Ok(Self {
            city_reader,
            asn_reader,
        })
    }

    /// `None` when neither database knows the address
    pub fn lookup(&self, ip: IpAddr) -> Option<Enrichment> {
        let mut enrichment = Enrichment::default();
        let mut found = false;

        if let Some(ref reader) = self.city_reader {
            if let Ok(result) = reader.lookup(ip) {
                if let Ok(Some(city)) = result.decode::<geoip2::City>() {
                    enrichment.country_code = city.country.iso_code.map(|s| s.to_string());
                    enrichment.country = city.country.names.english.map(|s| s.to_string());
                    enrichment.region = city
                        .subdivisions
                        .first()
                        .and_then(|s| s.names.english)
                        .map(|s| s.to_string());
                    enrichment.city = city.city.names.english.map(|s| s.to_string());
                    enrichment.lat = city.location.latitude;
                    enrichment.lon = city.location.longitude;
                    found = true;
                } else if let Ok(Some(country)) = result.decode::<geoip2::Country>() {
                    // Country-only databases carry a subset of the City layout
                    enrichment.country_code = country.country.iso_code.map(|s| s.to_string());
                    enrichment.country = country.country.names.english.map(|s| s.to_string());
                    found = true;
                }
            }
        }

        if let Some(ref reader) = self.asn_reader {
            if let Ok(result) = reader.lookup(ip) {
                if let Ok(Some(asn)) = result.decode::<geoip2::Asn>() {
                    let org = asn.autonomous_system_organization.map(|s| s.to_string());
                    enrichment.as_info = match (asn.autonomous_system_number, org.as_deref()) {
                        (Some(number), Some(org)) => Some(format!("AS{number} {org}")),
                        (Some(number), None) => Some(format!("AS{number}")),
                        (None, _) => None,
                    };
                    enrichment.isp = org;
                    found = true;
                }
            }
        }

        found.then_some(enrichment)
    }
}

#[async_trait]
impl GeoLookup for MaxMindLookup {
    async fn lookup_batch(&self, ips: &[String]) -> Result<Vec<GeoRecord>> {
        Ok(ips
            .iter()
            .map(|query| {
                let outcome = match query.parse::<IpAddr>() {
                    Ok(ip) => match self.lookup(ip) {
                        Some(enrichment) => GeoOutcome::Success(enrichment),
                        None => GeoOutcome::Fail(Some("address not in database".to_string())),
                    },
                    Err(_) => GeoOutcome::Fail(Some("invalid query".to_string())),
                };
                GeoRecord {
                    query: query.clone(),
                    outcome,
                }
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "maxmind"
    }
}
