use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    pub auth: AuthConfig,
    pub links: LinkConfig,
    pub ingest: IngestConfig,
    pub enrich: EnrichConfig,
    /// Per-request deadline in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to sign bearer tokens
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    /// Lifetime of one-time chat link tokens
    pub chat_link_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Length of generated short paths
    pub short_path_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub buffer_size: usize,
    /// Honour X-Forwarded-For / X-Real-IP
    pub trust_forwarded_for: bool,
    /// When non-empty, forwarding headers are only trusted from these peers
    pub trusted_proxies: Vec<IpNet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeoProvider {
    IpApi,
    Maxmind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: i64,
    /// Failed lookups allowed before a click is given up on
    pub max_attempts: i32,
    pub provider: GeoProvider,
    pub api_url: String,
    pub api_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub geoip_city_db_path: Option<String>,
    pub geoip_asn_db_path: Option<String>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 4,
            batch_size: 100,
            max_attempts: 1,
            provider: GeoProvider::IpApi,
            api_url: Self::DEFAULT_API_URL.to_string(),
            api_timeout_secs: 10,
            cache_ttl_secs: 900,
            geoip_city_db_path: None,
            geoip_asn_db_path: None,
        }
    }
}

impl EnrichConfig {
    /// ip-api.com batch endpoint; the field mask selects status, message,
    /// country, countryCode, regionName, city, lat, lon, isp, as and query
    pub const DEFAULT_API_URL: &'static str = "http://ip-api.com/batch?fields=60123&lang=en";
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{v}'")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str = env_or("DATABASE_BACKEND", "sqlite");
        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = env_or("DATABASE_URL", "sqlite://./onelink.db?mode=rwc");
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let api_host = env_or("API_HOST", "127.0.0.1");
        let api_port = env_parse("API_PORT", 8080u16)?;

        let redirect_host = env_or("REDIRECT_HOST", "127.0.0.1");
        let redirect_port = env_parse("REDIRECT_PORT", 3000u16)?;

        let jwt_secret = match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!(
                    "JWT_SECRET is not set; using a random secret, issued tokens will not survive restarts"
                );
                random_secret()
            }
        };
        let token_ttl_secs = env_parse("TOKEN_TTL_SECS", 86_400u64)?;
        let chat_link_ttl_secs = env_parse("CHAT_LINK_TTL_SECS", 600u64)?.max(1);

        let short_path_length = env_parse("SHORT_PATH_LENGTH", 6usize)?;
        if !(4..=32).contains(&short_path_length) {
            anyhow::bail!("SHORT_PATH_LENGTH must be between 4 and 32, got {short_path_length}");
        }

        let trusted_proxies = parse_trusted_proxies(&env_or("TRUSTED_PROXIES", ""))?;

        let defaults = EnrichConfig::default();
        let provider = match env_or("GEO_PROVIDER", "ip-api").to_lowercase().as_str() {
            "ip-api" | "ipapi" => GeoProvider::IpApi,
            "maxmind" | "mmdb" => GeoProvider::Maxmind,
            other => {
                tracing::warn!(
                    "Unknown GEO_PROVIDER '{other}', falling back to 'ip-api'. Supported values: ip-api, maxmind"
                );
                GeoProvider::IpApi
            }
        };

        let enrich = EnrichConfig {
            enabled: env_flag("ENRICH_ENABLED", defaults.enabled),
            interval_secs: env_parse("ENRICH_INTERVAL_SECS", defaults.interval_secs)?.max(1),
            batch_size: env_parse("ENRICH_BATCH_SIZE", defaults.batch_size)?.max(1),
            max_attempts: env_parse("ENRICH_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            provider,
            api_url: env_or("GEO_API_URL", EnrichConfig::DEFAULT_API_URL),
            api_timeout_secs: env_parse("GEO_API_TIMEOUT_SECS", defaults.api_timeout_secs)?,
            cache_ttl_secs: env_parse("GEO_CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            geoip_city_db_path: std::env::var("GEOIP_CITY_DB_PATH").ok(),
            geoip_asn_db_path: std::env::var("GEOIP_ASN_DB_PATH").ok(),
        };

        if enrich.provider == GeoProvider::Maxmind
            && enrich.geoip_city_db_path.is_none()
            && enrich.geoip_asn_db_path.is_none()
        {
            anyhow::bail!(
                "GEO_PROVIDER=maxmind requires GEOIP_CITY_DB_PATH and/or GEOIP_ASN_DB_PATH"
            );
        }

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            redirect_server: ServerConfig {
                host: redirect_host,
                port: redirect_port,
            },
            auth: AuthConfig {
                jwt_secret,
                token_ttl_secs,
                chat_link_ttl_secs,
            },
            links: LinkConfig { short_path_length },
            ingest: IngestConfig {
                buffer_size: env_parse("INGEST_BUFFER_SIZE", 10_000usize)?.max(1),
                trust_forwarded_for: env_flag("TRUST_FORWARDED_FOR", false),
                trusted_proxies,
            },
            enrich,
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", 30u64)?,
        })
    }
}

/// Comma-separated CIDRs; bare addresses count as single-host networks
fn parse_trusted_proxies(raw: &str) -> anyhow::Result<Vec<IpNet>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpNet>()
                .or_else(|_| s.parse::<std::net::IpAddr>().map(IpNet::from))
                .with_context(|| format!("invalid entry in TRUSTED_PROXIES: '{s}'"))
        })
        .collect()
}

fn random_secret() -> String {
    use rand::RngExt;
    let mut rng = rand::rng();
    (0..32).map(|_| format!("{:02x}", rng.random::<u8>())).collect()
}
