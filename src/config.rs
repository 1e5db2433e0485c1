use config::{Config, Environment, File};
use serde::Deserialize;

/// Furthest a display zone may sit from UTC, in minutes.
pub const MAX_TZ_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub views: ViewsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Browser origin allowed by CORS. Any origin when unset.
    #[serde(default)]
    pub cors_origin: Option<String>,
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_records_limit")]
    pub records_limit: u32,
    #[serde(default)]
    pub api_token: Option<String>,
}

fn default_backend_timeout() -> u64 {
    15
}
fn default_records_limit() -> u32 {
    1000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AggregationConfig {
    /// Display zone used when a request does not send its own offset.
    #[serde(default)]
    pub default_tz_offset_minutes: i32,
}

/// How responses to overlapping refreshes of one view are applied.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrdering {
    /// Every response is applied as it arrives; a slow earlier request can
    /// overwrite a faster later one.
    #[default]
    Arrival,
    /// Responses older than the newest dispatched request are dropped.
    LatestDispatched,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewsConfig {
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_max_views")]
    pub max_views: u64,
    #[serde(default)]
    pub response_ordering: ResponseOrdering,
}

impl Default for ViewsConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl(),
            max_views: default_max_views(),
            response_ordering: ResponseOrdering::default(),
        }
    }
}

fn default_idle_ttl() -> u64 {
    1800
}
fn default_max_views() -> u64 {
    10_000
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.backend.base_url.trim().is_empty() {
            return Err("backend.base_url must be set. \
                 Set it in config.toml or via INFERLENS__BACKEND__BASE_URL env var."
                .to_string());
        }
        if let Err(e) = url::Url::parse(&self.backend.base_url) {
            return Err(format!("backend.base_url is not a valid URL: {e}"));
        }
        if self.backend.timeout_secs == 0 {
            return Err("backend.timeout_secs must be greater than 0".to_string());
        }
        if self.aggregation.default_tz_offset_minutes.abs() > MAX_TZ_OFFSET_MINUTES {
            return Err(format!(
                "aggregation.default_tz_offset_minutes must be within ±{MAX_TZ_OFFSET_MINUTES}"
            ));
        }
        if self.views.max_views == 0 {
            return Err("views.max_views must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // Overlay with environment variables (INFERLENS__SERVER__PORT=8080, etc.)
        builder = builder.add_source(
            Environment::with_prefix("INFERLENS")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
