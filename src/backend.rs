//! Client for the external Metrics API.
//!
//! One fetch issues every request a view needs concurrently and fails as a
//! whole if any of them fails. There is no retry; the caller keeps its last
//! good stats instead.

use crate::aggregator::types::{
    GroupBy, InferenceRecord, Interval, LatencyDistributionPayload, MetricsInputs,
    SummaryPayload, TimeRange, TimeSeriesPayload, TopEntitiesPayload,
};
use crate::config::BackendConfig;
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),

    #[error("request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned {status}")]
    Status {
        path: String,
        status: reqwest::StatusCode,
    },

    #[error("could not decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Optional narrowing applied to every backend request.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MetricsFilters {
    pub project: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

impl MetricsFilters {
    fn params(&self) -> impl Iterator<Item = (&'static str, String)> + '_ {
        [
            ("project", &self.project),
            ("model", &self.model),
            ("endpoint", &self.endpoint),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (key, v.to_string()))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsQuery {
    pub range: TimeRange,
    pub group_by: GroupBy,
    pub filters: MetricsFilters,
}

impl MetricsQuery {
    pub fn new(range: TimeRange, group_by: GroupBy) -> Self {
        Self {
            range,
            group_by,
            filters: MetricsFilters::default(),
        }
    }

    pub fn interval(&self) -> Interval {
        Interval::for_span(self.range.span())
    }

    /// Query parameters shared by every request of one fetch.
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            (
                "start",
                self.range.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "end",
                self.range.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("interval", self.interval().as_str().to_string()),
            ("group_by", backend_dimension(self.group_by).to_string()),
        ];
        params.extend(self.filters.params());
        params
    }
}

/// The Metrics API calls deployments "endpoints".
fn backend_dimension(group_by: GroupBy) -> &'static str {
    match group_by {
        GroupBy::Deployment => "endpoint",
        other => other.as_str(),
    }
}

/// Anything that can produce the inputs for one aggregation.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self, query: &MetricsQuery) -> Result<MetricsInputs, BackendError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InferencePage {
    #[serde(alias = "inferences")]
    items: Vec<InferenceRecord>,
}

pub struct HttpMetricsSource {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
    records_limit: u32,
}

impl HttpMetricsSource {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(BackendError::Client)?;

        // Url::join drops the last path segment unless it ends in '/'
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            client,
            base_url: Url::parse(&base)?,
            api_token: config.api_token.clone().filter(|t| !t.is_empty()),
            records_limit: config.records_limit,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&'static str, String)],
    ) -> Result<T, BackendError> {
        let url = self.base_url.join(path)?;
        let mut request = self.client.get(url).query(params);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|source| BackendError::Request {
            path: path.to_string(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                path: path.to_string(),
                status,
            });
        }

        resp.json::<T>().await.map_err(|source| BackendError::Decode {
            path: path.to_string(),
            source,
        })
    }

    async fn top_entities(
        &self,
        params: &[(&'static str, String)],
        dimension: &'static str,
    ) -> Result<TopEntitiesPayload, BackendError> {
        let mut params = params.to_vec();
        params.push(("dimension", dimension.to_string()));
        self.get_json("metrics/top-entities", &params).await
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self, query: &MetricsQuery) -> Result<MetricsInputs, BackendError> {
        let params = query.params();
        let mut record_params = params.clone();
        record_params.push(("limit", self.records_limit.to_string()));

        let (summary, time_series, top_models, top_projects, top_endpoints, latency, page) =
            futures::try_join!(
                self.get_json::<SummaryPayload>("metrics/summary", &params),
                self.get_json::<TimeSeriesPayload>("metrics/timeseries", &params),
                self.top_entities(&params, "model"),
                self.top_entities(&params, "project"),
                self.top_entities(&params, "endpoint"),
                self.get_json::<LatencyDistributionPayload>(
                    "metrics/latency-distribution",
                    &params
                ),
                self.get_json::<InferencePage>("inferences", &record_params),
            )?;

        tracing::debug!(
            group_by = query.group_by.as_str(),
            interval = query.interval().as_str(),
            records = page.items.len(),
            "fetched metrics"
        );

        Ok(MetricsInputs {
            summary: Some(summary),
            time_series: Some(time_series),
            top_models: Some(top_models),
            top_projects: Some(top_projects),
            top_endpoints: Some(top_endpoints),
            latency_distribution: Some(latency),
            records: page.items,
        })
    }
}
