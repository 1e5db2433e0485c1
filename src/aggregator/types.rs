use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Label used when a group carries none of the known name fields.
pub const UNKNOWN_GROUP: &str = "Unknown";

/// Metric names as they appear in backend `values` maps.
pub mod metric {
    pub const REQUESTS: &str = "requests";
    pub const AVG_LATENCY: &str = "avg_latency";
    pub const TOTAL_TOKENS: &str = "total_tokens";
    pub const THROUGHPUT: &str = "throughput";
    pub const TTFT: &str = "ttft_avg";
}

// ── Grouping Dimension ──

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    Model,
    Deployment,
    Project,
    User,
}

impl GroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::Model => "model",
            GroupBy::Deployment => "deployment",
            GroupBy::Project => "project",
            GroupBy::User => "user",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "deployment" | "endpoint" => GroupBy::Deployment,
            "project" => GroupBy::Project,
            "user" => GroupBy::User,
            _ => GroupBy::Model,
        }
    }
}

// ── Interval ──

/// Bucket width of a backend time series. Anything the backend sends that is
/// not one of the known widths formats like a sub-hour interval.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[default]
    #[serde(other, rename = "unspecified")]
    Unspecified,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::SixHours => "6h",
            Interval::TwelveHours => "12h",
            Interval::OneDay => "1d",
            Interval::OneWeek => "1w",
            Interval::Unspecified => "unspecified",
        }
    }

    /// chrono format string for category labels at this interval.
    pub fn label_format(&self) -> &'static str {
        match self {
            Interval::OneWeek => "%b %d",
            Interval::OneDay => "%m/%d",
            Interval::SixHours | Interval::TwelveHours => "%m/%d %H:%M",
            _ => "%H:%M",
        }
    }

    /// Interval to request from the backend for a query window of `span`.
    pub fn for_span(span: Duration) -> Self {
        let hours = span.num_minutes() as f64 / 60.0;
        if hours <= 1.0 {
            Interval::OneMinute
        } else if hours <= 6.0 {
            Interval::FiveMinutes
        } else if hours <= 12.0 {
            Interval::FifteenMinutes
        } else if hours <= 24.0 {
            Interval::OneHour
        } else if hours <= 72.0 {
            Interval::SixHours
        } else if hours <= 720.0 {
            Interval::OneDay
        } else {
            Interval::OneWeek
        }
    }
}

// ── Time Range ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window of `hours` ending at `now`.
    pub fn last_hours(now: DateTime<Utc>, hours: i64) -> Self {
        Self {
            start: now - Duration::hours(hours),
            end: now,
        }
    }

    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    /// Fractional hours between start and end (negative if reversed).
    pub fn hours(&self) -> f64 {
        self.span().num_milliseconds() as f64 / 3_600_000.0
    }
}

// ── Lenient Field Parsing ──

/// Numbers, numeric strings and null all deserialize; anything else is `None`.
pub(crate) fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value))
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_millis(deserializer)?.unwrap_or(0))
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value)
        .filter(|v| *v >= 0.0)
        .map(|v| v.round() as u64))
}

/// Names arrive as strings, sometimes as numbers; anything else is `None`.
fn lenient_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_label(deserializer)?.unwrap_or_default())
}

/// ISO strings pass through; numeric epochs (seconds, or milliseconds from
/// 1e11 up) become RFC 3339. Anything else is an unparseable empty string.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.as_f64().and_then(epoch_to_rfc3339).unwrap_or_default(),
        _ => String::new(),
    })
}

fn epoch_to_rfc3339(epoch: f64) -> Option<String> {
    if !epoch.is_finite() {
        return None;
    }
    let millis = if epoch.abs() >= 1e11 { epoch } else { epoch * 1000.0 };
    DateTime::<Utc>::from_timestamp_millis(millis.round() as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn lenient_values<'de, D>(deserializer: D) -> Result<HashMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    })
}

/// Unknown strings and non-string values both read as unspecified.
fn lenient_interval<'de, D>(deserializer: D) -> Result<Interval, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(Interval::deserialize(value).unwrap_or_default())
}

/// Parse an ISO instant. Strings without an offset are taken as UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    parse_naive(raw).map(|naive| naive.and_utc())
}

/// Parse the wall-clock fields exactly as written, ignoring any offset.
pub fn parse_wall_clock(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    parse_naive(raw)
}

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
}

// ── Backend Payloads ──

/// Name fields a backend group may carry. The first non-empty one wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GroupLabels {
    #[serde(default, deserialize_with = "lenient_label")]
    pub model_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_label")]
    pub project_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_label")]
    pub endpoint_name: Option<String>,
}

impl GroupLabels {
    pub fn display_name(&self) -> &str {
        [&self.model_name, &self.project_name, &self.endpoint_name]
            .into_iter()
            .find_map(|v| v.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(UNKNOWN_GROUP)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataPoint {
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient_values")]
    pub values: HashMap<String, Value>,
}

impl DataPoint {
    /// The numeric value of `metric`, or `None` when absent, null or non-numeric.
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).and_then(number_from_value)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeriesGroup {
    #[serde(flatten)]
    pub labels: GroupLabels,
    #[serde(default)]
    pub data_points: Vec<DataPoint>,
}

/// The shapes a backend time-series response can take.
#[derive(Debug, Clone, Default)]
pub enum SeriesShape {
    /// Pre-grouped by dimension; null values are skipped and same-label values averaged.
    Grouped(Vec<SeriesGroup>),
    /// Legacy single series; missing values read as zero, points map one to one.
    Flat(Vec<DataPoint>),
    /// Legacy per-group series keyed by name; timestamps are read as wall-clock.
    LegacyGrouped(BTreeMap<String, Vec<DataPoint>>),
    #[default]
    Empty,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "RawTimeSeries")]
pub struct TimeSeriesPayload {
    pub interval: Interval,
    pub shape: SeriesShape,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTimeSeries {
    #[serde(deserialize_with = "lenient_interval")]
    interval: Interval,
    groups: Option<Vec<SeriesGroup>>,
    series: Option<Vec<DataPoint>>,
    grouped_series: Option<BTreeMap<String, Vec<DataPoint>>>,
}

impl From<RawTimeSeries> for TimeSeriesPayload {
    fn from(raw: RawTimeSeries) -> Self {
        let shape = if let Some(groups) = raw.groups {
            SeriesShape::Grouped(groups)
        } else if let Some(series) = raw.series {
            SeriesShape::Flat(series)
        } else if let Some(grouped) = raw.grouped_series {
            SeriesShape::LegacyGrouped(grouped)
        } else {
            SeriesShape::Empty
        };
        Self {
            interval: raw.interval,
            shape,
        }
    }
}

impl TimeSeriesPayload {
    /// Whether any point carries a usable value for `metric`.
    pub fn has_metric(&self, metric: &str) -> bool {
        let mut points: Box<dyn Iterator<Item = &DataPoint>> = match &self.shape {
            SeriesShape::Grouped(groups) => Box::new(groups.iter().flat_map(|g| &g.data_points)),
            SeriesShape::Flat(series) => Box::new(series.iter()),
            SeriesShape::LegacyGrouped(grouped) => Box::new(grouped.values().flatten()),
            SeriesShape::Empty => return false,
        };
        points.any(|p| p.value(metric).is_some())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MetricLeaf {
    #[serde(default, deserialize_with = "lenient_number")]
    pub value: Option<f64>,
}

/// Backend summary leaves. Every leaf is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SummaryPayload {
    pub total_requests: Option<MetricLeaf>,
    pub success_rate: Option<MetricLeaf>,
    pub avg_latency: Option<MetricLeaf>,
    pub p95_latency: Option<MetricLeaf>,
    pub p99_latency: Option<MetricLeaf>,
    pub total_cost: Option<MetricLeaf>,
    pub total_tokens: Option<MetricLeaf>,
    pub ttft_avg: Option<MetricLeaf>,
    pub ttft_p95: Option<MetricLeaf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntityMetrics {
    pub total_requests: Option<MetricLeaf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopEntityGroup {
    #[serde(flatten)]
    pub labels: GroupLabels,
    #[serde(default)]
    pub metrics: EntityMetrics,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopEntitiesPayload {
    pub groups: Vec<TopEntityGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeCount {
    #[serde(default)]
    pub range: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LatencyGroup {
    #[serde(flatten)]
    pub labels: GroupLabels,
    #[serde(default)]
    pub buckets: Vec<RangeCount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LatencyDistributionPayload {
    pub overall_distribution: Option<Vec<RangeCount>>,
    pub groups: Option<Vec<LatencyGroup>>,
}

impl LatencyDistributionPayload {
    pub fn overall(&self) -> Option<&[RangeCount]> {
        self.overall_distribution
            .as_deref()
            .filter(|buckets| !buckets.is_empty())
    }

    pub fn grouped(&self) -> Option<&[LatencyGroup]> {
        self.groups.as_deref().filter(|groups| !groups.is_empty())
    }
}

/// One logical LLM request/response as listed by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InferenceRecord {
    #[serde(default, deserialize_with = "lenient_id")]
    pub inference_id: String,
    #[serde(default, deserialize_with = "lenient_label")]
    pub model_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_label")]
    pub model_display_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_label")]
    pub project_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_label")]
    pub endpoint_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_label")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub response_time_ms: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub input_tokens: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub output_tokens: u64,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_success: Option<bool>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub cost: Option<f64>,
}

impl InferenceRecord {
    /// Value of the grouping dimension for this record.
    pub fn dimension(&self, group_by: GroupBy) -> &str {
        let value = match group_by {
            GroupBy::Model => non_empty(&self.model_display_name).or(non_empty(&self.model_name)),
            GroupBy::Deployment => non_empty(&self.endpoint_name),
            GroupBy::Project => non_empty(&self.project_name),
            GroupBy::User => non_empty(&self.user_id),
        };
        value.unwrap_or(UNKNOWN_GROUP)
    }

    /// Saturates rather than overflowing on absurd counts.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn succeeded(&self) -> bool {
        self.is_success.unwrap_or(false)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Everything the aggregator may consume for one view. Any part may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsInputs {
    #[serde(alias = "summaryMetrics")]
    pub summary: Option<SummaryPayload>,
    #[serde(alias = "timeSeries")]
    pub time_series: Option<TimeSeriesPayload>,
    #[serde(alias = "topModels")]
    pub top_models: Option<TopEntitiesPayload>,
    #[serde(alias = "topProjects")]
    pub top_projects: Option<TopEntitiesPayload>,
    #[serde(alias = "topEndpoints")]
    pub top_endpoints: Option<TopEntitiesPayload>,
    #[serde(alias = "latencyDistribution")]
    pub latency_distribution: Option<LatencyDistributionPayload>,
    pub records: Vec<InferenceRecord>,
}

// ── Aggregated Output ──

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimePoint {
    pub time: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub total_requests: f64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub avg_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub total_cost: f64,
    pub total_tokens: f64,
    pub ttft_avg: f64,
    pub ttft_p95: f64,
    pub requests_per_hour: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedEntity {
    pub name: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HourBucket {
    pub hour: String,
    pub count: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LatencyBucket {
    pub range: String,
    pub count: u64,
    pub percentage: f64,
}
