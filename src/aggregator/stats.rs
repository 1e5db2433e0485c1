use crate::aggregator::histogram::{
    bucket_hour_of_day, bucket_hour_of_day_by_group, bucket_latency, records_hour_of_day,
    records_hour_of_day_by_group, records_latency_by_group, server_latency_by_group,
    LatencySource, LATENCY_BUCKETS, LEGACY_LATENCY_BUCKETS,
};
use crate::aggregator::ranking::{rank_records, rank_top_entities};
use crate::aggregator::summary::{compute_summary, summarize_records};
use crate::aggregator::timeseries::{
    bucket_time_series, bucket_time_series_by_group, records_time_series,
    records_time_series_by_group, RecordMetric,
};
use crate::aggregator::types::{
    metric, GroupBy, HourBucket, InferenceRecord, Interval, LatencyBucket, MetricsInputs,
    RankedEntity, SummaryPayload, SummaryStats, TimePoint, TimeRange, TimeSeriesPayload,
    TopEntitiesPayload,
};
use chrono::FixedOffset;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Everything the charts of one view render, computed in a single pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStats {
    #[serde(flatten)]
    pub summary: SummaryStats,
    pub group_by: GroupBy,
    pub top_models: Vec<RankedEntity>,
    pub top_projects: Vec<RankedEntity>,
    pub top_endpoints: Vec<RankedEntity>,
    pub hourly_distribution: Vec<HourBucket>,
    pub grouped_hourly_distribution: BTreeMap<String, Vec<HourBucket>>,
    pub latency_distribution: Vec<LatencyBucket>,
    pub grouped_latency_distribution: BTreeMap<String, Vec<LatencyBucket>>,
    pub latency_series: Vec<TimePoint>,
    pub tokens_series: Vec<TimePoint>,
    pub throughput_series: Vec<TimePoint>,
    pub ttft_series: Vec<TimePoint>,
    pub grouped_latency_series: BTreeMap<String, Vec<TimePoint>>,
    pub grouped_tokens_series: BTreeMap<String, Vec<TimePoint>>,
    pub grouped_throughput_series: BTreeMap<String, Vec<TimePoint>>,
    pub grouped_ttft_series: BTreeMap<String, Vec<TimePoint>>,
}

impl AggregatedStats {
    /// Every group name that appears in a grouped collection.
    pub fn group_names(&self) -> BTreeSet<&str> {
        let series = [
            &self.grouped_latency_series,
            &self.grouped_tokens_series,
            &self.grouped_throughput_series,
            &self.grouped_ttft_series,
        ];
        series
            .into_iter()
            .flat_map(|map| map.keys())
            .chain(self.grouped_hourly_distribution.keys())
            .chain(self.grouped_latency_distribution.keys())
            .map(String::as_str)
            .collect()
    }
}

type SeriesPair = (Vec<TimePoint>, BTreeMap<String, Vec<TimePoint>>);

/// Builds [`AggregatedStats`] from whatever the backend supplied, falling
/// back to raw records for each part the payloads leave out.
pub struct StatsBuilder<'a> {
    inputs: &'a MetricsInputs,
    group_by: GroupBy,
    range: TimeRange,
    zone: FixedOffset,
}

impl<'a> StatsBuilder<'a> {
    pub fn new(inputs: &'a MetricsInputs, group_by: GroupBy, range: TimeRange, zone: FixedOffset) -> Self {
        Self {
            inputs,
            group_by,
            range,
            zone,
        }
    }

    fn records(&self) -> &'a [InferenceRecord] {
        &self.inputs.records
    }

    /// Backend time series if it carries `name`.
    fn series_with(&self, name: &str) -> Option<&'a TimeSeriesPayload> {
        self.inputs
            .time_series
            .as_ref()
            .filter(|ts| ts.has_metric(name))
    }

    /// Interval used to label record-derived series.
    fn record_interval(&self) -> Interval {
        match &self.inputs.time_series {
            Some(ts) if ts.interval != Interval::Unspecified => ts.interval,
            _ => Interval::for_span(self.range.span()),
        }
    }

    fn summary(&self) -> SummaryStats {
        match &self.inputs.summary {
            Some(payload) => compute_summary(payload, &self.range),
            None if !self.records().is_empty() => summarize_records(self.records(), &self.range),
            None => compute_summary(&SummaryPayload::default(), &self.range),
        }
    }

    fn ranked(&self, payload: &Option<TopEntitiesPayload>, dimension: GroupBy, total: f64) -> Vec<RankedEntity> {
        match payload {
            Some(top) if !top.groups.is_empty() => rank_top_entities(top, total),
            _ => rank_records(self.records(), dimension, total),
        }
    }

    fn series(&self, name: &str) -> SeriesPair {
        if let Some(ts) = self.series_with(name) {
            return (
                bucket_time_series(ts, name, &self.zone),
                bucket_time_series_by_group(ts, name, &self.zone),
            );
        }
        match RecordMetric::for_metric(name) {
            Some(derive) if !self.records().is_empty() => {
                let interval = self.record_interval();
                (
                    records_time_series(self.records(), interval, derive, &self.zone),
                    records_time_series_by_group(self.records(), interval, derive, self.group_by, &self.zone),
                )
            }
            _ => Default::default(),
        }
    }

    fn hourly(&self) -> (Vec<HourBucket>, BTreeMap<String, Vec<HourBucket>>) {
        match self.series_with(metric::REQUESTS) {
            Some(ts) => (
                bucket_hour_of_day(ts, metric::REQUESTS, &self.zone),
                bucket_hour_of_day_by_group(ts, metric::REQUESTS, &self.zone),
            ),
            None if !self.records().is_empty() => (
                records_hour_of_day(self.records(), &self.zone),
                records_hour_of_day_by_group(self.records(), self.group_by, &self.zone),
            ),
            None => (
                bucket_hour_of_day(&TimeSeriesPayload::default(), metric::REQUESTS, &self.zone),
                BTreeMap::new(),
            ),
        }
    }

    fn latency(&self) -> (Vec<LatencyBucket>, BTreeMap<String, Vec<LatencyBucket>>) {
        let server = self.inputs.latency_distribution.as_ref();
        let overall = server.and_then(|d| d.overall());
        let groups = server.and_then(|d| d.grouped());

        let distribution = match (overall, groups) {
            (Some(buckets), _) => bucket_latency(LatencySource::Server(buckets)),
            (None, Some(_)) => bucket_latency(LatencySource::Records {
                records: self.records(),
                table: &LATENCY_BUCKETS,
            }),
            (None, None) => bucket_latency(LatencySource::Records {
                records: self.records(),
                table: &LEGACY_LATENCY_BUCKETS,
            }),
        };
        let grouped = match groups {
            Some(groups) => server_latency_by_group(groups),
            None => records_latency_by_group(self.records(), self.group_by),
        };
        (distribution, grouped)
    }

    pub fn build(&self) -> AggregatedStats {
        let summary = self.summary();
        let total = summary.total_requests;
        let (hourly_distribution, grouped_hourly_distribution) = self.hourly();
        let (latency_distribution, grouped_latency_distribution) = self.latency();
        let (latency_series, grouped_latency_series) = self.series(metric::AVG_LATENCY);
        let (tokens_series, grouped_tokens_series) = self.series(metric::TOTAL_TOKENS);
        let (throughput_series, grouped_throughput_series) = self.series(metric::THROUGHPUT);
        let (ttft_series, grouped_ttft_series) = self.series(metric::TTFT);

        AggregatedStats {
            top_models: self.ranked(&self.inputs.top_models, GroupBy::Model, total),
            top_projects: self.ranked(&self.inputs.top_projects, GroupBy::Project, total),
            top_endpoints: self.ranked(&self.inputs.top_endpoints, GroupBy::Deployment, total),
            summary,
            group_by: self.group_by,
            hourly_distribution,
            grouped_hourly_distribution,
            latency_distribution,
            grouped_latency_distribution,
            latency_series,
            tokens_series,
            throughput_series,
            ttft_series,
            grouped_latency_series,
            grouped_tokens_series,
            grouped_throughput_series,
            grouped_ttft_series,
        }
    }
}

/// Compute the full statistics for one view. Never fails; absent inputs
/// produce zero-valued or empty parts.
pub fn aggregate(
    inputs: &MetricsInputs,
    group_by: GroupBy,
    range: TimeRange,
    zone: FixedOffset,
) -> AggregatedStats {
    StatsBuilder::new(inputs, group_by, range, zone).build()
}
