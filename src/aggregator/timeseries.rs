//! Category-axis bucketing for chart series.
//!
//! Every grouped result goes through [`align`], which collects the union of
//! labels across all groups before materializing any group, so every series
//! in one map has the same length and the same label at each index.

use crate::aggregator::types::{
    metric, parse_instant, parse_wall_clock, DataPoint, GroupBy, InferenceRecord, Interval,
    SeriesShape, TimePoint, TimeSeriesPayload,
};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDateTime, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Format an instant as a category label in the display zone.
pub fn format_label(instant: DateTime<Utc>, interval: Interval, zone: &FixedOffset) -> String {
    instant
        .with_timezone(zone)
        .format(interval.label_format())
        .to_string()
}

fn zoned_label(raw: &str, interval: Interval, zone: &FixedOffset) -> Option<String> {
    parse_instant(raw).map(|instant| format_label(instant, interval, zone))
}

/// Start of the interval containing `local`. Weeks start on Monday.
pub fn interval_start(local: NaiveDateTime, interval: Interval) -> NaiveDateTime {
    let (hour, minute) = (local.hour(), local.minute());
    let floored = match interval {
        Interval::FiveMinutes => local.date().and_hms_opt(hour, minute - minute % 5, 0),
        Interval::FifteenMinutes => local.date().and_hms_opt(hour, minute - minute % 15, 0),
        Interval::ThirtyMinutes => local.date().and_hms_opt(hour, minute - minute % 30, 0),
        Interval::OneHour => local.date().and_hms_opt(hour, 0, 0),
        Interval::SixHours => local.date().and_hms_opt(hour - hour % 6, 0, 0),
        Interval::TwelveHours => local.date().and_hms_opt(hour - hour % 12, 0, 0),
        Interval::OneDay => local.date().and_hms_opt(0, 0, 0),
        Interval::OneWeek => {
            let monday = local.date() - Duration::days(local.weekday().num_days_from_monday() as i64);
            monday.and_hms_opt(0, 0, 0)
        }
        Interval::OneMinute | Interval::Unspecified => local.date().and_hms_opt(hour, minute, 0),
    };
    floored.unwrap_or(local)
}

/// Label of the interval a raw record timestamp falls into.
fn record_label(raw: &str, interval: Interval, zone: &FixedOffset) -> Option<String> {
    parse_instant(raw).map(|instant| {
        let local = instant.with_timezone(zone).naive_local();
        interval_start(local, interval)
            .format(interval.label_format())
            .to_string()
    })
}

fn wall_clock_label(raw: &str, interval: Interval) -> Option<String> {
    parse_wall_clock(raw).map(|naive| naive.format(interval.label_format()).to_string())
}

/// Running mean per label.
#[derive(Debug, Default)]
struct Mean {
    sum: f64,
    count: u32,
}

impl Mean {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Overall series for `metric`.
///
/// Grouped payloads are flattened, labelled in the display zone, and values
/// sharing a label are averaged; null values are skipped rather than read as
/// zero. Flat payloads map point for point with missing values read as zero.
pub fn bucket_time_series(ts: &TimeSeriesPayload, metric: &str, zone: &FixedOffset) -> Vec<TimePoint> {
    match &ts.shape {
        SeriesShape::Grouped(groups) => {
            let mut by_label: BTreeMap<String, Mean> = BTreeMap::new();
            for point in groups.iter().flat_map(|g| &g.data_points) {
                let Some(value) = point.value(metric) else {
                    continue;
                };
                let Some(label) = zoned_label(&point.timestamp, ts.interval, zone) else {
                    continue;
                };
                by_label.entry(label).or_default().push(value);
            }
            by_label
                .into_iter()
                .map(|(time, mean)| TimePoint {
                    time,
                    value: mean.value(),
                })
                .collect()
        }
        SeriesShape::Flat(series) => series
            .iter()
            .map(|point| TimePoint {
                time: zoned_label(&point.timestamp, ts.interval, zone)
                    .unwrap_or_else(|| point.timestamp.clone()),
                value: point.value(metric).unwrap_or(0.0),
            })
            .collect(),
        SeriesShape::LegacyGrouped(_) | SeriesShape::Empty => Vec::new(),
    }
}

/// Labelled observations for one group, before alignment.
type Observations = Vec<(String, Option<f64>)>;

/// Re-index every group onto the sorted union of all labels. Labels seen
/// only with null values still join the axis; a group lacking a label gets 0.
pub fn align<I>(groups: I) -> BTreeMap<String, Vec<TimePoint>>
where
    I: IntoIterator<Item = (String, Observations)>,
{
    let mut categories: BTreeSet<String> = BTreeSet::new();
    let mut lookups: BTreeMap<String, BTreeMap<String, Mean>> = BTreeMap::new();

    for (name, observations) in groups {
        let lookup = lookups.entry(name).or_default();
        for (label, value) in observations {
            if let Some(value) = value {
                lookup.entry(label.clone()).or_default().push(value);
            }
            categories.insert(label);
        }
    }

    lookups
        .into_iter()
        .map(|(name, lookup)| {
            let series = categories
                .iter()
                .map(|label| TimePoint {
                    time: label.clone(),
                    value: lookup.get(label).map(Mean::value).unwrap_or(0.0),
                })
                .collect();
            (name, series)
        })
        .collect()
}

fn observe<'a, F>(points: &'a [DataPoint], metric: &'a str, label: F) -> Observations
where
    F: Fn(&str) -> Option<String>,
{
    points
        .iter()
        .filter_map(|p| label(&p.timestamp).map(|l| (l, p.value(metric))))
        .collect()
}

/// Per-group series for `metric`, all aligned to one category axis.
///
/// The legacy `grouped_series` shape is labelled from the wall-clock fields
/// as written, without conversion to the display zone.
pub fn bucket_time_series_by_group(
    ts: &TimeSeriesPayload,
    metric: &str,
    zone: &FixedOffset,
) -> BTreeMap<String, Vec<TimePoint>> {
    let interval = ts.interval;
    match &ts.shape {
        SeriesShape::Grouped(groups) => align(groups.iter().map(|g| {
            (
                g.labels.display_name().to_string(),
                observe(&g.data_points, metric, |raw| zoned_label(raw, interval, zone)),
            )
        })),
        SeriesShape::LegacyGrouped(grouped) => align(grouped.iter().map(|(name, points)| {
            (
                name.clone(),
                observe(points, metric, |raw| wall_clock_label(raw, interval)),
            )
        })),
        SeriesShape::Flat(_) | SeriesShape::Empty => BTreeMap::new(),
    }
}

/// How a metric is derived from raw records when the payload lacks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMetric {
    MeanLatency,
    TokenSum,
    RequestCount,
}

impl RecordMetric {
    pub fn for_metric(name: &str) -> Option<Self> {
        match name {
            metric::AVG_LATENCY => Some(RecordMetric::MeanLatency),
            metric::TOTAL_TOKENS => Some(RecordMetric::TokenSum),
            metric::REQUESTS | metric::THROUGHPUT => Some(RecordMetric::RequestCount),
            _ => None,
        }
    }

    fn reduce(&self, records: &[&InferenceRecord]) -> Option<f64> {
        match self {
            RecordMetric::MeanLatency => {
                let mut mean = Mean::default();
                for ms in records.iter().filter_map(|r| r.response_time_ms) {
                    mean.push(ms as f64);
                }
                (mean.count > 0).then(|| mean.value())
            }
            RecordMetric::TokenSum => Some(records.iter().map(|r| r.total_tokens() as f64).sum()),
            RecordMetric::RequestCount => Some(records.len() as f64),
        }
    }
}

fn records_by_label<'a>(
    records: impl IntoIterator<Item = &'a InferenceRecord>,
    interval: Interval,
    zone: &FixedOffset,
) -> BTreeMap<String, Vec<&'a InferenceRecord>> {
    let mut by_label: BTreeMap<String, Vec<&InferenceRecord>> = BTreeMap::new();
    for record in records {
        if let Some(label) = record_label(&record.timestamp, interval, zone) {
            by_label.entry(label).or_default().push(record);
        }
    }
    by_label
}

/// Overall series derived from raw records, labelled like backend series.
pub fn records_time_series(
    records: &[InferenceRecord],
    interval: Interval,
    derive: RecordMetric,
    zone: &FixedOffset,
) -> Vec<TimePoint> {
    records_by_label(records, interval, zone)
        .into_iter()
        .filter_map(|(time, bucket)| derive.reduce(&bucket).map(|value| TimePoint { time, value }))
        .collect()
}

/// Per-group series derived from raw records, aligned like backend groups.
pub fn records_time_series_by_group(
    records: &[InferenceRecord],
    interval: Interval,
    derive: RecordMetric,
    group_by: GroupBy,
    zone: &FixedOffset,
) -> BTreeMap<String, Vec<TimePoint>> {
    let mut per_group: BTreeMap<&str, Vec<&InferenceRecord>> = BTreeMap::new();
    for record in records {
        per_group.entry(record.dimension(group_by)).or_default().push(record);
    }

    align(per_group.into_iter().map(|(name, group)| {
        let observations = records_by_label(group, interval, zone)
            .into_iter()
            .map(|(label, bucket)| (label, derive.reduce(&bucket)))
            .collect();
        (name.to_string(), observations)
    }))
}
