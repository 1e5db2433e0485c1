use crate::aggregator::types::{
    parse_instant, parse_wall_clock, GroupBy, HourBucket, InferenceRecord, LatencyBucket,
    LatencyGroup, RangeCount, SeriesShape, TimeSeriesPayload,
};
use chrono::{FixedOffset, Timelike};
use std::collections::BTreeMap;

/// A latency range, inclusive of `min_ms` and exclusive of `max_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyRange {
    pub label: &'static str,
    pub min_ms: u64,
    pub max_ms: Option<u64>,
}

impl LatencyRange {
    const fn new(label: &'static str, min_ms: u64, max_ms: Option<u64>) -> Self {
        Self {
            label,
            min_ms,
            max_ms,
        }
    }

    pub fn contains(&self, ms: u64) -> bool {
        ms >= self.min_ms && self.max_ms.map_or(true, |max| ms < max)
    }
}

/// Canonical latency ranges.
pub const LATENCY_BUCKETS: [LatencyRange; 7] = [
    LatencyRange::new("0-100ms", 0, Some(100)),
    LatencyRange::new("100-500ms", 100, Some(500)),
    LatencyRange::new("500ms-1s", 500, Some(1_000)),
    LatencyRange::new("1-2s", 1_000, Some(2_000)),
    LatencyRange::new("2-5s", 2_000, Some(5_000)),
    LatencyRange::new("5-10s", 5_000, Some(10_000)),
    LatencyRange::new(">10s", 10_000, None),
];

/// Coarser ranges used only for the overall chart when the backend sent no
/// distribution at all. Kept separate from [`LATENCY_BUCKETS`]; the two
/// tables disagree below 500ms and above 5s.
pub const LEGACY_LATENCY_BUCKETS: [LatencyRange; 5] = [
    LatencyRange::new("0-500ms", 0, Some(500)),
    LatencyRange::new("500ms-1s", 500, Some(1_000)),
    LatencyRange::new("1-2s", 1_000, Some(2_000)),
    LatencyRange::new("2-5s", 2_000, Some(5_000)),
    LatencyRange::new(">5s", 5_000, None),
];

/// Where a latency histogram comes from.
#[derive(Debug, Clone, Copy)]
pub enum LatencySource<'a> {
    /// Backend buckets, used verbatim.
    Server(&'a [RangeCount]),
    /// Raw response times bucketed client-side with the given table.
    Records {
        records: &'a [InferenceRecord],
        table: &'a [LatencyRange],
    },
}

fn with_percentages(counts: Vec<(String, u64)>) -> Vec<LatencyBucket> {
    let total: f64 = counts.iter().map(|(_, c)| *c as f64).sum();
    counts
        .into_iter()
        .map(|(range, count)| LatencyBucket {
            range,
            count,
            percentage: if total > 0.0 {
                count as f64 / total * 100.0
            } else {
                0.0
            },
        })
        .collect()
}

/// Bucket raw latencies. `None` values are excluded from every count and
/// from the percentage denominator.
pub fn bucket_latency_values<I>(values: I, table: &[LatencyRange]) -> Vec<LatencyBucket>
where
    I: IntoIterator<Item = Option<u64>>,
{
    let mut counts = vec![0u64; table.len()];
    for ms in values.into_iter().flatten() {
        if let Some(idx) = table.iter().position(|range| range.contains(ms)) {
            counts[idx] += 1;
        }
    }
    with_percentages(
        table
            .iter()
            .zip(counts)
            .map(|(range, count)| (range.label.to_string(), count))
            .collect(),
    )
}

pub fn bucket_latency(source: LatencySource<'_>) -> Vec<LatencyBucket> {
    match source {
        LatencySource::Server(buckets) => with_percentages(
            buckets
                .iter()
                .map(|b| (b.range.clone(), b.count))
                .collect(),
        ),
        LatencySource::Records { records, table } => {
            bucket_latency_values(records.iter().map(|r| r.response_time_ms), table)
        }
    }
}

/// Per-group histograms from backend groups.
pub fn server_latency_by_group(groups: &[LatencyGroup]) -> BTreeMap<String, Vec<LatencyBucket>> {
    let mut merged: BTreeMap<String, Vec<RangeCount>> = BTreeMap::new();
    for group in groups {
        merged
            .entry(group.labels.display_name().to_string())
            .or_default()
            .extend(group.buckets.iter().cloned());
    }
    merged
        .into_iter()
        .map(|(name, buckets)| (name, bucket_latency(LatencySource::Server(&buckets))))
        .collect()
}

/// Per-group histograms computed from records with the canonical table.
pub fn records_latency_by_group(
    records: &[InferenceRecord],
    group_by: GroupBy,
) -> BTreeMap<String, Vec<LatencyBucket>> {
    let mut per_group: BTreeMap<&str, Vec<Option<u64>>> = BTreeMap::new();
    for record in records {
        per_group
            .entry(record.dimension(group_by))
            .or_default()
            .push(record.response_time_ms);
    }
    per_group
        .into_iter()
        .map(|(name, values)| (name.to_string(), bucket_latency_values(values, &LATENCY_BUCKETS)))
        .collect()
}

// ── Hour of Day ──

fn hour_buckets(totals: [f64; 24]) -> Vec<HourBucket> {
    totals
        .iter()
        .enumerate()
        .map(|(hour, count)| HourBucket {
            hour: format!("{hour:02}:00"),
            count: *count,
        })
        .collect()
}

/// Hour-of-day profile: always 24 buckets, `"00:00"` through `"23:00"`,
/// summing `metric` by display-zone hour regardless of the window's span.
pub fn bucket_hour_of_day(ts: &TimeSeriesPayload, metric: &str, zone: &FixedOffset) -> Vec<HourBucket> {
    let mut totals = [0.0f64; 24];
    let zoned_hour =
        |raw: &str| parse_instant(raw).map(|instant| instant.with_timezone(zone).hour() as usize);

    match &ts.shape {
        SeriesShape::Grouped(groups) => {
            for point in groups.iter().flat_map(|g| &g.data_points) {
                if let (Some(hour), Some(value)) = (zoned_hour(&point.timestamp), point.value(metric)) {
                    totals[hour] += value;
                }
            }
        }
        SeriesShape::Flat(series) => {
            for point in series {
                if let Some(hour) = zoned_hour(&point.timestamp) {
                    totals[hour] += point.value(metric).unwrap_or(0.0);
                }
            }
        }
        SeriesShape::LegacyGrouped(grouped) => {
            for point in grouped.values().flatten() {
                let hour = parse_wall_clock(&point.timestamp).map(|naive| naive.hour() as usize);
                if let (Some(hour), Some(value)) = (hour, point.value(metric)) {
                    totals[hour] += value;
                }
            }
        }
        SeriesShape::Empty => {}
    }
    hour_buckets(totals)
}

/// Hour-of-day profile per group. Each group gets all 24 buckets.
pub fn bucket_hour_of_day_by_group(
    ts: &TimeSeriesPayload,
    metric: &str,
    zone: &FixedOffset,
) -> BTreeMap<String, Vec<HourBucket>> {
    let mut totals: BTreeMap<String, [f64; 24]> = BTreeMap::new();
    match &ts.shape {
        SeriesShape::Grouped(groups) => {
            for group in groups {
                let entry = totals
                    .entry(group.labels.display_name().to_string())
                    .or_insert([0.0; 24]);
                for point in &group.data_points {
                    let hour = parse_instant(&point.timestamp)
                        .map(|instant| instant.with_timezone(zone).hour() as usize);
                    if let (Some(hour), Some(value)) = (hour, point.value(metric)) {
                        entry[hour] += value;
                    }
                }
            }
        }
        SeriesShape::LegacyGrouped(grouped) => {
            for (name, points) in grouped {
                let entry = totals.entry(name.clone()).or_insert([0.0; 24]);
                for point in points {
                    let hour = parse_wall_clock(&point.timestamp).map(|naive| naive.hour() as usize);
                    if let (Some(hour), Some(value)) = (hour, point.value(metric)) {
                        entry[hour] += value;
                    }
                }
            }
        }
        SeriesShape::Flat(_) | SeriesShape::Empty => {}
    }
    totals
        .into_iter()
        .map(|(name, hours)| (name, hour_buckets(hours)))
        .collect()
}

fn record_hour_totals<'a>(
    records: impl IntoIterator<Item = &'a InferenceRecord>,
    zone: &FixedOffset,
) -> [f64; 24] {
    let mut totals = [0.0f64; 24];
    for record in records {
        if let Some(instant) = parse_instant(&record.timestamp) {
            totals[instant.with_timezone(zone).hour() as usize] += 1.0;
        }
    }
    totals
}

/// Request counts by display-zone hour of day from raw records.
pub fn records_hour_of_day(records: &[InferenceRecord], zone: &FixedOffset) -> Vec<HourBucket> {
    hour_buckets(record_hour_totals(records, zone))
}

pub fn records_hour_of_day_by_group(
    records: &[InferenceRecord],
    group_by: GroupBy,
    zone: &FixedOffset,
) -> BTreeMap<String, Vec<HourBucket>> {
    let mut per_group: BTreeMap<&str, Vec<&InferenceRecord>> = BTreeMap::new();
    for record in records {
        per_group.entry(record.dimension(group_by)).or_default().push(record);
    }
    per_group
        .into_iter()
        .map(|(name, group)| (name.to_string(), hour_buckets(record_hour_totals(group, zone))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn counts(buckets: &[LatencyBucket]) -> Vec<u64> {
        buckets.iter().map(|b| b.count).collect()
    }

    #[test]
    fn test_boundaries_fall_in_upper_bucket() {
        let values = [0, 99, 100, 499, 500, 999, 1_000, 2_000, 5_000, 9_999, 10_000, 250_000]
            .map(Some);
        let buckets = bucket_latency_values(values, &LATENCY_BUCKETS);
        assert_eq!(counts(&buckets), vec![2, 2, 2, 1, 1, 2, 2]);
        let labels: Vec<&str> = buckets.iter().map(|b| b.range.as_str()).collect();
        assert_eq!(
            labels,
            vec!["0-100ms", "100-500ms", "500ms-1s", "1-2s", "2-5s", "5-10s", ">10s"]
        );
    }

    #[test]
    fn test_bucket_counts_are_exhaustive() {
        let values: Vec<Option<u64>> = (0..5_000u64)
            .map(|i| if i % 7 == 0 { None } else { Some(i * 37 % 20_011) })
            .collect();
        let non_null = values.iter().filter(|v| v.is_some()).count() as u64;

        for table in [&LATENCY_BUCKETS[..], &LEGACY_LATENCY_BUCKETS[..]] {
            let buckets = bucket_latency_values(values.clone(), table);
            assert_eq!(buckets.len(), table.len());
            assert_eq!(buckets.iter().map(|b| b.count).sum::<u64>(), non_null);
            let pct: f64 = buckets.iter().map(|b| b.percentage).sum();
            assert!((pct - 100.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_nulls_excluded_from_denominator() {
        let buckets = bucket_latency_values([Some(50), None, None, Some(150)], &LATENCY_BUCKETS);
        assert_eq!(buckets[0].percentage, 50.0);
        assert_eq!(buckets[1].percentage, 50.0);
    }

    #[test]
    fn test_empty_input_keeps_all_buckets() {
        let buckets = bucket_latency_values(std::iter::empty(), &LEGACY_LATENCY_BUCKETS);
        assert_eq!(buckets.len(), 5);
        assert!(buckets.iter().all(|b| b.count == 0 && b.percentage == 0.0));
    }

    #[test]
    fn test_server_buckets_used_verbatim() {
        let server = vec![
            RangeCount {
                range: "0-100ms".to_string(),
                count: 3,
            },
            RangeCount {
                range: "custom".to_string(),
                count: 1,
            },
        ];
        let buckets = bucket_latency(LatencySource::Server(&server));
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[1].range, "custom");
        assert_eq!(buckets[0].percentage, 75.0);
    }

    #[test]
    fn test_huge_server_counts_do_not_overflow() {
        let server: Vec<RangeCount> = serde_json::from_value(json!([
            { "range": "0-100ms", "count": 1e20 },
            { "range": "100-500ms", "count": 1e20 }
        ]))
        .unwrap();
        let buckets = bucket_latency(LatencySource::Server(&server));
        assert_eq!(buckets[0].count, u64::MAX);
        assert_eq!(buckets[0].percentage, 50.0);
    }

    #[test]
    fn test_server_groups_keyed_by_display_name() {
        let groups: Vec<LatencyGroup> = serde_json::from_value(json!([
            { "endpoint_name": "ep-1", "buckets": [{ "range": "0-100ms", "count": 4 }] },
            { "buckets": [{ "range": "1-2s", "count": 1 }] }
        ]))
        .unwrap();
        let grouped = server_latency_by_group(&groups);
        assert_eq!(grouped["ep-1"][0].count, 4);
        assert_eq!(grouped["Unknown"][0].range, "1-2s");
    }

    #[test]
    fn test_records_latency_by_group() {
        let records = vec![
            InferenceRecord {
                project_name: Some("p1".to_string()),
                response_time_ms: Some(20),
                ..Default::default()
            },
            InferenceRecord {
                project_name: Some("p2".to_string()),
                response_time_ms: Some(20_000),
                ..Default::default()
            },
        ];
        let grouped = records_latency_by_group(&records, GroupBy::Project);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["p1"].len(), 7);
        assert_eq!(grouped["p1"][0].count, 1);
        assert_eq!(grouped["p2"][6].count, 1);
    }

    #[test]
    fn test_hour_of_day_always_24() {
        let empty = bucket_hour_of_day(&TimeSeriesPayload::default(), "requests", &utc());
        assert_eq!(empty.len(), 24);
        assert_eq!(empty[0].hour, "00:00");
        assert_eq!(empty[23].hour, "23:00");
        assert!(empty.iter().all(|b| b.count == 0.0));

        let ts: TimeSeriesPayload = serde_json::from_value(json!({
            "interval": "1h",
            "groups": [{ "model_name": "A", "data_points": [
                { "timestamp": "2024-01-01T05:00:00Z", "values": { "requests": 3 } },
                { "timestamp": "2024-01-02T05:00:00Z", "values": { "requests": 4 } },
                { "timestamp": "2024-01-02T06:00:00Z", "values": { "requests": null } }
            ]}]
        }))
        .unwrap();
        let hours = bucket_hour_of_day(&ts, "requests", &utc());
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[5].count, 7.0);
        assert_eq!(hours[6].count, 0.0);
        assert_eq!(hours.iter().map(|b| b.count).sum::<f64>(), 7.0);
    }

    #[test]
    fn test_hour_of_day_by_group() {
        let ts: TimeSeriesPayload = serde_json::from_value(json!({
            "interval": "1h",
            "groups": [
                { "model_name": "A", "data_points": [{ "timestamp": "2024-01-01T05:00:00Z", "values": { "requests": 3 } }] },
                { "model_name": "B", "data_points": [] }
            ]
        }))
        .unwrap();
        let zone = FixedOffset::west_opt(3600).unwrap();
        let grouped = bucket_hour_of_day_by_group(&ts, "requests", &zone);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["A"][4].count, 3.0);
        assert_eq!(grouped["B"].len(), 24);
    }

    #[test]
    fn test_records_hour_of_day() {
        let records: Vec<InferenceRecord> = ["2024-01-01T00:10:00Z", "2024-01-01T00:50:00Z", "bad"]
            .iter()
            .map(|ts| InferenceRecord {
                timestamp: ts.to_string(),
                ..Default::default()
            })
            .collect();
        let hours = records_hour_of_day(&records, &utc());
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[0].count, 2.0);

        let grouped = records_hour_of_day_by_group(&records, GroupBy::User, &utc());
        assert_eq!(grouped["Unknown"][0].count, 2.0);
    }
}
