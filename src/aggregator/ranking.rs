use crate::aggregator::types::{GroupBy, InferenceRecord, RankedEntity, TopEntitiesPayload};
use std::collections::HashMap;

/// Length of every top-N list.
pub const TOP_N: usize = 5;

fn rank(entries: Vec<(String, u64)>, total_requests: f64) -> Vec<RankedEntity> {
    let mut entries = entries;
    // sort_by is stable: ties keep input order
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.truncate(TOP_N);
    entries
        .into_iter()
        .map(|(name, count)| RankedEntity {
            percentage: if total_requests > 0.0 {
                count as f64 / total_requests * 100.0
            } else {
                0.0
            },
            name,
            count,
        })
        .collect()
}

/// Top entities from a backend grouping, by `metrics.total_requests`.
pub fn rank_top_entities(payload: &TopEntitiesPayload, total_requests: f64) -> Vec<RankedEntity> {
    let entries = payload
        .groups
        .iter()
        .map(|group| {
            let count = group
                .metrics
                .total_requests
                .as_ref()
                .and_then(|leaf| leaf.value)
                .filter(|v| *v > 0.0)
                .map(|v| v.round() as u64)
                .unwrap_or(0);
            (group.labels.display_name().to_string(), count)
        })
        .collect();
    rank(entries, total_requests)
}

/// Top entities counted from raw records, first-seen order breaking ties.
pub fn rank_records(
    records: &[InferenceRecord],
    dimension: GroupBy,
    total_requests: f64,
) -> Vec<RankedEntity> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut entries: Vec<(String, u64)> = Vec::new();
    for record in records {
        let name = record.dimension(dimension);
        match index.get(name) {
            Some(&i) => entries[i].1 += 1,
            None => {
                index.insert(name, entries.len());
                entries.push((name.to_string(), 1));
            }
        }
    }
    rank(entries, total_requests)
}
