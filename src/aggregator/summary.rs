use crate::aggregator::types::{InferenceRecord, MetricLeaf, SummaryPayload, SummaryStats, TimeRange};

fn leaf(value: &Option<MetricLeaf>) -> f64 {
    value.as_ref().and_then(|l| l.value).unwrap_or(0.0)
}

/// Requests per hour over the window. The divisor is floored at one hour, so
/// windows shorter than an hour report their total rather than a projection.
fn requests_per_hour(total_requests: f64, range: &TimeRange) -> f64 {
    total_requests / range.hours().max(1.0)
}

/// Summary cards from backend leaves. Missing leaves read as zero.
pub fn compute_summary(payload: &SummaryPayload, range: &TimeRange) -> SummaryStats {
    let total_requests = leaf(&payload.total_requests);
    let success_rate = leaf(&payload.success_rate);

    SummaryStats {
        total_requests,
        success_rate,
        failure_rate: 100.0 - success_rate,
        avg_latency: leaf(&payload.avg_latency),
        p95_latency: leaf(&payload.p95_latency),
        p99_latency: leaf(&payload.p99_latency),
        total_cost: leaf(&payload.total_cost),
        total_tokens: leaf(&payload.total_tokens),
        ttft_avg: leaf(&payload.ttft_avg),
        ttft_p95: leaf(&payload.ttft_p95),
        requests_per_hour: requests_per_hour(total_requests, range),
    }
}

/// Nearest-rank percentile over an ascending slice. Empty input yields 0.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Summary cards computed client-side from raw inference records.
/// Records without a response time are left out of the latency figures only.
pub fn summarize_records(records: &[InferenceRecord], range: &TimeRange) -> SummaryStats {
    let total_requests = records.len() as f64;
    let successes = records.iter().filter(|r| r.succeeded()).count() as f64;
    let success_rate = if total_requests > 0.0 {
        successes / total_requests * 100.0
    } else {
        0.0
    };

    let mut latencies: Vec<f64> = records
        .iter()
        .filter_map(|r| r.response_time_ms)
        .map(|ms| ms as f64)
        .collect();
    latencies.sort_by(|a, b| a.total_cmp(b));
    let avg_latency = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<f64>() / latencies.len() as f64
    };

    SummaryStats {
        total_requests,
        success_rate,
        failure_rate: 100.0 - success_rate,
        avg_latency,
        p95_latency: percentile(&latencies, 95.0),
        p99_latency: percentile(&latencies, 99.0),
        total_cost: records.iter().filter_map(|r| r.cost).sum(),
        total_tokens: records.iter().map(|r| r.total_tokens() as f64).sum(),
        ttft_avg: 0.0,
        ttft_p95: 0.0,
        requests_per_hour: requests_per_hour(total_requests, range),
    }
}
