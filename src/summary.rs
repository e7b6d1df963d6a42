use std::fmt::Write as _;

use serde::Serialize;

use crate::record::RequestRecord;

/// Distributional statistics for one latency dimension, milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricStats {
    pub values: Vec<f64>,
    pub mean: f64,
    pub median: f64,
    pub p99: f64,
}

impl MetricStats {
    /// Empty input produces all-zero statistics, not an error.
    pub fn from_values(values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = percentile(&sorted, 50.0);
        let p99 = percentile(&sorted, 99.0);
        Self {
            values,
            mean,
            median,
            p99,
        }
    }
}

/// Linear-interpolation percentile over an ascending slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => return 0.0,
        1 => return sorted[0],
        _ => {}
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let weight = rank - lo as f64;
    sorted[lo] * (1.0 - weight) + sorted[hi] * weight
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct BenchmarkSummary {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    /// Caller-supplied wall-clock bracket, seconds.
    pub benchmark_duration: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub request_throughput: f64,
    pub output_token_throughput: f64,
    pub total_token_throughput: f64,
    pub ttft: MetricStats,
    pub tpot: MetricStats,
    pub itl: MetricStats,
    pub queue_time: MetricStats,
}

/// Reduces a set of records into a benchmark summary. Pure: same records and
/// time bracket always produce the same summary. Record order is irrelevant.
pub fn summarize(records: &[RequestRecord], start_time: f64, end_time: f64) -> BenchmarkSummary {
    let mut summary = BenchmarkSummary {
        total_requests: records.len(),
        successful_requests: records.iter().filter(|r| r.success).count(),
        benchmark_duration: end_time - start_time,
        ..BenchmarkSummary::default()
    };
    summary.failed_requests = summary.total_requests - summary.successful_requests;

    let successful: Vec<&RequestRecord> = records.iter().filter(|r| r.success).collect();
    if successful.is_empty() {
        return summary;
    }

    summary.total_input_tokens = successful.iter().filter_map(|r| r.prompt_tokens).sum();
    summary.total_output_tokens = successful.iter().filter_map(|r| r.completion_tokens).sum();

    if summary.benchmark_duration > 0.0 {
        let duration = summary.benchmark_duration;
        summary.request_throughput = summary.successful_requests as f64 / duration;
        summary.output_token_throughput = summary.total_output_tokens as f64 / duration;
        summary.total_token_throughput =
            (summary.total_input_tokens + summary.total_output_tokens) as f64 / duration;
    }

    let mut ttft = Vec::new();
    let mut tpot = Vec::new();
    let mut itl = Vec::new();
    let mut queue = Vec::new();
    for record in &successful {
        // Client TTFT preferred, server value as fallback.
        if let Some(value) = record.client_ttft_ms.or(record.server_ttft_ms) {
            ttft.push(value);
        }
        if let Some(value) = record.client_tpot_ms {
            tpot.push(value);
        }
        // ITL flattens every record's full gap list, seconds to ms.
        itl.extend(record.itl_seconds.iter().map(|s| s * 1000.0));
        if let Some(value) = record.server_queue_time_ms {
            queue.push(value);
        }
    }

    summary.ttft = MetricStats::from_values(ttft);
    summary.tpot = MetricStats::from_values(tpot);
    summary.itl = MetricStats::from_values(itl);
    summary.queue_time = MetricStats::from_values(queue);
    summary
}

fn section(out: &mut String, title: &str, label: &str, stats: &MetricStats) {
    if stats.values.is_empty() {
        return;
    }
    let pad = 50usize.saturating_sub(title.len());
    let left = pad / 2;
    let _ = writeln!(
        out,
        "{}{}{}",
        "-".repeat(left),
        title,
        "-".repeat(pad - left)
    );
    let _ = writeln!(out, "{:<41}{:<10.2}", format!("Mean {} (ms):", label), stats.mean);
    let _ = writeln!(out, "{:<41}{:<10.2}", format!("Median {} (ms):", label), stats.median);
    let _ = writeln!(out, "{:<41}{:<10.2}", format!("P99 {} (ms):", label), stats.p99);
}

/// Fixed-width report table for terminal output.
pub fn format_summary(summary: &BenchmarkSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(50));
    let _ = writeln!(out, "{:^50}", "Serving Benchmark Result");
    let _ = writeln!(out, "{}", "=".repeat(50));
    let _ = writeln!(out, "{:<41}{:<10}", "Successful requests:", summary.successful_requests);
    let _ = writeln!(out, "{:<41}{:<10}", "Failed requests:", summary.failed_requests);
    let _ = writeln!(out, "{:<41}{:<10.2}", "Benchmark duration (s):", summary.benchmark_duration);
    let _ = writeln!(out, "{:<41}{:<10}", "Total input tokens:", summary.total_input_tokens);
    let _ = writeln!(out, "{:<41}{:<10}", "Total generated tokens:", summary.total_output_tokens);
    let _ = writeln!(out, "{:<41}{:<10.2}", "Request throughput (req/s):", summary.request_throughput);
    let _ = writeln!(out, "{:<41}{:<10.2}", "Output token throughput (tok/s):", summary.output_token_throughput);
    let _ = writeln!(out, "{:<41}{:<10.2}", "Total token throughput (tok/s):", summary.total_token_throughput);
    section(&mut out, "Time to First Token", "TTFT", &summary.ttft);
    section(&mut out, "Time per Output Token (excl. 1st token)", "TPOT", &summary.tpot);
    section(&mut out, "Inter-token Latency", "ITL", &summary.itl);
    section(&mut out, "Queue Time", "Queue Time", &summary.queue_time);
    let _ = write!(out, "{}", "=".repeat(50));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn successful_record(completion_tokens: u64) -> RequestRecord {
        let mut record = RequestRecord::new("0123456789abcdef0123456789abcdef");
        record.success = true;
        record.client_e2e_latency_ms = 1000.0;
        record.completion_tokens = Some(completion_tokens);
        record
    }

    #[test]
    fn empty_records_yield_all_zero_summary() {
        let summary = summarize(&[], 0.0, 10.0);
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.successful_requests, 0);
        assert_eq!(summary.request_throughput, 0.0);
        assert_eq!(summary.output_token_throughput, 0.0);
        assert_eq!(summary.ttft, MetricStats::default());
    }

    #[test]
    fn output_token_throughput_scenario() {
        let records: Vec<RequestRecord> =
            [10, 20, 30, 40, 50].map(successful_record).into_iter().collect();
        let summary = summarize(&records, 100.0, 110.0);
        assert_eq!(summary.total_output_tokens, 150);
        assert_eq!(summary.output_token_throughput, 15.0);
        assert_eq!(summary.request_throughput, 0.5);
    }

    #[test]
    fn non_positive_duration_zeroes_throughputs() {
        let records = vec![successful_record(10)];
        let summary = summarize(&records, 10.0, 10.0);
        assert_eq!(summary.request_throughput, 0.0);
        assert_eq!(summary.output_token_throughput, 0.0);
        assert_eq!(summary.total_token_throughput, 0.0);
    }

    #[test]
    fn itl_is_flattened_from_gap_lists_in_ms() {
        let mut record = successful_record(4);
        record.itl_seconds = vec![0.05, 0.07, 0.03];
        record.client_tpot_ms = Some(50.0);
        record.client_itl_ms = Some(50.0);

        let summary = summarize(&[record], 0.0, 1.0);
        assert_eq!(summary.itl.values, vec![50.0, 70.0, 30.0]);
        assert!((summary.itl.mean - 50.0).abs() < 1e-9);
        assert_eq!(summary.tpot.values, vec![50.0]);
    }

    #[test]
    fn ttft_falls_back_to_server_value() {
        let mut client_side = successful_record(1);
        client_side.client_ttft_ms = Some(100.0);
        let mut server_side = successful_record(1);
        server_side.server_ttft_ms = Some(200.0);
        let mut neither = successful_record(1);
        neither.client_ttft_ms = None;
        neither.server_ttft_ms = None;

        let summary = summarize(&[client_side, server_side, neither], 0.0, 1.0);
        assert_eq!(summary.ttft.values, vec![100.0, 200.0]);
    }

    #[test]
    fn failed_and_unenriched_records_contribute_no_tokens() {
        let mut failed = RequestRecord::new("f".repeat(32));
        failed.mark_failed("HTTP 500: boom");
        let mut unenriched = successful_record(5);
        unenriched.completion_tokens = None;
        unenriched.prompt_tokens = None;

        let summary = summarize(&[failed, unenriched], 0.0, 1.0);
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.successful_requests, 1);
        assert_eq!(summary.failed_requests, 1);
        assert_eq!(summary.total_input_tokens, 0);
        assert_eq!(summary.total_output_tokens, 0);
    }

    #[test]
    fn summarize_is_idempotent() {
        let mut record = successful_record(10);
        record.client_ttft_ms = Some(120.0);
        record.itl_seconds = vec![0.01, 0.02];
        let records = vec![record];

        let first = summarize(&records, 0.0, 5.0);
        let second = summarize(&records, 0.0, 5.0);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let sorted = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&sorted, 50.0), 25.0);
        assert_eq!(percentile(&sorted, 0.0), 10.0);
        assert_eq!(percentile(&sorted, 100.0), 40.0);
        assert!((percentile(&sorted, 99.0) - 39.7).abs() < 1e-9);
    }

    #[test]
    fn stats_over_single_value() {
        let stats = MetricStats::from_values(vec![42.0]);
        assert_eq!(stats.mean, 42.0);
        assert_eq!(stats.median, 42.0);
        assert_eq!(stats.p99, 42.0);
    }

    #[test]
    fn table_sections_render_only_when_populated() {
        let mut record = successful_record(10);
        record.client_ttft_ms = Some(120.0);
        let summary = summarize(&[record], 0.0, 5.0);
        let table = format_summary(&summary);
        assert!(table.contains("Serving Benchmark Result"));
        assert!(table.contains("Time to First Token"));
        assert!(!table.contains("Queue Time"));
    }
}
