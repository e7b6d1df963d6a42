use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::record::RequestRecord;
use crate::summary::BenchmarkSummary;

const FORMAT_VERSION: &str = "1.0";

/// One request in the persisted result layout. A faithful projection of
/// `RequestRecord`: converting there and back loses nothing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordDocument {
    pub request_id: String,
    pub trace_id: String,
    pub success: bool,
    pub error_message: String,
    pub timestamp: Option<f64>,
    pub send_time_iso: Option<String>,
    pub client_metrics: ClientMetricsDoc,
    pub server_metrics: ServerMetricsDoc,
    pub tokens: TokensDoc,
    pub request_params: RequestParamsDoc,
    pub content: ContentDoc,
    pub detailed_data: DetailedDataDoc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientMetricsDoc {
    pub e2e_latency_ms: f64,
    pub ttft_ms: Option<f64>,
    pub tpot_ms: Option<f64>,
    pub itl_ms: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerMetricsDoc {
    pub queue_time_ms: Option<f64>,
    pub prefill_time_ms: Option<f64>,
    pub decode_time_ms: Option<f64>,
    pub inference_time_ms: Option<f64>,
    pub e2e_time_ms: Option<f64>,
    pub ttft_ms: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokensDoc {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestParamsDoc {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentDoc {
    pub generated_text: String,
    pub text_length: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetailedDataDoc {
    /// Ground-truth gap list, seconds.
    pub itl_list_seconds: Vec<f64>,
    /// The same list, milliseconds: value_ms == value_s * 1000 exactly.
    pub itl_list_ms: Vec<f64>,
}

impl From<&RequestRecord> for RecordDocument {
    fn from(record: &RequestRecord) -> Self {
        Self {
            request_id: record.request_id.clone(),
            trace_id: record.trace_id.clone(),
            success: record.success,
            error_message: record.error_message.clone(),
            timestamp: record.send_time,
            send_time_iso: record.send_time_iso(),
            client_metrics: ClientMetricsDoc {
                e2e_latency_ms: record.client_e2e_latency_ms,
                ttft_ms: record.client_ttft_ms,
                tpot_ms: record.client_tpot_ms,
                itl_ms: record.client_itl_ms,
            },
            server_metrics: ServerMetricsDoc {
                queue_time_ms: record.server_queue_time_ms,
                prefill_time_ms: record.server_prefill_time_ms,
                decode_time_ms: record.server_decode_time_ms,
                inference_time_ms: record.server_inference_time_ms,
                e2e_time_ms: record.server_e2e_time_ms,
                ttft_ms: record.server_ttft_ms,
            },
            tokens: TokensDoc {
                prompt_tokens: record.prompt_tokens,
                completion_tokens: record.completion_tokens,
            },
            request_params: RequestParamsDoc {
                model: record.model_name.clone(),
                temperature: record.temperature,
                top_p: record.top_p,
                max_tokens: record.max_tokens,
            },
            content: ContentDoc {
                text_length: record.generated_text.chars().count(),
                generated_text: record.generated_text.clone(),
            },
            detailed_data: DetailedDataDoc {
                itl_list_ms: record.itl_list_ms(),
                itl_list_seconds: record.itl_seconds.clone(),
            },
        }
    }
}

impl RecordDocument {
    /// Rebuilds the in-memory record. The seconds-denominated gap list is
    /// the ground truth; the ms list is derived on the way out.
    pub fn into_record(self) -> RequestRecord {
        RequestRecord {
            request_id: self.request_id,
            trace_id: self.trace_id,
            success: self.success,
            error_message: self.error_message,
            send_time: self.timestamp,
            client_e2e_latency_ms: self.client_metrics.e2e_latency_ms,
            client_ttft_ms: self.client_metrics.ttft_ms,
            client_tpot_ms: self.client_metrics.tpot_ms,
            client_itl_ms: self.client_metrics.itl_ms,
            server_queue_time_ms: self.server_metrics.queue_time_ms,
            server_prefill_time_ms: self.server_metrics.prefill_time_ms,
            server_decode_time_ms: self.server_metrics.decode_time_ms,
            server_inference_time_ms: self.server_metrics.inference_time_ms,
            server_e2e_time_ms: self.server_metrics.e2e_time_ms,
            server_ttft_ms: self.server_metrics.ttft_ms,
            prompt_tokens: self.tokens.prompt_tokens,
            completion_tokens: self.tokens.completion_tokens,
            model_name: self.request_params.model,
            temperature: self.request_params.temperature,
            top_p: self.request_params.top_p,
            max_tokens: self.request_params.max_tokens,
            generated_text: self.content.generated_text,
            itl_seconds: self.detailed_data.itl_list_seconds,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub export_time: String,
    pub format_version: String,
}

/// Top-level persisted result: a metadata block plus one document per
/// submitted request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportDocument {
    pub metadata: ExportMetadata,
    pub requests: Vec<RecordDocument>,
}

impl ExportDocument {
    pub fn new(records: &[RequestRecord]) -> Self {
        let successful = records.iter().filter(|r| r.success).count();
        Self {
            metadata: ExportMetadata {
                total_requests: records.len(),
                successful_requests: successful,
                failed_requests: records.len() - successful,
                export_time: chrono::Local::now().to_rfc3339(),
                format_version: FORMAT_VERSION.to_string(),
            },
            requests: records.iter().map(RecordDocument::from).collect(),
        }
    }
}

pub fn write_json(records: &[RequestRecord], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let document = ExportDocument::new(records);
    let json = serde_json::to_string_pretty(&document).context("failed to serialize results")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

const CSV_HEADER: &[&str] = &[
    "request_id",
    "trace_id",
    "success",
    "error_message",
    "timestamp",
    "send_time_iso",
    "client_e2e_latency_ms",
    "client_ttft_ms",
    "client_tpot_ms",
    "client_itl_ms",
    "server_queue_time_ms",
    "server_prefill_time_ms",
    "server_decode_time_ms",
    "server_inference_time_ms",
    "server_e2e_time_ms",
    "server_ttft_ms",
    "prompt_tokens",
    "completion_tokens",
    "param_model",
    "param_temperature",
    "param_top_p",
    "param_max_tokens",
    "generated_text",
    "text_length",
    "itl_list_ms",
    "itl_count",
];

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn opt_f64(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn opt_u64(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Flattens records into CSV, one row per request. The gap list is
/// serialized as a stringified ms list plus a count column.
pub fn records_to_csv(records: &[RequestRecord]) -> String {
    let mut out = CSV_HEADER.join(",") + "\n";
    for record in records {
        let itl_ms = record.itl_list_ms();
        let itl_repr = format!(
            "[{}]",
            itl_ms
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let row = [
            record.request_id.clone(),
            record.trace_id.clone(),
            record.success.to_string(),
            record.error_message.clone(),
            opt_f64(record.send_time),
            record.send_time_iso().unwrap_or_default(),
            record.client_e2e_latency_ms.to_string(),
            opt_f64(record.client_ttft_ms),
            opt_f64(record.client_tpot_ms),
            opt_f64(record.client_itl_ms),
            opt_f64(record.server_queue_time_ms),
            opt_f64(record.server_prefill_time_ms),
            opt_f64(record.server_decode_time_ms),
            opt_f64(record.server_inference_time_ms),
            opt_f64(record.server_e2e_time_ms),
            opt_f64(record.server_ttft_ms),
            opt_u64(record.prompt_tokens),
            opt_u64(record.completion_tokens),
            record.model_name.clone().unwrap_or_default(),
            opt_f64(record.temperature),
            opt_f64(record.top_p),
            opt_u64(record.max_tokens),
            record.generated_text.clone(),
            record.generated_text.chars().count().to_string(),
            itl_repr,
            itl_ms.len().to_string(),
        ];
        let escaped: Vec<String> = row.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

pub fn write_csv(records: &[RequestRecord], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, records_to_csv(records))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Writes the summary as standalone JSON next to the per-request data.
pub fn write_summary_json(summary: &BenchmarkSummary, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(summary).context("failed to serialize summary")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
