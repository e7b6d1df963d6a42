use chrono::{Local, TimeZone};
use uuid::Uuid;

use crate::trace::SpanMetrics;

/// Full timing and outcome state for one submitted request.
///
/// Client-observed fields are written once, while the request is in flight.
/// Server-observed fields stay `None` until the enrichment pass finds the
/// matching trace, and remain `None` forever if it never does.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestRecord {
    pub request_id: String,
    pub trace_id: String,
    pub success: bool,
    pub error_message: String,
    /// Wall-clock send time as unix seconds.
    pub send_time: Option<f64>,

    // Client-observed timing, milliseconds.
    pub client_e2e_latency_ms: f64,
    pub client_ttft_ms: Option<f64>,
    pub client_tpot_ms: Option<f64>,
    pub client_itl_ms: Option<f64>,

    // Server-observed timing, milliseconds, from the trace store.
    pub server_queue_time_ms: Option<f64>,
    pub server_prefill_time_ms: Option<f64>,
    pub server_decode_time_ms: Option<f64>,
    pub server_inference_time_ms: Option<f64>,
    pub server_e2e_time_ms: Option<f64>,
    pub server_ttft_ms: Option<f64>,

    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,

    pub model_name: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,

    pub generated_text: String,
    /// Ordered raw gaps between consecutive token arrivals, in seconds.
    /// Ground truth for any token-timeline reconstruction.
    pub itl_seconds: Vec<f64>,
}

impl RequestRecord {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            trace_id: trace_id.into(),
            ..Self::default()
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.success = false;
        self.error_message = error.into();
    }

    /// Local-time rendering of `send_time`, `YYYY-MM-DD HH:MM:SS`.
    pub fn send_time_iso(&self) -> Option<String> {
        let secs = self.send_time?;
        let nanos = (((secs - secs.trunc()) * 1e9) as u32).min(999_999_999);
        Local
            .timestamp_opt(secs.trunc() as i64, nanos)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    /// The gap list converted to milliseconds.
    pub fn itl_list_ms(&self) -> Vec<f64> {
        self.itl_seconds.iter().map(|s| s * 1000.0).collect()
    }

    /// Writes server-side trace data into the record. Called at most once,
    /// by the enrichment pass.
    pub fn apply_server_metrics(&mut self, span: SpanMetrics) {
        self.server_queue_time_ms = span.queue_time_ms;
        self.server_prefill_time_ms = span.prefill_time_ms;
        self.server_decode_time_ms = span.decode_time_ms;
        self.server_inference_time_ms = span.inference_time_ms;
        self.server_e2e_time_ms = span.e2e_time_ms;
        self.server_ttft_ms = span.ttft_ms;
        self.prompt_tokens = span.prompt_tokens;
        self.completion_tokens = span.completion_tokens;
        self.model_name = span.model;
        self.temperature = span.temperature;
        self.top_p = span.top_p;
        self.max_tokens = span.max_tokens;
    }
}
