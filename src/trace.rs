use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

/// Operation name of the serving backend's top-level request span.
pub const LLM_REQUEST_OPERATION: &str = "llm_request";

const TAG_QUEUE: &str = "gen_ai.latency.time_in_queue";
const TAG_PREFILL: &str = "gen_ai.latency.time_in_model_prefill";
const TAG_DECODE: &str = "gen_ai.latency.time_in_model_decode";
const TAG_INFERENCE: &str = "gen_ai.latency.time_in_model_inference";
const TAG_E2E: &str = "gen_ai.latency.e2e";
const TAG_TTFT: &str = "gen_ai.latency.time_to_first_token";
const TAG_PROMPT_TOKENS: &str = "gen_ai.usage.prompt_tokens";
const TAG_COMPLETION_TOKENS: &str = "gen_ai.usage.completion_tokens";
const TAG_MODEL: &str = "gen_ai.response.model";
const TAG_TEMPERATURE: &str = "gen_ai.request.temperature";
const TAG_TOP_P: &str = "gen_ai.request.top_p";
const TAG_MAX_TOKENS: &str = "gen_ai.request.max_tokens";

/// W3C trace context attached to one outbound request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceContext {
    pub fn generate() -> Self {
        let trace_id = Uuid::new_v4().simple().to_string();
        let span_id = trace_id[..16].to_string();
        Self { trace_id, span_id }
    }

    /// `traceparent` header value, version 00, sampled.
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }
}

/// Source of per-request trace contexts. Injected into the client so a run
/// without a reachable trace pipeline degrades to the no-op variant instead
/// of failing at construction.
pub trait Tracer: Send + Sync {
    fn new_context(&self) -> TraceContext;

    /// Whether contexts from this tracer are propagated to the server as a
    /// `traceparent` header.
    fn propagates(&self) -> bool {
        true
    }
}

/// Active tracer: fresh random W3C ids, propagated on every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct W3cTracer;

impl Tracer for W3cTracer {
    fn new_context(&self) -> TraceContext {
        TraceContext::generate()
    }
}

/// Fallback tracer for runs without a trace pipeline. Records still get
/// unique ids, but nothing is propagated, so enrichment finds no spans.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn new_context(&self) -> TraceContext {
        TraceContext::generate()
    }

    fn propagates(&self) -> bool {
        false
    }
}

/// Bounded polling policy for the trace-store lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            poll_interval,
            max_wait,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(20),
        }
    }
}

/// Jaeger-shaped trace query response: traces, spans, tag bags.
#[derive(Debug, Deserialize)]
pub struct TraceResponse {
    #[serde(default)]
    pub data: Vec<TraceData>,
}

#[derive(Debug, Deserialize)]
pub struct TraceData {
    #[serde(default)]
    pub spans: Vec<TraceSpan>,
}

#[derive(Debug, Deserialize)]
pub struct TraceSpan {
    #[serde(rename = "operationName", default)]
    pub operation_name: String,
    #[serde(default)]
    pub tags: Vec<SpanTag>,
}

#[derive(Debug, Deserialize)]
pub struct SpanTag {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

/// Server-observed metrics extracted from the `llm_request` span.
///
/// Latencies arrive as seconds and are stored in milliseconds. Every field
/// is optional: a tag that is missing or fails to parse is absent, never an
/// error.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpanMetrics {
    pub queue_time_ms: Option<f64>,
    pub prefill_time_ms: Option<f64>,
    pub decode_time_ms: Option<f64>,
    pub inference_time_ms: Option<f64>,
    pub e2e_time_ms: Option<f64>,
    pub ttft_ms: Option<f64>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl SpanMetrics {
    /// Locates the serving span in a trace query response and reads its
    /// tag set. `None` when no trace contains an `llm_request` span yet.
    pub fn from_trace_response(response: &TraceResponse) -> Option<Self> {
        let span = response
            .data
            .iter()
            .flat_map(|trace| trace.spans.iter())
            .find(|span| span.operation_name == LLM_REQUEST_OPERATION)?;

        let tag = |key: &str| span.tags.iter().find(|t| t.key == key).map(|t| &t.value);

        Some(Self {
            queue_time_ms: tag(TAG_QUEUE).and_then(seconds_to_ms),
            prefill_time_ms: tag(TAG_PREFILL).and_then(seconds_to_ms),
            decode_time_ms: tag(TAG_DECODE).and_then(seconds_to_ms),
            inference_time_ms: tag(TAG_INFERENCE).and_then(seconds_to_ms),
            e2e_time_ms: tag(TAG_E2E).and_then(seconds_to_ms),
            ttft_ms: tag(TAG_TTFT).and_then(seconds_to_ms),
            prompt_tokens: tag(TAG_PROMPT_TOKENS).and_then(as_u64),
            completion_tokens: tag(TAG_COMPLETION_TOKENS).and_then(as_u64),
            model: tag(TAG_MODEL).and_then(as_string),
            temperature: tag(TAG_TEMPERATURE).and_then(as_f64),
            top_p: tag(TAG_TOP_P).and_then(as_f64),
            max_tokens: tag(TAG_MAX_TOKENS).and_then(as_u64),
        })
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn seconds_to_ms(value: &Value) -> Option<f64> {
    as_f64(value).map(|s| s * 1000.0)
}
