use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::BenchmarkConfig;
use crate::record::RequestRecord;
use crate::trace::{RetryPolicy, SpanMetrics, TraceResponse, Tracer, W3cTracer};

/// One entry of the chat conversation sent to the endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Issues chat-completion requests and measures client-observed timing,
/// then (separately) pulls server-observed timing out of the trace store.
pub struct MetricsClient {
    http: Client,
    config: BenchmarkConfig,
    tracer: Arc<dyn Tracer>,
}

impl MetricsClient {
    pub fn new(config: BenchmarkConfig) -> Result<Self> {
        Self::with_tracer(config, Arc::new(W3cTracer))
    }

    pub fn with_tracer(config: BenchmarkConfig, tracer: Arc<dyn Tracer>) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            http,
            config,
            tracer,
        })
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Sends one request and returns its record. Never fails: transport and
    /// protocol errors become a failed record, and any partially accumulated
    /// timing data from a broken stream is discarded.
    pub async fn send_request(&self, messages: &[ChatMessage]) -> RequestRecord {
        let ctx = self.tracer.new_context();
        let mut record = RequestRecord::new(ctx.trace_id.clone());
        record.send_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs_f64());

        let started = Instant::now();
        match self.issue(messages, &ctx.traceparent(), &mut record, started).await {
            Ok(()) => record.success = true,
            Err(err) => {
                let fresh = RequestRecord {
                    request_id: record.request_id.clone(),
                    trace_id: record.trace_id.clone(),
                    send_time: record.send_time,
                    ..RequestRecord::default()
                };
                record = fresh;
                record.mark_failed(format!("{err:#}"));
            }
        }
        record
    }

    async fn issue(
        &self,
        messages: &[ChatMessage],
        traceparent: &str,
        record: &mut RequestRecord,
        started: Instant,
    ) -> Result<()> {
        let mut body = json!({
            "messages": messages,
            "stream": self.config.stream,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "top_p": self.config.top_p,
        });
        // "auto" defers model selection to the server.
        if self.config.model != "auto" {
            body["model"] = json!(self.config.model);
        }

        let url = self
            .config
            .base_url
            .join("/v1/chat/completions")
            .context("failed to build completions URL")?;

        let mut request = self
            .http
            .post(url)
            .json(&body)
            .header("X-Request-Id", &record.request_id);
        if self.tracer.propagates() {
            request = request.header("traceparent", traceparent);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("HTTP {}: {}", status.as_u16(), text);
        }

        if self.config.stream {
            self.consume_stream(response, record, started).await
        } else {
            self.consume_blocking(response, record, started).await
        }
    }

    async fn consume_stream(
        &self,
        response: Response,
        record: &mut RequestRecord,
        started: Instant,
    ) -> Result<()> {
        let mut stream = response.bytes_stream().eventsource();
        let mut generated = String::new();
        let mut gaps: Vec<f64> = Vec::new();
        let mut previous: Option<Instant> = None;

        while let Some(event) = stream.next().await {
            let event = event.context("event stream broke mid-response")?;
            if event.data == "[DONE]" {
                break;
            }
            // Undecodable fragments are dropped, the request keeps going.
            let chunk: StreamChunk = match serde_json::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(_) => continue,
            };
            let Some(delta) = chunk
                .choices
                .first()
                .and_then(|choice| choice.delta.content.as_deref())
            else {
                continue;
            };
            if delta.is_empty() {
                continue;
            }

            let now = Instant::now();
            match previous {
                None => {
                    record.client_ttft_ms =
                        Some(now.duration_since(started).as_secs_f64() * 1000.0);
                }
                Some(prev) => gaps.push(now.duration_since(prev).as_secs_f64()),
            }
            generated.push_str(delta);
            previous = Some(now);
        }

        record.client_e2e_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        record.generated_text = generated;
        if !gaps.is_empty() {
            let mean_ms = gaps.iter().sum::<f64>() / gaps.len() as f64 * 1000.0;
            // TPOT and ITL both report the mean of the one gap list; the
            // persisted format carries the pair and consumers expect it.
            record.client_tpot_ms = Some(mean_ms);
            record.client_itl_ms = Some(mean_ms);
        }
        record.itl_seconds = gaps;
        Ok(())
    }

    async fn consume_blocking(
        &self,
        response: Response,
        record: &mut RequestRecord,
        started: Instant,
    ) -> Result<()> {
        let payload: ChatCompletion = response.json().await?;
        record.client_e2e_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Some(choice) = payload.choices.first() {
            record.generated_text = choice.message.content.clone().unwrap_or_default();
        }
        Ok(())
    }

    /// Polls the trace store for this record's server span until it shows up
    /// or the policy's max wait elapses. Best effort: returns whether the
    /// record was enriched, never an error.
    pub async fn enrich_with_server_metrics(
        &self,
        record: &mut RequestRecord,
        policy: RetryPolicy,
    ) -> bool {
        let url = match self
            .config
            .trace_url
            .join(&format!("/api/traces/{}", record.trace_id))
        {
            Ok(url) => url,
            Err(err) => {
                debug!(trace_id = %record.trace_id, error = %err, "invalid trace lookup URL");
                return false;
            }
        };

        let deadline = Instant::now() + policy.max_wait;
        loop {
            match self.fetch_span_metrics(url.clone()).await {
                Ok(Some(span)) => {
                    record.apply_server_metrics(span);
                    return true;
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(trace_id = %record.trace_id, error = %err, "trace lookup attempt failed");
                }
            }
            if Instant::now() + policy.poll_interval > deadline {
                debug!(trace_id = %record.trace_id, "gave up waiting for server span");
                return false;
            }
            tokio::time::sleep(policy.poll_interval).await;
        }
    }

    async fn fetch_span_metrics(&self, url: Url) -> Result<Option<SpanMetrics>> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let trace: TraceResponse = response.json().await?;
        Ok(SpanMetrics::from_trace_response(&trace))
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}
