use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Url;

use crate::trace::RetryPolicy;

/// Settings for one benchmark run against a chat-completions endpoint.
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub base_url: Url,
    pub trace_url: Url,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub top_p: f64,
    pub stream: bool,
    /// Target request submission rate in requests per second. Zero or
    /// negative disables pacing and launches every request immediately.
    pub request_rate: f64,
    pub request_timeout: Duration,
    pub enrichment: RetryPolicy,
}

impl BenchmarkConfig {
    pub fn try_new(
        base_url: impl AsRef<str>,
        trace_url: impl AsRef<str>,
        request_rate: f64,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())
            .with_context(|| format!("invalid serving endpoint URL: {}", base_url.as_ref()))?;
        let trace_url = Url::parse(trace_url.as_ref())
            .with_context(|| format!("invalid trace store URL: {}", trace_url.as_ref()))?;

        if !request_rate.is_finite() {
            return Err(anyhow!("request_rate must be a finite number"));
        }

        Ok(Self {
            base_url,
            trace_url,
            model: "auto".to_string(),
            temperature: 0.7,
            max_tokens: 150,
            top_p: 1.0,
            stream: true,
            request_rate,
            request_timeout: Duration::from_secs(600),
            enrichment: RetryPolicy::default(),
        })
    }

    /// Spacing between consecutive request starts, or `None` when pacing
    /// is disabled.
    pub fn interval(&self) -> Option<Duration> {
        if self.request_rate > 0.0 {
            Some(Duration::from_secs_f64(1.0 / self.request_rate))
        } else {
            None
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_sampling(mut self, temperature: f64, top_p: f64) -> Result<Self> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(anyhow!("temperature must be within [0.0, 2.0]"));
        }
        if !(0.0..=1.0).contains(&top_p) {
            return Err(anyhow!("top_p must be within [0.0, 1.0]"));
        }
        self.temperature = temperature;
        self.top_p = top_p;
        Ok(self)
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Result<Self> {
        if max_tokens == 0 {
            return Err(anyhow!("max_tokens must be greater than zero"));
        }
        self.max_tokens = max_tokens;
        Ok(self)
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        if !request_timeout.is_zero() {
            self.request_timeout = request_timeout;
        }
        self
    }

    pub fn with_enrichment(mut self, policy: RetryPolicy) -> Self {
        self.enrichment = policy;
        self
    }
}
