use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::client::{ChatMessage, MetricsClient};
use crate::record::RequestRecord;
use crate::trace::RetryPolicy;

const PROGRESS_EVERY: usize = 50;

/// Outcome of the request phase: every settled record plus the wall-clock
/// bracket around the whole run, as unix seconds.
#[derive(Clone, Debug)]
pub struct BenchmarkRun {
    pub records: Vec<RequestRecord>,
    pub start_time: f64,
    pub end_time: f64,
}

/// Artificial start delay for the i-th request under the given spacing.
fn start_delay(index: usize, interval: Option<Duration>) -> Duration {
    match interval {
        Some(interval) => interval.mul_f64(index as f64),
        None => Duration::ZERO,
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Launches one request per prompt, pacing starts at the configured rate.
///
/// Every task is spawned up front; only the start is paced, so slow responses
/// pile up in flight rather than throttling submission. Completions are
/// consumed in arrival order. A task that panics or is aborted is logged and
/// excluded; failed requests stay in the result list as failed records.
/// Ctrl-C abandons outstanding requests and returns what has settled.
pub async fn run_benchmark(client: Arc<MetricsClient>, prompts: Vec<String>) -> BenchmarkRun {
    let total = prompts.len();
    let interval = client.config().interval();
    let rate = client.config().request_rate;
    info!(total, rate, "starting request phase");

    let start_time = unix_now();

    let mut join_set = JoinSet::new();
    for (index, prompt) in prompts.into_iter().enumerate() {
        let client = Arc::clone(&client);
        let delay = start_delay(index, interval);
        join_set.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let messages = [ChatMessage::user(prompt)];
            client.send_request(&messages).await
        });
    }
    if interval.is_some() {
        info!(total, "all requests scheduled, waiting for completion");
    }

    let mut records: Vec<RequestRecord> = Vec::with_capacity(total);
    let mut completed = 0usize;
    let mut interrupted = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            biased;
            _ = &mut ctrl_c, if !interrupted => {
                warn!("interrupt received, abandoning in-flight requests");
                join_set.abort_all();
                interrupted = true;
            }
            next = join_set.join_next() => {
                let Some(joined) = next else { break };
                completed += 1;
                match joined {
                    Ok(record) => records.push(record),
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => warn!(error = %err, "request task failed"),
                }
                if completed % PROGRESS_EVERY == 0 || completed == total {
                    let successful = records.iter().filter(|r| r.success).count();
                    info!(completed, total, successful, "progress");
                }
            }
        }
    }

    let successful = records.iter().filter(|r| r.success).count();
    info!(
        total = records.len(),
        successful,
        failed = records.len() - successful,
        "request phase complete"
    );

    BenchmarkRun {
        records,
        start_time,
        end_time: unix_now(),
    }
}

/// Concurrently attaches server-side trace data to every successful record.
/// Each record gets its own policy clock; individual timeouts and failures
/// leave that record's server fields unset and never abort the batch.
pub async fn enrich_all(
    client: Arc<MetricsClient>,
    records: Vec<RequestRecord>,
    policy: RetryPolicy,
) -> Vec<RequestRecord> {
    let successful = records.iter().filter(|r| r.success).count();
    if successful == 0 {
        info!("no successful requests to enrich");
        return records;
    }
    info!(successful, "collecting server metrics");

    let mut out = Vec::with_capacity(records.len());
    let mut join_set = JoinSet::new();
    for record in records {
        if record.success {
            let client = Arc::clone(&client);
            join_set.spawn(async move {
                let mut record = record;
                let enriched = client.enrich_with_server_metrics(&mut record, policy).await;
                (record, enriched)
            });
        } else {
            out.push(record);
        }
    }

    let mut enriched = 0usize;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((record, ok)) => {
                if ok {
                    enriched += 1;
                }
                out.push(record);
            }
            Err(err) => warn!(error = %err, "enrichment task failed"),
        }
    }
    info!(enriched, successful, "server metric collection complete");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchmarkConfig;

    #[test]
    fn start_delays_are_index_over_rate() {
        let interval = Some(Duration::from_millis(100)); // 10 RPS
        assert_eq!(start_delay(0, interval), Duration::ZERO);
        assert_eq!(start_delay(1, interval), Duration::from_millis(100));
        assert_eq!(start_delay(7, interval), Duration::from_millis(700));
        assert_eq!(start_delay(3, None), Duration::ZERO);
    }

    fn config_for(server: &mockito::ServerGuard, rate: f64) -> BenchmarkConfig {
        BenchmarkConfig::try_new(server.url(), server.url(), rate).unwrap()
    }

    #[tokio::test]
    async fn unlimited_rate_runs_all_prompts() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n")
            .expect(5)
            .create_async()
            .await;

        let client = Arc::new(MetricsClient::new(config_for(&server, 0.0)).unwrap());
        let prompts = (0..5).map(|i| format!("prompt {i}")).collect();
        let run = run_benchmark(client, prompts).await;

        assert_eq!(run.records.len(), 5);
        assert!(run.records.iter().all(|r| r.success));
        assert!(run.end_time >= run.start_time);
    }

    #[tokio::test]
    async fn failing_endpoint_does_not_abort_the_batch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_body("internal error")
            .expect(3)
            .create_async()
            .await;

        let client = Arc::new(MetricsClient::new(config_for(&server, 0.0)).unwrap());
        let prompts = (0..3).map(|i| format!("prompt {i}")).collect();
        let run = run_benchmark(client, prompts).await;

        assert_eq!(run.records.len(), 3);
        assert!(run.records.iter().all(|r| !r.success));
        assert!(run
            .records
            .iter()
            .all(|r| r.error_message.contains("500")));
    }

    #[tokio::test]
    async fn paced_run_completes_under_low_rate() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: [DONE]\n\n")
            .expect(3)
            .create_async()
            .await;

        // 50 RPS keeps the pacing path exercised without slowing the test.
        let client = Arc::new(MetricsClient::new(config_for(&server, 50.0)).unwrap());
        let prompts = (0..3).map(|i| format!("prompt {i}")).collect();
        let run = run_benchmark(client, prompts).await;
        assert_eq!(run.records.len(), 3);
    }

    #[tokio::test]
    async fn enrichment_pass_only_touches_successful_records() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Regex("^/api/traces/".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data":[{"spans":[{"operationName":"llm_request","tags":[
                    {"key":"gen_ai.usage.completion_tokens","value":7}
                ]}]}]}"#,
            )
            .create_async()
            .await;

        let client = Arc::new(MetricsClient::new(config_for(&server, 0.0)).unwrap());

        let mut ok = RequestRecord::new("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        ok.success = true;
        let mut failed = RequestRecord::new("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        failed.mark_failed("HTTP 500: boom");

        let policy = RetryPolicy::new(Duration::from_millis(20), Duration::from_secs(2));
        let records = enrich_all(client, vec![ok, failed], policy).await;

        assert_eq!(records.len(), 2);
        let ok = records.iter().find(|r| r.success).unwrap();
        let failed = records.iter().find(|r| !r.success).unwrap();
        assert_eq!(ok.completion_tokens, Some(7));
        assert!(failed.completion_tokens.is_none());
    }
}
