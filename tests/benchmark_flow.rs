use std::sync::Arc;
use std::time::Duration;

use tracebench::{
    enrich_all, format_summary, run_benchmark, summarize, BenchmarkConfig, MetricsClient,
    RecordDocument, RetryPolicy,
};

const SSE_BODY: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"The\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\" answer\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\".\"}}]}\n\n",
    "data: [DONE]\n\n",
);

const TRACE_BODY: &str = r#"{"data":[{"spans":[{"operationName":"llm_request","tags":[
    {"key":"gen_ai.latency.time_in_queue","value":0.002},
    {"key":"gen_ai.latency.e2e","value":0.9},
    {"key":"gen_ai.usage.prompt_tokens","value":10},
    {"key":"gen_ai.usage.completion_tokens","value":25},
    {"key":"gen_ai.response.model","value":"qwen2-7b"}
]}]}]}"#;

#[tokio::test]
async fn paced_run_enriches_and_summarizes() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_BODY)
        .expect(4)
        .create_async()
        .await;
    server
        .mock("GET", mockito::Matcher::Regex("^/api/traces/[0-9a-f]{32}$".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(TRACE_BODY)
        .expect(4)
        .create_async()
        .await;

    let policy = RetryPolicy::new(Duration::from_millis(10), Duration::from_secs(2));
    let config = BenchmarkConfig::try_new(server.url(), server.url(), 25.0)
        .unwrap()
        .with_enrichment(policy);
    let client = Arc::new(MetricsClient::new(config).unwrap());

    let prompts = (0..4).map(|i| format!("question {i}")).collect();
    let run = run_benchmark(Arc::clone(&client), prompts).await;
    assert_eq!(run.records.len(), 4);
    assert!(run.records.iter().all(|r| r.success));
    assert!(run
        .records
        .iter()
        .all(|r| r.generated_text == "The answer."));

    let records = enrich_all(client, run.records, policy).await;
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.prompt_tokens == Some(10)));
    assert!(records.iter().all(|r| r.completion_tokens == Some(25)));
    assert!(records.iter().all(|r| r.server_queue_time_ms == Some(2.0)));

    let summary = summarize(&records, run.start_time, run.end_time);
    assert_eq!(summary.total_requests, 4);
    assert_eq!(summary.successful_requests, 4);
    assert_eq!(summary.failed_requests, 0);
    assert_eq!(summary.total_input_tokens, 40);
    assert_eq!(summary.total_output_tokens, 100);
    assert_eq!(summary.ttft.values.len(), 4);
    // Each request streams three tokens, so two gaps apiece.
    assert_eq!(summary.itl.values.len(), 8);
    assert_eq!(summary.queue_time.values.len(), 4);

    let table = format_summary(&summary);
    assert!(table.contains("Serving Benchmark Result"));
    assert!(table.contains("Queue Time"));

    // The persisted form survives a round trip for every record.
    for record in &records {
        let document = RecordDocument::from(record);
        let json = serde_json::to_string(&document).unwrap();
        let parsed: RecordDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.clone().into_record(), *record);
        assert_eq!(
            parsed.detailed_data.itl_list_ms,
            record
                .itl_seconds
                .iter()
                .map(|s| s * 1000.0)
                .collect::<Vec<_>>()
        );
    }
}

#[tokio::test]
async fn enrichment_timeout_keeps_records_successful() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_BODY)
        .expect(2)
        .create_async()
        .await;
    // Trace store never has the span.
    server
        .mock("GET", mockito::Matcher::Regex("^/api/traces/".to_string()))
        .with_status(404)
        .with_body("trace not found")
        .create_async()
        .await;

    let policy = RetryPolicy::new(Duration::from_millis(20), Duration::from_millis(100));
    let config = BenchmarkConfig::try_new(server.url(), server.url(), 0.0)
        .unwrap()
        .with_enrichment(policy);
    let client = Arc::new(MetricsClient::new(config).unwrap());

    let run = run_benchmark(Arc::clone(&client), vec!["a".into(), "b".into()]).await;
    let records = enrich_all(client, run.records, policy).await;

    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.success));
    assert!(records.iter().all(|r| r.prompt_tokens.is_none()));
    assert!(records.iter().all(|r| r.server_e2e_time_ms.is_none()));

    let summary = summarize(&records, run.start_time, run.end_time);
    assert_eq!(summary.successful_requests, 2);
    assert_eq!(summary.total_input_tokens, 0);
    assert_eq!(summary.total_output_tokens, 0);
}
