use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use tracebench::{
    enrich_all, format_summary, run_benchmark, summarize, write_csv, write_json,
    write_summary_json, BenchmarkConfig, MetricsClient, NoopTracer, RetryPolicy,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tracebench",
    about = "Rate-controlled latency benchmark for LLM serving endpoints with trace enrichment"
)]
struct Args {
    /// Path to a JSONL file whose objects contain a `text` field
    #[arg(long)]
    prompts: PathBuf,

    /// Cap on the number of prompts to submit (defaults to all of them)
    #[arg(long)]
    num_prompts: Option<usize>,

    /// Target requests per second; 0 launches everything at once
    #[arg(long, default_value_t = 1.0)]
    rps: f64,

    /// Serving endpoint base URL
    #[arg(long, default_value = "http://localhost:8000")]
    base_url: String,

    /// Trace store base URL (Jaeger query API)
    #[arg(long, default_value = "http://localhost:16686")]
    trace_url: String,

    /// Model identifier; "auto" lets the server pick
    #[arg(long, default_value = "auto")]
    model: String,

    #[arg(long, default_value_t = 0.7)]
    temperature: f64,

    #[arg(long, default_value_t = 150)]
    max_tokens: u64,

    #[arg(long, default_value_t = 1.0)]
    top_p: f64,

    /// Read the full completion in one shot instead of streaming
    #[arg(long)]
    no_stream: bool,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value_t = 600)]
    request_timeout_secs: u64,

    /// Per-record budget for the server-metric lookup, in seconds
    #[arg(long, default_value_t = 20)]
    enrich_timeout_secs: u64,

    /// Poll interval for the server-metric lookup, in milliseconds
    #[arg(long, default_value_t = 500)]
    enrich_poll_ms: u64,

    /// Skip trace propagation and the server-metric enrichment pass
    #[arg(long)]
    no_enrich: bool,

    /// Prefix for the timestamped result files
    #[arg(long, default_value = "benchmark")]
    output_prefix: String,

    /// Which result files to write
    #[arg(long, value_enum, default_value_t = OutputFormat::Both)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Both,
    None,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut prompts = load_prompts(&args.prompts)
        .with_context(|| format!("failed to load prompts from {}", args.prompts.display()))?;
    if prompts.is_empty() {
        return Err(anyhow!(
            "{} did not contain any JSON records with a `text` field",
            args.prompts.display()
        ));
    }
    if let Some(cap) = args.num_prompts {
        if cap == 0 {
            return Err(anyhow!("num-prompts must be greater than zero"));
        }
        prompts.truncate(cap);
    }

    let enrichment = RetryPolicy::new(
        Duration::from_millis(args.enrich_poll_ms.max(1)),
        Duration::from_secs(args.enrich_timeout_secs),
    );
    let config = BenchmarkConfig::try_new(&args.base_url, &args.trace_url, args.rps)?
        .with_model(args.model)
        .with_sampling(args.temperature, args.top_p)?
        .with_max_tokens(args.max_tokens)?
        .with_stream(!args.no_stream)
        .with_request_timeout(Duration::from_secs(args.request_timeout_secs))
        .with_enrichment(enrichment);

    let client = if args.no_enrich {
        MetricsClient::with_tracer(config, Arc::new(NoopTracer))?
    } else {
        MetricsClient::new(config)?
    };
    let client = Arc::new(client);

    let run = run_benchmark(Arc::clone(&client), prompts).await;
    let records = if args.no_enrich {
        run.records
    } else {
        enrich_all(Arc::clone(&client), run.records, enrichment).await
    };

    let summary = summarize(&records, run.start_time, run.end_time);
    println!("{}", format_summary(&summary));

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let base = format!("{}_{}", args.output_prefix, stamp);
    match args.format {
        OutputFormat::Json => {
            write_json(&records, format!("{base}.json"))?;
            write_summary_json(&summary, format!("{base}_summary.json"))?;
        }
        OutputFormat::Csv => write_csv(&records, format!("{base}.csv"))?,
        OutputFormat::Both => {
            write_json(&records, format!("{base}.json"))?;
            write_csv(&records, format!("{base}.csv"))?;
            write_summary_json(&summary, format!("{base}_summary.json"))?;
        }
        OutputFormat::None => {}
    }

    Ok(())
}

fn load_prompts(path: &PathBuf) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut prompts = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(trimmed)
            .with_context(|| format!("line {} is not valid JSON: {}", idx + 1, trimmed))?;
        let text = value
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("line {} missing string field `text`", idx + 1))?;
        if !text.trim().is_empty() {
            prompts.push(text.to_string());
        }
    }

    Ok(prompts)
}
