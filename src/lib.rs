mod client;
mod config;
mod export;
mod record;
mod runner;
mod summary;
mod trace;

pub use client::{ChatMessage, MetricsClient};
pub use config::BenchmarkConfig;
pub use export::{
    records_to_csv, write_csv, write_json, write_summary_json, ExportDocument, ExportMetadata,
    RecordDocument,
};
pub use record::RequestRecord;
pub use runner::{enrich_all, run_benchmark, BenchmarkRun};
pub use summary::{format_summary, summarize, BenchmarkSummary, MetricStats};
pub use trace::{NoopTracer, RetryPolicy, SpanMetrics, TraceContext, Tracer, W3cTracer};
