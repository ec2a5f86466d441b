use std::fs;
use std::io::{self, Write};

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use kvfeed_kernel::adapters::dump::StoreDump;
use kvfeed_kernel::mvcc::Timestamp;
use kvfeed_kernel::rangefeed::{CatchUpIterator, ChangeEvent, IntentPolicy, ScanConfig};

/// Kvfeed catch-up CLI
#[derive(Parser, Debug)]
#[command(name = "kvfeed")]
#[command(about = "Replay a rangefeed catch-up scan over a store dump", long_about = None)]
struct Cli {
    /// Path to store dump JSON
    #[arg(long)]
    store: String,

    /// Path to scan config JSON
    #[arg(long)]
    config: Option<String>,

    /// First key of the span (inclusive)
    #[arg(long)]
    start_key: Option<String>,

    /// End key of the span (exclusive)
    #[arg(long)]
    end_key: Option<String>,

    /// Exclusive start timestamp, as <wall>[.<logical>]
    #[arg(long)]
    start_ts: Option<Timestamp>,

    /// Inclusive end timestamp, as <wall>[.<logical>]
    #[arg(long)]
    end_ts: Option<Timestamp>,

    /// Attach the previous value to every event
    #[arg(long)]
    with_diff: bool,

    /// Leave unresolved intents out of the output
    #[arg(long)]
    skip_intents: bool,
}

/// Wrapper for JSON output
#[derive(Debug, Serialize)]
struct CliEvent {
    key: String,
    value: Option<String>,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_value: Option<String>,
}

impl From<&ChangeEvent> for CliEvent {
    fn from(event: &ChangeEvent) -> Self {
        let text = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();
        Self {
            key: text(&event.key),
            value: (!event.is_delete()).then(|| text(&event.value)),
            timestamp: event.timestamp.to_string(),
            prev_value: event.prev_value.as_deref().map(text),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kvfeed=info".parse()?)
                .add_directive("kvfeed_kernel=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Load store dump
    // ----------------------------
    let dump_data = fs::read_to_string(&cli.store)?;
    let store = StoreDump::from_json(&dump_data)?.into_store()?;
    info!(path = %cli.store, versions = store.len(), "loaded store dump");

    // ----------------------------
    // Load scan config
    // ----------------------------
    let mut config = if let Some(path) = &cli.config {
        let data = fs::read_to_string(path)?;
        ScanConfig::from_json(&data)?
    } else {
        ScanConfig::default_config()
    };

    if let Some(start) = cli.start_key {
        config.span.start = start;
    }
    if let Some(end) = cli.end_key {
        config.span.end = Some(end);
    }
    if let Some(ts) = cli.start_ts {
        config.start_timestamp = ts;
    }
    if cli.end_ts.is_some() {
        config.end_timestamp = cli.end_ts;
    }
    if cli.with_diff {
        config.with_diff = true;
    }
    if cli.skip_intents {
        config.intents = IntentPolicy::Skip;
    }

    // ----------------------------
    // Run catch-up scan
    // ----------------------------
    let mut iter = CatchUpIterator::new(
        &store,
        config.span(),
        config.start_timestamp,
        config.options(),
    )?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let stats = iter.catch_up_scan(
        |event| {
            serde_json::to_writer(&mut out, &CliEvent::from(event))?;
            writeln!(out)?;
            Ok(())
        },
        config.with_diff,
    )?;
    iter.close()?;

    // ----------------------------
    // Output
    // ----------------------------
    eprintln!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
