//! casper-queue CLI - Main Entry Point
//!
//! Loads a queue configuration, runs every suite with retry rounds, prints
//! the summary and writes the report artifacts.
//!
//! Exit codes: 0 when the queue drained without remaining failures, 1 when
//! failures remained, 2 when the run could not start.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use casper_queue::style::set_color_enabled;
use casper_queue::{
    build_report, write_reports, EventSink, QueueConfig, QueueScheduler, TokioExec,
};

mod display;

use display::{print_error, print_success, print_warning, EventPrinter};

const EXIT_FAILED: i32 = 1;
const EXIT_FATAL: i32 = 2;

/// Run casperjs-style test suites in parallel with retry rounds
#[derive(Parser, Debug)]
#[command(name = "casper-queue")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Queue configuration (TOML, YAML or JSON)
    #[arg(short, long, env = "CASPER_QUEUE_CONFIG", default_value = "casper-queue.toml")]
    config: PathBuf,

    /// Number of suites running at the same time
    #[arg(short, long)]
    workers: Option<usize>,

    /// Retry rounds allowed after the first round
    #[arg(long)]
    max_retries: Option<u32>,

    /// Test binary, tried before the configured candidates
    #[arg(long)]
    binary: Option<PathBuf>,

    /// Directory receiving the reports
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Kill any single test running longer than this
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration
    fn apply(&self, config: &mut QueueConfig) {
        if let Some(workers) = self.workers {
            config.queue_workers = workers;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(binary) = &self.binary {
            config.binary_candidates.insert(0, binary.clone());
        }
        if let Some(report_dir) = &self.report_dir {
            config.report_dir = report_dir.clone();
        }
        if self.timeout_secs.is_some() {
            config.process_timeout_secs = self.timeout_secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.no_color {
        set_color_enabled(false);
    }

    let mut config = match QueueConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            print_error(&e.to_string());
            std::process::exit(EXIT_FATAL);
        }
    };
    cli.apply(&mut config);
    debug!("Configuration: {:?}", config);

    let base_dir = std::env::current_dir()?;
    let exec = TokioExec::new().with_timeout(config.process_timeout());
    let scheduler = match QueueScheduler::from_config(&config, Arc::new(exec), &base_dir) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            print_error(&e.to_string());
            std::process::exit(if e.is_configuration() { EXIT_FATAL } else { EXIT_FAILED });
        }
    };

    let (events, rx) = EventSink::channel();
    let printer = tokio::spawn(EventPrinter::new(cli.verbose).run(rx));
    let scheduler = scheduler.with_events(events);

    info!(
        "Running {} suite(s) on {} worker(s), up to {} retry round(s)",
        config.queue.len(),
        scheduler.concurrency(),
        config.max_retries
    );
    let result = scheduler.run(config.work_items()).await;
    // Dropping the scheduler closes the event channel
    drop(scheduler);
    printer.await?;
    let summary = result?;

    let report = build_report(&summary);
    println!();
    print!("{}", report.summary);
    if !report.failures.is_empty() {
        println!();
        print!("{}", report.failures);
    }

    let report_dir = base_dir.join(&config.report_dir);
    match write_reports(&report_dir, &report, &summary) {
        Ok(written) => debug!("Wrote {} report file(s)", written.len()),
        Err(e) => print_warning(&format!(
            "Could not write reports to {}: {}",
            report_dir.display(),
            e
        )),
    }

    if summary.status.is_success() {
        print_success(summary.status.label());
        Ok(())
    } else {
        print_error(summary.status.label());
        std::process::exit(EXIT_FAILED);
    }
}
