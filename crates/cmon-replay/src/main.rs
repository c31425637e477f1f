use anyhow::{Context, Result};
use clap::Parser;
use cmon_reconcile::Selection;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod fixture;
mod replay;

use fixture::load_fixture;
use replay::{ReplayEngine, ReplaySettings, TickReport};

#[derive(Clone, Debug)]
struct Config {
    fixture: PathBuf,
    selection: Selection,
    limit: Option<usize>,
    page_size: usize,
    chunk_bytes: usize,
    tick: Duration,
    debug: bool,
}

#[derive(Parser, Debug)]
#[command(name = "cmon-replay")]
struct Args {
    /// Directory holding tasks.json, runs.json and optionally messages.json and events.sse.
    #[arg(long)]
    fixture: PathBuf,
    #[arg(long, default_value = "")]
    project: String,
    #[arg(long, default_value = "")]
    task: String,
    #[arg(long, default_value = "")]
    run: String,
    /// Per-task run window; 0 keeps every run.
    #[arg(long, default_value_t = 0)]
    limit: usize,
    #[arg(long, default_value_t = 200)]
    page_size: usize,
    /// Stream bytes delivered per read.
    #[arg(long, default_value_t = 512)]
    chunk_bytes: usize,
    /// Pause between reads, in milliseconds.
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    init_logging(&config);
    if let Err(err) = run(&config).await {
        error!(event = "replay_failed", error = %format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run(config: &Config) -> Result<()> {
    let fixture = load_fixture(&config.fixture)?;
    let mut engine = ReplayEngine::new(ReplaySettings {
        selection: config.selection.clone(),
        limit: config.limit,
        page_size: config.page_size,
        ..ReplaySettings::default()
    });
    engine.seed(&fixture).context("failed to seed runs")?;

    for chunk in fixture.events.chunks(config.chunk_bytes.max(1)) {
        engine.push_chunk(chunk, Instant::now());
        idle(&mut engine, config.tick).await;
    }
    engine.finish(Instant::now());
    while let Some(due) = engine.next_deadline() {
        tokio::time::sleep_until(due.into()).await;
        print_tick(&engine.tick(Instant::now()));
    }
    print_tick(&engine.drain());

    print_summary(&engine)
}

/// Waits out one read interval, firing any timer that comes due inside it.
async fn idle(engine: &mut ReplayEngine, window: Duration) {
    let until = Instant::now() + window;
    loop {
        match engine.next_deadline() {
            Some(due) if due <= until => {
                tokio::time::sleep_until(due.into()).await;
                print_tick(&engine.tick(Instant::now()));
            }
            _ => {
                tokio::time::sleep_until(until.into()).await;
                return;
            }
        }
    }
}

fn print_tick(report: &TickReport) {
    if !report.invalidated.is_empty() {
        let keys: Vec<String> = report.invalidated.iter().map(ToString::to_string).collect();
        println!("invalidate {}", keys.join(" "));
    }
    if let Some(count) = report.messages {
        println!("messages {count}");
    }
}

fn print_summary(engine: &ReplayEngine) -> Result<()> {
    match engine.tree() {
        Some(tree) => {
            println!("tree ({})", tree.project_status().as_str());
            for line in tree.outline() {
                println!("{line}");
            }
        }
        None => println!("tree (no project selected)"),
    }

    let poll = engine.poll_plan();
    println!(
        "poll connection={} runs_flat={}ms messages={}",
        poll.connection,
        poll.runs_flat.as_millis(),
        poll.messages
            .map(|interval| format!("{}ms", interval.as_millis()))
            .unwrap_or_else(|| "off".to_string()),
    );

    let stale: Vec<String> = engine
        .cache()
        .stale_keys()
        .into_iter()
        .map(ToString::to_string)
        .collect();
    if !stale.is_empty() {
        println!("stale {}", stale.join(" "));
    }

    let stats = serde_json::to_string_pretty(engine.stats()).context("failed to encode stats")?;
    println!("{stats}");
    info!(
        event = "replay_complete",
        frames = engine.stats().frames,
        connection = %engine.connection(),
    );
    Ok(())
}

fn load_config() -> Config {
    let args = Args::parse();
    let selection = Selection {
        project_id: resolve(&args.project, "CMON_PROJECT_ID"),
        task_id: resolve(&args.task, "CMON_TASK_ID"),
        run_id: resolve(&args.run, "CMON_RUN_ID"),
    };
    Config {
        fixture: args.fixture,
        selection,
        limit: (args.limit > 0).then_some(args.limit),
        page_size: args.page_size,
        chunk_bytes: args.chunk_bytes,
        tick: Duration::from_millis(args.tick_ms),
        debug: args.debug || env_true("CMON_DEBUG"),
    }
}

fn init_logging(config: &Config) {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("CMON_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("log_init_error: subscriber already set");
    }
}

fn resolve(arg: &str, key: &str) -> Option<String> {
    let arg = arg.trim();
    if !arg.is_empty() {
        return Some(arg.to_string());
    }
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_argument_wins_over_environment() {
        assert_eq!(resolve("  proj-1 ", "CMON_TEST_UNSET_KEY"), Some("proj-1".to_string()));
        assert_eq!(resolve("", "CMON_TEST_UNSET_KEY"), None);
    }

    #[test]
    fn args_parse_with_defaults() {
        let args = Args::try_parse_from(["cmon-replay", "--fixture", "/tmp/session", "--limit", "3"])
            .expect("parse args");
        assert_eq!(args.fixture, PathBuf::from("/tmp/session"));
        assert_eq!(args.limit, 3);
        assert_eq!(args.page_size, 200);
        assert!(args.project.is_empty());
    }
}
