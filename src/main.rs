use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use wc26_predictor::cancel::CancelToken;
use wc26_predictor::{EngineConfig, PredictionEngine};

const DEFAULT_CONFIG: &str = "predictor.toml";

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_path = parse_config_arg().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let cfg = EngineConfig::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    cfg.logging.init().context("install log subscriber")?;
    info!(config = %config_path.display(), feeds = cfg.feeds.len(), "starting predictor");

    let engine = PredictionEngine::builder(cfg).build()?;
    let cancel = CancelToken::new();

    if has_flag("--once") {
        for report in engine.run_acquisition_once(&cancel) {
            println!("{}", serde_json::to_string(&report)?);
        }
    }

    let predict_ids = parse_predict_args();
    if !predict_ids.is_empty() {
        for (id, result) in predict_ids.iter().zip(engine.predict_many(&predict_ids)) {
            match result {
                Ok(prediction) => println!("{}", serde_json::to_string(&prediction)?),
                Err(err) => error!(match_id = %id, error = %err, "prediction failed"),
            }
        }
    }

    if has_flag("--once") || !predict_ids.is_empty() {
        return Ok(());
    }

    let handles = engine.spawn_schedulers(&cancel)?;
    info!(threads = handles.len(), "schedulers running");

    match parse_run_secs_arg() {
        Some(secs) => {
            cancel.sleep(Duration::from_secs(secs));
        }
        None => wait_for_stdin_close(),
    }

    info!("shutting down");
    cancel.cancel();
    for handle in handles {
        if handle.join().is_err() {
            error!("scheduler thread panicked");
        }
    }
    for status in engine.integration_statuses() {
        println!("{}", serde_json::to_string(&status)?);
    }
    Ok(())
}

/// Blocks until stdin reaches EOF.
fn wait_for_stdin_close() {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    while let Some(Ok(_)) = lines.next() {}
}

fn has_flag(flag: &str) -> bool {
    std::env::args().skip(1).any(|a| a == flag)
}

fn parse_config_arg() -> Option<PathBuf> {
    arg_value("--config").map(PathBuf::from)
}

fn parse_run_secs_arg() -> Option<u64> {
    arg_value("--run-secs").and_then(|v| v.parse::<u64>().ok())
}

fn parse_predict_args() -> Vec<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut out = Vec::new();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(id) = arg.strip_prefix("--predict=") {
            out.push(id.trim().to_string());
        } else if arg == "--predict" {
            if let Some(next) = args.get(idx + 1) {
                out.push(next.trim().to_string());
            }
        }
    }
    out.retain(|id| !id.is_empty());
    out
}

fn arg_value(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(next.trim().to_string());
            }
        }
    }
    None
}
