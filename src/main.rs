use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use edge_fusion::backtest::{run_backtest, summarize, BacktestParams};
use edge_fusion::config::{Config, RunMode};
use edge_fusion::db::Database;
use edge_fusion::fusion::{FusionContext, FusionEngine};
use edge_fusion::sources::{collect_batches, FetchPolicy, JsonFileSource, PredictionSource};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    // Open database
    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    // Restore confirmed aliases and trailing accuracy into a fresh context
    let ctx = Arc::new(FusionContext::new(config.trailing_window_games));
    let aliases = db.load_aliases()?;
    info!("Loaded {} confirmed aliases", aliases.len());
    ctx.load_aliases(aliases);
    let history = db.recent_source_results(config.trailing_window_games)?;
    ctx.record_results(history.iter().map(|(source, won)| (source.as_str(), *won)));

    let engine = FusionEngine::new(config.engine_config(), Arc::clone(&ctx));
    for aggregate in db.load_aggregates()? {
        engine.restore_game(aggregate);
    }
    info!("Restored {} games", engine.game_count());

    // Collect new records from every configured source
    let sources: Vec<Arc<dyn PredictionSource>> = config
        .inputs
        .iter()
        .map(|path| Arc::new(JsonFileSource::new(path)) as Arc<dyn PredictionSource>)
        .collect();
    let scan_date = config.date.unwrap_or_else(|| Utc::now().date_naive());
    let fetch_date = match config.mode {
        RunMode::Scan => Some(scan_date),
        RunMode::Backtest => None,
    };
    let policy = FetchPolicy {
        timeout: Duration::from_secs(config.source_timeout_secs),
        retries: config.source_retries,
        ..FetchPolicy::default()
    };
    let collection = collect_batches(&sources, fetch_date, policy).await;
    if !collection.failures.is_empty() {
        warn!(
            "{} of {} sources unavailable; continuing with partial data",
            collection.failures.len(),
            sources.len()
        );
    }

    // Predictions and lines before results, then one pass over held records
    let batch = collection.merged();
    let mut report = engine.ingest_predictions(&batch.predictions);
    report.merge(engine.ingest_lines(&batch.lines));
    report.merge(engine.ingest_results(&batch.results));
    report.merge(engine.retry_unresolved());
    info!(
        "Ingested {} records ({} duplicates, {} rejected, {} still unresolved)",
        report.accepted,
        report.duplicates,
        report.errors.len(),
        engine.unresolved_count()
    );
    for e in report.fatal() {
        error!("{} #{}: {}", e.kind, e.index, e.error);
    }

    // Persist the fused view
    let aliases = ctx.aliases();
    let changed = db.save_aliases(aliases.iter().map(|((source, raw), team)| (source, raw, team)))?;
    if changed > 0 {
        info!("Saved {} new aliases", changed);
    }
    for (old_id, new_id) in engine.take_renamed() {
        info!("Game {} re-keyed as {}", old_id, new_id);
        db.drop_game(&old_id)?;
    }
    for aggregate in engine.snapshot() {
        db.save_game_aggregate(&aggregate)?;
    }

    match config.mode {
        RunMode::Scan => {
            let now = Utc::now();
            let edges = engine.ranked_edges(scan_date, config.min_edge, &config.sources, now);
            info!("{} edges at or above {:.1} on {}", edges.len(), config.min_edge, scan_date);
            let mut markets = Vec::new();
            for game in engine.games_on(scan_date) {
                match engine.market_summary(&game.game_id, now) {
                    Ok(summary) if summary.consensus.is_some() => markets.push(summary),
                    Ok(_) => {}
                    Err(e) => warn!("Market summary failed for {}: {}", game.game_id, e),
                }
            }
            let report = serde_json::json!({ "edges": edges, "markets": markets });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        RunMode::Backtest => {
            let start_date = config
                .start_date
                .ok_or_else(|| anyhow::anyhow!("--start-date is required in backtest mode"))?;
            let params = BacktestParams {
                start_date,
                end_date: config.end_date.unwrap_or(scan_date),
                sources: config.sources.clone(),
                min_edge_threshold: config.min_edge,
            };
            let run = run_backtest(&engine, params)?;
            let run_id = db.save_backtest_run(&run)?;
            let summary = summarize(&run);
            info!(
                "Backtest #{}: {} bets, {:+.2} units, ROI {:.1}%",
                run_id, summary.total_bets, summary.units_won_lost, summary.roi_percent
            );
            if let Some(fit) = engine.calibrate_win_prob_slope() {
                info!("Suggested WIN_PROB_SLOPE={:.4}", fit.curve.slope);
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
