use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

use tradegate::cli::{Cli, Commands};
use tradegate::config::AppConfig;
use tradegate::coordination::install_signal_handlers;
use tradegate::pipeline::{Decision, DecisionTick, TickOutcome};
use tradegate::transport::{self, TransportContext};
use tradegate::TradeGate;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;

    match cli.command {
        Commands::Run => {
            let _guard = init_logging(&config.connector, &config.logging);
            run(config).await
        }
        Commands::Predict { file } => {
            init_logging_simple();
            predict(config, file.as_deref()).await
        }
        Commands::Ping { account } => {
            init_logging_simple();
            ping(&config, &account).await
        }
        Commands::CheckConfig => check_config(&config),
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let gate = Arc::new(TradeGate::build(config)?);
    gate.start().await?;
    install_signal_handlers(Arc::clone(&gate.shutdown));
    info!(
        accounts = gate.connections.connections().len(),
        "tradegate running, reading ticks from stdin"
    );

    let mut stop = gate.shutdown.stop_signal();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_tick(&gate, &line).await,
                Ok(None) => {
                    info!("tick input closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "failed to read tick input");
                    break;
                }
            }
        }
    }

    let report = gate.stop().await;
    if !report.drained {
        warn!(cancelled = report.cancelled, "exited with unresolved commands");
    }
    Ok(())
}

async fn handle_tick(gate: &TradeGate, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let tick: DecisionTick = match serde_json::from_str(line) {
        Ok(tick) => tick,
        Err(e) => {
            warn!(error = %e, "skipping malformed tick");
            return;
        }
    };

    match gate.pipeline.process(&tick).await {
        Ok(TickOutcome::Hold(decision)) => {
            info!(symbol = %tick.symbol, confidence = decision.action.confidence, "hold");
        }
        Ok(TickOutcome::Dispatched { decision, handle }) => {
            info!(
                symbol = %tick.symbol,
                direction = %decision.action.direction,
                correlation_id = %handle.correlation_id(),
                "command dispatched"
            );
            tokio::spawn(async move {
                let result = handle.await;
                if result.success {
                    info!(
                        correlation_id = %result.correlation_id,
                        ms = result.execution_time_ms,
                        "command executed"
                    );
                } else {
                    warn!(
                        correlation_id = %result.correlation_id,
                        code = result.error_code().unwrap_or("unknown"),
                        "command failed"
                    );
                }
            });
        }
        Err(e) => warn!(symbol = %tick.symbol, error = %e, "tick not processed"),
    }
}

async fn predict(config: AppConfig, file: Option<&Path>) -> anyhow::Result<()> {
    let gate = TradeGate::build(config)?;
    match file {
        Some(path) => {
            let f = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            predict_lines(&gate, BufReader::new(f)).await
        }
        None => predict_lines(&gate, BufReader::new(tokio::io::stdin())).await,
    }
}

async fn predict_lines<R: AsyncBufRead + Unpin>(gate: &TradeGate, reader: R) -> anyhow::Result<()> {
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let tick: DecisionTick = serde_json::from_str(&line).context("parsing tick")?;
        let report = match gate.pipeline.decide(&tick).await {
            Ok(decision) => decision_report(&tick, &decision),
            Err(e) => json!({ "symbol": tick.symbol, "error": e.to_string(), "code": e.code() }),
        };
        println!("{report}");
    }
    Ok(())
}

fn decision_report(tick: &DecisionTick, decision: &Decision) -> serde_json::Value {
    json!({
        "symbol": tick.symbol,
        "regime": decision.regime.regime,
        "agent": decision.selection.agent,
        "agent_confidence": decision.selection.confidence,
        "override": decision.selection.override_rule,
        "action": decision.action,
        "failed_policies": decision.prediction.failed,
    })
}

async fn ping(config: &AppConfig, account_id: &str) -> anyhow::Result<()> {
    let account = config
        .account(account_id)
        .ok_or_else(|| anyhow!("account {account_id} is not configured"))?;
    let transport = transport::build(account, &config.connector)?;

    let (inbound, _inbound_rx) = mpsc::channel(config.connector.callback_queue_size);
    let ctx = TransportContext {
        account_id: account.account_id.clone(),
        inbound,
        link_lost: Arc::new(Notify::new()),
    };
    transport.connect(ctx).await?;
    let heartbeat = transport.heartbeat().await;
    let _ = transport.close().await;

    let info = heartbeat?;
    println!(
        "{} via {} ({}): ok, agent {} broker {} server {}",
        account.account_id,
        transport.kind(),
        transport.endpoint(),
        info.agent_version.as_deref().unwrap_or("-"),
        info.broker.as_deref().unwrap_or("-"),
        info.server.as_deref().unwrap_or("-"),
    );
    Ok(())
}

fn check_config(config: &AppConfig) -> anyhow::Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("  - {e}");
        }
        bail!("configuration has {} error(s)", errors.len());
    }
    println!(
        "configuration ok: {} account(s), {} enabled",
        config.accounts.len(),
        config.accounts.iter().filter(|a| a.enabled).count()
    );
    Ok(())
}
