// vigil/src/main.rs
//
// Vigil — health-event surveillance core.
//
// Subcommands:
//   fuse      — fuse CBS/EMR JSONL batches into canonical fused records
//   audit     — run compliance checks once, or tick continuously (--watch)
//   dispatch  — dispatch alert messages from a JSONL topic file
//
// Exit codes: 0 success, 2 validation, 3 I/O, 4 cancellation.
//
// Usage:
//   vigil fuse --cbs cbs.jsonl --emr emr.jsonl
//   vigil audit --scope evidence_integrity,conflict_rate
//   vigil audit --watch
//   vigil dispatch --from alerts.jsonl

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vigil::audit::scheduler::AuditScheduler;
use vigil::audit::{AuditAgent, CheckContext};
use vigil::config::Config;
use vigil::dispatch::channels::{ChatChannel, ConsoleChannel};
use vigil::dispatch::Distributor;
use vigil::engine::FusionEngine;
use vigil::error::{Result, VigilError};
use vigil::events::{Alert, CbsSignal, EmrEvent};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "vigil",
    about   = "Health-event surveillance core — fusion, audit, dispatch",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, default_value = "/tmp/vigil_output",
          help = "Artifact and output directory")]
    output: PathBuf,

    #[arg(long, help = "Typed JSON configuration file (unknown keys rejected)")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fuse CBS and EMR batches (JSONL) into canonical fused records
    Fuse {
        #[arg(long, help = "CBS signal batch, one JSON object per line")]
        cbs: Option<PathBuf>,
        #[arg(long, help = "EMR event batch, one JSON object per line")]
        emr: Option<PathBuf>,
        #[arg(long, help = "Force a subject id when the sources omit one")]
        subject: Option<String>,
    },
    /// Run compliance checks and persist an audit report
    Audit {
        #[arg(long, value_delimiter = ',', help = "Comma-separated check ids")]
        scope: Option<Vec<String>>,
        #[arg(long, help = "Run the tick scheduler until Ctrl-C")]
        watch: bool,
    },
    /// Dispatch alert messages from a JSONL topic file
    Dispatch {
        #[arg(long, help = "Topic file, one alert payload per line")]
        from: PathBuf,
    },
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("vigil: {e:#}");
            let code = e
                .downcast_ref::<VigilError>()
                .map(VigilError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Fuse { cbs, emr, subject } => {
            cmd_fuse(&config, &cli.output, cbs, emr, subject).await?
        }
        Command::Audit { scope, watch } => {
            cmd_audit(&config, &cli.output, scope, watch).await?
        }
        Command::Dispatch { from } => cmd_dispatch(&config, &cli.output, &from).await?,
    }
    Ok(())
}

// ── fuse ──────────────────────────────────────────────────────────────────────

async fn cmd_fuse(
    config: &Config,
    output: &Path,
    cbs_path: Option<PathBuf>,
    emr_path: Option<PathBuf>,
    subject: Option<String>,
) -> Result<()> {
    if cbs_path.is_none() && emr_path.is_none() {
        return Err(VigilError::Validation(
            "fuse requires --cbs and/or --emr".into(),
        ));
    }

    let engine = FusionEngine::new(config.clone()).with_output_dir(output)?;

    let cbs_batch: Vec<CbsSignal> = match &cbs_path {
        Some(p) => read_json_lines(p)?
            .iter()
            .map(CbsSignal::from_value)
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };
    let emr_batch: Vec<EmrEvent> = match &emr_path {
        Some(p) => read_json_lines(p)?
            .iter()
            .map(EmrEvent::from_value)
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };

    if !cbs_batch.is_empty() && !emr_batch.is_empty() {
        // Pair each CBS signal with its best EMR candidate, then fuse.
        // EMR events no signal claimed still enter the timeline as
        // single-source records.
        let matches = engine.fuse_streams(&cbs_batch, &emr_batch);
        let claimed: std::collections::HashSet<String> = matches
            .iter()
            .filter_map(|m| m.best_match_emr.as_ref())
            .map(emr_key)
            .collect();

        for m in matches {
            let record = engine.fuse(
                Some(m.cbs),
                m.best_match_emr,
                None,
                subject.as_deref(),
            )?;
            println!("{}", serde_json::to_string(&record).map_err(to_integrity)?);
        }
        for event in emr_batch {
            if claimed.contains(&emr_key(&event)) {
                continue;
            }
            let record = engine.fuse(None, Some(event), None, subject.as_deref())?;
            println!("{}", serde_json::to_string(&record).map_err(to_integrity)?);
        }
    } else {
        for signal in cbs_batch {
            let record = engine.fuse(Some(signal), None, None, subject.as_deref())?;
            println!("{}", serde_json::to_string(&record).map_err(to_integrity)?);
        }
        for event in emr_batch {
            let record = engine.fuse(None, Some(event), None, subject.as_deref())?;
            println!("{}", serde_json::to_string(&record).map_err(to_integrity)?);
        }
    }

    let swept = engine.sweep_retention();
    let stats = engine.statistics();
    info!(
        total = stats.total,
        hot = stats.hot,
        cold = stats.cold,
        avg_verification = stats.avg_verification,
        swept = swept.len(),
        "fusion complete"
    );
    Ok(())
}

// ── audit ─────────────────────────────────────────────────────────────────────

async fn cmd_audit(
    config: &Config,
    output: &Path,
    scope: Option<Vec<String>>,
    watch_mode: bool,
) -> Result<()> {
    std::fs::create_dir_all(output)?;

    let engine = Arc::new(FusionEngine::new(config.clone()));
    let ctx = CheckContext {
        engine,
        evidence_dir: output.join("evidence"),
        policy_dir:   output.join("policy"),
        reports_dir:  output.to_path_buf(),
    };

    // Critical findings flow straight onto the alert topic.
    let (alert_tx, mut alert_rx) = mpsc::channel::<Alert>(256);
    let agent = Arc::new(AuditAgent::new(config, ctx).with_alert_sender(alert_tx));

    let distributor = Arc::new(
        Distributor::new(config.dispatch.clone())
            .with_channel(Arc::new(ChatChannel::new(output)?))
            .with_channel(Arc::new(ConsoleChannel)),
    );
    let pump_distributor = Arc::clone(&distributor);
    let pump = tokio::spawn(async move {
        while let Some(alert) = alert_rx.recv().await {
            pump_distributor.dispatch(&alert).await;
        }
    });

    let result = if watch_mode {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });
        info!("audit scheduler watching — Ctrl-C to stop");
        AuditScheduler::new(Arc::clone(&agent), config, shutdown_rx)
            .run()
            .await
    } else {
        let report = agent.run_scope(scope.as_deref()).await?;
        println!(
            "{}",
            serde_json::to_string_pretty(&report).map_err(to_integrity)?
        );
        Ok(())
    };

    drop(agent); // close the alert topic so the pump drains and exits
    let _ = pump.await;
    result
}

// ── dispatch ──────────────────────────────────────────────────────────────────

async fn cmd_dispatch(config: &Config, output: &Path, topic: &Path) -> Result<()> {
    let distributor = Distributor::new(config.dispatch.clone())
        .with_channel(Arc::new(ChatChannel::new(output)?))
        .with_channel(Arc::new(ConsoleChannel));

    let mut delivered = 0usize;
    let mut rejected = 0usize;

    for payload in read_json_lines(topic)? {
        match distributor.dispatch_raw(&payload).await {
            Ok(results) => {
                delivered += 1;
                println!("{}", serde_json::to_string(&results).map_err(to_integrity)?);
            }
            Err(e @ (VigilError::Validation(_) | VigilError::InvalidTimestamp(_))) => {
                rejected += 1;
                warn!("rejected alert payload: {e}");
            }
            Err(e) => return Err(e),
        }
    }

    info!(delivered, rejected, "dispatch complete");
    if delivered == 0 && rejected > 0 {
        return Err(VigilError::Validation(
            "no alert payload passed validation".into(),
        ));
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_json_lines(path: &Path) -> Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)?;
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            serde_json::from_str(l)
                .map_err(|e| VigilError::Validation(format!("{}: {e}", path.display())))
        })
        .collect()
}

fn to_integrity(e: serde_json::Error) -> VigilError {
    VigilError::Integrity(format!("serialization: {e}"))
}

fn emr_key(event: &EmrEvent) -> String {
    format!(
        "{}|{}|{}",
        event.timestamp.timestamp(),
        event.location,
        event.diagnosis
    )
}
