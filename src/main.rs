//! Zentinel Abuse Gate CLI
//!
//! Replays JSON-lines traffic through the gate and prints one JSON decision
//! per input line. Useful for dry-running a configuration against recorded
//! requests before deploying it.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use zentinel_abuse_gate::{
    client_ip, BehaviorData, DetectionSensitivity, GateConfig, GateOrchestrator, GateRequest,
};

/// Version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "zentinel-abuse-gate")]
#[command(about = "Replay recorded requests through the Zentinel abuse gate")]
struct Args {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(long, env = "GATE_CONFIG")]
    config: Option<PathBuf>,

    /// JSON-lines input file (stdin when omitted)
    #[arg(long, env = "GATE_INPUT")]
    input: Option<PathBuf>,

    /// Override detection sensitivity (low, medium, high)
    #[arg(long, env = "GATE_DETECTION_SENSITIVITY")]
    sensitivity: Option<String>,

    /// Print the injectable trap HTML and exit
    #[arg(long)]
    print_trap_html: bool,

    /// Print gate statistics after the replay
    #[arg(long)]
    stats: bool,

    /// Enable verbose logging
    #[arg(short, long, env = "GATE_VERBOSE")]
    verbose: bool,
}

impl Args {
    fn to_config(&self) -> Result<GateConfig> {
        let mut config = match &self.config {
            Some(path) => GateConfig::from_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => GateConfig::default(),
        };

        if let Some(sensitivity) = &self.sensitivity {
            config.detection_sensitivity = sensitivity.parse::<DetectionSensitivity>()?;
        }

        Ok(config)
    }
}

/// One line of replay input
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ReplayOp {
    Evaluate {
        #[serde(default)]
        ip: Option<String>,
        #[serde(default)]
        remote_addr: Option<String>,
        #[serde(default = "default_method")]
        method: String,
        path: String,
        #[serde(default)]
        headers: HashMap<String, Vec<String>>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Submit {
        challenge_id: String,
        answer: String,
        #[serde(default)]
        behavior: Option<BehaviorData>,
    },
    Sweep,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Install panic hook for production diagnostics
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.payload().downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("Unknown panic payload");

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        // tracing may not work during a panic
        eprintln!("PANIC: abuse gate panicked at {}: {}", location, payload);

        error!(
            panic_payload = %payload,
            panic_location = %location,
            "Abuse gate panicked"
        );

        default_hook(panic_info);
    }));
}

async fn open_input(path: Option<&PathBuf>) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening input {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

async fn replay_line(
    gate: &GateOrchestrator,
    trust_forwarded: bool,
    op: ReplayOp,
) -> serde_json::Value {
    match op {
        ReplayOp::Evaluate {
            ip,
            remote_addr,
            method,
            path,
            headers,
            session_id,
        } => {
            let ip = ip
                .filter(|ip| !ip.trim().is_empty())
                .unwrap_or_else(|| client_ip(&headers, remote_addr.as_deref(), trust_forwarded));
            let request = GateRequest {
                ip,
                method,
                path,
                headers,
                session_id,
            };
            let decision = gate.evaluate(&request).await;
            json!({ "ip": request.ip, "path": request.path, "decision": decision })
        }
        ReplayOp::Submit {
            challenge_id,
            answer,
            behavior,
        } => {
            let verification = gate.submit_challenge(&challenge_id, &answer, behavior.as_ref());
            json!({ "challenge_id": challenge_id, "verification": verification })
        }
        ReplayOp::Sweep => json!({ "sweep": gate.sweep() }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    install_panic_hook();

    let args = Args::parse();

    // stdout carries decisions, logs go to stderr
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={},security=info",
            env!("CARGO_CRATE_NAME"),
            log_level
        ))
        .with_writer(std::io::stderr)
        .json()
        .init();

    info!(version = VERSION, "Starting Zentinel abuse gate replay");

    let config = args.to_config().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    let trust_forwarded = config.trust_forwarded_headers;

    info!(
        reputation_threshold = config.reputation_threshold,
        auto_block_threshold = config.auto_block_threshold,
        detection_sensitivity = ?config.detection_sensitivity,
        protected_paths = ?config.protected_paths,
        "Configuration loaded"
    );

    let gate = Arc::new(GateOrchestrator::new(config)?);

    if args.print_trap_html {
        println!("{}", gate.injectable_html());
        return Ok(());
    }

    let sweeper = gate.spawn_sweeper();
    let mut lines = open_input(args.input.as_ref()).await?.lines();
    let stdout = std::io::stdout();
    let mut line_no = 0u64;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading input")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, stopping replay");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }

        let op: ReplayOp = match serde_json::from_str(&line) {
            Ok(op) => op,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed input line");
                continue;
            }
        };

        let output = replay_line(&gate, trust_forwarded, op).await;
        let mut out = stdout.lock();
        writeln!(out, "{}", output).context("writing output")?;
    }

    sweeper.abort();

    if args.stats {
        let stats = serde_json::to_string_pretty(&gate.stats())?;
        eprintln!("{}", stats);
    }

    info!(lines = line_no, "Replay complete");
    Ok(())
}
