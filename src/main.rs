// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use aethernet_brain::HttpBrain;
use aethernet_config::{Config, DiagnosticSeverity};
use aethernet_core::runtime::AgentRuntime;
use aethernet_core::{DaemonOutcome, LocalCompute, NullTransport};
use aethernet_wallet::{check_passphrase_strength, EncryptedKeystore, Signer};

use cli::{Cli, Commands};

const PASSPHRASE_ENV: &str = "AETHERNET_PASSPHRASE";

const DEFAULT_CONSTITUTION: &str = "# Constitution\n\n\
1. Preserve the operator's funds and keys.\n\
2. Never act outside the configured action set.\n\
3. Stop when told to stop.\n";

const DEFAULT_LAWS: &str = "# Laws\n\n\
- Mutating actions require an unlocked wallet session.\n\
- Self-modification is bounded, reversible and rate-limited.\n\
- Emergency stop overrides everything.\n";

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".aethernet/config.json")
    })
}

/// Load and validate; error-severity diagnostics abort startup.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let config = aethernet_config::load_from(&config_path(cli))?;
    let diagnostics = aethernet_config::validate(&config);
    for d in &diagnostics {
        match d.severity {
            DiagnosticSeverity::Error => eprintln!("config error [{}] {}: {}", d.code, d.field, d.message),
            DiagnosticSeverity::Warning => {
                eprintln!("config warning [{}] {}: {}", d.code, d.field, d.message)
            }
        }
    }
    anyhow::ensure!(
        aethernet_config::is_startable(&diagnostics),
        "configuration is invalid, refusing to start"
    );
    Ok(config)
}

fn read_passphrase(label: &str) -> anyhow::Result<String> {
    if let Ok(pass) = std::env::var(PASSPHRASE_ENV) {
        if !pass.trim().is_empty() {
            return Ok(pass);
        }
    }
    eprint!("{label}: ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading passphrase from stdin")?;
    let pass = line.trim_end_matches(['\n', '\r']).to_string();
    anyhow::ensure!(!pass.is_empty(), "empty passphrase");
    Ok(pass)
}

fn build_runtime(config: Config) -> anyhow::Result<AgentRuntime> {
    let sandboxes = config.data().join("sandboxes");
    let brain = Arc::new(HttpBrain::new(config.brain.clone()));
    let mut runtime = AgentRuntime::new(
        config,
        brain,
        Arc::new(NullTransport),
        Arc::new(LocalCompute::new(sandboxes)),
    )?;
    runtime.initialize()?;
    Ok(runtime)
}

fn run_init(cli: &Cli) -> anyhow::Result<()> {
    let path = config_path(cli);
    let home = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&home)?;

    if !path.exists() {
        let mut config = Config::default();
        config.home_dir = Some(home.clone());
        std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;
        println!("wrote {}", path.display());
    }
    for (file, content) in [
        ("constitution.md", DEFAULT_CONSTITUTION),
        ("laws.md", DEFAULT_LAWS),
    ] {
        let p = home.join(file);
        if !p.exists() {
            std::fs::write(&p, content)?;
            println!("wrote {}", p.display());
        }
    }
    let keystore = home.join("wallet.enc.json");
    if !keystore.exists() {
        let pass = read_passphrase("new keystore passphrase")?;
        check_passphrase_strength(&pass)?;
        let signer = Signer::generate();
        EncryptedKeystore::encrypt(signer.secret(), &pass)?.save(&keystore)?;
        println!("wrote {} (address {})", keystore.display(), signer.address());
    }
    println!("agent home ready at {}", home.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if matches!(cli.command, Commands::Init) {
        return run_init(&cli);
    }

    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run { unlock } => {
            let runtime = build_runtime(config)?;
            if *unlock {
                let pass = read_passphrase("wallet passphrase")?;
                let ttl = runtime.config().wallet_session_ttl_sec;
                let address = runtime.unlock_wallet(&pass, ttl)?;
                println!("wallet unlocked: {address}");
            }
            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal_cancel.cancel();
                }
            });
            let outcome = runtime.run_daemon(cancel).await;
            runtime.close()?;
            match outcome {
                DaemonOutcome::Cancelled => println!("daemon cancelled"),
                DaemonOutcome::Stopped => println!("daemon stopped after repeated failures"),
                DaemonOutcome::Dead => println!("daemon stopped: survival tier is dead"),
            }
            Ok(())
        }
        Commands::Tick { prompt, dry_run } => {
            let runtime = build_runtime(config)?;
            let report = runtime.tick(prompt.as_deref(), *dry_run).await?;
            println!(
                "turn {} tier={} actions={} failures={} malformed={} sleep={}ms",
                report.turn_id,
                report.tier,
                report.actions_total,
                report.action_failures,
                report.malformed,
                report.next_sleep_ms
            );
            runtime.close()?;
            Ok(())
        }
        Commands::Status => {
            let runtime = build_runtime(config)?;
            println!("{}", serde_json::to_string_pretty(&runtime.status()?)?);
            Ok(())
        }
        Commands::Unlock { ttl_sec } => {
            let runtime = build_runtime(config)?;
            let pass = read_passphrase("wallet passphrase")?;
            let address = runtime.unlock_wallet(&pass, *ttl_sec)?;
            println!("wallet unlocked: {address} (ttl {ttl_sec}s)");
            Ok(())
        }
        Commands::Lock => {
            let runtime = build_runtime(config)?;
            runtime.lock_wallet()?;
            println!("wallet locked");
            Ok(())
        }
        Commands::Rotate => {
            let runtime = build_runtime(config)?;
            let old = read_passphrase("current passphrase")?;
            // The env var (if set) covered the current passphrase; the new
            // one always comes from the terminal.
            std::env::remove_var(PASSPHRASE_ENV);
            let new = read_passphrase("new passphrase")?;
            runtime.rotate_wallet(&old, &new)?;
            println!("passphrase rotated; wallet locked");
            Ok(())
        }
        Commands::Emergency { state, reason } => {
            let enabled = match state.as_str() {
                "on" => true,
                "off" => false,
                other => anyhow::bail!("emergency state must be 'on' or 'off', got {other:?}"),
            };
            let runtime = build_runtime(config)?;
            runtime.set_emergency_stop(enabled, reason.as_deref())?;
            println!("emergency stop {}", if enabled { "enabled" } else { "cleared" });
            Ok(())
        }
        Commands::Rollback { path } => {
            let runtime = build_runtime(config)?;
            runtime.rollback(path)?;
            println!("rolled back {}", path.display());
            Ok(())
        }
        Commands::Command { json } => {
            let runtime = build_runtime(config)?;
            let reply = runtime.handle_operator_command(json).await?;
            println!("{reply}");
            Ok(())
        }
    }
}
