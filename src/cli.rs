// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Wallet-native autonomous agent runtime.
#[derive(Parser, Debug)]
#[command(name = "aethernet", version, about)]
pub struct Cli {
    /// Path to config.json (default: ~/.aethernet/config.json).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging to stderr (equivalent to RUST_LOG=debug).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the agent home: default config, governance files, keystore.
    ///
    /// The keystore passphrase is read from AETHERNET_PASSPHRASE or
    /// prompted on stdin.  Re-running is safe; existing files are kept.
    Init,

    /// Run the autonomy daemon until Ctrl-C or a stop condition.
    Run {
        /// Unlock the wallet before starting (passphrase via
        /// AETHERNET_PASSPHRASE or stdin prompt).
        #[arg(long)]
        unlock: bool,
    },

    /// Run exactly one tick and print the report.
    Tick {
        /// Operator prompt injected into the turn input.
        #[arg(long, short = 'p')]
        prompt: Option<String>,
        /// Record a dry-run turn without calling the brain.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the agent status snapshot as JSON.
    Status,

    /// Unlock the wallet for a bounded session.
    Unlock {
        /// Session TTL in seconds.
        #[arg(long, default_value_t = 900)]
        ttl_sec: u64,
    },

    /// Lock the wallet and revoke the active session.
    Lock,

    /// Rotate the keystore passphrase (old and new read from stdin).
    Rotate,

    /// Flip the emergency stop.
    Emergency {
        /// `on` or `off`.
        state: String,
        /// Reason recorded with the state change.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Restore the most recent rollback point for a path.
    Rollback {
        /// The path a self-modification previously wrote.
        path: PathBuf,
    },

    /// Execute an operator command envelope (same JSON protocol as
    /// inbound command messages).
    Command {
        /// e.g. '{"type":"self_mod","targetPath":"notes.md","content":"…"}'
        json: String,
    },

    /// Print the effective configuration and exit.
    ShowConfig,
}
