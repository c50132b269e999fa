//! Command-line interface definition for proofwork
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to run the daemon, score sealed sessions and
//! verify a session's chain.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// proofwork - tamper-evident tracking of AI-assisted coding sessions
///
/// Runs a local daemon that records each client session in a hash chain,
/// seals it on completion, and scores the sealed history.
#[derive(Parser, Debug, Clone)]
#[command(name = "proofwork")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Data directory holding chains and indexes
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the session daemon
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Produce unsigned seals even when a keystore is available
        #[arg(long)]
        no_signing: bool,
    },

    /// Compute the AI Proficiency Score from sealed sessions
    Score {
        /// Evaluation framework (space, raw)
        #[arg(short, long)]
        framework: Option<String>,

        /// Print the score and components as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify a session's hash chain and seal signature
    Verify {
        /// Session id to verify
        session_id: String,
    },
}
