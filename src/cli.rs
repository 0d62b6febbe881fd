use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::types::Scope;

/// A3S Feed - Event-feed client for the game server
#[derive(Debug, Parser)]
#[command(name = "a3s-feed", version, about)]
pub struct Cli {
    /// Configuration file (missing file means defaults)
    #[arg(long, global = true, default_value = "a3s-feed.toml")]
    pub config: PathBuf,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Log in and print events until interrupted
    Listen {
        /// Account login
        #[arg(long)]
        login: String,

        /// Account password
        #[arg(long)]
        password: String,

        /// Extra scopes to subscribe to besides `user` (repeatable)
        #[arg(long = "scope")]
        scopes: Vec<Scope>,
    },

    /// List the games offered by the server
    Games,

    /// Create an account
    Register {
        /// Account name
        #[arg(long)]
        username: String,

        /// Contact email
        #[arg(long)]
        email: String,

        /// Account password
        #[arg(long)]
        password: String,
    },
}
