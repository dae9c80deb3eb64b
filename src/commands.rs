//! CLI command definitions
//!
//! Defines the clap commands for the rsipp CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::command::SocketAddr;

#[derive(Subcommand)]
pub enum Commands {
    /// Print the SIPp command of every agent without running anything
    Cmds {
        #[command(flatten)]
        scenario: ScenarioArgs,
    },

    /// Run a scenario and report each agent's outcome
    Run {
        #[command(flatten)]
        scenario: ScenarioArgs,

        /// Seconds to wait for all agents before stopping them
        #[arg(long)]
        timeout: Option<u64>,

        /// Agent launches per second
        #[arg(long)]
        rate: Option<f64>,

        /// Report agent failures without failing the command
        #[arg(long)]
        no_raise: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Options shared by every command that builds a scenario
#[derive(Args, Debug, Clone, Default)]
pub struct ScenarioArgs {
    /// Directory of SIPp scripts (uac*.xml / uas*.xml); defaults to the
    /// built-in uas + uac call flow
    pub dir: Option<PathBuf>,

    /// Configuration file (default: the platform config dir's config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for agent log files (created if missing)
    #[arg(long)]
    pub logdir: Option<PathBuf>,

    /// Local address every agent binds to
    #[arg(long)]
    pub local_host: Option<String>,

    /// Outbound proxy for clients (host:port)
    #[arg(long)]
    pub proxy: Option<SocketAddr>,

    /// SIPp binary to run (default: sipp on PATH)
    #[arg(long)]
    pub sipp: Option<PathBuf>,

    /// Calls each agent places or answers
    #[arg(long)]
    pub call_count: Option<u32>,

    /// Keep SIPp's default sockets instead of allocating free ones
    #[arg(long)]
    pub no_autolocalsocks: bool,
}
