//! rsipp - configure and supervise SIPp test agents

use clap::Parser;
use rsipp::common::logging;
use rsipp::{cli, commands::Commands};

#[derive(Parser)]
#[command(name = "rsipp", about = "Configure, launch and supervise SIPp agents")]
#[command(version, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
