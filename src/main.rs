use anyhow::Result;
use clap::Parser;

use webreplay_cli::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    cli::runtime::init_tracing(&args.log_level, args.json_logs);

    match args.command {
        Commands::Capture(capture) => cli::cmd_capture(capture).await,
        Commands::Replay(replay) => cli::cmd_replay(replay).await,
    }
}
