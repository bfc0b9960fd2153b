pub mod capture;
pub mod replay;
pub mod runtime;

use clap::{Parser, Subcommand};

pub use capture::{cmd_capture, CaptureArgs};
pub use replay::{cmd_replay, ReplayArgs};

#[derive(Parser, Debug)]
#[command(name = "webreplay", version, about = "Record and replay browser workflows")]
pub struct Cli {
    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record interactions on a page until Ctrl+C, then write the
    /// action list to disk
    Capture(CaptureArgs),
    /// Play a recorded action list back against a live page
    Replay(ReplayArgs),
}
