use std::path::PathBuf;

use clap::{Parser, Subcommand};
use knock_client::config::{DEFAULT_API_URL, DEFAULT_DEBOUNCE, DEFAULT_SETTLE};

#[derive(Parser)]
#[command(name = "knock")]
#[command(about = "Knock on your teammates from the terminal")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Knock service origin
    #[arg(long, global = true, env = "KNOCK_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Data directory (defaults to ~/.knock)
    #[arg(long, global = true, env = "KNOCK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Quiet window between coalesced knocks, in milliseconds
    #[arg(long, global = true, env = "KNOCK_DEBOUNCE_MS", default_value_t = DEFAULT_DEBOUNCE.as_millis() as u64)]
    pub debounce_ms: u64,

    /// How long the in-flight indicator stays on after a knock returns
    #[arg(long, global = true, env = "KNOCK_SETTLE_MS", default_value_t = DEFAULT_SETTLE.as_millis() as u64)]
    pub settle_ms: u64,

    /// Print the sign-in URL instead of launching a browser
    #[arg(long, global = true)]
    pub no_browser: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in through the browser
    SignIn,
    /// Probe the stored session, signing in again if the probe fails
    Check,
    /// Show the stored session
    Status,
    /// Knock once per line read from stdin (Ctrl-D to finish)
    Send,
    /// Remove stored credentials
    Logout,
}
