use clap::{Args, Parser, Subcommand};

/// Streams real-time entity events to stdout as JSON lines.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the event source and print updates until Ctrl+C.
    Run(RunCmd),
}

#[derive(Args, Debug, Default)]
pub struct RunCmd {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Bearer token sent as the `token` query parameter.
    #[arg(long, env = "ENTITY_EVENTS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Tenant id sent as the `tenant_id` query parameter.
    #[arg(long)]
    pub tenant: Option<String>,

    /// Event type to watch. Repeat for several; `*` watches everything.
    #[arg(short, long = "event")]
    pub events: Vec<String>,

    /// Debounce window in milliseconds.
    #[arg(long)]
    pub throttle_ms: Option<u64>,

    /// Deliver updates in batches of this size.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Flush a partial batch this long after its first update.
    #[arg(long)]
    pub batch_timeout_ms: Option<u64>,
}
