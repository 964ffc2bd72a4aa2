use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::model::Period;

#[derive(Parser, Debug)]
#[command(
    name = "reportdiff",
    version,
    about = "Prelim/final radiology report reconciliation and diff scoring"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single reconciliation cycle.
    Cycle(CycleArgs),
    /// Run reconciliation cycles forever with an idle interval between them.
    Watch(WatchArgs),
    /// Report study store counts.
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Base URL of the report management server.
    #[arg(long, env = "REPORTDIFF_SITE")]
    pub site: String,

    #[arg(long, env = "REPORTDIFF_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "REPORTDIFF_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// base64("user|pass"), an alternative to separate username/password.
    #[arg(long, env = "REPORTDIFF_LOGIN", hide_env_values = true)]
    pub login: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CycleArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[arg(long, default_value = "reportdiff.db")]
    pub db_path: PathBuf,

    /// Lookback window for the pending-signature browse.
    #[arg(long, value_enum, default_value_t = Period::PastWeek)]
    pub period: Period,

    /// Print the cycle summary as JSON on stdout.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub cycle: CycleArgs,

    /// Seconds to sleep between cycles.
    #[arg(long, default_value_t = 300)]
    pub interval_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "reportdiff.db")]
    pub db_path: PathBuf,
}
