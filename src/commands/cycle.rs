use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CycleArgs;
use crate::credentials;
use crate::engine::Reconciler;
use crate::model::CycleSummary;
use crate::soap::SoapClient;
use crate::store::StudyStore;
use crate::util::now_utc_string;

pub fn run(args: CycleArgs) -> Result<()> {
    let summary = run_once(&args)?;

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&summary).context("failed to render cycle summary")?;
        println!("{rendered}");
    }
    Ok(())
}

/// Connect, run one full reconciliation cycle, and return its counters.
/// A fresh session is established per call; the watch loop relies on that to
/// recover from expired sessions between cycles.
pub fn run_once(args: &CycleArgs) -> Result<CycleSummary> {
    let started_at = now_utc_string();
    let store = StudyStore::open(&args.db_path)?;

    let credentials = credentials::resolve(&args.connection)?;
    let client = SoapClient::connect(&args.connection.site, &credentials)
        .context("failed to sign in to report service")?;

    let reconciler = Reconciler::new(&client, &store, &args.connection.site, args.period);
    let summary = reconciler
        .run_cycle()
        .context("reconciliation cycle failed")?;

    info!(
        started_at = %started_at,
        finished_at = %now_utc_string(),
        "cycle finished"
    );
    Ok(summary)
}
