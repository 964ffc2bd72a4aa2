use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info};

use crate::cli::WatchArgs;
use crate::commands::cycle;

/// Retry-forever poll driver. Any fault in a cycle is logged and the loop
/// proceeds to the next idle interval; per-accession idempotence inside the
/// cycle makes the blanket retry safe.
pub fn run(args: WatchArgs) -> Result<()> {
    let interval = Duration::from_secs(args.interval_secs);
    info!(interval_secs = args.interval_secs, "watch started");

    loop {
        match cycle::run_once(&args.cycle) {
            Ok(summary) => {
                info!(
                    prelims_ingested = summary.prelims_ingested,
                    finals_added = summary.finals_added,
                    diffs_scored = summary.diffs_scored,
                    "cycle succeeded"
                );
            }
            Err(err) => {
                error!(error = %err, "cycle failed");
                for cause in err.chain().skip(1) {
                    error!(cause = %cause, "caused by");
                }
            }
        }

        let next_run = Utc::now() + chrono::Duration::from_std(interval)?;
        info!(next_run = %next_run.to_rfc3339(), "sleeping");
        thread::sleep(interval);
    }
}
