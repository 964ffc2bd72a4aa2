use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::store::StudyStore;

pub fn run(args: StatusArgs) -> Result<()> {
    if !args.db_path.exists() {
        warn!(path = %args.db_path.display(), "study database missing");
        return Ok(());
    }

    let store = StudyStore::open(&args.db_path)?;
    let counts = store.counts()?;
    info!(
        path = %args.db_path.display(),
        total = counts.total,
        open = counts.open,
        finalized = counts.finalized,
        scored = counts.scored,
        "study store status"
    );
    Ok(())
}
