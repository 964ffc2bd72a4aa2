use tracing::{info, warn};

use crate::model::{
    BrowseOrdersRequest, CycleSummary, OrderStatus, Period, ReportStatus, ReportStatusFilter,
    StudyRecord,
};
use crate::service::{ReportService, ServiceError};
use crate::store::StudyStore;
use crate::diff;

/// Drives one reconciliation cycle: ingest prelims, resolve finals, score
/// diffs. Remote failures abort the cycle and surface to the caller; store
/// failures abandon the affected record and the cycle continues.
pub struct Reconciler<'a, S: ReportService> {
    service: &'a S,
    store: &'a StudyStore,
    site: String,
    period: Period,
}

impl<'a, S: ReportService> Reconciler<'a, S> {
    pub fn new(service: &'a S, store: &'a StudyStore, site: &str, period: Period) -> Self {
        Self {
            service,
            store,
            site: site.to_string(),
            period,
        }
    }

    /// Run the three phases in order. Each phase is independently idempotent:
    /// state transitions are one-way and guarded by null checks, so a cycle
    /// interrupted anywhere can simply be re-run.
    pub fn run_cycle(&self) -> Result<CycleSummary, ServiceError> {
        let mut summary = CycleSummary::default();
        self.ingest_prelims(&mut summary)?;
        self.resolve_finals(&mut summary)?;
        self.score_diffs(&mut summary);
        info!(
            orders_seen = summary.orders_seen,
            prelims_ingested = summary.prelims_ingested,
            finals_checked = summary.finals_checked,
            finals_added = summary.finals_added,
            withdrawn_deleted = summary.withdrawn_deleted,
            diffs_scored = summary.diffs_scored,
            store_errors = summary.store_errors,
            "cycle complete"
        );
        Ok(summary)
    }

    /// Phase A: browse completed orders awaiting signature and upsert any
    /// prelim whose last-draft fingerprint changed since we last saw it.
    fn ingest_prelims(&self, summary: &mut CycleSummary) -> Result<(), ServiceError> {
        let request = BrowseOrdersRequest {
            period: self.period,
            order_status: OrderStatus::Completed,
            report_status: ReportStatusFilter::PendingSignature,
            ..BrowseOrdersRequest::default()
        };
        let orders = self.service.browse_orders(&request)?;
        summary.orders_seen = orders.len();

        for order in &orders {
            if order.dictator_last_name.is_none() {
                // Nothing dictated yet; not a prelim.
                continue;
            }
            let Some(report_id) = order.report_id.as_deref() else {
                continue;
            };

            let chain = self.service.get_report_chain(report_id)?;
            let fingerprint = chain.last_draft_date.clone();

            match self.store.find_fingerprint(&order.accession) {
                Ok(Some(stored)) if Some(stored.as_str()) == fingerprint.as_deref() => continue,
                Ok(_) => {}
                Err(error) => {
                    warn!(accession = %order.accession, error = %error, "fingerprint lookup failed");
                    summary.store_errors += 1;
                    continue;
                }
            }

            let record = StudyRecord {
                site: self.site.clone(),
                accession: order.accession.clone(),
                timestamp: chain.complete_date.clone(),
                procedure_description: chain.procedure_description.clone(),
                procedure_code: chain.procedure_code.clone(),
                modality: chain.modality.clone(),
                resident: full_name(
                    chain.dictator_first_name.as_deref(),
                    chain.dictator_last_name.as_deref(),
                ),
                resident_id: chain.dictator_account_id.clone(),
                prelim: chain.content_text.clone(),
                prelim_timestamp: fingerprint,
                ..StudyRecord::default()
            };

            if let Err(error) = self.store.upsert(&record) {
                warn!(accession = %order.accession, error = %error, "prelim upsert failed");
                summary.store_errors += 1;
                continue;
            }
            info!(accession = %order.accession, "prelim ingested");
            summary.prelims_ingested += 1;
        }
        Ok(())
    }

    /// Phase B: for every open study, look for a signed final upstream. An
    /// accession that no longer resolves was withdrawn and its record is
    /// deleted; a non-final status leaves the record open for a later cycle.
    fn resolve_finals(&self, summary: &mut CycleSummary) -> Result<(), ServiceError> {
        let open = match self.store.open_accessions() {
            Ok(open) => open,
            Err(error) => {
                warn!(error = %error, "unable to list open studies");
                summary.store_errors += 1;
                return Ok(());
            }
        };

        for accession in open {
            summary.finals_checked += 1;

            let Some(report_id) = self.service.search_by_accession(&accession)? else {
                info!(accession = %accession, "withdrawn upstream, deleting");
                if let Err(error) = self.store.delete(&accession) {
                    warn!(accession = %accession, error = %error, "delete failed");
                    summary.store_errors += 1;
                    continue;
                }
                summary.withdrawn_deleted += 1;
                continue;
            };

            let chain = self.service.get_report_chain(&report_id)?;
            if chain.status != ReportStatus::Final {
                continue;
            }

            let attending = full_name(
                chain.signer_first_name.as_deref(),
                chain.signer_last_name.as_deref(),
            );
            match self.store.update_final_fields(
                &accession,
                attending.as_deref(),
                chain.signer_account_id.as_deref(),
                chain.content_text.as_deref(),
                chain.last_sign_date.as_deref(),
            ) {
                Ok(true) => {
                    info!(accession = %accession, "final recorded");
                    summary.finals_added += 1;
                }
                Ok(false) => {}
                Err(error) => {
                    warn!(accession = %accession, error = %error, "final update failed");
                    summary.store_errors += 1;
                }
            }
        }
        Ok(())
    }

    /// Phase C: score finalized records that have no diff yet. Missing text
    /// or an empty normalized final leaves the record unscored; that is a
    /// deferred state, not an error.
    fn score_diffs(&self, summary: &mut CycleSummary) {
        let pending = match self.store.unscored_finals() {
            Ok(pending) => pending,
            Err(error) => {
                warn!(error = %error, "unable to list unscored studies");
                summary.store_errors += 1;
                return;
            }
        };

        for record in pending {
            let (Some(prelim), Some(final_text)) =
                (record.prelim.as_deref(), record.final_text.as_deref())
            else {
                continue;
            };
            let Some(outcome) = diff::score(prelim, final_text) else {
                continue;
            };

            match self
                .store
                .update_diff_fields(&record.accession, outcome.score, outcome.percent)
            {
                Ok(true) => {
                    info!(
                        accession = %record.accession,
                        score = outcome.score,
                        percent = outcome.percent,
                        "diff scored"
                    );
                    summary.diffs_scored += 1;
                }
                Ok(false) => {}
                Err(error) => {
                    warn!(accession = %record.accession, error = %error, "diff update failed");
                    summary.store_errors += 1;
                }
            }
        }
    }
}

fn full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    match (first, last) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (None, Some(last)) => Some(last.to_string()),
        (Some(first), None) => Some(first.to_string()),
        (None, None) => None,
    }
}
