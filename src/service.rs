use thiserror::Error;

use crate::model::{BrowseOrdersRequest, OrderSummary, ReportChain};

/// Failure of a remote call. Both variants are treated as transient: the
/// current cycle is abandoned and the watch loop retries after its idle
/// interval.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("transport failure during {operation}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {operation}: {detail}")]
    Protocol {
        operation: &'static str,
        detail: String,
    },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Logical operations the reconciliation engine needs from the report
/// management service. Authentication is a construction-time concern of the
/// concrete client, not part of this interface.
pub trait ReportService {
    /// Resolve an accession to its current report identifier, or `None` when
    /// the study no longer exists upstream (withdrawn or cancelled).
    fn search_by_accession(&self, accession: &str) -> ServiceResult<Option<String>>;

    /// List order summaries matching the request's period and status filters.
    fn browse_orders(&self, request: &BrowseOrdersRequest) -> ServiceResult<Vec<OrderSummary>>;

    /// Fetch the report chain for a report identifier.
    fn get_report_chain(&self, report_id: &str) -> ServiceResult<ReportChain>;
}
