use clap::ValueEnum;
use serde::Serialize;

/// One row per accession in the study table. Created by prelim ingest,
/// completed by finalization, closed out by diff scoring.
#[derive(Debug, Clone, Default)]
pub struct StudyRecord {
    pub site: String,
    pub accession: String,
    pub timestamp: Option<String>,
    pub procedure_description: Option<String>,
    pub procedure_code: Option<String>,
    pub modality: Option<String>,
    pub resident: Option<String>,
    pub resident_id: Option<String>,
    pub attending: Option<String>,
    pub attending_id: Option<String>,
    pub prelim: Option<String>,
    pub prelim_timestamp: Option<String>,
    pub final_text: Option<String>,
    pub final_timestamp: Option<String>,
    pub diff_score: Option<i64>,
    pub diff_score_percent: Option<f64>,
}

/// One entry from a BrowseOrders response. Dictator fields are absent while
/// the upstream record is still incomplete (nothing has been dictated yet).
#[derive(Debug, Clone, Default)]
pub struct OrderSummary {
    pub accession: String,
    pub report_id: Option<String>,
    pub dictator_last_name: Option<String>,
    pub dictator_first_name: Option<String>,
}

/// Fields extracted from a GetReportChain response, flattened to the subset
/// the reconciliation engine consumes.
#[derive(Debug, Clone, Default)]
pub struct ReportChain {
    pub status: ReportStatus,
    pub content_text: Option<String>,
    pub dictator_first_name: Option<String>,
    pub dictator_last_name: Option<String>,
    pub dictator_account_id: Option<String>,
    pub signer_first_name: Option<String>,
    pub signer_last_name: Option<String>,
    pub signer_account_id: Option<String>,
    pub modality: Option<String>,
    pub procedure_description: Option<String>,
    pub procedure_code: Option<String>,
    pub complete_date: Option<String>,
    pub last_draft_date: Option<String>,
    pub last_sign_date: Option<String>,
}

/// Lifecycle status of a report as reported by the upstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    Draft,
    PendingSignature,
    PendingCorrection,
    Corrected,
    CorrectionRejected,
    SignRejected,
    Final,
    Addended,
    Rejected,
    Unknown(String),
}

impl Default for ReportStatus {
    fn default() -> Self {
        ReportStatus::Unknown(String::new())
    }
}

impl ReportStatus {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "Draft" => Self::Draft,
            "PendingSignature" => Self::PendingSignature,
            "PendingCorrection" => Self::PendingCorrection,
            "Corrected" => Self::Corrected,
            "CorrectionRejected" => Self::CorrectionRejected,
            "SignRejected" => Self::SignRejected,
            "Final" => Self::Final,
            "Addended" => Self::Addended,
            "Rejected" => Self::Rejected,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Lookback window accepted by BrowseOrders.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Period {
    PastHour,
    PastFourHours,
    Today,
    Yesterday,
    PastTwoDays,
    PastThreeDays,
    PastWeek,
    PastTwoWeeks,
    PastMonth,
}

impl Period {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::PastHour => "PastHour",
            Self::PastFourHours => "PastFourHours",
            Self::Today => "Today",
            Self::Yesterday => "Yesterday",
            Self::PastTwoDays => "PastTwoDays",
            Self::PastThreeDays => "PastThreeDays",
            Self::PastWeek => "PastWeek",
            Self::PastTwoWeeks => "PastTwoWeeks",
            Self::PastMonth => "PastMonth",
        }
    }
}

// The upstream service also accepts Scheduled, Temporary, Cancelled,
// DictatedExt and Entered; the reconciler only ever browses completed orders.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum OrderStatus {
    #[default]
    All,
    Completed,
}

impl OrderStatus {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Completed => "Completed",
        }
    }
}

// Upstream also accepts WetRead, Draft, NonFinal, Final, Addended and the
// various correction states; PendingSignature selects resident prelims.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ReportStatusFilter {
    #[default]
    All,
    PendingSignature,
}

impl ReportStatusFilter {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::All => "All",
            Self::PendingSignature => "PendingSignature",
        }
    }
}

/// Typed input for the BrowseOrders operation. Zero account/modality/anatomy
/// ids and the epoch-ish date bounds mean "no filter" upstream.
#[derive(Debug, Clone)]
pub struct BrowseOrdersRequest {
    pub period: Period,
    pub order_status: OrderStatus,
    pub report_status: ReportStatusFilter,
    pub account_id: u32,
    pub modality: u32,
    pub anatomy: u32,
    pub from_date: String,
    pub to_date: String,
}

impl Default for BrowseOrdersRequest {
    fn default() -> Self {
        Self {
            period: Period::PastWeek,
            order_status: OrderStatus::All,
            report_status: ReportStatusFilter::All,
            account_id: 0,
            modality: 0,
            anatomy: 0,
            from_date: "0001-01-01T00:00:00".to_string(),
            to_date: "0001-01-01T00:00:00".to_string(),
        }
    }
}

/// Counters for one reconciliation cycle.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CycleSummary {
    pub orders_seen: usize,
    pub prelims_ingested: usize,
    pub finals_checked: usize,
    pub finals_added: usize,
    pub withdrawn_deleted: usize,
    pub diffs_scored: usize,
    pub store_errors: usize,
}
