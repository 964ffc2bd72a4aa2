use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::credentials::Credentials;
use crate::model::{BrowseOrdersRequest, OrderSummary, ReportChain, ReportStatus};
use crate::service::{ReportService, ServiceError, ServiceResult};

const ACTION_NAMESPACE: &str = "Nuance/Radiology/Services/2010/01";
const CLIENT_VERSION: &str = "7.0.154.0";

/// Blocking SOAP client for the report management service. Holds the session
/// token obtained at sign-in and injects it into every envelope header.
pub struct SoapClient {
    http: Client,
    site: String,
    session: String,
}

impl SoapClient {
    /// Sign in and return a ready client. The session token lives for the
    /// life of this value; callers reconnect per poll cycle.
    pub fn connect(site: &str, credentials: &Credentials) -> ServiceResult<Self> {
        let mut client = Self {
            http: Client::new(),
            site: site.trim_end_matches('/').to_string(),
            session: String::new(),
        };
        client.sign_in(credentials)?;
        Ok(client)
    }

    fn sign_in(&mut self, credentials: &Credentials) -> ServiceResult<()> {
        let params = format!(
            concat!(
                "<healthSystemID>1</healthSystemID>",
                "<accessCode i:nil=\"true\" xmlns:i=\"http://www.w3.org/2001/XMLSchema-instance\"/>",
                "<loginName>{login}</loginName>",
                "<password>{password}</password>",
                "<adminMode>false</adminMode>",
                "<version>{version}</version>",
                "<workstation></workstation>"
            ),
            login = escape(credentials.username.as_str()),
            password = escape(credentials.password.as_str()),
            version = CLIENT_VERSION,
        );
        let response = self.call("session.svc", "Authentication/SignIn", &params)?;
        self.session =
            xml_text(&response, &["AccountSession"]).ok_or_else(|| ServiceError::Protocol {
                operation: "SignIn",
                detail: "response carried no AccountSession".to_string(),
            })?;
        debug!(site = %self.site, "signed in");
        Ok(())
    }

    fn envelope(&self, service: &str, action: &str, params: &str) -> String {
        let session_header = if self.session.is_empty() {
            String::new()
        } else {
            format!("<AccountSession>{}</AccountSession>", self.session)
        };
        let url = format!("{}/RAS/{}", self.site, service);
        let verb = action.rsplit('/').next().unwrap_or(action);

        format!(
            concat!(
                "<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\" ",
                "xmlns:a=\"http://www.w3.org/2005/08/addressing\">",
                "<s:Header>",
                "<a:Action s:mustUnderstand=\"1\">{namespace}/{action}</a:Action>",
                "{session}",
                "<a:To s:mustUnderstand=\"1\">{url}</a:To>",
                "</s:Header>",
                "<s:Body><{verb} xmlns=\"{namespace}\">{params}</{verb}></s:Body>",
                "</s:Envelope>"
            ),
            namespace = ACTION_NAMESPACE,
            action = action,
            session = session_header,
            url = url,
            verb = verb,
            params = params,
        )
    }

    fn call(&self, service: &str, action: &str, params: &str) -> ServiceResult<String> {
        let operation = operation_name(action);
        let url = format!("{}/RAS/{}", self.site, service);
        let body = self.envelope(service, action, params);

        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/soap+xml")
            .body(body)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|source| ServiceError::Transport { operation, source })?;

        response
            .text()
            .map_err(|source| ServiceError::Transport { operation, source })
    }
}

impl ReportService for SoapClient {
    fn search_by_accession(&self, accession: &str) -> ServiceResult<Option<String>> {
        let params = format!(
            concat!(
                "<siteID>0</siteID>",
                "<searchType>Accession</searchType>",
                "<values xmlns:b=\"http://schemas.microsoft.com/2003/10/Serialization/Arrays\" ",
                "xmlns:i=\"http://www.w3.org/2001/XMLSchema-instance\">",
                "<b:string>{accession}</b:string>",
                "</values>"
            ),
            accession = escape(accession),
        );
        let response = self.call("explorer.svc", "OrderExplorer/QuickSearchDV", &params)?;
        Ok(xml_text(&response, &["ReportID"]))
    }

    fn browse_orders(&self, request: &BrowseOrdersRequest) -> ServiceResult<Vec<OrderSummary>> {
        let params = format!(
            concat!(
                "<time xmlns:b=\"http://schemas.datacontract.org/2004/07/Nuance.Radiology.Services.Contracts\" ",
                "xmlns:i=\"http://www.w3.org/2001/XMLSchema-instance\">",
                "<b:From>{from}</b:From><b:Period>{period}</b:Period><b:To>{to}</b:To>",
                "</time>",
                "<orderStatus>{order_status}</orderStatus>",
                "<reportStatus>{report_status}</reportStatus>",
                "<accountID>{account}</accountID>",
                "<modality>{modality}</modality>",
                "<anatomy>{anatomy}</anatomy>"
            ),
            from = escape(request.from_date.as_str()),
            period = request.period.wire_name(),
            to = escape(request.to_date.as_str()),
            order_status = request.order_status.wire_name(),
            report_status = request.report_status.wire_name(),
            account = request.account_id,
            modality = request.modality,
            anatomy = request.anatomy,
        );
        let response = self.call("explorer.svc", "OrderExplorer/BrowseOrdersDV", &params)?;
        Ok(parse_order_summaries(&response))
    }

    fn get_report_chain(&self, report_id: &str) -> ServiceResult<ReportChain> {
        let params = format!(
            "<reportID>{}</reportID><fetchBlob>false</fetchBlob>",
            escape(report_id)
        );
        let response = self.call("report.svc", "ReportManagement/GetReportChain", &params)?;
        Ok(parse_report_chain(&response))
    }
}

fn operation_name(action: &str) -> &'static str {
    match action {
        "Authentication/SignIn" => "SignIn",
        "OrderExplorer/QuickSearchDV" => "QuickSearchDV",
        "OrderExplorer/BrowseOrdersDV" => "BrowseOrdersDV",
        "ReportManagement/GetReportChain" => "GetReportChain",
        _ => "unknown",
    }
}

/// Text of the first element whose ancestry ends with `path`, matching on
/// local names so namespace prefixes don't matter. Document order, like an
/// XPath `.//a/b` search.
fn xml_text(xml: &str, path: &[&str]) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(local_name(start.name().as_ref())),
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(text)) => {
                if stack_ends_with(&stack, path) {
                    let value = text
                        .unescape()
                        .map(|value| value.trim().to_string())
                        .unwrap_or_default();
                    if !value.is_empty() {
                        return Some(value);
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn stack_ends_with(stack: &[String], path: &[&str]) -> bool {
    path.len() <= stack.len()
        && stack[stack.len() - path.len()..]
            .iter()
            .zip(path)
            .all(|(name, segment)| name == segment)
}

fn local_name(qname: &[u8]) -> String {
    let name = qname
        .rsplit(|&byte| byte == b':')
        .next()
        .unwrap_or(qname);
    String::from_utf8_lossy(name).into_owned()
}

#[derive(Default)]
struct SummaryFields {
    accession: Option<String>,
    report_id: Option<String>,
    dictator_last_name: Option<String>,
    dictator_first_name: Option<String>,
}

/// Pull one `OrderSummary` per VExplorer element out of a BrowseOrdersDV
/// response. Entries without an accession cannot be keyed and are dropped.
fn parse_order_summaries(xml: &str) -> Vec<OrderSummary> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<String> = Vec::new();
    let mut pending: Option<SummaryFields> = None;
    let mut summaries = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = local_name(start.name().as_ref());
                if name == "VExplorer" && pending.is_none() {
                    pending = Some(SummaryFields::default());
                }
                stack.push(name);
            }
            Ok(Event::Text(text)) => {
                if let (Some(fields), Some(leaf)) = (pending.as_mut(), stack.last()) {
                    let value = text
                        .unescape()
                        .map(|value| value.trim().to_string())
                        .unwrap_or_default();
                    if !value.is_empty() {
                        match leaf.as_str() {
                            "Accession" => fields.accession = Some(value),
                            "ReportID" => fields.report_id = Some(value),
                            "DictatorLastName" => fields.dictator_last_name = Some(value),
                            "DictatorFirstName" => fields.dictator_first_name = Some(value),
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(_)) => {
                let closed = stack.pop();
                if closed.as_deref() == Some("VExplorer")
                    && let Some(fields) = pending.take()
                    && let Some(accession) = fields.accession
                {
                    summaries.push(OrderSummary {
                        accession,
                        report_id: fields.report_id,
                        dictator_last_name: fields.dictator_last_name,
                        dictator_first_name: fields.dictator_first_name,
                    });
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    summaries
}

/// Flatten a GetReportChain response to the fields the engine consumes. The
/// payloads are report-sized, so re-scanning per field is fine.
fn parse_report_chain(xml: &str) -> ReportChain {
    let status = xml_text(xml, &["OriginalReport", "ReportStatus"])
        .map(|value| ReportStatus::from_wire(&value))
        .unwrap_or(ReportStatus::Unknown(String::new()));

    ReportChain {
        status,
        content_text: xml_text(xml, &["OriginalReport", "ContentText"]),
        dictator_first_name: xml_text(xml, &["OriginalReport", "Dictator", "Person", "FirstName"]),
        dictator_last_name: xml_text(xml, &["OriginalReport", "Dictator", "Person", "LastName"]),
        dictator_account_id: xml_text(xml, &["OriginalReport", "Dictator", "AccountID"]),
        signer_first_name: xml_text(xml, &["OriginalReport", "Signer", "Person", "FirstName"]),
        signer_last_name: xml_text(xml, &["OriginalReport", "Signer", "Person", "LastName"]),
        signer_account_id: xml_text(xml, &["OriginalReport", "Signer", "AccountID"]),
        modality: xml_text(xml, &["DiagnosticServSect"]),
        procedure_description: xml_text(xml, &["ProcedureDescList"]),
        procedure_code: xml_text(xml, &["ProcedureCodeList"]),
        complete_date: xml_text(xml, &["CompleteDate"]),
        last_draft_date: xml_text(xml, &["OriginalReport", "LastDraftDate"]),
        last_sign_date: xml_text(xml, &["OriginalReport", "LastSignDate"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderStatus, Period, ReportStatusFilter};

    fn test_client(session: &str) -> SoapClient {
        SoapClient {
            http: Client::new(),
            site: "https://ras.example.org".to_string(),
            session: session.to_string(),
        }
    }

    #[test]
    fn envelope_carries_action_session_and_body_verb() {
        let client = test_client("tok-123");
        let envelope = client.envelope(
            "report.svc",
            "ReportManagement/GetReportChain",
            "<reportID>9</reportID>",
        );

        assert!(envelope.contains(
            "<a:Action s:mustUnderstand=\"1\">Nuance/Radiology/Services/2010/01/ReportManagement/GetReportChain</a:Action>"
        ));
        assert!(envelope.contains("<AccountSession>tok-123</AccountSession>"));
        assert!(envelope.contains("https://ras.example.org/RAS/report.svc"));
        assert!(envelope.contains(
            "<GetReportChain xmlns=\"Nuance/Radiology/Services/2010/01\"><reportID>9</reportID></GetReportChain>"
        ));
    }

    #[test]
    fn envelope_omits_session_before_sign_in() {
        let client = test_client("");
        let envelope = client.envelope("session.svc", "Authentication/SignIn", "<x/>");
        assert!(!envelope.contains("AccountSession"));
    }

    #[test]
    fn xml_text_matches_namespaced_nested_paths() {
        let xml = r#"
            <s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
              <s:Body>
                <b:OriginalReport xmlns:b="urn:contracts">
                  <b:LastDraftDate>2026-08-01T10:15:00</b:LastDraftDate>
                  <b:Dictator><b:Person><b:LastName>Rivera</b:LastName></b:Person></b:Dictator>
                </b:OriginalReport>
              </s:Body>
            </s:Envelope>
        "#;

        assert_eq!(
            xml_text(xml, &["OriginalReport", "LastDraftDate"]).as_deref(),
            Some("2026-08-01T10:15:00")
        );
        assert_eq!(
            xml_text(xml, &["OriginalReport", "Dictator", "Person", "LastName"]).as_deref(),
            Some("Rivera")
        );
        assert_eq!(xml_text(xml, &["OriginalReport", "LastSignDate"]), None);
    }

    #[test]
    fn xml_text_unescapes_entities() {
        let xml = "<ContentText>chest &amp; abdomen</ContentText>";
        assert_eq!(
            xml_text(xml, &["ContentText"]).as_deref(),
            Some("chest & abdomen")
        );
    }

    #[test]
    fn browse_response_yields_one_summary_per_order() {
        let xml = r#"
            <Results>
              <VExplorer>
                <Accession>ACC-1</Accession>
                <ReportID>901</ReportID>
                <DictatorLastName>Rivera</DictatorLastName>
                <DictatorFirstName>Alex</DictatorFirstName>
              </VExplorer>
              <VExplorer>
                <Accession>ACC-2</Accession>
                <ReportID>902</ReportID>
              </VExplorer>
              <VExplorer>
                <ReportID>903</ReportID>
              </VExplorer>
            </Results>
        "#;

        let summaries = parse_order_summaries(xml);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].accession, "ACC-1");
        assert_eq!(summaries[0].report_id.as_deref(), Some("901"));
        assert_eq!(summaries[0].dictator_last_name.as_deref(), Some("Rivera"));
        assert_eq!(summaries[1].accession, "ACC-2");
        assert!(summaries[1].dictator_last_name.is_none());
    }

    #[test]
    fn report_chain_parse_extracts_final_fields() {
        let xml = r#"
            <Chain xmlns:b="urn:contracts">
              <b:CompleteDate>2026-08-01T09:30:00</b:CompleteDate>
              <b:DiagnosticServSect>CT</b:DiagnosticServSect>
              <b:OriginalReport>
                <b:ReportStatus>Final</b:ReportStatus>
                <b:ContentText>No acute findings. No effusion.</b:ContentText>
                <b:LastSignDate>2026-08-02T08:00:00</b:LastSignDate>
                <b:Signer>
                  <b:AccountID>88</b:AccountID>
                  <b:Person>
                    <b:FirstName>Sam</b:FirstName>
                    <b:LastName>Chen</b:LastName>
                  </b:Person>
                </b:Signer>
              </b:OriginalReport>
            </Chain>
        "#;

        let chain = parse_report_chain(xml);
        assert_eq!(chain.status, ReportStatus::Final);
        assert_eq!(
            chain.content_text.as_deref(),
            Some("No acute findings. No effusion.")
        );
        assert_eq!(chain.signer_first_name.as_deref(), Some("Sam"));
        assert_eq!(chain.signer_last_name.as_deref(), Some("Chen"));
        assert_eq!(chain.signer_account_id.as_deref(), Some("88"));
        assert_eq!(chain.modality.as_deref(), Some("CT"));
        assert_eq!(chain.last_sign_date.as_deref(), Some("2026-08-02T08:00:00"));
    }

    #[test]
    fn browse_request_parameters_use_wire_vocabulary() {
        let request = BrowseOrdersRequest {
            period: Period::PastWeek,
            order_status: OrderStatus::Completed,
            report_status: ReportStatusFilter::PendingSignature,
            ..BrowseOrdersRequest::default()
        };
        assert_eq!(request.period.wire_name(), "PastWeek");
        assert_eq!(request.order_status.wire_name(), "Completed");
        assert_eq!(request.report_status.wire_name(), "PendingSignature");
        assert_eq!(request.from_date, "0001-01-01T00:00:00");
    }
}
