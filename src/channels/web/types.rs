//! Request and response DTOs for the web API.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{
    ClientRecord, ClientRollup, DocumentRecord, DocumentRevisionRecord, InvoiceLineItemRecord,
    InvoiceRecord, MatterRecord, TimeEntryRecord, TrustBalance, TrustEntryRecord,
    TrustReconciliationRecord,
};
use crate::legal::compliance::ComplianceReport;
use crate::legal::lso::PracticeComplianceReport;
use crate::legal::risk::RiskAssessment;

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub uptime_secs: u64,
}

// --- Clients ---

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    /// "individual" or "entity"; defaults to individual.
    pub client_type: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

/// Omitted fields are left unchanged; an empty string clears a nullable
/// field.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    pub client_type: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ClientListQuery {
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClientListResponse {
    pub clients: Vec<ClientRecord>,
}

#[derive(Debug, Serialize)]
pub struct ClientDetailResponse {
    pub client: ClientRecord,
    pub rollup: ClientRollup,
}

// --- Matters ---

#[derive(Debug, Deserialize)]
pub struct CreateMatterRequest {
    pub matter_id: String,
    pub client_id: Uuid,
    /// "will", "poa_property", "poa_personal_care", "estate_admin", "general".
    pub matter_type: String,
    pub responsible_lawyer: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMatterRequest {
    pub client_id: Option<Uuid>,
    pub matter_type: Option<String>,
    pub status: Option<String>,
    pub responsible_lawyer: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MatterListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MatterListResponse {
    pub matters: Vec<MatterRecord>,
}

// --- Time ---

#[derive(Debug, Deserialize)]
pub struct CreateTimeEntryRequest {
    pub entry_date: NaiveDate,
    pub description: String,
    pub hours: Decimal,
    /// Defaults to the practice's configured hourly rate.
    pub hourly_rate: Option<Decimal>,
    pub billable: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct TimeEntryListResponse {
    pub entries: Vec<TimeEntryRecord>,
}

// --- Trust ---

#[derive(Debug, Deserialize)]
pub struct CreateTrustEntryRequest {
    /// "receipt" or "disbursement".
    pub entry_type: String,
    pub amount: Decimal,
    pub description: String,
    pub reference: Option<String>,
    pub recorded_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrustLedgerResponse {
    pub matter_id: String,
    pub balance: Decimal,
    pub entries: Vec<TrustEntryRecord>,
}

#[derive(Debug, Deserialize)]
pub struct TrustTransferRequest {
    pub from_matter_id: String,
    pub to_matter_id: String,
    pub amount: Decimal,
    pub description: String,
    pub reference: Option<String>,
    pub recorded_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrustTransferResponse {
    pub out_entry: TrustEntryRecord,
    pub in_entry: TrustEntryRecord,
}

#[derive(Debug, Deserialize)]
pub struct TrustReconciliationRequest {
    pub bank_balance: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrustReconciliationResponse {
    pub balances: Vec<TrustBalance>,
    pub ledger_total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<TrustReconciliationRecord>,
}

// --- Invoices ---

#[derive(Debug, Default, Deserialize)]
pub struct CreateInvoiceRequest {
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceDetailResponse {
    pub invoice: InvoiceRecord,
    pub line_items: Vec<InvoiceLineItemRecord>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<InvoiceRecord>,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub draw_from_trust: bool,
    pub description: Option<String>,
    pub recorded_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordPaymentResponse {
    pub invoice: InvoiceRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_entry: Option<TrustEntryRecord>,
}

// --- Documents ---

#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    /// "will", "poa_property", or "poa_personal_care".
    pub doc_type: String,
    pub title: String,
    pub intake: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDocumentRequest {
    pub intake: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    #[serde(flatten)]
    pub record: DocumentRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_clauses: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentRecord>,
}

#[derive(Debug, Serialize)]
pub struct DocumentRevisionsResponse {
    pub revisions: Vec<DocumentRevisionRecord>,
}

#[derive(Debug, Serialize)]
pub struct ComplianceResponse {
    #[serde(flatten)]
    pub report: ComplianceReport,
}

#[derive(Debug, Serialize)]
pub struct RiskResponse {
    #[serde(flatten)]
    pub assessment: RiskAssessment,
}

#[derive(Debug, Serialize)]
pub struct PracticeComplianceResponse {
    #[serde(flatten)]
    pub report: PracticeComplianceReport,
}

// --- Audit ---

#[derive(Debug, Default, Deserialize)]
pub struct AuditListQuery {
    pub limit: Option<usize>,
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEventInfo {
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuditListResponse {
    pub events: Vec<AuditEventInfo>,
    pub parse_errors: usize,
}
