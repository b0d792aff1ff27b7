//! Database abstraction layer.
//!
//! Provides a backend-agnostic `Database` trait that unifies all persistence
//! operations for the practice: clients, matters, time entries, the trust
//! ledger, invoices, and estate documents. The libSQL backend is the only
//! implementation; the trait keeps the seam so tests and future backends can
//! swap in without touching the service layer.

pub mod libsql;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Open the libSQL backend at `path`, run migrations, and return it as a
/// trait object. Shared by CLI commands and server startup.
pub async fn connect(path: &Path) -> Result<Arc<dyn Database>, DatabaseError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Connection(e.to_string()))?;
    }
    let backend = libsql::LibSqlBackend::new_local(path).await?;
    backend.run_migrations().await?;
    Ok(Arc::new(backend))
}

/// Client entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Individual,
    Entity,
}

impl ClientType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Entity => "entity",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "individual" => Some(Self::Individual),
            "entity" => Some(Self::Entity),
            _ => None,
        }
    }
}

/// Matter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatterStatus {
    Intake,
    Active,
    Pending,
    Closed,
}

impl MatterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Closed => "closed",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "intake" => Some(Self::Intake),
            "active" => Some(Self::Active),
            "pending" => Some(Self::Pending),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Kind of work a matter covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatterType {
    Will,
    PoaProperty,
    PoaPersonalCare,
    EstateAdmin,
    General,
}

impl MatterType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Will => "will",
            Self::PoaProperty => "poa_property",
            Self::PoaPersonalCare => "poa_personal_care",
            Self::EstateAdmin => "estate_admin",
            Self::General => "general",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "will" => Some(Self::Will),
            "poa_property" => Some(Self::PoaProperty),
            "poa_personal_care" => Some(Self::PoaPersonalCare),
            "estate_admin" => Some(Self::EstateAdmin),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Trust ledger entry direction and purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustEntryType {
    Receipt,
    Disbursement,
    TransferIn,
    TransferOut,
    InvoicePayment,
}

impl TrustEntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Receipt => "receipt",
            Self::Disbursement => "disbursement",
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
            Self::InvoicePayment => "invoice_payment",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "receipt" => Some(Self::Receipt),
            "disbursement" => Some(Self::Disbursement),
            "transfer_in" => Some(Self::TransferIn),
            "transfer_out" => Some(Self::TransferOut),
            "invoice_payment" => Some(Self::InvoicePayment),
            _ => None,
        }
    }

    /// Whether this entry adds money to the matter's trust balance.
    pub fn is_credit(self) -> bool {
        matches!(self, Self::Receipt | Self::TransferIn)
    }
}

/// Invoice lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Paid => "paid",
            Self::Void => "void",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "paid" => Some(Self::Paid),
            "void" => Some(Self::Void),
            _ => None,
        }
    }
}

/// Kind of estate instrument a document row holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Will,
    PoaProperty,
    PoaPersonalCare,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Will => "will",
            Self::PoaProperty => "poa_property",
            Self::PoaPersonalCare => "poa_personal_care",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "will" => Some(Self::Will),
            "poa_property" => Some(Self::PoaProperty),
            "poa_personal_care" => Some(Self::PoaPersonalCare),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: Uuid,
    pub name: String,
    pub name_normalized: String,
    pub client_type: ClientType,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateClientParams {
    pub name: String,
    pub client_type: ClientType,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateClientParams {
    pub name: Option<String>,
    pub client_type: Option<ClientType>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

/// Figures derived on read for a client list/detail view.
#[derive(Debug, Clone, Serialize)]
pub struct ClientRollup {
    pub matter_count: i64,
    pub trust_balance: Decimal,
    pub unbilled_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatterRecord {
    pub matter_id: String,
    pub client_id: Uuid,
    pub matter_type: MatterType,
    pub status: MatterStatus,
    pub responsible_lawyer: String,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMatterParams {
    pub matter_id: String,
    pub client_id: Uuid,
    pub matter_type: MatterType,
    pub status: MatterStatus,
    pub responsible_lawyer: String,
    pub opened_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateMatterParams {
    pub client_id: Option<Uuid>,
    pub matter_type: Option<MatterType>,
    pub status: Option<MatterStatus>,
    pub responsible_lawyer: Option<String>,
    pub opened_at: Option<Option<DateTime<Utc>>>,
    pub closed_at: Option<Option<DateTime<Utc>>>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeEntryRecord {
    pub id: Uuid,
    pub matter_id: String,
    pub entry_date: NaiveDate,
    pub description: String,
    pub hours: Decimal,
    pub hourly_rate: Decimal,
    pub billable: bool,
    pub billed_invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTimeEntryParams {
    pub entry_date: NaiveDate,
    pub description: String,
    pub hours: Decimal,
    pub hourly_rate: Decimal,
    pub billable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustEntryRecord {
    pub id: Uuid,
    pub matter_id: String,
    pub entry_type: TrustEntryType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub reference: Option<String>,
    pub counterpart_matter_id: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub recorded_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTrustEntryParams {
    pub entry_type: TrustEntryType,
    pub amount: Decimal,
    pub description: String,
    pub reference: Option<String>,
    pub counterpart_matter_id: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub recorded_by: String,
}

/// One row of the firm-wide trust position.
#[derive(Debug, Clone, Serialize)]
pub struct TrustBalance {
    pub matter_id: String,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustReconciliationRecord {
    pub id: Uuid,
    pub performed_at: DateTime<Utc>,
    pub bank_balance: Decimal,
    pub ledger_total: Decimal,
    pub discrepancy: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub matter_id: String,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub issued_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateInvoiceParams {
    pub matter_id: String,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub issued_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLineItemRecord {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub time_entry_id: Option<Uuid>,
    pub sort_order: i32,
}

#[derive(Debug, Clone)]
pub struct CreateInvoiceLineItemParams {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub time_entry_id: Option<Uuid>,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub matter_id: String,
    pub doc_type: DocumentType,
    pub title: String,
    pub intake: serde_json::Value,
    pub rendered_text: Option<String>,
    pub completed: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateDocumentParams {
    pub doc_type: DocumentType,
    pub title: String,
    pub intake: serde_json::Value,
    pub rendered_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRevisionRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version: i32,
    pub intake: serde_json::Value,
    pub rendered_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Normalize names for dedupe keys and search.
pub fn normalize_party_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_sep = true;

    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_sep = false;
        } else if !prev_sep {
            out.push(' ');
            prev_sep = true;
        }
    }

    out.trim().to_string()
}

/// Keep matter IDs filesystem- and URL-safe, deterministically.
pub fn sanitize_matter_id(matter_id: &str) -> String {
    matter_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

// ==================== Sub-traits ====================
//
// Each sub-trait groups related persistence methods. The `Database` supertrait
// combines them all; leaf consumers can depend on a specific sub-trait.

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn create_client(&self, input: &CreateClientParams)
    -> Result<ClientRecord, DatabaseError>;
    async fn upsert_client_by_normalized_name(
        &self,
        input: &CreateClientParams,
    ) -> Result<ClientRecord, DatabaseError>;
    async fn list_clients(&self, query: Option<&str>) -> Result<Vec<ClientRecord>, DatabaseError>;
    async fn get_client(&self, client_id: Uuid) -> Result<Option<ClientRecord>, DatabaseError>;
    async fn update_client(
        &self,
        client_id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError>;
    async fn delete_client(&self, client_id: Uuid) -> Result<bool, DatabaseError>;
    /// Derived figures for a client: matter count, trust held, unbilled work.
    async fn client_rollup(&self, client_id: Uuid) -> Result<ClientRollup, DatabaseError>;
}

#[async_trait]
pub trait MatterStore: Send + Sync {
    async fn create_matter(&self, input: &CreateMatterParams)
    -> Result<MatterRecord, DatabaseError>;
    async fn list_matters(
        &self,
        status: Option<MatterStatus>,
    ) -> Result<Vec<MatterRecord>, DatabaseError>;
    async fn get_matter(&self, matter_id: &str) -> Result<Option<MatterRecord>, DatabaseError>;
    async fn update_matter(
        &self,
        matter_id: &str,
        input: &UpdateMatterParams,
    ) -> Result<Option<MatterRecord>, DatabaseError>;
}

#[async_trait]
pub trait TimeEntryStore: Send + Sync {
    async fn create_time_entry(
        &self,
        matter_id: &str,
        input: &CreateTimeEntryParams,
    ) -> Result<TimeEntryRecord, DatabaseError>;
    async fn list_time_entries(
        &self,
        matter_id: &str,
    ) -> Result<Vec<TimeEntryRecord>, DatabaseError>;
    /// Billable, not-yet-invoiced entries across all matters (practice monitor).
    async fn list_unbilled_time_entries(&self) -> Result<Vec<TimeEntryRecord>, DatabaseError>;
    async fn mark_time_entries_billed(
        &self,
        entry_ids: &[Uuid],
        invoice_id: Uuid,
    ) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait TrustStore: Send + Sync {
    /// Append one ledger entry. Runs inside a transaction: the current balance
    /// is read, a debit that would overdraw is rejected with
    /// [`DatabaseError::TrustOverdraft`], and `balance_after` is recorded.
    async fn append_trust_entry(
        &self,
        matter_id: &str,
        input: &CreateTrustEntryParams,
    ) -> Result<TrustEntryRecord, DatabaseError>;
    /// Atomic transfer: the out-entry and in-entry commit together or not at
    /// all. A source overdraft leaves no orphan half.
    async fn transfer_trust_funds(
        &self,
        from_matter_id: &str,
        to_matter_id: &str,
        amount: Decimal,
        description: &str,
        reference: Option<&str>,
        recorded_by: &str,
    ) -> Result<(TrustEntryRecord, TrustEntryRecord), DatabaseError>;
    async fn list_trust_entries(
        &self,
        matter_id: &str,
    ) -> Result<Vec<TrustEntryRecord>, DatabaseError>;
    async fn list_all_trust_entries(&self) -> Result<Vec<TrustEntryRecord>, DatabaseError>;
    async fn trust_balance(&self, matter_id: &str) -> Result<Decimal, DatabaseError>;
    async fn trust_balances(&self) -> Result<Vec<TrustBalance>, DatabaseError>;
    async fn record_trust_reconciliation(
        &self,
        bank_balance: Decimal,
        ledger_total: Decimal,
        notes: Option<&str>,
    ) -> Result<TrustReconciliationRecord, DatabaseError>;
    async fn latest_trust_reconciliation(
        &self,
    ) -> Result<Option<TrustReconciliationRecord>, DatabaseError>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn save_invoice_draft(
        &self,
        invoice: &CreateInvoiceParams,
        line_items: &[CreateInvoiceLineItemParams],
    ) -> Result<(InvoiceRecord, Vec<InvoiceLineItemRecord>), DatabaseError>;
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError>;
    async fn list_invoices(&self, matter_id: &str) -> Result<Vec<InvoiceRecord>, DatabaseError>;
    async fn list_invoice_line_items(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLineItemRecord>, DatabaseError>;
    async fn set_invoice_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
        issued_date: Option<NaiveDate>,
    ) -> Result<Option<InvoiceRecord>, DatabaseError>;
    /// Add `amount` to `paid_amount`; flips status to Paid once covered.
    async fn apply_invoice_payment(
        &self,
        invoice_id: Uuid,
        amount: Decimal,
    ) -> Result<Option<InvoiceRecord>, DatabaseError>;
    async fn invoice_count(&self) -> Result<i64, DatabaseError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(
        &self,
        matter_id: &str,
        input: &CreateDocumentParams,
    ) -> Result<DocumentRecord, DatabaseError>;
    async fn get_document(&self, document_id: Uuid)
    -> Result<Option<DocumentRecord>, DatabaseError>;
    async fn list_documents(&self, matter_id: &str) -> Result<Vec<DocumentRecord>, DatabaseError>;
    /// Replace intake + rendered text, bump the version, and archive the
    /// previous content into `document_revisions`, all in one transaction.
    async fn update_document_content(
        &self,
        document_id: Uuid,
        intake: &serde_json::Value,
        rendered_text: Option<&str>,
    ) -> Result<Option<DocumentRecord>, DatabaseError>;
    async fn set_document_completed(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError>;
    async fn list_document_revisions(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<DocumentRevisionRecord>, DatabaseError>;
}

/// Backend-agnostic database supertrait.
#[async_trait]
pub trait Database:
    ClientStore
    + MatterStore
    + TimeEntryStore
    + TrustStore
    + InvoiceStore
    + DocumentStore
    + Send
    + Sync
{
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::{normalize_party_name, sanitize_matter_id};

    #[test]
    fn normalize_collapses_punctuation_and_case() {
        assert_eq!(normalize_party_name("  O'Brien,  Mary-Anne "), "o brien mary anne");
        assert_eq!(normalize_party_name("ACME Corp."), "acme corp");
        assert_eq!(normalize_party_name("---"), "");
    }

    #[test]
    fn sanitize_matter_id_removes_unsafe_chars() {
        assert_eq!(sanitize_matter_id(" Estate of Foo/2026 "), "estate-of-foo-2026");
        assert_eq!(sanitize_matter_id("will_2026-smith"), "will_2026-smith");
    }
}
