//! libSQL (embedded SQLite-family) backend.
//!
//! Monetary amounts are stored as TEXT and parsed through `rust_decimal`;
//! timestamps use SQLite's `datetime('now')` format.

mod billing;
mod documents;
mod practice;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;

use crate::db::Database;
use crate::error::DatabaseError;

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS clients (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        name_normalized TEXT NOT NULL UNIQUE,
        client_type TEXT NOT NULL,
        email TEXT,
        phone TEXT,
        address TEXT,
        notes TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS matters (
        matter_id TEXT PRIMARY KEY,
        client_id TEXT NOT NULL REFERENCES clients(id),
        matter_type TEXT NOT NULL,
        status TEXT NOT NULL,
        responsible_lawyer TEXT NOT NULL,
        opened_at TEXT,
        closed_at TEXT,
        notes TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_matters_client ON matters(client_id)",
    "CREATE TABLE IF NOT EXISTS time_entries (
        id TEXT PRIMARY KEY,
        matter_id TEXT NOT NULL REFERENCES matters(matter_id),
        entry_date TEXT NOT NULL,
        description TEXT NOT NULL,
        hours TEXT NOT NULL,
        hourly_rate TEXT NOT NULL,
        billable INTEGER NOT NULL DEFAULT 1,
        billed_invoice_id TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_time_entries_matter ON time_entries(matter_id)",
    "CREATE TABLE IF NOT EXISTS trust_entries (
        id TEXT PRIMARY KEY,
        matter_id TEXT NOT NULL REFERENCES matters(matter_id),
        entry_type TEXT NOT NULL,
        amount TEXT NOT NULL,
        balance_after TEXT NOT NULL,
        description TEXT NOT NULL,
        reference TEXT,
        counterpart_matter_id TEXT,
        invoice_id TEXT,
        recorded_by TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_trust_entries_matter ON trust_entries(matter_id)",
    "CREATE TABLE IF NOT EXISTS trust_reconciliations (
        id TEXT PRIMARY KEY,
        performed_at TEXT NOT NULL DEFAULT (datetime('now')),
        bank_balance TEXT NOT NULL,
        ledger_total TEXT NOT NULL,
        discrepancy TEXT NOT NULL,
        notes TEXT
    )",
    "CREATE TABLE IF NOT EXISTS invoices (
        id TEXT PRIMARY KEY,
        matter_id TEXT NOT NULL REFERENCES matters(matter_id),
        invoice_number TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        issued_date TEXT,
        due_date TEXT,
        subtotal TEXT NOT NULL,
        tax TEXT NOT NULL,
        total TEXT NOT NULL,
        paid_amount TEXT NOT NULL,
        notes TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS invoice_line_items (
        id TEXT PRIMARY KEY,
        invoice_id TEXT NOT NULL REFERENCES invoices(id),
        description TEXT NOT NULL,
        quantity TEXT NOT NULL,
        unit_price TEXT NOT NULL,
        amount TEXT NOT NULL,
        time_entry_id TEXT,
        sort_order INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_invoice_line_items_invoice ON invoice_line_items(invoice_id)",
    "CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        matter_id TEXT NOT NULL REFERENCES matters(matter_id),
        doc_type TEXT NOT NULL,
        title TEXT NOT NULL,
        intake_json TEXT NOT NULL,
        rendered_text TEXT,
        completed INTEGER NOT NULL DEFAULT 0,
        version INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_documents_matter ON documents(matter_id)",
    "CREATE TABLE IF NOT EXISTS document_revisions (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL REFERENCES documents(id),
        version INTEGER NOT NULL,
        intake_json TEXT NOT NULL,
        rendered_text TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_document_revisions_document
        ON document_revisions(document_id)",
];

pub struct LibSqlBackend {
    db: libsql::Database,
}

impl LibSqlBackend {
    /// Open (creating if necessary) a local database file. Use `:memory:`
    /// in tests.
    pub async fn new_local(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(path.as_ref())
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        Ok(Self { db })
    }

    pub(crate) async fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db
            .connect()
            .map_err(|e| DatabaseError::Connection(e.to_string()))
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        for statement in MIGRATIONS {
            conn.execute(statement, ())
                .await
                .map_err(|e| DatabaseError::Migration(format!("{e}: {statement}")))?;
        }
        Ok(())
    }
}

// ---- Row helpers shared by the store impls ----

pub(crate) fn get_text(row: &libsql::Row, idx: i32) -> String {
    row.get::<String>(idx).unwrap_or_default()
}

pub(crate) fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<Option<String>>(idx).ok().flatten()
}

pub(crate) fn get_i64(row: &libsql::Row, idx: i32) -> i64 {
    row.get::<i64>(idx).unwrap_or_default()
}

pub(crate) fn opt_text(value: Option<&str>) -> libsql::Value {
    match value {
        Some(text) => libsql::Value::Text(text.to_string()),
        None => libsql::Value::Null,
    }
}

pub(crate) fn opt_text_owned(value: Option<String>) -> libsql::Value {
    match value {
        Some(text) => libsql::Value::Text(text),
        None => libsql::Value::Null,
    }
}

pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse SQLite's `datetime('now')` format, falling back to RFC 3339.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
}

pub(crate) fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, DatabaseError> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|e| DatabaseError::Serialization(format!("invalid decimal in {field}: {e}")))
}

pub(crate) fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Serialization(format!("invalid date in {field}: {e}")))
}

pub(crate) fn parse_uuid(raw: &str, field: &str) -> Result<uuid::Uuid, DatabaseError> {
    uuid::Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {field} uuid: {e}")))
}

pub(crate) fn parse_dt(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    parse_timestamp(raw).map_err(DatabaseError::Serialization)
}

pub(crate) fn parse_dt_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    match raw {
        Some(value) => parse_dt(&value).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_decimal, parse_timestamp};

    #[test]
    fn parse_timestamp_accepts_sqlite_and_rfc3339() {
        let sqlite = parse_timestamp("2026-08-30 12:34:56").expect("sqlite format");
        assert_eq!(sqlite.to_rfc3339(), "2026-08-30T12:34:56+00:00");

        let rfc = parse_timestamp("2026-08-30T12:34:56Z").expect("rfc3339 format");
        assert_eq!(sqlite, rfc);

        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn parse_decimal_trims_and_rejects_garbage() {
        assert_eq!(
            parse_decimal(" 1250.50 ", "amount").expect("valid"),
            rust_decimal_macros::dec!(1250.50)
        );
        assert!(parse_decimal("1,250", "amount").is_err());
    }
}
