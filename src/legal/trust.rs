//! Trust accounting service over the ledger store.
//!
//! The store enforces the no-overdraft invariant; this layer adds the
//! bookkeeping operations a sole practitioner actually runs: receipts,
//! disbursements, inter-matter transfers, the monthly reconciliation
//! snapshot, and a CSV export for the bookkeeper.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::{
    CreateTrustEntryParams, Database, TrustBalance, TrustEntryRecord, TrustEntryType,
    TrustReconciliationRecord,
};
use crate::error::DatabaseError;

pub async fn record_receipt(
    db: &dyn Database,
    matter_id: &str,
    amount: Decimal,
    description: &str,
    reference: Option<&str>,
    recorded_by: &str,
) -> Result<TrustEntryRecord, String> {
    if amount <= Decimal::ZERO {
        return Err("Receipt amount must be greater than 0".to_string());
    }
    db.append_trust_entry(
        matter_id,
        &CreateTrustEntryParams {
            entry_type: TrustEntryType::Receipt,
            amount,
            description: description.trim().to_string(),
            reference: reference.map(str::to_string),
            counterpart_matter_id: None,
            invoice_id: None,
            recorded_by: recorded_by.trim().to_string(),
        },
    )
    .await
    .map_err(|e| e.to_string())
}

pub async fn record_disbursement(
    db: &dyn Database,
    matter_id: &str,
    amount: Decimal,
    description: &str,
    reference: Option<&str>,
    recorded_by: &str,
) -> Result<TrustEntryRecord, String> {
    if amount <= Decimal::ZERO {
        return Err("Disbursement amount must be greater than 0".to_string());
    }
    db.append_trust_entry(
        matter_id,
        &CreateTrustEntryParams {
            entry_type: TrustEntryType::Disbursement,
            amount,
            description: description.trim().to_string(),
            reference: reference.map(str::to_string),
            counterpart_matter_id: None,
            invoice_id: None,
            recorded_by: recorded_by.trim().to_string(),
        },
    )
    .await
    .map_err(|e| match e {
        DatabaseError::TrustOverdraft { matter_id, balance, .. } => format!(
            "Trust balance for matter {matter_id} is {balance}; the disbursement would overdraw it"
        ),
        other => other.to_string(),
    })
}

pub async fn transfer_between_matters(
    db: &dyn Database,
    from_matter_id: &str,
    to_matter_id: &str,
    amount: Decimal,
    description: &str,
    reference: Option<&str>,
    recorded_by: &str,
) -> Result<(TrustEntryRecord, TrustEntryRecord), String> {
    if amount <= Decimal::ZERO {
        return Err("Transfer amount must be greater than 0".to_string());
    }
    db.transfer_trust_funds(
        from_matter_id,
        to_matter_id,
        amount,
        description.trim(),
        reference,
        recorded_by.trim(),
    )
    .await
    .map_err(|e| match e {
        DatabaseError::TrustOverdraft { matter_id, balance, .. } => format!(
            "Trust balance for matter {matter_id} is {balance}; the transfer would overdraw it"
        ),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationSnapshot {
    pub balances: Vec<TrustBalance>,
    pub ledger_total: Decimal,
    pub record: TrustReconciliationRecord,
}

/// Compare the ledger against the stated bank balance and persist the
/// result. A non-zero discrepancy is recorded, not rejected; chasing it is
/// the lawyer's job.
pub async fn reconcile(
    db: &dyn Database,
    bank_balance: Decimal,
    notes: Option<&str>,
) -> Result<ReconciliationSnapshot, DatabaseError> {
    let balances = db.trust_balances().await?;
    let ledger_total = balances
        .iter()
        .fold(Decimal::ZERO, |acc, b| acc + b.balance)
        .round_dp(2);
    let record = db
        .record_trust_reconciliation(bank_balance, ledger_total, notes)
        .await?;
    Ok(ReconciliationSnapshot {
        balances,
        ledger_total,
        record,
    })
}

/// Full ledger as CSV, newest entry last.
pub async fn export_ledger_csv(db: &dyn Database) -> Result<String, String> {
    let entries = db.list_all_trust_entries().await.map_err(|e| e.to_string())?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "created_at",
            "matter_id",
            "entry_type",
            "amount",
            "balance_after",
            "description",
            "reference",
            "counterpart_matter_id",
            "invoice_id",
            "recorded_by",
        ])
        .map_err(|e| e.to_string())?;

    for entry in entries {
        writer
            .write_record([
                entry.created_at.to_rfc3339(),
                entry.matter_id,
                entry.entry_type.as_str().to_string(),
                entry.amount.to_string(),
                entry.balance_after.to_string(),
                entry.description,
                entry.reference.unwrap_or_default(),
                entry.counterpart_matter_id.unwrap_or_default(),
                entry
                    .invoice_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                entry.recorded_by,
            ])
            .map_err(|e| e.to_string())?;
    }

    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}
