use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{
    CreateInvoiceLineItemParams, CreateInvoiceParams, CreateTrustEntryParams, Database,
    InvoiceLineItemRecord, InvoiceRecord, InvoiceStatus, TrustEntryRecord, TrustEntryType,
};
use crate::error::DatabaseError;

#[derive(Debug, Clone)]
pub struct DraftInvoiceResult {
    pub invoice: CreateInvoiceParams,
    pub line_items: Vec<CreateInvoiceLineItemParams>,
}

/// Next sequential invoice number. Uniqueness is enforced by the database;
/// a collision after concurrent drafting surfaces as a conflict on save.
pub async fn next_invoice_number(db: &dyn Database) -> Result<String, DatabaseError> {
    let count = db.invoice_count().await?;
    Ok(format!("INV-{:05}", count + 1))
}

/// Sweep unbilled billable time for the matter into draft line items and
/// apply HST at the configured rate.
pub async fn draft_invoice(
    db: &dyn Database,
    matter_id: &str,
    invoice_number: &str,
    hst_rate: Decimal,
    due_date: Option<NaiveDate>,
    notes: Option<String>,
) -> Result<DraftInvoiceResult, DatabaseError> {
    let time_entries = db.list_time_entries(matter_id).await?;

    let mut line_items = Vec::new();
    for entry in time_entries {
        if entry.billed_invoice_id.is_some() || !entry.billable {
            continue;
        }
        let amount = (entry.hours * entry.hourly_rate).round_dp(2);
        line_items.push(CreateInvoiceLineItemParams {
            description: format!(
                "Legal services: {} ({})",
                entry.description,
                entry.entry_date.format("%Y-%m-%d")
            ),
            quantity: entry.hours,
            unit_price: entry.hourly_rate,
            amount,
            time_entry_id: Some(entry.id),
            sort_order: i32::try_from(line_items.len()).unwrap_or(0),
        });
    }

    let subtotal = line_items
        .iter()
        .fold(Decimal::ZERO, |acc, item| acc + item.amount)
        .round_dp(2);
    let tax = (subtotal * hst_rate).round_dp(2);
    let total = (subtotal + tax).round_dp(2);

    Ok(DraftInvoiceResult {
        invoice: CreateInvoiceParams {
            matter_id: matter_id.to_string(),
            invoice_number: invoice_number.trim().to_string(),
            status: InvoiceStatus::Draft,
            issued_date: None,
            due_date,
            subtotal,
            tax,
            total,
            paid_amount: Decimal::ZERO,
            notes,
        },
        line_items,
    })
}

pub async fn save_draft(
    db: &dyn Database,
    draft: &DraftInvoiceResult,
) -> Result<(InvoiceRecord, Vec<InvoiceLineItemRecord>), DatabaseError> {
    db.save_invoice_draft(&draft.invoice, &draft.line_items)
        .await
}

/// Draft to sent: stamps today's issue date and marks the swept time entries
/// billed so they cannot land on a second invoice.
pub async fn finalize_invoice(
    db: &dyn Database,
    invoice_id: Uuid,
) -> Result<InvoiceRecord, String> {
    let invoice = db
        .get_invoice(invoice_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "Invoice not found".to_string())?;
    if invoice.status != InvoiceStatus::Draft {
        return Err("Only draft invoices can be finalized".to_string());
    }

    let line_items = db
        .list_invoice_line_items(invoice_id)
        .await
        .map_err(|e| e.to_string())?;
    let mut time_ids = Vec::new();
    let mut seen = HashSet::new();
    for item in line_items {
        if let Some(time_id) = item.time_entry_id
            && seen.insert(time_id)
        {
            time_ids.push(time_id);
        }
    }

    if !time_ids.is_empty() {
        db.mark_time_entries_billed(&time_ids, invoice_id)
            .await
            .map_err(|e| e.to_string())?;
    }

    db.set_invoice_status(invoice_id, InvoiceStatus::Sent, Some(Utc::now().date_naive()))
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "Invoice not found".to_string())
}

/// Record a payment against a sent invoice, optionally drawn from the
/// matter's trust ledger.
pub async fn record_payment(
    db: &dyn Database,
    invoice_id: Uuid,
    amount: Decimal,
    recorded_by: &str,
    draw_from_trust: bool,
    description: Option<&str>,
) -> Result<(InvoiceRecord, Option<TrustEntryRecord>), String> {
    if amount <= Decimal::ZERO {
        return Err("Payment amount must be greater than 0".to_string());
    }

    let invoice = db
        .get_invoice(invoice_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "Invoice not found".to_string())?;
    if !matches!(invoice.status, InvoiceStatus::Sent) {
        return Err(format!(
            "Cannot record payment for invoice with status '{}'",
            invoice.status.as_str()
        ));
    }

    let trust_entry = if draw_from_trust {
        let entry = db
            .append_trust_entry(
                &invoice.matter_id,
                &CreateTrustEntryParams {
                    entry_type: TrustEntryType::InvoicePayment,
                    amount,
                    description: description
                        .unwrap_or("Invoice payment from trust")
                        .trim()
                        .to_string(),
                    reference: Some(invoice.invoice_number.clone()),
                    counterpart_matter_id: None,
                    invoice_id: Some(invoice_id),
                    recorded_by: recorded_by.trim().to_string(),
                },
            )
            .await
            .map_err(|e| match e {
                DatabaseError::TrustOverdraft { .. } => {
                    "Trust balance is insufficient for this payment".to_string()
                }
                other => other.to_string(),
            })?;
        Some(entry)
    } else {
        None
    };

    let updated = db
        .apply_invoice_payment(invoice_id, amount)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "Invoice not found".to_string())?;
    Ok((updated, trust_entry))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    #[test]
    fn hst_is_applied_to_the_rounded_subtotal() {
        // Mirrors the arithmetic in draft_invoice.
        let subtotal = (dec!(2.5) * dec!(350.00)).round_dp(2);
        let tax = (subtotal * dec!(0.13)).round_dp(2);
        assert_eq!(subtotal, dec!(875.00));
        assert_eq!(tax, dec!(113.75));
        assert_eq!((subtotal + tax).round_dp(2), dec!(988.75));
    }

    #[test]
    fn invoice_numbers_are_zero_padded() {
        assert_eq!(format!("INV-{:05}", 12), "INV-00012");
    }
}
