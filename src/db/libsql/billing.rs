use chrono::NaiveDate;
use libsql::params;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{
    CreateInvoiceLineItemParams, CreateInvoiceParams, CreateTrustEntryParams, InvoiceLineItemRecord,
    InvoiceRecord, InvoiceStatus, InvoiceStore, TrustBalance, TrustEntryRecord, TrustEntryType,
    TrustReconciliationRecord, TrustStore,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, get_i64, get_opt_text, get_text, opt_text, parse_date, parse_decimal, parse_dt,
    parse_uuid,
};

fn parse_entry_type(raw: &str) -> Result<TrustEntryType, DatabaseError> {
    TrustEntryType::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid trust entry type '{raw}'")))
}

fn parse_invoice_status(raw: &str) -> Result<InvoiceStatus, DatabaseError> {
    InvoiceStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid invoice status '{raw}'")))
}

fn row_to_trust_entry_record(row: &libsql::Row) -> Result<TrustEntryRecord, DatabaseError> {
    let entry_type_raw = get_text(row, 2);
    Ok(TrustEntryRecord {
        id: parse_uuid(&get_text(row, 0), "trust_entries.id")?,
        matter_id: get_text(row, 1),
        entry_type: parse_entry_type(&entry_type_raw)?,
        amount: parse_decimal(&get_text(row, 3), "trust_entries.amount")?,
        balance_after: parse_decimal(&get_text(row, 4), "trust_entries.balance_after")?,
        description: get_text(row, 5),
        reference: get_opt_text(row, 6),
        counterpart_matter_id: get_opt_text(row, 7),
        invoice_id: get_opt_text(row, 8)
            .map(|value| parse_uuid(&value, "trust_entries.invoice_id"))
            .transpose()?,
        recorded_by: get_text(row, 9),
        created_at: parse_dt(&get_text(row, 10))?,
    })
}

fn row_to_reconciliation_record(
    row: &libsql::Row,
) -> Result<TrustReconciliationRecord, DatabaseError> {
    Ok(TrustReconciliationRecord {
        id: parse_uuid(&get_text(row, 0), "trust_reconciliations.id")?,
        performed_at: parse_dt(&get_text(row, 1))?,
        bank_balance: parse_decimal(&get_text(row, 2), "trust_reconciliations.bank_balance")?,
        ledger_total: parse_decimal(&get_text(row, 3), "trust_reconciliations.ledger_total")?,
        discrepancy: parse_decimal(&get_text(row, 4), "trust_reconciliations.discrepancy")?,
        notes: get_opt_text(row, 5),
    })
}

fn row_to_invoice_record(row: &libsql::Row) -> Result<InvoiceRecord, DatabaseError> {
    let status_raw = get_text(row, 3);
    Ok(InvoiceRecord {
        id: parse_uuid(&get_text(row, 0), "invoices.id")?,
        matter_id: get_text(row, 1),
        invoice_number: get_text(row, 2),
        status: parse_invoice_status(&status_raw)?,
        issued_date: get_opt_text(row, 4)
            .map(|value| parse_date(&value, "invoices.issued_date"))
            .transpose()?,
        due_date: get_opt_text(row, 5)
            .map(|value| parse_date(&value, "invoices.due_date"))
            .transpose()?,
        subtotal: parse_decimal(&get_text(row, 6), "invoices.subtotal")?,
        tax: parse_decimal(&get_text(row, 7), "invoices.tax")?,
        total: parse_decimal(&get_text(row, 8), "invoices.total")?,
        paid_amount: parse_decimal(&get_text(row, 9), "invoices.paid_amount")?,
        notes: get_opt_text(row, 10),
        created_at: parse_dt(&get_text(row, 11))?,
        updated_at: parse_dt(&get_text(row, 12))?,
    })
}

fn row_to_line_item_record(row: &libsql::Row) -> Result<InvoiceLineItemRecord, DatabaseError> {
    Ok(InvoiceLineItemRecord {
        id: parse_uuid(&get_text(row, 0), "invoice_line_items.id")?,
        invoice_id: parse_uuid(&get_text(row, 1), "invoice_line_items.invoice_id")?,
        description: get_text(row, 2),
        quantity: parse_decimal(&get_text(row, 3), "invoice_line_items.quantity")?,
        unit_price: parse_decimal(&get_text(row, 4), "invoice_line_items.unit_price")?,
        amount: parse_decimal(&get_text(row, 5), "invoice_line_items.amount")?,
        time_entry_id: get_opt_text(row, 6)
            .map(|value| parse_uuid(&value, "invoice_line_items.time_entry_id"))
            .transpose()?,
        sort_order: get_i64(row, 7) as i32,
    })
}

const TRUST_COLUMNS: &str = "id, matter_id, entry_type, amount, balance_after, description, \
     reference, counterpart_matter_id, invoice_id, recorded_by, created_at";
const RECON_COLUMNS: &str = "id, performed_at, bank_balance, ledger_total, discrepancy, notes";
const INVOICE_COLUMNS: &str = "id, matter_id, invoice_number, status, issued_date, due_date, \
     subtotal, tax, total, paid_amount, notes, created_at, updated_at";
const LINE_ITEM_COLUMNS: &str =
    "id, invoice_id, description, quantity, unit_price, amount, time_entry_id, sort_order";

async fn current_balance(
    conn: &libsql::Connection,
    matter_id: &str,
) -> Result<Decimal, DatabaseError> {
    let row = conn
        .query(
            "SELECT balance_after FROM trust_entries WHERE matter_id = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            params![matter_id],
        )
        .await?
        .next()
        .await?;
    match row {
        Some(row) => parse_decimal(&get_text(&row, 0), "trust_entries.balance_after"),
        None => Ok(Decimal::ZERO),
    }
}

/// Insert one ledger row after the overdraft check. Caller owns the
/// transaction.
async fn append_entry_in_tx(
    conn: &libsql::Connection,
    matter_id: &str,
    input: &CreateTrustEntryParams,
) -> Result<TrustEntryRecord, DatabaseError> {
    if input.amount <= Decimal::ZERO {
        return Err(DatabaseError::Serialization(
            "trust entry amount must be greater than 0".to_string(),
        ));
    }

    let balance = current_balance(conn, matter_id).await?;
    let balance_after = if input.entry_type.is_credit() {
        balance + input.amount
    } else {
        if input.amount > balance {
            return Err(DatabaseError::TrustOverdraft {
                matter_id: matter_id.to_string(),
                balance,
                requested: input.amount,
            });
        }
        balance - input.amount
    };

    let entry_id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO trust_entries \
         (id, matter_id, entry_type, amount, balance_after, description, reference, \
          counterpart_matter_id, invoice_id, recorded_by) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry_id.to_string(),
            matter_id,
            input.entry_type.as_str(),
            input.amount.to_string(),
            balance_after.to_string(),
            input.description.trim(),
            opt_text(input.reference.as_deref()),
            opt_text(input.counterpart_matter_id.as_deref()),
            opt_text(input.invoice_id.map(|id| id.to_string()).as_deref()),
            input.recorded_by.as_str(),
        ],
    )
    .await?;

    let row = conn
        .query(
            &format!("SELECT {TRUST_COLUMNS} FROM trust_entries WHERE id = ?1 LIMIT 1"),
            params![entry_id.to_string()],
        )
        .await?
        .next()
        .await?
        .ok_or_else(|| DatabaseError::Query("failed to load created trust entry".to_string()))?;
    row_to_trust_entry_record(&row)
}

#[async_trait::async_trait]
impl TrustStore for LibSqlBackend {
    async fn append_trust_entry(
        &self,
        matter_id: &str,
        input: &CreateTrustEntryParams,
    ) -> Result<TrustEntryRecord, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN", ()).await?;
        let result = append_entry_in_tx(&conn, matter_id, input).await;

        match result {
            Ok(record) => {
                conn.execute("COMMIT", ()).await?;
                Ok(record)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn transfer_trust_funds(
        &self,
        from_matter_id: &str,
        to_matter_id: &str,
        amount: Decimal,
        description: &str,
        reference: Option<&str>,
        recorded_by: &str,
    ) -> Result<(TrustEntryRecord, TrustEntryRecord), DatabaseError> {
        if from_matter_id == to_matter_id {
            return Err(DatabaseError::Serialization(
                "cannot transfer trust funds to the same matter".to_string(),
            ));
        }

        let conn = self.connect().await?;
        conn.execute("BEGIN", ()).await?;
        let transfer_result = async {
            let out_entry = append_entry_in_tx(
                &conn,
                from_matter_id,
                &CreateTrustEntryParams {
                    entry_type: TrustEntryType::TransferOut,
                    amount,
                    description: description.to_string(),
                    reference: reference.map(str::to_string),
                    counterpart_matter_id: Some(to_matter_id.to_string()),
                    invoice_id: None,
                    recorded_by: recorded_by.to_string(),
                },
            )
            .await?;

            let in_entry = append_entry_in_tx(
                &conn,
                to_matter_id,
                &CreateTrustEntryParams {
                    entry_type: TrustEntryType::TransferIn,
                    amount,
                    description: description.to_string(),
                    reference: reference.map(str::to_string),
                    counterpart_matter_id: Some(from_matter_id.to_string()),
                    invoice_id: None,
                    recorded_by: recorded_by.to_string(),
                },
            )
            .await?;

            Ok::<_, DatabaseError>((out_entry, in_entry))
        }
        .await;

        match transfer_result {
            Ok(pair) => {
                conn.execute("COMMIT", ()).await?;
                Ok(pair)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn list_trust_entries(
        &self,
        matter_id: &str,
    ) -> Result<Vec<TrustEntryRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TRUST_COLUMNS} FROM trust_entries \
                     WHERE matter_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![matter_id],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_trust_entry_record(&row)?);
        }
        Ok(out)
    }

    async fn list_all_trust_entries(&self) -> Result<Vec<TrustEntryRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TRUST_COLUMNS} FROM trust_entries \
                     ORDER BY created_at ASC, rowid ASC"
                ),
                (),
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_trust_entry_record(&row)?);
        }
        Ok(out)
    }

    async fn trust_balance(&self, matter_id: &str) -> Result<Decimal, DatabaseError> {
        let conn = self.connect().await?;
        current_balance(&conn, matter_id).await
    }

    async fn trust_balances(&self) -> Result<Vec<TrustBalance>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT te.matter_id, te.balance_after FROM trust_entries te \
                 WHERE te.rowid = ( \
                    SELECT t2.rowid FROM trust_entries t2 \
                    WHERE t2.matter_id = te.matter_id \
                    ORDER BY t2.created_at DESC, t2.rowid DESC LIMIT 1 \
                 ) \
                 ORDER BY te.matter_id ASC",
                (),
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(TrustBalance {
                matter_id: get_text(&row, 0),
                balance: parse_decimal(&get_text(&row, 1), "trust_entries.balance_after")?,
            });
        }
        Ok(out)
    }

    async fn record_trust_reconciliation(
        &self,
        bank_balance: Decimal,
        ledger_total: Decimal,
        notes: Option<&str>,
    ) -> Result<TrustReconciliationRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4();
        let discrepancy = bank_balance - ledger_total;
        conn.execute(
            "INSERT INTO trust_reconciliations \
             (id, bank_balance, ledger_total, discrepancy, notes) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                bank_balance.to_string(),
                ledger_total.to_string(),
                discrepancy.to_string(),
                opt_text(notes),
            ],
        )
        .await?;

        let row = conn
            .query(
                &format!(
                    "SELECT {RECON_COLUMNS} FROM trust_reconciliations WHERE id = ?1 LIMIT 1"
                ),
                params![id.to_string()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| {
                DatabaseError::Query("failed to load created reconciliation".to_string())
            })?;
        row_to_reconciliation_record(&row)
    }

    async fn latest_trust_reconciliation(
        &self,
    ) -> Result<Option<TrustReconciliationRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {RECON_COLUMNS} FROM trust_reconciliations \
                     ORDER BY performed_at DESC, rowid DESC LIMIT 1"
                ),
                (),
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_reconciliation_record(&row)).transpose()
    }
}

#[async_trait::async_trait]
impl InvoiceStore for LibSqlBackend {
    async fn save_invoice_draft(
        &self,
        invoice: &CreateInvoiceParams,
        line_items: &[CreateInvoiceLineItemParams],
    ) -> Result<(InvoiceRecord, Vec<InvoiceLineItemRecord>), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN", ()).await?;
        let invoice_id = Uuid::new_v4();

        let save_result = async {
            conn.execute(
                "INSERT INTO invoices \
                 (id, matter_id, invoice_number, status, issued_date, due_date, \
                  subtotal, tax, total, paid_amount, notes) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    invoice_id.to_string(),
                    invoice.matter_id.as_str(),
                    invoice.invoice_number.as_str(),
                    invoice.status.as_str(),
                    opt_text(
                        invoice
                            .issued_date
                            .map(|d| d.format("%Y-%m-%d").to_string())
                            .as_deref()
                    ),
                    opt_text(
                        invoice
                            .due_date
                            .map(|d| d.format("%Y-%m-%d").to_string())
                            .as_deref()
                    ),
                    invoice.subtotal.to_string(),
                    invoice.tax.to_string(),
                    invoice.total.to_string(),
                    invoice.paid_amount.to_string(),
                    opt_text(invoice.notes.as_deref()),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE") {
                    DatabaseError::Conflict(format!(
                        "invoice number '{}' already exists",
                        invoice.invoice_number
                    ))
                } else {
                    DatabaseError::Query(msg)
                }
            })?;

            for item in line_items {
                conn.execute(
                    "INSERT INTO invoice_line_items \
                     (id, invoice_id, description, quantity, unit_price, amount, \
                      time_entry_id, sort_order) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        Uuid::new_v4().to_string(),
                        invoice_id.to_string(),
                        item.description.as_str(),
                        item.quantity.to_string(),
                        item.unit_price.to_string(),
                        item.amount.to_string(),
                        opt_text(item.time_entry_id.map(|id| id.to_string()).as_deref()),
                        i64::from(item.sort_order),
                    ],
                )
                .await?;
            }

            Ok::<_, DatabaseError>(())
        }
        .await;

        if let Err(err) = save_result {
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(err);
        }
        conn.execute("COMMIT", ()).await?;

        let record = self
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created invoice".to_string()))?;
        let items = self.list_invoice_line_items(invoice_id).await?;
        Ok((record, items))
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1 LIMIT 1"),
                params![invoice_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_invoice_record(&row)).transpose()
    }

    async fn list_invoices(&self, matter_id: &str) -> Result<Vec<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices \
                     WHERE matter_id = ?1 ORDER BY created_at ASC"
                ),
                params![matter_id],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_invoice_record(&row)?);
        }
        Ok(out)
    }

    async fn list_invoice_line_items(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLineItemRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {LINE_ITEM_COLUMNS} FROM invoice_line_items \
                     WHERE invoice_id = ?1 ORDER BY sort_order ASC"
                ),
                params![invoice_id.to_string()],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_line_item_record(&row)?);
        }
        Ok(out)
    }

    async fn set_invoice_status(
        &self,
        invoice_id: Uuid,
        status: InvoiceStatus,
        issued_date: Option<NaiveDate>,
    ) -> Result<Option<InvoiceRecord>, DatabaseError> {
        if self.get_invoice(invoice_id).await?.is_none() {
            return Ok(None);
        }

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE invoices SET \
               status = ?2, \
               issued_date = COALESCE(?3, issued_date), \
               updated_at = datetime('now') \
             WHERE id = ?1",
            params![
                invoice_id.to_string(),
                status.as_str(),
                opt_text(
                    issued_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .as_deref()
                ),
            ],
        )
        .await?;

        self.get_invoice(invoice_id).await
    }

    async fn apply_invoice_payment(
        &self,
        invoice_id: Uuid,
        amount: Decimal,
    ) -> Result<Option<InvoiceRecord>, DatabaseError> {
        if amount <= Decimal::ZERO {
            return Err(DatabaseError::Serialization(
                "payment amount must be greater than 0".to_string(),
            ));
        }
        let Some(existing) = self.get_invoice(invoice_id).await? else {
            return Ok(None);
        };

        let new_paid = existing.paid_amount + amount;
        let new_status = if new_paid >= existing.total {
            InvoiceStatus::Paid
        } else {
            existing.status
        };

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE invoices SET \
               paid_amount = ?2, \
               status = ?3, \
               updated_at = datetime('now') \
             WHERE id = ?1",
            params![
                invoice_id.to_string(),
                new_paid.to_string(),
                new_status.as_str(),
            ],
        )
        .await?;

        self.get_invoice(invoice_id).await
    }

    async fn invoice_count(&self) -> Result<i64, DatabaseError> {
        let conn = self.connect().await?;
        let count = conn
            .query("SELECT COUNT(*) FROM invoices", ())
            .await?
            .next()
            .await?
            .map(|row| get_i64(&row, 0))
            .unwrap_or(0);
        Ok(count)
    }
}
