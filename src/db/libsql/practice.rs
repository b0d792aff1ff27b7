use chrono::Utc;
use libsql::params;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{
    ClientRecord, ClientRollup, ClientStore, ClientType, CreateClientParams, CreateMatterParams,
    CreateTimeEntryParams, MatterRecord, MatterStatus, MatterStore, MatterType, TimeEntryRecord,
    TimeEntryStore, UpdateClientParams, UpdateMatterParams, normalize_party_name,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_ts, get_i64, get_opt_text, get_text, opt_text, opt_text_owned, parse_date,
    parse_decimal, parse_dt, parse_dt_opt, parse_uuid,
};

fn parse_client_type(raw: &str) -> Result<ClientType, DatabaseError> {
    ClientType::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid client_type '{raw}'")))
}

fn parse_matter_status(raw: &str) -> Result<MatterStatus, DatabaseError> {
    MatterStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid matter status '{raw}'")))
}

fn parse_matter_type(raw: &str) -> Result<MatterType, DatabaseError> {
    MatterType::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid matter_type '{raw}'")))
}

fn row_to_client_record(row: &libsql::Row) -> Result<ClientRecord, DatabaseError> {
    let client_type_raw = get_text(row, 3);
    Ok(ClientRecord {
        id: parse_uuid(&get_text(row, 0), "clients.id")?,
        name: get_text(row, 1),
        name_normalized: get_text(row, 2),
        client_type: parse_client_type(&client_type_raw)?,
        email: get_opt_text(row, 4),
        phone: get_opt_text(row, 5),
        address: get_opt_text(row, 6),
        notes: get_opt_text(row, 7),
        created_at: parse_dt(&get_text(row, 8))?,
        updated_at: parse_dt(&get_text(row, 9))?,
    })
}

fn row_to_matter_record(row: &libsql::Row) -> Result<MatterRecord, DatabaseError> {
    let matter_type_raw = get_text(row, 2);
    let status_raw = get_text(row, 3);
    Ok(MatterRecord {
        matter_id: get_text(row, 0),
        client_id: parse_uuid(&get_text(row, 1), "matters.client_id")?,
        matter_type: parse_matter_type(&matter_type_raw)?,
        status: parse_matter_status(&status_raw)?,
        responsible_lawyer: get_text(row, 4),
        opened_at: parse_dt_opt(get_opt_text(row, 5))?,
        closed_at: parse_dt_opt(get_opt_text(row, 6))?,
        notes: get_opt_text(row, 7),
        created_at: parse_dt(&get_text(row, 8))?,
        updated_at: parse_dt(&get_text(row, 9))?,
    })
}

fn row_to_time_entry_record(row: &libsql::Row) -> Result<TimeEntryRecord, DatabaseError> {
    Ok(TimeEntryRecord {
        id: parse_uuid(&get_text(row, 0), "time_entries.id")?,
        matter_id: get_text(row, 1),
        entry_date: parse_date(&get_text(row, 2), "time_entries.entry_date")?,
        description: get_text(row, 3),
        hours: parse_decimal(&get_text(row, 4), "time_entries.hours")?,
        hourly_rate: parse_decimal(&get_text(row, 5), "time_entries.hourly_rate")?,
        billable: get_i64(row, 6) != 0,
        billed_invoice_id: get_opt_text(row, 7)
            .map(|value| parse_uuid(&value, "time_entries.billed_invoice_id"))
            .transpose()?,
        created_at: parse_dt(&get_text(row, 8))?,
        updated_at: parse_dt(&get_text(row, 9))?,
    })
}

const CLIENT_COLUMNS: &str =
    "id, name, name_normalized, client_type, email, phone, address, notes, created_at, updated_at";
const MATTER_COLUMNS: &str = "matter_id, client_id, matter_type, status, responsible_lawyer, \
     opened_at, closed_at, notes, created_at, updated_at";
const TIME_ENTRY_COLUMNS: &str = "id, matter_id, entry_date, description, hours, hourly_rate, \
     billable, billed_invoice_id, created_at, updated_at";

#[async_trait::async_trait]
impl ClientStore for LibSqlBackend {
    async fn create_client(
        &self,
        input: &CreateClientParams,
    ) -> Result<ClientRecord, DatabaseError> {
        let normalized_name = normalize_party_name(&input.name);
        if normalized_name.is_empty() {
            return Err(DatabaseError::Serialization(
                "client name cannot be empty".to_string(),
            ));
        }

        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO clients (id, name, name_normalized, client_type, email, phone, address, notes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.as_str(),
                input.name.trim(),
                normalized_name.as_str(),
                input.client_type.as_str(),
                opt_text(input.email.as_deref()),
                opt_text(input.phone.as_deref()),
                opt_text(input.address.as_deref()),
                opt_text(input.notes.as_deref()),
            ],
        )
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("UNIQUE") {
                DatabaseError::Conflict(format!("a client named '{}' already exists", input.name.trim()))
            } else {
                DatabaseError::Query(msg)
            }
        })?;

        let row = conn
            .query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1 LIMIT 1"),
                params![id.as_str()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created client".to_string()))?;

        row_to_client_record(&row)
    }

    async fn upsert_client_by_normalized_name(
        &self,
        input: &CreateClientParams,
    ) -> Result<ClientRecord, DatabaseError> {
        let normalized_name = normalize_party_name(&input.name);
        if normalized_name.is_empty() {
            return Err(DatabaseError::Serialization(
                "client name cannot be empty".to_string(),
            ));
        }

        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO clients (id, name, name_normalized, client_type, email, phone, address, notes, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'), datetime('now')) \
             ON CONFLICT (name_normalized) DO UPDATE SET \
               name = excluded.name, \
               client_type = excluded.client_type, \
               email = COALESCE(excluded.email, clients.email), \
               phone = COALESCE(excluded.phone, clients.phone), \
               address = COALESCE(excluded.address, clients.address), \
               notes = COALESCE(excluded.notes, clients.notes), \
               updated_at = datetime('now')",
            params![
                Uuid::new_v4().to_string(),
                input.name.trim(),
                normalized_name.as_str(),
                input.client_type.as_str(),
                opt_text(input.email.as_deref()),
                opt_text(input.phone.as_deref()),
                opt_text(input.address.as_deref()),
                opt_text(input.notes.as_deref()),
            ],
        )
        .await?;

        let row = conn
            .query(
                &format!(
                    "SELECT {CLIENT_COLUMNS} FROM clients WHERE name_normalized = ?1 LIMIT 1"
                ),
                params![normalized_name.as_str()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to resolve upserted client".to_string()))?;

        row_to_client_record(&row)
    }

    async fn list_clients(&self, query: Option<&str>) -> Result<Vec<ClientRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let search = query.map(normalize_party_name).filter(|s| !s.is_empty());
        let mut rows = if let Some(search) = search {
            let like = format!("%{search}%");
            conn.query(
                &format!(
                    "SELECT {CLIENT_COLUMNS} FROM clients \
                     WHERE name_normalized LIKE ?1 ORDER BY name ASC"
                ),
                params![like],
            )
            .await?
        } else {
            conn.query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients ORDER BY name ASC"),
                (),
            )
            .await?
        };

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_client_record(&row)?);
        }
        Ok(out)
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<ClientRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1 LIMIT 1"),
                params![client_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_client_record(&row)).transpose()
    }

    async fn update_client(
        &self,
        client_id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError> {
        let Some(existing) = self.get_client(client_id).await? else {
            return Ok(None);
        };

        let merged_name = input.name.as_deref().unwrap_or(existing.name.as_str()).trim();
        let normalized_name = normalize_party_name(merged_name);
        if normalized_name.is_empty() {
            return Err(DatabaseError::Serialization(
                "client name cannot be empty".to_string(),
            ));
        }
        let merged_client_type = input.client_type.unwrap_or(existing.client_type);
        let merged_email = input.email.clone().unwrap_or(existing.email);
        let merged_phone = input.phone.clone().unwrap_or(existing.phone);
        let merged_address = input.address.clone().unwrap_or(existing.address);
        let merged_notes = input.notes.clone().unwrap_or(existing.notes);

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE clients SET \
               name = ?2, \
               name_normalized = ?3, \
               client_type = ?4, \
               email = ?5, \
               phone = ?6, \
               address = ?7, \
               notes = ?8, \
               updated_at = datetime('now') \
             WHERE id = ?1",
            params![
                client_id.to_string(),
                merged_name,
                normalized_name.as_str(),
                merged_client_type.as_str(),
                opt_text(merged_email.as_deref()),
                opt_text(merged_phone.as_deref()),
                opt_text(merged_address.as_deref()),
                opt_text(merged_notes.as_deref()),
            ],
        )
        .await?;

        self.get_client(client_id).await
    }

    async fn delete_client(&self, client_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let open_matters = conn
            .query(
                "SELECT COUNT(*) FROM matters WHERE client_id = ?1",
                params![client_id.to_string()],
            )
            .await?
            .next()
            .await?
            .map(|row| get_i64(&row, 0))
            .unwrap_or(0);
        if open_matters > 0 {
            return Err(DatabaseError::Conflict(
                "cannot delete a client with matters on file".to_string(),
            ));
        }

        let deleted = conn
            .execute(
                "DELETE FROM clients WHERE id = ?1",
                params![client_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn client_rollup(&self, client_id: Uuid) -> Result<ClientRollup, DatabaseError> {
        let conn = self.connect().await?;
        let matter_count = conn
            .query(
                "SELECT COUNT(*) FROM matters WHERE client_id = ?1",
                params![client_id.to_string()],
            )
            .await?
            .next()
            .await?
            .map(|row| get_i64(&row, 0))
            .unwrap_or(0);

        // Balance and unbilled totals are TEXT decimals, so the sums are
        // folded in Rust rather than in SQL.
        let mut trust_balance = Decimal::ZERO;
        let mut rows = conn
            .query(
                "SELECT te.balance_after FROM trust_entries te \
                 JOIN matters m ON m.matter_id = te.matter_id \
                 WHERE m.client_id = ?1 \
                 AND te.id IN ( \
                    SELECT id FROM trust_entries t2 \
                    WHERE t2.matter_id = te.matter_id \
                    ORDER BY t2.created_at DESC, t2.rowid DESC LIMIT 1 \
                 )",
                params![client_id.to_string()],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            trust_balance += parse_decimal(&get_text(&row, 0), "trust_entries.balance_after")?;
        }

        let mut unbilled_amount = Decimal::ZERO;
        let mut rows = conn
            .query(
                "SELECT t.hours, t.hourly_rate FROM time_entries t \
                 JOIN matters m ON m.matter_id = t.matter_id \
                 WHERE m.client_id = ?1 AND t.billable = 1 AND t.billed_invoice_id IS NULL",
                params![client_id.to_string()],
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let hours = parse_decimal(&get_text(&row, 0), "time_entries.hours")?;
            let rate = parse_decimal(&get_text(&row, 1), "time_entries.hourly_rate")?;
            unbilled_amount += (hours * rate).round_dp(2);
        }

        Ok(ClientRollup {
            matter_count,
            trust_balance,
            unbilled_amount,
        })
    }
}

#[async_trait::async_trait]
impl MatterStore for LibSqlBackend {
    async fn create_matter(
        &self,
        input: &CreateMatterParams,
    ) -> Result<MatterRecord, DatabaseError> {
        let conn = self.connect().await?;
        if self.get_matter(&input.matter_id).await?.is_some() {
            return Err(DatabaseError::Conflict(format!(
                "matter '{}' already exists",
                input.matter_id
            )));
        }

        let opened_at = input.opened_at.unwrap_or_else(Utc::now);
        conn.execute(
            "INSERT INTO matters \
             (matter_id, client_id, matter_type, status, responsible_lawyer, opened_at, closed_at, notes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)",
            params![
                input.matter_id.as_str(),
                input.client_id.to_string(),
                input.matter_type.as_str(),
                input.status.as_str(),
                input.responsible_lawyer.as_str(),
                fmt_ts(&opened_at),
                opt_text(input.notes.as_deref()),
            ],
        )
        .await?;

        self.get_matter(&input.matter_id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created matter".to_string()))
    }

    async fn list_matters(
        &self,
        status: Option<MatterStatus>,
    ) -> Result<Vec<MatterRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = if let Some(status) = status {
            conn.query(
                &format!(
                    "SELECT {MATTER_COLUMNS} FROM matters WHERE status = ?1 ORDER BY matter_id ASC"
                ),
                params![status.as_str()],
            )
            .await?
        } else {
            conn.query(
                &format!("SELECT {MATTER_COLUMNS} FROM matters ORDER BY matter_id ASC"),
                (),
            )
            .await?
        };

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_matter_record(&row)?);
        }
        Ok(out)
    }

    async fn get_matter(&self, matter_id: &str) -> Result<Option<MatterRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {MATTER_COLUMNS} FROM matters WHERE matter_id = ?1 LIMIT 1"),
                params![matter_id],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_matter_record(&row)).transpose()
    }

    async fn update_matter(
        &self,
        matter_id: &str,
        input: &UpdateMatterParams,
    ) -> Result<Option<MatterRecord>, DatabaseError> {
        let Some(existing) = self.get_matter(matter_id).await? else {
            return Ok(None);
        };

        let merged_client_id = input.client_id.unwrap_or(existing.client_id);
        let merged_matter_type = input.matter_type.unwrap_or(existing.matter_type);
        let merged_status = input.status.unwrap_or(existing.status);
        let merged_lawyer = input
            .responsible_lawyer
            .clone()
            .unwrap_or(existing.responsible_lawyer);
        let merged_opened_at = input.opened_at.unwrap_or(existing.opened_at);
        let merged_closed_at = input.closed_at.unwrap_or(existing.closed_at);
        let merged_notes = input.notes.clone().unwrap_or(existing.notes);

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE matters SET \
               client_id = ?2, \
               matter_type = ?3, \
               status = ?4, \
               responsible_lawyer = ?5, \
               opened_at = ?6, \
               closed_at = ?7, \
               notes = ?8, \
               updated_at = datetime('now') \
             WHERE matter_id = ?1",
            params![
                matter_id,
                merged_client_id.to_string(),
                merged_matter_type.as_str(),
                merged_status.as_str(),
                merged_lawyer.as_str(),
                opt_text_owned(merged_opened_at.as_ref().map(fmt_ts)),
                opt_text_owned(merged_closed_at.as_ref().map(fmt_ts)),
                opt_text(merged_notes.as_deref()),
            ],
        )
        .await?;

        self.get_matter(matter_id).await
    }
}

#[async_trait::async_trait]
impl TimeEntryStore for LibSqlBackend {
    async fn create_time_entry(
        &self,
        matter_id: &str,
        input: &CreateTimeEntryParams,
    ) -> Result<TimeEntryRecord, DatabaseError> {
        if input.hours <= Decimal::ZERO {
            return Err(DatabaseError::Serialization(
                "time entry hours must be greater than 0".to_string(),
            ));
        }
        if input.hourly_rate < Decimal::ZERO {
            return Err(DatabaseError::Serialization(
                "hourly rate must not be negative".to_string(),
            ));
        }

        let conn = self.connect().await?;
        let entry_id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO time_entries \
             (id, matter_id, entry_date, description, hours, hourly_rate, billable, billed_invoice_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
            params![
                entry_id.to_string(),
                matter_id,
                input.entry_date.format("%Y-%m-%d").to_string(),
                input.description.trim(),
                input.hours.to_string(),
                input.hourly_rate.to_string(),
                if input.billable { 1 } else { 0 },
            ],
        )
        .await?;

        let row = conn
            .query(
                &format!("SELECT {TIME_ENTRY_COLUMNS} FROM time_entries WHERE id = ?1 LIMIT 1"),
                params![entry_id.to_string()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created time entry".to_string()))?;
        row_to_time_entry_record(&row)
    }

    async fn list_time_entries(
        &self,
        matter_id: &str,
    ) -> Result<Vec<TimeEntryRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TIME_ENTRY_COLUMNS} FROM time_entries \
                     WHERE matter_id = ?1 ORDER BY entry_date ASC, created_at ASC"
                ),
                params![matter_id],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_time_entry_record(&row)?);
        }
        Ok(out)
    }

    async fn list_unbilled_time_entries(&self) -> Result<Vec<TimeEntryRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TIME_ENTRY_COLUMNS} FROM time_entries \
                     WHERE billable = 1 AND billed_invoice_id IS NULL \
                     ORDER BY entry_date ASC"
                ),
                (),
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_time_entry_record(&row)?);
        }
        Ok(out)
    }

    async fn mark_time_entries_billed(
        &self,
        entry_ids: &[Uuid],
        invoice_id: Uuid,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        for entry_id in entry_ids {
            conn.execute(
                "UPDATE time_entries SET billed_invoice_id = ?2, updated_at = datetime('now') \
                 WHERE id = ?1",
                params![entry_id.to_string(), invoice_id.to_string()],
            )
            .await?;
        }
        Ok(())
    }
}
