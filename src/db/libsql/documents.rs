use libsql::params;
use uuid::Uuid;

use crate::db::{
    CreateDocumentParams, DocumentRecord, DocumentRevisionRecord, DocumentStore, DocumentType,
};
use crate::error::DatabaseError;

use super::{LibSqlBackend, get_i64, get_opt_text, get_text, opt_text, parse_dt, parse_uuid};

fn parse_doc_type(raw: &str) -> Result<DocumentType, DatabaseError> {
    DocumentType::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid document type '{raw}'")))
}

fn parse_intake(raw: &str) -> Result<serde_json::Value, DatabaseError> {
    serde_json::from_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid intake json: {e}")))
}

fn row_to_document_record(row: &libsql::Row) -> Result<DocumentRecord, DatabaseError> {
    let doc_type_raw = get_text(row, 2);
    Ok(DocumentRecord {
        id: parse_uuid(&get_text(row, 0), "documents.id")?,
        matter_id: get_text(row, 1),
        doc_type: parse_doc_type(&doc_type_raw)?,
        title: get_text(row, 3),
        intake: parse_intake(&get_text(row, 4))?,
        rendered_text: get_opt_text(row, 5),
        completed: get_i64(row, 6) != 0,
        version: get_i64(row, 7) as i32,
        created_at: parse_dt(&get_text(row, 8))?,
        updated_at: parse_dt(&get_text(row, 9))?,
    })
}

fn row_to_revision_record(row: &libsql::Row) -> Result<DocumentRevisionRecord, DatabaseError> {
    Ok(DocumentRevisionRecord {
        id: parse_uuid(&get_text(row, 0), "document_revisions.id")?,
        document_id: parse_uuid(&get_text(row, 1), "document_revisions.document_id")?,
        version: get_i64(row, 2) as i32,
        intake: parse_intake(&get_text(row, 3))?,
        rendered_text: get_opt_text(row, 4),
        created_at: parse_dt(&get_text(row, 5))?,
    })
}

const DOCUMENT_COLUMNS: &str = "id, matter_id, doc_type, title, intake_json, rendered_text, \
     completed, version, created_at, updated_at";
const REVISION_COLUMNS: &str =
    "id, document_id, version, intake_json, rendered_text, created_at";

#[async_trait::async_trait]
impl DocumentStore for LibSqlBackend {
    async fn create_document(
        &self,
        matter_id: &str,
        input: &CreateDocumentParams,
    ) -> Result<DocumentRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4();
        let intake_json = serde_json::to_string(&input.intake)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO documents \
             (id, matter_id, doc_type, title, intake_json, rendered_text, completed, version) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 1)",
            params![
                id.to_string(),
                matter_id,
                input.doc_type.as_str(),
                input.title.trim(),
                intake_json,
                opt_text(input.rendered_text.as_deref()),
            ],
        )
        .await?;

        self.get_document(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created document".to_string()))
    }

    async fn get_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1 LIMIT 1"),
                params![document_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_document_record(&row)).transpose()
    }

    async fn list_documents(&self, matter_id: &str) -> Result<Vec<DocumentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents \
                     WHERE matter_id = ?1 ORDER BY created_at ASC"
                ),
                params![matter_id],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_document_record(&row)?);
        }
        Ok(out)
    }

    async fn update_document_content(
        &self,
        document_id: Uuid,
        intake: &serde_json::Value,
        rendered_text: Option<&str>,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        let Some(existing) = self.get_document(document_id).await? else {
            return Ok(None);
        };

        let existing_intake = serde_json::to_string(&existing.intake)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let new_intake = serde_json::to_string(intake)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let conn = self.connect().await?;
        conn.execute("BEGIN", ()).await?;
        let update_result = async {
            // Archive the content being replaced under its current version.
            conn.execute(
                "INSERT INTO document_revisions \
                 (id, document_id, version, intake_json, rendered_text) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    document_id.to_string(),
                    i64::from(existing.version),
                    existing_intake.as_str(),
                    opt_text(existing.rendered_text.as_deref()),
                ],
            )
            .await?;

            conn.execute(
                "UPDATE documents SET \
                   intake_json = ?2, \
                   rendered_text = ?3, \
                   version = version + 1, \
                   updated_at = datetime('now') \
                 WHERE id = ?1",
                params![
                    document_id.to_string(),
                    new_intake.as_str(),
                    opt_text(rendered_text),
                ],
            )
            .await?;

            Ok::<_, DatabaseError>(())
        }
        .await;

        match update_result {
            Ok(()) => {
                conn.execute("COMMIT", ()).await?;
                self.get_document(document_id).await
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn set_document_completed(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        if self.get_document(document_id).await?.is_none() {
            return Ok(None);
        }

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE documents SET completed = 1, updated_at = datetime('now') WHERE id = ?1",
            params![document_id.to_string()],
        )
        .await?;

        self.get_document(document_id).await
    }

    async fn list_document_revisions(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<DocumentRevisionRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {REVISION_COLUMNS} FROM document_revisions \
                     WHERE document_id = ?1 ORDER BY version ASC"
                ),
                params![document_id.to_string()],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_revision_record(&row)?);
        }
        Ok(out)
    }
}
