//! Axum HTTP server for the practice API.
//!
//! Handles all routes: clients, matters, time, trust, invoices, documents,
//! the practice monitor, and the audit tail.

use std::io::{BufRead, BufReader};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::oneshot;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::audit;
use crate::channels::web::auth::{AuthState, auth_middleware};
use crate::channels::web::types::*;
use crate::config::{AuditConfig, PracticeConfig};
use crate::db::{
    ClientType, CreateClientParams, CreateDocumentParams, CreateMatterParams,
    CreateTimeEntryParams, Database, DocumentRecord, DocumentType, MatterStatus, MatterType,
    UpdateClientParams, UpdateMatterParams,
};
use crate::error::{DatabaseError, DocGenError, ServerError};
use crate::legal::intake::Intake;
use crate::legal::{billing, compliance, docgen, lso, risk, trust};
use crate::llm::LlmProvider;

/// Simple sliding-window rate limiter.
///
/// Tracks the number of requests in the current window. Resets when the
/// window expires. Not per-IP (this is a single-user service with auth),
/// but prevents flooding the document generator and any LLM behind it.
pub struct RateLimiter {
    /// Requests remaining in the current window.
    remaining: AtomicU64,
    /// Epoch second when the current window started.
    window_start: AtomicU64,
    /// Maximum requests per window.
    max_requests: u64,
    /// Window duration in seconds.
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            remaining: AtomicU64::new(max_requests),
            window_start: AtomicU64::new(
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs(),
            ),
            max_requests,
            window_secs,
        }
    }

    /// Try to consume one request. Returns `true` if allowed, `false` if rate limited.
    pub fn check(&self) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let window = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(window) >= self.window_secs {
            // Window expired, reset
            self.window_start.store(now, Ordering::Relaxed);
            self.remaining
                .store(self.max_requests - 1, Ordering::Relaxed);
            return true;
        }

        // Try to decrement remaining
        loop {
            let current = self.remaining.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .remaining
                .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

/// Shared state for all API handlers.
pub struct AppState {
    pub db: Arc<dyn Database>,
    /// Optional clause-drafting provider; `None` runs everything template-only.
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub practice: PracticeConfig,
    pub audit: AuditConfig,
    /// Throttles document generation, the one endpoint that can fan out to
    /// an external LLM.
    pub docgen_limiter: RateLimiter,
    /// Shutdown signal sender.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
    pub started_at: Instant,
}

const MAX_AUDIT_SCAN_LINES: usize = 100_000;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; object-src 'none'; frame-ancestors 'none'; base-uri 'self'; form-action 'self'";

/// Start the HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<AppState>,
    auth_token: String,
) -> Result<SocketAddr, ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let bound_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

    // Public routes (no auth)
    let public = Router::new().route("/api/health", get(health_handler));

    // Protected routes (require auth)
    let auth_state = AuthState { token: auth_token };
    let protected = Router::new()
        // Clients
        .route(
            "/api/clients",
            get(clients_list_handler).post(clients_create_handler),
        )
        .route(
            "/api/clients/{id}",
            get(clients_get_handler)
                .put(clients_update_handler)
                .delete(clients_delete_handler),
        )
        // Matters
        .route(
            "/api/matters",
            get(matters_list_handler).post(matters_create_handler),
        )
        .route(
            "/api/matters/{id}",
            get(matters_get_handler).patch(matters_update_handler),
        )
        .route("/api/matters/{id}/close", post(matters_close_handler))
        // Time
        .route(
            "/api/matters/{id}/time",
            get(time_list_handler).post(time_create_handler),
        )
        // Trust
        .route(
            "/api/matters/{id}/trust",
            get(trust_ledger_handler).post(trust_entry_handler),
        )
        .route("/api/trust/transfer", post(trust_transfer_handler))
        .route(
            "/api/trust/reconciliation",
            get(trust_reconciliation_get_handler).post(trust_reconcile_handler),
        )
        .route("/api/trust/ledger.csv", get(trust_ledger_csv_handler))
        // Invoices
        .route(
            "/api/matters/{id}/invoices",
            get(invoices_list_handler).post(invoices_create_handler),
        )
        .route("/api/invoices/{id}", get(invoices_get_handler))
        .route("/api/invoices/{id}/finalize", post(invoices_finalize_handler))
        .route("/api/invoices/{id}/payments", post(invoices_payment_handler))
        // Documents
        .route(
            "/api/matters/{id}/documents",
            get(documents_list_handler).post(documents_create_handler),
        )
        .route(
            "/api/documents/{id}",
            get(documents_get_handler).put(documents_update_handler),
        )
        .route("/api/documents/{id}/text", get(documents_text_handler))
        .route(
            "/api/documents/{id}/compliance",
            get(documents_compliance_handler),
        )
        .route("/api/documents/{id}/risk", get(documents_risk_handler))
        .route("/api/documents/{id}/complete", post(documents_complete_handler))
        .route(
            "/api/documents/{id}/revisions",
            get(documents_revisions_handler),
        )
        // Practice monitor
        .route("/api/practice/compliance", get(practice_compliance_handler))
        // Audit tail
        .route("/api/audit", get(audit_list_handler))
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth_middleware,
        ));

    // CORS: restrict to same-origin by default. Only localhost/127.0.0.1
    // origins are allowed, since this is a local-first service.
    let cors = CorsLayer::new()
        .allow_origin([
            format!("http://{}:{}", addr.ip(), addr.port())
                .parse()
                .expect("valid origin"),
            format!("http://localhost:{}", addr.port())
                .parse()
                .expect("valid origin"),
        ])
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
        ])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ]))
        .allow_credentials(true);

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            header::HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            header::HeaderValue::from_static("DENY"),
        ))
        .with_state(state.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("API server shutting down");
            })
            .await
        {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(bound_addr)
}

// --- Error mapping ---

fn db_err(err: DatabaseError) -> (StatusCode, String) {
    match err {
        DatabaseError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
        DatabaseError::Conflict(_) | DatabaseError::TrustOverdraft { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        DatabaseError::Serialization(_) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        other => {
            tracing::error!("database error: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// Service-layer errors arrive as strings; classify by content.
fn svc_err(message: String) -> (StatusCode, String) {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("not found") {
        (StatusCode::NOT_FOUND, message)
    } else if lowered.contains("overdra") || lowered.contains("insufficient") {
        (StatusCode::CONFLICT, message)
    } else {
        (StatusCode::UNPROCESSABLE_ENTITY, message)
    }
}

fn docgen_err(err: DocGenError) -> (StatusCode, String) {
    match err {
        DocGenError::Intake(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
        DocGenError::Database(db) => db_err(db),
        other => {
            tracing::error!("document generation failed: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn bad_field(field: &str, value: &str) -> (StatusCode, String) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        format!("invalid value '{value}' for '{field}'"),
    )
}

fn parse_client_type(raw: &str) -> Result<ClientType, (StatusCode, String)> {
    ClientType::from_db_value(raw).ok_or_else(|| bad_field("client_type", raw))
}

fn parse_matter_type(raw: &str) -> Result<MatterType, (StatusCode, String)> {
    MatterType::from_db_value(raw).ok_or_else(|| bad_field("matter_type", raw))
}

fn parse_matter_status(raw: &str) -> Result<MatterStatus, (StatusCode, String)> {
    MatterStatus::from_db_value(raw).ok_or_else(|| bad_field("status", raw))
}

fn parse_doc_type(raw: &str) -> Result<DocumentType, (StatusCode, String)> {
    DocumentType::from_db_value(raw).ok_or_else(|| bad_field("doc_type", raw))
}

/// An omitted field leaves the value untouched; an empty string clears it.
fn clear_or_set(value: Option<String>) -> Option<Option<String>> {
    value.map(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

async fn require_matter(
    db: &dyn Database,
    matter_id: &str,
) -> Result<crate::db::MatterRecord, (StatusCode, String)> {
    db.get_matter(matter_id)
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "matter not found".to_string()))
}

async fn require_document(
    db: &dyn Database,
    document_id: Uuid,
) -> Result<DocumentRecord, (StatusCode, String)> {
    db.get_document(document_id)
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "document not found".to_string()))
}

fn parse_stored_intake(doc: &DocumentRecord) -> Result<Intake, (StatusCode, String)> {
    Intake::from_value(doc.doc_type, &doc.intake).map_err(|e| {
        tracing::error!(document_id = %doc.id, "stored intake no longer parses: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "stored intake is not valid for this document type".to_string(),
        )
    })
}

// --- Health ---

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "willforge",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

// --- Clients ---

async fn clients_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientListQuery>,
) -> Result<Json<ClientListResponse>, (StatusCode, String)> {
    let clients = state
        .db
        .list_clients(query.q.as_deref())
        .await
        .map_err(db_err)?;
    Ok(Json(ClientListResponse { clients }))
}

async fn clients_create_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateClientRequest>,
) -> Result<(StatusCode, Json<crate::db::ClientRecord>), (StatusCode, String)> {
    if req.name.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "'name' must not be empty".to_string(),
        ));
    }
    let client_type = match req.client_type.as_deref() {
        Some(raw) => parse_client_type(raw)?,
        None => ClientType::Individual,
    };
    let client = state
        .db
        .create_client(&CreateClientParams {
            name: req.name.trim().to_string(),
            client_type,
            email: req.email,
            phone: req.phone,
            address: req.address,
            notes: req.notes,
        })
        .await
        .map_err(db_err)?;
    Ok((StatusCode::CREATED, Json(client)))
}

async fn clients_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClientDetailResponse>, (StatusCode, String)> {
    let client = state
        .db
        .get_client(id)
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "client not found".to_string()))?;
    let rollup = state.db.client_rollup(id).await.map_err(db_err)?;
    Ok(Json(ClientDetailResponse { client, rollup }))
}

async fn clients_update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateClientRequest>,
) -> Result<Json<crate::db::ClientRecord>, (StatusCode, String)> {
    let client_type = match req.client_type.as_deref() {
        Some(raw) => Some(parse_client_type(raw)?),
        None => None,
    };
    let params = UpdateClientParams {
        name: req.name.map(|n| n.trim().to_string()),
        client_type,
        email: clear_or_set(req.email),
        phone: clear_or_set(req.phone),
        address: clear_or_set(req.address),
        notes: clear_or_set(req.notes),
    };
    let client = state
        .db
        .update_client(id, &params)
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "client not found".to_string()))?;
    Ok(Json(client))
}

async fn clients_delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let deleted = state.db.delete_client(id).await.map_err(db_err)?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "client not found".to_string()))
    }
}

// --- Matters ---

async fn matters_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MatterListQuery>,
) -> Result<Json<MatterListResponse>, (StatusCode, String)> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(parse_matter_status(raw)?),
        None => None,
    };
    let matters = state.db.list_matters(status).await.map_err(db_err)?;
    Ok(Json(MatterListResponse { matters }))
}

async fn matters_create_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateMatterRequest>,
) -> Result<(StatusCode, Json<crate::db::MatterRecord>), (StatusCode, String)> {
    let matter_id = crate::db::sanitize_matter_id(&req.matter_id);
    if matter_id.is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "'matter_id' must contain at least one alphanumeric character".to_string(),
        ));
    }
    let matter_type = parse_matter_type(&req.matter_type)?;
    state
        .db
        .get_client(req.client_id)
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "client not found".to_string()))?;

    let matter = state
        .db
        .create_matter(&CreateMatterParams {
            matter_id,
            client_id: req.client_id,
            matter_type,
            status: MatterStatus::Intake,
            responsible_lawyer: req
                .responsible_lawyer
                .unwrap_or_else(|| state.practice.responsible_lawyer.clone()),
            opened_at: None,
            notes: req.notes,
        })
        .await
        .map_err(db_err)?;
    Ok((StatusCode::CREATED, Json(matter)))
}

async fn matters_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::db::MatterRecord>, (StatusCode, String)> {
    let matter = require_matter(state.db.as_ref(), &id).await?;
    Ok(Json(matter))
}

async fn matters_update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateMatterRequest>,
) -> Result<Json<crate::db::MatterRecord>, (StatusCode, String)> {
    if let Some(client_id) = req.client_id {
        state
            .db
            .get_client(client_id)
            .await
            .map_err(db_err)?
            .ok_or((StatusCode::NOT_FOUND, "client not found".to_string()))?;
    }
    let matter_type = match req.matter_type.as_deref() {
        Some(raw) => Some(parse_matter_type(raw)?),
        None => None,
    };
    let status = match req.status.as_deref() {
        Some(raw) => Some(parse_matter_status(raw)?),
        None => None,
    };
    let params = UpdateMatterParams {
        client_id: req.client_id,
        matter_type,
        status,
        responsible_lawyer: req.responsible_lawyer,
        opened_at: None,
        closed_at: None,
        notes: clear_or_set(req.notes),
    };
    let matter = state
        .db
        .update_matter(&id, &params)
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "matter not found".to_string()))?;
    Ok(Json(matter))
}

/// Closing is refused while the matter still holds trust funds.
async fn matters_close_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::db::MatterRecord>, (StatusCode, String)> {
    let matter = require_matter(state.db.as_ref(), &id).await?;
    if matter.status == MatterStatus::Closed {
        return Err((
            StatusCode::CONFLICT,
            format!("matter {id} is already closed"),
        ));
    }
    let balance = state.db.trust_balance(&id).await.map_err(db_err)?;
    if balance != Decimal::ZERO {
        return Err((
            StatusCode::CONFLICT,
            format!("matter {id} still holds {balance} in trust; disburse before closing"),
        ));
    }
    let params = UpdateMatterParams {
        status: Some(MatterStatus::Closed),
        closed_at: Some(Some(chrono::Utc::now())),
        ..UpdateMatterParams::default()
    };
    let matter = state
        .db
        .update_matter(&id, &params)
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "matter not found".to_string()))?;
    audit::record("matter_closed", json!({ "matter_id": id }));
    Ok(Json(matter))
}

// --- Time ---

async fn time_list_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TimeEntryListResponse>, (StatusCode, String)> {
    require_matter(state.db.as_ref(), &id).await?;
    let entries = state.db.list_time_entries(&id).await.map_err(db_err)?;
    Ok(Json(TimeEntryListResponse { entries }))
}

async fn time_create_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateTimeEntryRequest>,
) -> Result<(StatusCode, Json<crate::db::TimeEntryRecord>), (StatusCode, String)> {
    require_matter(state.db.as_ref(), &id).await?;
    let entry = state
        .db
        .create_time_entry(
            &id,
            &CreateTimeEntryParams {
                entry_date: req.entry_date,
                description: req.description,
                hours: req.hours,
                hourly_rate: req
                    .hourly_rate
                    .unwrap_or(state.practice.default_hourly_rate),
                billable: req.billable.unwrap_or(true),
            },
        )
        .await
        .map_err(db_err)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

// --- Trust ---

async fn trust_ledger_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TrustLedgerResponse>, (StatusCode, String)> {
    require_matter(state.db.as_ref(), &id).await?;
    let entries = state.db.list_trust_entries(&id).await.map_err(db_err)?;
    let balance = state.db.trust_balance(&id).await.map_err(db_err)?;
    Ok(Json(TrustLedgerResponse {
        matter_id: id,
        balance,
        entries,
    }))
}

async fn trust_entry_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateTrustEntryRequest>,
) -> Result<(StatusCode, Json<crate::db::TrustEntryRecord>), (StatusCode, String)> {
    require_matter(state.db.as_ref(), &id).await?;
    let recorded_by = req
        .recorded_by
        .unwrap_or_else(|| state.practice.responsible_lawyer.clone());
    let entry = match req.entry_type.as_str() {
        "receipt" => trust::record_receipt(
            state.db.as_ref(),
            &id,
            req.amount,
            &req.description,
            req.reference.as_deref(),
            &recorded_by,
        )
        .await
        .map_err(svc_err)?,
        "disbursement" => trust::record_disbursement(
            state.db.as_ref(),
            &id,
            req.amount,
            &req.description,
            req.reference.as_deref(),
            &recorded_by,
        )
        .await
        .map_err(svc_err)?,
        other => return Err(bad_field("entry_type", other)),
    };
    audit::inc_trust_entries();
    audit::record(
        "trust_entry",
        json!({
            "matter_id": id,
            "entry_type": entry.entry_type.as_str(),
            "amount": entry.amount.to_string(),
        }),
    );
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn trust_transfer_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TrustTransferRequest>,
) -> Result<(StatusCode, Json<TrustTransferResponse>), (StatusCode, String)> {
    require_matter(state.db.as_ref(), &req.from_matter_id).await?;
    require_matter(state.db.as_ref(), &req.to_matter_id).await?;
    let recorded_by = req
        .recorded_by
        .unwrap_or_else(|| state.practice.responsible_lawyer.clone());
    let (out_entry, in_entry) = trust::transfer_between_matters(
        state.db.as_ref(),
        &req.from_matter_id,
        &req.to_matter_id,
        req.amount,
        &req.description,
        req.reference.as_deref(),
        &recorded_by,
    )
    .await
    .map_err(svc_err)?;
    audit::inc_trust_entries();
    audit::record(
        "trust_transfer",
        json!({
            "from_matter_id": req.from_matter_id,
            "to_matter_id": req.to_matter_id,
            "amount": req.amount.to_string(),
        }),
    );
    Ok((
        StatusCode::CREATED,
        Json(TrustTransferResponse {
            out_entry,
            in_entry,
        }),
    ))
}

async fn trust_reconciliation_get_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TrustReconciliationResponse>, (StatusCode, String)> {
    let balances = state.db.trust_balances().await.map_err(db_err)?;
    let ledger_total = balances
        .iter()
        .fold(Decimal::ZERO, |acc, b| acc + b.balance)
        .round_dp(2);
    let latest = state
        .db
        .latest_trust_reconciliation()
        .await
        .map_err(db_err)?;
    Ok(Json(TrustReconciliationResponse {
        balances,
        ledger_total,
        latest,
    }))
}

async fn trust_reconcile_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TrustReconciliationRequest>,
) -> Result<(StatusCode, Json<trust::ReconciliationSnapshot>), (StatusCode, String)> {
    let snapshot = trust::reconcile(state.db.as_ref(), req.bank_balance, req.notes.as_deref())
        .await
        .map_err(db_err)?;
    audit::record(
        "trust_reconciliation",
        json!({
            "bank_balance": snapshot.record.bank_balance.to_string(),
            "ledger_total": snapshot.record.ledger_total.to_string(),
            "discrepancy": snapshot.record.discrepancy.to_string(),
        }),
    );
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn trust_ledger_csv_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let csv = trust::export_ledger_csv(state.db.as_ref())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"trust-ledger.csv\"",
            ),
        ],
        csv,
    ))
}

// --- Invoices ---

async fn invoices_list_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<InvoiceListResponse>, (StatusCode, String)> {
    require_matter(state.db.as_ref(), &id).await?;
    let invoices = state.db.list_invoices(&id).await.map_err(db_err)?;
    Ok(Json(InvoiceListResponse { invoices }))
}

async fn invoices_create_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceDetailResponse>), (StatusCode, String)> {
    require_matter(state.db.as_ref(), &id).await?;
    let number = billing::next_invoice_number(state.db.as_ref())
        .await
        .map_err(db_err)?;
    let draft = billing::draft_invoice(
        state.db.as_ref(),
        &id,
        &number,
        state.practice.hst_rate,
        req.due_date,
        req.notes,
    )
    .await
    .map_err(db_err)?;
    if draft.line_items.is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("matter {id} has no unbilled billable time"),
        ));
    }
    let (invoice, line_items) = billing::save_draft(state.db.as_ref(), &draft)
        .await
        .map_err(db_err)?;
    audit::record(
        "invoice_drafted",
        json!({
            "matter_id": id,
            "invoice_number": invoice.invoice_number,
            "total": invoice.total.to_string(),
        }),
    );
    Ok((
        StatusCode::CREATED,
        Json(InvoiceDetailResponse {
            invoice,
            line_items,
        }),
    ))
}

async fn invoices_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceDetailResponse>, (StatusCode, String)> {
    let invoice = state
        .db
        .get_invoice(id)
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "invoice not found".to_string()))?;
    let line_items = state.db.list_invoice_line_items(id).await.map_err(db_err)?;
    Ok(Json(InvoiceDetailResponse {
        invoice,
        line_items,
    }))
}

async fn invoices_finalize_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::db::InvoiceRecord>, (StatusCode, String)> {
    let invoice = billing::finalize_invoice(state.db.as_ref(), id)
        .await
        .map_err(svc_err)?;
    audit::inc_invoices_finalized();
    audit::record(
        "invoice_finalized",
        json!({
            "invoice_number": invoice.invoice_number,
            "total": invoice.total.to_string(),
        }),
    );
    Ok(Json(invoice))
}

async fn invoices_payment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RecordPaymentRequest>,
) -> Result<Json<RecordPaymentResponse>, (StatusCode, String)> {
    let recorded_by = req
        .recorded_by
        .unwrap_or_else(|| state.practice.responsible_lawyer.clone());
    let (invoice, trust_entry) = billing::record_payment(
        state.db.as_ref(),
        id,
        req.amount,
        &recorded_by,
        req.draw_from_trust,
        req.description.as_deref(),
    )
    .await
    .map_err(svc_err)?;
    if trust_entry.is_some() {
        audit::inc_trust_entries();
    }
    audit::record(
        "invoice_payment",
        json!({
            "invoice_number": invoice.invoice_number,
            "amount": req.amount.to_string(),
            "from_trust": req.draw_from_trust,
        }),
    );
    Ok(Json(RecordPaymentResponse {
        invoice,
        trust_entry,
    }))
}

// --- Documents ---

async fn documents_list_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentListResponse>, (StatusCode, String)> {
    require_matter(state.db.as_ref(), &id).await?;
    let documents = state.db.list_documents(&id).await.map_err(db_err)?;
    Ok(Json(DocumentListResponse { documents }))
}

async fn documents_create_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), (StatusCode, String)> {
    let doc_type = parse_doc_type(&req.doc_type)?;
    let matter = require_matter(state.db.as_ref(), &id).await?;
    let client = state
        .db
        .get_client(matter.client_id)
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "client not found".to_string()))?;
    let intake = Intake::from_value(doc_type, &req.intake).map_err(docgen_err)?;

    if !state.docgen_limiter.check() {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            "document generation rate limit exceeded; retry shortly".to_string(),
        ));
    }

    let generated = docgen::generate_document(
        doc_type,
        &matter,
        &client,
        &intake,
        state.llm.as_deref(),
    )
    .await
    .map_err(docgen_err)?;

    let record = state
        .db
        .create_document(
            &id,
            &CreateDocumentParams {
                doc_type,
                title: req.title,
                intake: req.intake,
                rendered_text: Some(generated.text.clone()),
            },
        )
        .await
        .map_err(db_err)?;
    audit::inc_documents_generated();
    audit::record(
        "document_generated",
        json!({
            "document_id": record.id,
            "matter_id": id,
            "doc_type": doc_type.as_str(),
            "ai_clauses": generated.ai_clauses,
        }),
    );
    Ok((
        StatusCode::CREATED,
        Json(DocumentResponse {
            record,
            sections: Some(generated.sections),
            ai_clauses: Some(generated.ai_clauses),
        }),
    ))
}

async fn documents_get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, (StatusCode, String)> {
    let record = require_document(state.db.as_ref(), id).await?;
    Ok(Json(DocumentResponse {
        record,
        sections: None,
        ai_clauses: None,
    }))
}

/// Regenerate from new intake. The prior version is archived; completed
/// documents are immutable.
async fn documents_update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDocumentRequest>,
) -> Result<Json<DocumentResponse>, (StatusCode, String)> {
    let existing = require_document(state.db.as_ref(), id).await?;
    if existing.completed {
        return Err((
            StatusCode::CONFLICT,
            "completed documents cannot be modified".to_string(),
        ));
    }
    let matter = require_matter(state.db.as_ref(), &existing.matter_id).await?;
    let client = state
        .db
        .get_client(matter.client_id)
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "client not found".to_string()))?;
    let intake = Intake::from_value(existing.doc_type, &req.intake).map_err(docgen_err)?;

    if !state.docgen_limiter.check() {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            "document generation rate limit exceeded; retry shortly".to_string(),
        ));
    }

    let generated = docgen::generate_document(
        existing.doc_type,
        &matter,
        &client,
        &intake,
        state.llm.as_deref(),
    )
    .await
    .map_err(docgen_err)?;

    let record = state
        .db
        .update_document_content(id, &req.intake, Some(&generated.text))
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "document not found".to_string()))?;
    audit::inc_documents_generated();
    audit::record(
        "document_regenerated",
        json!({
            "document_id": record.id,
            "version": record.version,
            "ai_clauses": generated.ai_clauses,
        }),
    );
    Ok(Json(DocumentResponse {
        record,
        sections: Some(generated.sections),
        ai_clauses: Some(generated.ai_clauses),
    }))
}

async fn documents_text_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let record = require_document(state.db.as_ref(), id).await?;
    let text = record.rendered_text.ok_or((
        StatusCode::NOT_FOUND,
        "document has no rendered text".to_string(),
    ))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}

async fn documents_compliance_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ComplianceResponse>, (StatusCode, String)> {
    let record = require_document(state.db.as_ref(), id).await?;
    let intake = parse_stored_intake(&record)?;
    let report =
        compliance::check_document(record.doc_type, &intake, record.rendered_text.as_deref())
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))?;
    audit::inc_compliance_checks();
    audit::record(
        "compliance_check",
        json!({
            "document_id": record.id,
            "status": report.status,
            "findings": report.findings.len(),
        }),
    );
    Ok(Json(ComplianceResponse { report }))
}

async fn documents_risk_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RiskResponse>, (StatusCode, String)> {
    let record = require_document(state.db.as_ref(), id).await?;
    let intake = parse_stored_intake(&record)?;
    let report =
        compliance::check_document(record.doc_type, &intake, record.rendered_text.as_deref())
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))?;
    let assessment = risk::assess(&intake, &report);
    Ok(Json(RiskResponse { assessment }))
}

/// Marking complete re-runs compliance; a failing report blocks it.
async fn documents_complete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::db::DocumentRecord>, (StatusCode, String)> {
    let record = require_document(state.db.as_ref(), id).await?;
    if record.completed {
        return Err((
            StatusCode::CONFLICT,
            "document is already completed".to_string(),
        ));
    }
    let intake = parse_stored_intake(&record)?;
    let report =
        compliance::check_document(record.doc_type, &intake, record.rendered_text.as_deref())
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))?;
    audit::inc_compliance_checks();
    if report.blocks_completion() {
        let failing: Vec<&str> = report
            .findings
            .iter()
            .filter(|f| f.severity == compliance::Severity::Fail)
            .map(|f| f.rule_id.as_str())
            .collect();
        return Err((
            StatusCode::CONFLICT,
            format!(
                "document fails compliance checks ({}); resolve before completing",
                failing.join(", ")
            ),
        ));
    }
    let record = state
        .db
        .set_document_completed(id)
        .await
        .map_err(db_err)?
        .ok_or((StatusCode::NOT_FOUND, "document not found".to_string()))?;
    audit::record(
        "document_completed",
        json!({
            "document_id": record.id,
            "doc_type": record.doc_type.as_str(),
            "version": record.version,
        }),
    );
    Ok(Json(record))
}

async fn documents_revisions_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentRevisionsResponse>, (StatusCode, String)> {
    require_document(state.db.as_ref(), id).await?;
    let revisions = state
        .db
        .list_document_revisions(id)
        .await
        .map_err(db_err)?;
    Ok(Json(DocumentRevisionsResponse { revisions }))
}

// --- Practice monitor ---

async fn practice_compliance_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PracticeComplianceResponse>, (StatusCode, String)> {
    let report = lso::run_practice_checks(state.db.as_ref(), &state.practice)
        .await
        .map_err(db_err)?;
    Ok(Json(PracticeComplianceResponse { report }))
}

// --- Audit ---

async fn audit_list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditListQuery>,
) -> Result<Json<AuditListResponse>, (StatusCode, String)> {
    if !state.audit.enabled {
        return Err((
            StatusCode::NOT_FOUND,
            "audit logging is disabled".to_string(),
        ));
    }

    let limit = query.limit.unwrap_or(50);
    if limit == 0 || limit > 200 {
        return Err((
            StatusCode::BAD_REQUEST,
            "'limit' must be between 1 and 200".to_string(),
        ));
    }
    let event_type_filter = query.event_type.as_ref().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    });

    let path = &state.audit.path;
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Json(AuditListResponse {
                events: Vec::new(),
                parse_errors: 0,
            }));
        }
        Err(err) => {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to open audit log {:?}: {}", path, err),
            ));
        }
    };

    let mut parse_errors = 0usize;
    let mut events: Vec<AuditEventInfo> = Vec::new();
    for (idx, line_res) in BufReader::new(file).lines().enumerate() {
        if idx >= MAX_AUDIT_SCAN_LINES {
            break;
        }
        let line = line_res.map_err(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to read audit log {:?}: {}", path, err),
            )
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: AuditEventInfo = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(_) => {
                parse_errors += 1;
                continue;
            }
        };
        if let Some(ref wanted) = event_type_filter
            && &parsed.event_type != wanted
        {
            continue;
        }
        events.push(parsed);
    }

    // Newest last in the file; return the newest `limit`.
    if events.len() > limit {
        events.drain(..events.len() - limit);
    }
    Ok(Json(AuditListResponse {
        events,
        parse_errors,
    }))
}

#[cfg(test)]
mod tests {
    use super::RateLimiter;
    use pretty_assertions::assert_eq;

    #[test]
    fn rate_limiter_allows_up_to_max() {
        let limiter = RateLimiter::new(3, 60);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn rate_limiter_resets_after_window() {
        let limiter = RateLimiter::new(1, 0);
        assert!(limiter.check());
        // Zero-length window: the next call starts a fresh window.
        assert_eq!(limiter.check(), true);
    }
}
