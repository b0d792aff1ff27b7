//! End-to-end tests for the HTTP API.
//!
//! Each test starts a real axum server on a random port backed by a fresh
//! libSQL database in a temp directory, then drives it with reqwest:
//! - auth enforcement on protected routes
//! - client -> matter -> document generation -> completion flow
//! - the compliance gate on completion
//! - trust ledger overdraft protection
//! - the draft -> finalize -> payment invoice flow

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tempfile::TempDir;

use willforge::channels::web::server::{AppState, RateLimiter, start_server};
use willforge::config::{AuditConfig, PracticeConfig};
use willforge::db;

const AUTH_TOKEN: &str = "test-token-12345";

async fn start_test_server() -> (SocketAddr, Arc<AppState>, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let db = db::connect(&dir.path().join("willforge.db"))
        .await
        .expect("open test database");

    let state = Arc::new(AppState {
        db,
        llm: None,
        practice: PracticeConfig {
            firm_name: "Test Firm LLP".to_string(),
            responsible_lawyer: "A. Lawyer".to_string(),
            hst_rate: dec!(0.13),
            default_hourly_rate: dec!(350),
            reconciliation_day: 25,
            stale_wip_days: 90,
        },
        audit: AuditConfig {
            enabled: false,
            path: dir.path().join("audit.jsonl"),
            hash_chain: true,
        },
        docgen_limiter: RateLimiter::new(100, 60),
        shutdown_tx: tokio::sync::RwLock::new(None),
        started_at: Instant::now(),
    });

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let bound = start_server(addr, state.clone(), AUTH_TOKEN.to_string())
        .await
        .expect("start test server");
    (bound, state, dir)
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

async fn post_json(addr: SocketAddr, path: &str, body: Value) -> reqwest::Response {
    client()
        .post(url(addr, path))
        .bearer_auth(AUTH_TOKEN)
        .json(&body)
        .send()
        .await
        .expect("request")
}

async fn get(addr: SocketAddr, path: &str) -> reqwest::Response {
    client()
        .get(url(addr, path))
        .bearer_auth(AUTH_TOKEN)
        .send()
        .await
        .expect("request")
}

/// Create a client + matter and return the matter id.
async fn seed_matter(addr: SocketAddr, matter_id: &str, matter_type: &str) -> String {
    let resp = post_json(
        addr,
        "/api/clients",
        json!({ "name": format!("Client for {matter_id}") }),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    let client_id = created["id"].as_str().unwrap().to_string();

    let resp = post_json(
        addr,
        "/api/matters",
        json!({
            "matter_id": matter_id,
            "client_id": client_id,
            "matter_type": matter_type,
        }),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let matter: Value = resp.json().await.unwrap();
    matter["matter_id"].as_str().unwrap().to_string()
}

fn will_intake(beneficiary_witness: bool) -> Value {
    json!({
        "testator": { "name": "Margaret Chen", "age": 67, "city": "Toronto" },
        "executors": [
            { "name": "David Chen" },
            { "name": "Susan Park", "is_alternate": true }
        ],
        "beneficiaries": [
            { "name": "David Chen", "relationship": "son", "share_percent": "60" },
            { "name": "Emily Chen", "relationship": "daughter", "share_percent": "40" }
        ],
        "witnesses": [
            { "name": "Olu Adeyemi", "age": 41, "is_beneficiary": beneficiary_witness },
            { "name": "Priya Nair", "age": 35 }
        ]
    })
}

#[tokio::test]
async fn health_is_public_and_api_requires_auth() {
    let (addr, _state, _dir) = start_test_server().await;

    let resp = client().get(url(addr, "/api/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["service"], "willforge");

    let resp = client().get(url(addr, "/api/clients")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client()
        .get(url(addr, "/api/clients"))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = get(addr, "/api/clients").await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn will_document_flow_generates_and_completes() {
    let (addr, _state, _dir) = start_test_server().await;
    let matter_id = seed_matter(addr, "2026-EST-001", "will").await;

    let resp = post_json(
        addr,
        &format!("/api/matters/{matter_id}/documents"),
        json!({
            "doc_type": "will",
            "title": "Will of Margaret Chen",
            "intake": will_intake(false),
        }),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let doc: Value = resp.json().await.unwrap();
    let doc_id = doc["id"].as_str().unwrap().to_string();
    assert_eq!(doc["version"], 1);
    assert_eq!(doc["ai_clauses"], false);

    let resp = get(addr, &format!("/api/documents/{doc_id}/text")).await;
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("LAST WILL AND TESTAMENT"));
    assert!(text.contains("Margaret Chen"));
    assert!(text.contains("I REVOKE ALL former wills"));

    let resp = get(addr, &format!("/api/documents/{doc_id}/compliance")).await;
    assert_eq!(resp.status(), 200);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["status"], "pass");

    let resp = get(addr, &format!("/api/documents/{doc_id}/risk")).await;
    assert_eq!(resp.status(), 200);
    let risk: Value = resp.json().await.unwrap();
    assert!(risk["score"].as_i64().unwrap() > 0);

    let resp = post_json(addr, &format!("/api/documents/{doc_id}/complete"), json!({})).await;
    assert_eq!(resp.status(), 200);
    let completed: Value = resp.json().await.unwrap();
    assert_eq!(completed["completed"], true);

    // Completed documents are immutable.
    let resp = client()
        .put(url(addr, &format!("/api/documents/{doc_id}")))
        .bearer_auth(AUTH_TOKEN)
        .json(&json!({ "intake": will_intake(false) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn completion_is_blocked_while_compliance_fails() {
    let (addr, _state, _dir) = start_test_server().await;
    let matter_id = seed_matter(addr, "2026-EST-002", "will").await;

    let resp = post_json(
        addr,
        &format!("/api/matters/{matter_id}/documents"),
        json!({
            "doc_type": "will",
            "title": "Will with a beneficiary witness",
            "intake": will_intake(true),
        }),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let doc: Value = resp.json().await.unwrap();
    let doc_id = doc["id"].as_str().unwrap().to_string();

    let resp = get(addr, &format!("/api/documents/{doc_id}/compliance")).await;
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["status"], "fail");

    let resp = post_json(addr, &format!("/api/documents/{doc_id}/complete"), json!({})).await;
    assert_eq!(resp.status(), 409);
    assert!(resp.text().await.unwrap().contains("slra-s12-beneficiary-witness"));
}

#[tokio::test]
async fn document_update_archives_prior_version() {
    let (addr, _state, _dir) = start_test_server().await;
    let matter_id = seed_matter(addr, "2026-EST-003", "will").await;

    let resp = post_json(
        addr,
        &format!("/api/matters/{matter_id}/documents"),
        json!({
            "doc_type": "will",
            "title": "Will of Margaret Chen",
            "intake": will_intake(false),
        }),
    )
    .await;
    let doc: Value = resp.json().await.unwrap();
    let doc_id = doc["id"].as_str().unwrap().to_string();

    let mut revised = will_intake(false);
    revised["testator"]["city"] = json!("Ottawa");
    let resp = client()
        .put(url(addr, &format!("/api/documents/{doc_id}")))
        .bearer_auth(AUTH_TOKEN)
        .json(&json!({ "intake": revised }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["version"], 2);

    let resp = get(addr, &format!("/api/documents/{doc_id}/revisions")).await;
    let body: Value = resp.json().await.unwrap();
    let revisions = body["revisions"].as_array().unwrap();
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0]["version"], 1);
    assert_eq!(revisions[0]["intake"]["testator"]["city"], "Toronto");

    let resp = get(addr, &format!("/api/documents/{doc_id}/text")).await;
    assert!(resp.text().await.unwrap().contains("Ottawa"));
}

#[tokio::test]
async fn trust_ledger_rejects_overdraft() {
    let (addr, _state, _dir) = start_test_server().await;
    let matter_id = seed_matter(addr, "2026-EST-010", "estate_admin").await;

    let resp = post_json(
        addr,
        &format!("/api/matters/{matter_id}/trust"),
        json!({
            "entry_type": "receipt",
            "amount": "500.00",
            "description": "Retainer received",
        }),
    )
    .await;
    assert_eq!(resp.status(), 201);

    let resp = post_json(
        addr,
        &format!("/api/matters/{matter_id}/trust"),
        json!({
            "entry_type": "disbursement",
            "amount": "600.00",
            "description": "Overdraw attempt",
        }),
    )
    .await;
    assert_eq!(resp.status(), 409);

    // The failed disbursement left no trace on the ledger.
    let resp = get(addr, &format!("/api/matters/{matter_id}/trust")).await;
    let ledger: Value = resp.json().await.unwrap();
    assert_eq!(ledger["balance"], "500.00");
    assert_eq!(ledger["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn trust_transfer_moves_funds_atomically() {
    let (addr, _state, _dir) = start_test_server().await;
    let from = seed_matter(addr, "2026-EST-011", "estate_admin").await;
    let to = seed_matter(addr, "2026-EST-012", "estate_admin").await;

    let resp = post_json(
        addr,
        &format!("/api/matters/{from}/trust"),
        json!({ "entry_type": "receipt", "amount": "1000.00", "description": "Retainer" }),
    )
    .await;
    assert_eq!(resp.status(), 201);

    let resp = post_json(
        addr,
        "/api/trust/transfer",
        json!({
            "from_matter_id": from,
            "to_matter_id": to,
            "amount": "250.00",
            "description": "Shared disbursement allocation",
        }),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["out_entry"]["counterpart_matter_id"], to.as_str());
    assert_eq!(body["in_entry"]["counterpart_matter_id"], from.as_str());

    let ledger: Value = get(addr, &format!("/api/matters/{from}/trust"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(ledger["balance"], "750.00");
    let ledger: Value = get(addr, &format!("/api/matters/{to}/trust"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(ledger["balance"], "250.00");

    // An overdrawing transfer fails whole: neither side records an entry.
    let resp = post_json(
        addr,
        "/api/trust/transfer",
        json!({
            "from_matter_id": to,
            "to_matter_id": from,
            "amount": "300.00",
            "description": "Too much",
        }),
    )
    .await;
    assert_eq!(resp.status(), 409);
    let ledger: Value = get(addr, &format!("/api/matters/{to}/trust"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(ledger["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invoice_flow_sweeps_time_and_takes_trust_payment() {
    let (addr, _state, _dir) = start_test_server().await;
    let matter_id = seed_matter(addr, "2026-EST-020", "will").await;

    let resp = post_json(
        addr,
        &format!("/api/matters/{matter_id}/time"),
        json!({
            "entry_date": "2026-08-10",
            "description": "Drafting will",
            "hours": "2.5",
            "hourly_rate": "350",
        }),
    )
    .await;
    assert_eq!(resp.status(), 201);

    let resp = post_json(
        addr,
        &format!("/api/matters/{matter_id}/trust"),
        json!({ "entry_type": "receipt", "amount": "2000.00", "description": "Retainer" }),
    )
    .await;
    assert_eq!(resp.status(), 201);

    // 2.5h x 350 = 875.00; HST 13% = 113.75; total 988.75.
    let resp = post_json(addr, &format!("/api/matters/{matter_id}/invoices"), json!({})).await;
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["invoice"]["invoice_number"], "INV-00001");
    assert_eq!(body["invoice"]["subtotal"], "875.00");
    assert_eq!(body["invoice"]["tax"], "113.75");
    assert_eq!(body["invoice"]["total"], "988.75");
    assert_eq!(body["line_items"].as_array().unwrap().len(), 1);
    let invoice_id = body["invoice"]["id"].as_str().unwrap().to_string();

    // No unbilled time left: a second draft is refused.
    let resp = post_json(addr, &format!("/api/matters/{matter_id}/invoices"), json!({})).await;
    assert_eq!(resp.status(), 422);

    let resp = post_json(addr, &format!("/api/invoices/{invoice_id}/finalize"), json!({})).await;
    assert_eq!(resp.status(), 200);
    let finalized: Value = resp.json().await.unwrap();
    assert_eq!(finalized["status"], "sent");
    assert!(finalized["issued_date"].is_string());

    let resp = post_json(
        addr,
        &format!("/api/invoices/{invoice_id}/payments"),
        json!({ "amount": "988.75", "draw_from_trust": true }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["invoice"]["status"], "paid");
    assert_eq!(body["trust_entry"]["entry_type"], "invoice_payment");

    let ledger: Value = get(addr, &format!("/api/matters/{matter_id}/trust"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(ledger["balance"], "1011.25");
}

#[tokio::test]
async fn matter_close_requires_zero_trust_balance() {
    let (addr, _state, _dir) = start_test_server().await;
    let matter_id = seed_matter(addr, "2026-EST-030", "estate_admin").await;

    let resp = post_json(
        addr,
        &format!("/api/matters/{matter_id}/trust"),
        json!({ "entry_type": "receipt", "amount": "100.00", "description": "Retainer" }),
    )
    .await;
    assert_eq!(resp.status(), 201);

    let resp = post_json(addr, &format!("/api/matters/{matter_id}/close"), json!({})).await;
    assert_eq!(resp.status(), 409);

    let resp = post_json(
        addr,
        &format!("/api/matters/{matter_id}/trust"),
        json!({ "entry_type": "disbursement", "amount": "100.00", "description": "Returned to client" }),
    )
    .await;
    assert_eq!(resp.status(), 201);

    let resp = post_json(addr, &format!("/api/matters/{matter_id}/close"), json!({})).await;
    assert_eq!(resp.status(), 200);
    let closed: Value = resp.json().await.unwrap();
    assert_eq!(closed["status"], "closed");
}

#[tokio::test]
async fn practice_monitor_flags_overdue_reconciliation() {
    let (addr, _state, _dir) = start_test_server().await;
    let matter_id = seed_matter(addr, "2026-EST-040", "estate_admin").await;

    let resp = post_json(
        addr,
        &format!("/api/matters/{matter_id}/trust"),
        json!({ "entry_type": "receipt", "amount": "100.00", "description": "Retainer" }),
    )
    .await;
    assert_eq!(resp.status(), 201);

    // Trust activity with no reconciliation on record.
    let report: Value = get(addr, "/api/practice/compliance").await.json().await.unwrap();
    let recon = report["checks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["check_id"] == "trust-reconciliation-current")
        .unwrap();
    assert_eq!(recon["status"], "action_required");

    let resp = post_json(
        addr,
        "/api/trust/reconciliation",
        json!({ "bank_balance": "100.00" }),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let snapshot: Value = resp.json().await.unwrap();
    assert_eq!(snapshot["record"]["discrepancy"], "0.00");

    let report: Value = get(addr, "/api/practice/compliance").await.json().await.unwrap();
    let recon = report["checks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["check_id"] == "trust-reconciliation-current")
        .unwrap();
    assert_eq!(recon["status"], "ok");
}

#[tokio::test]
async fn client_delete_refused_while_matters_exist() {
    let (addr, _state, _dir) = start_test_server().await;

    let resp = post_json(addr, "/api/clients", json!({ "name": "Ada Doe" })).await;
    let created: Value = resp.json().await.unwrap();
    let client_id = created["id"].as_str().unwrap().to_string();

    let resp = post_json(
        addr,
        "/api/matters",
        json!({ "matter_id": "2026-EST-050", "client_id": client_id, "matter_type": "will" }),
    )
    .await;
    assert_eq!(resp.status(), 201);

    let resp = client()
        .delete(url(addr, &format!("/api/clients/{client_id}")))
        .bearer_auth(AUTH_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // Duplicate client names collide on the normalized name.
    let resp = post_json(addr, "/api/clients", json!({ "name": "ada doe" })).await;
    assert_eq!(resp.status(), 409);
}
