//! Hash-chained JSONL audit log.
//!
//! Every consequential operation (document generation, compliance checks,
//! trust entries, invoice lifecycle) appends one line. With the hash chain
//! enabled, each event carries the SHA-256 of its predecessor so tampering
//! with the file is detectable.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::AuditConfig;

#[derive(Debug, Default, Clone, Serialize)]
struct PracticeCounters {
    documents_generated: u64,
    compliance_checks: u64,
    trust_entries: u64,
    invoices_finalized: u64,
}

#[derive(Debug, Serialize)]
struct AuditEvent<'a> {
    ts: String,
    event_type: &'a str,
    details: serde_json::Value,
    counters: PracticeCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

struct AuditLogger {
    path: PathBuf,
    hash_chain: bool,
    state: Mutex<Option<String>>,
    counters: Mutex<PracticeCounters>,
}

impl AuditLogger {
    fn new(path: PathBuf, hash_chain: bool) -> Self {
        Self {
            path,
            hash_chain,
            state: Mutex::new(None),
            counters: Mutex::new(PracticeCounters::default()),
        }
    }

    fn bump_counter<F>(&self, update: F)
    where
        F: FnOnce(&mut PracticeCounters),
    {
        if let Ok(mut counters) = self.counters.lock() {
            update(&mut counters);
        }
    }

    fn write(&self, event_type: &str, details: serde_json::Value) {
        // Keep counters + hash-chain state locked through append so the
        // serialized counter snapshot is atomic with the written event.
        let counters_guard = match self.counters.lock() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Audit counters lock poisoned: {}", e);
                return;
            }
        };

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Audit state lock poisoned: {}", e);
                return;
            }
        };
        let counters = counters_guard.clone();

        let prev_hash = state.clone();
        let mut event = AuditEvent {
            ts: Utc::now().to_rfc3339(),
            event_type,
            details,
            counters,
            prev_hash,
            hash: None,
        };

        if self.hash_chain {
            let to_hash = match serde_json::to_string(&event) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to serialize audit event for hashing: {}", e);
                    return;
                }
            };
            let mut hasher = Sha256::new();
            hasher.update(to_hash.as_bytes());
            let hash = format!("{:x}", hasher.finalize());
            event.hash = Some(hash.clone());
            *state = Some(hash);
        }

        let line = match serde_json::to_string(&event) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        if let Some(parent) = self.path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::warn!("Failed to create audit log dir {:?}: {}", parent, e);
            return;
        }

        // SECURITY: create files as owner-read/write (0o600). For pre-existing
        // files, fail closed if permissions are broader than 0o600.
        let mut open_opts = OpenOptions::new();
        open_opts.create(true).append(true);
        #[cfg(unix)]
        open_opts.mode(0o600);
        match open_opts.open(&self.path) {
            Ok(mut f) => {
                #[cfg(unix)]
                {
                    let mode = match f.metadata() {
                        Ok(meta) => meta.permissions().mode() & 0o777,
                        Err(e) => {
                            tracing::warn!(
                                "Failed to read permissions for audit log {:?}: {}",
                                self.path,
                                e
                            );
                            return;
                        }
                    };
                    if mode != 0o600 {
                        tracing::warn!(
                            "Refusing to write audit event; insecure mode {:o} on {:?} (expected 600)",
                            mode,
                            self.path
                        );
                        return;
                    }
                }
                if let Err(e) = writeln!(f, "{line}") {
                    tracing::warn!("Failed to append audit event: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to open audit log {:?}: {}", self.path, e);
            }
        }
    }
}

static LOGGER: OnceLock<AuditLogger> = OnceLock::new();
#[cfg(test)]
static TEST_EVENTS: OnceLock<Mutex<Vec<TestAuditEvent>>> = OnceLock::new();

#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct TestAuditEvent {
    pub event_type: String,
    pub details: serde_json::Value,
}

/// Initialize the audit logger. A disabled config leaves every `record`
/// call a no-op.
pub fn init(config: &AuditConfig) {
    if !config.enabled {
        return;
    }

    let _ = LOGGER.set(AuditLogger::new(config.path.clone(), config.hash_chain));
}

/// Log an audit event.
pub fn record(event_type: &str, details: serde_json::Value) {
    #[cfg(test)]
    push_test_event(event_type, &details);
    if let Some(logger) = LOGGER.get() {
        logger.write(event_type, details);
    }
}

pub fn inc_documents_generated() {
    if let Some(logger) = LOGGER.get() {
        logger.bump_counter(|c| c.documents_generated += 1);
    }
}

pub fn inc_compliance_checks() {
    if let Some(logger) = LOGGER.get() {
        logger.bump_counter(|c| c.compliance_checks += 1);
    }
}

pub fn inc_trust_entries() {
    if let Some(logger) = LOGGER.get() {
        logger.bump_counter(|c| c.trust_entries += 1);
    }
}

pub fn inc_invoices_finalized() {
    if let Some(logger) = LOGGER.get() {
        logger.bump_counter(|c| c.invoices_finalized += 1);
    }
}

/// Returns true if audit logging is active.
pub fn enabled() -> bool {
    LOGGER.get().is_some()
}

/// Path of the active audit log, for the read-back endpoint.
pub fn log_path() -> Option<&'static std::path::Path> {
    LOGGER.get().map(|logger| logger.path.as_path())
}

#[cfg(test)]
fn push_test_event(event_type: &str, details: &serde_json::Value) {
    let events = TEST_EVENTS.get_or_init(|| Mutex::new(Vec::new()));
    if let Ok(mut lock) = events.lock() {
        lock.push(TestAuditEvent {
            event_type: event_type.to_string(),
            details: details.clone(),
        });
    }
}

#[cfg(test)]
pub(crate) fn clear_test_events() {
    if let Some(events) = TEST_EVENTS.get()
        && let Ok(mut lock) = events.lock()
    {
        lock.clear();
    }
}

#[cfg(test)]
pub(crate) fn test_events_snapshot() -> Vec<TestAuditEvent> {
    TEST_EVENTS
        .get()
        .and_then(|events| events.lock().ok().map(|lock| lock.clone()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::Value;

    use super::{AuditLogger, clear_test_events, record, test_events_snapshot};

    #[test]
    fn hash_chain_links_consecutive_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::new(path.clone(), true);

        logger.write("first", serde_json::json!({"n": 1}));
        logger.write("second", serde_json::json!({"n": 2}));

        let raw = fs::read_to_string(path).expect("read audit log");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).expect("first line json");
        let second: Value = serde_json::from_str(lines[1]).expect("second line json");

        let first_hash = first
            .get("hash")
            .and_then(|v| v.as_str())
            .expect("first hash")
            .to_string();
        assert!(first.get("prev_hash").map(|v| v.is_null()).unwrap_or(true));

        let second_prev = second
            .get("prev_hash")
            .and_then(|v| v.as_str())
            .expect("second prev_hash");
        assert_eq!(second_prev, first_hash);
        assert!(second.get("hash").and_then(|v| v.as_str()).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn write_refuses_existing_file_with_non_0600_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        fs::write(&path, "existing\n").expect("seed existing file");
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .expect("set permissive mode");

        let logger = AuditLogger::new(path.clone(), false);
        logger.write("event", serde_json::json!({"kind": "perm_check"}));

        let raw = fs::read_to_string(&path).expect("read audit log");
        assert_eq!(raw, "existing\n");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[cfg(unix)]
    #[test]
    fn write_enforces_0600_permissions_on_new_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit-new.jsonl");
        let logger = AuditLogger::new(path.clone(), false);

        logger.write("event", serde_json::json!({"kind": "create"}));

        let mode = fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn recorded_events_carry_metadata_only_fields() {
        clear_test_events();
        record(
            "document_generated",
            serde_json::json!({
                "document_id": "doc-1",
                "matter_id": "chen-will-2026",
                "doc_type": "will",
                "ai_clauses": false,
            }),
        );

        let events = test_events_snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "document_generated");
        assert_eq!(
            events[0].details.get("matter_id").and_then(|v| v.as_str()),
            Some("chen-will-2026")
        );
        assert!(events[0].details.get("rendered_text").is_none());
        assert!(events[0].details.get("intake").is_none());
    }
}
