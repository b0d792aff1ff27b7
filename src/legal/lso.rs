//! LSO practice-compliance monitor.
//!
//! Data-driven checks over the live database, patterned on the Law Society
//! of Ontario's recurring bookkeeping obligations. Each check is advisory;
//! nothing here blocks an operation.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::PracticeConfig;
use crate::db::{Database, MatterStatus};
use crate::error::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    ActionRequired,
}

#[derive(Debug, Clone, Serialize)]
pub struct PracticeCheck {
    pub check_id: &'static str,
    pub rule_ref: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PracticeComplianceReport {
    pub checked_at: DateTime<Utc>,
    pub checks: Vec<PracticeCheck>,
    pub action_required: usize,
}

fn ok(check_id: &'static str, rule_ref: &'static str, detail: &str) -> PracticeCheck {
    PracticeCheck {
        check_id,
        rule_ref,
        status: CheckStatus::Ok,
        detail: detail.to_string(),
    }
}

fn action(check_id: &'static str, rule_ref: &'static str, detail: String) -> PracticeCheck {
    PracticeCheck {
        check_id,
        rule_ref,
        status: CheckStatus::ActionRequired,
        detail,
    }
}

/// Run all checks and summarize.
pub async fn run_practice_checks(
    db: &dyn Database,
    config: &PracticeConfig,
) -> Result<PracticeComplianceReport, DatabaseError> {
    let now = Utc::now();
    let checks = vec![
        check_reconciliation_current(db, config, now).await?,
        check_overdrawn_ledgers(db).await?,
        check_closed_matter_balances(db).await?,
        check_stale_unbilled_time(db, config, now).await?,
        check_intake_matters_have_clients(db).await?,
    ];
    let action_required = checks
        .iter()
        .filter(|c| c.status == CheckStatus::ActionRequired)
        .count();
    Ok(PracticeComplianceReport {
        checked_at: now,
        checks,
        action_required,
    })
}

/// By-Law 9 s.18(9): the monthly trust comparison is due by the configured
/// day of the following month. A reconciliation performed any time in the
/// current month is taken as covering the previous month.
async fn check_reconciliation_current(
    db: &dyn Database,
    config: &PracticeConfig,
    now: DateTime<Utc>,
) -> Result<PracticeCheck, DatabaseError> {
    const ID: &str = "trust-reconciliation-current";
    const RULE: &str = "LSO By-Law 9 s.18(9)";

    let has_trust_activity = !db.trust_balances().await?.is_empty();
    let latest = db.latest_trust_reconciliation().await?;

    if !has_trust_activity {
        return Ok(ok(ID, RULE, "no trust activity on the books"));
    }

    let today = now.date_naive();
    let month_start =
        NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);
    let due_this_month = NaiveDate::from_ymd_opt(
        today.year(),
        today.month(),
        u32::from(config.reconciliation_day),
    )
    .unwrap_or(month_start);

    match latest {
        None => Ok(action(
            ID,
            RULE,
            "trust funds are held but no reconciliation has ever been recorded".to_string(),
        )),
        Some(record) => {
            let performed = record.performed_at.date_naive();
            if today > due_this_month && performed < month_start {
                Ok(action(
                    ID,
                    RULE,
                    format!(
                        "last reconciliation was {}; the comparison for last month was due by {}",
                        performed, due_this_month
                    ),
                ))
            } else {
                Ok(ok(
                    ID,
                    RULE,
                    &format!("last reconciliation recorded {performed}"),
                ))
            }
        }
    }
}

/// The store rejects overdrafts, so a negative balance here means the data
/// was touched outside the application.
async fn check_overdrawn_ledgers(db: &dyn Database) -> Result<PracticeCheck, DatabaseError> {
    const ID: &str = "no-overdrawn-ledgers";
    const RULE: &str = "LSO By-Law 9 s.9";

    let overdrawn: Vec<String> = db
        .trust_balances()
        .await?
        .into_iter()
        .filter(|b| b.balance < Decimal::ZERO)
        .map(|b| format!("{} ({})", b.matter_id, b.balance))
        .collect();

    if overdrawn.is_empty() {
        Ok(ok(ID, RULE, "no matter ledger is overdrawn"))
    } else {
        Ok(action(
            ID,
            RULE,
            format!("overdrawn matter ledgers: {}", overdrawn.join(", ")),
        ))
    }
}

async fn check_closed_matter_balances(db: &dyn Database) -> Result<PracticeCheck, DatabaseError> {
    const ID: &str = "closed-matters-disbursed";
    const RULE: &str = "LSO Rules of Professional Conduct r. 3.5-2";

    let balances = db.trust_balances().await?;
    let mut held: Vec<String> = Vec::new();
    for balance in balances {
        if balance.balance <= Decimal::ZERO {
            continue;
        }
        if let Some(matter) = db.get_matter(&balance.matter_id).await?
            && matter.status == MatterStatus::Closed
        {
            held.push(format!("{} ({})", balance.matter_id, balance.balance));
        }
    }

    if held.is_empty() {
        Ok(ok(ID, RULE, "no closed matter holds trust funds"))
    } else {
        Ok(action(
            ID,
            RULE,
            format!("closed matters still holding trust funds: {}", held.join(", ")),
        ))
    }
}

async fn check_stale_unbilled_time(
    db: &dyn Database,
    config: &PracticeConfig,
    now: DateTime<Utc>,
) -> Result<PracticeCheck, DatabaseError> {
    const ID: &str = "no-stale-unbilled-time";
    const RULE: &str = "LSO Rules of Professional Conduct r. 3.6-1 (practice)";

    let cutoff = now.date_naive() - Duration::days(config.stale_wip_days);
    let stale: Vec<String> = db
        .list_unbilled_time_entries()
        .await?
        .into_iter()
        .filter(|entry| entry.entry_date < cutoff)
        .map(|entry| format!("{} ({})", entry.matter_id, entry.entry_date))
        .collect();

    if stale.is_empty() {
        Ok(ok(
            ID,
            RULE,
            &format!("no unbilled time older than {} days", config.stale_wip_days),
        ))
    } else {
        Ok(action(
            ID,
            RULE,
            format!(
                "{} unbilled time entr{} older than {} days: {}",
                stale.len(),
                if stale.len() == 1 { "y" } else { "ies" },
                config.stale_wip_days,
                stale.join(", ")
            ),
        ))
    }
}

async fn check_intake_matters_have_clients(
    db: &dyn Database,
) -> Result<PracticeCheck, DatabaseError> {
    const ID: &str = "intake-matters-linked";
    const RULE: &str = "LSO Rules of Professional Conduct r. 3.4 (client identification)";

    let mut orphaned = Vec::new();
    for matter in db.list_matters(Some(MatterStatus::Intake)).await? {
        if db.get_client(matter.client_id).await?.is_none() {
            orphaned.push(matter.matter_id);
        }
    }

    if orphaned.is_empty() {
        Ok(ok(ID, RULE, "every intake matter has a client record"))
    } else {
        Ok(action(
            ID,
            RULE,
            format!(
                "intake matters without a client record: {}",
                orphaned.join(", ")
            ),
        ))
    }
}
