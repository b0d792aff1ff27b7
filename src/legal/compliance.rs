//! Statutory compliance checks for Ontario wills and powers of attorney.
//!
//! Rule metadata (citation, severity) lives in `ontario_rules.toml`; the
//! check semantics are hard-coded here. Text-level checks (revocation
//! clause, continuing wording) scan the rendered instrument with
//! aho-corasick.

use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::DocumentType;
use crate::legal::intake::{Intake, PoaIntake, WillIntake};

pub const WILL_MIN_TESTATOR_AGE: u32 = 18;
pub const POA_PROPERTY_MIN_GRANTOR_AGE: u32 = 18;
pub const POA_PERSONAL_CARE_MIN_GRANTOR_AGE: u32 = 16;
pub const REQUIRED_WITNESSES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fail,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceStatus {
    Pass,
    Warnings,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub rule_id: String,
    pub citation: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub doc_type: DocumentType,
    pub status: ComplianceStatus,
    pub findings: Vec<Finding>,
    pub checked_at: DateTime<Utc>,
}

impl ComplianceReport {
    pub fn blocks_completion(&self) -> bool {
        self.status == ComplianceStatus::Fail
    }
}

#[derive(Debug, Clone)]
pub struct ComplianceRule {
    pub id: String,
    pub citation: String,
    pub severity: Severity,
    pub applies_to: Vec<String>,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct RuleConfig {
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    id: String,
    citation: String,
    severity: Severity,
    applies_to: Vec<String>,
    description: String,
}

static ONTARIO_RULES: LazyLock<Result<Vec<ComplianceRule>, String>> =
    LazyLock::new(|| parse_rules(include_str!("ontario_rules.toml")));

fn parse_rules(raw: &str) -> Result<Vec<ComplianceRule>, String> {
    let parsed: RuleConfig =
        toml::from_str(raw).map_err(|e| format!("invalid compliance rules TOML: {e}"))?;
    Ok(parsed
        .rules
        .into_iter()
        .map(|rule| ComplianceRule {
            id: rule.id,
            citation: rule.citation,
            severity: rule.severity,
            applies_to: rule.applies_to,
            description: rule.description,
        })
        .collect())
}

pub fn all_rules() -> Result<&'static [ComplianceRule], String> {
    match &*ONTARIO_RULES {
        Ok(rules) => Ok(rules.as_slice()),
        Err(err) => Err(err.clone()),
    }
}

pub fn rules_for(doc_type: DocumentType) -> Result<Vec<&'static ComplianceRule>, String> {
    let key = doc_type.as_str();
    Ok(all_rules()?
        .iter()
        .filter(|rule| rule.applies_to.iter().any(|a| a == key))
        .collect())
}

static REVOCATION_KEYWORDS: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(["revoke all", "revoke any and all", "revoking all"])
        .expect("static pattern set")
});

static CONTINUING_KEYWORDS: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build([
            "continuing power of attorney",
            "may be exercised during any subsequent incapacity",
            "exercised during my incapacity",
        ])
        .expect("static pattern set")
});

fn text_contains(matcher: &AhoCorasick, text: Option<&str>) -> bool {
    text.is_some_and(|t| matcher.is_match(t))
}

struct FindingBuilder {
    doc_type: DocumentType,
    findings: Vec<Finding>,
}

impl FindingBuilder {
    fn new(doc_type: DocumentType) -> Result<Self, String> {
        // Fail fast on a broken rule table.
        rules_for(doc_type)?;
        Ok(Self {
            doc_type,
            findings: Vec::new(),
        })
    }

    fn push(&mut self, rule_id: &str, message: String) {
        let rule = all_rules()
            .ok()
            .and_then(|rules| rules.iter().find(|rule| rule.id == rule_id));
        match rule {
            Some(rule) => self.findings.push(Finding {
                rule_id: rule.id.clone(),
                citation: rule.citation.clone(),
                severity: rule.severity,
                message,
            }),
            // Unknown id means the table and the checker drifted; surface
            // loudly as a fail rather than dropping the finding.
            None => self.findings.push(Finding {
                rule_id: rule_id.to_string(),
                citation: "unknown rule".to_string(),
                severity: Severity::Fail,
                message,
            }),
        }
    }

    fn finish(self) -> ComplianceReport {
        let status = if self
            .findings
            .iter()
            .any(|f| f.severity == Severity::Fail)
        {
            ComplianceStatus::Fail
        } else if !self.findings.is_empty() {
            ComplianceStatus::Warnings
        } else {
            ComplianceStatus::Pass
        };
        ComplianceReport {
            doc_type: self.doc_type,
            status,
            findings: self.findings,
            checked_at: Utc::now(),
        }
    }
}

/// Run every applicable check for the document type.
pub fn check_document(
    doc_type: DocumentType,
    intake: &Intake,
    rendered_text: Option<&str>,
) -> Result<ComplianceReport, String> {
    match (doc_type, intake) {
        (DocumentType::Will, Intake::Will(intake)) => check_will(intake, rendered_text),
        (DocumentType::PoaProperty, Intake::Poa(intake)) => {
            check_poa_property(intake, rendered_text)
        }
        (DocumentType::PoaPersonalCare, Intake::Poa(intake)) => check_poa_personal_care(intake),
        _ => Err(format!(
            "intake does not match document type '{}'",
            doc_type.as_str()
        )),
    }
}

fn check_will(intake: &WillIntake, rendered_text: Option<&str>) -> Result<ComplianceReport, String> {
    let mut report = FindingBuilder::new(DocumentType::Will)?;

    if intake.testator.age < WILL_MIN_TESTATOR_AGE {
        report.push(
            "slra-s8-testator-age",
            format!(
                "testator is {} years old; a will by a person under 18 is valid only if they are \
                 or have been married, are a member of a component of the Canadian Forces, or are \
                 a sailor at sea (s.8(1)); verify an exception applies",
                intake.testator.age
            ),
        );
    }

    if intake.witnesses.len() < REQUIRED_WITNESSES {
        report.push(
            "slra-s4-witness-count",
            format!(
                "{} witness(es) listed; two attesting witnesses present at the same time are required",
                intake.witnesses.len()
            ),
        );
    }

    for witness in &intake.witnesses {
        if witness.is_beneficiary {
            report.push(
                "slra-s12-beneficiary-witness",
                format!(
                    "witness {} is a beneficiary; any bequest to them is void",
                    witness.name
                ),
            );
        }
        if witness.is_spouse_of_beneficiary {
            report.push(
                "slra-s12-beneficiary-witness",
                format!(
                    "witness {} is the spouse of a beneficiary; the related bequest is void",
                    witness.name
                ),
            );
        }
    }

    if intake.primary_executors().next().is_none() {
        report.push(
            "will-executor-named",
            "no primary estate trustee is appointed".to_string(),
        );
    }

    if intake.residue_beneficiary.is_none() && intake.beneficiaries.is_empty() {
        report.push(
            "will-residue-disposed",
            "the residue of the estate is not disposed of; a partial intestacy would result"
                .to_string(),
        );
    }

    if let Some(total) = intake.share_total() {
        if total != Decimal::ONE_HUNDRED {
            report.push(
                "will-residue-shares",
                format!("beneficiary shares total {total}%, not 100%"),
            );
        }
    }

    if !text_contains(&REVOCATION_KEYWORDS, rendered_text) {
        report.push(
            "will-revocation-clause",
            "no revocation clause found in the instrument text".to_string(),
        );
    }

    Ok(report.finish())
}

fn poa_witness_exclusions(report: &mut FindingBuilder, intake: &PoaIntake, rule_id: &str) {
    for witness in &intake.witnesses {
        let mut reasons = Vec::new();
        if witness.is_attorney {
            reasons.push("is the attorney");
        }
        if witness.is_attorney_spouse {
            reasons.push("is the attorney's spouse or partner");
        }
        if witness.is_grantor_spouse_or_partner {
            reasons.push("is the grantor's spouse or partner");
        }
        if witness.is_grantor_child {
            reasons.push("is the grantor's child");
        }
        if witness.age.is_some_and(|age| age < 18) {
            reasons.push("is under 18");
        }
        if witness.has_guardian {
            reasons.push("has a guardian of property or person");
        }
        if !reasons.is_empty() {
            report.push(
                rule_id,
                format!(
                    "witness {} may not witness: {}",
                    witness.name,
                    reasons.join("; ")
                ),
            );
        }
    }
}

fn check_poa_property(
    intake: &PoaIntake,
    rendered_text: Option<&str>,
) -> Result<ComplianceReport, String> {
    let mut report = FindingBuilder::new(DocumentType::PoaProperty)?;

    if intake.grantor.age < POA_PROPERTY_MIN_GRANTOR_AGE {
        report.push(
            "sda-s5-grantor-age",
            format!(
                "grantor is {} years old; 18 is required for a continuing power of attorney for property",
                intake.grantor.age
            ),
        );
    }

    if intake.witnesses.len() < REQUIRED_WITNESSES {
        report.push(
            "sda-s10-witness-count",
            format!(
                "{} witness(es) listed; two are required",
                intake.witnesses.len()
            ),
        );
    }

    poa_witness_exclusions(&mut report, intake, "sda-s10-2-witness-excluded");

    if !text_contains(&CONTINUING_KEYWORDS, rendered_text) {
        report.push(
            "sda-s7-continuing-wording",
            "the instrument does not state that it may be exercised during the grantor's incapacity"
                .to_string(),
        );
    }

    Ok(report.finish())
}

fn check_poa_personal_care(intake: &PoaIntake) -> Result<ComplianceReport, String> {
    let mut report = FindingBuilder::new(DocumentType::PoaPersonalCare)?;

    if intake.grantor.age < POA_PERSONAL_CARE_MIN_GRANTOR_AGE {
        report.push(
            "sda-s43-grantor-age",
            format!(
                "grantor is {} years old; 16 is required for a power of attorney for personal care",
                intake.grantor.age
            ),
        );
    }

    if intake.witnesses.len() < REQUIRED_WITNESSES {
        report.push(
            "sda-s10-witness-count",
            format!(
                "{} witness(es) listed; two are required",
                intake.witnesses.len()
            ),
        );
    }

    poa_witness_exclusions(&mut report, intake, "sda-s48-2-witness-excluded");

    for attorney in &intake.attorneys {
        if attorney.is_paid_care_provider && !attorney.is_family_member {
            report.push(
                "sda-s46-3-care-provider",
                format!(
                    "attorney {} provides care services to the grantor for compensation and is \
                     not a spouse, partner or relative",
                    attorney.name
                ),
            );
        }
    }

    Ok(report.finish())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::legal::intake::fixtures::{sample_poa_intake, sample_will_intake};

    use super::*;

    const WILL_TEXT: &str =
        "I revoke all former wills and codicils made by me. This is my last will.";

    #[test]
    fn rule_table_parses() {
        let rules = all_rules().expect("table parses");
        assert!(rules.iter().any(|r| r.id == "slra-s12-beneficiary-witness"));
        assert_eq!(
            rules_for(DocumentType::PoaPersonalCare)
                .expect("table parses")
                .len(),
            4
        );
    }

    #[test]
    fn clean_will_passes() {
        let intake = Intake::Will(sample_will_intake());
        let report =
            check_document(DocumentType::Will, &intake, Some(WILL_TEXT)).expect("check runs");
        assert_eq!(report.status, ComplianceStatus::Pass);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn beneficiary_witness_voids_gift() {
        let mut will = sample_will_intake();
        will.witnesses[0].is_beneficiary = true;
        let report = check_document(DocumentType::Will, &Intake::Will(will), Some(WILL_TEXT))
            .expect("check runs");
        assert_eq!(report.status, ComplianceStatus::Fail);
        assert!(report.blocks_completion());
        assert_eq!(report.findings[0].rule_id, "slra-s12-beneficiary-witness");
        assert_eq!(report.findings[0].citation, "SLRA s.12(1)");
    }

    #[test]
    fn missing_revocation_clause_is_a_warning() {
        let intake = Intake::Will(sample_will_intake());
        let report = check_document(DocumentType::Will, &intake, Some("This is my last will."))
            .expect("check runs");
        assert_eq!(report.status, ComplianceStatus::Warnings);
        assert!(!report.blocks_completion());
    }

    #[test]
    fn underage_testator_fails_with_exception_note() {
        let mut will = sample_will_intake();
        will.testator.age = 17;
        let report = check_document(DocumentType::Will, &Intake::Will(will), Some(WILL_TEXT))
            .expect("check runs");
        assert_eq!(report.status, ComplianceStatus::Fail);
        assert!(report.findings[0].message.contains("sailor at sea"));
    }

    #[test]
    fn shares_must_total_one_hundred() {
        let mut will = sample_will_intake();
        will.beneficiaries[0].share_percent = Some(rust_decimal_macros::dec!(70));
        let report = check_document(DocumentType::Will, &Intake::Will(will), Some(WILL_TEXT))
            .expect("check runs");
        assert_eq!(report.status, ComplianceStatus::Fail);
        assert_eq!(report.findings[0].rule_id, "will-residue-shares");
    }

    #[test]
    fn poa_witness_exclusions_collect_reasons() {
        let mut poa = sample_poa_intake();
        poa.witnesses[0].is_grantor_child = true;
        poa.witnesses[0].age = Some(17);
        let report = check_document(
            DocumentType::PoaProperty,
            &Intake::Poa(poa),
            Some("This continuing power of attorney may be exercised during my incapacity."),
        )
        .expect("check runs");
        assert_eq!(report.status, ComplianceStatus::Fail);
        let finding = &report.findings[0];
        assert_eq!(finding.rule_id, "sda-s10-2-witness-excluded");
        assert!(finding.message.contains("grantor's child"));
        assert!(finding.message.contains("under 18"));
    }

    #[test]
    fn personal_care_age_threshold_is_sixteen() {
        let mut poa = sample_poa_intake();
        poa.grantor.age = 16;
        let report = check_document(DocumentType::PoaPersonalCare, &Intake::Poa(poa), None)
            .expect("check runs");
        assert_eq!(report.status, ComplianceStatus::Pass);
    }

    #[test]
    fn paid_care_provider_attorney_fails_unless_family() {
        let mut poa = sample_poa_intake();
        poa.attorneys[0].is_paid_care_provider = true;
        poa.attorneys[0].is_family_member = false;
        let report = check_document(DocumentType::PoaPersonalCare, &Intake::Poa(poa), None)
            .expect("check runs");
        assert_eq!(report.status, ComplianceStatus::Fail);
        assert_eq!(report.findings[0].rule_id, "sda-s46-3-care-provider");
    }

    #[test]
    fn missing_continuing_wording_is_a_warning() {
        let intake = Intake::Poa(sample_poa_intake());
        let report = check_document(
            DocumentType::PoaProperty,
            &intake,
            Some("I appoint my attorney to manage my property."),
        )
        .expect("check runs");
        assert_eq!(report.status, ComplianceStatus::Warnings);
        assert_eq!(report.findings[0].rule_id, "sda-s7-continuing-wording");
    }
}
