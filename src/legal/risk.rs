//! Flat weighted-deduction risk scoring for a drafted instrument.
//!
//! Every assessment starts at 100 and loses points for compliance findings
//! and for risk factors detected in the intake. The result is ephemeral;
//! nothing is persisted.

use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use serde::Serialize;

use crate::legal::compliance::{ComplianceReport, Severity};
use crate::legal::intake::{Intake, PoaIntake, WillIntake};

pub const BASE_SCORE: i32 = 100;
pub const FAIL_DEDUCTION: i32 = 25;
pub const WARNING_DEDUCTION: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskBand {
    pub fn from_score(score: i32) -> Self {
        match score {
            85.. => Self::Low,
            65..85 => Self::Moderate,
            40..65 => Self::High,
            _ => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskFactor {
    pub id: &'static str,
    pub deduction: i32,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub score: i32,
    pub band: RiskBand,
    pub factors: Vec<RiskFactor>,
}

static HANDWRITTEN_AMENDMENT: LazyLock<AhoCorasick> = LazyLock::new(|| {
    keyword_set(&["handwrit", "write in later", "holograph", "amend it myself"])
});
static FOREIGN_ASSETS: LazyLock<AhoCorasick> =
    LazyLock::new(|| keyword_set(&["foreign", "overseas", "abroad", "outside canada"]));
static BUSINESS_ASSETS: LazyLock<AhoCorasick> = LazyLock::new(|| {
    keyword_set(&["business", "corporation", "company", "shareholding", "partnership interest"])
});
static CAPACITY_CONCERN: LazyLock<AhoCorasick> = LazyLock::new(|| {
    keyword_set(&["dementia", "alzheimer", "memory loss", "cognitive", "capacity concern"])
});
static DISINHERIT: LazyLock<AhoCorasick> = LazyLock::new(|| {
    keyword_set(&["disinherit", "exclude my son", "exclude my daughter", "leave nothing to"])
});

fn keyword_set(patterns: &[&str]) -> AhoCorasick {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(patterns)
        .expect("static pattern set")
}

/// Score the document: compliance findings first, then intake factors.
pub fn assess(intake: &Intake, compliance: &ComplianceReport) -> RiskAssessment {
    let mut factors = Vec::new();

    for finding in &compliance.findings {
        let deduction = match finding.severity {
            Severity::Fail => FAIL_DEDUCTION,
            Severity::Warning => WARNING_DEDUCTION,
        };
        factors.push(RiskFactor {
            id: "compliance-finding",
            deduction,
            detail: format!("{}: {}", finding.citation, finding.message),
        });
    }

    match intake {
        Intake::Will(will) => collect_will_factors(will, &mut factors),
        Intake::Poa(poa) => collect_poa_factors(poa, &mut factors),
    }

    let deducted: i32 = factors.iter().map(|f| f.deduction).sum();
    let score = (BASE_SCORE - deducted).max(0);
    RiskAssessment {
        score,
        band: RiskBand::from_score(score),
        factors,
    }
}

fn will_free_text(will: &WillIntake) -> String {
    let mut text = will.additional_wishes.clone().unwrap_or_default();
    for bequest in &will.bequests {
        text.push('\n');
        text.push_str(&bequest.description);
    }
    text
}

fn collect_will_factors(will: &WillIntake, factors: &mut Vec<RiskFactor>) {
    let text = will_free_text(will);

    let blended = will
        .beneficiaries
        .iter()
        .any(|b| b.relationship.to_ascii_lowercase().contains("step"))
        || will
            .testator
            .marital_status
            .as_deref()
            .is_some_and(|s| s.to_ascii_lowercase().contains("remarried"));
    if blended {
        factors.push(RiskFactor {
            id: "blended-family",
            deduction: 15,
            detail: "blended family: residue disputes and dependant support claims are more likely"
                .to_string(),
        });
    }

    if DISINHERIT.is_match(&text) {
        factors.push(RiskFactor {
            id: "disinherited-child",
            deduction: 15,
            detail: "wishes suggest a child or close relative is being excluded".to_string(),
        });
    }

    if will.witnesses.iter().any(|w| w.is_beneficiary || w.is_spouse_of_beneficiary) {
        factors.push(RiskFactor {
            id: "beneficiary-witness",
            deduction: 15,
            detail: "an attesting witness stands to benefit under the will".to_string(),
        });
    }

    if has_unequal_sibling_shares(will) {
        factors.push(RiskFactor {
            id: "unequal-sibling-shares",
            deduction: 10,
            detail: "children receive unequal shares of the residue".to_string(),
        });
    }

    if HANDWRITTEN_AMENDMENT.is_match(&text) {
        factors.push(RiskFactor {
            id: "handwritten-amendment",
            deduction: 10,
            detail: "wishes mention amending the will by hand after execution".to_string(),
        });
    }

    if FOREIGN_ASSETS.is_match(&text) {
        factors.push(RiskFactor {
            id: "foreign-assets",
            deduction: 10,
            detail: "assets outside Ontario may need a separate situs will".to_string(),
        });
    }

    if BUSINESS_ASSETS.is_match(&text) {
        factors.push(RiskFactor {
            id: "business-assets",
            deduction: 10,
            detail: "business interests may warrant a secondary will for probate planning"
                .to_string(),
        });
    }

    if CAPACITY_CONCERN.is_match(&text) {
        factors.push(RiskFactor {
            id: "capacity-concern",
            deduction: 20,
            detail: "wishes mention capacity concerns; a capacity assessment should be documented"
                .to_string(),
        });
    }
}

fn collect_poa_factors(poa: &PoaIntake, factors: &mut Vec<RiskFactor>) {
    let text = poa.restrictions.clone().unwrap_or_default();

    if CAPACITY_CONCERN.is_match(&text) {
        factors.push(RiskFactor {
            id: "capacity-concern",
            deduction: 20,
            detail: "restrictions mention capacity concerns; document a capacity assessment"
                .to_string(),
        });
    }

    if poa.attorneys.len() > 1 && poa.joint {
        factors.push(RiskFactor {
            id: "joint-attorneys",
            deduction: 5,
            detail: "jointly-acting attorneys deadlock if one becomes unavailable".to_string(),
        });
    }

    if poa.substitute_attorneys.is_empty() {
        factors.push(RiskFactor {
            id: "no-substitute-attorney",
            deduction: 5,
            detail: "no substitute attorney named".to_string(),
        });
    }
}

fn has_unequal_sibling_shares(will: &WillIntake) -> bool {
    let child_shares: Vec<_> = will
        .beneficiaries
        .iter()
        .filter(|b| {
            let rel = b.relationship.to_ascii_lowercase();
            rel.contains("son") || rel.contains("daughter") || rel.contains("child")
        })
        .filter_map(|b| b.share_percent)
        .collect();
    child_shares.len() > 1 && child_shares.windows(2).any(|pair| pair[0] != pair[1])
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use crate::db::DocumentType;
    use crate::legal::compliance::{ComplianceReport, ComplianceStatus, Finding};
    use crate::legal::intake::Beneficiary;
    use crate::legal::intake::fixtures::{sample_poa_intake, sample_will_intake};

    use super::*;

    fn empty_report(doc_type: DocumentType) -> ComplianceReport {
        ComplianceReport {
            doc_type,
            status: ComplianceStatus::Pass,
            findings: vec![],
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn clean_will_scores_low_band() {
        let mut poa_free = sample_poa_intake();
        poa_free.substitute_attorneys.push(crate::legal::intake::Attorney {
            name: "Susan Park".to_string(),
            is_paid_care_provider: false,
            is_family_member: false,
        });

        let will = Intake::Will(sample_will_intake());
        let assessment = assess(&will, &empty_report(DocumentType::Will));
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.band, RiskBand::Low);

        let poa = Intake::Poa(poa_free);
        let assessment = assess(&poa, &empty_report(DocumentType::PoaProperty));
        assert_eq!(assessment.score, 100);
    }

    #[test]
    fn compliance_findings_deduct_by_severity() {
        let will = Intake::Will(sample_will_intake());
        let report = ComplianceReport {
            doc_type: DocumentType::Will,
            status: ComplianceStatus::Fail,
            findings: vec![
                Finding {
                    rule_id: "slra-s4-witness-count".to_string(),
                    citation: "SLRA s.4(1)".to_string(),
                    severity: Severity::Fail,
                    message: "one witness".to_string(),
                },
                Finding {
                    rule_id: "will-revocation-clause".to_string(),
                    citation: "SLRA s.15 (practice)".to_string(),
                    severity: Severity::Warning,
                    message: "no revocation clause".to_string(),
                },
            ],
            checked_at: Utc::now(),
        };
        let assessment = assess(&will, &report);
        assert_eq!(assessment.score, 100 - 25 - 10);
        assert_eq!(assessment.band, RiskBand::Moderate);
    }

    #[test]
    fn intake_factors_stack_and_clamp_to_zero() {
        let mut will = sample_will_intake();
        will.testator.marital_status = Some("remarried".to_string());
        will.witnesses[0].is_beneficiary = true;
        will.additional_wishes = Some(
            "I want to disinherit my estranged son, keep my business and my foreign condo, \
             and I may handwrite changes later. My doctor raised a capacity concern."
                .to_string(),
        );
        will.beneficiaries = vec![
            Beneficiary {
                name: "Emily Chen".to_string(),
                relationship: "daughter".to_string(),
                share_percent: Some(dec!(70)),
            },
            Beneficiary {
                name: "Mark Chen".to_string(),
                relationship: "stepson".to_string(),
                share_percent: Some(dec!(30)),
            },
        ];

        let assessment = assess(&Intake::Will(will), &empty_report(DocumentType::Will));
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.band, RiskBand::Critical);
        assert!(assessment.factors.iter().any(|f| f.id == "blended-family"));
        assert!(assessment.factors.iter().any(|f| f.id == "foreign-assets"));
        assert!(assessment.factors.iter().any(|f| f.id == "capacity-concern"));
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(RiskBand::from_score(85), RiskBand::Low);
        assert_eq!(RiskBand::from_score(84), RiskBand::Moderate);
        assert_eq!(RiskBand::from_score(65), RiskBand::Moderate);
        assert_eq!(RiskBand::from_score(64), RiskBand::High);
        assert_eq!(RiskBand::from_score(40), RiskBand::High);
        assert_eq!(RiskBand::from_score(39), RiskBand::Critical);
        assert_eq!(RiskBand::from_score(0), RiskBand::Critical);
    }
}
