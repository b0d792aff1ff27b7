//! Typed intake for the three instrument types.
//!
//! Intake is stored on the document record as a JSON blob; these structs are
//! its schema. `validate` catches structural problems (missing names, bad
//! shares) before generation; statutory problems are the compliance
//! checker's job.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::DocumentType;
use crate::error::DocGenError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Testator {
    pub name: String,
    pub age: u32,
    pub city: String,
    #[serde(default)]
    pub marital_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Executor {
    pub name: String,
    #[serde(default)]
    pub is_alternate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beneficiary {
    pub name: String,
    pub relationship: String,
    /// Share of the residue as a percentage, when percentage-based.
    #[serde(default)]
    pub share_percent: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bequest {
    pub recipient: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guardian {
    pub name: String,
    #[serde(default)]
    pub for_children: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WillWitness {
    pub name: String,
    #[serde(default)]
    pub is_beneficiary: bool,
    #[serde(default)]
    pub is_spouse_of_beneficiary: bool,
    #[serde(default)]
    pub age: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WillIntake {
    pub testator: Testator,
    pub executors: Vec<Executor>,
    pub beneficiaries: Vec<Beneficiary>,
    #[serde(default)]
    pub bequests: Vec<Bequest>,
    #[serde(default)]
    pub residue_beneficiary: Option<String>,
    #[serde(default)]
    pub guardians: Vec<Guardian>,
    pub witnesses: Vec<WillWitness>,
    /// Free-text wishes, drafted into numbered clauses by the LLM when one
    /// is configured.
    #[serde(default)]
    pub additional_wishes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grantor {
    pub name: String,
    pub age: u32,
    pub city: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attorney {
    pub name: String,
    /// Personal care only: paid care providers may not act unless family
    /// (SDA s.46(3)).
    #[serde(default)]
    pub is_paid_care_provider: bool,
    #[serde(default)]
    pub is_family_member: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoaWitness {
    pub name: String,
    #[serde(default)]
    pub is_attorney: bool,
    #[serde(default)]
    pub is_attorney_spouse: bool,
    #[serde(default)]
    pub is_grantor_spouse_or_partner: bool,
    #[serde(default)]
    pub is_grantor_child: bool,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub has_guardian: bool,
}

/// Shared by continuing POA for property and POA for personal care.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoaIntake {
    pub grantor: Grantor,
    pub attorneys: Vec<Attorney>,
    /// True: attorneys must act jointly. False: jointly and severally.
    #[serde(default)]
    pub joint: bool,
    #[serde(default)]
    pub substitute_attorneys: Vec<Attorney>,
    /// Property only: effective on incapacity rather than immediately.
    #[serde(default)]
    pub springing: bool,
    #[serde(default)]
    pub restrictions: Option<String>,
    #[serde(default)]
    pub compensation_allowed: bool,
    pub witnesses: Vec<PoaWitness>,
}

#[derive(Debug, Clone)]
pub enum Intake {
    Will(WillIntake),
    Poa(PoaIntake),
}

impl Intake {
    /// Deserialize the intake blob for the given document type.
    pub fn from_value(
        doc_type: DocumentType,
        value: &serde_json::Value,
    ) -> Result<Self, DocGenError> {
        match doc_type {
            DocumentType::Will => {
                let intake: WillIntake = serde_json::from_value(value.clone())
                    .map_err(|e| DocGenError::Intake(format!("invalid will intake: {e}")))?;
                intake.validate()?;
                Ok(Intake::Will(intake))
            }
            DocumentType::PoaProperty | DocumentType::PoaPersonalCare => {
                let intake: PoaIntake = serde_json::from_value(value.clone())
                    .map_err(|e| DocGenError::Intake(format!("invalid poa intake: {e}")))?;
                intake.validate()?;
                Ok(Intake::Poa(intake))
            }
        }
    }
}

fn require_name(name: &str, what: &str) -> Result<(), DocGenError> {
    if name.trim().is_empty() {
        return Err(DocGenError::Intake(format!("{what} name cannot be empty")));
    }
    Ok(())
}

impl WillIntake {
    pub fn validate(&self) -> Result<(), DocGenError> {
        require_name(&self.testator.name, "testator")?;
        if self.executors.iter().all(|e| e.is_alternate) {
            return Err(DocGenError::Intake(
                "at least one primary executor is required".to_string(),
            ));
        }
        for executor in &self.executors {
            require_name(&executor.name, "executor")?;
        }
        for beneficiary in &self.beneficiaries {
            require_name(&beneficiary.name, "beneficiary")?;
            if let Some(share) = beneficiary.share_percent {
                if share <= Decimal::ZERO || share > Decimal::ONE_HUNDRED {
                    return Err(DocGenError::Intake(format!(
                        "beneficiary share for {} must be between 0 and 100, got {share}",
                        beneficiary.name
                    )));
                }
            }
        }
        for witness in &self.witnesses {
            require_name(&witness.name, "witness")?;
        }
        Ok(())
    }

    /// Sum of percentage shares, when every beneficiary carries one.
    pub fn share_total(&self) -> Option<Decimal> {
        if self.beneficiaries.is_empty()
            || self.beneficiaries.iter().any(|b| b.share_percent.is_none())
        {
            return None;
        }
        Some(
            self.beneficiaries
                .iter()
                .filter_map(|b| b.share_percent)
                .sum(),
        )
    }

    pub fn primary_executors(&self) -> impl Iterator<Item = &Executor> {
        self.executors.iter().filter(|e| !e.is_alternate)
    }

    pub fn alternate_executors(&self) -> impl Iterator<Item = &Executor> {
        self.executors.iter().filter(|e| e.is_alternate)
    }
}

impl PoaIntake {
    pub fn validate(&self) -> Result<(), DocGenError> {
        require_name(&self.grantor.name, "grantor")?;
        if self.attorneys.is_empty() {
            return Err(DocGenError::Intake(
                "at least one attorney is required".to_string(),
            ));
        }
        for attorney in self.attorneys.iter().chain(&self.substitute_attorneys) {
            require_name(&attorney.name, "attorney")?;
        }
        for witness in &self.witnesses {
            require_name(&witness.name, "witness")?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rust_decimal_macros::dec;

    use super::*;

    pub(crate) fn sample_will_intake() -> WillIntake {
        WillIntake {
            testator: Testator {
                name: "Margaret Chen".to_string(),
                age: 58,
                city: "Toronto".to_string(),
                marital_status: Some("married".to_string()),
            },
            executors: vec![
                Executor {
                    name: "David Chen".to_string(),
                    is_alternate: false,
                },
                Executor {
                    name: "Susan Park".to_string(),
                    is_alternate: true,
                },
            ],
            beneficiaries: vec![
                Beneficiary {
                    name: "David Chen".to_string(),
                    relationship: "spouse".to_string(),
                    share_percent: Some(dec!(60)),
                },
                Beneficiary {
                    name: "Emily Chen".to_string(),
                    relationship: "daughter".to_string(),
                    share_percent: Some(dec!(40)),
                },
            ],
            bequests: vec![Bequest {
                recipient: "Emily Chen".to_string(),
                description: "my jade necklace".to_string(),
            }],
            residue_beneficiary: Some("David Chen".to_string()),
            guardians: vec![],
            witnesses: vec![
                WillWitness {
                    name: "Olu Adeyemi".to_string(),
                    is_beneficiary: false,
                    is_spouse_of_beneficiary: false,
                    age: Some(44),
                },
                WillWitness {
                    name: "Priya Nair".to_string(),
                    is_beneficiary: false,
                    is_spouse_of_beneficiary: false,
                    age: Some(39),
                },
            ],
            additional_wishes: None,
        }
    }

    pub(crate) fn sample_poa_intake() -> PoaIntake {
        PoaIntake {
            grantor: Grantor {
                name: "Margaret Chen".to_string(),
                age: 58,
                city: "Toronto".to_string(),
            },
            attorneys: vec![Attorney {
                name: "David Chen".to_string(),
                is_paid_care_provider: false,
                is_family_member: true,
            }],
            joint: false,
            substitute_attorneys: vec![],
            springing: false,
            restrictions: None,
            compensation_allowed: false,
            witnesses: vec![
                PoaWitness {
                    name: "Olu Adeyemi".to_string(),
                    is_attorney: false,
                    is_attorney_spouse: false,
                    is_grantor_spouse_or_partner: false,
                    is_grantor_child: false,
                    age: Some(44),
                    has_guardian: false,
                },
                PoaWitness {
                    name: "Priya Nair".to_string(),
                    is_attorney: false,
                    is_attorney_spouse: false,
                    is_grantor_spouse_or_partner: false,
                    is_grantor_child: false,
                    age: Some(39),
                    has_guardian: false,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::fixtures::{sample_poa_intake, sample_will_intake};
    use super::*;

    #[test]
    fn validate_rejects_alternates_only() {
        let mut intake = sample_will_intake();
        for executor in &mut intake.executors {
            executor.is_alternate = true;
        }
        assert!(intake.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_share() {
        let mut intake = sample_will_intake();
        intake.beneficiaries[0].share_percent = Some(dec!(150));
        assert!(intake.validate().is_err());
    }

    #[test]
    fn share_total_requires_all_shares() {
        let mut intake = sample_will_intake();
        assert_eq!(intake.share_total(), Some(dec!(100)));
        intake.beneficiaries[1].share_percent = None;
        assert_eq!(intake.share_total(), None);
    }

    #[test]
    fn intake_round_trips_through_json() {
        let intake = sample_poa_intake();
        let value = serde_json::to_value(&intake).expect("serialize");
        match Intake::from_value(crate::db::DocumentType::PoaProperty, &value).expect("parse") {
            Intake::Poa(parsed) => assert_eq!(parsed.grantor.name, "Margaret Chen"),
            Intake::Will(_) => panic!("expected poa intake"),
        }
    }
}
