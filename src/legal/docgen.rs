//! Render intake into a plain-text instrument through Tera templates.
//!
//! Templates are embedded at compile time. Additional wishes go through the
//! LLM when a provider is configured; otherwise (or on any provider error)
//! the wishes are carried verbatim in a drafting-note block so nothing the
//! client said is silently dropped.

use tera::Context;

use crate::db::{ClientRecord, DocumentType, MatterRecord};
use crate::error::DocGenError;
use crate::legal::drafting;
use crate::legal::intake::{Intake, PoaIntake, WillIntake};
use crate::llm::LlmProvider;

const WILL_TEMPLATE: &str = include_str!("templates/will.tera");
const POA_PROPERTY_TEMPLATE: &str = include_str!("templates/poa_property.tera");
const POA_PERSONAL_CARE_TEMPLATE: &str = include_str!("templates/poa_personal_care.tera");

#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub text: String,
    pub sections: Vec<String>,
    /// True when the additional-directions clauses came from the LLM.
    pub ai_clauses: bool,
}

fn template_for(doc_type: DocumentType) -> &'static str {
    match doc_type {
        DocumentType::Will => WILL_TEMPLATE,
        DocumentType::PoaProperty => POA_PROPERTY_TEMPLATE,
        DocumentType::PoaPersonalCare => POA_PERSONAL_CARE_TEMPLATE,
    }
}

fn base_context(matter: &MatterRecord, client: &ClientRecord) -> Context {
    let mut context = Context::new();
    context.insert("generated_at", &chrono::Utc::now().to_rfc3339());
    context.insert(
        "matter",
        &serde_json::json!({
            "matter_id": matter.matter_id,
            "matter_type": matter.matter_type.as_str(),
            "status": matter.status.as_str(),
            "responsible_lawyer": matter.responsible_lawyer,
        }),
    );
    context.insert(
        "client",
        &serde_json::json!({
            "id": client.id.to_string(),
            "name": client.name,
            "type": client.client_type.as_str(),
        }),
    );
    context
}

fn will_context(
    context: &mut Context,
    intake: &WillIntake,
    additional_clauses: &[String],
    drafting_note: Option<&str>,
) -> Vec<String> {
    let primary: Vec<&str> = intake.primary_executors().map(|e| e.name.as_str()).collect();
    let alternate: Vec<&str> = intake
        .alternate_executors()
        .map(|e| e.name.as_str())
        .collect();

    context.insert("testator", &intake.testator);
    context.insert("primary_executors", &primary);
    context.insert("alternate_executors", &alternate);
    context.insert("guardians", &intake.guardians);
    context.insert("bequests", &intake.bequests);
    context.insert("beneficiaries", &intake.beneficiaries);
    context.insert("residue_beneficiary", &intake.residue_beneficiary);
    context.insert("additional_clauses", additional_clauses);
    context.insert("drafting_note", &drafting_note);
    context.insert("witnesses", &intake.witnesses);

    let mut sections = vec!["revocation".to_string(), "estate-trustee".to_string()];
    if !intake.guardians.is_empty() {
        sections.push("guardianship".to_string());
    }
    if !intake.bequests.is_empty() {
        sections.push("specific-bequests".to_string());
    }
    sections.push("residue".to_string());
    if !additional_clauses.is_empty() {
        sections.push("additional-directions".to_string());
    }
    if drafting_note.is_some() {
        sections.push("drafting-note".to_string());
    }
    sections.push("testimonium".to_string());
    sections.push("attestation".to_string());
    sections
}

fn poa_context(context: &mut Context, intake: &PoaIntake, doc_type: DocumentType) -> Vec<String> {
    let attorneys: Vec<&str> = intake.attorneys.iter().map(|a| a.name.as_str()).collect();
    let substitutes: Vec<&str> = intake
        .substitute_attorneys
        .iter()
        .map(|a| a.name.as_str())
        .collect();

    context.insert("grantor", &intake.grantor);
    context.insert("attorneys", &attorneys);
    context.insert("joint", &intake.joint);
    context.insert("substitute_attorneys", &substitutes);
    context.insert("springing", &intake.springing);
    context.insert("restrictions", &intake.restrictions);
    context.insert("compensation_allowed", &intake.compensation_allowed);
    context.insert("witnesses", &intake.witnesses);

    let mut sections = vec!["revocation".to_string(), "appointment".to_string()];
    if !substitutes.is_empty() {
        sections.push("substitutes".to_string());
    }
    match doc_type {
        DocumentType::PoaProperty => {
            sections.push("authority".to_string());
            sections.push("continuing-declaration".to_string());
            sections.push("effective-date".to_string());
            if intake.restrictions.is_some() {
                sections.push("restrictions".to_string());
            }
            sections.push("compensation".to_string());
        }
        _ => {
            if intake.restrictions.is_some() {
                sections.push("instructions".to_string());
            }
            sections.push("consent-framework".to_string());
        }
    }
    sections.push("testimonium".to_string());
    sections.push("attestation".to_string());
    sections
}

/// Generate the instrument text for a document.
pub async fn generate_document(
    doc_type: DocumentType,
    matter: &MatterRecord,
    client: &ClientRecord,
    intake: &Intake,
    provider: Option<&dyn LlmProvider>,
) -> Result<GeneratedDocument, DocGenError> {
    let mut context = base_context(matter, client);

    let (sections, ai_clauses) = match intake {
        Intake::Will(will) => {
            let mut additional_clauses: Vec<String> = Vec::new();
            let mut drafting_note: Option<String> = None;
            let mut ai_clauses = false;

            if let Some(wishes) = will
                .additional_wishes
                .as_deref()
                .map(str::trim)
                .filter(|w| !w.is_empty())
            {
                match provider {
                    Some(provider) => {
                        match drafting::draft_additional_clauses(
                            provider,
                            &will.testator.name,
                            wishes,
                        )
                        .await
                        {
                            Ok(clauses) => {
                                additional_clauses = clauses;
                                ai_clauses = true;
                            }
                            Err(err) => {
                                tracing::warn!(
                                    error = %err,
                                    provider = provider.provider_name(),
                                    "clause drafting failed; carrying wishes verbatim"
                                );
                                drafting_note = Some(wishes.to_string());
                            }
                        }
                    }
                    None => drafting_note = Some(wishes.to_string()),
                }
            }

            let sections = will_context(
                &mut context,
                will,
                &additional_clauses,
                drafting_note.as_deref(),
            );
            (sections, ai_clauses)
        }
        Intake::Poa(poa) => (poa_context(&mut context, poa, doc_type), false),
    };

    let text = tera::Tera::one_off(template_for(doc_type), &context, false)?;
    Ok(GeneratedDocument {
        text: normalize_blank_lines(&text),
        sections,
        ai_clauses,
    })
}

/// Collapse the runs of blank lines that Tera's block tags leave behind.
fn normalize_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
    out.trim_start_matches('\n').trim_end().to_string() + "\n"
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::db::{
        ClientRecord, ClientType, DocumentType, MatterRecord, MatterStatus, MatterType,
    };
    use crate::legal::intake::Intake;
    use crate::legal::intake::fixtures::{sample_poa_intake, sample_will_intake};

    use super::{generate_document, normalize_blank_lines};

    fn sample_matter(client_id: Uuid) -> MatterRecord {
        MatterRecord {
            matter_id: "chen-will-2026".to_string(),
            client_id,
            matter_type: MatterType::Will,
            status: MatterStatus::Active,
            responsible_lawyer: "A. Okafor".to_string(),
            opened_at: Some(Utc::now()),
            closed_at: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_client(client_id: Uuid) -> ClientRecord {
        ClientRecord {
            id: client_id,
            name: "Margaret Chen".to_string(),
            name_normalized: "margaret chen".to_string(),
            client_type: ClientType::Individual,
            email: None,
            phone: None,
            address: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn will_renders_core_articles() {
        let client_id = Uuid::new_v4();
        let generated = generate_document(
            DocumentType::Will,
            &sample_matter(client_id),
            &sample_client(client_id),
            &Intake::Will(sample_will_intake()),
            None,
        )
        .await
        .expect("generation succeeds");

        assert!(generated.text.contains("I REVOKE ALL former wills"));
        assert!(generated.text.contains("I APPOINT David Chen"));
        assert!(generated.text.contains("jade necklace"));
        assert!(generated.text.contains("Witness: Priya Nair"));
        assert!(!generated.ai_clauses);
        assert!(generated.sections.contains(&"specific-bequests".to_string()));
        assert!(!generated.sections.contains(&"drafting-note".to_string()));
    }

    #[tokio::test]
    async fn wishes_without_provider_become_a_drafting_note() {
        let client_id = Uuid::new_v4();
        let mut intake = sample_will_intake();
        intake.additional_wishes = Some("please donate my books to the library".to_string());

        let generated = generate_document(
            DocumentType::Will,
            &sample_matter(client_id),
            &sample_client(client_id),
            &Intake::Will(intake),
            None,
        )
        .await
        .expect("generation succeeds");

        assert!(generated.text.contains("DRAFTING NOTE"));
        assert!(generated.text.contains("donate my books"));
        assert!(generated.sections.contains(&"drafting-note".to_string()));
    }

    #[tokio::test]
    async fn poa_property_carries_continuing_wording() {
        let client_id = Uuid::new_v4();
        let generated = generate_document(
            DocumentType::PoaProperty,
            &sample_matter(client_id),
            &sample_client(client_id),
            &Intake::Poa(sample_poa_intake()),
            None,
        )
        .await
        .expect("generation succeeds");

        assert!(
            generated
                .text
                .contains("may be exercised during any subsequent incapacity")
        );
        assert!(
            generated
                .text
                .contains("effective from the date of its execution")
        );
    }

    #[tokio::test]
    async fn springing_poa_swaps_the_effective_clause() {
        let client_id = Uuid::new_v4();
        let mut intake = sample_poa_intake();
        intake.springing = true;

        let generated = generate_document(
            DocumentType::PoaProperty,
            &sample_matter(client_id),
            &sample_client(client_id),
            &Intake::Poa(intake),
            None,
        )
        .await
        .expect("generation succeeds");

        assert!(
            generated
                .text
                .contains("come into effect only upon my incapacity")
        );
    }

    #[test]
    fn blank_line_runs_collapse() {
        let text = "a\n\n\n\nb\n\n";
        assert_eq!(normalize_blank_lines(text), "a\n\nb\n");
    }
}
