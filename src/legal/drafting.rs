//! LLM-backed clause drafting for free-text testamentary wishes.

use serde::Deserialize;

use crate::error::LlmError;
use crate::llm::{LlmProvider, extract_json};

const SYSTEM_PROMPT: &str = "You are an Ontario estate planning lawyer drafting will clauses. \
     Convert the client's informal wishes into formal, self-contained testamentary clauses \
     in plain Ontario drafting style. Do not invent facts, names, or amounts that the wishes \
     do not contain. Do not give legal advice or commentary. \
     Respond with a JSON object of the form {\"clauses\": [\"...\", \"...\"]}, one clause per \
     distinct wish.";

#[derive(Debug, Deserialize)]
struct ClauseReply {
    clauses: Vec<String>,
}

/// Draft the wishes into formal clauses. The caller is responsible for the
/// verbatim fallback when no provider is configured or the call fails.
pub async fn draft_additional_clauses(
    provider: &dyn LlmProvider,
    testator_name: &str,
    wishes: &str,
) -> Result<Vec<String>, LlmError> {
    let user_prompt = format!(
        "Testator: {testator_name}\n\nWishes, in the client's own words:\n{wishes}"
    );

    let reply = provider.chat_json(SYSTEM_PROMPT, &user_prompt).await?;
    let value = extract_json(&reply)?;
    let parsed: ClauseReply = serde_json::from_value(value)
        .map_err(|e| LlmError::Parse(format!("clause reply missing 'clauses' array: {e}")))?;

    let clauses: Vec<String> = parsed
        .clauses
        .into_iter()
        .map(|clause| clause.trim().to_string())
        .filter(|clause| !clause.is_empty())
        .collect();
    if clauses.is_empty() {
        return Err(LlmError::EmptyResponse);
    }

    tracing::debug!(
        provider = provider.provider_name(),
        model = provider.model_name(),
        clause_count = clauses.len(),
        "drafted additional clauses"
    );
    Ok(clauses)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::error::LlmError;
    use crate::llm::LlmProvider;

    use super::draft_additional_clauses;

    struct CannedProvider {
        reply: &'static str,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn chat(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            Ok(self.reply.to_string())
        }

        async fn chat_json(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            Ok(self.reply.to_string())
        }

        fn model_name(&self) -> &str {
            "canned"
        }

        fn provider_name(&self) -> &'static str {
            "test"
        }
    }

    #[tokio::test]
    async fn drafts_clauses_from_fenced_reply() {
        let provider = CannedProvider {
            reply: "```json\n{\"clauses\": [\"I DIRECT my Estate Trustee to donate $5,000 to the Toronto Humane Society.\", \"  \"]}\n```",
        };
        let clauses = draft_additional_clauses(&provider, "Margaret Chen", "donate to the shelter")
            .await
            .expect("drafting succeeds");
        assert_eq!(clauses.len(), 1);
        assert!(clauses[0].starts_with("I DIRECT"));
    }

    #[tokio::test]
    async fn empty_clause_list_is_an_error() {
        let provider = CannedProvider {
            reply: r#"{"clauses": []}"#,
        };
        let result =
            draft_additional_clauses(&provider, "Margaret Chen", "donate to the shelter").await;
        assert!(matches!(result, Err(LlmError::EmptyResponse)));
    }
}
