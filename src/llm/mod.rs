//! Hosted LLM providers behind a single trait.
//!
//! Providers return plain text or JSON; callers that need structured output
//! run the reply through [`extract_json`], which tolerates markdown fences
//! and prose around the JSON body.

mod gemini;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::error::LlmError;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Free-form completion for a system + user prompt pair.
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;

    /// Completion expected to be a single JSON object. Providers enable
    /// their native JSON mode where one exists; the reply is still passed
    /// through [`extract_json`] by callers.
    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;

    fn provider_name(&self) -> &'static str;
}

/// Build the configured provider, or `None` when drafting assistance is
/// disabled. A selected provider with no API key is a hard error so a
/// misconfigured deployment fails at startup rather than per-request.
pub fn build_provider(config: &LlmConfig) -> Result<Option<Arc<dyn LlmProvider>>, LlmError> {
    match config.provider {
        LlmProviderKind::Disabled => Ok(None),
        LlmProviderKind::OpenAi => {
            let api_key = config
                .openai_api_key
                .as_ref()
                .ok_or(LlmError::NotConfigured)?;
            let provider = OpenAiProvider::new(
                api_key.expose_secret().to_string(),
                config.openai_model.clone(),
                config.timeout,
            )?;
            Ok(Some(Arc::new(provider)))
        }
        LlmProviderKind::Gemini => {
            let api_key = config
                .google_api_key
                .as_ref()
                .ok_or(LlmError::NotConfigured)?;
            let provider = GeminiProvider::new(
                api_key.expose_secret().to_string(),
                config.gemini_model.clone(),
                config.timeout,
            )?;
            Ok(Some(Arc::new(provider)))
        }
    }
}

/// Pull the first JSON object out of a model reply.
///
/// Strips ```json fences, then scans for the outermost balanced `{ ... }`
/// while respecting string literals and escapes.
pub fn extract_json(reply: &str) -> Result<serde_json::Value, LlmError> {
    let trimmed = reply.trim();
    let body = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.trim_start_matches(['\r', '\n'])
            .strip_suffix("```")
            .unwrap_or(rest)
            .trim()
    } else {
        trimmed
    };

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if value.is_object() {
            return Ok(value);
        }
    }

    let start = body
        .find('{')
        .ok_or_else(|| LlmError::Parse("no JSON object in reply".to_string()))?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in body[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &body[start..start + offset + ch.len_utf8()];
                    return serde_json::from_str(candidate)
                        .map_err(|e| LlmError::Parse(format!("malformed JSON object: {e}")));
                }
            }
            _ => {}
        }
    }

    Err(LlmError::Parse("unterminated JSON object in reply".to_string()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::extract_json;

    #[test]
    fn extract_json_handles_bare_object() {
        let value = extract_json(r#"{"clauses": []}"#).expect("valid");
        assert_eq!(value["clauses"], serde_json::json!([]));
    }

    #[test]
    fn extract_json_strips_markdown_fence() {
        let reply = "```json\n{\"risk\": \"low\"}\n```";
        let value = extract_json(reply).expect("valid");
        assert_eq!(value["risk"], "low");
    }

    #[test]
    fn extract_json_scans_past_prose() {
        let reply = "Here is the result you asked for:\n{\"a\": \"brace } in string\", \"b\": {\"c\": 1}}\nLet me know if you need more.";
        let value = extract_json(reply).expect("valid");
        assert_eq!(value["b"]["c"], 1);
    }

    #[test]
    fn extract_json_rejects_non_object() {
        assert!(extract_json("[1, 2, 3]").is_err());
        assert!(extract_json("no json here").is_err());
    }
}
