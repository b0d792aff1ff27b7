pub(crate) mod helpers;

use std::path::{Component, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;

use crate::config::helpers::{
    optional_env, parse_bool_env, parse_string_env, parse_u16_env, parse_u64_env,
};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Which hosted LLM backs the drafting endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    OpenAi,
    Gemini,
    Disabled,
}

impl LlmProviderKind {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                message: format!("unsupported provider '{other}'"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub openai_api_key: Option<SecretString>,
    pub openai_model: String,
    pub google_api_key: Option<SecretString>,
    pub gemini_model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PracticeConfig {
    pub firm_name: String,
    pub responsible_lawyer: String,
    pub hst_rate: Decimal,
    pub default_hourly_rate: Decimal,
    pub reconciliation_day: u8,
    pub stale_wip_days: i64,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub hash_chain: bool,
}

/// Fully resolved runtime configuration: settings file plus env overrides.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub practice: PracticeConfig,
    pub audit: AuditConfig,
    pub log_json: bool,
}

/// Platform data directory for the database and audit log.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("willforge"))
        .unwrap_or_else(|| PathBuf::from(".willforge"))
}

fn validate_decimal(key: &str, raw: &str) -> Result<Decimal, ConfigError> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a decimal number, got '{raw}'"),
        })
}

fn validate_hst_rate(key: &str, raw: &str) -> Result<Decimal, ConfigError> {
    let rate = validate_decimal(key, raw)?;
    if rate < Decimal::ZERO || rate >= Decimal::ONE {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("tax rate must be a fraction in [0, 1), got '{raw}'"),
        });
    }
    Ok(rate)
}

fn validate_hourly_rate(key: &str, raw: &str) -> Result<Decimal, ConfigError> {
    let rate = validate_decimal(key, raw)?;
    if rate < Decimal::ZERO {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "hourly rate must not be negative".to_string(),
        });
    }
    Ok(rate)
}

fn validate_reconciliation_day(day: u16) -> Result<u8, ConfigError> {
    if !(1..=28).contains(&day) {
        return Err(ConfigError::InvalidValue {
            key: "PRACTICE_RECONCILIATION_DAY".to_string(),
            message: format!("day of month must be in 1..=28, got {day}"),
        });
    }
    Ok(day as u8)
}

/// Audit log paths may be absolute; relative paths resolve against the data
/// directory and must not escape it.
fn validate_audit_path(raw: &str) -> Result<PathBuf, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "AUDIT_PATH".to_string(),
            message: "audit log path must not be empty".to_string(),
        });
    }

    let raw_path = PathBuf::from(trimmed);
    if raw_path.is_absolute() {
        return Ok(raw_path);
    }

    let mut normalized = PathBuf::new();
    for component in raw_path.components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(ConfigError::InvalidValue {
                    key: "AUDIT_PATH".to_string(),
                    message: "relative audit log path must not contain '..' components"
                        .to_string(),
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ConfigError::InvalidValue {
                    key: "AUDIT_PATH".to_string(),
                    message: "audit log path could not be normalized".to_string(),
                });
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "AUDIT_PATH".to_string(),
            message: "audit log path must include a filename".to_string(),
        });
    }

    Ok(default_data_dir().join(normalized))
}

impl AppConfig {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let data_dir = default_data_dir();

        let auth_token = optional_env("WILLFORGE_AUTH_TOKEN")?
            .or_else(|| settings.server.auth_token.clone())
            .map(SecretString::from);

        let db_path = optional_env("WILLFORGE_DB_PATH")?
            .or_else(|| settings.database.path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("willforge.db"));

        let provider_raw = parse_string_env("LLM_PROVIDER", settings.llm.provider.clone())?;
        let provider = LlmProviderKind::from_str(&provider_raw)?;

        let google_api_key =
            optional_env("GOOGLE_API_KEY")?.or_else(|| optional_env("GEMINI_API_KEY").ok().flatten());

        let hst_raw = parse_string_env("PRACTICE_HST_RATE", settings.practice.hst_rate.clone())?;
        let hourly_raw = parse_string_env(
            "PRACTICE_DEFAULT_HOURLY_RATE",
            settings.practice.default_hourly_rate.clone(),
        )?;
        let reconciliation_day = validate_reconciliation_day(parse_u16_env(
            "PRACTICE_RECONCILIATION_DAY",
            u16::from(settings.practice.reconciliation_day),
        )?)?;

        let audit_path = match optional_env("AUDIT_PATH")?.or_else(|| settings.audit.path.clone()) {
            Some(raw) => validate_audit_path(&raw)?,
            None => data_dir.join("audit.jsonl"),
        };

        Ok(Self {
            server: ServerConfig {
                host: parse_string_env("WILLFORGE_HOST", settings.server.host.clone())?,
                port: parse_u16_env("WILLFORGE_PORT", settings.server.port)?,
                auth_token,
            },
            database: DatabaseConfig { path: db_path },
            llm: LlmConfig {
                provider,
                openai_api_key: optional_env("OPENAI_API_KEY")?.map(SecretString::from),
                openai_model: parse_string_env("OPENAI_MODEL", settings.llm.openai_model.clone())?,
                google_api_key: google_api_key.map(SecretString::from),
                gemini_model: parse_string_env("GEMINI_MODEL", settings.llm.gemini_model.clone())?,
                timeout: Duration::from_secs(parse_u64_env(
                    "LLM_TIMEOUT_SECS",
                    settings.llm.timeout_secs,
                )?),
            },
            practice: PracticeConfig {
                firm_name: parse_string_env(
                    "PRACTICE_FIRM_NAME",
                    settings.practice.firm_name.clone(),
                )?,
                responsible_lawyer: parse_string_env(
                    "PRACTICE_RESPONSIBLE_LAWYER",
                    settings.practice.responsible_lawyer.clone(),
                )?,
                hst_rate: validate_hst_rate("PRACTICE_HST_RATE", &hst_raw)?,
                default_hourly_rate: validate_hourly_rate(
                    "PRACTICE_DEFAULT_HOURLY_RATE",
                    &hourly_raw,
                )?,
                reconciliation_day,
                stale_wip_days: {
                    let days = parse_u64_env(
                        "PRACTICE_STALE_WIP_DAYS",
                        settings.practice.stale_wip_days.unsigned_abs(),
                    )?;
                    i64::try_from(days).map_err(|_| ConfigError::InvalidValue {
                        key: "PRACTICE_STALE_WIP_DAYS".to_string(),
                        message: format!("value {days} is out of range"),
                    })?
                },
            },
            audit: AuditConfig {
                enabled: parse_bool_env("AUDIT_ENABLED", settings.audit.enabled)?,
                path: audit_path,
                hash_chain: parse_bool_env("AUDIT_HASH_CHAIN", settings.audit.hash_chain)?,
            },
            log_json: parse_bool_env("LOG_JSON", settings.logging.json)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::error::ConfigError;
    use crate::settings::Settings;

    use super::{
        AppConfig, LlmProviderKind, validate_audit_path, validate_hst_rate,
        validate_reconciliation_day,
    };

    #[test]
    fn resolve_uses_practice_defaults() {
        let settings = Settings::default();
        let config = AppConfig::resolve(&settings).expect("config should resolve");

        assert_eq!(config.practice.hst_rate, dec!(0.13));
        assert_eq!(config.practice.default_hourly_rate, dec!(350.00));
        assert_eq!(config.practice.reconciliation_day, 25);
        assert_eq!(config.practice.stale_wip_days, 90);
        assert!(config.audit.enabled);
        assert!(config.audit.hash_chain);
    }

    #[test]
    fn provider_kind_parses_aliases() {
        assert_eq!(
            LlmProviderKind::from_str("Google").expect("valid"),
            LlmProviderKind::Gemini
        );
        assert_eq!(
            LlmProviderKind::from_str("none").expect("valid"),
            LlmProviderKind::Disabled
        );
        assert!(LlmProviderKind::from_str("claude++").is_err());
    }

    #[test]
    fn hst_rate_must_be_a_fraction() {
        let err = validate_hst_rate("PRACTICE_HST_RATE", "13").expect_err("must reject");
        let ConfigError::InvalidValue { key, message } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "PRACTICE_HST_RATE");
        assert!(message.contains("[0, 1)"), "unexpected message: {message}");
    }

    #[test]
    fn reconciliation_day_is_bounded_to_every_month() {
        assert_eq!(validate_reconciliation_day(25).expect("valid"), 25);
        let err = validate_reconciliation_day(31).expect_err("must reject");
        let ConfigError::InvalidValue { key, .. } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "PRACTICE_RECONCILIATION_DAY");
    }

    #[test]
    fn audit_path_rejects_parent_dir_traversal() {
        let err = validate_audit_path("logs/../../etc/audit.jsonl").expect_err("must reject '..'");
        let ConfigError::InvalidValue { key, message } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "AUDIT_PATH");
        assert!(message.contains(".."), "unexpected message: {message}");
    }

    #[test]
    fn audit_path_accepts_absolute_paths_verbatim() {
        let path = validate_audit_path("/var/log/willforge/audit.jsonl").expect("valid");
        assert_eq!(path.to_str(), Some("/var/log/willforge/audit.jsonl"));
    }

    #[test]
    fn relative_audit_path_lands_under_the_data_dir() {
        let path = validate_audit_path("./logs/audit.jsonl").expect("valid");
        assert!(path.ends_with("logs/audit.jsonl"));
        assert!(path.starts_with(super::default_data_dir()));
    }
}
