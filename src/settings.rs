use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// On-disk settings, loaded from a TOML file. Every field has a default so a
/// missing file (or a partial one) still yields a runnable configuration.
/// Environment variables override these values during [`crate::config::AppConfig::resolve`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub llm: LlmSettings,
    pub practice: PracticeSettings,
    pub audit: AuditSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Bearer token required on every /api route except /api/health.
    /// When unset a random token is generated at startup and printed once.
    pub auth_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Path to the libSQL database file. Defaults to the platform data dir.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// "openai", "gemini", or "disabled". API keys come from the environment
    /// (OPENAI_API_KEY / GOOGLE_API_KEY), never from this file.
    pub provider: String,
    pub openai_model: String,
    pub gemini_model: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            gemini_model: "gemini-1.5-flash".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PracticeSettings {
    pub firm_name: String,
    pub responsible_lawyer: String,
    /// Ontario HST as a decimal fraction, e.g. "0.13".
    pub hst_rate: String,
    pub default_hourly_rate: String,
    /// Day of month the monthly trust reconciliation is due (LSO By-Law 9).
    pub reconciliation_day: u8,
    /// Unbilled time older than this many days is flagged by the practice monitor.
    pub stale_wip_days: i64,
}

impl Default for PracticeSettings {
    fn default() -> Self {
        Self {
            firm_name: String::new(),
            responsible_lawyer: String::new(),
            hst_rate: "0.13".to_string(),
            default_hourly_rate: "350.00".to_string(),
            reconciliation_day: 25,
            stale_wip_days: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub enabled: bool,
    /// Audit log path. Relative paths resolve against the data directory.
    pub path: Option<String>,
    pub hash_chain: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            hash_chain: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub json: bool,
}

impl Settings {
    /// Load settings from `explicit` if given, otherwise from `willforge.toml`
    /// in the working directory if it exists, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let local = PathBuf::from("willforge.toml");
                local.is_file().then_some(local)
            }
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;

    #[test]
    fn defaults_are_runnable() {
        let settings = Settings::default();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8787);
        assert_eq!(settings.llm.provider, "openai");
        assert_eq!(settings.practice.hst_rate, "0.13");
        assert_eq!(settings.practice.reconciliation_day, 25);
        assert!(settings.audit.enabled);
        assert!(settings.audit.hash_chain);
    }

    #[test]
    fn partial_toml_fills_missing_sections_with_defaults() {
        let raw = r#"
            [server]
            port = 9000

            [practice]
            firm_name = "Meadowvale Law"
            hst_rate = "0.13"
        "#;
        let settings: Settings = toml::from_str(raw).expect("settings should parse");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.practice.firm_name, "Meadowvale Law");
        assert_eq!(settings.llm.openai_model, "gpt-4o-mini");
        assert!(settings.database.path.is_none());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let raw = r#"
            [server]
            port = 9100
            legacy_flag = true
        "#;
        let settings: Settings = toml::from_str(raw).expect("settings should parse");
        assert_eq!(settings.server.port, 9100);
    }
}
