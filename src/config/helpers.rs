use crate::error::ConfigError;

/// Read an environment variable, treating missing and blank values as absent.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "environment value is not valid UTF-8".to_string(),
        }),
    }
}

pub(crate) fn parse_string_env(key: &str, default: String) -> Result<String, ConfigError> {
    Ok(optional_env(key)?.unwrap_or(default))
}

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{other}'"),
            }),
        },
        None => Ok(default),
    }
}

pub(crate) fn parse_u16_env(key: &str, default: u16) -> Result<u16, ConfigError> {
    match optional_env(key)? {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected an integer in 0..=65535, got '{raw}'"),
        }),
        None => Ok(default),
    }
}

pub(crate) fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_env(key)? {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a non-negative integer, got '{raw}'"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ConfigError;

    use super::{parse_bool_env, parse_u16_env};

    // Env-var tests mutate process state; each test uses a unique key so they
    // stay independent under the parallel test runner.

    #[test]
    fn parse_bool_env_accepts_common_spellings() {
        unsafe { std::env::set_var("WF_TEST_BOOL_YES", "Yes") };
        assert!(parse_bool_env("WF_TEST_BOOL_YES", false).expect("should parse"));
        unsafe { std::env::set_var("WF_TEST_BOOL_OFF", "off") };
        assert!(!parse_bool_env("WF_TEST_BOOL_OFF", true).expect("should parse"));
    }

    #[test]
    fn parse_bool_env_rejects_garbage() {
        unsafe { std::env::set_var("WF_TEST_BOOL_BAD", "maybe") };
        let err = parse_bool_env("WF_TEST_BOOL_BAD", true).expect_err("must reject");
        let ConfigError::InvalidValue { key, .. } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "WF_TEST_BOOL_BAD");
    }

    #[test]
    fn parse_u16_env_falls_back_to_default_when_unset() {
        assert_eq!(
            parse_u16_env("WF_TEST_U16_UNSET", 8787).expect("should parse"),
            8787
        );
    }

    #[test]
    fn blank_env_value_counts_as_absent() {
        unsafe { std::env::set_var("WF_TEST_U16_BLANK", "   ") };
        assert_eq!(
            parse_u16_env("WF_TEST_U16_BLANK", 4242).expect("should parse"),
            4242
        );
    }
}
