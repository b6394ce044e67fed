use serde::{Deserialize, Serialize};

use crate::error::{CnabError, Result};

/// Default number of concurrent registry requests.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Settings shared by push and pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotesConfig {
    /// Upper bound on concurrent resolves and pushes
    pub concurrency: usize,

    /// Retry once with the compatible scheme when the registry rejects a media type
    pub allow_fallback: bool,

    /// Overall deadline for one push or pull
    pub timeout_secs: Option<u64>,

    /// Registries reached over plain HTTP
    pub insecure_registries: Vec<String>,
}

impl Default for RemotesConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            allow_fallback: true,
            timeout_secs: None,
            insecure_registries: Vec::new(),
        }
    }
}

impl RemotesConfig {
    /// Defaults overlaid with `CNAB_OCI_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("CNAB_OCI_CONCURRENCY") {
            config.concurrency = value.trim().parse().map_err(|_| {
                CnabError::ConfigError(format!("CNAB_OCI_CONCURRENCY: not a number: '{}'", value))
            })?;
        }
        if let Some(value) = lookup("CNAB_OCI_TIMEOUT_SECS") {
            let secs = value.trim().parse().map_err(|_| {
                CnabError::ConfigError(format!("CNAB_OCI_TIMEOUT_SECS: not a number: '{}'", value))
            })?;
            config.timeout_secs = Some(secs);
        }
        if let Some(value) = lookup("CNAB_OCI_ALLOW_FALLBACK") {
            config.allow_fallback = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(CnabError::ConfigError(format!(
                        "CNAB_OCI_ALLOW_FALLBACK: expected true or false, got '{}'",
                        value
                    )))
                }
            };
        }
        if let Some(value) = lookup("CNAB_OCI_INSECURE_REGISTRIES") {
            config.insecure_registries = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(CnabError::ConfigError(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(CnabError::ConfigError(
                "timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RemotesConfig::default();
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert!(config.allow_fallback);
        assert!(config.timeout_secs.is_none());
        assert!(config.insecure_registries.is_empty());
    }

    #[test]
    fn test_from_env_overrides() {
        let config = RemotesConfig::from_lookup(lookup(&[
            ("CNAB_OCI_CONCURRENCY", "8"),
            ("CNAB_OCI_TIMEOUT_SECS", "30"),
            ("CNAB_OCI_ALLOW_FALLBACK", "false"),
            ("CNAB_OCI_INSECURE_REGISTRIES", "localhost:5000, registry.local ,"),
        ]))
        .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.timeout_secs, Some(30));
        assert!(!config.allow_fallback);
        assert_eq!(
            config.insecure_registries,
            vec!["localhost:5000".to_string(), "registry.local".to_string()]
        );
    }

    #[test]
    fn test_from_env_rejects_garbage() {
        let err = RemotesConfig::from_lookup(lookup(&[("CNAB_OCI_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(matches!(err, CnabError::ConfigError(_)));

        let err = RemotesConfig::from_lookup(lookup(&[("CNAB_OCI_ALLOW_FALLBACK", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, CnabError::ConfigError(_)));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = RemotesConfig::from_lookup(lookup(&[("CNAB_OCI_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }
}
