// Application configuration
//
// Decision: Plain env vars with defaults; `.env` is loaded by the binary via dotenvy.
// Decision: Missing DATABASE_URL selects the in-memory record store.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{key} must be at least 1")]
    ZeroWorkers { key: &'static str },
}

/// Settings for the Gemini provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    pub thinking_budget: u32,
    pub http_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://generativelanguage.googleapis.com".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            image_model: "gemini-3-pro-image-preview".to_string(),
            thinking_budget: 1000,
            http_timeout: Duration::from_secs(300),
        }
    }
}

/// Process-wide configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    /// Concurrency limit for description batches
    pub max_description_workers: usize,
    /// Concurrency limit for image batches
    pub max_image_workers: usize,
    pub default_aspect_ratio: String,
    pub default_resolution: String,
    pub upload_folder: PathBuf,
    pub database_url: Option<String>,
    /// Per work item deadline
    pub item_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            max_description_workers: 5,
            max_image_workers: 8,
            default_aspect_ratio: "16:9".to_string(),
            default_resolution: "2K".to_string(),
            upload_folder: PathBuf::from("uploads"),
            database_url: None,
            item_timeout: Duration::from_secs(300),
        }
    }
}

impl AppConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `GOOGLE_API_KEY`: Gemini API key
    /// - `GOOGLE_API_BASE`: API base URL
    /// - `TEXT_MODEL` / `IMAGE_MODEL`: model names
    /// - `MAX_DESCRIPTION_WORKERS` (default 5) / `MAX_IMAGE_WORKERS` (default 8)
    /// - `DEFAULT_ASPECT_RATIO` (default "16:9") / `DEFAULT_RESOLUTION` (default "2K")
    /// - `UPLOAD_FOLDER` (default "uploads")
    /// - `DATABASE_URL`: PostgreSQL URL; unset means in-memory
    /// - `ITEM_TIMEOUT_SECS` / `PROVIDER_HTTP_TIMEOUT_SECS` (default 300)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = ProviderConfig {
            api_key: get("GOOGLE_API_KEY"),
            api_base: get("GOOGLE_API_BASE").unwrap_or(defaults.provider.api_base),
            text_model: get("TEXT_MODEL").unwrap_or(defaults.provider.text_model),
            image_model: get("IMAGE_MODEL").unwrap_or(defaults.provider.image_model),
            thinking_budget: defaults.provider.thinking_budget,
            http_timeout: parse_secs(
                "PROVIDER_HTTP_TIMEOUT_SECS",
                get("PROVIDER_HTTP_TIMEOUT_SECS"),
                defaults.provider.http_timeout,
            )?,
        };

        Ok(Self {
            provider,
            max_description_workers: parse_workers(
                "MAX_DESCRIPTION_WORKERS",
                get("MAX_DESCRIPTION_WORKERS"),
                defaults.max_description_workers,
            )?,
            max_image_workers: parse_workers(
                "MAX_IMAGE_WORKERS",
                get("MAX_IMAGE_WORKERS"),
                defaults.max_image_workers,
            )?,
            default_aspect_ratio: get("DEFAULT_ASPECT_RATIO")
                .unwrap_or(defaults.default_aspect_ratio),
            default_resolution: get("DEFAULT_RESOLUTION").unwrap_or(defaults.default_resolution),
            upload_folder: get("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_folder),
            database_url: get("DATABASE_URL"),
            item_timeout: parse_secs("ITEM_TIMEOUT_SECS", get("ITEM_TIMEOUT_SECS"), defaults.item_timeout)?,
        })
    }
}

fn parse_workers(
    key: &'static str,
    value: Option<String>,
    default: usize,
) -> Result<usize, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    let parsed: usize = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.clone(),
        })?;
    if parsed == 0 {
        return Err(ConfigError::ZeroWorkers { key });
    }
    Ok(parsed)
}

fn parse_secs(
    key: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.max_description_workers, 5);
        assert_eq!(config.max_image_workers, 8);
        assert_eq!(config.default_aspect_ratio, "16:9");
        assert_eq!(config.default_resolution, "2K");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("GOOGLE_API_KEY", "secret"),
            ("MAX_IMAGE_WORKERS", "3"),
            ("ITEM_TIMEOUT_SECS", "45"),
            ("UPLOAD_FOLDER", "/var/deckgen"),
            ("DATABASE_URL", "postgres://localhost/deckgen"),
        ])
        .unwrap();

        assert_eq!(config.provider.api_key.as_deref(), Some("secret"));
        assert_eq!(config.max_image_workers, 3);
        assert_eq!(config.item_timeout, Duration::from_secs(45));
        assert_eq!(config.upload_folder, PathBuf::from("/var/deckgen"));
        assert!(config.database_url.is_some());
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = config_from(&[("DATABASE_URL", "  "), ("TEXT_MODEL", "")]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.provider.text_model, "gemini-2.5-flash");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = config_from(&[("MAX_DESCRIPTION_WORKERS", "0")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ZeroWorkers {
                key: "MAX_DESCRIPTION_WORKERS"
            }
        );
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = config_from(&[("ITEM_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "ITEM_TIMEOUT_SECS",
                ..
            }
        ));
    }
}
