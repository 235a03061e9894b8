//! Storefront configuration.
//!
//! Loaded from `turbo.toml` (or a `.json` file) with every field
//! defaulted, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use turbo_cache::TtlCacheConfig;
use turbo_prefetch::PrefetchConfig;
use turbo_query::QueryDefaults;

/// File names searched by [`StorefrontConfig::discover`].
pub const CONFIG_FILE_NAMES: &[&str] = &["turbo.toml", ".turbo.toml"];

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to parse JSON config {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level storefront configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorefrontConfig {
    /// Store name used in fallback page titles.
    #[serde(default = "default_site_name")]
    pub site_name: String,

    #[serde(default)]
    pub api: ApiConfig,

    /// Defaults applied to every query.
    #[serde(default)]
    pub query: QueryDefaults,

    #[serde(default)]
    pub prefetch: PrefetchConfig,

    /// L1 cache for SEO metadata.
    #[serde(default)]
    pub seo_cache: TtlCacheConfig,
}

fn default_site_name() -> String {
    "TurboCommerce".to_string()
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            site_name: default_site_name(),
            api: ApiConfig::default(),
            query: QueryDefaults::default(),
            prefetch: PrefetchConfig::default(),
            seo_cache: TtlCacheConfig::default(),
        }
    }
}

impl StorefrontConfig {
    /// Load config from a file. `.json` files are parsed as JSON, anything
    /// else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            toml::from_str(&content).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Find the nearest config file walking up from `start`.
    pub fn discover(start: impl AsRef<Path>) -> Option<PathBuf> {
        start.as_ref().ancestors().find_map(|dir| {
            CONFIG_FILE_NAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_file())
        })
    }

    /// Load the discovered config, or defaults when there is none.
    pub fn load_or_default(start: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::discover(start) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading storefront config");
                Self::load(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Write the config. The format follows the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            self.to_toml()?
        };
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.api.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "api.base_url must be an http(s) URL, got {:?}",
                self.api.base_url
            )));
        }
        if self.api.page_size == 0 {
            return Err(ConfigError::Invalid("api.page_size must be positive".into()));
        }
        if self.query.gc_time_ms < self.query.stale_time_ms {
            return Err(ConfigError::Invalid(
                "query.gc_time_ms must not be shorter than query.stale_time_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.seo_cache.cleanup_probability) {
            return Err(ConfigError::Invalid(
                "seo_cache.cleanup_probability must be within [0, 1]".into(),
            ));
        }
        if self.seo_cache.cleanup_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "seo_cache.cleanup_interval_ms must be positive".into(),
            ));
        }
        self.prefetch
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("prefetch: {}", e)))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// Storefront API endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Items per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_page_size() -> u32 {
    20
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            page_size: default_page_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("turbo-config-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: StorefrontConfig = toml::from_str("").unwrap();
        assert_eq!(config, StorefrontConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: StorefrontConfig = toml::from_str(
            r#"
            site_name = "Linen & Co"

            [api]
            base_url = "https://shop.example.com"

            [prefetch.queue]
            cooldown_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.api.page_size, 20);
        assert_eq!(config.prefetch.queue.cooldown_ms, 250);
        assert_eq!(config.prefetch.queue.batch_size, 3);
        assert_eq!(config.query.retry_count, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = StorefrontConfig::default();
        config.api.base_url = "ftp://shop".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = StorefrontConfig::default();
        config.prefetch.predictor.weights.scroll = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_cleanup_interval() {
        let config: StorefrontConfig = toml::from_str(
            r#"
            [seo_cache]
            cleanup_interval_ms = 0
            "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cleanup_interval_ms"));
    }

    #[test]
    fn test_save_load_and_discover() {
        let root = scratch_dir("discover");
        let nested = root.join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let mut config = StorefrontConfig::default();
        config.site_name = "Discovered".into();
        config.save(root.join("turbo.toml")).unwrap();

        assert_eq!(StorefrontConfig::discover(&nested), Some(root.join("turbo.toml")));
        assert_eq!(StorefrontConfig::load_or_default(&nested).unwrap().site_name, "Discovered");

        config.save(root.join("turbo.json")).unwrap();
        assert_eq!(StorefrontConfig::load(root.join("turbo.json")).unwrap(), config);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = StorefrontConfig::load("/nonexistent/turbo.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
