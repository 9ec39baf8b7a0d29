//! Optional RON settings file. Every field may be omitted; present fields
//! override the engine defaults and are in turn overridden by command-line flags.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use harvest_logging::harvest_info;
use harvester_core::FileTypeFilter;
use harvester_engine::HarvestSettings;
use ron::extensions::Extensions;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "harvester.ron";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub api_base: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub file_type: Option<FileTypeFilter>,
    pub recursive: Option<bool>,
    pub image_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub image_suffix: Option<String>,
    pub token_env: Option<String>,
    pub user_agent: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub max_bytes: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub page_delay_ms: Option<u64>,
    pub subpage_delay_ms: Option<u64>,
}

impl AppConfig {
    /// Load `explicit`, or `./harvester.ron` when it exists. An explicitly named
    /// file must exist; the default one is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_ron(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        harvest_info!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Parse RON text; `Some(..)` wrappers around values are optional.
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::Options::default()
            .with_default_extension(Extensions::IMPLICIT_SOME)
            .from_str(text)
    }

    pub fn apply(&self, settings: &mut HarvestSettings) {
        if let Some(api_base) = &self.api_base {
            settings.api_base = api_base.clone();
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        if let Some(suffix) = &self.image_suffix {
            settings.image_suffix = suffix.clone();
        }
        if let Some(user_agent) = &self.user_agent {
            settings.fetch.user_agent = user_agent.clone();
        }
        if let Some(secs) = self.connect_timeout_secs {
            settings.fetch.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.request_timeout_secs {
            settings.fetch.request_timeout = Duration::from_secs(secs);
        }
        if let Some(max_bytes) = self.max_bytes {
            settings.fetch.max_bytes = max_bytes;
        }
        if let Some(attempts) = self.retry_attempts {
            settings.retry.max_attempts = attempts.max(1);
        }
        if let Some(ms) = self.page_delay_ms {
            settings.politeness.page_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.subpage_delay_ms {
            settings.politeness.subpage_delay = Duration::from_millis(ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_keeps_defaults() {
        let config = AppConfig::from_ron("()").unwrap();
        assert_eq!(config, AppConfig::default());

        let mut settings = HarvestSettings::default();
        config.apply(&mut settings);
        assert_eq!(settings.api_base, HarvestSettings::default().api_base);
        assert_eq!(settings.concurrency, 1);
    }

    #[test]
    fn present_fields_override_settings() {
        let config = AppConfig::from_ron(
            r#"(
                api_base: "http://localhost:8080",
                file_type: image,
                recursive: false,
                concurrency: 4,
                retry_attempts: 0,
                page_delay_ms: 0,
            )"#,
        )
        .unwrap();
        assert_eq!(config.file_type, Some(FileTypeFilter::Image));
        assert_eq!(config.recursive, Some(false));

        let mut settings = HarvestSettings::default();
        config.apply(&mut settings);
        assert_eq!(settings.api_base, "http://localhost:8080");
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.retry.max_attempts, 1);
        assert_eq!(settings.politeness.page_delay, Duration::ZERO);
        assert_eq!(settings.politeness.subpage_delay, Duration::from_secs(1));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(AppConfig::from_ron("(concurency: 2)").is_err());
    }

    #[test]
    fn explicit_file_is_loaded_and_must_exist() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(output_dir: \"flows\", token_env: \"MY_TOKEN\")").unwrap();
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.output_dir, Some(PathBuf::from("flows")));
        assert_eq!(config.token_env.as_deref(), Some("MY_TOKEN"));

        let missing = file.path().with_extension("missing");
        assert!(AppConfig::load(Some(&missing)).is_err());
    }
}
