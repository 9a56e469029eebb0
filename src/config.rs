//! Configuration file support.
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration. Values are validated once at load time.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{RuleSet, Sensitivity};
use crate::error::{RedactorError, RedactorResult};
use crate::pipeline::{ExtractionMode, ProcessOptions, DEFAULT_MAX_PAGE_WORKERS};
use crate::redaction::positioned::DEFAULT_COVER_PADDING;
use crate::redaction::strategy::{
    DEFAULT_MASK_CHAR, DEFAULT_UNDERLINE_DELIMITER, UNDERLINE_ESCAPE,
};
use crate::redaction::{PdfAction, TextStrategy, TextTransformer};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "RuleSet::all")]
    pub rules: RuleSet,

    #[serde(default)]
    pub sensitivity: Sensitivity,

    #[serde(default)]
    pub strategy: TextStrategy,

    #[serde(default)]
    pub action: PdfAction,

    #[serde(default)]
    pub extraction_mode: ExtractionMode,

    #[serde(default = "default_mask_char")]
    pub mask_char: char,

    #[serde(default = "default_underline_delimiter")]
    pub underline_delimiter: String,

    #[serde(default = "default_cover_padding")]
    pub cover_padding: f32,

    #[serde(default = "default_max_page_workers")]
    pub max_page_workers: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_progress_retention_secs")]
    pub progress_retention_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rules: RuleSet::all(),
            sensitivity: Sensitivity::default(),
            strategy: TextStrategy::default(),
            action: PdfAction::default(),
            extraction_mode: ExtractionMode::default(),
            mask_char: default_mask_char(),
            underline_delimiter: default_underline_delimiter(),
            cover_padding: default_cover_padding(),
            max_page_workers: default_max_page_workers(),
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            progress_retention_secs: default_progress_retention_secs(),
        }
    }
}

fn default_mask_char() -> char {
    DEFAULT_MASK_CHAR
}

fn default_underline_delimiter() -> String {
    DEFAULT_UNDERLINE_DELIMITER.to_string()
}

fn default_cover_padding() -> f32 {
    DEFAULT_COVER_PADDING
}

fn default_max_page_workers() -> usize {
    DEFAULT_MAX_PAGE_WORKERS
}

fn default_timeout_secs() -> u64 {
    30 * 60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_progress_retention_secs() -> u64 {
    60
}

impl Config {
    /// Loads `path` when given, defaults otherwise.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `InvalidInput` if it does not parse
    /// or holds out-of-range values.
    pub fn load(path: Option<&Path>) -> RedactorResult<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| RedactorError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> RedactorResult<Self> {
        toml::from_str(content).map_err(|e| RedactorError::InvalidInput {
            parameter: "config".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> RedactorResult<()> {
        let invalid = |parameter: &str, reason: &str| {
            Err(RedactorError::InvalidInput {
                parameter: parameter.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.underline_delimiter.is_empty() {
            return invalid("underline_delimiter", "must not be empty");
        }
        if self.underline_delimiter.starts_with(UNDERLINE_ESCAPE) {
            return invalid("underline_delimiter", "must not start with a backslash");
        }
        if !self.cover_padding.is_finite() || self.cover_padding < 0.0 {
            return invalid("cover_padding", "must be a non-negative number");
        }
        if self.max_page_workers == 0 {
            return invalid("max_page_workers", "must be at least 1");
        }
        if self.timeout_secs == 0 {
            return invalid("timeout_secs", "must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms", "must be at least 1");
        }
        Ok(())
    }

    pub fn transformer(&self) -> TextTransformer {
        TextTransformer::new(self.mask_char, self.underline_delimiter.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn progress_retention(&self) -> Duration {
        Duration::from_secs(self.progress_retention_secs)
    }

    /// Job options seeded from this configuration.
    pub fn process_options(&self) -> ProcessOptions {
        ProcessOptions {
            rules: self.rules.clone(),
            sensitivity: self.sensitivity,
            action: self.action,
            strategy: self.strategy,
            extraction_mode: self.extraction_mode,
            progress_id: None,
        }
    }
}
