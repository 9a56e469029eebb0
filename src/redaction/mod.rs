//! Redaction strategies and implementations.
//!
//! This module provides the text strategies, the position-aware redactor
//! for PDF pages and the lopdf backend, plus a small service type that
//! bundles detection and transformation for plain text.

pub mod fonts;
pub mod pdf;
pub mod positioned;
pub mod strategy;

pub use positioned::{
    BoundingBox, CoverRect, CoveredOps, PageRedaction, PageRedactor, PositionedRun,
};
pub use strategy::{
    apply, strip_underline, PdfAction, RedactionStats, RedactionStrategy, TextStrategy,
    TextTransformer,
};

use serde::{Deserialize, Serialize};

use crate::domain::detector::summarize;
use crate::domain::{Detection, Detector, PatternMatcher, RuleId, RuleSet, Sensitivity};

/// Applied match set plus its counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextDetection {
    pub matches: Vec<Detection>,
    pub stats: RedactionStats,
}

/// Outcome of validating a single value against one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    pub normalized: Option<String>,
}

/// Redaction service coordinating detection and text transformation.
#[derive(Debug, Clone, Default)]
pub struct RedactionService {
    detector: Detector,
    transformer: TextTransformer,
}

impl RedactionService {
    /// Creates a new service with the given filler and delimiter settings.
    pub fn new(transformer: TextTransformer) -> Self {
        Self {
            detector: Detector::new(),
            transformer,
        }
    }

    pub fn transformer(&self) -> &TextTransformer {
        &self.transformer
    }

    /// Finds every sensitive span in `text`.
    pub fn detect_text(
        &self,
        text: &str,
        rules: &RuleSet,
        sensitivity: Sensitivity,
    ) -> TextDetection {
        let matches = self
            .detector
            .detect_with_sensitivity(text, rules, sensitivity);
        let stats = summarize(&matches);
        TextDetection { matches, stats }
    }

    /// Detects and rewrites `text` with the chosen strategy.
    pub fn redact_text(
        &self,
        text: &str,
        rules: &RuleSet,
        sensitivity: Sensitivity,
        strategy: TextStrategy,
    ) -> (String, RedactionStats) {
        let detection = self.detect_text(text, rules, sensitivity);
        let output = self
            .transformer
            .apply(text, &detection.matches, strategy);
        (output, detection.stats)
    }

    /// Runs one rule's validator on the trimmed value. The rule's pattern is
    /// not consulted, so rules without a validator accept any non-empty
    /// value.
    pub fn validate(&self, rule: RuleId, value: &str) -> Validation {
        let normalized = self.detector.registry().get(rule).normalize(value);
        Validation {
            valid: normalized.is_some(),
            normalized,
        }
    }
}
