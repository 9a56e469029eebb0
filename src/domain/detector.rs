//! Pattern detector.
//!
//! Runs every enabled rule over a text, validates and scores each
//! occurrence, and resolves overlaps into the applied match set: ordered by
//! start offset and pairwise non-overlapping.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::normalize::{ceil_char_boundary, floor_char_boundary};
use super::rules::{Rule, RuleRegistry};
use super::{Detection, RuleId, RuleSet};
use crate::error::RedactorError;

/// Bytes inspected on each side of a match for context keywords.
pub const CONTEXT_WINDOW: usize = 50;

const CONTEXT_FLOOR: f32 = 0.95;
const CONTEXT_BONUS: f32 = 1.05;

/// How eagerly low-confidence matches are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Strict,
    #[default]
    Normal,
    Relaxed,
}

impl Sensitivity {
    /// Minimum adjusted confidence for a match to be kept.
    pub fn threshold(self) -> f32 {
        match self {
            Sensitivity::Strict => 0.5,
            Sensitivity::Normal => 0.65,
            Sensitivity::Relaxed => 0.8,
        }
    }

    /// Multiplier applied to every confidence before thresholding.
    pub fn factor(self) -> f32 {
        match self {
            Sensitivity::Strict => 1.15,
            Sensitivity::Normal => 1.0,
            Sensitivity::Relaxed => 0.85,
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sensitivity::Strict => "strict",
            Sensitivity::Normal => "normal",
            Sensitivity::Relaxed => "relaxed",
        };
        f.write_str(name)
    }
}

impl FromStr for Sensitivity {
    type Err = RedactorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Sensitivity::Strict),
            "normal" => Ok(Sensitivity::Normal),
            "relaxed" => Ok(Sensitivity::Relaxed),
            other => Err(RedactorError::InvalidInput {
                parameter: "sensitivity".to_string(),
                reason: format!("expected strict, normal or relaxed, got '{}'", other),
            }),
        }
    }
}

/// Match counts for one document or page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionStats {
    pub total: usize,
    #[serde(rename = "byType")]
    pub by_type: BTreeMap<RuleId, usize>,
}

impl RedactionStats {
    pub fn record(&mut self, rule: RuleId) {
        self.total += 1;
        *self.by_type.entry(rule).or_insert(0) += 1;
    }

    /// Adds another page's counts into this one.
    pub fn merge(&mut self, other: &RedactionStats) {
        self.total += other.total;
        for (rule, count) in &other.by_type {
            *self.by_type.entry(*rule).or_insert(0) += count;
        }
    }

    pub fn count(&self, rule: RuleId) -> usize {
        self.by_type.get(&rule).copied().unwrap_or(0)
    }
}

/// Counts an applied match set per rule.
pub fn summarize(matches: &[Detection]) -> RedactionStats {
    let mut stats = RedactionStats::default();
    for m in matches {
        stats.record(m.rule);
    }
    stats
}

/// Detector over the shared rule registry.
#[derive(Debug, Clone, Copy)]
pub struct Detector {
    registry: &'static RuleRegistry,
}

impl Detector {
    pub fn new() -> Self {
        Self::with_registry(RuleRegistry::global())
    }

    pub fn with_registry(registry: &'static RuleRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'static RuleRegistry {
        self.registry
    }

    /// Applied match set at normal sensitivity.
    pub fn detect(&self, text: &str, rules: &RuleSet) -> Vec<Detection> {
        self.detect_with_sensitivity(text, rules, Sensitivity::Normal)
    }

    /// Applied match set: sorted by start and pairwise non-overlapping.
    pub fn detect_with_sensitivity(
        &self,
        text: &str,
        rules: &RuleSet,
        sensitivity: Sensitivity,
    ) -> Vec<Detection> {
        resolve_overlaps(self.detect_candidates(text, rules, sensitivity))
    }

    /// Every validated occurrence above the threshold, before overlap
    /// resolution, sorted by start, longest first, then rule priority.
    pub fn detect_candidates(
        &self,
        text: &str,
        rules: &RuleSet,
        sensitivity: Sensitivity,
    ) -> Vec<Detection> {
        if text.is_empty() {
            return Vec::new();
        }

        let lowered = text.to_lowercase();
        // Lowercasing can change byte lengths outside ASCII
        let context_text = if lowered.len() == text.len() {
            Some(lowered.as_str())
        } else {
            None
        };

        let mut candidates = Vec::new();
        for id in rules.iter() {
            let rule = self.registry.get(id);
            for m in rule.pattern.find_iter(text) {
                if m.as_str().is_empty() || !rule.accepts(m.as_str()) {
                    continue;
                }

                let has_context = match context_text {
                    Some(lowered) => keyword_near(rule, lowered, m.start(), m.end()),
                    None => keyword_near_slow(rule, text, m.start(), m.end()),
                };
                let confidence = score(rule.confidence, has_context, sensitivity);
                if confidence < sensitivity.threshold() {
                    continue;
                }

                candidates.push(Detection {
                    rule: id,
                    start: m.start(),
                    end: m.end(),
                    text: m.as_str().to_string(),
                    confidence,
                });
            }
        }

        sort_candidates(&mut candidates);
        candidates
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

fn score(base: f32, has_context: bool, sensitivity: Sensitivity) -> f32 {
    let mut confidence = base;
    if has_context {
        confidence = (confidence.max(CONTEXT_FLOOR) * CONTEXT_BONUS).min(1.0);
    }
    (confidence * sensitivity.factor()).clamp(0.0, 1.0)
}

fn context_bounds(text: &str, start: usize, end: usize) -> (usize, usize) {
    (
        floor_char_boundary(text, start.saturating_sub(CONTEXT_WINDOW)),
        ceil_char_boundary(text, end.saturating_add(CONTEXT_WINDOW)),
    )
}

fn keyword_near(rule: &Rule, lowered: &str, start: usize, end: usize) -> bool {
    let (from, to) = context_bounds(lowered, start, end);
    let window = &lowered[from..to];
    rule.keywords.iter().any(|k| window.contains(k))
}

fn keyword_near_slow(rule: &Rule, text: &str, start: usize, end: usize) -> bool {
    let (from, to) = context_bounds(text, start, end);
    let window = text[from..to].to_lowercase();
    rule.keywords.iter().any(|k| window.contains(k))
}

fn sort_candidates(candidates: &mut [Detection]) {
    candidates.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(b.end.cmp(&a.end))
            .then(a.rule.priority().cmp(&b.rule.priority()))
    });
}

/// Keeps the first of every overlapping group.
///
/// Candidates are re-sorted by start ascending, end descending and rule
/// priority, so the earliest and then longest match wins; a candidate
/// starting strictly before the last accepted end is dropped.
pub fn resolve_overlaps(mut candidates: Vec<Detection>) -> Vec<Detection> {
    sort_candidates(&mut candidates);

    let mut applied: Vec<Detection> = Vec::with_capacity(candidates.len());
    let mut last_end = 0;
    for candidate in candidates {
        if !applied.is_empty() && candidate.start < last_end {
            continue;
        }
        last_end = candidate.end;
        applied.push(candidate);
    }
    applied
}
