//! Position-aware redaction.
//!
//! Maps matches found in the text of a PDF page back to the glyph runs that
//! produced them and turns those runs into cover rectangles. Covers are
//! computed at run granularity: a run that contributes a single character to
//! a match is covered completely.

use std::collections::{BTreeMap, BTreeSet};

use lopdf::ObjectId;
use serde::{Deserialize, Serialize};

use crate::domain::detector::{summarize, RedactionStats};
use crate::domain::{Detection, Detector, RuleId, RuleSet, Sensitivity};

/// Default padding added around every cover, in PDF units.
pub const DEFAULT_COVER_PADDING: f32 = 1.0;

/// Axis-aligned rectangle in PDF user space (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.top().max(other.top()) - y,
        )
    }

    /// Grows the box by `amount` on every side.
    pub fn pad(&self, amount: f32) -> BoundingBox {
        BoundingBox::new(
            self.x - amount,
            self.y - amount,
            self.width + 2.0 * amount,
            self.height + 2.0 * amount,
        )
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        const EPSILON: f32 = 1e-3;
        self.x <= other.x + EPSILON
            && self.y <= other.y + EPSILON
            && self.right() + EPSILON >= other.right()
            && self.top() + EPSILON >= other.top()
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.top()
            && other.y < self.top()
    }
}

/// A contiguous piece of text with its on-page box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionedRun {
    pub page_index: usize,
    pub text: String,
    pub bbox: BoundingBox,
    /// Byte offset of `text` inside the page text, set when the page text
    /// is built.
    pub origin_offset: usize,
    /// Index of the content-stream operation that drew this run. `None`
    /// for runs coming from OCR.
    pub op_index: Option<usize>,
    /// Form XObject whose content stream holds `op_index`; `None` for the
    /// page's own content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<ObjectId>,
}

impl PositionedRun {
    pub fn new(page_index: usize, text: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            page_index,
            text: text.into(),
            bbox,
            origin_offset: 0,
            op_index: None,
            form: None,
        }
    }

    pub fn with_op_index(mut self, op_index: usize) -> Self {
        self.op_index = Some(op_index);
        self
    }

    pub fn with_form(mut self, form: ObjectId) -> Self {
        self.form = Some(form);
        self
    }

    pub fn end_offset(&self) -> usize {
        self.origin_offset + self.text.len()
    }

    fn is_printable(&self) -> bool {
        self.text
            .chars()
            .any(|c| !c.is_whitespace() && !c.is_control())
    }

    fn same_line(&self, other: &PositionedRun) -> bool {
        let height = self.bbox.height.max(other.bbox.height).max(f32::EPSILON);
        (self.bbox.y - other.bbox.y).abs() <= height / 2.0
    }
}

/// Region to paint over on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverRect {
    pub page_index: usize,
    pub rule: RuleId,
    pub bbox: BoundingBox,
}

/// Text-showing operations to blank, keyed by the stream that holds them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoveredOps {
    /// Operations of the page's own content stream.
    pub page: BTreeSet<usize>,
    pub forms: BTreeMap<ObjectId, BTreeSet<usize>>,
}

impl CoveredOps {
    pub fn insert(&mut self, form: Option<ObjectId>, op_index: usize) {
        match form {
            Some(id) => {
                self.forms.entry(id).or_default().insert(op_index);
            }
            None => {
                self.page.insert(op_index);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.page.len() + self.forms.values().map(BTreeSet::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything computed for one page.
#[derive(Debug, Clone, Default)]
pub struct PageRedaction {
    pub page_index: usize,
    pub text: String,
    /// Printable runs in drawing order with their offsets assigned.
    pub runs: Vec<PositionedRun>,
    pub matches: Vec<Detection>,
    pub covers: Vec<CoverRect>,
    /// Content-stream operations whose runs are covered.
    pub covered_ops: CoveredOps,
}

impl PageRedaction {
    pub fn stats(&self) -> RedactionStats {
        summarize(&self.matches)
    }

    pub fn is_untouched(&self) -> bool {
        self.covers.is_empty()
    }

    /// True when more than half of the page's non-whitespace characters
    /// map to real text.
    pub fn has_text(&self) -> bool {
        let total = self.text.chars().filter(|c| !c.is_whitespace()).count();
        total > 0 && readable_chars(&self.text) * 2 > total
    }
}

/// Non-whitespace characters that are neither control characters nor the
/// replacement character emitted for unmapped glyphs.
pub fn readable_chars(text: &str) -> usize {
    text.chars()
        .filter(|&c| !c.is_whitespace() && !c.is_control() && c != char::REPLACEMENT_CHARACTER)
        .count()
}

/// Concatenates runs into page text and records each run's offset.
///
/// A newline separates runs on different lines and a space separates runs
/// with a horizontal gap between them. Runs without printable characters
/// are dropped.
pub fn build_page_text(runs: Vec<PositionedRun>) -> (String, Vec<PositionedRun>) {
    let mut text = String::new();
    let mut kept: Vec<PositionedRun> = Vec::with_capacity(runs.len());

    for mut run in runs.into_iter().filter(PositionedRun::is_printable) {
        if let Some(prev) = kept.last() {
            if !run.same_line(prev) {
                text.push('\n');
            } else if has_gap(prev, &run)
                && !prev.text.ends_with(char::is_whitespace)
                && !run.text.starts_with(char::is_whitespace)
            {
                text.push(' ');
            }
        }
        run.origin_offset = text.len();
        text.push_str(&run.text);
        kept.push(run);
    }

    (text, kept)
}

fn has_gap(prev: &PositionedRun, next: &PositionedRun) -> bool {
    let tolerance = prev.bbox.height.max(next.bbox.height) * 0.15;
    next.bbox.x > prev.bbox.right() + tolerance || next.bbox.x + tolerance < prev.bbox.x
}

/// Runs detection over a page's runs and computes covers.
#[derive(Debug, Clone)]
pub struct PageRedactor {
    detector: Detector,
    rules: RuleSet,
    sensitivity: Sensitivity,
    padding: f32,
}

impl PageRedactor {
    pub fn new(rules: RuleSet, sensitivity: Sensitivity) -> Self {
        Self {
            detector: Detector::new(),
            rules,
            sensitivity,
            padding: DEFAULT_COVER_PADDING,
        }
    }

    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = padding.max(0.0);
        self
    }

    pub fn with_detector(mut self, detector: Detector) -> Self {
        self.detector = detector;
        self
    }

    /// Detects sensitive spans on one page and covers the runs behind them.
    pub fn redact_page(&self, page_index: usize, runs: Vec<PositionedRun>) -> PageRedaction {
        let (text, runs) = build_page_text(runs);
        if runs.is_empty() {
            return PageRedaction {
                page_index,
                ..Default::default()
            };
        }

        let matches = self
            .detector
            .detect_with_sensitivity(&text, &self.rules, self.sensitivity);

        let mut covers = Vec::new();
        let mut covered_ops = CoveredOps::default();

        for m in &matches {
            let hit: Vec<&PositionedRun> = runs
                .iter()
                .filter(|run| run.origin_offset < m.end && m.start < run.end_offset())
                .collect();

            for run in &hit {
                if let Some(op) = run.op_index {
                    covered_ops.insert(run.form, op);
                }
            }

            for group in group_by_line(&hit) {
                let bbox = group
                    .iter()
                    .skip(1)
                    .fold(group[0].bbox, |acc, run| acc.union(&run.bbox))
                    .pad(self.padding);
                covers.push(CoverRect {
                    page_index,
                    rule: m.rule,
                    bbox,
                });
            }
        }

        tracing::debug!(
            page = page_index,
            runs = runs.len(),
            matches = matches.len(),
            covers = covers.len(),
            "Page analysed"
        );

        PageRedaction {
            page_index,
            text,
            runs,
            matches,
            covers,
            covered_ops,
        }
    }
}

/// Splits consecutive runs into groups that share a line.
fn group_by_line<'a>(runs: &[&'a PositionedRun]) -> Vec<Vec<&'a PositionedRun>> {
    let mut groups: Vec<Vec<&PositionedRun>> = Vec::new();
    for &run in runs {
        match groups.last_mut() {
            Some(group) if group.last().is_some_and(|prev| prev.same_line(run)) => {
                group.push(run)
            }
            _ => groups.push(vec![run]),
        }
    }
    groups
}
