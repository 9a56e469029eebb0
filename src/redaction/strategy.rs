//! Redaction strategy trait and supporting types.
//!
//! A strategy decides what replaces each matched span in a text. The
//! [`apply`] function walks an applied match set once and hands the
//! surviving spans to the strategy, which splices in its replacements.

use std::borrow::Cow;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::normalize::floor_char_boundary;
use crate::domain::{Detection, RuleId};
use crate::error::RedactorError;

pub use crate::domain::detector::RedactionStats;

/// Default filler used by the mask strategy.
pub const DEFAULT_MASK_CHAR: char = 'x';

/// Default delimiter used by the underline strategy.
pub const DEFAULT_UNDERLINE_DELIMITER: &str = "__";

/// Escape character of underline output. Delimiters must not start with it.
pub const UNDERLINE_ESCAPE: char = '\\';

/// A matched span that survived clamping and overlap checks.
pub type Span = (RuleId, Range<usize>);

/// Text strategy selected by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextStrategy {
    /// Replace the span with `[RULE_TOKEN]`
    #[default]
    Tokenize,
    /// Replace every character of the span with a filler character
    Mask,
    /// Wrap the span in a delimiter, leaving it readable
    Underline,
}

impl fmt::Display for TextStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TextStrategy::Tokenize => "tokenize",
            TextStrategy::Mask => "mask",
            TextStrategy::Underline => "underline",
        };
        f.write_str(name)
    }
}

impl FromStr for TextStrategy {
    type Err = RedactorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tokenize" => Ok(TextStrategy::Tokenize),
            "mask" => Ok(TextStrategy::Mask),
            "underline" => Ok(TextStrategy::Underline),
            other => Err(RedactorError::InvalidInput {
                parameter: "strategy".to_string(),
                reason: format!("expected tokenize, mask or underline, got '{}'", other),
            }),
        }
    }
}

/// What gets painted over matched regions of a PDF page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfAction {
    /// Opaque black fill; covered native text is also blanked
    #[default]
    Redact,
    /// Red outline around the region, text left in place
    Highlight,
}

impl fmt::Display for PdfAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PdfAction::Redact => "redact",
            PdfAction::Highlight => "highlight",
        })
    }
}

impl FromStr for PdfAction {
    type Err = RedactorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redact" => Ok(PdfAction::Redact),
            "highlight" => Ok(PdfAction::Highlight),
            other => Err(RedactorError::InvalidInput {
                parameter: "action".to_string(),
                reason: format!("expected redact or highlight, got '{}'", other),
            }),
        }
    }
}

/// Strategy for rewriting matched spans of a text.
///
/// Implementations must be pure: the same rule and span always produce
/// the same replacement.
pub trait RedactionStrategy: Send + Sync {
    /// Replacement for one matched span.
    fn replacement<'a>(&self, rule: RuleId, matched: &'a str) -> Cow<'a, str>;

    /// Writes `text` with every span replaced. Spans are sorted, disjoint
    /// and on character boundaries. Unmatched text is copied verbatim.
    fn splice(&self, text: &str, spans: &[Span]) -> String {
        let mut out = String::with_capacity(text.len() + spans.len() * 8);
        let mut cursor = 0;
        for (rule, range) in spans {
            out.push_str(&text[cursor..range.start]);
            out.push_str(&self.replacement(*rule, &text[range.clone()]));
            cursor = range.end;
        }
        out.push_str(&text[cursor..]);
        out
    }

    /// Returns a human-readable name for this strategy.
    fn name(&self) -> &str;

    /// Returns whether the original text can be recovered from the output.
    fn is_reversible(&self) -> bool;
}

/// `[EMAIL]`, `[CREDIT_CARD]`, ...
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenizeStrategy;

impl RedactionStrategy for TokenizeStrategy {
    fn replacement<'a>(&self, rule: RuleId, _matched: &'a str) -> Cow<'a, str> {
        Cow::Owned(format!("[{}]", rule.token()))
    }

    fn name(&self) -> &str {
        "tokenize"
    }

    fn is_reversible(&self) -> bool {
        false
    }
}

/// One filler character per character of the span.
#[derive(Debug, Clone, Copy)]
pub struct MaskStrategy {
    filler: char,
}

impl MaskStrategy {
    pub fn new(filler: char) -> Self {
        Self { filler }
    }
}

impl Default for MaskStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_MASK_CHAR)
    }
}

impl RedactionStrategy for MaskStrategy {
    fn replacement<'a>(&self, _rule: RuleId, matched: &'a str) -> Cow<'a, str> {
        Cow::Owned(std::iter::repeat(self.filler).take(matched.chars().count()).collect())
    }

    fn name(&self) -> &str {
        "mask"
    }

    fn is_reversible(&self) -> bool {
        false
    }
}

/// Wraps the span in a delimiter on both sides.
///
/// Text that would read as a delimiter, and backslashes that would read as
/// an escape, are prefixed with [`UNDERLINE_ESCAPE`] so that
/// [`strip_underline`] recovers the input exactly.
#[derive(Debug, Clone)]
pub struct UnderlineStrategy {
    delimiter: String,
}

enum Piece {
    Char(char),
    Mark,
}

impl UnderlineStrategy {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }

    /// Encodes back to front so each character sees the output after it.
    fn encode(&self, pieces: &[Piece]) -> String {
        let delimiter: Vec<char> = self.delimiter.chars().collect();
        let Some(&first) = delimiter.first() else {
            return pieces
                .iter()
                .filter_map(|piece| match piece {
                    Piece::Char(c) => Some(*c),
                    Piece::Mark => None,
                })
                .collect();
        };

        let mut reversed: Vec<char> = Vec::with_capacity(pieces.len() + 8);
        for piece in pieces.iter().rev() {
            match *piece {
                Piece::Mark => reversed.extend(delimiter.iter().rev()),
                Piece::Char(c) => {
                    let escape = if c == UNDERLINE_ESCAPE {
                        matches!(reversed.last(), Some(&next) if next == UNDERLINE_ESCAPE || next == first)
                    } else {
                        c == first && opens_delimiter(&reversed, &delimiter[1..])
                    };
                    reversed.push(c);
                    if escape {
                        reversed.push(UNDERLINE_ESCAPE);
                    }
                }
            }
        }
        reversed.into_iter().rev().collect()
    }
}

/// True when the output after the current position starts with `tail`.
fn opens_delimiter(reversed: &[char], tail: &[char]) -> bool {
    reversed.len() >= tail.len() && reversed.iter().rev().zip(tail).all(|(a, b)| a == b)
}

impl Default for UnderlineStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_UNDERLINE_DELIMITER)
    }
}

impl RedactionStrategy for UnderlineStrategy {
    fn replacement<'a>(&self, _rule: RuleId, matched: &'a str) -> Cow<'a, str> {
        Cow::Owned(format!("{0}{1}{0}", self.delimiter, matched))
    }

    fn splice(&self, text: &str, spans: &[Span]) -> String {
        let mut pieces = Vec::with_capacity(text.len() + spans.len() * 2);
        let mut cursor = 0;
        for (_, range) in spans {
            pieces.extend(text[cursor..range.start].chars().map(Piece::Char));
            pieces.push(Piece::Mark);
            pieces.extend(text[range.clone()].chars().map(Piece::Char));
            pieces.push(Piece::Mark);
            cursor = range.end;
        }
        pieces.extend(text[cursor..].chars().map(Piece::Char));
        self.encode(&pieces)
    }

    fn name(&self) -> &str {
        "underline"
    }

    fn is_reversible(&self) -> bool {
        true
    }
}

/// Splices the strategy's replacement into every applied match.
///
/// Offsets are clamped to the text and snapped down to character
/// boundaries; a match that starts before the end of the previous one is
/// skipped. When no span survives the text is returned unchanged.
pub fn apply(text: &str, matches: &[Detection], strategy: &dyn RedactionStrategy) -> String {
    let mut spans: Vec<Span> = Vec::with_capacity(matches.len());
    let mut cursor = 0;

    for m in matches {
        let start = floor_char_boundary(text, m.start);
        let end = floor_char_boundary(text, m.end);
        if start < cursor || end <= start {
            continue;
        }
        spans.push((m.rule, start..end));
        cursor = end;
    }

    if spans.is_empty() {
        return text.to_string();
    }
    strategy.splice(text, &spans)
}

/// Undoes the underline strategy: drops delimiters and resolves escapes.
pub fn strip_underline(text: &str, delimiter: &str) -> String {
    let Some(first) = delimiter.chars().next() else {
        return text.to_string();
    };

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        let after = &rest[c.len_utf8()..];
        if c == UNDERLINE_ESCAPE {
            if let Some(next) = after
                .chars()
                .next()
                .filter(|&n| n == UNDERLINE_ESCAPE || n == first)
            {
                out.push(next);
                rest = &after[next.len_utf8()..];
                continue;
            }
        } else if rest.starts_with(delimiter) {
            rest = &rest[delimiter.len()..];
            continue;
        }
        out.push(c);
        rest = after;
    }
    out
}

/// Builds strategies with the configured filler and delimiter.
#[derive(Debug, Clone)]
pub struct TextTransformer {
    mask_char: char,
    underline_delimiter: String,
}

impl TextTransformer {
    pub fn new(mask_char: char, underline_delimiter: impl Into<String>) -> Self {
        Self {
            mask_char,
            underline_delimiter: underline_delimiter.into(),
        }
    }

    pub fn strategy(&self, kind: TextStrategy) -> Box<dyn RedactionStrategy> {
        match kind {
            TextStrategy::Tokenize => Box::new(TokenizeStrategy),
            TextStrategy::Mask => Box::new(MaskStrategy::new(self.mask_char)),
            TextStrategy::Underline => {
                Box::new(UnderlineStrategy::new(self.underline_delimiter.clone()))
            }
        }
    }

    pub fn apply(&self, text: &str, matches: &[Detection], kind: TextStrategy) -> String {
        apply(text, matches, self.strategy(kind).as_ref())
    }

    /// Reverses [`TextStrategy::Underline`] output.
    pub fn strip_underline(&self, text: &str) -> String {
        strip_underline(text, &self.underline_delimiter)
    }

    pub fn underline_delimiter(&self) -> &str {
        &self.underline_delimiter
    }
}

impl Default for TextTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_MASK_CHAR, DEFAULT_UNDERLINE_DELIMITER)
    }
}
