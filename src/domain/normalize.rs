//! Text normalization for validation.
//!
//! Detection always runs on the original text so that offsets stay valid.
//! Normalization is only applied to matched values before they are
//! validated or reported back to a caller.

use once_cell::sync::Lazy;
use regex::Regex;

use super::RuleId;

/// Typographic ligatures emitted by some PDF producers.
const LIGATURES: &[(&str, &str)] = &[
    ("\u{FB00}", "ff"),
    ("\u{FB01}", "fi"),
    ("\u{FB02}", "fl"),
    ("\u{FB03}", "ffi"),
    ("\u{FB04}", "ffl"),
    ("\u{FB05}", "ft"),
    ("\u{FB06}", "st"),
];

fn whitespace() -> &'static Regex {
    static PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Valid regex"));
    &PATTERN
}

fn separators() -> &'static Regex {
    static PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-./]+").expect("Valid regex"));
    &PATTERN
}

/// Folds ligatures, joins hyphenated line breaks and collapses whitespace.
pub fn normalize_full(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut folded = text.to_string();
    for (ligature, replacement) in LIGATURES {
        if folded.contains(ligature) {
            folded = folded.replace(ligature, replacement);
        }
    }
    let joined = folded.replace("-\n", "");

    whitespace().replace_all(&joined, " ").trim().to_string()
}

/// Removes spaces, hyphens, dots and slashes.
pub fn strip_separators(text: &str) -> String {
    separators().replace_all(text, "").into_owned()
}

/// Clamps `index` into `[0, text.len()]` and moves it down to the nearest
/// character boundary.
pub fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Clamps `index` into `[0, text.len()]` and moves it up to the nearest
/// character boundary.
pub fn ceil_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Normalizes a matched value the way its validator expects it.
///
/// Numeric identifiers lose their separators; every other type only gets
/// the full normalization.
pub fn normalize_for_validation(text: &str, rule: RuleId) -> String {
    let text = normalize_full(text);
    match rule {
        RuleId::Iban
        | RuleId::CreditCard
        | RuleId::Dni
        | RuleId::Nie
        | RuleId::Cif
        | RuleId::Phone
        | RuleId::Ssn => strip_separators(&text).to_ascii_uppercase(),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_full() {
        assert_eq!(normalize_full("  of\u{FB01}ce   hours \n"), "office hours");
        assert_eq!(normalize_full("identi-\nfication"), "identification");
        assert_eq!(normalize_full(""), "");
    }

    #[test]
    fn test_char_boundaries() {
        let text = "añb";
        assert_eq!(floor_char_boundary(text, 2), 1);
        assert_eq!(ceil_char_boundary(text, 2), 3);
        assert_eq!(floor_char_boundary(text, 99), text.len());
    }

    #[test]
    fn test_normalize_for_validation() {
        assert_eq!(
            normalize_for_validation("es91 2100-0418 4502 0005 1332", RuleId::Iban),
            "ES9121000418450200051332"
        );
        assert_eq!(
            normalize_for_validation("Jane  Doe", RuleId::FullName),
            "Jane Doe"
        );
    }
}
