//! Custom assertions for PDF redaction testing.
//!
//! These read content streams with lopdf directly instead of going through
//! the crate's own interpreter, so a broken interpreter cannot hide a leak.

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object};

/// Operations of every page, in page order.
pub fn page_operations(pdf: &[u8]) -> Vec<Vec<Operation>> {
    let doc = Document::load_mem(pdf).expect("output should be a loadable PDF");
    doc.get_pages()
        .into_values()
        .map(|page_id| {
            let data = doc
                .get_page_content(page_id)
                .expect("page content should be readable");
            Content::decode(&data)
                .expect("page content should decode")
                .operations
        })
        .collect()
}

/// Text shown by every Form XObject in the document.
pub fn form_texts(pdf: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(pdf).expect("output should be a loadable PDF");
    doc.objects
        .values()
        .filter_map(|object| object.as_stream().ok())
        .filter(|stream| {
            stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .map(|name| name == b"Form")
                .unwrap_or(false)
        })
        .map(|stream| {
            let data = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            let content = Content::decode(&data).expect("form content should decode");
            shown_text(&content.operations)
        })
        .collect()
}

/// Strings shown by `Tj` on one page, in drawing order.
pub fn tj_strings(operations: &[Operation]) -> Vec<Vec<u8>> {
    operations
        .iter()
        .filter(|op| op.operator == "Tj")
        .filter_map(|op| match op.operands.first() {
            Some(Object::String(bytes, _)) => Some(bytes.clone()),
            _ => None,
        })
        .collect()
}

/// Every string shown by `Tj`, `TJ`, `'` and `"` on one page, concatenated.
pub fn shown_text(operations: &[Operation]) -> String {
    let mut text = String::new();
    for op in operations {
        match op.operator.as_str() {
            "Tj" | "'" | "\"" | "TJ" => {
                for operand in &op.operands {
                    collect_strings(operand, &mut text);
                }
            }
            _ => {}
        }
    }
    text
}

fn collect_strings(object: &Object, out: &mut String) {
    match object {
        Object::String(bytes, _) => out.extend(bytes.iter().map(|&b| b as char)),
        Object::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

/// Rectangles (`x, y, w, h`) drawn by `re` operators on one page.
pub fn rectangles(operations: &[Operation]) -> Vec<[f32; 4]> {
    operations
        .iter()
        .filter(|op| op.operator == "re")
        .filter_map(|op| {
            let values: Vec<f32> = op
                .operands
                .iter()
                .filter_map(|o| match o {
                    Object::Integer(i) => Some(*i as f32),
                    Object::Real(r) => Some(*r),
                    _ => None,
                })
                .collect();
            (values.len() == 4).then(|| [values[0], values[1], values[2], values[3]])
        })
        .collect()
}

/// Counts operations with the given operator.
pub fn count_operator(operations: &[Operation], operator: &str) -> usize {
    operations.iter().filter(|op| op.operator == operator).count()
}

/// Asserts that `pattern` is not drawn anywhere in the document.
///
/// # Panics
/// Panics if any page still shows the pattern.
pub fn assert_redacted(pdf: &[u8], pattern: &str) {
    for (index, operations) in page_operations(pdf).iter().enumerate() {
        let text = shown_text(operations);
        assert!(
            !text.contains(pattern),
            "Pattern '{}' should be redacted but is still shown on page {}: {:?}",
            pattern,
            index + 1,
            text
        );
    }
}

/// Asserts that `pattern` is still drawn somewhere in the document.
///
/// # Panics
/// Panics if no page shows the pattern.
pub fn assert_preserved(pdf: &[u8], pattern: &str) {
    let found = page_operations(pdf)
        .iter()
        .any(|operations| shown_text(operations).contains(pattern));
    assert!(found, "Pattern '{}' should be preserved", pattern);
}

/// Asserts that the rectangle `outer` contains the box `inner`.
///
/// # Panics
/// Panics if any edge of `inner` lies outside `outer`.
pub fn assert_covers(outer: [f32; 4], inner: [f32; 4]) {
    let eps = 1e-3;
    let [ox, oy, ow, oh] = outer;
    let [ix, iy, iw, ih] = inner;
    assert!(
        ox <= ix + eps && oy <= iy + eps && ox + ow + eps >= ix + iw && oy + oh + eps >= iy + ih,
        "cover {:?} does not contain {:?}",
        outer,
        inner
    );
}
