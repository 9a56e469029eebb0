//! PDF backend built on lopdf.
//!
//! Interprets page content streams, including the Form XObjects they draw,
//! to recover positioned text runs and rewrites them to paint cover
//! rectangles. Strings are decoded through the fonts in the page resources.
//! Glyph widths are estimated from the font size since font metrics are not
//! loaded; covers are padded to absorb the error.

use std::collections::BTreeSet;

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, StringFormat};

use super::fonts::{stream_content, ContentResources, FontDecoder};
use super::positioned::{BoundingBox, CoverRect, CoveredOps, PositionedRun};
use super::strategy::PdfAction;
use crate::error::{RedactorError, RedactorResult};

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Share of the font size drawn below the baseline.
const DESCENT: f32 = 0.2;

/// TJ adjustments at or below this (thousandths of an em) read as a space.
const WORD_GAP: f32 = -250.0;

const HIGHLIGHT_LINE_WIDTH: f32 = 1.2;

/// Deepest chain of nested forms followed by `Do`.
const MAX_FORM_DEPTH: usize = 8;

/// Loads a PDF from memory, rejecting encrypted documents.
pub fn load_document(bytes: &[u8]) -> RedactorResult<Document> {
    let doc = Document::load_mem(bytes).map_err(|e| RedactorError::TextExtraction {
        reason: format!("unreadable PDF: {}", e),
    })?;
    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(RedactorError::TextExtraction {
            reason: "document is encrypted".to_string(),
        });
    }
    Ok(doc)
}

/// Page object ids in page order.
pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

/// Positioned runs drawn by one page's content stream.
pub fn extract_page_runs(
    doc: &Document,
    page_index: usize,
    page_id: ObjectId,
) -> RedactorResult<Vec<PositionedRun>> {
    let data = doc
        .get_page_content(page_id)
        .map_err(|e| page_error(page_index, "cannot read content stream", e))?;
    let content =
        Content::decode(&data).map_err(|e| page_error(page_index, "cannot decode content", e))?;
    let resources = ContentResources::for_page(doc, page_id);
    Ok(interpret_with_resources(
        Some(doc),
        page_index,
        &content.operations,
        &resources,
    ))
}

/// Whole-document plain text via pdf-extract.
pub fn extract_plain_text(bytes: &[u8]) -> RedactorResult<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| RedactorError::TextExtraction {
        reason: e.to_string(),
    })
}

fn page_error(page_index: usize, message: &str, err: lopdf::Error) -> RedactorError {
    RedactorError::PdfProcessing {
        message: message.to_string(),
        page: Some(page_index + 1),
        source: Some(Box::new(err)),
    }
}

fn get_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

fn numbers<const N: usize>(operands: &[Object]) -> Option<[f32; N]> {
    if operands.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, obj) in out.iter_mut().zip(operands) {
        *slot = get_number(obj)?;
    }
    Some(out)
}

/// `m1` then `m2`, in PDF row-vector convention.
fn multiply(m1: &Matrix, m2: &Matrix) -> Matrix {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

fn translate(tx: f32, ty: f32, m: &Matrix) -> Matrix {
    multiply(&[1.0, 0.0, 0.0, 1.0, tx, ty], m)
}

fn estimate_char_width(c: char, font_size: f32) -> f32 {
    if c.is_ascii() {
        font_size * 0.55
    } else {
        font_size * 1.0
    }
}

/// Decoded text of one string operand and its advance in text space.
fn measure(
    bytes: &[u8],
    font: &FontDecoder,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
) -> (String, f32) {
    let text = font.decode(bytes);
    let glyphs: f32 = text.chars().map(|c| estimate_char_width(c, font_size)).sum();
    let codes = bytes.len().div_ceil(font.code_width());
    // Word spacing only applies to single-byte code 32
    let spaces = if font.is_composite() {
        0
    } else {
        bytes.iter().filter(|&&b| b == b' ').count()
    };
    let width = glyphs + codes as f32 * char_spacing + spaces as f32 * word_spacing;
    (text, width)
}

#[derive(Debug, Clone)]
struct TextState {
    ctm: Matrix,
    text_matrix: Matrix,
    line_matrix: Matrix,
    font: Vec<u8>,
    font_size: f32,
    leading: f32,
    char_spacing: f32,
    word_spacing: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            ctm: IDENTITY,
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            font: Vec::new(),
            font_size: 12.0,
            leading: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
        }
    }
}

impl TextState {
    fn next_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = translate(tx, ty, &self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    /// Box for `advance` text-space units drawn at the current position.
    fn run_box(&self, advance: f32) -> BoundingBox {
        let m = multiply(&self.text_matrix, &self.ctm);
        let scale_x = (m[0] * m[0] + m[1] * m[1]).sqrt();
        let scale_y = (m[2] * m[2] + m[3] * m[3]).sqrt();
        let height = self.font_size * scale_y;
        BoundingBox::new(m[4], m[5] - DESCENT * height, advance * scale_x, height)
    }

    fn advance(&mut self, tx: f32) {
        self.text_matrix = translate(tx, 0.0, &self.text_matrix);
    }

    /// Shows one string, returning its run text and box.
    fn show(&mut self, bytes: &[u8], font: &FontDecoder) -> (String, BoundingBox) {
        let (text, width) = measure(
            bytes,
            font,
            self.font_size,
            self.char_spacing,
            self.word_spacing,
        );
        let bbox = self.run_box(width);
        self.advance(width);
        (text, bbox)
    }

    /// Shows a TJ array as a single run.
    fn show_array(&mut self, items: &[Object], font: &FontDecoder) -> (String, BoundingBox) {
        let start = self.run_box(0.0);
        let mut text = String::new();
        let mut total = 0.0;

        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let (piece, width) = measure(
                        bytes,
                        font,
                        self.font_size,
                        self.char_spacing,
                        self.word_spacing,
                    );
                    text.push_str(&piece);
                    total += width;
                }
                other => {
                    if let Some(adjustment) = get_number(other) {
                        if adjustment <= WORD_GAP && !text.ends_with(' ') {
                            text.push(' ');
                        }
                        total -= adjustment / 1000.0 * self.font_size;
                    }
                }
            }
        }

        let end = self.run_box(total);
        self.advance(total);
        let bbox = BoundingBox::new(start.x, start.y, end.width.max(0.0), start.height);
        (text, bbox)
    }

    /// Restores what `Q` restores; the text matrices are not part of the
    /// saved graphics state.
    fn restore(&mut self, saved: TextState) {
        *self = TextState {
            text_matrix: self.text_matrix,
            line_matrix: self.line_matrix,
            ..saved
        };
    }
}

/// Collects runs from a content stream and the forms it draws.
struct Interpreter<'a> {
    doc: Option<&'a Document>,
    page_index: usize,
    runs: Vec<PositionedRun>,
    /// Forms currently being interpreted, outermost first.
    forms: Vec<ObjectId>,
}

impl<'a> Interpreter<'a> {
    fn new(doc: Option<&'a Document>, page_index: usize) -> Self {
        Self {
            doc,
            page_index,
            runs: Vec::new(),
            forms: Vec::new(),
        }
    }

    fn interpret(
        &mut self,
        operations: &[Operation],
        resources: &ContentResources,
        mut state: TextState,
    ) {
        let fallback = FontDecoder::simple();
        let mut stack: Vec<TextState> = Vec::new();
        let mut in_text = false;

        for (op_index, op) in operations.iter().enumerate() {
            let operands = op.operands.as_slice();
            let font = resources.fonts.get(&state.font).unwrap_or(&fallback);
            let shown = match op.operator.as_str() {
                "q" => {
                    stack.push(state.clone());
                    None
                }
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        state.restore(saved);
                    }
                    None
                }
                "cm" => {
                    if let Some(m) = numbers::<6>(operands) {
                        state.ctm = multiply(&m, &state.ctm);
                    }
                    None
                }
                "Do" if !in_text => {
                    if let Some(Ok(name)) = operands.first().map(Object::as_name) {
                        self.draw_form(name, resources, &state);
                    }
                    None
                }
                "BT" => {
                    in_text = true;
                    state.text_matrix = IDENTITY;
                    state.line_matrix = IDENTITY;
                    None
                }
                "ET" => {
                    in_text = false;
                    None
                }
                "Tf" => {
                    if let Some(Ok(name)) = operands.first().map(Object::as_name) {
                        state.font = name.to_vec();
                    }
                    if let Some(size) = operands.get(1).and_then(get_number) {
                        state.font_size = size.abs();
                    }
                    None
                }
                "TL" => {
                    if let Some([leading]) = numbers::<1>(operands) {
                        state.leading = leading;
                    }
                    None
                }
                "Tc" => {
                    if let Some([spacing]) = numbers::<1>(operands) {
                        state.char_spacing = spacing;
                    }
                    None
                }
                "Tw" => {
                    if let Some([spacing]) = numbers::<1>(operands) {
                        state.word_spacing = spacing;
                    }
                    None
                }
                "Tm" if in_text => {
                    if let Some(m) = numbers::<6>(operands) {
                        state.text_matrix = m;
                        state.line_matrix = m;
                    }
                    None
                }
                "Td" if in_text => {
                    if let Some([tx, ty]) = numbers::<2>(operands) {
                        state.next_line(tx, ty);
                    }
                    None
                }
                "TD" if in_text => {
                    if let Some([tx, ty]) = numbers::<2>(operands) {
                        state.leading = -ty;
                        state.next_line(tx, ty);
                    }
                    None
                }
                "T*" if in_text => {
                    state.next_line(0.0, -state.leading);
                    None
                }
                "Tj" if in_text => match operands.first() {
                    Some(Object::String(bytes, _)) => Some(state.show(bytes, font)),
                    _ => None,
                },
                "'" if in_text => {
                    state.next_line(0.0, -state.leading);
                    match operands.first() {
                        Some(Object::String(bytes, _)) => Some(state.show(bytes, font)),
                        _ => None,
                    }
                }
                "\"" if in_text => {
                    if let Some([word, chars]) = numbers::<2>(operands) {
                        state.word_spacing = word;
                        state.char_spacing = chars;
                    }
                    state.next_line(0.0, -state.leading);
                    match operands.get(2) {
                        Some(Object::String(bytes, _)) => Some(state.show(bytes, font)),
                        _ => None,
                    }
                }
                "TJ" if in_text => match operands.first() {
                    Some(Object::Array(items)) => Some(state.show_array(items, font)),
                    _ => None,
                },
                _ => None,
            };

            if let Some((text, bbox)) = shown {
                if !text.is_empty() {
                    let mut run =
                        PositionedRun::new(self.page_index, text, bbox).with_op_index(op_index);
                    if let Some(&form) = self.forms.last() {
                        run = run.with_form(form);
                    }
                    self.runs.push(run);
                }
            }
        }
    }

    /// Interprets a Form XObject drawn by `Do`. Images, cycles and forms
    /// nested deeper than [`MAX_FORM_DEPTH`] are skipped.
    fn draw_form(&mut self, name: &[u8], resources: &ContentResources, state: &TextState) {
        let Some(doc) = self.doc else { return };
        let Some(&id) = resources.xobjects.get(name) else {
            return;
        };
        if self.forms.len() >= MAX_FORM_DEPTH || self.forms.contains(&id) {
            return;
        }
        let Some(form) = load_form(doc, id) else {
            return;
        };

        let own_resources = form
            .stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|obj| doc.dereference(obj).ok())
            .and_then(|(_, obj)| obj.as_dict().ok())
            .map(|dict| ContentResources::collect(doc, &[dict]));

        let mut form_state = state.clone();
        form_state.ctm = multiply(&form.matrix, &state.ctm);

        self.forms.push(id);
        self.interpret(
            &form.operations,
            own_resources.as_ref().unwrap_or(resources),
            form_state,
        );
        self.forms.pop();
    }
}

struct Form<'a> {
    stream: &'a Stream,
    matrix: Matrix,
    operations: Vec<Operation>,
}

fn load_form(doc: &Document, id: ObjectId) -> Option<Form<'_>> {
    let stream = doc.get_object(id).ok()?.as_stream().ok()?;
    let subtype = stream.dict.get(b"Subtype").and_then(Object::as_name).ok()?;
    if subtype != b"Form" {
        return None;
    }
    let matrix = match stream.dict.get(b"Matrix").and_then(Object::as_array) {
        Ok(values) => numbers::<6>(values)?,
        Err(_) => IDENTITY,
    };
    let data = stream_content(stream)?;
    match Content::decode(&data) {
        Ok(content) => Some(Form {
            stream,
            matrix,
            operations: content.operations,
        }),
        Err(e) => {
            tracing::warn!(object = ?id, error = %e, "Skipping undecodable form");
            None
        }
    }
}

/// Walks content-stream operations and collects one run per text-showing
/// operation. Fonts are treated as simple and forms are not followed.
pub fn interpret_content(page_index: usize, operations: &[Operation]) -> Vec<PositionedRun> {
    interpret_with_resources(None, page_index, operations, &ContentResources::default())
}

/// Like [`interpret_content`], decoding strings through `resources` and
/// following `Do` into forms found in `doc`.
pub fn interpret_with_resources(
    doc: Option<&Document>,
    page_index: usize,
    operations: &[Operation],
    resources: &ContentResources,
) -> Vec<PositionedRun> {
    let mut interpreter = Interpreter::new(doc, page_index);
    interpreter.interpret(operations, resources, TextState::default());
    interpreter.runs
}

fn blank_string(obj: &Object, font: &FontDecoder) -> Object {
    match obj {
        Object::String(bytes, format) => Object::String(font.blank(bytes), *format),
        other => other.clone(),
    }
}

/// Replaces every glyph of a text-showing operation with one that draws
/// nothing readable.
fn blank_operation(op: &Operation, font: &FontDecoder) -> Operation {
    let operands = match op.operator.as_str() {
        "Tj" | "'" => op.operands.iter().map(|obj| blank_string(obj, font)).collect(),
        "\"" => op
            .operands
            .iter()
            .enumerate()
            .map(|(i, obj)| {
                if i == 2 {
                    blank_string(obj, font)
                } else {
                    obj.clone()
                }
            })
            .collect(),
        "TJ" => op
            .operands
            .iter()
            .map(|obj| match obj {
                Object::Array(items) => Object::Array(
                    items.iter().map(|item| blank_string(item, font)).collect(),
                ),
                other => other.clone(),
            })
            .collect(),
        _ => op.operands.clone(),
    };
    Operation::new(op.operator.as_str(), operands)
}

/// Copies `operations`, blanking the indices in `covered` with the font
/// selected at that point.
fn blank_covered(
    operations: &[Operation],
    covered: &BTreeSet<usize>,
    resources: &ContentResources,
) -> Vec<Operation> {
    let fallback = FontDecoder::simple();
    let mut font: Vec<u8> = Vec::new();
    let mut saved: Vec<Vec<u8>> = Vec::new();

    operations
        .iter()
        .enumerate()
        .map(|(i, op)| {
            match op.operator.as_str() {
                "q" => saved.push(font.clone()),
                "Q" => font = saved.pop().unwrap_or_default(),
                "Tf" => {
                    if let Some(Ok(name)) = op.operands.first().map(Object::as_name) {
                        font = name.to_vec();
                    }
                }
                _ => {}
            }
            if covered.contains(&i) {
                blank_operation(op, resources.fonts.get(&font).unwrap_or(&fallback))
            } else {
                op.clone()
            }
        })
        .collect()
}

fn real(v: f32) -> Object {
    Object::Real(v)
}

fn cover_operations(covers: &[CoverRect], action: PdfAction) -> Vec<Operation> {
    let mut ops = vec![Operation::new("q", vec![])];
    match action {
        PdfAction::Redact => {
            ops.push(Operation::new("rg", vec![real(0.0), real(0.0), real(0.0)]));
        }
        PdfAction::Highlight => {
            ops.push(Operation::new("RG", vec![real(1.0), real(0.0), real(0.0)]));
            ops.push(Operation::new("w", vec![real(HIGHLIGHT_LINE_WIDTH)]));
        }
    }

    for cover in covers {
        let b = cover.bbox;
        ops.push(Operation::new(
            "re",
            vec![real(b.x), real(b.y), real(b.width), real(b.height)],
        ));
        ops.push(Operation::new(
            match action {
                PdfAction::Redact => "f",
                PdfAction::Highlight => "S",
            },
            vec![],
        ));
    }

    ops.push(Operation::new("Q", vec![]));
    ops
}

/// Blanks covered operations inside a form's own content stream.
fn blank_form(
    doc: &mut Document,
    page_index: usize,
    form_id: ObjectId,
    covered: &BTreeSet<usize>,
    page_resources: &ContentResources,
) -> RedactorResult<()> {
    let encoded = {
        let Some(form) = load_form(doc, form_id) else {
            return Ok(());
        };
        let resources = form
            .stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|obj| doc.dereference(obj).ok())
            .and_then(|(_, obj)| obj.as_dict().ok())
            .map(|dict| ContentResources::collect(doc, &[dict]));
        let operations = blank_covered(
            &form.operations,
            covered,
            resources.as_ref().unwrap_or(page_resources),
        );
        Content { operations }
            .encode()
            .map_err(|e| page_error(page_index, "cannot encode form content", e))?
    };

    doc.get_object_mut(form_id)
        .and_then(Object::as_stream_mut)
        .map_err(|e| page_error(page_index, "form stream missing", e))?
        .set_plain_content(encoded);
    Ok(())
}

/// Rewrites one page: blanks covered text when redacting and paints covers
/// on top of the original content.
pub fn paint_page(
    doc: &mut Document,
    page_index: usize,
    page_id: ObjectId,
    covers: &[CoverRect],
    covered_ops: &CoveredOps,
    action: PdfAction,
) -> RedactorResult<()> {
    if covers.is_empty() {
        return Ok(());
    }

    let data = doc
        .get_page_content(page_id)
        .map_err(|e| page_error(page_index, "cannot read content stream", e))?;
    let content =
        Content::decode(&data).map_err(|e| page_error(page_index, "cannot decode content", e))?;

    let mut operations = Vec::with_capacity(content.operations.len() + covers.len() * 2 + 6);
    operations.push(Operation::new("q", vec![]));
    if action == PdfAction::Redact {
        let resources = ContentResources::for_page(doc, page_id);
        operations.extend(blank_covered(
            &content.operations,
            &covered_ops.page,
            &resources,
        ));
        for (form_id, covered) in &covered_ops.forms {
            blank_form(doc, page_index, *form_id, covered, &resources)?;
        }
    } else {
        operations.extend(content.operations);
    }
    operations.push(Operation::new("Q", vec![]));
    operations.extend(cover_operations(covers, action));

    let encoded = Content { operations }
        .encode()
        .map_err(|e| page_error(page_index, "cannot encode content", e))?;

    let stream_id = doc.add_object(Stream::new(lopdf::Dictionary::new(), encoded));
    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| page_error(page_index, "page dictionary missing", e))?;
    page.set("Contents", stream_id);

    tracing::debug!(
        page = page_index,
        covers = covers.len(),
        blanked = covered_ops.len(),
        forms = covered_ops.forms.len(),
        %action,
        "Page painted"
    );
    Ok(())
}

/// Serializes the document, dropping content streams no page references.
pub fn save_document(doc: &mut Document) -> RedactorResult<Vec<u8>> {
    doc.prune_objects();
    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(|e| RedactorError::PdfProcessing {
        message: "cannot serialize document".to_string(),
        page: None,
        source: Some(Box::new(e)),
    })?;
    Ok(out)
}

/// Literal string operand, used by tests and fixtures.
pub fn literal(text: &str) -> Object {
    Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
}
