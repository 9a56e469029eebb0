//! Test fixtures and PDF builders.
//!
//! [`PdfFixture`] writes one `BT Tf Td Tj ET` block per line with lopdf, so
//! tests know exactly where every run is drawn. [`PrintPdfBuilder`] goes
//! through printpdf for a document shaped like real producer output.

use anyhow::Result;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// How a line's glyphs reach the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Literal string in a Helvetica WinAnsi font.
    Simple,
    /// Hex string of two-byte codes in a `Type0` Identity-H font that is
    /// only readable through its `ToUnicode` CMap.
    Cid,
    /// Same codes in a `Type0` font without `ToUnicode`, so no reader can
    /// recover the text.
    UnmappedCid,
    /// Simple line inside a Form XObject drawn with `Do`.
    Form,
}

/// One line of text drawn at a fixed position.
#[derive(Debug, Clone)]
pub struct TextLine {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub text: String,
    pub kind: LineKind,
}

/// Codes of the `Type0` fixture font: printable ASCII shifted to 0x0120..
const CID_OFFSET: u16 = 0x0100;

const CID_TO_UNICODE: &str = "/CIDInit /ProcSet findresource begin\n\
    12 dict begin\n\
    begincmap\n\
    /CMapName /Fixture-UCS def\n\
    1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n\
    1 beginbfrange\n<0120> <017E> <0020>\nendbfrange\n\
    endcmap\n\
    CMapName currentdict /CMap defineresource pop\n\
    end\nend\n";

fn cid_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .flat_map(|c| (CID_OFFSET + c as u16).to_be_bytes())
        .collect()
}

fn text_block(line: &TextLine, font: &str, shown: Object) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(font.as_bytes().to_vec()), Object::Real(line.size)],
        ),
        Operation::new("Td", vec![Object::Real(line.x), Object::Real(line.y)]),
        Operation::new("Tj", vec![shown]),
        Operation::new("ET", vec![]),
    ]
}

/// Builder for PDFs with text at known coordinates.
///
/// # Example
///
/// ```no_run
/// # use anyhow::Result;
/// # fn main() -> Result<()> {
/// let bytes = PdfFixture::new()
///     .line(72.0, 700.0, "Email: jane@example.com")
///     .page()
///     .line(72.0, 700.0, "Second page")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PdfFixture {
    pages: Vec<Vec<TextLine>>,
}

impl PdfFixture {
    /// Creates a builder with one empty page.
    pub fn new() -> Self {
        Self {
            pages: vec![Vec::new()],
        }
    }

    /// Starts a new page.
    pub fn page(mut self) -> Self {
        self.pages.push(Vec::new());
        self
    }

    /// Adds a 12pt line to the current page.
    pub fn line(self, x: f32, y: f32, text: &str) -> Self {
        self.line_sized(x, y, 12.0, text)
    }

    pub fn line_sized(self, x: f32, y: f32, size: f32, text: &str) -> Self {
        self.push(x, y, size, text, LineKind::Simple)
    }

    /// Adds a 12pt line shown through a `Type0` font as a hex string.
    /// `text` must be printable ASCII.
    pub fn cid_line(self, x: f32, y: f32, text: &str) -> Self {
        self.push(x, y, 12.0, text, LineKind::Cid)
    }

    /// Like [`PdfFixture::cid_line`] through a font with no `ToUnicode`.
    pub fn unmapped_cid_line(self, x: f32, y: f32, text: &str) -> Self {
        self.push(x, y, 12.0, text, LineKind::UnmappedCid)
    }

    /// Adds a 12pt line drawn by a Form XObject.
    pub fn form_line(self, x: f32, y: f32, text: &str) -> Self {
        self.push(x, y, 12.0, text, LineKind::Form)
    }

    fn push(mut self, x: f32, y: f32, size: f32, text: &str, kind: LineKind) -> Self {
        if let Some(page) = self.pages.last_mut() {
            page.push(TextLine {
                x,
                y,
                size,
                text: text.to_string(),
                kind,
            });
        }
        self
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Serializes the document.
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let to_unicode_id = doc.add_object(Stream::new(
            dictionary! {},
            CID_TO_UNICODE.as_bytes().to_vec(),
        ));
        let cid_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => "Fixture-Sans",
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::Dictionary(dictionary! {
                "Type" => "Font",
                "Subtype" => "CIDFontType2",
                "BaseFont" => "Fixture-Sans",
                "CIDSystemInfo" => dictionary! {
                    "Registry" => Object::string_literal("Adobe"),
                    "Ordering" => Object::string_literal("Identity"),
                    "Supplement" => Object::Integer(0),
                },
                "DW" => Object::Integer(600),
            })],
            "ToUnicode" => to_unicode_id,
        });
        let unmapped_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => "Fixture-Sans",
            "Encoding" => "Identity-H",
        });
        let fonts_id = doc.add_object(dictionary! {
            "F1" => font_id,
            "F2" => cid_font_id,
            "F3" => unmapped_font_id,
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => fonts_id,
        });

        let mut kids = Vec::with_capacity(self.pages.len());
        for lines in &self.pages {
            let mut operations = Vec::new();
            let mut xobjects = lopdf::Dictionary::new();
            for line in lines {
                match line.kind {
                    LineKind::Simple => operations.extend(text_block(
                        line,
                        "F1",
                        Object::String(line.text.as_bytes().to_vec(), StringFormat::Literal),
                    )),
                    LineKind::Cid => operations.extend(text_block(
                        line,
                        "F2",
                        Object::String(cid_bytes(&line.text), StringFormat::Hexadecimal),
                    )),
                    LineKind::UnmappedCid => operations.extend(text_block(
                        line,
                        "F3",
                        Object::String(cid_bytes(&line.text), StringFormat::Hexadecimal),
                    )),
                    LineKind::Form => {
                        let form = Content {
                            operations: text_block(
                                line,
                                "F1",
                                Object::String(
                                    line.text.as_bytes().to_vec(),
                                    StringFormat::Literal,
                                ),
                            ),
                        };
                        let form_id = doc.add_object(Stream::new(
                            dictionary! {
                                "Type" => "XObject",
                                "Subtype" => "Form",
                                "BBox" => vec![
                                    Object::Integer(0),
                                    Object::Integer(0),
                                    Object::Integer(595),
                                    Object::Integer(842),
                                ],
                                "Resources" => resources_id,
                            },
                            form.encode()?,
                        ));
                        let name = format!("Fm{}", xobjects.len() + 1);
                        operations.push(Operation::new(
                            "Do",
                            vec![Object::Name(name.as_bytes().to_vec())],
                        ));
                        xobjects.set(name, form_id);
                    }
                }
            }
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            };
            if !xobjects.is_empty() {
                page.set(
                    "Resources",
                    dictionary! {
                        "Font" => fonts_id,
                        "XObject" => xobjects,
                    },
                );
            }
            let page_id = doc.add_object(page);
            kids.push(Object::Reference(page_id));
        }

        let pages = dictionary! {
            "Type" => "Pages",
            "Count" => Object::Integer(kids.len() as i64),
            "Kids" => kids,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out)?;
        Ok(out)
    }

    /// Builds the PDF and writes it to `path`.
    pub fn write(&self, path: &Path) -> Result<PathBuf> {
        fs::write(path, self.build()?)?;
        Ok(path.to_path_buf())
    }
}

impl Default for PdfFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Two-page customer statement with one email, one phone and one card.
pub fn statement_fixture() -> PdfFixture {
    PdfFixture::new()
        .line(72.0, 760.0, "Customer statement")
        .line(72.0, 700.0, "Email: jane@example.com")
        .line(72.0, 680.0, "Reference number 42")
        .page()
        .line(72.0, 700.0, "Call 555-123-4567 for support")
        .line(72.0, 680.0, "Card 4111111111111111 on file")
}

/// Builder for PDFs generated through printpdf.
#[derive(Debug, Clone)]
pub struct PrintPdfBuilder {
    title: String,
    lines: Vec<String>,
}

impl PrintPdfBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn with_line(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    /// Builds the PDF and writes it to the specified path.
    pub fn build(self, output_path: &Path) -> Result<PathBuf> {
        use printpdf::{BuiltinFont, Mm, PdfDocument};

        let (doc, page1, layer1) = PdfDocument::new(&self.title, Mm(210.0), Mm(297.0), "Layer 1");
        let current_layer = doc.get_page(page1).get_layer(layer1);
        let font = doc.add_builtin_font(BuiltinFont::Helvetica)?;

        current_layer.use_text(self.title.as_str(), 14.0, Mm(20.0), Mm(270.0), &font);
        for (i, line) in self.lines.iter().enumerate() {
            let y = 255.0 - 10.0 * i as f32;
            current_layer.use_text(line.as_str(), 12.0, Mm(20.0), Mm(y), &font);
        }

        doc.save(&mut BufWriter::new(fs::File::create(output_path)?))?;
        Ok(output_path.to_path_buf())
    }
}
