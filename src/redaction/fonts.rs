//! Font decoding and content-stream resources.
//!
//! Simple fonts map one byte to one character. Composite (`Type0`) fonts
//! use two-byte codes that only mean something through the font's
//! `ToUnicode` CMap; codes without a mapping decode to U+FFFD so the page
//! reads as unreadable instead of as garbage text.

use std::collections::{BTreeMap, HashMap};
use std::panic;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

/// Font resource name to decoder.
pub type FontMap = BTreeMap<Vec<u8>, FontDecoder>;

/// Turns the string operands of one font into text.
#[derive(Debug, Clone, PartialEq)]
pub struct FontDecoder {
    code_width: usize,
    to_unicode: HashMap<u32, String>,
}

impl Default for FontDecoder {
    fn default() -> Self {
        Self::simple()
    }
}

impl FontDecoder {
    /// One byte per character, no CMap.
    pub fn simple() -> Self {
        Self {
            code_width: 1,
            to_unicode: HashMap::new(),
        }
    }

    /// Two-byte codes with the given code-to-text map.
    pub fn composite(to_unicode: HashMap<u32, String>) -> Self {
        Self {
            code_width: 2,
            to_unicode,
        }
    }

    /// Reads a font dictionary: `Type0` fonts get two-byte codes and any
    /// font with a parseable `ToUnicode` stream gets its map.
    pub fn from_dictionary(doc: &Document, font: &Dictionary) -> Self {
        let composite = font
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|name| name == b"Type0")
            .unwrap_or(false);

        let to_unicode = font
            .get(b"ToUnicode")
            .ok()
            .and_then(|obj| doc.dereference(obj).ok())
            .and_then(|(_, obj)| obj.as_stream().ok())
            .and_then(stream_content)
            .map(|data| parse_to_unicode(&data))
            .unwrap_or_default();

        Self {
            code_width: if composite { 2 } else { 1 },
            to_unicode,
        }
    }

    pub fn is_composite(&self) -> bool {
        self.code_width == 2
    }

    /// Bytes per character code.
    pub fn code_width(&self) -> usize {
        self.code_width
    }

    fn codes<'a>(&self, bytes: &'a [u8]) -> impl Iterator<Item = u32> + 'a {
        bytes
            .chunks(self.code_width)
            .map(|chunk| chunk.iter().fold(0u32, |code, &b| (code << 8) | u32::from(b)))
    }

    /// Decodes a string operand.
    pub fn decode(&self, bytes: &[u8]) -> String {
        if !self.is_composite() && self.to_unicode.is_empty() {
            return decode_pdf_string(bytes);
        }

        let mut text = String::with_capacity(bytes.len());
        for code in self.codes(bytes) {
            match self.to_unicode.get(&code) {
                Some(mapped) => text.push_str(mapped),
                None if !self.is_composite() => text.push(char::from(code as u8)),
                None => text.push(char::REPLACEMENT_CHARACTER),
            }
        }
        text
    }

    /// Same-length operand that draws nothing readable: spaces for simple
    /// fonts, CID 0 for composite ones.
    pub fn blank(&self, bytes: &[u8]) -> Vec<u8> {
        let filler = if self.is_composite() { 0 } else { b' ' };
        vec![filler; bytes.len()]
    }
}

/// Decodes a string with no font information. UTF-16BE when it carries a
/// BOM, otherwise one character per byte.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn utf16be(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Parses a `ToUnicode` CMap. Malformed maps yield an empty map.
fn parse_to_unicode(data: &[u8]) -> HashMap<u32, String> {
    // The parser panics on some malformed input
    match panic::catch_unwind(|| adobe_cmap_parser::get_unicode_map(data)) {
        Ok(Ok(map)) => map
            .into_iter()
            .map(|(code, target)| (code, utf16be(&target)))
            .collect(),
        Ok(Err(reason)) => {
            tracing::warn!(reason, "Ignoring malformed ToUnicode CMap");
            HashMap::new()
        }
        Err(_) => {
            tracing::warn!("Ignoring unparseable ToUnicode CMap");
            HashMap::new()
        }
    }
}

/// Decoded bytes of a stream; unfiltered streams are returned as stored.
pub fn stream_content(stream: &Stream) -> Option<Vec<u8>> {
    if stream.dict.get(b"Filter").is_ok() {
        stream.decompressed_content().ok()
    } else {
        Some(stream.content.clone())
    }
}

/// Fonts and XObjects a content stream can name.
#[derive(Debug, Clone, Default)]
pub struct ContentResources {
    pub fonts: FontMap,
    pub xobjects: BTreeMap<Vec<u8>, ObjectId>,
}

impl ContentResources {
    /// Resources of a page, including those inherited from the page tree.
    pub fn for_page(doc: &Document, page_id: ObjectId) -> Self {
        let (inline, inherited) = doc.get_page_resources(page_id);
        let dicts: Vec<&Dictionary> = inline
            .into_iter()
            .chain(inherited.iter().filter_map(|id| doc.get_dictionary(*id).ok()))
            .collect();
        Self::collect(doc, &dicts)
    }

    /// Merges resource dictionaries; the first one naming a key wins.
    pub fn collect(doc: &Document, dicts: &[&Dictionary]) -> Self {
        let mut resources = Self::default();
        for dict in dicts {
            if let Some(fonts) = sub_dictionary(doc, dict, b"Font") {
                for (name, value) in fonts.iter() {
                    if resources.fonts.contains_key(name) {
                        continue;
                    }
                    if let Ok((_, Object::Dictionary(font))) = doc.dereference(value) {
                        resources
                            .fonts
                            .insert(name.clone(), FontDecoder::from_dictionary(doc, font));
                    }
                }
            }
            if let Some(xobjects) = sub_dictionary(doc, dict, b"XObject") {
                for (name, value) in xobjects.iter() {
                    if let Ok(id) = value.as_reference() {
                        resources.xobjects.entry(name.clone()).or_insert(id);
                    }
                }
            }
        }
        resources
    }

    /// Decoder for a font name, falling back to a simple font.
    pub fn font(&self, name: &[u8]) -> FontDecoder {
        self.fonts.get(name).cloned().unwrap_or_default()
    }
}

fn sub_dictionary<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    let value = dict.get(key).ok()?;
    doc.dereference(value).ok()?.1.as_dict().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    const CMAP: &str = "/CIDInit /ProcSet findresource begin\n\
        12 dict begin\n\
        begincmap\n\
        1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n\
        2 beginbfchar\n<0003> <0020>\n<0023> <0040>\nendbfchar\n\
        1 beginbfrange\n<0044> <005D> <0061>\nendbfrange\n\
        endcmap\n\
        CMapName currentdict /CMap defineresource pop\n\
        end\nend\n";

    #[test]
    fn test_decode_utf16() {
        assert_eq!(decode_pdf_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xF1]), "Añ");
        assert_eq!(decode_pdf_string(b"plain"), "plain");
    }

    #[test]
    fn test_parse_to_unicode() {
        let map = parse_to_unicode(CMAP.as_bytes());
        assert_eq!(map.get(&0x0003).map(String::as_str), Some(" "));
        assert_eq!(map.get(&0x0023).map(String::as_str), Some("@"));
        assert_eq!(map.get(&0x0044).map(String::as_str), Some("a"));
        assert_eq!(map.get(&0x005D).map(String::as_str), Some("z"));
    }

    #[test]
    fn test_malformed_cmap_is_ignored() {
        assert!(parse_to_unicode(b"1 beginbfchar <01> endbfchar").is_empty());
    }

    #[test]
    fn test_composite_decoding() {
        let decoder = FontDecoder::composite(parse_to_unicode(CMAP.as_bytes()));
        assert_eq!(decoder.decode(&[0x00, 0x44, 0x00, 0x23, 0x00, 0x45]), "a@b");
        assert_eq!(decoder.decode(&[0x01, 0x00]), "\u{FFFD}");
        assert_eq!(decoder.blank(&[0x00, 0x44, 0x00, 0x45]), vec![0; 4]);
    }

    #[test]
    fn test_font_dictionary() {
        let mut doc = Document::with_version("1.5");
        let cmap_id = doc.add_object(Stream::new(dictionary! {}, CMAP.as_bytes().to_vec()));
        let type0 = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => "ABCDEF+Calibri",
            "Encoding" => "Identity-H",
            "ToUnicode" => cmap_id,
        };
        let decoder = FontDecoder::from_dictionary(&doc, &type0);
        assert!(decoder.is_composite());
        assert_eq!(decoder.decode(&[0x00, 0x44]), "a");

        let helvetica = dictionary! { "Type" => "Font", "Subtype" => "Type1" };
        assert_eq!(FontDecoder::from_dictionary(&doc, &helvetica), FontDecoder::simple());
    }
}
