//! Key descriptor serialization.
//!
//! The descriptor is a small element tree written as one line:
//!
//! ```text
//! <HyperCryptKey><version>00010000</version><Segments><Segment>
//!   <in_size>…</in_size><out_size>…</out_size><lfsr>…</lfsr>
//!   <Crypto><scheme>AES-256</scheme><iv>…</iv><key>…</key></Crypto>
//! </Segment>…</Segments></HyperCryptKey>
//! ```
//!
//! The writer is byte-exact: element order, uppercase hex, decimal sizes,
//! no declaration, no whitespace. The parser is tolerant where the format
//! allows (whitespace between elements, unknown elements ignored) and
//! strict everywhere else; every defect maps to [`HcError::BadKey`].

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::debug;

use hc_core::{HcError, HcResult};

use crate::plan::SegmentKey;
use crate::{CRYPTO_SCHEME, KEY_VERSION};

/// A parsed key file: format version plus the segment list in processing
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub version: u32,
    pub segments: Vec<SegmentKey>,
}

/// Render the descriptor document for `segments`.
pub fn to_xml(segments: &[SegmentKey]) -> String {
    let mut s = String::new();

    s.push_str("<HyperCryptKey>");
    let _ = write!(s, "<version>{KEY_VERSION:08X}</version>");
    s.push_str("<Segments>");

    for key in segments {
        s.push_str("<Segment>");
        let _ = write!(s, "<in_size>{}</in_size>", key.in_size);
        let _ = write!(s, "<out_size>{}</out_size>", key.out_size);
        let _ = write!(s, "<lfsr>{}</lfsr>", key.lfsr_spec);
        s.push_str("<Crypto>");
        let _ = write!(s, "<scheme>{CRYPTO_SCHEME}</scheme>");
        let _ = write!(s, "<iv>{}</iv>", hex::encode_upper(key.iv));
        let _ = write!(s, "<key>{}</key>", hex::encode_upper(key.key));
        s.push_str("</Crypto>");
        s.push_str("</Segment>");
    }

    s.push_str("</Segments>");
    s.push_str("</HyperCryptKey>");

    s
}

/// Parse a descriptor document.
pub fn parse_xml(text: &str) -> HcResult<KeyDescriptor> {
    let root = Element::parse_document(text).ok_or_else(|| {
        debug!("key document is not well-formed");
        HcError::BadKey
    })?;

    if root.name != "HyperCryptKey" {
        return Err(HcError::BadKey);
    }

    let version = parse_version(root.child("version").ok_or(HcError::BadKey)?.text())?;

    let segments_el = root.child("Segments").ok_or(HcError::BadKey)?;

    let mut segments = Vec::new();
    for child in segments_el.elements() {
        if child.name != "Segment" {
            continue;
        }

        segments.push(parse_segment(child)?);
    }

    Ok(KeyDescriptor { version, segments })
}

/// Write the descriptor for `segments` to `path`.
pub fn write_key_file(path: &Path, segments: &[SegmentKey]) -> HcResult<()> {
    use std::io::Write as _;

    if path.as_os_str().is_empty() {
        return Err(HcError::InvalidKeyFile);
    }

    let mut file = fs::File::create(path).map_err(|err| {
        debug!(%err, path = %path.display(), "creating key file failed");
        HcError::CannotCreateKeyFile
    })?;

    file.write_all(to_xml(segments).as_bytes()).map_err(|err| {
        debug!(%err, path = %path.display(), "writing key file failed");
        HcError::CannotWriteKeyFile
    })
}

/// Read and parse the descriptor at `path`.
pub fn read_key_file(path: &Path) -> HcResult<KeyDescriptor> {
    if !path.exists() {
        return Err(HcError::CannotOpenKeyFile);
    }

    let text = fs::read_to_string(path).map_err(|err| {
        debug!(%err, path = %path.display(), "reading key file failed");
        HcError::CannotReadKeyFile
    })?;

    parse_xml(&text)
}

fn parse_segment(el: &Element) -> HcResult<SegmentKey> {
    let in_size = parse_decimal::<u32>(el.child("in_size"))?;
    let out_size = parse_decimal::<u32>(el.child("out_size"))?;
    let lfsr_spec = parse_decimal::<u64>(el.child("lfsr"))?;

    let crypto = el.child("Crypto").ok_or(HcError::BadKey)?;

    // The scheme element must be present; its value is carried for future
    // schemes but not compared today.
    crypto.child("scheme").ok_or(HcError::BadKey)?;

    let iv = strict_hex::<16>(crypto.child("iv").ok_or(HcError::BadKey)?.text())?;
    let key = strict_hex::<32>(crypto.child("key").ok_or(HcError::BadKey)?.text())?;

    Ok(SegmentKey {
        in_size,
        out_size,
        lfsr_spec,
        iv,
        key,
    })
}

fn parse_decimal<T: std::str::FromStr>(el: Option<&Element>) -> HcResult<T> {
    el.ok_or(HcError::BadKey)?
        .text()
        .trim()
        .parse()
        .map_err(|_| HcError::BadKey)
}

fn parse_version(text: &str) -> HcResult<u32> {
    let text = text.trim();

    if text.len() != 8 || !text.bytes().all(is_upper_hex) {
        return Err(HcError::BadKey);
    }

    u32::from_str_radix(text, 16).map_err(|_| HcError::BadKey)
}

/// Decode exactly `N` bytes of uppercase hex; lowercase is a format error.
fn strict_hex<const N: usize>(text: &str) -> HcResult<[u8; N]> {
    if text.len() != N * 2 || !text.bytes().all(is_upper_hex) {
        return Err(HcError::BadKey);
    }

    let mut out = [0u8; N];
    hex::decode_to_slice(text, &mut out).map_err(|_| HcError::BadKey)?;
    Ok(out)
}

fn is_upper_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'A'..=b'F').contains(&b)
}

// ── Minimal element tree ────────────────────────────────────────────────────
//
// The descriptor grammar needs nothing beyond nested tags and text:
// attributes are skipped, `<?…?>` and `<!--…-->` are skipped, entities are
// not decoded (descriptor content is digits and uppercase hex).

struct Element {
    name: String,
    children: Vec<Node>,
}

enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    fn parse_document(text: &str) -> Option<Element> {
        let mut p = Cursor {
            input: text.as_bytes(),
            pos: 0,
        };

        p.skip_misc();
        let root = p.parse_element()?;
        p.skip_misc();

        if p.pos != p.input.len() {
            return None;
        }

        Some(root)
    }

    /// First child element with the given name.
    fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Concatenated text content of direct text children.
    fn text(&self) -> &str {
        for node in &self.children {
            if let Node::Text(t) = node {
                return t;
            }
        }

        ""
    }
}

struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn starts_with(&self, s: &[u8]) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn skip_until(&mut self, s: &[u8]) -> Option<()> {
        while self.pos < self.input.len() {
            if self.starts_with(s) {
                self.pos += s.len();
                return Some(());
            }
            self.pos += 1;
        }

        None
    }

    /// Skip whitespace, processing instructions, and comments.
    fn skip_misc(&mut self) {
        loop {
            while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
                self.pos += 1;
            }

            if self.starts_with(b"<?") {
                if self.skip_until(b"?>").is_none() {
                    return;
                }
            } else if self.starts_with(b"<!--") {
                if self.skip_until(b"-->").is_none() {
                    return;
                }
            } else {
                return;
            }
        }
    }

    fn read_name(&mut self) -> Option<String> {
        let start = self.pos;

        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            self.pos += 1;
        }

        if self.pos == start {
            return None;
        }

        String::from_utf8(self.input[start..self.pos].to_vec()).ok()
    }

    fn parse_element(&mut self) -> Option<Element> {
        if self.peek()? != b'<' {
            return None;
        }
        self.pos += 1;

        let name = self.read_name()?;

        // Skip any attributes up to the tag end.
        let mut self_closing = false;
        loop {
            match self.peek()? {
                b'>' => {
                    self.pos += 1;
                    break;
                }
                b'/' if self.starts_with(b"/>") => {
                    self.pos += 2;
                    self_closing = true;
                    break;
                }
                _ => self.pos += 1,
            }
        }

        let mut element = Element {
            name,
            children: Vec::new(),
        };

        if self_closing {
            return Some(element);
        }

        loop {
            let text_start = self.pos;
            while matches!(self.peek(), Some(b) if b != b'<') {
                self.pos += 1;
            }

            if self.pos > text_start {
                let raw = std::str::from_utf8(&self.input[text_start..self.pos]).ok()?;
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    element.children.push(Node::Text(trimmed.to_string()));
                }
            }

            if self.peek().is_none() {
                return None;
            }

            if self.starts_with(b"</") {
                self.pos += 2;
                let close = self.read_name()?;
                if close != element.name {
                    return None;
                }
                self.skip_misc_inside_tag();
                if self.peek()? != b'>' {
                    return None;
                }
                self.pos += 1;
                return Some(element);
            }

            if self.starts_with(b"<!--") {
                self.skip_until(b"-->")?;
                continue;
            }

            let child = self.parse_element()?;
            element.children.push(Node::Element(child));
        }
    }

    fn skip_misc_inside_tag(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }
}
