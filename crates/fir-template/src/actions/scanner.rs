//! Start-tag scanner for template markup.
//!
//! Splits a template source into text runs and start tags. Only start tags
//! are parsed into attributes; everything else (end tags, comments, template
//! tags, `<script>`/`<style>` bodies) stays in the text runs byte for byte.
//!
//! Attribute names may embed a quoted literal after a colon
//! (`x-fir-redirect:"/home"`), which is kept as part of the name.

/// A piece of scanned markup.
#[derive(Debug)]
pub(crate) enum Piece<'a> {
    /// Bytes copied through unchanged.
    Text(&'a str),
    /// A parsed start tag.
    Tag(StartTag<'a>),
}

/// A parsed start tag.
#[derive(Debug)]
pub(crate) struct StartTag<'a> {
    /// The whole tag as written.
    pub raw: &'a str,
    /// Element name.
    pub name: &'a str,
    /// Attribute (and embedded template token) segments in source order.
    pub segments: Vec<Segment<'a>>,
    /// Closing delimiter with its leading whitespace (`>`, ` />`).
    pub close: &'a str,
}

/// One segment inside a start tag, raw text including leading whitespace.
#[derive(Debug)]
pub(crate) struct Segment<'a> {
    /// Source text of the segment.
    pub raw: &'a str,
    /// The attribute, when the segment is one rather than a template token.
    pub attr: Option<Attribute<'a>>,
}

/// An attribute name and its unquoted value.
#[derive(Debug)]
pub(crate) struct Attribute<'a> {
    pub name: &'a str,
    pub value: Option<&'a str>,
}

const TEMPLATE_DELIMS: [(&str, &str); 3] = [("{{", "}}"), ("{%", "%}"), ("{#", "#}")];
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// Split `src` into text runs and start tags.
pub(crate) fn scan(src: &str) -> Vec<Piece<'_>> {
    let bytes = src.as_bytes();
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i..].starts_with(b"<!--") {
            i = find(src, i + 4, "-->").map_or(bytes.len(), |end| end + 3);
            continue;
        }
        if let Some(end) = skip_template_token(src, i) {
            i = end;
            continue;
        }
        if bytes[i] == b'<' && bytes.get(i + 1).is_some_and(u8::is_ascii_alphabetic) {
            if let Some((tag, end)) = parse_start_tag(src, i) {
                if text_start < i {
                    pieces.push(Piece::Text(&src[text_start..i]));
                }
                let raw_text = !tag.close.ends_with("/>")
                    && RAW_TEXT_ELEMENTS
                        .iter()
                        .any(|el| tag.name.eq_ignore_ascii_case(el));
                let closing = format!("</{}", tag.name.to_ascii_lowercase());
                pieces.push(Piece::Tag(tag));
                i = end;
                text_start = i;
                if raw_text {
                    i = find_ignore_case(src, i, &closing).unwrap_or(bytes.len());
                }
                continue;
            }
        }
        i += 1;
    }

    if text_start < bytes.len() {
        pieces.push(Piece::Text(&src[text_start..]));
    }
    pieces
}

/// Parse the start tag at `start` (which holds `<`). Returns the tag and the
/// index just past it, or `None` when the tag is unterminated.
fn parse_start_tag(src: &str, start: usize) -> Option<(StartTag<'_>, usize)> {
    let bytes = src.as_bytes();
    let len = bytes.len();
    let mut i = start + 1;
    while i < len && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'-' | b':' | b'_')) {
        i += 1;
    }
    let name = &src[start + 1..i];
    let mut segments = Vec::new();

    let close = loop {
        let seg_start = i;
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= len {
            return None;
        }
        if bytes[i] == b'>' {
            i += 1;
            break &src[seg_start..i];
        }
        if bytes[i..].starts_with(b"/>") {
            i += 2;
            break &src[seg_start..i];
        }
        if let Some(end) = skip_template_token(src, i) {
            i = end;
            segments.push(Segment {
                raw: &src[seg_start..i],
                attr: None,
            });
            continue;
        }

        let name_start = i;
        while i < len {
            let c = bytes[i];
            if c.is_ascii_whitespace()
                || c == b'='
                || c == b'>'
                || bytes[i..].starts_with(b"/>")
                || skip_template_token(src, i).is_some()
            {
                break;
            }
            if (c == b'"' || c == b'\'') && i > name_start && bytes[i - 1] == b':' {
                i = find_quote(src, i + 1, c)? + 1;
                continue;
            }
            i += 1;
        }
        if i == name_start {
            // stray '=' or quote; keep it verbatim
            i += 1;
            segments.push(Segment {
                raw: &src[seg_start..i],
                attr: None,
            });
            continue;
        }
        let attr_name = &src[name_start..i];

        let mut j = i;
        while j < len && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        let mut value = None;
        if j < len && bytes[j] == b'=' {
            j += 1;
            while j < len && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j >= len {
                return None;
            }
            if bytes[j] == b'"' || bytes[j] == b'\'' {
                let end = find_quote(src, j + 1, bytes[j])?;
                value = Some(&src[j + 1..end]);
                i = end + 1;
            } else {
                let value_start = j;
                while j < len && !bytes[j].is_ascii_whitespace() && bytes[j] != b'>' {
                    j += 1;
                }
                value = Some(&src[value_start..j]);
                i = j;
            }
        }

        segments.push(Segment {
            raw: &src[seg_start..i],
            attr: Some(Attribute {
                name: attr_name,
                value,
            }),
        });
    };

    Some((
        StartTag {
            raw: &src[start..i],
            name,
            segments,
            close,
        },
        i,
    ))
}

/// If a template token opens at `i`, the index just past its close.
fn skip_template_token(src: &str, i: usize) -> Option<usize> {
    let rest = &src.as_bytes()[i..];
    TEMPLATE_DELIMS
        .iter()
        .find(|(open, _)| rest.starts_with(open.as_bytes()))
        .map(|(open, close)| find(src, i + open.len(), close).map_or(src.len(), |end| end + close.len()))
}

/// Index of the closing `quote`, ignoring quotes inside template tokens.
fn find_quote(src: &str, from: usize, quote: u8) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if let Some(end) = skip_template_token(src, i) {
            i = end;
            continue;
        }
        if bytes[i] == quote {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn find(src: &str, from: usize, needle: &str) -> Option<usize> {
    src[from..].find(needle).map(|p| p + from)
}

fn find_ignore_case(src: &str, from: usize, needle: &str) -> Option<usize> {
    let hay = src.as_bytes();
    let needle = needle.as_bytes();
    (from..=hay.len().saturating_sub(needle.len()))
        .find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}
