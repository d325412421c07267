//! XML-RPC value encoding and decoding.
//!
//! The decoder is a single pass recursive descent over the tag grammar. Tags
//! are matched by exact, case-sensitive prefix comparison: `<boolean >` is not
//! `<boolean>`. Whitespace (`\t`, `\r`, `\n`, space) and `<!-- ... -->`
//! comments are skipped wherever the grammar allows insignificant whitespace.
//!
//! The encoder indents arrays and structs with tabs and `\r\n`, the decoder
//! does not care about indentation.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;

use crate::error::{Error, Result};
use crate::value::{DateTime, Struct, Value};

pub(crate) const EOL: &[u8] = b"\r\n";

const COMMENT_START: &[u8] = b"<!-- ";
const COMMENT_END: &[u8] = b" -->";

/// Nesting limit for decoded arrays and structs.
///
/// Kept low enough that a full-depth document decodes on a default 2 MiB
/// thread stack in an unoptimized build.
pub const MAX_DEPTH: usize = 64;

const BASE64_ENCODE: GeneralPurpose = base64::engine::general_purpose::STANDARD;
const BASE64_DECODE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode a value as `<value>...</value>`.
///
/// # Examples
///
/// ```
/// use xmlrpc::{encode, Value};
///
/// let xml = encode(&Value::from("x&y")).unwrap();
/// assert_eq!(xml, b"<value><string>x&amp;y</string></value>".to_vec());
/// ```
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(&mut out, value, 0)?;
    Ok(out)
}

/// Decode one `<value>` and return it with the unconsumed tail of `input`.
///
/// # Examples
///
/// ```
/// use xmlrpc::{decode, Value};
///
/// let (value, rest) = decode(b"<value><i4>-12</i4></value> trailing").unwrap();
/// assert_eq!(value, Value::Int(-12));
/// assert_eq!(rest, b"trailing");
/// ```
pub fn decode(input: &[u8]) -> Result<(Value, &[u8])> {
    let mut scanner = Scanner::new(input);
    let value = decode_value(&mut scanner)?;
    Ok((value, scanner.rest()))
}

pub(crate) fn encode_into(out: &mut Vec<u8>, value: &Value, tabs: usize) -> Result<()> {
    out.extend_from_slice(b"<value>");
    match value {
        Value::Int(i) => {
            out.extend_from_slice(format!("<int>{}</int>", i).as_bytes());
        }
        Value::Double(d) => {
            if !d.is_finite() {
                return Err(Error::InvalidValue(format!(
                    "cannot encode non-finite double {}",
                    d
                )));
            }
            out.extend_from_slice(format!("<double>{:.6}</double>", d).as_bytes());
        }
        Value::Boolean(true) => out.extend_from_slice(b"<boolean>1</boolean>"),
        Value::Boolean(false) => out.extend_from_slice(b"<boolean>0</boolean>"),
        Value::String(s) => {
            out.extend_from_slice(b"<string>");
            escape_into(out, s);
            out.extend_from_slice(b"</string>");
        }
        Value::DateTime(d) => {
            encode_datetime(out, d)?;
        }
        Value::Base64(b) => {
            out.extend_from_slice(b"<base64>");
            out.extend_from_slice(BASE64_ENCODE.encode(b).as_bytes());
            out.extend_from_slice(b"</base64>");
        }
        Value::Array(items) => {
            out.extend_from_slice(EOL);
            indent(out, tabs + 1);
            out.extend_from_slice(b"<array>");
            out.extend_from_slice(EOL);
            indent(out, tabs + 2);
            out.extend_from_slice(b"<data>");
            out.extend_from_slice(EOL);
            for item in items {
                indent(out, tabs + 3);
                encode_into(out, item, tabs + 3)?;
                out.extend_from_slice(EOL);
            }
            indent(out, tabs + 2);
            out.extend_from_slice(b"</data>");
            out.extend_from_slice(EOL);
            indent(out, tabs + 1);
            out.extend_from_slice(b"</array>");
            out.extend_from_slice(EOL);
            indent(out, tabs);
        }
        Value::Struct(members) => {
            encode_struct(out, members, tabs)?;
        }
    }
    out.extend_from_slice(b"</value>");
    Ok(())
}

// Member names are written as-is, they are not escaped.
fn encode_struct(out: &mut Vec<u8>, members: &Struct, tabs: usize) -> Result<()> {
    out.extend_from_slice(EOL);
    indent(out, tabs + 1);
    out.extend_from_slice(b"<struct>");
    out.extend_from_slice(EOL);
    for (name, value) in members {
        indent(out, tabs + 2);
        out.extend_from_slice(b"<member>");
        out.extend_from_slice(EOL);
        indent(out, tabs + 3);
        out.extend_from_slice(b"<name>");
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b"</name>");
        out.extend_from_slice(EOL);
        indent(out, tabs + 3);
        encode_into(out, value, tabs + 3)?;
        out.extend_from_slice(EOL);
        indent(out, tabs + 2);
        out.extend_from_slice(b"</member>");
        out.extend_from_slice(EOL);
    }
    indent(out, tabs + 1);
    out.extend_from_slice(b"</struct>");
    out.extend_from_slice(EOL);
    indent(out, tabs);
    Ok(())
}

fn encode_datetime(out: &mut Vec<u8>, d: &DateTime) -> Result<()> {
    for (name, field) in [
        ("month", d.month),
        ("day", d.day),
        ("hour", d.hour),
        ("minute", d.minute),
        ("second", d.second),
    ] {
        if field > 99 {
            return Err(Error::InvalidValue(format!(
                "dateTime {} out of range: {}",
                name, field
            )));
        }
    }
    out.extend_from_slice(b"<dateTime.iso8601>");
    out.extend_from_slice(d.to_string().as_bytes());
    out.extend_from_slice(b"</dateTime.iso8601>");
    Ok(())
}

pub(crate) fn indent(out: &mut Vec<u8>, tabs: usize) {
    out.extend(std::iter::repeat(b'\t').take(tabs));
}

/// Only `<` and `&` are escaped.
pub(crate) fn escape_into(out: &mut Vec<u8>, s: &[u8]) {
    for &b in s {
        match b {
            b'<' => out.extend_from_slice(b"&lt;"),
            b'&' => out.extend_from_slice(b"&amp;"),
            b => out.push(b),
        }
    }
}

pub(crate) fn unescape(s: &[u8], line: usize) -> Result<Vec<u8>> {
    const NAMED: [(&[u8], u8); 6] = [
        (b"&lt;", b'<'),
        (b"&gt;", b'>'),
        (b"&&;", b'&'),
        (b"&amp;", b'&'),
        (b"&apos;", b'\''),
        (b"&quot;", b'"'),
    ];

    let illegal = || Error::syntax(line, "Illegal quoted sequence");
    let mut out = Vec::with_capacity(s.len());
    let mut i = 0;

    'outer: while i < s.len() {
        if s[i] != b'&' {
            out.push(s[i]);
            i += 1;
            continue;
        }
        let rest = &s[i..];
        for (entity, b) in NAMED.iter() {
            if rest.starts_with(entity) {
                out.push(*b);
                i += entity.len();
                continue 'outer;
            }
        }

        let (digits, radix) = if rest.len() > 3 && rest[..3].eq_ignore_ascii_case(b"&#x") {
            (&rest[3..], 16)
        } else if rest.len() > 2 && rest.starts_with(b"&#") {
            (&rest[2..], 10)
        } else {
            return Err(illegal());
        };

        let end = digits.iter().position(|&b| b == b';').ok_or_else(illegal)?;
        let code = std::str::from_utf8(&digits[..end])
            .ok()
            .and_then(|d| u32::from_str_radix(d, radix).ok())
            .and_then(char::from_u32)
            .ok_or_else(illegal)?;
        let mut utf8 = [0u8; 4];
        out.extend_from_slice(code.encode_utf8(&mut utf8).as_bytes());
        i = s.len() - digits.len() + end + 1;
    }

    Ok(out)
}

/// Cursor over an XML-RPC text, counting lines as it goes.
#[derive(Debug)]
pub(crate) struct Scanner<'a> {
    buf: &'a [u8],
    pos: usize,
    line: usize,
    depth: usize,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Scanner {
            buf,
            pos: 0,
            line: 1,
            depth: 0,
        }
    }

    pub(crate) fn line(&self) -> usize {
        self.line
    }

    pub(crate) fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub(crate) fn starts_with(&self, tag: &str) -> bool {
        self.rest().starts_with(tag.as_bytes())
    }

    pub(crate) fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    /// Skip whitespace and comments.
    pub(crate) fn chomp(&mut self) {
        while let Some(&b) = self.buf.get(self.pos) {
            match b {
                b'\t' | b' ' | b'\r' => self.pos += 1,
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                _ if self.rest().starts_with(COMMENT_START) => {
                    self.pos += COMMENT_START.len();
                    match find(self.rest(), COMMENT_END) {
                        Some(end) => {
                            self.count_lines(end);
                            self.pos += end + COMMENT_END.len();
                        }
                        None => {
                            // An unterminated comment swallows the rest.
                            self.pos = self.buf.len();
                            return;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    /// Consume `tag` or fail with the line and a short excerpt.
    pub(crate) fn expect(&mut self, tag: &str, chomp: bool) -> Result<()> {
        if !self.starts_with(tag) {
            let rest = self.rest();
            let excerpt = String::from_utf8_lossy(&rest[..rest.len().min(30)]);
            return Err(Error::syntax(
                self.line,
                format!(
                    "couldn't find {} tag in line {}: {}",
                    tag, self.line, excerpt
                ),
            ));
        }
        self.count_lines(tag.len());
        self.pos += tag.len();
        if chomp {
            self.chomp();
        }
        Ok(())
    }

    /// Return everything up to `delim`, leaving the cursor on it.
    pub(crate) fn take_until(&mut self, delim: &str) -> Result<&'a [u8]> {
        let rest = self.rest();
        let end = find(rest, delim.as_bytes()).ok_or(Error::Eos)?;
        self.count_lines(end);
        self.pos += end;
        Ok(&rest[..end])
    }

    /// An optional `-` followed by decimal digits.
    pub(crate) fn integer(&mut self) -> Option<i64> {
        let rest = self.rest();
        let negative = rest.first() == Some(&b'-');
        let digits = rest[negative as usize..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }
        let len = negative as usize + digits;
        let value = std::str::from_utf8(&rest[..len]).ok()?.parse::<i64>().ok()?;
        self.pos += len;
        Some(value)
    }

    /// An optional `-` followed by digits and at most one `.`.
    pub(crate) fn float(&mut self) -> Option<f64> {
        let rest = self.rest();
        let negative = rest.first() == Some(&b'-');
        let mut len = negative as usize;
        let mut dot = false;
        let mut digits = 0;
        while let Some(&b) = rest.get(len) {
            match b {
                b'.' if dot => return None,
                b'.' => dot = true,
                b'0'..=b'9' => digits += 1,
                _ => break,
            }
            len += 1;
        }
        if digits == 0 {
            return None;
        }
        let text = std::str::from_utf8(&rest[..len]).ok()?;
        let text = text.strip_suffix('.').unwrap_or(text);
        let value = text.parse::<f64>().ok()?;
        self.pos += len;
        Some(value)
    }

    pub(crate) fn syntax_error(&self) -> Error {
        Error::syntax(self.line, format!("syntax error in line {}", self.line))
    }

    fn count_lines(&mut self, len: usize) {
        self.line += self.rest()[..len].iter().filter(|&&b| b == b'\n').count();
    }
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub(crate) fn decode_value(s: &mut Scanner) -> Result<Value> {
    s.chomp();
    if s.at_end() {
        return Err(Error::Eos);
    }
    s.expect("<value>", false)?;
    let body_start = s.pos;
    s.chomp();
    if s.at_end() {
        return Err(Error::Eos);
    }

    // Only containers recurse; everything else is decoded in its own frame
    // so that each nesting level costs as little stack as possible.
    let value = if s.starts_with("<array>") {
        nested(s, decode_array)?
    } else if s.starts_with("<struct>") {
        nested(s, decode_struct)?
    } else {
        decode_scalar(s, body_start)?
    };

    s.expect("</value>", false)?;
    s.chomp();
    Ok(value)
}

#[inline(never)]
fn decode_scalar(s: &mut Scanner, body_start: usize) -> Result<Value> {
    let value = if s.starts_with("<int>") {
        decode_int(s, "<int>", "</int>")?
    } else if s.starts_with("<i4>") {
        decode_int(s, "<i4>", "</i4>")?
    } else if s.starts_with("<boolean>") {
        decode_bool(s)?
    } else if s.starts_with("<double>") {
        decode_double(s)?
    } else if s.starts_with("<string/>") {
        s.advance("<string/>".len());
        s.chomp();
        Value::String(Vec::new())
    } else if s.starts_with("<string>") {
        s.advance("<string>".len());
        let raw = s.take_until("</string>")?;
        let value = unescape(raw, s.line)?;
        s.expect("</string>", true)?;
        Value::String(value)
    } else if s.starts_with("<dateTime.iso8601>") {
        decode_datetime(s)?
    } else if s.starts_with("<base64>") {
        decode_base64(s)?
    } else {
        // No type tag: the raw text up to </value> is a string.
        s.line -= s.buf[body_start..s.pos].iter().filter(|&&b| b == b'\n').count();
        s.pos = body_start;
        let raw = s.take_until("</value>")?;
        Value::String(unescape(raw, s.line)?)
    };
    Ok(value)
}

fn nested(s: &mut Scanner, f: fn(&mut Scanner) -> Result<Value>) -> Result<Value> {
    if s.depth >= MAX_DEPTH {
        return Err(Error::syntax(
            s.line,
            format!("values nested deeper than {} in line {}", MAX_DEPTH, s.line),
        ));
    }
    s.depth += 1;
    let value = f(s);
    s.depth -= 1;
    value
}

fn decode_int(s: &mut Scanner, open: &str, close: &str) -> Result<Value> {
    s.advance(open.len());
    let i = s.integer().ok_or_else(|| s.syntax_error())?;
    if s.at_end() {
        return Err(Error::Eos);
    }
    s.expect(close, true)?;
    Ok(Value::Int(i))
}

fn decode_bool(s: &mut Scanner) -> Result<Value> {
    const TRUE: &str = "<boolean>1</boolean>";
    const FALSE: &str = "<boolean>0</boolean>";

    if s.rest().len() <= TRUE.len() {
        return Err(Error::Eos);
    }
    let value = if s.starts_with(TRUE) {
        true
    } else if s.starts_with(FALSE) {
        false
    } else {
        return Err(s.syntax_error());
    };
    s.advance(TRUE.len());
    s.chomp();
    if s.at_end() {
        return Err(Error::Eos);
    }
    Ok(Value::Boolean(value))
}

fn decode_double(s: &mut Scanner) -> Result<Value> {
    s.advance("<double>".len());
    let d = s.float().ok_or_else(|| s.syntax_error())?;
    s.expect("</double>", true)?;
    Ok(Value::Double(d))
}

// Fields are read from fixed columns: YYYYMMDDTHH:MM:SS.
fn decode_datetime(s: &mut Scanner) -> Result<Value> {
    const FIELDS: [(usize, usize); 6] = [(0, 4), (4, 2), (6, 2), (9, 2), (12, 2), (15, 2)];

    s.advance("<dateTime.iso8601>".len());
    let body = s.rest();
    let mut parts = [0u32; 6];
    for (part, &(offset, width)) in parts.iter_mut().zip(FIELDS.iter()) {
        let digits = body.get(offset..offset + width).ok_or(Error::Eos)?;
        for &b in digits {
            if !b.is_ascii_digit() {
                return Err(Error::syntax(
                    s.line,
                    "<dateTime> expects numbers for date values",
                ));
            }
            *part = *part * 10 + u32::from(b - b'0');
        }
    }
    s.take_until("</dateTime.iso8601>")?;
    s.expect("</dateTime.iso8601>", true)?;
    let [year, month, day, hour, minute, second] = parts;
    Ok(Value::DateTime(DateTime::new(
        year, month, day, hour, minute, second,
    )))
}

fn decode_base64(s: &mut Scanner) -> Result<Value> {
    s.advance("<base64>".len());
    let line = s.line;
    let text = s.take_until("</base64>")?;
    s.expect("</base64>", true)?;
    let filtered: Vec<u8> = text
        .iter()
        .copied()
        .filter(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        .collect();
    BASE64_DECODE
        .decode(filtered)
        .map(Value::Base64)
        .map_err(|e| Error::syntax(line, format!("invalid base64 in line {}: {}", line, e)))
}

#[inline(never)]
fn decode_array(s: &mut Scanner) -> Result<Value> {
    s.expect("<array>", true)?;
    let mut items = Vec::new();
    if s.starts_with("<data>") {
        s.expect("<data>", true)?;
        while s.starts_with("<value>") {
            items.push(decode_value(s)?);
        }
        s.expect("</data>", true)?;
    }
    s.expect("</array>", true)?;
    Ok(Value::Array(items))
}

#[inline(never)]
fn decode_struct(s: &mut Scanner) -> Result<Value> {
    s.expect("<struct>", true)?;
    let mut members = Struct::new();
    while s.starts_with("<member>") {
        s.expect("<member>", true)?;
        s.expect("<name>", false)?;
        let line = s.line;
        let name = s.take_until("</name>")?;
        let name = String::from_utf8(name.to_vec()).map_err(|_| {
            Error::syntax(line, format!("member name in line {} is not UTF-8", line))
        })?;
        s.expect("</name>", true)?;
        let value = decode_value(s)?;
        members.insert(name, value);
        s.expect("</member>", true)?;
    }
    s.expect("</struct>", true)?;
    Ok(Value::Struct(members))
}
