//! Pure framing functions.
//!
//! Side-effect free helpers that locate the end of an HTTP header, read the
//! framing fields out of it and take chunks off a chunked body. They operate
//! on byte buffers only and never perform I/O.

use super::types::{ChunkResult, HeadInfo};
use crate::codec::find;

const CONTENT_LENGTH: &[u8] = b"Content-length: ";
const TRANSFER_ENCODING: &[u8] = b"Transfer-Encoding: ";

/// Locate the blank line ending a header.
///
/// Both `\r\n\r\n` and a bare `\n\n` are accepted, whichever comes first.
/// Field names are matched case-insensitively.
///
/// # Example
///
/// ```
/// use xmlrpc::sansio::protocol::scan_head;
///
/// let info = scan_head(b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello").unwrap();
/// assert_eq!(info.body_start, 38);
/// assert_eq!(info.content_length.as_deref(), Some(&b"5"[..]));
/// assert!(!info.chunked);
/// ```
pub fn scan_head(buf: &[u8]) -> Option<HeadInfo> {
    let mut content_length = None;
    let mut transfer_encoding = None;

    for pos in 0..buf.len() {
        let rest = &buf[pos..];
        if starts_with_ignore_case(rest, CONTENT_LENGTH) {
            content_length = Some(line_value(&rest[CONTENT_LENGTH.len()..]));
        }
        if starts_with_ignore_case(rest, TRANSFER_ENCODING) {
            transfer_encoding = Some(&rest[TRANSFER_ENCODING.len()..]);
        }
        let body_start = if rest.starts_with(b"\r\n\r\n") {
            Some(pos + 4)
        } else if rest.starts_with(b"\n\n") {
            Some(pos + 2)
        } else {
            None
        };
        if let Some(body_start) = body_start {
            return Some(HeadInfo {
                body_start,
                content_length,
                chunked: transfer_encoding
                    .map_or(false, |te| starts_with_ignore_case(te, b"chunked\r\n")),
            });
        }
    }
    None
}

/// Whether a blank line may start at or after `from`.
///
/// Cheap pre-check so readers only run [`scan_head`] once the header can be
/// complete. Readers pass the length of what they had already checked,
/// less two bytes for a separator split across reads.
pub fn has_blank_line(buf: &[u8], from: usize) -> bool {
    let from = from.min(buf.len());
    buf[from..].iter().enumerate().any(|(i, &b)| {
        let rest = &buf[from + i + 1..];
        b == b'\n' && (rest.starts_with(b"\n") || rest.starts_with(b"\r\n"))
    })
}

fn line_value(rest: &[u8]) -> Vec<u8> {
    let end = rest
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(rest.len());
    rest[..end].to_vec()
}

/// Leading decimal digits of a `Content-length` value, with an optional `-`.
///
/// Returns `None` when there is no digit at all. Anything after the digits
/// is ignored.
pub fn parse_length(value: &[u8]) -> Option<i64> {
    let negative = value.first() == Some(&b'-');
    let digits = &value[negative as usize..];
    let len = digits.iter().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    let n = std::str::from_utf8(&digits[..len]).ok()?.parse::<i64>().ok()?;
    Some(if negative { -n } else { n })
}

/// Take one chunk off the front of a chunked body.
///
/// A chunk is a hexadecimal size line, that many bytes and a CR LF. The last
/// chunk has size zero and is followed by an optional trailer that ends in
/// an empty line.
pub fn parse_chunk(buf: &[u8]) -> ChunkResult {
    let size_end = match find(buf, b"\r\n") {
        Some(end) => end,
        None => return ChunkResult::Incomplete,
    };
    let data_start = size_end + 2;

    let size_line = &buf[..size_end];
    let digits = size_line
        .iter()
        .take_while(|b| b.is_ascii_hexdigit())
        .count();
    let size = std::str::from_utf8(&size_line[..digits])
        .ok()
        .and_then(|d| usize::from_str_radix(d, 16).ok());
    let size = match size {
        Some(size) if digits > 0 => size,
        _ => {
            return ChunkResult::Invalid {
                error: "invalid size in chunk".into(),
            }
        }
    };

    let available = buf.len() - data_start;
    if available < size.saturating_add(2) {
        return ChunkResult::Incomplete;
    }

    if size == 0 {
        // The terminal chunk ends with an (optional) trailer and an empty line.
        return if find(buf, b"\r\n\r\n").is_some() {
            ChunkResult::Last
        } else {
            ChunkResult::Incomplete
        };
    }

    if &buf[data_start + size..data_start + size + 2] != b"\r\n" {
        return ChunkResult::Invalid {
            error: "chunk did not end in CR LF".into(),
        };
    }

    ChunkResult::Data {
        start: data_start,
        len: size,
        consumed: data_start + size + 2,
    }
}

fn starts_with_ignore_case(buf: &[u8], prefix: &[u8]) -> bool {
    buf.len() >= prefix.len() && buf[..prefix.len()].eq_ignore_ascii_case(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_head_separators() {
        assert_eq!(scan_head(b"HTTP/1.1 200 OK\r\n"), None);
        assert_eq!(scan_head(b"HTTP/1.1 200 OK\r\n\r"), None);

        let info = scan_head(b"HTTP/1.0 200 OK\n\nbody").unwrap();
        assert_eq!(info.body_start, 17);
        assert_eq!(info.content_length, None);

        // The separator may be the very last bytes of the buffer.
        let head = b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n";
        let info = scan_head(head).unwrap();
        assert_eq!(info.body_start, head.len());
        assert_eq!(info.content_length.as_deref(), Some(&b"0"[..]));
    }

    #[test]
    fn test_scan_head_chunked() {
        let info = scan_head(b"HTTP/1.1 200 OK\r\nTRANSFER-ENCODING: Chunked\r\n\r\n").unwrap();
        assert!(info.chunked);

        let info = scan_head(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\n\r\n").unwrap();
        assert!(!info.chunked);

        // A bare LF after "chunked" is not the exact "chunked\r\n" form.
        let info = scan_head(b"HTTP/1.1 200 OK\nTransfer-Encoding: chunked\n\n").unwrap();
        assert!(!info.chunked);
    }

    #[test]
    fn test_has_blank_line() {
        let head = b"HTTP/1.1 200 OK\r\nContent-length: 0\r\n\r\n";
        assert!(has_blank_line(head, 0));
        assert!(!has_blank_line(&head[..head.len() - 1], 0));
        // A separator split across reads is still found from the old end less two.
        let split = head.len() - 2;
        assert!(has_blank_line(head, split - 2));
        assert!(has_blank_line(b"a\n\n", 1));
        assert!(!has_blank_line(b"a\r\nb\r\n", 0));
        assert!(!has_blank_line(b"", 5));
    }

    #[test]
    fn test_parse_length() {
        assert_eq!(parse_length(b"42"), Some(42));
        assert_eq!(parse_length(b"42 trailing"), Some(42));
        assert_eq!(parse_length(b"-1"), Some(-1));
        assert_eq!(parse_length(b"abc"), None);
        assert_eq!(parse_length(b""), None);
    }

    #[test]
    fn test_parse_chunk() {
        assert_eq!(
            parse_chunk(b"5\r\nhello\r\nrest"),
            ChunkResult::Data {
                start: 3,
                len: 5,
                consumed: 10
            }
        );
        assert_eq!(
            parse_chunk(b"1A; ext=1\r\nabcdefghijklmnopqrstuvwxyz\r\n"),
            ChunkResult::Data {
                start: 11,
                len: 26,
                consumed: 39
            }
        );
        assert_eq!(parse_chunk(b"5\r\nhel"), ChunkResult::Incomplete);
        assert_eq!(parse_chunk(b"5"), ChunkResult::Incomplete);
        assert_eq!(parse_chunk(b"0\r\n"), ChunkResult::Incomplete);
        assert_eq!(parse_chunk(b"0\r\n\r\n"), ChunkResult::Last);
        assert_eq!(parse_chunk(b"0\r\nExpires: never\r\n"), ChunkResult::Incomplete);
        assert_eq!(parse_chunk(b"0\r\nExpires: never\r\n\r\n"), ChunkResult::Last);
        assert!(matches!(
            parse_chunk(b"zz\r\nhello\r\n"),
            ChunkResult::Invalid { .. }
        ));
        assert_eq!(
            parse_chunk(b"5\r\nhelloXY"),
            ChunkResult::Invalid {
                error: "chunk did not end in CR LF".into()
            }
        );
    }
}
