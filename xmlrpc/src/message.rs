//! HTTP framing around XML-RPC bodies.
//!
//! Builders produce complete byte streams (header and body) ready to be
//! written to a socket. Parsers take a complete byte stream, as assembled by
//! the readers in [`crate::sansio`], and return the decoded call or result.

use base64::Engine as _;

use crate::codec::{decode_value, encode_into, escape_into, indent, Scanner, EOL};
use crate::error::{Error, Result};
use crate::value::{Struct, Value};

const XML_DECL: &[u8] = b"<?xml version=\"1.0\"?>";

/// Pseudo header holding the HTTP version of a parsed message.
pub const HTTP_VERSION: &str = "HTTP Version";
/// Pseudo header holding the request URI of a parsed request.
pub const URI: &str = "URI";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpVersion::Http10 => "1.0",
            HttpVersion::Http11 => "1.1",
        }
    }
}

/// Header fields of an HTTP message.
///
/// Insertion order is kept, lookups ignore case and inserting a name that is
/// already present replaces its value. Parsed names are normalized to a
/// capital first letter followed by lower case, e.g. `Content-length`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> Option<HttpVersion> {
        match self.get(HTTP_VERSION)? {
            "1.0" => Some(HttpVersion::Http10),
            "1.1" => Some(HttpVersion::Http11),
            _ => None,
        }
    }

    pub fn uri(&self) -> Option<&str> {
        self.get(URI)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// A parsed method call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub params: Vec<Value>,
    pub headers: Headers,
}

/// A parsed successful method response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub value: Value,
    pub headers: Headers,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Request,
    Response,
}

/// Build a complete `POST` request.
///
/// # Examples
///
/// ```
/// use xmlrpc::message::{build_request, parse_request, Headers};
/// use xmlrpc::Value;
///
/// let bytes = build_request("/RPC2", "add", &[Value::Int(1), Value::Int(2)], &Headers::new(), "test").unwrap();
/// let request = parse_request(&bytes).unwrap();
/// assert_eq!(request.method, "add");
/// assert_eq!(request.params, vec![Value::Int(1), Value::Int(2)]);
/// assert_eq!(request.headers.get("user-agent"), Some("test"));
/// ```
pub fn build_request(
    url: &str,
    method: &str,
    params: &[Value],
    extra: &Headers,
    user_agent: &str,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    body.extend_from_slice(XML_DECL);
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"<methodCall>");
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"\t<methodName>");
    body.extend_from_slice(method.as_bytes());
    body.extend_from_slice(b"</methodName>");
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"\t<params>");
    body.extend_from_slice(EOL);
    for param in params {
        body.extend_from_slice(b"\t\t<param>");
        body.extend_from_slice(EOL);
        indent(&mut body, 3);
        encode_into(&mut body, param, 3)?;
        body.extend_from_slice(EOL);
        body.extend_from_slice(b"\t\t</param>");
        body.extend_from_slice(EOL);
    }
    body.extend_from_slice(b"\t</params>");
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"</methodCall>");

    let first = format!("POST {} HTTP/1.1\r\nUser-Agent: {}\r\n", url, user_agent);
    Ok(frame(first, extra, body))
}

/// Build a `200 OK` response carrying `result`.
pub fn build_response(result: &Value, extra: &Headers, server: &str) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    body.extend_from_slice(XML_DECL);
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"<methodResponse>");
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"\t<params>");
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"\t\t<param>");
    body.extend_from_slice(EOL);
    indent(&mut body, 3);
    encode_into(&mut body, result, 3)?;
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"\t\t</param>");
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"\t</params>");
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"</methodResponse>");
    body.extend_from_slice(EOL);

    let first = format!("HTTP/1.1 200 OK\r\nServer: {}\r\n", server);
    Ok(frame(first, extra, body))
}

/// Build a `200 OK` response carrying a fault.
pub fn build_fault(code: i32, message: &str, extra: &Headers, server: &str) -> Result<Vec<u8>> {
    let mut fault = Struct::new();
    fault.insert("faultCode".into(), Value::Int(code.into()));
    fault.insert("faultString".into(), Value::from(message));

    let mut body = Vec::new();
    body.extend_from_slice(XML_DECL);
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"<methodResponse>");
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"\t<fault>");
    body.extend_from_slice(EOL);
    indent(&mut body, 2);
    encode_into(&mut body, &Value::Struct(fault), 2)?;
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"\t</fault>");
    body.extend_from_slice(EOL);
    body.extend_from_slice(b"</methodResponse>");

    let first = format!("HTTP/1.1 200 OK\r\nServer: {}\r\n", server);
    Ok(frame(first, extra, body))
}

fn frame(first: String, extra: &Headers, body: Vec<u8>) -> Vec<u8> {
    let mut out = first.into_bytes();
    for (name, value) in extra.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(EOL);
    }
    out.extend_from_slice(b"Content-Type: text/xml\r\n");
    out.extend_from_slice(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(&body);
    out
}

/// Parse a complete request: request line, headers and `<methodCall>`.
pub fn parse_request(bytes: &[u8]) -> Result<Request> {
    let mut s = Scanner::new(bytes);
    let headers = parse_header(&mut s, Kind::Request)?;
    find_xml_version(&mut s)?;
    s.expect("<methodCall>", true)?;
    s.expect("<methodName>", false)?;
    let line = s.line();
    let method = s.take_until("</methodName>")?;
    let method = String::from_utf8(method.to_vec())
        .map_err(|_| Error::syntax(line, format!("method name in line {} is not UTF-8", line)))?;
    s.expect("</methodName>", true)?;

    let mut params = Vec::new();
    if s.starts_with("<params>") {
        params = parse_params(&mut s)?;
    }
    s.expect("</methodCall>", false)?;
    s.chomp();
    if !s.at_end() {
        return Err(Error::protocol("unused data when parsing request"));
    }

    Ok(Request {
        method,
        params,
        headers,
    })
}

fn parse_params(s: &mut Scanner) -> Result<Vec<Value>> {
    let mut params = Vec::new();
    s.expect("<params>", true)?;
    while s.starts_with("<param>") {
        s.expect("<param>", true)?;
        params.push(decode_value(s)?);
        s.expect("</param>", true)?;
    }
    s.expect("</params>", true)?;
    Ok(params)
}

/// Parse a complete response.
///
/// A `<fault>` body is returned as [`Error::Fault`].
pub fn parse_response(bytes: &[u8]) -> Result<Response> {
    let mut s = Scanner::new(bytes);
    let headers = parse_header(&mut s, Kind::Response)?;
    find_xml_version(&mut s)?;
    s.expect("<methodResponse>", true)?;
    if s.starts_with("<fault>") {
        return Err(parse_fault(&mut s));
    }
    s.expect("<params>", true)?;
    s.expect("<param>", true)?;
    let value = decode_value(&mut s)?;
    s.expect("</param>", true)?;
    s.expect("</params>", true)?;
    s.expect("</methodResponse>", false)?;
    s.chomp();
    if !s.at_end() {
        return Err(Error::protocol("unused data when parsing response"));
    }

    Ok(Response { value, headers })
}

/// Parse only the status line and headers of a response.
pub fn parse_response_head(bytes: &[u8]) -> Result<Headers> {
    parse_header(&mut Scanner::new(bytes), Kind::Response)
}

/// Parse only the request line and headers of a request.
pub fn parse_request_head(bytes: &[u8]) -> Result<Headers> {
    parse_header(&mut Scanner::new(bytes), Kind::Request)
}

fn parse_fault(s: &mut Scanner) -> Error {
    match read_fault(s) {
        Ok(fault) => fault,
        Err(e) => e,
    }
}

fn read_fault(s: &mut Scanner) -> Result<Error> {
    s.expect("<fault>", true)?;
    let value = decode_value(s)?;
    let illegal = || Error::protocol("illegal fault value");
    let code = value
        .get("faultCode")
        .and_then(Value::as_int)
        .and_then(|c| i32::try_from(c).ok())
        .ok_or_else(illegal)?;
    let message = match value.get("faultString") {
        Some(Value::String(m)) => String::from_utf8_lossy(m).into_owned(),
        _ => return Err(illegal()),
    };
    s.expect("</fault>", true)?;
    s.expect("</methodResponse>", false)?;
    s.chomp();
    if !s.at_end() {
        return Err(Error::protocol("unused data when parsing response"));
    }
    Ok(Error::Fault { code, message })
}

fn find_xml_version(s: &mut Scanner) -> Result<()> {
    let bad = || Error::protocol("bad xml version tag");
    if !s.starts_with("<?xml version=") {
        return Err(bad());
    }
    s.advance("<?xml version=".len());
    if !(s.starts_with("'") || s.starts_with("\"")) {
        return Err(bad());
    }
    s.advance(1);
    s.float().ok_or_else(bad)?;
    loop {
        if s.starts_with("?>") {
            break;
        }
        if s.at_end() || s.starts_with("\n") {
            return Err(bad());
        }
        s.advance(1);
    }
    s.advance(2);
    s.chomp();
    Ok(())
}

fn parse_header(s: &mut Scanner, kind: Kind) -> Result<Headers> {
    let mut headers = Headers::new();

    match kind {
        Kind::Request => {
            let method = request_token(s)?;
            if method.len() > 255 {
                return Err(Error::protocol("HTTP Method too long"));
            }
            if !method.eq_ignore_ascii_case("POST") {
                return Err(Error::protocol(format!(
                    "unsupported HTTP Method: '{}'",
                    method
                )));
            }
            let uri = request_token(s)?;
            let version = if s.starts_with("HTTP/1.0") {
                HttpVersion::Http10
            } else if s.starts_with("HTTP/1.1") {
                HttpVersion::Http11
            } else {
                return Err(Error::protocol("illegal HTTP Version"));
            };
            headers.insert(HTTP_VERSION, version.as_str());
            headers.insert(URI, uri);
        }
        Kind::Response => {
            let version = if s.starts_with("HTTP/1.0 ") {
                HttpVersion::Http10
            } else if s.starts_with("HTTP/1.1 ") {
                HttpVersion::Http11
            } else {
                return Err(Error::protocol("illegal HTTP version"));
            };
            headers.insert(HTTP_VERSION, version.as_str());
        }
    }

    // The rest of the first line (status code and reason) is not checked.
    s.take_until("\n")?;
    s.expect("\n", false)?;

    loop {
        if s.starts_with("\n") {
            s.expect("\n", false)?;
            break;
        }
        if s.starts_with("\r\n") {
            s.expect("\r\n", false)?;
            break;
        }
        if s.at_end() {
            return Err(Error::Eos);
        }
        let (name, value) = header_line(s)?;
        headers.insert(name, value);
    }
    s.chomp();

    Ok(headers)
}

fn request_token(s: &mut Scanner) -> Result<String> {
    let rest = s.rest();
    let end = match rest.iter().position(|&b| b == b' ' || b == b'\n') {
        Some(end) if rest[end] == b' ' => end,
        Some(_) => return Err(Error::protocol("illegal Request-Line")),
        None => return Err(Error::protocol("EOS reached early")),
    };
    let token = String::from_utf8_lossy(&rest[..end]).into_owned();
    s.advance(end + 1);
    Ok(token)
}

fn header_line(s: &mut Scanner) -> Result<(String, String)> {
    let line = s.line();
    let rest = s.rest();
    let eol = rest.iter().position(|&b| b == b'\n').ok_or(Error::Eos)?;
    let colon = rest[..eol]
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| Error::protocol(format!("illegal header line {}", line)))?;

    let name = normalize_name(&String::from_utf8_lossy(&rest[..colon]));
    let mut value = &rest[colon + 1..eol];
    while let [b' ' | b'\t', tail @ ..] = value {
        value = tail;
    }
    if let [head @ .., b'\r'] = value {
        value = head;
    }
    let value = String::from_utf8_lossy(value).into_owned();

    s.advance(eol);
    s.expect("\n", false)?;
    Ok((name, value))
}

fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if i == 0 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
    }
    out
}

/// Whether the connection stays open after this message.
///
/// HTTP/1.0 closes unless `Connection: keep-alive` is given, HTTP/1.1 stays
/// open unless `Connection: close` is given.
pub fn keep_alive(headers: &Headers) -> bool {
    let connection = headers.get("Connection");
    match headers.version() {
        Some(HttpVersion::Http10) => {
            connection.map_or(false, |c| c.eq_ignore_ascii_case("keep-alive"))
        }
        Some(HttpVersion::Http11) => connection.map_or(true, |c| !c.eq_ignore_ascii_case("close")),
        None => false,
    }
}

/// `Authorization` header value for HTTP Basic authentication.
///
/// Returns `None` when neither a name nor a password is given.
pub fn basic_credentials(user: Option<&str>, password: Option<&str>) -> Option<String> {
    if user.is_none() && password.is_none() {
        return None;
    }
    let pair = format!("{}:{}", user.unwrap_or(""), password.unwrap_or(""));
    Some(format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(pair)
    ))
}

/// Split a Basic `Authorization` header value into name and password.
pub fn parse_basic_auth(value: &str) -> Result<(String, String)> {
    let encoded = match value.get(..6) {
        Some(scheme) if scheme.eq_ignore_ascii_case("Basic ") => &value[6..],
        _ => return Err(Error::protocol("unsupported authentication method")),
    };
    let encoded: Vec<u8> = encoded
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| Error::protocol("illegal authentication string"))?;
    let decoded = String::from_utf8_lossy(&decoded);
    match decoded.split_once(':') {
        Some((name, pass)) => Ok((name.to_string(), pass.to_string())),
        None => Err(Error::protocol("illegal authentication string")),
    }
}

/// Escape text for use inside XML element content.
pub fn escape(text: &str) -> String {
    let mut out = Vec::with_capacity(text.len());
    escape_into(&mut out, text.as_bytes());
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_body(head: &str, body: &str) -> Vec<u8> {
        format!("{}Content-length: {}\r\n\r\n{}", head, body.len(), body).into_bytes()
    }

    const CALL: &str = "<?xml version=\"1.0\"?>\n<methodCall>\n\
        <methodName>examples.getStateName</methodName>\n\
        <params><param><value><i4>41</i4></value></param></params>\n\
        </methodCall>\n";

    #[test]
    fn test_request_layout() {
        let bytes = build_request(
            "/RPC2",
            "echo",
            &[Value::from("hi")],
            &[("X-Trace", "1")].into_iter().collect(),
            "agent/1",
        )
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let body = "<?xml version=\"1.0\"?>\r\n<methodCall>\r\n\t<methodName>echo</methodName>\r\n\
                    \t<params>\r\n\t\t<param>\r\n\t\t\t<value><string>hi</string></value>\r\n\
                    \t\t</param>\r\n\t</params>\r\n</methodCall>";
        assert_eq!(
            text,
            format!(
                "POST /RPC2 HTTP/1.1\r\nUser-Agent: agent/1\r\nX-Trace: 1\r\n\
                 Content-Type: text/xml\r\nContent-length: {}\r\n\r\n{}",
                body.len(),
                body
            )
        );
    }

    #[test]
    fn test_request_roundtrip_headers() {
        let mut extra = Headers::new();
        extra.insert("Host", "example.com");
        extra.insert("X-Custom", "value: with colon");
        let params = vec![
            Value::Int(1),
            Value::structure(vec![("k", Value::from("v"))]),
        ];
        let bytes = build_request("/path", "do.it", &params, &extra, "ua").unwrap();
        let request = parse_request(&bytes).unwrap();
        assert_eq!(request.method, "do.it");
        assert_eq!(request.params, params);
        assert_eq!(request.headers.get("Host"), Some("example.com"));
        assert_eq!(request.headers.get("x-custom"), Some("value: with colon"));
        assert_eq!(request.headers.get("Content-Type"), Some("text/xml"));
        assert_eq!(request.headers.uri(), Some("/path"));
        assert_eq!(request.headers.version(), Some(HttpVersion::Http11));
        assert!(request.headers.iter().any(|(n, _)| n == "X-custom"));
    }

    #[test]
    fn test_parse_request_variants() {
        let bytes = request_with_body("post /RPC2 HTTP/1.0\nHost: h\n", CALL);
        let request = parse_request(&bytes).unwrap();
        assert_eq!(request.method, "examples.getStateName");
        assert_eq!(request.params, vec![Value::Int(41)]);
        assert_eq!(request.headers.version(), Some(HttpVersion::Http10));

        let no_params = "<?xml version='1.0'?><methodCall><methodName>ping</methodName></methodCall>";
        let request = parse_request(&request_with_body("POST / HTTP/1.1\r\n", no_params)).unwrap();
        assert!(request.params.is_empty());
    }

    #[test]
    fn test_request_noise_between_tags() {
        let compact = "<?xml version=\"1.0\"?><methodCall><methodName>m</methodName>\
            <params><param><value><i4>1</i4></value></param>\
            <param><value><struct><member><name>k</name><value>v</value></member>\
            </struct></value></param></params></methodCall>";
        let expected = parse_request(&request_with_body("POST / HTTP/1.1\r\n", compact)).unwrap();
        assert_eq!(expected.params.len(), 2);

        let at: Vec<usize> = compact.match_indices("><").map(|(i, _)| i + 1).collect();
        for noise in [" \r\n", "<!-- c -->\t"] {
            for &i in &at {
                let noisy = format!("{}{}{}", &compact[..i], noise, &compact[i..]);
                let request = parse_request(&request_with_body("POST / HTTP/1.1\r\n", &noisy))
                    .unwrap_or_else(|e| panic!("noise at {}: {}", i, e));
                assert_eq!(request.method, "m");
                assert_eq!(request.params, expected.params, "noise at {}", i);
            }
        }
    }

    #[test]
    fn test_parse_request_errors() {
        let e = parse_request(&request_with_body("GET /RPC2 HTTP/1.1\r\n", CALL)).unwrap_err();
        assert_eq!(e.to_string(), "unsupported HTTP Method: 'GET'");

        let e = parse_request(&request_with_body("POST /RPC2 HTTP/2.0\r\n", CALL)).unwrap_err();
        assert_eq!(e.to_string(), "illegal HTTP Version");

        let e = parse_request(&request_with_body("POST /RPC2 HTTP/1.1\r\n", &format!("{}junk", CALL)))
            .unwrap_err();
        assert_eq!(e.to_string(), "unused data when parsing request");

        let e = parse_request(&request_with_body("POST /RPC2 HTTP/1.1\r\n", "<methodCall/>"))
            .unwrap_err();
        assert_eq!(e.to_string(), "bad xml version tag");

        let e = parse_request(b"POST /RPC2\n").unwrap_err();
        assert_eq!(e.to_string(), "illegal Request-Line");
    }

    #[test]
    fn test_response_and_fault() {
        let bytes = build_response(&Value::from("Colorado"), &Headers::new(), "srv").unwrap();
        let response = parse_response(&bytes).unwrap();
        assert_eq!(response.value, Value::from("Colorado"));
        assert_eq!(response.headers.get("Server"), Some("srv"));
        assert!(keep_alive(&response.headers));

        let bytes = build_fault(4, "Too many <params>", &Headers::new(), "srv").unwrap();
        assert_eq!(
            parse_response(&bytes).unwrap_err(),
            Error::fault(4, "Too many <params>")
        );

        let bad = "HTTP/1.1 200 OK\r\nContent-length: 0\r\n\r\n<?xml version=\"1.0\"?>\
                   <methodResponse><fault><value><struct></struct></value></fault></methodResponse>";
        assert_eq!(
            parse_response(bad.as_bytes()).unwrap_err().to_string(),
            "illegal fault value"
        );

        let trailing = format!("{}garbage", String::from_utf8(build_response(&Value::Int(1), &Headers::new(), "s").unwrap()).unwrap());
        assert_eq!(
            parse_response(trailing.as_bytes()).unwrap_err().to_string(),
            "unused data when parsing response"
        );
    }

    #[test]
    fn test_keep_alive() {
        let head = |s: &str| parse_response_head(s.as_bytes()).unwrap();
        assert!(!keep_alive(&head("HTTP/1.0 200 OK\r\n\r\n")));
        assert!(keep_alive(&head("HTTP/1.0 200 OK\r\nConnection: Keep-Alive\r\n\r\n")));
        assert!(keep_alive(&head("HTTP/1.1 200 OK\r\n\r\n")));
        assert!(!keep_alive(&head("HTTP/1.1 200 OK\r\nconnection: CLOSE\r\n\r\n")));
        assert!(parse_response_head(b"HTTP/2 200 OK\r\n\r\n").is_err());
    }

    #[test]
    fn test_basic_auth() {
        assert_eq!(basic_credentials(None, None), None);
        let value = basic_credentials(Some("Aladdin"), Some("open sesame")).unwrap();
        assert_eq!(value, "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
        assert_eq!(
            parse_basic_auth(&value).unwrap(),
            ("Aladdin".to_string(), "open sesame".to_string())
        );
        assert_eq!(
            parse_basic_auth(&basic_credentials(None, Some("pw")).unwrap()).unwrap(),
            (String::new(), "pw".to_string())
        );
        assert_eq!(
            parse_basic_auth("Digest abc").unwrap_err().to_string(),
            "unsupported authentication method"
        );
        assert_eq!(
            parse_basic_auth("basic bm9jb2xvbg==").unwrap_err().to_string(),
            "illegal authentication string"
        );
    }

    #[test]
    fn test_headers() {
        let mut h = Headers::new();
        h.insert("Content-Length", "1");
        h.insert("content-length", "2");
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("CONTENT-LENGTH"), Some("2"));
        assert_eq!(h.remove("Content-length"), Some("2".to_string()));
        assert!(h.is_empty());
        assert_eq!(normalize_name("tRANSFER-ENCODING"), "Transfer-encoding");
        assert_eq!(escape("a<&>"), "a&lt;&amp;>");
    }
}
