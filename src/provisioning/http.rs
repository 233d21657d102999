//! Just enough HTTP/1.x server side for the setup portal.

use anyhow::{Context, Result, bail, ensure};
use log::{debug, warn};
use std::io::{ErrorKind, Read};

// ============================================================================
// Constants
// ============================================================================

pub const MAX_HEADER_BYTES: usize = 8 * 1024;
pub const MAX_BODY_BYTES: usize = 4 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK_BYTES: usize = 1024;

// ============================================================================
// Request
// ============================================================================

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Request {
    pub method: String,
    /// Request target without the query string.
    pub path: String,
    pub body: Vec<u8>,
}

/// Read one request from `stream`
///
/// Headers must arrive completely, a body is read up to its
/// `Content-Length`. A body cut short by the peer or a read timeout is
/// returned as far as it got.
///
/// # Arguments
/// * `stream` - Connection with a read timeout already configured
///
/// # Returns
/// Parsed request or error if the headers are incomplete, too large or invalid
pub fn read_request<S: Read>(stream: &mut S) -> Result<Request> {
    let mut raw = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];

    let boundary = loop {
        if let Some(boundary) = find(&raw, HEADER_TERMINATOR) {
            break boundary;
        }
        ensure!(
            raw.len() <= MAX_HEADER_BYTES,
            "request headers exceed {MAX_HEADER_BYTES} bytes"
        );

        let n = read_some(stream, &mut chunk).context("failed to read request headers")?;
        if n == 0 {
            bail!("connection closed before end of headers");
        }
        raw.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&raw[..boundary]);
    let mut lines = head.split("\r\n");

    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(target)) = (request_line.next(), request_line.next()) else {
        bail!("invalid request line");
    };
    let path = target.split('?').next().unwrap_or(target);

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value.trim().parse::<usize>())
        .transpose()
        .context("invalid content-length")?
        .unwrap_or(0);
    ensure!(
        content_length <= MAX_BODY_BYTES,
        "request body of {content_length} bytes exceeds {MAX_BODY_BYTES}"
    );

    let mut body = raw[boundary + HEADER_TERMINATOR.len()..].to_vec();
    while body.len() < content_length {
        match read_some(stream, &mut chunk) {
            Ok(0) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
            Err(e) => {
                warn!("request body incomplete: {e}");
                break;
            }
        }
    }
    body.truncate(content_length);

    debug!("{method} {path} ({} byte body)", body.len());

    Ok(Request {
        method: method.to_string(),
        path: path.to_string(),
        body,
    })
}

fn read_some<S: Read>(stream: &mut S, buffer: &mut [u8]) -> std::io::Result<usize> {
    loop {
        match stream.read(buffer) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ============================================================================
// Reply
// ============================================================================

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    Html(&'static str),
    Json(String),
    Redirect(&'static str),
}

impl Reply {
    pub fn status(&self) -> u16 {
        match self {
            Reply::Html(_) | Reply::Json(_) => 200,
            Reply::Redirect(_) => 302,
        }
    }

    /// Complete response including headers, always `Connection: close`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let (content_type, body, location) = match self {
            Reply::Html(page) => ("text/html; charset=utf-8", page.as_bytes(), None),
            Reply::Json(json) => ("application/json", json.as_bytes(), None),
            Reply::Redirect(location) => ("text/plain", &[][..], Some(*location)),
        };

        let mut head = match location {
            Some(location) => format!("HTTP/1.1 302 Found\r\nLocation: {location}\r\n"),
            None => "HTTP/1.1 200 OK\r\n".to_string(),
        };
        head.push_str(&format!(
            "Content-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        ));

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// Hands out data in fixed pieces, then fails like a timed out socket.
    struct Trickle {
        pieces: Vec<Vec<u8>>,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pieces.is_empty() {
                return Err(io::Error::new(ErrorKind::WouldBlock, "timed out"));
            }
            let piece = self.pieces.remove(0);
            buf[..piece.len()].copy_from_slice(&piece);
            Ok(piece.len())
        }
    }

    #[test]
    fn reads_body_across_reads() {
        let mut stream = Trickle {
            pieces: vec![
                b"POST /save HTTP/1.1\r\nContent-Length: 10\r\n".to_vec(),
                b"\r\n{\"ssid\"".to_vec(),
                b":1}".to_vec(),
            ],
        };

        let request = read_request(&mut stream).expect("should read");
        assert_eq!((request.method.as_str(), request.path.as_str()), ("POST", "/save"));
        assert_eq!(request.body, b"{\"ssid\":1}");
    }

    #[test]
    fn query_is_not_part_of_the_path() {
        let mut stream = Cursor::new(b"GET /generate_204?probe=1 HTTP/1.1\r\n\r\n".to_vec());
        let request = read_request(&mut stream).expect("should read");
        assert_eq!(request.path, "/generate_204");
        assert!(request.body.is_empty());
    }

    #[test]
    fn timed_out_body_keeps_what_arrived() {
        let mut stream = Trickle {
            pieces: vec![b"POST /save HTTP/1.1\r\nContent-Length: 100\r\n\r\n{\"a\"".to_vec()],
        };
        assert_eq!(read_request(&mut stream).expect("should read").body, b"{\"a\"");
    }

    #[test]
    fn incomplete_or_oversized_headers_fail() {
        let mut closed = Cursor::new(b"GET / HTTP/1.1\r\nHost: x\r\n".to_vec());
        assert!(read_request(&mut closed).is_err());

        let mut huge = Cursor::new(
            [b"GET / HTTP/1.1\r\nX-Pad: ".as_slice(), &[b'a'; MAX_HEADER_BYTES + 1]].concat(),
        );
        assert!(read_request(&mut huge).is_err());

        let mut garbage = Cursor::new(b"\r\n\r\n".to_vec());
        assert!(read_request(&mut garbage).is_err());
    }

    #[test]
    fn redirect_has_location_and_no_body() {
        let bytes = Reply::Redirect("http://192.168.4.1/").to_bytes();
        let text = String::from_utf8(bytes).expect("ascii");

        assert!(text.starts_with("HTTP/1.1 302 Found\r\nLocation: http://192.168.4.1/\r\n"));
        assert!(text.ends_with("Content-Length: 0\r\nConnection: close\r\n\r\n"));
    }

    #[test]
    fn json_reply_declares_length() {
        let bytes = Reply::Json(r#"{"success":true}"#.to_string()).to_bytes();
        let text = String::from_utf8(bytes).expect("ascii");

        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 16\r\n"));
        assert!(text.ends_with(r#"{"success":true}"#));
    }
}
