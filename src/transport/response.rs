//! Minimal HTTP/1.x response parser.
//!
//! Works on the complete byte blob read from the socket and returns borrowed
//! views into it. Only what the frame protocol needs is understood: status
//! line, headers and a body bounded by `Content-Length` or connection close.

use super::FetchError;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Header fields in arrival order, looked up case-insensitively.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct Response<'a> {
    pub status: u16,
    pub reason: &'a str,
    pub headers: Headers,
    pub body: &'a [u8],
}

impl Response<'_> {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

pub fn parse_response(raw: &[u8]) -> Result<Response<'_>, FetchError> {
    let boundary = find(raw, HEADER_TERMINATOR)
        .ok_or(FetchError::Malformed("missing header terminator"))?;

    let head = std::str::from_utf8(&raw[..boundary])
        .map_err(|_| FetchError::Malformed("header section is not utf-8"))?;
    let body = &raw[boundary + HEADER_TERMINATOR.len()..];

    let mut lines = head.split("\r\n");
    let (status, reason) = parse_status_line(lines.next().unwrap_or_default())?;

    let headers = Headers(
        lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect(),
    );

    if headers
        .get("transfer-encoding")
        .is_some_and(|encoding| encoding.to_ascii_lowercase().contains("chunked"))
    {
        return Err(FetchError::Malformed("chunked transfer encoding"));
    }

    let body = match headers.get("content-length") {
        Some(length) => {
            let length = length
                .parse::<usize>()
                .map_err(|_| FetchError::Malformed("invalid content-length"))?;
            body.get(..length)
                .ok_or(FetchError::Malformed("body shorter than content-length"))?
        }
        None => body,
    };

    Ok(Response {
        status,
        reason,
        headers,
        body,
    })
}

/// Whether `raw` already holds a full response with a declared length.
///
/// Lets the reader stop before the peer closes the connection.
pub fn is_complete(raw: &[u8]) -> bool {
    let Some(boundary) = find(raw, HEADER_TERMINATOR) else {
        return false;
    };
    let Ok(head) = std::str::from_utf8(&raw[..boundary]) else {
        return false;
    };

    head.split("\r\n")
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .is_some_and(|length| raw.len() - boundary - HEADER_TERMINATOR.len() >= length)
}

fn parse_status_line(line: &str) -> Result<(u16, &str), FetchError> {
    let mut parts = line.splitn(3, ' ');

    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(FetchError::Malformed("invalid status line"));
    }

    let status = parts
        .next()
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or(FetchError::Malformed("invalid status code"))?;

    Ok((status, parts.next().unwrap_or_default().trim()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_headers_and_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: image/webp\r\nTronbyt-Dwell-Secs: 20\r\nContent-Length: 4\r\n\r\nRIFF";
        let response = parse_response(raw).expect("should parse");

        assert_eq!(response.status, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.header("content-length"), Some("4"));
        assert_eq!(response.header("content-type"), Some("image/webp"));
        assert_eq!(response.header("TRONBYT-DWELL-SECS"), Some("20"));
        assert_eq!(response.body, b"RIFF");
    }

    #[test]
    fn body_runs_to_connection_close_without_length() {
        let raw = b"HTTP/1.0 200 OK\r\n\r\n\x01\x02\x03";
        let response = parse_response(raw).expect("should parse");
        assert_eq!(response.headers, Headers::default());
        assert_eq!(response.body, &[1, 2, 3]);
    }

    #[test]
    fn extra_bytes_after_declared_length_are_dropped() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nabcdef";
        assert_eq!(parse_response(raw).expect("should parse").body, b"ab");
    }

    #[test]
    fn missing_boundary_is_malformed() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n";
        assert_eq!(
            parse_response(raw),
            Err(FetchError::Malformed("missing header terminator"))
        );
    }

    #[test]
    fn garbage_status_line_is_malformed() {
        assert!(matches!(
            parse_response(b"SSH-2.0-OpenSSH\r\n\r\n"),
            Err(FetchError::Malformed(_))
        ));
        assert!(matches!(
            parse_response(b"HTTP/1.1 2000 OK\r\n\r\n"),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn truncated_body_is_malformed() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc";
        assert_eq!(
            parse_response(raw),
            Err(FetchError::Malformed("body shorter than content-length"))
        );
        assert!(!is_complete(raw));
    }

    #[test]
    fn chunked_is_rejected() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nRIFF\r\n0\r\n\r\n";
        assert!(matches!(parse_response(raw), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn completeness_needs_declared_length() {
        assert!(is_complete(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc"));
        assert!(!is_complete(b"HTTP/1.1 200 OK\r\n\r\nabc"));
        assert!(!is_complete(b"HTTP/1.1 200 OK\r\nContent-Len"));
    }
}
