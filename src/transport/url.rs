use super::FetchError;
use std::fmt;

/// Plain `http://` URL split into the parts a request needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpUrl {
    pub host: String,
    pub port: u16,
    /// Path including the query, always starting with `/`.
    pub path: String,
}

impl HttpUrl {
    pub fn parse(url: &str) -> Result<Self, FetchError> {
        let url = url.trim();
        let url = url.split('#').next().unwrap_or_default();

        let Some(rest) = strip_prefix_ignore_case(url, "http://") else {
            return Err(FetchError::Malformed("only plain http urls are supported"));
        };

        let (authority, path) = match rest.find(['/', '?']) {
            Some(index) if rest[index..].starts_with('?') => {
                (&rest[..index], format!("/{}", &rest[index..]))
            }
            Some(index) => (&rest[..index], rest[index..].to_string()),
            None => (rest, "/".to_string()),
        };

        // userinfo is never used by this protocol
        let authority = authority.rsplit('@').next().unwrap_or_default();
        let (host, port) = split_host_port(authority)?;

        Ok(Self {
            host: host.to_string(),
            port,
            path,
        })
    }

    /// Resolve a `Location` header against this URL.
    ///
    /// Anything that is not absolute stays on the same host.
    pub fn join(&self, location: &str) -> Result<Self, FetchError> {
        let location = location.trim();

        if location.contains("://") {
            return Self::parse(location);
        }
        if let Some(rest) = location.strip_prefix("//") {
            return Self::parse(&format!("http://{rest}"));
        }
        if location.is_empty() {
            return Err(FetchError::Malformed("empty redirect location"));
        }

        let path = if location.starts_with('/') {
            location.to_string()
        } else {
            let current = self.path.split('?').next().unwrap_or("/");
            let dir = &current[..=current.rfind('/').unwrap_or(0)];
            format!("{dir}{location}")
        };

        Ok(self.with_path(path))
    }

    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            path: path.into(),
        }
    }

    /// Value of the `Host` header.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        match self.port {
            80 => host,
            port => format!("{host}:{port}"),
        }
    }
}

impl fmt::Display for HttpUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}{}", self.authority(), self.path)
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

fn split_host_port(authority: &str) -> Result<(&str, u16), FetchError> {
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or(FetchError::Malformed("unterminated ipv6 host"))?;
        let port = rest[end + 1..].strip_prefix(':');
        (&rest[..end], port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(FetchError::Malformed("missing host"));
    }

    let port = match port {
        Some(port) => port
            .parse()
            .map_err(|_| FetchError::Malformed("invalid port"))?,
        None => 80,
    };

    Ok((host, port))
}

/// Percent-encode everything outside the unreserved set.
pub fn encode_path_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_port_and_path() {
        let url = HttpUrl::parse("http://192.168.1.100:8000/prefix").expect("should parse");
        assert_eq!(url.host, "192.168.1.100");
        assert_eq!(url.port, 8000);
        assert_eq!(url.path, "/prefix");
        assert_eq!(url.to_string(), "http://192.168.1.100:8000/prefix");
    }

    #[test]
    fn parse_defaults() {
        let url = HttpUrl::parse("HTTP://tronbyt.local").expect("should parse");
        assert_eq!(url.port, 80);
        assert_eq!(url.path, "/");
        assert_eq!(url.authority(), "tronbyt.local");
    }

    #[test]
    fn parse_ipv6_host() {
        let url = HttpUrl::parse("http://[::1]:8080/x").expect("should parse");
        assert_eq!(url.host, "::1");
        assert_eq!(url.authority(), "[::1]:8080");
    }

    #[test]
    fn rejects_tls_and_garbage() {
        assert!(matches!(
            HttpUrl::parse("https://example.com/"),
            Err(FetchError::Malformed(_))
        ));
        assert!(HttpUrl::parse("example.com").is_err());
        assert!(HttpUrl::parse("http://:80/").is_err());
        assert!(HttpUrl::parse("http://host:http/").is_err());
    }

    #[test]
    fn relative_redirects_stay_on_host() {
        let base = HttpUrl::parse("http://server:8000/v0/devices/a/next").expect("should parse");

        let absolute_path = base.join("/frames/1").expect("should join");
        assert_eq!(absolute_path.to_string(), "http://server:8000/frames/1");

        let relative = base.join("other?x=1").expect("should join");
        assert_eq!(relative.to_string(), "http://server:8000/v0/devices/a/other?x=1");

        let elsewhere = base.join("http://cdn:9000/f").expect("should join");
        assert_eq!(elsewhere.host, "cdn");
        assert_eq!(elsewhere.port, 9000);

        let scheme_relative = base.join("//cdn/f").expect("should join");
        assert_eq!(scheme_relative.to_string(), "http://cdn/f");
    }

    #[test]
    fn encodes_reserved_characters() {
        assert_eq!(encode_path_segment("living-room_1"), "living-room_1");
        assert_eq!(encode_path_segment("a b/c"), "a%20b%2Fc");
    }
}
