//! Frame fetching over plain TCP.
//!
//! One request per connection, no keep-alive, no TLS. Redirect following and
//! endpoint fallback are the only retries done here; retry cadence belongs to
//! the runtime loop.

mod response;
mod url;

pub use response::{Headers, Response, parse_response};
pub use url::{HttpUrl, encode_path_segment};

use crate::device_config::{DeviceConfig, FrameProfile};
use log::{debug, info, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{
    fmt,
    io::{self, ErrorKind, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_DWELL_SECS: u32 = 15;
pub const DEFAULT_MAX_REDIRECTS: u8 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 512 * 1024;

/// Endpoint templates of the on-device decode profile, in fallback order.
pub const DECODE_ENDPOINTS: &[&str] = &[
    "/v0/devices/{id}/next",
    "/devices/{id}/next",
    "/api/v1/devices/{id}/next",
];

/// Endpoint templates of the bridge profile.
pub const BRIDGE_ENDPOINTS: &[&str] = &["/{id}/next_rgb"];

const HEADER_DWELL: &str = "Tronbyt-Dwell-Secs";
const HEADER_BRIGHTNESS: &str = "Tronbyt-Brightness";
const HEADER_LEGACY_BRIGHTNESS: &str = "X-Brightness";
const HEADER_IMAGE_WIDTH: &str = "X-Image-Width";
const HEADER_IMAGE_HEIGHT: &str = "X-Image-Height";
const HEADER_PIXEL_FORMAT: &str = "X-Pixel-Format";

const READ_CHUNK_BYTES: usize = 4096;

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FetchError {
    /// Response could not be parsed.
    Malformed(&'static str),
    /// Unexpected status code.
    Http(u16),
    /// Credential rejected; retrying with the same one is pointless.
    Unauthorized,
    Timeout,
    /// Connect, read or write failed for another reason.
    Network(ErrorKind),
    /// Redirect chain longer than the hop budget.
    TooManyRedirects,
}

impl FetchError {
    fn from_io(e: &io::Error) -> Self {
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => FetchError::Timeout,
            kind => FetchError::Network(kind),
        }
    }

    /// Text short enough for the status line of the matrix.
    pub fn short_label(&self) -> String {
        match self {
            FetchError::Malformed(_) => "Bad Resp".to_string(),
            FetchError::Http(code) => format!("HTTP {code}"),
            FetchError::Unauthorized => "Auth Err".to_string(),
            FetchError::Timeout => "Timeout".to_string(),
            FetchError::Network(_) => "Network Err".to_string(),
            FetchError::TooManyRedirects => "Redirects".to_string(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Malformed(reason) => write!(f, "malformed response: {reason}"),
            FetchError::Http(code) => write!(f, "unexpected http status {code}"),
            FetchError::Unauthorized => write!(f, "unauthorized"),
            FetchError::Timeout => write!(f, "timed out"),
            FetchError::Network(kind) => write!(f, "network error: {kind}"),
            FetchError::TooManyRedirects => write!(f, "too many redirects"),
        }
    }
}

impl std::error::Error for FetchError {}

/// A frame as delivered by the server, plus its control headers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub dwell_secs: u32,
    /// `None` means "keep the current brightness".
    pub brightness: Option<u8>,
    pub content_type: Option<String>,
    /// Image size announced by a bridge server.
    pub reported_size: Option<(u32, u32)>,
    pub pixel_format: Option<String>,
}

impl Frame {
    fn from_response(response: &Response<'_>) -> Self {
        let brightness = response
            .header(HEADER_BRIGHTNESS)
            .or_else(|| response.header(HEADER_LEGACY_BRIGHTNESS))
            .and_then(parse_brightness);

        let dimension = |name| {
            response
                .header(name)
                .and_then(|value| value.parse::<u32>().ok())
        };
        let reported_size = dimension(HEADER_IMAGE_WIDTH).zip(dimension(HEADER_IMAGE_HEIGHT));

        Self {
            data: response.body.to_vec(),
            dwell_secs: parse_dwell(response.header(HEADER_DWELL)),
            brightness,
            content_type: response.header("content-type").map(str::to_string),
            reported_size,
            pixel_format: response.header(HEADER_PIXEL_FORMAT).map(str::to_string),
        }
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.dwell_secs.into())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FetchResult {
    Frame(Frame),
    Redirect { location: String, remaining_hops: u8 },
    Empty,
    Error(FetchError),
}

/// Dwell header in seconds, default if absent or not a number.
pub fn parse_dwell(value: Option<&str>) -> u32 {
    value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(DEFAULT_DWELL_SECS)
}

/// Brightness header; negative or unparsable means "no change".
pub fn parse_brightness(value: &str) -> Option<u8> {
    let value = value.trim().parse::<i64>().ok()?;
    if value < 0 {
        return None;
    }
    Some(value.min(100) as u8)
}

// ============================================================================
// Client
// ============================================================================

/// Producer of the next frame for a device.
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait FrameSource {
    fn next_frame(&self, config: &DeviceConfig) -> FetchResult;
}

impl FrameSource for TransportClient {
    fn next_frame(&self, config: &DeviceConfig) -> FetchResult {
        self.fetch_next_frame(config)
    }
}

#[derive(Clone, Debug)]
pub struct TransportClient {
    timeout: Duration,
    max_redirects: u8,
    max_response_bytes: usize,
    redirect_delay: Duration,
}

impl Default for TransportClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_REDIRECTS)
    }
}

impl TransportClient {
    pub fn new(timeout: Duration, max_redirects: u8) -> Self {
        Self {
            timeout,
            max_redirects,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            redirect_delay: Duration::ZERO,
        }
    }

    pub fn with_max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes;
        self
    }

    /// Pause before following each redirect.
    pub fn with_redirect_delay(mut self, delay: Duration) -> Self {
        self.redirect_delay = delay;
        self
    }

    /// Single request without following redirects
    ///
    /// # Arguments
    /// * `endpoint` - Absolute `http://` URL
    /// * `api_key` - Sent verbatim as `Authorization` header
    ///
    /// # Returns
    /// A redirect is returned as [`FetchResult::Redirect`] carrying the full hop budget
    pub fn fetch(&self, endpoint: &str, api_key: Option<&str>) -> FetchResult {
        match HttpUrl::parse(endpoint) {
            Ok(url) => self.request(&url, api_key, self.max_redirects),
            Err(e) => FetchResult::Error(e),
        }
    }

    /// Request `url`, following at most `max_redirects` redirects
    pub fn fetch_following(&self, url: &HttpUrl, api_key: Option<&str>) -> FetchResult {
        let mut url = url.clone();
        let mut hops = self.max_redirects;

        loop {
            match self.request(&url, api_key, hops) {
                FetchResult::Redirect {
                    location,
                    remaining_hops,
                } => {
                    if remaining_hops == 0 {
                        warn!("redirect limit reached at {url}");
                        return FetchResult::Error(FetchError::TooManyRedirects);
                    }

                    url = match url.join(&location) {
                        Ok(next) => next,
                        Err(e) => return FetchResult::Error(e),
                    };
                    hops = remaining_hops - 1;

                    debug!("following redirect to {url} ({hops} hops left)");

                    if !self.redirect_delay.is_zero() {
                        std::thread::sleep(self.redirect_delay);
                    }
                }
                result => return result,
            }
        }
    }

    /// Fetch the next frame for a device
    ///
    /// Tries the endpoint templates of the configured profile in order. Only a
    /// 404 moves on to the next template; any other outcome ends the search.
    ///
    /// # Arguments
    /// * `config` - Device configuration with server address and identity
    ///
    /// # Returns
    /// The result of the first template that did not answer 404
    pub fn fetch_next_frame(&self, config: &DeviceConfig) -> FetchResult {
        let base = match HttpUrl::parse(&config.server_url) {
            Ok(base) => base,
            Err(e) => return FetchResult::Error(e),
        };
        let api_key = config.api_key.as_deref();
        let templates = match config.profile {
            FrameProfile::Decode => DECODE_ENDPOINTS,
            FrameProfile::Bridge => BRIDGE_ENDPOINTS,
        };
        let id = encode_path_segment(&config.display_id);

        for template in templates {
            let path = format!(
                "{}{}",
                base.path.trim_end_matches('/'),
                template.replace("{id}", &id)
            );
            let url = base.with_path(path);

            match self.fetch_following(&url, api_key) {
                FetchResult::Error(FetchError::Http(404)) => {
                    info!("{url} not found, trying next endpoint");
                }
                result => return result,
            }
        }

        FetchResult::Error(FetchError::Http(404))
    }

    fn request(&self, url: &HttpUrl, api_key: Option<&str>, remaining_hops: u8) -> FetchResult {
        debug!("GET {url}");

        let raw = match self.exchange(url, api_key) {
            Ok(raw) => raw,
            Err(e) => return FetchResult::Error(e),
        };

        match parse_response(&raw) {
            Ok(response) => classify(&response, remaining_hops),
            Err(e) => FetchResult::Error(e),
        }
    }

    fn exchange(&self, url: &HttpUrl, api_key: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let mut stream = self.connect(url)?;

        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
            .map_err(|e| FetchError::from_io(&e))?;

        stream
            .write_all(build_request(url, api_key).as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| FetchError::from_io(&e))?;

        let mut raw = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_BYTES];

        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let room = self.max_response_bytes - raw.len();
                    raw.extend_from_slice(&chunk[..n.min(room)]);

                    if raw.len() >= self.max_response_bytes {
                        warn!("response from {url} exceeds {} bytes", self.max_response_bytes);
                        break;
                    }
                    if response::is_complete(&raw) {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FetchError::from_io(&e)),
            }
        }

        Ok(raw)
    }

    fn connect(&self, url: &HttpUrl) -> Result<TcpStream, FetchError> {
        let addrs = (url.host.as_str(), url.port)
            .to_socket_addrs()
            .map_err(|e| FetchError::from_io(&e))?;

        let mut last_error = FetchError::Network(ErrorKind::NotFound);
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("connect to {addr} failed: {e}");
                    last_error = FetchError::from_io(&e);
                }
            }
        }

        Err(last_error)
    }
}

fn build_request(url: &HttpUrl, api_key: Option<&str>) -> String {
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}/{}\r\nAccept: */*\r\nConnection: close\r\n",
        url.path,
        url.authority(),
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    );
    if let Some(key) = api_key.filter(|key| !key.is_empty()) {
        request.push_str(&format!("Authorization: {key}\r\n"));
    }
    request.push_str("\r\n");
    request
}

fn classify(response: &Response<'_>, remaining_hops: u8) -> FetchResult {
    match response.status {
        200 if response.body.is_empty() => FetchResult::Empty,
        200 => FetchResult::Frame(Frame::from_response(response)),
        204 => FetchResult::Empty,
        301 | 302 | 303 | 307 | 308 => match response.header("location") {
            Some(location) => FetchResult::Redirect {
                location: location.to_string(),
                remaining_hops,
            },
            None => FetchResult::Error(FetchError::Malformed("redirect without location")),
        },
        401 => FetchResult::Error(FetchError::Unauthorized),
        status => FetchResult::Error(FetchError::Http(status)),
    }
}
