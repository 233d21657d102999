//! Persisted device configuration.
//!
//! The record lives in a single INI file which is always rewritten as a whole
//! (temporary file plus rename). A missing file or a placeholder network name
//! means the device has not been set up yet.

use anyhow::{Context, Result, bail, ensure};
use ini::Ini;
use log::{debug, info, warn};
use serde_valid::Validate;
use std::{
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_SERVER_URL: &str = "http://tronbyt.local:8000";
pub const DEFAULT_WIDTH: u32 = 64;
pub const DEFAULT_HEIGHT: u32 = 32;
pub const DEFAULT_BRIGHTNESS: u8 = 50;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_DIMENSION: u32 = 256;

/// Network names shipped in sample configuration files.
const PLACEHOLDER_SSIDS: &[&str] = &["YourWiFiSSID", "YOUR_WIFI_SSID", "YourWiFiNetwork"];

const SECTION_WIFI: &str = "wifi";
const SECTION_SERVER: &str = "server";
const SECTION_DISPLAY: &str = "display";
const SECTION_RUNTIME: &str = "runtime";

// ============================================================================
// Types
// ============================================================================

/// How the server frames the "next frame" response.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FrameProfile {
    /// Encoded image decoded on the device into RGB565.
    #[default]
    Decode,
    /// Raw pixels prepared by a bridge service, no decode step.
    Bridge,
}

impl fmt::Display for FrameProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameProfile::Decode => write!(f, "decode"),
            FrameProfile::Bridge => write!(f, "bridge"),
        }
    }
}

impl FromStr for FrameProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "decode" => Ok(FrameProfile::Decode),
            "bridge" => Ok(FrameProfile::Bridge),
            other => bail!("unknown frame profile: {other}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Validate)]
pub struct DeviceConfig {
    #[validate(min_length = 1)]
    pub ssid: String,
    pub password: String,
    #[validate(min_length = 1)]
    pub server_url: String,
    #[validate(min_length = 1)]
    pub display_id: String,
    pub api_key: Option<String>,
    #[validate(minimum = 1)]
    #[validate(maximum = 256)]
    pub width: u32,
    #[validate(minimum = 1)]
    #[validate(maximum = 256)]
    pub height: u32,
    #[validate(maximum = 100)]
    pub brightness: u8,
    #[validate(minimum = 1)]
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub update_interval: Duration,
    pub profile: FrameProfile,
}

impl DeviceConfig {
    /// Configuration with default raster and runtime settings.
    ///
    /// An empty `server_url` falls back to [`DEFAULT_SERVER_URL`].
    pub fn new(ssid: &str, password: &str, server_url: &str, display_id: &str) -> Self {
        let server_url = match server_url.trim() {
            "" => DEFAULT_SERVER_URL,
            url => url,
        };

        Self {
            ssid: ssid.to_string(),
            password: password.to_string(),
            server_url: server_url.trim_end_matches('/').to_string(),
            display_id: display_id.trim().to_string(),
            api_key: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            brightness: DEFAULT_BRIGHTNESS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            profile: FrameProfile::default(),
        }
    }

    /// True once the record holds real credentials.
    pub fn is_configured(&self) -> bool {
        !is_placeholder_ssid(&self.ssid)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();

        ini.with_section(Some(SECTION_WIFI))
            .set("ssid", &self.ssid)
            .set("password", &self.password);

        let mut server = ini.with_section(Some(SECTION_SERVER));
        server
            .set("url", &self.server_url)
            .set("display_id", &self.display_id);
        if let Some(api_key) = &self.api_key {
            server.set("api_key", api_key);
        }
        server.set("profile", self.profile.to_string());

        ini.with_section(Some(SECTION_DISPLAY))
            .set("width", self.width.to_string())
            .set("height", self.height.to_string())
            .set("brightness", self.brightness.to_string());

        ini.with_section(Some(SECTION_RUNTIME))
            .set("max_retries", self.max_retries.to_string())
            .set("retry_delay", self.retry_delay.as_secs_f64().to_string())
            .set("update_interval", self.update_interval.as_secs_f64().to_string());

        ini
    }

    /// Build a config from a parsed record
    ///
    /// Only `wifi.ssid` decides whether the record is usable. Every other field
    /// that is missing, unparsable or out of range falls back to its default.
    fn from_ini(ini: &Ini, default_profile: FrameProfile) -> Self {
        let get = |section: &str, key: &str| ini.get_from(Some(section), key).map(str::trim);

        let display_id = get(SECTION_SERVER, "display_id").unwrap_or_else(|| {
            warn!("config has no server.display_id");
            ""
        });

        let mut config = DeviceConfig::new(
            get(SECTION_WIFI, "ssid").unwrap_or_default(),
            get(SECTION_WIFI, "password").unwrap_or_default(),
            get(SECTION_SERVER, "url").unwrap_or_default(),
            display_id,
        );

        config.api_key = get(SECTION_SERVER, "api_key")
            .filter(|key| !key.is_empty())
            .map(str::to_string);

        config.profile = setting(
            get(SECTION_SERVER, "profile"),
            "server.profile",
            default_profile,
            |value| value.parse(),
        );
        config.width = setting(
            get(SECTION_DISPLAY, "width"),
            "display.width",
            DEFAULT_WIDTH,
            parse_dimension,
        );
        config.height = setting(
            get(SECTION_DISPLAY, "height"),
            "display.height",
            DEFAULT_HEIGHT,
            parse_dimension,
        );
        config.brightness = setting(
            get(SECTION_DISPLAY, "brightness"),
            "display.brightness",
            DEFAULT_BRIGHTNESS,
            parse_brightness,
        );
        config.max_retries = setting(
            get(SECTION_RUNTIME, "max_retries"),
            "runtime.max_retries",
            DEFAULT_MAX_RETRIES,
            |value| {
                let retries: u32 = value.parse()?;
                ensure!(retries > 0, "must be at least 1");
                Ok(retries)
            },
        );
        config.retry_delay = setting(
            get(SECTION_RUNTIME, "retry_delay"),
            "runtime.retry_delay",
            DEFAULT_RETRY_DELAY,
            parse_seconds,
        );
        config.update_interval = setting(
            get(SECTION_RUNTIME, "update_interval"),
            "runtime.update_interval",
            DEFAULT_UPDATE_INTERVAL,
            parse_seconds,
        );

        config
    }
}

/// Parse an optional record value, falling back to `default` with a warning.
fn setting<T>(
    value: Option<&str>,
    key: &str,
    default: T,
    parse: impl FnOnce(&str) -> Result<T>,
) -> T {
    let Some(value) = value else {
        return default;
    };

    parse(value).unwrap_or_else(|e| {
        warn!("ignoring {key}={value:?}: {e:#}");
        default
    })
}

fn parse_dimension(value: &str) -> Result<u32> {
    let pixels: u32 = value.parse()?;
    ensure!(
        (1..=MAX_DIMENSION).contains(&pixels),
        "must be within 1..={MAX_DIMENSION}"
    );
    Ok(pixels)
}

/// Brightness percentage, clamped into 0..=100.
fn parse_brightness(value: &str) -> Result<u8> {
    let percent: i64 = value.parse()?;
    Ok(percent.clamp(0, 100) as u8)
}

/// Empty or one of the sample values.
pub fn is_placeholder_ssid(ssid: &str) -> bool {
    let ssid = ssid.trim();
    ssid.is_empty() || PLACEHOLDER_SSIDS.contains(&ssid)
}

fn parse_seconds(value: &str) -> Result<Duration> {
    let secs = value.parse::<f64>().context("not a number")?;
    Duration::try_from_secs_f64(secs).context("not a valid duration")
}

// ============================================================================
// Store
// ============================================================================

/// Location of the persisted configuration record.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    path: PathBuf,
    default_profile: FrameProfile,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_profile: FrameProfile::default(),
        }
    }

    /// Profile assumed for records without `server.profile`.
    pub fn with_default_profile(mut self, profile: FrameProfile) -> Self {
        self.default_profile = profile;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record
    ///
    /// Fields that cannot be used are replaced by their defaults, so a record
    /// with a network name always loads.
    ///
    /// # Returns
    /// `None` if no record has been written yet
    pub fn load(&self) -> Result<Option<DeviceConfig>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).context(format!("failed to read config: {:?}", self.path));
            }
        };

        let ini = Ini::load_from_str(&contents)
            .context(format!("failed to parse config: {:?}", self.path))?;
        let config = DeviceConfig::from_ini(&ini, self.default_profile);
        if let Err(e) = config.validate() {
            warn!("config is incomplete: {e}");
        }

        debug!("loaded config from {:?}", self.path);

        Ok(Some(config))
    }

    /// Provisioning is needed when there is no record or no real network name
    ///
    /// A record that cannot be read or parsed counts as missing.
    pub fn needs_provisioning(&self) -> bool {
        match self.load() {
            Ok(Some(config)) => !config.is_configured(),
            Ok(None) => true,
            Err(e) => {
                warn!("ignoring unusable config: {e:#}");
                true
            }
        }
    }

    /// Replace the record
    ///
    /// The new contents are written next to the target and renamed over it, so
    /// readers see either the old or the new record.
    pub fn save(&self, config: &DeviceConfig) -> Result<()> {
        config.validate().context("validation failed")?;
        ensure!(config.is_configured(), "refusing to persist placeholder ssid");

        let mut contents = Vec::new();
        config
            .to_ini()
            .write_to(&mut contents)
            .context("failed to serialize config")?;

        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, &contents)
            .context(format!("failed to write config: {tmp_path:?}"))?;
        fs::rename(&tmp_path, &self.path)
            .context(format!("failed to rename {tmp_path:?} to {:?}", self.path))?;

        info!("config written to {:?}", self.path);

        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
