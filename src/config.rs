use anyhow::{Context, Result};
use std::{env, path::PathBuf, str::FromStr, sync::OnceLock, time::Duration};

/// Process level settings loaded from the environment at startup
///
/// These are properties of the firmware build and the board, not of the
/// installation; the latter lives in the persisted
/// [`DeviceConfig`](crate::device_config::DeviceConfig).
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Persisted device configuration record
    pub config_path: PathBuf,

    /// Provisioning portal settings
    pub portal: PortalConfig,

    /// Transport client settings
    pub transport: TransportConfig,

    /// Runtime loop settings
    pub runtime: RuntimeConfig,

    /// Directory polled for operator trigger files on the host board
    pub trigger_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct PortalConfig {
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub max_redirects: u8,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub backoff: Duration,
    pub wifi_timeout: Duration,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// # Panics
    /// Panics if configuration loading fails
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG.get_or_init(|| Self::load().expect("failed to load application configuration"))
    }

    fn load() -> Result<Self> {
        let config_path = env::var("TRONBYT_CONFIG_PATH")
            .unwrap_or_else(|_| "/data/config/device.ini".to_string())
            .into();
        let trigger_dir = env::var("TRONBYT_TRIGGER_DIR")
            .unwrap_or_else(|_| "/tmp/tronbyt".to_string())
            .into();

        Ok(Self {
            config_path,
            portal: PortalConfig::load()?,
            transport: TransportConfig::load()?,
            runtime: RuntimeConfig::load()?,
            trigger_dir,
        })
    }
}

impl PortalConfig {
    fn load() -> Result<Self> {
        let port = var_or("TRONBYT_PORTAL_PORT", 80)?;

        Ok(Self { port })
    }
}

impl TransportConfig {
    fn load() -> Result<Self> {
        let timeout = Duration::from_secs(var_or("TRONBYT_HTTP_TIMEOUT_SECS", 10)?);
        let max_redirects = var_or("TRONBYT_MAX_REDIRECTS", 3)?;

        Ok(Self {
            timeout,
            max_redirects,
        })
    }
}

impl RuntimeConfig {
    fn load() -> Result<Self> {
        let backoff = Duration::from_secs(var_or("TRONBYT_BACKOFF_SECS", 5)?);
        let wifi_timeout = Duration::from_secs(var_or("TRONBYT_WIFI_TIMEOUT_SECS", 20)?);

        Ok(Self {
            backoff,
            wifi_timeout,
        })
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            wifi_timeout: Duration::from_secs(20),
        }
    }
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .context(format!("failed to parse {name}: invalid format")),
        Err(_) => Ok(default),
    }
}
