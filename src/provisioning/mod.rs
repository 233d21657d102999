//! First-run setup over a temporary access point.
//!
//! The device opens its own network, serves a one page form and waits for a
//! single valid submission. Once that has been persisted the device restarts
//! into the runtime loop.

pub mod http;

use self::http::{Reply, Request, read_request};
use crate::{
    board::{AccessPoint, Restarter},
    clock::Clock,
    device_config::{ConfigStore, DeviceConfig, FrameProfile, is_placeholder_ssid},
};
use anyhow::{Context, Result, bail, ensure};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::{
    fmt,
    io::Write,
    net::{Ipv4Addr, TcpListener, TcpStream},
    time::Duration,
};

// ============================================================================
// Constants
// ============================================================================

pub const AP_SSID: &str = "Tronbyt-Setup";
pub const AP_PASSWORD: &str = "setup1234";
pub const AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
pub const AP_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
/// Where captive portal probes are sent.
pub const PORTAL_URL: &str = "http://192.168.4.1/";

const AP_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const AP_POLL_INTERVAL: Duration = Duration::from_millis(500);
const READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Time given to the acknowledgement to leave the device before restarting.
const FLUSH_WAIT: Duration = Duration::from_secs(1);
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

const SETUP_PAGE: &str = include_str!("setup.html");

// ============================================================================
// Structs
// ============================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisioningState {
    ApStarting,
    Listening,
    AwaitingSubmission,
    Persisted,
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningState::ApStarting => write!(f, "starting access point"),
            ProvisioningState::Listening => write!(f, "listening"),
            ProvisioningState::AwaitingSubmission => write!(f, "awaiting submission"),
            ProvisioningState::Persisted => write!(f, "persisted"),
        }
    }
}

/// Body of `POST /save`.
#[derive(Deserialize, Clone, Debug, Validate)]
pub struct ProvisioningSubmission {
    #[serde(default)]
    #[validate(min_length = 1)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    #[validate(min_length = 1)]
    pub display_id: String,
    #[serde(default)]
    pub server_url: Option<String>,
}

impl ProvisioningSubmission {
    /// Validate and turn into a full configuration with defaults
    ///
    /// # Arguments
    /// * `profile` - Frame profile of the board being set up
    pub fn into_config(self, profile: FrameProfile) -> Result<DeviceConfig> {
        self.validate().context("validation failed")?;
        ensure!(
            !self.display_id.trim().is_empty(),
            "display id must not be blank"
        );
        ensure!(
            !is_placeholder_ssid(&self.ssid),
            "ssid {:?} is a placeholder",
            self.ssid
        );

        let mut config = DeviceConfig::new(
            &self.ssid,
            &self.password,
            self.server_url.as_deref().unwrap_or_default(),
            &self.display_id,
        );
        config.profile = profile;
        config.validate().context("validation failed")?;

        Ok(config)
    }
}

#[derive(Serialize, Clone, Debug, Eq, PartialEq)]
pub struct SaveResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SaveResponse {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

// ============================================================================
// Server
// ============================================================================

pub struct ProvisioningServer<A, C> {
    ap: A,
    clock: C,
    store: ConfigStore,
    profile: FrameProfile,
    state: ProvisioningState,
    persisted: Option<DeviceConfig>,
}

impl<A: AccessPoint, C: Clock> ProvisioningServer<A, C> {
    pub fn new(ap: A, clock: C, store: ConfigStore) -> Self {
        Self {
            ap,
            clock,
            store,
            profile: FrameProfile::default(),
            state: ProvisioningState::ApStarting,
            persisted: None,
        }
    }

    /// Frame profile written into the captured configuration.
    pub fn with_profile(mut self, profile: FrameProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    /// Complete provisioning flow
    ///
    /// Brings up the access point, serves `listener` until a configuration
    /// has been persisted and restarts the device.
    ///
    /// # Arguments
    /// * `listener` - Bound portal socket
    /// * `restarter` - Device reset primitive
    ///
    /// # Returns
    /// The persisted configuration if the restart did not take place
    pub fn run(
        &mut self,
        listener: &TcpListener,
        restarter: &mut dyn Restarter,
    ) -> Result<DeviceConfig> {
        self.start_ap()?;
        let config = self.serve(listener)?;

        info!("configuration complete, restarting");
        self.clock.sleep(FLUSH_WAIT);

        if let Err(e) = restarter.restart() {
            error!("restart failed: {e:#}");
        }

        warn!("device did not restart, continuing with new configuration");
        self.ap.deactivate();

        Ok(config)
    }

    /// Bring up the access point and give it its fixed address
    ///
    /// # Returns
    /// Error if the radio refuses or is not up in time
    pub fn start_ap(&mut self) -> Result<()> {
        self.state = ProvisioningState::ApStarting;
        info!("starting access point {AP_SSID}");

        self.ap
            .activate(AP_SSID, AP_PASSWORD)
            .context("failed to activate access point")?;

        let deadline = self.clock.now() + AP_STARTUP_TIMEOUT;
        while !self.ap.is_active() {
            if self.clock.now() >= deadline {
                bail!(
                    "access point not active after {}s",
                    AP_STARTUP_TIMEOUT.as_secs()
                );
            }
            self.clock.sleep(AP_POLL_INTERVAL);
        }

        self.ap
            .configure(AP_ADDRESS, AP_NETMASK)
            .context("failed to configure access point address")?;

        info!("connect to {AP_SSID} and open {PORTAL_URL}");
        self.state = ProvisioningState::Listening;

        Ok(())
    }

    /// Accept connections one at a time until a configuration is persisted
    pub fn serve(&mut self, listener: &TcpListener) -> Result<DeviceConfig> {
        if let Ok(address) = listener.local_addr() {
            info!("setup portal listening on {address}");
        }

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("connection from {peer}");
                    self.handle_connection(stream);
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    self.clock.sleep(ACCEPT_RETRY_DELAY);
                }
            }

            if let Some(config) = self.persisted.take() {
                return Ok(config);
            }
        }
    }

    /// Route a parsed request
    ///
    /// # Returns
    /// The reply to send; a successful save moves the server to `Persisted`
    pub fn handle_request(&mut self, request: &Request) -> Reply {
        if self.state != ProvisioningState::Persisted {
            self.state = ProvisioningState::AwaitingSubmission;
        }

        match request.path.as_str() {
            "/" | "/index.html" => Reply::Html(SETUP_PAGE),
            "/save" if request.method.eq_ignore_ascii_case("POST") => {
                let response = self.save(&request.body);
                match serde_json::to_string(&response) {
                    Ok(json) => Reply::Json(json),
                    Err(e) => {
                        error!("failed to serialize save response: {e}");
                        Reply::Json(r#"{"success":false}"#.to_string())
                    }
                }
            }
            "/generate_204" | "/hotspot-detect.html" => Reply::Redirect(PORTAL_URL),
            _ => Reply::Redirect("/"),
        }
    }

    fn handle_connection(&mut self, mut stream: TcpStream) {
        if let Err(e) = stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .and_then(|_| stream.set_write_timeout(Some(READ_TIMEOUT)))
        {
            warn!("failed to set socket timeouts: {e}");
        }

        let request = match read_request(&mut stream) {
            Ok(request) => request,
            Err(e) => {
                debug!("dropping request: {e:#}");
                return;
            }
        };

        let reply = self.handle_request(&request);
        debug!("{} {} -> {}", request.method, request.path, reply.status());

        if let Err(e) = stream
            .write_all(&reply.to_bytes())
            .and_then(|_| stream.flush())
        {
            warn!("failed to send reply: {e}");
        }
    }

    fn save(&mut self, body: &[u8]) -> SaveResponse {
        if self.state == ProvisioningState::Persisted {
            return SaveResponse::failed("Device is already configured");
        }
        if body.is_empty() {
            return SaveResponse::failed("No data received");
        }

        let submission = match serde_json::from_slice::<ProvisioningSubmission>(body) {
            Ok(submission) => submission,
            Err(e) => {
                warn!("invalid submission: {e}");
                return SaveResponse::failed("Invalid JSON");
            }
        };

        let config = match submission.into_config(self.profile) {
            Ok(config) => config,
            Err(e) => {
                warn!("rejected submission: {e:#}");
                return SaveResponse::failed("WiFi SSID and Display ID are required");
            }
        };

        match self.store.save(&config) {
            Ok(()) => {
                info!("saved configuration for display {}", config.display_id);
                self.state = ProvisioningState::Persisted;
                self.persisted = Some(config);
                SaveResponse::ok()
            }
            Err(e) => {
                error!("failed to persist configuration: {e:#}");
                SaveResponse::failed(format!("{e:#}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::MockAccessPoint;
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct FakeClock {
        now: Duration,
    }

    impl Clock for FakeClock {
        fn now(&self) -> Duration {
            self.now
        }

        fn sleep(&mut self, duration: Duration) {
            self.now += duration;
        }
    }

    fn server(ap: MockAccessPoint) -> (TempDir, ProvisioningServer<MockAccessPoint, FakeClock>) {
        let dir = TempDir::new().expect("failed to create temp directory");
        let store = ConfigStore::new(dir.path().join("device.ini"));
        (dir, ProvisioningServer::new(ap, FakeClock::default(), store))
    }

    fn post(body: &str) -> Request {
        Request {
            method: "POST".to_string(),
            path: "/save".to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn get(path: &str) -> Request {
        Request {
            method: "GET".to_string(),
            path: path.to_string(),
            body: Vec::new(),
        }
    }

    #[test]
    fn ap_comes_up_with_fixed_address() {
        let mut ap = MockAccessPoint::new();
        ap.expect_activate()
            .withf(|ssid, password| ssid == AP_SSID && password == AP_PASSWORD)
            .times(1)
            .returning(|_, _| Ok(()));
        let mut polls = 0;
        ap.expect_is_active().returning(move || {
            polls += 1;
            polls > 2
        });
        ap.expect_configure()
            .withf(|address, netmask| *address == AP_ADDRESS && *netmask == AP_NETMASK)
            .times(1)
            .returning(|_, _| Ok(()));

        let (_dir, mut server) = server(ap);
        server.start_ap().expect("ap should start");

        assert_eq!(server.state(), ProvisioningState::Listening);
        assert_eq!(server.clock.now, AP_POLL_INTERVAL * 2);
    }

    #[test]
    fn ap_that_never_comes_up_is_fatal() {
        let mut ap = MockAccessPoint::new();
        ap.expect_activate().returning(|_, _| Ok(()));
        ap.expect_is_active().return_const(false);
        ap.expect_configure().never();

        let (_dir, mut server) = server(ap);

        assert!(server.start_ap().is_err());
        assert_eq!(server.clock.now, AP_STARTUP_TIMEOUT);
    }

    #[test]
    fn portal_routes() {
        let (_dir, mut server) = server(MockAccessPoint::new());

        assert_eq!(server.handle_request(&get("/")), Reply::Html(SETUP_PAGE));
        assert_eq!(server.handle_request(&get("/index.html")), Reply::Html(SETUP_PAGE));
        assert_eq!(
            server.handle_request(&get("/generate_204")),
            Reply::Redirect(PORTAL_URL)
        );
        assert_eq!(
            server.handle_request(&get("/hotspot-detect.html")),
            Reply::Redirect(PORTAL_URL)
        );
        assert_eq!(server.handle_request(&get("/favicon.ico")), Reply::Redirect("/"));
        assert_eq!(server.handle_request(&get("/save")), Reply::Redirect("/"));
    }

    #[test]
    fn missing_display_id_is_rejected_without_writing() {
        let (dir, mut server) = server(MockAccessPoint::new());

        let reply = server.handle_request(&post(r#"{"ssid":"home","password":"pw"}"#));

        assert_eq!(
            reply,
            Reply::Json(
                r#"{"success":false,"message":"WiFi SSID and Display ID are required"}"#
                    .to_string()
            )
        );
        assert!(!dir.path().join("device.ini").exists());
        assert_ne!(server.state(), ProvisioningState::Persisted);
    }

    #[test]
    fn placeholder_ssid_is_rejected() {
        let (_dir, mut server) = server(MockAccessPoint::new());

        let reply =
            server.handle_request(&post(r#"{"ssid":"YourWiFiSSID","display_id":"kitchen"}"#));

        assert!(matches!(reply, Reply::Json(json) if json.contains(r#""success":false"#)));
    }

    #[test]
    fn garbage_body_is_rejected() {
        let (_dir, mut server) = server(MockAccessPoint::new());

        assert_eq!(
            server.handle_request(&post("ssid=home")),
            Reply::Json(r#"{"success":false,"message":"Invalid JSON"}"#.to_string())
        );
        assert_eq!(
            server.handle_request(&post("")),
            Reply::Json(r#"{"success":false,"message":"No data received"}"#.to_string())
        );
    }

    #[test]
    fn valid_submission_is_persisted_with_defaults() {
        let (dir, mut server) = server(MockAccessPoint::new());
        server.profile = FrameProfile::Bridge;

        let reply = server.handle_request(&post(
            r#"{"ssid":"home","password":"pw","display_id":" kitchen ","server_url":""}"#,
        ));
        assert_eq!(reply, Reply::Json(r#"{"success":true}"#.to_string()));
        assert_eq!(server.state(), ProvisioningState::Persisted);

        let store = ConfigStore::new(dir.path().join("device.ini"));
        let config = store
            .load()
            .expect("load should succeed")
            .expect("record should exist");
        assert_eq!(config.ssid, "home");
        assert_eq!(config.display_id, "kitchen");
        assert_eq!(config.server_url, crate::device_config::DEFAULT_SERVER_URL);
        assert_eq!(config.profile, FrameProfile::Bridge);
        assert!(!store.needs_provisioning());

        // only one submission is ever accepted
        let second = server.handle_request(&post(r#"{"ssid":"other","display_id":"x"}"#));
        assert!(matches!(second, Reply::Json(json) if json.contains(r#""success":false"#)));
        assert_eq!(store.load().expect("load").expect("record").ssid, "home");
    }

    #[test]
    fn persistence_failure_is_reported_and_server_keeps_going() {
        let dir = TempDir::new().expect("failed to create temp directory");
        let store = ConfigStore::new(dir.path().join("missing").join("device.ini"));
        let mut server = ProvisioningServer::new(MockAccessPoint::new(), FakeClock::default(), store);

        let reply = server.handle_request(&post(r#"{"ssid":"home","display_id":"kitchen"}"#));

        assert!(matches!(reply, Reply::Json(json) if json.contains(r#""success":false"#)));
        assert_eq!(server.state(), ProvisioningState::AwaitingSubmission);
        assert!(server.persisted.is_none());
    }
}
