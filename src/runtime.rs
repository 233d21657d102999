//! Fetch and display loop of a configured device.
//!
//! The loop is a small state machine driven by [`RuntimeLoop::step`]. Every
//! wait is sliced so operator triggers are noticed within one slice, and all
//! time goes through the board's [`Clock`].

use crate::{
    board::{Board, RasterDevice, Trigger, TriggerSource, WifiStation},
    clock::Clock,
    config::RuntimeConfig,
    device_config::DeviceConfig,
    pipeline::{FormatHint, FramePipeline, RenderError, Status},
    state::{ConnectionState, RuntimeCounters},
    transport::{FetchResult, Frame, FrameSource, TransportClient},
};
use log::{debug, error, info, warn};
use std::{convert::Infallible, fmt, time::Duration};

// ============================================================================
// Constants
// ============================================================================

/// Granularity of all waits, triggers are polled in between.
pub const WAIT_SLICE: Duration = Duration::from_millis(100);
/// Minimum distance between two accepted triggers.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(300);
/// Station status polling interval while associating.
pub const ASSOCIATION_POLL: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RuntimeState {
    AwaitingConnectivity,
    Fetching,
    Rendering(Frame),
    ErrorBackoff,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeState::AwaitingConnectivity => write!(f, "awaiting connectivity"),
            RuntimeState::Fetching => write!(f, "fetching"),
            RuntimeState::Rendering(_) => write!(f, "rendering"),
            RuntimeState::ErrorBackoff => write!(f, "error backoff"),
        }
    }
}

/// Wi-Fi could not be joined within the configured number of attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectivityFailure {
    pub attempts: u32,
}

impl fmt::Display for ConnectivityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no wifi connection after {} attempts", self.attempts)
    }
}

impl std::error::Error for ConnectivityFailure {}

/// Conditions that stop the runtime for good.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FatalError {
    Connectivity(ConnectivityFailure),
    Capability(RenderError),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::Connectivity(e) => write!(f, "{e}"),
            FatalError::Capability(e) => write!(f, "missing capability: {e}"),
        }
    }
}

impl std::error::Error for FatalError {}

impl From<ConnectivityFailure> for FatalError {
    fn from(e: ConnectivityFailure) -> Self {
        FatalError::Connectivity(e)
    }
}

/// Accepts at most one trigger per interval.
#[derive(Clone, Copy, Debug)]
pub struct Debouncer {
    interval: Duration,
    last_accepted: Option<Duration>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    pub fn accept(&mut self, now: Duration) -> bool {
        if self
            .last_accepted
            .is_some_and(|last| now.saturating_sub(last) < self.interval)
        {
            return false;
        }
        self.last_accepted = Some(now);
        true
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_INTERVAL)
    }
}

// ============================================================================
// Runtime loop
// ============================================================================

pub struct RuntimeLoop<R, W, T, C, S = TransportClient> {
    config: DeviceConfig,
    settings: RuntimeConfig,
    pipeline: FramePipeline<R>,
    station: W,
    triggers: T,
    clock: C,
    source: S,
    state: RuntimeState,
    connection: ConnectionState,
    counters: RuntimeCounters,
    debouncer: Debouncer,
}

impl<R, W, T, C, S> RuntimeLoop<R, W, T, C, S>
where
    R: RasterDevice,
    W: WifiStation,
    T: TriggerSource,
    C: Clock,
    S: FrameSource,
{
    pub fn new(
        board: Board<R, W, T, C>,
        config: DeviceConfig,
        settings: RuntimeConfig,
        source: S,
    ) -> Self {
        let pipeline = FramePipeline::new(
            board.raster,
            config.profile,
            board.decoder,
            config.width,
            config.height,
        );

        Self {
            config,
            settings,
            pipeline,
            station: board.station,
            triggers: board.triggers,
            clock: board.clock,
            source,
            state: RuntimeState::AwaitingConnectivity,
            connection: ConnectionState::Disconnected,
            counters: RuntimeCounters::default(),
            debouncer: Debouncer::default(),
        }
    }

    /// Capability check and initial brightness, done once before the loop.
    pub fn start(&mut self) -> Result<(), FatalError> {
        if let Err(e) = self.pipeline.ensure_capable() {
            error!("{e}");
            self.pipeline.show_status(&Status::error(e.short_label()));
            return Err(FatalError::Capability(e));
        }

        self.pipeline.set_brightness(self.config.brightness);
        info!(
            "runtime started: {} profile, {}x{} raster",
            self.config.profile, self.config.width, self.config.height
        );
        Ok(())
    }

    /// Run until a fatal condition occurs.
    ///
    /// The fatal condition has already been shown on the raster when this
    /// returns.
    pub fn run(&mut self) -> Result<Infallible, FatalError> {
        self.start()?;

        loop {
            self.step()?;
        }
    }

    /// Perform one state transition.
    pub fn step(&mut self) -> Result<(), ConnectivityFailure> {
        if let Some(trigger) = self.poll_trigger() {
            self.state = self.on_trigger(trigger);
            return Ok(());
        }

        let state = std::mem::replace(&mut self.state, RuntimeState::Fetching);
        debug!("runtime state: {state}");

        self.state = match state {
            RuntimeState::AwaitingConnectivity => {
                if let Err(e) = self.connect() {
                    self.state = RuntimeState::AwaitingConnectivity;
                    return Err(e);
                }
                RuntimeState::Fetching
            }
            RuntimeState::Fetching => self.fetch(),
            RuntimeState::Rendering(frame) => self.render(frame),
            RuntimeState::ErrorBackoff => self.wait(self.settings.backoff, RuntimeState::Fetching),
        };

        Ok(())
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn counters(&self) -> &RuntimeCounters {
        &self.counters
    }

    pub fn pipeline(&self) -> &FramePipeline<R> {
        &self.pipeline
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn connect(&mut self) -> Result<(), ConnectivityFailure> {
        self.connection = self.station.status();
        if self.connection == ConnectionState::Connected {
            return Ok(());
        }

        let attempts = self.config.max_retries;

        for attempt in 1..=attempts {
            info!("joining {} (attempt {attempt}/{attempts})", self.config.ssid);
            self.pipeline.show_status(&Status::connecting("WiFi..."));

            self.connection = ConnectionState::Connecting;
            match self.station.connect(&self.config.ssid, &self.config.password) {
                Ok(()) => self.connection = self.await_association(),
                Err(e) => {
                    warn!("wifi connect failed: {e:#}");
                    self.connection = ConnectionState::Failed;
                }
            }

            if self.connection == ConnectionState::Connected {
                let status = match self.station.address() {
                    Some(address) => {
                        info!("wifi connected, address {address}");
                        Status::success(address_tail(&address.to_string()))
                    }
                    None => {
                        info!("wifi connected");
                        Status::success("Connected")
                    }
                };
                self.pipeline.show_status(&status);
                return Ok(());
            }

            self.pipeline.show_status(&Status::error("WiFi Failed"));
            if attempt < attempts {
                self.station.disconnect();
                self.clock.sleep(self.config.retry_delay);
            }
        }

        error!("giving up on wifi after {attempts} attempts");
        self.connection = ConnectionState::Failed;
        self.pipeline.show_status(&Status::error("No WiFi"));
        Err(ConnectivityFailure { attempts })
    }

    fn await_association(&mut self) -> ConnectionState {
        let deadline = self.clock.now() + self.settings.wifi_timeout;

        loop {
            let status = self.station.status();
            if status.is_settled() {
                return status;
            }
            if self.clock.now() >= deadline {
                warn!("wifi association timed out, last state {status}");
                return ConnectionState::Failed;
            }
            self.clock.sleep(ASSOCIATION_POLL);
        }
    }

    fn fetch(&mut self) -> RuntimeState {
        self.connection = self.station.status();
        if self.connection != ConnectionState::Connected {
            warn!("wifi lost ({})", self.connection);
            return RuntimeState::AwaitingConnectivity;
        }

        match self.source.next_frame(&self.config) {
            FetchResult::Frame(frame) => {
                debug!(
                    "frame of {} bytes, dwell {}s",
                    frame.data.len(),
                    frame.dwell_secs
                );
                RuntimeState::Rendering(frame)
            }
            FetchResult::Empty => {
                info!("server has no frame for {}", self.config.display_id);
                RuntimeState::ErrorBackoff
            }
            FetchResult::Redirect { location, .. } => {
                self.counters.record_fetch_failure();
                warn!("unfollowed redirect to {location}");
                RuntimeState::ErrorBackoff
            }
            FetchResult::Error(e) => {
                self.counters.record_fetch_failure();
                warn!(
                    "fetch failed: {e} ({} consecutive errors)",
                    self.counters.consecutive_errors
                );
                self.pipeline.show_status(&Status::error(e.short_label()));
                RuntimeState::ErrorBackoff
            }
        }
    }

    fn render(&mut self, frame: Frame) -> RuntimeState {
        self.pipeline.apply_brightness_hint(frame.brightness);

        match self.pipeline.render(&frame.data, &FormatHint::from(&frame)) {
            Ok(()) => {
                self.counters.record_frame();
                debug!("frame {} rendered", self.counters.frames_rendered);
            }
            Err(e) => {
                self.counters.record_render_failure();
                warn!(
                    "render failed: {e} ({} consecutive errors)",
                    self.counters.consecutive_errors
                );
                if !matches!(e, RenderError::Truncated { .. }) {
                    self.pipeline.show_status(&Status::error(e.short_label()));
                }
            }
        }

        let dwell = frame.dwell().max(self.config.update_interval);
        self.wait(dwell, RuntimeState::Fetching)
    }

    /// Sleep for `duration` in slices, returning early on a trigger.
    fn wait(&mut self, duration: Duration, next: RuntimeState) -> RuntimeState {
        let deadline = self.clock.now() + duration;

        loop {
            if let Some(trigger) = self.poll_trigger() {
                return self.on_trigger(trigger);
            }

            let now = self.clock.now();
            if now >= deadline {
                return next;
            }
            self.clock.sleep(WAIT_SLICE.min(deadline - now));
        }
    }

    fn poll_trigger(&mut self) -> Option<Trigger> {
        let trigger = self.triggers.poll()?;
        if self.debouncer.accept(self.clock.now()) {
            Some(trigger)
        } else {
            debug!("ignoring bouncing {trigger:?}");
            None
        }
    }

    fn on_trigger(&mut self, trigger: Trigger) -> RuntimeState {
        match trigger {
            Trigger::ForceRefresh => {
                info!("forced refresh");
                RuntimeState::Fetching
            }
            Trigger::ForceReconnect => {
                info!("forced reconnect");
                self.station.disconnect();
                self.connection = ConnectionState::Disconnected;
                RuntimeState::AwaitingConnectivity
            }
        }
    }
}

/// Address shortened to fit a status line, e.g. `IP:168.1.42`.
fn address_tail(address: &str) -> String {
    let start = address
        .char_indices()
        .rev()
        .nth(7)
        .map_or(0, |(index, _)| index);
    format!("IP:{}", &address[start..])
}
