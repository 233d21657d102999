//! Collaborator interfaces of the device and the board descriptor bundling them.
//!
//! Everything the runtime needs from hardware goes through one of these
//! traits. A concrete board is chosen once at startup; the runtime loop is
//! generic over it instead of branching per call site.

use crate::{pipeline::Rgb, state::ConnectionState};
use anyhow::Result;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::net::{IpAddr, Ipv4Addr};

/// Pixel raster of the LED matrix.
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait RasterDevice {
    fn set_pixel(&mut self, x: u32, y: u32, r: u8, g: u8, b: u8);

    /// Push everything written since the last call to the panel.
    fn present(&mut self);

    /// Device level brightness, `0.0..=1.0`.
    fn set_brightness(&mut self, scalar: f32);

    fn clear(&mut self);

    /// Draw a single line of text, used for status messages only.
    fn draw_text(&mut self, text: &str, x: i32, y: i32, color: Rgb);
}

/// Image codec turning an encoded frame into RGB565 little-endian pixels.
///
/// Implementations return exactly `width * height * 2` bytes. Errors and
/// panics are both treated as a failed decode by the pipeline.
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait Decoder {
    fn decode(&self, data: &[u8], width: u32, height: u32) -> Result<Vec<u8>>;
}

/// Wi-Fi radio in station mode.
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait WifiStation {
    /// Start associating; completion is observed through [`WifiStation::status`].
    fn connect(&mut self, ssid: &str, password: &str) -> Result<()>;

    fn status(&mut self) -> ConnectionState;

    fn disconnect(&mut self);

    fn address(&self) -> Option<IpAddr>;
}

/// Wi-Fi radio in access point mode, used during provisioning.
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait AccessPoint {
    fn activate(&mut self, ssid: &str, password: &str) -> Result<()>;

    fn is_active(&self) -> bool;

    fn configure(&mut self, address: Ipv4Addr, netmask: Ipv4Addr) -> Result<()>;

    fn deactivate(&mut self);
}

/// Operator input, e.g. the two push buttons of the board.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Trigger {
    ForceRefresh,
    ForceReconnect,
}

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait TriggerSource {
    /// Non-blocking; returns a pending trigger if there is one.
    fn poll(&mut self) -> Option<Trigger>;
}

/// Full device reset.
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait Restarter {
    /// Returns only if the reset could not be carried out (or is deferred).
    fn restart(&mut self) -> Result<()>;
}

/// Triggers for boards without buttons.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTriggers;

impl TriggerSource for NoTriggers {
    fn poll(&mut self) -> Option<Trigger> {
        None
    }
}

/// Hardware of one board, selected once at startup.
pub struct Board<R, W, T, C> {
    pub raster: R,
    pub station: W,
    pub triggers: T,
    pub clock: C,
    /// `None` when the firmware was built without an image codec.
    pub decoder: Option<Box<dyn Decoder>>,
}

/// What the selected board can do, checked once before the runtime starts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Capabilities {
    pub decoder: bool,
}

impl<R, W, T, C> Board<R, W, T, C> {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            decoder: self.decoder.is_some(),
        }
    }
}
