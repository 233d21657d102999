//! Collaborators for running the device software on a normal Linux host.
//!
//! There is no image codec on the host, so boards built here only support the
//! bridge profile.

mod network;
mod raster;
mod restart;
mod triggers;

pub use network::{HostAccessPoint, HostStation};
pub use raster::TerminalRaster;
pub use restart::ExecRestarter;
pub use triggers::TriggerFiles;

use crate::{board::Board, clock::SystemClock, device_config::FrameProfile};
use anyhow::Result;
use std::path::Path;

pub type HostBoard = Board<TerminalRaster, HostStation, TriggerFiles, SystemClock>;

/// Frame profile the host board can render.
pub const HOST_PROFILE: FrameProfile = FrameProfile::Bridge;

/// Assemble the host board
///
/// # Arguments
/// * `width`, `height` - Raster size in pixels
/// * `trigger_dir` - Directory watched for trigger files
pub fn board(width: u32, height: u32, trigger_dir: &Path) -> Result<HostBoard> {
    Ok(Board {
        raster: TerminalRaster::stdout(width, height),
        station: HostStation,
        triggers: TriggerFiles::new(trigger_dir)?,
        clock: SystemClock::new(),
        decoder: None,
    })
}
