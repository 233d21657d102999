use crate::board::{Trigger, TriggerSource};
use anyhow::{Context, Result};
use log::{info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// File names standing in for the two buttons.
const REFRESH_FILE: &str = "refresh";
const RECONNECT_FILE: &str = "reconnect";

/// Triggers raised by creating a file in a directory, e.g. `touch refresh`.
///
/// The file is removed once the trigger has been picked up.
#[derive(Clone, Debug)]
pub struct TriggerFiles {
    dir: PathBuf,
}

impl TriggerFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).context(format!("failed to create trigger dir: {dir:?}"))?;
        info!("trigger files in {dir:?}");

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn take(&self, name: &str) -> bool {
        let path = self.dir.join(name);
        if !path.exists() {
            return false;
        }
        if let Err(e) = fs::remove_file(&path) {
            warn!("failed to remove {path:?}: {e}");
        }
        true
    }
}

impl TriggerSource for TriggerFiles {
    fn poll(&mut self) -> Option<Trigger> {
        if self.take(RECONNECT_FILE) {
            return Some(Trigger::ForceReconnect);
        }
        self.take(REFRESH_FILE).then_some(Trigger::ForceRefresh)
    }
}
