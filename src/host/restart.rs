use crate::board::Restarter;
use anyhow::{Context, Result, bail};
use log::info;
use std::{env, os::unix::process::CommandExt, process::Command};

/// Restart by replacing the process with a fresh copy of itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecRestarter;

impl Restarter for ExecRestarter {
    fn restart(&mut self) -> Result<()> {
        let exe = env::current_exe().context("failed to locate own executable")?;
        info!("restarting {exe:?}");

        // only returns on failure
        let e = Command::new(&exe).args(env::args_os().skip(1)).exec();
        bail!("failed to exec {exe:?}: {e}")
    }
}
