#![forbid(unsafe_code)]

//! Startup checks shared by the fetchtube binaries.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use nix::unistd::Uid;
use tracing::info;

use crate::process::ToolCommand;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Fails fast when a binary is started as root. The pipeline executes
/// third-party tools against untrusted URLs and must not do so with
/// elevated privileges.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Runs `<program> <version_flag>` and returns the first line it printed.
pub async fn ensure_program_available(
    label: &'static str,
    program: &Path,
    version_flag: &str,
) -> Result<String> {
    let mut command = ToolCommand::new(label, program);
    command.arg(version_flag);
    let output = command
        .run(VERSION_PROBE_TIMEOUT)
        .await
        .with_context(|| format!("{label} is not available at {}", program.display()))?;
    if !output.success() {
        bail!(
            "{label} at {} failed its version check: {}",
            program.display(),
            output.stderr_summary()
        );
    }
    let version = output
        .stdout_text()
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unknown")
        .to_string();
    info!(tool = label, %version, "tool available");
    Ok(version)
}
