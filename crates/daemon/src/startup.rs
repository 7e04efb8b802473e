//! Startup checks module for the kiosk player
//!
//! Preflight checks run before the first dispatch:
//! - The player executable resolves
//! - The media root exists
//! - The duration probe runs (warning only; probing degrades to "unknown")

use crate::config::Config;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Player not available: {0}")]
    PlayerMissing(String),

    #[error("Media root {0} is not a directory")]
    MediaRootMissing(PathBuf),

    #[error("Probe not available: {0}")]
    ProbeUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve an executable the way a shell would
///
/// Names containing a path separator are taken as paths; bare names are
/// searched for in `path_var` (a `PATH`-style list).
pub fn resolve_executable(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    std::env::split_paths(path_var?)
        .map(|dir| dir.join(name))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Check that the player executable can be found
pub fn check_player_available(executable: &str) -> Result<PathBuf, StartupError> {
    let path_var = std::env::var_os("PATH");
    resolve_executable(executable, path_var.as_deref()).ok_or_else(|| {
        StartupError::PlayerMissing(format!(
            "{} not found; is it installed and in PATH?",
            executable
        ))
    })
}

/// Check that the media root is a directory
pub fn check_media_root(root: &Path) -> Result<(), StartupError> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(StartupError::MediaRootMissing(root.to_path_buf()))
    }
}

/// Check that `<probe> -version` runs successfully
pub fn check_probe_available(executable: &str) -> Result<(), StartupError> {
    let status = Command::new(executable)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| {
            StartupError::ProbeUnavailable(format!("{} -version failed: {}", executable, e))
        })?;

    if !status.success() {
        return Err(StartupError::ProbeUnavailable(format!(
            "{} -version exited with {}",
            executable, status
        )));
    }

    Ok(())
}

/// Run all startup checks in order
///
/// 1. Player executable (fatal)
/// 2. Media root (fatal)
/// 3. Probe executable (logged only)
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    let player = check_player_available(&cfg.player.executable)?;
    info!(player = %player.display(), "player found");
    check_media_root(&cfg.media.root)?;
    if let Err(e) = check_probe_available(&cfg.probe.executable) {
        warn!(error = %e, "durations will be unknown");
    }
    Ok(())
}
