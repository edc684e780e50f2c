//! Filesystem locations used by the daemon.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const PERFSTATD_DIR: &str = ".perfstatd";
const CONFIG_FILE: &str = "config.yaml";
const LOG_FILE: &str = "perfstatd.log";

/// Returns the perfstatd home directory: `~/.perfstatd/`
///
/// Creates the directory if it doesn't exist.
pub fn perfstatd_home_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let dir = home.join(PERFSTATD_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    Ok(dir)
}

/// Default configuration file: `~/.perfstatd/config.yaml`
///
/// Does not create anything; the file is optional.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(PERFSTATD_DIR).join(CONFIG_FILE))
}

/// Daemon log file: `~/.perfstatd/perfstatd.log`
pub fn daemon_log_path() -> Result<PathBuf> {
    Ok(perfstatd_home_dir()?.join(LOG_FILE))
}

/// Directory scanned for `hsperfdata_*` when none is configured.
pub fn default_perfdata_root() -> PathBuf {
    std::env::temp_dir()
}
