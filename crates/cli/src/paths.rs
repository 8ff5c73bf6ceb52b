//! Path resolution for the knock data directory.
//!
//! Resolved once at startup from: `--data-dir` > `KNOCK_DATA_DIR` env > `~/.knock`.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub const DATA_DIR_ENV: &str = "KNOCK_DATA_DIR";

pub fn resolve_data_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(env_val) = std::env::var(DATA_DIR_ENV) {
        if !env_val.is_empty() {
            return Ok(PathBuf::from(env_val));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".knock"))
        .context("HOME directory not found; pass --data-dir")
}

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("knock.db")
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Create the data dir and its subdirectories.
pub fn ensure_dirs(data_dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(log_dir(data_dir))?;
    Ok(())
}
