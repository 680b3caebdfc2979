use std::path::PathBuf;

use anyhow::Result;

const DOT_PATH: &str = ".echobeat";
const CACHE_SUBDIR: &str = "echobeat";

pub(crate) fn get_dot_path() -> Result<PathBuf> {
    let path = dirs::home_dir()
        .map(|p| p.join(DOT_PATH))
        .ok_or(anyhow::anyhow!("Could not find home directory"))?;
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Platform cache directory for the playback file, falling back to the dot
/// directory on systems without one.
pub(crate) fn get_cache_path() -> Result<PathBuf> {
    match dirs::cache_dir() {
        Some(dir) => Ok(dir.join(CACHE_SUBDIR)),
        None => get_dot_path().map(|p| p.join("cache")),
    }
}

pub(crate) fn get_state_path() -> Result<PathBuf> {
    Ok(get_dot_path()?.join("state.json"))
}
