use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the AttriKit application data root directory.
///
/// # Platform-specific Paths
/// - macOS: ~/Library/Application Support/AttriKit
/// - Windows: %APPDATA%\AttriKit
/// - Linux: $XDG_DATA_HOME/attrikit or ~/.local/share/attrikit
///
/// This function does not create the directory; the caller decides when.
pub fn app_data_dir() -> Result<PathBuf> {
    let base_dir =
        get_platform_data_dir().context("Failed to get platform-specific data directory")?;

    if cfg!(target_os = "linux") {
        Ok(base_dir.join("attrikit"))
    } else {
        Ok(base_dir.join("AttriKit"))
    }
}

fn get_platform_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if let Some(xdg_data_home) = std::env::var_os("XDG_DATA_HOME") {
            return Ok(PathBuf::from(xdg_data_home));
        }
    }

    dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Unable to get platform data directory"))
}
