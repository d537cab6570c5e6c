//! Platform-specific locations for vault data and configuration

use std::path::{Path, PathBuf};

const APP_DIR: &str = "Vaultkeep";

/// Directory holding the vault database
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\Vaultkeep
/// - macOS: ~/Library/Application Support/Vaultkeep
/// - Linux/Other: ~/.local/share/Vaultkeep
pub fn data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Directory holding the sync config
pub fn config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

pub fn database_path_in(dir: &Path) -> PathBuf {
    dir.join("vault.db")
}

pub fn config_path_in(dir: &Path) -> PathBuf {
    dir.join("sync.toml")
}

pub fn default_database_path() -> PathBuf {
    database_path_in(&data_dir())
}

pub fn default_config_path() -> PathBuf {
    config_path_in(&config_dir())
}

/// Create `dir` if needed, owner-only on Unix
pub fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}
