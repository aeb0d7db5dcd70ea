use std::path::PathBuf;

/// Environment variable that relocates the whole data directory.
pub const DATA_DIR_ENV: &str = "WARDEN_DATA_DIR";

/// Root data directory for warden.
///
/// Organizations, settings and logs live underneath. `WARDEN_DATA_DIR`
/// wins over the platform default.
///
/// - Linux: `~/.warden/`
/// - macOS: `~/Library/Application Support/warden/`
/// - Windows: `%LOCALAPPDATA%\warden\`
pub fn warden_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("warden");
        }
    }

    #[cfg(windows)]
    {
        if let Some(local) = std::env::var_os("LOCALAPPDATA") {
            return PathBuf::from(local).join("warden");
        }
    }

    #[cfg(not(any(target_os = "macos", windows)))]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".warden");
        }
    }

    // Fallback
    PathBuf::from(".warden")
}

/// Directory holding one root per organization.
pub fn warden_orgs_dir() -> PathBuf {
    warden_data_dir().join("orgs")
}

/// Log directory (audit log, optional tracing file).
pub fn warden_log_dir() -> PathBuf {
    warden_data_dir().join("logs")
}

/// Process-wide settings file.
pub fn warden_settings_path() -> PathBuf {
    warden_data_dir().join("settings.json")
}

/// Persistent cache used by one-shot CLI runs (identity mirror, used passcodes).
pub fn warden_cache_path() -> PathBuf {
    warden_data_dir().join("cache.json")
}
