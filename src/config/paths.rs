//! Where settings and stored audio live on disk.
//!
//! ```text
//! <config dir>/lyrics-beats/settings.toml     AppConfig (TOML)
//! <local data dir>/lyrics-beats/assets/       FsBlobStore root
//!     <uuid>.wav | <uuid>.mp3 | <uuid>.flac   one file per asset
//! ```
//!
//! The asset directory is flat: uploads, cached separation stems (float
//! WAV) and rendered beats (16-bit WAV) all sit side by side, named by the
//! `AssetRef` the store handed out. Nothing else indexes the directory;
//! projects reference their files only through those refs, so a file with
//! no project pointing at it is an orphan and safe to remove.
//!
//! `storage.assets_dir` in `settings.toml` overrides the asset root. When
//! the platform reports no config or data directory, the current directory
//! is used instead.

use std::path::PathBuf;

const APP_DIR: &str = "lyrics-beats";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    /// `settings.toml` inside `config_dir`.
    pub settings_file: PathBuf,
    /// Default root of the filesystem blob store.
    pub assets_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let app_dir = |base: Option<PathBuf>| {
            base.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
        };
        let config_dir = app_dir(dirs::config_dir());
        Self {
            settings_file: config_dir.join("settings.toml"),
            assets_dir: app_dir(dirs::data_local_dir()).join("assets"),
            config_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_and_assets_sit_under_the_app_dir() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.ends_with(APP_DIR));
        assert_eq!(paths.settings_file, paths.config_dir.join("settings.toml"));
        assert!(paths.assets_dir.ends_with("lyrics-beats/assets"));
    }
}
