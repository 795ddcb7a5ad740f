//! Runtime configuration.
//!
//! Values come from three places, in order of precedence:
//! 1. Command line arguments and their `AUDICTL_*` environment variables
//! 2. A TOML configuration file
//! 3. Hard coded defaults
//!
//! The first layer is owned by the binary; this module provides the
//! defaults, the file format and the merge.

use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    player::Mpv,
    track::Quality,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    pub user_agent: String,

    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,

    /// Media player binary.
    pub player: PathBuf,
    /// Output device override, passed through to the player.
    pub device: Option<String>,
    /// Resampling flag, passed through to the player.
    pub resample: bool,

    pub quality: Quality,

    /// How long a stop waits for the player to exit.
    pub stop_timeout: Duration,
}

/// Contents of a configuration file. Every key is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct File {
    pub socket: Option<PathBuf>,
    pub player: Option<PathBuf>,
    pub device: Option<String>,
    pub resample: Option<bool>,
    pub quality: Option<Quality>,
    pub stop_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Default for [`Self::stop_timeout`].
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(3);

    /// Configuration files larger than this are rejected.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    #[must_use]
    pub fn new() -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        // Keep the `User-Agent` parseable: no separators inside its parts.
        let illegal_chars = |chr| chr == '/' || chr == ';' || chr == '(' || chr == ')';
        let os_name = std::env::consts::OS;
        let os_version = sysinfo::System::os_version()
            .filter(|version| !version.is_empty() && !version.contains(illegal_chars))
            .unwrap_or_else(|| String::from("0"));

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        Self {
            app_name,
            app_version,

            user_agent,

            socket_path: default_socket_path(),

            player: PathBuf::from("mpv"),
            device: None,
            resample: false,

            quality: Quality::default(),

            stop_timeout: Self::STOP_TIMEOUT,
        }
    }

    /// Overrides defaults with the values set in `file`.
    pub fn merge(&mut self, file: File) {
        if let Some(socket) = file.socket {
            self.socket_path = socket;
        }
        if let Some(player) = file.player {
            self.player = player;
        }
        if file.device.is_some() {
            self.device = file.device;
        }
        if let Some(resample) = file.resample {
            self.resample = resample;
        }
        if let Some(quality) = file.quality {
            self.quality = quality;
        }
        if let Some(secs) = file.stop_timeout_secs {
            self.stop_timeout = Duration::from_secs(secs);
        }
    }

    /// The media player launcher for this configuration.
    #[must_use]
    pub fn mpv(&self) -> Mpv {
        Mpv {
            binary: self.player.clone(),
            device: self.device.clone(),
            resample: self.resample,
        }
    }
}

impl File {
    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, is larger than 64 KiB
    /// or is not valid TOML with known keys.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: configuration files are small.
        let file_size = fs::metadata(path)?.len();
        if file_size > Config::MAX_FILE_SIZE {
            return Err(Error::invalid_data(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
            .map_err(|e| Error::invalid_data(format!("{} format is invalid: {e}", path.display())))
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error when `contents` is not valid TOML with known keys.
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// `audictl/config.toml` in the user's configuration directory, if that
    /// file exists.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("audictl").join("config.toml"))
            .filter(|path| path.is_file())
    }
}

/// `$XDG_RUNTIME_DIR/audictl.sock`, or `~/.local/run/audictl.sock` when
/// there is no runtime directory.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    const SOCKET_NAME: &str = "audictl.sock";

    dirs::runtime_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("run")))
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new();
        assert_eq!(config.app_name, "audictl");
        assert!(config.user_agent.starts_with("audictl/"));
        assert_eq!(config.player, PathBuf::from("mpv"));
        assert_eq!(config.stop_timeout, Duration::from_secs(3));
        assert!(config.socket_path.ends_with("audictl.sock"));
    }

    #[test]
    fn file_overrides_defaults() {
        let file = File::parse(
            r#"
            device = "pulse/sink"
            resample = true
            quality = "lossless-first"
            stop_timeout_secs = 1
            "#,
        )
        .unwrap();

        let mut config = Config::new();
        config.merge(file);
        assert_eq!(config.device.as_deref(), Some("pulse/sink"));
        assert!(config.resample);
        assert_eq!(config.quality, Quality::LosslessFirst);
        assert_eq!(config.stop_timeout, Duration::from_secs(1));
        assert_eq!(config.player, PathBuf::from("mpv"));

        let mpv = config.mpv();
        assert_eq!(mpv.device.as_deref(), Some("pulse/sink"));
        assert!(mpv.resample);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = File::parse("volume = 11").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidData);
    }
}
