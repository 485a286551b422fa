//! Binary configuration.
//!
//! Everything is optional; a missing file or table falls back to the library defaults.
//!
//! ```toml
//! device = "USB"
//!
//! [controller]
//! queue_capacity = 8
//!
//! [playback]
//! gain = 0.25
//!
//! [network]
//! timeout_ms = 5000
//!
//! [library]
//! root = "/srv/music"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use jukebox_player::config::{ControllerConfig, PlaybackConfig};
use jukebox_player::source::http::HttpReaderConfig;

use crate::cli::Args;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JukeboxConfig {
    /// Output device substring; `None` picks the host default.
    pub device: Option<String>,
    pub controller: ControllerConfig,
    pub playback: PlaybackConfig,
    pub network: NetworkConfig,
    pub library: LibraryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_ms: u64,
    pub request_icy_metadata: bool,
    pub user_agent: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let defaults = HttpReaderConfig::default();
        Self {
            timeout_ms: defaults.timeout.as_millis() as u64,
            request_icy_metadata: defaults.request_icy_metadata,
            user_agent: None,
        }
    }
}

impl NetworkConfig {
    pub fn reader_config(&self) -> HttpReaderConfig {
        let mut cfg = HttpReaderConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            request_icy_metadata: self.request_icy_metadata,
            ..HttpReaderConfig::default()
        };
        if let Some(agent) = &self.user_agent {
            cfg.user_agent = agent.clone();
        }
        cfg
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory that local locators are resolved against.
    pub root: Option<PathBuf>,
}

impl JukeboxConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<JukeboxConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Config file (if any) with command-line overrides applied.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut cfg = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        cfg.apply_overrides(args);
        Ok(cfg)
    }

    fn apply_overrides(&mut self, args: &Args) {
        if let Some(device) = &args.device {
            self.device = Some(device.clone());
        }
        if let Some(capacity) = args.queue_capacity {
            self.controller.queue_capacity = capacity;
        }
        if let Some(root) = &args.library_root {
            self.library.root = Some(root.clone());
        }
        // Empty or whitespace device names mean "host default".
        self.device = self
            .device
            .take()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn empty_file_uses_library_defaults() {
        let cfg: JukeboxConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.controller.queue_capacity, 5);
        assert_eq!(cfg.playback.chunk_frames, 1024);
        assert!(cfg.network.request_icy_metadata);
        assert!(cfg.library.root.is_none());
    }

    #[test]
    fn tables_override_individual_fields() {
        let cfg: JukeboxConfig = toml::from_str(
            r#"
            device = "USB"

            [controller]
            queue_capacity = 8
            failure_backoff_ms = 1000

            [playback]
            gain = 0.5

            [network]
            timeout_ms = 2500
            user_agent = "kitchen-radio"

            [library]
            root = "/srv/music"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.device.as_deref(), Some("USB"));
        assert_eq!(cfg.controller.queue_capacity, 8);
        assert_eq!(cfg.controller.max_locator_len, 256);
        assert_eq!(cfg.controller.failure_backoff_ms, 1000);
        assert_eq!(cfg.playback.gain, 0.5);
        assert_eq!(cfg.playback.buffer_seconds, 2.0);
        assert_eq!(cfg.library.root, Some(PathBuf::from("/srv/music")));

        let reader = cfg.network.reader_config();
        assert_eq!(reader.timeout, Duration::from_millis(2500));
        assert_eq!(reader.user_agent, "kitchen-radio");
    }

    #[test]
    fn unknown_values_are_rejected() {
        let err = toml::from_str::<JukeboxConfig>("[controller]\nqueue_capacity = \"lots\"");
        assert!(err.is_err());
    }

    #[test]
    fn command_line_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device = \"Speakers\"\n[controller]\nqueue_capacity = 3").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::parse_from([
            "jukebox",
            "--config",
            &path,
            "--queue-capacity",
            "12",
            "play",
            "/a.mp3",
        ]);
        let cfg = JukeboxConfig::from_args(&args).unwrap();
        assert_eq!(cfg.controller.queue_capacity, 12);
        assert_eq!(cfg.device.as_deref(), Some("Speakers"));

        let args = Args::parse_from(["jukebox", "--config", &path, "--device", " ", "play", "x"]);
        let cfg = JukeboxConfig::from_args(&args).unwrap();
        assert!(cfg.device.is_none());
        assert_eq!(cfg.controller.queue_capacity, 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = JukeboxConfig::load(Path::new("/nonexistent/jukebox.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("read config"));
    }
}
