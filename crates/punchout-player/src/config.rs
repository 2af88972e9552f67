//! Player tuning and platform wiring.
//!
//! Defaults match the fixed sinks of the target device; a TOML file can override any field.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Pipeline and stream settings used when building a player.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// URI scheme the aggregate source is registered under.
    pub uri_scheme: String,
    /// Element factory for the punch-out video sink.
    pub video_sink: String,
    /// Element factory for the hardware audio sink.
    pub audio_sink: String,
    /// Pipeline flag nicknames OR-ed into the pipeline `flags` property.
    pub pipeline_flags: Vec<String>,
    /// Position polling interval once the pipeline has prerolled.
    pub position_update_ms: u64,
    /// Endpoint refill threshold for the audio stream, in percent of `audio_max_bytes`.
    pub audio_min_percent: u32,
    /// Endpoint queue limit for the audio stream.
    pub audio_max_bytes: u64,
    /// Endpoint refill threshold for the video stream, in percent of `video_max_bytes`.
    pub video_min_percent: u32,
    /// Endpoint queue limit for the video stream.
    pub video_max_bytes: u64,
    /// Where pipeline snapshots are written when the engine reports an error.
    pub diagnostics_dir: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            uri_scheme: "punchout".to_string(),
            video_sink: "westerossink".to_string(),
            audio_sink: "omxhdmiaudiosink".to_string(),
            pipeline_flags: ["video", "audio", "native-video", "native-audio", "buffering"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            position_update_ms: 16,
            audio_min_percent: 60,
            audio_max_bytes: 64 << 10,
            video_min_percent: 60,
            video_max_bytes: 256 << 10,
            diagnostics_dir: None,
        }
    }
}

impl PlayerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<PlayerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the player cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.uri_scheme.trim().is_empty() {
            bail!("uri_scheme must not be empty");
        }
        if self.video_sink.trim().is_empty() || self.audio_sink.trim().is_empty() {
            bail!("sink factory names must not be empty");
        }
        if self.position_update_ms == 0 {
            bail!("position_update_ms must be positive");
        }
        if self.audio_min_percent > 100 || self.video_min_percent > 100 {
            bail!("min_percent values must be within 0..=100");
        }
        Ok(())
    }

    /// URI the pipeline is pointed at so the engine resolves the aggregate source.
    pub fn source_uri(&self) -> String {
        format!("{}://", self.uri_scheme)
    }
}
