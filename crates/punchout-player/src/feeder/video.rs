use anyhow::{Result, bail};
use punchout_types::{StreamType, VideoCodec};

use super::StreamProfile;
use crate::config::PlayerConfig;
use crate::engine::Caps;

/// Video stream description for the hardware decoder.
pub struct VideoProfile {
    codec: VideoCodec,
    min_percent: u32,
    max_bytes: u64,
}

impl VideoProfile {
    pub fn new(codec: VideoCodec, config: &PlayerConfig) -> Self {
        Self {
            codec,
            min_percent: config.video_min_percent,
            max_bytes: config.video_max_bytes,
        }
    }
}

impl StreamProfile for VideoProfile {
    fn stream_type(&self) -> StreamType {
        StreamType::Video
    }

    fn queue_limits(&self) -> (u32, u64) {
        (self.min_percent, self.max_bytes)
    }

    fn build_caps(&self) -> Result<Caps> {
        let caps = match self.codec {
            VideoCodec::H264 => Caps::new("video/x-h264").with_str("stream-format", "byte-stream"),
            VideoCodec::Mpeg2 => Caps::new("video/x-mpeg"),
            VideoCodec::Vc1 => Caps::new("video/x-vc1"),
            VideoCodec::Vp8 => Caps::new("video/x-vp8"),
            other => bail!("unsupported video codec {}", other.as_str()),
        };
        Ok(caps)
    }
}
