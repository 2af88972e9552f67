use anyhow::{Result, anyhow, bail};
use bytes::Bytes;
use punchout_types::{AudioCodec, AudioHeader, StreamType};

use super::StreamProfile;
use crate::config::PlayerConfig;
use crate::engine::Caps;

/// Average byte rates at or below this are treated as unknown.
const MIN_REPORTED_BYTE_RATE: u32 = 100;

/// Audio stream description. Only AAC with an AudioSpecificConfig is accepted.
pub struct AudioProfile {
    codec: AudioCodec,
    header: Option<AudioHeader>,
    min_percent: u32,
    max_bytes: u64,
}

impl AudioProfile {
    pub fn new(codec: AudioCodec, header: Option<AudioHeader>, config: &PlayerConfig) -> Self {
        Self {
            codec,
            header,
            min_percent: config.audio_min_percent,
            max_bytes: config.audio_max_bytes,
        }
    }
}

impl StreamProfile for AudioProfile {
    fn stream_type(&self) -> StreamType {
        StreamType::Audio
    }

    fn queue_limits(&self) -> (u32, u64) {
        (self.min_percent, self.max_bytes)
    }

    fn build_caps(&self) -> Result<Caps> {
        if self.codec != AudioCodec::Aac {
            bail!("unsupported audio codec {}", self.codec.as_str());
        }
        let header = self
            .header
            .as_ref()
            .ok_or_else(|| anyhow!("aac stream without audio header"))?;
        if header.audio_specific_config.is_empty() {
            bail!("aac stream without audio specific config");
        }
        let mut caps = Caps::new("audio/mpeg")
            .with_int("mpegversion", 4)
            .with_bool("framed", true)
            .with_str("stream-format", "raw")
            .with_buffer(
                "codec_data",
                Bytes::copy_from_slice(&header.audio_specific_config),
            );
        if header.number_of_channels != 0 {
            caps = caps.with_int("channels", i64::from(header.number_of_channels));
        }
        if header.samples_per_second != 0 {
            caps = caps.with_int("rate", i64::from(header.samples_per_second));
        }
        if header.average_bytes_per_second > MIN_REPORTED_BYTE_RATE {
            caps = caps.with_int("bitrate", i64::from(header.average_bytes_per_second) * 8);
        }
        if header.block_alignment != 0 {
            caps = caps.with_int("block_align", i64::from(header.block_alignment));
        }
        if header.bits_per_sample != 0 {
            caps = caps.with_int("depth", i64::from(header.bits_per_sample));
        }
        Ok(caps)
    }
}
