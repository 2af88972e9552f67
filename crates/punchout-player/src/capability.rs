//! Static media capability predicates for the punch-out platform.

use punchout_types::{AudioCodec, DrmSystem, OutputMode, TransferId, VideoCodec};

const MAX_AUDIO_BITRATE: i64 = 5 * 1024 * 1024;
const MAX_VIDEO_BITRATE: i64 = 60 * 1024 * 1024;
const MAX_VIDEO_DIMENSION: i32 = 5000;
const MAX_VIDEO_FPS: i32 = 60;

/// AAC only, up to 5 Mi bits per second.
pub fn audio_supported(codec: AudioCodec, bitrate: i64) -> bool {
    codec == AudioCodec::Aac && (0..=MAX_AUDIO_BITRATE).contains(&bitrate)
}

/// Hardware-decodable codecs within the decoder's size, rate and bitrate envelope.
pub fn video_supported(
    codec: VideoCodec,
    width: i32,
    height: i32,
    bitrate: i64,
    fps: i32,
    transfer: TransferId,
) -> bool {
    let codec_ok = matches!(
        codec,
        VideoCodec::H264 | VideoCodec::Mpeg2 | VideoCodec::Vc1 | VideoCodec::Vp8
    );
    codec_ok
        && (0..=MAX_VIDEO_DIMENSION).contains(&width)
        && (0..=MAX_VIDEO_DIMENSION).contains(&height)
        && (0..=MAX_VIDEO_BITRATE).contains(&bitrate)
        && (0..=MAX_VIDEO_FPS).contains(&fps)
        && transfer_characteristics_supported(transfer)
}

/// Punch-out is the only output path; the DRM handle is not consulted.
pub fn output_mode_supported(mode: OutputMode, codec: VideoCodec, _drm: Option<DrmSystem>) -> bool {
    mode == OutputMode::PunchOut
        && video_supported(codec, 0, 0, 0, 0, TransferId::Unspecified)
}

/// Codec pair check with zeroed stream parameters. Any key system is accepted.
pub fn media_supported(video: VideoCodec, audio: AudioCodec, key_system: Option<&str>) -> bool {
    if let Some(key_system) = key_system {
        tracing::debug!(key_system, "accepting key system without inspection");
    }
    audio_supported(audio, 0) && video_supported(video, 0, 0, 0, 0, TransferId::Unspecified)
}

/// Values from the standard transfer table only.
pub fn transfer_characteristics_supported(id: TransferId) -> bool {
    id <= TransferId::LAST_STANDARD
}
