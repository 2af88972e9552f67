use serde::{Deserialize, Serialize};

/// Seek-session identifier supplied by the caller with every seek.
pub type Ticket = i32;

/// Ticket value before the first seek; decoder notifications are withheld until it changes.
pub const INITIAL_TICKET: Ticket = 0;

/// Elementary stream carried by a feeder.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Audio,
    Video,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Audio => "audio",
            StreamType::Video => "video",
        }
    }
}

impl std::str::FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" => Ok(StreamType::Audio),
            "video" => Ok(StreamType::Video),
            other => Err(format!("unknown stream type `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    None,
    H264,
    H265,
    Mpeg2,
    Theora,
    Vc1,
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::None => "none",
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Mpeg2 => "mpeg2",
            VideoCodec::Theora => "theora",
            VideoCodec::Vc1 => "vc1",
            VideoCodec::Vp8 => "vp8",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Av1 => "av1",
        }
    }
}

impl std::str::FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let codec = match s.trim().to_ascii_lowercase().as_str() {
            "none" => VideoCodec::None,
            "h264" | "avc" => VideoCodec::H264,
            "h265" | "hevc" => VideoCodec::H265,
            "mpeg2" => VideoCodec::Mpeg2,
            "theora" => VideoCodec::Theora,
            "vc1" => VideoCodec::Vc1,
            "vp8" => VideoCodec::Vp8,
            "vp9" => VideoCodec::Vp9,
            "av1" => VideoCodec::Av1,
            other => return Err(format!("unknown video codec `{other}`")),
        };
        Ok(codec)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    None,
    Aac,
    Ac3,
    Eac3,
    Opus,
    Vorbis,
}

impl AudioCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::None => "none",
            AudioCodec::Aac => "aac",
            AudioCodec::Ac3 => "ac3",
            AudioCodec::Eac3 => "eac3",
            AudioCodec::Opus => "opus",
            AudioCodec::Vorbis => "vorbis",
        }
    }
}

impl std::str::FromStr for AudioCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let codec = match s.trim().to_ascii_lowercase().as_str() {
            "none" => AudioCodec::None,
            "aac" => AudioCodec::Aac,
            "ac3" => AudioCodec::Ac3,
            "eac3" => AudioCodec::Eac3,
            "opus" => AudioCodec::Opus,
            "vorbis" => AudioCodec::Vorbis,
            other => return Err(format!("unknown audio codec `{other}`")),
        };
        Ok(codec)
    }
}

/// How decoded video reaches the screen.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// The hardware sink composites video below the UI plane.
    PunchOut,
    /// Frames are handed back to the caller as textures.
    DecodeToTexture,
}

impl std::str::FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "punch-out" | "punchout" => Ok(OutputMode::PunchOut),
            "decode-to-texture" => Ok(OutputMode::DecodeToTexture),
            other => Err(format!("unknown output mode `{other}`")),
        }
    }
}

/// Video transfer characteristics, numbered as in ISO/IEC 23001-8.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TransferId {
    Bt709 = 1,
    Unspecified = 2,
    Gamma22 = 4,
    Gamma28 = 5,
    Smpte170m = 6,
    Smpte240m = 7,
    Linear = 8,
    Log = 9,
    LogSqrt = 10,
    Iec61966_2_4 = 11,
    Bt1361Ecg = 12,
    Iec61966_2_1 = 13,
    Bt2020_10bit = 14,
    Bt2020_12bit = 15,
    SmpteSt2084 = 16,
    SmpteSt428_1 = 17,
    AribStdB67 = 18,
    /// Vendor-specific value outside the standard table.
    Custom = 19,
}

impl TransferId {
    /// Last value defined by the standard table.
    pub const LAST_STANDARD: TransferId = TransferId::AribStdB67;

    /// Numeric code as carried in the bitstream; unknown codes map to `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        let id = match code {
            1 => TransferId::Bt709,
            2 => TransferId::Unspecified,
            4 => TransferId::Gamma22,
            5 => TransferId::Gamma28,
            6 => TransferId::Smpte170m,
            7 => TransferId::Smpte240m,
            8 => TransferId::Linear,
            9 => TransferId::Log,
            10 => TransferId::LogSqrt,
            11 => TransferId::Iec61966_2_4,
            12 => TransferId::Bt1361Ecg,
            13 => TransferId::Iec61966_2_1,
            14 => TransferId::Bt2020_10bit,
            15 => TransferId::Bt2020_12bit,
            16 => TransferId::SmpteSt2084,
            17 => TransferId::SmpteSt428_1,
            18 => TransferId::AribStdB67,
            19 => TransferId::Custom,
            _ => return None,
        };
        Some(id)
    }
}

/// Opaque DRM system handle. Only its presence is ever inspected.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrmSystem(pub u64);

/// Opaque window handle the player is attached to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowHandle(pub u64);

/// Graphics context provider for decode-to-texture output; unused in punch-out mode.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphicsProvider;

/// Frame handed out in decode-to-texture mode.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecodeTarget(pub u64);

/// Out-of-band audio stream description supplied at player creation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioHeader {
    pub format_tag: u16,
    pub number_of_channels: u16,
    pub samples_per_second: u32,
    pub average_bytes_per_second: u32,
    pub block_alignment: u16,
    pub bits_per_sample: u16,
    /// AAC AudioSpecificConfig bytes.
    #[serde(default)]
    pub audio_specific_config: Vec<u8>,
}

/// Per-sample video metadata. Carried for API completeness; the hardware decoder reads
/// everything it needs from the bitstream.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoSampleInfo {
    pub is_key_frame: bool,
    pub frame_width: i32,
    pub frame_height: i32,
}

/// Per-sample encryption metadata. Not interpreted by this backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrmSampleInfo {
    pub key_id: Vec<u8>,
    pub initialization_vector: Vec<u8>,
}

/// Player lifecycle reported through the player-status callback.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Initialized,
    Prerolling,
    Presenting,
    EndOfStream,
    Destroyed,
}

/// Per-stream decoder notification.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecoderState {
    /// The stream wants more samples.
    NeedsData,
    /// The stream was torn down; held sample state can be released.
    Destroyed,
}

/// Playback snapshot returned by `get_info`.
///
/// Always read and written as a whole value.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlayerInfo {
    pub is_paused: bool,
    pub playback_rate: f64,
    pub volume: f64,
    /// Current media position in microseconds.
    pub current_media_timestamp: i64,
}

impl Default for PlayerInfo {
    fn default() -> Self {
        Self {
            is_paused: true,
            playback_rate: 1.0,
            volume: 1.0,
            current_media_timestamp: 0,
        }
    }
}

/// Video window placement requested by the caller.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bounds {
    pub z_index: i32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}
