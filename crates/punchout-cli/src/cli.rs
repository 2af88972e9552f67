use std::path::PathBuf;

use clap::{Parser, Subcommand};
use punchout_types::{AudioCodec, OutputMode, TransferId, VideoCodec};

#[derive(Parser, Debug)]
#[command(name = "punchout", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Player config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the position polling interval
    #[arg(long)]
    pub position_update_ms: Option<u64>,

    /// Write pipeline snapshots here when the engine reports an error
    #[arg(long)]
    pub diagnostics_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check whether a stream configuration can be played
    Probe(ProbeArgs),

    /// Run a synthetic session against the simulated engine
    Simulate(SimulateArgs),
}

#[derive(clap::Args, Debug)]
pub struct ProbeArgs {
    #[arg(long, default_value = "h264")]
    pub video: VideoCodec,

    #[arg(long, default_value = "aac")]
    pub audio: AudioCodec,

    #[arg(long, default_value_t = 1920)]
    pub width: i32,

    #[arg(long, default_value_t = 1080)]
    pub height: i32,

    /// Video bitrate in bits per second
    #[arg(long, default_value_t = 8_000_000)]
    pub video_bitrate: i64,

    /// Audio bitrate in bits per second
    #[arg(long, default_value_t = 128_000)]
    pub audio_bitrate: i64,

    #[arg(long, default_value_t = 30)]
    pub fps: i32,

    /// Transfer characteristics code (ISO/IEC 23001-8)
    #[arg(long, default_value = "1", value_parser = parse_transfer)]
    pub transfer: TransferId,

    #[arg(long, default_value = "punch-out")]
    pub output_mode: OutputMode,

    /// Key system name, e.g. com.widevine.alpha
    #[arg(long)]
    pub key_system: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct SimulateArgs {
    #[arg(long, default_value = "h264")]
    pub video: VideoCodec,

    /// Streams to feed; the others are ended as soon as they ask for data
    #[arg(long, value_delimiter = ',', default_value = "audio,video")]
    pub streams: Vec<String>,

    /// Samples written per stream
    #[arg(long, default_value_t = 60)]
    pub samples: u64,

    #[arg(long, default_value_t = 1.0)]
    pub rate: f64,

    /// Seek here (ms) once playback passes the middle of the stream
    #[arg(long)]
    pub seek_to_ms: Option<u64>,

    /// Simulated clock step per idle poll
    #[arg(long, default_value_t = 10)]
    pub tick_ms: u64,

    /// Give up after this many seconds of wall time
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

fn parse_transfer(s: &str) -> Result<TransferId, String> {
    let code: u8 = s
        .trim()
        .parse()
        .map_err(|_| format!("transfer code `{s}` is not a number"))?;
    TransferId::from_code(code).ok_or_else(|| format!("unknown transfer code {code}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn simulate_defaults() {
        let args = Args::try_parse_from(["punchout", "simulate"]).unwrap();
        let Command::Simulate(sim) = args.cmd else {
            panic!("expected simulate");
        };
        assert_eq!(sim.streams, vec!["audio", "video"]);
        assert_eq!(sim.video, VideoCodec::H264);
        assert_eq!(sim.seek_to_ms, None);
    }

    #[test]
    fn probe_parses_codes_and_modes() {
        let args = Args::try_parse_from([
            "punchout",
            "probe",
            "--video",
            "vp8",
            "--transfer",
            "16",
            "--output-mode",
            "decode-to-texture",
        ])
        .unwrap();
        let Command::Probe(probe) = args.cmd else {
            panic!("expected probe");
        };
        assert_eq!(probe.video, VideoCodec::Vp8);
        assert_eq!(probe.transfer, TransferId::SmpteSt2084);
        assert_eq!(probe.output_mode, OutputMode::DecodeToTexture);
        assert!(Args::try_parse_from(["punchout", "probe", "--transfer", "3"]).is_err());
    }
}
