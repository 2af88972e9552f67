use anyhow::{Context, Result};
use punchout_player::capability::{
    audio_supported, media_supported, output_mode_supported, transfer_characteristics_supported,
    video_supported,
};
use serde::Serialize;

use crate::cli::ProbeArgs;

#[derive(Debug, Serialize)]
struct ProbeReport {
    video_codec: &'static str,
    audio_codec: &'static str,
    audio_supported: bool,
    video_supported: bool,
    transfer_supported: bool,
    output_mode_supported: bool,
    media_supported: bool,
}

fn evaluate(args: &ProbeArgs) -> ProbeReport {
    ProbeReport {
        video_codec: args.video.as_str(),
        audio_codec: args.audio.as_str(),
        audio_supported: audio_supported(args.audio, args.audio_bitrate),
        video_supported: video_supported(
            args.video,
            args.width,
            args.height,
            args.video_bitrate,
            args.fps,
            args.transfer,
        ),
        transfer_supported: transfer_characteristics_supported(args.transfer),
        // No DRM handle is available from the command line.
        output_mode_supported: output_mode_supported(args.output_mode, args.video, None),
        media_supported: media_supported(args.video, args.audio, args.key_system.as_deref()),
    }
}

pub fn run(args: &ProbeArgs) -> Result<()> {
    let report = evaluate(args);
    tracing::debug!(?report, "probe");
    let json = serde_json::to_string_pretty(&report).context("serialize probe report")?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, Command};
    use clap::Parser;

    fn probe(extra: &[&str]) -> ProbeReport {
        let mut argv = vec!["punchout", "probe"];
        argv.extend_from_slice(extra);
        let Command::Probe(args) = Args::try_parse_from(argv).unwrap().cmd else {
            panic!("expected probe");
        };
        evaluate(&args)
    }

    #[test]
    fn defaults_are_playable() {
        let report = probe(&[]);
        assert!(report.audio_supported);
        assert!(report.video_supported);
        assert!(report.transfer_supported);
        assert!(report.output_mode_supported);
        assert!(report.media_supported);
    }

    #[test]
    fn oversized_video_fails_only_the_video_check() {
        let report = probe(&["--width", "7680", "--height", "4320"]);
        assert!(!report.video_supported);
        // Output mode and media checks use zeroed stream parameters.
        assert!(report.output_mode_supported);
        assert!(report.media_supported);
    }

    #[test]
    fn texture_output_and_hevc_are_rejected() {
        assert!(!probe(&["--output-mode", "decode-to-texture"]).output_mode_supported);
        let hevc = probe(&["--video", "hevc"]);
        assert!(!hevc.video_supported && !hevc.output_mode_supported && !hevc.media_supported);
        let json = serde_json::to_value(&hevc).unwrap();
        assert_eq!(json["video_codec"], "h265");
    }

    #[test]
    fn custom_transfer_is_not_standard() {
        let report = probe(&["--transfer", "19"]);
        assert!(!report.transfer_supported);
        assert!(!report.video_supported);
    }
}
