use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "voice-client", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output and input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Use a specific input device by substring match
    #[arg(long)]
    pub input_device: Option<String>,

    /// Optional TOML config file with pipeline tuning
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a tone split into voice-sized frames through the playback pipeline
    Tone {
        /// Tone frequency in Hz
        #[arg(long, default_value_t = 440.0)]
        freq: f32,

        /// Total duration in milliseconds
        #[arg(long, default_value_t = 2000)]
        duration_ms: u64,

        /// Frame size in milliseconds
        #[arg(long, default_value_t = 20)]
        frame_ms: u64,

        /// Session sample rate in Hz (defaults to the configured playback rate)
        #[arg(long)]
        rate: Option<u32>,

        /// Output volume in [0, 1]
        #[arg(long)]
        volume: Option<f32>,

        /// Render into memory instead of opening an output device
        #[arg(long)]
        dry_run: bool,
    },

    /// Capture the microphone and play it back through the playback pipeline
    Loopback {
        /// Stop after this many seconds (runs until Ctrl-C when omitted)
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Capture the microphone and report uplink frames
    Capture {
        /// Stop after this many seconds (runs until Ctrl-C when omitted)
        #[arg(long)]
        seconds: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tone_with_defaults() {
        let args = Args::try_parse_from(["voice-client", "tone", "--dry-run"]).unwrap();
        match args.cmd {
            Some(Command::Tone {
                freq,
                duration_ms,
                frame_ms,
                rate,
                dry_run,
                ..
            }) => {
                assert_eq!(freq, 440.0);
                assert_eq!(duration_ms, 2000);
                assert_eq!(frame_ms, 20);
                assert_eq!(rate, None);
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_global_device_flags() {
        let args = Args::try_parse_from([
            "voice-client",
            "--device",
            "USB",
            "--input-device",
            "Headset",
            "capture",
            "--seconds",
            "3",
        ])
        .unwrap();
        assert_eq!(args.device.as_deref(), Some("USB"));
        assert_eq!(args.input_device.as_deref(), Some("Headset"));
        assert!(matches!(args.cmd, Some(Command::Capture { seconds: Some(3) })));
    }

    #[test]
    fn list_devices_needs_no_subcommand() {
        let args = Args::try_parse_from(["voice-client", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.cmd.is_none());
    }
}
