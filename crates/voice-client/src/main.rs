//! Voice client: drives the voice audio pipeline against real devices.
//!
//! ## Modes
//! - `tone`: play a tone split into voice-sized frames (optionally rendered offline).
//! - `loopback`: capture the microphone, resample, re-frame and play it back.
//! - `capture`: capture the microphone and report uplink frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use voice_client::cli::{Args, Command};
use voice_client::config::resolve_pipeline_config;
use voice_client::runtime::{self, ToneOptions};

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,voice_client=info,voice_audio=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let cfg = resolve_pipeline_config(
        args.config.as_deref(),
        args.device.clone(),
        args.input_device.clone(),
    )?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        let _ = ctrlc::set_handler(move || {
            if !running.swap(false, Ordering::SeqCst) {
                std::process::exit(130);
            }
        });
    }

    match args.cmd {
        Some(Command::Tone {
            freq,
            duration_ms,
            frame_ms,
            rate,
            volume,
            dry_run,
        }) => runtime::run_tone(
            &cfg,
            &ToneOptions {
                freq,
                duration_ms,
                frame_ms,
                rate,
                volume,
                dry_run,
            },
            running,
        ),
        Some(Command::Loopback { seconds }) => runtime::run_loopback(&cfg, seconds, running),
        Some(Command::Capture { seconds }) => runtime::run_capture(&cfg, seconds, running),
        None => {
            tracing::warn!("no command given; see --help");
            Ok(())
        }
    }
}
