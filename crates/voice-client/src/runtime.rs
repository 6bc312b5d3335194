//! Client runtime helpers.
//!
//! Provides device enumeration, the tone and loopback playback runs, and
//! microphone capture reporting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use crossbeam_channel::Receiver;

use voice_audio::device;
use voice_audio::{
    CaptureResampler, CpalInputBackend, CpalOutputBackend, OfflineBackend, PipelineConfig,
    UplinkFramer, VoicePlayer,
};
use voice_audio_types::PlaybackEvent;

use crate::player::{PlaybackCommand, spawn_playback};

/// Options for the `tone` run.
#[derive(Clone, Debug)]
pub struct ToneOptions {
    pub freq: f32,
    pub duration_ms: u64,
    pub frame_ms: u64,
    pub rate: Option<u32>,
    pub volume: Option<f32>,
    pub dry_run: bool,
}

/// List output and input devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Split a sine tone into frames of `frame_len` samples.
pub(crate) fn tone_frames(freq: f32, rate: u32, total: usize, frame_len: usize) -> Vec<Vec<f32>> {
    let frame_len = frame_len.max(1);
    let step = 2.0 * std::f32::consts::PI * freq / rate.max(1) as f32;
    let samples: Vec<f32> = (0..total).map(|i| 0.4 * (step * i as f32).sin()).collect();
    samples.chunks(frame_len).map(<[f32]>::to_vec).collect()
}

/// Play a tone through the playback pipeline in real time.
pub fn run_tone(cfg: &PipelineConfig, opts: &ToneOptions, running: Arc<AtomicBool>) -> Result<()> {
    let mut playback = cfg.playback.clone();
    if let Some(rate) = opts.rate.filter(|r| *r > 0) {
        playback.sample_rate = rate;
    }
    if let Some(volume) = opts.volume {
        playback.initial_volume = volume;
    }
    let rate = playback.sample_rate;
    let frame_len = (rate as u64 * opts.frame_ms.max(1) / 1000) as usize;
    let total = (rate as u64 * opts.duration_ms / 1000) as usize;
    let frames = tone_frames(opts.freq, rate, total, frame_len);
    let frame_period = Duration::from_millis(opts.frame_ms.max(1));

    tracing::info!(
        freq_hz = opts.freq,
        rate_hz = rate,
        frames = frames.len(),
        frame_samples = frame_len,
        dry_run = opts.dry_run,
        "tone"
    );

    if opts.dry_run {
        return run_tone_offline(&playback, frames, frame_len);
    }

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let device_cfg = playback.clone();
    let handle = spawn_playback(
        playback.clone(),
        move || CpalOutputBackend::new(cpal::default_host(), &device_cfg),
        device::StaticCapability::probe(&cpal::default_host()),
        events_tx,
    )?;

    let started = Instant::now();
    for (i, frame) in frames.into_iter().enumerate() {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        handle.play(frame);
        log_events(&events_rx);
        let due = started + frame_period * (i as u32 + 1);
        std::thread::sleep(due.saturating_duration_since(Instant::now()));
    }

    let deadline = Instant::now() + playback.settle_window() + Duration::from_secs(1);
    let mut stopped = false;
    while !stopped && running.load(Ordering::Relaxed) && Instant::now() < deadline {
        match events_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(PlaybackEvent::StopPlay) => {
                tracing::info!("playback stopped");
                stopped = true;
            }
            Ok(other) => log_event(&other),
            Err(_) => {}
        }
    }

    if let Some(snap) = handle.snapshot() {
        print_snapshot(&snap)?;
    }
    handle.shutdown();
    Ok(())
}

/// Render the tone into memory on a simulated device clock.
fn run_tone_offline(
    playback: &voice_audio::PlaybackConfig,
    frames: Vec<Vec<f32>>,
    frame_len: usize,
) -> Result<()> {
    let backend = OfflineBackend::new();
    let offline = backend.handle();
    let mut player = VoicePlayer::new(backend, playback);
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    player.set_observer(events_tx);
    player.initialize(&device::StaticCapability::full())?;

    let t0 = Instant::now();
    let tick = playback.pump_interval();
    let tick_frames = (playback.sample_rate as u64 * tick.as_millis() as u64 / 1000).max(1) as usize;
    let mut elapsed = Duration::ZERO;
    let mut pending = frames.into_iter();
    let mut produced = 0usize;

    // Keep about one frame queued ahead of the device clock until playback settles.
    let limit = Duration::from_secs(3600);
    loop {
        while produced * frame_len <= offline.position() as usize + frame_len {
            match pending.next() {
                Some(frame) => {
                    player.play_pcm(&frame);
                    produced += 1;
                }
                None => break,
            }
        }
        offline.advance(tick_frames);
        elapsed += tick;
        player.pump(t0 + elapsed);
        log_events(&events_rx);

        let idle = player.state() == voice_audio_types::PlaybackState::Idle;
        if idle && produced > 0 && pending.len() == 0 {
            break;
        }
        if elapsed > limit {
            return Err(anyhow!("offline render did not settle"));
        }
    }

    let gaps = offline
        .scheduled()
        .windows(2)
        .filter(|w| w[1].start_frame != w[0].start_frame + w[0].len as u64)
        .count();
    tracing::info!(
        segments = offline.scheduled().len(),
        rendered_frames = offline.position(),
        gaps,
        "offline render finished"
    );
    print_snapshot(&player.snapshot())?;
    player.destroy();
    Ok(())
}

/// Capture the microphone and play it straight back.
pub fn run_loopback(cfg: &PipelineConfig, seconds: Option<u64>, running: Arc<AtomicBool>) -> Result<()> {
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let mut playback = cfg.playback.clone();
    playback.sample_rate = cfg.capture.target_rate;
    let device_cfg = playback.clone();
    let handle = spawn_playback(
        playback,
        move || CpalOutputBackend::new(cpal::default_host(), &device_cfg),
        device::StaticCapability::probe(&cpal::default_host()),
        events_tx,
    )?;

    let mut capture = CaptureResampler::new(
        CpalInputBackend::new(cpal::default_host(), cfg.capture.device.clone()),
        cfg.capture.clone(),
    );
    capture.check_capability(&cpal::default_host())?;
    let cmd_tx = handle.cmd_tx.clone();
    let mut framer = UplinkFramer::new(cfg.uplink_frame_samples);
    capture.set_on_frame(move |frame| {
        for uplink in framer.push(&frame) {
            let _ = cmd_tx.send(PlaybackCommand::Pcm(uplink));
        }
    });
    capture.start()?;
    tracing::info!(
        native_rate_hz = ?capture.native_rate(),
        target_rate_hz = cfg.capture.target_rate,
        "capture started"
    );

    wait_until(seconds, &running, &events_rx);

    capture.stop();
    capture.clear_on_frame();
    tracing::info!(stats = ?capture.stats(), "capture stats");
    if let Some(snap) = handle.snapshot() {
        print_snapshot(&snap)?;
    }
    handle.shutdown();
    Ok(())
}

/// Capture the microphone and log uplink frame counts.
pub fn run_capture(cfg: &PipelineConfig, seconds: Option<u64>, running: Arc<AtomicBool>) -> Result<()> {
    let mut capture = CaptureResampler::new(
        CpalInputBackend::new(cpal::default_host(), cfg.capture.device.clone()),
        cfg.capture.clone(),
    );
    capture.check_capability(&cpal::default_host())?;
    let (frames_tx, frames_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
    let mut framer = UplinkFramer::new(cfg.uplink_frame_samples);
    capture.set_on_frame(move |frame| {
        for uplink in framer.push(&frame) {
            let _ = frames_tx.send(uplink);
        }
    });
    capture.start()?;
    tracing::info!(
        native_rate_hz = ?capture.native_rate(),
        target_rate_hz = cfg.capture.target_rate,
        "capture started"
    );

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut uplink_frames = 0u64;
    let mut last_report = Instant::now();
    while running.load(Ordering::Relaxed) && deadline.is_none_or(|d| Instant::now() < d) {
        if let Ok(frame) = frames_rx.recv_timeout(Duration::from_millis(100)) {
            uplink_frames += 1;
            let peak = frame.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            tracing::trace!(samples = frame.len(), peak, "uplink frame");
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            tracing::info!(uplink_frames, stats = ?capture.stats(), "capture");
        }
    }

    capture.stop();
    tracing::info!(uplink_frames, stats = ?capture.stats(), "capture finished");
    Ok(())
}

fn wait_until(seconds: Option<u64>, running: &AtomicBool, events_rx: &Receiver<PlaybackEvent>) {
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    while running.load(Ordering::Relaxed) && deadline.is_none_or(|d| Instant::now() < d) {
        if let Ok(event) = events_rx.recv_timeout(Duration::from_millis(100)) {
            log_event(&event);
        }
    }
}

fn log_events(events_rx: &Receiver<PlaybackEvent>) {
    for event in events_rx.try_iter() {
        log_event(&event);
    }
}

fn log_event(event: &PlaybackEvent) {
    match event {
        PlaybackEvent::StartPlay => tracing::info!("playback started"),
        PlaybackEvent::StopPlay => tracing::info!("playback stopped"),
        PlaybackEvent::Error(message) => tracing::warn!("playback error: {message}"),
    }
}

fn print_snapshot(snap: &voice_audio_types::PlaybackSnapshot) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(snap)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_frames_split_evenly() {
        let frames = tone_frames(440.0, 48_000, 48_000, 960);
        assert_eq!(frames.len(), 50);
        assert!(frames.iter().all(|f| f.len() == 960));
        assert!(frames.iter().flatten().all(|s| s.abs() <= 0.4));
    }

    #[test]
    fn tone_frames_keep_short_tail() {
        let frames = tone_frames(440.0, 16_000, 1000, 320);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3].len(), 40);
    }

    #[test]
    fn dry_run_renders_without_device() {
        let cfg = PipelineConfig::default();
        let opts = ToneOptions {
            freq: 300.0,
            duration_ms: 100,
            frame_ms: 20,
            rate: Some(16_000),
            volume: Some(0.5),
            dry_run: true,
        };
        run_tone(&cfg, &opts, Arc::new(AtomicBool::new(true))).unwrap();
    }
}
