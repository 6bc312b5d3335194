//! Playback worker.
//!
//! Owns a [`VoicePlayer`] on a dedicated thread and serves commands from a
//! channel. The output backend is built inside the thread, so CPAL streams
//! never cross threads. The loop wakes at least every pump interval to drive
//! segment chaining and the settle window.

use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use voice_audio::device::AudioCapability;
use voice_audio::{OutputBackend, PlaybackConfig, VoicePlayer};
use voice_audio_types::{PlaybackEvent, PlaybackSnapshot};

/// Commands accepted by the playback worker thread.
#[derive(Debug)]
pub enum PlaybackCommand {
    Pcm(Vec<f32>),
    SetSampleRate(u32),
    SetVolume(f32),
    Stop,
    Snapshot(Sender<PlaybackSnapshot>),
    Shutdown,
}

/// Handle for sending commands to the playback worker.
pub struct PlaybackHandle {
    pub cmd_tx: Sender<PlaybackCommand>,
    join: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    pub fn play(&self, frame: Vec<f32>) {
        let _ = self.cmd_tx.send(PlaybackCommand::Pcm(frame));
    }

    /// Ask the worker for its current snapshot.
    pub fn snapshot(&self) -> Option<PlaybackSnapshot> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.cmd_tx.send(PlaybackCommand::Snapshot(tx)).ok()?;
        rx.recv().ok()
    }

    /// Stop the worker and wait for it to release the device.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let _ = self.cmd_tx.send(PlaybackCommand::Shutdown);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::warn!("playback worker panicked");
            }
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Spawn the playback worker thread.
///
/// `make_backend` runs on the worker thread. Lifecycle events are sent to `events`.
pub fn spawn_playback<B, F, C>(
    config: PlaybackConfig,
    make_backend: F,
    capability: C,
    events: Sender<PlaybackEvent>,
) -> Result<PlaybackHandle>
where
    B: OutputBackend + 'static,
    F: FnOnce() -> B + Send + 'static,
    C: AudioCapability + Send + 'static,
{
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let join = std::thread::Builder::new()
        .name("voice-playback".to_string())
        .spawn(move || {
            let mut player = VoicePlayer::new(make_backend(), &config);
            player.set_observer(events);
            if let Err(e) = player.initialize(&capability) {
                tracing::error!("playback unavailable: {e}");
            }
            playback_thread_main(player, &config, cmd_rx);
        })
        .context("spawn playback worker")?;
    Ok(PlaybackHandle {
        cmd_tx,
        join: Some(join),
    })
}

/// Main loop for the playback worker.
fn playback_thread_main<B: OutputBackend>(
    mut player: VoicePlayer<B>,
    config: &PlaybackConfig,
    cmd_rx: Receiver<PlaybackCommand>,
) {
    let pump_interval = config.pump_interval();
    loop {
        match cmd_rx.recv_timeout(pump_interval) {
            Ok(PlaybackCommand::Pcm(frame)) => {
                player.play_pcm(&frame);
            }
            Ok(PlaybackCommand::SetSampleRate(rate)) => player.set_sample_rate(rate),
            Ok(PlaybackCommand::SetVolume(volume)) => player.set_volume(volume),
            Ok(PlaybackCommand::Stop) => player.stop(),
            Ok(PlaybackCommand::Snapshot(reply)) => {
                let _ = reply.send(player.snapshot());
            }
            Ok(PlaybackCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        player.pump(Instant::now());
    }
    player.destroy();
    tracing::debug!("playback worker exiting");
}
