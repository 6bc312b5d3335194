//! Lifecycle observers for the playback path.

use crossbeam_channel::Sender;
use voice_audio_types::PlaybackEvent;

/// Receives playback lifecycle notifications.
///
/// Methods are invoked synchronously from the transition that triggers them,
/// at most once per transition.
pub trait PlaybackObserver: Send {
    fn on_start_play(&mut self) {}
    fn on_stop_play(&mut self) {}
    fn on_error(&mut self, _message: &str) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl PlaybackObserver for NoopObserver {}

/// Forward notifications into a channel so delivery is decoupled from the caller.
impl PlaybackObserver for Sender<PlaybackEvent> {
    fn on_start_play(&mut self) {
        let _ = self.send(PlaybackEvent::StartPlay);
    }

    fn on_stop_play(&mut self) {
        let _ = self.send(PlaybackEvent::StopPlay);
    }

    fn on_error(&mut self, message: &str) {
        let _ = self.send(PlaybackEvent::Error(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_observer_forwards_events() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut obs: Box<dyn PlaybackObserver> = Box::new(tx);
        obs.on_start_play();
        obs.on_error("device lost");
        obs.on_stop_play();

        let events: Vec<PlaybackEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                PlaybackEvent::StartPlay,
                PlaybackEvent::Error("device lost".to_string()),
                PlaybackEvent::StopPlay,
            ]
        );
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (tx, rx) = crossbeam_channel::unbounded::<PlaybackEvent>();
        drop(rx);
        let mut obs = tx;
        obs.on_start_play();
    }
}
