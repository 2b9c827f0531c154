//! Real-time to non-real-time handoff
//!
//! Taps push fixed-size [`TapMessage`]s into a bounded crossbeam channel with
//! `try_send` (never blocks, never allocates). A dispatcher thread turns them
//! into [`AudioEvent`]s and fans them out over a broadcast channel. The
//! control thread uses the same channel, so events keep their order.

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::audio::convert::i16_to_le_bytes;
use crate::audio::events::{AudioEvent, InterruptionKind};
use crate::constants::{CONTROL_SEND_TIMEOUT_MS, MAX_TAP_FRAMES};

/// One microphone buffer, stored inline
#[derive(Clone)]
pub struct MicFrame {
    samples: [i16; MAX_TAP_FRAMES],
    len: usize,
    raw_level: f32,
    input_volume: f32,
}

impl MicFrame {
    pub fn new() -> Self {
        Self {
            samples: [0; MAX_TAP_FRAMES],
            len: 0,
            raw_level: 0.0,
            input_volume: 0.0,
        }
    }

    /// Writable sample storage; call [`MicFrame::finish`] afterwards
    pub fn samples_mut(&mut self) -> &mut [i16; MAX_TAP_FRAMES] {
        &mut self.samples
    }

    pub fn finish(&mut self, len: usize, raw_level: f32, input_volume: f32) {
        self.len = len.min(MAX_TAP_FRAMES);
        self.raw_level = raw_level;
        self.input_volume = input_volume;
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples[..self.len]
    }
}

impl Default for MicFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Message crossing from a tap (or the control thread) to the dispatcher
#[allow(clippy::large_enum_variant)] // inline so taps never allocate
pub enum TapMessage {
    Microphone(MicFrame),
    InputVolume(f32),
    OutputVolume(f32),
    Interruption(InterruptionKind),
    Shutdown,
}

/// Producer side of the handoff, cloned into each tap
#[derive(Clone)]
pub struct Handoff {
    tx: Sender<TapMessage>,
    dropped: Arc<AtomicU64>,
}

impl Handoff {
    /// Non-blocking send; a full queue drops the message
    #[inline]
    pub fn offer(&self, message: TapMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Send from the control thread, waiting for the dispatcher to make room.
    /// Never call this from a tap.
    pub fn deliver(&self, message: TapMessage) -> bool {
        match self
            .tx
            .send_timeout(message, Duration::from_millis(CONTROL_SEND_TIMEOUT_MS))
        {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => false,
        }
    }

    /// Messages lost to a full queue
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Dispatcher thread converting tap messages into outward events
pub struct EventDispatcher {
    handoff: Handoff,
    events: broadcast::Sender<AudioEvent>,
    thread_handle: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Spawn the dispatcher with a handoff queue of `capacity` messages
    pub fn spawn(capacity: usize, events: broadcast::Sender<AudioEvent>) -> std::io::Result<Self> {
        let (tx, rx) = bounded::<TapMessage>(capacity.max(1));
        let events_for_thread = events.clone();

        let handle = thread::Builder::new()
            .name("voice-events".into())
            .spawn(move || run(rx, events_for_thread))?;

        Ok(Self {
            handoff: Handoff {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            events,
            thread_handle: Some(handle),
        })
    }

    pub fn handoff(&self) -> Handoff {
        self.handoff.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AudioEvent> {
        self.events.subscribe()
    }

    /// Stop the thread after it has delivered everything already queued
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            // Blocking send is fine here: we are on the control thread
            let _ = self.handoff.tx.send(TapMessage::Shutdown);
            if handle.join().is_err() {
                tracing::error!("Event dispatcher thread panicked");
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(rx: Receiver<TapMessage>, events: broadcast::Sender<AudioEvent>) {
    tracing::debug!("Event dispatcher started");
    for message in rx.iter() {
        match message {
            TapMessage::Microphone(frame) => {
                let _ = events.send(AudioEvent::MicrophoneData(i16_to_le_bytes(frame.samples())));
                let _ = events.send(AudioEvent::RawInputLevel(frame.raw_level));
                let _ = events.send(AudioEvent::InputVolume(frame.input_volume));
            }
            TapMessage::InputVolume(level) => {
                let _ = events.send(AudioEvent::InputVolume(level));
            }
            TapMessage::OutputVolume(level) => {
                let _ = events.send(AudioEvent::OutputVolume(level));
            }
            TapMessage::Interruption(kind) => {
                let _ = events.send(AudioEvent::AudioInterruption(kind));
            }
            TapMessage::Shutdown => break,
        }
    }
    tracing::debug!("Event dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn recv(rx: &mut broadcast::Receiver<AudioEvent>) -> AudioEvent {
        for _ in 0..200 {
            if let Ok(event) = rx.try_recv() {
                return event;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no event received");
    }

    #[test]
    fn test_microphone_frame_expands_to_three_events() {
        let (events, _) = broadcast::channel(16);
        let mut dispatcher = EventDispatcher::spawn(8, events).unwrap();
        let mut rx = dispatcher.subscribe();

        let mut frame = MicFrame::new();
        frame.samples_mut()[..2].copy_from_slice(&[1, -1]);
        frame.finish(2, 0.5, 0.25);
        assert!(dispatcher.handoff().offer(TapMessage::Microphone(frame)));

        assert_eq!(
            recv(&mut rx),
            AudioEvent::MicrophoneData(bytes::Bytes::from_static(&[1, 0, 0xFF, 0xFF]))
        );
        assert_eq!(recv(&mut rx), AudioEvent::RawInputLevel(0.5));
        assert_eq!(recv(&mut rx), AudioEvent::InputVolume(0.25));

        dispatcher.shutdown();
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (tx, _rx) = bounded::<TapMessage>(1);
        let handoff = Handoff {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        assert!(handoff.offer(TapMessage::OutputVolume(0.1)));
        assert!(!handoff.offer(TapMessage::OutputVolume(0.2)));
        assert_eq!(handoff.dropped(), 1);
    }

    #[test]
    fn test_control_events_survive_flooded_queue() {
        let (events, _) = broadcast::channel(1 << 16);
        let mut dispatcher = EventDispatcher::spawn(2, events).unwrap();
        let mut rx = dispatcher.subscribe();

        let flooding = Arc::new(AtomicBool::new(true));
        let flood_handoff = dispatcher.handoff();
        let flood_flag = flooding.clone();
        let flooder = thread::spawn(move || {
            let mut sent = 0;
            while flood_flag.load(Ordering::Relaxed) && sent < 20_000 {
                flood_handoff.offer(TapMessage::OutputVolume(0.5));
                sent += 1;
            }
        });

        let control = dispatcher.handoff();
        for _ in 0..100 {
            assert!(control.deliver(TapMessage::Interruption(InterruptionKind::Began)));
        }
        flooding.store(false, Ordering::Relaxed);
        flooder.join().unwrap();
        dispatcher.shutdown();

        let mut began = 0;
        while let Ok(event) = rx.try_recv() {
            if event == AudioEvent::AudioInterruption(InterruptionKind::Began) {
                began += 1;
            }
        }
        assert_eq!(began, 100);
    }

    #[test]
    fn test_deliver_gives_up_when_nobody_drains() {
        let (tx, _rx) = bounded::<TapMessage>(1);
        let handoff = Handoff {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        assert!(handoff.deliver(TapMessage::InputVolume(0.0)));
        assert!(!handoff.deliver(TapMessage::InputVolume(0.0)));
        assert_eq!(handoff.dropped(), 1);
    }
}
