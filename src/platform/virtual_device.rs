//! In-process audio backend for testing without hardware
//!
//! A [`VirtualDevice`] plays the role of the OS: it hands out a
//! [`PlatformBackend`] whose session and graph record every call, and lets the
//! host drive the real-time side by hand (deliver microphone buffers, render
//! output, post interruptions). Failures of individual steps can be injected to
//! exercise the degrade-don't-crash paths.
//!
//! ```
//! use voice_duplex::platform::VirtualDevice;
//!
//! let device = VirtualDevice::new();
//! let backend = device.backend();
//! // engine.initialize(backend) ... then:
//! device.feed_input(&[0.5; 512]);
//! ```

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{AudioFormat, PlaybackBuffer};
use crate::error::AudioError;
use crate::platform::{
    AudioGraph, NotificationHub, PlatformBackend, SessionCategory, SessionControl,
    SessionNotification, TapBlock,
};

/// Session steps that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStep {
    Category,
    SampleRate,
    IoBufferDuration,
    Activation,
}

#[derive(Default)]
struct DeviceState {
    // session
    category: Option<SessionCategory>,
    preferred_sample_rate: Option<f64>,
    preferred_io_duration: Option<Duration>,
    session_active: bool,
    activations: u32,
    failing_steps: HashSet<SessionStep>,

    // graph
    voice_processing: bool,
    fail_start: bool,
    running: bool,
    starts: u32,
    resets: u32,
    input_muted: bool,
    input_tap_frames: Option<u32>,
    output_tap_frames: Option<u32>,

    // player
    queue: VecDeque<PlaybackBuffer>,
    scheduled_total: usize,
    playing: bool,
}

#[derive(Default)]
struct Taps {
    input: Option<TapBlock>,
    output: Option<TapBlock>,
}

/// Shared handle to a simulated audio device
#[derive(Clone)]
pub struct VirtualDevice {
    state: Arc<Mutex<DeviceState>>,
    // Separate lock: taps run without holding the device state
    taps: Arc<Mutex<Taps>>,
    notifications: NotificationHub,
}

impl VirtualDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::default())),
            taps: Arc::new(Mutex::new(Taps::default())),
            notifications: NotificationHub::new(),
        }
    }

    /// Session + graph + notification hub bound to this device
    pub fn backend(&self) -> PlatformBackend {
        PlatformBackend::new(
            Box::new(VirtualSession {
                device: self.clone(),
            }),
            Box::new(VirtualGraph {
                device: self.clone(),
            }),
            self.notifications.clone(),
        )
    }

    pub fn notifications(&self) -> &NotificationHub {
        &self.notifications
    }

    /// Post a platform notification to every subscriber
    pub fn post(&self, notification: SessionNotification) {
        self.notifications.post(notification);
    }

    // ── failure injection ─────────────────────────────────────────────

    pub fn fail_session_step(&self, step: SessionStep) {
        self.state.lock().failing_steps.insert(step);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.lock().fail_start = fail;
    }

    /// Graph stops on its own (route change, hardware hiccup)
    pub fn halt(&self) {
        self.state.lock().running = false;
    }

    // ── real-time side ────────────────────────────────────────────────

    /// Deliver one hardware input buffer to the input tap.
    /// Returns false when nothing was delivered (graph stopped or no tap).
    pub fn feed_input(&self, samples: &[f32]) -> bool {
        let (running, muted) = {
            let state = self.state.lock();
            (state.running, state.input_muted)
        };
        if !running {
            return false;
        }

        let mut taps = self.taps.lock();
        match taps.input.as_mut() {
            Some(tap) => {
                if muted {
                    tap(&vec![0.0; samples.len()]);
                } else {
                    tap(samples);
                }
                true
            }
            None => false,
        }
    }

    /// Render `frames` of mixed output, consuming scheduled audio, and run
    /// the output tap over the result
    pub fn render_output(&self, frames: usize) -> Vec<f32> {
        let mut mixed = vec![0.0f32; frames];
        {
            let mut state = self.state.lock();
            if !state.running {
                return mixed;
            }
            if state.playing {
                let mut written = 0;
                while written < frames {
                    let Some(front) = state.queue.pop_front() else {
                        break;
                    };
                    let samples = front.samples();
                    let take = samples.len().min(frames - written);
                    mixed[written..written + take].copy_from_slice(&samples[..take]);
                    written += take;
                    if take < samples.len() {
                        if let Ok(rest) =
                            PlaybackBuffer::new(samples[take..].to_vec(), *front.format())
                        {
                            state.queue.push_front(rest);
                        }
                    }
                }
            }
        }

        if let Some(tap) = self.taps.lock().output.as_mut() {
            tap(&mixed);
        }
        mixed
    }

    // ── inspection ────────────────────────────────────────────────────

    pub fn category(&self) -> Option<SessionCategory> {
        self.state.lock().category
    }

    pub fn preferred_sample_rate(&self) -> Option<f64> {
        self.state.lock().preferred_sample_rate
    }

    pub fn preferred_io_duration(&self) -> Option<Duration> {
        self.state.lock().preferred_io_duration
    }

    pub fn is_session_active(&self) -> bool {
        self.state.lock().session_active
    }

    pub fn activation_count(&self) -> u32 {
        self.state.lock().activations
    }

    pub fn voice_processing_enabled(&self) -> bool {
        self.state.lock().voice_processing
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn start_count(&self) -> u32 {
        self.state.lock().starts
    }

    pub fn reset_count(&self) -> u32 {
        self.state.lock().resets
    }

    pub fn is_input_muted(&self) -> bool {
        self.state.lock().input_muted
    }

    pub fn input_tap_frames(&self) -> Option<u32> {
        self.state.lock().input_tap_frames
    }

    pub fn output_tap_frames(&self) -> Option<u32> {
        self.state.lock().output_tap_frames
    }

    pub fn has_taps(&self) -> bool {
        let taps = self.taps.lock();
        taps.input.is_some() || taps.output.is_some()
    }

    /// Frame lengths of buffers still waiting in the player queue
    pub fn queued_frames(&self) -> Vec<usize> {
        self.state
            .lock()
            .queue
            .iter()
            .map(PlaybackBuffer::frame_length)
            .collect()
    }

    /// Buffers scheduled since the device was created
    pub fn scheduled_total(&self) -> usize {
        self.state.lock().scheduled_total
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Session half of the virtual backend
pub struct VirtualSession {
    device: VirtualDevice,
}

impl VirtualSession {
    fn check(&self, step: SessionStep, name: &'static str) -> Result<(), AudioError> {
        if self.device.state.lock().failing_steps.contains(&step) {
            return Err(AudioError::session(name, "injected failure"));
        }
        Ok(())
    }
}

impl SessionControl for VirtualSession {
    fn set_category(&mut self, category: &SessionCategory) -> Result<(), AudioError> {
        self.check(SessionStep::Category, "category")?;
        self.device.state.lock().category = Some(*category);
        Ok(())
    }

    fn set_preferred_sample_rate(&mut self, rate_hz: f64) -> Result<(), AudioError> {
        self.check(SessionStep::SampleRate, "preferred sample rate")?;
        self.device.state.lock().preferred_sample_rate = Some(rate_hz);
        Ok(())
    }

    fn set_preferred_io_buffer_duration(&mut self, duration: Duration) -> Result<(), AudioError> {
        self.check(SessionStep::IoBufferDuration, "preferred IO buffer duration")?;
        self.device.state.lock().preferred_io_duration = Some(duration);
        Ok(())
    }

    fn set_active(&mut self, active: bool) -> Result<(), AudioError> {
        self.check(SessionStep::Activation, "activation")?;
        let mut state = self.device.state.lock();
        state.session_active = active;
        if active {
            state.activations += 1;
        }
        Ok(())
    }
}

/// Graph half of the virtual backend
pub struct VirtualGraph {
    device: VirtualDevice,
}

impl AudioGraph for VirtualGraph {
    fn set_voice_processing_enabled(&mut self, enabled: bool) -> Result<(), AudioError> {
        self.device.state.lock().voice_processing = enabled;
        Ok(())
    }

    fn install_input_tap(
        &mut self,
        buffer_frames: u32,
        _format: AudioFormat,
        tap: TapBlock,
    ) -> Result<(), AudioError> {
        self.device.state.lock().input_tap_frames = Some(buffer_frames);
        self.device.taps.lock().input = Some(tap);
        Ok(())
    }

    fn install_output_tap(
        &mut self,
        buffer_frames: u32,
        _format: AudioFormat,
        tap: TapBlock,
    ) -> Result<(), AudioError> {
        self.device.state.lock().output_tap_frames = Some(buffer_frames);
        self.device.taps.lock().output = Some(tap);
        Ok(())
    }

    fn remove_taps(&mut self) {
        {
            let mut state = self.device.state.lock();
            state.input_tap_frames = None;
            state.output_tap_frames = None;
        }
        let mut taps = self.device.taps.lock();
        taps.input = None;
        taps.output = None;
    }

    fn start(&mut self) -> Result<(), AudioError> {
        let mut state = self.device.state.lock();
        if state.fail_start {
            return Err(AudioError::GraphStart("injected failure".into()));
        }
        state.running = true;
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.device.state.lock();
        state.running = false;
        state.playing = false;
    }

    fn is_running(&self) -> bool {
        self.device.state.lock().running
    }

    fn reset(&mut self) {
        let mut state = self.device.state.lock();
        state.running = false;
        state.playing = false;
        state.queue.clear();
        state.resets += 1;
    }

    fn set_input_muted(&mut self, muted: bool) {
        self.device.state.lock().input_muted = muted;
    }

    fn schedule(&mut self, buffer: PlaybackBuffer) -> Result<(), AudioError> {
        let mut state = self.device.state.lock();
        state.queue.push_back(buffer);
        state.scheduled_total += 1;
        Ok(())
    }

    fn play(&mut self) {
        self.device.state.lock().playing = true;
    }

    fn stop_player(&mut self) {
        let mut state = self.device.state.lock();
        state.playing = false;
        state.queue.clear();
    }

    fn is_playing(&self) -> bool {
        self.device.state.lock().playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_session_records_preferences() {
        let device = VirtualDevice::new();
        let mut backend = device.backend();

        backend.session.set_preferred_sample_rate(24_000.0).unwrap();
        backend
            .session
            .set_preferred_io_buffer_duration(Duration::from_millis(32))
            .unwrap();
        backend.session.set_active(true).unwrap();

        assert_eq!(device.preferred_sample_rate(), Some(24_000.0));
        assert_eq!(device.preferred_io_duration(), Some(Duration::from_millis(32)));
        assert!(device.is_session_active());
    }

    #[test]
    fn test_injected_session_failure() {
        let device = VirtualDevice::new();
        device.fail_session_step(SessionStep::SampleRate);
        let mut backend = device.backend();

        assert!(backend.session.set_preferred_sample_rate(24_000.0).is_err());
        assert!(backend.session.set_active(true).is_ok());
    }

    #[test]
    fn test_input_only_delivered_when_running() {
        let device = VirtualDevice::new();
        let mut backend = device.backend();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let format = AudioFormat::mono(16_000.0).unwrap();

        backend
            .graph
            .install_input_tap(
                512,
                format,
                Box::new(move |_| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(!device.feed_input(&[0.1; 512]));
        backend.graph.start().unwrap();
        assert!(device.feed_input(&[0.1; 512]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_render_consumes_queue() {
        let device = VirtualDevice::new();
        let mut backend = device.backend();
        let format = AudioFormat::mono(24_000.0).unwrap();

        backend.graph.start().unwrap();
        backend
            .graph
            .schedule(PlaybackBuffer::new(vec![0.25; 1000], format).unwrap())
            .unwrap();
        backend.graph.play();

        let out = device.render_output(768);
        assert!(out.iter().all(|&s| s == 0.25));
        assert_eq!(device.queued_frames(), vec![232]);

        let out = device.render_output(768);
        assert_eq!(out[231], 0.25);
        assert_eq!(out[232], 0.0);
        assert!(device.queued_frames().is_empty());
    }
}
