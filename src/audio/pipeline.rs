//! Duplex signal path
//!
//! ```text
//!  mic ──► input tap (16 kHz, ~32 ms) ──► gate(recording, discard) ──► int16 + levels ──► handoff
//!  play_pcm_data ──► int16→f32 ──► PlaybackBuffer ──► player node ──► mixer
//!  mixer ──► output tap (24 kHz, ~32 ms) ──► output level ──► handoff
//! ```
//!
//! Tap bodies only touch atomics, the level meters and the handoff queue.
//! Everything that needs the graph lock runs on the control thread.

use parking_lot::Mutex;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::convert;
use crate::audio::dispatch::{Handoff, MicFrame, TapMessage};
use crate::audio::format::{AudioFormat, PlaybackBuffer};
use crate::audio::level_meter::LevelMeter;
use crate::audio::session::DuplexSession;
use crate::config::EngineConfig;
use crate::constants::MAX_TAP_FRAMES;
use crate::platform::AudioGraph;

/// One-shot microphone suppression armed by the first playback chunk
///
/// Gives the echo canceller time to adapt to the far-end signal before any
/// microphone audio is forwarded. Fires at most once per engine lifetime.
pub struct DiscardWindow {
    duration_us: u64,
    epoch: Instant,
    has_fired: AtomicBool,
    /// Microseconds since `epoch` when the window closes; 0 = inactive
    deadline_us: AtomicU64,
}

impl DiscardWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration_us: duration.as_micros() as u64,
            epoch: Instant::now(),
            has_fired: AtomicBool::new(false),
            deadline_us: AtomicU64::new(0),
        }
    }

    fn now_us(&self) -> u64 {
        // +1 keeps a window armed at the epoch distinguishable from "inactive"
        self.epoch.elapsed().as_micros() as u64 + 1
    }

    /// Arm the window unless it has fired before. Returns true if armed now.
    pub fn arm_once(&self) -> bool {
        self.arm_once_at(self.now_us())
    }

    pub(crate) fn arm_once_at(&self, now_us: u64) -> bool {
        if self.has_fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.duration_us > 0 {
            self.deadline_us
                .store(now_us.saturating_add(self.duration_us), Ordering::Release);
        }
        true
    }

    /// Whether microphone frames must currently be discarded
    #[inline]
    pub fn is_active(&self) -> bool {
        self.is_active_at(self.now_us())
    }

    pub(crate) fn is_active_at(&self, now_us: u64) -> bool {
        let deadline = self.deadline_us.load(Ordering::Acquire);
        if deadline == 0 {
            return false;
        }
        if now_us < deadline {
            return true;
        }
        // Lapsed: disarm for good
        let _ = self.deadline_us.compare_exchange(
            deadline,
            0,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        false
    }

    pub fn has_fired(&self) -> bool {
        self.has_fired.load(Ordering::Acquire)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.duration_us)
    }
}

/// State shared between the control thread and both taps
struct TapState {
    recording: AtomicBool,
    discard: DiscardWindow,
    input_meter: LevelMeter,
    output_meter: LevelMeter,
    handoff: Handoff,
}

impl TapState {
    /// Microphone tap body
    fn on_input(&self, samples: &[f32]) {
        if !self.recording.load(Ordering::SeqCst) || self.discard.is_active() {
            return;
        }

        for chunk in samples.chunks(MAX_TAP_FRAMES) {
            let mut frame = MicFrame::new();
            let written = convert::f32_to_i16_into(chunk, frame.samples_mut());
            let raw_level = convert::mean_abs(chunk);
            for &sample in chunk {
                self.input_meter.write(sample.clamp(-1.0, 1.0));
            }
            let volume = self.input_meter.current_level();

            // Pairs with the fence in `disable_recording`: either this tap sees
            // the flag cleared, or the control thread's reset lands after our writes
            fence(Ordering::SeqCst);
            if !self.recording.load(Ordering::SeqCst) {
                self.input_meter.reset();
                return;
            }

            frame.finish(written, raw_level, volume);
            self.handoff.offer(TapMessage::Microphone(frame));
        }
    }

    /// Clear the recording flag, then zero the input meter
    fn disable_recording(&self) {
        self.recording.store(false, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        self.input_meter.reset();
    }

    /// Mixed-output tap body (never gated)
    fn on_output(&self, samples: &[f32]) {
        for &sample in samples {
            self.output_meter.write(sample.clamp(-1.0, 1.0));
        }
        self.handoff
            .offer(TapMessage::OutputVolume(self.output_meter.current_level()));
    }
}

/// Owner of the duplex signal path
pub struct AudioPipeline {
    graph: Mutex<Box<dyn AudioGraph>>,
    session: Arc<DuplexSession>,
    taps: Arc<TapState>,
    input_format: AudioFormat,
    output_format: AudioFormat,
    io_buffer_duration: Duration,
}

impl AudioPipeline {
    /// Wire voice processing and taps, then start the graph.
    /// A graph that fails to start is logged and retried on the next
    /// configuration change.
    pub fn new(
        graph: Box<dyn AudioGraph>,
        session: Arc<DuplexSession>,
        input_format: AudioFormat,
        output_format: AudioFormat,
        config: &EngineConfig,
        handoff: Handoff,
    ) -> Self {
        let taps = Arc::new(TapState {
            recording: AtomicBool::new(false),
            discard: DiscardWindow::new(config.discard_window()),
            input_meter: LevelMeter::with_capacity(config.level_buffer_capacity),
            output_meter: LevelMeter::with_capacity(config.level_buffer_capacity),
            handoff,
        });

        let pipeline = Self {
            graph: Mutex::new(graph),
            session,
            taps,
            input_format,
            output_format,
            io_buffer_duration: config.io_buffer_duration(),
        };

        {
            let mut graph = pipeline.graph.lock();
            pipeline.wire(graph.as_mut());
        }
        pipeline.start();
        pipeline
    }

    fn wire(&self, graph: &mut dyn AudioGraph) {
        enable_voice_processing(graph);
        self.install_taps_on(graph);
    }

    /// Install the microphone and mixed-output taps
    pub fn install_taps(&self) -> bool {
        let mut graph = self.graph.lock();
        graph.remove_taps();
        self.install_taps_on(graph.as_mut())
    }

    fn install_taps_on(&self, graph: &mut dyn AudioGraph) -> bool {
        let input_frames = self.input_format.frames_for(self.io_buffer_duration);
        let output_frames = self.output_format.frames_for(self.io_buffer_duration);

        let input_state = self.taps.clone();
        let input = graph.install_input_tap(
            input_frames,
            self.input_format,
            Box::new(move |samples: &[f32]| input_state.on_input(samples)),
        );
        if let Err(e) = &input {
            tracing::error!("Failed to install input tap: {}", e);
        }

        let output_state = self.taps.clone();
        let output = graph.install_output_tap(
            output_frames,
            self.output_format,
            Box::new(move |samples: &[f32]| output_state.on_output(samples)),
        );
        if let Err(e) = &output {
            tracing::error!("Failed to install output tap: {}", e);
        }

        tracing::debug!(
            "Taps installed: input {} frames @ {} Hz, output {} frames @ {} Hz",
            input_frames,
            self.input_format.sample_rate_hz(),
            output_frames,
            self.output_format.sample_rate_hz()
        );
        input.is_ok() && output.is_ok()
    }

    /// Start the processing graph; failure is reported, not raised
    pub fn start(&self) -> bool {
        match self.graph.lock().start() {
            Ok(()) => {
                tracing::info!("Audio graph started");
                true
            }
            Err(e) => {
                tracing::error!("{}; will retry on next configuration change", e);
                false
            }
        }
    }

    /// Queue little-endian int16 PCM at the output rate for playback
    pub fn play_pcm_data(&self, bytes: &[u8]) {
        if self.taps.discard.arm_once() {
            tracing::info!(
                "First playback chunk, discarding microphone input for {:?}",
                self.taps.discard.duration()
            );
        }

        let buffer = match convert::le_bytes_to_f32(bytes)
            .and_then(|samples| PlaybackBuffer::new(samples, self.output_format))
        {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!("Dropping playback chunk of {} bytes: {}", bytes.len(), e);
                return;
            }
        };

        let frames = buffer.frame_length();
        let mut graph = self.graph.lock();
        if let Err(e) = graph.schedule(buffer) {
            tracing::warn!("Failed to schedule playback buffer: {}", e);
            return;
        }
        if !graph.is_playing() {
            graph.play();
        }
        tracing::trace!("Scheduled {} playback frames", frames);
    }

    /// Enable or disable microphone forwarding; returns the resulting state
    pub fn toggle_recording(&self, enabled: bool) -> bool {
        if enabled {
            self.taps.recording.store(true, Ordering::SeqCst);
        } else {
            self.taps.disable_recording();
        }
        self.graph.lock().set_input_muted(!enabled);

        if !enabled {
            self.taps.handoff.deliver(TapMessage::InputVolume(0.0));
        }
        tracing::info!("Recording {}", if enabled { "enabled" } else { "disabled" });
        enabled
    }

    /// Pause: deactivate the session, stop recording and playback
    pub fn stop(&self) {
        self.session.deactivate();
        self.toggle_recording(false);
        self.graph.lock().stop_player();

        self.taps.output_meter.reset();
        self.taps
            .handoff
            .deliver(TapMessage::OutputVolume(self.taps.output_meter.current_level()));
        tracing::info!("Audio pipeline paused");
    }

    /// Resume after an explicit user request
    pub fn resume(&self) {
        self.session.activate();
        let running = self.graph.lock().is_running();
        if !running {
            self.start();
        }
        self.toggle_recording(true);
        self.graph.lock().play();
        tracing::info!("Audio pipeline resumed");
    }

    /// Drop queued playback and zero the output meter
    pub fn clear_queue(&self) {
        self.graph.lock().stop_player();
        self.taps.output_meter.reset();
        tracing::debug!("Playback queue cleared");
    }

    /// Restart a graph that stopped under a route/hardware change
    pub fn handle_engine_configuration_change(&self) {
        let running = self.graph.lock().is_running();
        if running {
            tracing::debug!("Configuration change, graph still running");
        } else {
            tracing::warn!("Audio graph stopped after configuration change, restarting");
            self.start();
        }
    }

    /// Rebuild graph wiring after the audio subsystem was reset
    pub fn handle_media_services_reset(&self) {
        tracing::warn!("Media services reset, rebuilding audio graph");
        {
            let mut graph = self.graph.lock();
            graph.remove_taps();
            graph.stop();
            graph.reset();
            enable_voice_processing(graph.as_mut());
        }
        self.install_taps();
        self.start();
    }

    /// Release taps, player and session (teardown)
    pub fn shutdown(&self) {
        self.taps.disable_recording();
        {
            let mut graph = self.graph.lock();
            graph.remove_taps();
            graph.stop_player();
            graph.stop();
        }
        self.session.deactivate();
        tracing::info!("Audio pipeline shut down");
    }

    pub fn is_recording(&self) -> bool {
        self.taps.recording.load(Ordering::Acquire)
    }

    pub fn is_discarding(&self) -> bool {
        self.taps.discard.is_active()
    }

    pub fn input_level(&self) -> f32 {
        self.taps.input_meter.current_level()
    }

    pub fn output_level(&self) -> f32 {
        self.taps.output_meter.current_level()
    }

    pub fn is_running(&self) -> bool {
        self.graph.lock().is_running()
    }

    pub fn is_playing(&self) -> bool {
        self.graph.lock().is_playing()
    }

    pub fn input_format(&self) -> &AudioFormat {
        &self.input_format
    }

    pub fn output_format(&self) -> &AudioFormat {
        &self.output_format
    }

    pub fn dropped_tap_messages(&self) -> u64 {
        self.taps.handoff.dropped()
    }
}

fn enable_voice_processing(graph: &mut dyn AudioGraph) {
    if let Err(e) = graph.set_voice_processing_enabled(true) {
        tracing::warn!("Voice processing unavailable, echo cancellation disabled: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::dispatch::EventDispatcher;
    use crate::audio::events::AudioEvent;
    use crate::platform::VirtualDevice;
    use std::thread;
    use tokio::sync::broadcast;

    struct Fixture {
        device: VirtualDevice,
        pipeline: AudioPipeline,
        dispatcher: EventDispatcher,
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let device = VirtualDevice::new();
        let backend = device.backend();
        let input = AudioFormat::mono(config.input_sample_rate).unwrap();
        let output = AudioFormat::mono(config.output_sample_rate).unwrap();
        let session = Arc::new(DuplexSession::configure(
            backend.session,
            &input,
            &output,
            config.io_buffer_duration(),
        ));
        let (events, _) = broadcast::channel(256);
        let dispatcher = EventDispatcher::spawn(64, events).unwrap();
        let pipeline = AudioPipeline::new(
            backend.graph,
            session,
            input,
            output,
            &config,
            dispatcher.handoff(),
        );
        Fixture {
            device,
            pipeline,
            dispatcher,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<AudioEvent>) -> Vec<AudioEvent> {
        thread::sleep(Duration::from_millis(50));
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_discard_window_fires_once() {
        let window = DiscardWindow::new(Duration::from_millis(2000));
        assert!(!window.is_active_at(10));

        assert!(window.arm_once_at(1_000));
        assert!(window.is_active_at(1_000));
        assert!(window.is_active_at(1_000 + 1_999_999));
        assert!(!window.is_active_at(1_000 + 2_000_000));
        assert!(!window.is_active_at(1_000 + 100));

        // Never re-arms
        assert!(!window.arm_once_at(5_000_000));
        assert!(!window.is_active_at(5_000_001));
        assert!(window.has_fired());
    }

    #[test]
    fn test_wiring_on_construction() {
        let f = fixture(EngineConfig::default());
        assert!(f.device.voice_processing_enabled());
        assert_eq!(f.device.input_tap_frames(), Some(512));
        assert_eq!(f.device.output_tap_frames(), Some(768));
        assert!(f.device.is_running());
        assert!(!f.pipeline.is_recording());
    }

    #[test]
    fn test_graph_start_failure_is_not_fatal() {
        let device = VirtualDevice::new();
        device.set_fail_start(true);
        let backend = device.backend();
        let config = EngineConfig::default();
        let input = AudioFormat::mono(16_000.0).unwrap();
        let output = AudioFormat::mono(24_000.0).unwrap();
        let session = Arc::new(DuplexSession::configure(
            backend.session,
            &input,
            &output,
            config.io_buffer_duration(),
        ));
        let (events, _) = broadcast::channel(16);
        let dispatcher = EventDispatcher::spawn(8, events).unwrap();
        let pipeline =
            AudioPipeline::new(backend.graph, session, input, output, &config, dispatcher.handoff());
        assert!(!pipeline.is_running());

        device.set_fail_start(false);
        pipeline.handle_engine_configuration_change();
        assert!(pipeline.is_running());
    }

    #[test]
    fn test_microphone_gated_by_recording() {
        let f = fixture(EngineConfig::default());
        let mut rx = f.dispatcher.subscribe();

        f.device.feed_input(&[0.5; 512]);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(f.pipeline.input_level(), 0.0);

        f.pipeline.toggle_recording(true);
        f.device.feed_input(&[0.5; 512]);
        let events = drain(&mut rx);
        assert!(matches!(events[0], AudioEvent::MicrophoneData(ref b) if b.len() == 1024));
        assert!(f.pipeline.input_level() > 0.0);
    }

    #[test]
    fn test_large_tap_buffer_is_split() {
        let f = fixture(EngineConfig::default());
        let mut rx = f.dispatcher.subscribe();
        f.pipeline.toggle_recording(true);

        f.device.feed_input(&vec![0.1; MAX_TAP_FRAMES + 100]);
        let sizes: Vec<usize> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                AudioEvent::MicrophoneData(bytes) => Some(bytes.len() / 2),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![MAX_TAP_FRAMES, 100]);
    }

    #[test]
    fn test_toggle_off_zeroes_input_level() {
        let f = fixture(EngineConfig::default());
        f.pipeline.toggle_recording(true);
        f.device.feed_input(&[0.8; 512]);
        assert!(f.pipeline.input_level() > 0.0);

        assert!(!f.pipeline.toggle_recording(false));
        assert_eq!(f.pipeline.input_level(), 0.0);
        assert!(f.device.is_input_muted());

        assert!(f.pipeline.toggle_recording(true));
        assert!(!f.device.is_input_muted());
        assert_eq!(f.pipeline.input_level(), 0.0);
    }

    #[test]
    fn test_output_metering_never_gated() {
        let f = fixture(EngineConfig::default());
        let mut rx = f.dispatcher.subscribe();

        f.pipeline.play_pcm_data(&[0xFFu8, 0x3F].repeat(768));
        f.device.render_output(768);

        assert!(f.pipeline.output_level() > 0.0);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, AudioEvent::OutputVolume(v) if *v > 0.0)));
    }

    #[test]
    fn test_malformed_playback_dropped() {
        let f = fixture(EngineConfig::default());
        f.pipeline.play_pcm_data(&[1, 2, 3]);
        f.pipeline.play_pcm_data(&[]);
        assert_eq!(f.device.scheduled_total(), 0);
        assert!(!f.pipeline.is_playing());
    }

    #[test]
    fn test_stop_then_resume() {
        let f = fixture(EngineConfig::default());
        f.pipeline.toggle_recording(true);
        f.pipeline.play_pcm_data(&[0u8; 200]);
        f.device.render_output(10);

        f.pipeline.stop();
        assert!(!f.pipeline.is_recording());
        assert!(!f.pipeline.is_playing());
        assert!(!f.device.is_session_active());
        assert!(f.device.queued_frames().is_empty());
        assert_eq!(f.pipeline.output_level(), 0.0);

        f.device.halt();
        f.pipeline.resume();
        assert!(f.pipeline.is_recording());
        assert!(f.pipeline.is_running());
        assert!(f.pipeline.is_playing());
        assert!(f.device.is_session_active());
    }

    #[test]
    fn test_media_services_reset_rewires() {
        let f = fixture(EngineConfig::default());
        f.pipeline.handle_media_services_reset();
        assert_eq!(f.device.reset_count(), 1);
        assert_eq!(f.device.start_count(), 2);
        assert!(f.device.has_taps());
        assert!(f.device.is_running());
    }

    #[test]
    fn test_shutdown_releases_taps() {
        let f = fixture(EngineConfig::default());
        f.pipeline.shutdown();
        assert!(!f.device.has_taps());
        assert!(!f.device.is_running());
        assert!(!f.device.is_session_active());
    }

    #[test]
    fn test_toggle_off_during_tap_leaves_zero_level() {
        let f = fixture(EngineConfig::default());
        for _ in 0..50 {
            f.pipeline.toggle_recording(true);
            let device = f.device.clone();
            let feeder = thread::spawn(move || {
                device.feed_input(&vec![0.9; 100_000]);
            });
            thread::yield_now();
            f.pipeline.toggle_recording(false);
            feeder.join().unwrap();
            assert_eq!(f.pipeline.input_level(), 0.0);
        }
    }

    #[test]
    fn test_no_microphone_frames_after_toggle_off() {
        let f = fixture(EngineConfig::default());
        let mut rx = f.dispatcher.subscribe();
        f.pipeline.toggle_recording(true);
        f.pipeline.toggle_recording(false);

        f.device.feed_input(&vec![0.9; 4 * MAX_TAP_FRAMES]);
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AudioEvent::MicrophoneData(_))));
    }

    #[test]
    fn test_install_taps_replaces_existing() {
        let f = fixture(EngineConfig::default());
        let mut rx = f.dispatcher.subscribe();

        assert!(f.pipeline.install_taps());
        assert_eq!(f.device.input_tap_frames(), Some(512));
        assert_eq!(f.device.output_tap_frames(), Some(768));

        f.pipeline.toggle_recording(true);
        f.device.feed_input(&[0.5; 512]);
        let mic_frames = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, AudioEvent::MicrophoneData(_)))
            .count();
        assert_eq!(mic_frames, 1);
    }
}
