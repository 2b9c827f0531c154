//! Inbound control surface
//!
//! [`VoiceEngine`] is what the bridge/UI layer talks to. Until `initialize`
//! succeeds (and after `tear_down`) every call is an explicit no-op.
//! [`AppLifecycle`] forwards host background/foreground transitions through a
//! weak handle, so it never keeps the engine alive.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

use crate::audio::dispatch::EventDispatcher;
use crate::audio::events::AudioEvent;
use crate::audio::format::AudioFormat;
use crate::audio::pipeline::AudioPipeline;
use crate::audio::session::{DuplexSession, SessionReport};
use crate::config::EngineConfig;
use crate::error::AudioError;
use crate::interruption::{InterruptionController, InterruptionState};
use crate::platform::{PlatformBackend, Subscription};

/// Everything built by `initialize` and released by `tear_down`
struct EngineCore {
    session: Arc<DuplexSession>,
    pipeline: Arc<AudioPipeline>,
    interruption: Arc<InterruptionController>,
    subscription: Option<Subscription>,
    dispatcher: EventDispatcher,
}

impl Drop for EngineCore {
    fn drop(&mut self) {
        // Stop notifications first so nothing drives a half-torn-down pipeline
        self.subscription.take();
        self.pipeline.shutdown();
        self.dispatcher.shutdown();
    }
}

/// Duplex voice audio engine
pub struct VoiceEngine {
    config: EngineConfig,
    events: broadcast::Sender<AudioEvent>,
    core: Mutex<Option<EngineCore>>,
}

impl VoiceEngine {
    pub fn new(config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            config,
            events,
            core: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to outward events; valid across initialize/tear_down cycles
    pub fn subscribe(&self) -> broadcast::Receiver<AudioEvent> {
        self.events.subscribe()
    }

    /// Configure the session, build the pipeline and start audio.
    ///
    /// Only invalid formats are returned as errors; every other failure is
    /// logged and the engine comes up degraded.
    pub fn initialize(&self, backend: PlatformBackend) -> Result<(), AudioError> {
        let mut core = self.core.lock();
        if core.is_some() {
            tracing::warn!("Voice engine already initialized");
            return Ok(());
        }

        let input = AudioFormat::mono(self.config.input_sample_rate).map_err(|e| {
            tracing::error!("Cannot create input format: {}", e);
            e
        })?;
        let output = AudioFormat::mono(self.config.output_sample_rate).map_err(|e| {
            tracing::error!("Cannot create output format: {}", e);
            e
        })?;

        let dispatcher =
            EventDispatcher::spawn(self.config.handoff_queue_capacity, self.events.clone())
                .map_err(|e| AudioError::Backend(format!("event dispatcher: {}", e)))?;

        let PlatformBackend {
            session,
            graph,
            notifications,
        } = backend;

        let session = Arc::new(DuplexSession::configure(
            session,
            &input,
            &output,
            self.config.io_buffer_duration(),
        ));
        let pipeline = Arc::new(AudioPipeline::new(
            graph,
            session.clone(),
            input,
            output,
            &self.config,
            dispatcher.handoff(),
        ));
        let interruption = Arc::new(InterruptionController::new(
            pipeline.clone(),
            dispatcher.handoff(),
        ));

        let handler = interruption.clone();
        let subscription = notifications.subscribe(move |notification| handler.handle(notification));

        *core = Some(EngineCore {
            session,
            pipeline,
            interruption,
            subscription: Some(subscription),
            dispatcher,
        });
        tracing::info!(
            "Voice engine initialized: input {} Hz, output {} Hz",
            input.sample_rate_hz(),
            output.sample_rate_hz()
        );
        Ok(())
    }

    fn with_pipeline<R>(&self, op: &str, f: impl FnOnce(&AudioPipeline) -> R) -> Option<R> {
        let core = self.core.lock();
        match core.as_ref() {
            Some(core) => Some(f(&core.pipeline)),
            None => {
                tracing::debug!("{} ignored: voice engine not initialized", op);
                None
            }
        }
    }

    /// Queue int16 little-endian PCM at the output rate
    pub fn play_pcm_data(&self, bytes: &[u8]) {
        self.with_pipeline("play_pcm_data", |p| p.play_pcm_data(bytes));
    }

    /// Returns the resulting recording state (false when not initialized)
    pub fn toggle_recording(&self, enabled: bool) -> bool {
        self.with_pipeline("toggle_recording", |p| p.toggle_recording(enabled))
            .unwrap_or(false)
    }

    pub fn pause(&self) {
        self.with_pipeline("pause", |p| p.stop());
    }

    /// Only ever called on explicit user action
    pub fn resume(&self) {
        self.with_pipeline("resume", |p| p.resume());
    }

    pub fn clear_audio_queue(&self) {
        self.with_pipeline("clear_audio_queue", |p| p.clear_queue());
    }

    /// Release taps, observers, session and dispatcher
    pub fn tear_down(&self) {
        let core = self.core.lock().take();
        match core {
            Some(core) => {
                drop(core);
                tracing::info!("Voice engine torn down");
            }
            None => tracing::debug!("tear_down ignored: voice engine not initialized"),
        }
    }

    /// Host app moved to background: pause (and optionally drop queued audio)
    pub fn handle_background(&self) {
        let clear = self.config.clear_queue_on_background;
        self.with_pipeline("background", |p| {
            p.stop();
            if clear {
                p.clear_queue();
            }
        });
    }

    /// Host app returned to foreground. Audio stays paused until the user resumes.
    pub fn handle_foreground(&self) {
        tracing::debug!("Foreground transition, audio left paused");
    }

    pub fn is_initialized(&self) -> bool {
        self.core.lock().is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.with_pipeline("is_recording", |p| p.is_recording())
            .unwrap_or(false)
    }

    pub fn is_playing(&self) -> bool {
        self.with_pipeline("is_playing", |p| p.is_playing())
            .unwrap_or(false)
    }

    pub fn input_level(&self) -> f32 {
        self.with_pipeline("input_level", |p| p.input_level())
            .unwrap_or(0.0)
    }

    pub fn output_level(&self) -> f32 {
        self.with_pipeline("output_level", |p| p.output_level())
            .unwrap_or(0.0)
    }

    pub fn dropped_tap_messages(&self) -> u64 {
        self.with_pipeline("dropped_tap_messages", |p| p.dropped_tap_messages())
            .unwrap_or(0)
    }

    pub fn interruption_state(&self) -> Option<InterruptionState> {
        self.core.lock().as_ref().map(|core| core.interruption.state())
    }

    pub fn session_report(&self) -> Option<SessionReport> {
        self.core.lock().as_ref().map(|core| core.session.report())
    }
}

impl Drop for VoiceEngine {
    fn drop(&mut self) {
        self.tear_down();
    }
}

/// Host application lifecycle listener
///
/// Holds a weak handle: if the engine is gone, both hooks do nothing.
#[derive(Clone)]
pub struct AppLifecycle {
    engine: Weak<VoiceEngine>,
}

impl AppLifecycle {
    pub fn new(engine: &Arc<VoiceEngine>) -> Self {
        Self {
            engine: Arc::downgrade(engine),
        }
    }

    pub fn on_background(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.handle_background();
        }
    }

    pub fn on_foreground(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.handle_foreground();
        }
    }
}
