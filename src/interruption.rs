//! System interruption handling
//!
//! ```text
//!            Began: stop() + clear_queue() + emit "began"
//!   ┌──────┐ ─────────────────────────────────────────► ┌─────────────┐
//!   │ Idle │                                            │ Interrupted │
//!   └──────┘ ◄───────────────────────────────────────── └─────────────┘
//!            Ended: emit "ended" (never resumes audio)
//! ```
//!
//! Unknown interruption subtypes emit "unknown" without a state change.
//! Route/configuration changes and media services resets go straight to the
//! pipeline regardless of state.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::dispatch::{Handoff, TapMessage};
use crate::audio::events::InterruptionKind;
use crate::audio::pipeline::AudioPipeline;
use crate::platform::{InterruptionPhase, SessionNotification};

/// Interruption state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionState {
    Idle,
    Interrupted,
}

/// Reacts to session notifications on behalf of the pipeline
pub struct InterruptionController {
    pipeline: Arc<AudioPipeline>,
    handoff: Handoff,
    state: Mutex<InterruptionState>,
}

impl InterruptionController {
    pub fn new(pipeline: Arc<AudioPipeline>, handoff: Handoff) -> Self {
        Self {
            pipeline,
            handoff,
            state: Mutex::new(InterruptionState::Idle),
        }
    }

    pub fn state(&self) -> InterruptionState {
        *self.state.lock()
    }

    /// Entry point registered with the notification hub
    pub fn handle(&self, notification: &SessionNotification) {
        match notification {
            SessionNotification::Interruption(phase) => self.handle_interruption(*phase),
            SessionNotification::RouteChange | SessionNotification::ConfigurationChange => {
                self.pipeline.handle_engine_configuration_change();
            }
            SessionNotification::MediaServicesReset => {
                self.pipeline.handle_media_services_reset();
            }
        }
    }

    fn handle_interruption(&self, phase: InterruptionPhase) {
        let mut state = self.state.lock();
        match phase {
            InterruptionPhase::Began => {
                tracing::info!("Audio interruption began");
                *state = InterruptionState::Interrupted;
                // Stop first so no new frames race the queue clear
                self.pipeline.stop();
                self.pipeline.clear_queue();
                self.emit(InterruptionKind::Began);
            }
            InterruptionPhase::Ended => {
                tracing::info!("Audio interruption ended; waiting for user to resume");
                *state = InterruptionState::Idle;
                self.emit(InterruptionKind::Ended);
            }
            InterruptionPhase::Other(raw) => {
                tracing::warn!("Unknown audio interruption type {}", raw);
                self.emit(InterruptionKind::Unknown);
            }
        }
    }

    fn emit(&self, kind: InterruptionKind) {
        if !self.handoff.deliver(TapMessage::Interruption(kind)) {
            tracing::warn!("Interruption event '{}' dropped", kind.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::dispatch::EventDispatcher;
    use crate::audio::events::AudioEvent;
    use crate::audio::session::DuplexSession;
    use crate::audio::AudioFormat;
    use crate::config::EngineConfig;
    use crate::platform::VirtualDevice;
    use std::thread;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn controller() -> (VirtualDevice, InterruptionController, EventDispatcher) {
        let device = VirtualDevice::new();
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
        let (events, _) = broadcast::channel(64);
        let dispatcher = EventDispatcher::spawn(32, events).unwrap();
        let pipeline = Arc::new(AudioPipeline::new(
            backend.graph,
            session,
            input,
            output,
            &config,
            dispatcher.handoff(),
        ));
        let controller = InterruptionController::new(pipeline, dispatcher.handoff());
        (device, controller, dispatcher)
    }

    fn interruptions(rx: &mut broadcast::Receiver<AudioEvent>) -> Vec<InterruptionKind> {
        thread::sleep(Duration::from_millis(50));
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AudioEvent::AudioInterruption(kind) = event {
                kinds.push(kind);
            }
        }
        kinds
    }

    #[test]
    fn test_began_then_ended_never_resumes() {
        let (device, controller, dispatcher) = controller();
        let mut rx = dispatcher.subscribe();
        controller.pipeline.toggle_recording(true);
        controller.pipeline.play_pcm_data(&[0u8; 1000]);
        assert!(device.is_playing());

        controller.handle(&SessionNotification::Interruption(InterruptionPhase::Began));
        assert_eq!(controller.state(), InterruptionState::Interrupted);

        controller.handle(&SessionNotification::Interruption(InterruptionPhase::Ended));
        assert_eq!(controller.state(), InterruptionState::Idle);

        assert!(!controller.pipeline.is_recording());
        assert!(!device.is_playing());
        assert!(device.queued_frames().is_empty());
        assert_eq!(
            interruptions(&mut rx),
            vec![InterruptionKind::Began, InterruptionKind::Ended]
        );
    }

    #[test]
    fn test_unknown_keeps_state() {
        let (_device, controller, dispatcher) = controller();
        let mut rx = dispatcher.subscribe();

        controller.handle(&SessionNotification::Interruption(InterruptionPhase::Other(7)));
        assert_eq!(controller.state(), InterruptionState::Idle);
        assert_eq!(interruptions(&mut rx), vec![InterruptionKind::Unknown]);
    }

    #[test]
    fn test_configuration_change_restarts_stopped_graph() {
        let (device, controller, _dispatcher) = controller();
        device.halt();

        controller.handle(&SessionNotification::ConfigurationChange);
        assert!(device.is_running());

        device.halt();
        controller.handle(&SessionNotification::RouteChange);
        assert!(device.is_running());
    }

    #[test]
    fn test_reset_handled_while_interrupted() {
        let (device, controller, _dispatcher) = controller();
        controller.handle(&SessionNotification::Interruption(InterruptionPhase::Began));
        controller.handle(&SessionNotification::MediaServicesReset);

        assert_eq!(device.reset_count(), 1);
        assert_eq!(controller.state(), InterruptionState::Interrupted);
    }
}
