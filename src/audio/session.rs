//! Duplex audio session configuration
//!
//! Puts the platform session into play-and-record / voice-chat mode and asks
//! for a hardware rate and IO buffer duration that suit both taps. Every step
//! may fail independently; failures are logged and the session carries on
//! with platform defaults.

use parking_lot::Mutex;
use std::time::Duration;

use crate::audio::AudioFormat;
use crate::error::AudioError;
use crate::platform::{SessionCategory, SessionControl};

/// Outcome of the configuration steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub category: bool,
    pub sample_rate: bool,
    pub io_buffer_duration: bool,
    pub activated: bool,
}

impl SessionReport {
    /// True when every step succeeded
    pub fn is_complete(&self) -> bool {
        self.category && self.sample_rate && self.io_buffer_duration && self.activated
    }
}

/// Owner of the platform audio session
pub struct DuplexSession {
    control: Mutex<Box<dyn SessionControl>>,
    preferred_sample_rate: f64,
    io_buffer_duration: Duration,
    report: SessionReport,
}

impl DuplexSession {
    /// Configure and activate the session for duplex voice
    pub fn configure(
        mut control: Box<dyn SessionControl>,
        input: &AudioFormat,
        output: &AudioFormat,
        io_buffer_duration: Duration,
    ) -> Self {
        let preferred_sample_rate = input.sample_rate_hz().max(output.sample_rate_hz());
        let mut report = SessionReport::default();

        report.category = log_step(control.set_category(&SessionCategory::voice_chat()));
        report.sample_rate = log_step(control.set_preferred_sample_rate(preferred_sample_rate));
        report.io_buffer_duration =
            log_step(control.set_preferred_io_buffer_duration(io_buffer_duration));
        report.activated = log_step(control.set_active(true));

        if report.is_complete() {
            tracing::info!(
                "Audio session configured: {} Hz preferred, {:?} IO buffer",
                preferred_sample_rate,
                io_buffer_duration
            );
        } else {
            tracing::warn!("Audio session partially configured: {:?}", report);
        }

        Self {
            control: Mutex::new(control),
            preferred_sample_rate,
            io_buffer_duration,
            report,
        }
    }

    /// Reactivate after a pause; returns false when the platform refused
    pub fn activate(&self) -> bool {
        log_step(self.control.lock().set_active(true))
    }

    pub fn deactivate(&self) -> bool {
        log_step(self.control.lock().set_active(false))
    }

    pub fn preferred_sample_rate(&self) -> f64 {
        self.preferred_sample_rate
    }

    pub fn io_buffer_duration(&self) -> Duration {
        self.io_buffer_duration
    }

    pub fn report(&self) -> SessionReport {
        self.report
    }
}

fn log_step(result: Result<(), AudioError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("{}; continuing with platform defaults", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::virtual_device::{SessionStep, VirtualDevice};

    fn formats() -> (AudioFormat, AudioFormat) {
        (
            AudioFormat::mono(16_000.0).unwrap(),
            AudioFormat::mono(24_000.0).unwrap(),
        )
    }

    #[test]
    fn test_configure_full() {
        let device = VirtualDevice::new();
        let (input, output) = formats();
        let session = DuplexSession::configure(
            device.backend().session,
            &input,
            &output,
            Duration::from_millis(32),
        );

        assert!(session.report().is_complete());
        assert_eq!(session.preferred_sample_rate(), 24_000.0);
        assert_eq!(device.preferred_sample_rate(), Some(24_000.0));
        assert_eq!(device.preferred_io_duration(), Some(Duration::from_millis(32)));
        assert_eq!(device.category(), Some(SessionCategory::voice_chat()));
        assert!(device.is_session_active());
    }

    #[test]
    fn test_step_failure_does_not_abort() {
        let device = VirtualDevice::new();
        device.fail_session_step(SessionStep::Category);
        device.fail_session_step(SessionStep::SampleRate);
        let (input, output) = formats();

        let session = DuplexSession::configure(
            device.backend().session,
            &input,
            &output,
            Duration::from_millis(32),
        );

        let report = session.report();
        assert!(!report.category);
        assert!(!report.sample_rate);
        assert!(report.io_buffer_duration);
        assert!(report.activated);
        assert!(device.is_session_active());
    }

    #[test]
    fn test_deactivate_and_reactivate() {
        let device = VirtualDevice::new();
        let (input, output) = formats();
        let session = DuplexSession::configure(
            device.backend().session,
            &input,
            &output,
            Duration::from_millis(32),
        );

        assert!(session.deactivate());
        assert!(!device.is_session_active());
        assert!(session.activate());
        assert!(device.is_session_active());
        assert_eq!(device.activation_count(), 2);
    }
}
