//! Desktop backend on cpal
//!
//! Desktop hosts have no audio session, so [`DesktopSession`] only records the
//! preferences it is given. [`CpalGraph`] runs an input stream at the input
//! rate and an output stream at the output rate on a dedicated thread (cpal
//! streams are not `Send`). The output callback plays queued buffers and then
//! hands the rendered block to the output tap, which makes it the "mixed
//! output" of this backend.
//!
//! There is no platform echo canceller here: enabling voice processing
//! reports [`AudioError::Unsupported`] and the pipeline degrades.
//! There are no route notifications either; a stream error marks the graph as
//! stopped and the host is expected to post `ConfigurationChange` periodically.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{AudioFormat, PlaybackBuffer};
use crate::constants::{INPUT_SAMPLE_RATE, MAX_TAP_FRAMES, OUTPUT_SAMPLE_RATE};
use crate::error::AudioError;
use crate::platform::{
    AudioGraph, NotificationHub, PlatformBackend, SessionCategory, SessionControl, TapBlock,
};

/// Buffers the player may hold before `schedule` starts refusing
const PLAYER_QUEUE_CAPACITY: usize = 256;

/// How long `start` waits for the stream thread to come up
const START_TIMEOUT: Duration = Duration::from_secs(3);

/// Session stand-in for hosts without an OS audio session
#[derive(Debug, Default)]
pub struct DesktopSession {
    preferred_sample_rate: Option<f64>,
    io_buffer_duration: Option<Duration>,
    active: bool,
}

impl SessionControl for DesktopSession {
    fn set_category(&mut self, category: &SessionCategory) -> Result<(), AudioError> {
        tracing::debug!("Desktop session: category {:?} (no-op)", category);
        Ok(())
    }

    fn set_preferred_sample_rate(&mut self, rate_hz: f64) -> Result<(), AudioError> {
        self.preferred_sample_rate = Some(rate_hz);
        Ok(())
    }

    fn set_preferred_io_buffer_duration(&mut self, duration: Duration) -> Result<(), AudioError> {
        self.io_buffer_duration = Some(duration);
        Ok(())
    }

    fn set_active(&mut self, active: bool) -> Result<(), AudioError> {
        self.active = active;
        Ok(())
    }
}

type TapSlot = Arc<Mutex<Option<TapBlock>>>;

/// Duplex graph over the default input and output devices
pub struct CpalGraph {
    input_config: StreamConfig,
    output_config: StreamConfig,
    input_tap: TapSlot,
    output_tap: TapSlot,
    running: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    flush: Arc<AtomicBool>,
    input_muted: Arc<AtomicBool>,
    queue: Arc<ArrayQueue<Vec<f32>>>,
    /// Buffers the output callback has finished with, freed here
    spent: Arc<ArrayQueue<Vec<f32>>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalGraph {
    pub fn new() -> Self {
        Self {
            input_config: stream_config(INPUT_SAMPLE_RATE, None),
            output_config: stream_config(OUTPUT_SAMPLE_RATE, None),
            input_tap: Arc::new(Mutex::new(None)),
            output_tap: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            playing: Arc::new(AtomicBool::new(false)),
            flush: Arc::new(AtomicBool::new(false)),
            input_muted: Arc::new(AtomicBool::new(false)),
            queue: Arc::new(ArrayQueue::new(PLAYER_QUEUE_CAPACITY)),
            spent: Arc::new(ArrayQueue::new(PLAYER_QUEUE_CAPACITY + 1)),
            thread_handle: None,
        }
    }

    fn drain_queue(&self) {
        while self.queue.pop().is_some() {}
        self.free_spent();
    }

    fn free_spent(&self) {
        while self.spent.pop().is_some() {}
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for CpalGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CpalGraph {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stream_config(sample_rate: u32, buffer_frames: Option<u32>) -> StreamConfig {
    StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate),
        buffer_size: match buffer_frames {
            Some(frames) => BufferSize::Fixed(frames),
            None => BufferSize::Default,
        },
    }
}

impl AudioGraph for CpalGraph {
    fn set_voice_processing_enabled(&mut self, enabled: bool) -> Result<(), AudioError> {
        if enabled {
            return Err(AudioError::Unsupported("voice processing"));
        }
        Ok(())
    }

    fn install_input_tap(
        &mut self,
        buffer_frames: u32,
        format: AudioFormat,
        tap: TapBlock,
    ) -> Result<(), AudioError> {
        self.input_config = stream_config(format.sample_rate_hz() as u32, Some(buffer_frames));
        *self.input_tap.lock() = Some(tap);
        Ok(())
    }

    fn install_output_tap(
        &mut self,
        buffer_frames: u32,
        format: AudioFormat,
        tap: TapBlock,
    ) -> Result<(), AudioError> {
        self.output_config = stream_config(format.sample_rate_hz() as u32, Some(buffer_frames));
        *self.output_tap.lock() = Some(tap);
        Ok(())
    }

    fn remove_taps(&mut self) {
        *self.input_tap.lock() = None;
        *self.output_tap.lock() = None;
    }

    fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        // A previous thread may still be winding down after a stream error
        self.join_thread();

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let shared = StreamShared {
            input_config: self.input_config.clone(),
            output_config: self.output_config.clone(),
            input_tap: self.input_tap.clone(),
            output_tap: self.output_tap.clone(),
            running: self.running.clone(),
            playing: self.playing.clone(),
            flush: self.flush.clone(),
            input_muted: self.input_muted.clone(),
            queue: self.queue.clone(),
            spent: self.spent.clone(),
            error_tx,
        };
        let running_for_loop = self.running.clone();

        self.running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("duplex-audio".into())
            .spawn(move || match build_streams(shared) {
                Ok((input, output)) => {
                    if let Err(e) = input.play().and_then(|_| output.play()) {
                        let _ = ready_tx.send(Err(AudioError::GraphStart(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    // Keep streams alive while running
                    while running_for_loop.load(Ordering::Relaxed) {
                        while let Ok(e) = error_rx.try_recv() {
                            tracing::error!("Audio stream error: {}", e);
                        }
                        thread::sleep(Duration::from_millis(10));
                    }
                    while let Ok(e) = error_rx.try_recv() {
                        tracing::error!("Audio stream error: {}", e);
                    }
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AudioError::GraphStart(e.to_string())
            })?;
        self.thread_handle = Some(handle);

        let result = ready_rx
            .recv_timeout(START_TIMEOUT)
            .unwrap_or_else(|_| Err(AudioError::GraphStart("stream thread did not start".into())));
        if result.is_err() {
            self.running.store(false, Ordering::SeqCst);
            self.join_thread();
        }
        result
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join_thread();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn reset(&mut self) {
        self.stop();
        self.playing.store(false, Ordering::SeqCst);
        self.flush.store(true, Ordering::SeqCst);
        self.drain_queue();
    }

    fn set_input_muted(&mut self, muted: bool) {
        self.input_muted.store(muted, Ordering::Relaxed);
    }

    fn schedule(&mut self, buffer: PlaybackBuffer) -> Result<(), AudioError> {
        let rate = buffer.format().sample_rate_hz() as u32;
        if rate != self.output_config.sample_rate.0 {
            tracing::warn!(
                "Playback buffer at {} Hz on a {} Hz output stream",
                rate,
                self.output_config.sample_rate.0
            );
        }
        self.free_spent();
        self.queue
            .push(buffer.into_samples())
            .map_err(|_| AudioError::Backend("player queue full".into()))
    }

    fn play(&mut self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    fn stop_player(&mut self) {
        self.playing.store(false, Ordering::SeqCst);
        self.flush.store(true, Ordering::SeqCst);
        self.drain_queue();
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

/// Everything the stream thread needs
struct StreamShared {
    input_config: StreamConfig,
    output_config: StreamConfig,
    input_tap: TapSlot,
    output_tap: TapSlot,
    running: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    flush: Arc<AtomicBool>,
    input_muted: Arc<AtomicBool>,
    queue: Arc<ArrayQueue<Vec<f32>>>,
    spent: Arc<ArrayQueue<Vec<f32>>>,
    error_tx: Sender<AudioError>,
}

/// Output-callback side of the player. Never frees a buffer: finished ones go
/// back to the control side through `spent`.
struct PlayerCursor {
    current: Vec<f32>,
    position: usize,
    queue: Arc<ArrayQueue<Vec<f32>>>,
    spent: Arc<ArrayQueue<Vec<f32>>>,
}

impl PlayerCursor {
    fn new(queue: Arc<ArrayQueue<Vec<f32>>>, spent: Arc<ArrayQueue<Vec<f32>>>) -> Self {
        Self {
            current: Vec::new(),
            position: 0,
            queue,
            spent,
        }
    }

    fn retire(&self, buffer: Vec<f32>) {
        if buffer.capacity() > 0 {
            // `spent` holds one more than the player queue
            let _ = self.spent.push(buffer);
        }
    }

    /// Drop the buffer being played
    fn flush(&mut self) {
        let finished = std::mem::take(&mut self.current);
        self.position = 0;
        self.retire(finished);
    }

    /// Fill `data` from queued buffers, silence on underrun
    fn render(&mut self, data: &mut [f32]) {
        for sample in data.iter_mut() {
            if self.position >= self.current.len() {
                match self.queue.pop() {
                    Some(next) => {
                        let finished = std::mem::replace(&mut self.current, next);
                        self.position = 0;
                        self.retire(finished);
                    }
                    None => {
                        *sample = 0.0;
                        continue;
                    }
                }
            }
            *sample = self.current[self.position];
            self.position += 1;
        }
    }
}

fn build_streams(shared: StreamShared) -> Result<(cpal::Stream, cpal::Stream), AudioError> {
    let host = cpal::default_host();
    let input_device = host
        .default_input_device()
        .ok_or_else(|| AudioError::GraphStart("no default input device".into()))?;
    let output_device = host
        .default_output_device()
        .ok_or_else(|| AudioError::GraphStart("no default output device".into()))?;

    tracing::info!(
        "Using input '{}' @ {} Hz, output '{}' @ {} Hz",
        input_device.name().unwrap_or_default(),
        shared.input_config.sample_rate.0,
        output_device.name().unwrap_or_default(),
        shared.output_config.sample_rate.0
    );

    // Input: hand each hardware block to the tap; muted input becomes silence
    let input_tap = shared.input_tap.clone();
    let input_muted = shared.input_muted.clone();
    let silence = vec![0.0f32; MAX_TAP_FRAMES];
    let input_errors = shared.error_tx.clone();
    let input_running = shared.running.clone();
    let input = input_device
        .build_input_stream(
            &shared.input_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Never wait on the control thread
                let Some(mut slot) = input_tap.try_lock() else {
                    return;
                };
                let Some(tap) = slot.as_mut() else {
                    return;
                };
                if input_muted.load(Ordering::Relaxed) {
                    for chunk in data.chunks(silence.len()) {
                        tap(&silence[..chunk.len()]);
                    }
                } else {
                    tap(data);
                }
            },
            move |err| {
                input_running.store(false, Ordering::SeqCst);
                let _ = input_errors.try_send(AudioError::Backend(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::GraphStart(format!("input stream: {}", e)))?;

    // Output: play queued buffers, then meter what was rendered
    let output_tap = shared.output_tap.clone();
    let playing = shared.playing.clone();
    let flush = shared.flush.clone();
    let mut cursor = PlayerCursor::new(shared.queue.clone(), shared.spent.clone());
    let output_errors = shared.error_tx.clone();
    let output_running = shared.running.clone();
    let output = output_device
        .build_output_stream(
            &shared.output_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if flush.swap(false, Ordering::AcqRel) {
                    cursor.flush();
                }

                if playing.load(Ordering::Relaxed) {
                    cursor.render(data);
                } else {
                    data.fill(0.0);
                }

                if let Some(mut slot) = output_tap.try_lock() {
                    if let Some(tap) = slot.as_mut() {
                        tap(data);
                    }
                }
            },
            move |err| {
                output_running.store(false, Ordering::SeqCst);
                let _ = output_errors.try_send(AudioError::Backend(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::GraphStart(format!("output stream: {}", e)))?;

    Ok((input, output))
}

/// Desktop backend over the default devices
pub fn platform() -> PlatformBackend {
    PlatformBackend::new(
        Box::new(DesktopSession::default()),
        Box::new(CpalGraph::new()),
        NotificationHub::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor() -> (PlayerCursor, Arc<ArrayQueue<Vec<f32>>>, Arc<ArrayQueue<Vec<f32>>>) {
        let queue = Arc::new(ArrayQueue::new(4));
        let spent = Arc::new(ArrayQueue::new(5));
        (PlayerCursor::new(queue.clone(), spent.clone()), queue, spent)
    }

    #[test]
    fn test_render_spans_buffers_and_hands_back_finished() {
        let (mut cursor, queue, spent) = cursor();
        queue.push(vec![0.1; 3]).unwrap();
        queue.push(vec![0.2; 3]).unwrap();

        let mut out = [0.0f32; 4];
        cursor.render(&mut out);
        assert_eq!(out, [0.1, 0.1, 0.1, 0.2]);
        assert_eq!(spent.pop(), Some(vec![0.1; 3]));
        assert!(spent.is_empty());
    }

    #[test]
    fn test_underrun_renders_silence() {
        let (mut cursor, queue, _spent) = cursor();
        queue.push(vec![0.5; 2]).unwrap();

        let mut out = [1.0f32; 4];
        cursor.render(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_flush_hands_back_current_buffer() {
        let (mut cursor, queue, spent) = cursor();
        queue.push(vec![0.3; 8]).unwrap();

        let mut out = [0.0f32; 2];
        cursor.render(&mut out);
        cursor.flush();
        assert_eq!(spent.pop(), Some(vec![0.3; 8]));

        cursor.render(&mut out);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_voice_processing_unsupported() {
        let mut graph = CpalGraph::new();
        assert!(matches!(
            graph.set_voice_processing_enabled(true),
            Err(AudioError::Unsupported(_))
        ));
        assert!(graph.set_voice_processing_enabled(false).is_ok());
    }
}
