//! Модуль аудио-подсистемы
//!
//! Содержит преобразование форматов, измерение уровня, настройку сессии,
//! дуплексный конвейер и передачу событий из реального времени.

pub mod convert;
pub mod dispatch;
pub mod events;
pub mod format;
pub mod level_meter;
pub mod pipeline;
pub mod session;

pub use dispatch::{EventDispatcher, Handoff};
pub use events::{AudioEvent, InterruptionKind};
pub use format::{AudioFormat, PlaybackBuffer};
pub use level_meter::LevelMeter;
pub use pipeline::{AudioPipeline, DiscardWindow};
pub use session::{DuplexSession, SessionReport};
