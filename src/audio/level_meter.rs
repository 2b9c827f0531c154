//! Измеритель уровня на кольцевом буфере
//!
//! У каждого направления (микрофон, микшированный выход) свой измеритель.
//! Пишет только поток тапа; управляющий поток читает уровень или обнуляет буфер.
//! Сэмплы хранятся как биты `f32` в атомиках, поэтому блокировок нет ни с одной стороны.
//!
//! ## Расчёт уровня
//!
//! ```text
//! rms  = sqrt(mean(sample^2))              по всему буферу
//! db   = 20 * log10(max(rms, 1e-5))
//! norm = clamp((db + 80) / 80, 0, 1)       от -80 dB до 0 dB
//! out  = norm^2                            перцептивная кривая
//! ```

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::constants::{LEVEL_BUFFER_CAPACITY, LEVEL_EPSILON, LEVEL_FLOOR_DB};

/// Безблокировочный кольцевой измеритель с одним писателем
pub struct LevelMeter {
    /// Ячейки сэмплов (биты f32), старые перезаписываются первыми
    cells: Box<[AtomicU32]>,

    /// Следующая позиция записи
    cursor: AtomicUsize,
}

impl LevelMeter {
    /// Создать измеритель на 2048 сэмплов по умолчанию
    pub fn new() -> Self {
        Self::with_capacity(LEVEL_BUFFER_CAPACITY)
    }

    /// Создать измеритель заданной ёмкости (минимум один сэмпл)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let cells = (0..capacity)
            .map(|_| AtomicU32::new(0.0f32.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            cells,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Записать сэмпл в позицию курсора и сдвинуть его (только поток тапа)
    #[inline]
    pub fn write(&self, sample: f32) {
        let index = self.cursor.load(Ordering::Relaxed);
        self.cells[index].store(sample.to_bits(), Ordering::Relaxed);
        self.cursor
            .store((index + 1) % self.cells.len(), Ordering::Release);
    }

    /// Записать весь буфер тапа
    pub fn write_all(&self, samples: &[f32]) {
        for &sample in samples {
            self.write(sample);
        }
    }

    /// Нормализованный перцептивный уровень в [0, 1]
    pub fn current_level(&self) -> f32 {
        let sum_squares: f64 = self
            .cells
            .iter()
            .map(|cell| {
                let s = f32::from_bits(cell.load(Ordering::Relaxed)) as f64;
                s * s
            })
            .sum();
        level_from_mean_square(sum_squares / self.cells.len() as f64)
    }

    /// Заполнить все ячейки тишиной, следующее чтение вернёт ровно 0.0
    pub fn reset(&self) {
        for cell in self.cells.iter() {
            cell.store(0.0f32.to_bits(), Ordering::Relaxed);
        }
        self.cursor.store(0, Ordering::Release);
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Уровень произвольного окна сэмплов по той же кривой, что и [`LevelMeter`]
pub fn level_from_samples(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    level_from_mean_square(sum_squares / samples.len() as f64)
}

#[inline]
fn level_from_mean_square(mean_square: f64) -> f32 {
    let rms = mean_square.sqrt() as f32;
    let db = 20.0 * rms.max(LEVEL_EPSILON).log10();
    let normalized = ((db - LEVEL_FLOOR_DB) / -LEVEL_FLOOR_DB).clamp(0.0, 1.0);
    normalized * normalized
}
