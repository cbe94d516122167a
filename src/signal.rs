//! Rolling PPG signal buffer, smoothing, peak detection and rate estimation.
//!
//! Everything here is synchronous and allocation-light; the optical loop in
//! [`crate::optical`] calls [`RateEstimator::estimate`] once per tick.

use std::collections::VecDeque;

use crate::protocol::{BPM_RANGE, OPTICAL_FREQUENCY, OPTICAL_WINDOW_SECS, SMOOTHING_WINDOW};
use crate::types::VitalsEstimate;

// ── OpticalConfig ─────────────────────────────────────────────────────────────

/// Tuning for the camera PPG estimator.
#[derive(Debug, Clone)]
pub struct OpticalConfig {
    /// Samples per second; also the tick rate of the real-time loop. Default: `30`.
    pub sample_rate_hz: u32,
    /// Rolling window length in seconds. Default: `5`.
    pub window_secs: u32,
    /// Moving-average length in samples. Default: `5`.
    pub smoothing_window: usize,
    /// Minimum number of peaks before a rate is estimated. Default: `3`.
    pub min_peaks: usize,
    /// Weight of the previous output in the exponential damping. Default: `0.7`.
    pub damping: f64,
    /// Damping seed used on every start. Default: `72.0`.
    pub initial_bpm: f64,
    /// Output clamp, inclusive. Default: `(40, 180)`.
    pub bpm_range: (u16, u16),
    /// Working surface size the frame is downscaled to. Default: `100 × 100`.
    pub surface_size: (u32, u32),
    /// Sampled region `(x, y, width, height)` on the working surface.
    /// Default: the central `20 × 20` block at `(40, 40)`.
    pub region: Region,
}

impl Default for OpticalConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: OPTICAL_FREQUENCY,
            window_secs: OPTICAL_WINDOW_SECS,
            smoothing_window: SMOOTHING_WINDOW,
            min_peaks: 3,
            damping: 0.7,
            initial_bpm: 72.0,
            bpm_range: BPM_RANGE,
            surface_size: (100, 100),
            region: Region {
                x: 40,
                y: 40,
                width: 20,
                height: 20,
            },
        }
    }
}

impl OpticalConfig {
    /// Number of samples held by the rolling window.
    pub fn buffer_len(&self) -> usize {
        (self.sample_rate_hz * self.window_secs) as usize
    }
}

/// A rectangle on the working surface, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

// ── SignalBuffer ──────────────────────────────────────────────────────────────

/// Fixed-capacity FIFO of luminance samples; the oldest sample is evicted
/// once full.
#[derive(Debug, Clone)]
pub struct SignalBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SignalBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Oldest-first view of the buffer as one contiguous slice.
    pub fn as_slice(&mut self) -> &[f64] {
        self.samples.make_contiguous()
    }
}

// ── Conditioning ──────────────────────────────────────────────────────────────

/// Simple moving average, one output per full window.
///
/// Returns `data.len() − window + 1` values, or none if the input is shorter
/// than the window.
pub fn moving_average(data: &[f64], window: usize) -> Vec<f64> {
    if window == 0 {
        return data.to_vec();
    }
    data.windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

/// Indices of strict local maxima (greater than both neighbours).
///
/// The first and last samples are never peaks, and a flat top is not one.
pub fn find_peaks(data: &[f64]) -> Vec<usize> {
    data.windows(3)
        .enumerate()
        .filter(|(_, w)| w[1] > w[0] && w[1] > w[2])
        .map(|(i, _)| i + 1)
        .collect()
}

/// Mean distance between consecutive peaks, in samples.
pub fn mean_peak_spacing(peaks: &[usize]) -> Option<f64> {
    if peaks.len() < 2 {
        return None;
    }
    let span = peaks[peaks.len() - 1] - peaks[0];
    Some(span as f64 / (peaks.len() - 1) as f64)
}

/// Respiration rate derived from heart rate magnitude: `round(bpm / 4)`.
///
/// This is a heuristic kept for dashboard parity, not a physiological
/// measurement of breathing.
pub fn respiration_from_bpm(bpm: u16) -> u16 {
    (bpm as f64 / 4.0).round() as u16
}

// ── RateEstimator ─────────────────────────────────────────────────────────────

/// Peak-interval heart rate with exponential damping between ticks.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    config: OpticalConfig,
    last_bpm: f64,
}

impl RateEstimator {
    pub fn new(config: OpticalConfig) -> Self {
        let last_bpm = config.initial_bpm;
        Self { config, last_bpm }
    }

    /// Raw damped value before rounding and clamping.
    pub fn last_bpm(&self) -> f64 {
        self.last_bpm
    }

    /// Instantaneous rate implied by a mean peak spacing (in samples).
    pub fn instantaneous_bpm(&self, spacing: f64) -> f64 {
        60.0 / (spacing / self.config.sample_rate_hz as f64)
    }

    /// Estimate vitals from a full buffer.
    ///
    /// Returns `None` (and leaves the damping state untouched) while the
    /// buffer is still warming up or fewer than `min_peaks` peaks are found.
    pub fn estimate(&mut self, buffer: &mut SignalBuffer) -> Option<VitalsEstimate> {
        if !buffer.is_full() {
            return None;
        }
        let smoothed = moving_average(buffer.as_slice(), self.config.smoothing_window);
        let peaks = find_peaks(&smoothed);
        if peaks.len() < self.config.min_peaks.max(2) {
            return None;
        }
        let spacing = mean_peak_spacing(&peaks)?;
        let instant = self.instantaneous_bpm(spacing);

        let d = self.config.damping;
        self.last_bpm = d * self.last_bpm + (1.0 - d) * instant;

        let (lo, hi) = self.config.bpm_range;
        let bpm = self.last_bpm.round().clamp(lo as f64, hi as f64) as u16;
        Some(VitalsEstimate {
            bpm,
            respiration_rate: respiration_from_bpm(bpm),
        })
    }
}
