//! Contactless heart-rate and respiration estimation from a camera feed.
//!
//! # Pipeline (one tick)
//!
//! ```text
//! FrameSource ─▶ WorkingSurface (100×100) ─▶ centre 20×20 RGBA
//!             ─▶ mean red ─▶ SignalBuffer(150) ─▶ RateEstimator ─▶ on_estimate
//! ```
//!
//! The processor never opens or closes a camera.  The caller owns capture
//! and hands in a [`FrameSource`] (for example the receiving side of a
//! `tokio::sync::watch` channel its capture thread publishes into) plus a
//! scratch [`WorkingSurface`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, trace};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::SensorError;
use crate::signal::{OpticalConfig, RateEstimator, Region, SignalBuffer};
use crate::types::VitalsEstimate;

// ── Frames ────────────────────────────────────────────────────────────────────

/// One decoded video frame, tightly packed RGBA8, row-major.
///
/// Pixel data is reference counted so a frame can be published to many
/// readers without copying.  The buffer always holds exactly
/// `width × height × 4` bytes.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    rgba: Arc<[u8]>,
}

impl VideoFrame {
    /// Build a frame; `None` if `rgba` is not `width × height × 4` bytes.
    pub fn new(width: u32, height: u32, rgba: impl Into<Arc<[u8]>>) -> Option<Self> {
        let rgba = rgba.into();
        (rgba.len() == width as usize * height as usize * 4).then_some(Self {
            width,
            height,
            rgba,
        })
    }

    /// A frame filled with one colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            rgba: data.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }
}

/// Supplies the most recent frame of a live video feed.
pub trait FrameSource: Send + 'static {
    /// Whether the feed is live.  Checked once at start.
    fn is_ready(&self) -> bool {
        true
    }

    /// The current frame, or `None` when the feed is paused, ended or has
    /// not produced a frame yet.  A `None` tick is skipped.
    fn current_frame(&mut self) -> Option<VideoFrame>;
}

impl FrameSource for watch::Receiver<Option<VideoFrame>> {
    fn is_ready(&self) -> bool {
        self.has_changed().is_ok()
    }

    fn current_frame(&mut self) -> Option<VideoFrame> {
        self.borrow_and_update().clone()
    }
}

// ── Working surface ───────────────────────────────────────────────────────────

/// Scratch drawable a frame is downscaled into before sampling.
pub trait WorkingSurface: Send + 'static {
    /// Scale `frame` to fill the whole surface.  Returns `false` (and the
    /// tick is skipped) if the frame could not be drawn.
    fn draw(&mut self, frame: &VideoFrame) -> bool;

    /// Copy the RGBA pixels of `region` into `out` (cleared first), row by
    /// row.  Pixels outside the surface are skipped.
    fn read_region(&self, region: Region, out: &mut Vec<u8>);
}

/// In-memory RGBA8 surface with nearest-neighbour scaling.
#[derive(Debug, Clone)]
pub struct RgbaSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RgbaSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }
}

impl WorkingSurface for RgbaSurface {
    fn draw(&mut self, frame: &VideoFrame) -> bool {
        let needed = frame.width as usize * frame.height as usize * 4;
        if needed == 0 || frame.rgba.len() < needed {
            return false;
        }
        for y in 0..self.height {
            let sy = (y as u64 * frame.height as u64 / self.height as u64) as usize;
            for x in 0..self.width {
                let sx = (x as u64 * frame.width as u64 / self.width as u64) as usize;
                let src = (sy * frame.width as usize + sx) * 4;
                let dst = (y as usize * self.width as usize + x as usize) * 4;
                self.pixels[dst..dst + 4].copy_from_slice(&frame.rgba[src..src + 4]);
            }
        }
        true
    }

    fn read_region(&self, region: Region, out: &mut Vec<u8>) {
        out.clear();
        let x_end = (region.x + region.width).min(self.width);
        let y_end = (region.y + region.height).min(self.height);
        if region.x >= x_end {
            return;
        }
        for y in region.y..y_end {
            let row = y as usize * self.width as usize;
            let start = (row + region.x as usize) * 4;
            let end = (row + x_end as usize) * 4;
            out.extend_from_slice(&self.pixels[start..end]);
        }
    }
}

/// Mean of the red channel of packed RGBA pixels.
pub fn mean_red(rgba: &[u8]) -> Option<f64> {
    let count = rgba.len() / 4;
    if count == 0 {
        return None;
    }
    let sum: u64 = rgba.chunks_exact(4).map(|px| px[0] as u64).sum();
    Some(sum as f64 / count as f64)
}

// ── Tick sources ──────────────────────────────────────────────────────────────

/// Drives the sampling loop.  Each completed `tick()` is one sample.
#[async_trait]
pub trait TickSource: Send + 'static {
    /// Wait for the next tick; `false` ends the loop.
    async fn tick(&mut self) -> bool;
}

/// Wall-clock ticks at a fixed rate.  Ticks missed while a previous one
/// overran are skipped, never queued.
pub struct IntervalTicks {
    interval: Interval,
}

impl IntervalTicks {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn from_rate(hz: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / hz.max(1) as f64))
    }
}

#[async_trait]
impl TickSource for IntervalTicks {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticks delivered by hand through a [`ManualTickHandle`].
pub struct ManualTicks {
    rx: mpsc::Receiver<()>,
}

/// Sending side of [`ManualTicks`].  Dropping every handle ends the loop.
#[derive(Clone)]
pub struct ManualTickHandle {
    tx: mpsc::Sender<()>,
}

impl ManualTicks {
    pub fn new() -> (Self, ManualTickHandle) {
        let (tx, rx) = mpsc::channel(1);
        (Self { rx }, ManualTickHandle { tx })
    }
}

impl ManualTickHandle {
    /// Deliver `n` ticks, waiting for the loop to accept each one.
    /// Returns `false` once the loop has stopped.
    pub async fn advance(&self, n: usize) -> bool {
        for _ in 0..n {
            if self.tx.send(()).await.is_err() {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl TickSource for ManualTicks {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

// ── VitalsSampler ─────────────────────────────────────────────────────────────

/// State for one run of the optical pipeline: the rolling buffer and the
/// damped estimator.  A fresh sampler is built on every start.
pub struct VitalsSampler {
    config: OpticalConfig,
    buffer: SignalBuffer,
    estimator: RateEstimator,
    scratch: Vec<u8>,
}

impl VitalsSampler {
    pub fn new(config: OpticalConfig) -> Self {
        let region = config.region;
        Self {
            buffer: SignalBuffer::new(config.buffer_len()),
            estimator: RateEstimator::new(config.clone()),
            scratch: Vec::with_capacity(region.width as usize * region.height as usize * 4),
            config,
        }
    }

    /// Samples currently held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append one luminance sample and estimate once the buffer is warm.
    pub fn push_sample(&mut self, sample: f64) -> Option<VitalsEstimate> {
        self.buffer.push(sample);
        self.estimator.estimate(&mut self.buffer)
    }

    /// One full tick over a frame source.  A missing frame or an empty
    /// sample region skips the tick without touching the buffer.
    pub fn tick(
        &mut self,
        source: &mut dyn FrameSource,
        surface: &mut dyn WorkingSurface,
    ) -> Option<VitalsEstimate> {
        let Some(frame) = source.current_frame() else {
            trace!("optical: no frame, tick skipped");
            return None;
        };
        if !surface.draw(&frame) {
            debug!("optical: {}x{} frame could not be drawn, tick skipped", frame.width, frame.height);
            return None;
        }
        surface.read_region(self.config.region, &mut self.scratch);
        let sample = mean_red(&self.scratch)?;
        self.push_sample(sample)
    }
}

// ── OpticalVitalsProcessor ────────────────────────────────────────────────────

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs a [`VitalsSampler`] on a cooperative tick loop.
///
/// `Idle ──start()──▶ Active ──stop()──▶ Idle`
pub struct OpticalVitalsProcessor {
    config: OpticalConfig,
    running: Option<Running>,
}

impl OpticalVitalsProcessor {
    pub fn new(config: OpticalConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    pub fn config(&self) -> &OpticalConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.task.is_finished())
    }

    /// Start sampling on wall-clock ticks at `config.sample_rate_hz`.
    pub async fn start_realtime<S, W, F>(
        &mut self,
        source: S,
        surface: W,
        on_estimate: F,
    ) -> Result<(), SensorError>
    where
        S: FrameSource,
        W: WorkingSurface,
        F: FnMut(VitalsEstimate) + Send + 'static,
    {
        let ticks = IntervalTicks::from_rate(self.config.sample_rate_hz);
        self.start(source, surface, ticks, on_estimate).await
    }

    /// Start sampling on `ticks`.  A running loop is stopped first, so the
    /// new run always begins from an empty buffer.
    ///
    /// Fails with [`SensorError::CaptureUnavailable`] if `source` is not
    /// ready; the processor then stays idle.
    pub async fn start<S, W, T, F>(
        &mut self,
        mut source: S,
        mut surface: W,
        mut ticks: T,
        mut on_estimate: F,
    ) -> Result<(), SensorError>
    where
        S: FrameSource,
        W: WorkingSurface,
        T: TickSource,
        F: FnMut(VitalsEstimate) + Send + 'static,
    {
        self.stop().await;
        if !source.is_ready() {
            return Err(SensorError::CaptureUnavailable(
                "frame source is not delivering frames".into(),
            ));
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut sampler = VitalsSampler::new(self.config.clone());
        info!(
            "optical: sampling at {} Hz, window {} samples",
            self.config.sample_rate_hz,
            self.config.buffer_len()
        );

        let task = tokio::spawn(async move {
            let mut ticks_seen: u64 = 0;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    more = ticks.tick() => {
                        if !more {
                            debug!("optical: tick source closed");
                            break;
                        }
                    }
                }
                ticks_seen += 1;
                if let Some(estimate) = sampler.tick(&mut source, &mut surface) {
                    on_estimate(estimate);
                }
            }
            info!("optical: loop finished after {ticks_seen} tick(s)");
        });

        self.running = Some(Running { cancel, task });
        Ok(())
    }

    /// Halt the loop and discard its buffer.  Idempotent.  Returns once the
    /// loop task has exited, so no callback fires after `stop()` returns.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            if e.is_panic() {
                error!("optical: sampling loop panicked: {e}");
            }
        }
        info!("optical: stopped");
    }
}

impl Default for OpticalVitalsProcessor {
    fn default() -> Self {
        Self::new(OpticalConfig::default())
    }
}

impl Drop for OpticalVitalsProcessor {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}
