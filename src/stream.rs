//! The block loop: capture, convolve, play back, analyze, publish.
//!
//! The loop runs on its own thread. It shares the [`ParamStore`] with the
//! control side and hands display frames over a bounded channel, so neither
//! side waits on the other's timing.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::analyzer::{SpectralSeries, SpectrumAnalyzer};
use crate::audio::{CaptureSource, PlaybackSink};
use crate::buffer::{AudioBlock, ProcessedBlock};
use crate::config::Config;
use crate::convolve::ConvolutionEngine;
use crate::error::{ReverbError, Result};
use crate::params::{ParamStore, RoomParams};
use crate::response::{ImpulseResponseProvider, ResponseCache};
use crate::utils::scopeguard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Running,
}

/// Loop state readable from other threads.
#[derive(Debug, Clone, Default)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn get(&self) -> StreamState {
        match self.0.load(Ordering::Acquire) {
            1 => StreamState::Running,
            _ => StreamState::Idle,
        }
    }

    fn set(&self, s: StreamState) {
        let v = match s {
            StreamState::Idle => 0,
            StreamState::Running => 1,
        };
        self.0.store(v, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickStatus {
    /// Fresh output from the current parameters.
    Processed,
    /// The response could not be produced; the previous output was replayed.
    Reused(ReverbError),
}

/// The four series of one tick, plus the snapshot that produced them.
#[derive(Debug, Clone)]
pub struct DisplayFrame {
    pub tick: u64,
    pub params: RoomParams,
    pub status: TickStatus,
    pub captured_time: Vec<f32>,
    pub captured_freq: SpectralSeries,
    pub processed_time: Vec<f32>,
    pub processed_freq: SpectralSeries,
}

pub trait DisplaySink {
    /// Must not block the audio thread.
    fn publish(&mut self, frame: DisplayFrame);
}

impl DisplaySink for Sender<DisplayFrame> {
    fn publish(&mut self, frame: DisplayFrame) {
        match self.try_send(frame) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                debug!("display receiver gone");
            }
        }
    }
}

/// Discards every frame.
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn publish(&mut self, _frame: DisplayFrame) {}
}

struct TickMonitor {
    budget: Duration,
    slow: u32,
    total_slow: u64,
    worst: Duration,
    last_warn: Instant,
    holding: bool,
}

impl TickMonitor {
    fn new(budget: Duration) -> Self {
        Self {
            budget,
            slow: 0,
            total_slow: 0,
            worst: Duration::ZERO,
            last_warn: Instant::now(),
            holding: false,
        }
    }

    /// `elapsed` excludes the capture wait, which paces the loop.
    fn record(&mut self, elapsed: Duration, status: &TickStatus) {
        if elapsed > self.budget {
            self.slow += 1;
            self.total_slow += 1;
            self.worst = self.worst.max(elapsed);
        }
        if self.slow > 0 && self.last_warn.elapsed() > Duration::from_secs(1) {
            warn!(
                "{} slow ticks in the last second (worst {:?}, budget {:?})",
                self.slow, self.worst, self.budget
            );
            self.slow = 0;
            self.worst = Duration::ZERO;
            self.last_warn = Instant::now();
        }

        match (status, self.holding) {
            (TickStatus::Reused(e), false) => {
                debug!("holding last output: {}", e);
                self.holding = true;
            }
            (TickStatus::Processed, true) => {
                debug!("parameters valid again");
                self.holding = false;
            }
            _ => {}
        }
    }
}

pub struct StreamingLoop<P> {
    cfg: Config,
    store: ParamStore,
    responses: ResponseCache<P>,
    engine: ConvolutionEngine,
    analyzer: SpectrumAnalyzer,
    captured: Vec<f32>,
    last_output: ProcessedBlock,
    state: StateCell,
    ticks: u64,
    monitor: TickMonitor,
}

impl<P: ImpulseResponseProvider> StreamingLoop<P> {
    pub fn new(cfg: Config, store: ParamStore, provider: P) -> Self {
        Self {
            responses: ResponseCache::new(provider, cfg.response_policy, cfg.sample_rate),
            engine: ConvolutionEngine::with_shape(cfg.block_len, cfg.impulse_len),
            analyzer: SpectrumAnalyzer::new(cfg.sample_rate),
            captured: vec![0.0; cfg.block_len],
            last_output: ProcessedBlock::silence(cfg.block_len),
            state: StateCell::default(),
            ticks: 0,
            monitor: TickMonitor::new(cfg.block_duration()),
            store,
            cfg,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn state(&self) -> StateCell {
        self.state.clone()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Output played on the most recent tick.
    pub fn last_output(&self) -> &ProcessedBlock {
        &self.last_output
    }

    /// Ticks whose work after capture overran one block period.
    pub fn slow_ticks(&self) -> u64 {
        self.monitor.total_slow
    }

    /// How many times a response was actually synthesized.
    pub fn responses_synthesized(&self) -> u64 {
        self.responses.misses()
    }

    /// One iteration. Device and contract errors are returned; parameter and
    /// simulation errors replay the previous output and report `Reused`.
    pub fn tick<D, S>(&mut self, io: &mut D, display: &mut S) -> Result<TickStatus>
    where
        D: CaptureSource + PlaybackSink + ?Sized,
        S: DisplaySink + ?Sized,
    {
        io.read(&mut self.captured)?;
        let t0 = Instant::now();
        let block = AudioBlock::new(self.captured.clone(), self.cfg.sample_rate);

        let params = self.store.snapshot();
        let status = match self.responses.get(&params) {
            Ok(ir) => {
                self.last_output = self.engine.process(&block, ir)?;
                TickStatus::Processed
            }
            Err(e) if e.is_transient() => TickStatus::Reused(e),
            Err(e) => return Err(e),
        };

        io.write(self.last_output.samples())?;

        let captured_freq = self.analyzer.analyze(block.samples())?;
        let processed_freq = self.analyzer.analyze(self.last_output.samples())?;
        self.ticks += 1;
        self.monitor.record(t0.elapsed(), &status);

        display.publish(DisplayFrame {
            tick: self.ticks,
            params,
            status: status.clone(),
            captured_time: block.into_samples(),
            captured_freq,
            processed_time: self.last_output.samples().to_vec(),
            processed_freq,
        });

        Ok(status)
    }

    /// Ticks until `stop` is set or a fatal error occurs. The device is
    /// consumed and released before this returns, on every path.
    pub fn run<D, S>(&mut self, io: D, display: &mut S, stop: &AtomicBool) -> Result<()>
    where
        D: CaptureSource + PlaybackSink,
        S: DisplaySink + ?Sized,
    {
        let state = self.state.clone();
        state.set(StreamState::Running);
        info!(
            "stream running: {} Hz, {} sample blocks, {} tap responses",
            self.cfg.sample_rate, self.cfg.block_len, self.cfg.impulse_len
        );

        let mut io = scopeguard::guard(io, move |io| {
            drop(io);
            state.set(StreamState::Idle);
        });

        while !stop.load(Ordering::Acquire) {
            if let Err(e) = self.tick(&mut *io, display) {
                error!("stream stopped: {}", e);
                return Err(e);
            }
        }

        info!(
            "stream stopped after {} ticks, {} responses synthesized",
            self.ticks,
            self.responses.misses()
        );
        Ok(())
    }
}

/// Running loop on its own thread.
pub struct StreamHandle {
    stop: Arc<AtomicBool>,
    state: StateCell,
    join: Option<JoinHandle<Result<()>>>,
}

impl StreamHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    /// Stops the loop and waits for the device to be released.
    pub fn join(mut self) -> Result<()> {
        self.stop();
        match self.join.take() {
            Some(j) => j
                .join()
                .unwrap_or_else(|_| Err(ReverbError::Device("audio thread panicked".into()))),
            None => Ok(()),
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Starts the loop on a dedicated thread.
///
/// `open` runs on that thread, so the device handle never crosses threads.
pub fn spawn<P, D, F, S>(
    cfg: Config,
    store: ParamStore,
    provider: P,
    open: F,
    mut display: S,
) -> Result<StreamHandle>
where
    P: ImpulseResponseProvider + 'static,
    D: CaptureSource + PlaybackSink,
    F: FnOnce(&Config) -> Result<D> + Send + 'static,
    S: DisplaySink + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let mut streaming = StreamingLoop::new(cfg, store, provider);
    let state = streaming.state();

    let join = {
        let stop = stop.clone();
        thread::Builder::new()
            .name("roomverb-audio".into())
            .spawn(move || {
                let io = open(streaming.config()).map_err(|e| {
                    error!("could not open audio device: {}", e);
                    e
                })?;
                streaming.run(io, &mut display, &stop)
            })
            .map_err(|e| ReverbError::Device(format!("failed to spawn audio thread: {}", e)))?
    };

    Ok(StreamHandle {
        stop,
        state,
        join: Some(join),
    })
}
