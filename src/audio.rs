//! Capture and playback.
//!
//! The streaming loop only sees [`CaptureSource`] and [`PlaybackSink`].
//! [`DuplexDevice`] implements both on top of two cpal streams, with ring
//! buffers between the device callbacks and the blocking calls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use log::{error, info, warn};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::config::Config;
use crate::dsp::{i16_to_unit, unit_to_i16};
use crate::error::{device_err, ReverbError, Result};

pub trait CaptureSource {
    /// Fills `out` with the next samples in [-1, 1]. Overflow on the device
    /// side is dropped silently.
    fn read(&mut self, out: &mut [f32]) -> Result<()>;
}

pub trait PlaybackSink {
    /// Blocks until every sample has been accepted by the device queue.
    fn write(&mut self, samples: &[f32]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

fn find_device(host: &cpal::Host, want: Option<&str>, dir: Direction) -> Result<Device> {
    if let Some(want) = want {
        let devices = match dir {
            Direction::Input => host.input_devices(),
            Direction::Output => host.output_devices(),
        }
        .map_err(device_err)?;
        for dev in devices {
            if let Ok(name) = dev.name() {
                if name.to_lowercase().contains(&want.to_lowercase()) {
                    return Ok(dev);
                }
            }
        }
        return Err(ReverbError::Device(format!("device '{}' not found", want)));
    }

    match dir {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    }
    .ok_or_else(|| ReverbError::Device(format!("no default {:?} device", dir).to_lowercase()))
}

pub fn pick_input_device(want: Option<&str>) -> Result<Device> {
    find_device(&cpal::default_host(), want, Direction::Input)
}

pub fn pick_output_device(want: Option<&str>) -> Result<Device> {
    find_device(&cpal::default_host(), want, Direction::Output)
}

/// Finds a stream config at `sample_rate`, preferring mono and 16-bit.
fn config_for(device: &Device, sample_rate: u32, dir: Direction) -> Result<(StreamConfig, SampleFormat)> {
    let rate = cpal::SampleRate(sample_rate);
    let ranges: Vec<_> = match dir {
        Direction::Input => device.supported_input_configs().map_err(device_err)?.collect(),
        Direction::Output => device.supported_output_configs().map_err(device_err)?.collect(),
    };

    let score = |r: &cpal::SupportedStreamConfigRange| {
        let mono = if r.channels() == 1 { 0 } else { 2 };
        let fmt = match r.sample_format() {
            SampleFormat::I16 => 0,
            SampleFormat::F32 => 1,
            _ => 2,
        };
        mono + fmt
    };

    let best = ranges
        .into_iter()
        .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .filter(|r| {
            matches!(
                r.sample_format(),
                SampleFormat::I16 | SampleFormat::U16 | SampleFormat::F32
            )
        })
        .min_by_key(score);

    match best {
        Some(range) => {
            let supported = range.with_sample_rate(rate);
            Ok((supported.config(), supported.sample_format()))
        }
        None => {
            // some hosts under-report; ask for the default layout at our rate
            let default = match dir {
                Direction::Input => device.default_input_config(),
                Direction::Output => device.default_output_config(),
            }
            .map_err(device_err)?;
            let mut cfg = default.config();
            cfg.sample_rate = rate;
            Ok((cfg, default.sample_format()))
        }
    }
}

/// First stream error latches here; later calls report it.
#[derive(Default)]
struct Fault {
    failed: AtomicBool,
    message: Mutex<Option<String>>,
}

impl Fault {
    fn raise(&self, what: &str, e: cpal::StreamError) {
        if !self.failed.swap(true, Ordering::AcqRel) {
            let msg = format!("{} stream: {}", what, e);
            error!("{}", msg);
            if let Ok(mut m) = self.message.lock() {
                *m = Some(msg);
            }
        }
    }

    fn check(&self) -> Result<()> {
        if !self.failed.load(Ordering::Acquire) {
            return Ok(());
        }
        let msg = self
            .message
            .lock()
            .ok()
            .and_then(|m| m.clone())
            .unwrap_or_else(|| "stream failed".to_string());
        Err(ReverbError::Device(msg))
    }
}

fn build_input_stream<T>(
    device: &Device,
    cfg: &StreamConfig,
    mut prod: HeapProd<f32>,
    fault: Arc<Fault>,
    dropped: Arc<AtomicUsize>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let ch = cfg.channels as usize;
    let stream = device
        .build_input_stream(
            cfg,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks_exact(ch) {
                    let mut acc = 0.0f32;
                    for &s in frame {
                        acc += i16_to_unit(s.to_sample::<i16>());
                    }
                    // full queue: the reader fell behind, lose the sample
                    if prod.try_push(acc / ch as f32).is_err() {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            move |e| fault.raise("input", e),
            None,
        )
        .map_err(device_err)?;
    Ok(stream)
}

fn build_output_stream<T>(
    device: &Device,
    cfg: &StreamConfig,
    mut cons: HeapCons<f32>,
    fault: Arc<Fault>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let ch = cfg.channels as usize;
    let stream = device
        .build_output_stream(
            cfg,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_exact_mut(ch) {
                    let v = cons.try_pop().unwrap_or(0.0);
                    let s = T::from_sample(unit_to_i16(v));
                    frame.iter_mut().for_each(|out| *out = s);
                }
            },
            move |e| fault.raise("output", e),
            None,
        )
        .map_err(device_err)?;
    Ok(stream)
}

/// Live capture + playback pair. Dropping it stops and releases both streams.
pub struct DuplexDevice {
    input: cpal::Stream,
    output: cpal::Stream,
    capture: HeapCons<f32>,
    playback: HeapProd<f32>,
    fault: Arc<Fault>,
    dropped: Arc<AtomicUsize>,
    capture_timeout: Duration,
    playback_timeout: Duration,
    last_overflow_log: Instant,
}

impl DuplexDevice {
    pub fn open(cfg: &Config) -> Result<Self> {
        let in_dev = pick_input_device(cfg.input_device.as_deref())?;
        let out_dev = pick_output_device(cfg.output_device.as_deref())?;
        let (in_cfg, in_fmt) = config_for(&in_dev, cfg.sample_rate, Direction::Input)?;
        let (out_cfg, out_fmt) = config_for(&out_dev, cfg.sample_rate, Direction::Output)?;

        info!(
            "input: {} ({} ch, {:?}) output: {} ({} ch, {:?}) at {} Hz",
            in_dev.name().unwrap_or_else(|_| "<unknown>".into()),
            in_cfg.channels,
            in_fmt,
            out_dev.name().unwrap_or_else(|_| "<unknown>".into()),
            out_cfg.channels,
            out_fmt,
            cfg.sample_rate
        );

        // a few blocks of slack on each side
        let (cap_prod, cap_cons) = HeapRb::<f32>::new(cfg.block_len * 4).split();
        let (mut play_prod, play_cons) = HeapRb::<f32>::new(cfg.block_len * 3).split();
        // one block of lead so the output does not start on an underrun
        for _ in 0..cfg.block_len {
            let _ = play_prod.try_push(0.0);
        }

        let fault = Arc::new(Fault::default());
        let dropped = Arc::new(AtomicUsize::new(0));

        let input = match in_fmt {
            SampleFormat::I16 => build_input_stream::<i16>(&in_dev, &in_cfg, cap_prod, fault.clone(), dropped.clone())?,
            SampleFormat::U16 => build_input_stream::<u16>(&in_dev, &in_cfg, cap_prod, fault.clone(), dropped.clone())?,
            SampleFormat::F32 => build_input_stream::<f32>(&in_dev, &in_cfg, cap_prod, fault.clone(), dropped.clone())?,
            other => return Err(ReverbError::Device(format!("unsupported input format {:?}", other))),
        };
        let output = match out_fmt {
            SampleFormat::I16 => build_output_stream::<i16>(&out_dev, &out_cfg, play_cons, fault.clone())?,
            SampleFormat::U16 => build_output_stream::<u16>(&out_dev, &out_cfg, play_cons, fault.clone())?,
            SampleFormat::F32 => build_output_stream::<f32>(&out_dev, &out_cfg, play_cons, fault.clone())?,
            other => return Err(ReverbError::Device(format!("unsupported output format {:?}", other))),
        };

        input.play().map_err(device_err)?;
        output.play().map_err(device_err)?;

        Ok(Self {
            input,
            output,
            capture: cap_cons,
            playback: play_prod,
            fault,
            dropped,
            capture_timeout: cfg.capture_timeout,
            playback_timeout: cfg.playback_timeout,
            last_overflow_log: Instant::now(),
        })
    }

    fn report_overflow(&mut self) {
        if self.last_overflow_log.elapsed() < Duration::from_secs(1) {
            return;
        }
        let n = self.dropped.swap(0, Ordering::Relaxed);
        if n > 0 {
            warn!("capture overflow: {} samples dropped", n);
        }
        self.last_overflow_log = Instant::now();
    }
}

impl CaptureSource for DuplexDevice {
    fn read(&mut self, out: &mut [f32]) -> Result<()> {
        let t0 = Instant::now();
        let mut filled = 0;
        while filled < out.len() {
            self.fault.check()?;
            filled += self.capture.pop_slice(&mut out[filled..]);
            if filled == out.len() {
                break;
            }
            if t0.elapsed() > self.capture_timeout {
                return Err(ReverbError::Device(format!(
                    "capture stalled: {} of {} samples after {:?}",
                    filled,
                    out.len(),
                    self.capture_timeout
                )));
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.report_overflow();
        Ok(())
    }
}

impl PlaybackSink for DuplexDevice {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let t0 = Instant::now();
        let mut written = 0;
        while written < samples.len() {
            self.fault.check()?;
            written += self.playback.push_slice(&samples[written..]);
            if written == samples.len() {
                break;
            }
            if t0.elapsed() > self.playback_timeout {
                return Err(ReverbError::Device(format!(
                    "playback stalled with {} samples queued",
                    self.playback.occupied_len()
                )));
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}

impl Drop for DuplexDevice {
    fn drop(&mut self) {
        let _ = self.input.pause();
        let _ = self.output.pause();
        info!("audio device released");
    }
}
