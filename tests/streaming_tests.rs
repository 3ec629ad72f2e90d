// Streaming loop driven by a scripted device instead of cpal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use roomverb::{
    peak_abs, CaptureSource, Config, DisplayFrame, ImageSourceRir, ImpulseResponse,
    ImpulseResponseProvider, NullDisplay, ParamStore, PlaybackSink, ReverbError, ResponsePolicy,
    Result, RoomParams, StreamState, StreamingLoop, TickStatus,
};

const SR: u32 = 16_000;
const N: usize = 2048;

#[derive(Default, Clone)]
struct Probe {
    played: Arc<Mutex<Vec<Vec<f32>>>>,
    released: Arc<AtomicBool>,
}

impl Probe {
    fn played(&self) -> Vec<Vec<f32>> {
        self.played.lock().unwrap().clone()
    }
}

struct ScriptedDevice {
    blocks: VecDeque<Vec<f32>>,
    /// Keep delivering silence once the script runs out.
    endless: bool,
    probe: Probe,
}

impl ScriptedDevice {
    fn new(blocks: Vec<Vec<f32>>, probe: &Probe) -> Self {
        Self {
            blocks: blocks.into(),
            endless: false,
            probe: probe.clone(),
        }
    }

    fn endless(probe: &Probe) -> Self {
        Self {
            blocks: VecDeque::new(),
            endless: true,
            probe: probe.clone(),
        }
    }
}

impl CaptureSource for ScriptedDevice {
    fn read(&mut self, out: &mut [f32]) -> Result<()> {
        match self.blocks.pop_front() {
            Some(block) => out.copy_from_slice(&block),
            None if self.endless => out.iter_mut().for_each(|x| *x = 0.0),
            None => return Err(ReverbError::Device("input unplugged".into())),
        }
        Ok(())
    }
}

impl PlaybackSink for ScriptedDevice {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.probe.played.lock().unwrap().push(samples.to_vec());
        Ok(())
    }
}

impl Drop for ScriptedDevice {
    fn drop(&mut self) {
        self.probe.released.store(true, Ordering::SeqCst);
    }
}

/// Cheap provider: a decaying comb whose spacing follows the room width.
struct CombProvider {
    calls: Arc<AtomicUsize>,
}

impl CombProvider {
    fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Self { calls: calls.clone() }, calls)
    }
}

impl ImpulseResponseProvider for CombProvider {
    fn generate(&self, p: &RoomParams, _sr: u32, len: usize) -> Result<ImpulseResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let spacing = (p.room_dimensions[0] * 20.0) as usize + 1;
        let mut taps = vec![0.0; len];
        let mut gain = 1.0f32;
        let mut i = 0;
        while i < len {
            taps[i] = gain;
            gain *= 0.8;
            i += spacing;
        }
        Ok(ImpulseResponse::new(taps))
    }
}

struct FailingProvider;

impl ImpulseResponseProvider for FailingProvider {
    fn generate(&self, _p: &RoomParams, _sr: u32, _len: usize) -> Result<ImpulseResponse> {
        Err(ReverbError::AcousticSimulation("solver diverged".into()))
    }
}

struct EmptyProvider;

impl ImpulseResponseProvider for EmptyProvider {
    fn generate(&self, _p: &RoomParams, _sr: u32, _len: usize) -> Result<ImpulseResponse> {
        Ok(ImpulseResponse::new(Vec::new()))
    }
}

fn sine(freq: f32, amp: f32) -> Vec<f32> {
    (0..N)
        .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
        .collect()
}

fn default_loop<P: ImpulseResponseProvider>(provider: P) -> (StreamingLoop<P>, ParamStore) {
    let store = ParamStore::default();
    let lp = StreamingLoop::new(Config::default(), store.clone(), provider);
    (lp, store)
}

#[test]
fn silent_block_in_default_room_plays_zeros() {
    let (mut lp, store) = default_loop(ImageSourceRir::default());
    assert_eq!(
        store.snapshot(),
        RoomParams {
            room_dimensions: [5.0, 4.0, 6.0],
            source_position: [2.0, 3.5, 2.0],
            receiver_position: [2.0, 1.5, 2.0],
            rt60: 0.4,
            ..RoomParams::default()
        }
    );

    let probe = Probe::default();
    let mut dev = ScriptedDevice::new(vec![vec![0.0; N]], &probe);
    let status = lp.tick(&mut dev, &mut NullDisplay).unwrap();

    assert_eq!(status, TickStatus::Processed);
    let played = probe.played();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].len(), N);
    assert!(played[0].iter().all(|&x| x == 0.0));
}

#[test]
fn invalid_rt60_replays_previous_output() {
    let (mut lp, store) = default_loop(ImageSourceRir::default());
    let probe = Probe::default();
    let mut dev = ScriptedDevice::new(vec![sine(440.0, 0.5), sine(880.0, 0.3)], &probe);

    assert_eq!(lp.tick(&mut dev, &mut NullDisplay).unwrap(), TickStatus::Processed);
    let first = lp.last_output().clone();
    assert!((peak_abs(first.samples()) - 1.0).abs() < 1e-6);

    store.set_rt60(-1.0);
    let status = lp.tick(&mut dev, &mut NullDisplay).unwrap();
    assert!(matches!(status, TickStatus::Reused(ReverbError::Parameter(_))));

    let played = probe.played();
    assert_eq!(played.len(), 2);
    assert_eq!(played[1], first.samples());
    assert_eq!(lp.last_output(), &first);
}

#[test]
fn invalid_parameters_before_any_output_play_silence() {
    let (provider, calls) = CombProvider::new();
    let (mut lp, store) = default_loop(provider);
    store.set_source_position([9.0, 9.0, 9.0]);

    let probe = Probe::default();
    let mut dev = ScriptedDevice::new(vec![sine(440.0, 0.5)], &probe);
    let status = lp.tick(&mut dev, &mut NullDisplay).unwrap();

    assert!(matches!(status, TickStatus::Reused(ReverbError::Parameter(_))));
    assert!(probe.played()[0].iter().all(|&x| x == 0.0));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn simulation_failure_is_transient() {
    let (mut lp, _store) = default_loop(FailingProvider);
    let probe = Probe::default();
    let mut dev = ScriptedDevice::new(vec![sine(440.0, 0.5), sine(440.0, 0.5)], &probe);

    for _ in 0..2 {
        let status = lp.tick(&mut dev, &mut NullDisplay).unwrap();
        assert!(matches!(
            status,
            TickStatus::Reused(ReverbError::AcousticSimulation(_))
        ));
    }
    assert_eq!(probe.played().len(), 2);
}

#[test]
fn empty_response_is_fatal() {
    let cfg = Config {
        impulse_len: 0,
        ..Config::default()
    };
    let store = ParamStore::new(RoomParams::from_config(&cfg));
    let mut lp = StreamingLoop::new(cfg, store, EmptyProvider);
    let probe = Probe::default();
    let mut dev = ScriptedDevice::new(vec![sine(440.0, 0.5)], &probe);

    let err = lp.tick(&mut dev, &mut NullDisplay).unwrap_err();
    assert!(matches!(err, ReverbError::DimensionMismatch(_)));
    assert!(probe.played().is_empty());
}

#[test]
fn unchanged_parameters_reuse_the_response() {
    let (provider, calls) = CombProvider::new();
    let (mut lp, store) = default_loop(provider);
    let probe = Probe::default();
    let blocks = (0..4).map(|_| sine(300.0, 0.4)).collect();
    let mut dev = ScriptedDevice::new(blocks, &probe);

    lp.tick(&mut dev, &mut NullDisplay).unwrap();
    lp.tick(&mut dev, &mut NullDisplay).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store.set_room_dimensions([6.0, 4.0, 6.0]);
    lp.tick(&mut dev, &mut NullDisplay).unwrap();
    lp.tick(&mut dev, &mut NullDisplay).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(lp.responses_synthesized(), 2);
}

#[test]
fn recompute_policy_synthesizes_every_tick() {
    let (provider, calls) = CombProvider::new();
    let cfg = Config {
        response_policy: ResponsePolicy::RecomputeEveryTick,
        ..Config::default()
    };
    let mut lp = StreamingLoop::new(cfg, ParamStore::default(), provider);
    let probe = Probe::default();
    let mut dev = ScriptedDevice::new((0..3).map(|_| sine(300.0, 0.4)).collect(), &probe);
    for _ in 0..3 {
        lp.tick(&mut dev, &mut NullDisplay).unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn each_tick_publishes_four_series() {
    let (provider, _) = CombProvider::new();
    let (mut lp, _store) = default_loop(provider);
    let probe = Probe::default();
    let mut dev = ScriptedDevice::new(vec![sine(500.0, 0.8)], &probe);
    let (mut tx, rx) = crossbeam_channel::bounded::<DisplayFrame>(2);

    lp.tick(&mut dev, &mut tx).unwrap();
    let frame = rx.try_recv().unwrap();

    assert_eq!(frame.tick, 1);
    assert_eq!(frame.captured_time, sine(500.0, 0.8));
    assert_eq!(frame.processed_time, probe.played()[0]);
    assert_eq!(frame.captured_freq.len(), N / 2 + 1);
    assert_eq!(frame.processed_freq.len(), N / 2 + 1);
    // 500 Hz sits on bin 64
    assert_eq!(frame.captured_freq.peak_bin(), Some(64));
    assert_eq!(frame.params, RoomParams::default());
}

#[test]
fn full_display_channel_does_not_block() {
    let (provider, _) = CombProvider::new();
    let (mut lp, _store) = default_loop(provider);
    let probe = Probe::default();
    let mut dev = ScriptedDevice::new((0..5).map(|_| sine(500.0, 0.8)).collect(), &probe);
    let (mut tx, rx) = crossbeam_channel::bounded::<DisplayFrame>(1);

    for _ in 0..5 {
        lp.tick(&mut dev, &mut tx).unwrap();
    }
    assert_eq!(rx.try_iter().count(), 1);
    assert_eq!(probe.played().len(), 5);
}

#[test]
fn device_error_stops_and_releases() {
    let (provider, _) = CombProvider::new();
    let (mut lp, _store) = default_loop(provider);
    let state = lp.state();
    let probe = Probe::default();
    let dev = ScriptedDevice::new(vec![sine(440.0, 0.5), sine(440.0, 0.5)], &probe);
    let stop = AtomicBool::new(false);

    let err = lp.run(dev, &mut NullDisplay, &stop).unwrap_err();

    assert!(matches!(err, ReverbError::Device(_)));
    assert_eq!(lp.ticks(), 2);
    assert_eq!(state.get(), StreamState::Idle);
    assert!(probe.released.load(Ordering::SeqCst));
}

#[test]
fn stop_before_start_releases_device() {
    let (provider, _) = CombProvider::new();
    let (mut lp, _store) = default_loop(provider);
    let probe = Probe::default();
    let dev = ScriptedDevice::new(vec![], &probe);
    let stop = AtomicBool::new(true);

    lp.run(dev, &mut NullDisplay, &stop).unwrap();

    assert_eq!(lp.ticks(), 0);
    assert_eq!(lp.state().get(), StreamState::Idle);
    assert!(probe.released.load(Ordering::SeqCst));
}

#[test]
fn spawned_loop_reports_device_error_once() {
    let (provider, _) = CombProvider::new();
    let probe = Probe::default();
    let open_probe = probe.clone();
    let (tx, rx) = crossbeam_channel::bounded::<DisplayFrame>(8);

    let handle = roomverb::spawn(
        Config::default(),
        ParamStore::default(),
        provider,
        move |_cfg: &Config| {
            Ok(ScriptedDevice::new(
                (0..3).map(|_| sine(440.0, 0.5)).collect(),
                &open_probe,
            ))
        },
        tx,
    )
    .unwrap();

    let frames: Vec<DisplayFrame> = rx.iter().collect();
    assert_eq!(frames.len(), 3);

    let err = handle.join().unwrap_err();
    assert!(matches!(err, ReverbError::Device(_)));
    assert!(probe.released.load(Ordering::SeqCst));
    assert_eq!(probe.played().len(), 3);
}

#[test]
fn stopping_a_spawned_loop_goes_idle() {
    let (provider, _) = CombProvider::new();
    let probe = Probe::default();
    let open_probe = probe.clone();
    let (tx, rx) = crossbeam_channel::bounded::<DisplayFrame>(1);

    let handle = roomverb::spawn(
        Config::default(),
        ParamStore::default(),
        provider,
        move |_cfg: &Config| Ok(ScriptedDevice::endless(&open_probe)),
        tx,
    )
    .unwrap();

    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(handle.state(), StreamState::Running);
    handle.join().unwrap();
    assert!(probe.released.load(Ordering::SeqCst));
}

/// Delivers silence no faster than `period`, like a real capture device.
struct PacedDevice {
    period: Duration,
}

impl CaptureSource for PacedDevice {
    fn read(&mut self, out: &mut [f32]) -> Result<()> {
        std::thread::sleep(self.period);
        out.iter_mut().for_each(|x| *x = 0.0);
        Ok(())
    }
}

impl PlaybackSink for PacedDevice {
    fn write(&mut self, _samples: &[f32]) -> Result<()> {
        Ok(())
    }
}

#[test]
fn capture_wait_does_not_count_as_slow() {
    let cfg = Config {
        block_len: 1024,
        impulse_len: 1024,
        ..Config::default()
    };
    // longer than the 64 ms block period
    let mut dev = PacedDevice {
        period: cfg.block_duration() + Duration::from_millis(6),
    };
    let store = ParamStore::new(RoomParams::from_config(&cfg));
    let (provider, _) = CombProvider::new();
    let mut lp = StreamingLoop::new(cfg, store, provider);

    for _ in 0..5 {
        assert_eq!(lp.tick(&mut dev, &mut NullDisplay).unwrap(), TickStatus::Processed);
    }
    assert_eq!(lp.ticks(), 5);
    assert_eq!(lp.slow_ticks(), 0);
}
