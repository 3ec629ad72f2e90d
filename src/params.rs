//! Room acoustic parameters and the store the controls write into.
//!
//! The store hands out value copies. A snapshot is assembled under one lock,
//! so a reader never sees half of a position update.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{Config, IMPULSE_LEN, SPEED_OF_SOUND};
use crate::error::{ReverbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomParams {
    /// Width, depth, height in meters.
    pub room_dimensions: [f64; 3],
    pub source_position: [f64; 3],
    pub receiver_position: [f64; 3],
    /// RT60 in seconds.
    pub rt60: f64,
    pub speed_of_sound: f64,
    pub impulse_len: usize,
}

impl Default for RoomParams {
    fn default() -> Self {
        Self {
            room_dimensions: [5.0, 4.0, 6.0],
            source_position: [2.0, 3.5, 2.0],
            receiver_position: [2.0, 1.5, 2.0],
            rt60: 0.4,
            speed_of_sound: SPEED_OF_SOUND,
            impulse_len: IMPULSE_LEN,
        }
    }
}

impl RoomParams {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            speed_of_sound: cfg.speed_of_sound,
            impulse_len: cfg.impulse_len,
            ..Self::default()
        }
    }

    /// Checks everything the response synthesis relies on.
    pub fn validate(&self) -> Result<()> {
        if !(self.rt60.is_finite() && self.rt60 > 0.0) {
            return Err(ReverbError::Parameter(format!(
                "RT60 must be positive, got {}",
                self.rt60
            )));
        }
        if !(self.speed_of_sound.is_finite() && self.speed_of_sound > 0.0) {
            return Err(ReverbError::Parameter(format!(
                "speed of sound must be positive, got {}",
                self.speed_of_sound
            )));
        }
        for axis in Axis::ALL {
            let i = axis.index();
            let dim = self.room_dimensions[i];
            if !(dim.is_finite() && dim > 0.0) {
                return Err(ReverbError::Parameter(format!(
                    "room dimension {} must be positive, got {}",
                    axis.label(),
                    dim
                )));
            }
            check_inside("source", axis, self.source_position[i], dim)?;
            check_inside("receiver", axis, self.receiver_position[i], dim)?;
        }
        Ok(())
    }

    pub fn volume(&self) -> f64 {
        let [x, y, z] = self.room_dimensions;
        x * y * z
    }

    pub fn surface_area(&self) -> f64 {
        let [x, y, z] = self.room_dimensions;
        2.0 * (x * y + x * z + y * z)
    }
}

fn check_inside(what: &str, axis: Axis, p: f64, dim: f64) -> Result<()> {
    if p.is_finite() && (0.0..=dim).contains(&p) {
        Ok(())
    } else {
        Err(ReverbError::Parameter(format!(
            "{} {} = {:.2} lies outside the room (0..{:.2})",
            what,
            axis.label(),
            p,
            dim
        )))
    }
}

/// Shared, lock-guarded parameter state. Cloning shares the same storage.
#[derive(Clone, Debug)]
pub struct ParamStore {
    inner: Arc<Mutex<RoomParams>>,
    defaults: RoomParams,
}

impl ParamStore {
    pub fn new(initial: RoomParams) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
            defaults: initial,
        }
    }

    // The value is plain data; a writer that panicked cannot leave it half
    // updated because every write is a single assignment under the lock.
    fn lock(&self) -> MutexGuard<'_, RoomParams> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> RoomParams {
        *self.lock()
    }

    pub fn update<F: FnOnce(&mut RoomParams)>(&self, f: F) {
        let mut guard = self.lock();
        let mut next = *guard;
        f(&mut next);
        *guard = next;
    }

    pub fn reset(&self) {
        let defaults = self.defaults;
        self.update(|p| *p = defaults);
    }

    pub fn set_rt60(&self, rt60: f64) {
        self.update(|p| p.rt60 = rt60);
    }

    pub fn set_room_dimensions(&self, dims: [f64; 3]) {
        self.update(|p| p.room_dimensions = dims);
    }

    pub fn set_source_position(&self, pos: [f64; 3]) {
        self.update(|p| p.source_position = pos);
    }

    pub fn set_receiver_position(&self, pos: [f64; 3]) {
        self.update(|p| p.receiver_position = pos);
    }

    pub fn set_room_dimension(&self, axis: Axis, v: f64) {
        self.update(|p| p.room_dimensions[axis.index()] = v);
    }

    pub fn set_source(&self, axis: Axis, v: f64) {
        self.update(|p| p.source_position[axis.index()] = v);
    }

    pub fn set_receiver(&self, axis: Axis, v: f64) {
        self.update(|p| p.receiver_position[axis.index()] = v);
    }
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new(RoomParams::default())
    }
}
