//! Slider-style control surface over the parameter store.

use crate::params::{Axis, ParamStore, RoomParams};

pub const RT60_RANGE: (f64, f64) = (0.4, 2.0);
pub const POSITION_RANGE: (f64, f64) = (1.0, 10.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Rt60,
    Room(Axis),
    Source(Axis),
    Receiver(Axis),
}

impl Control {
    /// Display order: RT60 first, then the three groups of three.
    pub const ALL: [Control; 10] = [
        Control::Rt60,
        Control::Room(Axis::X),
        Control::Room(Axis::Y),
        Control::Room(Axis::Z),
        Control::Source(Axis::X),
        Control::Source(Axis::Y),
        Control::Source(Axis::Z),
        Control::Receiver(Axis::X),
        Control::Receiver(Axis::Y),
        Control::Receiver(Axis::Z),
    ];

    /// Slider bounds. Source and receiver sliders may leave the room.
    pub fn range(self) -> (f64, f64) {
        match self {
            Control::Rt60 => RT60_RANGE,
            _ => POSITION_RANGE,
        }
    }

    pub fn step(self) -> f64 {
        match self {
            Control::Rt60 => 0.05,
            _ => 0.1,
        }
    }

    pub fn label(self) -> String {
        match self {
            Control::Rt60 => "RT60".to_string(),
            Control::Room(a) => format!("room {}", a.label()),
            Control::Source(a) => format!("src {}", a.label()),
            Control::Receiver(a) => format!("rcv {}", a.label()),
        }
    }

    pub fn get(self, p: &RoomParams) -> f64 {
        match self {
            Control::Rt60 => p.rt60,
            Control::Room(a) => p.room_dimensions[a.index()],
            Control::Source(a) => p.source_position[a.index()],
            Control::Receiver(a) => p.receiver_position[a.index()],
        }
    }

    /// Writes one scalar; takes effect on the next snapshot.
    pub fn set(self, store: &ParamStore, v: f64) {
        match self {
            Control::Rt60 => store.set_rt60(v),
            Control::Room(a) => store.set_room_dimension(a, v),
            Control::Source(a) => store.set_source(a, v),
            Control::Receiver(a) => store.set_receiver(a, v),
        }
    }
}

pub struct ControlSurface {
    store: ParamStore,
    selected: usize,
}

impl ControlSurface {
    pub fn new(store: ParamStore) -> Self {
        Self { store, selected: 0 }
    }

    pub fn selected(&self) -> Control {
        Control::ALL[self.selected]
    }

    pub fn select_next(&mut self) {
        self.selected = (self.selected + 1) % Control::ALL.len();
    }

    pub fn select_prev(&mut self) {
        self.selected = (self.selected + Control::ALL.len() - 1) % Control::ALL.len();
    }

    /// Moves the selected slider by `steps` increments, clamped to its range.
    pub fn nudge(&self, steps: i32) -> f64 {
        let ctl = self.selected();
        let (lo, hi) = ctl.range();
        let cur = ctl.get(&self.store.snapshot());
        let next = (cur + steps as f64 * ctl.step()).clamp(lo, hi);
        // keep slider values on the step grid
        let next = (next / ctl.step()).round() * ctl.step();
        let next = next.clamp(lo, hi);
        ctl.set(&self.store, next);
        next
    }

    pub fn reset(&self) {
        self.store.reset();
    }

    pub fn store(&self) -> &ParamStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_wraps_both_ways() {
        let mut cs = ControlSurface::new(ParamStore::default());
        assert_eq!(cs.selected(), Control::Rt60);
        cs.select_prev();
        assert_eq!(cs.selected(), Control::Receiver(Axis::Z));
        cs.select_next();
        cs.select_next();
        assert_eq!(cs.selected(), Control::Room(Axis::X));
    }

    #[test]
    fn nudge_clamps_to_slider_range() {
        let cs = ControlSurface::new(ParamStore::default());
        let v = cs.nudge(-10);
        assert!((v - 0.4).abs() < 1e-9);
        let v = cs.nudge(1000);
        assert!((v - 2.0).abs() < 1e-9);
        assert!((cs.store().snapshot().rt60 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn source_slider_can_leave_the_room() {
        let store = ParamStore::default();
        let mut cs = ControlSurface::new(store.clone());
        // Source Y
        for _ in 0..5 {
            cs.select_next();
        }
        assert_eq!(cs.selected(), Control::Source(Axis::Y));
        cs.nudge(100);
        let p = store.snapshot();
        assert!((p.source_position[1] - 10.0).abs() < 1e-9);
        assert!(p.validate().is_err());
    }

    #[test]
    fn set_routes_to_matching_field() {
        let store = ParamStore::default();
        Control::Receiver(Axis::Z).set(&store, 3.3);
        assert_eq!(store.snapshot().receiver_position[2], 3.3);
        assert_eq!(Control::Receiver(Axis::Z).get(&store.snapshot()), 3.3);
    }
}
