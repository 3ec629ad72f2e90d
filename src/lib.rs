pub mod analyzer;
pub mod audio;
pub mod buffer;
pub mod config;
pub mod controls;
pub mod convolve;
pub mod dsp;
pub mod error;
pub mod params;
pub mod render;
pub mod response;
pub mod rir;
pub mod stream;
pub mod utils;

pub use analyzer::{SpectralSeries, SpectrumAnalyzer};
pub use audio::{pick_input_device, pick_output_device, CaptureSource, DuplexDevice, PlaybackSink};
pub use buffer::{AudioBlock, ProcessedBlock};
pub use config::{Config, ResponsePolicy};
pub use controls::{Control, ControlSurface};
pub use convolve::ConvolutionEngine;
pub use dsp::{normalize_peak, peak_abs};
pub use error::{ReverbError, Result};
pub use params::{Axis, ParamStore, RoomParams};
pub use render::{draw_frame, layout_for, Layout};
pub use response::{ImpulseResponse, ImpulseResponseProvider, ResponseCache};
pub use rir::ImageSourceRir;
pub use stream::{
    spawn, DisplayFrame, DisplaySink, NullDisplay, StreamHandle, StreamState, StreamingLoop,
    TickStatus,
};
