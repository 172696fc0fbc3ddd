// Timing context - Clock generation, external clock detection, analog sampling

pub mod clock;
pub mod core;
pub mod io;
pub mod sampler;

pub use clock::{ClockEngine, ClockState, EngineState};
pub use self::core::TimingCore;
pub use io::{AnalogInput, EdgeInput, NoEdges, SensorError};
pub use sampler::{SampleBuffer, SignalSampler};
