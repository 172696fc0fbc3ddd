// Dual Sequencer - Library exports for the binary, tests and benchmarks

pub mod config;
pub mod messaging;
pub mod runtime;
pub mod sequencer;
pub mod sim;
pub mod timing;

// Re-export commonly used types for convenience
pub use config::{ConfigError, SequencerConfig};
pub use messaging::{ChannelError, ClockSource, Message, TimingStatus, create_channel};
pub use runtime::{MonotonicClock, RunReport, Runtime, RuntimeError, RuntimeOptions};
pub use sequencer::{
    BpmMapping, ControllerStatus, InvalidPattern, SequencerController, StepMask, TriggerPattern,
    TriggerScheduler, TriggerSink,
};
pub use timing::{AnalogInput, ClockEngine, EdgeInput, SensorError, SignalSampler, TimingCore};
