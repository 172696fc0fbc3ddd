// Sequencer module - Control context
// Patterns, the step scheduler, and the controller that drives them

pub mod controller;
pub mod pattern;
pub mod scheduler;

pub use controller::{BpmMapping, ControllerStatus, PassReport, SequencerController};
pub use pattern::{InvalidPattern, StepMask, TriggerPattern};
pub use scheduler::{SchedulerStats, TriggerScheduler, TriggerSink};
