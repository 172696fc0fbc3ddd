// Message types - Closed set of messages exchanged between timing and control contexts

use crate::sequencer::pattern::StepMask;
use serde::{Deserialize, Serialize};

/// Active clock source. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClockSource {
    #[default]
    Internal,
    External,
}

/// Which way a message travels through the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    TimingToControl,
    ControlToTiming,
}

/// Snapshot of timing-context counters, sent on request
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TimingStatus {
    pub source: ClockSource,
    pub bpm: f32,
    pub ticks_emitted: u64,
    pub dropped_ticks: u64,
    pub dropped_events: u64,
    pub late_ticks: u64,
    pub sensor_errors: u32,
    /// Failed reads of the external clock input
    pub edge_errors: u64,
    pub decimated_samples: u64,
    /// Length of the pattern last mirrored from the control context
    pub pattern_len: usize,
}

/// Messages between the two contexts
///
/// Every kind has exactly one producing side (see [`Message::direction`]).
/// Consumers copy the fields they need and drop the message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // Control → Timing
    ClockUpdate { bpm: f32, source: ClockSource },
    TriggerPattern { steps: Vec<StepMask> },
    PotentiometerRequest,
    StatusRequest,

    // Timing → Control
    ClockTick { step_index: u64, timestamp_us: u64 },
    /// `bpm` is the tempo the engine runs at after the transition
    ExternalClockEvent { detected: bool, period_us: Option<u32>, bpm: f32 },
    PotentiometerValue { value: u16 },
    SensorHealth { degraded: bool, error_count: u32 },
    StatusReport(TimingStatus),
}

impl Message {
    /// The only direction this kind of message may travel
    pub fn direction(&self) -> Direction {
        match self {
            Message::ClockUpdate { .. }
            | Message::TriggerPattern { .. }
            | Message::PotentiometerRequest
            | Message::StatusRequest => Direction::ControlToTiming,
            Message::ClockTick { .. }
            | Message::ExternalClockEvent { .. }
            | Message::PotentiometerValue { .. }
            | Message::SensorHealth { .. }
            | Message::StatusReport(_) => Direction::TimingToControl,
        }
    }

    /// Short name for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ClockUpdate { .. } => "ClockUpdate",
            Message::TriggerPattern { .. } => "TriggerPattern",
            Message::PotentiometerRequest => "PotentiometerRequest",
            Message::StatusRequest => "StatusRequest",
            Message::ClockTick { .. } => "ClockTick",
            Message::ExternalClockEvent { .. } => "ExternalClockEvent",
            Message::PotentiometerValue { .. } => "PotentiometerValue",
            Message::SensorHealth { .. } => "SensorHealth",
            Message::StatusReport(_) => "StatusReport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directions() {
        let upstream = [
            Message::ClockTick {
                step_index: 0,
                timestamp_us: 0,
            },
            Message::ExternalClockEvent {
                detected: true,
                period_us: Some(500_000),
                bpm: 120.0,
            },
            Message::PotentiometerValue { value: 12 },
            Message::SensorHealth {
                degraded: true,
                error_count: 5,
            },
            Message::StatusReport(TimingStatus::default()),
        ];
        for msg in &upstream {
            assert_eq!(msg.direction(), Direction::TimingToControl, "{}", msg.kind());
        }

        let downstream = [
            Message::ClockUpdate {
                bpm: 120.0,
                source: ClockSource::Internal,
            },
            Message::TriggerPattern { steps: vec![] },
            Message::PotentiometerRequest,
            Message::StatusRequest,
        ];
        for msg in &downstream {
            assert_eq!(msg.direction(), Direction::ControlToTiming, "{}", msg.kind());
        }
    }

    #[test]
    fn test_default_source_is_internal() {
        assert_eq!(ClockSource::default(), ClockSource::Internal);
    }
}
