// Simulated collaborators for running the sequencer without hardware

use crate::runtime::MonotonicClock;
use crate::sequencer::pattern::MAX_LANES;
use crate::sequencer::scheduler::TriggerSink;
use crate::timing::io::{AnalogInput, EdgeInput, SensorError};
use std::ops::Range;

/// Potentiometer that replays a list of raw readings, cycling when exhausted.
/// Reads whose index falls in a failure window return an error instead.
#[derive(Debug, Clone)]
pub struct SimulatedPot {
    values: Vec<u16>,
    failures: Vec<Range<u64>>,
    reads: u64,
}

impl SimulatedPot {
    pub fn new(values: Vec<u16>) -> Self {
        Self {
            values,
            failures: Vec::new(),
            reads: 0,
        }
    }

    pub fn constant(value: u16) -> Self {
        Self::new(vec![value])
    }

    /// Fail the reads with index in `reads` (0-based)
    pub fn failing(mut self, reads: Range<u64>) -> Self {
        self.failures.push(reads);
        self
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }
}

impl AnalogInput for SimulatedPot {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        let index = self.reads;
        self.reads += 1;

        if self.failures.iter().any(|window| window.contains(&index)) {
            return Err(SensorError::ReadFailed(format!("simulated failure on read {}", index)));
        }
        if self.values.is_empty() {
            return Err(SensorError::NotReady);
        }
        Ok(self.values[(index % self.values.len() as u64) as usize])
    }
}

/// Square-wave source on the external clock input.
///
/// Produces edges every `period_us` starting at `first_edge_us`, optionally
/// stopping after a fixed number of edges to simulate a disconnected cable.
/// Polls whose index falls in a failure window return an error and lose
/// nothing: the edge is reported by the next good poll.
#[derive(Debug, Clone)]
pub struct SimulatedExternalClock {
    clock: MonotonicClock,
    next_edge_us: u64,
    period_us: u64,
    remaining: Option<u64>,
    failures: Vec<Range<u64>>,
    polls: u64,
}

impl SimulatedExternalClock {
    pub fn new(clock: MonotonicClock, first_edge_us: u64, period_us: u64) -> Self {
        Self {
            clock,
            next_edge_us: first_edge_us,
            period_us: period_us.max(1),
            remaining: None,
            failures: Vec::new(),
            polls: 0,
        }
    }

    /// Stop after `edges` edges
    pub fn with_edge_count(mut self, edges: u64) -> Self {
        self.remaining = Some(edges);
        self
    }

    /// Fail the polls with index in `polls` (0-based)
    pub fn failing(mut self, polls: Range<u64>) -> Self {
        self.failures.push(polls);
        self
    }
}

impl EdgeInput for SimulatedExternalClock {
    fn poll_edge(&mut self) -> Result<Option<u64>, SensorError> {
        let index = self.polls;
        self.polls += 1;

        if self.failures.iter().any(|window| window.contains(&index)) {
            return Err(SensorError::ReadFailed(format!("simulated edge failure on poll {}", index)));
        }
        if self.remaining == Some(0) || self.next_edge_us > self.clock.now_us() {
            return Ok(None);
        }
        let edge = self.next_edge_us;
        self.next_edge_us += self.period_us;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Ok(Some(edge))
    }
}

/// Sink that records every fire
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    fires: Vec<(u8, u64)>,
}

impl RecordingSink {
    pub fn fires(&self) -> &[(u8, u64)] {
        &self.fires
    }

    pub fn count_for(&self, lane: u8) -> usize {
        self.fires.iter().filter(|(l, _)| *l == lane).count()
    }

    pub fn clear(&mut self) {
        self.fires.clear();
    }
}

impl TriggerSink for RecordingSink {
    fn fire(&mut self, lane: u8, timestamp_us: u64) {
        self.fires.push((lane, timestamp_us));
    }
}

/// Sink that traces each fire and keeps per-lane totals
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    totals: [u64; MAX_LANES as usize],
}

impl LogSink {
    pub fn totals(&self) -> &[u64] {
        &self.totals
    }
}

impl TriggerSink for LogSink {
    fn fire(&mut self, lane: u8, timestamp_us: u64) {
        if let Some(total) = self.totals.get_mut(lane as usize) {
            *total += 1;
        }
        tracing::trace!(lane, timestamp_us, "trigger");
    }
}
