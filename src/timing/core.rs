// Timing Core - One pass of the timing context
//
// Owns the clock engine, the sampler, the hardware collaborators and the
// timing side of the channel. Nothing in here is shared with the control context.

use crate::config::SequencerConfig;
use crate::messaging::{Message, TimingEndpoint, TimingStatus};
use crate::timing::clock::ClockEngine;
use crate::timing::io::{AnalogInput, EdgeInput};
use crate::timing::sampler::SignalSampler;

pub struct TimingCore<A, E> {
    clock: ClockEngine,
    sampler: SignalSampler,
    endpoint: TimingEndpoint,
    analog: A,
    edges: E,

    /// Inbound messages handled per pass
    max_inbound_per_pass: usize,
    pattern_len: usize,
    status_requested: bool,
    passes: u64,
}

impl<A: AnalogInput, E: EdgeInput> TimingCore<A, E> {
    pub fn new(config: &SequencerConfig, endpoint: TimingEndpoint, analog: A, edges: E) -> Self {
        Self {
            clock: ClockEngine::new(&config.clock),
            sampler: SignalSampler::new(&config.sampler),
            endpoint,
            analog,
            edges,
            max_inbound_per_pass: config.channel.control_to_timing.max(1),
            pattern_len: 1,
            status_requested: false,
            passes: 0,
        }
    }

    pub fn start(&mut self, now_us: u64) {
        self.clock.start(now_us);
    }

    /// Run one pass: inbound commands, clock, sampler, status reply
    pub fn poll(&mut self, now_us: u64) {
        self.passes += 1;

        for _ in 0..self.max_inbound_per_pass {
            match self.endpoint.try_receive() {
                Some(msg) => self.handle(msg, now_us),
                None => break,
            }
        }

        self.clock.poll(now_us, &mut self.edges, &mut self.endpoint);
        self.sampler.poll(now_us, &mut self.analog, &mut self.endpoint);

        if self.status_requested {
            let report = Message::StatusReport(self.status());
            if self.endpoint.send(report).is_ok() {
                self.status_requested = false;
            }
        }
    }

    fn handle(&mut self, msg: Message, now_us: u64) {
        match msg {
            Message::ClockUpdate { bpm, source } => {
                self.clock.apply_update(bpm, source, now_us, &mut self.endpoint);
            }
            Message::TriggerPattern { steps } => {
                self.pattern_len = steps.len();
            }
            Message::PotentiometerRequest => {
                self.sampler.request();
            }
            Message::StatusRequest => {
                self.status_requested = true;
            }
            other => {
                tracing::debug!(kind = other.kind(), "unexpected message on control-to-timing queue");
            }
        }
    }

    pub fn status(&self) -> TimingStatus {
        TimingStatus {
            source: self.clock.source(),
            bpm: self.clock.bpm(),
            ticks_emitted: self.clock.tick_count(),
            dropped_ticks: self.clock.dropped_ticks(),
            dropped_events: self.clock.dropped_events(),
            late_ticks: self.clock.late_ticks(),
            sensor_errors: self.sampler.error_count(),
            edge_errors: self.clock.edge_errors(),
            decimated_samples: self.sampler.decimated_samples(),
            pattern_len: self.pattern_len,
        }
    }

    /// Earliest time a pass has work to do
    pub fn next_deadline_us(&self) -> Option<u64> {
        match (self.clock.next_deadline_us(), self.sampler.next_deadline_us()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn clock(&self) -> &ClockEngine {
        &self.clock
    }

    pub fn sampler(&self) -> &SignalSampler {
        &self.sampler
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }
}
