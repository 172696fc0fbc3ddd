// Sequencer Controller - Control-context orchestration
//
// Drains the channel in bounded passes, routes ticks to the scheduler, keeps
// mirrors of the timing context's clock state, and maps potentiometer
// readings to tempo. The only writer of pattern edits.

use crate::config::{ControllerConfig, SequencerConfig};
use crate::messaging::{ChannelError, ClockSource, ControlEndpoint, Message, TimingStatus};
use crate::sequencer::pattern::{InvalidPattern, StepMask, TriggerPattern};
use crate::sequencer::scheduler::{SchedulerStats, TriggerScheduler, TriggerSink};
use serde::Serialize;

/// Linear map from raw potentiometer readings to tempo
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BpmMapping {
    pub raw_min: u16,
    pub raw_max: u16,
    pub min_bpm: f32,
    pub max_bpm: f32,
}

impl BpmMapping {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            raw_min: config.pot_raw_min,
            raw_max: config.pot_raw_max,
            min_bpm: config.pot_min_bpm,
            max_bpm: config.pot_max_bpm,
        }
    }

    /// Readings outside `[raw_min, raw_max]` clamp to the ends of the range
    pub fn map(&self, raw: u16) -> f32 {
        let span = self.raw_max.saturating_sub(self.raw_min).max(1) as f32;
        let normalized = (raw.clamp(self.raw_min, self.raw_max) - self.raw_min) as f32 / span;
        self.min_bpm + normalized * (self.max_bpm - self.min_bpm)
    }
}

/// Result of one control-loop pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassReport {
    pub processed: usize,
    /// Messages left for the next pass
    pub remaining: usize,
}

/// Snapshot of the control context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub bpm: f32,
    pub clock_source: ClockSource,
    pub preferred_source: ClockSource,
    pub external_period_us: Option<u32>,
    pub last_pot_value: Option<u16>,
    pub sensor_degraded: bool,
    pub sensor_errors: u32,
    pub enabled: bool,
    pub current_step: usize,
    pub pattern_len: usize,
    pub scheduler: SchedulerStats,
    pub timing: Option<TimingStatus>,
    pub passes: u64,
    pub messages_processed: u64,
    /// Tick numbers skipped upstream (ticks dropped on a full channel)
    pub missed_ticks: u64,
    pub dropped_requests: u64,
    pub clock_updates_sent: u64,
}

pub struct SequencerController<S: TriggerSink> {
    endpoint: ControlEndpoint,
    scheduler: TriggerScheduler,
    sink: S,

    mapping: BpmMapping,
    hysteresis_bpm: f32,
    max_messages_per_pass: usize,
    pot_controls_tempo: bool,
    min_bpm: f32,
    max_bpm: f32,

    // Mirrors of timing-context state, updated only from messages
    bpm: f32,
    clock_source: ClockSource,
    preferred_source: ClockSource,
    external_period_us: Option<u32>,
    timing_status: Option<TimingStatus>,

    last_pot_value: Option<u16>,
    sensor_degraded: bool,
    sensor_errors: u32,

    // Outbound messages waiting for room (latest wins)
    pending_clock_update: Option<(f32, ClockSource)>,
    pending_pattern_mirror: Option<Vec<StepMask>>,

    next_tick_index: Option<u64>,
    passes: u64,
    messages_processed: u64,
    missed_ticks: u64,
    dropped_requests: u64,
    clock_updates_sent: u64,
}

impl<S: TriggerSink> SequencerController<S> {
    pub fn new(config: &SequencerConfig, endpoint: ControlEndpoint, sink: S) -> Self {
        Self {
            endpoint,
            scheduler: TriggerScheduler::new(&config.scheduler),
            sink,
            mapping: BpmMapping::from_config(&config.controller),
            hysteresis_bpm: config.controller.hysteresis_bpm,
            max_messages_per_pass: config.controller.max_messages_per_pass.max(1),
            pot_controls_tempo: config.controller.pot_controls_tempo,
            min_bpm: config.clock.min_bpm,
            max_bpm: config.clock.max_bpm,
            bpm: config.clock.bpm_default,
            clock_source: ClockSource::Internal,
            preferred_source: config.clock.preferred_source,
            external_period_us: None,
            timing_status: None,
            last_pot_value: None,
            sensor_degraded: false,
            sensor_errors: 0,
            pending_clock_update: None,
            pending_pattern_mirror: None,
            next_tick_index: None,
            passes: 0,
            messages_processed: 0,
            missed_ticks: 0,
            dropped_requests: 0,
            clock_updates_sent: 0,
        }
    }

    /// One control-loop pass.
    ///
    /// Handles at most `max_messages_per_pass` inbound messages; the rest stay
    /// queued for the next pass. Potentiometer values received in the same pass
    /// are coalesced and only the newest is mapped.
    pub fn run_pass(&mut self) -> PassReport {
        self.passes += 1;
        self.flush_outbound();

        let mut processed = 0;
        let mut latest_pot = None;
        while processed < self.max_messages_per_pass {
            let Some(msg) = self.endpoint.try_receive() else {
                break;
            };
            processed += 1;

            match msg {
                Message::PotentiometerValue { value } => latest_pot = Some(value),
                other => self.handle(other),
            }
        }
        self.messages_processed += processed as u64;

        if let Some(value) = latest_pot {
            self.on_potentiometer(value);
        }

        let report = PassReport {
            processed,
            remaining: self.endpoint.pending(),
        };
        if report.remaining > 0 {
            tracing::debug!(processed, remaining = report.remaining, "control pass saturated");
        }
        report
    }

    fn handle(&mut self, msg: Message) {
        match msg {
            Message::ClockTick {
                step_index,
                timestamp_us,
            } => {
                if let Some(expected) = self.next_tick_index {
                    self.missed_ticks += step_index.saturating_sub(expected);
                }
                self.next_tick_index = Some(step_index + 1);
                self.scheduler.on_tick(timestamp_us, &mut self.sink);
            }
            Message::ExternalClockEvent {
                detected,
                period_us,
                bpm,
            } => {
                // The engine's tempo after the transition replaces the mirror in both directions
                self.bpm = bpm;
                if detected {
                    self.clock_source = ClockSource::External;
                    self.external_period_us = period_us;
                    tracing::info!(bpm, "following external clock");
                } else {
                    self.clock_source = ClockSource::Internal;
                    self.external_period_us = None;
                    tracing::info!(bpm, "external clock lost, internal clock active");
                }
            }
            Message::PotentiometerValue { value } => self.on_potentiometer(value),
            Message::SensorHealth {
                degraded,
                error_count,
            } => {
                if degraded {
                    tracing::warn!(error_count, "analog input degraded, keeping last tempo");
                } else {
                    tracing::info!(error_count, "analog input recovered");
                }
                self.sensor_degraded = degraded;
                self.sensor_errors = error_count;
            }
            Message::StatusReport(status) => {
                self.clock_source = status.source;
                if status.source == ClockSource::Internal {
                    self.external_period_us = None;
                }
                self.bpm = status.bpm;
                self.timing_status = Some(status);
            }
            other => {
                tracing::debug!(kind = other.kind(), "unexpected message on timing-to-control queue");
            }
        }
    }

    fn on_potentiometer(&mut self, value: u16) {
        self.last_pot_value = Some(value);
        // An external clock owns the tempo while locked
        if !self.pot_controls_tempo || self.clock_source == ClockSource::External {
            return;
        }
        let target = self.mapping.map(value);
        if (target - self.bpm).abs() > self.hysteresis_bpm {
            self.set_bpm(target);
        }
    }

    /// Change the tempo and mirror it to the timing context.
    ///
    /// Returns false without touching anything while an external clock is
    /// locked, since the external clock owns the tempo then.
    pub fn set_bpm(&mut self, bpm: f32) -> bool {
        if self.clock_source == ClockSource::External {
            tracing::debug!(bpm, "tempo change ignored, external clock locked");
            return false;
        }
        self.bpm = bpm.clamp(self.min_bpm, self.max_bpm);
        self.pending_clock_update = Some((self.bpm, self.preferred_source));
        self.flush_outbound();
        true
    }

    /// `External` follows an external clock when one locks, `Internal` forces the internal clock
    pub fn set_preferred_source(&mut self, source: ClockSource) {
        self.preferred_source = source;
        self.pending_clock_update = Some((self.bpm, source));
        self.flush_outbound();
    }

    /// Install a pattern edit. The scheduler restarts at step 0 and the
    /// timing context receives a copy of the new pattern.
    pub fn edit_pattern(&mut self, pattern: TriggerPattern) -> Result<(), InvalidPattern> {
        let steps = pattern.steps().to_vec();
        self.scheduler.set_pattern(pattern)?;
        self.pending_pattern_mirror = Some(steps);
        self.flush_outbound();
        Ok(())
    }

    pub fn enable(&mut self, enabled: bool) {
        self.scheduler.enable(enabled);
    }

    /// Arm (or disarm) a one-shot trigger on `lane`. It fires with the next
    /// tick, on top of the pattern and even while the pattern is disabled.
    pub fn schedule_trigger(&mut self, lane: u8, on: bool) {
        self.scheduler.schedule_trigger(lane, on);
    }

    /// Replace every armed one-shot lane with `lanes`
    pub fn schedule_triggers(&mut self, lanes: StepMask) {
        self.scheduler.schedule_triggers(lanes);
    }

    /// Ask the timing context for a fresh averaged reading.
    /// Returns false (and counts the drop) if the request could not be queued.
    pub fn request_potentiometer(&mut self) -> bool {
        self.send_request(Message::PotentiometerRequest)
    }

    /// Ask the timing context for its counters
    pub fn request_status(&mut self) -> bool {
        self.send_request(Message::StatusRequest)
    }

    fn send_request(&mut self, msg: Message) -> bool {
        match self.endpoint.send(msg) {
            Ok(()) => true,
            Err(err) => {
                self.dropped_requests += 1;
                tracing::debug!(%err, "request dropped");
                false
            }
        }
    }

    /// Retry outbound messages that previously hit a full queue
    fn flush_outbound(&mut self) {
        if let Some((bpm, source)) = self.pending_clock_update {
            if self.endpoint.send(Message::ClockUpdate { bpm, source }).is_ok() {
                self.pending_clock_update = None;
                self.clock_updates_sent += 1;
            }
        }
        if let Some(steps) = self.pending_pattern_mirror.take() {
            if let Err(ChannelError::Full(Message::TriggerPattern { steps })) =
                self.endpoint.send(Message::TriggerPattern { steps })
            {
                self.pending_pattern_mirror = Some(steps);
            }
        }
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            bpm: self.bpm,
            clock_source: self.clock_source,
            preferred_source: self.preferred_source,
            external_period_us: self.external_period_us,
            last_pot_value: self.last_pot_value,
            sensor_degraded: self.sensor_degraded,
            sensor_errors: self.sensor_errors,
            enabled: self.scheduler.is_enabled(),
            current_step: self.scheduler.current_step(),
            pattern_len: self.scheduler.pattern().len(),
            scheduler: self.scheduler.stats().clone(),
            timing: self.timing_status,
            passes: self.passes,
            messages_processed: self.messages_processed,
            missed_ticks: self.missed_ticks,
            dropped_requests: self.dropped_requests,
            clock_updates_sent: self.clock_updates_sent,
        }
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn clock_source(&self) -> ClockSource {
        self.clock_source
    }

    pub fn has_pending_outbound(&self) -> bool {
        self.pending_clock_update.is_some() || self.pending_pattern_mirror.is_some()
    }

    pub fn scheduler(&self) -> &TriggerScheduler {
        &self.scheduler
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
