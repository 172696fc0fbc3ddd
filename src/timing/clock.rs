// Clock Engine - Tick generation from the internal oscillator or an external clock
//
// Runs in the timing context. Ticks are numbered from start and carry no step
// information; mapping ticks to pattern steps is the control context's job.

use crate::config::ClockConfig;
use crate::messaging::{ClockSource, Message, TimingEndpoint};
use crate::timing::io::EdgeInput;

/// Upper bound on edges consumed in one poll, keeps a pass bounded in time
const MAX_EDGES_PER_POLL: usize = 16;

/// Engine lifecycle. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running(ClockSource),
}

/// Clock state owned by the timing context
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockState {
    pub source: ClockSource,
    pub bpm: f32,
    pub last_external_edge_us: Option<u64>,
    pub external_timeout_us: u64,
}

/// Tick period in microseconds for a tempo
pub fn period_for_bpm(bpm: f32, steps_per_beat: u32) -> u64 {
    let period = 60_000_000.0 / bpm as f64 / steps_per_beat.max(1) as f64;
    (period as u64).max(1)
}

/// Tempo for a tick period in microseconds
pub fn bpm_for_period(period_us: u64, steps_per_beat: u32) -> f32 {
    (60_000_000.0 / (period_us.max(1) as f64 * steps_per_beat.max(1) as f64)) as f32
}

pub struct ClockEngine {
    config: ClockConfig,
    state: EngineState,
    clock: ClockState,
    preferred: ClockSource,

    /// Next internal tick deadline (absolute grid)
    next_tick_us: u64,
    /// Ticks produced since start, sent or not
    tick_count: u64,
    external_period_us: Option<u64>,
    /// Edge timestamps collected while trying to lock
    candidate_edges: Vec<u64>,

    dropped_ticks: u64,
    dropped_events: u64,
    late_ticks: u64,
    edge_errors: u64,
}

impl ClockEngine {
    pub fn new(config: &ClockConfig) -> Self {
        let bpm = config.bpm_default.clamp(config.min_bpm, config.max_bpm);
        Self {
            config: config.clone(),
            state: EngineState::Idle,
            clock: ClockState {
                source: ClockSource::Internal,
                bpm,
                last_external_edge_us: None,
                external_timeout_us: config
                    .external_timeout_us
                    .unwrap_or(config.external_timeout_floor_us),
            },
            preferred: config.preferred_source,
            next_tick_us: 0,
            tick_count: 0,
            external_period_us: None,
            candidate_edges: Vec::with_capacity(config.external_lock_edges.max(2) as usize),
            dropped_ticks: 0,
            dropped_events: 0,
            late_ticks: 0,
            edge_errors: 0,
        }
    }

    /// Explicit reconfiguration: discards all clock state and returns to Idle
    pub fn reconfigure(&mut self, config: &ClockConfig) {
        *self = Self::new(config);
    }

    /// Start on the internal clock. The first tick is due at `now_us`.
    pub fn start(&mut self, now_us: u64) {
        if self.state != EngineState::Idle {
            return;
        }
        self.state = EngineState::Running(ClockSource::Internal);
        self.clock.source = ClockSource::Internal;
        self.next_tick_us = now_us;
        tracing::info!(bpm = self.clock.bpm, "clock engine started");
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn clock_state(&self) -> ClockState {
        self.clock
    }

    pub fn source(&self) -> ClockSource {
        self.clock.source
    }

    pub fn bpm(&self) -> f32 {
        self.clock.bpm
    }

    pub fn preferred_source(&self) -> ClockSource {
        self.preferred
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Internal deadlines skipped because a poll came more than a period late
    pub fn late_ticks(&self) -> u64 {
        self.late_ticks
    }

    /// Failed reads of the edge input
    pub fn edge_errors(&self) -> u64 {
        self.edge_errors
    }

    pub fn external_period_us(&self) -> Option<u64> {
        self.external_period_us
    }

    /// Current internal tick period
    pub fn internal_period_us(&self) -> u64 {
        period_for_bpm(self.clock.bpm, self.config.steps_per_beat)
    }

    /// Earliest time the engine needs to be polled again
    pub fn next_deadline_us(&self) -> Option<u64> {
        match self.state {
            EngineState::Idle => None,
            EngineState::Running(ClockSource::Internal) => Some(self.next_tick_us),
            EngineState::Running(ClockSource::External) => self
                .clock
                .last_external_edge_us
                .map(|edge| edge.saturating_add(self.clock.external_timeout_us)),
        }
    }

    /// Apply a `ClockUpdate` from the control context.
    ///
    /// `source` is the preferred source: `External` allows locking to an
    /// external clock, `Internal` forces the internal clock and demotes a
    /// running external lock immediately. While locked externally the
    /// external clock owns the tempo and `bpm` is ignored.
    pub fn apply_update(&mut self, bpm: f32, source: ClockSource, now_us: u64, tx: &mut TimingEndpoint) {
        self.preferred = source;

        if source == ClockSource::Internal {
            self.candidate_edges.clear();
            if self.clock.source == ClockSource::External {
                tracing::info!("external clock disabled by control, switching to internal");
                self.fall_back(now_us, tx);
            }
        }

        if self.clock.source == ClockSource::Internal && bpm.is_finite() {
            self.set_bpm(bpm);
        }
    }

    /// Set the internal tempo (clamped to the configured range).
    /// The already scheduled deadline is kept, later ones use the new period.
    pub fn set_bpm(&mut self, bpm: f32) {
        self.clock.bpm = bpm.clamp(self.config.min_bpm, self.config.max_bpm);
    }

    /// One timing-context pass: consume edges, check the external timeout,
    /// then emit the internal tick if due.
    pub fn poll(&mut self, now_us: u64, edges: &mut impl EdgeInput, tx: &mut TimingEndpoint) {
        if self.state == EngineState::Idle {
            return;
        }

        // External edges are handled first so they win over an internal deadline at the same instant
        for _ in 0..MAX_EDGES_PER_POLL {
            match edges.poll_edge() {
                Ok(Some(edge_us)) => self.on_edge(edge_us, tx),
                Ok(None) => break,
                Err(err) => {
                    // The timeout still runs, a dead input ends in fallback
                    self.edge_errors += 1;
                    tracing::debug!(%err, "edge input read failed");
                    break;
                }
            }
        }

        self.check_timeout(now_us, tx);

        if self.clock.source == ClockSource::Internal && now_us >= self.next_tick_us {
            let deadline = self.next_tick_us;
            self.emit_tick(deadline, tx);

            let period = self.internal_period_us();
            self.next_tick_us = deadline + period;
            if now_us >= self.next_tick_us {
                let skipped = (now_us - self.next_tick_us) / period + 1;
                self.late_ticks += skipped;
                self.next_tick_us += skipped * period;
            }
        }
    }

    /// Handle one rising edge of the external clock input
    pub fn on_edge(&mut self, edge_us: u64, tx: &mut TimingEndpoint) {
        if self.state == EngineState::Idle || self.preferred == ClockSource::Internal {
            return;
        }

        let (min_period, max_period) = self.plausible_period_range();

        if self.clock.source == ClockSource::External {
            let Some(last) = self.clock.last_external_edge_us else {
                return;
            };
            let interval = edge_us.saturating_sub(last);
            if interval < min_period {
                // Contact bounce
                return;
            }
            if interval > self.clock.external_timeout_us {
                // Silence outlasted the timeout before this edge arrived
                self.fall_back(last + self.clock.external_timeout_us, tx);
                self.collect_candidate(edge_us, tx);
                return;
            }
            if interval <= max_period {
                self.track_period(interval);
            }
            self.clock.last_external_edge_us = Some(edge_us);
            self.emit_tick(edge_us, tx);
            return;
        }

        self.collect_candidate(edge_us, tx);
    }

    fn collect_candidate(&mut self, edge_us: u64, tx: &mut TimingEndpoint) {
        let (min_period, max_period) = self.plausible_period_range();

        if let Some(&last) = self.candidate_edges.last() {
            let interval = edge_us.saturating_sub(last);
            if interval < min_period {
                return;
            }
            if interval > max_period {
                self.candidate_edges.clear();
                self.candidate_edges.push(edge_us);
                return;
            }

            if let &[first, second, ..] = self.candidate_edges.as_slice() {
                let reference = (second - first) as f32;
                let deviation = (interval as f32 - reference).abs() / reference;
                if deviation > self.config.external_tolerance {
                    // Restart the lock window from the newest interval
                    self.candidate_edges.clear();
                    self.candidate_edges.push(last);
                }
            }
        }

        self.candidate_edges.push(edge_us);

        // One interval is the least a period can be measured from
        let needed = self.config.external_lock_edges.max(2) as usize;
        if self.candidate_edges.len() >= needed {
            let first = self.candidate_edges[0];
            let intervals = (self.candidate_edges.len() - 1) as u64;
            let period = (edge_us - first) / intervals;
            self.candidate_edges.clear();
            self.lock_external(edge_us, period, tx);
        }
    }

    fn lock_external(&mut self, edge_us: u64, period_us: u64, tx: &mut TimingEndpoint) {
        self.state = EngineState::Running(ClockSource::External);
        self.clock.source = ClockSource::External;
        self.clock.last_external_edge_us = Some(edge_us);
        self.track_period(period_us);

        tracing::info!(period_us, bpm = self.clock.bpm, "external clock locked");
        self.emit_event(
            Message::ExternalClockEvent {
                detected: true,
                period_us: Some(u32::try_from(period_us).unwrap_or(u32::MAX)),
                bpm: self.clock.bpm,
            },
            tx,
        );
        self.emit_tick(edge_us, tx);
    }

    fn track_period(&mut self, period_us: u64) {
        self.external_period_us = Some(period_us);
        self.clock.bpm = bpm_for_period(period_us, self.config.steps_per_beat);
        self.clock.external_timeout_us = self.config.external_timeout_us.unwrap_or_else(|| {
            (3 * period_us).max(self.config.external_timeout_floor_us)
        });
    }

    fn check_timeout(&mut self, now_us: u64, tx: &mut TimingEndpoint) {
        if self.clock.source != ClockSource::External {
            return;
        }
        if let Some(last) = self.clock.last_external_edge_us {
            if now_us.saturating_sub(last) > self.clock.external_timeout_us {
                tracing::info!(
                    silence_us = now_us - last,
                    bpm = self.clock.bpm,
                    "external clock lost, falling back to internal"
                );
                self.fall_back(now_us, tx);
            }
        }
    }

    /// External → Internal, keeping the last known tempo
    fn fall_back(&mut self, at_us: u64, tx: &mut TimingEndpoint) {
        self.state = EngineState::Running(ClockSource::Internal);
        self.clock.source = ClockSource::Internal;
        self.clock.last_external_edge_us = None;
        self.clock.bpm = self.clock.bpm.clamp(self.config.min_bpm, self.config.max_bpm);
        self.external_period_us = None;
        self.candidate_edges.clear();
        self.next_tick_us = at_us + self.internal_period_us();

        self.emit_event(
            Message::ExternalClockEvent {
                detected: false,
                period_us: None,
                bpm: self.clock.bpm,
            },
            tx,
        );
    }

    fn plausible_period_range(&self) -> (u64, u64) {
        let spb = self.config.steps_per_beat;
        (
            period_for_bpm(self.config.max_bpm, spb),
            period_for_bpm(self.config.min_bpm, spb),
        )
    }

    /// Drop-and-count: a tick that cannot be enqueued is lost, never retried
    fn emit_tick(&mut self, timestamp_us: u64, tx: &mut TimingEndpoint) {
        let msg = Message::ClockTick {
            step_index: self.tick_count,
            timestamp_us,
        };
        self.tick_count += 1;
        if tx.send(msg).is_err() {
            self.dropped_ticks += 1;
        }
    }

    fn emit_event(&mut self, msg: Message, tx: &mut TimingEndpoint) {
        if tx.send(msg).is_err() {
            self.dropped_events += 1;
            tracing::warn!("clock event dropped, channel full");
        }
    }
}
