// Trigger Scheduler - Advances the step cursor on each clock tick and fires lanes
//
// Runs in the control context and owns the active pattern exclusively.

use crate::config::SchedulerConfig;
use crate::sequencer::pattern::{InvalidPattern, MAX_LANES, StepMask, TriggerPattern};
use serde::Serialize;

/// Display/trigger output collaborator.
/// Called on the tick path, so it must not block.
pub trait TriggerSink {
    fn fire(&mut self, lane: u8, timestamp_us: u64);
}

impl<T: TriggerSink + ?Sized> TriggerSink for &mut T {
    fn fire(&mut self, lane: u8, timestamp_us: u64) {
        (**self).fire(lane, timestamp_us);
    }
}

/// Read-only counters for observability
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SchedulerStats {
    pub ticks_processed: u64,
    pub lanes_fired: u64,
    pub lane_counts: [u64; MAX_LANES as usize],
    pub last_fire_us: [Option<u64>; MAX_LANES as usize],
}

pub struct TriggerScheduler {
    pattern: TriggerPattern,
    cursor: u64,
    enabled: bool,
    max_steps: usize,
    lane_count: u8,
    /// One-shot lanes for the next tick
    scheduled: StepMask,
    stats: SchedulerStats,
}

impl TriggerScheduler {
    /// Create a scheduler holding a single silent step
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            pattern: TriggerPattern::silent(),
            cursor: 0,
            enabled: config.start_enabled,
            max_steps: config.max_steps,
            lane_count: config.lanes.min(MAX_LANES as u8),
            scheduled: StepMask::EMPTY,
            stats: SchedulerStats::default(),
        }
    }

    /// Replace the pattern and restart at step 0.
    ///
    /// On error the previous pattern and cursor are untouched.
    pub fn set_pattern(&mut self, pattern: TriggerPattern) -> Result<(), InvalidPattern> {
        pattern.validate(self.max_steps)?;
        self.pattern = pattern;
        self.cursor = 0;
        Ok(())
    }

    pub fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Arm or disarm a one-shot trigger on `lane` for the next tick
    pub fn schedule_trigger(&mut self, lane: u8, on: bool) {
        if lane < self.lane_count {
            self.scheduled = self.scheduled.with_lane(lane, on);
        }
    }

    /// Replace the armed one-shot lanes
    pub fn schedule_triggers(&mut self, lanes: StepMask) {
        self.scheduled = lanes;
    }

    /// One-shot lanes armed for the next tick
    pub fn scheduled(&self) -> StepMask {
        self.scheduled
    }

    /// Handle one clock tick.
    ///
    /// Returns the step index that was played. Disabled schedulers still
    /// consume the tick and advance the cursor, but fire only the one-shot
    /// lanes armed with [`schedule_trigger`](Self::schedule_trigger).
    pub fn on_tick(&mut self, timestamp_us: u64, sink: &mut impl TriggerSink) -> usize {
        let step = self.current_step();
        self.stats.ticks_processed += 1;

        let pattern_mask = if self.enabled {
            self.pattern.step(step).unwrap_or(StepMask::EMPTY)
        } else {
            StepMask::EMPTY
        };
        let mask = StepMask::from_bits(pattern_mask.bits() | self.scheduled.bits());
        self.scheduled = StepMask::EMPTY;

        let lane_count = self.lane_count;
        for lane in mask.lanes().take_while(|lane| *lane < lane_count) {
            sink.fire(lane, timestamp_us);
            self.stats.lanes_fired += 1;
            self.stats.lane_counts[lane as usize] += 1;
            self.stats.last_fire_us[lane as usize] = Some(timestamp_us);
        }

        self.cursor += 1;
        step
    }

    /// Step the next tick will play
    pub fn current_step(&self) -> usize {
        (self.cursor % self.pattern.len() as u64) as usize
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn pattern(&self) -> &TriggerPattern {
        &self.pattern
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats = SchedulerStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<(u8, u64)>);

    impl TriggerSink for Recorder {
        fn fire(&mut self, lane: u8, timestamp_us: u64) {
            self.0.push((lane, timestamp_us));
        }
    }

    fn scheduler() -> TriggerScheduler {
        TriggerScheduler::new(&SchedulerConfig {
            max_steps: 8,
            lanes: 7,
            start_enabled: true,
        })
    }

    #[test]
    fn test_initial_pattern_is_silent() {
        let mut sched = scheduler();
        let mut sink = Recorder::default();

        assert_eq!(sched.pattern().len(), 1);
        sched.on_tick(0, &mut sink);
        assert!(sink.0.is_empty());
        assert_eq!(sched.stats().ticks_processed, 1);
    }

    #[test]
    fn test_cursor_wraps_pattern() {
        let mut sched = scheduler();
        let mut sink = Recorder::default();
        sched.set_pattern(TriggerPattern::simple("100", 1).unwrap()).unwrap();

        let steps: Vec<usize> = (0..7).map(|i| sched.on_tick(i, &mut sink)).collect();
        assert_eq!(steps, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(sink.0, vec![(0, 0), (0, 3), (0, 6)]);
        assert_eq!(sched.cursor(), 7);
    }

    #[test]
    fn test_multiple_lanes_fire_in_order() {
        let mut sched = scheduler();
        let mut sink = Recorder::default();
        sched
            .set_pattern(TriggerPattern::new(vec![StepMask::from_bits(0b100_1010)]))
            .unwrap();

        sched.on_tick(42, &mut sink);
        assert_eq!(sink.0, vec![(1, 42), (3, 42), (6, 42)]);
        assert_eq!(sched.stats().lanes_fired, 3);
        assert_eq!(sched.stats().lane_counts[3], 1);
        assert_eq!(sched.stats().last_fire_us[6], Some(42));
    }

    #[test]
    fn test_lanes_beyond_outputs_are_not_fired() {
        let mut sched = scheduler();
        let mut sink = Recorder::default();
        sched
            .set_pattern(TriggerPattern::new(vec![StepMask::from_bits(0b1000_0001)]))
            .unwrap();

        sched.on_tick(0, &mut sink);
        assert_eq!(sink.0, vec![(0, 0)]);
    }

    #[test]
    fn test_set_pattern_restarts_at_zero() {
        let mut sched = scheduler();
        let mut sink = Recorder::default();
        sched.set_pattern(TriggerPattern::alternating(0, 4)).unwrap();
        for i in 0..3 {
            sched.on_tick(i, &mut sink);
        }
        assert_eq!(sched.current_step(), 3);

        sched.set_pattern(TriggerPattern::alternating(2, 2)).unwrap();
        assert_eq!(sched.cursor(), 0);
        assert_eq!(sched.on_tick(10, &mut sink), 0);
    }

    #[test]
    fn test_invalid_pattern_leaves_state() {
        let mut sched = scheduler();
        let mut sink = Recorder::default();
        let original = TriggerPattern::alternating(0, 4);
        sched.set_pattern(original.clone()).unwrap();
        sched.on_tick(0, &mut sink);
        sched.on_tick(1, &mut sink);

        assert_eq!(
            sched.set_pattern(TriggerPattern::new(vec![])),
            Err(InvalidPattern::Empty)
        );
        assert_eq!(
            sched.set_pattern(TriggerPattern::alternating(0, 9)),
            Err(InvalidPattern::TooLong { len: 9, max: 8 })
        );
        assert_eq!(sched.pattern(), &original);
        assert_eq!(sched.cursor(), 2);
    }

    #[test]
    fn test_disabled_consumes_ticks_silently() {
        let mut sched = scheduler();
        let mut sink = Recorder::default();
        sched.set_pattern(TriggerPattern::simple("1111", 1).unwrap()).unwrap();

        sched.enable(false);
        sched.on_tick(0, &mut sink);
        sched.on_tick(1, &mut sink);
        assert!(sink.0.is_empty());
        assert_eq!(sched.cursor(), 2);
        assert_eq!(sched.stats().ticks_processed, 2);

        sched.enable(true);
        assert_eq!(sched.on_tick(2, &mut sink), 2);
        assert_eq!(sink.0, vec![(0, 2)]);
    }

    #[test]
    fn test_one_shot_triggers_fire_once() {
        let mut sched = scheduler();
        let mut sink = Recorder::default();
        sched.set_pattern(TriggerPattern::simple("10", 1).unwrap()).unwrap();

        sched.schedule_trigger(0, true);
        sched.schedule_trigger(4, true);
        sched.schedule_trigger(9, true);
        assert_eq!(sched.scheduled(), StepMask::single(0).with_lane(4, true));

        // Merged with the pattern step, lane 0 fires once
        sched.on_tick(0, &mut sink);
        assert_eq!(sink.0, vec![(0, 0), (4, 0)]);
        assert_eq!(sched.scheduled(), StepMask::EMPTY);

        sched.on_tick(1, &mut sink);
        assert_eq!(sink.0.len(), 2);
    }

    #[test]
    fn test_one_shot_triggers_fire_while_disabled() {
        let mut sched = scheduler();
        let mut sink = Recorder::default();
        sched.set_pattern(TriggerPattern::simple("1", 7).unwrap()).unwrap();
        sched.enable(false);

        sched.schedule_triggers(StepMask::single(2).with_lane(5, true));
        sched.schedule_trigger(5, false);
        sched.on_tick(7, &mut sink);
        assert_eq!(sink.0, vec![(2, 7)]);
        assert_eq!(sched.stats().lane_counts[2], 1);
    }

    #[test]
    fn test_reset_statistics() {
        let mut sched = scheduler();
        let mut sink = Recorder::default();
        sched.set_pattern(TriggerPattern::simple("1", 2).unwrap()).unwrap();
        sched.on_tick(0, &mut sink);
        assert_eq!(sched.stats().lanes_fired, 2);

        sched.reset_statistics();
        assert_eq!(sched.stats(), &SchedulerStats::default());
        // Cursor is pattern state, not a statistic
        assert_eq!(sched.cursor(), 1);
    }
}
