//! External clock lock and fallback, through the timing core and controller

use dual_sequencer::sim::{RecordingSink, SimulatedPot};
use dual_sequencer::timing::{ClockEngine, EdgeInput, SensorError};
use dual_sequencer::{
    ClockSource, Message, SequencerConfig, SequencerController, TimingCore, TriggerPattern,
    create_channel,
};
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Releases scripted edges once the shared clock has reached them
struct TimedEdges {
    now: Rc<Cell<u64>>,
    edges: VecDeque<u64>,
}

impl TimedEdges {
    fn new(now: &Rc<Cell<u64>>, edges: &[u64]) -> Self {
        Self {
            now: Rc::clone(now),
            edges: edges.iter().copied().collect(),
        }
    }
}

impl EdgeInput for TimedEdges {
    fn poll_edge(&mut self) -> Result<Option<u64>, SensorError> {
        match self.edges.front() {
            Some(&edge) if edge <= self.now.get() => Ok(self.edges.pop_front()),
            _ => Ok(None),
        }
    }
}

fn step(
    now: &Cell<u64>,
    t: u64,
    timing: &mut TimingCore<SimulatedPot, TimedEdges>,
    controller: &mut SequencerController<RecordingSink>,
) {
    now.set(t);
    timing.poll(t);
    controller.run_pass();
}

fn external_events(msgs: &[Message]) -> Vec<(bool, Option<u32>)> {
    msgs.iter()
        .filter_map(|m| match m {
            Message::ExternalClockEvent {
                detected,
                period_us,
                ..
            } => Some((*detected, *period_us)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_silence_beyond_timeout_emits_exactly_one_fallback() {
    let mut config = SequencerConfig::default();
    config.clock.external_timeout_us = Some(1_000_000);
    let (mut timing, mut control) = create_channel(256, 16);
    let mut engine = ClockEngine::new(&config.clock);
    let now = Rc::new(Cell::new(0));
    let mut edges = TimedEdges::new(&now, &[0, 500_000]);

    engine.start(0);
    for t in (0..=5_000_000).step_by(100_000) {
        now.set(t);
        engine.poll(t, &mut edges, &mut timing);
    }

    let out: Vec<Message> = std::iter::from_fn(|| control.try_receive()).collect();
    assert_eq!(external_events(&out), vec![(true, Some(500_000)), (false, None)]);
    assert_eq!(engine.source(), ClockSource::Internal);
    assert_eq!(engine.dropped_events(), 0);
}

#[test]
fn test_controller_follows_lock_and_fallback() {
    let mut config = SequencerConfig::default();
    config.clock.external_timeout_us = Some(1_000_000);
    config.controller.pot_controls_tempo = false;

    let (timing_end, control_end) = create_channel(64, 16);
    let now = Rc::new(Cell::new(0));
    // 150 BPM external clock for four edges, then the cable is pulled
    let edges = TimedEdges::new(&now, &[0, 400_000, 800_000, 1_200_000]);
    let mut timing = TimingCore::new(&config, timing_end, SimulatedPot::constant(0), edges);
    let mut controller =
        SequencerController::new(&config, control_end, RecordingSink::default());
    controller
        .edit_pattern(TriggerPattern::simple("1", 1).unwrap())
        .unwrap();

    timing.start(0);
    let mut sources = Vec::new();
    for t in (0..=3_000_000).step_by(100_000) {
        now.set(t);
        timing.poll(t);
        controller.run_pass();
        sources.push(controller.clock_source());
    }

    // Locked on the second edge, lost after 1 s of silence following the last
    assert_eq!(sources[3], ClockSource::Internal);
    assert_eq!(sources[4], ClockSource::External);
    assert_eq!(sources[22], ClockSource::External);
    assert_eq!(sources[23], ClockSource::Internal);
    assert!((controller.bpm() - 150.0).abs() < 0.01);

    // Internal tick at 0, edge ticks at 0.4, 0.8, 1.2 s, then internal again at 150 BPM
    let stamps: Vec<u64> = controller.sink().fires().iter().map(|(_, t)| *t).collect();
    assert_eq!(
        stamps,
        vec![0, 400_000, 800_000, 1_200_000, 2_700_000]
    );
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_forced_internal_ignores_external_clock() {
    let config = SequencerConfig::default();
    let (timing_end, control_end) = create_channel(64, 16);
    let now = Rc::new(Cell::new(0));
    let edges = TimedEdges::new(&now, &[0, 400_000, 800_000]);
    let mut timing = TimingCore::new(&config, timing_end, SimulatedPot::constant(0), edges);
    let mut controller =
        SequencerController::new(&config, control_end, RecordingSink::default());

    controller.set_preferred_source(ClockSource::Internal);
    timing.start(0);
    for t in (0..=1_000_000).step_by(100_000) {
        now.set(t);
        timing.poll(t);
        controller.run_pass();
    }

    assert_eq!(timing.clock().source(), ClockSource::Internal);
    assert_eq!(controller.clock_source(), ClockSource::Internal);
    assert_eq!(controller.scheduler().stats().ticks_processed, 3);
}

#[test]
fn test_tempo_mirror_matches_engine_after_fallback() {
    let mut config = SequencerConfig::default();
    config.controller.pot_controls_tempo = false;

    let (timing_end, control_end) = create_channel(64, 16);
    let now = Rc::new(Cell::new(0));
    let edges = TimedEdges::new(&now, &[0, 400_000, 800_000]);
    let mut timing = TimingCore::new(&config, timing_end, SimulatedPot::constant(0), edges);
    let mut controller =
        SequencerController::new(&config, control_end, RecordingSink::default());

    timing.start(0);
    for t in (0..=800_000).step_by(100_000) {
        step(&now, t, &mut timing, &mut controller);
    }
    assert_eq!(controller.clock_source(), ClockSource::External);

    // The external clock owns the tempo while locked
    assert!(!controller.set_bpm(90.0));

    // Default timeout is the 2 s floor
    for t in (900_000..=3_000_000).step_by(100_000) {
        step(&now, t, &mut timing, &mut controller);
    }
    assert_eq!(timing.clock().source(), ClockSource::Internal);
    assert_eq!(controller.clock_source(), ClockSource::Internal);
    assert_eq!(controller.bpm(), timing.clock().bpm());
    assert!((controller.bpm() - 150.0).abs() < 0.01);

    // Back on the internal clock the controller sets the tempo again
    assert!(controller.set_bpm(90.0));
    step(&now, 3_100_000, &mut timing, &mut controller);
    assert_eq!(timing.clock().bpm(), 90.0);
    assert_eq!(controller.bpm(), timing.clock().bpm());
}
