//! End-to-end tests: timing core and controller wired through the channel
//!
//! Time is driven by hand so every run is deterministic, except for the
//! runtime smoke test at the bottom which uses real threads.

use dual_sequencer::sim::{RecordingSink, SimulatedPot};
use dual_sequencer::timing::NoEdges;
use dual_sequencer::{
    ClockSource, MonotonicClock, Runtime, RuntimeOptions, SequencerConfig, SequencerController,
    TimingCore, TriggerPattern, create_channel,
};

type Pair = (
    TimingCore<SimulatedPot, NoEdges>,
    SequencerController<RecordingSink>,
);

fn wire(config: &SequencerConfig, pot: SimulatedPot) -> Pair {
    let (timing_end, control_end) = create_channel(
        config.channel.timing_to_control,
        config.channel.control_to_timing,
    );
    (
        TimingCore::new(config, timing_end, pot, NoEdges),
        SequencerController::new(config, control_end, RecordingSink::default()),
    )
}

#[test]
fn test_four_step_pattern_fires_on_first_and_third_tick() {
    let config = SequencerConfig::default();
    assert_eq!(config.clock.bpm_default, 120.0);
    let (mut timing, mut controller) = wire(&config, SimulatedPot::constant(0));

    controller
        .edit_pattern(TriggerPattern::from_lanes(&[[true], [false], [true], [false]]))
        .unwrap();

    timing.start(0);
    // 120 BPM, one tick every 500 ms
    for now in [0, 500_000, 1_000_000, 1_500_000] {
        timing.poll(now);
        controller.run_pass();
    }

    let stats = controller.scheduler().stats();
    assert_eq!(stats.ticks_processed, 4);
    assert_eq!(stats.lanes_fired, 2);
    assert_eq!(controller.sink().fires(), &[(0, 0), (0, 1_000_000)]);
    assert_eq!(timing.status().pattern_len, 4);
}

#[test]
fn test_potentiometer_drives_tempo() {
    let mut config = SequencerConfig::default();
    config.sampler.decimation_factor = 1;
    config.sampler.window_size = 1;
    let (mut timing, mut controller) = wire(&config, SimulatedPot::constant(3311));

    timing.start(0);
    timing.poll(0);
    controller.run_pass();

    assert!(controller.request_potentiometer());
    timing.poll(10);
    controller.run_pass();
    assert_eq!(controller.bpm(), 200.0);

    // The ClockUpdate reaches the timing context on its next pass
    timing.poll(20);
    assert_eq!(timing.clock().bpm(), 200.0);
    assert_eq!(timing.clock().internal_period_us(), 300_000);
}

#[test]
fn test_decimated_average_reaches_controller() {
    let mut config = SequencerConfig::default();
    config.sampler.decimation_factor = 4;
    config.sampler.window_size = 3;
    config.controller.pot_controls_tempo = false;
    let values: Vec<u16> = (1..=12).collect();
    let (mut timing, mut controller) = wire(&config, SimulatedPot::new(values));

    timing.start(0);
    for i in 0..12 {
        timing.poll(i * config.sampler.sample_period_us);
    }
    controller.request_potentiometer();
    timing.poll(12 * config.sampler.sample_period_us);
    controller.run_pass();

    // Kept samples are 4, 8 and 12; the mean of all raw samples would be 6.5
    assert_eq!(controller.status().last_pot_value, Some(8));
    assert_eq!(controller.bpm(), 120.0);
}

#[test]
fn test_sensor_failures_reported_to_controller() {
    let mut config = SequencerConfig::default();
    config.sampler.decimation_factor = 1;
    config.sampler.sensor_failure_threshold = 3;
    let pot = SimulatedPot::constant(1000).failing(1..4);
    let (mut timing, mut controller) = wire(&config, pot);

    timing.start(0);
    let period = config.sampler.sample_period_us;
    for i in 0..4 {
        timing.poll(i * period);
    }
    controller.run_pass();
    assert!(controller.status().sensor_degraded);

    // Fifth read succeeds
    timing.poll(4 * period);
    controller.run_pass();
    let status = controller.status();
    assert!(!status.sensor_degraded);
    assert_eq!(status.sensor_errors, 3);
}

#[test]
fn test_status_exchange() {
    let config = SequencerConfig::default();
    let (mut timing, mut controller) = wire(&config, SimulatedPot::constant(0));
    controller.set_preferred_source(ClockSource::Internal);

    timing.start(0);
    timing.poll(0);
    timing.poll(500_000);
    assert!(controller.request_status());
    timing.poll(600_000);
    controller.run_pass();

    let status = controller.status();
    let report = status.timing.expect("status report");
    assert_eq!(report.ticks_emitted, 2);
    assert_eq!(report.source, ClockSource::Internal);
    assert_eq!(status.scheduler.ticks_processed, 2);
}

#[test]
fn test_runtime_threads_deliver_every_tick() {
    let mut config = SequencerConfig::default();
    config.clock.bpm_default = 240.0;
    let (timing, mut controller) = wire(&config, SimulatedPot::constant(0));
    controller
        .edit_pattern(TriggerPattern::simple("1", config.scheduler.lanes).unwrap())
        .unwrap();

    let options = RuntimeOptions {
        pot_request_interval: None,
        ..RuntimeOptions::default()
    };
    let runtime = Runtime::spawn(timing, controller, MonotonicClock::new(), options).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(300));
    let report = runtime.stop().unwrap();

    assert!(report.timing.ticks_emitted >= 1);
    assert_eq!(report.timing.dropped_ticks, 0);
    assert_eq!(
        report.controller.scheduler.ticks_processed,
        report.timing.ticks_emitted
    );
    assert_eq!(
        report.sink.count_for(0) as u64,
        report.controller.scheduler.ticks_processed
    );
}
