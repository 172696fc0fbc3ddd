// Runtime - Runs the timing and control contexts on two threads
//
// The channel is the only path for domain data between the threads. The
// stop flags only govern thread lifetime.

use crate::messaging::TimingStatus;
use crate::sequencer::controller::{ControllerStatus, SequencerController};
use crate::sequencer::scheduler::TriggerSink;
use crate::timing::core::TimingCore;
use crate::timing::io::{AnalogInput, EdgeInput};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Microsecond time base shared by both contexts
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// Loop pacing for the two threads
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Longest the timing thread sleeps between passes (edges and commands are polled)
    pub timing_idle: Duration,
    /// Sleep between control passes when the queue is drained
    pub control_idle: Duration,
    /// Period of potentiometer requests, `None` to never ask
    pub pot_request_interval: Option<Duration>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            timing_idle: Duration::from_micros(500),
            control_idle: Duration::from_millis(1),
            pot_request_interval: Some(Duration::from_millis(100)),
        }
    }
}

/// Final state returned by [`Runtime::stop`]
#[derive(Debug)]
pub struct RunReport<S> {
    pub timing: TimingStatus,
    pub controller: ControllerStatus,
    pub sink: S,
}

pub struct Runtime<S> {
    stop_timing: Arc<AtomicBool>,
    stop_control: Arc<AtomicBool>,
    timing: JoinHandle<TimingStatus>,
    control: JoinHandle<(ControllerStatus, S)>,
}

impl<S: TriggerSink + Send + 'static> Runtime<S> {
    /// Start both contexts. The timing core is started at the current time.
    pub fn spawn<A, E>(
        mut timing: TimingCore<A, E>,
        mut controller: SequencerController<S>,
        clock: MonotonicClock,
        options: RuntimeOptions,
    ) -> Result<Self, RuntimeError>
    where
        A: AnalogInput + Send + 'static,
        E: EdgeInput + Send + 'static,
    {
        let stop_timing = Arc::new(AtomicBool::new(false));
        let stop_control = Arc::new(AtomicBool::new(false));

        let timing_stop = Arc::clone(&stop_timing);
        let timing_handle = thread::Builder::new()
            .name("timing".into())
            .spawn(move || {
                timing.start(clock.now_us());
                while !timing_stop.load(Ordering::Acquire) {
                    let now = clock.now_us();
                    timing.poll(now);

                    let wait = timing
                        .next_deadline_us()
                        .map(|deadline| Duration::from_micros(deadline.saturating_sub(clock.now_us())))
                        .unwrap_or(options.timing_idle)
                        .min(options.timing_idle);
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }
                }
                tracing::debug!(passes = timing.passes(), "timing context stopped");
                timing.status()
            })
            .map_err(|source| RuntimeError::Spawn {
                name: "timing",
                source,
            })?;

        let control_stop = Arc::clone(&stop_control);
        let control_handle = thread::Builder::new()
            .name("control".into())
            .spawn(move || {
                let mut next_request_us = 0;
                while !control_stop.load(Ordering::Acquire) {
                    let report = controller.run_pass();

                    if let Some(interval) = options.pot_request_interval {
                        let now = clock.now_us();
                        if now >= next_request_us {
                            controller.request_potentiometer();
                            next_request_us = now + interval.as_micros() as u64;
                        }
                    }

                    if report.remaining == 0 {
                        thread::sleep(options.control_idle);
                    }
                }
                // Drain what the timing thread left behind
                while controller.run_pass().processed > 0 {}
                tracing::debug!("control context stopped");
                let status = controller.status();
                (status, controller.into_sink())
            });

        let control_handle = match control_handle {
            Ok(handle) => handle,
            Err(source) => {
                stop_timing.store(true, Ordering::Release);
                let _ = timing_handle.join();
                return Err(RuntimeError::Spawn {
                    name: "control",
                    source,
                });
            }
        };

        tracing::info!("sequencer running");
        Ok(Self {
            stop_timing,
            stop_control,
            timing: timing_handle,
            control: control_handle,
        })
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_timing.load(Ordering::Acquire)
    }

    /// Stop the timing thread, then the control thread once it has drained
    /// the last ticks.
    pub fn stop(self) -> Result<RunReport<S>, RuntimeError> {
        self.stop_timing.store(true, Ordering::Release);
        let timing = self.timing.join();
        self.stop_control.store(true, Ordering::Release);
        let timing = timing.map_err(|_| RuntimeError::Panicked("timing"))?;
        let (controller, sink) = self
            .control
            .join()
            .map_err(|_| RuntimeError::Panicked("control"))?;
        tracing::info!(ticks = timing.ticks_emitted, "sequencer stopped");
        Ok(RunReport {
            timing,
            controller,
            sink,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_us();
        thread::sleep(Duration::from_millis(2));
        let b = clock.now_us();
        assert!(b >= a + 2_000, "{} -> {}", a, b);
    }

    #[test]
    fn test_copies_share_origin() {
        let clock = MonotonicClock::new();
        let copy = clock;
        thread::sleep(Duration::from_millis(1));
        let (a, b) = (clock.now_us(), copy.now_us());
        assert!(a.abs_diff(b) < 1_000);
    }
}
