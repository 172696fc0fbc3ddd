// Signal Sampler - Decimated, averaged potentiometer readings
//
// Runs in the timing context. Raw ADC reads are decimated, the survivors go
// into a fixed ring, and the ring mean is reported on request.

use crate::config::SamplerConfig;
use crate::messaging::{Message, TimingEndpoint};
use crate::timing::io::AnalogInput;

/// Fixed-capacity ring of decimated samples with a running sum
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: Box<[u16]>,
    head: usize,
    len: usize,
    sum: u64,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity.max(1)].into_boxed_slice(),
            head: 0,
            len: 0,
            sum: 0,
        }
    }

    /// Push a sample, evicting the oldest once full
    pub fn push(&mut self, sample: u16) {
        let capacity = self.samples.len();
        if self.len == capacity {
            self.sum -= self.samples[self.head] as u64;
        } else {
            self.len += 1;
        }
        self.samples[self.head] = sample;
        self.sum += sample as u64;
        self.head = (self.head + 1) % capacity;
    }

    /// Rounded mean of the stored samples
    pub fn average(&self) -> Option<u16> {
        if self.len == 0 {
            return None;
        }
        let len = self.len as u64;
        Some(((self.sum + len / 2) / len) as u16)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
        self.sum = 0;
    }
}

pub struct SignalSampler {
    config: SamplerConfig,
    buffer: SampleBuffer,
    decimation_counter: u32,
    next_sample_us: Option<u64>,

    /// Last valid average, kept across read failures
    average: Option<u16>,
    /// A request is waiting for a reply (requests coalesce into this flag)
    reply_pending: bool,

    raw_samples: u64,
    decimated_samples: u64,
    replies_sent: u64,
    coalesced_requests: u64,

    error_count: u32,
    consecutive_failures: u32,
    degraded: bool,
    /// Health state changed and has not been delivered yet
    health_dirty: bool,
}

impl SignalSampler {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            config: config.clone(),
            buffer: SampleBuffer::new(config.window_size),
            decimation_counter: 0,
            next_sample_us: None,
            average: None,
            reply_pending: false,
            raw_samples: 0,
            decimated_samples: 0,
            replies_sent: 0,
            coalesced_requests: 0,
            error_count: 0,
            consecutive_failures: 0,
            degraded: false,
            health_dirty: false,
        }
    }

    /// Register a `PotentiometerRequest`. Requests arriving before the
    /// previous reply went out collapse into one reply carrying the latest value.
    pub fn request(&mut self) {
        if self.reply_pending {
            self.coalesced_requests += 1;
        }
        self.reply_pending = true;
    }

    /// Sample if the sampling period has elapsed, then deliver anything pending
    pub fn poll(&mut self, now_us: u64, input: &mut impl AnalogInput, tx: &mut TimingEndpoint) {
        let due = self.next_sample_us.unwrap_or(now_us);
        if now_us >= due {
            self.sample(input);
            let period = self.config.sample_period_us.max(1);
            let mut next = due + period;
            if now_us >= next {
                // Sampling does not catch up on missed periods
                next = now_us + period;
            }
            self.next_sample_us = Some(next);
        }
        self.flush(tx);
    }

    /// Read one raw value and run it through decimation and averaging
    pub fn sample(&mut self, input: &mut impl AnalogInput) {
        match input.read_raw() {
            Ok(raw) => {
                self.raw_samples += 1;
                if self.degraded {
                    tracing::info!(error_count = self.error_count, "analog input recovered");
                    self.degraded = false;
                    self.health_dirty = true;
                }
                self.consecutive_failures = 0;

                self.decimation_counter += 1;
                if self.decimation_counter >= self.config.decimation_factor {
                    self.decimation_counter = 0;
                    self.buffer.push(raw);
                    self.decimated_samples += 1;
                    self.average = self.buffer.average();
                }
            }
            Err(err) => {
                self.error_count = self.error_count.saturating_add(1);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if !self.degraded && self.consecutive_failures >= self.config.sensor_failure_threshold {
                    tracing::warn!(%err, failures = self.consecutive_failures, "analog input degraded");
                    self.degraded = true;
                    self.health_dirty = true;
                }
            }
        }
    }

    /// Send a pending health change and a pending reply, if possible.
    /// Anything that hits a full channel stays pending for the next call.
    pub fn flush(&mut self, tx: &mut TimingEndpoint) {
        if self.health_dirty {
            let msg = Message::SensorHealth {
                degraded: self.degraded,
                error_count: self.error_count,
            };
            if tx.send(msg).is_ok() {
                self.health_dirty = false;
            }
        }

        if self.reply_pending {
            if let Some(value) = self.average {
                if tx.send(Message::PotentiometerValue { value }).is_ok() {
                    self.reply_pending = false;
                    self.replies_sent += 1;
                }
            }
        }
    }

    /// Current averaged value, `None` until the first decimated sample
    pub fn average(&self) -> Option<u16> {
        self.average
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn reply_pending(&self) -> bool {
        self.reply_pending
    }

    pub fn raw_samples(&self) -> u64 {
        self.raw_samples
    }

    pub fn decimated_samples(&self) -> u64 {
        self.decimated_samples
    }

    pub fn replies_sent(&self) -> u64 {
        self.replies_sent
    }

    pub fn coalesced_requests(&self) -> u64 {
        self.coalesced_requests
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn next_deadline_us(&self) -> Option<u64> {
        self.next_sample_us
    }
}
