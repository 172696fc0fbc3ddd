// Pattern - Step masks and trigger patterns
// A pattern is an ordered list of steps, each step a bit mask of lanes to fire

use serde::{Deserialize, Serialize};

/// Number of lanes a StepMask can address
pub const MAX_LANES: u32 = u16::BITS;

/// Default upper bound on pattern length
pub const DEFAULT_MAX_STEPS: usize = 64;

/// Lane flags for one sequencer step (bit n = lane n)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StepMask(u16);

impl StepMask {
    pub const EMPTY: StepMask = StepMask(0);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Build from per-lane flags; flags past `MAX_LANES` are ignored
    pub fn from_lanes(lanes: &[bool]) -> Self {
        let bits = lanes
            .iter()
            .take(MAX_LANES as usize)
            .enumerate()
            .filter(|(_, on)| **on)
            .fold(0u16, |acc, (lane, _)| acc | (1 << lane));
        Self(bits)
    }

    /// Only `lane` set
    pub fn single(lane: u8) -> Self {
        Self::EMPTY.with_lane(lane, true)
    }

    /// The first `lane_count` lanes set
    pub fn all(lane_count: u8) -> Self {
        if lane_count as u32 >= MAX_LANES {
            Self(u16::MAX)
        } else {
            Self((1u16 << lane_count) - 1)
        }
    }

    pub fn with_lane(self, lane: u8, on: bool) -> Self {
        if lane as u32 >= MAX_LANES {
            return self;
        }
        if on {
            Self(self.0 | (1 << lane))
        } else {
            Self(self.0 & !(1 << lane))
        }
    }

    pub fn is_set(self, lane: u8) -> bool {
        (lane as u32) < MAX_LANES && self.0 & (1 << lane) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Set lanes in ascending order
    pub fn lanes(self) -> impl Iterator<Item = u8> {
        (0..MAX_LANES as u8).filter(move |lane| self.is_set(*lane))
    }
}

/// Reasons a pattern cannot be installed or parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPattern {
    #[error("Pattern has no steps")]
    Empty,

    #[error("Pattern has {len} steps, maximum is {max}")]
    TooLong { len: usize, max: usize },

    #[error("Invalid step character '{0}', expected '1' or '0'")]
    BadCharacter(char),
}

/// Ordered sequence of steps.
///
/// Any value can be built; length limits are enforced when the pattern is
/// installed in a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPattern {
    steps: Vec<StepMask>,
}

impl TriggerPattern {
    pub fn new(steps: Vec<StepMask>) -> Self {
        Self { steps }
    }

    /// One silent step, the scheduler's initial pattern
    pub fn silent() -> Self {
        Self::new(vec![StepMask::EMPTY])
    }

    /// Build from per-step lane flags, e.g. `[[true], [false]]`
    pub fn from_lanes<S: AsRef<[bool]>>(steps: &[S]) -> Self {
        Self::new(steps.iter().map(|s| StepMask::from_lanes(s.as_ref())).collect())
    }

    /// Parse a step string such as `"1001"`: `1` fires every lane, `0` none.
    /// Whitespace is ignored.
    pub fn simple(pattern: &str, lane_count: u8) -> Result<Self, InvalidPattern> {
        let all = StepMask::all(lane_count);
        let steps = pattern
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| match c {
                '1' => Ok(all),
                '0' => Ok(StepMask::EMPTY),
                other => Err(InvalidPattern::BadCharacter(other)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(steps))
    }

    /// `lane` fires on every even step
    pub fn alternating(lane: u8, length: usize) -> Self {
        let on = StepMask::single(lane);
        Self::new(
            (0..length)
                .map(|i| if i % 2 == 0 { on } else { StepMask::EMPTY })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<StepMask> {
        self.steps.get(index).copied()
    }

    pub fn steps(&self) -> &[StepMask] {
        &self.steps
    }

    /// Check the length against `max_steps`
    pub fn validate(&self, max_steps: usize) -> Result<(), InvalidPattern> {
        if self.steps.is_empty() {
            return Err(InvalidPattern::Empty);
        }
        if self.steps.len() > max_steps {
            return Err(InvalidPattern::TooLong {
                len: self.steps.len(),
                max: max_steps,
            });
        }
        Ok(())
    }
}
