//! Multiplication, Repetition and Pulse Width
//!
//! Continuous-time transformers that measure the interval between input rises
//! and use the last completed interval to place future output edges. They can
//! never see ahead, so a tempo change shows up one input cycle late.
//!
//! Until a first interval has been measured (after construction or reset) each
//! of them simply mirrors the input gate.

use crate::divide::Tick;

/// Elapsed time since the last rise, and whether that rise closed a full
/// interval worth measuring
#[derive(Debug, Clone, Default)]
struct Interval {
    since_rise: f64,
    armed: bool,
    resolution: f64,
}

impl Interval {
    #[inline]
    fn advance(&mut self, elapsed: f64) {
        self.since_rise += elapsed;
        self.resolution = elapsed;
    }

    /// Close the running interval at a rise. Yields its length if a previous
    /// rise opened it, never shorter than one tick.
    fn close(&mut self) -> Option<f64> {
        let measured = (self.armed && self.resolution > 0.0)
            .then(|| self.since_rise.max(self.resolution));
        self.armed = true;
        self.since_rise = 0.0;
        measured
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Pulse generator shared by the three transformers: one pulse per
/// `period`, each `fall_mark` long
#[derive(Debug, Clone)]
struct PulseTrain {
    factor: u32,
    fraction: f64,
    interval: Interval,
    period: Option<f64>,
    fall_mark: f64,
    pos: f64,
    state: bool,
}

impl PulseTrain {
    fn new(factor: u32, fraction: f64) -> Self {
        Self {
            factor: factor.max(1),
            fraction: fraction.clamp(0.0, 1.0),
            interval: Interval::default(),
            period: None,
            fall_mark: 0.0,
            pos: 0.0,
            state: false,
        }
    }

    fn trigger(&mut self) {
        self.period = self.interval.close().map(|measured| {
            let resolution = self.interval.resolution;
            let period = measured / f64::from(self.factor);
            if self.fraction >= 1.0 {
                let period = period.max(resolution);
                self.fall_mark = period;
                return period;
            }
            // Leave at least one low tick per period
            let period = period.max(2.0 * resolution);
            self.fall_mark = (period * self.fraction).clamp(resolution, period - resolution);
            period
        });
        self.pos = 0.0;
        self.state = true;
    }

    fn release(&mut self) {
        if self.period.is_none() {
            self.state = false;
        }
    }

    /// Advance by `elapsed`. When `repeat` is set, a period boundary
    /// re-asserts the output; returns true if that happened.
    #[inline]
    fn advance(&mut self, elapsed: f64, repeat: bool) -> bool {
        let mut repeated = false;
        if let Some(period) = self.period {
            if self.state && self.pos >= self.fall_mark {
                self.state = false;
            }
            if repeat && self.pos >= period {
                self.pos -= period;
                self.state = true;
                repeated = true;
            }
        }
        self.pos += elapsed;
        self.interval.advance(elapsed);
        repeated
    }

    fn reset(&mut self) {
        self.interval.reset();
        self.period = None;
        self.fall_mark = 0.0;
        self.pos = 0.0;
        self.state = false;
    }
}

/// Clock multiplier.
///
/// Each input rise divides the previous input interval by `factor` and emits
/// that many evenly spaced pulses, looping until the next rise recalibrates.
#[derive(Debug, Clone)]
pub struct Multiplier {
    train: PulseTrain,
}

impl Multiplier {
    pub fn new(factor: u32, fraction: f64) -> Self {
        Self {
            train: PulseTrain::new(factor, fraction),
        }
    }

    pub fn factor(&self) -> u32 {
        self.train.factor
    }

    /// Multiplication factor, at least 1. Applied from the next rise.
    pub fn set_factor(&mut self, factor: u32) {
        self.train.factor = factor.max(1);
    }

    /// Pulse width as a fraction of the output period. Applied from the next rise.
    pub fn set_fraction(&mut self, fraction: f64) {
        self.train.fraction = fraction.clamp(0.0, 1.0);
    }

    /// Output period derived at the last rise, if an interval was measured
    pub fn period(&self) -> Option<f64> {
        self.train.period
    }

    pub fn rise(&mut self) {
        self.train.trigger();
    }

    pub fn fall(&mut self) {
        self.train.release();
    }

    #[inline]
    pub fn clock(&mut self, tick: &Tick) {
        self.train.advance(tick.elapsed, true);
    }

    pub fn is_on(&self) -> bool {
        self.train.state
    }

    pub fn reset(&mut self) {
        self.train.reset();
    }
}

/// Ratchet: the multiplier's timing, but only `reps` pulses per input rise
/// (the triggering pulse included), then silence until the next rise.
#[derive(Debug, Clone)]
pub struct Repeater {
    train: PulseTrain,
    reps: u32,
    target: u32,
    count: u32,
}

impl Repeater {
    pub fn new(factor: u32, reps: u32, fraction: f64) -> Self {
        Self {
            train: PulseTrain::new(factor, fraction),
            reps: reps.max(1),
            target: 0,
            count: 0,
        }
    }

    /// Spacing divisor, at least 1. Applied from the next rise.
    pub fn set_factor(&mut self, factor: u32) {
        self.train.factor = factor.max(1);
    }

    /// Pulses per rise, at least 1. Captured at the next rise.
    pub fn set_reps(&mut self, reps: u32) {
        self.reps = reps.max(1);
    }

    pub fn set_fraction(&mut self, fraction: f64) {
        self.train.fraction = fraction.clamp(0.0, 1.0);
    }

    pub fn period(&self) -> Option<f64> {
        self.train.period
    }

    pub fn rise(&mut self) {
        self.target = self.reps;
        self.count = 1;
        self.train.trigger();
    }

    pub fn fall(&mut self) {
        self.train.release();
    }

    #[inline]
    pub fn clock(&mut self, tick: &Tick) {
        let more = self.count < self.target;
        if self.train.advance(tick.elapsed, more) {
            self.count += 1;
        }
    }

    /// Whether repetitions remain for the current rise
    pub fn is_running(&self) -> bool {
        self.count < self.target
    }

    pub fn is_on(&self) -> bool {
        self.train.state
    }

    pub fn reset(&mut self) {
        self.train.reset();
        self.target = 0;
        self.count = 0;
    }
}

/// Pulse-width modulator: keeps the input clock's rate but holds each pulse
/// for `fraction` of the previous input interval
#[derive(Debug, Clone)]
pub struct Duration {
    train: PulseTrain,
}

impl Duration {
    pub fn new(fraction: f64) -> Self {
        Self {
            train: PulseTrain::new(1, fraction),
        }
    }

    pub fn set_fraction(&mut self, fraction: f64) {
        self.train.fraction = fraction.clamp(0.0, 1.0);
    }

    /// Input interval measured at the last rise
    pub fn period(&self) -> Option<f64> {
        self.train.period
    }

    pub fn rise(&mut self) {
        self.train.trigger();
    }

    pub fn fall(&mut self) {
        self.train.release();
    }

    #[inline]
    pub fn clock(&mut self, tick: &Tick) {
        self.train.advance(tick.elapsed, false);
    }

    pub fn is_on(&self) -> bool {
        self.train.state
    }

    pub fn reset(&mut self) {
        self.train.reset();
    }
}
