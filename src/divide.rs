//! Division, Counting and Delay
//!
//! Edge-triggered transformers operating on input rising/falling edges:
//!
//! - [`Divider`]: flip-flop frequency division
//! - [`Counter`]: passes only every N+1-th input pulse
//! - [`Delay`]: one-shot that reproduces an input pulse a fixed number of
//!   decimated ticks later
//!
//! `Counter` and `Delay` never own their output. They switch whatever
//! [`Latch`] the caller hands them, so the same state machine can drive a
//! transformer's own output or a channel shared with other transformers.

/// Samples per decimated tick
pub const DECIMATION: u32 = 64;

/// A binary output channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latch {
    state: bool,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn on(&mut self) {
        self.state = true;
    }

    #[inline]
    pub fn off(&mut self) {
        self.state = false;
    }

    #[inline]
    pub fn set(&mut self, state: bool) {
        self.state = state;
    }

    pub fn is_on(&self) -> bool {
        self.state
    }
}

/// One decimated tick, carrying the time it spans
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    /// Seconds elapsed since the previous tick
    pub elapsed: f64,
}

/// Down-sampling counter shared by every tick-driven transformer of a module.
///
/// Transformers can only be clocked with a [`Tick`] produced here, so all of
/// them advance on the same samples.
#[derive(Debug, Clone)]
pub struct Decimator {
    factor: u32,
    count: u32,
    elapsed: f64,
}

impl Decimator {
    pub fn new(factor: u32) -> Self {
        Self {
            factor: factor.max(1),
            count: 0,
            elapsed: 0.0,
        }
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    /// Decimated ticks per second at a given sample rate
    pub fn ticks_per_second(&self, sample_rate: f64) -> f64 {
        sample_rate / f64::from(self.factor)
    }

    /// Account for one sample. Yields a tick on every `factor`-th call.
    #[inline]
    pub fn step(&mut self, elapsed: f64) -> Option<Tick> {
        self.elapsed += elapsed;
        self.count += 1;
        if self.count < self.factor {
            return None;
        }
        let tick = Tick {
            elapsed: self.elapsed,
        };
        self.count = 0;
        self.elapsed = 0.0;
        Some(tick)
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.elapsed = 0.0;
    }
}

impl Default for Decimator {
    fn default() -> Self {
        Self::new(DECIMATION)
    }
}

/// Divider setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Division {
    /// Output held low; a paired combiner takes the input directly
    #[default]
    Off,
    /// Toggle after every `n + 1` rising edges
    Every(u8),
}

impl Division {
    /// Map a knob position (0 = off, n = divide by n in toggles) to a setting
    pub fn from_knob(position: u8) -> Self {
        match position {
            0 => Division::Off,
            n => Division::Every(n - 1),
        }
    }

    pub fn is_off(&self) -> bool {
        matches!(self, Division::Off)
    }
}

/// Flip-flop clock divider.
///
/// A full output cycle takes two toggles, so the output frequency is
/// `input / ((n + 1) * 2)` for `Division::Every(n)`.
#[derive(Debug, Clone, Default)]
pub struct Divider {
    division: Division,
    pos: u8,
    state: bool,
}

impl Divider {
    pub fn new(division: Division) -> Self {
        Self {
            division,
            ..Self::default()
        }
    }

    pub fn division(&self) -> Division {
        self.division
    }

    pub fn set_division(&mut self, division: Division) {
        self.division = division;
    }

    /// Count one input rise. Returns true if the output toggled.
    pub fn rise(&mut self) -> bool {
        let Division::Every(n) = self.division else {
            return false;
        };
        self.pos = self.pos.wrapping_add(1);
        if self.pos > n {
            self.pos = 0;
            self.state = !self.state;
            return true;
        }
        false
    }

    pub fn fall(&mut self) {
        if self.division.is_off() {
            self.state = false;
        }
    }

    pub fn is_on(&self) -> bool {
        self.state
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.state = false;
    }
}

/// Counted trigger: mirrors the input pulse on every `count + 1`-th rise
#[derive(Debug, Clone, Default)]
pub struct Counter {
    count: u8,
    pos: u8,
}

impl Counter {
    pub fn new(count: u8) -> Self {
        Self { count, pos: 0 }
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn set_count(&mut self, count: u8) {
        self.count = count;
    }

    fn next(&mut self) -> bool {
        self.pos = self.pos.wrapping_add(1);
        if self.pos > self.count {
            self.pos = 0;
            return true;
        }
        false
    }

    pub fn rise(&mut self, out: &mut Latch) {
        let pass = self.next();
        out.set(pass);
    }

    pub fn fall(&mut self, out: &mut Latch) {
        out.off();
    }

    pub fn reset(&mut self, out: &mut Latch) {
        self.pos = 0;
        out.off();
    }
}

/// One-shot delay clocked by decimated ticks.
///
/// The output rises `length` ticks after an input rise. Its fall is scheduled
/// from the input's fall: the pulse keeps the high time measured since the
/// rise, shifted by the delay.
#[derive(Debug, Clone)]
pub struct Delay {
    length: u16,
    rise_mark: u16,
    fall_mark: Option<u16>,
    pos: u16,
    running: bool,
}

impl Delay {
    pub fn new(length: u16) -> Self {
        Self {
            length: length.max(1),
            rise_mark: 0,
            fall_mark: None,
            pos: 0,
            running: false,
        }
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    /// Delay in decimated ticks, applied from the next rise
    pub fn set_length(&mut self, ticks: u16) {
        self.length = ticks.max(1);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Schedule the output rise. Restarts a one-shot already in flight.
    pub fn rise(&mut self) {
        self.rise_mark = self.length;
        self.pos = 0;
        self.fall_mark = None;
        self.running = true;
    }

    /// Schedule the output fall from the ticks elapsed since the rise
    pub fn fall(&mut self) {
        if self.running {
            self.fall_mark = Some(self.rise_mark.saturating_add(self.pos.max(1)));
        }
    }

    /// Advance one decimated tick
    #[inline]
    pub fn clock(&mut self, _tick: &Tick, out: &mut Latch) {
        if !self.running {
            return;
        }
        self.pos = self.pos.wrapping_add(1);
        if self.pos == self.rise_mark {
            out.on();
        } else if Some(self.pos) == self.fall_mark {
            out.off();
            self.running = false;
        }
    }

    pub fn reset(&mut self, out: &mut Latch) {
        self.running = false;
        self.fall_mark = None;
        out.off();
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::new(1)
    }
}
