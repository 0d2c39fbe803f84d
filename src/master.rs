//! Master Clock
//!
//! A floating-point phase accumulator ticking at a programmable period. Every
//! master tick advances three integer sub-clocks: the reference lane `A` and two
//! lanes `B` and `C` whose periods are musical multiples or divisions of it.
//!
//! Ratio changes on `B` or `C` never touch the running lane. The new period is
//! parked instead and installed, together with a phase reset, the next time
//! the reference lane turns on, so every lane shares the reference downbeat.

/// Master ticks per reference beat
pub const TICKS_PER_BEAT: u16 = 48;

/// Lane `B` periods in master ticks, slowest first
pub const B_RATIOS: [u16; 11] = [
    48 * 8,
    48 * 6,
    48 * 4,
    48 * 3,
    48 * 2,
    48,
    48 / 2,
    48 / 3,
    48 / 4,
    48 / 6,
    48 / 8,
];

/// Lane `C` periods in master ticks, slowest first
pub const C_RATIOS: [u16; 11] = [
    48 * 24,
    48 * 12,
    48 * 8,
    48 * 4,
    48 * 2,
    48,
    48 / 2,
    48 / 4,
    48 / 8,
    48 / 12,
    48 / 24,
];

pub const B_LABELS: [&str; 11] = [
    "/8", "/6", "/4", "/3", "/2", "x1", "x2", "x3", "x4", "x6", "x8",
];

pub const C_LABELS: [&str; 11] = [
    "/24", "/12", "/8", "/4", "/2", "x1", "x2", "x4", "x8", "x12", "x24",
];

/// Index of the x1 entry in both ratio tables
pub const UNITY_RATIO: usize = 5;

/// Minimum trigger width in seconds for [`DutyPolicy::Trigger`]
pub const TRIGGER_WIDTH: f64 = 1e-3;

/// How long each lane stays asserted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DutyPolicy {
    /// Fixed absolute width, independent of tempo
    Trigger,
    /// Half of each lane's period
    Gate,
    /// Half of a reference beat, as on the hardware unit
    #[default]
    Original,
}

impl DutyPolicy {
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => DutyPolicy::Trigger,
            1 => DutyPolicy::Gate,
            _ => DutyPolicy::Original,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            DutyPolicy::Trigger => 0,
            DutyPolicy::Gate => 1,
            DutyPolicy::Original => 2,
        }
    }

    /// Duty limit in master ticks for a given master tick length in seconds.
    /// Each lane further clamps this to half its own period.
    pub fn max_duty(&self, tick_seconds: f64) -> u16 {
        match self {
            DutyPolicy::Original => TICKS_PER_BEAT / 2,
            DutyPolicy::Gate => i16::MAX as u16,
            DutyPolicy::Trigger => {
                if tick_seconds <= 0.0 {
                    return 1;
                }
                let ticks = libm::ceil(TRIGGER_WIDTH / tick_seconds);
                ticks.clamp(1.0, f64::from(i16::MAX)) as u16
            }
        }
    }
}

/// Master tick period in seconds for a tempo and an output scale (x1, x2, ...)
pub fn tick_period(bpm: f64, scale: u32) -> f64 {
    let rate = f64::from(scale.max(1)) * f64::from(TICKS_PER_BEAT) * bpm / 60.0;
    if rate > 0.0 {
        1.0 / rate
    } else {
        0.0
    }
}

/// Integer sub-clock counting master ticks.
///
/// Asserts for `duty` of every `period + 1` ticks.
#[derive(Debug, Clone, Default)]
pub struct SubClock {
    period: u16,
    duty: u16,
    pos: u16,
    state: bool,
    /// Whether turning on asks the master clock to apply pending resyncs
    resyncs_master: bool,
}

impl SubClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sub-clock whose turn-on realigns the other lanes
    pub fn reference() -> Self {
        Self {
            resyncs_master: true,
            ..Self::default()
        }
    }

    pub fn resyncs_master(&self) -> bool {
        self.resyncs_master
    }

    /// Configure the cycle length and duty limit, both in master ticks.
    /// Duty never exceeds half the cycle so the output cannot stick high.
    pub fn set_period(&mut self, ticks: u16, max_duty: u16) {
        let ticks = ticks.max(1);
        self.duty = max_duty.min(ticks / 2);
        self.period = ticks - 1;
    }

    /// Turn on now and restart so the next master tick is position 0
    pub fn reset_phase(&mut self) {
        self.pos = u16::MAX;
        self.state = true;
    }

    /// Advance by one master tick. Returns true when this tick turned the
    /// lane on and the lane is allowed to resync the master clock.
    #[inline]
    pub fn clock(&mut self) -> bool {
        self.pos = self.pos.wrapping_add(1);
        if self.pos >= self.duty {
            self.state = false;
        }
        if self.pos > self.period {
            self.pos = 0;
            self.state = true;
            return self.resyncs_master;
        }
        false
    }

    pub fn is_on(&self) -> bool {
        self.state
    }

    pub fn period_ticks(&self) -> u16 {
        self.period + 1
    }

    pub fn duty(&self) -> u16 {
        self.duty
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.state = false;
    }
}

/// One of the three lanes driven by a [`MasterClock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Reference lane, one cycle per beat
    A,
    B,
    C,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::A, Lane::B, Lane::C];

    fn index(self) -> usize {
        match self {
            Lane::A => 0,
            Lane::B => 1,
            Lane::C => 2,
        }
    }
}

/// Floating-point phase accumulator driving three sub-clocks
#[derive(Debug, Clone)]
pub struct MasterClock {
    period: f64,
    pos: f64,
    lanes: [SubClock; 3],
    max_duty: u16,
    /// Periods waiting for the next reference downbeat
    pending: [Option<u16>; 3],
}

impl MasterClock {
    pub fn new() -> Self {
        Self {
            period: 0.0,
            pos: 0.0,
            lanes: [SubClock::reference(), SubClock::new(), SubClock::new()],
            max_duty: TICKS_PER_BEAT / 2,
            pending: [None; 3],
        }
    }

    /// Master tick length in seconds. Takes effect without a phase jump.
    pub fn set_period(&mut self, seconds: f64) {
        self.period = seconds;
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn lane(&self, lane: Lane) -> &SubClock {
        &self.lanes[lane.index()]
    }

    pub fn lane_mut(&mut self, lane: Lane) -> &mut SubClock {
        &mut self.lanes[lane.index()]
    }

    pub fn is_on(&self, lane: Lane) -> bool {
        self.lanes[lane.index()].is_on()
    }

    /// Set one lane's period in master ticks immediately, keeping its phase.
    /// Use [`MasterClock::request_resync`] for changes while running.
    pub fn set_lane_period(&mut self, lane: Lane, ticks: u16) {
        self.lanes[lane.index()].set_period(ticks, self.max_duty);
    }

    /// Duty limit in master ticks shared by every lane. Each lane clamps it
    /// to half its own period.
    pub fn set_duty_limit(&mut self, max_duty: u16) {
        if max_duty == self.max_duty {
            return;
        }
        self.max_duty = max_duty;
        for lane in &mut self.lanes {
            lane.set_period(lane.period_ticks(), max_duty);
        }
    }

    pub fn duty_limit(&self) -> u16 {
        self.max_duty
    }

    /// Change a lane's period on the next reference downbeat, restarting its
    /// phase there. Until then the lane keeps its current period. The
    /// reference lane is never realigned, so its period changes at once.
    pub fn request_resync(&mut self, lane: Lane, ticks: u16) {
        if lane == Lane::A {
            self.set_lane_period(lane, ticks);
        } else {
            self.pending[lane.index()] = Some(ticks);
        }
    }

    pub fn resync_pending(&self, lane: Lane) -> bool {
        self.pending[lane.index()].is_some()
    }

    /// Accumulate elapsed time. Returns true if a master tick fired.
    #[inline]
    pub fn clock(&mut self, elapsed: f64) -> bool {
        if self.period <= 0.0 {
            self.pos = 0.0;
            return false;
        }
        self.pos += elapsed;
        if self.pos < self.period {
            return false;
        }
        // Wrap rather than zero so fractional residue carries over
        self.pos -= self.period;

        if self.lanes[0].clock() {
            self.apply_resyncs();
        }
        self.lanes[1].clock();
        self.lanes[2].clock();
        true
    }

    fn apply_resyncs(&mut self) {
        for i in 1..self.lanes.len() {
            if let Some(ticks) = self.pending[i].take() {
                self.lanes[i].set_period(ticks, self.max_duty);
                self.lanes[i].reset_phase();
            }
        }
    }

    /// All lanes off with phases zero. Pending periods are installed at once
    /// since every lane restarts aligned.
    pub fn reset(&mut self) {
        self.pos = 0.0;
        for (lane, pending) in self.lanes.iter_mut().zip(self.pending.iter_mut()) {
            if let Some(ticks) = pending.take() {
                lane.set_period(ticks, self.max_duty);
            }
            lane.reset();
        }
    }
}

impl Default for MasterClock {
    fn default() -> Self {
        Self::new()
    }
}
