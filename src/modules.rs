//! Clock Modules
//!
//! Host-facing modules composing the transformers into patchable units:
//! a multi-rate tempo clock, a divider/counter/delay pair with a combined
//! output, and a duration/multiplier/repeater trio.
//!
//! Every module follows the same per-sample order: reset edge, control
//! values, input edges, then the decimated continuous transformers, then
//! outputs.

use crate::divide::{Counter, Decimator, Delay, Divider, Division, Latch, DECIMATION};
use crate::edge::EdgeDetector;
use crate::master::{
    tick_period, DutyPolicy, Lane, MasterClock, B_RATIOS, C_RATIOS, TICKS_PER_BEAT, UNITY_RATIO,
};
use crate::multiply::{Duration, Multiplier, Repeater};
use crate::port::{
    gate_voltage, GraphModule, ModulatedParam, ParamDef, ParamId, ParamRange, PortDef, PortSpec,
    PortValues, SignalKind,
};

const DEFAULT_SAMPLE_RATE: f64 = 44100.0;

fn sample_period(sample_rate: f64) -> f64 {
    if sample_rate > 0.0 {
        1.0 / sample_rate
    } else {
        0.0
    }
}

/// Collect the numeric selections present in a saved state.
///
/// Missing fields are skipped so the module keeps its current value. A field
/// of the wrong type rejects the whole state before anything is applied.
#[cfg(feature = "alloc")]
fn read_selections(
    params: &[ParamDef],
    state: &serde_json::Value,
) -> Result<Vec<(ParamId, f64)>, String> {
    let object = state
        .as_object()
        .ok_or_else(|| "module state must be an object".to_string())?;

    let mut selections = Vec::with_capacity(params.len());
    for param in params {
        if let Some(value) = object.get(&param.name) {
            let value = value
                .as_f64()
                .ok_or_else(|| format!("field '{}' must be a number", param.name))?;
            selections.push((param.id, value));
        }
    }
    Ok(selections)
}

#[cfg(feature = "alloc")]
fn write_selections(module: &dyn GraphModule) -> serde_json::Value {
    let object = module
        .params()
        .iter()
        .filter_map(|p| {
            let value = module.get_param(p.id)?;
            Some((p.name.clone(), serde_json::Value::from(value)))
        })
        .collect();
    serde_json::Value::Object(object)
}

/// Master Clock
///
/// Derives three phase-aligned clocks from one tempo. `main` runs at the
/// reference beat, `b` and `c` at selectable ratios of it. The whole clock can
/// be scaled x1 to x16. Ratio changes take effect on the next `main` downbeat
/// so the lanes never drift apart.
pub struct TempoClock {
    bpm: f64,
    ratio_b: usize,
    ratio_c: usize,
    multiplier: u32,
    duty: DutyPolicy,
    master: MasterClock,
    reset_edge: EdgeDetector,
    sample_period: f64,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl TempoClock {
    pub const BPM: ParamId = 0;
    pub const RATIO_B: ParamId = 1;
    pub const RATIO_C: ParamId = 2;
    pub const MULTIPLIER: ParamId = 3;
    pub const DUTY: ParamId = 4;

    pub fn new(sample_rate: f64) -> Self {
        Self {
            bpm: 120.0,
            ratio_b: UNITY_RATIO,
            ratio_c: UNITY_RATIO,
            multiplier: 0,
            duty: DutyPolicy::default(),
            master: Self::unity_master(),
            reset_edge: EdgeDetector::new(),
            sample_period: sample_period(sample_rate),
            spec: PortSpec {
                inputs: vec![PortDef::new(0, "reset", SignalKind::Trigger)],
                outputs: vec![
                    PortDef::new(10, "main", SignalKind::Clock),
                    PortDef::new(11, "b", SignalKind::Clock),
                    PortDef::new(12, "c", SignalKind::Clock),
                ],
            },
            params: vec![
                ParamDef::new(
                    Self::BPM,
                    "bpm",
                    120.0,
                    ParamRange::Continuous {
                        min: 40.0,
                        max: 200.0,
                    },
                ),
                ParamDef::new(
                    Self::RATIO_B,
                    "ratio_b",
                    UNITY_RATIO as f64,
                    ParamRange::Stepped {
                        min: 0.0,
                        max: (B_RATIOS.len() - 1) as f64,
                    },
                ),
                ParamDef::new(
                    Self::RATIO_C,
                    "ratio_c",
                    UNITY_RATIO as f64,
                    ParamRange::Stepped {
                        min: 0.0,
                        max: (C_RATIOS.len() - 1) as f64,
                    },
                ),
                ParamDef::new(
                    Self::MULTIPLIER,
                    "multiplier",
                    0.0,
                    ParamRange::Stepped { min: 0.0, max: 4.0 },
                ),
                ParamDef::new(
                    Self::DUTY,
                    "duty",
                    DutyPolicy::default().index() as f64,
                    ParamRange::Stepped { min: 0.0, max: 2.0 },
                ),
            ],
        }
    }

    fn unity_master() -> MasterClock {
        let mut master = MasterClock::new();
        master.set_lane_period(Lane::A, TICKS_PER_BEAT);
        master.set_lane_period(Lane::B, B_RATIOS[UNITY_RATIO]);
        master.set_lane_period(Lane::C, C_RATIOS[UNITY_RATIO]);
        master
    }

    pub fn master(&self) -> &MasterClock {
        &self.master
    }

    /// Output scale applied to every lane (1, 2, 4, 8 or 16)
    pub fn scale(&self) -> u32 {
        1 << self.multiplier
    }

    fn range(&self, id: ParamId) -> Option<ParamRange> {
        self.params.iter().find(|p| p.id == id).map(|p| p.range)
    }
}

impl Default for TempoClock {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl GraphModule for TempoClock {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
        if self.reset_edge.process(inputs.get_or(0, 0.0)).rose {
            self.master.reset();
        }

        let period = tick_period(self.bpm, self.scale());
        self.master.set_period(period);
        self.master.set_duty_limit(self.duty.max_duty(period));

        self.master.clock(self.sample_period);

        outputs.set(10, gate_voltage(self.master.is_on(Lane::A)));
        outputs.set(11, gate_voltage(self.master.is_on(Lane::B)));
        outputs.set(12, gate_voltage(self.master.is_on(Lane::C)));
    }

    fn reset(&mut self) {
        self.master.reset();
        self.reset_edge.reset();
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_period = sample_period(sample_rate);
    }

    fn params(&self) -> &[ParamDef] {
        &self.params
    }

    fn get_param(&self, id: ParamId) -> Option<f64> {
        match id {
            Self::BPM => Some(self.bpm),
            Self::RATIO_B => Some(self.ratio_b as f64),
            Self::RATIO_C => Some(self.ratio_c as f64),
            Self::MULTIPLIER => Some(f64::from(self.multiplier)),
            Self::DUTY => Some(self.duty.index() as f64),
            _ => None,
        }
    }

    fn set_param(&mut self, id: ParamId, value: f64) {
        let Some(range) = self.range(id) else {
            return;
        };
        let value = range.apply(value);
        match id {
            Self::BPM => self.bpm = value,
            Self::RATIO_B => {
                let ratio = value as usize;
                if ratio != self.ratio_b {
                    self.ratio_b = ratio;
                    self.master.request_resync(Lane::B, B_RATIOS[ratio]);
                }
            }
            Self::RATIO_C => {
                let ratio = value as usize;
                if ratio != self.ratio_c {
                    self.ratio_c = ratio;
                    self.master.request_resync(Lane::C, C_RATIOS[ratio]);
                }
            }
            Self::MULTIPLIER => self.multiplier = value as u32,
            Self::DUTY => self.duty = DutyPolicy::from_index(value as usize),
            _ => {}
        }
    }

    fn type_id(&self) -> &'static str {
        "tempo_clock"
    }

    #[cfg(feature = "alloc")]
    fn serialize_state(&self) -> Option<serde_json::Value> {
        Some(write_selections(self))
    }

    #[cfg(feature = "alloc")]
    fn deserialize_state(&mut self, state: &serde_json::Value) -> Result<(), String> {
        for (id, value) in read_selections(&self.params, state)? {
            self.set_param(id, value);
        }
        self.reset();
        tracing::debug!(
            bpm = self.bpm,
            ratio_b = self.ratio_b,
            ratio_c = self.ratio_c,
            scale = self.scale(),
            "tempo clock state restored"
        );
        Ok(())
    }
}

/// Which secondary transformer feeds `plus` and `combined`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombineMode {
    /// Counter on `plus`, dividing counter on `combined`
    #[default]
    Count,
    /// Delay on `plus`, swing on `combined`
    Delay,
    /// `plus` held low, `combined` mirrors the divider
    Off,
}

impl CombineMode {
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => CombineMode::Count,
            1 => CombineMode::Delay,
            _ => CombineMode::Off,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            CombineMode::Count => 0,
            CombineMode::Delay => 1,
            CombineMode::Off => 2,
        }
    }
}

/// Divider with Counter/Delay and Combined Output
///
/// The left half divides `div_clock`. The right half counts or delays
/// `plus_clock`. A second counter or delay (the dividing counter, or swing)
/// is driven by the divider's toggles and writes `combined`, so the two
/// halves chain into one output. Each clock input is normalled to the other.
pub struct DivideCombine {
    div: ModulatedParam,
    plus: ModulatedParam,
    mode: CombineMode,
    divider: Divider,
    counter: Counter,
    delay: Delay,
    dividing_counter: Counter,
    swing: Delay,
    addition: Latch,
    combined: Latch,
    decimator: Decimator,
    div_edge: EdgeDetector,
    plus_edge: EdgeDetector,
    reset_edge: EdgeDetector,
    sample_rate: f64,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl DivideCombine {
    pub const DIV: ParamId = 0;
    pub const PLUS: ParamId = 1;
    pub const DIV_CV: ParamId = 2;
    pub const PLUS_CV: ParamId = 3;
    pub const MODE: ParamId = 4;

    /// Highest count reachable with the `plus` knob fully open
    pub const MAX_COUNT: f64 = 15.0;

    const DIV_RANGE: ParamRange = ParamRange::Stepped {
        min: 0.0,
        max: 32.0,
    };
    const PLUS_RANGE: ParamRange = ParamRange::Continuous { min: 0.0, max: 1.0 };
    const AMOUNT_RANGE: ParamRange = ParamRange::Continuous { min: 0.0, max: 1.0 };
    const MODE_RANGE: ParamRange = ParamRange::Stepped { min: 0.0, max: 2.0 };

    pub fn new(sample_rate: f64) -> Self {
        Self {
            div: ModulatedParam::new(Self::DIV_RANGE).with_base(1.0),
            plus: ModulatedParam::new(Self::PLUS_RANGE),
            mode: CombineMode::default(),
            divider: Divider::new(Division::from_knob(1)),
            counter: Counter::default(),
            delay: Delay::default(),
            dividing_counter: Counter::default(),
            swing: Delay::default(),
            addition: Latch::new(),
            combined: Latch::new(),
            decimator: Decimator::new(DECIMATION),
            div_edge: EdgeDetector::new(),
            plus_edge: EdgeDetector::new(),
            reset_edge: EdgeDetector::new(),
            sample_rate,
            spec: PortSpec {
                inputs: vec![
                    PortDef::new(0, "div_cv", SignalKind::CvBipolar),
                    PortDef::new(1, "plus_cv", SignalKind::CvBipolar),
                    PortDef::new(2, "reset", SignalKind::Trigger),
                    PortDef::new(3, "div_clock", SignalKind::Clock).normalled_to(4),
                    PortDef::new(4, "plus_clock", SignalKind::Clock).normalled_to(3),
                ],
                outputs: vec![
                    PortDef::new(10, "div", SignalKind::Gate),
                    PortDef::new(11, "plus", SignalKind::Gate),
                    PortDef::new(12, "combined", SignalKind::Gate),
                ],
            },
            params: vec![
                ParamDef::new(Self::DIV, "div", 1.0, Self::DIV_RANGE),
                ParamDef::new(Self::PLUS, "plus", 0.0, Self::PLUS_RANGE),
                ParamDef::new(Self::DIV_CV, "div_cv", 0.0, Self::AMOUNT_RANGE),
                ParamDef::new(Self::PLUS_CV, "plus_cv", 0.0, Self::AMOUNT_RANGE),
                ParamDef::new(Self::MODE, "mode", 0.0, Self::MODE_RANGE),
            ],
        }
    }

    pub fn mode(&self) -> CombineMode {
        self.mode
    }

    /// Switch the secondary transformers. Everything they own restarts idle.
    pub fn set_mode(&mut self, mode: CombineMode) {
        if mode == self.mode {
            return;
        }
        tracing::debug!(from = ?self.mode, to = ?mode, "combine mode changed");
        self.mode = mode;
        self.reset_secondaries();
    }

    pub fn divider(&self) -> &Divider {
        &self.divider
    }

    fn reset_secondaries(&mut self) {
        self.counter.reset(&mut self.addition);
        self.delay.reset(&mut self.addition);
        self.dividing_counter.reset(&mut self.combined);
        self.swing.reset(&mut self.combined);
    }

    /// Push the effective knob + CV values into the transformers
    fn apply_controls(&mut self) {
        self.divider
            .set_division(Division::from_knob(self.div.value() as u8));

        let plus = self.plus.value();
        let count = libm::round(plus * Self::MAX_COUNT) as u8;
        self.counter.set_count(count);
        self.dividing_counter.set_count(count);

        let ticks = libm::round(plus * self.decimator.ticks_per_second(self.sample_rate))
            .clamp(1.0, f64::from(u16::MAX)) as u16;
        self.delay.set_length(ticks);
        self.swing.set_length(ticks);
    }

    fn combiner_rise(&mut self) {
        match self.mode {
            CombineMode::Count => self.dividing_counter.rise(&mut self.combined),
            CombineMode::Delay => self.swing.rise(),
            CombineMode::Off => {}
        }
    }

    fn combiner_fall(&mut self) {
        match self.mode {
            CombineMode::Count => self.dividing_counter.fall(&mut self.combined),
            CombineMode::Delay => self.swing.fall(),
            CombineMode::Off => {}
        }
    }

    fn divide_rise(&mut self) {
        let disabled = self.divider.division().is_off();
        let toggled = self.divider.rise();
        if disabled {
            self.combiner_rise();
        } else if toggled {
            if self.divider.is_on() {
                self.combiner_rise();
            } else {
                self.combiner_fall();
            }
        }
    }

    fn divide_fall(&mut self) {
        self.divider.fall();
        if self.divider.division().is_off() {
            self.combiner_fall();
        }
    }

    fn plus_rise(&mut self) {
        match self.mode {
            CombineMode::Count => self.counter.rise(&mut self.addition),
            CombineMode::Delay => self.delay.rise(),
            CombineMode::Off => {}
        }
    }

    fn plus_fall(&mut self) {
        match self.mode {
            CombineMode::Count => self.counter.fall(&mut self.addition),
            CombineMode::Delay => self.delay.fall(),
            CombineMode::Off => {}
        }
    }
}

impl Default for DivideCombine {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl GraphModule for DivideCombine {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
        if self.reset_edge.process(inputs.get_or(2, 0.0)).rose {
            self.divider.reset();
            self.reset_secondaries();
            self.decimator.reset();
        }

        self.div.set_cv(inputs.get_or(0, 0.0));
        self.plus.set_cv(inputs.get_or(1, 0.0));
        self.apply_controls();

        let div = self.div_edge.process(inputs.get_or(3, 0.0));
        if div.rose {
            self.divide_rise();
        } else if div.fell {
            self.divide_fall();
        }

        let plus = self.plus_edge.process(inputs.get_or(4, 0.0));
        if plus.rose {
            self.plus_rise();
        } else if plus.fell {
            self.plus_fall();
        }

        if let Some(tick) = self.decimator.step(sample_period(self.sample_rate)) {
            if self.mode == CombineMode::Delay {
                self.delay.clock(&tick, &mut self.addition);
                self.swing.clock(&tick, &mut self.combined);
            }
        }

        let combined = match self.mode {
            CombineMode::Off => self.divider.is_on(),
            _ => self.combined.is_on(),
        };
        outputs.set(10, gate_voltage(self.divider.is_on()));
        outputs.set(11, gate_voltage(self.addition.is_on()));
        outputs.set(12, gate_voltage(combined));
    }

    fn reset(&mut self) {
        self.divider.reset();
        self.reset_secondaries();
        self.decimator.reset();
        self.div_edge.reset();
        self.plus_edge.reset();
        self.reset_edge.reset();
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn params(&self) -> &[ParamDef] {
        &self.params
    }

    fn get_param(&self, id: ParamId) -> Option<f64> {
        match id {
            Self::DIV => Some(self.div.base),
            Self::PLUS => Some(self.plus.base),
            Self::DIV_CV => Some(self.div.amount),
            Self::PLUS_CV => Some(self.plus.amount),
            Self::MODE => Some(self.mode.index() as f64),
            _ => None,
        }
    }

    fn set_param(&mut self, id: ParamId, value: f64) {
        match id {
            Self::DIV => self.div.set_base(value),
            Self::PLUS => self.plus.set_base(value),
            Self::DIV_CV => self.div.set_amount(value),
            Self::PLUS_CV => self.plus.set_amount(value),
            Self::MODE => {
                let index = Self::MODE_RANGE.apply(value) as usize;
                self.set_mode(CombineMode::from_index(index));
            }
            _ => {}
        }
    }

    fn type_id(&self) -> &'static str {
        "divide_combine"
    }

    #[cfg(feature = "alloc")]
    fn serialize_state(&self) -> Option<serde_json::Value> {
        Some(write_selections(self))
    }

    #[cfg(feature = "alloc")]
    fn deserialize_state(&mut self, state: &serde_json::Value) -> Result<(), String> {
        for (id, value) in read_selections(&self.params, state)? {
            self.set_param(id, value);
        }
        GraphModule::reset(self);
        tracing::debug!(mode = ?self.mode, "divide/combine state restored");
        Ok(())
    }
}

/// Duration, Multiplier and Repeater
///
/// Three interval-measuring transformers behind one panel. `dur` reshapes
/// the pulse width of its trigger, `mult` multiplies its rate, and `rep`
/// fires a burst of `reps` pulses at the multiplied spacing. `mult_trig`
/// is normalled to `dur_trig` and `rep_trig` to `mult_trig`, so a single
/// cable drives all three. The `duration` fraction sets the pulse width of
/// every output.
pub struct Ratchet {
    duration_param: ModulatedParam,
    mult_param: ModulatedParam,
    reps_param: ModulatedParam,
    duration: Duration,
    multiplier: Multiplier,
    repeater: Repeater,
    decimator: Decimator,
    dur_edge: EdgeDetector,
    mult_edge: EdgeDetector,
    rep_edge: EdgeDetector,
    reset_edge: EdgeDetector,
    sample_period: f64,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl Ratchet {
    pub const DURATION: ParamId = 0;
    pub const MULT: ParamId = 1;
    pub const REPS: ParamId = 2;
    pub const DURATION_CV: ParamId = 3;
    pub const MULT_CV: ParamId = 4;
    pub const REPS_CV: ParamId = 5;

    const FRACTION_RANGE: ParamRange = ParamRange::Continuous { min: 0.0, max: 1.0 };
    const COUNT_RANGE: ParamRange = ParamRange::Stepped {
        min: 1.0,
        max: 16.0,
    };
    const AMOUNT_RANGE: ParamRange = ParamRange::Continuous { min: 0.0, max: 1.0 };

    pub fn new(sample_rate: f64) -> Self {
        Self {
            duration_param: ModulatedParam::new(Self::FRACTION_RANGE).with_base(0.5),
            mult_param: ModulatedParam::new(Self::COUNT_RANGE).with_base(2.0),
            reps_param: ModulatedParam::new(Self::COUNT_RANGE).with_base(3.0),
            duration: Duration::new(0.5),
            multiplier: Multiplier::new(2, 0.5),
            repeater: Repeater::new(2, 3, 0.5),
            decimator: Decimator::new(1),
            dur_edge: EdgeDetector::new(),
            mult_edge: EdgeDetector::new(),
            rep_edge: EdgeDetector::new(),
            reset_edge: EdgeDetector::new(),
            sample_period: sample_period(sample_rate),
            spec: PortSpec {
                inputs: vec![
                    PortDef::new(0, "dur_trig", SignalKind::Trigger),
                    PortDef::new(1, "mult_trig", SignalKind::Trigger).normalled_to(0),
                    PortDef::new(2, "rep_trig", SignalKind::Trigger).normalled_to(1),
                    PortDef::new(3, "dur_cv", SignalKind::CvBipolar),
                    PortDef::new(4, "mult_cv", SignalKind::CvBipolar),
                    PortDef::new(5, "rep_cv", SignalKind::CvBipolar),
                    PortDef::new(6, "reset", SignalKind::Trigger),
                ],
                outputs: vec![
                    PortDef::new(10, "dur", SignalKind::Gate),
                    PortDef::new(11, "mult", SignalKind::Gate),
                    PortDef::new(12, "rep", SignalKind::Gate),
                ],
            },
            params: vec![
                ParamDef::new(Self::DURATION, "duration", 0.5, Self::FRACTION_RANGE),
                ParamDef::new(Self::MULT, "mult", 2.0, Self::COUNT_RANGE),
                ParamDef::new(Self::REPS, "reps", 3.0, Self::COUNT_RANGE),
                ParamDef::new(Self::DURATION_CV, "duration_cv", 0.0, Self::AMOUNT_RANGE),
                ParamDef::new(Self::MULT_CV, "mult_cv", 0.0, Self::AMOUNT_RANGE),
                ParamDef::new(Self::REPS_CV, "reps_cv", 0.0, Self::AMOUNT_RANGE),
            ],
        }
    }

    fn apply_controls(&mut self) {
        let fraction = self.duration_param.value();
        let factor = self.mult_param.value() as u32;
        let reps = self.reps_param.value() as u32;

        self.duration.set_fraction(fraction);
        self.multiplier.set_factor(factor);
        self.multiplier.set_fraction(fraction);
        self.repeater.set_factor(factor);
        self.repeater.set_reps(reps);
        self.repeater.set_fraction(fraction);
    }

    fn reset_transformers(&mut self) {
        self.duration.reset();
        self.multiplier.reset();
        self.repeater.reset();
        self.decimator.reset();
    }
}

impl Default for Ratchet {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl GraphModule for Ratchet {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
        if self.reset_edge.process(inputs.get_or(6, 0.0)).rose {
            self.reset_transformers();
        }

        self.duration_param.set_cv(inputs.get_or(3, 0.0));
        self.mult_param.set_cv(inputs.get_or(4, 0.0));
        self.reps_param.set_cv(inputs.get_or(5, 0.0));
        self.apply_controls();

        let dur = self.dur_edge.process(inputs.get_or(0, 0.0));
        if dur.rose {
            self.duration.rise();
        } else if dur.fell {
            self.duration.fall();
        }

        let mult = self.mult_edge.process(inputs.get_or(1, 0.0));
        if mult.rose {
            self.multiplier.rise();
        } else if mult.fell {
            self.multiplier.fall();
        }

        let rep = self.rep_edge.process(inputs.get_or(2, 0.0));
        if rep.rose {
            self.repeater.rise();
        } else if rep.fell {
            self.repeater.fall();
        }

        if let Some(tick) = self.decimator.step(self.sample_period) {
            self.duration.clock(&tick);
            self.multiplier.clock(&tick);
            self.repeater.clock(&tick);
        }

        outputs.set(10, gate_voltage(self.duration.is_on()));
        outputs.set(11, gate_voltage(self.multiplier.is_on()));
        outputs.set(12, gate_voltage(self.repeater.is_on()));
    }

    fn reset(&mut self) {
        self.reset_transformers();
        self.dur_edge.reset();
        self.mult_edge.reset();
        self.rep_edge.reset();
        self.reset_edge.reset();
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_period = sample_period(sample_rate);
    }

    fn params(&self) -> &[ParamDef] {
        &self.params
    }

    fn get_param(&self, id: ParamId) -> Option<f64> {
        match id {
            Self::DURATION => Some(self.duration_param.base),
            Self::MULT => Some(self.mult_param.base),
            Self::REPS => Some(self.reps_param.base),
            Self::DURATION_CV => Some(self.duration_param.amount),
            Self::MULT_CV => Some(self.mult_param.amount),
            Self::REPS_CV => Some(self.reps_param.amount),
            _ => None,
        }
    }

    fn set_param(&mut self, id: ParamId, value: f64) {
        match id {
            Self::DURATION => self.duration_param.set_base(value),
            Self::MULT => self.mult_param.set_base(value),
            Self::REPS => self.reps_param.set_base(value),
            Self::DURATION_CV => self.duration_param.set_amount(value),
            Self::MULT_CV => self.mult_param.set_amount(value),
            Self::REPS_CV => self.reps_param.set_amount(value),
            _ => {}
        }
    }

    fn type_id(&self) -> &'static str {
        "ratchet"
    }

    #[cfg(feature = "alloc")]
    fn serialize_state(&self) -> Option<serde_json::Value> {
        Some(write_selections(self))
    }

    #[cfg(feature = "alloc")]
    fn deserialize_state(&mut self, state: &serde_json::Value) -> Result<(), String> {
        for (id, value) in read_selections(&self.params, state)? {
            self.set_param(id, value);
        }
        GraphModule::reset(self);
        tracing::debug!("ratchet state restored");
        Ok(())
    }
}
