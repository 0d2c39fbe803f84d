//! Signal Conventions and Port System
//!
//! This module defines the signal kinds, port and parameter definitions, and the
//! type-erased [`GraphModule`] interface a host drives once per sample.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a port within a module
pub type PortId = u32;

/// Unique identifier for a parameter within a module
pub type ParamId = u32;

/// Voltage written to an output while it is asserted
pub const GATE_HIGH: f64 = 10.0;

/// Voltage written to an output while it is deasserted
pub const GATE_LOW: f64 = 0.0;

/// Convert a logical state into an output voltage
#[inline]
pub fn gate_voltage(high: bool) -> f64 {
    if high {
        GATE_HIGH
    } else {
        GATE_LOW
    }
}

/// Semantic signal classification following hardware modular conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Bipolar control voltage, ±10V
    CvBipolar,

    /// Unipolar control voltage, 0–10V
    CvUnipolar,

    /// Gate signal, binary state: 0V (low) or +10V (high)
    /// Remains high while an event is active
    Gate,

    /// Trigger signal, short pulse at +10V
    Trigger,

    /// Clock signal, regular pulses at tempo
    Clock,
}

impl SignalKind {
    /// Returns the typical voltage range (min, max) for this signal type
    pub fn voltage_range(&self) -> (f64, f64) {
        match self {
            SignalKind::CvBipolar => (-10.0, 10.0),
            SignalKind::CvUnipolar => (0.0, 10.0),
            SignalKind::Gate | SignalKind::Trigger | SignalKind::Clock => (GATE_LOW, GATE_HIGH),
        }
    }

    /// Whether multiple signals of this kind should be summed when connected.
    /// Non-summable kinds combine as a logical OR (the highest voltage wins).
    pub fn is_summable(&self) -> bool {
        matches!(self, SignalKind::CvBipolar | SignalKind::CvUnipolar)
    }

    /// Hysteresis thresholds (low, high) for edge detection
    pub fn thresholds(&self) -> Option<(f64, f64)> {
        match self {
            SignalKind::Gate | SignalKind::Trigger | SignalKind::Clock => Some((0.1, 2.0)),
            _ => None,
        }
    }
}

/// Definition of a single port (input or output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDef {
    /// Unique identifier within the module
    pub id: PortId,

    /// Human-readable name (e.g., "clock", "reset", "div")
    pub name: String,

    /// Signal type for validation and combining
    pub kind: SignalKind,

    /// Default value when no cable is connected and nothing is normalled
    pub default: f64,

    /// For inputs: another input of the same module whose effective value is
    /// used while this one is unpatched
    pub normalled_to: Option<PortId>,
}

impl PortDef {
    pub fn new(id: PortId, name: impl Into<String>, kind: SignalKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            default: 0.0,
            normalled_to: None,
        }
    }

    pub fn with_default(mut self, default: f64) -> Self {
        self.default = default;
        self
    }

    pub fn normalled_to(mut self, port: PortId) -> Self {
        self.normalled_to = Some(port);
        self
    }
}

/// Specification of all ports for a module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSpec {
    pub inputs: Vec<PortDef>,
    pub outputs: Vec<PortDef>,
}

impl PortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_by_name(&self, name: &str) -> Option<&PortDef> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_by_name(&self, name: &str) -> Option<&PortDef> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn input_by_id(&self, id: PortId) -> Option<&PortDef> {
        self.inputs.iter().find(|p| p.id == id)
    }

    pub fn output_by_id(&self, id: PortId) -> Option<&PortDef> {
        self.outputs.iter().find(|p| p.id == id)
    }

    /// Complete a set of input values in which only connected inputs are
    /// present.
    ///
    /// Every missing input takes the effective value of its normalled source,
    /// following chains of normals (A → B → C) until a connected input is
    /// found. Inputs whose chain ends unconnected, or loops back on itself,
    /// fall back to their declared default.
    pub fn resolve_inputs(&self, values: &mut PortValues) {
        let connected = values.clone();
        self.resolve_into(&connected, values);
    }

    /// Allocation-free form of [`PortSpec::resolve_inputs`]: reads the
    /// connected values from `connected` and writes every input to `resolved`
    pub fn resolve_into(&self, connected: &PortValues, resolved: &mut PortValues) {
        resolved.clear();
        for input in &self.inputs {
            if let Some(value) = connected.get(input.id) {
                resolved.set(input.id, value);
                continue;
            }

            let mut source = input.normalled_to;
            let mut value = None;
            for _ in 0..self.inputs.len() {
                let Some(id) = source else { break };
                if let Some(v) = connected.get(id) {
                    value = Some(v);
                    break;
                }
                source = self.input_by_id(id).and_then(|p| p.normalled_to);
            }

            resolved.set(input.id, value.unwrap_or(input.default));
        }
    }
}

/// Runtime port values container
#[derive(Debug, Clone, Default)]
pub struct PortValues {
    pub values: HashMap<PortId, f64>,
}

impl PortValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PortId) -> Option<f64> {
        self.values.get(&id).copied()
    }

    pub fn get_or(&self, id: PortId, default: f64) -> f64 {
        self.values.get(&id).copied().unwrap_or(default)
    }

    pub fn set(&mut self, id: PortId, value: f64) {
        self.values.insert(id, value);
    }

    /// Sum a value into a port (CV mixing)
    pub fn accumulate(&mut self, id: PortId, value: f64) {
        *self.values.entry(id).or_insert(0.0) += value;
    }

    /// Keep the higher of the current and incoming value (gate OR)
    pub fn merge_max(&mut self, id: PortId, value: f64) {
        let slot = self.values.entry(id).or_insert(value);
        if value > *slot {
            *slot = value;
        }
    }

    pub fn has(&self, id: PortId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Valid range of a parameter in engineering units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamRange {
    /// Any value between min and max
    Continuous { min: f64, max: f64 },

    /// Whole numbers between min and max (ratio indices, counts, mode switches)
    Stepped { min: f64, max: f64 },
}

impl ParamRange {
    pub fn min(&self) -> f64 {
        match *self {
            ParamRange::Continuous { min, .. } | ParamRange::Stepped { min, .. } => min,
        }
    }

    pub fn max(&self) -> f64 {
        match *self {
            ParamRange::Continuous { max, .. } | ParamRange::Stepped { max, .. } => max,
        }
    }

    pub fn span(&self) -> f64 {
        self.max() - self.min()
    }

    /// Clamp (and for stepped ranges, round) a raw value into range
    pub fn apply(&self, value: f64) -> f64 {
        match *self {
            ParamRange::Continuous { min, max } => value.clamp(min, max),
            ParamRange::Stepped { min, max } => libm::round(value.clamp(min, max)),
        }
    }
}

/// A parameter that combines a base value (knob) with CV modulation.
///
/// A full-scale CV swing of 10V moves the value across the whole range when
/// `amount` is 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulatedParam {
    /// Knob value in engineering units
    pub base: f64,

    /// Incoming CV voltage (set during tick)
    pub cv: f64,

    /// CV amount (0.0 to 1.0)
    pub amount: f64,

    /// Valid range of the summed value
    pub range: ParamRange,
}

impl ModulatedParam {
    pub fn new(range: ParamRange) -> Self {
        Self {
            base: range.min(),
            cv: 0.0,
            amount: 0.0,
            range,
        }
    }

    pub fn with_base(mut self, base: f64) -> Self {
        self.base = self.range.apply(base);
        self
    }

    /// Effective value: knob plus scaled CV, clamped to the range
    pub fn value(&self) -> f64 {
        let modulation = self.cv / 10.0 * self.amount * self.range.span();
        self.range.apply(self.base + modulation)
    }

    pub fn set_base(&mut self, base: f64) {
        self.base = self.range.apply(base);
    }

    pub fn set_cv(&mut self, cv: f64) {
        self.cv = cv;
    }

    pub fn set_amount(&mut self, amount: f64) {
        self.amount = amount.clamp(0.0, 1.0);
    }
}

/// Parameter definition for UI binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub id: ParamId,
    pub name: String,
    pub default: f64,
    pub range: ParamRange,
}

impl ParamDef {
    pub fn new(id: ParamId, name: impl Into<String>, default: f64, range: ParamRange) -> Self {
        Self {
            id,
            name: name.into(),
            default,
            range,
        }
    }
}

/// Type-erased module interface driven by the host once per sample
pub trait GraphModule: Send + Sync {
    /// Returns the module's port specification
    fn port_spec(&self) -> &PortSpec;

    /// Process one sample given the effective input values
    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues);

    /// Force every transformer back to idle with all outputs low
    fn reset(&mut self);

    /// Set sample rate
    fn set_sample_rate(&mut self, sample_rate: f64);

    /// Get parameter definitions for UI binding
    fn params(&self) -> &[ParamDef] {
        &[]
    }

    /// Get a parameter value
    fn get_param(&self, _id: ParamId) -> Option<f64> {
        None
    }

    /// Set a parameter value
    fn set_param(&mut self, _id: ParamId, _value: f64) {}

    /// Get module type identifier for serialization
    fn type_id(&self) -> &'static str {
        "unknown"
    }

    /// Serialize the user-facing selections (never internal phase)
    #[cfg(feature = "alloc")]
    fn serialize_state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restore user-facing selections; transformers restart idle
    #[cfg(feature = "alloc")]
    fn deserialize_state(&mut self, _state: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_signal_kind_ranges() {
        assert_eq!(SignalKind::Gate.voltage_range(), (0.0, 10.0));
        assert_eq!(SignalKind::CvBipolar.voltage_range(), (-10.0, 10.0));
        assert_eq!(SignalKind::CvUnipolar.voltage_range(), (0.0, 10.0));
    }

    #[test]
    fn test_signal_kind_summable() {
        assert!(SignalKind::CvBipolar.is_summable());
        assert!(!SignalKind::Gate.is_summable());
        assert!(!SignalKind::Clock.is_summable());
    }

    #[test]
    fn test_signal_kind_thresholds() {
        assert_eq!(SignalKind::Clock.thresholds(), Some((0.1, 2.0)));
        assert!(SignalKind::CvUnipolar.thresholds().is_none());
    }

    #[test]
    fn test_port_values() {
        let mut pv = PortValues::new();
        pv.set(0, 1.0);
        pv.set(1, 2.0);
        assert_eq!(pv.get(0), Some(1.0));
        assert_eq!(pv.get(2), None);
        assert_eq!(pv.get_or(2, 5.0), 5.0);

        pv.accumulate(0, 0.5);
        assert_eq!(pv.get(0), Some(1.5));

        pv.merge_max(1, 10.0);
        pv.merge_max(1, 3.0);
        assert_eq!(pv.get(1), Some(10.0));
    }

    #[test]
    fn test_param_range_stepped_rounds() {
        let range = ParamRange::Stepped { min: 0.0, max: 32.0 };
        assert_eq!(range.apply(3.4), 3.0);
        assert_eq!(range.apply(3.6), 4.0);
        assert_eq!(range.apply(-2.0), 0.0);
        assert_eq!(range.apply(99.0), 32.0);
    }

    #[test]
    fn test_modulated_param() {
        let mut param =
            ModulatedParam::new(ParamRange::Continuous { min: 0.0, max: 1.0 }).with_base(0.5);
        assert_relative_eq!(param.value(), 0.5);

        // CV has no effect with zero amount
        param.set_cv(5.0);
        assert_relative_eq!(param.value(), 0.5);

        param.set_amount(1.0);
        assert_relative_eq!(param.value(), 1.0);

        param.set_cv(-10.0);
        assert_relative_eq!(param.value(), 0.0);
    }

    #[test]
    fn test_normalled_input_takes_source_value() {
        let spec = PortSpec {
            inputs: vec![
                PortDef::new(0, "a", SignalKind::Clock),
                PortDef::new(1, "b", SignalKind::Clock).normalled_to(0),
                PortDef::new(2, "c", SignalKind::Clock).normalled_to(1),
            ],
            outputs: vec![],
        };

        let mut values = PortValues::new();
        values.set(0, 10.0);
        spec.resolve_inputs(&mut values);
        assert_eq!(values.get(1), Some(10.0));
        assert_eq!(values.get(2), Some(10.0));

        // A patched input breaks the normal
        let mut values = PortValues::new();
        values.set(0, 10.0);
        values.set(1, 0.0);
        spec.resolve_inputs(&mut values);
        assert_eq!(values.get(2), Some(0.0));
    }

    #[test]
    fn test_mutual_normals_fall_back_to_default() {
        let spec = PortSpec {
            inputs: vec![
                PortDef::new(0, "left", SignalKind::Clock).normalled_to(1),
                PortDef::new(1, "right", SignalKind::Clock)
                    .normalled_to(0)
                    .with_default(1.0),
            ],
            outputs: vec![],
        };

        let mut values = PortValues::new();
        spec.resolve_inputs(&mut values);
        assert_eq!(values.get(0), Some(0.0));
        assert_eq!(values.get(1), Some(1.0));

        let mut values = PortValues::new();
        values.set(1, 5.0);
        spec.resolve_inputs(&mut values);
        assert_eq!(values.get(0), Some(5.0));
    }

    #[test]
    fn test_resolve_into_replaces_previous_values() {
        let spec = PortSpec {
            inputs: vec![
                PortDef::new(0, "clock", SignalKind::Clock),
                PortDef::new(1, "other", SignalKind::Clock).normalled_to(0),
            ],
            outputs: vec![],
        };

        let mut connected = PortValues::new();
        let mut resolved = PortValues::new();
        connected.set(0, 10.0);
        spec.resolve_into(&connected, &mut resolved);
        assert_eq!(resolved.get(1), Some(10.0));

        connected.clear();
        resolved.set(7, 3.0);
        spec.resolve_into(&connected, &mut resolved);
        assert_eq!(resolved.get(0), Some(0.0));
        assert_eq!(resolved.get(1), Some(0.0));
        assert!(!resolved.has(7));
    }

    #[test]
    fn test_port_spec_lookup() {
        let spec = PortSpec {
            inputs: vec![PortDef::new(0, "clock", SignalKind::Clock)],
            outputs: vec![PortDef::new(10, "out", SignalKind::Gate)],
        };

        assert!(spec.input_by_name("clock").is_some());
        assert!(spec.input_by_name("nonexistent").is_none());
        assert!(spec.output_by_id(10).is_some());
        assert!(spec.output_by_id(99).is_none());
    }
}
