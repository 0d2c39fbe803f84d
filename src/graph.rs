//! Patch Graph
//!
//! Runtime routing between clock modules. A patch owns its modules, the
//! cables between their ports, and a compiled execution order. Each call to
//! [`Patch::tick`] advances every module by one sample in that order, so a
//! downstream module sees its upstream clock edge on the same sample.

use crate::port::{GraphModule, ParamId, PortId, PortSpec, PortValues};
use serde::{Deserialize, Serialize};
use slotmap::{DefaultKey, SlotMap};
use std::collections::{HashMap, VecDeque};

/// Unique identifier for a node in the patch graph
pub type NodeId = DefaultKey;

/// Unique identifier for a cable connection
pub type CableId = usize;

/// Reference to a specific port on a specific node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub node: NodeId,
    pub port: PortId,
}

/// A cable from an output port to an input port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cable {
    pub from: PortRef,
    pub to: PortRef,
}

struct Node {
    module: Box<dyn GraphModule>,
    name: String,
}

/// Error types for patch operations
#[derive(Debug, Clone)]
pub enum PatchError {
    InvalidNode,
    InvalidPort,
    InvalidCable,
    CycleDetected { nodes: Vec<NodeId> },
    CompilationFailed(String),
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchError::InvalidNode => write!(f, "Invalid node"),
            PatchError::InvalidPort => write!(f, "Invalid port"),
            PatchError::InvalidCable => write!(f, "Invalid cable"),
            PatchError::CycleDetected { nodes } => {
                write!(f, "Cycle detected involving {} nodes", nodes.len())
            }
            PatchError::CompilationFailed(msg) => write!(f, "Compilation failed: {}", msg),
        }
    }
}

impl std::error::Error for PatchError {}

/// Handle to a node for referencing its ports by name
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    spec: PortSpec,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Reference an output port by name
    pub fn out(&self, name: &str) -> Result<PortRef, PatchError> {
        let port = self
            .spec
            .output_by_name(name)
            .ok_or(PatchError::InvalidPort)?;
        Ok(PortRef {
            node: self.id,
            port: port.id,
        })
    }

    /// Reference an input port by name
    pub fn in_(&self, name: &str) -> Result<PortRef, PatchError> {
        let port = self
            .spec
            .input_by_name(name)
            .ok_or(PatchError::InvalidPort)?;
        Ok(PortRef {
            node: self.id,
            port: port.id,
        })
    }

    pub fn spec(&self) -> &PortSpec {
        &self.spec
    }
}

/// The patch graph containing modules and connections
pub struct Patch {
    nodes: SlotMap<NodeId, Node>,
    cables: Vec<Cable>,

    execution_order: Vec<NodeId>,
    buffers: HashMap<PortRef, f64>,

    // Per-node scratch reused by `tick`
    connected: PortValues,
    inputs: PortValues,
    outputs: PortValues,

    sample_rate: f64,
}

impl Patch {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            nodes: SlotMap::new(),
            cables: Vec::new(),
            execution_order: Vec::new(),
            buffers: HashMap::new(),
            connected: PortValues::new(),
            inputs: PortValues::new(),
            outputs: PortValues::new(),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Change the sample rate of the patch and every module in it
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        for (_, node) in &mut self.nodes {
            node.module.set_sample_rate(sample_rate);
        }
    }

    /// Add a module to the patch
    pub fn add<M: GraphModule + 'static>(
        &mut self,
        name: impl Into<String>,
        module: M,
    ) -> NodeHandle {
        self.add_boxed(name, Box::new(module))
    }

    /// Add a boxed module to the patch
    pub fn add_boxed(
        &mut self,
        name: impl Into<String>,
        mut module: Box<dyn GraphModule>,
    ) -> NodeHandle {
        module.set_sample_rate(self.sample_rate);
        let spec = module.port_spec().clone();
        let id = self.nodes.insert(Node {
            module,
            name: name.into(),
        });
        self.invalidate();
        NodeHandle { id, spec }
    }

    /// Remove a module and every cable touching it
    pub fn remove(&mut self, node: NodeId) -> Result<(), PatchError> {
        if self.nodes.remove(node).is_none() {
            return Err(PatchError::InvalidNode);
        }

        self.cables
            .retain(|cable| cable.from.node != node && cable.to.node != node);

        self.invalidate();
        Ok(())
    }

    /// Connect an output port to an input port
    pub fn connect(&mut self, from: PortRef, to: PortRef) -> Result<CableId, PatchError> {
        self.validate_output_port(from)?;
        self.validate_input_port(to)?;

        self.cables.push(Cable { from, to });
        self.invalidate();
        Ok(self.cables.len() - 1)
    }

    /// Connect one output to multiple inputs
    pub fn mult(&mut self, from: PortRef, to: &[PortRef]) -> Result<Vec<CableId>, PatchError> {
        to.iter().map(|&dest| self.connect(from, dest)).collect()
    }

    /// Disconnect a cable by ID. Later cable IDs shift down by one.
    pub fn disconnect(&mut self, cable_id: CableId) -> Result<(), PatchError> {
        if cable_id >= self.cables.len() {
            return Err(PatchError::InvalidCable);
        }
        self.cables.remove(cable_id);
        self.invalidate();
        Ok(())
    }

    pub fn set_param(&mut self, node: NodeId, param: ParamId, value: f64) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.module.set_param(param, value);
        }
    }

    pub fn get_param(&self, node: NodeId, param: ParamId) -> Option<f64> {
        self.nodes.get(node).and_then(|n| n.module.get_param(param))
    }

    pub fn get_name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).map(|n| n.name.as_str())
    }

    /// Find a node by its name
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn cable_count(&self) -> usize {
        self.cables.len()
    }

    pub fn cables(&self) -> &[Cable] {
        &self.cables
    }

    /// Execution order (empty until compiled)
    pub fn execution_order(&self) -> &[NodeId] {
        &self.execution_order
    }

    pub fn is_compiled(&self) -> bool {
        !self.execution_order.is_empty() || self.nodes.is_empty()
    }

    fn invalidate(&mut self) {
        self.execution_order.clear();
    }

    fn validate_output_port(&self, port_ref: PortRef) -> Result<(), PatchError> {
        let node = self.nodes.get(port_ref.node).ok_or(PatchError::InvalidNode)?;
        node.module
            .port_spec()
            .output_by_id(port_ref.port)
            .ok_or(PatchError::InvalidPort)?;
        Ok(())
    }

    fn validate_input_port(&self, port_ref: PortRef) -> Result<(), PatchError> {
        let node = self.nodes.get(port_ref.node).ok_or(PatchError::InvalidNode)?;
        node.module
            .port_spec()
            .input_by_id(port_ref.port)
            .ok_or(PatchError::InvalidPort)?;
        Ok(())
    }

    /// Compile the patch into an executable order
    pub fn compile(&mut self) -> Result<(), PatchError> {
        let order = match self.topological_sort() {
            Ok(order) => order,
            Err(err) => {
                tracing::warn!(error = %err, "patch compilation failed");
                return Err(err);
            }
        };
        self.execution_order = order;

        self.buffers.clear();
        for (id, node) in &self.nodes {
            for output in &node.module.port_spec().outputs {
                self.buffers.insert(
                    PortRef {
                        node: id,
                        port: output.id,
                    },
                    0.0,
                );
            }
        }

        tracing::debug!(
            nodes = self.nodes.len(),
            cables = self.cables.len(),
            "patch compiled"
        );
        Ok(())
    }

    fn topological_sort(&self) -> Result<Vec<NodeId>, PatchError> {
        let mut in_degree: HashMap<NodeId, usize> = self.nodes.keys().map(|k| (k, 0)).collect();
        let mut successors: HashMap<NodeId, Vec<NodeId>> =
            self.nodes.keys().map(|k| (k, vec![])).collect();

        for cable in &self.cables {
            *in_degree.entry(cable.to.node).or_insert(0) += 1;
            successors
                .entry(cable.from.node)
                .or_default()
                .push(cable.to.node);
        }

        // Kahn's algorithm
        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            result.push(node);
            let Some(next) = successors.get(&node) else {
                continue;
            };
            for succ in next {
                if let Some(deg) = in_degree.get_mut(succ) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(*succ);
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let in_cycle: Vec<NodeId> = in_degree
                .into_iter()
                .filter(|(_, deg)| *deg > 0)
                .map(|(id, _)| id)
                .collect();
            return Err(PatchError::CycleDetected { nodes: in_cycle });
        }

        Ok(result)
    }

    /// Advance every module by one sample.
    ///
    /// Input and output maps are reused across nodes and samples, so once the
    /// first sample has sized them nothing here allocates.
    pub fn tick(&mut self) {
        for &node_id in &self.execution_order {
            let Some(node) = self.nodes.get_mut(node_id) else {
                continue;
            };
            let spec = node.module.port_spec();

            self.connected.clear();
            for cable in self.cables.iter().filter(|c| c.to.node == node_id) {
                let Some(input) = spec.input_by_id(cable.to.port) else {
                    continue;
                };
                let value = self.buffers.get(&cable.from).copied().unwrap_or(0.0);
                // CV mixes like a passive summing bus, gates and clocks OR together
                if input.kind.is_summable() {
                    self.connected.accumulate(input.id, value);
                } else {
                    self.connected.merge_max(input.id, value);
                }
            }
            spec.resolve_into(&self.connected, &mut self.inputs);

            self.outputs.clear();
            node.module.tick(&self.inputs, &mut self.outputs);

            for (&port, &value) in &self.outputs.values {
                if let Some(slot) = self.buffers.get_mut(&PortRef {
                    node: node_id,
                    port,
                }) {
                    *slot = value;
                }
            }
        }
    }

    /// Most recent value of an output port
    pub fn value(&self, port: PortRef) -> f64 {
        self.buffers.get(&port).copied().unwrap_or(0.0)
    }

    /// Reset all modules and clear the port buffers
    pub fn reset(&mut self) {
        for (_, node) in &mut self.nodes {
            node.module.reset();
        }
        for value in self.buffers.values_mut() {
            *value = 0.0;
        }
    }

    /// Iterate over all nodes
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &str, &dyn GraphModule)> {
        self.nodes
            .iter()
            .map(|(id, node)| (id, node.name.as_str(), node.module.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{DivideCombine, TempoClock};
    use crate::port::{PortDef, SignalKind};

    /// Constant voltage source
    struct Source {
        value: f64,
        spec: PortSpec,
    }

    impl Source {
        fn new(value: f64, kind: SignalKind) -> Self {
            Self {
                value,
                spec: PortSpec {
                    inputs: vec![],
                    outputs: vec![PortDef::new(10, "out", kind)],
                },
            }
        }
    }

    impl GraphModule for Source {
        fn port_spec(&self) -> &PortSpec {
            &self.spec
        }

        fn tick(&mut self, _: &PortValues, outputs: &mut PortValues) {
            outputs.set(10, self.value);
        }

        fn reset(&mut self) {}

        fn set_sample_rate(&mut self, _: f64) {}
    }

    /// Echoes its inputs so tests can observe what a module receives
    struct Probe {
        spec: PortSpec,
    }

    impl Probe {
        fn new() -> Self {
            Self {
                spec: PortSpec {
                    inputs: vec![
                        PortDef::new(0, "gate", SignalKind::Gate),
                        PortDef::new(1, "cv", SignalKind::CvBipolar),
                        PortDef::new(2, "thru", SignalKind::Gate).normalled_to(0),
                    ],
                    outputs: vec![
                        PortDef::new(10, "gate", SignalKind::Gate),
                        PortDef::new(11, "cv", SignalKind::CvBipolar),
                        PortDef::new(12, "thru", SignalKind::Gate),
                    ],
                },
            }
        }
    }

    impl GraphModule for Probe {
        fn port_spec(&self) -> &PortSpec {
            &self.spec
        }

        fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
            outputs.set(10, inputs.get_or(0, -1.0));
            outputs.set(11, inputs.get_or(1, -1.0));
            outputs.set(12, inputs.get_or(2, -1.0));
        }

        fn reset(&mut self) {}

        fn set_sample_rate(&mut self, _: f64) {}
    }

    #[test]
    fn test_add_module() {
        let mut patch = Patch::new(48000.0);
        let handle = patch.add("clock", TempoClock::default());
        assert_eq!(patch.node_count(), 1);
        assert_eq!(patch.get_name(handle.id()), Some("clock"));
        assert_eq!(patch.find("clock"), Some(handle.id()));
    }

    #[test]
    fn test_unknown_port_name() {
        let mut patch = Patch::new(48000.0);
        let clock = patch.add("clock", TempoClock::default());
        assert!(matches!(clock.out("nope"), Err(PatchError::InvalidPort)));
        // Inputs and outputs are separate namespaces
        assert!(clock.in_("main").is_err());
    }

    #[test]
    fn test_connect_validates_direction() {
        let mut patch = Patch::new(48000.0);
        let clock = patch.add("clock", TempoClock::default());
        let div = patch.add("div", DivideCombine::default());

        let to = div.in_("div_clock").unwrap();
        assert!(patch.connect(clock.out("main").unwrap(), to).is_ok());
        let result = patch.connect(to, clock.in_("reset").unwrap());
        assert!(matches!(result, Err(PatchError::InvalidPort)));
        assert_eq!(patch.cable_count(), 1);
    }

    #[test]
    fn test_topological_sort() {
        let mut patch = Patch::new(48000.0);
        let c = patch.add("c", DivideCombine::default());
        let b = patch.add("b", DivideCombine::default());
        let a = patch.add("a", TempoClock::default());

        // A -> B -> C
        patch
            .connect(a.out("main").unwrap(), b.in_("div_clock").unwrap())
            .unwrap();
        patch
            .connect(b.out("div").unwrap(), c.in_("div_clock").unwrap())
            .unwrap();

        patch.compile().unwrap();

        let order = patch.execution_order();
        let a_pos = order.iter().position(|&x| x == a.id()).unwrap();
        let b_pos = order.iter().position(|&x| x == b.id()).unwrap();
        let c_pos = order.iter().position(|&x| x == c.id()).unwrap();

        assert!(a_pos < b_pos, "A should come before B");
        assert!(b_pos < c_pos, "B should come before C");
    }

    #[test]
    fn test_cycle_detection() {
        let mut patch = Patch::new(48000.0);
        let a = patch.add("a", DivideCombine::default());
        let b = patch.add("b", DivideCombine::default());

        patch
            .connect(a.out("div").unwrap(), b.in_("div_clock").unwrap())
            .unwrap();
        patch
            .connect(b.out("div").unwrap(), a.in_("div_clock").unwrap())
            .unwrap();

        let result = patch.compile();
        assert!(matches!(result, Err(PatchError::CycleDetected { .. })));
        assert!(!patch.is_compiled());
    }

    #[test]
    fn test_gates_or_and_cv_sums() {
        let mut patch = Patch::new(48000.0);
        let high = patch.add("high", Source::new(10.0, SignalKind::Gate));
        let low = patch.add("low", Source::new(0.0, SignalKind::Gate));
        let cv_a = patch.add("cv_a", Source::new(2.0, SignalKind::CvBipolar));
        let cv_b = patch.add("cv_b", Source::new(3.0, SignalKind::CvBipolar));
        let probe = patch.add("probe", Probe::new());

        patch
            .mult(high.out("out").unwrap(), &[probe.in_("gate").unwrap()])
            .unwrap();
        patch
            .connect(low.out("out").unwrap(), probe.in_("gate").unwrap())
            .unwrap();
        patch
            .connect(cv_a.out("out").unwrap(), probe.in_("cv").unwrap())
            .unwrap();
        patch
            .connect(cv_b.out("out").unwrap(), probe.in_("cv").unwrap())
            .unwrap();

        patch.compile().unwrap();
        patch.tick();

        assert_eq!(patch.value(probe.out("gate").unwrap()), 10.0);
        assert_eq!(patch.value(probe.out("cv").unwrap()), 5.0);
        // Unpatched input follows its normal
        assert_eq!(patch.value(probe.out("thru").unwrap()), 10.0);
    }

    #[test]
    fn test_inputs_do_not_carry_over_between_nodes() {
        let mut patch = Patch::new(48000.0);
        let gate = patch.add("gate", Source::new(10.0, SignalKind::Gate));
        let cv = patch.add("cv", Source::new(4.0, SignalKind::CvBipolar));
        let wired = patch.add("wired", Probe::new());
        let bare = patch.add("bare", Probe::new());

        patch
            .connect(gate.out("out").unwrap(), wired.in_("gate").unwrap())
            .unwrap();
        patch
            .connect(cv.out("out").unwrap(), wired.in_("cv").unwrap())
            .unwrap();
        patch.compile().unwrap();

        // Repeated samples see the same values, never accumulated ones
        for _ in 0..3 {
            patch.tick();
            assert_eq!(patch.value(wired.out("gate").unwrap()), 10.0);
            assert_eq!(patch.value(wired.out("cv").unwrap()), 4.0);
            assert_eq!(patch.value(bare.out("gate").unwrap()), 0.0);
            assert_eq!(patch.value(bare.out("cv").unwrap()), 0.0);
            assert_eq!(patch.value(bare.out("thru").unwrap()), 0.0);
        }
    }

    #[test]
    fn test_unpatched_inputs_take_defaults() {
        let mut patch = Patch::new(48000.0);
        let probe = patch.add("probe", Probe::new());
        patch.compile().unwrap();
        patch.tick();

        assert_eq!(patch.value(probe.out("gate").unwrap()), 0.0);
        assert_eq!(patch.value(probe.out("cv").unwrap()), 0.0);
        assert_eq!(patch.value(probe.out("thru").unwrap()), 0.0);
    }

    #[test]
    fn test_clock_drives_divider_in_same_sample() {
        let mut patch = Patch::new(48000.0);
        let clock = patch.add("clock", TempoClock::default());
        let div = patch.add("div", DivideCombine::default());
        let main = clock.out("main").unwrap();
        let divided = div.out("div").unwrap();

        patch.connect(main, div.in_("div_clock").unwrap()).unwrap();
        patch.set_param(div.id(), DivideCombine::DIV, 2.0);
        patch.compile().unwrap();

        let mut clock_edges = Vec::new();
        let mut div_edges = Vec::new();
        let (mut last_clock, mut last_div) = (0.0, 0.0);
        // 120 BPM at 48 kHz: one beat every 24000 samples
        for s in 0..100_000 {
            patch.tick();
            let (c, d) = (patch.value(main), patch.value(divided));
            if c > 5.0 && last_clock <= 5.0 {
                clock_edges.push(s);
            }
            if d > 5.0 && last_div <= 5.0 {
                div_edges.push(s);
            }
            last_clock = c;
            last_div = d;
        }

        assert_eq!(clock_edges.len(), 4);
        // The divider toggles on every second beat, on the beat itself
        assert_eq!(div_edges, vec![clock_edges[1]]);
    }

    #[test]
    fn test_disconnect() {
        let mut patch = Patch::new(48000.0);
        let a = patch.add("a", TempoClock::default());
        let b = patch.add("b", DivideCombine::default());

        let cable_id = patch
            .connect(a.out("b").unwrap(), b.in_("plus_clock").unwrap())
            .unwrap();
        assert_eq!(patch.cable_count(), 1);

        patch.disconnect(cable_id).unwrap();
        assert_eq!(patch.cable_count(), 0);
        assert!(matches!(
            patch.disconnect(cable_id),
            Err(PatchError::InvalidCable)
        ));
    }

    #[test]
    fn test_remove_module() {
        let mut patch = Patch::new(48000.0);
        let a = patch.add("a", TempoClock::default());
        let b = patch.add("b", DivideCombine::default());

        patch
            .connect(a.out("main").unwrap(), b.in_("div_clock").unwrap())
            .unwrap();

        patch.remove(a.id()).unwrap();
        assert_eq!(patch.node_count(), 1);
        assert_eq!(patch.cable_count(), 0);
        assert!(matches!(patch.remove(a.id()), Err(PatchError::InvalidNode)));
    }

    #[test]
    fn test_params_through_patch() {
        let mut patch = Patch::new(48000.0);
        let clock = patch.add("clock", TempoClock::default());
        patch.set_param(clock.id(), TempoClock::BPM, 90.0);
        assert_eq!(patch.get_param(clock.id(), TempoClock::BPM), Some(90.0));
    }
}
