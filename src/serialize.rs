//! Serialization and Persistence
//!
//! Patch documents, the registry of instantiable clock modules, and the
//! conversion between a live [`Patch`] and its [`PatchDef`].
//!
//! Only user selections are persisted. Loading a patch always starts every
//! transformer idle.

use crate::graph::{NodeHandle, Patch, PatchError};
use crate::modules::{DivideCombine, Ratchet, TempoClock};
use crate::port::{GraphModule, PortSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Serializable patch definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchDef {
    /// Schema version for forward compatibility
    pub version: u32,

    pub name: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,

    /// Module instances
    pub modules: Vec<ModuleDef>,

    /// Cable connections
    pub cables: Vec<CableDef>,

    /// Parameter overrides applied after module state
    /// (key: "module_name.param_name")
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
}

impl PatchDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: 1,
            name: name.into(),
            author: None,
            description: None,
            tags: vec![],
            modules: vec![],
            cables: vec![],
            parameters: HashMap::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_module(mut self, module: ModuleDef) -> Self {
        self.modules.push(module);
        self
    }

    pub fn with_cable(mut self, cable: CableDef) -> Self {
        self.cables.push(cable);
        self
    }

    /// Override one parameter, addressed as "module_name.param_name"
    pub fn with_parameter(mut self, key: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for PatchDef {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

/// Serializable module definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDef {
    /// Unique instance name
    pub name: String,

    /// Module type identifier
    pub module_type: String,

    /// Saved user selections
    pub state: Option<serde_json::Value>,
}

impl ModuleDef {
    pub fn new(name: impl Into<String>, module_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_type: module_type.into(),
            state: None,
        }
    }

    pub fn with_state(mut self, state: serde_json::Value) -> Self {
        self.state = Some(state);
        self
    }
}

/// Serializable cable definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CableDef {
    /// Source: "module_name.port_name"
    pub from: String,

    /// Destination: "module_name.port_name"
    pub to: String,
}

impl CableDef {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Module factory function type
pub type ModuleFactory = Box<dyn Fn(f64) -> Box<dyn GraphModule> + Send + Sync>;

/// Metadata about a registered module type
#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    pub type_id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub port_spec: PortSpec,
}

/// Registry of available module types for instantiation
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
    metadata: HashMap<String, ModuleMetadata>,
}

impl ModuleRegistry {
    /// Create a registry holding the built-in clock modules
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            metadata: HashMap::new(),
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        self.register_factory(
            "tempo_clock",
            "Tempo Clock",
            "Clocks",
            "Master clock with two ratio lanes and a global multiplier",
            |sr| Box::new(TempoClock::new(sr)),
        );

        self.register_factory(
            "divide_combine",
            "Divide / Combine",
            "Clock Processing",
            "Divider plus counter or delay, chained into a combined output",
            |sr| Box::new(DivideCombine::new(sr)),
        );

        self.register_factory(
            "ratchet",
            "Ratchet",
            "Clock Processing",
            "Pulse width, clock multiplier and burst repeater",
            |sr| Box::new(Ratchet::new(sr)),
        );
    }

    /// Register a module factory with metadata
    pub fn register_factory<F>(
        &mut self,
        type_id: &str,
        name: &str,
        category: &str,
        description: &str,
        factory: F,
    ) where
        F: Fn(f64) -> Box<dyn GraphModule> + Send + Sync + 'static,
    {
        // Port layout comes from a throwaway instance
        let port_spec = factory(48000.0).port_spec().clone();

        self.factories.insert(type_id.to_string(), Box::new(factory));
        self.metadata.insert(
            type_id.to_string(),
            ModuleMetadata {
                type_id: type_id.to_string(),
                name: name.to_string(),
                category: category.to_string(),
                description: description.to_string(),
                port_spec,
            },
        );
    }

    pub fn instantiate(&self, type_id: &str, sample_rate: f64) -> Option<Box<dyn GraphModule>> {
        self.factories.get(type_id).map(|f| f(sample_rate))
    }

    pub fn list_modules(&self) -> impl Iterator<Item = &ModuleMetadata> {
        self.metadata.values()
    }

    pub fn get_metadata(&self, type_id: &str) -> Option<&ModuleMetadata> {
        self.metadata.get(type_id)
    }

    pub fn list_by_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a ModuleMetadata> {
        self.metadata
            .values()
            .filter(move |m| m.category == category)
    }

    /// All unique categories, sorted
    pub fn categories(&self) -> Vec<String> {
        let mut cats: Vec<_> = self.metadata.values().map(|m| m.category.clone()).collect();
        cats.sort();
        cats.dedup();
        cats
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Patch {
    /// Convert the patch to a serializable definition
    pub fn to_def(&self, name: &str) -> PatchDef {
        let modules: Vec<ModuleDef> = self
            .nodes()
            .map(|(_, node_name, module)| ModuleDef {
                name: node_name.to_string(),
                module_type: module.type_id().to_string(),
                state: module.serialize_state(),
            })
            .collect();

        let cables: Vec<CableDef> = self
            .cables()
            .iter()
            .filter_map(|cable| {
                let (_, from_name, from_module) =
                    self.nodes().find(|(id, _, _)| *id == cable.from.node)?;
                let (_, to_name, to_module) =
                    self.nodes().find(|(id, _, _)| *id == cable.to.node)?;

                let from_port = from_module.port_spec().output_by_id(cable.from.port)?;
                let to_port = to_module.port_spec().input_by_id(cable.to.port)?;

                Some(CableDef::new(
                    format!("{}.{}", from_name, from_port.name),
                    format!("{}.{}", to_name, to_port.name),
                ))
            })
            .collect();

        PatchDef {
            modules,
            cables,
            ..PatchDef::new(name)
        }
    }

    /// Build and compile a patch from a definition
    pub fn from_def(
        def: &PatchDef,
        registry: &ModuleRegistry,
        sample_rate: f64,
    ) -> Result<Self, PatchError> {
        let mut patch = Patch::new(sample_rate);
        let mut name_to_handle: HashMap<String, NodeHandle> = HashMap::new();

        for module_def in &def.modules {
            if name_to_handle.contains_key(&module_def.name) {
                return Err(PatchError::CompilationFailed(format!(
                    "Duplicate module name: {}",
                    module_def.name
                )));
            }

            let mut module = registry
                .instantiate(&module_def.module_type, sample_rate)
                .ok_or_else(|| {
                    PatchError::CompilationFailed(format!(
                        "Unknown module type: {}",
                        module_def.module_type
                    ))
                })?;

            if let Some(state) = &module_def.state {
                module.deserialize_state(state).map_err(|e| {
                    PatchError::CompilationFailed(format!(
                        "Invalid state for {}: {}",
                        module_def.name, e
                    ))
                })?;
            }

            let handle = patch.add_boxed(&module_def.name, module);
            name_to_handle.insert(module_def.name.clone(), handle);
        }

        for (key, &value) in &def.parameters {
            let (module_name, param_name) = parse_port_ref(key)?;
            let handle = name_to_handle.get(module_name).ok_or_else(|| {
                PatchError::CompilationFailed(format!("Unknown module: {}", module_name))
            })?;
            let param = patch
                .nodes()
                .find(|(id, _, _)| *id == handle.id())
                .and_then(|(_, _, m)| m.params().iter().find(|p| p.name == param_name))
                .map(|p| p.id)
                .ok_or_else(|| {
                    PatchError::CompilationFailed(format!("Unknown parameter: {}", key))
                })?;
            patch.set_param(handle.id(), param, value);
        }

        for cable_def in &def.cables {
            let (from_module, from_port) = parse_port_ref(&cable_def.from)?;
            let (to_module, to_port) = parse_port_ref(&cable_def.to)?;

            let from_handle = name_to_handle.get(from_module).ok_or_else(|| {
                PatchError::CompilationFailed(format!("Unknown module: {}", from_module))
            })?;

            let to_handle = name_to_handle.get(to_module).ok_or_else(|| {
                PatchError::CompilationFailed(format!("Unknown module: {}", to_module))
            })?;

            patch.connect(from_handle.out(from_port)?, to_handle.in_(to_port)?)?;
        }

        patch.compile()?;
        tracing::debug!(
            name = %def.name,
            modules = def.modules.len(),
            cables = def.cables.len(),
            "patch loaded"
        );
        Ok(patch)
    }
}

fn parse_port_ref(s: &str) -> Result<(&str, &str), PatchError> {
    s.split_once('.').ok_or_else(|| {
        PatchError::CompilationFailed(format!("Invalid port reference: {}", s))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::CombineMode;

    fn sample_patch() -> Patch {
        let mut patch = Patch::new(48000.0);
        let clock = patch.add("clock", TempoClock::new(48000.0));
        let div = patch.add("div", DivideCombine::new(48000.0));
        let ratchet = patch.add("ratchet", Ratchet::new(48000.0));

        patch
            .connect(clock.out("main").unwrap(), div.in_("div_clock").unwrap())
            .unwrap();
        patch
            .connect(clock.out("b").unwrap(), ratchet.in_("dur_trig").unwrap())
            .unwrap();
        patch.set_param(clock.id(), TempoClock::BPM, 96.0);
        patch.set_param(div.id(), DivideCombine::MODE, 1.0);
        patch.compile().unwrap();
        patch
    }

    #[test]
    fn test_patch_def_serialization() {
        let def = PatchDef::new("Test Patch")
            .with_author("Test Author")
            .with_description("A test patch")
            .with_tag("test");

        let json = def.to_json().unwrap();
        let loaded = PatchDef::from_json(&json).unwrap();

        assert_eq!(loaded.name, "Test Patch");
        assert_eq!(loaded.author, Some("Test Author".to_string()));
        assert_eq!(loaded.tags, vec!["test".to_string()]);
    }

    #[test]
    fn test_patch_roundtrip() {
        let registry = ModuleRegistry::new();
        let def = sample_patch().to_def("Test");
        let json = def.to_json().unwrap();

        let loaded_def = PatchDef::from_json(&json).unwrap();
        let loaded = Patch::from_def(&loaded_def, &registry, 48000.0).unwrap();

        assert_eq!(loaded.node_count(), 3);
        assert_eq!(loaded.cable_count(), 2);
        assert!(loaded.is_compiled());

        let clock = loaded.find("clock").unwrap();
        assert_eq!(loaded.get_param(clock, TempoClock::BPM), Some(96.0));
        let div = loaded.find("div").unwrap();
        assert_eq!(
            loaded.get_param(div, DivideCombine::MODE),
            Some(CombineMode::Delay.index() as f64)
        );

        let mut cables = loaded.to_def("Again").cables;
        cables.sort_by(|a, b| a.from.cmp(&b.from));
        assert_eq!(
            cables,
            vec![
                CableDef::new("clock.b", "ratchet.dur_trig"),
                CableDef::new("clock.main", "div.div_clock"),
            ]
        );
    }

    #[test]
    fn test_patch_def_default() {
        let def = PatchDef::default();
        assert_eq!(def.name, "Untitled");
        assert_eq!(def.version, 1);
    }

    #[test]
    fn test_parameter_overrides() {
        let registry = ModuleRegistry::new();
        let def = PatchDef::new("Overrides")
            .with_module(
                ModuleDef::new("clock", "tempo_clock")
                    .with_state(serde_json::json!({ "bpm": 100.0 })),
            )
            .with_parameter("clock.bpm", 140.0)
            .with_parameter("clock.ratio_b", 8.0);

        let patch = Patch::from_def(&def, &registry, 48000.0).unwrap();
        let clock = patch.find("clock").unwrap();
        assert_eq!(patch.get_param(clock, TempoClock::BPM), Some(140.0));
        assert_eq!(patch.get_param(clock, TempoClock::RATIO_B), Some(8.0));

        let bad = PatchDef::new("Bad")
            .with_module(ModuleDef::new("clock", "tempo_clock"))
            .with_parameter("clock.swing", 1.0);
        assert!(Patch::from_def(&bad, &registry, 48000.0).is_err());
    }

    #[test]
    fn test_module_registry_default() {
        let registry = ModuleRegistry::default();
        assert_eq!(registry.list_modules().count(), 3);
        assert_eq!(
            registry.categories(),
            vec!["Clock Processing".to_string(), "Clocks".to_string()]
        );
    }

    #[test]
    fn test_module_registry_list_by_category() {
        let registry = ModuleRegistry::new();
        assert_eq!(registry.list_by_category("Clock Processing").count(), 2);
        assert_eq!(registry.list_by_category("Oscillators").count(), 0);
    }

    #[test]
    fn test_module_registry_instantiate_all() {
        let registry = ModuleRegistry::new();
        for meta in registry.list_modules() {
            let module = registry.instantiate(&meta.type_id, 48000.0).unwrap();
            assert_eq!(module.type_id(), meta.type_id);
            assert_eq!(module.port_spec().outputs.len(), meta.port_spec.outputs.len());
        }
        assert!(registry.instantiate("vco", 48000.0).is_none());
    }

    #[test]
    fn test_patch_from_def_unknown_module() {
        let registry = ModuleRegistry::new();
        let def = PatchDef::new("Test").with_module(ModuleDef::new("x", "nonexistent"));

        let result = Patch::from_def(&def, &registry, 48000.0);
        assert!(matches!(result, Err(PatchError::CompilationFailed(_))));
    }

    #[test]
    fn test_patch_from_def_bad_cable() {
        let registry = ModuleRegistry::new();
        let def = PatchDef::new("Test")
            .with_module(ModuleDef::new("clock", "tempo_clock"))
            .with_module(ModuleDef::new("div", "divide_combine"));

        let unknown_port = def
            .clone()
            .with_cable(CableDef::new("clock.main", "div.nowhere"));
        assert!(matches!(
            Patch::from_def(&unknown_port, &registry, 48000.0),
            Err(PatchError::InvalidPort)
        ));

        let malformed = def.with_cable(CableDef::new("clock", "div.div_clock"));
        assert!(matches!(
            Patch::from_def(&malformed, &registry, 48000.0),
            Err(PatchError::CompilationFailed(_))
        ));
    }

    #[test]
    fn test_patch_from_def_rejects_bad_state() {
        let registry = ModuleRegistry::new();
        let def = PatchDef::new("Test").with_module(
            ModuleDef::new("ratchet", "ratchet").with_state(serde_json::json!({ "mult": "x" })),
        );
        assert!(Patch::from_def(&def, &registry, 48000.0).is_err());

        let dup = PatchDef::new("Dup")
            .with_module(ModuleDef::new("a", "ratchet"))
            .with_module(ModuleDef::new("a", "ratchet"));
        assert!(Patch::from_def(&dup, &registry, 48000.0).is_err());
    }
}
