//! # Metron: Real-Time Clock Transformers
//!
//! `metron` generates and reshapes musical clock signals one audio sample at a
//! time. It is built for a real-time callback: module ticks never allocate,
//! [`Patch::tick`] reuses its buffers once warmed up, and nothing on the
//! per-sample path blocks or fails.
//!
//! ## Architecture
//!
//! - **Transformers** - Small state machines fed by input edges:
//!   [`MasterClock`] and its sub-clocks, [`Divider`], [`Counter`], [`Delay`],
//!   [`Multiplier`], [`Repeater`] and [`Duration`]
//! - **Port System** - Signal conventions, parameter ranges, and the
//!   type-erased [`GraphModule`] interface
//! - **Modules** - [`TempoClock`], [`DivideCombine`] and [`Ratchet`] compose
//!   the transformers behind ports and parameters
//! - **Patch Graph** - Routes module outputs to inputs and ticks everything in
//!   dependency order
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metron::prelude::*;
//!
//! let mut patch = Patch::new(48000.0);
//!
//! let clock = patch.add("clock", TempoClock::new(48000.0));
//! let div = patch.add("div", DivideCombine::new(48000.0));
//!
//! patch.connect(clock.out("main")?, div.in_("div_clock")?)?;
//! patch.set_param(div.id(), DivideCombine::DIV, 4.0);
//! patch.compile()?;
//!
//! let divided = div.out("div")?;
//! for _ in 0..48000 {
//!     patch.tick();
//!     let _gate = patch.value(divided);
//! }
//! # Ok::<(), metron::PatchError>(())
//! ```

pub mod divide;
pub mod edge;
pub mod graph;
pub mod master;
pub mod modules;
pub mod multiply;
pub mod port;
#[cfg(feature = "alloc")]
pub mod serialize;

/// Prelude module for convenient imports
pub mod prelude {
    // Edge detection and transformers
    pub use crate::divide::{
        Counter, Decimator, Delay, Divider, Division, Latch, Tick, DECIMATION,
    };
    pub use crate::edge::{Edge, EdgeDetector};
    pub use crate::master::{tick_period, DutyPolicy, Lane, MasterClock, SubClock};
    pub use crate::multiply::{Duration, Multiplier, Repeater};

    // Port System
    pub use crate::port::{
        gate_voltage, GraphModule, ModulatedParam, ParamDef, ParamId, ParamRange, PortDef,
        PortId, PortSpec, PortValues, SignalKind, GATE_HIGH, GATE_LOW,
    };

    // Patch Graph
    pub use crate::graph::{Cable, CableId, NodeHandle, NodeId, Patch, PatchError, PortRef};

    // Modules
    pub use crate::modules::{CombineMode, DivideCombine, Ratchet, TempoClock};

    // Serialization
    #[cfg(feature = "alloc")]
    pub use crate::serialize::{CableDef, ModuleDef, ModuleMetadata, ModuleRegistry, PatchDef};
}

// Re-export key types at crate root for convenience
pub use prelude::*;
