//! IWFM Runtime - host binding for the IWFM simulation engine
//!
//! This library wraps the engine's exported procedures in safe Rust:
//! - Loading the engine module and marshaling arguments across its
//!   Fortran-style calling convention
//! - A model handle that enforces the engine's lifecycle
//! - Budget and zone budget readers
//! - Location numbering and unit conventions

/// IWFM runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod binding;
pub mod budget;
pub mod convention;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod model;
pub mod time;

pub use binding::{Binding, BindingOptions, Slot, SlotClaim};
pub use budget::{BudgetKind, BudgetLayout, BudgetReader, TimeSeries};
pub use convention::{IndexBase, LocationIndex, UnitKind, UnitSystem, UnitTag};
pub use error::{IwfmError, IwfmResult};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use model::{
    ModelHandle, ModelInputs, ModelState, ModelToken, QuantityKind, SimulationClock, StateValue,
};
