//! Foreign boundary to the IWFM engine
//!
//! - `types`: parameter layouts and host-side values
//! - `marshal`: host values ↔ engine buffers
//! - `loader`: locating and loading the engine module
//! - `caller`: invoking a resolved entry point
//! - `procedures`: the catalog of engine entry points
//!
//! # Safety
//!
//! All `unsafe` code in the crate lives in this module, behind safe
//! wrappers that check every layout before the engine is called.

pub mod caller;
pub mod loader;
pub mod marshal;
pub mod procedures;
pub mod types;

pub use caller::{BoundProcedure, MAX_FOREIGN_ARITY};
pub use loader::{ForeignLibrary, LibrarySearch, LoadError, ModuleArch};
pub use marshal::{split_packed, CallOutput, LayoutError, MarshalContext, MarshaledBuffer};
pub use types::{
    ArgValue, Axis, Direction, ElementType, FixedText, Matrix, ParamKind, ParamSpec,
    ProcedureDescriptor,
};
