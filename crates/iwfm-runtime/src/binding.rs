//! The process-wide engine binding
//!
//! A `Binding` owns the loaded engine module, the options that shape how
//! values cross the boundary, and the engine's single-occupancy slots. The
//! engine keeps one model, one budget file and one zbudget file open at a
//! time per loaded module, so each slot can be claimed by one owner.

use crate::convention::{IndexBase, UnitSystem};
use crate::error::{IwfmError, IwfmResult};
use crate::ffi::loader::{ForeignLibrary, LibrarySearch};
use crate::ffi::marshal::CallOutput;
use crate::ffi::procedures::{
    IW_CLOSE_LOG_FILE, IW_GET_N_INTERVALS, IW_MODEL_DELETE_INQUIRY_DATA_FILE,
    IW_MODEL_IS_INSTANTIATED, IW_SET_LOG_FILE,
};
use crate::ffi::types::{ArgValue, FixedText, ProcedureDescriptor};
use crate::time::format_timestamp;
use chrono::NaiveDateTime;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Options fixed when the binding is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindingOptions {
    /// Base of location numbers inside the engine
    pub index_base: IndexBase,
    /// Default units for budget readers
    pub units: UnitSystem,
}

impl BindingOptions {
    /// Options from merged configuration
    pub fn from_config(config: &iwfm_config::Config) -> IwfmResult<Self> {
        let index_base = match config.index_base() {
            0 => IndexBase::Zero,
            _ => IndexBase::One,
        };
        let settings = config.units();
        let defaults = UnitSystem::default();
        let units = UnitSystem::parse(
            settings.length.as_deref().unwrap_or(defaults.length.label()),
            settings.area.as_deref().unwrap_or(defaults.area.label()),
            settings.volume.as_deref().unwrap_or(defaults.volume.label()),
        )
        .map_err(IwfmError::Config)?;
        Ok(Self { index_base, units })
    }
}

/// Engine resources that admit one owner at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Model,
    Budget,
    ZBudget,
}

impl Slot {
    pub fn resource(&self) -> &'static str {
        match self {
            Slot::Model => "model",
            Slot::Budget => "budget file",
            Slot::ZBudget => "zbudget file",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            Slot::Model => 0b001,
            Slot::Budget => 0b010,
            Slot::ZBudget => 0b100,
        }
    }
}

/// Ownership of one engine slot; dropping it frees the slot
pub struct SlotClaim {
    binding: Arc<Binding>,
    slot: Slot,
}

impl SlotClaim {
    pub fn binding(&self) -> &Arc<Binding> {
        &self.binding
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        *self.binding.occupied.lock() &= !self.slot.bit();
        debug!(resource = self.slot.resource(), "Released engine slot");
    }
}

impl fmt::Debug for SlotClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotClaim").field("slot", &self.slot).finish()
    }
}

/// A loaded engine and its options
pub struct Binding {
    library: ForeignLibrary,
    options: BindingOptions,
    occupied: Mutex<u8>,
}

impl Binding {
    pub fn new(library: ForeignLibrary, options: BindingOptions) -> Self {
        Self {
            library,
            options,
            occupied: Mutex::new(0),
        }
    }

    /// Load an engine module by name or path
    pub fn load(name: &str, options: BindingOptions) -> IwfmResult<Self> {
        Ok(Self::new(ForeignLibrary::load(name)?, options))
    }

    /// Load from merged configuration
    pub fn from_config(config: &iwfm_config::Config) -> IwfmResult<Self> {
        let options = BindingOptions::from_config(config)?;
        let name = config.library().ok_or(crate::ffi::loader::LoadError::LibraryNotFound {
            name: "<none configured>".to_string(),
            searched: 0,
        })?;

        let mut search = LibrarySearch::new();
        for path in config.search_paths().into_iter().rev() {
            search.add_path(path);
        }
        let binding = Self::new(ForeignLibrary::load_with(&name, &search)?, options);

        if let Some(log_file) = config.log_file() {
            binding.set_log_file(&log_file)?;
        }
        Ok(binding)
    }

    pub fn library(&self) -> &ForeignLibrary {
        &self.library
    }

    pub fn options(&self) -> BindingOptions {
        self.options
    }

    pub fn index_base(&self) -> IndexBase {
        self.options.index_base
    }

    /// Resolve and invoke one procedure
    pub fn call(
        &self,
        descriptor: &'static ProcedureDescriptor,
        args: &[ArgValue],
    ) -> IwfmResult<CallOutput> {
        self.library.resolve(descriptor)?.invoke(args)
    }

    /// Claim an engine slot, failing with `EngineBusy` when it is taken
    pub fn claim(self: &Arc<Self>, slot: Slot) -> IwfmResult<SlotClaim> {
        let mut occupied = self.occupied.lock();
        if *occupied & slot.bit() != 0 {
            return Err(IwfmError::EngineBusy {
                resource: slot.resource(),
            });
        }
        *occupied |= slot.bit();
        debug!(resource = slot.resource(), "Claimed engine slot");
        Ok(SlotClaim {
            binding: Arc::clone(self),
            slot,
        })
    }

    pub fn is_claimed(&self, slot: Slot) -> bool {
        *self.occupied.lock() & slot.bit() != 0
    }

    /// Direct the engine's own error log to `path`
    pub fn set_log_file(&self, path: &Path) -> IwfmResult<()> {
        let path = path.display().to_string();
        self.call(&IW_SET_LOG_FILE, &[ArgValue::Text(FixedText::exact(path))])?;
        Ok(())
    }

    pub fn close_log_file(&self) -> IwfmResult<()> {
        self.call(&IW_CLOSE_LOG_FILE, &[])?;
        Ok(())
    }

    /// Number of `interval` steps between two timestamps
    pub fn interval_count(
        &self,
        begin: NaiveDateTime,
        end: NaiveDateTime,
        interval: &str,
    ) -> IwfmResult<usize> {
        let out = self.call(
            &IW_GET_N_INTERVALS,
            &[
                ArgValue::Text(FixedText::exact(format_timestamp(begin))),
                ArgValue::Text(FixedText::exact(format_timestamp(end))),
                ArgValue::Text(FixedText::exact(interval.trim())),
            ],
        )?;
        Ok(out.int("n_intervals")?.max(0) as usize)
    }

    /// True when the engine holds a model, whoever created it
    pub fn is_model_instantiated(&self) -> IwfmResult<bool> {
        let out = self.call(&IW_MODEL_IS_INSTANTIATED, &[])?;
        Ok(out.int("instantiated")? != 0)
    }

    /// Remove the cached inquiry data written next to a simulation input
    pub fn delete_inquiry_data_file(&self, simulation_file: &Path) -> IwfmResult<()> {
        let path = simulation_file.display().to_string();
        self.call(
            &IW_MODEL_DELETE_INQUIRY_DATA_FILE,
            &[ArgValue::Text(FixedText::exact(path))],
        )?;
        Ok(())
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("library", &self.library.name())
            .field("options", &self.options)
            .finish()
    }
}

static GLOBAL: RwLock<Option<Arc<Binding>>> = RwLock::new(None);

/// Install `binding` as the process-wide instance
///
/// An existing instance is kept and returned instead.
pub fn install(binding: Binding) -> Arc<Binding> {
    let mut global = GLOBAL.write();
    if let Some(existing) = global.as_ref() {
        return Arc::clone(existing);
    }
    let binding = Arc::new(binding);
    *global = Some(Arc::clone(&binding));
    binding
}

/// Load the engine and install it process-wide
///
/// Returns the existing instance if one is already installed.
pub fn initialize(name: &str, options: BindingOptions) -> IwfmResult<Arc<Binding>> {
    if let Some(existing) = GLOBAL.read().as_ref() {
        return Ok(Arc::clone(existing));
    }
    Ok(install(Binding::load(name, options)?))
}

/// The process-wide instance
pub fn global() -> IwfmResult<Arc<Binding>> {
    GLOBAL.read().clone().ok_or(IwfmError::NotInitialized)
}

/// Remove the process-wide instance
///
/// The module is unloaded once every handle holding it is gone.
pub fn teardown() -> Option<Arc<Binding>> {
    GLOBAL.write().take()
}
