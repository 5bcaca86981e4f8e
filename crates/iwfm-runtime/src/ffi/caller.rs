//! Foreign procedure invocation using direct function pointers
//!
//! Every engine procedure takes all of its parameters by address and
//! returns nothing, so a call is fully described by its pointer count. The
//! entry address is cast to an `extern "system"` function of that many
//! `*mut c_void` parameters and called directly.
//!
//! All calls in the process pass through one gate: the engine keeps global
//! state and is not reentrant.

use crate::error::{IwfmError, IwfmResult};
use crate::ffi::loader::{EntryPoint, ForeignLibrary};
use crate::ffi::marshal::{CallOutput, LayoutError, MarshalContext};
use crate::ffi::types::{ArgValue, ProcedureDescriptor};
use parking_lot::Mutex;
use std::ffi::c_void;
use tracing::{trace, warn};

/// Largest pointer count a foreign procedure may take
pub const MAX_FOREIGN_ARITY: usize = 16;

/// Serializes every foreign call in the process
static FOREIGN_GATE: Mutex<()> = Mutex::new(());

macro_rules! call_with_pointers {
    (@ptr $i:tt) => { *mut c_void };
    ($entry:expr, $args:expr, $($i:tt)*) => {{
        type Entry = unsafe extern "system" fn($(call_with_pointers!(@ptr $i)),*);
        let f = std::mem::transmute::<*const (), Entry>($entry);
        f($($args[$i]),*)
    }};
}

/// Call `entry` with `args` as its pointer parameters
///
/// Returns the pointer count back as the error when it is not supported.
///
/// # Safety
///
/// `entry` must be an `extern "system"` procedure taking exactly
/// `args.len()` pointer parameters, and every pointer must be valid for
/// whatever the procedure reads or writes through it.
unsafe fn dispatch(entry: *const (), args: &[*mut c_void]) -> Result<(), usize> {
    match args.len() {
        0 => call_with_pointers!(entry, args,),
        1 => call_with_pointers!(entry, args, 0),
        2 => call_with_pointers!(entry, args, 0 1),
        3 => call_with_pointers!(entry, args, 0 1 2),
        4 => call_with_pointers!(entry, args, 0 1 2 3),
        5 => call_with_pointers!(entry, args, 0 1 2 3 4),
        6 => call_with_pointers!(entry, args, 0 1 2 3 4 5),
        7 => call_with_pointers!(entry, args, 0 1 2 3 4 5 6),
        8 => call_with_pointers!(entry, args, 0 1 2 3 4 5 6 7),
        9 => call_with_pointers!(entry, args, 0 1 2 3 4 5 6 7 8),
        10 => call_with_pointers!(entry, args, 0 1 2 3 4 5 6 7 8 9),
        11 => call_with_pointers!(entry, args, 0 1 2 3 4 5 6 7 8 9 10),
        12 => call_with_pointers!(entry, args, 0 1 2 3 4 5 6 7 8 9 10 11),
        13 => call_with_pointers!(entry, args, 0 1 2 3 4 5 6 7 8 9 10 11 12),
        14 => call_with_pointers!(entry, args, 0 1 2 3 4 5 6 7 8 9 10 11 12 13),
        15 => call_with_pointers!(entry, args, 0 1 2 3 4 5 6 7 8 9 10 11 12 13 14),
        16 => call_with_pointers!(entry, args, 0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15),
        n => return Err(n),
    }
    Ok(())
}

/// A descriptor bound to a resolved entry point
///
/// Borrowing the library keeps the module loaded for as long as the bound
/// procedure exists.
#[derive(Debug, Clone, Copy)]
pub struct BoundProcedure<'lib> {
    library: &'lib ForeignLibrary,
    descriptor: &'static ProcedureDescriptor,
    entry: EntryPoint,
}

impl<'lib> BoundProcedure<'lib> {
    pub(crate) fn new(
        library: &'lib ForeignLibrary,
        descriptor: &'static ProcedureDescriptor,
        entry: EntryPoint,
    ) -> Self {
        Self {
            library,
            descriptor,
            entry,
        }
    }

    pub fn descriptor(&self) -> &'static ProcedureDescriptor {
        self.descriptor
    }

    pub fn library(&self) -> &'lib ForeignLibrary {
        self.library
    }

    /// Marshal `args`, call the procedure, and decode its outputs
    ///
    /// Layout errors are reported before the engine is touched. A non-zero
    /// status becomes `NativeStatus`; outputs of a failed call are discarded.
    pub fn invoke(&self, args: &[ArgValue]) -> IwfmResult<CallOutput> {
        let mut ctx = MarshalContext::prepare(self.descriptor, args)?;
        let pointers = ctx.pointers();

        if pointers.len() > MAX_FOREIGN_ARITY {
            return Err(LayoutError::InvalidDescriptor {
                procedure: self.descriptor.name,
                reason: format!(
                    "{} foreign parameters exceeds the supported {}",
                    pointers.len(),
                    MAX_FOREIGN_ARITY
                ),
            }
            .into());
        }

        {
            let _gate = FOREIGN_GATE.lock();
            trace!(
                procedure = self.descriptor.name,
                pointers = pointers.len(),
                "Calling engine procedure"
            );
            // Buffers live in `ctx` until after the call returns
            let dispatched = unsafe { dispatch(self.entry.address(), &pointers) };
            if let Err(n) = dispatched {
                return Err(LayoutError::InvalidDescriptor {
                    procedure: self.descriptor.name,
                    reason: format!("unsupported pointer count {}", n),
                }
                .into());
            }
        }

        match ctx.status() {
            Some(0) | None => Ok(ctx.finish()?),
            Some(status) => {
                warn!(
                    procedure = self.descriptor.name,
                    status, "Engine procedure reported failure"
                );
                Err(IwfmError::NativeStatus {
                    procedure: self.descriptor.name,
                    status,
                })
            }
        }
    }
}
