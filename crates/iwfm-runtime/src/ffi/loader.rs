//! Engine module loading
//!
//! Resolves a module name or path through platform search paths, checks the
//! module header against the host architecture, and opens it with
//! `libloading`. Entry points are looked up lazily and cached per library.

use crate::error::{IwfmError, IwfmResult};
use crate::ffi::caller::BoundProcedure;
use crate::ffi::types::ProcedureDescriptor;
use libloading::Library;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Module loading errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Engine library not found: {name} (searched {searched} locations)")]
    LibraryNotFound { name: String, searched: usize },

    #[error("Engine library {} is built for {module}, host is {host}", path.display())]
    IncompatibleArchitecture {
        path: PathBuf,
        module: String,
        host: String,
    },

    #[error("Failed to load engine library {}: {reason}", path.display())]
    LoadFailed { path: PathBuf, reason: String },
}

/// Architecture a module header declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleArch {
    pub pointer_bits: u32,
    /// Machine name in `std::env::consts::ARCH` form, when recognized
    pub machine: Option<&'static str>,
}

impl ModuleArch {
    pub fn host() -> Self {
        Self {
            pointer_bits: usize::BITS,
            machine: Some(std::env::consts::ARCH),
        }
    }

    /// True when a module with this header can be loaded by the host
    pub fn is_compatible_with(&self, host: &ModuleArch) -> bool {
        if self.pointer_bits != host.pointer_bits {
            return false;
        }
        match (self.machine, host.machine) {
            (Some(module), Some(host)) => module == host,
            _ => true,
        }
    }
}

impl fmt::Display for ModuleArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.machine {
            Some(machine) => write!(f, "{} ({}-bit)", machine, self.pointer_bits),
            None => write!(f, "{}-bit", self.pointer_bits),
        }
    }
}

fn elf_machine(code: u16) -> Option<&'static str> {
    match code {
        0x03 => Some("x86"),
        0x28 => Some("arm"),
        0x3E => Some("x86_64"),
        0xB7 => Some("aarch64"),
        _ => None,
    }
}

fn pe_machine(code: u16) -> Option<(u32, &'static str)> {
    match code {
        0x014C => Some((32, "x86")),
        0x8664 => Some((64, "x86_64")),
        0xAA64 => Some((64, "aarch64")),
        _ => None,
    }
}

/// Read the architecture a module header declares
///
/// Recognizes ELF, PE and thin Mach-O images. Returns `None` for anything
/// else, leaving the decision to the platform loader.
pub fn probe_architecture(path: &Path) -> Option<ModuleArch> {
    let mut file = File::open(path).ok()?;
    let mut header = [0u8; 64];
    let n = file.read(&mut header).ok()?;
    let header = &header[..n];

    if header.len() >= 20 && header.starts_with(b"\x7fELF") {
        let pointer_bits = match header[4] {
            1 => 32,
            2 => 64,
            _ => return None,
        };
        let machine = if header[5] == 1 {
            u16::from_le_bytes([header[18], header[19]])
        } else {
            u16::from_be_bytes([header[18], header[19]])
        };
        return Some(ModuleArch {
            pointer_bits,
            machine: elf_machine(machine),
        });
    }

    if header.len() >= 0x40 && header.starts_with(b"MZ") {
        let offset = u32::from_le_bytes([header[0x3c], header[0x3d], header[0x3e], header[0x3f]]);
        file.seek(SeekFrom::Start(offset as u64)).ok()?;
        let mut pe = [0u8; 6];
        file.read_exact(&mut pe).ok()?;
        if &pe[..4] != b"PE\0\0" {
            return None;
        }
        let (pointer_bits, machine) = pe_machine(u16::from_le_bytes([pe[4], pe[5]]))?;
        return Some(ModuleArch {
            pointer_bits,
            machine: Some(machine),
        });
    }

    if header.len() >= 4 {
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let pointer_bits = match magic {
            0xfeedface => 32,
            0xfeedfacf => 64,
            _ => return None,
        };
        return Some(ModuleArch {
            pointer_bits,
            machine: None,
        });
    }

    None
}

/// Platform search paths for engine modules
#[derive(Debug, Clone)]
pub struct LibrarySearch {
    paths: Vec<PathBuf>,
}

impl LibrarySearch {
    /// Current directory first, then the platform library directories
    pub fn new() -> Self {
        Self {
            paths: Self::default_search_paths(),
        }
    }

    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }

        #[cfg(target_os = "linux")]
        {
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/usr/lib"));
            if cfg!(target_pointer_width = "64") {
                paths.push(PathBuf::from("/usr/lib64"));
            }
        }

        #[cfg(target_os = "macos")]
        {
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/opt/homebrew/lib"));
        }

        #[cfg(target_os = "windows")]
        {
            if let Ok(system_root) = std::env::var("SystemRoot") {
                paths.push(PathBuf::from(format!("{}\\System32", system_root)));
            }
        }

        paths
    }

    /// Prepend a directory to the search list
    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.paths.insert(0, path.into());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// File names a short module name may appear under
    pub fn candidate_names(name: &str) -> Vec<String> {
        if Path::new(name).extension().is_some() {
            return vec![name.to_string()];
        }
        if cfg!(target_os = "windows") {
            vec![format!("{}.dll", name)]
        } else if cfg!(target_os = "macos") {
            vec![
                format!("lib{}.dylib", name),
                format!("{}.dylib", name),
                format!("lib{}.so", name),
            ]
        } else {
            vec![format!("lib{}.so", name), format!("{}.so", name)]
        }
    }

    /// Resolve a name or path to an existing file
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.components().count() > 1 || path.is_absolute() {
            return path.exists().then(|| path.to_path_buf());
        }

        let candidates = Self::candidate_names(name);
        self.paths
            .iter()
            .flat_map(|dir| candidates.iter().map(move |file| dir.join(file)))
            .find(|p| p.exists())
    }
}

impl Default for LibrarySearch {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased entry point address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint(*const ());

// The address is only ever called under the foreign-call gate
unsafe impl Send for EntryPoint {}
unsafe impl Sync for EntryPoint {}

impl EntryPoint {
    /// # Safety
    ///
    /// `address` must point to an `extern "system"` procedure that takes only
    /// pointer arguments and stays valid while any binding uses it.
    pub unsafe fn new(address: *const ()) -> Self {
        Self(address)
    }

    pub fn address(&self) -> *const () {
        self.0
    }
}

enum Source {
    Module { path: PathBuf, library: Library },
    Symbols(HashMap<String, EntryPoint>),
}

/// A loaded engine module
///
/// Immutable after load apart from the entry point cache. Dropping it
/// unloads the module.
pub struct ForeignLibrary {
    name: String,
    source: Source,
    cache: Mutex<HashMap<&'static str, EntryPoint>>,
}

impl ForeignLibrary {
    /// Load an engine module by short name or path
    pub fn load(name: &str) -> Result<Self, LoadError> {
        Self::load_with(name, &LibrarySearch::new())
    }

    /// Load using an explicit search list
    pub fn load_with(name: &str, search: &LibrarySearch) -> Result<Self, LoadError> {
        let path = search.resolve(name).ok_or_else(|| LoadError::LibraryNotFound {
            name: name.to_string(),
            searched: search.paths().len(),
        })?;

        let host = ModuleArch::host();
        if let Some(module) = probe_architecture(&path) {
            if !module.is_compatible_with(&host) {
                return Err(LoadError::IncompatibleArchitecture {
                    path,
                    module: module.to_string(),
                    host: host.to_string(),
                });
            }
        }

        // Loading runs the module's initializers; the caller chose to trust it
        let library = unsafe { Library::new(&path) }.map_err(|e| LoadError::LoadFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        info!(library = %path.display(), "Loaded engine library");
        Ok(Self {
            name: path.display().to_string(),
            source: Source::Module { path, library },
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Build a library from entry points already in this process
    ///
    /// Used for statically linked engines and test doubles.
    ///
    /// # Safety
    ///
    /// Every address must satisfy the contract of [`EntryPoint::new`] for the
    /// descriptor it will be resolved against.
    pub unsafe fn from_symbols(
        name: impl Into<String>,
        symbols: impl IntoIterator<Item = (&'static str, *const ())>,
    ) -> Self {
        let symbols = symbols
            .into_iter()
            .map(|(symbol, address)| (symbol.to_string(), EntryPoint::new(address)))
            .collect();
        Self {
            name: name.into(),
            source: Source::Symbols(symbols),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the loaded module, if it came from disk
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            Source::Module { path, .. } => Some(path),
            Source::Symbols(_) => None,
        }
    }

    /// Look up the entry point for `descriptor`
    pub fn resolve(&self, descriptor: &'static ProcedureDescriptor) -> IwfmResult<BoundProcedure<'_>> {
        let entry = self.entry_point(descriptor.name)?;
        Ok(BoundProcedure::new(self, descriptor, entry))
    }

    /// True when the module exports `symbol`
    pub fn has_symbol(&self, symbol: &'static str) -> bool {
        self.entry_point(symbol).is_ok()
    }

    fn entry_point(&self, symbol: &'static str) -> IwfmResult<EntryPoint> {
        if let Some(entry) = self.cache.lock().get(symbol) {
            return Ok(*entry);
        }

        let not_found = || IwfmError::ProcedureNotFound {
            library: self.name.clone(),
            procedure: symbol.to_string(),
        };

        let entry = match &self.source {
            Source::Module { library, .. } => {
                // Only the address is kept; its signature is fixed by the descriptor
                let symbol_ref = unsafe { library.get::<*const ()>(symbol.as_bytes()) }
                    .map_err(|_| not_found())?;
                unsafe { EntryPoint::new(*symbol_ref) }
            }
            Source::Symbols(symbols) => *symbols.get(symbol).ok_or_else(not_found)?,
        };

        debug!(procedure = symbol, library = %self.name, "Resolved entry point");
        self.cache.lock().insert(symbol, entry);
        Ok(entry)
    }

    /// Number of cached entry points
    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }
}

impl fmt::Debug for ForeignLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignLibrary")
            .field("name", &self.name)
            .field("cached", &self.cached_count())
            .finish()
    }
}
