pub mod budget;
pub mod model;

use anyhow::{bail, Context as _, Result};
use iwfm_config::Config as ProjectSettings;
use iwfm_runtime::{Binding, BindingOptions, UnitSystem};
use serde::Serialize;
use std::sync::Arc;

/// Everything a command needs besides its own arguments
pub struct Context {
    pub settings: ProjectSettings,
    /// `--library`, taking precedence over configuration
    pub library: Option<String>,
    pub json: bool,
    pub progress: bool,
}

impl Context {
    pub fn options(&self) -> Result<BindingOptions> {
        BindingOptions::from_config(&self.settings).context("Invalid [units] or [engine] settings")
    }

    pub fn units(&self) -> Result<UnitSystem> {
        Ok(self.options()?.units)
    }

    /// Load the engine library
    pub fn open_binding(&self) -> Result<Arc<Binding>> {
        let binding = match &self.library {
            Some(library) => {
                let binding = Binding::load(library, self.options()?)
                    .with_context(|| format!("Failed to load engine library '{}'", library))?;
                if let Some(log_file) = self.settings.log_file() {
                    binding
                        .set_log_file(&log_file)
                        .with_context(|| format!("Failed to set engine log file {}", log_file.display()))?;
                }
                binding
            }
            None => {
                if self.settings.library().is_none() {
                    bail!(
                        "No engine library configured: pass --library, set IWFM_LIBRARY, \
                         or add `library` to the [engine] table of iwfm.toml"
                    );
                }
                Binding::from_config(&self.settings).context("Failed to load engine library")?
            }
        };
        Ok(Arc::new(binding))
    }
}

/// Print `value` as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
