//! Model handle - lifecycle of one simulation model
//!
//! States: `Uninitialized → Instantiated → Stepping ⟲ → Released`, with a
//! `Poisoned` sub-state entered when a step fails. A poisoned model only
//! accepts `release()`.
//!
//! The engine holds one model per loaded module and hands back no token of
//! its own. The handle mints a `ModelToken` on successful instantiation; the
//! token carries the binding's model slot, so while it is alive no other
//! handle can instantiate against the same module.

use crate::binding::{Binding, Slot, SlotClaim};
use crate::convention::{LocationIndex, UnitKind, UnitSystem, UnitTag};
use crate::error::{IwfmError, IwfmResult};
use crate::ffi::procedures::{
    IW_MODEL_ADVANCE_STATE, IW_MODEL_ADVANCE_TIME, IW_MODEL_GET_CURRENT_DATE_AND_TIME,
    IW_MODEL_GET_GW_HEADS_ALL, IW_MODEL_GET_NODE_XY, IW_MODEL_GET_N_LAYERS,
    IW_MODEL_GET_N_NODES, IW_MODEL_GET_N_STREAM_NODES, IW_MODEL_GET_N_SUBREGIONS,
    IW_MODEL_GET_STREAM_FLOWS, IW_MODEL_GET_SUBREGION_IDS, IW_MODEL_GET_TIME_SPECS,
    IW_MODEL_IS_END_OF_SIMULATION, IW_MODEL_KILL, IW_MODEL_NEW, IW_MODEL_PRINT_RESULTS,
    IW_MODEL_READ_TS_DATA, IW_MODEL_SIMULATE_ONE_STEP, INTERVAL_CAPACITY, TIMESTAMP_LEN,
};
use crate::ffi::marshal::{split_packed, CallOutput};
use crate::ffi::types::{ArgValue, FixedText, ProcedureDescriptor};
use crate::time::{parse_all, parse_timestamp};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Input files and flags for a new model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInputs {
    pub preprocessor: PathBuf,
    pub simulation: PathBuf,
    /// Stream flows are routed inside the engine
    pub routed_streams: bool,
    /// Open for data retrieval only; such a model cannot be stepped
    pub for_inquiry: bool,
}

impl ModelInputs {
    pub fn new(preprocessor: impl Into<PathBuf>, simulation: impl Into<PathBuf>) -> Self {
        Self {
            preprocessor: preprocessor.into(),
            simulation: simulation.into(),
            routed_streams: true,
            for_inquiry: false,
        }
    }

    pub fn for_inquiry(mut self, inquiry: bool) -> Self {
        self.for_inquiry = inquiry;
        self
    }

    pub fn routed_streams(mut self, routed: bool) -> Self {
        self.routed_streams = routed;
        self
    }
}

impl From<iwfm_config::ModelConfig> for ModelInputs {
    fn from(config: iwfm_config::ModelConfig) -> Self {
        Self {
            preprocessor: config.preprocessor,
            simulation: config.simulation,
            routed_streams: config.routed_streams,
            for_inquiry: config.for_inquiry,
        }
    }
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Exclusive ownership of the engine's live model
///
/// Not `Clone`: a token moves, it is never duplicated.
pub struct ModelToken {
    id: u64,
    claim: SlotClaim,
}

impl ModelToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn binding(&self) -> &Arc<Binding> {
        self.claim.binding()
    }
}

impl fmt::Debug for ModelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelToken({})", self.id)
    }
}

/// Lifecycle state of a model handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModelState {
    Uninitialized,
    Instantiated,
    Stepping,
    Poisoned,
    Released,
}

impl ModelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelState::Uninitialized => "uninitialized",
            ModelState::Instantiated => "instantiated",
            ModelState::Stepping => "stepping",
            ModelState::Poisoned => "poisoned",
            ModelState::Released => "released",
        }
    }
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steps taken and the engine date after the last one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SimulationClock {
    pub step: u64,
    pub timestamp: Option<NaiveDateTime>,
}

/// Quantity read by `query_state`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityKind {
    /// Groundwater head at a node, in a 1-based layer
    GroundwaterHead { layer: usize },
    /// Flow at a stream node
    StreamFlow,
}

/// One value read from the model, with its unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateValue {
    pub value: f64,
    pub unit: UnitTag,
}

/// Node coordinates in engine length units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeCoordinates {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Simulation period and step length
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSpecs {
    pub begin: NaiveDateTime,
    pub end: NaiveDateTime,
    pub interval: String,
}

/// Handle over the engine's model
///
/// Dropping a live handle releases the model.
///
/// # Example
///
/// ```no_run
/// use iwfm_runtime::binding;
/// use iwfm_runtime::model::{ModelHandle, ModelInputs, QuantityKind};
///
/// let binding = binding::global()?;
/// let inputs = ModelInputs::new("Preprocessor/PP.in", "Simulation/Sim.in");
/// let mut model = ModelHandle::open(binding, inputs)?;
/// model.advance_step()?;
/// let head = model.query_state(12, QuantityKind::GroundwaterHead { layer: 1 })?;
/// println!("{} {}", head.value, head.unit);
/// model.release()?;
/// # Ok::<(), iwfm_runtime::IwfmError>(())
/// ```
pub struct ModelHandle {
    binding: Arc<Binding>,
    state: ModelState,
    token: Option<ModelToken>,
    for_inquiry: bool,
    clock: SimulationClock,
    poison: Option<String>,
    units: UnitSystem,
}

impl ModelHandle {
    /// An uninitialized handle
    pub fn new(binding: Arc<Binding>) -> Self {
        let units = binding.options().units;
        Self {
            binding,
            state: ModelState::Uninitialized,
            token: None,
            for_inquiry: false,
            clock: SimulationClock::default(),
            poison: None,
            units,
        }
    }

    /// Create and instantiate in one step
    pub fn open(binding: Arc<Binding>, inputs: ModelInputs) -> IwfmResult<Self> {
        let mut handle = Self::new(binding);
        handle.instantiate(&inputs)?;
        Ok(handle)
    }

    /// Units used for queried values
    pub fn with_units(mut self, units: UnitSystem) -> Self {
        self.units = units;
        self
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn clock(&self) -> SimulationClock {
        self.clock
    }

    pub fn token_id(&self) -> Option<u64> {
        self.token.as_ref().map(ModelToken::id)
    }

    pub fn is_for_inquiry(&self) -> bool {
        self.for_inquiry
    }

    /// Create the engine model
    ///
    /// Valid only from `Uninitialized`; on failure the handle stays there.
    pub fn instantiate(&mut self, inputs: &ModelInputs) -> IwfmResult<()> {
        match self.state {
            ModelState::Uninitialized => {}
            ModelState::Poisoned => return Err(self.poisoned("instantiate")),
            state => {
                return Err(IwfmError::InvalidHandle {
                    operation: "instantiate",
                    state: state.as_str(),
                })
            }
        }

        let claim = self.binding.claim(Slot::Model)?;
        let args = [
            ArgValue::Text(FixedText::exact(inputs.preprocessor.display().to_string())),
            ArgValue::Text(FixedText::exact(inputs.simulation.display().to_string())),
            ArgValue::Int(inputs.routed_streams as i32),
            ArgValue::Int(inputs.for_inquiry as i32),
        ];

        match self.binding.call(&IW_MODEL_NEW, &args) {
            Ok(_) => {}
            Err(IwfmError::NativeStatus { status, .. }) => {
                warn!(status, simulation = %inputs.simulation.display(), "Model instantiation failed");
                return Err(IwfmError::Instantiation { status });
            }
            Err(e) => return Err(e),
        }

        let token = ModelToken {
            id: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            claim,
        };
        debug!(token = token.id, inquiry = inputs.for_inquiry, "Model instantiated");

        self.token = Some(token);
        self.state = ModelState::Instantiated;
        self.for_inquiry = inputs.for_inquiry;
        Ok(())
    }

    fn poisoned(&self, operation: &'static str) -> IwfmError {
        IwfmError::PoisonedHandle {
            operation,
            cause: self.poison.clone().unwrap_or_default(),
        }
    }

    /// Binding to call through, if the handle may be used for `operation`
    fn live(&self, operation: &'static str) -> IwfmResult<&Arc<Binding>> {
        match (self.state, &self.token) {
            (ModelState::Instantiated | ModelState::Stepping, Some(token)) => Ok(token.binding()),
            (ModelState::Poisoned, _) => Err(self.poisoned(operation)),
            (state, _) => Err(IwfmError::InvalidHandle {
                operation,
                state: state.as_str(),
            }),
        }
    }

    fn call(
        &self,
        operation: &'static str,
        descriptor: &'static ProcedureDescriptor,
        args: &[ArgValue],
    ) -> IwfmResult<CallOutput> {
        self.live(operation)?.call(descriptor, args)
    }

    /// Run one simulation time step
    ///
    /// Fails with `SimulationComplete` once the engine reports the end of
    /// the simulation period; that leaves the handle usable. Any engine
    /// failure during the step poisons the handle.
    pub fn advance_step(&mut self) -> IwfmResult<SimulationClock> {
        self.live("advance_step")?;
        if self.for_inquiry {
            return Err(IwfmError::InquiryOnly);
        }

        if self.poison_on_error(|model| model.is_end_of_simulation())? {
            return Err(IwfmError::SimulationComplete);
        }

        let timestamp = self.poison_on_error(|model| {
            for descriptor in [
                &IW_MODEL_ADVANCE_TIME,
                &IW_MODEL_READ_TS_DATA,
                &IW_MODEL_SIMULATE_ONE_STEP,
                &IW_MODEL_PRINT_RESULTS,
                &IW_MODEL_ADVANCE_STATE,
            ] {
                model.call("advance_step", descriptor, &[])?;
            }
            model.current_timestamp()
        })?;

        self.clock.step += 1;
        self.clock.timestamp = Some(timestamp);
        self.state = ModelState::Stepping;
        debug!(step = self.clock.step, %timestamp, "Advanced model");
        Ok(self.clock)
    }

    fn poison_on_error<T>(&mut self, f: impl FnOnce(&Self) -> IwfmResult<T>) -> IwfmResult<T> {
        f(self).map_err(|e| {
            error!(error = %e, step = self.clock.step, "Model step failed; handle poisoned");
            self.poison = Some(e.to_string());
            self.state = ModelState::Poisoned;
            e
        })
    }

    /// Step until the engine reports the end of the simulation
    ///
    /// Returns the number of steps taken.
    pub fn run_to_end(&mut self) -> IwfmResult<u64> {
        let mut steps = 0;
        loop {
            match self.advance_step() {
                Ok(_) => steps += 1,
                Err(IwfmError::SimulationComplete) => return Ok(steps),
                Err(e) => return Err(e),
            }
        }
    }

    /// Read one quantity at a 1-based location
    pub fn query_state(&self, location: i64, kind: QuantityKind) -> IwfmResult<StateValue> {
        const OP: &str = "query_state";
        match kind {
            QuantityKind::GroundwaterHead { layer } => {
                let n_nodes = self.count(OP, &IW_MODEL_GET_N_NODES, "n_nodes")?;
                let n_layers = self.count(OP, &IW_MODEL_GET_N_LAYERS, "n_layers")?;
                let node = LocationIndex::from_external(location, n_nodes)?;
                if layer < 1 || layer > n_layers {
                    return Err(IwfmError::InvalidQuery(format!(
                        "layer {} outside [1, {}]",
                        layer, n_layers
                    )));
                }

                let out = self.call(
                    OP,
                    &IW_MODEL_GET_GW_HEADS_ALL,
                    &[
                        ArgValue::Int(0),
                        ArgValue::Float(self.units.factors().length),
                        ArgValue::matrix_buffer(n_nodes, n_layers),
                    ],
                )?;
                let heads = out.matrix("heads")?;
                let value = heads.get(node.internal(), layer - 1).ok_or_else(|| {
                    IwfmError::InvalidQuery(format!("no head reported for node {}", node))
                })?;
                Ok(StateValue {
                    value,
                    unit: self.units.tag(UnitKind::Length),
                })
            }
            QuantityKind::StreamFlow => {
                let n = self.count(OP, &IW_MODEL_GET_N_STREAM_NODES, "n_stream_nodes")?;
                let node = LocationIndex::from_external(location, n)?;
                let out = self.call(
                    OP,
                    &IW_MODEL_GET_STREAM_FLOWS,
                    &[
                        ArgValue::Float(self.units.factors().volume),
                        ArgValue::float_buffer(n),
                    ],
                )?;
                let value = out.floats("flows")?.get(node.internal()).copied().ok_or_else(|| {
                    IwfmError::InvalidQuery(format!("no flow reported for stream node {}", node))
                })?;
                Ok(StateValue {
                    value,
                    unit: self.units.tag(UnitKind::Volume),
                })
            }
        }
    }

    fn count(
        &self,
        operation: &'static str,
        descriptor: &'static ProcedureDescriptor,
        output: &str,
    ) -> IwfmResult<usize> {
        let out = self.call(operation, descriptor, &[])?;
        Ok(out.int(output)?.max(0) as usize)
    }

    pub fn node_count(&self) -> IwfmResult<usize> {
        self.count("node_count", &IW_MODEL_GET_N_NODES, "n_nodes")
    }

    pub fn layer_count(&self) -> IwfmResult<usize> {
        self.count("layer_count", &IW_MODEL_GET_N_LAYERS, "n_layers")
    }

    pub fn subregion_count(&self) -> IwfmResult<usize> {
        self.count("subregion_count", &IW_MODEL_GET_N_SUBREGIONS, "n_subregions")
    }

    pub fn stream_node_count(&self) -> IwfmResult<usize> {
        self.count("stream_node_count", &IW_MODEL_GET_N_STREAM_NODES, "n_stream_nodes")
    }

    pub fn node_coordinates(&self) -> IwfmResult<NodeCoordinates> {
        let n = self.node_count()?;
        let out = self.call(
            "node_coordinates",
            &IW_MODEL_GET_NODE_XY,
            &[ArgValue::float_buffer(n), ArgValue::float_buffer(n)],
        )?;
        Ok(NodeCoordinates {
            x: out.floats("x")?.to_vec(),
            y: out.floats("y")?.to_vec(),
        })
    }

    pub fn subregion_ids(&self) -> IwfmResult<Vec<i32>> {
        let n = self.subregion_count()?;
        let out = self.call(
            "subregion_ids",
            &IW_MODEL_GET_SUBREGION_IDS,
            &[ArgValue::int_buffer(n)],
        )?;
        Ok(out.ints("ids")?.to_vec())
    }

    pub fn is_end_of_simulation(&self) -> IwfmResult<bool> {
        let out = self.call("is_end_of_simulation", &IW_MODEL_IS_END_OF_SIMULATION, &[])?;
        Ok(out.int("end_of_simulation")? != 0)
    }

    /// Engine date of the current step
    pub fn current_timestamp(&self) -> IwfmResult<NaiveDateTime> {
        let out = self.call(
            "current_timestamp",
            &IW_MODEL_GET_CURRENT_DATE_AND_TIME,
            &[ArgValue::text_buffer(TIMESTAMP_LEN)],
        )?;
        parse_timestamp(out.text("date_and_time")?)
    }

    /// Simulation begin and end dates and step interval
    pub fn time_specs(&self) -> IwfmResult<TimeSpecs> {
        let out = self.call(
            "time_specs",
            &IW_MODEL_GET_TIME_SPECS,
            &[
                ArgValue::text_buffer(2 * TIMESTAMP_LEN),
                ArgValue::text_buffer(INTERVAL_CAPACITY),
                ArgValue::int_buffer(2),
            ],
        )?;
        let dates = parse_all(&split_packed(out.text("dates")?, out.ints("starts")?))?;
        match dates.as_slice() {
            [begin, end, ..] => Ok(TimeSpecs {
                begin: *begin,
                end: *end,
                interval: out.text("interval")?.trim().to_string(),
            }),
            _ => Err(IwfmError::Timestamp {
                value: out.text("dates")?.to_string(),
                reason: "expected begin and end dates".to_string(),
            }),
        }
    }

    /// Surrender the model to the engine
    ///
    /// Kills the engine model exactly once. Releasing a released handle is a
    /// no-op. If the engine reports a failure the handle is still released
    /// and the status is returned.
    pub fn release(&mut self) -> IwfmResult<()> {
        if self.state == ModelState::Released {
            return Ok(());
        }
        self.state = ModelState::Released;
        self.poison = None;

        let Some(token) = self.token.take() else {
            return Ok(());
        };
        let result = token.binding().call(&IW_MODEL_KILL, &[]).map(|_| ());
        debug!(token = token.id, ok = result.is_ok(), "Model released");
        // dropping the token frees the model slot
        drop(token);
        result
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        if self.token.is_some() {
            if let Err(e) = self.release() {
                error!(error = %e, "Failed to release model on drop");
            }
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("state", &self.state)
            .field("token", &self.token)
            .field("clock", &self.clock)
            .finish()
    }
}
