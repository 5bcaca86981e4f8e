//! In-process stand-in for the IWFM engine
//!
//! Every exported procedure the binding uses is implemented here as an
//! `extern "system"` function over one global state, and registered with
//! `ForeignLibrary::from_symbols`. Tests using it must be `#[serial]`.

#![allow(dead_code)]

use iwfm_runtime::ffi::ForeignLibrary;
use iwfm_runtime::{Binding, BindingOptions};
use parking_lot::{Mutex, MutexGuard};
use std::ffi::c_void;
use std::sync::Arc;

pub const N_NODES: i32 = 4;
pub const N_LAYERS: i32 = 2;
pub const N_STREAM_NODES: i32 = 3;
pub const SUBREGION_IDS: [i32; 2] = [3, 7];
pub const N_BUDGET_LOCATIONS: i32 = 22;
pub const BUDGET_COLUMNS: [&str; 2] = ["Inflow", "Outflow"];

/// End-of-step dates the stub model reports, one per step
pub const MODEL_DATES: [&str; 3] = ["10/31/1990_24:00", "11/30/1990_24:00", "12/31/1990_24:00"];

/// Stored steps of the stub budget file
pub const BUDGET_DATES: [&str; 3] = ["10/31/1990_24:00", "11/30/1990_24:00", "12/31/1990_24:00"];

/// Head the stub reports for a 1-based node and layer, in feet
pub fn head(node: i32, layer: i32) -> f64 {
    100.0 * layer as f64 + node as f64
}

/// Flow the stub reports for a 1-based stream node, in cubic feet
pub fn flow(node: i32) -> f64 {
    1000.0 * node as f64
}

/// Budget value for a 1-based location, 1-based column and 0-based step
pub fn budget_value(location: i32, column: i32, step: usize) -> f64 {
    location as f64 * 1000.0 + column as f64 * 10.0 + step as f64
}

pub fn location_name(location: i32) -> String {
    if location == N_BUDGET_LOCATIONS {
        "ENTIRE MODEL AREA".to_string()
    } else {
        format!("Subregion {}", location)
    }
}

pub struct EngineState {
    /// Every procedure entered, in order
    pub calls: Vec<&'static str>,
    failures: Vec<(&'static str, i32)>,
    pub model_alive: bool,
    pub model_inputs: Vec<String>,
    pub for_inquiry: bool,
    pub step: usize,
    pub end_step: usize,
    pub log_file: Option<String>,
    pub budget_open: bool,
    pub budget_file: String,
    /// Location numbers exactly as the engine received them
    pub received_locations: Vec<i32>,
    pub received_columns: Vec<i32>,
    pub received_range: Option<(String, String)>,
    pub received_factors: Option<(f64, f64, f64)>,
    pub received_unit_labels: Vec<String>,
    /// Report this many steps from GetValues instead of all of them
    pub short_read: Option<i32>,
    /// Column headers reported in place of `BUDGET_COLUMNS`
    pub column_headers: Option<Vec<&'static str>>,
}

impl EngineState {
    const fn new() -> Self {
        Self {
            calls: Vec::new(),
            failures: Vec::new(),
            model_alive: false,
            model_inputs: Vec::new(),
            for_inquiry: false,
            step: 0,
            end_step: MODEL_DATES.len(),
            log_file: None,
            budget_open: false,
            budget_file: String::new(),
            received_locations: Vec::new(),
            received_columns: Vec::new(),
            received_range: None,
            received_factors: None,
            received_unit_labels: Vec::new(),
            short_read: None,
            column_headers: None,
        }
    }

    /// Make `procedure` report `status` from now on
    pub fn fail(&mut self, procedure: &'static str, status: i32) {
        self.failures.push((procedure, status));
    }

    pub fn count(&self, procedure: &str) -> usize {
        self.calls.iter().filter(|c| **c == procedure).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.len()
    }

    fn columns(&self) -> Vec<&'static str> {
        self.column_headers.clone().unwrap_or_else(|| BUDGET_COLUMNS.to_vec())
    }

    /// Record the call and write its status; true when it must fail
    unsafe fn enter(&mut self, procedure: &'static str, status: *mut c_void) -> bool {
        self.calls.push(procedure);
        let code = self
            .failures
            .iter()
            .find(|(p, _)| *p == procedure)
            .map_or(0, |(_, s)| *s);
        write_i32(status, code);
        code != 0
    }
}

static ENGINE: Mutex<EngineState> = Mutex::new(EngineState::new());

/// Reset the stub engine to a fresh process state
pub fn reset() {
    *ENGINE.lock() = EngineState::new();
}

pub fn engine() -> MutexGuard<'static, EngineState> {
    ENGINE.lock()
}

// ============================================================================
// Buffer helpers
// ============================================================================

unsafe fn read_i32(p: *mut c_void) -> i32 {
    *(p as *const i32)
}

unsafe fn write_i32(p: *mut c_void, value: i32) {
    *(p as *mut i32) = value;
}

unsafe fn read_f64(p: *mut c_void) -> f64 {
    *(p as *const f64)
}

unsafe fn read_text(p: *mut c_void, len: i32) -> String {
    let bytes = std::slice::from_raw_parts(p as *const u8, len.max(0) as usize);
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

/// Write `text` into a buffer of `capacity` bytes, padding with blanks
unsafe fn write_text(p: *mut c_void, capacity: i32, text: &str) {
    let buffer = std::slice::from_raw_parts_mut(p as *mut u8, capacity.max(0) as usize);
    for (i, byte) in buffer.iter_mut().enumerate() {
        *byte = text.as_bytes().get(i).copied().unwrap_or(b' ');
    }
}

/// Pack names back to back with their 1-based start positions
unsafe fn write_packed(text: *mut c_void, capacity: i32, starts: *mut c_void, names: &[String]) {
    let mut packed = String::new();
    let starts = std::slice::from_raw_parts_mut(starts as *mut i32, names.len());
    for (i, name) in names.iter().enumerate() {
        starts[i] = packed.len() as i32 + 1;
        packed.push_str(name);
    }
    write_text(text, capacity, &packed);
}

// ============================================================================
// Misc
// ============================================================================

unsafe extern "system" fn set_log_file(len: *mut c_void, name: *mut c_void, status: *mut c_void) {
    let mut engine = ENGINE.lock();
    if engine.enter("IW_SetLogFile", status) {
        return;
    }
    engine.log_file = Some(read_text(name, read_i32(len)));
}

unsafe extern "system" fn close_log_file(status: *mut c_void) {
    let mut engine = ENGINE.lock();
    if engine.enter("IW_CloseLogFile", status) {
        return;
    }
    engine.log_file = None;
}

fn month_index(timestamp: &str) -> i32 {
    let month: i32 = timestamp.get(0..2).and_then(|m| m.parse().ok()).unwrap_or(0);
    let year: i32 = timestamp.get(6..10).and_then(|y| y.parse().ok()).unwrap_or(0);
    year * 12 + month
}

unsafe extern "system" fn get_n_intervals(
    begin: *mut c_void,
    end: *mut c_void,
    date_len: *mut c_void,
    _interval: *mut c_void,
    _interval_len: *mut c_void,
    n_intervals: *mut c_void,
    status: *mut c_void,
) {
    let mut engine = ENGINE.lock();
    if engine.enter("IW_GetNIntervals", status) {
        return;
    }
    let len = read_i32(date_len);
    let months = month_index(&read_text(end, len)) - month_index(&read_text(begin, len));
    write_i32(n_intervals, months);
}

// ============================================================================
// Model
// ============================================================================

unsafe extern "system" fn model_new(
    pp_len: *mut c_void,
    pp: *mut c_void,
    sim_len: *mut c_void,
    sim: *mut c_void,
    _routed: *mut c_void,
    inquiry: *mut c_void,
    status: *mut c_void,
) {
    let mut engine = ENGINE.lock();
    if engine.enter("IW_Model_New", status) {
        return;
    }
    engine.model_inputs = vec![read_text(pp, read_i32(pp_len)), read_text(sim, read_i32(sim_len))];
    engine.for_inquiry = read_i32(inquiry) != 0;
    engine.model_alive = true;
    engine.step = 0;
}

unsafe extern "system" fn model_kill(status: *mut c_void) {
    let mut engine = ENGINE.lock();
    // the engine drops its model even when it reports a failure
    engine.model_alive = false;
    engine.enter("IW_Model_Kill", status);
}

unsafe extern "system" fn model_is_instantiated(flag: *mut c_void, status: *mut c_void) {
    let mut engine = ENGINE.lock();
    if engine.enter("IW_Model_IsModelInstantiated", status) {
        return;
    }
    write_i32(flag, engine.model_alive as i32);
}

unsafe extern "system" fn model_delete_inquiry_data_file(
    _len: *mut c_void,
    _name: *mut c_void,
    status: *mut c_void,
) {
    ENGINE.lock().enter("IW_Model_DeleteInquiryDataFile", status);
}

unsafe extern "system" fn model_read_ts_data(status: *mut c_void) {
    ENGINE.lock().enter("IW_Model_ReadTSData", status);
}

unsafe extern "system" fn model_advance_time(status: *mut c_void) {
    let mut engine = ENGINE.lock();
    if engine.enter("IW_Model_AdvanceTime", status) {
        return;
    }
    engine.step += 1;
}

unsafe extern "system" fn model_simulate(status: *mut c_void) {
    ENGINE.lock().enter("IW_Model_SimulateForOneTimeStep", status);
}

unsafe extern "system" fn model_print_results(status: *mut c_void) {
    ENGINE.lock().enter("IW_Model_PrintResults", status);
}

unsafe extern "system" fn model_advance_state(status: *mut c_void) {
    ENGINE.lock().enter("IW_Model_AdvanceState", status);
}

unsafe extern "system" fn model_is_end_of_simulation(flag: *mut c_void, status: *mut c_void) {
    let mut engine = ENGINE.lock();
    if engine.enter("IW_Model_IsEndOfSimulation", status) {
        return;
    }
    write_i32(flag, (engine.step >= engine.end_step) as i32);
}

unsafe extern "system" fn model_current_date(len: *mut c_void, text: *mut c_void, status: *mut c_void) {
    let mut engine = ENGINE.lock();
    if engine.enter("IW_Model_GetCurrentDateAndTime", status) {
        return;
    }
    let index = engine.step.clamp(1, MODEL_DATES.len()) - 1;
    write_text(text, read_i32(len), MODEL_DATES[index]);
    write_i32(len, MODEL_DATES[index].len() as i32);
}

unsafe extern "system" fn model_time_specs(
    dates: *mut c_void,
    dates_len: *mut c_void,
    interval: *mut c_void,
    interval_len: *mut c_void,
    n_data: *mut c_void,
    starts: *mut c_void,
    status: *mut c_void,
) {
    let mut engine = ENGINE.lock();
    if engine.enter("IW_Model_GetTimeSpecs", status) {
        return;
    }
    let n = read_i32(n_data) as usize;
    let bounds = ["09/30/1990_24:00".to_string(), MODEL_DATES[MODEL_DATES.len() - 1].to_string()];
    write_packed(dates, read_i32(dates_len), starts, &bounds[..n.min(2)]);
    write_text(interval, read_i32(interval_len), "1MON");
}

unsafe extern "system" fn model_n_nodes(n: *mut c_void, status: *mut c_void) {
    if !ENGINE.lock().enter("IW_Model_GetNNodes", status) {
        write_i32(n, N_NODES);
    }
}

unsafe extern "system" fn model_node_xy(
    n: *mut c_void,
    x: *mut c_void,
    y: *mut c_void,
    status: *mut c_void,
) {
    if ENGINE.lock().enter("IW_Model_GetNodeXY", status) {
        return;
    }
    let n = read_i32(n) as usize;
    let x = std::slice::from_raw_parts_mut(x as *mut f64, n);
    let y = std::slice::from_raw_parts_mut(y as *mut f64, n);
    for i in 0..n {
        x[i] = 1000.0 * i as f64;
        y[i] = -500.0 * i as f64;
    }
}

unsafe extern "system" fn model_n_layers(n: *mut c_void, status: *mut c_void) {
    if !ENGINE.lock().enter("IW_Model_GetNLayers", status) {
        write_i32(n, N_LAYERS);
    }
}

unsafe extern "system" fn model_n_subregions(n: *mut c_void, status: *mut c_void) {
    if !ENGINE.lock().enter("IW_Model_GetNSubregions", status) {
        write_i32(n, SUBREGION_IDS.len() as i32);
    }
}

unsafe extern "system" fn model_subregion_ids(len: *mut c_void, ids: *mut c_void, status: *mut c_void) {
    if ENGINE.lock().enter("IW_Model_GetSubregionIDs", status) {
        return;
    }
    let ids = std::slice::from_raw_parts_mut(ids as *mut i32, read_i32(len) as usize);
    for (slot, id) in ids.iter_mut().zip(SUBREGION_IDS) {
        *slot = id;
    }
}

unsafe extern "system" fn model_n_stream_nodes(n: *mut c_void, status: *mut c_void) {
    if !ENGINE.lock().enter("IW_Model_GetNStrmNodes", status) {
        write_i32(n, N_STREAM_NODES);
    }
}

unsafe extern "system" fn model_gw_heads(
    n_nodes: *mut c_void,
    n_layers: *mut c_void,
    _previous: *mut c_void,
    factor: *mut c_void,
    heads: *mut c_void,
    status: *mut c_void,
) {
    if ENGINE.lock().enter("IW_Model_GetGWHeads_All", status) {
        return;
    }
    let rows = read_i32(n_nodes);
    let cols = read_i32(n_layers);
    let factor = read_f64(factor);
    let heads = std::slice::from_raw_parts_mut(heads as *mut f64, (rows * cols) as usize);
    // column-major: node varies fastest
    for layer in 0..cols {
        for node in 0..rows {
            heads[(layer * rows + node) as usize] = head(node + 1, layer + 1) * factor;
        }
    }
}

unsafe extern "system" fn model_stream_flows(
    n: *mut c_void,
    factor: *mut c_void,
    flows: *mut c_void,
    status: *mut c_void,
) {
    if ENGINE.lock().enter("IW_Model_GetStrmFlows", status) {
        return;
    }
    let factor = read_f64(factor);
    let flows = std::slice::from_raw_parts_mut(flows as *mut f64, read_i32(n) as usize);
    for (i, f) in flows.iter_mut().enumerate() {
        *f = flow(i as i32 + 1) * factor;
    }
}

// ============================================================================
// Budget
// ============================================================================

unsafe extern "system" fn budget_open(name: *mut c_void, len: *mut c_void, status: *mut c_void) {
    let mut engine = ENGINE.lock();
    if engine.enter("IW_Budget_OpenFile", status) {
        return;
    }
    engine.budget_file = read_text(name, read_i32(len));
    engine.budget_open = true;
}

unsafe extern "system" fn budget_close(status: *mut c_void) {
    let mut engine = ENGINE.lock();
    engine.budget_open = false;
    engine.enter("IW_Budget_CloseFile", status);
}

unsafe extern "system" fn budget_n_locations(n: *mut c_void, status: *mut c_void) {
    if !ENGINE.lock().enter("IW_Budget_GetNLocations", status) {
        write_i32(n, N_BUDGET_LOCATIONS);
    }
}

unsafe extern "system" fn budget_location_names(
    names: *mut c_void,
    names_len: *mut c_void,
    n_locations: *mut c_void,
    starts: *mut c_void,
    status: *mut c_void,
) {
    if ENGINE.lock().enter("IW_Budget_GetLocationNames", status) {
        return;
    }
    let all: Vec<String> = (1..=read_i32(n_locations)).map(location_name).collect();
    write_packed(names, read_i32(names_len), starts, &all);
}

unsafe extern "system" fn budget_n_time_steps(n: *mut c_void, status: *mut c_void) {
    if !ENGINE.lock().enter("IW_Budget_GetNTimeSteps", status) {
        write_i32(n, BUDGET_DATES.len() as i32);
    }
}

unsafe extern "system" fn budget_time_specs(
    dates: *mut c_void,
    dates_len: *mut c_void,
    interval: *mut c_void,
    interval_len: *mut c_void,
    n_data: *mut c_void,
    starts: *mut c_void,
    status: *mut c_void,
) {
    if ENGINE.lock().enter("IW_Budget_GetTimeSpecs", status) {
        return;
    }
    let n = read_i32(n_data) as usize;
    let all: Vec<String> = BUDGET_DATES.iter().take(n).map(|d| d.to_string()).collect();
    write_packed(dates, read_i32(dates_len), starts, &all);
    write_text(interval, read_i32(interval_len), "1MON");
}

unsafe extern "system" fn budget_n_columns(location: *mut c_void, n: *mut c_void, status: *mut c_void) {
    let mut engine = ENGINE.lock();
    engine.received_locations.push(read_i32(location));
    if !engine.enter("IW_Budget_GetNColumns", status) {
        let n_columns = engine.columns().len() as i32;
        write_i32(n, n_columns);
    }
}

unsafe extern "system" fn budget_column_headers(
    _location: *mut c_void,
    headers: *mut c_void,
    headers_len: *mut c_void,
    n_columns: *mut c_void,
    length_unit: *mut c_void,
    area_unit: *mut c_void,
    volume_unit: *mut c_void,
    unit_lengths: *mut c_void,
    starts: *mut c_void,
    status: *mut c_void,
) {
    let mut engine = ENGINE.lock();
    if engine.enter("IW_Budget_GetColumnHeaders", status) {
        return;
    }
    let lengths = std::slice::from_raw_parts(unit_lengths as *const i32, 3);
    engine.received_unit_labels = vec![
        read_text(length_unit, lengths[0]),
        read_text(area_unit, lengths[1]),
        read_text(volume_unit, lengths[2]),
    ];
    let all: Vec<String> = std::iter::once("Time")
        .chain(engine.columns())
        .take(read_i32(n_columns) as usize)
        .map(str::to_string)
        .collect();
    write_packed(headers, read_i32(headers_len), starts, &all);
}

unsafe extern "system" fn budget_values(
    location: *mut c_void,
    n_read: *mut c_void,
    read_columns: *mut c_void,
    begin: *mut c_void,
    end: *mut c_void,
    date_len: *mut c_void,
    _interval: *mut c_void,
    _interval_len: *mut c_void,
    length_factor: *mut c_void,
    area_factor: *mut c_void,
    volume_factor: *mut c_void,
    n_times_in: *mut c_void,
    values: *mut c_void,
    n_times_out: *mut c_void,
    status: *mut c_void,
) {
    let mut engine = ENGINE.lock();
    let location = read_i32(location);
    engine.received_locations.push(location);
    if engine.enter("IW_Budget_GetValues", status) {
        return;
    }

    let n_read = read_i32(n_read) as usize;
    let columns = std::slice::from_raw_parts(read_columns as *const i32, n_read).to_vec();
    let len = read_i32(date_len);
    engine.received_range = Some((read_text(begin, len), read_text(end, len)));
    let factor = read_f64(volume_factor);
    engine.received_factors = Some((read_f64(length_factor), read_f64(area_factor), factor));
    engine.received_columns = columns.clone();

    let n_times = read_i32(n_times_in);
    let reported = engine.short_read.unwrap_or(n_times).min(n_times);
    let rows = n_read + 1;
    let values = std::slice::from_raw_parts_mut(values as *mut f64, rows * n_times as usize);
    for t in 0..reported as usize {
        values[t * rows] = t as f64;
        for (r, &column) in columns.iter().enumerate() {
            values[t * rows + r + 1] = budget_value(location, column, t) * factor;
        }
    }
    write_i32(n_times_out, reported);
}

/// Every stub entry point, under its exported name
pub fn symbols() -> Vec<(&'static str, *const ())> {
    let mut symbols: Vec<(&'static str, *const ())> = vec![
        ("IW_SetLogFile", set_log_file as *const ()),
        ("IW_CloseLogFile", close_log_file as *const ()),
        ("IW_GetNIntervals", get_n_intervals as *const ()),
        ("IW_Model_New", model_new as *const ()),
        ("IW_Model_Kill", model_kill as *const ()),
        ("IW_Model_IsModelInstantiated", model_is_instantiated as *const ()),
        ("IW_Model_DeleteInquiryDataFile", model_delete_inquiry_data_file as *const ()),
        ("IW_Model_ReadTSData", model_read_ts_data as *const ()),
        ("IW_Model_AdvanceTime", model_advance_time as *const ()),
        ("IW_Model_SimulateForOneTimeStep", model_simulate as *const ()),
        ("IW_Model_PrintResults", model_print_results as *const ()),
        ("IW_Model_AdvanceState", model_advance_state as *const ()),
        ("IW_Model_IsEndOfSimulation", model_is_end_of_simulation as *const ()),
        ("IW_Model_GetCurrentDateAndTime", model_current_date as *const ()),
        ("IW_Model_GetTimeSpecs", model_time_specs as *const ()),
        ("IW_Model_GetNNodes", model_n_nodes as *const ()),
        ("IW_Model_GetNodeXY", model_node_xy as *const ()),
        ("IW_Model_GetNLayers", model_n_layers as *const ()),
        ("IW_Model_GetNSubregions", model_n_subregions as *const ()),
        ("IW_Model_GetSubregionIDs", model_subregion_ids as *const ()),
        ("IW_Model_GetNStrmNodes", model_n_stream_nodes as *const ()),
        ("IW_Model_GetGWHeads_All", model_gw_heads as *const ()),
        ("IW_Model_GetStrmFlows", model_stream_flows as *const ()),
    ];

    // zone budgets share the budget stubs
    for (family, n_locations, names) in [
        ("IW_Budget_", "IW_Budget_GetNLocations", "IW_Budget_GetLocationNames"),
        ("IW_ZBudget_", "IW_ZBudget_GetNZones", "IW_ZBudget_GetZoneNames"),
    ] {
        let named = |suffix: &str| -> &'static str { Box::leak(format!("{}{}", family, suffix).into_boxed_str()) };
        symbols.extend([
            (named("OpenFile"), budget_open as *const ()),
            (named("CloseFile"), budget_close as *const ()),
            (n_locations, budget_n_locations as *const ()),
            (names, budget_location_names as *const ()),
            (named("GetNTimeSteps"), budget_n_time_steps as *const ()),
            (named("GetTimeSpecs"), budget_time_specs as *const ()),
            (named("GetNColumns"), budget_n_columns as *const ()),
            (named("GetColumnHeaders"), budget_column_headers as *const ()),
            (named("GetValues"), budget_values as *const ()),
        ]);
    }
    symbols.push(("IW_Budget_GetNTitleLines", title_lines as *const ()));
    symbols.push(("IW_Budget_GetTitleLength", title_length as *const ()));
    symbols
}

unsafe extern "system" fn title_lines(n: *mut c_void, status: *mut c_void) {
    if !ENGINE.lock().enter("IW_Budget_GetNTitleLines", status) {
        write_i32(n, 4);
    }
}

unsafe extern "system" fn title_length(n: *mut c_void, status: *mut c_void) {
    if !ENGINE.lock().enter("IW_Budget_GetTitleLength", status) {
        write_i32(n, 160);
    }
}

/// Fresh stub engine behind a new binding
pub fn stub_binding(options: BindingOptions) -> Arc<Binding> {
    reset();
    let library = unsafe { ForeignLibrary::from_symbols("iwfm-stub", symbols()) };
    Arc::new(Binding::new(library, options))
}
