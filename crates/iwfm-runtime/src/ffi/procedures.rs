//! Catalog of engine entry points
//!
//! One static descriptor per exported IWFM procedure. Positions inside
//! `Extent { of }` refer to indices in the same parameter list.

use crate::ffi::types::{Axis, Direction::*, ParamSpec as P, ProcedureDescriptor as D};

/// Byte length of an engine timestamp, `MM/DD/YYYY_HH:MM`
pub const TIMESTAMP_LEN: usize = 16;

/// Capacity reserved per name in packed name lists
pub const NAME_CAPACITY: usize = 30;

/// Capacity of a time interval label such as `1MON`
pub const INTERVAL_CAPACITY: usize = 8;

// ============================================================================
// Misc
// ============================================================================

pub static IW_SET_LOG_FILE: D = D::new(
    "IW_SetLogFile",
    &[P::text("file_name", In), P::status()],
);

pub static IW_CLOSE_LOG_FILE: D = D::new("IW_CloseLogFile", &[P::status()]);

pub static IW_GET_N_INTERVALS: D = D::new(
    "IW_GetNIntervals",
    &[
        P::text("begin", In).detached(),
        P::text("end", In).detached(),
        P::extent("date_length", &[0, 1], Axis::Len, In),
        P::text("interval", In).detached(),
        P::extent("interval_length", &[3], Axis::Len, In),
        P::int("n_intervals", Out),
        P::status(),
    ],
);

// ============================================================================
// Model
// ============================================================================

pub static IW_MODEL_NEW: D = D::new(
    "IW_Model_New",
    &[
        P::text("preprocessor_file", In),
        P::text("simulation_file", In),
        P::int("routed_streams", In),
        P::int("for_inquiry", In),
        P::status(),
    ],
);

pub static IW_MODEL_KILL: D = D::new("IW_Model_Kill", &[P::status()]);

pub static IW_MODEL_IS_INSTANTIATED: D = D::new(
    "IW_Model_IsModelInstantiated",
    &[P::int("instantiated", Out), P::status()],
);

pub static IW_MODEL_DELETE_INQUIRY_DATA_FILE: D = D::new(
    "IW_Model_DeleteInquiryDataFile",
    &[P::text("simulation_file", In), P::status()],
);

pub static IW_MODEL_READ_TS_DATA: D = D::new("IW_Model_ReadTSData", &[P::status()]);
pub static IW_MODEL_ADVANCE_TIME: D = D::new("IW_Model_AdvanceTime", &[P::status()]);
pub static IW_MODEL_ADVANCE_STATE: D = D::new("IW_Model_AdvanceState", &[P::status()]);
pub static IW_MODEL_SIMULATE_ONE_STEP: D =
    D::new("IW_Model_SimulateForOneTimeStep", &[P::status()]);
pub static IW_MODEL_PRINT_RESULTS: D = D::new("IW_Model_PrintResults", &[P::status()]);

pub static IW_MODEL_IS_END_OF_SIMULATION: D = D::new(
    "IW_Model_IsEndOfSimulation",
    &[P::int("end_of_simulation", Out), P::status()],
);

pub static IW_MODEL_GET_CURRENT_DATE_AND_TIME: D = D::new(
    "IW_Model_GetCurrentDateAndTime",
    &[P::text("date_and_time", Out), P::status()],
);

pub static IW_MODEL_GET_TIME_SPECS: D = D::new(
    "IW_Model_GetTimeSpecs",
    &[
        P::text("dates", Out).detached(),
        P::extent("dates_length", &[0], Axis::Len, In),
        P::text("interval", Out).detached(),
        P::extent("interval_length", &[2], Axis::Len, In),
        P::extent("n_data", &[5], Axis::Len, In),
        P::ints("starts", Out).detached(),
        P::status(),
    ],
);

pub static IW_MODEL_GET_N_NODES: D = D::new(
    "IW_Model_GetNNodes",
    &[P::int("n_nodes", Out), P::status()],
);

pub static IW_MODEL_GET_NODE_XY: D = D::new(
    "IW_Model_GetNodeXY",
    &[
        P::extent("n_nodes", &[1, 2], Axis::Len, In),
        P::floats("x", Out).detached(),
        P::floats("y", Out).detached(),
        P::status(),
    ],
);

pub static IW_MODEL_GET_N_LAYERS: D = D::new(
    "IW_Model_GetNLayers",
    &[P::int("n_layers", Out), P::status()],
);

pub static IW_MODEL_GET_N_SUBREGIONS: D = D::new(
    "IW_Model_GetNSubregions",
    &[P::int("n_subregions", Out), P::status()],
);

pub static IW_MODEL_GET_SUBREGION_IDS: D = D::new(
    "IW_Model_GetSubregionIDs",
    &[P::ints("ids", Out), P::status()],
);

pub static IW_MODEL_GET_N_STREAM_NODES: D = D::new(
    "IW_Model_GetNStrmNodes",
    &[P::int("n_stream_nodes", Out), P::status()],
);

pub static IW_MODEL_GET_GW_HEADS_ALL: D = D::new(
    "IW_Model_GetGWHeads_All",
    &[
        P::extent("n_nodes", &[4], Axis::Rows, In),
        P::extent("n_layers", &[4], Axis::Cols, In),
        P::int("previous", In),
        P::float("length_factor", In),
        P::matrix("heads", Out).detached(),
        P::status(),
    ],
);

pub static IW_MODEL_GET_STREAM_FLOWS: D = D::new(
    "IW_Model_GetStrmFlows",
    &[
        P::extent("n_stream_nodes", &[2], Axis::Len, In),
        P::float("volume_factor", In),
        P::floats("flows", Out).detached(),
        P::status(),
    ],
);

// ============================================================================
// Budget / ZBudget
// ============================================================================

/// One family of budget reader procedures
///
/// Budget and ZBudget files are read through parallel procedure sets that
/// share layouts; zones play the role of locations.
#[derive(Debug)]
pub struct SourceProcedures {
    pub open_file: &'static D,
    pub close_file: &'static D,
    pub n_locations: &'static D,
    pub location_names: &'static D,
    pub n_time_steps: &'static D,
    pub time_specs: &'static D,
    pub n_columns: &'static D,
    pub column_headers: &'static D,
    pub values: &'static D,
    pub n_title_lines: Option<&'static D>,
    pub title_length: Option<&'static D>,
}

macro_rules! source_procedures {
    (
        $family:ident,
        open: $open:literal,
        close: $close:literal,
        n_locations: $n_loc:literal,
        location_names: $names:literal,
        n_time_steps: $n_ts:literal,
        time_specs: $specs:literal,
        n_columns: $n_col:literal,
        column_headers: $headers:literal,
        values: $values:literal,
        n_title_lines: $n_titles:expr,
        title_length: $title_len:expr $(,)?
    ) => {
        pub static $family: SourceProcedures = SourceProcedures {
            open_file: &D::new($open, &[P::text("file_name", In).detached(), P::extent("file_name_length", &[0], Axis::Len, In), P::status()]),
            close_file: &D::new($close, &[P::status()]),
            n_locations: &D::new($n_loc, &[P::int("n_locations", Out), P::status()]),
            location_names: &D::new(
                $names,
                &[
                    P::text("names", Out).detached(),
                    P::extent("names_length", &[0], Axis::Len, In),
                    P::extent("n_locations", &[3], Axis::Len, In),
                    P::ints("starts", Out).detached(),
                    P::status(),
                ],
            ),
            n_time_steps: &D::new($n_ts, &[P::int("n_time_steps", Out), P::status()]),
            time_specs: &D::new(
                $specs,
                &[
                    P::text("dates", Out).detached(),
                    P::extent("dates_length", &[0], Axis::Len, In),
                    P::text("interval", Out).detached(),
                    P::extent("interval_length", &[2], Axis::Len, In),
                    P::extent("n_data", &[5], Axis::Len, In),
                    P::ints("starts", Out).detached(),
                    P::status(),
                ],
            ),
            n_columns: &D::new($n_col, &[P::int("location", In), P::int("n_columns", Out), P::status()]),
            column_headers: &D::new(
                $headers,
                &[
                    P::int("location", In),
                    P::text("headers", Out).detached(),
                    P::extent("headers_length", &[1], Axis::Len, In),
                    P::extent("n_columns", &[8], Axis::Len, In),
                    P::text("length_unit", In).detached(),
                    P::text("area_unit", In).detached(),
                    P::text("volume_unit", In).detached(),
                    P::ints("unit_lengths", In).detached(),
                    P::ints("starts", Out).detached(),
                    P::status(),
                ],
            ),
            values: &D::new(
                $values,
                &[
                    P::int("location", In),
                    P::extent("n_read_columns", &[2], Axis::Len, In),
                    P::ints("read_columns", In).detached(),
                    P::text("begin", In).detached(),
                    P::text("end", In).detached(),
                    P::extent("date_length", &[3, 4], Axis::Len, In),
                    P::text("interval", In).detached(),
                    P::extent("interval_length", &[6], Axis::Len, In),
                    P::float("length_factor", In),
                    P::float("area_factor", In),
                    P::float("volume_factor", In),
                    P::extent("n_times_in", &[12], Axis::Cols, In),
                    P::matrix("values", Out).detached(),
                    P::extent("n_times_out", &[12], Axis::Cols, Out),
                    P::status(),
                ],
            ),
            n_title_lines: $n_titles,
            title_length: $title_len,
        };
    };
}

pub static IW_BUDGET_GET_N_TITLE_LINES: D = D::new(
    "IW_Budget_GetNTitleLines",
    &[P::int("n_title_lines", Out), P::status()],
);

pub static IW_BUDGET_GET_TITLE_LENGTH: D = D::new(
    "IW_Budget_GetTitleLength",
    &[P::int("title_length", Out), P::status()],
);

source_procedures!(
    BUDGET,
    open: "IW_Budget_OpenFile",
    close: "IW_Budget_CloseFile",
    n_locations: "IW_Budget_GetNLocations",
    location_names: "IW_Budget_GetLocationNames",
    n_time_steps: "IW_Budget_GetNTimeSteps",
    time_specs: "IW_Budget_GetTimeSpecs",
    n_columns: "IW_Budget_GetNColumns",
    column_headers: "IW_Budget_GetColumnHeaders",
    values: "IW_Budget_GetValues",
    n_title_lines: Some(&IW_BUDGET_GET_N_TITLE_LINES),
    title_length: Some(&IW_BUDGET_GET_TITLE_LENGTH),
);

source_procedures!(
    ZBUDGET,
    open: "IW_ZBudget_OpenFile",
    close: "IW_ZBudget_CloseFile",
    n_locations: "IW_ZBudget_GetNZones",
    location_names: "IW_ZBudget_GetZoneNames",
    n_time_steps: "IW_ZBudget_GetNTimeSteps",
    time_specs: "IW_ZBudget_GetTimeSpecs",
    n_columns: "IW_ZBudget_GetNColumns",
    column_headers: "IW_ZBudget_GetColumnHeaders",
    values: "IW_ZBudget_GetValues",
    n_title_lines: None,
    title_length: None,
);

impl SourceProcedures {
    /// Every descriptor in the family
    pub fn all(&self) -> Vec<&'static D> {
        let mut all = vec![
            self.open_file,
            self.close_file,
            self.n_locations,
            self.location_names,
            self.n_time_steps,
            self.time_specs,
            self.n_columns,
            self.column_headers,
            self.values,
        ];
        all.extend(self.n_title_lines);
        all.extend(self.title_length);
        all
    }
}

/// Every model and misc descriptor
pub fn model_procedures() -> [&'static D; 21] {
    [
        &IW_SET_LOG_FILE,
        &IW_CLOSE_LOG_FILE,
        &IW_GET_N_INTERVALS,
        &IW_MODEL_NEW,
        &IW_MODEL_KILL,
        &IW_MODEL_IS_INSTANTIATED,
        &IW_MODEL_DELETE_INQUIRY_DATA_FILE,
        &IW_MODEL_READ_TS_DATA,
        &IW_MODEL_ADVANCE_TIME,
        &IW_MODEL_ADVANCE_STATE,
        &IW_MODEL_SIMULATE_ONE_STEP,
        &IW_MODEL_PRINT_RESULTS,
        &IW_MODEL_IS_END_OF_SIMULATION,
        &IW_MODEL_GET_CURRENT_DATE_AND_TIME,
        &IW_MODEL_GET_TIME_SPECS,
        &IW_MODEL_GET_N_NODES,
        &IW_MODEL_GET_NODE_XY,
        &IW_MODEL_GET_N_LAYERS,
        &IW_MODEL_GET_N_SUBREGIONS,
        &IW_MODEL_GET_SUBREGION_IDS,
        &IW_MODEL_GET_N_STREAM_NODES,
    ]
}
