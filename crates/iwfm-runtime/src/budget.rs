//! Budget and zone budget readers
//!
//! A `BudgetReader` owns one open budget (or zbudget) file in the engine.
//! Everything that describes the file is read once at open time into a
//! shared `BudgetLayout`; value queries then go straight to the engine.

use crate::binding::{Binding, Slot, SlotClaim};
use crate::convention::{LocationIndex, UnitSystem, UnitTag};
use crate::error::{IwfmError, IwfmResult};
use crate::ffi::marshal::split_packed;
use crate::ffi::procedures::{
    SourceProcedures, BUDGET, INTERVAL_CAPACITY, NAME_CAPACITY, TIMESTAMP_LEN, ZBUDGET,
};
use crate::ffi::types::{ArgValue, FixedText, ProcedureDescriptor};
use crate::time::{format_timestamp, parse_all};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which family of result files to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetKind {
    Budget,
    ZBudget,
}

impl BudgetKind {
    pub fn procedures(&self) -> &'static SourceProcedures {
        match self {
            BudgetKind::Budget => &BUDGET,
            BudgetKind::ZBudget => &ZBUDGET,
        }
    }

    pub fn slot(&self) -> Slot {
        match self {
            BudgetKind::Budget => Slot::Budget,
            BudgetKind::ZBudget => Slot::ZBudget,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetKind::Budget => "budget",
            BudgetKind::ZBudget => "zbudget",
        }
    }
}

impl fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header of an open budget file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetLayout {
    /// Location (or zone) names; the last one is the whole-model total
    pub locations: Vec<String>,
    /// Data column headers of the first location, without the time column
    pub columns: Vec<String>,
    /// Unit of each column, parallel to `columns`
    pub column_units: Vec<UnitTag>,
    /// Stored time steps
    pub timestamps: Vec<NaiveDateTime>,
    /// Step interval such as `1MON`
    pub interval: String,
}

impl BudgetLayout {
    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    /// 0-based position of a column with exactly this header
    pub fn column_position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// First header that appears more than once
    pub fn duplicate_column(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.as_str()) {
                return Some(column);
            }
        }
        None
    }
}

/// Values of one column at one location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    pub location: String,
    pub column: String,
    pub unit: UnitTag,
    /// One pair per reported step, in stored order
    pub points: Vec<(NaiveDateTime, f64)>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|(_, v)| *v)
    }
}

/// An open budget or zbudget file
///
/// The file is closed by `close()` or, failing that, on drop.
///
/// # Example
///
/// ```no_run
/// use iwfm_runtime::binding;
/// use iwfm_runtime::budget::{BudgetKind, BudgetReader};
/// use iwfm_runtime::convention::UnitSystem;
///
/// let binding = binding::global()?;
/// let series = BudgetReader::scoped(
///     binding,
///     BudgetKind::Budget,
///     "Results/GW_Budget.hdf",
///     UnitSystem::default(),
///     |reader| reader.read_series(1, "Deep Percolation (+)"),
/// )?;
/// println!("{} points in {}", series.len(), series.unit);
/// # Ok::<(), iwfm_runtime::IwfmError>(())
/// ```
pub struct BudgetReader {
    kind: BudgetKind,
    path: PathBuf,
    units: UnitSystem,
    layout: Arc<BudgetLayout>,
    claim: Option<SlotClaim>,
}

impl BudgetReader {
    /// Open `path` and read its header
    pub fn open(
        binding: Arc<Binding>,
        kind: BudgetKind,
        path: impl AsRef<Path>,
        units: UnitSystem,
    ) -> IwfmResult<Self> {
        let path = path.as_ref().to_path_buf();
        let source_open = |reason: String| IwfmError::SourceOpen {
            path: path.clone(),
            reason,
        };

        if !path.is_file() {
            return Err(source_open("no such file".to_string()));
        }

        let claim = binding.claim(kind.slot())?;
        let procedures = kind.procedures();
        let file_name = ArgValue::Text(FixedText::exact(path.display().to_string()));

        match binding.call(procedures.open_file, &[file_name]) {
            Ok(_) => {}
            Err(IwfmError::NativeStatus { status, .. }) => {
                return Err(source_open(format!("engine status {}", status)))
            }
            Err(e) => return Err(e),
        }

        let layout = read_layout(&binding, procedures, units)
            .map_err(|e| format!("unreadable header: {}", e))
            .and_then(|layout| match layout.duplicate_column() {
                Some(column) => Err(format!("duplicate column '{}'", column)),
                None => Ok(layout),
            });
        let layout = match layout {
            Ok(layout) => layout,
            Err(reason) => {
                if let Err(close) = binding.call(procedures.close_file, &[]) {
                    warn!(error = %close, path = %path.display(), "Failed to close unreadable {}", kind);
                }
                return Err(source_open(reason));
            }
        };

        info!(
            path = %path.display(),
            kind = kind.as_str(),
            locations = layout.locations.len(),
            columns = layout.columns.len(),
            steps = layout.timestamps.len(),
            "Opened budget file"
        );

        Ok(Self {
            kind,
            path,
            units,
            layout: Arc::new(layout),
            claim: Some(claim),
        })
    }

    /// Open, run `f`, and close whatever `f` returns
    ///
    /// An error from `f` takes precedence over an error closing the file.
    pub fn scoped<T>(
        binding: Arc<Binding>,
        kind: BudgetKind,
        path: impl AsRef<Path>,
        units: UnitSystem,
        f: impl FnOnce(&BudgetReader) -> IwfmResult<T>,
    ) -> IwfmResult<T> {
        let mut reader = Self::open(binding, kind, path, units)?;
        let result = f(&reader);
        let closed = reader.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    pub fn kind(&self) -> BudgetKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn units(&self) -> UnitSystem {
        self.units
    }

    pub fn layout(&self) -> Arc<BudgetLayout> {
        Arc::clone(&self.layout)
    }

    pub fn is_open(&self) -> bool {
        self.claim.is_some()
    }

    fn binding(&self, operation: &'static str) -> IwfmResult<&Arc<Binding>> {
        self.claim
            .as_ref()
            .map(SlotClaim::binding)
            .ok_or(IwfmError::InvalidHandle {
                operation,
                state: "closed",
            })
    }

    /// One column at a 1-based location, over every stored step
    pub fn read_series(&self, location: i64, column: &str) -> IwfmResult<TimeSeries> {
        let mut series = self.read_columns(location, &[column])?;
        series.pop().ok_or_else(|| {
            IwfmError::InvalidQuery(format!("no values returned for column '{}'", column))
        })
    }

    /// Several columns at a 1-based location in one engine call
    pub fn read_columns(&self, location: i64, columns: &[&str]) -> IwfmResult<Vec<TimeSeries>> {
        const OP: &str = "read_series";
        let binding = self.binding(OP)?;
        let location = LocationIndex::from_external(location, self.layout.location_count())?;
        if columns.is_empty() {
            return Err(IwfmError::InvalidQuery("no columns requested".to_string()));
        }
        let positions = columns
            .iter()
            .map(|c| {
                self.layout.column_position(c).ok_or_else(|| {
                    IwfmError::InvalidQuery(format!("no column '{}' in {}", c, self.path.display()))
                })
            })
            .collect::<IwfmResult<Vec<_>>>()?;

        let (Some(&begin), Some(&end)) = (self.layout.timestamps.first(), self.layout.timestamps.last())
        else {
            return Ok(positions.iter().map(|&p| self.empty_series(location, p)).collect());
        };

        let base = binding.index_base();
        let n_times = self.layout.timestamps.len();
        let factors = self.units.factors();
        let read_columns: Vec<i32> = positions.iter().map(|&p| p as i32 + base.offset()).collect();

        let out = binding.call(
            self.kind.procedures().values,
            &[
                ArgValue::Int(location.to_foreign(base)),
                ArgValue::Ints(read_columns),
                ArgValue::Text(FixedText::exact(format_timestamp(begin))),
                ArgValue::Text(FixedText::exact(format_timestamp(end))),
                ArgValue::Text(FixedText::exact(self.layout.interval.as_str())),
                ArgValue::Float(factors.length),
                ArgValue::Float(factors.area),
                ArgValue::Float(factors.volume),
                // row 0 carries the time of each step
                ArgValue::matrix_buffer(positions.len() + 1, n_times),
            ],
        )?;

        let values = out.matrix("values")?;
        if values.cols() < n_times {
            warn!(
                path = %self.path.display(),
                requested = n_times,
                reported = values.cols(),
                "Engine returned fewer steps than stored"
            );
        }

        let mut series = Vec::with_capacity(positions.len());
        for (i, &position) in positions.iter().enumerate() {
            let row = values.row(i + 1).unwrap_or_default();
            series.push(TimeSeries {
                location: self.layout.locations[location.internal()].clone(),
                column: self.layout.columns[position].clone(),
                unit: self.layout.column_units[position].clone(),
                points: self
                    .layout
                    .timestamps
                    .iter()
                    .copied()
                    .zip(row.iter().copied())
                    .collect(),
            });
        }
        debug!(location = %location, columns = series.len(), steps = values.cols(), "Read budget values");
        Ok(series)
    }

    fn empty_series(&self, location: LocationIndex, position: usize) -> TimeSeries {
        TimeSeries {
            location: self.layout.locations[location.internal()].clone(),
            column: self.layout.columns[position].clone(),
            unit: self.layout.column_units[position].clone(),
            points: Vec::new(),
        }
    }

    /// Lines in the file's title block
    pub fn title_line_count(&self) -> IwfmResult<usize> {
        self.title_value("title_line_count", |p| p.n_title_lines, "n_title_lines")
    }

    /// Width of the file's title block
    pub fn title_length(&self) -> IwfmResult<usize> {
        self.title_value("title_length", |p| p.title_length, "title_length")
    }

    fn title_value(
        &self,
        operation: &'static str,
        select: impl Fn(&SourceProcedures) -> Option<&'static ProcedureDescriptor>,
        output: &str,
    ) -> IwfmResult<usize> {
        let binding = self.binding(operation)?;
        let descriptor = select(self.kind.procedures()).ok_or_else(|| {
            IwfmError::InvalidQuery(format!("{} files carry no title block", self.kind))
        })?;
        let out = binding.call(descriptor, &[])?;
        Ok(out.int(output)?.max(0) as usize)
    }

    /// Release the file in the engine
    ///
    /// Closing twice is a no-op. The slot is freed even if the engine
    /// reports a failure.
    pub fn close(&mut self) -> IwfmResult<()> {
        let Some(claim) = self.claim.take() else {
            return Ok(());
        };
        let result = claim
            .binding()
            .call(self.kind.procedures().close_file, &[])
            .map(|_| ());
        debug!(path = %self.path.display(), ok = result.is_ok(), "Closed budget file");
        result
    }
}

impl Drop for BudgetReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, path = %self.path.display(), "Failed to close budget file on drop");
        }
    }
}

impl fmt::Debug for BudgetReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetReader")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

fn read_count(
    binding: &Binding,
    descriptor: &'static ProcedureDescriptor,
    output: &str,
) -> IwfmResult<usize> {
    let out = binding.call(descriptor, &[])?;
    Ok(out.int(output)?.max(0) as usize)
}

fn read_layout(
    binding: &Binding,
    procedures: &SourceProcedures,
    units: UnitSystem,
) -> IwfmResult<BudgetLayout> {
    let n_locations = read_count(binding, procedures.n_locations, "n_locations")?;
    let out = binding.call(
        procedures.location_names,
        &[
            ArgValue::text_buffer(n_locations * NAME_CAPACITY),
            ArgValue::int_buffer(n_locations),
        ],
    )?;
    let locations = split_packed(out.text("names")?, out.ints("starts")?);

    let n_steps = read_count(binding, procedures.n_time_steps, "n_time_steps")?;
    let (timestamps, interval) = if n_steps == 0 {
        (Vec::new(), String::new())
    } else {
        let out = binding.call(
            procedures.time_specs,
            &[
                ArgValue::text_buffer(n_steps * TIMESTAMP_LEN),
                ArgValue::text_buffer(INTERVAL_CAPACITY),
                ArgValue::int_buffer(n_steps),
            ],
        )?;
        let dates = parse_all(&split_packed(out.text("dates")?, out.ints("starts")?))?;
        (dates, out.text("interval")?.trim().to_string())
    };

    let first = LocationIndex::from_internal(0, n_locations)?;
    let location = ArgValue::Int(first.to_foreign(binding.index_base()));
    let out = binding.call(procedures.n_columns, &[location.clone()])?;
    let n_columns = out.int("n_columns")?.max(0) as usize;

    // one extra slot for the leading time header
    let n_headers = n_columns + 1;
    let labels = [units.length.label(), units.area.label(), units.volume.label()];
    let out = binding.call(
        procedures.column_headers,
        &[
            location,
            ArgValue::text_buffer(n_headers * NAME_CAPACITY),
            ArgValue::Text(FixedText::exact(labels[0])),
            ArgValue::Text(FixedText::exact(labels[1])),
            ArgValue::Text(FixedText::exact(labels[2])),
            ArgValue::Ints(labels.iter().map(|l| l.len() as i32).collect()),
            ArgValue::int_buffer(n_headers),
        ],
    )?;
    let mut columns = split_packed(out.text("headers")?, out.ints("starts")?);
    if columns.first().is_some_and(|h| h.eq_ignore_ascii_case("time")) {
        columns.remove(0);
    }
    columns.truncate(n_columns);
    let column_units = columns.iter().map(|c| units.tag_column(c)).collect();

    Ok(BudgetLayout {
        locations,
        columns,
        column_units,
        timestamps,
        interval,
    })
}
