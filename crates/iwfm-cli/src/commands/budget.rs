//! Budget command - inspect budget and zone budget result files

use super::{print_json, Context};
use anyhow::{Context as _, Result};
use clap::Subcommand;
use iwfm_runtime::{BudgetKind, BudgetLayout, BudgetReader, TimeSeries};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum BudgetCommand {
    /// Show locations, columns and time steps of a result file
    Info {
        /// Budget or zone budget file
        file: PathBuf,
        /// Read the file as a zone budget
        #[arg(long, short = 'z')]
        zbudget: bool,
    },

    /// Print one or more columns at a location over every stored step
    Series {
        /// Budget or zone budget file
        file: PathBuf,
        /// 1-based location (or zone) number
        #[arg(long, short = 'l')]
        location: i64,
        /// Column header; repeat for several columns
        #[arg(long, short = 'c', required = true)]
        column: Vec<String>,
        /// Read the file as a zone budget
        #[arg(long, short = 'z')]
        zbudget: bool,
    },
}

fn kind(zbudget: bool) -> BudgetKind {
    if zbudget {
        BudgetKind::ZBudget
    } else {
        BudgetKind::Budget
    }
}

pub fn run(ctx: &Context, command: BudgetCommand) -> Result<()> {
    match command {
        BudgetCommand::Info { file, zbudget } => info(ctx, file, kind(zbudget)),
        BudgetCommand::Series {
            file,
            location,
            column,
            zbudget,
        } => series(ctx, file, kind(zbudget), location, &column),
    }
}

#[derive(Serialize)]
struct InfoReport<'a> {
    kind: BudgetKind,
    file: &'a Path,
    #[serde(flatten)]
    layout: &'a BudgetLayout,
}

fn info(ctx: &Context, file: PathBuf, kind: BudgetKind) -> Result<()> {
    let units = ctx.units()?;
    let binding = ctx.open_binding()?;
    let layout = BudgetReader::scoped(binding, kind, &file, units, |reader| Ok(reader.layout()))
        .with_context(|| format!("Failed to read {} {}", kind, file.display()))?;

    if ctx.json {
        return print_json(&InfoReport {
            kind,
            file: &file,
            layout: &layout,
        });
    }
    print!("{}", render_layout(kind, &file, &layout));
    Ok(())
}

fn render_layout(kind: BudgetKind, file: &Path, layout: &BudgetLayout) -> String {
    let mut out = format!("{} {}\n", kind, file.display());

    let steps = layout.timestamps.len();
    match (layout.timestamps.first(), layout.timestamps.last()) {
        (Some(first), Some(last)) => out.push_str(&format!(
            "{} steps of {} from {} to {}\n",
            steps, layout.interval, first, last
        )),
        _ => out.push_str("no stored steps\n"),
    }

    out.push_str(&format!("\nLocations ({}):\n", layout.location_count()));
    for (i, name) in layout.locations.iter().enumerate() {
        out.push_str(&format!("  {:>4}  {}\n", i + 1, name));
    }

    out.push_str(&format!("\nColumns ({}):\n", layout.columns.len()));
    for (name, unit) in layout.columns.iter().zip(&layout.column_units) {
        out.push_str(&format!("  {} [{}]\n", name, unit));
    }
    out
}

fn series(ctx: &Context, file: PathBuf, kind: BudgetKind, location: i64, columns: &[String]) -> Result<()> {
    let units = ctx.units()?;
    let binding = ctx.open_binding()?;
    let wanted: Vec<&str> = columns.iter().map(String::as_str).collect();
    let series = BudgetReader::scoped(binding, kind, &file, units, |reader| {
        reader.read_columns(location, &wanted)
    })
    .with_context(|| format!("Failed to read {} {}", kind, file.display()))?;

    if ctx.json {
        return print_json(&series);
    }
    print!("{}", render_series(&series));
    Ok(())
}

/// Tab-separated table with one row per step
fn render_series(series: &[TimeSeries]) -> String {
    let Some(first) = series.first() else {
        return String::new();
    };

    let mut out = format!("# {}\n", first.location);
    out.push_str("Time");
    for s in series {
        out.push_str(&format!("\t{} ({})", s.column, s.unit));
    }
    out.push('\n');

    for (step, (time, _)) in first.points.iter().enumerate() {
        out.push_str(&time.format("%Y-%m-%d %H:%M").to_string());
        for s in series {
            match s.points.get(step) {
                Some((_, value)) => out.push_str(&format!("\t{}", value)),
                None => out.push('\t'),
            }
        }
        out.push('\n');
    }
    out
}
