//! FFI type system - parameter layouts for the engine boundary
//!
//! Defines:
//! - `ElementType`: the element types the engine exchanges (Int32, Float64, Byte)
//! - `ParamKind`: the closed set of parameter shapes
//! - `ParamSpec` / `ProcedureDescriptor`: the static layout of one entry point
//! - `ArgValue`: caller-supplied values, checked against a descriptor before
//!   anything crosses the boundary
//! - `Matrix`: the row-major host container for 2-D data
//!
//! Layout rules:
//! - Every parameter is passed by address
//! - An array or string is preceded by its dimension scalars unless it is
//!   `detached`, in which case its extents are declared as `Extent`
//!   parameters elsewhere in the list (or fixed by the foreign contract)
//! - `Extent` and `Status` parameters are owned by the binding; callers
//!   never supply them

use serde::Serialize;
use std::fmt;

/// Element types that cross the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 32-bit signed integer (Fortran `INTEGER`)
    Int32,
    /// 64-bit float (Fortran `REAL(8)`)
    Float64,
    /// Single byte (Fortran `CHARACTER`)
    Byte,
}

impl ElementType {
    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            ElementType::Int32 => 4,
            ElementType::Float64 => 8,
            ElementType::Byte => 1,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ElementType::Int32 => "int32",
            ElementType::Float64 => "float64",
            ElementType::Byte => "byte",
        }
    }
}

/// Data direction relative to the foreign procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    /// True when the foreign side may write the buffer
    pub fn writes_back(&self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// Axis of an array or string that an `Extent` parameter describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Element count of a 1-D array, or byte capacity of a string
    Len,
    /// First dimension of a 2-D array
    Rows,
    /// Second dimension of a 2-D array
    Cols,
}

/// Parameter shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Scalar,
    Array1D,
    Array2D,
    FixedString,
    /// Int32 scalar holding an extent of the parameters at positions `of`
    Extent { of: &'static [usize], axis: Axis },
    /// Trailing Int32 status code, zero on success
    Status,
}

impl ParamKind {
    /// True for shapes the caller supplies a value for
    pub fn is_value(&self) -> bool {
        matches!(
            self,
            ParamKind::Scalar | ParamKind::Array1D | ParamKind::Array2D | ParamKind::FixedString
        )
    }

    /// Dimension axes, in the order their scalars are passed
    pub fn axes(&self) -> &'static [Axis] {
        match self {
            ParamKind::Array1D | ParamKind::FixedString => &[Axis::Len],
            ParamKind::Array2D => &[Axis::Rows, Axis::Cols],
            _ => &[],
        }
    }
}

/// Layout of one foreign parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub element: ElementType,
    pub direction: Direction,
    /// Dimension scalars are not passed immediately before this parameter
    pub detached: bool,
}

impl ParamSpec {
    pub const fn new(
        name: &'static str,
        kind: ParamKind,
        element: ElementType,
        direction: Direction,
    ) -> Self {
        Self {
            name,
            kind,
            element,
            direction,
            detached: false,
        }
    }

    pub const fn int(name: &'static str, direction: Direction) -> Self {
        Self::new(name, ParamKind::Scalar, ElementType::Int32, direction)
    }

    pub const fn float(name: &'static str, direction: Direction) -> Self {
        Self::new(name, ParamKind::Scalar, ElementType::Float64, direction)
    }

    pub const fn ints(name: &'static str, direction: Direction) -> Self {
        Self::new(name, ParamKind::Array1D, ElementType::Int32, direction)
    }

    pub const fn floats(name: &'static str, direction: Direction) -> Self {
        Self::new(name, ParamKind::Array1D, ElementType::Float64, direction)
    }

    pub const fn matrix(name: &'static str, direction: Direction) -> Self {
        Self::new(name, ParamKind::Array2D, ElementType::Float64, direction)
    }

    pub const fn text(name: &'static str, direction: Direction) -> Self {
        Self::new(name, ParamKind::FixedString, ElementType::Byte, direction)
    }

    pub const fn extent(
        name: &'static str,
        of: &'static [usize],
        axis: Axis,
        direction: Direction,
    ) -> Self {
        Self::new(name, ParamKind::Extent { of, axis }, ElementType::Int32, direction)
    }

    pub const fn status() -> Self {
        Self::new("status", ParamKind::Status, ElementType::Int32, Direction::Out)
    }

    /// Mark the dimensions of this parameter as declared elsewhere
    pub const fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Out scalars are allocated by the marshaler, so the caller skips them
    pub fn is_caller_supplied(&self) -> bool {
        self.kind.is_value() && !(self.kind == ParamKind::Scalar && self.direction == Direction::Out)
    }
}

/// Static description of one foreign entry point
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ProcedureDescriptor {
    pub name: &'static str,
    pub params: &'static [ParamSpec],
}

impl ProcedureDescriptor {
    pub const fn new(name: &'static str, params: &'static [ParamSpec]) -> Self {
        Self { name, params }
    }

    /// Parameters the caller supplies, in order
    pub fn caller_params(&self) -> impl Iterator<Item = (usize, &ParamSpec)> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_caller_supplied())
    }

    /// Number of values the caller supplies
    pub fn arity(&self) -> usize {
        self.caller_params().count()
    }

    /// Position of the status parameter, if the procedure reports one
    pub fn status_position(&self) -> Option<usize> {
        self.params.iter().position(|p| p.kind == ParamKind::Status)
    }

    /// Extent parameters describing `axis` of the parameter at `target`
    pub fn extents_of(&self, target: usize, axis: Axis) -> impl Iterator<Item = (usize, &ParamSpec)> {
        self.params.iter().enumerate().filter(move |(_, p)| match p.kind {
            ParamKind::Extent { of, axis: a } => a == axis && of.contains(&target),
            _ => false,
        })
    }

    /// Number of pointers passed to the foreign procedure
    pub fn foreign_arity(&self) -> usize {
        self.params
            .iter()
            .map(|p| {
                if p.kind.is_value() && !p.detached {
                    p.kind.axes().len() + 1
                } else {
                    1
                }
            })
            .sum()
    }
}

impl fmt::Display for ProcedureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(|p| p.name).collect();
        write!(f, "{}({})", self.name, params.join(", "))
    }
}

/// Row-major 2-D container used on the host side
///
/// The engine stores 2-D arrays column-major; conversion happens only in
/// the marshaler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Copy + Default> Matrix<T> {
    /// Matrix of default-valued elements
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![T::default(); rows * cols],
        }
    }

    /// Build from row vectors; all rows must share a length
    pub fn from_rows(rows: Vec<Vec<T>>) -> Option<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        let n_rows = rows.len();
        let data = rows.into_iter().flatten().collect();
        Some(Self {
            rows: n_rows,
            cols,
            data,
        })
    }

    /// Build from a column-major buffer with the given leading dimension
    ///
    /// `stride` is the row count the buffer was allocated with; only the
    /// leading `rows` x `cols` block is copied. `None` if the buffer is
    /// too short for that block.
    pub fn from_column_major(rows: usize, cols: usize, stride: usize, buffer: &[T]) -> Option<Self> {
        if stride < rows || buffer.len() < stride * cols {
            return None;
        }
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(buffer[c * stride + r]);
            }
        }
        Some(Self { rows, cols, data })
    }

    /// Flatten column-major (first dimension fastest)
    pub fn to_column_major(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.data.len());
        for c in 0..self.cols {
            for r in 0..self.rows {
                out.push(self.data[r * self.cols + c]);
            }
        }
        out
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// One row as a slice
    pub fn row(&self, row: usize) -> Option<&[T]> {
        if row < self.rows {
            Some(&self.data[row * self.cols..(row + 1) * self.cols])
        } else {
            None
        }
    }
}

/// Text with a fixed byte capacity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedText {
    pub text: String,
    pub capacity: usize,
}

impl FixedText {
    /// Text occupying exactly its own length
    pub fn exact(text: impl Into<String>) -> Self {
        let text = text.into();
        let capacity = text.len();
        Self { text, capacity }
    }

    /// Text padded out to `capacity` bytes
    pub fn padded(text: impl Into<String>, capacity: usize) -> Self {
        Self {
            text: text.into(),
            capacity,
        }
    }

    /// Empty receive buffer of `capacity` bytes
    pub fn buffer(capacity: usize) -> Self {
        Self {
            text: String::new(),
            capacity,
        }
    }
}

/// Caller-supplied (or decoded) parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i32),
    Float(f64),
    Ints(Vec<i32>),
    Floats(Vec<f64>),
    Matrix(Matrix<f64>),
    Text(FixedText),
}

impl ArgValue {
    /// Receive buffer for `n` integers
    pub fn int_buffer(n: usize) -> Self {
        ArgValue::Ints(vec![0; n])
    }

    /// Receive buffer for `n` floats
    pub fn float_buffer(n: usize) -> Self {
        ArgValue::Floats(vec![0.0; n])
    }

    /// Receive buffer for a `rows` x `cols` matrix
    pub fn matrix_buffer(rows: usize, cols: usize) -> Self {
        ArgValue::Matrix(Matrix::zeros(rows, cols))
    }

    /// Receive buffer for `capacity` bytes of text
    pub fn text_buffer(capacity: usize) -> Self {
        ArgValue::Text(FixedText::buffer(capacity))
    }

    /// Shape/type tag as (kind, element)
    pub fn shape(&self) -> (ParamKind, ElementType) {
        match self {
            ArgValue::Int(_) => (ParamKind::Scalar, ElementType::Int32),
            ArgValue::Float(_) => (ParamKind::Scalar, ElementType::Float64),
            ArgValue::Ints(_) => (ParamKind::Array1D, ElementType::Int32),
            ArgValue::Floats(_) => (ParamKind::Array1D, ElementType::Float64),
            ArgValue::Matrix(_) => (ParamKind::Array2D, ElementType::Float64),
            ArgValue::Text(_) => (ParamKind::FixedString, ElementType::Byte),
        }
    }

    /// Extent along `axis`, if this value has one
    pub fn extent(&self, axis: Axis) -> Option<usize> {
        match (self, axis) {
            (ArgValue::Ints(v), Axis::Len) => Some(v.len()),
            (ArgValue::Floats(v), Axis::Len) => Some(v.len()),
            (ArgValue::Text(t), Axis::Len) => Some(t.capacity),
            (ArgValue::Matrix(m), Axis::Rows) => Some(m.rows()),
            (ArgValue::Matrix(m), Axis::Cols) => Some(m.cols()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ArgValue::Int(_) => "int32 scalar",
            ArgValue::Float(_) => "float64 scalar",
            ArgValue::Ints(_) => "int32 array",
            ArgValue::Floats(_) => "float64 array",
            ArgValue::Matrix(_) => "float64 matrix",
            ArgValue::Text(_) => "fixed string",
        }
    }
}
