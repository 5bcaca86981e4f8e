//! Argument marshaling - host values ↔ engine buffers
//!
//! `MarshalContext::prepare()` checks caller values against a
//! `ProcedureDescriptor` and lays them out as the engine expects;
//! `MarshalContext::finish()` decodes what the engine wrote back.
//!
//! # Memory Safety
//!
//! - Every buffer is allocated at exactly its declared capacity
//! - All buffers for one call live in one context and are freed on drop,
//!   whichever way the call exits
//! - Reported lengths are checked against capacity before anything is read
//! - 2-D data is transposed to column-major here and nowhere else

use crate::ffi::types::{
    ArgValue, Axis, Direction, ElementType, FixedText, Matrix, ParamKind, ParamSpec,
    ProcedureDescriptor,
};
use std::ffi::c_void;
use thiserror::Error;

/// Shape or type mismatch between host values and a descriptor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("{procedure}: expected {expected} arguments, got {got}")]
    ArityMismatch {
        procedure: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{procedure}: parameter '{param}' expects {expected}, got {got}")]
    TypeMismatch {
        procedure: &'static str,
        param: &'static str,
        expected: String,
        got: String,
    },

    #[error("{procedure}: parameters sharing extent '{param}' disagree ({first} vs {second})")]
    ExtentDisagreement {
        procedure: &'static str,
        param: &'static str,
        first: usize,
        second: usize,
    },

    #[error("{procedure}: text for '{param}' is {len} bytes, capacity is {capacity}")]
    TextOverflow {
        procedure: &'static str,
        param: &'static str,
        len: usize,
        capacity: usize,
    },

    #[error("{procedure}: '{param}' reported extent {reported} outside [0, {capacity}]")]
    ReportedExtentOutOfRange {
        procedure: &'static str,
        param: &'static str,
        reported: i64,
        capacity: usize,
    },

    #[error("{procedure}: extent {value} of '{param}' does not fit in int32")]
    ExtentTooLarge {
        procedure: &'static str,
        param: &'static str,
        value: usize,
    },

    #[error("invalid descriptor {procedure}: {reason}")]
    InvalidDescriptor {
        procedure: &'static str,
        reason: String,
    },

    #[error("{procedure}: no output named '{name}'")]
    UnknownOutput {
        procedure: &'static str,
        name: String,
    },

    #[error("{procedure}: '{param}' returned text that is not valid UTF-8")]
    InvalidText {
        procedure: &'static str,
        param: &'static str,
    },
}

/// Owned, contiguous buffer handed to the engine by address
#[derive(Debug, Clone, PartialEq)]
pub struct MarshaledBuffer {
    storage: Storage,
}

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Int32(Vec<i32>),
    Float64(Vec<f64>),
    Byte(Vec<u8>),
}

impl MarshaledBuffer {
    pub fn int32(values: Vec<i32>) -> Self {
        Self {
            storage: Storage::Int32(values),
        }
    }

    pub fn float64(values: Vec<f64>) -> Self {
        Self {
            storage: Storage::Float64(values),
        }
    }

    pub fn bytes(values: Vec<u8>) -> Self {
        Self {
            storage: Storage::Byte(values),
        }
    }

    /// Single-element scalar buffer
    pub fn scalar_i32(value: i32) -> Self {
        Self::int32(vec![value])
    }

    pub fn element_type(&self) -> ElementType {
        match &self.storage {
            Storage::Int32(_) => ElementType::Int32,
            Storage::Float64(_) => ElementType::Float64,
            Storage::Byte(_) => ElementType::Byte,
        }
    }

    /// Declared element count
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Int32(v) => v.len(),
            Storage::Float64(v) => v.len(),
            Storage::Byte(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address passed to the engine
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        match &mut self.storage {
            Storage::Int32(v) => v.as_mut_ptr().cast(),
            Storage::Float64(v) => v.as_mut_ptr().cast(),
            Storage::Byte(v) => v.as_mut_ptr().cast(),
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.storage {
            Storage::Int32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.storage {
            Storage::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Byte(v) => Some(v),
            _ => None,
        }
    }
}

/// Byte used to fill fixed-length text past its content
pub const TEXT_PADDING: u8 = b' ';

/// Encode text into a buffer of exactly `capacity` bytes
pub fn encode_fixed_text(text: &str, capacity: usize) -> Option<Vec<u8>> {
    let bytes = text.as_bytes();
    if bytes.len() > capacity {
        return None;
    }
    let mut out = Vec::with_capacity(capacity);
    out.extend_from_slice(bytes);
    out.resize(capacity, TEXT_PADDING);
    Some(out)
}

/// Split a packed string list using 1-based start positions
///
/// The engine returns several names in one buffer together with the
/// position where each begins; the last name runs to the end of `packed`.
/// Trailing padding inside each segment is dropped.
pub fn split_packed(packed: &str, starts: &[i32]) -> Vec<String> {
    let bytes = packed.as_bytes();
    let to_offset = |s: i32| (s.max(1) as usize - 1).min(bytes.len());
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let begin = to_offset(start);
            let end = starts
                .get(i + 1)
                .map(|&next| to_offset(next))
                .unwrap_or(bytes.len())
                .max(begin);
            String::from_utf8_lossy(&bytes[begin..end])
                .trim_end_matches([' ', '\0'])
                .to_string()
        })
        .collect()
}

/// Buffer slots belonging to one descriptor parameter
#[derive(Debug, Default, Clone)]
struct Slots {
    /// Slot of the data (or the scalar itself)
    data: Option<usize>,
    /// Leading dimension slots, in axis order
    leading: Vec<usize>,
    /// Capacity per axis, in axis order
    capacity: Vec<usize>,
}

/// Per-call marshaling context
///
/// Owns every buffer of one foreign call. Dropping it frees them all.
///
/// # Example
///
/// ```
/// # use iwfm_runtime::ffi::{ArgValue, Direction, MarshalContext, ParamSpec, ProcedureDescriptor};
/// static SUM: ProcedureDescriptor = ProcedureDescriptor::new(
///     "Sum",
///     &[ParamSpec::floats("values", Direction::In), ParamSpec::status()],
/// );
/// let ctx = MarshalContext::prepare(&SUM, &[ArgValue::Floats(vec![1.0, 2.0])]).unwrap();
/// // length scalar + data + status
/// assert_eq!(ctx.buffer_count(), 3);
/// ```
pub struct MarshalContext {
    descriptor: &'static ProcedureDescriptor,
    buffers: Vec<MarshaledBuffer>,
    slots: Vec<Slots>,
}

impl MarshalContext {
    /// Check `args` against the descriptor and allocate the call's buffers
    pub fn prepare(
        descriptor: &'static ProcedureDescriptor,
        args: &[ArgValue],
    ) -> Result<Self, LayoutError> {
        validate_descriptor(descriptor)?;
        let procedure = descriptor.name;

        if args.len() != descriptor.arity() {
            return Err(LayoutError::ArityMismatch {
                procedure,
                expected: descriptor.arity(),
                got: args.len(),
            });
        }

        // Pair each descriptor position with its caller value
        let mut values: Vec<Option<&ArgValue>> = vec![None; descriptor.params.len()];
        for ((position, spec), arg) in descriptor.caller_params().zip(args) {
            check_shape(procedure, spec, arg)?;
            values[position] = Some(arg);
        }

        let mut ctx = Self {
            descriptor,
            buffers: Vec::with_capacity(descriptor.foreign_arity()),
            slots: vec![Slots::default(); descriptor.params.len()],
        };

        for (position, spec) in descriptor.params.iter().enumerate() {
            match spec.kind {
                ParamKind::Status => {
                    let slot = ctx.push(MarshaledBuffer::scalar_i32(0));
                    ctx.slots[position].data = Some(slot);
                }
                ParamKind::Extent { of, axis } => {
                    let extent = shared_extent(procedure, spec, of, axis, &values)?;
                    let slot = ctx.push(MarshaledBuffer::scalar_i32(to_i32(procedure, spec, extent)?));
                    ctx.slots[position].data = Some(slot);
                    ctx.slots[position].capacity = vec![extent];
                }
                ParamKind::Scalar => {
                    let buffer = match values[position] {
                        Some(ArgValue::Int(v)) => MarshaledBuffer::scalar_i32(*v),
                        Some(ArgValue::Float(v)) => MarshaledBuffer::float64(vec![*v]),
                        // Out scalars are not caller-supplied
                        _ => match spec.element {
                            ElementType::Float64 => MarshaledBuffer::float64(vec![0.0]),
                            _ => MarshaledBuffer::scalar_i32(0),
                        },
                    };
                    let slot = ctx.push(buffer);
                    ctx.slots[position].data = Some(slot);
                }
                ParamKind::Array1D | ParamKind::Array2D | ParamKind::FixedString => {
                    let value = values[position].ok_or_else(|| LayoutError::InvalidDescriptor {
                        procedure,
                        reason: format!("no value bound to '{}'", spec.name),
                    })?;
                    let capacity: Vec<usize> = spec
                        .kind
                        .axes()
                        .iter()
                        .map(|&a| value.extent(a).unwrap_or(0))
                        .collect();

                    if !spec.detached {
                        for &extent in &capacity {
                            let slot =
                                ctx.push(MarshaledBuffer::scalar_i32(to_i32(procedure, spec, extent)?));
                            ctx.slots[position].leading.push(slot);
                        }
                    }

                    let buffer = encode_value(procedure, spec, value)?;
                    let slot = ctx.push(buffer);
                    ctx.slots[position].data = Some(slot);
                    ctx.slots[position].capacity = capacity;
                }
            }
        }

        Ok(ctx)
    }

    fn push(&mut self, buffer: MarshaledBuffer) -> usize {
        self.buffers.push(buffer);
        self.buffers.len() - 1
    }

    /// Number of buffers (= foreign arguments) in this call
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Addresses in foreign argument order
    ///
    /// Valid until the context is dropped or mutably borrowed again.
    pub fn pointers(&mut self) -> Vec<*mut c_void> {
        self.buffers.iter_mut().map(MarshaledBuffer::as_mut_ptr).collect()
    }

    /// Raw buffer access, in foreign argument order
    pub fn buffer(&self, index: usize) -> Option<&MarshaledBuffer> {
        self.buffers.get(index)
    }

    /// Status code currently held in the status slot
    pub fn status(&self) -> Option<i32> {
        self.descriptor
            .status_position()
            .and_then(|p| self.slots[p].data)
            .and_then(|slot| self.buffers[slot].as_i32())
            .map(|v| v[0])
    }

    /// Decode everything the engine wrote back
    pub fn finish(self) -> Result<CallOutput, LayoutError> {
        let procedure = self.descriptor.name;
        let mut values = Vec::new();
        let status = self.status();

        for (position, spec) in self.descriptor.params.iter().enumerate() {
            if !spec.direction.writes_back() {
                continue;
            }
            match spec.kind {
                ParamKind::Status => {}
                ParamKind::Extent { .. } => {
                    let reported = self.read_scalar_i32(position);
                    values.push((spec.name, ArgValue::Int(reported)));
                }
                ParamKind::Scalar => {
                    let buffer = self.data_buffer(position);
                    let value = match spec.element {
                        ElementType::Float64 => ArgValue::Float(buffer.as_f64().map_or(0.0, |v| v[0])),
                        _ => ArgValue::Int(buffer.as_i32().map_or(0, |v| v[0])),
                    };
                    values.push((spec.name, value));
                }
                ParamKind::Array1D | ParamKind::Array2D | ParamKind::FixedString => {
                    let reported = self.reported_extents(position, spec)?;
                    let value = self.decode_value(procedure, position, spec, &reported)?;
                    values.push((spec.name, value));
                }
            }
        }

        Ok(CallOutput {
            procedure,
            status,
            values,
        })
    }

    fn data_buffer(&self, position: usize) -> &MarshaledBuffer {
        // Every parameter gets a data slot in prepare()
        let slot = self.slots[position].data.unwrap_or_default();
        &self.buffers[slot]
    }

    fn read_scalar_i32(&self, position: usize) -> i32 {
        self.data_buffer(position).as_i32().map_or(0, |v| v[0])
    }

    /// Valid extents the engine reported for each axis of a parameter
    fn reported_extents(&self, position: usize, spec: &ParamSpec) -> Result<Vec<usize>, LayoutError> {
        let slots = &self.slots[position];
        let mut reported = Vec::with_capacity(slots.capacity.len());

        for (i, &axis) in spec.kind.axes().iter().enumerate() {
            let capacity = slots.capacity[i];
            let raw = if let Some(&slot) = slots.leading.get(i) {
                self.buffers[slot].as_i32().map(|v| v[0] as i64)
            } else {
                // Out/InOut extents elsewhere in the list report the valid count
                self.descriptor
                    .extents_of(position, axis)
                    .find(|(_, p)| p.direction.writes_back())
                    .map(|(p, _)| self.read_scalar_i32(p) as i64)
            };
            let value = raw.unwrap_or(capacity as i64);
            if value < 0 || value > capacity as i64 {
                return Err(LayoutError::ReportedExtentOutOfRange {
                    procedure: self.descriptor.name,
                    param: spec.name,
                    reported: value,
                    capacity,
                });
            }
            reported.push(value as usize);
        }
        Ok(reported)
    }

    fn decode_value(
        &self,
        procedure: &'static str,
        position: usize,
        spec: &ParamSpec,
        reported: &[usize],
    ) -> Result<ArgValue, LayoutError> {
        let buffer = self.data_buffer(position);
        let value = match (spec.kind, buffer.element_type()) {
            (ParamKind::Array1D, ElementType::Int32) => {
                ArgValue::Ints(buffer.as_i32().unwrap_or_default()[..reported[0]].to_vec())
            }
            (ParamKind::Array1D, ElementType::Float64) => {
                ArgValue::Floats(buffer.as_f64().unwrap_or_default()[..reported[0]].to_vec())
            }
            (ParamKind::Array2D, ElementType::Float64) => {
                let stride = self.slots[position].capacity[0];
                let matrix = Matrix::from_column_major(
                    reported[0],
                    reported[1],
                    stride,
                    buffer.as_f64().unwrap_or_default(),
                )
                .ok_or(LayoutError::ReportedExtentOutOfRange {
                    procedure,
                    param: spec.name,
                    reported: reported[1] as i64,
                    capacity: self.slots[position].capacity[1],
                })?;
                ArgValue::Matrix(matrix)
            }
            (ParamKind::FixedString, ElementType::Byte) => {
                let bytes = &buffer.as_bytes().unwrap_or_default()[..reported[0]];
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|_| LayoutError::InvalidText {
                        procedure,
                        param: spec.name,
                    })?;
                ArgValue::Text(FixedText {
                    text,
                    capacity: self.slots[position].capacity[0],
                })
            }
            (kind, element) => {
                return Err(LayoutError::InvalidDescriptor {
                    procedure,
                    reason: format!("unsupported {:?} of {}", kind, element.display_name()),
                })
            }
        };
        Ok(value)
    }
}

/// Decoded results of one foreign call
///
/// Holds every Out/InOut parameter, trimmed to its reported extent,
/// keyed by parameter name.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutput {
    procedure: &'static str,
    status: Option<i32>,
    values: Vec<(&'static str, ArgValue)>,
}

impl CallOutput {
    pub fn procedure(&self) -> &'static str {
        self.procedure
    }

    /// Status code written by the engine, if the procedure has one
    pub fn status(&self) -> Option<i32> {
        self.status
    }

    pub fn get(&self, name: &str) -> Result<&ArgValue, LayoutError> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| LayoutError::UnknownOutput {
                procedure: self.procedure,
                name: name.to_string(),
            })
    }

    pub fn int(&self, name: &str) -> Result<i32, LayoutError> {
        match self.get(name)? {
            ArgValue::Int(v) => Ok(*v),
            other => Err(self.mismatch(name, "int32 scalar", other)),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64, LayoutError> {
        match self.get(name)? {
            ArgValue::Float(v) => Ok(*v),
            other => Err(self.mismatch(name, "float64 scalar", other)),
        }
    }

    pub fn ints(&self, name: &str) -> Result<&[i32], LayoutError> {
        match self.get(name)? {
            ArgValue::Ints(v) => Ok(v),
            other => Err(self.mismatch(name, "int32 array", other)),
        }
    }

    pub fn floats(&self, name: &str) -> Result<&[f64], LayoutError> {
        match self.get(name)? {
            ArgValue::Floats(v) => Ok(v),
            other => Err(self.mismatch(name, "float64 array", other)),
        }
    }

    pub fn matrix(&self, name: &str) -> Result<&Matrix<f64>, LayoutError> {
        match self.get(name)? {
            ArgValue::Matrix(m) => Ok(m),
            other => Err(self.mismatch(name, "float64 matrix", other)),
        }
    }

    pub fn text(&self, name: &str) -> Result<&str, LayoutError> {
        match self.get(name)? {
            ArgValue::Text(t) => Ok(&t.text),
            other => Err(self.mismatch(name, "fixed string", other)),
        }
    }

    fn mismatch(&self, name: &str, expected: &str, got: &ArgValue) -> LayoutError {
        LayoutError::UnknownOutput {
            procedure: self.procedure,
            name: format!("{} as {} (is {})", name, expected, got.type_name()),
        }
    }
}

/// Structural checks that need no caller values
fn validate_descriptor(descriptor: &'static ProcedureDescriptor) -> Result<(), LayoutError> {
    let invalid = |reason: String| LayoutError::InvalidDescriptor {
        procedure: descriptor.name,
        reason,
    };

    for spec in descriptor.params {
        match spec.kind {
            ParamKind::Extent { of, axis } => {
                if of.is_empty() {
                    return Err(invalid(format!("extent '{}' describes nothing", spec.name)));
                }
                for &target in of {
                    let Some(t) = descriptor.params.get(target) else {
                        return Err(invalid(format!("extent '{}' points past the end", spec.name)));
                    };
                    if !t.detached || !t.kind.axes().contains(&axis) {
                        return Err(invalid(format!(
                            "extent '{}' cannot describe '{}'",
                            spec.name, t.name
                        )));
                    }
                }
            }
            ParamKind::Status if spec.direction != Direction::Out => {
                return Err(invalid("status must be an out parameter".to_string()));
            }
            _ => {}
        }
    }

    if descriptor
        .params
        .iter()
        .filter(|p| p.kind == ParamKind::Status)
        .count()
        > 1
    {
        return Err(invalid("more than one status parameter".to_string()));
    }
    Ok(())
}

fn check_shape(procedure: &'static str, spec: &ParamSpec, arg: &ArgValue) -> Result<(), LayoutError> {
    let (kind, element) = arg.shape();
    if kind != spec.kind || element != spec.element {
        return Err(LayoutError::TypeMismatch {
            procedure,
            param: spec.name,
            expected: format!("{:?} of {}", spec.kind, spec.element.display_name()),
            got: arg.type_name().to_string(),
        });
    }
    if let ArgValue::Text(t) = arg {
        if t.text.len() > t.capacity {
            return Err(LayoutError::TextOverflow {
                procedure,
                param: spec.name,
                len: t.text.len(),
                capacity: t.capacity,
            });
        }
    }
    Ok(())
}

/// Common extent of every parameter an `Extent` describes
fn shared_extent(
    procedure: &'static str,
    spec: &ParamSpec,
    of: &[usize],
    axis: Axis,
    values: &[Option<&ArgValue>],
) -> Result<usize, LayoutError> {
    let mut extent: Option<usize> = None;
    for &target in of {
        let Some(value) = values.get(target).copied().flatten() else {
            return Err(LayoutError::InvalidDescriptor {
                procedure,
                reason: format!("extent '{}' describes a parameter with no value", spec.name),
            });
        };
        let this = value.extent(axis).unwrap_or(0);
        match extent {
            Some(first) if first != this => {
                return Err(LayoutError::ExtentDisagreement {
                    procedure,
                    param: spec.name,
                    first,
                    second: this,
                })
            }
            _ => extent = Some(this),
        }
    }
    Ok(extent.unwrap_or(0))
}

fn to_i32(procedure: &'static str, spec: &ParamSpec, value: usize) -> Result<i32, LayoutError> {
    i32::try_from(value).map_err(|_| LayoutError::ExtentTooLarge {
        procedure,
        param: spec.name,
        value,
    })
}

fn encode_value(
    procedure: &'static str,
    spec: &ParamSpec,
    value: &ArgValue,
) -> Result<MarshaledBuffer, LayoutError> {
    Ok(match value {
        ArgValue::Ints(v) => MarshaledBuffer::int32(v.clone()),
        ArgValue::Floats(v) => MarshaledBuffer::float64(v.clone()),
        ArgValue::Matrix(m) => MarshaledBuffer::float64(m.to_column_major()),
        ArgValue::Text(t) => {
            let bytes = encode_fixed_text(&t.text, t.capacity).ok_or(LayoutError::TextOverflow {
                procedure,
                param: spec.name,
                len: t.text.len(),
                capacity: t.capacity,
            })?;
            MarshaledBuffer::bytes(bytes)
        }
        ArgValue::Int(v) => MarshaledBuffer::scalar_i32(*v),
        ArgValue::Float(v) => MarshaledBuffer::float64(vec![*v]),
    })
}
