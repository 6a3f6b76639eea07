//! Declarative binary record layouts.
//!
//! Each vendor module exposes a pure `schema(record, &Configuration)` function
//! returning the ordered [FieldSpec]s of that record for that configuration.
//! Firmware or configuration dependent layouts are separate table entries
//! selected by that lookup rather than branches in the decode loop.
//!
//! Offsets in the tables are implicit: fields are read back to back, starting
//! after the record's id/size header.
use std::io::{Read, Seek};

use crate::config::Configuration;
use crate::cursor::Cursor;
use crate::dataset::DimKind;
use crate::error::Result;

pub mod nortek;
pub mod rdi;

/// On-disk element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    F32,
    F64,
    /// Fixed-width NUL padded text.
    Str(usize),
}

impl Ty {
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Ty::U8 | Ty::I8 => 1,
            Ty::U16 | Ty::I16 => 2,
            Ty::U32 | Ty::I32 | Ty::F32 => 4,
            Ty::U64 | Ty::F64 => 8,
            Ty::Str(n) => n,
        }
    }
}

/// Number and arrangement of elements in a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    /// Fixed element count, independent of configuration.
    Fixed(usize),
    /// Row-major matrix.
    Matrix(usize, usize),
    /// One element per beam.
    Beams,
    /// One element per cell.
    Cells,
    /// Cells by beams, stored cell-major on disk (all beams of cell 0 first).
    CellBeams,
    /// Cells by beams, stored beam-major on disk (all cells of beam 0 first).
    BeamCells,
}

/// Beam and cell counts that size configuration dependent shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub n_beams: usize,
    pub n_cells: usize,
}

impl Geometry {
    #[must_use]
    pub fn from_config(cfg: &Configuration) -> Self {
        Geometry {
            n_beams: cfg.usize("n_beams").unwrap_or(0),
            n_cells: cfg.usize("n_cells").unwrap_or(0),
        }
    }
}

impl Shape {
    /// Number of elements on disk.
    #[must_use]
    pub fn len(self, geom: Geometry) -> usize {
        match self {
            Shape::Scalar => 1,
            Shape::Fixed(n) => n,
            Shape::Matrix(r, c) => r * c,
            Shape::Beams => geom.n_beams,
            Shape::Cells => geom.n_cells,
            Shape::CellBeams | Shape::BeamCells => geom.n_beams * geom.n_cells,
        }
    }

    /// Per-sample array shape once decoded; cell/beam shapes are always
    /// reported beam first.
    #[must_use]
    pub fn dims(self, geom: Geometry) -> Vec<usize> {
        match self {
            Shape::Scalar => vec![],
            Shape::Fixed(n) => vec![n],
            Shape::Matrix(r, c) => vec![r, c],
            Shape::Beams => vec![geom.n_beams],
            Shape::Cells => vec![geom.n_cells],
            Shape::CellBeams | Shape::BeamCells => vec![geom.n_beams, geom.n_cells],
        }
    }

    /// Dimension kind of the time series built from this shape.
    #[must_use]
    pub fn kind(self) -> DimKind {
        match self {
            Shape::Scalar => DimKind::Time,
            Shape::Fixed(_) | Shape::Beams => DimKind::BeamTime,
            Shape::Matrix(..) => DimKind::MatrixTime,
            Shape::Cells => DimKind::CellTime,
            Shape::CellBeams | Shape::BeamCells => DimKind::CellBeamTime,
        }
    }
}

/// Raw to scientific unit conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    Identity,
    /// `raw * scale + offset`
    Linear { scale: f64, offset: f64 },
    /// Like `Linear`, but `missing` marks a bad sample and becomes NaN.
    Masked { missing: f64, scale: f64 },
    /// Binary angle, full scale of `bits` bits is 180 degrees.
    Bam { bits: u8 },
    /// Packed binary coded decimal byte.
    Bcd,
}

impl Conversion {
    #[must_use]
    pub const fn scale(scale: f64) -> Self {
        Conversion::Linear { scale, offset: 0.0 }
    }

    #[must_use]
    pub fn apply(self, raw: f64) -> f64 {
        match self {
            Conversion::Identity => raw,
            Conversion::Linear { scale, offset } => raw * scale + offset,
            Conversion::Masked { missing, scale } => {
                if raw == missing {
                    f64::NAN
                } else {
                    raw * scale
                }
            }
            Conversion::Bam { bits } => raw * 180.0 / 2f64.powi(i32::from(bits) - 1),
            Conversion::Bcd => {
                let b = raw as u64;
                ((b >> 4) * 10 + (b & 0x0f)) as f64
            }
        }
    }
}

/// Where a decoded field goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Per-ensemble time series.
    Data,
    /// Configuration snapshot.
    Config,
    /// Consumed but not kept.
    Skip,
}

/// One bit range of a packed integer field, decoded as its own scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub name: &'static str,
    pub shift: u8,
    pub width: u8,
}

impl BitField {
    #[must_use]
    pub fn extract(&self, raw: u64) -> u64 {
        (raw >> self.shift) & ((1u64 << self.width) - 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: Ty,
    pub shape: Shape,
    pub conv: Conversion,
    pub units: &'static str,
    pub target: Target,
    /// Sub-fields of a packed scalar word. Sent to the same target as the word.
    pub bits: &'static [BitField],
}

impl FieldSpec {
    #[must_use]
    pub const fn data(
        name: &'static str,
        ty: Ty,
        shape: Shape,
        conv: Conversion,
        units: &'static str,
    ) -> Self {
        FieldSpec {
            name,
            ty,
            shape,
            conv,
            units,
            target: Target::Data,
            bits: &[],
        }
    }

    #[must_use]
    pub const fn config(name: &'static str, ty: Ty, conv: Conversion) -> Self {
        FieldSpec {
            name,
            ty,
            shape: Shape::Scalar,
            conv,
            units: "",
            target: Target::Config,
            bits: &[],
        }
    }

    /// `n` unused bytes.
    #[must_use]
    pub const fn pad(n: usize) -> Self {
        FieldSpec {
            name: "",
            ty: Ty::U8,
            shape: Shape::Fixed(n),
            conv: Conversion::Identity,
            units: "",
            target: Target::Skip,
            bits: &[],
        }
    }

    #[must_use]
    pub const fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    #[must_use]
    pub const fn with_bits(mut self, bits: &'static [BitField]) -> Self {
        self.bits = bits;
        self
    }

    #[must_use]
    pub fn nbytes(&self, geom: Geometry) -> usize {
        self.ty.width() * self.shape.len(geom)
    }
}

/// Total bytes consumed by `specs`.
#[must_use]
pub fn record_size(specs: &[FieldSpec], geom: Geometry) -> usize {
    specs.iter().map(|s| s.nbytes(geom)).sum()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Num(Vec<f64>),
    Text(String),
}

/// A decoded field, values converted and ordered to match `dims`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub name: &'static str,
    pub target: Target,
    pub kind: DimKind,
    pub dims: Vec<usize>,
    pub units: &'static str,
    pub values: Values,
}

impl FieldValue {
    /// First numeric value, if any.
    #[must_use]
    pub fn scalar(&self) -> Option<f64> {
        match &self.values {
            Values::Num(v) => v.first().copied(),
            Values::Text(_) => None,
        }
    }
}

/// Read `specs` from the cursor in order, converting every field.
///
/// # Errors
/// [crate::Error::EndOfFile] if the record runs past the end of the source.
pub fn unpack<R: Read + Seek>(
    cur: &mut Cursor<R>,
    specs: &[FieldSpec],
    geom: Geometry,
) -> Result<Vec<FieldValue>> {
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        let count = spec.shape.len(geom);
        if spec.target == Target::Skip {
            cur.read_bytes(spec.nbytes(geom))?;
            continue;
        }
        let values = match spec.ty {
            Ty::Str(n) => Values::Text(cur.read_fixed_string(n * count)?),
            _ => {
                let raw = read_raw(cur, spec.ty, count)?;
                for bit in spec.bits {
                    let word = raw.first().copied().unwrap_or(0.0) as u64;
                    out.push(FieldValue {
                        name: bit.name,
                        target: spec.target,
                        kind: DimKind::Time,
                        dims: vec![],
                        units: "",
                        values: Values::Num(vec![bit.extract(word) as f64]),
                    });
                }
                let conv: Vec<f64> = raw.into_iter().map(|v| spec.conv.apply(v)).collect();
                Values::Num(reorder(conv, spec.shape, geom))
            }
        };
        if spec.name.is_empty() {
            continue;
        }
        out.push(FieldValue {
            name: spec.name,
            target: spec.target,
            kind: spec.shape.kind(),
            dims: spec.shape.dims(geom),
            units: spec.units,
            values,
        });
    }
    Ok(out)
}

fn read_raw<R: Read + Seek>(cur: &mut Cursor<R>, ty: Ty, count: usize) -> Result<Vec<f64>> {
    Ok(match ty {
        Ty::U8 => cur.read_u8(count)?.into_iter().map(f64::from).collect(),
        Ty::I8 => cur.read_i8(count)?.into_iter().map(f64::from).collect(),
        Ty::U16 => cur.read_u16(count)?.into_iter().map(f64::from).collect(),
        Ty::I16 => cur.read_i16(count)?.into_iter().map(f64::from).collect(),
        Ty::U32 => cur.read_u32(count)?.into_iter().map(f64::from).collect(),
        Ty::I32 => cur.read_i32(count)?.into_iter().map(f64::from).collect(),
        Ty::U64 => cur.read_u64(count)?.into_iter().map(|v| v as f64).collect(),
        Ty::F32 => cur.read_f32(count)?.into_iter().map(f64::from).collect(),
        Ty::F64 => cur.read_f64(count)?,
        Ty::Str(n) => {
            cur.read_bytes(n * count)?;
            vec![]
        }
    })
}

/// Put cell-major values into beam-major order.
fn reorder(values: Vec<f64>, shape: Shape, geom: Geometry) -> Vec<f64> {
    if shape != Shape::CellBeams || geom.n_beams < 2 {
        return values;
    }
    let mut out = vec![f64::NAN; values.len()];
    for cell in 0..geom.n_cells {
        for beam in 0..geom.n_beams {
            out[beam * geom.n_cells + cell] = values[cell * geom.n_beams + beam];
        }
    }
    out
}

/// Look up a field value by name.
#[must_use]
pub fn find<'a>(fields: &'a [FieldValue], name: &str) -> Option<&'a FieldValue> {
    fields.iter().find(|f| f.name == name)
}

/// Convert config-targeted fields into a JSON map suitable for
/// [Configuration::amend].
#[must_use]
pub fn config_map(fields: &[FieldValue]) -> serde_json::Map<String, serde_json::Value> {
    use serde_json::Value;
    let mut map = serde_json::Map::new();
    for f in fields.iter().filter(|f| f.target == Target::Config) {
        let value = match &f.values {
            Values::Text(s) => Value::String(s.clone()),
            Values::Num(v) if v.len() == 1 => number(v[0]),
            Values::Num(v) => match f.dims.as_slice() {
                [rows, cols] => Value::Array(
                    v.chunks(*cols.max(&1))
                        .take(*rows)
                        .map(|r| Value::Array(r.iter().map(|x| number(*x)).collect()))
                        .collect(),
                ),
                _ => Value::Array(v.iter().map(|x| number(*x)).collect()),
            },
        };
        map.insert(f.name.to_string(), value);
    }
    map
}

fn number(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v).map_or(serde_json::Value::Null, serde_json::Value::Number)
}
