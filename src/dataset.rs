//! In-memory representation of decoded and derived time series.
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::{ArrayD, ArrayView1, Axis, IxDyn, Slice};

use crate::config::Configuration;
use crate::error::{Error, Result};

/// Reference frames, in rotation-chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoordSys {
    Beam,
    Inst,
    Earth,
    Principal,
}

impl CoordSys {
    /// Position in the chain beam -> inst -> earth -> principal.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            CoordSys::Beam => 0,
            CoordSys::Inst => 1,
            CoordSys::Earth => 2,
            CoordSys::Principal => 3,
        }
    }

    #[must_use]
    pub fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(CoordSys::Beam),
            1 => Some(CoordSys::Inst),
            2 => Some(CoordSys::Earth),
            3 => Some(CoordSys::Principal),
            _ => None,
        }
    }
}

impl fmt::Display for CoordSys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoordSys::Beam => "beam",
            CoordSys::Inst => "inst",
            CoordSys::Earth => "earth",
            CoordSys::Principal => "principal",
        };
        f.write_str(s)
    }
}

impl FromStr for CoordSys {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "beam" => Ok(CoordSys::Beam),
            "inst" | "xyz" | "ship" => Ok(CoordSys::Inst),
            "earth" | "enu" => Ok(CoordSys::Earth),
            "principal" => Ok(CoordSys::Principal),
            other => Err(Error::Config(format!("unknown coordinate system {other:?}"))),
        }
    }
}

/// Named array axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    /// Beam or vector component
    Beam,
    /// Depth cell
    Cell,
    Time,
    Freq,
    Lag,
    Row,
    Col,
}

/// Declared dimensions of a [Variable]. Vector components always lead and time
/// precedes any spectral or lag axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimKind {
    Time,
    BeamTime,
    CellBeamTime,
    CellTime,
    MatrixTime,
    /// Range coordinate, no time axis
    Cell,
    /// Frequency coordinate, no time axis
    Freq,
    TimeFreq,
    BeamTimeFreq,
    CellBeamTimeFreq,
    BeamTimeLag,
    CellBeamTimeLag,
}

impl DimKind {
    #[must_use]
    pub fn dims(self) -> &'static [Dim] {
        use Dim::*;
        match self {
            DimKind::Time => &[Time],
            DimKind::BeamTime => &[Beam, Time],
            DimKind::CellBeamTime => &[Beam, Cell, Time],
            DimKind::CellTime => &[Cell, Time],
            DimKind::MatrixTime => &[Row, Col, Time],
            DimKind::Cell => &[Cell],
            DimKind::Freq => &[Freq],
            DimKind::TimeFreq => &[Time, Freq],
            DimKind::BeamTimeFreq => &[Beam, Time, Freq],
            DimKind::CellBeamTimeFreq => &[Beam, Cell, Time, Freq],
            DimKind::BeamTimeLag => &[Beam, Time, Lag],
            DimKind::CellBeamTimeLag => &[Beam, Cell, Time, Lag],
        }
    }

    #[must_use]
    pub fn ndim(self) -> usize {
        self.dims().len()
    }

    /// Index of the time axis, if there is one.
    #[must_use]
    pub fn time_axis(self) -> Option<usize> {
        self.dims().iter().position(|d| *d == Dim::Time)
    }

    /// Kind produced by appending a frequency or lag axis after time.
    #[must_use]
    pub fn with_trailing(self, dim: Dim) -> Option<DimKind> {
        match (self, dim) {
            (DimKind::Time, Dim::Freq) => Some(DimKind::TimeFreq),
            (DimKind::BeamTime, Dim::Freq) => Some(DimKind::BeamTimeFreq),
            (DimKind::CellBeamTime, Dim::Freq) => Some(DimKind::CellBeamTimeFreq),
            (DimKind::BeamTime, Dim::Lag) => Some(DimKind::BeamTimeLag),
            (DimKind::CellBeamTime, Dim::Lag) => Some(DimKind::CellBeamTimeLag),
            _ => None,
        }
    }
}

/// A named array with declared dimensions and physical units.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub data: ArrayD<f64>,
    pub dims: DimKind,
    pub units: String,
}

impl Variable {
    /// # Errors
    /// [Error::Shape] if `data` does not have as many axes as `dims` declares.
    pub fn new(data: ArrayD<f64>, dims: DimKind, units: &str) -> Result<Self> {
        if data.ndim() != dims.ndim() {
            return Err(Error::Shape(format!(
                "{dims:?} requires {} axes, got shape {:?}",
                dims.ndim(),
                data.shape()
            )));
        }
        Ok(Variable {
            data,
            dims,
            units: units.to_string(),
        })
    }

    /// Length along the time axis.
    #[must_use]
    pub fn time_len(&self) -> Option<usize> {
        self.dims.time_axis().map(|ax| self.data.shape()[ax])
    }

    /// Length of the leading component axis for vector kinds.
    #[must_use]
    pub fn n_components(&self) -> Option<usize> {
        match self.dims.dims().first() {
            Some(Dim::Beam) => Some(self.data.shape()[0]),
            _ => None,
        }
    }
}

/// Instrument vendor family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Make {
    /// Four-beam Janus profilers writing PD0 ensembles.
    Rdi,
    /// Three-beam velocimeters and profilers writing 0xA5 framed records.
    Nortek,
}

impl fmt::Display for Make {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Make::Rdi => f.write_str("TRDI"),
            Make::Nortek => f.write_str("Nortek"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstType {
    /// Profiler
    Adcp,
    /// Point velocimeter
    Adv,
}

/// What the rotation engine needs to know about the instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentProfile {
    pub make: Make,
    pub model: String,
    pub inst_type: InstType,
    pub n_beams: usize,
    /// True when orientation comes from a matrix-reporting sensor instead of a compass.
    pub has_orientmat_sensor: bool,
    pub orientation: Orientation,
    /// Beam angle from vertical in degrees (Janus heads).
    pub beam_angle: f64,
    /// Convex (true) or concave transducer arrangement.
    pub convex: bool,
    /// Row-major `n_beams x n_beams` beam to instrument matrix reported by the head.
    pub head_matrix: Option<Vec<f64>>,
}

impl InstrumentProfile {
    #[must_use]
    pub fn new(make: Make, inst_type: InstType, n_beams: usize) -> Self {
        InstrumentProfile {
            make,
            model: String::new(),
            inst_type,
            n_beams,
            has_orientmat_sensor: false,
            orientation: Orientation::Up,
            beam_angle: 20.0,
            convex: true,
            head_matrix: None,
        }
    }
}

/// Heading of the principal axis in degrees clockwise from north.
#[derive(Debug, Clone, PartialEq)]
pub enum PrincipalHeading {
    Constant(f64),
    /// One heading per time step.
    PerTime(Vec<f64>),
}

impl PrincipalHeading {
    #[must_use]
    pub fn at(&self, idx: usize) -> f64 {
        match self {
            PrincipalHeading::Constant(h) => *h,
            PrincipalHeading::PerTime(h) => h.get(idx).copied().unwrap_or(f64::NAN),
        }
    }

    pub fn shift(&mut self, delta: f64) {
        match self {
            PrincipalHeading::Constant(h) => *h += delta,
            PrincipalHeading::PerTime(h) => h.iter_mut().for_each(|x| *x += delta),
        }
    }
}

/// How a variable participates in frame changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateKind {
    /// Measured along beams; rotated by every step including beam <-> inst.
    Beam,
    /// Measured natively in the instrument frame; left alone between beam and inst.
    Inst,
}

/// Global dataset attributes.
#[derive(Debug, Clone)]
pub struct Attrs {
    pub profile: InstrumentProfile,
    pub coord_sys: CoordSys,
    /// Sample rate in Hz.
    pub fs: f64,
    /// Declination in degrees currently applied to heading and orientation.
    pub declination: Option<f64>,
    pub principal_heading: Option<PrincipalHeading>,
    pub rotate_vars: BTreeMap<String, RotateKind>,
    pub inst2head_rotmat: Option<[[f64; 3]; 3]>,
    pub inst2head_vec: Option<[f64; 3]>,
    /// Samples per bin for binned outputs.
    pub n_bin: Option<f64>,
    pub config: Arc<Configuration>,
}

impl Attrs {
    #[must_use]
    pub fn new(profile: InstrumentProfile, coord_sys: CoordSys, fs: f64) -> Self {
        Attrs {
            profile,
            coord_sys,
            fs,
            declination: None,
            principal_heading: None,
            rotate_vars: BTreeMap::new(),
            inst2head_rotmat: None,
            inst2head_vec: None,
            n_bin: None,
            config: Arc::new(Configuration::new()),
        }
    }
}

/// Named arrays sharing a time axis, plus attributes.
///
/// Every variable with a time axis has the same length along it; [Dataset::insert]
/// enforces this.
#[derive(Debug, Clone)]
pub struct Dataset {
    vars: BTreeMap<String, Variable>,
    pub attrs: Attrs,
}

impl Dataset {
    #[must_use]
    pub fn new(attrs: Attrs) -> Self {
        Dataset {
            vars: BTreeMap::new(),
            attrs,
        }
    }

    /// Add or replace a variable.
    ///
    /// # Errors
    /// [Error::Shape] if the variable's time length differs from the dataset's.
    pub fn insert(&mut self, name: &str, var: Variable) -> Result<()> {
        if let (Some(n), Some(have)) = (var.time_len(), self.n_time_excluding(name)) {
            if n != have {
                return Err(Error::Shape(format!(
                    "{name} has {n} time steps, dataset has {have}"
                )));
            }
        }
        self.vars.insert(name.to_string(), var);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.attrs.rotate_vars.remove(name);
        self.vars.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.vars.get_mut(name)
    }

    /// # Errors
    /// [Error::MissingVariable] if there is no variable `name`.
    pub fn require(&self, name: &str) -> Result<&Variable> {
        self.vars
            .get(name)
            .ok_or_else(|| Error::MissingVariable(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Length of the shared time axis, `None` if no variable has one.
    #[must_use]
    pub fn n_time(&self) -> Option<usize> {
        self.vars.values().find_map(Variable::time_len)
    }

    fn n_time_excluding(&self, name: &str) -> Option<usize> {
        self.vars
            .iter()
            .filter(|(k, _)| k.as_str() != name)
            .find_map(|(_, v)| v.time_len())
    }

    /// The `time` variable as seconds since the Unix epoch.
    #[must_use]
    pub fn time(&self) -> Option<ArrayView1<'_, f64>> {
        self.vars
            .get("time")
            .and_then(|v| v.data.view().into_dimensionality().ok())
    }

    /// Check the shared time-axis invariant across all variables.
    ///
    /// # Errors
    /// [Error::Shape] naming the first variable that disagrees.
    pub fn validate(&self) -> Result<()> {
        let mut expected: Option<(usize, &str)> = None;
        for (name, var) in &self.vars {
            if var.data.ndim() != var.dims.ndim() {
                return Err(Error::Shape(format!("{name} does not match {:?}", var.dims)));
            }
            if let Some(n) = var.time_len() {
                match expected {
                    None => expected = Some((n, name)),
                    Some((m, first)) if m != n => {
                        return Err(Error::Shape(format!(
                            "{name} has {n} time steps, {first} has {m}"
                        )))
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Copy of this dataset restricted to time indices `range`.
    #[must_use]
    pub fn slice_time(&self, range: Range<usize>) -> Dataset {
        let mut vars = BTreeMap::new();
        for (name, var) in &self.vars {
            let data = match var.dims.time_axis() {
                Some(ax) => {
                    let n = var.data.shape()[ax];
                    let slc = Slice::from(range.start.min(n)..range.end.min(n));
                    var.data.slice_axis(Axis(ax), slc).to_owned()
                }
                None => var.data.clone(),
            };
            vars.insert(
                name.clone(),
                Variable {
                    data,
                    dims: var.dims,
                    units: var.units.clone(),
                },
            );
        }
        let mut attrs = self.attrs.clone();
        if let Some(PrincipalHeading::PerTime(h)) = &attrs.principal_heading {
            let end = range.end.min(h.len());
            let start = range.start.min(end);
            attrs.principal_heading = Some(PrincipalHeading::PerTime(h[start..end].to_vec()));
        }
        Dataset { vars, attrs }
    }

    /// Restrict to samples whose time falls within `[start, end]` seconds.
    ///
    /// # Errors
    /// [Error::MissingVariable] if there is no `time` variable.
    pub fn crop_time(&self, start: f64, end: f64) -> Result<Dataset> {
        let time = self
            .time()
            .ok_or_else(|| Error::MissingVariable("time".to_string()))?;
        let first = time.iter().position(|t| *t >= start).unwrap_or(time.len());
        let last = time
            .iter()
            .rposition(|t| *t <= end)
            .map_or(first, |i| i + 1)
            .max(first);
        Ok(self.slice_time(first..last))
    }
}

/// Helper for building a variable from a flat vector and shape.
///
/// # Errors
/// [Error::Shape] if `data.len()` does not match `shape`.
pub fn variable(data: Vec<f64>, shape: &[usize], dims: DimKind, units: &str) -> Result<Variable> {
    let arr = ArrayD::from_shape_vec(IxDyn(shape), data)?;
    Variable::new(arr, dims, units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> Attrs {
        Attrs::new(
            InstrumentProfile::new(Make::Nortek, InstType::Adv, 3),
            CoordSys::Beam,
            16.0,
        )
    }

    #[test]
    fn insert_enforces_time_length() {
        let mut ds = Dataset::new(attrs());
        ds.insert(
            "time",
            variable(vec![0.0, 1.0, 2.0], &[3], DimKind::Time, "s").unwrap(),
        )
        .unwrap();
        ds.insert(
            "vel",
            variable(vec![0.0; 9], &[3, 3], DimKind::BeamTime, "m/s").unwrap(),
        )
        .unwrap();

        let err = ds
            .insert(
                "pressure",
                variable(vec![0.0; 4], &[4], DimKind::Time, "dbar").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Shape(_)), "got {err:?}");
        assert_eq!(ds.n_time(), Some(3));
        ds.validate().unwrap();
    }

    #[test]
    fn replacing_a_variable_may_change_its_own_length() {
        let mut ds = Dataset::new(attrs());
        ds.insert("time", variable(vec![0.0; 3], &[3], DimKind::Time, "s").unwrap())
            .unwrap();
        ds.insert("time", variable(vec![0.0; 2], &[2], DimKind::Time, "s").unwrap())
            .unwrap();
        assert_eq!(ds.n_time(), Some(2));
    }

    #[test]
    fn variable_rejects_wrong_rank() {
        assert!(variable(vec![0.0; 6], &[2, 3], DimKind::Time, "s").is_err());
    }

    #[test]
    fn crop_time_keeps_inclusive_range() {
        let mut ds = Dataset::new(attrs());
        ds.insert(
            "time",
            variable((0..10).map(f64::from).collect(), &[10], DimKind::Time, "s").unwrap(),
        )
        .unwrap();
        ds.insert(
            "vel",
            variable((0..30).map(f64::from).collect(), &[3, 10], DimKind::BeamTime, "m/s")
                .unwrap(),
        )
        .unwrap();

        let out = ds.crop_time(2.0, 5.0).unwrap();
        assert_eq!(out.n_time(), Some(4));
        assert_eq!(out.time().unwrap().to_vec(), vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(out.get("vel").unwrap().data[[1, 0]], 12.0);
    }

    #[test]
    fn coord_sys_order_and_parse() {
        assert!(CoordSys::Beam < CoordSys::Earth);
        assert_eq!("ENU".parse::<CoordSys>().unwrap(), CoordSys::Earth);
        assert_eq!(CoordSys::from_index(3), Some(CoordSys::Principal));
        assert_eq!(CoordSys::Inst.to_string(), "inst");
    }

    #[test]
    fn dim_kind_trailing() {
        assert_eq!(
            DimKind::CellBeamTime.with_trailing(Dim::Freq),
            Some(DimKind::CellBeamTimeFreq)
        );
        assert_eq!(DimKind::BeamTimeFreq.time_axis(), Some(1));
        assert_eq!(DimKind::MatrixTime.with_trailing(Dim::Lag), None);
    }
}
