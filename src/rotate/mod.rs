//! Coordinate frame state machine.
//!
//! A dataset is always in one of the frames of the chain
//! beam -> inst -> earth -> principal, recorded in `attrs.coord_sys`. Each
//! [Step] moves between adjacent frames and is only legal from its source
//! frame; [rotate_to] walks the chain one step at a time. [force_step] and
//! [force_rotate] are the explicit escapes for datasets whose recorded frame
//! is known to be wrong.
//!
//! Variables listed in `attrs.rotate_vars` are rotated along their leading
//! component axis. [RotateKind::Inst] variables are measured in the
//! instrument frame and skip the beam steps.
use ndarray::{Array2, ArrayView1, Axis};
use tracing::{debug, warn};

use crate::config::Userdata;
use crate::dataset::{
    variable, CoordSys, Dataset, DimKind, Make, Orientation, RotateKind, Variable,
};
use crate::decode::report;
use crate::error::{Error, Result, Warning};

pub mod base;
pub mod nortek;
pub mod principal;
pub mod rdi;
mod tensor;

use base::Mat3;
pub use base::{euler_from_orientmat, orient_from_euler};
pub use principal::calc_principal_heading;
pub use tensor::rotate_tensor;

/// A single transition between adjacent frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    BeamToInst,
    InstToBeam,
    InstToEarth,
    EarthToInst,
    EarthToPrincipal,
    PrincipalToEarth,
}

impl Step {
    #[must_use]
    pub fn source(self) -> CoordSys {
        match self {
            Step::BeamToInst => CoordSys::Beam,
            Step::InstToBeam | Step::InstToEarth => CoordSys::Inst,
            Step::EarthToInst | Step::EarthToPrincipal => CoordSys::Earth,
            Step::PrincipalToEarth => CoordSys::Principal,
        }
    }

    #[must_use]
    pub fn target(self) -> CoordSys {
        match self {
            Step::InstToBeam => CoordSys::Beam,
            Step::BeamToInst | Step::EarthToInst => CoordSys::Inst,
            Step::InstToEarth | Step::PrincipalToEarth => CoordSys::Earth,
            Step::EarthToPrincipal => CoordSys::Principal,
        }
    }

    /// The first step on the way from `from` to `to`, `None` if they are equal.
    #[must_use]
    pub fn toward(from: CoordSys, to: CoordSys) -> Option<Step> {
        use std::cmp::Ordering::*;
        Some(match (from.index().cmp(&to.index()), from) {
            (Equal, _) => return None,
            (Less, CoordSys::Beam) => Step::BeamToInst,
            (Less, CoordSys::Inst) => Step::InstToEarth,
            (Less, _) => Step::EarthToPrincipal,
            (Greater, CoordSys::Principal) => Step::PrincipalToEarth,
            (Greater, CoordSys::Earth) => Step::EarthToInst,
            (Greater, _) => Step::InstToBeam,
        })
    }

    fn is_beam(self) -> bool {
        matches!(self, Step::BeamToInst | Step::InstToBeam)
    }
}

/// The linear map applied by a step.
pub(crate) enum Transform {
    /// Same matrix at every time.
    Fixed(Array2<f64>),
    /// One 3x3 matrix per time, applied to the first three components.
    PerTime(Vec<Mat3>),
}

impl Transform {
    /// 3x3 matrix at time `t`.
    pub(crate) fn mat3(&self, t: usize) -> Result<Mat3> {
        match self {
            Transform::PerTime(m) => Ok(m.get(t).copied().unwrap_or([[f64::NAN; 3]; 3])),
            Transform::Fixed(m) if m.dim() == (3, 3) => {
                Ok(std::array::from_fn(|i| std::array::from_fn(|j| m[[i, j]])))
            }
            Transform::Fixed(m) => Err(Error::Config(format!(
                "a {}x{} beam matrix cannot rotate a 3x3 tensor",
                m.nrows(),
                m.ncols()
            ))),
        }
    }
}

/// Beam to instrument matrix for the dataset's instrument.
///
/// # Errors
/// [Error::Config] if the instrument has no usable beam geometry.
pub fn beam2inst(ds: &Dataset) -> Result<Array2<f64>> {
    let profile = &ds.attrs.profile;
    match profile.make {
        Make::Rdi => Ok(rdi::beam2inst(profile)),
        Make::Nortek => nortek::beam2inst(profile, ds.attrs.inst2head_rotmat.as_ref()),
    }
}

pub(crate) fn transform(ds: &Dataset, step: Step) -> Result<(Transform, Vec<Warning>)> {
    let mut warnings = Vec::new();
    let t = match step {
        Step::BeamToInst => Transform::Fixed(beam2inst(ds)?),
        Step::InstToBeam => Transform::Fixed(base::invert(beam2inst(ds)?.view())?),
        Step::InstToEarth | Step::EarthToInst => {
            let om = ds.require("orientmat")?;
            if let Some((count, first)) = base::check_orientmat(om) {
                report(&mut warnings, Warning::BadOrientationMatrix { count, first });
            }
            let n = om.time_len().unwrap_or(0);
            let mats = (0..n).map(|t| base::orientmat_at(om, t));
            Transform::PerTime(if step == Step::InstToEarth {
                mats.map(|m| base::transpose(&m)).collect()
            } else {
                mats.collect()
            })
        }
        Step::EarthToPrincipal | Step::PrincipalToEarth => {
            let heading = ds
                .attrs
                .principal_heading
                .as_ref()
                .ok_or(Error::MissingPrincipalHeading)?;
            let n = ds.n_time().unwrap_or(0);
            let mats = (0..n).map(|t| principal::earth2principal(heading.at(t)));
            Transform::PerTime(if step == Step::PrincipalToEarth {
                mats.map(|m| base::transpose(&m)).collect()
            } else {
                mats.collect()
            })
        }
    };
    Ok((t, warnings))
}

/// Call `f` with every component vector of `var` along with its time index.
/// The component axis is the first, time the last.
fn for_each_vector<F>(var: &mut Variable, mut f: F) -> Result<()>
where
    F: FnMut(usize, &mut [f64]),
{
    let ta = var
        .dims
        .time_axis()
        .filter(|ax| *ax > 0)
        .ok_or_else(|| Error::Shape(format!("{:?} is not a vector time series", var.dims)))?;
    let n = var.data.shape()[ta];
    let mut v = Vec::new();
    for t in 0..n {
        let mut sub = var.data.index_axis_mut(Axis(ta), t);
        for mut lane in sub.lanes_mut(Axis(0)) {
            v.clear();
            v.extend(lane.iter().copied());
            f(t, &mut v);
            lane.assign(&ArrayView1::from(&v[..]));
        }
    }
    Ok(())
}

/// Apply one step, which must start from the dataset's current frame.
///
/// # Errors
/// [Error::CoordinateFrame] if the dataset is not in `step.source()`,
/// [Error::MissingPrincipalHeading] for principal steps without a heading,
/// [Error::MissingVariable] for earth steps without orientation data.
pub fn apply_step(ds: &mut Dataset, step: Step) -> Result<Vec<Warning>> {
    let current = ds.attrs.coord_sys;
    if current != step.source() {
        return Err(Error::CoordinateFrame {
            current,
            requested: step.target(),
        });
    }
    if matches!(step, Step::InstToEarth | Step::EarthToInst) {
        ensure_orientmat(ds)?;
    }
    let (t, warnings) = transform(ds, step)?;
    let names: Vec<(String, RotateKind)> = ds
        .attrs
        .rotate_vars
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    for (name, kind) in names {
        if step.is_beam() && kind == RotateKind::Inst {
            continue;
        }
        let Some(var) = ds.get_mut(&name) else {
            debug!(name = %name, "rotate variable not present");
            continue;
        };
        let nc = var.n_components().unwrap_or(0);
        match &t {
            Transform::Fixed(m) => {
                if nc != m.ncols() {
                    return Err(Error::Shape(format!(
                        "{name} has {nc} components, beam matrix is {}x{}",
                        m.nrows(),
                        m.ncols()
                    )));
                }
                for_each_vector(var, |_, v| {
                    let out = m.dot(&ArrayView1::from(&v[..]));
                    v.copy_from_slice(out.as_slice().unwrap_or(&[]));
                })?;
            }
            Transform::PerTime(mats) => {
                if nc < 3 {
                    return Err(Error::Shape(format!("{name} has {nc} components, need 3")));
                }
                let nan = [[f64::NAN; 3]; 3];
                for_each_vector(var, |t, v| base::apply(mats.get(t).unwrap_or(&nan), v))?;
            }
        }
    }
    debug!(from = %step.source(), to = %step.target(), "rotated");
    ds.attrs.coord_sys = step.target();
    Ok(warnings)
}

/// Apply `step` regardless of the recorded frame.
///
/// # Errors
/// As [apply_step], except for [Error::CoordinateFrame].
pub fn force_step(ds: &mut Dataset, step: Step) -> Result<Vec<Warning>> {
    if ds.attrs.coord_sys != step.source() {
        warn!(
            recorded = %ds.attrs.coord_sys,
            assumed = %step.source(),
            "forcing rotation from a frame the dataset is not recorded in"
        );
        ds.attrs.coord_sys = step.source();
    }
    apply_step(ds, step)
}

/// Rotate in place to `target`, one step at a time.
///
/// # Errors
/// See [apply_step]. On error the dataset is left in the last frame reached.
pub fn rotate_to(ds: &mut Dataset, target: CoordSys) -> Result<Vec<Warning>> {
    let mut warnings = Vec::new();
    while let Some(step) = Step::toward(ds.attrs.coord_sys, target) {
        warnings.extend(apply_step(ds, step)?);
    }
    Ok(warnings)
}

/// Treat the dataset as being in `from`, then rotate to `target`.
///
/// # Errors
/// See [apply_step].
pub fn force_rotate(ds: &mut Dataset, from: CoordSys, target: CoordSys) -> Result<Vec<Warning>> {
    if ds.attrs.coord_sys != from {
        warn!(recorded = %ds.attrs.coord_sys, assumed = %from, "overriding recorded frame");
        ds.attrs.coord_sys = from;
    }
    rotate_to(ds, target)
}

/// Rotated copy of `ds`.
///
/// # Errors
/// See [rotate_to].
pub fn rotated(ds: &Dataset, target: CoordSys) -> Result<(Dataset, Vec<Warning>)> {
    let mut out = ds.clone();
    let warnings = rotate_to(&mut out, target)?;
    Ok((out, warnings))
}

/// Derive `orientmat` from `heading`, `pitch` and `roll` if it is absent, or
/// the angles from the matrix if only the matrix is present.
///
/// PD0 pitch is a gimbal angle and is converted to a true pitch first, and
/// down-facing PD0 instruments have 180 degrees added to roll.
///
/// # Errors
/// Only on an internal shape mismatch.
pub fn ensure_orientmat(ds: &mut Dataset) -> Result<()> {
    if let Some(om) = ds.get("orientmat") {
        if ds.contains("heading") {
            return Ok(());
        }
        let n = om.time_len().unwrap_or(0);
        let angles: Vec<_> = (0..n)
            .map(|t| euler_from_orientmat(&base::orientmat_at(om, t)))
            .collect();
        for (k, name) in ["heading", "pitch", "roll"].into_iter().enumerate() {
            let v = angles
                .iter()
                .map(|a| match k {
                    0 => a.0,
                    1 => a.1,
                    _ => a.2,
                })
                .collect();
            ds.insert(name, variable(v, &[n], DimKind::Time, "deg")?)?;
        }
        return Ok(());
    }
    let (Some(h), Some(p), Some(r)) = (ds.get("heading"), ds.get("pitch"), ds.get("roll")) else {
        debug!("no heading, pitch and roll; orientation matrix not derived");
        return Ok(());
    };
    let rdi = ds.attrs.profile.make == Make::Rdi;
    let down = ds.attrs.profile.orientation == Orientation::Down;
    let mats: Vec<Mat3> = h
        .data
        .iter()
        .zip(p.data.iter())
        .zip(r.data.iter())
        .map(|((h, p), r)| {
            let (mut p, mut r) = (*p, *r);
            if rdi {
                p = (p.to_radians().tan() * r.to_radians().cos())
                    .atan()
                    .to_degrees();
                if down {
                    r += 180.0;
                }
            }
            orient_from_euler(*h, p, r)
        })
        .collect();
    ds.insert("orientmat", base::orientmat_variable(&mats)?)
}

/// Set the magnetic declination in degrees, positive east.
///
/// Heading, the orientation matrix and any principal heading are adjusted by
/// the difference from the currently applied declination, so calling this
/// again replaces rather than accumulates. Datasets in the earth or principal
/// frame are rotated to the instrument frame and back around the adjustment.
///
/// # Errors
/// [Error::MissingVariable] if the dataset has no orientation data.
pub fn set_declination(ds: &mut Dataset, declination: f64) -> Result<Vec<Warning>> {
    let delta = declination - ds.attrs.declination.unwrap_or(0.0);
    if delta == 0.0 && ds.attrs.declination.is_some() {
        return Ok(Vec::new());
    }
    let frame = ds.attrs.coord_sys;
    let mut warnings = Vec::new();
    if frame > CoordSys::Inst {
        warnings.extend(rotate_to(ds, CoordSys::Inst)?);
    }
    ensure_orientmat(ds)?;
    let om = ds.require("orientmat")?;
    let rz = base::rot_z(delta);
    let n = om.time_len().unwrap_or(0);
    let mats: Vec<Mat3> = (0..n)
        .map(|t| base::matmul(&base::orientmat_at(om, t), &rz))
        .collect();
    ds.insert("orientmat", base::orientmat_variable(&mats)?)?;
    if let Some(h) = ds.get_mut("heading") {
        h.data.mapv_inplace(|x| (x + delta).rem_euclid(360.0));
    }
    if let Some(ph) = ds.attrs.principal_heading.as_mut() {
        ph.shift(delta);
    }
    ds.attrs.declination = Some(declination);
    debug!(declination, delta, "declination set");
    if frame > CoordSys::Inst {
        warnings.extend(rotate_to(ds, frame)?);
    }
    Ok(warnings)
}

/// Set the rotation from the instrument body to a separately mounted head.
///
/// The dataset is rotated back to beam coordinates with the previous head
/// rotation, then forward again with the new one.
///
/// # Errors
/// [Error::Config] for instruments without a three beam head.
pub fn set_inst2head_rotmat(ds: &mut Dataset, rotmat: Mat3) -> Result<Vec<Warning>> {
    if ds.attrs.profile.n_beams != 3 || ds.attrs.profile.make != Make::Nortek {
        return Err(Error::Config(
            "head rotation is only defined for three beam heads".into(),
        ));
    }
    let frame = ds.attrs.coord_sys;
    let mut warnings = rotate_to(ds, CoordSys::Beam)?;
    ds.attrs.inst2head_rotmat = Some(rotmat);
    warnings.extend(rotate_to(ds, frame)?);
    Ok(warnings)
}

/// Apply deployment metadata.
///
/// # Errors
/// Any error from [set_inst2head_rotmat], [set_declination] or
/// [Dataset::crop_time].
pub fn apply_userdata(ds: &mut Dataset, ud: &Userdata) -> Result<Vec<Warning>> {
    let mut warnings = Vec::new();
    if let Some(v) = ud.inst2head_vec {
        ds.attrs.inst2head_vec = Some(v);
    }
    if let Some(r) = ud.inst2head_rotmat {
        warnings.extend(set_inst2head_rotmat(ds, r)?);
    }
    if let Some(d) = ud.declination {
        warnings.extend(set_declination(ds, d)?);
    }
    if let Some((start, end)) = ud.time_range {
        *ds = ds.crop_time(start, end)?;
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Attrs, InstType, InstrumentProfile};

    fn adv(coord_sys: CoordSys) -> Dataset {
        let mut profile = InstrumentProfile::new(Make::Nortek, InstType::Adv, 3);
        profile.head_matrix = Some(vec![
            2.7, -1.3, -1.3, 0.0, -2.3, 2.3, 0.34, 0.34, 0.34,
        ]);
        let mut ds = Dataset::new(Attrs::new(profile, coord_sys, 16.0));
        ds.insert(
            "vel",
            variable(vec![1.0, 0.5, 0.1, 0.2, -0.3, 0.4], &[3, 2], DimKind::BeamTime, "m/s").unwrap(),
        )
        .unwrap();
        for (name, v) in [("heading", [10.0, 20.0]), ("pitch", [1.0, 2.0]), ("roll", [3.0, -4.0])] {
            ds.insert(name, variable(v.to_vec(), &[2], DimKind::Time, "deg").unwrap())
                .unwrap();
        }
        ds.attrs.rotate_vars.insert("vel".into(), RotateKind::Beam);
        ds
    }

    #[test]
    fn walk_order() {
        assert_eq!(Step::toward(CoordSys::Beam, CoordSys::Earth), Some(Step::BeamToInst));
        assert_eq!(Step::toward(CoordSys::Principal, CoordSys::Beam), Some(Step::PrincipalToEarth));
        assert_eq!(Step::toward(CoordSys::Inst, CoordSys::Beam), Some(Step::InstToBeam));
        assert_eq!(Step::toward(CoordSys::Earth, CoordSys::Earth), None);
    }

    #[test]
    fn step_from_wrong_frame_is_rejected() {
        let mut ds = adv(CoordSys::Beam);
        let err = apply_step(&mut ds, Step::InstToEarth).unwrap_err();
        assert!(matches!(
            err,
            Error::CoordinateFrame {
                current: CoordSys::Beam,
                requested: CoordSys::Earth
            }
        ));
        force_step(&mut ds, Step::InstToEarth).unwrap();
        assert_eq!(ds.attrs.coord_sys, CoordSys::Earth);
    }

    #[test]
    fn principal_needs_heading() {
        let mut ds = adv(CoordSys::Earth);
        assert!(matches!(
            rotate_to(&mut ds, CoordSys::Principal),
            Err(Error::MissingPrincipalHeading)
        ));
        assert_eq!(ds.attrs.coord_sys, CoordSys::Earth);
    }

    #[test]
    fn round_trip_through_every_frame() {
        let mut ds = adv(CoordSys::Beam);
        ds.attrs.principal_heading = Some(crate::dataset::PrincipalHeading::Constant(33.0));
        let orig = ds.get("vel").unwrap().data.clone();
        rotate_to(&mut ds, CoordSys::Principal).unwrap();
        assert_eq!(ds.attrs.coord_sys, CoordSys::Principal);
        rotate_to(&mut ds, CoordSys::Beam).unwrap();
        let back = &ds.get("vel").unwrap().data;
        for (a, b) in orig.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn declination_replaces_previous() {
        let mut ds = adv(CoordSys::Inst);
        set_declination(&mut ds, 10.0).unwrap();
        set_declination(&mut ds, 12.0).unwrap();
        assert_eq!(ds.attrs.declination, Some(12.0));
        let h = &ds.get("heading").unwrap().data;
        assert!((h[0] - 22.0).abs() < 1e-9);
        let (h0, _, _) = euler_from_orientmat(&base::orientmat_at(ds.get("orientmat").unwrap(), 0));
        assert!((h0 - 22.0).abs() < 1e-9);
    }

    #[test]
    fn orientmat_sensor_fills_angles() {
        let mut ds = adv(CoordSys::Inst);
        for name in ["heading", "pitch", "roll"] {
            ds.remove(name);
        }
        let m = orient_from_euler(45.0, 0.0, 0.0);
        ds.insert("orientmat", base::orientmat_variable(&[m, m]).unwrap())
            .unwrap();
        ensure_orientmat(&mut ds).unwrap();
        assert!((ds.get("heading").unwrap().data[1] - 45.0).abs() < 1e-9);
    }
}
