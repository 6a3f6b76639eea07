//! Binned statistics.
//!
//! A [VelBinner] splits the trailing time axis of an array into ensembles of
//! `n_bin` samples and reduces each ensemble to means, spectra, covariances and
//! turbulence quantities. Arrays are passed time last, any leading shape is
//! carried through, and outputs replace the time axis with an ensemble axis
//! (followed by a frequency or lag axis where there is one).
//!
//! ```
//! use doppler::binned::VelBinner;
//! use ndarray::Array1;
//!
//! let binner = VelBinner::builder().n_bin(4.0).fs(1.0).build();
//! let x = Array1::from_iter((0..10).map(f64::from)).into_dyn();
//! let means = binner.mean(x.view()).unwrap();
//! assert_eq!(means.as_slice().unwrap(), &[1.5, 5.5]);
//! ```
use ndarray::{ArrayD, ArrayView1, ArrayViewD, Axis, IxDyn};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::dataset::{Dataset, Variable};
use crate::error::{Error, Result};
use crate::rotate::base::{orientmat_at, orientmat_variable, Mat3};

mod covariance;
mod spectra;
mod turbulence;

pub use spectra::{calc_freq, FreqUnits, PsdOptions, Window};
pub use turbulence::{calc_spectral_slope, stress_tensor};

/// Ensemble binning parameters.
#[derive(Debug, Clone, TypedBuilder)]
pub struct VelBinner {
    /// Samples per ensemble. Need not be an integer.
    pub n_bin: f64,
    /// Sample rate in Hz.
    pub fs: f64,
    /// FFT length for spectra, defaults to `n_bin`.
    #[builder(default, setter(strip_option))]
    pub n_fft: Option<usize>,
    /// FFT length for coherence, defaults to `n_fft / 6`.
    #[builder(default, setter(strip_option))]
    pub n_fft_coh: Option<usize>,
    /// Per component instrument noise in velocity units.
    #[builder(default = [0.0; 3])]
    pub noise: [f64; 3],
    #[builder(default)]
    pub window: Window,
}

impl VelBinner {
    /// Whole samples taken per ensemble.
    #[must_use]
    pub fn bin_len(&self) -> usize {
        self.n_bin.floor() as usize
    }

    /// Number of complete ensembles in `len` samples.
    #[must_use]
    pub fn n_ens(&self, len: usize) -> usize {
        if self.n_bin < 1.0 {
            return 0;
        }
        (len as f64 / self.n_bin).floor() as usize
    }

    /// First sample of ensemble `e`. For non-integer bins the fractional
    /// remainder between ensembles is skipped.
    fn start(&self, e: usize) -> usize {
        (e as f64 * self.n_bin).floor() as usize
    }

    pub(crate) fn n_fft(&self) -> usize {
        self.n_fft.unwrap_or_else(|| self.bin_len())
    }

    pub(crate) fn n_fft_coh(&self) -> usize {
        self.n_fft_coh.unwrap_or_else(|| (self.n_fft() / 6).max(2))
    }

    fn check(&self, len: usize, n_pad: usize) -> Result<usize> {
        if !(self.n_bin >= 1.0) {
            return Err(Error::InvalidBinSize(format!("n_bin must be >= 1, got {}", self.n_bin)));
        }
        let n_ens = self.n_ens(len);
        if n_ens == 0 {
            return Err(Error::InvalidBinSize(format!(
                "{len} samples is less than one bin of {}",
                self.n_bin
            )));
        }
        if n_pad > 2 * self.bin_len() {
            return Err(Error::InvalidBinSize(format!(
                "padding {n_pad} exceeds twice the bin length {}",
                self.bin_len()
            )));
        }
        Ok(n_ens)
    }

    /// Reshape one series into `n_ens` rows of `bin_len + n_pad` samples.
    ///
    /// Each row borrows `n_pad / 2` samples from the end of the previous bin and
    /// `(n_pad + 1) / 2` from the start of the next; rows at the ends of the
    /// series are zero filled instead.
    pub(crate) fn reshape1(&self, x: ArrayView1<'_, f64>, n_pad: usize) -> Vec<f64> {
        let nb = self.bin_len();
        let n_ens = self.n_ens(x.len());
        let npd0 = n_pad / 2;
        let width = nb + n_pad;
        let mut out = vec![0.0; n_ens * width];
        for (e, row) in out.chunks_exact_mut(width).enumerate() {
            let s = self.start(e);
            for (j, v) in row.iter_mut().enumerate() {
                *v = if j < npd0 {
                    if e == 0 {
                        0.0
                    } else {
                        x[self.start(e - 1) + nb - npd0 + j]
                    }
                } else if j < npd0 + nb {
                    x[s + j - npd0]
                } else if e + 1 == n_ens {
                    0.0
                } else {
                    x[self.start(e + 1) + j - npd0 - nb]
                };
            }
        }
        out
    }

    /// Split the time axis into `[..., n_ens, bin_len + n_pad]`.
    ///
    /// Trailing samples that do not fill a bin are dropped.
    ///
    /// # Errors
    /// [Error::InvalidBinSize] if the series is shorter than one bin or the
    /// padding exceeds twice the bin length.
    pub fn reshape(&self, arr: ArrayViewD<'_, f64>, n_pad: usize) -> Result<ArrayD<f64>> {
        let n_ens = self.check(time_len(&arr)?, n_pad)?;
        lanes_map(arr, &[n_ens, self.bin_len() + n_pad], |x| self.reshape1(x, n_pad))
    }

    fn reduce<F>(&self, arr: ArrayViewD<'_, f64>, f: F) -> Result<ArrayD<f64>>
    where
        F: Fn(&[f64]) -> f64,
    {
        let n_ens = self.check(time_len(&arr)?, 0)?;
        let nb = self.bin_len();
        lanes_map(arr, &[n_ens], |x| {
            self.reshape1(x, 0).chunks_exact(nb).map(&f).collect()
        })
    }

    /// NaN-ignoring mean of each ensemble.
    ///
    /// # Errors
    /// See [VelBinner::reshape].
    pub fn mean(&self, arr: ArrayViewD<'_, f64>) -> Result<ArrayD<f64>> {
        self.reduce(arr, nanmean)
    }

    /// NaN-ignoring population variance of each ensemble.
    ///
    /// # Errors
    /// See [VelBinner::reshape].
    pub fn var(&self, arr: ArrayViewD<'_, f64>) -> Result<ArrayD<f64>> {
        self.reduce(arr, nanvar)
    }

    /// # Errors
    /// See [VelBinner::reshape].
    pub fn std(&self, arr: ArrayViewD<'_, f64>) -> Result<ArrayD<f64>> {
        Ok(self.var(arr)?.mapv_into(f64::sqrt))
    }

    /// Circular mean of angles in degrees, in `[0, 360)`.
    ///
    /// # Errors
    /// See [VelBinner::reshape].
    pub fn mean_angle(&self, arr: ArrayViewD<'_, f64>) -> Result<ArrayD<f64>> {
        self.reduce(arr, |b| {
            let (s, c) = b
                .iter()
                .filter(|x| x.is_finite())
                .fold((0.0, 0.0), |(s, c), x| {
                    let (sx, cx) = x.to_radians().sin_cos();
                    (s + sx, c + cx)
                });
            if s == 0.0 && c == 0.0 {
                f64::NAN
            } else {
                f64::atan2(s, c).to_degrees().rem_euclid(360.0)
            }
        })
    }

    /// Ensembles with their least squares linear trend removed, shaped
    /// `[..., n_ens, bin_len]`.
    ///
    /// # Errors
    /// See [VelBinner::reshape].
    pub fn detrend(&self, arr: ArrayViewD<'_, f64>) -> Result<ArrayD<f64>> {
        self.per_bin(arr, detrend_slice)
    }

    /// Ensembles with their mean removed, shaped `[..., n_ens, bin_len]`.
    ///
    /// # Errors
    /// See [VelBinner::reshape].
    pub fn demean(&self, arr: ArrayViewD<'_, f64>) -> Result<ArrayD<f64>> {
        self.per_bin(arr, demean_slice)
    }

    fn per_bin<F>(&self, arr: ArrayViewD<'_, f64>, f: F) -> Result<ArrayD<f64>>
    where
        F: Fn(&mut [f64]),
    {
        let n_ens = self.check(time_len(&arr)?, 0)?;
        let nb = self.bin_len();
        lanes_map(arr, &[n_ens, nb], |x| {
            let mut bins = self.reshape1(x, 0);
            bins.chunks_exact_mut(nb).for_each(&f);
            bins
        })
    }

    /// Bin average every time series of a dataset.
    ///
    /// `heading` is averaged as an angle and `orientmat` is re-orthonormalized
    /// after averaging. Variables without a trailing time axis are copied.
    ///
    /// # Errors
    /// See [VelBinner::reshape].
    pub fn bin_average(&self, ds: &Dataset) -> Result<Dataset> {
        let mut out = Dataset::new(ds.attrs.clone());
        out.attrs.n_bin = Some(self.n_bin);
        for (name, var) in ds.iter() {
            let trailing = var.dims.time_axis() == Some(var.dims.ndim() - 1);
            if !trailing {
                if var.dims.time_axis().is_none() {
                    out.insert(name, var.clone())?;
                } else {
                    debug!(name, "not bin averaging a spectral variable");
                }
                continue;
            }
            let data = match name {
                "heading" => self.mean_angle(var.data.view())?,
                "orientmat" => orthonormalize(&Variable::new(
                    self.mean(var.data.view())?,
                    var.dims,
                    &var.units,
                )?)?
                .data,
                _ => self.mean(var.data.view())?,
            };
            out.insert(name, Variable::new(data, var.dims, &var.units)?)?;
        }
        let present: Vec<String> = out.names().map(String::from).collect();
        out.attrs.rotate_vars.retain(|name, _| present.contains(name));
        Ok(out)
    }
}

/// Length of the trailing axis.
pub(crate) fn time_len(arr: &ArrayViewD<'_, f64>) -> Result<usize> {
    arr.shape()
        .last()
        .copied()
        .ok_or_else(|| Error::Shape("expected at least one axis".into()))
}

/// Apply `f` to every lane along the last axis, replacing that axis with
/// `tail`.
pub(crate) fn lanes_map<F>(arr: ArrayViewD<'_, f64>, tail: &[usize], mut f: F) -> Result<ArrayD<f64>>
where
    F: FnMut(ArrayView1<'_, f64>) -> Vec<f64>,
{
    let nd = arr.ndim();
    if nd == 0 {
        return Err(Error::Shape("expected at least one axis".into()));
    }
    let mut shape = arr.shape()[..nd - 1].to_vec();
    shape.extend_from_slice(tail);
    let mut out = Vec::with_capacity(shape.iter().product());
    for lane in arr.lanes(Axis(nd - 1)) {
        out.extend(f(lane));
    }
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), out)?)
}

pub(crate) fn nanmean(x: &[f64]) -> f64 {
    let (sum, n) = x
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

pub(crate) fn nanvar(x: &[f64]) -> f64 {
    let m = nanmean(x);
    nanmean(&x.iter().map(|v| (v - m).powi(2)).collect::<Vec<_>>())
}

pub(crate) fn demean_slice(x: &mut [f64]) {
    let m = nanmean(x);
    x.iter_mut().for_each(|v| *v -= m);
}

/// Remove the least squares line through the finite samples.
pub(crate) fn detrend_slice(x: &mut [f64]) {
    let pts: Vec<(f64, f64)> = x
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, v)| (i as f64, *v))
        .collect();
    let n = pts.len() as f64;
    if pts.len() < 2 {
        demean_slice(x);
        return;
    }
    let mx = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let sxy: f64 = pts.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    let sxx: f64 = pts.iter().map(|p| (p.0 - mx).powi(2)).sum();
    let slope = sxy / sxx;
    for (i, v) in x.iter_mut().enumerate() {
        *v -= my + slope * (i as f64 - mx);
    }
}

/// Nearest rotation to each averaged matrix, by Gram-Schmidt on the rows.
fn orthonormalize(var: &Variable) -> Result<Variable> {
    let n = var.time_len().unwrap_or(0);
    let mats: Vec<Mat3> = (0..n)
        .map(|t| {
            let m = orientmat_at(var, t);
            let r0 = normalize(m[0]);
            let d = dot(m[1], r0);
            let r1 = normalize([m[1][0] - d * r0[0], m[1][1] - d * r0[1], m[1][2] - d * r0[2]]);
            [r0, r1, cross(r0, r1)]
        })
        .collect();
    orientmat_variable(&mats)
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn normalize(a: [f64; 3]) -> [f64; 3] {
    let n = dot(a, a).sqrt();
    [a[0] / n, a[1] / n, a[2] / n]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Attrs, CoordSys, InstType, InstrumentProfile, Make};
    use crate::rotate::orient_from_euler;
    use crate::dataset::{variable, DimKind};
    use ndarray::{Array1, Array2};
    use test_case::test_case;

    fn series(data: Vec<f64>) -> Result<Variable> {
        let n = data.len();
        variable(data, &[n], DimKind::Time, "deg")
    }

    fn binner(n_bin: f64) -> VelBinner {
        VelBinner::builder().n_bin(n_bin).fs(1.0).build()
    }

    #[test_case(4.0, 12 ; "even")]
    #[test_case(5.0, 12 ; "remainder dropped")]
    #[test_case(2.5, 11 ; "fractional")]
    fn ensemble_count(n_bin: f64, len: usize) {
        let x = Array1::from_iter((0..len).map(|v| v as f64)).into_dyn();
        let out = binner(n_bin).reshape(x.view(), 0).unwrap();
        let n_ens = (len as f64 / n_bin).floor() as usize;
        assert_eq!(out.shape(), &[n_ens, n_bin.floor() as usize]);
    }

    #[test_case(2.0, 12)]
    #[test_case(3.0, 12)]
    #[test_case(4.0, 12)]
    #[test_case(12.0, 12 ; "single bin")]
    fn even_bins_flatten_to_input(n_bin: f64, len: usize) {
        let x = Array1::from_iter((0..len).map(|v| v as f64 * 0.5 - 1.0)).into_dyn();
        let out = binner(n_bin).reshape(x.view(), 0).unwrap();
        let flat: Vec<f64> = out.iter().copied().collect();
        let orig: Vec<f64> = x.iter().copied().collect();
        assert_eq!(flat, orig);
    }

    #[test]
    fn fractional_bins_skip_remainder() {
        let x = Array1::from_iter((0..10).map(f64::from)).into_dyn();
        let out = binner(2.5).reshape(x.view(), 0).unwrap();
        // starts at 0, 2, 5, 7
        assert_eq!(out.as_slice().unwrap(), &[0., 1., 2., 3., 5., 6., 7., 8.]);
    }

    #[test]
    fn padding_borrows_neighbours() {
        let x = Array1::from_iter((1..=9).map(f64::from)).into_dyn();
        let out = binner(3.0).reshape(x.view(), 2).unwrap();
        assert_eq!(
            out.as_slice().unwrap(),
            &[0., 1., 2., 3., 4., 3., 4., 5., 6., 7., 6., 7., 8., 9., 0.]
        );
    }

    #[test]
    fn leading_axes_are_kept() {
        let x = Array2::from_shape_fn((2, 8), |(i, j)| (i * 100 + j) as f64).into_dyn();
        let m = binner(4.0).mean(x.view()).unwrap();
        assert_eq!(m.shape(), &[2, 2]);
        assert_eq!(m[[1, 1]], 105.5);
    }

    #[test]
    fn nan_aware_reductions() {
        let x = Array1::from(vec![1.0, f64::NAN, 3.0, 5.0]).into_dyn();
        let b = binner(4.0);
        assert_eq!(b.mean(x.view()).unwrap()[[0]], 3.0);
        assert!((b.var(x.view()).unwrap()[[0]] - 8.0 / 3.0).abs() < 1e-12);
        assert!((b.std(x.view()).unwrap()[[0]] - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn detrend_removes_line() {
        let x = Array1::from_iter((0..8).map(|i| 2.0 * f64::from(i) + 1.0)).into_dyn();
        let d = binner(4.0).detrend(x.view()).unwrap();
        assert!(d.iter().all(|v| v.abs() < 1e-12));
        let d = binner(4.0).demean(x.view()).unwrap();
        assert_eq!(d[[0, 0]], -3.0);
    }

    #[test]
    fn angles_wrap() {
        let x = Array1::from(vec![350.0, 10.0, 355.0, 5.0]).into_dyn();
        let m = binner(4.0).mean_angle(x.view()).unwrap();
        assert!(m[[0]].min(360.0 - m[[0]]) < 1e-9);
    }

    #[test]
    fn short_series_is_rejected() {
        let x = Array1::<f64>::zeros(3).into_dyn();
        assert!(matches!(binner(4.0).mean(x.view()), Err(Error::InvalidBinSize(_))));
        assert!(matches!(binner(0.5).mean(x.view()), Err(Error::InvalidBinSize(_))));
    }

    #[test]
    fn dataset_average() {
        let mut ds = Dataset::new(Attrs::new(
            InstrumentProfile::new(Make::Nortek, InstType::Adv, 3),
            CoordSys::Earth,
            1.0,
        ));
        ds.insert("heading", series(vec![358.0, 2.0, 90.0, 90.0]).unwrap()).unwrap();
        let m = orient_from_euler(30.0, 0.0, 0.0);
        ds.insert("orientmat", orientmat_variable(&[m; 4]).unwrap()).unwrap();
        ds.insert("range", variable(vec![1.0, 2.0], &[2], DimKind::Cell, "m").unwrap())
            .unwrap();
        let out = binner(2.0).bin_average(&ds).unwrap();
        assert_eq!(out.attrs.n_bin, Some(2.0));
        assert_eq!(out.n_time(), Some(2));
        let h = &out.get("heading").unwrap().data;
        assert!(h[[0]] < 1e-9 || (360.0 - h[[0]]) < 1e-9);
        assert!((h[[1]] - 90.0).abs() < 1e-9);
        let om = orientmat_at(out.get("orientmat").unwrap(), 1);
        assert!((crate::rotate::base::det(&om) - 1.0).abs() < 1e-12);
        assert!(out.contains("range"));
    }
}
