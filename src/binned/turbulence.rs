use std::f64::consts::PI;

use ndarray::{stack, Array1, Array3, ArrayD, ArrayView2, ArrayViewD, Axis, Slice};
use tracing::debug;

use super::{nanmean, PsdOptions, VelBinner};
use crate::dataset::{Dataset, Dim, DimKind, Variable};
use crate::error::{Error, Result};

/// Kolmogorov constant of the second order structure function.
const C2: f64 = 2.1;

/// `[u'v', u'w', v'w']` component pairs of [VelBinner::calc_stress].
const STRESS_PAIRS: [(usize, usize); 3] = [(0, 1), (0, 2), (1, 2)];

fn components(vel: &ArrayViewD<'_, f64>) -> Result<()> {
    if vel.ndim() < 2 || vel.shape()[0] < 3 {
        return Err(Error::Shape(format!(
            "expected at least three velocity components by time, got {:?}",
            vel.shape()
        )));
    }
    Ok(())
}

/// NaN-ignoring mean of `a * b` over the last axis.
fn mean_product(a: &ArrayD<f64>, b: &ArrayD<f64>) -> ArrayD<f64> {
    let prod = a * b;
    let last = Axis(prod.ndim() - 1);
    prod.map_axis(last, |lane| nanmean(&lane.to_vec()))
}

/// Least squares `(intercept, slope)` of `y` on `x`.
fn fit_line(pts: &[(f64, f64)]) -> Option<(f64, f64)> {
    if pts.len() < 2 {
        return None;
    }
    let n = pts.len() as f64;
    let mx = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = pts.iter().map(|p| (p.0 - mx).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = pts.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    let slope = sxy / sxx;
    Some((my - slope * mx, slope))
}

impl VelBinner {
    fn fluctuations(&self, comp: ArrayViewD<'_, f64>, detrend: bool) -> Result<ArrayD<f64>> {
        if detrend {
            self.detrend(comp)
        } else {
            self.demean(comp)
        }
    }

    /// Per ensemble variance of the first three velocity components, less the
    /// squared instrument noise, shaped `[3, ..., n_ens]`.
    ///
    /// # Errors
    /// [Error::Shape] if `vel` has fewer than three components, otherwise see
    /// [VelBinner::reshape].
    pub fn calc_tke(&self, vel: ArrayViewD<'_, f64>, detrend: bool) -> Result<ArrayD<f64>> {
        components(&vel)?;
        let parts = (0..3)
            .map(|c| {
                let f = self.fluctuations(vel.index_axis(Axis(0), c), detrend)?;
                let noise = self.noise[c].powi(2);
                Ok(mean_product(&f, &f).mapv_into(|v| v - noise))
            })
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = parts.iter().map(ArrayD::view).collect();
        Ok(stack(Axis(0), &views)?)
    }

    /// Per ensemble Reynolds stresses `[u'v', u'w', v'w']`, shaped
    /// `[3, ..., n_ens]`.
    ///
    /// # Errors
    /// See [VelBinner::calc_tke].
    pub fn calc_stress(&self, vel: ArrayViewD<'_, f64>, detrend: bool) -> Result<ArrayD<f64>> {
        components(&vel)?;
        let fl = (0..3)
            .map(|c| self.fluctuations(vel.index_axis(Axis(0), c), detrend))
            .collect::<Result<Vec<_>>>()?;
        let parts: Vec<_> = STRESS_PAIRS
            .iter()
            .map(|&(a, b)| mean_product(&fl[a], &fl[b]))
            .collect();
        let views: Vec<_> = parts.iter().map(ArrayD::view).collect();
        Ok(stack(Axis(0), &views)?)
    }

    /// Bin averaged dataset with the turbulence statistics of `vel` added:
    /// `tke_vec`, `stress`, `tke` (half the trace), `psd` of the first three
    /// components and its `freq`.
    ///
    /// # Errors
    /// [Error::MissingVariable] without `vel`, [Error::Shape] if it is not a
    /// vector of at least three components, otherwise see [VelBinner::reshape].
    pub fn calc_turbulence(&self, ds: &Dataset) -> Result<Dataset> {
        let vel = ds.require("vel")?;
        let n_comp = vel.data.shape()[0].min(3);
        let vel3 = vel.data.slice_axis(Axis(0), Slice::from(0..n_comp));
        components(&vel3)?;
        let spectral = vel
            .dims
            .with_trailing(Dim::Freq)
            .ok_or_else(|| Error::Shape(format!("cannot take spectra of {:?}", vel.dims)))?;
        let scalar = match vel.dims {
            DimKind::BeamTime => DimKind::Time,
            _ => DimKind::CellTime,
        };

        let mut out = self.bin_average(ds)?;
        let tke_vec = self.calc_tke(vel3.view(), true)?;
        let tke = tke_vec.sum_axis(Axis(0)).mapv_into(|v| 0.5 * v);
        let stress = self.calc_stress(vel3.view(), true)?;

        let psds = (0..3)
            .map(|c| {
                let opts = PsdOptions::builder().noise(self.noise[c]).build();
                self.calc_psd(vel3.index_axis(Axis(0), c), &opts)
            })
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = psds.iter().map(ArrayD::view).collect();
        let psd = stack(Axis(0), &views)?;
        let freq = Array1::from(self.freq(&PsdOptions::default()));
        debug!(
            n_ens = tke.shape().last().copied().unwrap_or(0),
            n_freq = freq.len(),
            "turbulence statistics"
        );

        out.insert("tke_vec", Variable::new(tke_vec, vel.dims, "m^2/s^2")?)?;
        out.insert("stress", Variable::new(stress, vel.dims, "m^2/s^2")?)?;
        out.insert("tke", Variable::new(tke, scalar, "m^2/s^2")?)?;
        out.insert("psd", Variable::new(psd, spectral, "m^2/s^2/Hz")?)?;
        out.insert("freq", Variable::new(freq.into_dyn(), DimKind::Freq, "Hz")?)?;
        Ok(out)
    }

    /// Dissipation rate from the inertial subrange of a velocity spectrum
    /// (Lumley and Terray, 1983).
    ///
    /// `psd` is `[n_ens, n_freq]` per Hz at `freq`, `u_mag` the mean advection
    /// speed of each ensemble. Each density in `f_range` gives an estimate of
    /// `eps^(2/3)` through `S(w) = a eps^(2/3) U^(2/3) w^(-5/3)` with `a = 0.5`
    /// for the streamwise component and `0.65` for transverse ones; these are
    /// averaged before raising to `3/2`. Ensembles with no frequency in range
    /// give NaN.
    ///
    /// # Errors
    /// [Error::Shape] if the lengths of `freq` or `u_mag` do not match `psd`.
    pub fn calc_epsilon_lt83(
        &self,
        psd: ArrayView2<'_, f64>,
        freq: &[f64],
        u_mag: &[f64],
        f_range: (f64, f64),
        transverse: bool,
    ) -> Result<Vec<f64>> {
        let (n_ens, n_freq) = psd.dim();
        if freq.len() != n_freq || u_mag.len() != n_ens {
            return Err(Error::Shape(format!(
                "psd {:?} does not match {} frequencies and {} speeds",
                psd.shape(),
                freq.len(),
                u_mag.len()
            )));
        }
        let a = if transverse { 0.65 } else { 0.5 };
        let band: Vec<usize> = (0..n_freq)
            .filter(|&k| freq[k] >= f_range.0 && freq[k] <= f_range.1)
            .collect();
        Ok(psd
            .outer_iter()
            .zip(u_mag)
            .map(|(row, u)| {
                let est: Vec<f64> = band
                    .iter()
                    .map(|&k| {
                        let w = 2.0 * PI * freq[k];
                        row[k] / (2.0 * PI) * w.powf(5.0 / 3.0) / (a * u.abs().powf(2.0 / 3.0))
                    })
                    .collect();
                nanmean(&est).powf(1.5)
            })
            .collect())
    }

    /// Dissipation rate from the second order structure function along a
    /// beam.
    ///
    /// `vel` is one beam's velocity `[n_cells, time]` at cell distances
    /// `range`. For every pair of cells separated by a distance `r` in
    /// `r_range`, `D = mean((v_i - v_j)^2)` over the demeaned ensemble; fitting
    /// `D = N + A r^(2/3)` gives `eps = (A / 2.1)^(3/2)`, NaN where `A` is not
    /// positive or fewer than two separations are in range.
    ///
    /// # Errors
    /// [Error::Shape] if `range` does not match the cell count, otherwise see
    /// [VelBinner::reshape].
    pub fn calc_epsilon_sf(
        &self,
        vel: ArrayView2<'_, f64>,
        range: &[f64],
        r_range: (f64, f64),
    ) -> Result<Vec<f64>> {
        let n_cells = vel.nrows();
        if range.len() != n_cells {
            return Err(Error::Shape(format!(
                "{} ranges for {n_cells} cells",
                range.len()
            )));
        }
        let fl = self.demean(vel.into_dyn())?;
        let fl = fl.into_dimensionality::<ndarray::Ix3>()?;
        let pairs: Vec<(usize, usize, f64)> = (0..n_cells)
            .flat_map(|i| (i + 1..n_cells).map(move |j| (i, j)))
            .map(|(i, j)| (i, j, (range[j] - range[i]).abs()))
            .filter(|&(_, _, r)| r >= r_range.0 && r <= r_range.1)
            .collect();
        Ok((0..fl.shape()[1])
            .map(|e| {
                let pts: Vec<(f64, f64)> = pairs
                    .iter()
                    .map(|&(i, j, r)| {
                        let d = structure(&fl, i, j, e);
                        (r.powf(2.0 / 3.0), d)
                    })
                    .filter(|p| p.1.is_finite())
                    .collect();
                match fit_line(&pts) {
                    Some((_, a)) if a > 0.0 => (a / C2).powf(1.5),
                    _ => f64::NAN,
                }
            })
            .collect())
    }
}

fn structure(fl: &Array3<f64>, i: usize, j: usize, e: usize) -> f64 {
    let diffs: Vec<f64> = fl
        .slice(ndarray::s![i, e, ..])
        .iter()
        .zip(fl.slice(ndarray::s![j, e, ..]))
        .map(|(a, b)| (a - b).powi(2))
        .collect();
    nanmean(&diffs)
}

/// Symmetric `[3, 3, time]` Reynolds stress tensor from per component
/// variances `[3, time]` and stresses `[u'v', u'w', v'w']`.
///
/// # Errors
/// [Error::Shape] unless both are three component time series of equal length.
pub fn stress_tensor(tke_vec: &Variable, stress: &Variable) -> Result<Variable> {
    let ok = |v: &Variable| v.dims == DimKind::BeamTime && v.data.shape()[0] == 3;
    if !ok(tke_vec) || !ok(stress) || tke_vec.data.shape() != stress.data.shape() {
        return Err(Error::Shape(format!(
            "expected two [3, time] series, got {:?} and {:?}",
            tke_vec.data.shape(),
            stress.data.shape()
        )));
    }
    let n = tke_vec.data.shape()[1];
    let mut out = Array3::zeros((3, 3, n));
    for t in 0..n {
        for c in 0..3 {
            out[[c, c, t]] = tke_vec.data[[c, t]];
        }
        for (k, &(a, b)) in STRESS_PAIRS.iter().enumerate() {
            out[[a, b, t]] = stress.data[[k, t]];
            out[[b, a, t]] = stress.data[[k, t]];
        }
    }
    Variable::new(out.into_dyn(), DimKind::MatrixTime, &tke_vec.units)
}

/// Log-log least squares slope of `psd` against `freq` over `f_range`; near
/// `-5/3` in an inertial subrange. NaN with fewer than two usable points.
#[must_use]
pub fn calc_spectral_slope(freq: &[f64], psd: &[f64], f_range: (f64, f64)) -> f64 {
    let pts: Vec<(f64, f64)> = freq
        .iter()
        .zip(psd)
        .filter(|(f, s)| **f > 0.0 && **s > 0.0 && **f >= f_range.0 && **f <= f_range.1)
        .map(|(f, s)| (f.ln(), s.ln()))
        .collect();
    fit_line(&pts).map_or(f64::NAN, |(_, slope)| slope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{variable, Attrs, CoordSys, InstType, InstrumentProfile, Make};
    use ndarray::Array2;

    fn sine_vel(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((3, n), |(c, i)| {
            if c == 0 {
                (2.0 * PI * i as f64 / 100.0).sin()
            } else {
                0.0
            }
        })
    }

    #[test]
    fn tke_of_sine_is_half_amplitude_squared() {
        let vel = sine_vel(1000);
        let binner = VelBinner::builder()
            .n_bin(500.0)
            .fs(1.0)
            .noise([0.1, 0.0, 0.0])
            .build();
        let tke = binner.calc_tke(vel.view().into_dyn(), false).unwrap();
        assert_eq!(tke.shape(), &[3, 2]);
        assert!((tke[[0, 0]] - (0.5 - 0.01)).abs() < 1e-9);
        assert_eq!(tke[[1, 1]], 0.0);
    }

    #[test]
    fn stress_of_correlated_components() {
        let mut vel = sine_vel(400);
        let u = vel.row(0).to_owned();
        vel.row_mut(2).assign(&(-&u));
        let binner = VelBinner::builder().n_bin(200.0).fs(1.0).build();
        let s = binner.calc_stress(vel.view().into_dyn(), false).unwrap();
        assert!(s[[0, 0]].abs() < 1e-12);
        assert!((s[[1, 0]] + 0.5).abs() < 1e-3);
        assert!(s[[2, 1]].abs() < 1e-12);
    }

    #[test]
    fn two_components_are_rejected() {
        let vel = Array2::<f64>::zeros((2, 100));
        let binner = VelBinner::builder().n_bin(10.0).fs(1.0).build();
        assert!(matches!(
            binner.calc_tke(vel.view().into_dyn(), true),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn turbulence_dataset() {
        let mut ds = Dataset::new(Attrs::new(
            InstrumentProfile::new(Make::Nortek, InstType::Adv, 3),
            CoordSys::Earth,
            1.0,
        ));
        let time = variable((0..800).map(f64::from).collect(), &[800], DimKind::Time, "s");
        ds.insert("time", time.unwrap()).unwrap();
        ds.insert(
            "vel",
            Variable::new(sine_vel(800).into_dyn(), DimKind::BeamTime, "m/s").unwrap(),
        )
        .unwrap();
        let binner = VelBinner::builder().n_bin(400.0).fs(1.0).n_fft(100).build();
        let out = binner.calc_turbulence(&ds).unwrap();
        assert_eq!(out.get("vel").unwrap().data.shape(), &[3, 2]);
        assert_eq!(out.get("tke").unwrap().dims, DimKind::Time);
        let psd = out.get("psd").unwrap();
        assert_eq!(psd.dims, DimKind::BeamTimeFreq);
        assert_eq!(psd.data.shape(), &[3, 2, 50]);
        assert_eq!(out.get("freq").unwrap().data.len(), 50);
        let tensor =
            stress_tensor(out.get("tke_vec").unwrap(), out.get("stress").unwrap()).unwrap();
        assert_eq!(tensor.data.shape(), &[3, 3, 2]);
        assert_eq!(tensor.data[[0, 1, 0]], tensor.data[[1, 0, 0]]);
        let tke = out.get("tke").unwrap().data[[0]];
        assert!((tke - 0.5 * tensor.data[[0, 0, 0]]).abs() < 1e-12);
    }

    #[test]
    fn lt83_recovers_dissipation() {
        let eps: f64 = 1e-5;
        let u: f64 = 0.4;
        let freq: Vec<f64> = (1..=64).map(|k| k as f64 / 16.0).collect();
        let psd = Array2::from_shape_fn((2, freq.len()), |(_, k)| {
            let w = 2.0 * PI * freq[k];
            2.0 * PI * 0.5 * eps.powf(2.0 / 3.0) * u.powf(2.0 / 3.0) * w.powf(-5.0 / 3.0)
        });
        let binner = VelBinner::builder().n_bin(128.0).fs(8.0).build();
        let out = binner
            .calc_epsilon_lt83(psd.view(), &freq, &[u, u], (0.5, 2.0), false)
            .unwrap();
        assert!(out.iter().all(|e| ((e - eps) / eps).abs() < 1e-9));
        let slope = calc_spectral_slope(&freq, psd.row(0).as_slice().unwrap(), (0.5, 2.0));
        assert!((slope + 5.0 / 3.0).abs() < 1e-9);
        let none = binner
            .calc_epsilon_lt83(psd.view(), &freq, &[u, u], (10.0, 20.0), false)
            .unwrap();
        assert!(none[0].is_nan());
    }

    #[test]
    fn structure_function_fit() {
        // orthogonal zero-mean signals, so D_ij = c_i^2 + c_j^2
        let walsh = [
            [1., 1., 1., 1., -1., -1., -1., -1.],
            [1., 1., -1., -1., 1., 1., -1., -1.],
            [1., -1., 1., -1., 1., -1., 1., -1.],
        ];
        let a = C2;
        let x2 = 2f64.powf(2.0 / 3.0);
        let c0 = (a * x2 / 2.0).sqrt();
        let c1 = (a - a * x2 / 2.0).sqrt();
        let amp = [c0, c1, c0];
        let vel = Array2::from_shape_fn((3, 16), |(i, t)| amp[i] * walsh[i][t % 8]);
        let binner = VelBinner::builder().n_bin(8.0).fs(1.0).build();
        let eps = binner
            .calc_epsilon_sf(vel.view(), &[0.0, 1.0, 2.0], (0.5, 3.0))
            .unwrap();
        assert_eq!(eps.len(), 2);
        assert!(eps.iter().all(|e| (e - 1.0).abs() < 1e-9), "{eps:?}");

        let flat = Array2::<f64>::zeros((3, 16));
        let eps = binner
            .calc_epsilon_sf(flat.view(), &[0.0, 1.0, 2.0], (0.5, 3.0))
            .unwrap();
        assert!(eps[0].is_nan());
        assert!(binner.calc_epsilon_sf(flat.view(), &[0.0], (0.5, 3.0)).is_err());
    }
}
