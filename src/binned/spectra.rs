//! Welch spectra of binned series.
//!
//! Each ensemble is divided into half-overlapping segments of `n_fft`
//! samples; every segment is demeaned, windowed, zero padded by `pad` and
//! transformed. Spectra are one sided, exclude the zero frequency and are
//! scaled so that integrating over frequency gives the variance.
use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::{Array2, ArrayD, ArrayView1, ArrayViewD};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use tracing::debug;
use typed_builder::TypedBuilder;

use super::{demean_slice, lanes_map, time_len, VelBinner};
use crate::error::{Error, Result};

/// Taper applied to each segment before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Window {
    /// Rectangular.
    None,
    #[default]
    Hann,
    Hamming,
}

impl Window {
    #[must_use]
    pub fn coefficients(self, n: usize) -> Vec<f64> {
        if n < 2 {
            return vec![1.0; n];
        }
        let m = (n - 1) as f64;
        (0..n)
            .map(|i| {
                let c = (2.0 * PI * i as f64 / m).cos();
                match self {
                    Window::None => 1.0,
                    Window::Hann => 0.5 * (1.0 - c),
                    Window::Hamming => 0.54 - 0.46 * c,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreqUnits {
    #[default]
    Hz,
    /// Angular frequency; densities are per rad/s.
    RadPerSec,
}

impl FreqUnits {
    fn factor(self) -> f64 {
        match self {
            FreqUnits::Hz => 1.0,
            FreqUnits::RadPerSec => 2.0 * PI,
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PsdOptions {
    /// Segment length, defaults to the binner's `n_fft`.
    #[builder(default, setter(strip_option))]
    pub n_fft: Option<usize>,
    /// Defaults to the binner's window.
    #[builder(default, setter(strip_option))]
    pub window: Option<Window>,
    /// White noise level in the series' units, subtracted from the spectrum.
    #[builder(default)]
    pub noise: f64,
    /// Replacement for densities that are negative after noise subtraction.
    /// Defaults to one hundredth of the smallest magnitude in the output.
    #[builder(default, setter(strip_option))]
    pub floor: Option<f64>,
    /// Zeros appended to each segment before the FFT.
    #[builder(default)]
    pub pad: usize,
    #[builder(default)]
    pub freq_units: FreqUnits,
}

impl Default for PsdOptions {
    fn default() -> Self {
        PsdOptions::builder().build()
    }
}

/// Frequencies of a one sided spectrum of `n_fft` points, zero excluded.
#[must_use]
pub fn calc_freq(fs: f64, n_fft: usize, units: FreqUnits) -> Vec<f64> {
    (1..=n_fft / 2)
        .map(|k| k as f64 * fs / n_fft as f64 * units.factor())
        .collect()
}

/// Segment transform shared by all spectra of one call.
struct Welch {
    n_fft: usize,
    n_total: usize,
    window: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
    /// Per frequency density scaling.
    scale: Vec<f64>,
}

impl Welch {
    fn new(n_fft: usize, pad: usize, window: Window, fs: f64, units: FreqUnits) -> Self {
        let n_total = n_fft + pad;
        let window = window.coefficients(n_fft);
        let wss: f64 = window.iter().map(|w| w * w).sum();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_total);
        let scale = (1..=n_total / 2)
            .map(|k| {
                let one_sided = if 2 * k == n_total { 1.0 } else { 2.0 };
                one_sided / (fs * wss) / units.factor()
            })
            .collect();
        Welch {
            n_fft,
            n_total,
            window,
            fft,
            scale,
        }
    }

    fn n_freq(&self) -> usize {
        self.n_total / 2
    }

    /// Spectra of each segment of `x`, positive frequencies only.
    fn segments(&self, x: &[f64]) -> Vec<Vec<Complex64>> {
        let step = (self.n_fft / 2).max(1);
        let mut out = Vec::new();
        let mut start = 0;
        while start + self.n_fft <= x.len() {
            let mut seg = x[start..start + self.n_fft].to_vec();
            demean_slice(&mut seg);
            let mut buf: Vec<Complex64> = seg
                .iter()
                .zip(&self.window)
                .map(|(v, w)| Complex64::new(v * w, 0.0))
                .chain(std::iter::repeat(Complex64::new(0.0, 0.0)))
                .take(self.n_total)
                .collect();
            self.fft.process(&mut buf);
            out.push(buf[1..=self.n_freq()].to_vec());
            start += step;
        }
        out
    }

    fn psd(&self, x: &[f64]) -> Vec<f64> {
        let segs = self.segments(x);
        let n = segs.len() as f64;
        (0..self.n_freq())
            .map(|k| segs.iter().map(|s| s[k].norm_sqr()).sum::<f64>() / n * self.scale[k])
            .collect()
    }

    /// Averaged auto and cross spectra `(Saa, Sbb, Sab)` and the segment count.
    fn cross(&self, a: &[f64], b: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<Complex64>, usize) {
        let (sa, sb) = (self.segments(a), self.segments(b));
        let n = sa.len().min(sb.len());
        let nf = n as f64;
        let mut saa = vec![0.0; self.n_freq()];
        let mut sbb = vec![0.0; self.n_freq()];
        let mut sab = vec![Complex64::new(0.0, 0.0); self.n_freq()];
        for (xa, xb) in sa.iter().zip(&sb) {
            for k in 0..self.n_freq() {
                saa[k] += xa[k].norm_sqr() / nf * self.scale[k];
                sbb[k] += xb[k].norm_sqr() / nf * self.scale[k];
                sab[k] += xa[k].conj() * xb[k] / nf * self.scale[k];
            }
        }
        (saa, sbb, sab, n)
    }
}

impl VelBinner {
    fn segment_len(&self, n_fft: usize) -> Result<usize> {
        let nb = self.bin_len();
        if n_fft < 2 || n_fft > nb {
            return Err(Error::InvalidBinSize(format!(
                "FFT length {n_fft} must be between 2 and the bin length {nb}"
            )));
        }
        Ok(n_fft)
    }

    /// Frequencies matching [VelBinner::calc_psd] with `opts`.
    #[must_use]
    pub fn freq(&self, opts: &PsdOptions) -> Vec<f64> {
        calc_freq(
            self.fs,
            opts.n_fft.unwrap_or_else(|| self.n_fft()) + opts.pad,
            opts.freq_units,
        )
    }

    /// Power spectral density of each ensemble, shaped `[..., n_ens, n_freq]`.
    ///
    /// # Errors
    /// [Error::InvalidBinSize] if the series is shorter than a bin or the FFT
    /// length does not fit in one.
    pub fn calc_psd(&self, arr: ArrayViewD<'_, f64>, opts: &PsdOptions) -> Result<ArrayD<f64>> {
        let n_ens = self.check(time_len(&arr)?, 0)?;
        let nb = self.bin_len();
        let n_fft = self.segment_len(opts.n_fft.unwrap_or_else(|| self.n_fft()))?;
        let welch = Welch::new(
            n_fft,
            opts.pad,
            opts.window.unwrap_or(self.window),
            self.fs,
            opts.freq_units,
        );
        let mut out = lanes_map(arr, &[n_ens, welch.n_freq()], |x| {
            self.reshape1(x, 0)
                .chunks_exact(nb)
                .flat_map(|b| welch.psd(b))
                .collect()
        })?;
        if opts.noise != 0.0 {
            let level = opts.noise.powi(2) / (self.fs / 2.0) / opts.freq_units.factor();
            out.mapv_inplace(|s| s - level);
            let floor = opts.floor.unwrap_or_else(|| {
                out.iter()
                    .filter(|s| s.is_finite())
                    .map(|s| s.abs())
                    .fold(f64::INFINITY, f64::min)
                    / 100.0
            });
            let floor = if floor.is_finite() { floor } else { 0.0 };
            let mut clipped = 0usize;
            out.mapv_inplace(|s| {
                if s < 0.0 {
                    clipped += 1;
                    floor
                } else {
                    s
                }
            });
            debug!(level, floor, clipped, "noise subtracted from spectrum");
        }
        Ok(out)
    }

    /// Resample the longer of two series so both have the shorter length and
    /// cover the same span.
    fn align(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> (Vec<f64>, Vec<f64>) {
        let stride = |long: ArrayView1<'_, f64>, n: usize| -> Vec<f64> {
            let step = long.len() as f64 / n as f64;
            (0..n).map(|j| long[(j as f64 * step) as usize]).collect()
        };
        match a.len().cmp(&b.len()) {
            std::cmp::Ordering::Equal => (a.to_vec(), b.to_vec()),
            std::cmp::Ordering::Less => (a.to_vec(), stride(b, a.len())),
            std::cmp::Ordering::Greater => (stride(a, b.len()), b.to_vec()),
        }
    }

    fn cross_bins<T, F>(
        &self,
        a: ArrayView1<'_, f64>,
        b: ArrayView1<'_, f64>,
        n_fft: usize,
        f: F,
    ) -> Result<Array2<T>>
    where
        F: Fn(Vec<f64>, Vec<f64>, Vec<Complex64>, usize) -> Vec<T>,
    {
        let (a, b) = Self::align(a, b);
        let n_ens = self.check(a.len(), 0)?;
        let nb = self.bin_len();
        let n_fft = self.segment_len(n_fft)?;
        let welch = Welch::new(n_fft, 0, self.window, self.fs, FreqUnits::Hz);
        let a = ArrayView1::from(&a[..]);
        let b = ArrayView1::from(&b[..]);
        let (ra, rb) = (self.reshape1(a, 0), self.reshape1(b, 0));
        let mut out = Vec::with_capacity(n_ens * welch.n_freq());
        for (xa, xb) in ra.chunks_exact(nb).zip(rb.chunks_exact(nb)) {
            let (saa, sbb, sab, n) = welch.cross(xa, xb);
            out.extend(f(saa, sbb, sab, n));
        }
        Ok(Array2::from_shape_vec((n_ens, welch.n_freq()), out)?)
    }

    /// Cross spectral density of two series, shaped `[n_ens, n_freq]`.
    ///
    /// Series of different length are binned by the shorter one; the longer is
    /// sampled at the length ratio so both bins span the same time.
    ///
    /// # Errors
    /// See [VelBinner::calc_psd].
    pub fn calc_csd(
        &self,
        a: ArrayView1<'_, f64>,
        b: ArrayView1<'_, f64>,
        n_fft: Option<usize>,
    ) -> Result<Array2<Complex64>> {
        let n_fft = n_fft.unwrap_or_else(|| self.n_fft_coh());
        self.cross_bins(a, b, n_fft, |_, _, sab, _| sab)
    }

    /// Magnitude squared coherence, shaped `[n_ens, n_freq]`.
    ///
    /// With `debias` the Benignus correction `C - (1 - C)^2 / n` for `n`
    /// averaged segments is applied and the result clipped to `[0, 1]`.
    ///
    /// # Errors
    /// See [VelBinner::calc_psd].
    pub fn calc_coh(
        &self,
        a: ArrayView1<'_, f64>,
        b: ArrayView1<'_, f64>,
        n_fft: Option<usize>,
        debias: bool,
    ) -> Result<Array2<f64>> {
        let n_fft = n_fft.unwrap_or_else(|| self.n_fft_coh());
        self.cross_bins(a, b, n_fft, |saa, sbb, sab, n| {
            sab.iter()
                .zip(saa.iter().zip(&sbb))
                .map(|(ab, (aa, bb))| {
                    let c = ab.norm_sqr() / (aa * bb);
                    if debias {
                        (c - (1.0 - c).powi(2) / n as f64).clamp(0.0, 1.0)
                    } else {
                        c
                    }
                })
                .collect()
        })
    }

    /// Phase of the cross spectrum in radians, shaped `[n_ens, n_freq]`.
    ///
    /// # Errors
    /// See [VelBinner::calc_psd].
    pub fn calc_phase_angle(
        &self,
        a: ArrayView1<'_, f64>,
        b: ArrayView1<'_, f64>,
        n_fft: Option<usize>,
    ) -> Result<Array2<f64>> {
        Ok(self.calc_csd(a, b, n_fft)?.mapv(|c| c.arg()))
    }
}
