use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayViewD};

use super::{lanes_map, nanmean, time_len, VelBinner};
use crate::error::{Error, Result};

/// One reshaped ensemble with its padding, demeaned by the mean of the bin
/// proper. Zero fill at the ends of the series stays zero.
struct Padded {
    data: Vec<f64>,
    npd0: usize,
    nb: usize,
}

impl Padded {
    fn new(row: &[f64], npd0: usize, nb: usize, first: bool, last: bool) -> Self {
        let m = nanmean(&row[npd0..npd0 + nb]);
        let data = row
            .iter()
            .enumerate()
            .map(|(j, v)| {
                let edge = (first && j < npd0) || (last && j >= npd0 + nb);
                if edge {
                    0.0
                } else {
                    v - m
                }
            })
            .collect();
        Padded { data, npd0, nb }
    }

    fn bin(&self, i: usize) -> f64 {
        self.data[self.npd0 + i]
    }

    /// `(1 / nb) * sum_i a[i] * self[i + lag]` over the bin of `a`.
    fn lagged(&self, a: &Padded, lag: isize) -> f64 {
        let sum: f64 = (0..self.nb)
            .map(|i| {
                let j = (self.npd0 + i) as isize + lag;
                a.bin(i) * self.data[j as usize]
            })
            .sum();
        sum / self.nb as f64
    }
}

impl VelBinner {
    /// Autocovariance of each ensemble for lags `0..bin_len / 4`, shaped
    /// `[..., n_ens, n_lag]`.
    ///
    /// Lags reach into the neighbouring bins. Interior ensembles average the
    /// forward and backward estimates, the first ensemble uses only the forward
    /// one and the last only the backward one. Lag zero is the variance.
    ///
    /// # Errors
    /// [Error::InvalidBinSize] if the series is shorter than one bin.
    pub fn calc_acov(&self, arr: ArrayViewD<'_, f64>) -> Result<ArrayD<f64>> {
        let nb = self.bin_len();
        let n_lag = nb / 4;
        let n_pad = 2 * n_lag;
        let n_ens = self.check(time_len(&arr)?, n_pad)?;
        if n_lag == 0 {
            return Err(Error::InvalidBinSize(format!(
                "bin of {nb} samples is too short for an autocovariance"
            )));
        }
        lanes_map(arr, &[n_ens, n_lag], |x| {
            let rows = self.reshape1(x, n_pad);
            let mut out = Vec::with_capacity(n_ens * n_lag);
            for (e, row) in rows.chunks_exact(nb + n_pad).enumerate() {
                let p = Padded::new(row, n_lag, nb, e == 0, e + 1 == n_ens);
                for k in 0..n_lag as isize {
                    let right = p.lagged(&p, k);
                    let left = p.lagged(&p, -k);
                    out.push(if e == 0 {
                        right
                    } else if e + 1 == n_ens {
                        left
                    } else {
                        0.5 * (right + left)
                    });
                }
            }
            out
        })
    }

    /// Cross covariance `a(t) b(t + lag)` of each ensemble for lags
    /// `-npt..=npt`, shaped `[n_ens, 2 * npt + 1]`.
    ///
    /// # Errors
    /// [Error::InvalidBinSize] if the series is shorter than one bin or `npt`
    /// exceeds the bin length.
    pub fn calc_xcov(
        &self,
        a: ArrayView1<'_, f64>,
        b: ArrayView1<'_, f64>,
        npt: usize,
    ) -> Result<Array2<f64>> {
        let len = a.len().min(b.len());
        let n_pad = 2 * npt;
        let n_ens = self.check(len, n_pad)?;
        let nb = self.bin_len();
        let a = Array1::from_iter(a.iter().take(len).copied());
        let b = Array1::from_iter(b.iter().take(len).copied());
        let ra = self.reshape1(a.view(), 0);
        let rb = self.reshape1(b.view(), n_pad);
        let mut out = Array2::zeros((n_ens, 2 * npt + 1));
        let rows = ra.chunks_exact(nb).zip(rb.chunks_exact(nb + n_pad));
        for (e, (xa, xb)) in rows.enumerate() {
            let pa = Padded::new(xa, 0, nb, true, true);
            let pb = Padded::new(xb, npt, nb, e == 0, e + 1 == n_ens);
            for (k, lag) in (-(npt as isize)..=npt as isize).enumerate() {
                out[[e, k]] = pb.lagged(&pa, lag);
            }
        }
        Ok(out)
    }
}
