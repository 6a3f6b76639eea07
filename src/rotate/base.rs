//! Orientation matrix math shared by all instruments.
//!
//! Orientation matrices map earth (east, north, up) vectors into the
//! instrument frame. They are stored as `[3, 3, time]` arrays in the
//! `orientmat` variable.
use ndarray::{s, Array2, Array3, ArrayView2};

use crate::dataset::{DimKind, Variable};
use crate::error::{Error, Result};

pub type Mat3 = [[f64; 3]; 3];

/// Tolerance on `|det - 1|` before an orientation matrix is reported.
pub const DET_TOLERANCE: f64 = 1e-3;

#[must_use]
pub fn matmul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, x) in row.iter_mut().enumerate() {
            *x = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

#[must_use]
pub fn transpose(a: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in a.iter().enumerate() {
        for (j, x) in row.iter().enumerate() {
            out[j][i] = *x;
        }
    }
    out
}

#[must_use]
pub fn det(a: &Mat3) -> f64 {
    a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
        - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
        + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0])
}

/// Apply `m` to the first three components of `v`, leaving any others.
pub fn apply(m: &Mat3, v: &mut [f64]) {
    let x = [v[0], v[1], v[2]];
    for (i, row) in m.iter().enumerate() {
        v[i] = row[0] * x[0] + row[1] * x[1] + row[2] * x[2];
    }
}

/// Rotation about the vertical axis by `deg`, counterclockwise seen from above.
#[must_use]
pub fn rot_z(deg: f64) -> Mat3 {
    let (s, c) = deg.to_radians().sin_cos();
    [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
}

fn rot_y(deg: f64) -> Mat3 {
    let (s, c) = deg.to_radians().sin_cos();
    [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]]
}

fn rot_x(deg: f64) -> Mat3 {
    let (s, c) = deg.to_radians().sin_cos();
    [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]]
}

/// Earth to instrument matrix for a heading (clockwise from north), pitch (x
/// axis up positive) and roll, all in degrees.
///
/// A heading of 90 points the instrument x axis east.
#[must_use]
pub fn orient_from_euler(heading: f64, pitch: f64, roll: f64) -> Mat3 {
    let inst2earth = matmul(&matmul(&rot_z(90.0 - heading), &rot_y(-pitch)), &rot_x(roll));
    transpose(&inst2earth)
}

/// Recover `(heading, pitch, roll)` in degrees from an earth to instrument
/// matrix. Heading is wrapped to `[0, 360)`.
#[must_use]
pub fn euler_from_orientmat(m: &Mat3) -> (f64, f64, f64) {
    let r = transpose(m);
    let pitch = r[2][0].clamp(-1.0, 1.0).asin().to_degrees();
    let roll = r[2][1].atan2(r[2][2]).to_degrees();
    let psi = r[1][0].atan2(r[0][0]).to_degrees();
    ((90.0 - psi).rem_euclid(360.0), pitch, roll)
}

/// Matrix at time index `t` of an `orientmat` variable.
#[must_use]
pub fn orientmat_at(var: &Variable, t: usize) -> Mat3 {
    let mut out = [[f64::NAN; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, x) in row.iter_mut().enumerate() {
            *x = var.data[[i, j, t]];
        }
    }
    out
}

/// Build an `orientmat` variable from per-time matrices.
///
/// # Errors
/// See [Variable::new].
pub fn orientmat_variable(mats: &[Mat3]) -> Result<Variable> {
    let mut arr = Array3::from_elem((3, 3, mats.len()), f64::NAN);
    for (t, m) in mats.iter().enumerate() {
        for i in 0..3 {
            for j in 0..3 {
                arr[[i, j, t]] = m[i][j];
            }
        }
    }
    Variable::new(arr.into_dyn(), DimKind::MatrixTime, "1")
}

/// Count of matrices whose determinant is further than [DET_TOLERANCE] from 1,
/// and the index of the first. NaN matrices are not counted.
#[must_use]
pub fn check_orientmat(var: &Variable) -> Option<(usize, usize)> {
    let n = var.time_len().unwrap_or(0);
    let mut bad = (0..n).filter(|t| (det(&orientmat_at(var, *t)) - 1.0).abs() > DET_TOLERANCE);
    let first = bad.next()?;
    Some((bad.count() + 1, first))
}

/// Gauss-Jordan inverse of a square matrix.
///
/// # Errors
/// [Error::Config] if the matrix is singular.
pub fn invert(m: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
    let n = m.nrows();
    let mut a = Array2::zeros((n, 2 * n));
    a.slice_mut(s![.., ..n]).assign(&m);
    for i in 0..n {
        a[[i, n + i]] = 1.0;
    }
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|x, y| a[[*x, col]].abs().total_cmp(&a[[*y, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-12 {
            return Err(Error::Config("beam transformation matrix is singular".into()));
        }
        if pivot != col {
            for k in 0..2 * n {
                a.swap([pivot, k], [col, k]);
            }
        }
        let p = a[[col, col]];
        a.row_mut(col).mapv_inplace(|x| x / p);
        for row in 0..n {
            if row == col {
                continue;
            }
            let f = a[[row, col]];
            if f != 0.0 {
                let pivot_row = a.row(col).to_owned();
                a.row_mut(row).scaled_add(-f, &pivot_row);
            }
        }
    }
    Ok(a.slice(s![.., n..]).to_owned())
}
