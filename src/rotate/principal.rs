use num_complex::Complex64;

use super::base::Mat3;

/// Earth to principal matrix for a principal heading in degrees clockwise
/// from north. The first principal axis points along that heading.
#[must_use]
pub fn earth2principal(heading: f64) -> Mat3 {
    let (s, c) = heading.to_radians().sin_cos();
    [[s, c, 0.0], [-c, s, 0.0], [0.0, 0.0, 1.0]]
}

/// Heading in degrees clockwise from north of the mean horizontal velocity.
///
/// With `tidal_mode` ebb and flood are folded together by averaging the
/// squared complex velocity, so the result is the axis of a reversing flow and
/// is only defined modulo 180. NaN samples are ignored.
#[must_use]
pub fn calc_principal_heading(u: &[f64], v: &[f64], tidal_mode: bool) -> f64 {
    let samples = u
        .iter()
        .zip(v)
        .map(|(u, v)| Complex64::new(*u, *v))
        .filter(|z| z.is_finite());
    let (sum, n) = samples.fold((Complex64::new(0.0, 0.0), 0usize), |(s, n), z| {
        let z = if tidal_mode { z * z } else { z };
        (s + z, n + 1)
    });
    if n == 0 {
        return f64::NAN;
    }
    let mut angle = (sum / n as f64).arg();
    if tidal_mode {
        angle /= 2.0;
    }
    (90.0 - angle.to_degrees()).rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotate::base::apply;

    #[test]
    fn flow_along_heading_is_streamwise() {
        let heading = 30.0_f64;
        let (s, c) = heading.to_radians().sin_cos();
        let mut v = [s, c, 0.5];
        apply(&earth2principal(heading), &mut v);
        assert!((v[0] - 1.0).abs() < 1e-12);
        assert!(v[1].abs() < 1e-12);
        assert_eq!(v[2], 0.5);
    }

    #[test]
    fn heading_of_mean_flow() {
        // due east, with a dropout
        let h = calc_principal_heading(&[1.0, 1.0, f64::NAN], &[0.0, 0.0, 1.0], false);
        assert!((h - 90.0).abs() < 1e-9);
        // northeast
        let h = calc_principal_heading(&[1.0], &[1.0], false);
        assert!((h - 45.0).abs() < 1e-9);
    }

    #[test]
    fn tidal_mode_folds_ebb_onto_flood() {
        let u = [1.0, -1.0, 1.0, -1.0];
        let v = [1.0, -1.0, 1.0, -1.0];
        // the plain mean cancels, the folded mean keeps the axis
        let h = calc_principal_heading(&u, &v, true);
        assert!((h - 45.0).abs() < 1e-9, "{h}");
        assert!(calc_principal_heading(&[], &[], true).is_nan());
    }
}
