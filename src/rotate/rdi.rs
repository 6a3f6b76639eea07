//! Four-beam Janus transducer geometry.
use ndarray::{arr2, Array2};

use crate::dataset::InstrumentProfile;

/// Beam to instrument matrix of a four-beam Janus head. Rows produce
/// `[u, v, w, error velocity]`.
#[must_use]
pub fn beam2inst(profile: &InstrumentProfile) -> Array2<f64> {
    let theta = profile.beam_angle.to_radians();
    let c = if profile.convex { 1.0 } else { -1.0 };
    let a = 1.0 / (2.0 * theta.sin());
    let b = 1.0 / (4.0 * theta.cos());
    let d = a / std::f64::consts::SQRT_2;
    arr2(&[
        [c * a, -c * a, 0.0, 0.0],
        [0.0, 0.0, -c * a, c * a],
        [b, b, b, b],
        [d, d, -d, -d],
    ])
}
