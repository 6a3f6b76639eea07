//! Three-beam head geometry reported in the head configuration record.
use ndarray::{Array2, ArrayView2};

use super::base::Mat3;
use crate::dataset::{InstrumentProfile, Orientation};
use crate::error::{Error, Result};

/// Beam to instrument matrix from the head's transformation matrix.
///
/// Down-facing heads flip the sign of the y and z rows. A separately mounted
/// head's `inst2head` rotation is folded in so the result maps beams directly to
/// the instrument body frame.
///
/// # Errors
/// [Error::Config] if the profile carries no head matrix.
pub fn beam2inst(profile: &InstrumentProfile, inst2head: Option<&Mat3>) -> Result<Array2<f64>> {
    let n = profile.n_beams;
    let head = profile
        .head_matrix
        .as_ref()
        .filter(|m| m.len() == n * n)
        .ok_or_else(|| Error::Config("missing head transformation matrix".into()))?;
    let mut t = ArrayView2::from_shape((n, n), head)
        .map_err(|e| Error::Shape(e.to_string()))?
        .to_owned();
    if profile.orientation == Orientation::Down {
        t.rows_mut().into_iter().skip(1).for_each(|mut r| r.mapv_inplace(|x| -x));
    }
    match inst2head {
        Some(rot) if n == 3 => {
            let rot = Array2::from_shape_fn((3, 3), |(i, j)| rot[j][i]);
            Ok(rot.dot(&t))
        }
        Some(_) => Err(Error::Config(format!(
            "head rotation needs a 3 beam head, have {n} beams"
        ))),
        None => Ok(t),
    }
}
