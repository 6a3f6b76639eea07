use ndarray::Array3;

use super::{base, transform, Step};
use crate::dataset::{Dataset, DimKind, Variable};
use crate::error::{Error, Result};

/// Re-express a symmetric 3x3 tensor time series (`[3, 3, time]`, e.g. a
/// Reynolds stress tensor) in the frame `step` leads to, as `R T R^T` with the
/// step's matrix at each time.
///
/// The dataset supplies the rotation matrices and is not modified; its frame
/// is not checked against the tensor.
///
/// # Errors
/// [Error::Shape] if `tensor` is not a matrix time series the length of the
/// dataset, plus any error getting the step's matrices.
pub fn rotate_tensor(ds: &Dataset, tensor: &Variable, step: Step) -> Result<Variable> {
    if tensor.dims != DimKind::MatrixTime || tensor.data.shape()[..2] != [3, 3] {
        return Err(Error::Shape(format!(
            "tensor must be 3x3 by time, got {:?} {:?}",
            tensor.dims,
            tensor.data.shape()
        )));
    }
    let n = tensor.time_len().unwrap_or(0);
    if let Some(n_ds) = ds.n_time() {
        if n != n_ds {
            return Err(Error::Shape(format!(
                "tensor has {n} time steps, dataset has {n_ds}"
            )));
        }
    }
    let (t, _) = transform(ds, step)?;
    let mut out = Array3::from_elem((3, 3, n), f64::NAN);
    for k in 0..n {
        let r = t.mat3(k)?;
        let m: base::Mat3 =
            std::array::from_fn(|i| std::array::from_fn(|j| tensor.data[[i, j, k]]));
        let rot = base::matmul(&base::matmul(&r, &m), &base::transpose(&r));
        for (i, row) in rot.iter().enumerate() {
            for (j, x) in row.iter().enumerate() {
                out[[i, j, k]] = *x;
            }
        }
    }
    Variable::new(out.into_dyn(), DimKind::MatrixTime, &tensor.units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Attrs, CoordSys, InstType, InstrumentProfile, Make, PrincipalHeading};
    use crate::rotate::base::orientmat_variable;

    #[test]
    fn stress_tensor_follows_principal_rotation() {
        let mut ds = Dataset::new(Attrs::new(
            InstrumentProfile::new(Make::Nortek, InstType::Adv, 3),
            CoordSys::Earth,
            1.0,
        ));
        ds.insert(
            "orientmat",
            orientmat_variable(&[base::orient_from_euler(0.0, 0.0, 0.0)]).unwrap(),
        )
        .unwrap();
        ds.attrs.principal_heading = Some(PrincipalHeading::Constant(90.0));
        // all variance along east
        let mut t = Array3::zeros((3, 3, 1));
        t[[0, 0, 0]] = 2.0;
        let var = Variable::new(t.into_dyn(), DimKind::MatrixTime, "m^2/s^2").unwrap();

        let rot = rotate_tensor(&ds, &var, Step::EarthToPrincipal).unwrap();
        assert!((rot.data[[0, 0, 0]] - 2.0).abs() < 1e-12);
        assert!(rot.data[[1, 1, 0]].abs() < 1e-12);

        // trace is invariant under rotation
        let inst = rotate_tensor(&ds, &var, Step::EarthToInst).unwrap();
        let trace: f64 = (0..3).map(|i| inst.data[[i, i, 0]]).sum();
        assert!((trace - 2.0).abs() < 1e-12);
        assert!((inst.data[[1, 1, 0]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn tensor_length_must_match_dataset() {
        let mut ds = Dataset::new(Attrs::new(
            InstrumentProfile::new(Make::Nortek, InstType::Adv, 3),
            CoordSys::Inst,
            1.0,
        ));
        let mats: Vec<_> = [0.0, 90.0, 180.0, 270.0]
            .iter()
            .map(|h| base::orient_from_euler(*h, 0.0, 0.0))
            .collect();
        ds.insert("orientmat", orientmat_variable(&mats).unwrap())
            .unwrap();
        let short = Variable::new(
            Array3::<f64>::zeros((3, 3, 2)).into_dyn(),
            DimKind::MatrixTime,
            "m^2/s^2",
        )
        .unwrap();
        assert!(matches!(
            rotate_tensor(&ds, &short, Step::InstToEarth),
            Err(Error::Shape(_))
        ));

        let full = Variable::new(
            Array3::<f64>::zeros((3, 3, 4)).into_dyn(),
            DimKind::MatrixTime,
            "m^2/s^2",
        )
        .unwrap();
        let out = rotate_tensor(&ds, &full, Step::InstToEarth).unwrap();
        assert_eq!(out.data.shape(), &[3, 3, 4]);
    }
}
