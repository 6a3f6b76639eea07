use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use tracing::{debug, warn};

use crate::dataset::{DimKind, Variable};
use crate::error::Result;
use crate::schema::{FieldValue, Target, Values};

/// Time-major destination buffer for one field.
#[derive(Debug)]
struct FieldBuffer {
    kind: DimKind,
    units: &'static str,
    /// Per-sample shape, excluding time.
    dims: Vec<usize>,
    stride: usize,
    data: Vec<f64>,
}

/// Pre-sized destination arrays keyed by field name.
///
/// Buffers are allocated on the first write of a field with room for the
/// estimated number of ensembles and only grow if that estimate is exceeded.
#[derive(Debug)]
pub(crate) struct FieldStore {
    capacity: usize,
    fields: BTreeMap<&'static str, FieldBuffer>,
    reshaped: usize,
}

impl FieldStore {
    pub fn new(capacity: usize) -> Self {
        FieldStore {
            capacity: capacity.max(1),
            fields: BTreeMap::new(),
            reshaped: 0,
        }
    }

    /// Write every data field in `fields` at ensemble `idx`.
    pub fn put_fields(&mut self, idx: usize, fields: &[FieldValue]) {
        for f in fields.iter().filter(|f| f.target == Target::Data) {
            if let Values::Num(v) = &f.values {
                self.put(idx, f.name, f.kind, f.units, &f.dims, v);
            }
        }
    }

    /// Write one sample of `name` at ensemble `idx`.
    ///
    /// The first write fixes the per-sample shape. Later samples with a
    /// different element count are truncated or NaN padded to fit.
    pub fn put(
        &mut self,
        idx: usize,
        name: &'static str,
        kind: DimKind,
        units: &'static str,
        dims: &[usize],
        values: &[f64],
    ) {
        let capacity = self.capacity;
        let buf = self.fields.entry(name).or_insert_with(|| {
            let stride = dims.iter().product::<usize>().max(1);
            FieldBuffer {
                kind,
                units,
                dims: dims.to_vec(),
                stride,
                data: vec![f64::NAN; stride * capacity],
            }
        });
        if values.len() != buf.stride {
            self.reshaped += 1;
            if self.reshaped == 1 {
                warn!(
                    field = name,
                    expected = buf.stride,
                    got = values.len(),
                    "field size changed mid-file; fitting to the first shape"
                );
            }
        }
        let needed = (idx + 1) * buf.stride;
        if buf.data.len() < needed {
            let grown = (buf.data.len() * 2).max(needed);
            debug!(field = name, from = buf.data.len(), to = grown, "growing field buffer");
            buf.data.resize(grown, f64::NAN);
        }
        let start = idx * buf.stride;
        let n = values.len().min(buf.stride);
        buf.data[start..start + n].copy_from_slice(&values[..n]);
    }

    /// Value of scalar field `name` at `idx`, NaN if unset.
    pub fn scalar(&self, name: &str, idx: usize) -> f64 {
        self.fields
            .get(name)
            .and_then(|b| b.data.get(idx * b.stride).copied())
            .unwrap_or(f64::NAN)
    }

    /// Remove `name` and return its first `n` samples, time-major.
    pub fn take(&mut self, name: &str, n: usize) -> Option<Vec<f64>> {
        let mut buf = self.fields.remove(name)?;
        buf.data.resize(n * buf.stride, f64::NAN);
        Some(buf.data)
    }

    /// Trim every field to `n` ensembles and convert to time-last variables.
    ///
    /// # Errors
    /// [crate::Error::Shape] if a buffer cannot be viewed with its declared shape.
    pub fn finish(self, n: usize) -> Result<Vec<(String, Variable)>> {
        let mut out = Vec::with_capacity(self.fields.len());
        for (name, mut buf) in self.fields {
            buf.data.truncate(n * buf.stride);
            if buf.data.len() < n * buf.stride {
                buf.data.resize(n * buf.stride, f64::NAN);
            }
            let var = time_last(buf.data, n, &buf.dims, buf.kind, buf.units)?;
            out.push((name.to_string(), var));
        }
        Ok(out)
    }
}

/// Build a variable from time-major `data` of `n` samples shaped `dims` each,
/// moving time to the last axis.
pub(crate) fn time_last(
    data: Vec<f64>,
    n: usize,
    dims: &[usize],
    kind: DimKind,
    units: &str,
) -> Result<Variable> {
    let mut shape = Vec::with_capacity(dims.len() + 1);
    shape.push(n);
    shape.extend_from_slice(dims);
    let arr = ArrayD::from_shape_vec(IxDyn(&shape), data)?;
    let mut order: Vec<usize> = (1..shape.len()).collect();
    order.push(0);
    let arr = arr.permuted_axes(IxDyn(&order)).as_standard_layout().into_owned();
    Variable::new(arr, kind, units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_past_estimate_and_trims() {
        let mut store = FieldStore::new(2);
        for i in 0..5 {
            store.put(i, "x", DimKind::Time, "m", &[], &[i as f64]);
        }
        let vars = store.finish(4).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].1.data.as_slice().unwrap(), &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn time_moves_last() {
        let mut store = FieldStore::new(3);
        store.put(0, "vel", DimKind::BeamTime, "m/s", &[2], &[1.0, 2.0]);
        store.put(1, "vel", DimKind::BeamTime, "m/s", &[2], &[3.0, 4.0]);
        let (_, vel) = store.finish(2).unwrap().remove(0);
        assert_eq!(vel.data.shape(), &[2, 2]);
        assert_eq!(vel.data[[0, 1]], 3.0);
        assert_eq!(vel.data[[1, 0]], 2.0);
    }

    #[test]
    fn mismatched_samples_are_fitted() {
        let mut store = FieldStore::new(2);
        store.put(0, "a", DimKind::BeamTime, "1", &[3], &[1.0, 2.0, 3.0]);
        store.put(1, "a", DimKind::BeamTime, "1", &[2], &[4.0, 5.0]);
        let (_, a) = store.finish(2).unwrap().remove(0);
        assert_eq!(a.data[[1, 1]], 5.0);
        assert!(a.data[[2, 1]].is_nan());
    }

    #[test]
    fn unset_slots_are_nan() {
        let mut store = FieldStore::new(4);
        store.put(2, "p", DimKind::Time, "dbar", &[], &[9.0]);
        assert!(store.scalar("p", 0).is_nan());
        assert_eq!(store.scalar("p", 2), 9.0);
        assert!(store.scalar("missing", 0).is_nan());
    }
}
