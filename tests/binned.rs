mod common;

use std::f64::consts::PI;
use std::io::Cursor;

use common::Vector;
use doppler::binned::{stress_tensor, PsdOptions, VelBinner};
use doppler::dataset::{
    variable, Attrs, CoordSys, Dataset, DimKind, InstType, InstrumentProfile, Make, RotateKind,
};
use doppler::decode::{read, DecodeOptions};
use doppler::rotate::rotate_to;
use ndarray::{Array1, Axis};

const FS: f64 = 16.0;

/// Earth frame velocimeter record with `u = sin(2 pi f t)`,
/// `v = 0.5 cos(2 pi f t)` and `w = 0`.
fn tone_dataset(n: usize, f: f64) -> Dataset {
    let profile = InstrumentProfile::new(Make::Nortek, InstType::Adv, 3);
    let mut ds = Dataset::new(Attrs::new(profile, CoordSys::Earth, FS));
    let t: Vec<f64> = (0..n).map(|i| i as f64 / FS).collect();
    let mut vel = Vec::with_capacity(3 * n);
    vel.extend(t.iter().map(|t| (2.0 * PI * f * t).sin()));
    vel.extend(t.iter().map(|t| 0.5 * (2.0 * PI * f * t).cos()));
    vel.extend(std::iter::repeat(0.0).take(n));
    ds.insert("time", variable(t, &[n], DimKind::Time, "s").unwrap())
        .unwrap();
    ds.insert("vel", variable(vel, &[3, n], DimKind::BeamTime, "m/s").unwrap())
        .unwrap();
    ds.attrs.rotate_vars.insert("vel".into(), RotateKind::Beam);
    ds
}

#[test]
fn turbulence_of_a_tone() {
    let ds = tone_dataset(19200, 0.5);
    let binner = VelBinner::builder().n_bin(1920.0).fs(FS).build();
    let out = binner.calc_turbulence(&ds).unwrap();
    out.validate().unwrap();
    assert_eq!(out.n_time(), Some(10));
    assert_eq!(out.attrs.n_bin, Some(1920.0));

    let tke_vec = &out.get("tke_vec").unwrap().data;
    assert_eq!(tke_vec.shape(), &[3, 10]);
    for e in 0..10 {
        assert!((tke_vec[[0, e]] - 0.5).abs() < 1e-3);
        assert!((tke_vec[[1, e]] - 0.125).abs() < 1e-3);
        assert!(tke_vec[[2, e]].abs() < 1e-12);
    }
    let tke = &out.get("tke").unwrap().data;
    assert!((tke[[4]] - 0.3125).abs() < 1e-3);
    let stress = &out.get("stress").unwrap().data;
    assert!(stress[[0, 4]].abs() < 1e-3);

    // spectral peak at the tone, and the spectrum integrates to the variance
    let freq = out.get("freq").unwrap().data.clone();
    let psd = &out.get("psd").unwrap().data;
    assert_eq!(psd.shape(), &[3, 10, 960]);
    let df = freq[[1]] - freq[[0]];
    let u = psd.index_axis(Axis(0), 0);
    let row = u.index_axis(Axis(0), 3);
    let peak = row
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(k, _)| k)
        .unwrap();
    assert!((freq[[peak]] - 0.5).abs() < 1e-9);
    let total: f64 = row.sum() * df;
    assert!((total - 0.5).abs() < 0.01, "{total}");

    let tensor = stress_tensor(out.get("tke_vec").unwrap(), out.get("stress").unwrap()).unwrap();
    assert_eq!(tensor.data.shape(), &[3, 3, 10]);
    assert_eq!(tensor.data[[0, 0, 2]], tke_vec[[0, 2]]);
    assert_eq!(tensor.data[[1, 0, 2]], tensor.data[[0, 1, 2]]);
}

#[test]
fn noise_is_removed_and_floored() {
    let ds = tone_dataset(3840, 2.0);
    let vel = &ds.get("vel").unwrap().data;
    let u = vel.index_axis(Axis(0), 0);
    let binner = VelBinner::builder()
        .n_bin(1920.0)
        .fs(FS)
        .noise([0.05, 0.05, 0.05])
        .build();
    let clean = binner.calc_psd(u.clone(), &PsdOptions::default()).unwrap();
    let opts = PsdOptions::builder().noise(0.05).build();
    let denoised = binner.calc_psd(u, &opts).unwrap();
    assert!(denoised.iter().all(|s| *s >= 0.0));
    let level = 0.05f64.powi(2) / (FS / 2.0);
    let peak = clean.iter().cloned().fold(f64::MIN, f64::max);
    let peak_denoised = denoised.iter().cloned().fold(f64::MIN, f64::max);
    assert!((peak - peak_denoised - level).abs() < 1e-9);

    let tke = binner.calc_tke(vel.view(), false).unwrap();
    assert!((tke[[0, 0]] - (0.5 - 0.0025)).abs() < 1e-6);
}

#[test]
fn autocovariance_of_a_tone() {
    let ds = tone_dataset(19200, 0.5);
    let u = ds.get("vel").unwrap().data.index_axis(Axis(0), 0).to_owned();
    let binner = VelBinner::builder().n_bin(1920.0).fs(FS).build();
    let acov = binner.calc_acov(u.view()).unwrap();
    let var = binner.var(u.view()).unwrap();
    assert_eq!(acov.shape(), &[10, 480]);
    for e in 0..10 {
        assert!((acov[[e, 0]] - var[[e]]).abs() < 0.01 * var[[e]]);
    }
    // half a period is 16 samples at 0.5 Hz
    assert!((acov[[5, 16]] + var[[5]]).abs() < 0.01);
}

#[test]
fn phase_of_delayed_tone() {
    let n = 2048;
    let phi = PI / 4.0;
    let w = 2.0 * PI * 0.125;
    let a = Array1::from_iter((0..n).map(|i| (w * i as f64).sin()));
    let b = Array1::from_iter((0..n).map(|i| (w * i as f64 - phi).sin()));
    let binner = VelBinner::builder().n_bin(512.0).fs(1.0).build();

    let csd = binner.calc_csd(a.view(), b.view(), Some(64)).unwrap();
    assert_eq!(csd.shape(), &[4, 32]);
    let peak = csd
        .row(1)
        .iter()
        .enumerate()
        .max_by(|x, y| x.1.norm().total_cmp(&y.1.norm()))
        .map(|(k, _)| k)
        .unwrap();
    let phase = binner.calc_phase_angle(a.view(), b.view(), Some(64)).unwrap();
    assert!((phase[[1, peak]].abs() - phi).abs() < 1e-2);

    let coh = binner.calc_coh(a.view(), b.view(), Some(64), false).unwrap();
    assert!((coh[[1, peak]] - 1.0).abs() < 1e-3);
}

#[test]
fn decoded_ramp_has_no_turbulence() {
    let vec = Vector {
        headings: vec![100, 200, 300, 400],
        ..Vector::default()
    };
    let mut ds = read(Cursor::new(vec.file()), &DecodeOptions::default())
        .unwrap()
        .dataset;
    rotate_to(&mut ds, CoordSys::Earth).unwrap();

    let binner = VelBinner::builder().n_bin(8.0).fs(ds.attrs.fs).build();
    let out = binner.calc_turbulence(&ds).unwrap();
    assert_eq!(out.n_time(), Some(4));
    assert_eq!(out.attrs.coord_sys, CoordSys::Earth);
    let tke = &out.get("tke").unwrap().data;
    assert!(tke.iter().all(|v| v.abs() < 1e-10), "{tke:?}");
    let heading = &out.get("heading").unwrap().data;
    assert!((heading[[2]] - 30.0).abs() < 1e-9);
    assert!(out.contains("orientmat"));
}
