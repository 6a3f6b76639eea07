//! Acoustic Doppler current profiler (ADCP) and velocimeter (ADV) data
//! processing.
//!
//! * [decode] reads raw binary files into a [dataset::Dataset]: Teledyne RDI
//!   PD0 ensembles and Nortek 0xA5 framed records (Vector, AWAC, Aquadopp).
//! * [rotate] moves vector variables between beam, instrument, earth and
//!   principal coordinates and rotates stress tensors.
//! * [binned] averages time series into ensembles and computes spectra,
//!   covariances, turbulent kinetic energy, Reynolds stress and dissipation.
//!
//! ```no_run
//! use doppler::binned::VelBinner;
//! use doppler::dataset::CoordSys;
//! use doppler::decode::{read_file, DecodeOptions};
//!
//! let out = read_file("vector.vec", &DecodeOptions::default()).unwrap();
//! let mut ds = out.dataset;
//! doppler::rotate::rotate_to(&mut ds, CoordSys::Earth).unwrap();
//! let binner = VelBinner::builder().n_bin(4096.0).fs(ds.attrs.fs).build();
//! let turb = binner.calc_turbulence(&ds).unwrap();
//! println!("{:?}", turb.get("tke"));
//! ```
//!
//! References:
//! * Teledyne RD Instruments, Workhorse Commands and Output Data Format
//! * Nortek, System Integrator Manual
//! * Lumley, J. L. and Terray, E. A. (1983), Kinematics of turbulence
//!   convected by a random wave field
pub mod binned;
pub mod config;
pub mod cursor;
pub mod dataset;
pub mod decode;
mod error;
pub mod rotate;
pub mod schema;

pub use error::{Error, Result, Warning};
