//! Ensemble decoders for the two supported vendor families.
//!
//! Both decoders share the same outline: read the configuration header, size
//! destination arrays from the file length, then loop over ensembles
//! resynchronizing on the sync pattern, dispatching each record to its schema
//! and reconciling positions against the declared layout.
//!
//! ```no_run
//! use doppler::decode::{read_file, DecodeOptions};
//!
//! let opts = DecodeOptions::builder().ensemble_range(0..1000).build();
//! let out = read_file("deployment.000", &opts).unwrap();
//! for warning in &out.warnings {
//!     println!("{warning}");
//! }
//! println!("decoded {:?} ensembles", out.dataset.n_time());
//! ```
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::ops::Range;
use std::path::Path;

use chrono::NaiveDate;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use crate::config::Userdata;
use crate::cursor::{Cursor, Endian, Whence};
use crate::dataset::Dataset;
use crate::error::{Error, Result, Warning};

pub mod nortek;
pub mod rdi;
mod store;
mod sync;

/// Default bound on the number of bytes scanned looking for a sync pattern.
pub const DEFAULT_MAX_SYNC_SEARCH: usize = 64 * 1024;

/// Options shared by all decoders.
#[derive(Debug, Clone, TypedBuilder)]
pub struct DecodeOptions {
    /// Restrict output to these 0-based ensemble indices.
    #[builder(default, setter(strip_option))]
    pub ensemble_range: Option<Range<usize>>,
    /// Fail on checksum mismatch. When false checksums are not checked.
    #[builder(default = true)]
    pub validate_checksum: bool,
    /// Maximum number of bytes to scan for the next sync pattern.
    #[builder(default = DEFAULT_MAX_SYNC_SEARCH)]
    pub max_sync_search: usize,
    #[builder(default)]
    pub endian: Endian,
    /// Deployment metadata applied once decoding completes.
    #[builder(default, setter(strip_option))]
    pub userdata: Option<Userdata>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions::builder().build()
    }
}

impl DecodeOptions {
    pub(crate) fn wants(&self, idx: usize) -> bool {
        self.ensemble_range
            .as_ref()
            .map_or(true, |r| r.contains(&idx))
    }

    pub(crate) fn past_end(&self, idx: usize) -> bool {
        self.ensemble_range.as_ref().is_some_and(|r| idx >= r.end)
    }

    pub(crate) fn first(&self) -> usize {
        self.ensemble_range.as_ref().map_or(0, |r| r.start)
    }
}

/// Decoded dataset and the non-fatal conditions encountered producing it.
#[derive(Debug, Clone)]
pub struct DecodeOutput {
    pub dataset: Dataset,
    pub warnings: Vec<Warning>,
}

/// Supported file families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    /// PD0 ensembles starting with `0x7F 0x7F`.
    Rdi,
    /// `0xA5` framed records starting with a configuration record.
    Nortek,
}

/// Identify the vendor family from the first bytes of a file.
///
/// # Errors
/// [Error::UnknownFormat] if neither signature matches.
pub fn detect<R: Read + Seek>(cur: &mut Cursor<R>) -> Result<Vendor> {
    let here = cur.tell();
    cur.seek(0, Whence::Start)?;
    let head = cur.peek(2);
    cur.seek(here as i64, Whence::Start)?;
    match head.map_err(|_| Error::UnknownFormat)?.as_slice() {
        [0x7f, 0x7f] => Ok(Vendor::Rdi),
        [crate::schema::nortek::SYNC, id]
            if crate::schema::nortek::Record::from_id(*id).is_some_and(|r| r.is_config()) =>
        {
            Ok(Vendor::Nortek)
        }
        _ => Err(Error::UnknownFormat),
    }
}

/// Decode a file of either family, applying any userdata in `opts`.
///
/// # Errors
/// [Error::UnknownFormat] if the file is not recognized, otherwise any error from
/// the selected decoder.
pub fn read_file<P: AsRef<Path>>(path: P, opts: &DecodeOptions) -> Result<DecodeOutput> {
    let path = path.as_ref();
    debug!(?path, "opening");
    read(BufReader::new(File::open(path)?), opts)
}

/// Decode from any seekable reader, detecting the family.
///
/// # Errors
/// See [read_file].
pub fn read<R: Read + Seek>(reader: R, opts: &DecodeOptions) -> Result<DecodeOutput> {
    let mut cur = Cursor::new(reader, opts.endian)?;
    let mut out = match detect(&mut cur)? {
        Vendor::Rdi => rdi::decode_cursor(&mut cur, opts)?,
        Vendor::Nortek => nortek::decode_cursor(&mut cur, opts)?,
    };
    if let Some(ud) = &opts.userdata {
        let warnings = crate::rotate::apply_userdata(&mut out.dataset, ud)?;
        out.warnings.extend(warnings);
    }
    Ok(out)
}

/// Record a warning and log it.
pub(crate) fn report(warnings: &mut Vec<Warning>, warning: Warning) {
    warn!("{warning}");
    warnings.push(warning);
}

/// Seconds since the Unix epoch, NaN for an invalid date.
pub(crate) fn epoch_seconds(
    year: f64,
    month: f64,
    day: f64,
    hour: f64,
    minute: f64,
    second: f64,
) -> f64 {
    if [year, month, day, hour, minute, second].iter().any(|v| !v.is_finite()) {
        return f64::NAN;
    }
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, 0))
        .map_or(f64::NAN, |dt| dt.and_utc().timestamp() as f64 + second)
}

/// Expand a two digit year.
pub(crate) fn full_year(yy: f64) -> f64 {
    if yy < 80.0 {
        2000.0 + yy
    } else {
        1900.0 + yy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn epoch_seconds_matches_chrono() {
        let t = epoch_seconds(2020.0, 1.0, 2.0, 3.0, 4.0, 5.25);
        assert_eq!(t, 1_577_934_245.25);
        assert!(epoch_seconds(2020.0, 13.0, 1.0, 0.0, 0.0, 0.0).is_nan());
        assert!(epoch_seconds(f64::NAN, 1.0, 1.0, 0.0, 0.0, 0.0).is_nan());
    }

    #[test]
    fn detect_signatures() {
        let mut c = Cursor::new(io::Cursor::new(vec![0x7f, 0x7f, 0, 0]), Endian::Little).unwrap();
        assert_eq!(detect(&mut c).unwrap(), Vendor::Rdi);

        let mut c = Cursor::new(io::Cursor::new(vec![0xa5, 0x05, 0x18, 0]), Endian::Little).unwrap();
        assert_eq!(detect(&mut c).unwrap(), Vendor::Nortek);

        let mut c = Cursor::new(io::Cursor::new(vec![0xa5, 0x10, 0, 0]), Endian::Little).unwrap();
        assert!(matches!(detect(&mut c), Err(Error::UnknownFormat)));

        let mut c = Cursor::new(io::Cursor::new(vec![0x7f]), Endian::Little).unwrap();
        assert!(matches!(detect(&mut c), Err(Error::UnknownFormat)));
    }

    #[test]
    fn options_range() {
        let opts = DecodeOptions::builder().ensemble_range(2..4).build();
        assert!(!opts.wants(1));
        assert!(opts.wants(3));
        assert!(opts.past_end(4));
        assert_eq!(opts.first(), 2);
        assert!(DecodeOptions::default().validate_checksum);
    }
}
