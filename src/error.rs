use std::fmt;

use crate::dataset::CoordSys;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A read requested more bytes than remain in the source.
    #[error("end of file: wanted {wanted} bytes, {available} available")]
    EndOfFile { wanted: usize, available: usize },

    #[error("invalid seek to {0}")]
    InvalidSeek(i64),

    /// No ensemble start could be found within the configured search bound.
    #[error("no valid ensemble start within {searched} bytes of offset {offset}")]
    DecodeSync { searched: usize, offset: u64 },

    #[error("checksum mismatch at offset {offset}: expected {expected:#06x}, computed {computed:#06x}")]
    Checksum {
        offset: u64,
        expected: u16,
        computed: u16,
    },

    #[error("file does not contain any complete ensembles")]
    NoEnsembles,

    #[error("unrecognized file format")]
    UnknownFormat,

    #[error("invalid coordinate frame transition from {current} to {requested}")]
    CoordinateFrame {
        current: CoordSys,
        requested: CoordSys,
    },

    #[error("principal heading is not set")]
    MissingPrincipalHeading,

    #[error("dataset has no variable named {0:?}")]
    MissingVariable(String),

    #[error("array shape error: {0}")]
    Shape(String),

    /// Bin or FFT size cannot be satisfied by the provided data.
    #[error("invalid bin size: {0}")]
    InvalidBinSize(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Shape(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Conditions that are reported but do not interrupt processing.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Warning {
    /// A record id not present in the schema table was skipped.
    UnrecognizedRecord { id: u16, offset: u64, skipped: usize },
    /// The cursor did not end where the ensemble header said the next record starts.
    OffsetCorrected {
        ensemble: usize,
        record: u16,
        delta: i64,
    },
    /// Bytes found between consecutive ensembles, applied to all following ensembles.
    PersistentOffset { ensemble: usize, offset: i64 },
    /// Orientation matrices whose determinant is not within tolerance of 1.
    BadOrientationMatrix { count: usize, first: usize },
    /// The last ensemble in the file was incomplete and dropped.
    PartialEnsemble { ensemble: usize, offset: u64 },
    /// No valid ensemble where one was expected; `skipped` bytes were passed
    /// over to the next one.
    Resynchronized {
        ensemble: usize,
        offset: u64,
        skipped: u64,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::UnrecognizedRecord {
                id,
                offset,
                skipped,
            } => write!(
                f,
                "unrecognized record {id:#06x} at offset {offset}, skipped {skipped} bytes"
            ),
            Warning::OffsetCorrected {
                ensemble,
                record,
                delta,
            } => write!(
                f,
                "ensemble {ensemble}: record {record:#06x} ended {delta} bytes from the declared offset"
            ),
            Warning::PersistentOffset { ensemble, offset } => write!(
                f,
                "ensemble {ensemble}: applying a persistent offset of {offset} bytes"
            ),
            Warning::BadOrientationMatrix { count, first } => write!(
                f,
                "{count} orientation matrices have a determinant far from 1 (first at index {first})"
            ),
            Warning::PartialEnsemble { ensemble, offset } => write!(
                f,
                "ensemble {ensemble} at offset {offset} is incomplete and was dropped"
            ),
            Warning::Resynchronized {
                ensemble,
                offset,
                skipped,
            } => write!(
                f,
                "ensemble {ensemble}: no valid ensemble at offset {offset}, resynchronized {skipped} bytes later"
            ),
        }
    }
}
