//! Decoder for 0xA5 framed records (Vector velocimeters, AWAC and Aquadopp
//! profilers).
//!
//! A file opens with the hardware, head and user configuration records.
//! After that, velocity records mark samples; system records arrive at a lower
//! rate and their sensor values are held onto the following samples.
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, debug_span, trace};

use super::store::FieldStore;
use super::sync::{Scan, Synchronizer};
use super::{epoch_seconds, report, DecodeOptions, DecodeOutput};
use crate::config::{Configuration, Firmware};
use crate::cursor::{Cursor, Whence};
use crate::dataset::{
    variable, Attrs, CoordSys, Dataset, DimKind, InstType, InstrumentProfile, Make, Orientation,
    RotateKind, Variable,
};
use crate::error::{Error, Result, Warning};
use crate::schema::nortek::{
    schema, Ahrs, Record, CHECKSUM_SEED, HEADER_LEN, IMU_ID, SYNC, VECTOR_VELOCITY_LEN,
};
use crate::schema::{config_map, find, unpack, FieldValue, Geometry, Values};

/// Sensor fields of the Vector system record held onto velocity samples.
const HELD: &[&str] = &[
    "batt",
    "c_sound",
    "heading",
    "pitch",
    "roll",
    "temp",
    "error",
    "status",
    "orientation_down",
];

/// Kind of sample stream, fixed by the first data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Vector,
    Awac,
    Aquadopp,
}

impl Stream {
    fn model(self) -> &'static str {
        match self {
            Stream::Vector => "Vector",
            Stream::Awac => "AWAC",
            Stream::Aquadopp => "Aquadopp",
        }
    }
}

/// Length in bytes of a record starting at `start`, if its id and size are
/// plausible.
fn record_len<R: Read + Seek>(cur: &mut Cursor<R>, start: u64) -> Result<Option<usize>> {
    cur.seek(start as i64, Whence::Start)?;
    let head = cur.read_u8(2)?;
    if head[0] != SYNC {
        return Ok(None);
    }
    if head[1] == Record::VectorVelocity.id() {
        return Ok(Some(VECTOR_VELOCITY_LEN));
    }
    let words = usize::from(cur.u16()?);
    if words < 3 {
        return Ok(None);
    }
    Ok(Some(words * 2))
}

/// Wrapping word sum of a record plus the seed, and the stored checksum.
fn checksum<R: Read + Seek>(cur: &mut Cursor<R>, start: u64, len: usize) -> Result<(u16, u16)> {
    let here = cur.tell();
    cur.seek(start as i64, Whence::Start)?;
    let words = cur.read_u16(len / 2 - 1)?;
    let expected = cur.u16()?;
    cur.seek(here as i64, Whence::Start)?;
    let computed = words
        .iter()
        .fold(CHECKSUM_SEED, |acc, w| acc.wrapping_add(*w));
    Ok((expected, computed))
}

/// Accept check for a sync byte candidate: the record must fit, and either
/// its checksum matches or another record starts right after it.
fn plausible<R: Read + Seek>(cur: &mut Cursor<R>, start: u64) -> Result<bool> {
    let Some(len) = record_len(cur, start)? else {
        return Ok(false);
    };
    let end = start + len as u64;
    if end > cur.len() {
        return Ok(false);
    }
    let (expected, computed) = checksum(cur, start, len)?;
    if expected == computed || end == cur.len() {
        return Ok(true);
    }
    cur.seek(end as i64, Whence::Start)?;
    Ok(cur.u8()? == SYNC)
}

/// Decode the file at `path`.
///
/// # Errors
/// See [decode].
pub fn decode_file<P: AsRef<Path>>(path: P, opts: &DecodeOptions) -> Result<DecodeOutput> {
    let mut cur = Cursor::open(path, opts.endian)?;
    decode_cursor(&mut cur, opts)
}

/// Decode a stream of 0xA5 framed records.
///
/// # Errors
/// [Error::DecodeSync] if no record start is found within the search bound,
/// [Error::Checksum] on a checksum mismatch when validating,
/// [Error::Config] if the file lacks a user configuration record.
pub fn decode<R: Read + Seek>(reader: R, opts: &DecodeOptions) -> Result<DecodeOutput> {
    let mut cur = Cursor::new(reader, opts.endian)?;
    decode_cursor(&mut cur, opts)
}

pub(crate) fn decode_cursor<R: Read + Seek>(
    cur: &mut Cursor<R>,
    opts: &DecodeOptions,
) -> Result<DecodeOutput> {
    let span = debug_span!("nortek_decode", len = cur.len());
    let _guard = span.enter();
    Decoder::new(cur, opts).run()
}

/// The latest system record, held onto samples until the next one.
struct Held {
    /// Ping index of the first sample after the record.
    ping: usize,
    /// Record clock, seconds since the epoch.
    time: f64,
    fields: Vec<FieldValue>,
}

impl Held {
    /// Write the held values and the extrapolated time of `ping` at `slot`.
    fn fill(&self, store: &mut FieldStore, slot: usize, ping: usize, fs: f64) {
        let t = self.time + (ping as f64 - self.ping as f64) / fs;
        store.put(slot, "time", DimKind::Time, "s", &[], &[t]);
        for name in HELD {
            if let Some(f) = find(&self.fields, name) {
                let v = f.scalar().unwrap_or(f64::NAN);
                store.put(slot, *name, DimKind::Time, f.units, &[], &[v]);
            }
        }
    }
}

struct Decoder<'a, R: Read + Seek> {
    cur: &'a mut Cursor<R>,
    opts: &'a DecodeOptions,
    sync: Synchronizer,
    cfg: Arc<Configuration>,
    geom: Geometry,
    store: FieldStore,
    warnings: Vec<Warning>,
    stream: Option<Stream>,
    held: Option<Held>,
    has_orientmat: bool,
    /// Ping index stored in slot 0.
    first_ping: Option<usize>,
    /// Ping index of the next sample.
    index: usize,
    n_stored: usize,
}

impl<'a, R: Read + Seek> Decoder<'a, R> {
    fn new(cur: &'a mut Cursor<R>, opts: &'a DecodeOptions) -> Self {
        Decoder {
            cur,
            opts,
            sync: Synchronizer::new(&[SYNC], opts.max_sync_search),
            cfg: Arc::new(Configuration::new()),
            geom: Geometry::default(),
            store: FieldStore::new(1),
            warnings: Vec::new(),
            stream: None,
            held: None,
            has_orientmat: false,
            first_ping: None,
            index: 0,
            n_stored: 0,
        }
    }

    fn run(mut self) -> Result<DecodeOutput> {
        // header phase: the configuration block
        let mut pos = match self.sync.scan(self.cur, plausible)? {
            Scan::Found(p) => p,
            Scan::Eof { searched } => {
                return Err(Error::DecodeSync {
                    searched: searched as usize,
                    offset: 0,
                })
            }
        };
        while pos + 2 <= self.cur.len() {
            self.cur.seek(pos as i64 + 1, Whence::Start)?;
            let id = self.cur.u8()?;
            match Record::from_id(id) {
                Some(rec) if rec.is_config() => pos = self.read_record(pos)?,
                _ => break,
            }
        }
        if self.cfg.get("avg_interval").is_none() {
            return Err(Error::Config("missing user configuration record".into()));
        }

        // sizing phase
        let per_sample = match self.geom.n_cells {
            0 => VECTOR_VELOCITY_LEN,
            nc => 32 + 3 * nc * self.geom.n_beams,
        } as u64;
        let mut estimate = (self.cur.len() - pos) / per_sample + 1;
        if let Some(r) = &self.opts.ensemble_range {
            estimate = estimate.min(r.len() as u64);
        }
        debug!(estimate, "sizing destination arrays");
        self.store = FieldStore::new(estimate as usize);

        while !self.opts.past_end(self.index) {
            self.cur.seek(pos as i64, Whence::Start)?;
            let start = match self.sync.scan(self.cur, plausible)? {
                Scan::Found(p) => p,
                Scan::Eof { .. } => {
                    if pos + 1 < self.cur.len() {
                        report(
                            &mut self.warnings,
                            Warning::PartialEnsemble {
                                ensemble: self.index,
                                offset: pos,
                            },
                        );
                    }
                    break;
                }
            };
            if start != pos {
                report(
                    &mut self.warnings,
                    Warning::Resynchronized {
                        ensemble: self.index,
                        offset: pos,
                        skipped: start - pos,
                    },
                );
            }
            match self.read_record(start) {
                Ok(next) => pos = next,
                Err(Error::EndOfFile { .. }) => {
                    report(
                        &mut self.warnings,
                        Warning::PartialEnsemble {
                            ensemble: self.index,
                            offset: start,
                        },
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        debug!(
            samples = self.n_stored,
            false_syncs = self.sync.false_hits,
            skipped = self.sync.skipped,
            "decode complete"
        );
        if self.n_stored == 0 {
            return Err(Error::NoEnsembles);
        }
        self.finish()
    }

    /// Read the record at `start`, returning the offset just past it.
    fn read_record(&mut self, start: u64) -> Result<u64> {
        let len = record_len(self.cur, start)?.unwrap_or(HEADER_LEN);
        let end = start + len as u64;
        if self.opts.validate_checksum {
            let (expected, computed) = checksum(self.cur, start, len)?;
            if expected != computed {
                return Err(Error::Checksum {
                    offset: start,
                    expected,
                    computed,
                });
            }
        }
        self.cur.seek(start as i64 + 1, Whence::Start)?;
        let id = self.cur.u8()?;
        let record = if id == IMU_ID {
            self.cur.seek(start as i64 + HEADER_LEN as i64 + 1, Whence::Start)?;
            let ahrs = self.cur.u8()?;
            match Ahrs::from_id(ahrs) {
                Some(a) => Some(Record::Imu(a)),
                None => {
                    self.unrecognized(u16::from(id) << 8 | u16::from(ahrs), start, len);
                    return Ok(end);
                }
            }
        } else {
            Record::from_id(id)
        };
        let Some(record) = record else {
            self.unrecognized(u16::from(id), start, len);
            return Ok(end);
        };
        let fields_at = match record {
            Record::VectorVelocity => 2,
            Record::Imu(_) => HEADER_LEN as i64 + 2,
            _ => HEADER_LEN as i64,
        };
        self.cur.seek(start as i64 + fields_at, Whence::Start)?;
        let specs = schema(record, &self.cfg);
        let fields = unpack(self.cur, &specs, self.geom)?;
        trace!(id, offset = start, "record");

        match record {
            Record::UserConfig
            | Record::HeadConfig
            | Record::HardwareConfig
            | Record::VectorHeader => self.amend(&fields, record),
            Record::VectorSystem => self.hold(fields),
            Record::VectorVelocity => self.sample(Stream::Vector, &fields),
            Record::AwacProfile => self.sample(Stream::Awac, &fields),
            Record::AquadoppProfile => self.sample(Stream::Aquadopp, &fields),
            Record::Imu(ahrs) => {
                if self.index > 0 && self.opts.wants(self.index - 1) {
                    self.store.put_fields(self.n_stored - 1, &fields);
                    self.has_orientmat |= matches!(ahrs, Ahrs::C3 | Ahrs::Cc);
                }
            }
        }
        Ok(end)
    }

    fn unrecognized(&mut self, id: u16, offset: u64, skipped: usize) {
        report(
            &mut self.warnings,
            Warning::UnrecognizedRecord {
                id,
                offset,
                skipped,
            },
        );
    }

    fn sample(&mut self, stream: Stream, fields: &[FieldValue]) {
        if self.stream.is_none() {
            debug!(model = stream.model(), "sample stream");
            self.stream = Some(stream);
        }
        if self.opts.wants(self.index) {
            let first = *self.first_ping.get_or_insert(self.index);
            let fs = self.vector_fs();
            self.store.put_fields(self.n_stored, fields);
            if let Some(held) = &self.held {
                held.fill(&mut self.store, self.n_stored, first + self.n_stored, fs);
            }
            self.n_stored += 1;
        }
        self.index += 1;
    }

    /// Replace the held system record. Samples stored before the first one
    /// take its values, counting time backwards from its clock.
    fn hold(&mut self, fields: Vec<FieldValue>) {
        let held = Held {
            ping: self.index,
            time: clock(&fields),
            fields,
        };
        if self.held.is_none() {
            let fs = self.vector_fs();
            let first = self.first_ping.unwrap_or(self.index);
            for slot in 0..self.n_stored {
                held.fill(&mut self.store, slot, first + slot, fs);
            }
        }
        self.held = Some(held);
    }

    fn vector_fs(&self) -> f64 {
        512.0 / self.cfg.f64("avg_interval").unwrap_or(f64::NAN)
    }

    fn amend(&mut self, fields: &[FieldValue], record: Record) {
        let mut map = config_map(fields);
        if let Some(Values::Text(fw)) = find(fields, "fw_version").map(|f| &f.values) {
            if let Some(fw) = Firmware::parse(fw) {
                map.insert("firmware".into(), Value::String(fw.to_string()));
            }
        }
        let next = self.cfg.amended(&map);
        if !Arc::ptr_eq(&next, &self.cfg) {
            if self.n_stored > 0 {
                debug!(record = record.id(), "configuration amended mid-stream");
            }
            self.geom = Geometry::from_config(&next);
            self.cfg = next;
        }
    }

    fn finish(mut self) -> Result<DecodeOutput> {
        let n = self.n_stored;
        let cfg = Arc::clone(&self.cfg);
        let stream = self.stream.unwrap_or(Stream::Vector);
        let fs = match stream {
            Stream::Vector => self.vector_fs(),
            _ => 1.0 / cfg.f64("meas_interval").unwrap_or(f64::NAN),
        };

        let mut attrs = attrs(&cfg, stream, fs);
        attrs.profile.has_orientmat_sensor = self.has_orientmat;
        let mut ds = Dataset::new(attrs);

        let time = match stream {
            Stream::Vector => self
                .store
                .take("time", n)
                .unwrap_or_else(|| vec![f64::NAN; n]),
            _ => self.clock_time(n),
        };
        ds.insert("time", variable(time, &[n], DimKind::Time, "s")?)?;

        if let (Some(msb), Some(lsw)) = (
            self.store.take("pressure_msb", n),
            self.store.take("pressure_lsw", n),
        ) {
            let p = msb.iter().zip(&lsw).map(|(a, b)| a + b).collect();
            ds.insert("pressure", variable(p, &[n], DimKind::Time, "dbar")?)?;
        }
        if let (Some(lsb), Some(msb)) = (
            self.store.take("ana_in2_lsb", n),
            self.store.take("ana_in2_msb", n),
        ) {
            let a = lsb.iter().zip(&msb).map(|(a, b)| a + b).collect();
            ds.insert("ana_in2", variable(a, &[n], DimKind::Time, "1")?)?;
        }

        if stream != Stream::Vector {
            let (blank, cs) = cell_geometry(&cfg);
            let range = (0..self.geom.n_cells)
                .map(|i| blank + cs * (i + 1) as f64)
                .collect();
            ds.insert(
                "range",
                variable(range, &[self.geom.n_cells], DimKind::Cell, "m")?,
            )?;
        }

        let orientmat = self.store.take("orientmat", n);
        for (name, var) in self.store.finish(n)? {
            if name.starts_with("clk_") {
                continue;
            }
            ds.insert(&name, var)?;
        }
        let down = ds
            .remove("orientation_down")
            .and_then(|v| v.data.iter().copied().find(|x| x.is_finite()))
            .is_some_and(|v| v != 0.0);
        if down {
            ds.attrs.profile.orientation = Orientation::Down;
        }
        if let Some(raw) = orientmat.filter(|_| self.has_orientmat) {
            ds.insert("orientmat", ned_to_enu(&raw, n)?)?;
        }

        ds.attrs.rotate_vars.insert("vel".into(), RotateKind::Beam);
        for name in ["accel", "angrt", "mag"] {
            if ds.contains(name) {
                ds.attrs.rotate_vars.insert(name.into(), RotateKind::Inst);
            }
        }

        crate::rotate::ensure_orientmat(&mut ds)?;
        ds.validate()?;
        Ok(DecodeOutput {
            dataset: ds,
            warnings: self.warnings,
        })
    }

    fn clock_time(&mut self, n: usize) -> Vec<f64> {
        let mut take = |name: &str| {
            self.store
                .take(name, n)
                .unwrap_or_else(|| vec![f64::NAN; n])
        };
        let (year, month, day) = (take("clk_year"), take("clk_month"), take("clk_day"));
        let (hour, minute, second) = (take("clk_hour"), take("clk_minute"), take("clk_second"));
        (0..n)
            .map(|i| {
                epoch_seconds(
                    2000.0 + year[i],
                    month[i],
                    day[i],
                    hour[i],
                    minute[i],
                    second[i],
                )
            })
            .collect()
    }
}

/// Seconds since the epoch of a record's BCD clock.
fn clock(fields: &[FieldValue]) -> f64 {
    let get = |name: &str| find(fields, name).and_then(FieldValue::scalar).unwrap_or(f64::NAN);
    epoch_seconds(
        2000.0 + get("clk_year"),
        get("clk_month"),
        get("clk_day"),
        get("clk_hour"),
        get("clk_minute"),
        get("clk_second"),
    )
}

/// Blanking distance and cell size of a profiler, from the user configuration
/// timing registers.
fn cell_geometry(cfg: &Configuration) -> (f64, f64) {
    let cos25 = 25f64.to_radians().cos();
    let cs = cfg.f64("bin_length").unwrap_or(0.0) / 256.0 * 0.00675 * cos25;
    let blank = cfg.f64("t2").unwrap_or(0.0) * 0.0229 * cos25 - cs;
    (blank, cs)
}

/// Convert time-major AHRS matrices (earth NED to sensor) into earth ENU to
/// instrument matrices, time last.
fn ned_to_enu(raw: &[f64], n: usize) -> Result<Variable> {
    // swapping the first two columns and negating the third maps ENU to NED
    let mut out = Vec::with_capacity(raw.len());
    for m in raw.chunks_exact(9).take(n) {
        for r in 0..3 {
            out.push(m[r * 3 + 1]);
            out.push(m[r * 3]);
            out.push(-m[r * 3 + 2]);
        }
    }
    super::store::time_last(out, n, &[3, 3], DimKind::MatrixTime, "1")
}

fn attrs(cfg: &Arc<Configuration>, stream: Stream, fs: f64) -> Attrs {
    let n_beams = cfg.usize("n_beams").unwrap_or(3);
    let inst_type = match stream {
        Stream::Vector => InstType::Adv,
        _ => InstType::Adcp,
    };
    let mut profile = InstrumentProfile::new(Make::Nortek, inst_type, n_beams);
    profile.model = stream.model().to_string();
    profile.beam_angle = 25.0;
    profile.head_matrix = cfg.numbers("trans_matrix").filter(|m| m.len() == 9);
    let coord_sys = match cfg.f64("coord_sys_code").map(|c| c as u8) {
        Some(0) => CoordSys::Earth,
        Some(2) => CoordSys::Beam,
        _ => CoordSys::Inst,
    };
    let mut attrs = Attrs::new(profile, coord_sys, fs);
    let mut extra = Map::new();
    extra.insert("inst_make".into(), json!(Make::Nortek.to_string()));
    extra.insert("inst_model".into(), json!(stream.model()));
    attrs.config = cfg.amended(&extra);
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Endian;
    use std::io;

    #[test]
    fn checksum_is_seeded_word_sum() {
        let mut rec = vec![0xa5, 0x11, 0x03, 0x00];
        let sum = [0x11a5u16, 0x0003]
            .iter()
            .fold(CHECKSUM_SEED, |a, w| a.wrapping_add(*w));
        rec.extend_from_slice(&sum.to_le_bytes());
        let mut c = Cursor::new(io::Cursor::new(rec), Endian::Little).unwrap();
        let (expected, computed) = checksum(&mut c, 0, 6).unwrap();
        assert_eq!(expected, computed);
        assert!(plausible(&mut c, 0).unwrap());
    }

    #[test]
    fn ned_matrix_conversion() {
        // sensor aligned with NED: x north, y east, z down
        let ident = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let var = ned_to_enu(&ident, 1).unwrap();
        let m = &var.data;
        // east maps to sensor y, north to sensor x, up to -z
        assert_eq!(m[[0, 1, 0]], 1.0);
        assert_eq!(m[[1, 0, 0]], 1.0);
        assert_eq!(m[[2, 2, 0]], -1.0);
    }

    #[test]
    fn profiler_cells() {
        let cfg = Configuration::from_map(
            json!({"bin_length": 256, "t2": 100})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let (blank, cs) = cell_geometry(&cfg);
        assert!((cs - 0.00675 * 25f64.to_radians().cos()).abs() < 1e-12);
        assert!(blank > 0.0);
    }
}
