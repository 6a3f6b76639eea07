//! PD0 ensemble decoder.
//!
//! An ensemble is a header (`0x7F7F`, byte count, record offset table) followed
//! by the records it lists and a 16-bit byte-sum checksum.
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, debug_span, trace};

use super::store::{time_last, FieldStore};
use super::sync::{Scan, Synchronizer};
use super::{epoch_seconds, full_year, report, DecodeOptions, DecodeOutput};
use crate::config::{Configuration, Firmware};
use crate::cursor::{Cursor, Whence};
use crate::dataset::{
    variable, Attrs, CoordSys, Dataset, DimKind, InstType, InstrumentProfile, Make, Orientation,
    RotateKind,
};
use crate::error::{Error, Result, Warning};
use crate::schema::rdi::{beam_angle_from_code, fixed_leader, schema, Record, HEADER_ID};
use crate::schema::{config_map, find, unpack, Geometry};

const SYNC: [u8; 2] = [0x7f, 0x7f];
/// Header bytes before the offset table: id, byte count, spare, record count.
const HEADER_LEN: u64 = 6;
const MAX_RECORDS: u8 = 64;

/// Per-ensemble header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsembleHeader {
    /// Byte offset of the `0x7F7F` id.
    pub start: u64,
    /// Bytes from `start` up to, not including, the checksum.
    pub n_bytes: u16,
    /// Record offsets relative to `start`.
    pub offsets: Vec<u16>,
}

impl EnsembleHeader {
    /// Read a header at the cursor without judging whether it is plausible.
    ///
    /// # Errors
    /// [Error::EndOfFile] if the header is cut short.
    pub fn read<R: Read + Seek>(cur: &mut Cursor<R>) -> Result<Self> {
        let start = cur.tell();
        let _id = cur.u16()?;
        let n_bytes = cur.u16()?;
        let _spare = cur.u8()?;
        let n_types = cur.u8()?;
        let offsets = cur.read_u16(usize::from(n_types))?;
        Ok(EnsembleHeader {
            start,
            n_bytes,
            offsets,
        })
    }

    /// Offset just past the checksum, where the next ensemble should start.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start + u64::from(self.n_bytes) + 2
    }

    fn structurally_valid(&self, file_len: u64) -> bool {
        let n_types = self.offsets.len() as u64;
        if n_types == 0 || n_types > u64::from(MAX_RECORDS) {
            return false;
        }
        if u64::from(self.n_bytes) < HEADER_LEN + 2 * n_types || self.end() > file_len {
            return false;
        }
        if u64::from(self.offsets[0]) < HEADER_LEN + 2 * n_types {
            return false;
        }
        self.offsets.windows(2).all(|w| w[0] < w[1])
            && self.offsets.iter().all(|o| *o < self.n_bytes)
    }
}

/// Accept check for a `0x7F7F` candidate at `start`.
///
/// Besides the header structure, either the next ensemble must begin right
/// after this one's checksum or the checksum must match, so a corrupted byte
/// count is rejected instead of being trusted.
fn plausible<R: Read + Seek>(cur: &mut Cursor<R>, start: u64) -> Result<bool> {
    let hdr = EnsembleHeader::read(cur)?;
    if !hdr.structurally_valid(cur.len()) {
        return Ok(false);
    }
    cur.seek((start + u64::from(hdr.offsets[0])) as i64, Whence::Start)?;
    if cur.u16()? != Record::FixedLeader.id() {
        return Ok(false);
    }
    let end = hdr.end();
    if cur.len() - end < 2 {
        return Ok(true);
    }
    cur.seek(end as i64, Whence::Start)?;
    if cur.u16()? == HEADER_ID {
        return Ok(true);
    }
    Ok(checksum(cur, &hdr)?.0)
}

/// Returns whether the stored checksum matches, and both values.
fn checksum<R: Read + Seek>(cur: &mut Cursor<R>, hdr: &EnsembleHeader) -> Result<(bool, u16, u16)> {
    let computed = cur.byte_sum(hdr.start, usize::from(hdr.n_bytes))?;
    cur.seek((hdr.start + u64::from(hdr.n_bytes)) as i64, Whence::Start)?;
    let expected = cur.u16()?;
    Ok((computed == expected, expected, computed))
}

/// Decode the PD0 file at `path`.
///
/// # Errors
/// See [decode].
pub fn decode_file<P: AsRef<Path>>(path: P, opts: &DecodeOptions) -> Result<DecodeOutput> {
    let mut cur = Cursor::open(path, opts.endian)?;
    decode_cursor(&mut cur, opts)
}

/// Decode a PD0 stream.
///
/// A stream cut short inside an ensemble decodes up to the last complete
/// ensemble.
///
/// # Errors
/// [Error::DecodeSync] if no ensemble start is found within the search bound,
/// [Error::Checksum] if checksums are validated and one does not match.
pub fn decode<R: Read + Seek>(reader: R, opts: &DecodeOptions) -> Result<DecodeOutput> {
    let mut cur = Cursor::new(reader, opts.endian)?;
    decode_cursor(&mut cur, opts)
}

pub(crate) fn decode_cursor<R: Read + Seek>(
    cur: &mut Cursor<R>,
    opts: &DecodeOptions,
) -> Result<DecodeOutput> {
    let span = debug_span!("rdi_decode", len = cur.len());
    let _guard = span.enter();
    Decoder::new(cur, opts).run()
}

struct Decoder<'a, R: Read + Seek> {
    cur: &'a mut Cursor<R>,
    opts: &'a DecodeOptions,
    sync: Synchronizer,
    cfg: Arc<Configuration>,
    geom: Geometry,
    store: FieldStore,
    warnings: Vec<Warning>,
    /// Persistent gap between ensembles, measured once and applied to every
    /// following ensemble of this decode.
    fudge: Option<u64>,
    offset_warned: bool,
    /// Ping index of the ensemble being read.
    index: usize,
    /// Ensembles stored.
    n_stored: usize,
}

impl<'a, R: Read + Seek> Decoder<'a, R> {
    fn new(cur: &'a mut Cursor<R>, opts: &'a DecodeOptions) -> Self {
        Decoder {
            cur,
            opts,
            sync: Synchronizer::new(&SYNC, opts.max_sync_search),
            cfg: Arc::new(Configuration::new()),
            geom: Geometry::default(),
            store: FieldStore::new(1),
            warnings: Vec::new(),
            fudge: None,
            offset_warned: false,
            index: 0,
            n_stored: 0,
        }
    }

    fn run(mut self) -> Result<DecodeOutput> {
        // header phase
        let first = match self.sync.scan(self.cur, plausible)? {
            Scan::Found(start) => start,
            Scan::Eof { searched } => {
                return Err(Error::DecodeSync {
                    searched: searched as usize,
                    offset: 0,
                })
            }
        };
        let hdr = EnsembleHeader::read(self.cur)?;
        self.read_fixed_leader(&hdr)?;

        // sizing phase
        let stride = u64::from(hdr.n_bytes) + 2;
        let mut estimate = (self.cur.len() - first) / stride + 1;
        if let Some(r) = &self.opts.ensemble_range {
            estimate = estimate.min(r.len() as u64);
        }
        debug!(estimate, stride, "sizing destination arrays");
        self.store = FieldStore::new(estimate as usize);

        let mut expected = first;
        while !self.opts.past_end(self.index) {
            let Some(hdr) = self.next_header(expected)? else {
                break;
            };
            let slot = self.opts.wants(self.index).then_some(self.n_stored);
            match self.read_ensemble(&hdr, slot) {
                Ok(()) => {}
                Err(Error::EndOfFile { .. }) => {
                    report(
                        &mut self.warnings,
                        Warning::PartialEnsemble {
                            ensemble: self.index,
                            offset: hdr.start,
                        },
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
            if self.opts.validate_checksum {
                let (ok, expected, computed) = checksum(self.cur, &hdr)?;
                if !ok {
                    return Err(Error::Checksum {
                        offset: hdr.start,
                        expected,
                        computed,
                    });
                }
            }
            if slot.is_some() {
                self.n_stored += 1;
            }
            self.index += 1;
            expected = hdr.end();
        }
        debug!(
            ensembles = self.n_stored,
            false_syncs = self.sync.false_hits,
            skipped = self.sync.skipped,
            "decode complete"
        );
        if self.n_stored == 0 {
            return Err(Error::NoEnsembles);
        }
        self.finish()
    }

    /// Locate and read the header of the ensemble expected at `end`, the end of
    /// the previous one.
    fn next_header(&mut self, end: u64) -> Result<Option<EnsembleHeader>> {
        let mut fudge_missed = false;
        if let Some(fudge) = self.fudge {
            let at = end + fudge;
            fudge_missed = at < self.cur.len();
            if fudge_missed {
                self.cur.seek(at as i64, Whence::Start)?;
                if self.cur.peek(2).is_ok_and(|b| b == SYNC) && plausible(self.cur, at).unwrap_or(false)
                {
                    self.cur.seek(at as i64, Whence::Start)?;
                    return EnsembleHeader::read(self.cur).map(Some);
                }
            }
        }

        self.cur.seek(end as i64, Whence::Start)?;
        let false_before = self.sync.false_hits;
        let start = match self.sync.scan(self.cur, plausible)? {
            Scan::Found(start) => start,
            Scan::Eof { .. } => {
                if end + 1 < self.cur.len() {
                    report(
                        &mut self.warnings,
                        Warning::PartialEnsemble {
                            ensemble: self.index,
                            offset: end,
                        },
                    );
                }
                return Ok(None);
            }
        };
        if (start != end || fudge_missed) && self.index > 0 {
            let gap = start - end;
            let clean = self.sync.false_hits == false_before;
            let warning = if self.fudge.is_none() && clean {
                self.fudge = Some(gap);
                Warning::PersistentOffset {
                    ensemble: self.index,
                    offset: gap as i64,
                }
            } else {
                debug!(offset = end, gap, "resynchronized past corrupt data");
                Warning::Resynchronized {
                    ensemble: self.index,
                    offset: end,
                    skipped: gap,
                }
            };
            report(&mut self.warnings, warning);
        }
        EnsembleHeader::read(self.cur).map(Some)
    }

    fn read_fixed_leader(&mut self, hdr: &EnsembleHeader) -> Result<()> {
        let Some(off) = hdr.offsets.first() else {
            return Ok(());
        };
        self.cur
            .seek((hdr.start + u64::from(*off) + 2) as i64, Whence::Start)?;
        let base_specs = fixed_leader(Firmware::default());
        let mut fields = unpack(self.cur, &base_specs, self.geom)?;
        let fw = Firmware::new(
            find(&fields, "fw_ver").and_then(|f| f.scalar()).unwrap_or(0.0) as u8,
            find(&fields, "fw_rev").and_then(|f| f.scalar()).unwrap_or(0.0) as u8,
        );
        let all = fixed_leader(fw);
        fields.extend(unpack(self.cur, &all[base_specs.len()..], self.geom)?);

        let mut map = config_map(&fields);
        map.insert("firmware".into(), Value::String(fw.to_string()));
        let next = self.cfg.amended(&map);
        if !Arc::ptr_eq(&next, &self.cfg) {
            let geom = Geometry::from_config(&next);
            if self.index > 0 && geom != self.geom {
                debug!(ensemble = self.index, ?geom, "geometry changed");
            }
            self.geom = geom;
            self.cfg = next;
        }
        Ok(())
    }

    fn read_ensemble(&mut self, hdr: &EnsembleHeader, slot: Option<usize>) -> Result<()> {
        let Some(slot) = slot else {
            trace!(ensemble = self.index, "outside requested range");
            return Ok(());
        };
        // id and whether the cursor position after it is meaningful
        let mut prev: Option<u16> = None;
        for (k, off) in hdr.offsets.iter().enumerate() {
            let rec_start = hdr.start + u64::from(*off);
            if let Some(id) = prev {
                let delta = self.cur.tell() as i64 - rec_start as i64;
                if delta != 0 {
                    self.offset_corrected(id, delta);
                }
            }
            self.cur.seek(rec_start as i64, Whence::Start)?;
            let id = self.cur.u16()?;
            prev = None;
            match Record::from_id(id) {
                None => {
                    let next = hdr.offsets.get(k + 1).copied().unwrap_or(hdr.n_bytes);
                    report(
                        &mut self.warnings,
                        Warning::UnrecognizedRecord {
                            id,
                            offset: rec_start,
                            skipped: usize::from(next.saturating_sub(*off)),
                        },
                    );
                }
                Some(Record::Skipped(id)) => {
                    trace!(id = format!("{id:#06x}"), "skipping record");
                }
                Some(Record::FixedLeader) => {
                    self.read_fixed_leader(hdr)?;
                    prev = Some(id);
                }
                Some(rec) => {
                    let specs = schema(rec, &self.cfg);
                    let fields = unpack(self.cur, &specs, self.geom)?;
                    let map = config_map(&fields);
                    if !map.is_empty() {
                        self.cfg = self.cfg.amended(&map);
                    }
                    self.store.put_fields(slot, &fields);
                    prev = Some(id);
                }
            }
        }
        Ok(())
    }

    fn offset_corrected(&mut self, record: u16, delta: i64) {
        if self.offset_warned {
            debug!(ensemble = self.index, record, delta, "record offset corrected");
            return;
        }
        self.offset_warned = true;
        report(
            &mut self.warnings,
            Warning::OffsetCorrected {
                ensemble: self.index,
                record,
                delta,
            },
        );
    }

    fn finish(mut self) -> Result<DecodeOutput> {
        let n = self.n_stored;
        let cfg = Arc::clone(&self.cfg);
        let mut ds = Dataset::new(attrs(&cfg));

        let time = self.compose_time(n);
        ds.insert("time", variable(time.clone(), &[n], DimKind::Time, "s")?)?;

        if let (Some(number), Some(msb)) =
            (self.store.take("number", n), self.store.take("number_msb", n))
        {
            let number: Vec<f64> = number.iter().zip(&msb).map(|(a, b)| a + b).collect();
            ds.insert("number", variable(number, &[n], DimKind::Time, "1")?)?;
        }

        if let Some(lsb) = self.store.take("bt_range_lsb", n) {
            let msb = self
                .store
                .take("bt_range_msb", n)
                .unwrap_or_else(|| vec![0.0; lsb.len()]);
            let range: Vec<f64> = lsb.iter().zip(&msb).map(|(a, b)| a + b).collect();
            ds.insert("bt_range", time_last(range, n, &[4], DimKind::BeamTime, "m")?)?;
        }

        if let Some(utc) = self.store.take("nav_utc_first", n) {
            let year = self.store.take("nav_year", n).unwrap_or_default();
            let month = self.store.take("nav_month", n).unwrap_or_default();
            let day = self.store.take("nav_day", n).unwrap_or_default();
            let t: Vec<f64> = (0..n)
                .map(|i| {
                    let (y, m, d) = (year.get(i), month.get(i), day.get(i));
                    match (y, m, d) {
                        (Some(y), Some(m), Some(d)) => {
                            epoch_seconds(*y, *m, *d, 0.0, 0.0, 0.0) + utc[i]
                        }
                        _ => f64::NAN,
                    }
                })
                .collect();
            ds.insert("time_gps", variable(t, &[n], DimKind::Time, "s")?)?;
        }

        let n_cells = self.geom.n_cells;
        let bin1 = cfg.f64("bin1_dist").unwrap_or(0.0);
        let cell_size = cfg.f64("cell_size").unwrap_or(0.0);
        let range: Vec<f64> = (0..n_cells).map(|i| bin1 + i as f64 * cell_size).collect();
        ds.insert("range", variable(range, &[n_cells], DimKind::Cell, "m")?)?;

        for (name, var) in self.store.finish(n)? {
            if name.starts_with("rtc_") || name.starts_with("y2k_") {
                continue;
            }
            ds.insert(&name, var)?;
        }

        if ds.contains("vel") {
            ds.attrs.rotate_vars.insert("vel".into(), RotateKind::Beam);
        }
        if ds.contains("bt_vel") {
            ds.attrs.rotate_vars.insert("bt_vel".into(), RotateKind::Beam);
        }
        ds.attrs.fs = sample_rate(&time, &cfg);

        crate::rotate::ensure_orientmat(&mut ds)?;
        ds.validate()?;
        Ok(DecodeOutput {
            dataset: ds,
            warnings: self.warnings,
        })
    }

    fn compose_time(&mut self, n: usize) -> Vec<f64> {
        let y2k = self.store.take("y2k_year", n);
        let prefix = if y2k.is_some() { "y2k_" } else { "rtc_" };
        let mut take = |name: &str| {
            self.store
                .take(&format!("{prefix}{name}"), n)
                .unwrap_or_else(|| vec![f64::NAN; n])
        };
        let year: Vec<f64> = match y2k {
            Some(yy) => {
                let century = take("century");
                yy.iter().zip(&century).map(|(y, c)| c * 100.0 + y).collect()
            }
            None => take("year").into_iter().map(full_year).collect(),
        };
        let month = take("month");
        let day = take("day");
        let hour = take("hour");
        let minute = take("minute");
        let second = take("second");
        let hund = take("hundredths");
        (0..n)
            .map(|i| {
                epoch_seconds(
                    year[i],
                    month[i],
                    day[i],
                    hour[i],
                    minute[i],
                    second[i] + hund[i] / 100.0,
                )
            })
            .collect()
    }
}

fn attrs(cfg: &Arc<Configuration>) -> Attrs {
    let n_beams = cfg.usize("n_beams").unwrap_or(4);
    let mut profile = InstrumentProfile::new(Make::Rdi, InstType::Adcp, n_beams);
    let fw = cfg.firmware().unwrap_or_default();
    profile.model = model(fw).to_string();
    profile.orientation = match cfg.f64("upward") {
        Some(v) if v == 0.0 => Orientation::Down,
        _ => Orientation::Up,
    };
    profile.convex = cfg.f64("convex").map_or(true, |v| v != 0.0);
    profile.beam_angle = match cfg.f64("beam_angle") {
        Some(a) if a > 0.0 => a,
        _ => beam_angle_from_code(cfg.f64("beam_angle_code").unwrap_or(1.0) as u64),
    };
    let coord_sys = match cfg.f64("coord_sys_code").map(|c| c as u8) {
        Some(0) => CoordSys::Beam,
        Some(3) => CoordSys::Earth,
        _ => CoordSys::Inst,
    };
    let mut attrs = Attrs::new(profile, coord_sys, f64::NAN);
    let mut extra = Map::new();
    extra.insert("inst_make".into(), json!(Make::Rdi.to_string()));
    attrs.config = cfg.amended(&extra);
    attrs
}

fn model(fw: Firmware) -> &'static str {
    match fw.major {
        8 | 9 | 16 | 50 | 51 | 52 => "Workhorse",
        10 | 11 => "Rio Grande",
        14 | 23 => "Ocean Surveyor",
        47 | 66 => "Sentinel V",
        _ => "unknown",
    }
}

/// Ensemble rate from the median time step, falling back to the configured
/// ping timing.
fn sample_rate(time: &[f64], cfg: &Configuration) -> f64 {
    let mut dt: Vec<f64> = time
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| d.is_finite() && *d > 0.0)
        .collect();
    if !dt.is_empty() {
        dt.sort_by(f64::total_cmp);
        return 1.0 / dt[dt.len() / 2];
    }
    let tpp = cfg.f64("tpp_min").unwrap_or(0.0) * 60.0
        + cfg.f64("tpp_sec").unwrap_or(0.0)
        + cfg.f64("tpp_hund").unwrap_or(0.0) / 100.0;
    let pings = cfg.f64("pings_per_ensemble").unwrap_or(1.0);
    if tpp * pings > 0.0 {
        1.0 / (tpp * pings)
    } else {
        f64::NAN
    }
}
