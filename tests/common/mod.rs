//! Synthetic instrument files for integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_i16(buf: &mut Vec<u8>, v: i16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Write `data` to a file in a fresh temporary directory. Keep the directory
/// alive for as long as the file is needed.
pub fn write_temp(name: &str, data: &[u8]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(data).unwrap();
    (dir, path)
}

/// PD0 ensembles from a firmware 16.30 Workhorse with fixed leader, variable
/// leader and velocity records.
#[derive(Debug, Clone)]
pub struct Pd0 {
    pub n_cells: usize,
    /// 0 beam, 1 instrument, 3 earth
    pub coord_sys_code: u8,
    pub upward: bool,
    pub heading: f64,
    pub pitch: f64,
    pub roll: f64,
    /// Bytes inserted after the fixed leader without updating its size.
    pub leader_gap: usize,
}

impl Default for Pd0 {
    fn default() -> Self {
        Pd0 {
            n_cells: 5,
            coord_sys_code: 0,
            upward: true,
            heading: 90.0,
            pitch: 0.0,
            roll: 0.0,
            leader_gap: 0,
        }
    }
}

pub const PD0_FIXED_LEN: usize = 2 + 57;
pub const PD0_VARIABLE_LEN: usize = 2 + 63;
pub const PD0_HEADER_LEN: usize = 12;

impl Pd0 {
    /// Raw velocity in mm/s of beam `b`, cell `c`, ensemble `e`. The low byte
    /// is always even so the data never contains the 0x7F sync byte.
    pub fn velocity(e: usize, c: usize, b: usize) -> i16 {
        1000 * (b as i16 + 1) + 16 * c as i16 + 2 * e as i16
    }

    /// Offset of the first velocity byte within an ensemble.
    pub fn velocity_offset(&self) -> usize {
        PD0_HEADER_LEN + PD0_FIXED_LEN + self.leader_gap + PD0_VARIABLE_LEN + 2
    }

    pub fn ensemble_len(&self) -> usize {
        self.velocity_offset() + 8 * self.n_cells + 2
    }

    fn fixed_leader(&self) -> Vec<u8> {
        let mut f = vec![0x00, 0x00, 16, 30];
        let upward: u16 = if self.upward { 1 << 7 } else { 0 };
        push_u16(&mut f, (1 << 3) | upward | (1 << 8) | (4 << 12));
        f.extend_from_slice(&[0, 0, 4, self.n_cells as u8]);
        push_u16(&mut f, 1); // pings
        push_u16(&mut f, 100); // cell size, cm
        push_u16(&mut f, 50); // blank, cm
        f.extend_from_slice(&[1, 64, 5, 0]);
        push_u16(&mut f, 2000);
        f.extend_from_slice(&[0, 1, 0, self.coord_sys_code << 3]);
        push_i16(&mut f, 0);
        push_i16(&mut f, 0);
        f.extend_from_slice(&[0, 0]);
        push_u16(&mut f, 200); // bin 1 distance, cm
        push_u16(&mut f, 100);
        f.extend_from_slice(&[0, 0, 50, 0]);
        push_u16(&mut f, 0);
        // serial and beam angle tail
        f.extend_from_slice(&[0; 8]);
        push_u16(&mut f, 0);
        f.extend_from_slice(&[255, 0]);
        push_u32(&mut f, 12345);
        f.push(20);
        assert_eq!(f.len(), PD0_FIXED_LEN);
        f
    }

    fn variable_leader(&self, e: usize) -> Vec<u8> {
        let mut v = vec![0x80, 0x00];
        push_u16(&mut v, e as u16 + 1);
        v.extend_from_slice(&[24, 3, 15, 12, 0, e as u8, 0, 0]);
        push_u16(&mut v, 0);
        push_u16(&mut v, 1500);
        push_u16(&mut v, 100);
        push_u16(&mut v, (self.heading * 100.0).round() as u16);
        push_i16(&mut v, (self.pitch * 100.0).round() as i16);
        push_i16(&mut v, (self.roll * 100.0).round() as i16);
        push_u16(&mut v, 35);
        push_i16(&mut v, 1000);
        v.extend_from_slice(&[0; 3 + 3 + 8]);
        push_u32(&mut v, 0);
        v.extend_from_slice(&[0; 2]);
        push_u32(&mut v, 10000);
        push_u32(&mut v, 0);
        v.push(0);
        v.extend_from_slice(&[20, 24, 3, 15, 12, 0, e as u8, 0]);
        assert_eq!(v.len(), PD0_VARIABLE_LEN);
        v
    }

    /// One complete ensemble with a valid checksum.
    pub fn ensemble(&self, e: usize) -> Vec<u8> {
        let off_fixed = PD0_HEADER_LEN;
        let off_var = off_fixed + PD0_FIXED_LEN + self.leader_gap;
        let off_vel = off_var + PD0_VARIABLE_LEN;
        let n_bytes = off_vel + 2 + 8 * self.n_cells;

        let mut buf = vec![0x7f, 0x7f];
        push_u16(&mut buf, n_bytes as u16);
        buf.extend_from_slice(&[0, 3]);
        for off in [off_fixed, off_var, off_vel] {
            push_u16(&mut buf, off as u16);
        }
        buf.extend(self.fixed_leader());
        buf.extend(std::iter::repeat(0).take(self.leader_gap));
        buf.extend(self.variable_leader(e));
        buf.extend_from_slice(&[0x00, 0x01]);
        for c in 0..self.n_cells {
            for b in 0..4 {
                push_i16(&mut buf, Self::velocity(e, c, b));
            }
        }
        assert_eq!(buf.len(), n_bytes);
        let sum = buf.iter().fold(0u16, |a, b| a.wrapping_add(u16::from(*b)));
        push_u16(&mut buf, sum);
        buf
    }

    /// `n` ensembles separated by `gap`.
    pub fn file(&self, n: usize, gap: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for e in 0..n {
            if e > 0 {
                out.extend_from_slice(gap);
            }
            out.extend(self.ensemble(e));
        }
        out
    }
}

/// Nortek record with sync, id, size word and seeded checksum.
pub fn nortek_record(id: u8, payload: &[u8]) -> Vec<u8> {
    let total = 4 + payload.len() + 2;
    assert_eq!(total % 2, 0);
    let mut buf = vec![0xa5, id];
    push_u16(&mut buf, (total / 2) as u16);
    buf.extend_from_slice(payload);
    nortek_checksum(&mut buf);
    buf
}

fn nortek_checksum(buf: &mut Vec<u8>) {
    let sum = buf
        .chunks_exact(2)
        .fold(0xb58cu16, |a, w| a.wrapping_add(u16::from_le_bytes([w[0], w[1]])));
    push_u16(buf, sum);
}

fn bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

/// Vector velocimeter stream: configuration block, then system records each
/// followed by `per_system` velocity samples.
#[derive(Debug, Clone)]
pub struct Vector {
    /// 0 earth, 1 instrument, 2 beam
    pub coord_sys_code: u16,
    /// Sample rate is `512 / avg_interval`.
    pub avg_interval: u16,
    /// Heading in tenths of a degree, one per system record.
    pub headings: Vec<i16>,
    pub per_system: usize,
    pub down: bool,
}

impl Default for Vector {
    fn default() -> Self {
        Vector {
            coord_sys_code: 2,
            avg_interval: 64,
            headings: vec![100, 200],
            per_system: 8,
            down: false,
        }
    }
}

pub const VECTOR_TRANS: [f64; 9] = [
    2.7249, -1.3770, -1.3503, -0.0161, 2.3442, -2.3308, 0.3472, 0.3455, 0.3389,
];

impl Vector {
    pub fn n_samples(&self) -> usize {
        self.headings.len() * self.per_system
    }

    /// Raw velocity in mm/s of component `c` at sample `i`.
    pub fn velocity(i: usize, c: usize) -> i16 {
        100 * (c as i16 + 1) + i as i16
    }

    pub fn hardware(&self) -> Vec<u8> {
        let mut p = Vec::new();
        let mut serial = b"VEC 1234".to_vec();
        serial.resize(14, 0);
        p.extend(serial);
        p.extend_from_slice(&[0; 12 + 12]);
        p.extend_from_slice(b"3.36");
        nortek_record(0x05, &p)
    }

    pub fn head(&self) -> Vec<u8> {
        let mut p = Vec::new();
        push_u16(&mut p, 0b111);
        push_u16(&mut p, 6000);
        push_u16(&mut p, 0);
        let mut serial = b"VEC 5678".to_vec();
        serial.resize(12, 0);
        p.extend(serial);
        p.extend_from_slice(&[0; 8]);
        for v in VECTOR_TRANS {
            push_i16(&mut p, (v * 4096.0).round() as i16);
        }
        p.extend_from_slice(&[0; 150 + 22]);
        push_u16(&mut p, 3);
        nortek_record(0x04, &p)
    }

    pub fn user(&self) -> Vec<u8> {
        let mut p = Vec::new();
        for _ in 0..6 {
            push_u16(&mut p, 0);
        }
        push_u16(&mut p, self.avg_interval);
        push_u16(&mut p, 3);
        p.extend_from_slice(&[0; 4 + 6 + 2]);
        push_u16(&mut p, self.coord_sys_code);
        push_u16(&mut p, 0); // cells
        push_u16(&mut p, 0);
        push_u16(&mut p, 1); // measurement interval
        p.resize(506, 0);
        nortek_record(0x00, &p)
    }

    pub fn system(&self, s: usize) -> Vec<u8> {
        let mut p = vec![bcd(0), bcd(s as u8), bcd(15), bcd(12), bcd(24), bcd(3)];
        push_u16(&mut p, 120);
        push_u16(&mut p, 15000);
        push_i16(&mut p, self.headings[s]);
        push_i16(&mut p, 0);
        push_i16(&mut p, 0);
        push_i16(&mut p, 1500);
        p.push(0);
        p.push(u8::from(self.down));
        push_u16(&mut p, 0);
        nortek_record(0x11, &p)
    }

    pub fn sample(&self, i: usize) -> Vec<u8> {
        let mut buf = vec![0xa5, 0x10, 0, (i % 256) as u8, 0, 0];
        push_u16(&mut buf, 10000);
        push_u16(&mut buf, 0);
        for c in 0..3 {
            push_i16(&mut buf, Self::velocity(i, c));
        }
        buf.extend_from_slice(&[100, 100, 100, 90, 90, 90]);
        nortek_checksum(&mut buf);
        buf
    }

    /// Byte offset of sample `i` in [Vector::file].
    pub fn sample_offset(&self, i: usize) -> usize {
        let header = self.hardware().len() + self.head().len() + self.user().len();
        let systems = i / self.per_system + 1;
        header + systems * self.system(0).len() + i * 24
    }

    pub fn file(&self) -> Vec<u8> {
        let mut out = self.hardware();
        out.extend(self.head());
        out.extend(self.user());
        let mut i = 0;
        for s in 0..self.headings.len() {
            out.extend(self.system(s));
            for _ in 0..self.per_system {
                out.extend(self.sample(i));
                i += 1;
            }
        }
        out
    }
}
