//! Positioned, typed byte access over a seekable source.
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Error, Result};

/// Byte order of multi-byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Reference point for [Cursor::seek].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Cursor provides fixed-width typed reads over a reader, tracking the current
/// byte offset itself so `tell` never touches the underlying source.
///
/// Reads are all-or-nothing: if fewer bytes remain than requested the read fails
/// with [Error::EndOfFile] and the position does not change.
pub struct Cursor<R>
where
    R: Read + Seek,
{
    reader: R,
    pos: u64,
    len: u64,
    endian: Endian,
}

impl Cursor<BufReader<File>> {
    /// Open `path` for buffered reading.
    ///
    /// # Errors
    /// Any IO error opening or sizing the file.
    pub fn open<P: AsRef<Path>>(path: P, endian: Endian) -> Result<Self> {
        let file = File::open(path)?;
        Cursor::new(BufReader::new(file), endian)
    }
}

macro_rules! typed_reads {
    ($($(#[$doc:meta])* $many:ident, $one:ident, $ty:ty;)*) => {
        $(
            $(#[$doc])*
            ///
            /// # Errors
            /// [Error::EndOfFile] if fewer than `count` values remain.
            pub fn $many(&mut self, count: usize) -> Result<Vec<$ty>> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                let endian = self.endian;
                let buf = self.read_bytes(count * WIDTH)?;
                Ok(buf
                    .chunks_exact(WIDTH)
                    .map(|c| {
                        let mut raw = [0u8; WIDTH];
                        raw.copy_from_slice(c);
                        match endian {
                            Endian::Little => <$ty>::from_le_bytes(raw),
                            Endian::Big => <$ty>::from_be_bytes(raw),
                        }
                    })
                    .collect())
            }

            /// Read a single value.
            ///
            /// # Errors
            /// [Error::EndOfFile] if not enough bytes remain.
            pub fn $one(&mut self) -> Result<$ty> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                let mut raw = [0u8; WIDTH];
                self.fill(&mut raw)?;
                Ok(match self.endian {
                    Endian::Little => <$ty>::from_le_bytes(raw),
                    Endian::Big => <$ty>::from_be_bytes(raw),
                })
            }
        )*
    };
}

impl<R> Cursor<R>
where
    R: Read + Seek,
{
    /// Create a cursor positioned at the start of `reader`.
    ///
    /// # Errors
    /// Any IO error determining the length of the source.
    pub fn new(mut reader: R, endian: Endian) -> Result<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Cursor {
            reader,
            pos: 0,
            len,
            endian,
        })
    }

    #[must_use]
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Total length of the source in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }

    #[must_use]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// Reposition the cursor. Seeking past the end is allowed, reads will then fail
    /// with [Error::EndOfFile].
    ///
    /// # Errors
    /// [Error::InvalidSeek] if the resulting position would be negative.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.pos as i64,
            Whence::End => self.len as i64,
        };
        let target = base + offset;
        if target < 0 {
            return Err(Error::InvalidSeek(target));
        }
        if target as u64 != self.pos {
            self.reader.seek(SeekFrom::Start(target as u64))?;
            self.pos = target as u64;
        }
        Ok(self.pos)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let available = self.remaining() as usize;
        if buf.len() > available {
            return Err(Error::EndOfFile {
                wanted: buf.len(),
                available,
            });
        }
        self.reader.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Read `nbytes` raw bytes.
    ///
    /// # Errors
    /// [Error::EndOfFile] if fewer than `nbytes` remain.
    pub fn read_bytes(&mut self, nbytes: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; nbytes];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Read `nbytes` without advancing the position.
    ///
    /// # Errors
    /// [Error::EndOfFile] if fewer than `nbytes` remain.
    pub fn peek(&mut self, nbytes: usize) -> Result<Vec<u8>> {
        let start = self.pos;
        let buf = self.read_bytes(nbytes)?;
        self.seek(start as i64, Whence::Start)?;
        Ok(buf)
    }

    /// Read `nbytes` and decode them as UTF-8 with trailing NULs removed. Invalid
    /// sequences are replaced rather than rejected.
    ///
    /// # Errors
    /// [Error::EndOfFile] if fewer than `nbytes` remain.
    pub fn read_fixed_string(&mut self, nbytes: usize) -> Result<String> {
        let buf = self.read_bytes(nbytes)?;
        let end = buf.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    /// Wrapping 16-bit sum of the `nbytes` bytes starting at `start`. The cursor
    /// position is restored afterwards.
    ///
    /// # Errors
    /// [Error::EndOfFile] if the range extends past the end of the source.
    pub fn byte_sum(&mut self, start: u64, nbytes: usize) -> Result<u16> {
        let here = self.pos;
        self.seek(start as i64, Whence::Start)?;
        let zult = self.read_bytes(nbytes);
        self.seek(here as i64, Whence::Start)?;
        Ok(zult?
            .iter()
            .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b))))
    }

    typed_reads! {
        /// Read `count` unsigned bytes.
        read_u8, u8, u8;
        /// Read `count` signed bytes.
        read_i8, i8, i8;
        /// Read `count` unsigned 16-bit integers.
        read_u16, u16, u16;
        /// Read `count` signed 16-bit integers.
        read_i16, i16, i16;
        /// Read `count` unsigned 32-bit integers.
        read_u32, u32, u32;
        /// Read `count` signed 32-bit integers.
        read_i32, i32, i32;
        /// Read `count` unsigned 64-bit integers.
        read_u64, u64, u64;
        /// Read `count` signed 64-bit integers.
        read_i64, i64, i64;
        /// Read `count` IEEE single precision floats.
        read_f32, f32, f32;
        /// Read `count` IEEE double precision floats.
        read_f64, f64, f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn cursor(dat: &[u8], endian: Endian) -> Cursor<io::Cursor<Vec<u8>>> {
        Cursor::new(io::Cursor::new(dat.to_vec()), endian).unwrap()
    }

    #[test]
    fn typed_reads_advance_position() {
        let mut c = cursor(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06], Endian::Little);

        assert_eq!(c.u16().unwrap(), 0x0201);
        assert_eq!(c.tell(), 2);
        assert_eq!(c.read_u8(2).unwrap(), vec![3, 4]);
        assert_eq!(c.tell(), 4);
        assert_eq!(c.remaining(), 2);
    }

    #[test]
    fn big_endian_reads() {
        let mut c = cursor(&[0x01, 0x02, 0xff, 0xfe], Endian::Big);
        assert_eq!(c.read_u16(1).unwrap(), vec![0x0102]);
        assert_eq!(c.i16().unwrap(), -2);
    }

    #[test]
    fn read_past_end_fails_without_moving() {
        let mut c = cursor(&[0x01, 0x02, 0x03], Endian::Little);
        c.u8().unwrap();

        let err = c.read_u32(1).unwrap_err();
        assert!(
            matches!(err, Error::EndOfFile { wanted: 4, available: 2 }),
            "got {err:?}"
        );
        assert_eq!(c.tell(), 1, "failed read should not move the cursor");
    }

    #[test]
    fn seek_relative_and_absolute() {
        let mut c = cursor(&[0u8; 10], Endian::Little);
        assert_eq!(c.seek(4, Whence::Start).unwrap(), 4);
        assert_eq!(c.seek(-2, Whence::Current).unwrap(), 2);
        assert_eq!(c.seek(-1, Whence::End).unwrap(), 9);
        assert!(matches!(
            c.seek(-20, Whence::Current),
            Err(Error::InvalidSeek(-11))
        ));
        assert_eq!(c.tell(), 9);
    }

    #[test]
    fn fixed_string_strips_trailing_nul() {
        let mut c = cursor(b"VEC 1234\0\0\0\0", Endian::Little);
        assert_eq!(c.read_fixed_string(12).unwrap(), "VEC 1234");
    }

    #[test]
    fn floats() {
        let mut dat = 1.5f32.to_le_bytes().to_vec();
        dat.extend_from_slice(&(-2.25f64).to_le_bytes());
        let mut c = cursor(&dat, Endian::Little);
        assert_eq!(c.f32().unwrap(), 1.5);
        assert_eq!(c.read_f64(1).unwrap(), vec![-2.25]);
    }

    #[test]
    fn byte_sum_restores_position() {
        let mut c = cursor(&[1, 2, 3, 250, 10], Endian::Little);
        c.seek(4, Whence::Start).unwrap();
        assert_eq!(c.byte_sum(0, 4).unwrap(), 256);
        assert_eq!(c.tell(), 4);
    }

    #[test]
    fn peek_does_not_advance() {
        let mut c = cursor(&[0x7f, 0x7f, 0x00], Endian::Little);
        assert_eq!(c.peek(2).unwrap(), vec![0x7f, 0x7f]);
        assert_eq!(c.tell(), 0);
    }
}
