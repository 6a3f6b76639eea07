use std::io::{Read, Seek};

use tracing::trace;

use crate::cursor::{Cursor, Whence};
use crate::error::{Error, Result};

const CHUNK: usize = 4096;

/// Outcome of a [Synchronizer::scan].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Scan {
    /// Offset of an accepted sync pattern; the cursor is positioned there.
    Found(u64),
    /// End of data reached after scanning `searched` bytes.
    Eof { searched: u64 },
}

/// Synchronizer scans a cursor for the byte pattern marking the start of an
/// ensemble or record.
///
/// A pattern match is only a candidate; the caller's `accept` check decides
/// whether it is a real start, so stray pattern bytes inside data are passed
/// over. The scan gives up with [Error::DecodeSync] once more than `max_search`
/// bytes have been examined without an accepted match.
pub(crate) struct Synchronizer {
    pattern: Vec<u8>,
    max_search: usize,
    /// Candidates rejected by the accept check.
    pub false_hits: usize,
    /// Bytes passed over while searching.
    pub skipped: u64,
}

impl Synchronizer {
    pub fn new(pattern: &[u8], max_search: usize) -> Self {
        Synchronizer {
            pattern: pattern.to_vec(),
            max_search,
            false_hits: 0,
            skipped: 0,
        }
    }

    /// Scan forward from the current position.
    ///
    /// # Errors
    /// [Error::DecodeSync] if the search bound is exceeded, or any error returned
    /// by `accept` other than [Error::EndOfFile].
    pub fn scan<R, F>(&mut self, cur: &mut Cursor<R>, mut accept: F) -> Result<Scan>
    where
        R: Read + Seek,
        F: FnMut(&mut Cursor<R>, u64) -> Result<bool>,
    {
        let plen = self.pattern.len();
        let start = cur.tell();
        let mut pos = start;
        loop {
            cur.seek(pos as i64, Whence::Start)?;
            let avail = cur.remaining() as usize;
            if avail < plen {
                self.skipped += pos - start;
                return Ok(Scan::Eof {
                    searched: pos - start,
                });
            }
            let buf = cur.read_bytes(avail.min(CHUNK))?;
            for (i, win) in buf.windows(plen).enumerate() {
                let here = pos + i as u64;
                if (here - start) as usize > self.max_search {
                    return Err(Error::DecodeSync {
                        searched: self.max_search,
                        offset: start,
                    });
                }
                if win != self.pattern.as_slice() {
                    continue;
                }
                cur.seek(here as i64, Whence::Start)?;
                let ok = match accept(cur, here) {
                    Ok(ok) => ok,
                    Err(Error::EndOfFile { .. }) => false,
                    Err(err) => return Err(err),
                };
                if ok {
                    cur.seek(here as i64, Whence::Start)?;
                    self.skipped += here - start;
                    if here != start {
                        trace!(offset = here, skipped = here - start, "resynchronized");
                    }
                    return Ok(Scan::Found(here));
                }
                self.false_hits += 1;
            }
            // overlap by one pattern length so matches across chunks are found
            pos += (buf.len() + 1 - plen) as u64;
        }
    }
}
