use std::io::Read;

use log::warn;

use super::crc;
use super::page::{Page, CAPTURE_PATTERN, HEADER_BASE_SIZE};
use crate::error::{Error, Result};

const READ_CHUNK: usize = 64 * 1024;

/// Pulls aligned pages from a byte stream.
///
/// Reports the absolute file offset at which each page began. Pages with
/// a bad checksum are skipped with a warning, as is garbage between
/// pages; a page cut short by end of input is a hard error.
pub struct PageReader<R: Read> {
    reader: R,
    buf: Vec<u8>,
    /// Consumed prefix of `buf`
    pos: usize,
    /// File offset of `buf[pos]`
    offset: u64,
    /// Total bytes pulled from the underlying reader
    bytes_read: u64,
    eof: bool,
}

impl<R: Read> PageReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: Vec::with_capacity(READ_CHUNK), pos: 0, offset: 0, bytes_read: 0, eof: false }
    }

    /// Total bytes consumed from the underlying stream. After the reader
    /// returns `None` this is the input length.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Buffer at least `need` unconsumed bytes; returns how many are
    /// actually available (less than `need` only at end of input).
    fn fill(&mut self, need: usize) -> Result<usize> {
        while !self.eof && self.buf.len() - self.pos < need {
            let mut chunk = [0u8; READ_CHUNK];
            match self.reader.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    self.bytes_read += n as u64;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(self.buf.len() - self.pos)
    }

    /// Drop `n` consumed bytes and advance the file offset.
    fn advance(&mut self, n: usize) {
        self.pos += n;
        self.offset += n as u64;
    }

    /// Pull the next well-formed page, or `None` at end of input.
    pub fn next_page(&mut self) -> Result<Option<Page>> {
        loop {
            // Keep the buffer from growing without bound.
            if self.pos > 0 {
                self.buf.drain(..self.pos);
                self.pos = 0;
            }

            let avail = self.fill(HEADER_BASE_SIZE)?;
            if avail == 0 {
                return Ok(None);
            }

            // Resynchronize on the capture pattern if needed.
            if !self.buf[self.pos..].starts_with(CAPTURE_PATTERN) {
                if self.resync(avail)? {
                    continue;
                }
                return Ok(None);
            }

            if avail < HEADER_BASE_SIZE {
                return Err(Error::TruncatedInput { offset: self.offset });
            }

            let version = self.buf[self.pos + 4];
            if version != 0 {
                warn!("{}", Error::UnsupportedPageVersion(version));
                self.advance(1);
                continue;
            }

            let n_segments = self.buf[self.pos + 26] as usize;
            let header_len = HEADER_BASE_SIZE + n_segments;
            if self.fill(header_len)? < header_len {
                return Err(Error::TruncatedInput { offset: self.offset });
            }
            let body_len: usize = self.buf[self.pos + HEADER_BASE_SIZE..self.pos + header_len]
                .iter()
                .map(|&lace| lace as usize)
                .sum();
            let total = header_len + body_len;
            if self.fill(total)? < total {
                return Err(Error::TruncatedInput { offset: self.offset });
            }

            let raw = &self.buf[self.pos..self.pos + total];
            let stored = u32::from_le_bytes(raw[22..26].try_into().unwrap());
            let mut zeroed = raw.to_vec();
            zeroed[22..26].copy_from_slice(&[0; 4]);
            let computed = crc::checksum(&zeroed);
            if computed != stored {
                warn!(
                    "{}",
                    Error::ChecksumMismatch { offset: self.offset, expected: computed, found: stored }
                );
                self.advance(total);
                continue;
            }

            let page = Page::from_verified(raw, self.offset);
            self.advance(total);
            return Ok(Some(page));
        }
    }

    /// Skip forward to the next capture pattern. Returns false when the
    /// rest of the input holds none.
    fn resync(&mut self, avail: usize) -> Result<bool> {
        let window = &self.buf[self.pos..self.pos + avail];
        if let Some(at) = window.windows(CAPTURE_PATTERN.len()).position(|w| w == CAPTURE_PATTERN) {
            warn!("{}", Error::SyncLost { offset: self.offset, skipped: at as u64 });
            self.advance(at);
            return Ok(true);
        }
        if self.eof {
            warn!("{}", Error::SyncLost { offset: self.offset, skipped: avail as u64 });
            self.advance(avail);
            return Ok(false);
        }
        // Keep a potential partial capture pattern at the buffer tail.
        let keep = CAPTURE_PATTERN.len() - 1;
        let skip = avail.saturating_sub(keep);
        warn!("{}", Error::SyncLost { offset: self.offset, skipped: skip as u64 });
        self.advance(skip);
        self.fill(HEADER_BASE_SIZE)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ogg::page::Page;
    use std::io::Cursor;

    fn page_with(serial: u32, sequence: u32, body: &[u8]) -> Page {
        Page {
            offset: 0,
            granule_pos: sequence as i64,
            serial,
            sequence,
            continued: false,
            bos: sequence == 0,
            eos: false,
            segment_table: vec![body.len() as u8],
            body: body.to_vec(),
        }
    }

    #[test]
    fn test_reads_pages_with_offsets() {
        let p0 = page_with(1, 0, b"first");
        let p1 = page_with(1, 1, b"second");
        let mut data = p0.serialize();
        data.extend_from_slice(&p1.serialize());

        let mut reader = PageReader::new(Cursor::new(&data));
        let r0 = reader.next_page().unwrap().unwrap();
        assert_eq!(r0.offset, 0);
        assert_eq!(r0.body, b"first");
        let r1 = reader.next_page().unwrap().unwrap();
        assert_eq!(r1.offset, p0.len() as u64);
        assert_eq!(r1.body, b"second");
        assert!(reader.next_page().unwrap().is_none());
        assert_eq!(reader.bytes_read(), data.len() as u64);
    }

    #[test]
    fn test_skips_garbage_between_pages() {
        let p0 = page_with(1, 0, b"first");
        let p1 = page_with(1, 1, b"second");
        let mut data = p0.serialize();
        data.extend_from_slice(b"not a page at all");
        data.extend_from_slice(&p1.serialize());

        let mut reader = PageReader::new(Cursor::new(&data));
        assert_eq!(reader.next_page().unwrap().unwrap().body, b"first");
        let r1 = reader.next_page().unwrap().unwrap();
        assert_eq!(r1.body, b"second");
        // Offset reflects the true file position, garbage included.
        assert_eq!(r1.offset, p0.len() as u64 + 17);
    }

    #[test]
    fn test_skips_corrupt_page() {
        let p0 = page_with(1, 0, b"first");
        let p1 = page_with(1, 1, b"second");
        let mut bad = p0.serialize();
        let body_at = bad.len() - 5;
        bad[body_at] ^= 0xff; // corrupt the body, checksum now wrong
        bad.extend_from_slice(&p1.serialize());

        let mut reader = PageReader::new(Cursor::new(&bad));
        let page = reader.next_page().unwrap().unwrap();
        assert_eq!(page.body, b"second");
    }

    #[test]
    fn test_truncated_page_is_fatal() {
        let p0 = page_with(1, 0, b"some body bytes");
        let data = p0.serialize();
        let cut = &data[..data.len() - 3];
        let mut reader = PageReader::new(Cursor::new(cut));
        assert!(matches!(reader.next_page(), Err(Error::TruncatedInput { .. })));
    }

    #[test]
    fn test_empty_input() {
        let mut reader = PageReader::new(Cursor::new(&[][..]));
        assert!(reader.next_page().unwrap().is_none());
    }
}
