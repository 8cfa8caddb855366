use log::warn;

use crate::error::{Error, Result};
use crate::ogg::{Packet, PacketAssembler, Page};
use crate::ranges::{OffsetRange, RangeMap};
use crate::skeleton::FisboneInfo;
use crate::IndexConfig;

/// Fields of the Vorbis identification header the indexer needs.
#[derive(Clone, Copy, Debug)]
pub struct VorbisIdent {
    pub version: u32,
    pub channels: u8,
    pub rate: u32,
}

impl VorbisIdent {
    /// Parse the 30-byte identification header packet.
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 30 {
            return None;
        }
        let version = u32::from_le_bytes(data[7..11].try_into().unwrap());
        let channels = data[11];
        let rate = u32::from_le_bytes(data[12..16].try_into().unwrap());
        if channels == 0 || rate == 0 {
            return None;
        }
        Some(Self { version, channels, rate })
    }
}

/// Scanner for the sample-counting audio codec.
///
/// Every packet is self-decodable, so the granule shift is zero and the
/// decode ranges coincide with the read ranges.
pub struct VorbisScanner {
    serial: u32,
    config: IndexConfig,
    assembler: PacketAssembler,
    headers_read: u32,
    ident: Option<VorbisIdent>,
    continued_start_offset: i64,
    read_range: RangeMap,
    last_granulepos: i64,
    start_time_ms: i64,
    end_time_ms: i64,
}

impl VorbisScanner {
    pub fn new(serial: u32, config: IndexConfig) -> Self {
        Self {
            serial,
            config,
            assembler: PacketAssembler::new(),
            headers_read: 0,
            ident: None,
            continued_start_offset: -1,
            read_range: RangeMap::new(),
            last_granulepos: -1,
            start_time_ms: -1,
            end_time_ms: -1,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Vorbis has exactly 3 header packets.
    pub fn got_all_headers(&self) -> bool {
        self.headers_read >= 3
    }

    pub fn last_granulepos(&self) -> i64 {
        self.last_granulepos
    }

    pub fn start_time_ms(&self) -> i64 {
        self.start_time_ms
    }

    pub fn end_time_ms(&self) -> i64 {
        self.end_time_ms
    }

    /// The granule position is already a sample count.
    pub fn granule_to_frame(&self, granulepos: i64) -> i64 {
        granulepos
    }

    pub fn granule_to_time_ms(&self, granulepos: i64) -> i64 {
        match &self.ident {
            Some(ident) => granulepos * 1000 / ident.rate as i64,
            None => -1,
        }
    }

    fn header_type(data: &[u8]) -> &'static str {
        match data.first() {
            Some(0x01) => "Ident",
            Some(0x03) => "Comment",
            Some(0x05) => "Setup",
            _ => "UNKNOWN",
        }
    }

    fn read_header(&mut self, packet: &Packet) -> Result<()> {
        let data = &packet.data;
        if data.len() < 7 || &data[1..7] != b"vorbis" {
            return Err(Error::MalformedIdentHeader(self.serial));
        }
        if data[0] == 0x01 {
            self.ident =
                Some(VorbisIdent::parse(data).ok_or(Error::MalformedIdentHeader(self.serial))?);
        }
        self.headers_read += 1;
        if self.config.dump_packets {
            let ver = self.ident.map_or(0, |i| i.version);
            println!(
                "[V] ver={} {} packet{}",
                ver,
                Self::header_type(data),
                if packet.eos { " eos" } else { "" }
            );
        }
        Ok(())
    }

    pub fn accept_page(&mut self, page: &Page) -> Result<()> {
        debug_assert_eq!(page.serial, self.serial);
        let packets = self.assembler.submit(page);
        let completed = packets.len();
        let end_offset = page.end_offset() as i64;

        for (i, packet) in packets.iter().enumerate() {
            if !self.got_all_headers() {
                self.read_header(packet)?;
                continue;
            }

            let start = if i == 0 && page.continued {
                if self.continued_start_offset < 0 {
                    warn!(
                        "Continued packet with no recorded start in stream serialno={}",
                        self.serial
                    );
                    page.offset as i64
                } else {
                    self.continued_start_offset
                }
            } else {
                page.offset as i64
            };
            let range = OffsetRange::new(start, end_offset);

            let packets_remaining = (completed - 1 - i) as i64;
            let packet_granule = page.granule_pos - packets_remaining;

            if self.read_range.values().next_back() != Some(&range) {
                self.read_range.insert(packet_granule, range);
            }
        }

        if completed > 0 || !page.continued {
            self.continued_start_offset = page.offset as i64;
        }
        if page.granule_pos >= 0 {
            if self.got_all_headers() {
                if self.start_time_ms < 0 {
                    self.start_time_ms = self.granule_to_time_ms(page.granule_pos);
                }
                self.end_time_ms = self.granule_to_time_ms(page.granule_pos);
            }
            self.last_granulepos = page.granule_pos;
        }
        Ok(())
    }

    /// With no backward references the decode ranges are the read ranges.
    pub fn finalize_decode_range(&self) -> RangeMap {
        if self.read_range.is_empty() {
            warn!("Failed to produce an index for stream serialno={}", self.serial);
        }
        self.read_range.clone()
    }

    pub fn fisbone_info(&self) -> FisboneInfo {
        let ident = self.ident.as_ref();
        FisboneInfo {
            gran_numer: ident.map_or(0, |i| i.channels as i64 * i.rate as i64),
            gran_denom: 1,
            preroll: 2,
            granule_shift: 0,
            radix: 0,
            num_headers: 3,
            content_type: "audio/vorbis".into(),
            name: "audio/main".into(),
            role: "audio/main".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ogg::PageWriter;

    pub(crate) fn ident_header(rate: u32) -> Vec<u8> {
        let mut h = vec![0u8; 30];
        h[0] = 0x01;
        h[1..7].copy_from_slice(b"vorbis");
        h[11] = 2; // channels
        h[12..16].copy_from_slice(&rate.to_le_bytes());
        h
    }

    fn header_packet(kind: u8) -> Vec<u8> {
        let mut h = vec![kind];
        h.extend_from_slice(b"vorbis");
        h
    }

    fn scanner_with_headers() -> (VorbisScanner, PageWriter) {
        let mut scanner = VorbisScanner::new(2, IndexConfig::default());
        let mut writer = PageWriter::new(2);
        let mut pages = writer.add_packet(&ident_header(48_000), 0, true, false);
        pages.extend(writer.flush());
        pages.extend(writer.add_packet(&header_packet(0x03), 0, false, false));
        pages.extend(writer.add_packet(&header_packet(0x05), 0, false, false));
        pages.extend(writer.flush());
        for page in &pages {
            scanner.accept_page(page).unwrap();
        }
        assert!(scanner.got_all_headers());
        (scanner, writer)
    }

    #[test]
    fn test_decode_equals_read() {
        let (mut scanner, mut writer) = scanner_with_headers();
        let mut pages = Vec::new();
        for i in 1..=4i64 {
            pages.extend(writer.add_packet(&vec![7u8; 900], i * 1024, false, false));
            pages.extend(writer.flush());
        }
        let mut offset = 0u64;
        for page in &mut pages {
            page.offset = offset;
            offset += page.len() as u64;
            scanner.accept_page(page).unwrap();
        }
        let decode = scanner.finalize_decode_range();
        assert_eq!(decode, scanner.read_range);
        assert_eq!(decode.len(), 4);
        assert_eq!(scanner.last_granulepos(), 4 * 1024);
    }

    #[test]
    fn test_multiple_packets_per_page_granules() {
        let (mut scanner, mut writer) = scanner_with_headers();
        // Three packets completing on one page: granules count backward
        // from the page granulepos.
        let mut pages = Vec::new();
        pages.extend(writer.add_packet(&[1u8; 100], -1, false, false));
        pages.extend(writer.add_packet(&[2u8; 100], -1, false, false));
        pages.extend(writer.add_packet(&[3u8; 100], 3000, false, false));
        pages.extend(writer.flush());
        assert_eq!(pages.len(), 1);
        scanner.accept_page(&pages[0]).unwrap();
        // All three packets share one byte range, so one entry survives,
        // keyed by the earliest granule on the page.
        assert_eq!(scanner.read_range.len(), 1);
        assert_eq!(*scanner.read_range.keys().next().unwrap(), 2998);
    }

    #[test]
    fn test_times() {
        let (mut scanner, mut writer) = scanner_with_headers();
        let mut pages = writer.add_packet(&[1u8; 10], 48_000, false, false);
        pages.extend(writer.flush());
        scanner.accept_page(&pages[0]).unwrap();
        assert_eq!(scanner.granule_to_time_ms(48_000), 1000);
        assert_eq!(scanner.end_time_ms(), 1000);
    }
}
