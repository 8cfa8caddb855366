use log::warn;

use crate::error::{Error, Result};
use crate::ogg::{Packet, PacketAssembler, Page};
use crate::ranges::{predecessor, OffsetRange, RangeMap};
use crate::skeleton::FisboneInfo;
use crate::IndexConfig;

/// Fields of the Theora identification header the indexer needs.
#[derive(Clone, Copy, Debug)]
pub struct TheoraIdent {
    pub version: (u8, u8, u8),
    pub fps_numerator: u32,
    pub fps_denominator: u32,
    pub granule_shift: u8,
}

impl TheoraIdent {
    /// Parse the 42-byte identification header packet.
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 42 {
            return None;
        }
        let fps_numerator = u32::from_be_bytes(data[22..26].try_into().unwrap());
        let fps_denominator = u32::from_be_bytes(data[26..30].try_into().unwrap());
        // KFGSHIFT spans the last two header bytes.
        let granule_shift = ((data[40] & 0x03) << 3) | (data[41] >> 5);
        if fps_numerator == 0 || fps_denominator == 0 || granule_shift > 31 {
            return None;
        }
        Some(Self { version: (data[7], data[8], data[9]), fps_numerator, fps_denominator, granule_shift })
    }
}

/// Scanner for the block-referencing video codec.
///
/// Builds the per-packet read ranges during the page sweep and resolves
/// each packet's keyframe dependency at finalization through the
/// granulepos estimates gathered along the way.
pub struct TheoraScanner {
    serial: u32,
    config: IndexConfig,
    assembler: PacketAssembler,
    headers_read: u32,
    ident: Option<TheoraIdent>,
    /// `2^granule_shift - 1`, the largest representable backref
    max_backref: i64,
    /// Packets since the last keyframe, clamped to `max_backref`
    current_backref: i64,
    /// Offset of the page a continued packet must have started on, or -1
    continued_start_offset: i64,
    read_range: RangeMap,
    /// One granulepos estimate per read-range entry, used to resolve
    /// keyframe dependencies at finalization
    granposes: Vec<i64>,
    last_granulepos: i64,
    start_time_ms: i64,
    end_time_ms: i64,
}

impl TheoraScanner {
    pub fn new(serial: u32, config: IndexConfig) -> Self {
        Self {
            serial,
            config,
            assembler: PacketAssembler::new(),
            headers_read: 0,
            ident: None,
            max_backref: 0,
            current_backref: 0,
            continued_start_offset: -1,
            read_range: RangeMap::new(),
            granposes: Vec::new(),
            last_granulepos: -1,
            start_time_ms: -1,
            end_time_ms: -1,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Theora has 3 header packets: identification, comment and setup.
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

    pub fn granule_to_frame(&self, granulepos: i64) -> i64 {
        match &self.ident {
            Some(ident) => (granulepos >> ident.granule_shift) + (granulepos & self.max_backref),
            None => granulepos,
        }
    }

    /// Presentation end time of the frame at `granulepos`, in ms.
    pub fn granule_to_time_ms(&self, granulepos: i64) -> i64 {
        match &self.ident {
            Some(ident) => {
                (self.granule_to_frame(granulepos) + 1) * 1000 * ident.fps_denominator as i64
                    / ident.fps_numerator as i64
            }
            None => -1,
        }
    }

    fn frame_start_time_ms(&self, granulepos: i64) -> i64 {
        match &self.ident {
            Some(ident) => {
                self.granule_to_frame(granulepos) * 1000 * ident.fps_denominator as i64
                    / ident.fps_numerator as i64
            }
            None => -1,
        }
    }

    fn header_type(data: &[u8]) -> &'static str {
        match data.first() {
            Some(0x80) => "Ident",
            Some(0x81) => "Comment",
            Some(0x82) => "Setup",
            _ => "UNKNOWN",
        }
    }

    fn read_header(&mut self, packet: &Packet) -> Result<()> {
        let data = &packet.data;
        if data.len() < 7 || data[0] & 0x80 == 0 || &data[1..7] != b"theora" {
            return Err(Error::MalformedIdentHeader(self.serial));
        }
        if data[0] == 0x80 {
            self.ident =
                Some(TheoraIdent::parse(data).ok_or(Error::MalformedIdentHeader(self.serial))?);
        }
        self.headers_read += 1;
        if self.got_all_headers() {
            let ident = self.ident.as_ref().ok_or(Error::MalformedIdentHeader(self.serial))?;
            self.max_backref = (1i64 << ident.granule_shift) - 1;
            self.current_backref = self.max_backref;
        }
        if self.config.dump_packets {
            let ver = self.ident.map(|i| i.version).unwrap_or((0, 0, 0));
            println!(
                "[T] ver={}.{}.{} {} packet{}",
                ver.0,
                ver.1,
                ver.2,
                Self::header_type(data),
                if packet.eos { " eos" } else { "" }
            );
        }
        Ok(())
    }

    fn is_keyframe(packet: &Packet) -> bool {
        // Zero-length packets are duplicate frames.
        match packet.data.first() {
            Some(&first) => first & 0x80 == 0 && first & 0x40 == 0,
            None => false,
        }
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
            let Some(ident) = self.ident else { continue };

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
            let packet_granule = self.granule_to_frame(page.granule_pos) - packets_remaining;

            if Self::is_keyframe(packet) {
                self.current_backref = 0;
            } else {
                self.current_backref = (self.current_backref + 1).min(self.max_backref);
            }
            let gp_estimate = ((packet_granule - self.current_backref) << ident.granule_shift)
                | self.current_backref;

            // Only record a new entry when the byte range changes.
            if self.read_range.values().next_back() != Some(&range) {
                self.read_range.insert(packet_granule, range);
                self.granposes.push(gp_estimate);
            }
        }

        if completed != page.packets_completed() {
            warn!(
                "Fewer packets finished on page at offset {} of stream serialno={} than expected",
                page.offset, self.serial
            );
        }
        if completed > 0 || !page.continued {
            // If any packet finished here, or this page is not itself
            // continued, a continued packet on the next page must have
            // started on this one.
            self.continued_start_offset = page.offset as i64;
        }
        if page.granule_pos >= 0 {
            if self.got_all_headers() {
                if self.start_time_ms < 0 {
                    self.start_time_ms = self.frame_start_time_ms(page.granule_pos);
                }
                self.end_time_ms = self.granule_to_time_ms(page.granule_pos);
            }
            self.last_granulepos = page.granule_pos;
        }
        Ok(())
    }

    /// Resolve every recorded granulepos estimate into a decode range:
    /// from the start of its keyframe's read range to the end of its own.
    pub fn finalize_decode_range(&self) -> RangeMap {
        let mut decode = RangeMap::new();
        let Some(ident) = self.ident else { return decode };
        if self.read_range.is_empty() {
            warn!("Failed to produce an index for stream serialno={}", self.serial);
            return decode;
        }
        let first_key = *self.read_range.keys().next().unwrap();
        let mut last: Option<OffsetRange> = None;
        for &gp in &self.granposes {
            let key_granule = gp >> ident.granule_shift;
            let this_granule = key_granule + (gp & self.max_backref);
            if key_granule < first_key {
                continue;
            }
            let Some((_, key_range)) = predecessor(&self.read_range, key_granule) else { continue };
            let Some((&target_key, target_range)) = predecessor(&self.read_range, this_granule)
            else {
                continue;
            };
            let range = OffsetRange::new(key_range.start, target_range.end);
            if last != Some(range) {
                decode.insert(target_key, range);
                last = Some(range);
            }
        }
        decode
    }

    pub fn fisbone_info(&self) -> FisboneInfo {
        let ident = self.ident.as_ref();
        FisboneInfo {
            gran_numer: ident.map_or(0, |i| i.fps_numerator as i64),
            gran_denom: ident.map_or(0, |i| i.fps_denominator as i64),
            preroll: 0,
            granule_shift: ident.map_or(0, |i| i.granule_shift as u32),
            radix: 0,
            num_headers: 3,
            content_type: "video/theora".into(),
            name: "video/main".into(),
            role: "video/main".into(),
        }
    }
}
