use log::warn;

use crate::error::{Error, Result};
use crate::ogg::{Packet, PacketAssembler, Page};
use crate::ranges::{predecessor, OffsetRange, RangeMap};
use crate::skeleton::FisboneInfo;
use crate::IndexConfig;

/// Fields of the Kate identification header the indexer needs.
#[derive(Clone, Copy, Debug)]
pub struct KateIdent {
    pub version: (u8, u8),
    pub num_headers: u8,
    pub granule_shift: u8,
    pub gps_numerator: u32,
    pub gps_denominator: u32,
}

impl KateIdent {
    /// Parse the identification header packet.
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 32 {
            return None;
        }
        let num_headers = data[11];
        let granule_shift = data[15];
        let gps_numerator = u32::from_le_bytes(data[24..28].try_into().unwrap());
        let gps_denominator = u32::from_le_bytes(data[28..32].try_into().unwrap());
        if num_headers == 0 || gps_numerator == 0 || gps_denominator == 0 || granule_shift > 62 {
            return None;
        }
        Some(Self {
            version: (data[9], data[10]),
            num_headers,
            granule_shift,
            gps_numerator,
            gps_denominator,
        })
    }
}

/// One text event, with the timing triple embedded in its payload.
#[derive(Clone, Copy, Debug)]
struct KateFrame {
    /// Frame granule (base + offset) of the event
    granule: i64,
    /// Event start in granule units, from the payload
    start: i64,
    /// Event duration in granule units, from the payload
    duration: i64,
}

/// Scanner for the caption codec.
///
/// Caption packets carry an explicit backlink triple (start, duration,
/// backlink) in their payload; the keyframe of an event is the earliest
/// still-active event at its start time.
pub struct KateScanner {
    serial: u32,
    config: IndexConfig,
    assembler: PacketAssembler,
    headers_read: u32,
    ident: Option<KateIdent>,
    continued_start_offset: i64,
    read_range: RangeMap,
    frames: Vec<KateFrame>,
    last_granulepos: i64,
    start_time_ms: i64,
    end_time_ms: i64,
}

impl KateScanner {
    pub fn new(serial: u32, config: IndexConfig) -> Self {
        Self {
            serial,
            config,
            assembler: PacketAssembler::new(),
            headers_read: 0,
            ident: None,
            continued_start_offset: -1,
            read_range: RangeMap::new(),
            frames: Vec::new(),
            last_granulepos: -1,
            start_time_ms: -1,
            end_time_ms: -1,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Kate declares its header count in the identification header.
    pub fn got_all_headers(&self) -> bool {
        match &self.ident {
            Some(ident) => self.headers_read >= ident.num_headers as u32,
            None => false,
        }
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

    /// Collapse the base/offset split: the event time in granule units.
    pub fn granule_to_frame(&self, granulepos: i64) -> i64 {
        match &self.ident {
            Some(ident) => {
                let base = granulepos >> ident.granule_shift;
                let offset = granulepos - (base << ident.granule_shift);
                base + offset
            }
            None => granulepos,
        }
    }

    pub fn granule_to_time_ms(&self, granulepos: i64) -> i64 {
        match &self.ident {
            Some(_) => self.granule_units_to_ms(self.granule_to_frame(granulepos)),
            None => -1,
        }
    }

    fn granule_units_to_ms(&self, granules: i64) -> i64 {
        match &self.ident {
            Some(ident) => granules * 1000 * ident.gps_denominator as i64 / ident.gps_numerator as i64,
            None => -1,
        }
    }

    fn read_header(&mut self, packet: &Packet) -> Result<()> {
        let data = &packet.data;
        if data.len() < 8 || data[0] & 0x80 == 0 || &data[1..8] != b"kate\0\0\0" {
            return Err(Error::MalformedIdentHeader(self.serial));
        }
        if data[0] == 0x80 {
            self.ident =
                Some(KateIdent::parse(data).ok_or(Error::MalformedIdentHeader(self.serial))?);
        } else if self.ident.is_none() {
            return Err(Error::MalformedIdentHeader(self.serial));
        }
        self.headers_read += 1;
        if self.config.dump_packets {
            let ver = self.ident.map(|i| i.version).unwrap_or((0, 0));
            println!(
                "[K] ver={}.{} header 0x{:02x} packet{}",
                ver.0,
                ver.1,
                data[0],
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
            // Only the packet finishing the page has a known granulepos.
            if i + 1 != completed || page.granule_pos < 0 {
                continue;
            }

            let granule = self.granule_to_frame(page.granule_pos);
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
            if self.read_range.values().next_back() != Some(&range) {
                self.read_range.insert(granule, range);
            }

            // Text events carry start, duration and backlink at payload
            // bytes 1, 9 and 17.
            let data = &packet.data;
            if data.len() >= 25 && (data[0] == 0x00 || data[0] == 0x02) {
                let event_start = i64::from_le_bytes(data[1..9].try_into().unwrap());
                let duration = i64::from_le_bytes(data[9..17].try_into().unwrap());
                let frame = KateFrame { granule, start: event_start, duration };
                if self.config.dump_packets || self.config.dump_key_packets {
                    println!(
                        "[K] event time_ms=[{},{}] granulepos={}{}",
                        self.granule_units_to_ms(event_start),
                        self.granule_units_to_ms(event_start + duration),
                        page.granule_pos,
                        if packet.eos { " eos" } else { "" }
                    );
                }
                self.frames.push(frame);
                let event_end_ms = self.granule_units_to_ms(event_start + duration);
                if event_end_ms > self.end_time_ms {
                    self.end_time_ms = event_end_ms;
                }
            }
        }

        if completed > 0 || !page.continued {
            self.continued_start_offset = page.offset as i64;
        }
        if page.granule_pos >= 0 {
            if self.got_all_headers() {
                let time = self.granule_to_time_ms(page.granule_pos);
                if self.start_time_ms < 0 {
                    self.start_time_ms = time;
                }
                if time > self.end_time_ms {
                    self.end_time_ms = time;
                }
            }
            self.last_granulepos = page.granule_pos;
        }
        Ok(())
    }

    /// Earliest recorded event whose interval contains `start`, falling
    /// back to the event's own granule.
    fn keyframe_granule(&self, start: i64, own_granule: i64) -> i64 {
        self.frames
            .iter()
            .find(|f| f.duration > 0 && f.start <= start && start < f.start + f.duration)
            .map(|f| f.granule)
            .unwrap_or(own_granule)
    }

    /// Resolve events into decode ranges, thinning events that fall
    /// within the keypoint interval of the previously emitted one.
    pub fn finalize_decode_range(&self) -> RangeMap {
        let mut decode = RangeMap::new();
        if self.read_range.is_empty() {
            warn!("Failed to produce an index for stream serialno={}", self.serial);
            return decode;
        }
        let first_key = *self.read_range.keys().next().unwrap();
        let mut prev_emitted_ms = i64::MIN;
        let mut last: Option<OffsetRange> = None;
        for frame in &self.frames {
            let start_ms = self.granule_units_to_ms(frame.start);
            if prev_emitted_ms != i64::MIN && start_ms < prev_emitted_ms + self.config.keypoint_interval_ms
            {
                continue;
            }
            let key_granule = self.keyframe_granule(frame.start, frame.granule);
            if key_granule < first_key {
                continue;
            }
            let Some((_, key_range)) = predecessor(&self.read_range, key_granule) else { continue };
            let Some((&target_key, target_range)) = predecessor(&self.read_range, frame.granule)
            else {
                continue;
            };
            let range = OffsetRange::new(key_range.start, target_range.end);
            if last != Some(range) {
                decode.insert(target_key, range);
                last = Some(range);
            }
            prev_emitted_ms = start_ms;
        }
        decode
    }

    pub fn fisbone_info(&self) -> FisboneInfo {
        let ident = self.ident.as_ref();
        FisboneInfo {
            gran_numer: ident.map_or(0, |i| i.gps_numerator as i64),
            gran_denom: ident.map_or(0, |i| i.gps_denominator as i64),
            preroll: 0,
            granule_shift: ident.map_or(0, |i| i.granule_shift as u32),
            radix: 0,
            num_headers: ident.map_or(0, |i| i.num_headers as u32),
            content_type: "application/x-kate".into(),
            name: "text/caption".into(),
            role: "text/caption".into(),
        }
    }
}
