//! Builds the replacement skeleton track: bos, fisbone and index
//! packets, paged and with the self-referential fields fixed up.

use log::{info, warn};
use rand::Rng;

use super::index::{encode_index, DEFAULT_OFFSET_SHIFT, GRANPOS_QUANT};
use super::*;
use crate::error::Result;
use crate::ogg::{Page, PageWriter};
use crate::scan::{Scanner, SkeletonScanner};
use crate::IndexConfig;

struct SkelPacket {
    data: Vec<u8>,
    eos: bool,
    is_index: bool,
}

/// Encodes the new skeleton track for one file.
///
/// Lengths are self-referential: the index stores absolute offsets into
/// a file whose size depends on the index. Packets are built against the
/// pre-index offsets, paged to measure the added length, corrected by
/// the length delta, and paged again (field widths are fixed, so the
/// second paging cannot change the length).
pub struct SkeletonEncoder {
    serial: u32,
    file_length: i64,
    /// Bytes the old skeleton occupied inside the header region
    old_skeleton_length: i64,
    /// Bytes of old skeleton pages found after the header region; they
    /// are dropped from the output but do not move the content offset
    stray_skeleton_length: i64,
    content_offset: i64,
    corrected_file_length: i64,
    corrected_content_offset: i64,
    packets: Vec<SkelPacket>,
    pages: Vec<Page>,
}

fn unique_serial(live_serials: &[u32]) -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let serial = rng.gen::<u32>();
        if !live_serials.contains(&serial) {
            return serial;
        }
    }
}

impl SkeletonEncoder {
    /// `file_length`, `old_skeleton_length` and `content_offset` describe
    /// the input file as scanned. The serial is inherited from an
    /// existing skeleton track, else chosen unique among live serials.
    pub fn new(
        old: Option<&SkeletonScanner>,
        live_serials: &[u32],
        file_length: i64,
        old_skeleton_length: i64,
        stray_skeleton_length: i64,
        content_offset: i64,
    ) -> Self {
        let serial = old.map(|s| s.serial()).unwrap_or_else(|| unique_serial(live_serials));
        Self {
            serial,
            file_length,
            old_skeleton_length,
            stray_skeleton_length,
            content_offset,
            corrected_file_length: file_length,
            corrected_content_offset: content_offset,
            packets: Vec::new(),
            pages: Vec::new(),
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Serialized length of the new skeleton track.
    pub fn track_length(&self) -> i64 {
        self.pages.iter().map(|p| p.len() as i64).sum()
    }

    /// File length after the rewrite.
    pub fn file_length(&self) -> i64 {
        self.corrected_file_length
    }

    /// Content offset after the rewrite.
    pub fn content_offset(&self) -> i64 {
        self.corrected_content_offset
    }

    pub fn bos_page(&self) -> &Page {
        &self.pages[0]
    }

    pub fn remaining_pages(&self) -> &[Page] {
        &self.pages[1..]
    }

    /// Build every packet, page the track, and fix the self-referential
    /// fields.
    pub fn encode(
        &mut self,
        tracks: &[&Scanner],
        old: Option<&SkeletonScanner>,
        config: &IndexConfig,
    ) -> Result<()> {
        self.packets.clear();
        self.add_bos_packet(old);
        self.add_fisbone_packets(tracks, old);
        self.construct_index_packets(tracks, config)?;
        self.add_eos_packet();
        self.construct_pages();
        self.correct_offsets();
        self.construct_pages();
        Ok(())
    }

    fn add_bos_packet(&mut self, old: Option<&SkeletonScanner>) {
        debug_assert!(self.packets.is_empty());
        let mut bos = build_fishead(self.content_offset);
        if let Some(original) = old.filter(|o| o.usable()).and_then(|o| o.fishead()) {
            // Carry over what the existing track declared; the version
            // and offset fields are overwritten below.
            let n = FISHEAD_3_0_SIZE.min(original.len());
            bos[..n].copy_from_slice(&original[..n]);
            put_le_u16(&mut bos, FISHEAD_VERSION_MAJOR_OFFSET, SKELETON_VERSION_MAJOR);
            put_le_u16(&mut bos, FISHEAD_VERSION_MINOR_OFFSET, SKELETON_VERSION_MINOR);
            put_le_i64(&mut bos, FISHEAD_FILE_LENGTH_OFFSET, 0);
            put_le_i64(&mut bos, FISHEAD_CONTENT_OFFSET_OFFSET, self.content_offset);
        }
        self.packets.push(SkelPacket { data: bos, eos: false, is_index: false });
    }

    fn find_track<'a>(tracks: &'a [&Scanner], serial: u32) -> Option<&'a Scanner> {
        tracks.iter().copied().find(|t| t.serial() == serial)
    }

    /// Promote one inherited fisbone packet to version 4.0: insert the
    /// radix field when coming from 3.x, rewrite the message-headers
    /// offset, keep existing headers verbatim and append any compulsory
    /// ones that are missing.
    fn update_fisbone(
        original: &[u8],
        tracks: &[&Scanner],
        old_version: u32,
    ) -> Option<Vec<u8>> {
        let serial = le_u32(original, FISBONE_SERIALNO_OFFSET);
        let Some(track) = Self::find_track(tracks, serial) else {
            warn!("Incoming fisbone packet for unknown stream serialno={}", serial);
            return None;
        };
        let info = track.fisbone_info();

        let is_version3 = old_version < skeleton_version(4, 0);
        let headers_offset =
            if is_version3 { FISBONE_3_0_HEADERS_OFFSET } else { FISBONE_4_0_HEADERS_OFFSET };
        if original.len() < headers_offset {
            warn!("Truncated fisbone packet for stream serialno={}", serial);
            return None;
        }
        let header_block = &original[headers_offset..];

        let text = String::from_utf8_lossy(header_block);
        let mut has_content_type = false;
        let mut has_name = false;
        let mut has_role = false;
        for line in text.split("\r\n") {
            let Some((id, _)) = line.split_once(':') else { continue };
            match id.to_ascii_lowercase().as_str() {
                "content-type" => has_content_type = true,
                "name" => has_name = true,
                "role" => has_role = true,
                _ => {}
            }
        }

        let mut packet = Vec::with_capacity(original.len() + 64);
        packet.extend_from_slice(&original[..headers_offset]);
        if is_version3 {
            // Splice in the radix field version 3 lacks.
            packet.truncate(FISBONE_RADIX_OFFSET);
            packet.extend_from_slice(&info.radix.to_le_bytes());
        }
        put_le_u32(&mut packet, FISBONE_HEADERS_OFFSET_FIELD, FISBONE_4_0_HEADERS_OFFSET as u32);
        packet.extend_from_slice(header_block);
        if !has_content_type {
            packet.extend_from_slice(format!("Content-Type: {}\r\n", info.content_type).as_bytes());
        }
        if !has_name {
            packet.extend_from_slice(format!("Name: {}\r\n", info.name).as_bytes());
        }
        if !has_role {
            packet.extend_from_slice(format!("Role: {}\r\n", info.role).as_bytes());
        }
        Some(packet)
    }

    fn add_fisbone_packets(&mut self, tracks: &[&Scanner], old: Option<&SkeletonScanner>) {
        let inherited = old
            .filter(|o| o.usable() && o.fisbones().len() == tracks.len());
        if let Some(old) = inherited {
            for original in old.fisbones() {
                if let Some(packet) = Self::update_fisbone(original, tracks, old.version()) {
                    self.packets.push(SkelPacket { data: packet, eos: false, is_index: false });
                }
            }
        } else {
            for track in tracks {
                let packet = build_fisbone(track.serial(), &track.fisbone_info());
                self.packets.push(SkelPacket { data: packet, eos: false, is_index: false });
            }
        }
    }

    fn construct_index_packets(&mut self, tracks: &[&Scanner], _config: &IndexConfig) -> Result<()> {
        for track in tracks {
            let decode_range = track.finalize_decode_range();
            let info = track.fisbone_info();
            let granule_shift = ((info.granule_shift as u8).saturating_add(GRANPOS_QUANT)).min(62);
            let last_granulepos = track.last_granulepos().max(0);
            let max_frame_granule = track.granule_to_frame(last_granulepos);
            let encoded = encode_index(
                track.serial(),
                &decode_range,
                last_granulepos,
                max_frame_granule,
                granule_shift,
                DEFAULT_OFFSET_SHIFT,
            )?;
            info!(
                "{}/{} index uses {} bytes, compresses to {} ({:.1}%), duration [{},{}] ms",
                track.type_name(),
                track.serial(),
                encoded.uncompressed_size,
                encoded.packet.len(),
                encoded.packet.len() as f64 / encoded.uncompressed_size as f64 * 100.0,
                track.start_time_ms(),
                track.end_time_ms(),
            );
            self.packets.push(SkelPacket { data: encoded.packet, eos: false, is_index: true });
        }
        Ok(())
    }

    fn add_eos_packet(&mut self) {
        self.packets.push(SkelPacket { data: Vec::new(), eos: true, is_index: false });
    }

    fn construct_pages(&mut self) {
        let mut writer = PageWriter::new(self.serial);
        let mut pages = Vec::new();
        let mut packets = self.packets.iter();
        if let Some(bos) = packets.next() {
            // The bos packet must be alone on the first page.
            pages.extend(writer.add_packet(&bos.data, 0, true, false));
            pages.extend(writer.flush());
        }
        for packet in packets {
            pages.extend(writer.add_packet(&packet.data, 0, false, packet.eos));
        }
        pages.extend(writer.flush());
        self.pages = pages;
    }

    fn correct_offsets(&mut self) {
        debug_assert!(!self.packets.is_empty());
        let new_file_length = self.file_length - self.old_skeleton_length
            - self.stray_skeleton_length
            + self.track_length();
        let content_diff = self.track_length() - self.old_skeleton_length;
        self.corrected_file_length = new_file_length;
        self.corrected_content_offset = self.content_offset + content_diff;

        // Every absolute offset in the index packets moves by the length
        // the new track adds (minus what the old one occupied).
        for packet in self.packets.iter_mut().filter(|p| p.is_index) {
            let existing = le_i64(&packet.data, INDEX_INIT_OFFSET_OFFSET);
            put_le_i64(&mut packet.data, INDEX_INIT_OFFSET_OFFSET, existing + content_diff);
        }

        let bos = &mut self.packets[0].data;
        put_le_i64(bos, FISHEAD_FILE_LENGTH_OFFSET, new_file_length);
        put_le_i64(bos, FISHEAD_CONTENT_OFFSET_OFFSET, self.corrected_content_offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_serial_avoids_live() {
        let live: Vec<u32> = (0..100).collect();
        for _ in 0..10 {
            assert!(!live.contains(&unique_serial(&live)));
        }
    }

    #[test]
    fn test_encode_without_tracks() {
        let mut encoder = SkeletonEncoder::new(None, &[1, 2], 10_000, 0, 0, 500);
        encoder.encode(&[], None, &IndexConfig::default()).unwrap();

        let track_length = encoder.track_length();
        assert!(track_length > 0);
        assert_eq!(encoder.file_length(), 10_000 + track_length);
        assert_eq!(encoder.content_offset(), 500 + track_length);

        let bos = encoder.bos_page();
        assert!(bos.bos);
        assert_eq!(bos.packets_completed(), 1);
        // The fishead on the wire carries the corrected lengths.
        let fishead = &bos.body;
        assert_eq!(le_i64(fishead, FISHEAD_FILE_LENGTH_OFFSET), encoder.file_length());
        assert_eq!(le_i64(fishead, FISHEAD_CONTENT_OFFSET_OFFSET), encoder.content_offset());
        // Fisbone-less track still ends with an eos page.
        assert!(encoder.remaining_pages().last().unwrap().eos);
    }

    #[test]
    fn test_update_fisbone_promotes_v3() {
        // A version 3 fisbone: 52 byte base, one existing header.
        let mut original = vec![0u8; FISBONE_3_0_HEADERS_OFFSET];
        original[..FISBONE_MAGIC.len()].copy_from_slice(FISBONE_MAGIC);
        put_le_u32(&mut original, FISBONE_HEADERS_OFFSET_FIELD, FISBONE_3_0_HEADERS_OFFSET as u32);
        put_le_u32(&mut original, FISBONE_SERIALNO_OFFSET, 7);
        original.extend_from_slice(b"Content-Type: video/theora\r\n");

        // A scanner for serial 7 supplies the replacement info; the
        // update path needs only its fisbone_info().
        let scanner = crate::scan::Scanner::Theora(crate::scan::TheoraScanner::new(7, IndexConfig::default()));
        let tracks = [&scanner];

        let updated =
            SkeletonEncoder::update_fisbone(&original, &tracks, skeleton_version(3, 0)).unwrap();
        // Radix inserted, headers offset now 56.
        assert_eq!(le_u32(&updated, FISBONE_HEADERS_OFFSET_FIELD), 56);
        assert_eq!(le_u32(&updated, FISBONE_RADIX_OFFSET), 0);
        let headers = String::from_utf8_lossy(&updated[FISBONE_4_0_HEADERS_OFFSET..]);
        // Existing header preserved verbatim, missing ones appended.
        assert!(headers.starts_with("Content-Type: video/theora\r\n"));
        assert_eq!(headers.matches("Content-Type:").count(), 1);
        assert!(headers.contains("Name: video/main\r\n"));
        assert!(headers.contains("Role: video/main\r\n"));
    }

    #[test]
    fn test_update_fisbone_unknown_serial_dropped() {
        let mut original = vec![0u8; FISBONE_4_0_HEADERS_OFFSET];
        original[..FISBONE_MAGIC.len()].copy_from_slice(FISBONE_MAGIC);
        put_le_u32(&mut original, FISBONE_SERIALNO_OFFSET, 404);
        assert!(SkeletonEncoder::update_fisbone(&original, &[], skeleton_version(4, 0)).is_none());
    }

    #[test]
    fn test_lengths_account_for_replaced_skeleton() {
        let mut encoder = SkeletonEncoder::new(None, &[], 50_000, 1000, 0, 600);
        encoder.encode(&[], None, &IndexConfig::default()).unwrap();
        let track_length = encoder.track_length();
        // Old skeleton removed, new track added.
        assert_eq!(encoder.file_length(), 50_000 - 1000 + track_length);
        assert_eq!(encoder.content_offset(), 600 + track_length - 1000);
    }
}
