use std::collections::BTreeMap;

use log::warn;

use crate::error::{Error, Result};
use crate::ogg::{PacketAssembler, Page};
use crate::skeleton::index::{decode_index, DecodedIndex};
use crate::skeleton::{
    is_fishead_packet, is_fisbone_packet, is_index_packet, le_i64, le_u16, skeleton_version,
    FISHEAD_4_0_SIZE, FISHEAD_CONTENT_OFFSET_OFFSET, FISHEAD_FILE_LENGTH_OFFSET,
    FISHEAD_VERSION_MAJOR_OFFSET, FISHEAD_VERSION_MINOR_OFFSET, SKELETON_VERSION_MAJOR,
    SKELETON_VERSION_MINOR,
};

/// Scanner for a pre-existing skeleton track.
///
/// Collects the fishead and fisbone packets for reuse, decodes any stored
/// index packets (the rewriter recomputes them, the validator reads
/// them), and notes the self-referential fields to compare against
/// reality.
pub struct SkeletonScanner {
    serial: u32,
    assembler: PacketAssembler,
    got_all_headers: bool,
    version_major: u16,
    version_minor: u16,
    /// False when the version is outside the readable range; the track is
    /// then dropped wholesale and rebuilt fresh.
    usable: bool,
    file_length: i64,
    content_offset: i64,
    /// fishead first, then the fisbone packets, in stream order
    packets: Vec<Vec<u8>>,
    /// Stored indexes decoded from the track, by content serialno
    pub index: BTreeMap<u32, DecodedIndex>,
}

impl SkeletonScanner {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            assembler: PacketAssembler::new(),
            got_all_headers: false,
            version_major: 0,
            version_minor: 0,
            usable: false,
            file_length: 0,
            content_offset: 0,
            packets: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// The empty end-of-stream packet closes the skeleton track.
    pub fn got_all_headers(&self) -> bool {
        self.got_all_headers
    }

    pub fn version(&self) -> u32 {
        skeleton_version(self.version_major, self.version_minor)
    }

    /// True once a fishead of a readable version (3.0 through 4.0) has
    /// been seen.
    pub fn usable(&self) -> bool {
        self.usable
    }

    pub fn file_length(&self) -> i64 {
        self.file_length
    }

    pub fn content_offset(&self) -> i64 {
        self.content_offset
    }

    pub fn fishead(&self) -> Option<&[u8]> {
        self.packets.first().filter(|p| is_fishead_packet(p)).map(|p| p.as_slice())
    }

    pub fn fisbones(&self) -> &[Vec<u8>] {
        if self.fishead().is_some() {
            &self.packets[1..]
        } else {
            &[]
        }
    }

    pub fn accept_page(&mut self, page: &Page) -> Result<()> {
        debug_assert_eq!(page.serial, self.serial);
        for packet in self.assembler.submit(page) {
            let data = packet.data;
            if data.is_empty() && packet.eos {
                self.got_all_headers = true;
                continue;
            }
            if is_index_packet(&data) {
                // Don't keep index packets; they are recomputed. Decode
                // them for the validator's benefit.
                if self.version() != skeleton_version(SKELETON_VERSION_MAJOR, SKELETON_VERSION_MINOR)
                {
                    warn!(
                        "Encountered an index packet of version {}.{}; only {}.{} is readable, skipping it",
                        self.version_major,
                        self.version_minor,
                        SKELETON_VERSION_MAJOR,
                        SKELETON_VERSION_MINOR
                    );
                    continue;
                }
                match decode_index(&data) {
                    Ok(decoded) => {
                        self.index.insert(decoded.serial, decoded);
                    }
                    Err(e) => {
                        warn!("Index packet in skeleton serialno={} failed to parse: {}", self.serial, e)
                    }
                }
            } else if is_fishead_packet(&data) {
                self.version_major = le_u16(&data, FISHEAD_VERSION_MAJOR_OFFSET);
                self.version_minor = le_u16(&data, FISHEAD_VERSION_MINOR_OFFSET);
                let version = self.version();
                if version < skeleton_version(3, 0) || version > skeleton_version(4, 0) {
                    warn!(
                        "{}; rebuilding the index track from scratch",
                        Error::UnsupportedIndexVersion {
                            major: self.version_major,
                            minor: self.version_minor,
                        }
                    );
                    self.usable = false;
                } else {
                    self.usable = true;
                }
                // The length fields exist only in the 4.0 header.
                if data.len() >= FISHEAD_4_0_SIZE {
                    self.file_length = le_i64(&data, FISHEAD_FILE_LENGTH_OFFSET);
                    self.content_offset = le_i64(&data, FISHEAD_CONTENT_OFFSET_OFFSET);
                }
                self.packets.push(data);
            } else if is_fisbone_packet(&data) {
                self.packets.push(data);
            } else {
                warn!(
                    "Unrecognized {} byte packet in skeleton serialno={}",
                    data.len(),
                    self.serial
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ogg::PageWriter;
    use crate::skeleton::{build_fishead, build_fisbone, put_le_i64, put_le_u16, FisboneInfo};

    fn pages_for(packets: Vec<(Vec<u8>, bool, bool)>) -> Vec<Page> {
        let mut writer = PageWriter::new(11);
        let mut pages = Vec::new();
        for (data, bos, eos) in packets {
            pages.extend(writer.add_packet(&data, 0, bos, eos));
            if bos {
                pages.extend(writer.flush());
            }
        }
        pages.extend(writer.flush());
        pages
    }

    #[test]
    fn test_reads_v4_skeleton() {
        let mut fishead = build_fishead(512);
        put_le_i64(&mut fishead, FISHEAD_FILE_LENGTH_OFFSET, 99_999);
        let fisbone = build_fisbone(7, &FisboneInfo::default());
        let pages =
            pages_for(vec![(fishead, true, false), (fisbone, false, false), (Vec::new(), false, true)]);

        let mut scanner = SkeletonScanner::new(11);
        for page in &pages {
            scanner.accept_page(page).unwrap();
        }
        assert!(scanner.got_all_headers());
        assert!(scanner.usable());
        assert_eq!(scanner.version(), skeleton_version(4, 0));
        assert_eq!(scanner.file_length(), 99_999);
        assert_eq!(scanner.content_offset(), 512);
        assert_eq!(scanner.fisbones().len(), 1);
    }

    #[test]
    fn test_unreadable_version_marks_unusable() {
        let mut fishead = build_fishead(0);
        put_le_u16(&mut fishead, FISHEAD_VERSION_MAJOR_OFFSET, 5);
        let pages = pages_for(vec![(fishead, true, false), (Vec::new(), false, true)]);

        let mut scanner = SkeletonScanner::new(11);
        for page in &pages {
            scanner.accept_page(page).unwrap();
        }
        assert!(scanner.got_all_headers());
        assert!(!scanner.usable());
    }

    #[test]
    fn test_v3_fishead_leaves_lengths_zero() {
        let mut fishead = build_fishead(0);
        fishead.truncate(crate::skeleton::FISHEAD_3_0_SIZE);
        put_le_u16(&mut fishead, FISHEAD_VERSION_MAJOR_OFFSET, 3);
        let pages = pages_for(vec![(fishead, true, false), (Vec::new(), false, true)]);

        let mut scanner = SkeletonScanner::new(11);
        for page in &pages {
            scanner.accept_page(page).unwrap();
        }
        assert!(scanner.usable());
        assert_eq!(scanner.version(), skeleton_version(3, 0));
        assert_eq!(scanner.file_length(), 0);
        assert_eq!(scanner.content_offset(), 0);
    }
}
