use super::crc;

/// First four bytes of every page.
pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";

/// Fixed header bytes before the segment table.
pub const HEADER_BASE_SIZE: usize = 27;

/// Maximum entries in a segment table.
pub const MAX_SEGMENTS: usize = 255;

const FLAG_CONTINUED: u8 = 0x01;
const FLAG_BOS: u8 = 0x02;
const FLAG_EOS: u8 = 0x04;

/// One framed page, plus the absolute file offset where it began.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub granule_pos: i64,
    pub serial: u32,
    pub sequence: u32,
    pub continued: bool,
    pub bos: bool,
    pub eos: bool,
    pub segment_table: Vec<u8>,
    pub body: Vec<u8>,
}

impl Page {
    pub fn header_len(&self) -> usize {
        HEADER_BASE_SIZE + self.segment_table.len()
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Total serialized length, header plus body.
    pub fn len(&self) -> usize {
        self.header_len() + self.body_len()
    }

    pub fn is_empty(&self) -> bool {
        self.segment_table.is_empty()
    }

    /// End offset of the page in the file it was read from.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.len() as u64
    }

    /// Number of packets that complete on this page (lacing values below
    /// 255; a zero lacing completes an empty packet).
    pub fn packets_completed(&self) -> usize {
        self.segment_table.iter().filter(|&&lace| lace < 255).count()
    }

    /// Serialize the page, computing the checksum over the zeroed field.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(CAPTURE_PATTERN);
        out.push(0); // stream structure version
        let mut flags = 0u8;
        if self.continued {
            flags |= FLAG_CONTINUED;
        }
        if self.bos {
            flags |= FLAG_BOS;
        }
        if self.eos {
            flags |= FLAG_EOS;
        }
        out.push(flags);
        out.extend_from_slice(&self.granule_pos.to_le_bytes());
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // checksum placeholder
        out.push(self.segment_table.len() as u8);
        out.extend_from_slice(&self.segment_table);
        out.extend_from_slice(&self.body);
        let sum = crc::checksum(&out);
        out[22..26].copy_from_slice(&sum.to_le_bytes());
        out
    }

    /// Parse a page from a complete, checksum-verified byte slice.
    ///
    /// `raw` must hold exactly one page; the caller (the page reader) has
    /// already established the framing.
    pub(crate) fn from_verified(raw: &[u8], offset: u64) -> Page {
        let flags = raw[5];
        let n_segments = raw[26] as usize;
        let segment_table = raw[HEADER_BASE_SIZE..HEADER_BASE_SIZE + n_segments].to_vec();
        let body = raw[HEADER_BASE_SIZE + n_segments..].to_vec();
        Page {
            offset,
            granule_pos: i64::from_le_bytes(raw[6..14].try_into().unwrap()),
            serial: u32::from_le_bytes(raw[14..18].try_into().unwrap()),
            sequence: u32::from_le_bytes(raw[18..22].try_into().unwrap()),
            continued: flags & FLAG_CONTINUED != 0,
            bos: flags & FLAG_BOS != 0,
            eos: flags & FLAG_EOS != 0,
            segment_table,
            body,
        }
    }
}
