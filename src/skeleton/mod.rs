//! Skeleton track packet formats: fishead, fisbone, and the compressed
//! index packet. All multi-byte fields are little-endian.

pub mod encoder;
pub mod index;

pub use encoder::SkeletonEncoder;

pub const SKELETON_VERSION_MAJOR: u16 = 4;
pub const SKELETON_VERSION_MINOR: u16 = 0;

pub const fn skeleton_version(major: u16, minor: u16) -> u32 {
    ((major as u32) << 16) | minor as u32
}

pub const FISHEAD_MAGIC: &[u8; 8] = b"fishead\0";
pub const FISBONE_MAGIC: &[u8; 8] = b"fisbone\0";
pub const INDEX_MAGIC: &[u8; 6] = b"index\0";

pub const FISHEAD_3_0_SIZE: usize = 64;
pub const FISHEAD_4_0_SIZE: usize = 80;

// fishead field offsets
pub const FISHEAD_VERSION_MAJOR_OFFSET: usize = 8;
pub const FISHEAD_VERSION_MINOR_OFFSET: usize = 10;
pub const FISHEAD_PRES_TIME_DENOM_OFFSET: usize = 20;
pub const FISHEAD_BASE_TIME_DENOM_OFFSET: usize = 36;
pub const FISHEAD_FILE_LENGTH_OFFSET: usize = 64;
pub const FISHEAD_CONTENT_OFFSET_OFFSET: usize = 72;

// fisbone field offsets. Identical between versions 3 and 4 except radix,
// which version 3 lacks.
pub const FISBONE_BASE_SIZE: usize = 56;
pub const FISBONE_HEADERS_OFFSET_FIELD: usize = 8;
pub const FISBONE_SERIALNO_OFFSET: usize = 12;
pub const FISBONE_NUM_HEADERS_OFFSET: usize = 16;
pub const FISBONE_GRAN_NUMER_OFFSET: usize = 20;
pub const FISBONE_GRAN_DENOM_OFFSET: usize = 28;
pub const FISBONE_START_GRAN_OFFSET: usize = 36;
pub const FISBONE_PREROLL_OFFSET: usize = 44;
pub const FISBONE_GRAN_SHIFT_OFFSET: usize = 48;
pub const FISBONE_RADIX_OFFSET: usize = 52;
pub const FISBONE_3_0_HEADERS_OFFSET: usize = 52;
pub const FISBONE_4_0_HEADERS_OFFSET: usize = 56;

// index packet field offsets
pub const INDEX_SERIALNO_OFFSET: usize = 6;
pub const INDEX_NUM_SEEKPOINTS_OFFSET: usize = 10;
pub const INDEX_LAST_GRANPOS_OFFSET: usize = 18;
pub const INDEX_GRANULE_SHIFT_OFFSET: usize = 26;
pub const INDEX_GRANULE_RICE_OFFSET: usize = 27;
pub const INDEX_OFFSET_SHIFT_OFFSET: usize = 28;
pub const INDEX_OFFSET_RICE_OFFSET: usize = 29;
pub const INDEX_BMAX_OFFSET: usize = 30;
pub const INDEX_INIT_OFFSET_OFFSET: usize = 38;
pub const INDEX_INIT_GRANULE_OFFSET: usize = 46;
pub const INDEX_SEEKPOINT_OFFSET: usize = 54;

/// Minimum bits one coded seek point can occupy.
pub const MIN_SEEK_POINT_BITS: u64 = 2;

pub fn is_fishead_packet(data: &[u8]) -> bool {
    data.len() >= FISHEAD_3_0_SIZE && data.starts_with(FISHEAD_MAGIC)
}

pub fn is_fisbone_packet(data: &[u8]) -> bool {
    data.len() >= FISBONE_3_0_HEADERS_OFFSET && data.starts_with(FISBONE_MAGIC)
}

pub fn is_index_packet(data: &[u8]) -> bool {
    data.len() >= INDEX_SEEKPOINT_OFFSET && data.starts_with(INDEX_MAGIC)
}

pub(crate) fn le_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(data[at..at + 2].try_into().unwrap())
}

pub(crate) fn le_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(data[at..at + 4].try_into().unwrap())
}

pub(crate) fn le_i64(data: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(data[at..at + 8].try_into().unwrap())
}

pub(crate) fn put_le_u16(data: &mut [u8], at: usize, value: u16) {
    data[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_le_u32(data: &mut [u8], at: usize, value: u32) {
    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_le_i64(data: &mut [u8], at: usize, value: i64) {
    data[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// Codec-specific values a scanner contributes to its fisbone packet.
#[derive(Clone, Debug, Default)]
pub struct FisboneInfo {
    pub gran_numer: i64,
    pub gran_denom: i64,
    pub preroll: u32,
    pub granule_shift: u32,
    pub radix: u32,
    pub num_headers: u32,
    pub content_type: String,
    pub name: String,
    pub role: String,
}

impl FisboneInfo {
    /// The compulsory CRLF-delimited message header block.
    pub fn message_headers(&self) -> String {
        format!(
            "Content-Type: {}\r\nName: {}\r\nRole: {}\r\n",
            self.content_type, self.name, self.role
        )
    }
}

/// Build a fresh version 4.0 fishead packet. The file length and content
/// offset fields are filled in by the encoder's correction pass.
pub fn build_fishead(content_offset: i64) -> Vec<u8> {
    let mut packet = vec![0u8; FISHEAD_4_0_SIZE];
    packet[..FISHEAD_MAGIC.len()].copy_from_slice(FISHEAD_MAGIC);
    put_le_u16(&mut packet, FISHEAD_VERSION_MAJOR_OFFSET, SKELETON_VERSION_MAJOR);
    put_le_u16(&mut packet, FISHEAD_VERSION_MINOR_OFFSET, SKELETON_VERSION_MINOR);
    put_le_i64(&mut packet, FISHEAD_PRES_TIME_DENOM_OFFSET, 1000);
    put_le_i64(&mut packet, FISHEAD_BASE_TIME_DENOM_OFFSET, 1000);
    put_le_i64(&mut packet, FISHEAD_CONTENT_OFFSET_OFFSET, content_offset);
    packet
}

/// Build a fresh version 4.0 fisbone packet for one track.
pub fn build_fisbone(serial: u32, info: &FisboneInfo) -> Vec<u8> {
    let headers = info.message_headers();
    let mut packet = vec![0u8; FISBONE_BASE_SIZE + headers.len()];
    packet[..FISBONE_MAGIC.len()].copy_from_slice(FISBONE_MAGIC);
    put_le_u32(&mut packet, FISBONE_HEADERS_OFFSET_FIELD, FISBONE_4_0_HEADERS_OFFSET as u32);
    put_le_u32(&mut packet, FISBONE_SERIALNO_OFFSET, serial);
    put_le_u32(&mut packet, FISBONE_NUM_HEADERS_OFFSET, info.num_headers);
    put_le_i64(&mut packet, FISBONE_GRAN_NUMER_OFFSET, info.gran_numer);
    put_le_i64(&mut packet, FISBONE_GRAN_DENOM_OFFSET, info.gran_denom);
    put_le_i64(&mut packet, FISBONE_START_GRAN_OFFSET, 0);
    put_le_u32(&mut packet, FISBONE_PREROLL_OFFSET, info.preroll);
    put_le_u32(&mut packet, FISBONE_GRAN_SHIFT_OFFSET, info.granule_shift);
    put_le_u32(&mut packet, FISBONE_RADIX_OFFSET, info.radix);
    packet[FISBONE_BASE_SIZE..].copy_from_slice(headers.as_bytes());
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_fishead_layout() {
        let packet = build_fishead(4096);
        assert_eq!(packet.len(), FISHEAD_4_0_SIZE);
        assert!(is_fishead_packet(&packet));
        assert_eq!(le_u16(&packet, FISHEAD_VERSION_MAJOR_OFFSET), 4);
        assert_eq!(le_u16(&packet, FISHEAD_VERSION_MINOR_OFFSET), 0);
        assert_eq!(le_i64(&packet, FISHEAD_PRES_TIME_DENOM_OFFSET), 1000);
        assert_eq!(le_i64(&packet, FISHEAD_BASE_TIME_DENOM_OFFSET), 1000);
        assert_eq!(le_i64(&packet, FISHEAD_CONTENT_OFFSET_OFFSET), 4096);
        assert_eq!(le_i64(&packet, FISHEAD_FILE_LENGTH_OFFSET), 0);
    }

    #[test]
    fn test_build_fisbone_layout() {
        let info = FisboneInfo {
            gran_numer: 30,
            gran_denom: 1,
            preroll: 0,
            granule_shift: 6,
            radix: 0,
            num_headers: 3,
            content_type: "video/theora".into(),
            name: "video/main".into(),
            role: "video/main".into(),
        };
        let packet = build_fisbone(77, &info);
        assert!(is_fisbone_packet(&packet));
        assert_eq!(le_u32(&packet, FISBONE_HEADERS_OFFSET_FIELD), 56);
        assert_eq!(le_u32(&packet, FISBONE_SERIALNO_OFFSET), 77);
        assert_eq!(le_u32(&packet, FISBONE_GRAN_SHIFT_OFFSET), 6);
        let headers = std::str::from_utf8(&packet[FISBONE_BASE_SIZE..]).unwrap();
        assert!(headers.contains("Content-Type: video/theora\r\n"));
        assert!(headers.contains("Role: video/main\r\n"));
    }
}
