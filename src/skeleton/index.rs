//! The compressed index packet: a 54-byte header followed by two
//! interleaved Rice-coded difference streams.

use super::*;
use crate::error::{Error, Result};
use crate::ranges::{
    differentiate, integrate, measure_bmax, merge_vectors, round_together, split_rangemap,
    RangeMap,
};
use crate::rice;

/// Spatial granularity of seek offsets: 64 KiB.
pub const DEFAULT_OFFSET_SHIFT: u8 = 16;

/// Extra temporal quantization on top of the codec's granule shift.
pub const GRANPOS_QUANT: u8 = 4;

/// An encoded index packet plus the sizes the summary reports.
#[derive(Clone, Debug)]
pub struct EncodedIndex {
    pub packet: Vec<u8>,
    /// Seek table size had it been stored as raw (offset, granule) pairs
    pub uncompressed_size: usize,
}

/// Encode one track's decode ranges into an index packet.
///
/// `max_frame_granule` keys the sentinel; it is the frame granule of the
/// last observed granule position. `last_granulepos` is stored raw in the
/// header for players that want the stream duration.
pub fn encode_index(
    serial: u32,
    decode_range: &RangeMap,
    last_granulepos: i64,
    max_frame_granule: i64,
    granule_shift: u8,
    offset_shift: u8,
) -> Result<EncodedIndex> {
    let (offsets, granules) = split_rangemap(decode_range, max_frame_granule);
    let (offsets, granules) = round_together(&offsets, &granules, offset_shift, granule_shift);
    let b_max = measure_bmax(&offsets, &granules, decode_range);
    let (offset_diffs, init_offset) = differentiate(&offsets, offset_shift)?;
    let (granule_diffs, init_granule) = differentiate(&granules, granule_shift)?;
    let offset_rice = rice::optimal_parameter(&offset_diffs);
    let granule_rice = rice::optimal_parameter(&granule_diffs);
    let body = rice::encode_alternating(&offset_diffs, &granule_diffs, offset_rice, granule_rice);

    let mut packet = vec![0u8; INDEX_SEEKPOINT_OFFSET + body.len()];
    packet[..INDEX_MAGIC.len()].copy_from_slice(INDEX_MAGIC);
    put_le_u32(&mut packet, INDEX_SERIALNO_OFFSET, serial);
    put_le_i64(&mut packet, INDEX_NUM_SEEKPOINTS_OFFSET, offsets.len() as i64);
    put_le_i64(&mut packet, INDEX_LAST_GRANPOS_OFFSET, last_granulepos);
    packet[INDEX_GRANULE_SHIFT_OFFSET] = granule_shift;
    packet[INDEX_GRANULE_RICE_OFFSET] = granule_rice;
    packet[INDEX_OFFSET_SHIFT_OFFSET] = offset_shift;
    packet[INDEX_OFFSET_RICE_OFFSET] = offset_rice;
    put_le_i64(&mut packet, INDEX_BMAX_OFFSET, b_max);
    put_le_i64(&mut packet, INDEX_INIT_OFFSET_OFFSET, init_offset);
    put_le_i64(&mut packet, INDEX_INIT_GRANULE_OFFSET, init_granule);
    packet[INDEX_SEEKPOINT_OFFSET..].copy_from_slice(&body);

    let uncompressed_size = INDEX_SEEKPOINT_OFFSET + decode_range.len() * 16;
    Ok(EncodedIndex { packet, uncompressed_size })
}

/// Decoded form of an index packet.
#[derive(Clone, Debug)]
pub struct DecodedIndex {
    pub serial: u32,
    pub last_granulepos: i64,
    pub b_max: i64,
    pub ranges: RangeMap,
}

/// Decode an index packet back into a range map.
///
/// Rejects packets failing the minimum-plausible-size check (a malicious
/// seek point count would otherwise drive a huge allocation) and bodies
/// that integrate to non-monotone sequences.
pub fn decode_index(packet: &[u8]) -> Result<DecodedIndex> {
    if !is_index_packet(packet) {
        return Err(Error::MalformedIndex("missing index magic".into()));
    }
    let serial = le_u32(packet, INDEX_SERIALNO_OFFSET);
    let num_seekpoints = le_i64(packet, INDEX_NUM_SEEKPOINTS_OFFSET);
    if num_seekpoints < 0 {
        return Err(Error::MalformedIndex(format!("negative seek point count {}", num_seekpoints)));
    }
    let n = num_seekpoints as u64;
    let min_packet_size = INDEX_SEEKPOINT_OFFSET as u64 + (n * MIN_SEEK_POINT_BITS).div_ceil(8);
    if (packet.len() as u64) < min_packet_size {
        return Err(Error::MalformedIndex(format!(
            "{} seek points cannot fit in {} bytes",
            n,
            packet.len()
        )));
    }

    let last_granulepos = le_i64(packet, INDEX_LAST_GRANPOS_OFFSET);
    let granule_shift = packet[INDEX_GRANULE_SHIFT_OFFSET];
    let granule_rice = packet[INDEX_GRANULE_RICE_OFFSET];
    let offset_shift = packet[INDEX_OFFSET_SHIFT_OFFSET];
    let offset_rice = packet[INDEX_OFFSET_RICE_OFFSET];
    if granule_shift > 62 || offset_shift > 62 || granule_rice > 63 || offset_rice > 63 {
        return Err(Error::MalformedIndex("shift or Rice parameter out of range".into()));
    }
    let b_max = le_i64(packet, INDEX_BMAX_OFFSET);
    let init_offset = le_i64(packet, INDEX_INIT_OFFSET_OFFSET);
    let init_granule = le_i64(packet, INDEX_INIT_GRANULE_OFFSET);

    if n == 0 {
        return Ok(DecodedIndex { serial, last_granulepos, b_max, ranges: RangeMap::new() });
    }

    let body = &packet[INDEX_SEEKPOINT_OFFSET..];
    let pairs = (n - 1) as usize;
    let (offset_diffs, granule_diffs) =
        rice::decode_alternating(body, pairs, offset_rice, granule_rice)?;
    let offsets = integrate(&offset_diffs, offset_shift, init_offset);
    let granules = integrate(&granule_diffs, granule_shift, init_granule);
    if offsets.windows(2).any(|w| w[1] <= w[0]) || granules.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::MalformedIndex("decoded sequences are not monotone".into()));
    }

    Ok(DecodedIndex {
        serial,
        last_granulepos,
        b_max,
        ranges: merge_vectors(&offsets, &granules, b_max),
    })
}
