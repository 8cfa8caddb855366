//! Rounding, differencing and merging of the paired monotone sequences
//! behind a seek index.
//!
//! A `RangeMap` maps a frame granule to the absolute byte range that must
//! be fetched to decode that granule. Lookup semantics are "entry at the
//! largest key not above the target", so predecessor queries appear
//! throughout.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Pair of absolute byte offsets. `end == -1` means the end is not yet
/// known; every committed range has `end > start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffsetRange {
    pub start: i64,
    pub end: i64,
}

impl OffsetRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// True if `self` fully contains `other`.
    pub fn covers(&self, other: &OffsetRange) -> bool {
        self.start <= other.start && self.end >= other.end
    }
}

/// Ordered map from frame granule to byte range, keys strictly increasing.
pub type RangeMap = BTreeMap<i64, OffsetRange>;

/// Entry at the largest key `<= granule`.
pub fn predecessor(map: &RangeMap, granule: i64) -> Option<(&i64, &OffsetRange)> {
    map.range(..=granule).next_back()
}

/// Largest `end - start` over all ranges in the map.
pub fn max_window(map: &RangeMap) -> i64 {
    map.values().map(|r| r.end - r.start).max().unwrap_or(0)
}

/// Round the paired sequences down to multiples of their quanta.
///
/// Offsets are rounded down and granules up, so a decoded seek point never
/// starts past the data it promises and never claims a granule earlier
/// than it can serve. Two boundary corrections: the first granule is
/// rounded down, so no granule before the first seek point becomes
/// unseekable, and the last offset (the sentinel end appended by
/// [`split_rangemap`]) is rounded up, so every seek has an upper bound.
/// Entries whose rounding fails to strictly increase in both sequences are
/// dropped. The sentinel is never dropped: when its rounded granule
/// collides with the previous entry it is pushed up one quantum instead.
pub fn round_together(
    offsets: &[i64],
    granules: &[i64],
    offset_shift: u8,
    granule_shift: u8,
) -> (Vec<i64>, Vec<i64>) {
    debug_assert_eq!(offsets.len(), granules.len());
    let n = offsets.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let off_mask = (1i64 << offset_shift) - 1;
    let gp_mask = (1i64 << granule_shift) - 1;
    let floor_off = |v: i64| v & !off_mask;
    let ceil_off = |v: i64| (v + off_mask) & !off_mask;
    let floor_gp = |v: i64| v & !gp_mask;
    let ceil_gp = |v: i64| (v + gp_mask) & !gp_mask;

    let mut out_offsets = vec![floor_off(offsets[0])];
    let mut out_granules = vec![floor_gp(granules[0])];
    for i in 1..n {
        let last = i == n - 1;
        let off = if last { ceil_off(offsets[i]) } else { floor_off(offsets[i]) };
        let gp = ceil_gp(granules[i]);
        if last {
            // The sentinel carries the final upper bound and must survive.
            let prev = *out_granules.last().unwrap();
            let gp = if gp > prev { gp } else { prev + (gp_mask + 1) };
            debug_assert!(off > *out_offsets.last().unwrap());
            out_offsets.push(off);
            out_granules.push(gp);
        } else if off > *out_offsets.last().unwrap() && gp > *out_granules.last().unwrap() {
            out_offsets.push(off);
            out_granules.push(gp);
        }
    }
    (out_offsets, out_granules)
}

/// Shifted differences and initial value of an already-rounded sequence.
///
/// The shifted sequence must be strictly increasing: differences are
/// stored with 1 subtracted so they Rice-code as small non-negatives.
pub fn differentiate(values: &[i64], shift: u8) -> Result<(Vec<i64>, i64)> {
    if values.is_empty() {
        return Ok((Vec::new(), 0));
    }
    let init = values[0];
    let mut diffs = Vec::with_capacity(values.len() - 1);
    let mut prev = values[0] >> shift;
    for (i, &v) in values.iter().enumerate().skip(1) {
        let cur = v >> shift;
        if cur <= prev {
            return Err(Error::InvariantViolation(i));
        }
        diffs.push(cur - prev - 1);
        prev = cur;
    }
    Ok((diffs, init))
}

/// Invert [`differentiate`]: rebuild the absolute sequence from shifted
/// differences and the initial value.
pub fn integrate(diffs: &[i64], shift: u8, init: i64) -> Vec<i64> {
    let mut values = Vec::with_capacity(diffs.len() + 1);
    values.push(init);
    for &d in diffs {
        let prev = *values.last().unwrap();
        values.push(prev + ((d + 1) << shift));
    }
    values
}

/// Split a range map into parallel (offsets, granules) vectors.
///
/// Entries whose start does not strictly exceed the previously emitted
/// start are skipped. A sentinel `(granule = max_granule + 1, offset =
/// final end)` is appended so integration gives the last real range a
/// finite upper bound. Empty maps yield empty vectors.
pub fn split_rangemap(map: &RangeMap, max_granule: i64) -> (Vec<i64>, Vec<i64>) {
    let mut offsets = Vec::with_capacity(map.len() + 1);
    let mut granules = Vec::with_capacity(map.len() + 1);
    for (&granule, range) in map {
        if offsets.last().map_or(true, |&prev| range.start > prev) {
            offsets.push(range.start);
            granules.push(granule);
        }
    }
    if let Some(last) = map.values().next_back() {
        offsets.push(last.end);
        granules.push(max_granule + 1);
    }
    (offsets, granules)
}

/// Smallest `B >= 0` such that every source range ends at or before
/// `offsets[j+1] + B`, where `j` is the predecessor index of the range's
/// granule in `granules`.
///
/// This single slack is what a player must read past the next seek point
/// to be sure it has captured enough data.
pub fn measure_bmax(offsets: &[i64], granules: &[i64], map: &RangeMap) -> i64 {
    debug_assert_eq!(offsets.len(), granules.len());
    let mut b_max = 0;
    let mut j = 0;
    for (&granule, range) in map {
        if granules.is_empty() || granule < granules[0] {
            continue;
        }
        while j + 1 < granules.len() && granules[j + 1] <= granule {
            j += 1;
        }
        if j + 1 < offsets.len() {
            b_max = b_max.max(range.end - offsets[j + 1]);
        }
    }
    b_max.max(0)
}

/// Rebuild a range map from decoded vectors: each entry is
/// `granules[i] -> (offsets[i], offsets[i+1] + b_max)`.
pub fn merge_vectors(offsets: &[i64], granules: &[i64], b_max: i64) -> RangeMap {
    debug_assert_eq!(offsets.len(), granules.len());
    let mut map = RangeMap::new();
    for i in 0..offsets.len().saturating_sub(1) {
        map.insert(granules[i], OffsetRange::new(offsets[i], offsets[i + 1] + b_max));
    }
    map
}

/// True if every entry of `original` is covered by the entry of `cover`
/// at the predecessor of its granule.
pub fn is_cover_map(original: &RangeMap, cover: &RangeMap) -> bool {
    original.iter().all(|(&granule, range)| {
        predecessor(cover, granule).is_some_and(|(_, c)| c.covers(range))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(entries: &[(i64, i64, i64)]) -> RangeMap {
        entries.iter().map(|&(g, s, e)| (g, OffsetRange::new(s, e))).collect()
    }

    #[test]
    fn test_differentiate_integrate_roundtrip() {
        let values = vec![0, 1024, 4096, 65536];
        let (diffs, init) = differentiate(&values, 10).unwrap();
        assert_eq!(init, 0);
        assert_eq!(diffs, vec![0, 2, 59]);
        assert_eq!(integrate(&diffs, 10, init), values);
    }

    #[test]
    fn test_differentiate_rejects_collision() {
        // 100 and 150 shift down to the same value with shift 7.
        let values = vec![100, 150];
        assert!(matches!(differentiate(&values, 7), Err(Error::InvariantViolation(1))));
    }

    #[test]
    fn test_split_rangemap_sentinel() {
        let m = map_of(&[(0, 0, 1024), (30, 1024, 2048), (60, 2048, 3072)]);
        let (offsets, granules) = split_rangemap(&m, 60);
        assert_eq!(offsets, vec![0, 1024, 2048, 3072]);
        assert_eq!(granules, vec![0, 30, 60, 61]);
    }

    #[test]
    fn test_split_rangemap_skips_stale_starts() {
        let m = map_of(&[(0, 0, 1024), (10, 0, 2048), (20, 512, 2048), (30, 4096, 8192)]);
        let (offsets, granules) = split_rangemap(&m, 30);
        // Starts 0 and 512 do not strictly exceed the previous start.
        assert_eq!(offsets, vec![0, 4096, 8192]);
        assert_eq!(granules, vec![0, 30, 31]);
    }

    #[test]
    fn test_split_rangemap_empty() {
        let (offsets, granules) = split_rangemap(&RangeMap::new(), 99);
        assert!(offsets.is_empty() && granules.is_empty());
    }

    #[test]
    fn test_round_together_monotone() {
        let offsets = vec![0, 700, 1500, 70000, 70100];
        let granules = vec![3, 40, 90, 1000, 1001];
        let (ro, rg) = round_together(&offsets, &granules, 10, 4);
        assert_eq!(ro.len(), rg.len());
        assert!(ro.windows(2).all(|w| w[1] > w[0]));
        assert!(rg.windows(2).all(|w| w[1] > w[0]));
        // First granule floors, interior offsets floor, last offset ceils.
        assert_eq!(ro[0], 0);
        assert_eq!(rg[0], 0);
        assert_eq!(*ro.last().unwrap(), 70656); // 70100 up to 1 KiB
    }

    #[test]
    fn test_round_together_sentinel_survives() {
        // Sentinel granule 1001 rounds into the same 16-quantum as 1000;
        // it must be bumped, not dropped.
        let offsets = vec![0, 4096, 8192];
        let granules = vec![0, 1000, 1001];
        let (ro, rg) = round_together(&offsets, &granules, 10, 4);
        assert_eq!(ro.len(), 3);
        assert_eq!(rg.len(), 3);
        assert!(rg[2] > rg[1]);
    }

    #[test]
    fn test_measure_bmax_exact() {
        let m = map_of(&[(0, 0, 1024), (30, 1024, 2048), (60, 2048, 3072)]);
        let (offsets, granules) = split_rangemap(&m, 60);
        assert_eq!(measure_bmax(&offsets, &granules, &m), 0);
    }

    #[test]
    fn test_measure_bmax_slack() {
        // Range at granule 30 ends 100 bytes past the next seek offset.
        let m = map_of(&[(0, 0, 1024), (30, 1024, 2148), (60, 2048, 3072)]);
        let offsets = vec![0, 1024, 2048, 3072];
        let granules = vec![0, 30, 60, 61];
        assert_eq!(measure_bmax(&offsets, &granules, &m), 100);
    }

    #[test]
    fn test_merge_vectors() {
        let offsets = vec![0, 1024, 2048, 3072];
        let granules = vec![0, 30, 60, 61];
        let merged = merge_vectors(&offsets, &granules, 8);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[&0], OffsetRange::new(0, 1032));
        assert_eq!(merged[&60], OffsetRange::new(2048, 3080));
    }

    #[test]
    fn test_cover_map() {
        let original = map_of(&[(5, 100, 200), (25, 300, 400)]);
        let cover = map_of(&[(0, 64, 256), (20, 256, 512)]);
        assert!(is_cover_map(&original, &cover));
        let bad = map_of(&[(0, 128, 256), (20, 350, 512)]);
        assert!(!is_cover_map(&original, &bad));
    }

    #[test]
    fn test_predecessor() {
        let m = map_of(&[(10, 0, 1), (20, 1, 2)]);
        assert_eq!(predecessor(&m, 15).map(|(k, _)| *k), Some(10));
        assert_eq!(predecessor(&m, 20).map(|(k, _)| *k), Some(20));
        assert_eq!(predecessor(&m, 9), None);
    }
}
