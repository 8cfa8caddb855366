//! Re-reads an indexed file and checks that the stored index covers the
//! true decode ranges, and that the self-referential header fields match
//! reality.

use std::collections::BTreeMap;
use std::io::Read;

use log::{info, warn};

use crate::error::Result;
use crate::ogg::PageReader;
use crate::ranges::{is_cover_map, max_window};
use crate::scan::Scanner;
use crate::IndexConfig;

/// Validation outcome for one indexed track.
#[derive(Clone, Debug)]
pub struct TrackReport {
    pub serial: u32,
    pub kind: &'static str,
    /// Seek points stored in the index
    pub keypoints: usize,
    /// Largest byte window a stored seek point spans
    pub max_window: i64,
    /// Largest byte window of the freshly computed optimal index
    pub optimal_window: i64,
    /// The stored index covers every true decode range
    pub accurate: bool,
}

/// Validation outcome for a whole file.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    pub has_skeleton: bool,
    pub has_index: bool,
    pub content_offset_ok: bool,
    pub file_length_ok: bool,
    /// No content page arrived before the header region ended
    pub headers_ordered: bool,
    pub reported_content_offset: i64,
    pub actual_content_offset: i64,
    pub reported_file_length: i64,
    pub actual_file_length: i64,
    pub tracks: Vec<TrackReport>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.has_skeleton
            && self.content_offset_ok
            && self.file_length_ok
            && self.headers_ordered
            && self.tracks.iter().all(|t| t.accurate)
    }
}

/// Validate an indexed file.
pub fn validate<R: Read>(input: R, config: &IndexConfig) -> Result<ValidationReport> {
    let mut reader = PageReader::new(input);
    let mut scanners: BTreeMap<u32, Option<Scanner>> = BTreeMap::new();
    let mut report = ValidationReport { headers_ordered: true, ..Default::default() };

    while let Some(page) = reader.next_page()? {
        let serial = page.serial;
        if page.bos {
            let scanner = Scanner::create(&page, config);
            if scanner.is_none() {
                warn!("Unknown stream type, serialno={}", serial);
            }
            scanners.insert(serial, scanner);
        }

        let all_headers =
            scanners.values().all(|slot| slot.as_ref().map_or(true, |s| s.got_all_headers()));
        if !all_headers {
            report.actual_content_offset += page.len() as i64;
            if let Some(Some(scanner)) = scanners.get(&serial) {
                if scanner.got_all_headers() {
                    warn!(
                        "A content page appeared in stream serialno={} before all header pages were received",
                        serial
                    );
                    report.headers_ordered = false;
                }
            }
        }

        if let Some(slot) = scanners.get_mut(&serial) {
            if let Some(scanner) = slot {
                if let Err(e) = scanner.accept_page(&page) {
                    warn!("Stream serialno={} failed to scan: {}", serial, e);
                    *slot = None;
                }
            }
        }
    }
    report.actual_file_length = reader.bytes_read() as i64;

    let Some(skeleton) =
        scanners.values().flatten().find_map(|s| s.as_skeleton())
    else {
        warn!("No skeleton track, so no keyframe indexes");
        return Ok(report);
    };
    report.has_skeleton = true;
    report.has_index = !skeleton.index.is_empty();
    if !report.has_index {
        warn!("No tracks in skeleton index");
    }

    report.reported_content_offset = skeleton.content_offset();
    report.content_offset_ok = skeleton.content_offset() == report.actual_content_offset;
    if !report.content_offset_ok {
        warn!(
            "Skeleton header reports content offset {} but the content starts at {}",
            skeleton.content_offset(),
            report.actual_content_offset
        );
    }
    report.reported_file_length = skeleton.file_length();
    report.file_length_ok = skeleton.file_length() == report.actual_file_length;
    if !report.file_length_ok {
        warn!(
            "Skeleton header reports file length {} but the file is {} bytes",
            skeleton.file_length(),
            report.actual_file_length
        );
    }

    for (&serial, decoded) in &skeleton.index {
        let Some(Some(scanner)) = scanners.get(&serial) else {
            warn!("No decoder for indexed track serialno={}", serial);
            continue;
        };
        if decoded.ranges.is_empty() {
            warn!("{}/{} index has no keyframes", scanner.type_name(), serial);
            continue;
        }
        let optimal = scanner.finalize_decode_range();
        let accurate = is_cover_map(&optimal, &decoded.ranges);
        if accurate {
            info!(
                "{}/{} index is accurate with {} keypoints, max seek window of {} bytes (optimal {})",
                scanner.type_name(),
                serial,
                decoded.ranges.len(),
                max_window(&decoded.ranges),
                max_window(&optimal)
            );
        } else {
            warn!("{}/{} index is NOT accurate", scanner.type_name(), serial);
        }
        report.tracks.push(TrackReport {
            serial,
            kind: scanner.type_name(),
            keypoints: decoded.ranges.len(),
            max_window: max_window(&decoded.ranges),
            optimal_window: max_window(&optimal),
            accurate,
        });
    }

    Ok(report)
}
