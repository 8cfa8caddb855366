//! The two-pass rewrite: scan every page once, then splice a freshly
//! encoded skeleton track ahead of the original content.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};

use log::{info, warn};

use crate::error::{Error, Result};
use crate::ogg::{Page, PageReader};
use crate::scan::{Scanner, SkeletonScanner};
use crate::skeleton::SkeletonEncoder;
use crate::IndexConfig;

/// Statistics from one rewrite.
#[derive(Clone, Debug, Default)]
pub struct IndexStats {
    pub pages_read: u64,
    pub tracks_indexed: usize,
    /// Bytes the pre-existing skeleton track occupied
    pub old_index_bytes: u64,
    /// Bytes the new skeleton track occupies
    pub index_bytes: u64,
    /// Length of the written file
    pub file_length: u64,
    /// Offset of the first content page in the written file
    pub content_offset: u64,
}

/// Everything Pass A learns about the input file.
struct ScanState {
    scanners: BTreeMap<u32, Option<Scanner>>,
    /// Non-skeleton pages of the header region, in order
    header_pages: Vec<Page>,
    skeleton_serial: Option<u32>,
    old_skeleton_length: u64,
    /// Offset of the first page after the header region
    end_of_headers: u64,
    file_length: u64,
    pages_read: u64,
    /// Spans of skeleton pages found after the header region
    stray_skeleton: Vec<(u64, u64)>,
}

/// Drives the scan and emit passes over one file.
pub struct Rewriter {
    config: IndexConfig,
}

impl Rewriter {
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }

    /// Read an Ogg file from `input` and write the indexed version to
    /// `output`. Nothing is written until the whole input has been
    /// scanned.
    pub fn rewrite<R: Read + Seek, W: Write>(&self, mut input: R, mut output: W) -> Result<IndexStats> {
        let state = self.scan(&mut input)?;
        self.emit(&mut input, &mut output, &state)
    }

    fn scan<R: Read>(&self, input: &mut R) -> Result<ScanState> {
        let mut reader = PageReader::new(input);
        let mut state = ScanState {
            scanners: BTreeMap::new(),
            header_pages: Vec::new(),
            skeleton_serial: None,
            old_skeleton_length: 0,
            end_of_headers: 0,
            file_length: 0,
            pages_read: 0,
            stray_skeleton: Vec::new(),
        };
        let mut got_all_headers = false;
        let mut last_page_end = 0u64;

        while let Some(page) = reader.next_page()? {
            state.pages_read += 1;
            let serial = page.serial;
            let page_len = page.len() as u64;
            last_page_end = page.end_offset();

            if page.bos {
                let scanner = Scanner::create(&page, &self.config);
                if scanner.is_none() {
                    warn!("{}; the track is passed through unindexed", Error::UnknownCodec(serial));
                }
                if matches!(scanner, Some(Scanner::Skeleton(_))) {
                    state.skeleton_serial = Some(serial);
                }
                state.scanners.insert(serial, scanner);
            } else if !state.scanners.contains_key(&serial) {
                warn!(
                    "Page for stream serialno={} with no beginning-of-stream page; passed through unindexed",
                    serial
                );
                state.scanners.insert(serial, None);
            }

            if self.config.dump_pages {
                self.dump_page(&page, state.scanners.get(&serial).and_then(|s| s.as_ref()));
            }

            if let Some(slot) = state.scanners.get_mut(&serial) {
                if let Some(scanner) = slot {
                    if let Err(e) = scanner.accept_page(&page) {
                        warn!("Dropping stream serialno={} from the index: {}", serial, e);
                        *slot = None;
                    }
                }
            }

            if !got_all_headers {
                got_all_headers = state
                    .scanners
                    .values()
                    .all(|slot| slot.as_ref().map_or(true, |s| s.got_all_headers()));
                if state.skeleton_serial == Some(serial) {
                    state.old_skeleton_length += page_len;
                } else {
                    // Header pages of content tracks are rewritten
                    // verbatim; the skeleton track is rebuilt instead.
                    state.header_pages.push(page);
                }
                if got_all_headers {
                    state.end_of_headers = last_page_end;
                }
            } else if state.skeleton_serial == Some(serial) {
                state.stray_skeleton.push((last_page_end - page_len, page_len));
            }
        }

        state.file_length = reader.bytes_read();
        if state.pages_read == 0 {
            return Err(Error::EmptyInput);
        }
        if !got_all_headers {
            // Probably a corrupt file; treat everything read as headers.
            warn!("Couldn't successfully read all header packets");
            state.end_of_headers = state.file_length;
        }
        if last_page_end != state.file_length {
            warn!(
                "Page lengths sum to {} but the input is {} bytes",
                last_page_end, state.file_length
            );
        }
        Ok(state)
    }

    fn emit<R: Read + Seek, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
        state: &ScanState,
    ) -> Result<IndexStats> {
        let tracks: Vec<&Scanner> =
            state.scanners.values().flatten().filter(|s| s.is_indexable()).collect();
        let old_skeleton: Option<&SkeletonScanner> = state
            .skeleton_serial
            .and_then(|serial| state.scanners.get(&serial))
            .and_then(|slot| slot.as_ref())
            .and_then(|s| s.as_skeleton());
        let live_serials: Vec<u32> = state.scanners.keys().copied().collect();

        let stray_bytes: u64 = state.stray_skeleton.iter().map(|(_, len)| len).sum();
        let mut encoder = SkeletonEncoder::new(
            old_skeleton,
            &live_serials,
            state.file_length as i64,
            state.old_skeleton_length as i64,
            stray_bytes as i64,
            state.end_of_headers as i64,
        );
        encoder.encode(&tracks, old_skeleton, &self.config)?;

        // New skeleton bos page, the original header pages in their
        // original order, the remaining skeleton pages, then the content.
        output.write_all(&encoder.bos_page().serialize())?;
        for page in &state.header_pages {
            output.write_all(&page.serialize())?;
        }
        for page in encoder.remaining_pages() {
            output.write_all(&page.serialize())?;
        }
        copy_content(
            input,
            output,
            state.end_of_headers,
            state.file_length,
            &state.stray_skeleton,
        )?;
        output.flush()?;

        let index_bytes = encoder.track_length() as u64;
        info!(
            "Skeleton {}.{} track with keyframe indexes uses {} bytes, {:.2}% overhead",
            crate::skeleton::SKELETON_VERSION_MAJOR,
            crate::skeleton::SKELETON_VERSION_MINOR,
            index_bytes,
            index_bytes as f64 / encoder.file_length() as f64 * 100.0
        );

        Ok(IndexStats {
            pages_read: state.pages_read,
            tracks_indexed: tracks.len(),
            old_index_bytes: state.old_skeleton_length + stray_bytes,
            index_bytes,
            file_length: encoder.file_length() as u64,
            content_offset: encoder.content_offset() as u64,
        })
    }

    fn dump_page(&self, page: &Page, scanner: Option<&Scanner>) {
        let tag = scanner.map_or("?", |s| s.type_tag());
        let ends = page.packets_completed();
        let spans_out = page.segment_table.last().is_some_and(|&lace| lace == 255);
        let starts = (ends + spans_out as usize).saturating_sub(page.continued as usize);
        println!(
            "[{}] page @{} length={} granulepos={} end_time={}ms s={} packet_starts={} packet_ends={}",
            tag,
            page.offset,
            page.len(),
            page.granule_pos,
            scanner.map_or(-1, |s| s.granule_to_time_ms(page.granule_pos)),
            page.serial,
            starts,
            ends,
        );
    }
}

/// Copy `[from, to)` of the input to the output, skipping the given
/// already-sorted spans (pages of a stale skeleton track).
fn copy_content<R: Read + Seek, W: Write>(
    input: &mut R,
    output: &mut W,
    from: u64,
    to: u64,
    skip: &[(u64, u64)],
) -> Result<()> {
    input.seek(SeekFrom::Start(from))?;
    let mut pos = from;
    for &(offset, len) in skip.iter().filter(|(offset, _)| *offset >= from) {
        copy_exact(input, output, offset - pos)?;
        input.seek(SeekFrom::Current(len as i64))?;
        pos = offset + len;
    }
    if to > pos {
        copy_exact(input, output, to - pos)?;
    }
    Ok(())
}

fn copy_exact<R: Read, W: Write>(input: &mut R, output: &mut W, count: u64) -> Result<()> {
    let copied = std::io::copy(&mut input.by_ref().take(count), output)?;
    if copied != count {
        return Err(Error::TruncatedInput { offset: copied });
    }
    Ok(())
}
