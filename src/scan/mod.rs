//! Per-track scanners.
//!
//! One scanner exists per content track, created from its
//! beginning-of-stream page. A tagged enum replaces dynamic dispatch:
//! every codec exposes the same small capability set and the rewriter
//! treats them uniformly.

mod kate;
mod skeleton;
mod theora;
mod vorbis;

pub use kate::KateScanner;
pub use skeleton::SkeletonScanner;
pub use theora::TheoraScanner;
pub use vorbis::VorbisScanner;

use crate::error::Result;
use crate::ogg::Page;
use crate::ranges::RangeMap;
use crate::skeleton::{FisboneInfo, FISHEAD_MAGIC};
use crate::IndexConfig;

pub enum Scanner {
    Theora(TheoraScanner),
    Vorbis(VorbisScanner),
    Kate(KateScanner),
    Skeleton(SkeletonScanner),
}

impl Scanner {
    /// Sniff the codec from a beginning-of-stream page and create the
    /// matching scanner; `None` for unrecognized codecs.
    pub fn create(page: &Page, config: &IndexConfig) -> Option<Scanner> {
        debug_assert!(page.bos);
        let body = &page.body;
        if body.len() > 8 {
            if body[0] == 0x80 && &body[1..7] == b"theora" {
                return Some(Scanner::Theora(TheoraScanner::new(page.serial, config.clone())));
            }
            if body[0] == 0x01 && &body[1..7] == b"vorbis" {
                return Some(Scanner::Vorbis(VorbisScanner::new(page.serial, config.clone())));
            }
            if body[0] == 0x80 && &body[1..8] == b"kate\0\0\0" {
                return Some(Scanner::Kate(KateScanner::new(page.serial, config.clone())));
            }
            if &body[..8] == FISHEAD_MAGIC {
                return Some(Scanner::Skeleton(SkeletonScanner::new(page.serial)));
            }
        }
        None
    }

    pub fn serial(&self) -> u32 {
        match self {
            Scanner::Theora(s) => s.serial(),
            Scanner::Vorbis(s) => s.serial(),
            Scanner::Kate(s) => s.serial(),
            Scanner::Skeleton(s) => s.serial(),
        }
    }

    /// Single-letter tag for page dumps.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Scanner::Theora(_) => "T",
            Scanner::Vorbis(_) => "V",
            Scanner::Kate(_) => "K",
            Scanner::Skeleton(_) => "S",
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Scanner::Theora(_) => "Theora",
            Scanner::Vorbis(_) => "Vorbis",
            Scanner::Kate(_) => "Kate",
            Scanner::Skeleton(_) => "Skeleton",
        }
    }

    /// Content tracks get an index; the skeleton track does not.
    pub fn is_indexable(&self) -> bool {
        !matches!(self, Scanner::Skeleton(_))
    }

    pub fn accept_page(&mut self, page: &Page) -> Result<()> {
        match self {
            Scanner::Theora(s) => s.accept_page(page),
            Scanner::Vorbis(s) => s.accept_page(page),
            Scanner::Kate(s) => s.accept_page(page),
            Scanner::Skeleton(s) => s.accept_page(page),
        }
    }

    pub fn got_all_headers(&self) -> bool {
        match self {
            Scanner::Theora(s) => s.got_all_headers(),
            Scanner::Vorbis(s) => s.got_all_headers(),
            Scanner::Kate(s) => s.got_all_headers(),
            Scanner::Skeleton(s) => s.got_all_headers(),
        }
    }

    /// The finished granule-to-byte-range map. Empty for the skeleton
    /// track and for tracks that produced nothing.
    pub fn finalize_decode_range(&self) -> RangeMap {
        match self {
            Scanner::Theora(s) => s.finalize_decode_range(),
            Scanner::Vorbis(s) => s.finalize_decode_range(),
            Scanner::Kate(s) => s.finalize_decode_range(),
            Scanner::Skeleton(_) => RangeMap::new(),
        }
    }

    pub fn fisbone_info(&self) -> FisboneInfo {
        match self {
            Scanner::Theora(s) => s.fisbone_info(),
            Scanner::Vorbis(s) => s.fisbone_info(),
            Scanner::Kate(s) => s.fisbone_info(),
            Scanner::Skeleton(_) => FisboneInfo::default(),
        }
    }

    pub fn granule_to_frame(&self, granulepos: i64) -> i64 {
        match self {
            Scanner::Theora(s) => s.granule_to_frame(granulepos),
            Scanner::Vorbis(s) => s.granule_to_frame(granulepos),
            Scanner::Kate(s) => s.granule_to_frame(granulepos),
            Scanner::Skeleton(_) => granulepos,
        }
    }

    /// End time of the page at `granulepos` in milliseconds, or -1 when
    /// not yet known.
    pub fn granule_to_time_ms(&self, granulepos: i64) -> i64 {
        match self {
            Scanner::Theora(s) => s.granule_to_time_ms(granulepos),
            Scanner::Vorbis(s) => s.granule_to_time_ms(granulepos),
            Scanner::Kate(s) => s.granule_to_time_ms(granulepos),
            Scanner::Skeleton(_) => -1,
        }
    }

    pub fn last_granulepos(&self) -> i64 {
        match self {
            Scanner::Theora(s) => s.last_granulepos(),
            Scanner::Vorbis(s) => s.last_granulepos(),
            Scanner::Kate(s) => s.last_granulepos(),
            Scanner::Skeleton(_) => -1,
        }
    }

    pub fn start_time_ms(&self) -> i64 {
        match self {
            Scanner::Theora(s) => s.start_time_ms(),
            Scanner::Vorbis(s) => s.start_time_ms(),
            Scanner::Kate(s) => s.start_time_ms(),
            Scanner::Skeleton(_) => -1,
        }
    }

    pub fn end_time_ms(&self) -> i64 {
        match self {
            Scanner::Theora(s) => s.end_time_ms(),
            Scanner::Vorbis(s) => s.end_time_ms(),
            Scanner::Kate(s) => s.end_time_ms(),
            Scanner::Skeleton(_) => -1,
        }
    }

    pub fn as_skeleton(&self) -> Option<&SkeletonScanner> {
        match self {
            Scanner::Skeleton(s) => Some(s),
            _ => None,
        }
    }
}
