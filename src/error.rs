use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Page framing errors
    #[error("Input truncated inside a page at offset {offset}")]
    TruncatedInput { offset: u64 },

    #[error("Lost page sync at offset {offset}, skipped {skipped} bytes")]
    SyncLost { offset: u64, skipped: u64 },

    #[error("Page checksum mismatch at offset {offset}: expected 0x{expected:08x}, got 0x{found:08x}")]
    ChecksumMismatch { offset: u64, expected: u32, found: u32 },

    #[error("Unsupported page version {0} (only version 0 exists)")]
    UnsupportedPageVersion(u8),

    // Track errors
    #[error("Unknown codec in stream serialno={0}")]
    UnknownCodec(u32),

    #[error("Malformed identification header for stream serialno={0}")]
    MalformedIdentHeader(u32),

    // Skeleton / index errors
    #[error("Unsupported skeleton version {major}.{minor}")]
    UnsupportedIndexVersion { major: u16, minor: u16 },

    #[error("Malformed index packet: {0}")]
    MalformedIndex(String),

    #[error("Rounded sequence is not strictly increasing at element {0}")]
    InvariantViolation(usize),

    // Rewrite errors
    #[error("No pages found in input")]
    EmptyInput,
}

pub type Result<T> = std::result::Result<T, Error>;
