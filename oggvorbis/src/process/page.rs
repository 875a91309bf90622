use log::{Level, trace};

use crate::log_or_err;
use crate::source::ByteSource;
use crate::utils::crc::PAGE_CRC;
use crate::utils::errors::{Error, Result};

/// Capture pattern marking the start of every page.
pub const CAPTURE_PATTERN: [u8; 4] = *b"OggS";

/// Size of the fixed page header preceding the segment table.
pub const HEADER_LEN: usize = 27;

/// Largest possible page: fixed header, 255 lacing values, 255 * 255 payload bytes.
pub const MAX_PAGE_LEN: usize = HEADER_LEN + 255 + 255 * 255;

/// Default number of bytes scanned for a valid page before giving up.
pub const DEFAULT_RESYNC_WINDOW: usize = 256 * 1024;

/// Granule position value of a page on which no packet completes.
pub const NO_GRANULE: u64 = u64::MAX;

const READ_CHUNK: usize = 16 * 1024;

/// Header type flags.
pub mod flags {
    /// First segment continues a packet from the previous page.
    pub const CONTINUED: u8 = 0x01;
    /// First page of a logical stream.
    pub const FIRST: u8 = 0x02;
    /// Last page of a logical stream.
    pub const LAST: u8 = 0x04;
}

/// One validated container page.
#[derive(Debug, Clone)]
pub struct Page {
    /// Absolute byte offset of the capture pattern.
    pub offset: u64,
    pub version: u8,
    pub header_type: u8,
    pub granule_position: u64,
    pub serial: u32,
    pub sequence: u32,
    pub checksum: u32,
    pub segment_table: Vec<u8>,
    pub body: Vec<u8>,
}

impl Page {
    pub(crate) fn from_bytes(bytes: &[u8], offset: u64) -> Self {
        let segments = bytes[26] as usize;
        let body_start = HEADER_LEN + segments;

        Self {
            offset,
            version: bytes[4],
            header_type: bytes[5],
            granule_position: le_u64(&bytes[6..14]),
            serial: le_u32(&bytes[14..18]),
            sequence: le_u32(&bytes[18..22]),
            checksum: le_u32(&bytes[22..26]),
            segment_table: bytes[HEADER_LEN..body_start].to_vec(),
            body: bytes[body_start..].to_vec(),
        }
    }

    pub fn is_continued(&self) -> bool {
        self.header_type & flags::CONTINUED != 0
    }

    pub fn is_first(&self) -> bool {
        self.header_type & flags::FIRST != 0
    }

    pub fn is_last(&self) -> bool {
        self.header_type & flags::LAST != 0
    }

    /// Granule position, or `None` when no packet completes on this page.
    pub fn granule(&self) -> Option<u64> {
        (self.granule_position != NO_GRANULE).then_some(self.granule_position)
    }

    /// Encoded size of the page in bytes.
    pub fn len(&self) -> usize {
        HEADER_LEN + self.segment_table.len() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Offset of the first byte after this page.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.len() as u64
    }
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Outcome of scanning a window of bytes for the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locate {
    /// A structurally valid page with a matching checksum starts `skip` bytes
    /// into the window and spans `len` bytes.
    Found { skip: usize, len: usize },
    /// The window ends inside a page candidate. The first `skip` bytes hold
    /// no page and may be discarded.
    NeedMore { skip: usize },
    /// No page starts within the lookahead limit.
    Exhausted,
}

/// Scans `window` for the first valid page starting before `max_lookahead`.
///
/// Candidates whose version is not zero or whose checksum does not match are
/// skipped one byte at a time.
pub fn locate_page(window: &[u8], max_lookahead: usize) -> Locate {
    for start in 0..window.len() {
        if start >= max_lookahead {
            return Locate::Exhausted;
        }

        let candidate = &window[start..];
        if candidate.len() < CAPTURE_PATTERN.len() {
            if CAPTURE_PATTERN.starts_with(candidate) {
                return Locate::NeedMore { skip: start };
            }
            continue;
        }

        if candidate[..4] != CAPTURE_PATTERN {
            continue;
        }

        if candidate.len() < HEADER_LEN {
            return Locate::NeedMore { skip: start };
        }

        if candidate[4] != 0 {
            continue;
        }

        let segments = candidate[26] as usize;
        if candidate.len() < HEADER_LEN + segments {
            return Locate::NeedMore { skip: start };
        }

        let body_len: usize = candidate[HEADER_LEN..HEADER_LEN + segments]
            .iter()
            .map(|&lacing| lacing as usize)
            .sum();
        let len = HEADER_LEN + segments + body_len;
        if candidate.len() < len {
            return Locate::NeedMore { skip: start };
        }

        let page = &candidate[..len];
        if PAGE_CRC.page_checksum(page) == le_u32(&page[22..26]) {
            return Locate::Found { skip: start, len };
        }
    }

    if window.len() > max_lookahead {
        Locate::Exhausted
    } else {
        Locate::NeedMore { skip: window.len() }
    }
}

/// Reads validated pages from a byte source.
///
/// Corrupted or foreign bytes between pages are skipped by forward
/// resynchronisation, bounded by the resync window.
#[derive(Debug)]
pub struct PageReader<S: ByteSource> {
    source: S,
    buffer: Vec<u8>,
    head: usize,
    offset: u64,
    eof: bool,
    scanned: usize,
    expect_resync: bool,
    resync_window: usize,
    pub(crate) fail_level: Level,
    pages_read: u64,
    bytes_skipped: u64,
}

impl<S: ByteSource> PageReader<S> {
    /// Creates a reader whose first byte is at the source's current position.
    pub fn new(mut source: S) -> Result<Self> {
        let offset = source.position()?;

        Ok(Self {
            source,
            buffer: Vec::with_capacity(READ_CHUNK * 2),
            head: 0,
            offset,
            eof: false,
            scanned: 0,
            expect_resync: false,
            resync_window: DEFAULT_RESYNC_WINDOW,
            fail_level: Level::Error,
            pages_read: 0,
            bytes_skipped: 0,
        })
    }

    pub fn set_fail_level(&mut self, level: Level) {
        self.fail_level = level;
    }

    pub fn set_resync_window(&mut self, window: usize) {
        self.resync_window = window.max(MAX_PAGE_LEN);
    }

    /// Absolute offset of the next unconsumed byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_seekable(&self) -> bool {
        self.source.is_seekable()
    }

    /// Valid pages returned so far, of any stream.
    pub fn pages_read(&self) -> u64 {
        self.pages_read
    }

    /// Bytes of invalid data skipped to resynchronise. Bytes passed over
    /// after a [`reposition`](Self::reposition) are not counted.
    pub fn bytes_skipped(&self) -> u64 {
        self.bytes_skipped
    }

    pub fn byte_len(&mut self) -> Result<u64> {
        if !self.source.is_seekable() {
            return Err(Error::NotSeekable);
        }
        Ok(self.source.byte_len()?)
    }

    /// Moves to an absolute byte offset, discarding buffered bytes.
    ///
    /// The next page may start anywhere after `offset`; bytes skipped to reach
    /// it are not reported as corruption.
    pub fn reposition(&mut self, offset: u64) -> Result<()> {
        if !self.source.is_seekable() {
            return Err(Error::NotSeekable);
        }

        self.source.seek(offset)?;
        self.buffer.clear();
        self.head = 0;
        self.offset = offset;
        self.eof = false;
        self.scanned = 0;
        self.expect_resync = true;

        Ok(())
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Reads the next valid page.
    ///
    /// Returns `Ok(None)` when the source ends exactly on a page boundary, or
    /// when no page follows a [`reposition`](Self::reposition).
    /// [`Error::UnexpectedEndOfInput`] means it ends inside a page (or before
    /// a full header could be read) and [`Error::MalformedPage`] that no valid
    /// page exists before the end of input or within the resync window.
    pub fn next_page(&mut self) -> Result<Option<Page>> {
        // a candidate cut off by the end of input was passed over
        let mut truncated = false;

        loop {
            let window = &self.buffer[self.head..];
            let lookahead = self.resync_window.saturating_sub(self.scanned);

            match locate_page(window, lookahead) {
                Locate::Found { skip, len } => {
                    let start = self.head + skip;
                    let page = Page::from_bytes(
                        &self.buffer[start..start + len],
                        self.offset + skip as u64,
                    );

                    let skipped = self.scanned + skip;
                    self.consume(skip + len);
                    self.scanned = 0;
                    self.pages_read += 1;

                    if skipped > 0 && !std::mem::take(&mut self.expect_resync) {
                        self.bytes_skipped += skipped as u64;
                        log_or_err!(
                            self,
                            Level::Warn,
                            Error::malformed_page(format!(
                                "skipped {skipped} bytes of invalid data before offset {}",
                                page.offset
                            ))
                        );
                    }
                    self.expect_resync = false;

                    trace!(
                        "page at {}: serial {:#010X}, seq {}, granule {:?}, {} segments, {} bytes",
                        page.offset,
                        page.serial,
                        page.sequence,
                        page.granule(),
                        page.segment_table.len(),
                        page.len()
                    );

                    return Ok(Some(page));
                }
                Locate::Exhausted => {
                    let at = self.offset;
                    return Err(Error::malformed_page(format!(
                        "no valid page within {} bytes of offset {at}",
                        self.resync_window
                    )));
                }
                Locate::NeedMore { skip } => {
                    let window_len = window.len();
                    let remaining = window_len - skip;
                    let examined = self.scanned + window_len;

                    if self.eof {
                        if window_len == 0 && self.scanned == 0 {
                            return Ok(None);
                        }

                        if remaining > 0 {
                            // a corrupted header may claim bytes past the end
                            truncated = true;
                            self.consume(skip + 1);
                            self.scanned += skip + 1;
                            continue;
                        }

                        self.consume(window_len);
                        self.scanned = 0;

                        if truncated || examined < HEADER_LEN {
                            return Err(Error::UnexpectedEndOfInput);
                        }
                        if std::mem::take(&mut self.expect_resync) {
                            trace!("no page after offset {}", self.offset - examined as u64);
                            return Ok(None);
                        }
                        return Err(Error::malformed_page(format!(
                            "{examined} bytes without a valid page before end of input"
                        )));
                    }

                    self.consume(skip);
                    self.scanned += skip;
                    self.fill()?;
                }
            }
        }
    }

    fn consume(&mut self, len: usize) {
        self.head += len;
        self.offset += len as u64;
    }

    fn fill(&mut self) -> Result<()> {
        if self.head > 0 {
            self.buffer.drain(..self.head);
            self.head = 0;
        }

        let filled = self.buffer.len();
        self.buffer.resize(filled + READ_CHUNK, 0);

        let read = loop {
            match self.source.read(&mut self.buffer[filled..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buffer.truncate(filled);
                    return Err(e.into());
                }
            }
        };

        self.buffer.truncate(filled + read);
        if read == 0 {
            self.eof = true;
        }

        Ok(())
    }
}
