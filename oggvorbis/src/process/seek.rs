//! Granule-based random access.
//!
//! ## Bisection
//!
//! Seeking never needs an index. The byte range after the header pages is
//! bisected for the last page of the selected stream whose granule position
//! lies strictly before the target. Granule positions never decrease within
//! a stream, so probing the first granule-bearing page at or after the
//! midpoint tells which half holds it.
//!
//! ## Pre-roll
//!
//! A Vorbis packet overlaps its predecessor, so the samples of the packet
//! following a landing page can only be reconstructed once the packet
//! completed last on that page has been decoded. That primer packet is decoded
//! and its output discarded; decoding then resumes exactly at the page's
//! granule position and the reader drops samples up to the target.
//!
//! ## Length
//!
//! The total length is the granule position of the selected stream's last
//! page, found by scanning the tail of the source in growing windows.
//! Truncated or corrupted tails end a window early instead of failing.

use log::{debug, trace};

use crate::process::decode::PacketDecoder;
use crate::process::demux::Demuxer;
use crate::process::header::{SetupState, is_audio_packet};
use crate::source::ByteSource;
use crate::utils::errors::{Error, Result};

/// First tail window of the length scan.
pub const TAIL_WINDOW: u64 = 64 * 1024;

/// Where decoding resumes after a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    /// No page precedes the target: decoding restarts at the first audio
    /// packet with a fresh decoder.
    StreamStart,
    /// The primer was decoded; the next decoded sample is at `granule`.
    Primed { granule: u64 },
}

/// A granule-bearing page of the selected stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mark {
    offset: u64,
    end: u64,
    granule: u64,
}

/// First granule-bearing page of the selected stream starting in `[from, before)`.
fn first_mark_from<S: ByteSource>(
    demux: &mut Demuxer<S>,
    from: u64,
    before: u64,
) -> Result<Option<Mark>> {
    let serial = demux.serial();
    demux.pages.reposition(from)?;

    loop {
        let page = match demux.pages.next_page() {
            Ok(Some(page)) => page,
            Ok(None) | Err(Error::UnexpectedEndOfInput) => return Ok(None),
            Err(e) => return Err(e),
        };

        if page.offset >= before {
            return Ok(None);
        }
        if page.serial != serial {
            continue;
        }
        if let Some(granule) = page.granule() {
            return Ok(Some(Mark {
                offset: page.offset,
                end: page.end_offset(),
                granule,
            }));
        }
    }
}

/// Last page of the selected stream with a granule position below `upper`.
fn bisect<S: ByteSource>(demux: &mut Demuxer<S>, upper: u64) -> Result<Option<Mark>> {
    let mut lo = demux.audio_start().data_start;
    let mut hi = demux.byte_len()?;
    let mut best = None;

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match first_mark_from(demux, mid, hi)? {
            Some(mark) if mark.granule < upper => {
                trace!("bisect [{lo}, {hi}): page {} at granule {}", mark.offset, mark.granule);
                lo = mark.end;
                best = Some(mark);
            }
            _ => hi = mid,
        }
    }

    Ok(best)
}

/// Positions the demuxer and decoder so that decoding reaches `target`.
///
/// `target` must be below the stream length. On success the reader still
/// has to drop the frames between the landing point and `target`.
pub fn seek_to<S, D>(
    demux: &mut Demuxer<S>,
    decoder: &mut D,
    setup: &SetupState,
    target: u64,
) -> Result<Landing>
where
    S: ByteSource,
    D: PacketDecoder,
{
    if !demux.is_seekable() {
        return Err(Error::NotSeekable);
    }

    let mut upper = target;
    loop {
        let Some(mark) = bisect(demux, upper)? else {
            debug!("seek to {target}: restarting from the first audio packet");
            demux.rewind_to_audio()?;
            decoder.reset();
            return Ok(Landing::StreamStart);
        };

        demux.reposition(mark.offset)?;
        demux.load_next_page()?;

        // packets continued from the previous page were dropped by the reposition
        let primer = demux
            .drain_queue()
            .filter(|packet| is_audio_packet(&packet.data))
            .last();

        match primer {
            Some(packet) if packet.granule == Some(mark.granule) => {
                decoder.reset();
                let mut discarded = Vec::new();
                decoder.decode(&packet.data, setup, &mut discarded)?;

                debug!(
                    "seek to {target}: primed at page {} (granule {}), {} frames to skip",
                    mark.offset,
                    mark.granule,
                    target - mark.granule
                );
                return Ok(Landing::Primed {
                    granule: mark.granule,
                });
            }
            _ => {
                trace!(
                    "page {} has no packet to prime from, searching below granule {}",
                    mark.offset, mark.granule
                );
                upper = mark.granule;
            }
        }
    }
}

/// Granule position of the last valid page of the selected stream.
///
/// The page reader is returned to its current offset afterwards; packet
/// assembly state is left untouched, so reading continues seamlessly.
pub fn last_granule<S: ByteSource>(demux: &mut Demuxer<S>) -> Result<Option<u64>> {
    let resume = demux.pages.offset();
    let found = scan_tail(demux);
    demux.pages.reposition(resume)?;
    found
}

fn scan_tail<S: ByteSource>(demux: &mut Demuxer<S>) -> Result<Option<u64>> {
    let serial = demux.serial();
    let floor = demux.audio_start().page_offset;
    let end = demux.byte_len()?;
    let mut window = TAIL_WINDOW;

    loop {
        let start = end.saturating_sub(window).max(floor);
        demux.pages.reposition(start)?;

        let last = last_granule_from(demux, serial)?;
        if last.is_some() || start == floor {
            debug!("length scan from {start}: last granule {last:?}");
            return Ok(last);
        }

        window = window.saturating_mul(2);
    }
}

/// Reads pages to the end, returning the last granule seen for `serial`.
///
/// A truncated or unreadable tail ends the scan early.
pub(crate) fn last_granule_from<S: ByteSource>(
    demux: &mut Demuxer<S>,
    serial: u32,
) -> Result<Option<u64>> {
    let mut last = None;

    loop {
        match demux.pages.next_page() {
            Ok(Some(page)) => {
                if page.serial == serial && page.granule().is_some() {
                    last = page.granule();
                }
            }
            Ok(None) => break,
            Err(e @ (Error::UnexpectedEndOfInput | Error::MalformedPage(_))) => {
                debug!("length scan stopped at {}: {e}", demux.pages.offset());
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(last)
}
