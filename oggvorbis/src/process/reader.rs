use std::collections::VecDeque;

use log::{Level, debug, trace};

use crate::process::decode::{PacketDecoder, VorbisDecoder};
use crate::process::demux::Demuxer;
use crate::process::header::{Comments, Format, SetupState, is_audio_packet};
use crate::process::page::DEFAULT_RESYNC_WINDOW;
use crate::process::seek::{self, Landing};
use crate::source::ByteSource;
use crate::utils::errors::{Error, Result};

/// Tuning knobs for a [`Reader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Recoverable conditions at or above this level become errors.
    pub fail_level: Level,
    /// Bytes scanned for the next valid page before giving up.
    pub resync_window: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            fail_level: Level::Error,
            resync_window: DEFAULT_RESYNC_WINDOW,
        }
    }
}

/// Streaming Vorbis decoder over a byte source.
///
/// Positions and lengths are counted in frames (one sample per channel).
/// [`read`](Self::read) yields interleaved `f32` samples and may stop in the
/// middle of a frame; the next call continues with the following channel.
pub struct Reader<S: ByteSource, D: PacketDecoder = VorbisDecoder> {
    demux: Demuxer<S>,
    decoder: D,
    setup: SetupState,
    comments: Comments,
    channels: u64,
    length: Option<u64>,
    /// Samples (all channels) before the next one `read` yields.
    cursor: u64,
    ready: VecDeque<f32>,
    /// Decoded samples waiting for a granule position.
    staged: Vec<f32>,
    /// Granule position of the end of the committed samples.
    decoded_end: u64,
    /// Decoding started at the first audio packet and no samples were committed yet.
    leading: bool,
    /// Committed samples to drop before the cursor is reached.
    skip: u64,
    finished: bool,
    pending: Option<Error>,
    /// Error of the last failed seek, returned by every read until a seek succeeds.
    seek_error: Option<Error>,
}

impl<S: ByteSource> Reader<S> {
    /// Opens the first Vorbis stream of `source`.
    ///
    /// On a seekable source the total length is determined up front.
    pub fn new(source: S) -> Result<Self> {
        Self::with_options(source, ReaderOptions::default())
    }

    pub fn with_options(source: S, options: ReaderOptions) -> Result<Self> {
        Reader::with_decoder(source, VorbisDecoder::new(), options)
    }
}

impl<S: ByteSource, D: PacketDecoder> Reader<S, D> {
    /// Opens the first Vorbis stream of `source`, decoding packets with `decoder`.
    pub fn with_decoder(source: S, decoder: D, options: ReaderOptions) -> Result<Self> {
        let (mut demux, setup, comments) = Demuxer::open(source, &options)?;

        let length = if demux.is_seekable() {
            seek::last_granule(&mut demux)?
        } else {
            None
        };
        debug!(
            "opened stream {:#010X}: {} channels, {} Hz, length {length:?}",
            demux.serial(),
            setup.format.channels,
            setup.format.sample_rate
        );

        Ok(Self {
            demux,
            decoder,
            channels: setup.format.channels as u64,
            setup,
            comments,
            length,
            cursor: 0,
            ready: VecDeque::new(),
            staged: Vec::new(),
            decoded_end: 0,
            leading: true,
            skip: 0,
            finished: false,
            pending: None,
            seek_error: None,
        })
    }

    pub fn format(&self) -> Format {
        self.setup.format
    }

    pub fn comments(&self) -> &Comments {
        &self.comments
    }

    /// Total number of frames.
    ///
    /// Known from the start on seekable sources. Otherwise 0 until the last
    /// page of the stream has been decoded.
    pub fn length(&self) -> u64 {
        self.length.unwrap_or(0)
    }

    /// Frame index of the next sample [`read`](Self::read) yields.
    pub fn position(&self) -> u64 {
        self.cursor / self.channels
    }

    pub fn set_fail_level(&mut self, level: Level) {
        self.demux.set_fail_level(level);
    }

    /// Valid pages read so far, including those visited by seeks and the
    /// length scan.
    pub fn pages_read(&self) -> u64 {
        self.demux.pages.pages_read()
    }

    /// Bytes of corrupted or foreign data skipped while reading pages.
    pub fn bytes_skipped(&self) -> u64 {
        self.demux.pages.bytes_skipped()
    }

    pub fn into_inner(self) -> S {
        self.demux.into_inner()
    }

    fn limit(&self) -> Option<u64> {
        self.length.map(|length| length.saturating_mul(self.channels))
    }

    /// Fills `buf` with interleaved samples, returning how many were written.
    ///
    /// Fewer than `buf.len()` samples are returned only at the end of the
    /// stream. Once the position is at or past the end, every call returns
    /// [`Error::EndOfStream`], including calls with an empty buffer. An error
    /// hit while decoding is returned after the samples decoded before it.
    pub fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        if let Some(e) = &self.seek_error {
            return Err(e.clone());
        }
        if self.limit().is_some_and(|limit| self.cursor >= limit) {
            return Err(Error::EndOfStream);
        }
        if self.finished && self.ready.is_empty() {
            return Err(self.pending.take().unwrap_or(Error::EndOfStream));
        }

        let mut written = 0;
        while written < buf.len() {
            if self.ready.is_empty() {
                if self.finished {
                    break;
                }
                self.step();
                continue;
            }

            let mut n = (buf.len() - written).min(self.ready.len());
            if let Some(limit) = self.limit() {
                let room = limit.saturating_sub(self.cursor);
                if room == 0 {
                    self.ready.clear();
                    self.finished = true;
                    break;
                }
                n = n.min(room as usize);
            }

            for (dst, src) in buf[written..written + n].iter_mut().zip(self.ready.drain(..n)) {
                *dst = src;
            }
            written += n;
            self.cursor += n as u64;
        }

        if written == 0 && !buf.is_empty() {
            return Err(self.pending.take().unwrap_or(Error::EndOfStream));
        }

        Ok(written)
    }

    /// Moves to frame `target`.
    ///
    /// Targets at or past the end succeed; the next read reports
    /// [`Error::EndOfStream`]. If the seek itself fails, every read returns
    /// that error until another call succeeds.
    pub fn set_position(&mut self, target: u64) -> Result<()> {
        if !self.demux.is_seekable() {
            return Err(Error::NotSeekable);
        }

        self.ready.clear();
        self.staged.clear();
        self.pending = None;
        self.seek_error = None;
        self.skip = 0;
        self.cursor = target.saturating_mul(self.channels);
        self.finished = true;

        if target >= self.length() {
            debug!("seek to {target}: at or past the end ({})", self.length());
            return Ok(());
        }

        let landing = match seek::seek_to(&mut self.demux, &mut self.decoder, &self.setup, target) {
            Ok(landing) => landing,
            Err(e) => {
                debug!("seek to {target} failed: {e}");
                self.seek_error = Some(e.clone());
                return Err(e);
            }
        };

        match landing {
            Landing::StreamStart => {
                self.leading = true;
                self.decoded_end = 0;
                self.skip = self.cursor;
            }
            Landing::Primed { granule } => {
                self.leading = false;
                self.decoded_end = granule;
                self.skip = (target - granule).saturating_mul(self.channels);
            }
        }
        self.finished = false;

        Ok(())
    }

    fn step(&mut self) {
        if let Err(e) = self.decode_next() {
            self.flush_staged();
            self.finished = true;
            self.pending = Some(e);
        }
    }

    fn decode_next(&mut self) -> Result<()> {
        let Some(packet) = self.demux.next_packet()? else {
            debug!("stream ended without a last page");
            self.flush_staged();
            self.finished = true;
            return Ok(());
        };

        if is_audio_packet(&packet.data) {
            self.decoder
                .decode(&packet.data, &self.setup, &mut self.staged)?;
        } else {
            debug!("ignoring non-audio packet at page {}", packet.page_offset);
        }

        match packet.granule {
            Some(granule) => self.commit(granule, packet.last_in_stream),
            None if packet.last_in_stream => self.flush_staged(),
            None => {}
        }

        if packet.last_in_stream {
            self.finished = true;
        }

        Ok(())
    }

    /// Releases staged samples once a packet with a granule position arrives.
    fn commit(&mut self, granule: u64, last: bool) {
        let frames = self.staged.len() as u64 / self.channels;
        let mut from = 0;
        let mut keep = frames;

        if last {
            keep = frames.min(granule.saturating_sub(self.decoded_end));
            if keep < frames {
                debug!("dropping {} frames past the final granule {granule}", frames - keep);
            }
            self.length.get_or_insert(granule);
            self.leading = false;
            self.decoded_end += keep;
        } else if self.leading {
            if frames == 0 {
                return;
            }
            if frames > granule {
                debug!("dropping {} leading frames before granule 0", frames - granule);
                from = frames - granule;
                keep = granule;
            }
            self.leading = false;
            self.decoded_end = granule;
        } else {
            self.decoded_end += keep;
            if self.decoded_end != granule {
                trace!(
                    "granule {granule} disagrees with {} decoded frames",
                    self.decoded_end
                );
            }
        }

        self.release(from * self.channels, (from + keep) * self.channels);
    }

    fn flush_staged(&mut self) {
        let frames = self.staged.len() as u64 / self.channels;
        self.decoded_end += frames;
        self.release(0, frames * self.channels);
    }

    fn release(&mut self, from: u64, to: u64) {
        let samples = &self.staged[from as usize..to as usize];
        let dropped = samples.len().min(usize::try_from(self.skip).unwrap_or(usize::MAX));
        self.skip -= dropped as u64;
        self.ready.extend(&samples[dropped..]);
        self.staged.clear();
    }
}

impl<S: ByteSource, D: PacketDecoder> std::fmt::Debug for Reader<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("format", &self.setup.format)
            .field("length", &self.length)
            .field("position", &self.position())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::page::{PageReader, flags};
    use crate::process::scan::read_all;
    use crate::source::{Seekable, Sequential};
    use crate::utils::testing::{
        Fixture, FixtureOptions, MONO_OGG, Muxer, TestDecoder, assert_samples_eq, encode_page,
        fixture, stream_pages,
    };
    use std::cell::Cell;
    use std::io::{self, Cursor, Read, Seek, SeekFrom};
    use std::rc::Rc;

    type TestReader = Reader<Seekable<Cursor<Vec<u8>>>, TestDecoder>;

    fn seekable(bytes: Vec<u8>) -> Result<TestReader> {
        Reader::with_decoder(
            Seekable::new(Cursor::new(bytes)),
            TestDecoder::default(),
            ReaderOptions::default(),
        )
    }

    fn read_n<S: ByteSource, D: PacketDecoder>(reader: &mut Reader<S, D>, n: usize) -> Result<Vec<f32>> {
        let mut out = vec![0.0; n];
        let mut filled = 0;
        while filled < n {
            match reader.read(&mut out[filled..]) {
                Ok(count) => filled += count,
                Err(Error::EndOfStream) => break,
                Err(e) => return Err(e),
            }
        }
        out.truncate(filled);
        Ok(out)
    }

    fn read_to_end<S: ByteSource, D: PacketDecoder>(
        reader: &mut Reader<S, D>,
        chunk: usize,
    ) -> Result<Vec<f32>> {
        let mut out = Vec::new();
        let mut buf = vec![0.0; chunk];
        loop {
            match reader.read(&mut buf) {
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(Error::EndOfStream) => return Ok(out),
                Err(e) => return Err(e),
            }
        }
    }

    fn check_seeks(fx: &Fixture) -> Result<()> {
        let mut reader = seekable(fx.bytes.clone())?;
        let ch = fx.channels;
        let len = fx.length;

        let mut cases = vec![(0, 500), (len - 1, 1), (len / 2, 1000), (len - 300, 1000)];
        for granule in fx.page_granules.iter().flatten().filter(|&&g| g > 1 && g < len) {
            cases.extend([(granule - 1, 100), (*granule, 100), (granule + 1, 100)]);
        }

        for (start, count) in cases {
            reader.set_position(start)?;
            assert_eq!(reader.position(), start);

            let expected_end = (start + count).min(len) as usize * ch;
            let got = read_n(&mut reader, count as usize * ch)?;
            assert_samples_eq(&got, &fx.reference[start as usize * ch..expected_end]);
        }
        Ok(())
    }

    #[test]
    fn sequential_read_matches_reference() -> Result<()> {
        let fx = fixture(&FixtureOptions::default());
        let mut reader = seekable(fx.bytes.clone())?;

        assert_eq!(reader.length(), fx.length);
        assert_eq!(reader.format().channels, 1);
        assert_eq!(reader.format().sample_rate, 44100);

        let samples = read_to_end(&mut reader, 333)?;
        assert_samples_eq(&samples, &fx.reference);
        assert_eq!(reader.position(), fx.length);
        assert!(reader.pages_read() >= fx.page_offsets.len() as u64);
        assert_eq!(reader.bytes_skipped(), 0);
        Ok(())
    }

    #[test]
    fn hidden_random_access_decodes_the_same() -> Result<()> {
        let fx = fixture(&FixtureOptions {
            channels: 2,
            ..Default::default()
        });
        let mut reader = Reader::with_decoder(
            Sequential::new(Cursor::new(fx.bytes.clone())),
            TestDecoder::default(),
            ReaderOptions::default(),
        )?;

        assert_eq!(reader.length(), 0);
        let samples = read_to_end(&mut reader, 4096)?;
        assert_samples_eq(&samples, &fx.reference);
        assert_eq!(reader.length(), fx.length);
        assert!(matches!(reader.set_position(0), Err(Error::NotSeekable)));
        Ok(())
    }

    #[test]
    fn seek_then_read_matches_slice() -> Result<()> {
        check_seeks(&fixture(&FixtureOptions::default()))
    }

    #[test]
    fn seeks_in_multichannel_stream() -> Result<()> {
        check_seeks(&fixture(&FixtureOptions {
            channels: 3,
            packets: 60,
            ..Default::default()
        }))
    }

    #[test]
    fn trims_start_and_end() -> Result<()> {
        let fx = fixture(&FixtureOptions {
            start_trim: 100,
            end_trim: 30,
            page_limit: 600,
            ..Default::default()
        });

        let mut reader = seekable(fx.bytes.clone())?;
        assert_eq!(reader.length(), fx.length);
        assert_samples_eq(&read_to_end(&mut reader, 1000)?, &fx.reference);

        check_seeks(&fx)
    }

    #[test]
    fn packets_spanning_pages() -> Result<()> {
        // some pages start a packet they complete, others only continue one
        let mixed = fixture(&FixtureOptions {
            channels: 2,
            packets: 80,
            packet_bytes: 300,
            page_limit: 500,
            ..Default::default()
        });
        // no page both starts and completes a packet
        let spanning = fixture(&FixtureOptions {
            packets: 40,
            packet_bytes: 700,
            page_limit: 500,
            ..Default::default()
        });
        assert!(spanning.page_granules.iter().any(Option::is_none));

        for fx in [mixed, spanning] {
            let mut reader = seekable(fx.bytes.clone())?;
            assert_samples_eq(&read_to_end(&mut reader, 777)?, &fx.reference);
            check_seeks(&fx)?;
        }
        Ok(())
    }

    #[test]
    fn audio_on_setup_page() -> Result<()> {
        let fx = fixture(&FixtureOptions {
            packets: 40,
            audio_on_setup_page: true,
            ..Default::default()
        });

        let mut reader = seekable(fx.bytes.clone())?;
        assert_samples_eq(&read_to_end(&mut reader, 64)?, &fx.reference);
        check_seeks(&fx)
    }

    #[test]
    fn seek_past_end_is_end_of_stream() -> Result<()> {
        let fx = fixture(&FixtureOptions::default());
        let mut reader = seekable(fx.bytes.clone())?;

        for target in [fx.length, fx.length + 1, u64::MAX / 4] {
            reader.set_position(target)?;
            assert!(matches!(reader.read(&mut []), Err(Error::EndOfStream)));
            assert!(matches!(reader.read(&mut [0.0; 16]), Err(Error::EndOfStream)));
        }

        reader.set_position(0)?;
        assert!(matches!(reader.read(&mut []), Ok(0)));
        assert_samples_eq(&read_n(&mut reader, 10)?, &fx.reference[..10]);

        let _ = read_to_end(&mut reader, 512)?;
        assert!(matches!(reader.read(&mut []), Err(Error::EndOfStream)));
        Ok(())
    }

    #[test]
    fn reads_stop_mid_frame() -> Result<()> {
        let fx = fixture(&FixtureOptions {
            channels: 2,
            packets: 30,
            ..Default::default()
        });
        let mut reader = seekable(fx.bytes.clone())?;

        let first = read_n(&mut reader, 7)?;
        assert_eq!(reader.position(), 3);
        let rest = read_to_end(&mut reader, 3)?;

        assert_samples_eq(&[first, rest].concat(), &fx.reference);
        Ok(())
    }

    #[test]
    fn skips_multiplexed_stream() -> Result<()> {
        let opts = FixtureOptions {
            packets: 50,
            ..Default::default()
        };
        let (ours, reference, length) = stream_pages(&opts);

        let mut other = Muxer::new(0x0BAD_F00D, 200);
        other.packet(b"\x80not vorbis", 0);
        other.flush();
        for i in 0..60u64 {
            other.packet(&[0x55; 70], i * 10);
        }
        let theirs = other.finish();

        let mut bytes = theirs[0].clone();
        for (i, page) in ours.iter().enumerate() {
            bytes.extend_from_slice(page);
            if let Some(p) = theirs.get(i + 1) {
                bytes.extend_from_slice(p);
            }
        }

        let mut reader = seekable(bytes.clone())?;
        assert_eq!(reader.length(), length);
        assert_samples_eq(&read_to_end(&mut reader, 500)?, &reference);

        reader.set_position(length / 3)?;
        let got = read_n(&mut reader, 200)?;
        let start = (length / 3) as usize;
        assert_samples_eq(&got, &reference[start..start + 200]);
        Ok(())
    }

    #[test]
    fn truncated_tail_reports_error_after_samples() -> Result<()> {
        let fx = fixture(&FixtureOptions::default());
        let last = fx.page_offsets[fx.page_offsets.len() - 1] as usize;
        let mut reader = seekable(fx.bytes[..last + 20].to_vec())?;

        let expected = fx.page_granules[fx.page_granules.len() - 2].unwrap_or_default();
        assert_eq!(reader.length(), expected);

        let mut samples = Vec::new();
        let mut buf = [0.0; 256];
        let err = loop {
            match reader.read(&mut buf) {
                Ok(n) => samples.extend_from_slice(&buf[..n]),
                Err(e) => break e,
            }
        };
        assert_samples_eq(&samples, &fx.reference[..expected as usize]);
        assert!(matches!(
            err,
            Error::EndOfStream | Error::UnexpectedEndOfInput
        ));
        Ok(())
    }

    #[test]
    fn corruption_is_skipped_unless_strict() -> Result<()> {
        let fx = fixture(&FixtureOptions::default());
        let mut bytes = fx.bytes.clone();
        let victim = fx.page_offsets[6] as usize + 40;
        bytes[victim] ^= 0xFF;

        let mut reader = seekable(bytes.clone())?;
        let samples = read_to_end(&mut reader, 1024)?;
        assert!(!samples.is_empty());
        assert!(reader.bytes_skipped() > 0);

        let mut reader = seekable(bytes)?;
        reader.set_fail_level(Level::Warn);
        assert!(matches!(
            read_to_end(&mut reader, 1024),
            Err(Error::MalformedPage(_))
        ));
        Ok(())
    }

    #[test]
    fn empty_and_garbage_sources() {
        assert!(matches!(
            Reader::new(Seekable::new(Cursor::new(Vec::new()))),
            Err(Error::UnexpectedEndOfInput)
        ));

        let fx = fixture(&FixtureOptions {
            packets: 12,
            ..Default::default()
        });
        let mut inputs: Vec<Vec<u8>> = vec![
            b"\xff\xff\xff\xff\xff\xff\xc9\x03".to_vec(),
            b"OggS".to_vec(),
            vec![0u8; 100_000],
            encode_page(flags::FIRST, 0, 1, 0, &[255, 255], &[1u8; 510]),
            fx.bytes[..fx.bytes.len() / 2].to_vec(),
        ];

        // deterministic byte flips over a valid stream
        let mut state = 0x2545_f491_u32;
        for _ in 0..40 {
            let mut bytes = fx.bytes.clone();
            for _ in 0..4 {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                let at = state as usize % bytes.len();
                bytes[at] = (state >> 8) as u8;
            }
            inputs.push(bytes);
        }

        for bytes in inputs {
            if let Ok(mut reader) = Reader::new(Seekable::new(Cursor::new(bytes.clone()))) {
                let _ = read_to_end(&mut reader, 4096);
            }
            if let Ok(mut reader) = seekable(bytes) {
                let _ = read_to_end(&mut reader, 4096);
                let _ = reader.set_position(reader.length() / 2);
                let _ = read_to_end(&mut reader, 4096);
            }
        }
    }

    #[test]
    fn every_position_is_reachable() -> Result<()> {
        let fx = fixture(&FixtureOptions::default());
        let mut reader = seekable(fx.bytes.clone())?;

        let targets = (0..fx.length).step_by(97).chain([fx.length - 2, fx.length - 1]);
        for target in targets {
            reader.set_position(target)?;
            let got = read_n(&mut reader, 1)?;
            assert_samples_eq(&got, &fx.reference[target as usize..target as usize + 1]);
        }
        Ok(())
    }

    #[test]
    fn seeks_in_vorbis_stream() -> Result<()> {
        let (all, _) = read_all(Seekable::new(Cursor::new(MONO_OGG)))?;
        let mut reader = Reader::new(Seekable::new(Cursor::new(MONO_OGG)))?;
        let len = reader.length();
        assert_eq!(len as usize, all.len());

        let mut pages = PageReader::new(Seekable::new(Cursor::new(MONO_OGG)))?;
        let mut cases = vec![(0, 500), (len - 1, 1), (len / 2, 2000), (30_000, 10)];
        while let Some(page) = pages.next_page()? {
            match page.granule() {
                Some(g) if g > 1 && g < len => {
                    cases.extend([(g - 1, 100), (g, 100), (g + 1, 100)]);
                }
                _ => {}
            }
        }

        for (start, count) in cases {
            reader.set_position(start)?;
            let got = read_n(&mut reader, count)?;
            let end = (start as usize + count).min(all.len());
            assert_samples_eq(&got, &all[start as usize..end]);
        }

        reader.set_position(len)?;
        assert!(matches!(reader.read(&mut []), Err(Error::EndOfStream)));
        Ok(())
    }

    /// Cursor whose reads start failing once `fail` is set.
    struct Flaky {
        inner: Cursor<Vec<u8>>,
        fail: Rc<Cell<bool>>,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail.get() {
                return Err(io::Error::other("device went away"));
            }
            self.inner.read(buf)
        }
    }

    impl Seek for Flaky {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn failed_seek_fails_reads() -> Result<()> {
        let fx = fixture(&FixtureOptions::default());
        let fail = Rc::new(Cell::new(false));
        let source = Seekable::new(Flaky {
            inner: Cursor::new(fx.bytes.clone()),
            fail: fail.clone(),
        });
        let mut reader =
            Reader::with_decoder(source, TestDecoder::default(), ReaderOptions::default())?;
        assert_samples_eq(&read_n(&mut reader, 100)?, &fx.reference[..100]);

        let target = fx.length / 2;
        fail.set(true);
        assert!(matches!(reader.set_position(target), Err(Error::Io(_))));
        for _ in 0..2 {
            assert!(matches!(reader.read(&mut [0.0; 16]), Err(Error::Io(_))));
        }

        fail.set(false);
        reader.set_position(target)?;
        let start = target as usize;
        assert_samples_eq(&read_n(&mut reader, 50)?, &fx.reference[start..start + 50]);
        Ok(())
    }
}
