//! Synthetic streams for tests.
//!
//! Pages carry real framing and checksums and the header packets follow the
//! Vorbis layout. Audio packets are not Vorbis: each one holds the end of its
//! block on a decoder timeline, and [`TestDecoder`] turns that into
//! deterministic samples with the same lapping dependency a real decoder has.

use crate::process::decode::PacketDecoder;
use crate::process::header::{PACKET_COMMENT, PACKET_IDENTIFICATION, PACKET_SETUP, SIGNATURE, SetupState};
use crate::process::page::{CAPTURE_PATTERN, NO_GRANULE, Page, flags};
use crate::utils::crc::{CHECKSUM_RANGE, PAGE_CRC};
use crate::utils::errors::{Error, Result};

/// Real Vorbis stream: mono, 44100 Hz, 44100 frames over 13 audio pages.
pub const MONO_OGG: &[u8] = include_bytes!("../../testdata/mono.ogg");

pub fn encode_page(
    header_type: u8,
    granule: u64,
    serial: u32,
    sequence: u32,
    lacing: &[u8],
    body: &[u8],
) -> Vec<u8> {
    let mut page = Vec::with_capacity(27 + lacing.len() + body.len());
    page.extend_from_slice(&CAPTURE_PATTERN);
    page.push(0);
    page.push(header_type);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0; 4]);
    page.push(lacing.len() as u8);
    page.extend_from_slice(lacing);
    page.extend_from_slice(body);

    let crc = PAGE_CRC.page_checksum(&page);
    page[CHECKSUM_RANGE].copy_from_slice(&crc.to_le_bytes());
    page
}

pub fn page(
    header_type: u8,
    granule: u64,
    serial: u32,
    sequence: u32,
    lacing: &[u8],
    body: &[u8],
) -> Page {
    Page::from_bytes(
        &encode_page(header_type, granule, serial, sequence, lacing, body),
        0,
    )
}

fn preamble(packet_type: u8) -> Vec<u8> {
    let mut packet = vec![packet_type];
    packet.extend_from_slice(&SIGNATURE);
    packet
}

pub fn ident_packet(channels: u8, sample_rate: u32) -> Vec<u8> {
    let mut packet = preamble(PACKET_IDENTIFICATION);
    packet.extend_from_slice(&0u32.to_le_bytes());
    packet.push(channels);
    packet.extend_from_slice(&sample_rate.to_le_bytes());
    packet.extend_from_slice(&0i32.to_le_bytes());
    packet.extend_from_slice(&128_000i32.to_le_bytes());
    packet.extend_from_slice(&(-1i32).to_le_bytes());
    packet.push(0xB8);
    packet.push(0x01);
    packet
}

pub fn comment_packet(vendor: &str, comments: &[&str]) -> Vec<u8> {
    let mut packet = preamble(PACKET_COMMENT);
    packet.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    packet.extend_from_slice(vendor.as_bytes());
    packet.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for comment in comments {
        packet.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        packet.extend_from_slice(comment.as_bytes());
    }
    packet.push(0x01);
    packet
}

pub fn setup_packet() -> Vec<u8> {
    let mut packet = preamble(PACKET_SETUP);
    packet.push(1);
    packet.extend_from_slice(&[0x42, 0x43, 0x56]);
    packet.extend_from_slice(&[0x10, 0x00, 0x20, 0x00]);
    packet
}

/// Audio packet whose block ends at `end` on the decoder timeline.
pub fn audio_packet(end: u64, filler: usize) -> Vec<u8> {
    let mut packet = vec![0x00];
    packet.extend_from_slice(&end.to_le_bytes());
    packet.extend((0..filler).map(|i| (i % 251) as u8));
    packet
}

/// Sample value produced for timeline frame `t` on channel `ch`.
pub fn sample_value(t: u64, ch: usize) -> f32 {
    ((t * 31 + ch as u64 * 7) % 2001) as f32 / 1000.0 - 1.0
}

/// Decoder for [`audio_packet`]s.
///
/// The first packet after a reset yields nothing; every later packet yields
/// the frames between the previous packet's end and its own.
#[derive(Debug, Default)]
pub struct TestDecoder {
    prev_end: Option<u64>,
    pub packets: usize,
}

impl PacketDecoder for TestDecoder {
    fn decode(&mut self, packet: &[u8], setup: &SetupState, out: &mut Vec<f32>) -> Result<()> {
        if packet.len() < 9 || packet[0] != 0 {
            return Err(Error::Decode(format!("not an audio packet ({} bytes)", packet.len())));
        }

        let end = u64::from_le_bytes([
            packet[1], packet[2], packet[3], packet[4], packet[5], packet[6], packet[7], packet[8],
        ]);
        if let Some(prev) = self.prev_end {
            for t in prev..end {
                for ch in 0..setup.format.channels as usize {
                    out.push(sample_value(t, ch));
                }
            }
        }
        self.prev_end = Some(end);
        self.packets += 1;

        Ok(())
    }

    fn reset(&mut self) {
        self.prev_end = None;
    }
}

struct RawPage {
    header_type: u8,
    granule: u64,
    lacing: Vec<u8>,
    body: Vec<u8>,
}

/// Lays packets of one logical stream out into pages.
pub struct Muxer {
    serial: u32,
    page_limit: usize,
    pages: Vec<RawPage>,
    lacing: Vec<u8>,
    body: Vec<u8>,
    granule: u64,
    continued: bool,
}

impl Muxer {
    /// `page_limit` caps the payload of a page; a packet crossing it
    /// continues on the next page.
    pub fn new(serial: u32, page_limit: usize) -> Self {
        Self {
            serial,
            page_limit: page_limit.max(1),
            pages: Vec::new(),
            lacing: Vec::new(),
            body: Vec::new(),
            granule: NO_GRANULE,
            continued: false,
        }
    }

    pub fn packet(&mut self, data: &[u8], granule: u64) {
        let mut rest = data;
        let mut first_segment = true;
        loop {
            if self.lacing.len() == 255 || self.body.len() >= self.page_limit {
                self.emit(!first_segment);
            }
            first_segment = false;

            let take = rest.len().min(255);
            self.lacing.push(take as u8);
            self.body.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if take < 255 {
                break;
            }
        }
        self.granule = granule;
    }

    /// Ends the current page after the last packet.
    pub fn flush(&mut self) {
        if !self.lacing.is_empty() {
            self.emit(false);
        }
    }

    fn emit(&mut self, mid_packet: bool) {
        let mut header_type = 0;
        if self.continued {
            header_type |= flags::CONTINUED;
        }
        if self.pages.is_empty() {
            header_type |= flags::FIRST;
        }

        self.pages.push(RawPage {
            header_type,
            granule: std::mem::replace(&mut self.granule, NO_GRANULE),
            lacing: std::mem::take(&mut self.lacing),
            body: std::mem::take(&mut self.body),
        });
        self.continued = mid_packet;
    }

    /// Encoded pages, the last one flagged as end of stream.
    pub fn finish(mut self) -> Vec<Vec<u8>> {
        self.flush();
        if let Some(last) = self.pages.last_mut() {
            last.header_type |= flags::LAST;
        }

        self.pages
            .iter()
            .enumerate()
            .map(|(seq, p)| {
                encode_page(p.header_type, p.granule, self.serial, seq as u32, &p.lacing, &p.body)
            })
            .collect()
    }
}

/// Shape of a synthetic stream.
#[derive(Debug, Clone)]
pub struct FixtureOptions {
    pub serial: u32,
    pub channels: u8,
    pub sample_rate: u32,
    pub packets: usize,
    /// Filler bytes per audio packet, varied a little per packet.
    pub packet_bytes: usize,
    pub page_limit: usize,
    /// Frames decoded ahead of the first granule and trimmed away.
    pub start_trim: u64,
    /// Frames decoded past the final granule and trimmed away.
    pub end_trim: u64,
    /// Put the first audio packets on the same page as the setup header.
    pub audio_on_setup_page: bool,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            serial: 0x1234_5678,
            channels: 1,
            sample_rate: 44100,
            packets: 120,
            packet_bytes: 60,
            page_limit: 400,
            start_trim: 0,
            end_trim: 0,
            audio_on_setup_page: false,
        }
    }
}

/// An encoded stream plus the samples a correct decode must produce.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub bytes: Vec<u8>,
    pub reference: Vec<f32>,
    pub length: u64,
    pub channels: usize,
    /// Offsets at which each page starts.
    pub page_offsets: Vec<u64>,
    /// Granule position of each page, `None` when no packet completes on it.
    pub page_granules: Vec<Option<u64>>,
}

/// Alternating short and long blocks.
fn block_frames(k: usize) -> u64 {
    if k % 3 == 0 { 256 } else { 64 }
}

pub fn stream_pages(opts: &FixtureOptions) -> (Vec<Vec<u8>>, Vec<f32>, u64) {
    let first_end = 1000;
    let mut ends = vec![first_end];
    for k in 1..opts.packets {
        ends.push(ends[k - 1] + block_frames(k));
    }

    let decoded = ends[ends.len() - 1] - first_end - opts.start_trim;
    let length = decoded - opts.end_trim;
    let origin = first_end + opts.start_trim;

    let mut mux = Muxer::new(opts.serial, opts.page_limit);
    mux.packet(&ident_packet(opts.channels, opts.sample_rate), 0);
    mux.flush();
    mux.packet(&comment_packet("synthetic", &["TITLE=fixture"]), 0);
    mux.packet(&setup_packet(), 0);
    if !opts.audio_on_setup_page {
        mux.flush();
    }

    for (k, &end) in ends.iter().enumerate() {
        let granule = if k + 1 == ends.len() {
            length
        } else {
            end.saturating_sub(origin)
        };
        mux.packet(&audio_packet(end, opts.packet_bytes + (k * 37) % 50), granule);
    }

    let channels = opts.channels as usize;
    let reference = (origin..origin + length)
        .flat_map(|t| (0..channels).map(move |ch| sample_value(t, ch)))
        .collect();

    (mux.finish(), reference, length)
}

pub fn fixture(opts: &FixtureOptions) -> Fixture {
    let (pages, reference, length) = stream_pages(opts);

    let mut bytes = Vec::new();
    let mut page_offsets = Vec::new();
    let mut page_granules = Vec::new();
    for p in pages {
        page_offsets.push(bytes.len() as u64);
        let granule = u64::from_le_bytes([p[6], p[7], p[8], p[9], p[10], p[11], p[12], p[13]]);
        page_granules.push((granule != NO_GRANULE).then_some(granule));
        bytes.extend(p);
    }

    Fixture {
        bytes,
        reference,
        length,
        channels: opts.channels as usize,
        page_offsets,
        page_granules,
    }
}

pub fn assert_samples_eq(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "sample count differs");
    if let Some(i) = actual
        .iter()
        .zip(expected)
        .position(|(a, e)| (a - e).abs() > 1e-5)
    {
        panic!(
            "sample {i} differs: got {}, expected {}",
            actual[i], expected[i]
        );
    }
}
