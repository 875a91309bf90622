//! Vorbis header packets.
//!
//! ## Packet Order
//!
//! 1. **Identification** (type 1): channel count, sample rate, bitrates and
//!    the two block sizes.
//! 2. **Comment** (type 3): vendor string and `KEY=value` fields, passed
//!    through uninterpreted.
//! 3. **Setup** (type 5): codebooks, floors, residues and modes. Kept as raw
//!    bytes for the packet decoder; only the framing is validated here.
//!
//! Every header starts with its type byte followed by the ASCII signature
//! `vorbis`. Audio packets have the lowest bit of their first byte clear.

use std::io;

use log::debug;

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::{Error, Result};

pub const SIGNATURE: [u8; 6] = *b"vorbis";

pub const PACKET_IDENTIFICATION: u8 = 1;
pub const PACKET_COMMENT: u8 = 3;
pub const PACKET_SETUP: u8 = 5;

/// Type byte plus signature.
pub const PREAMBLE_LEN: usize = 1 + SIGNATURE.len();

/// Codebook sync pattern, read LSB-first as a 24-bit value.
pub const CODEBOOK_SYNC: u32 = 0x56_43_42;

const MIN_BLOCKSIZE_EXP: u8 = 6;
const MAX_BLOCKSIZE_EXP: u8 = 13;

/// Whether `packet` starts with the given header type and the signature.
pub fn has_preamble(packet: &[u8], packet_type: u8) -> bool {
    packet.len() >= PREAMBLE_LEN && packet[0] == packet_type && packet[1..PREAMBLE_LEN] == SIGNATURE
}

/// Whether `packet` is an audio packet rather than a header.
pub fn is_audio_packet(packet: &[u8]) -> bool {
    packet.first().is_some_and(|b| b & 1 == 0)
}

fn truncated(what: &'static str) -> impl Fn(io::Error) -> Error {
    move |e| Error::malformed_header(format!("{what} header truncated: {e}"))
}

fn expect_preamble(packet: &[u8], packet_type: u8, what: &str) -> Result<()> {
    if has_preamble(packet, packet_type) {
        Ok(())
    } else {
        Err(Error::malformed_header(format!(
            "expected {what} header, found packet type {:?}",
            packet.first()
        )))
    }
}

/// Stream format from the identification header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Format {
    pub channels: u8,
    pub sample_rate: u32,
    pub bitrate_maximum: i32,
    pub bitrate_nominal: i32,
    pub bitrate_minimum: i32,
    /// Short block size in samples.
    pub blocksize_0: u16,
    /// Long block size in samples.
    pub blocksize_1: u16,
}

impl Format {
    pub fn from_identification(packet: &[u8]) -> Result<Self> {
        expect_preamble(packet, PACKET_IDENTIFICATION, "identification")?;

        let mut reader = BsIoSliceReader::from_slice(&packet[PREAMBLE_LEN..]);
        let (version, format, exponents, framing) =
            Self::read(&mut reader).map_err(truncated("identification"))?;

        if version != 0 {
            return Err(Error::malformed_header(format!(
                "unsupported vorbis version {version}"
            )));
        }
        if format.channels == 0 {
            return Err(Error::malformed_header("channel count is zero"));
        }
        if format.sample_rate == 0 {
            return Err(Error::malformed_header("sample rate is zero"));
        }

        let (exp_0, exp_1) = exponents;
        let valid = MIN_BLOCKSIZE_EXP..=MAX_BLOCKSIZE_EXP;
        if !valid.contains(&exp_0) || !valid.contains(&exp_1) || exp_0 > exp_1 {
            return Err(Error::malformed_header(format!(
                "invalid block sizes 2^{exp_0}, 2^{exp_1}"
            )));
        }
        if !framing {
            return Err(Error::malformed_header("identification framing bit not set"));
        }

        Ok(Self {
            blocksize_0: 1 << exp_0,
            blocksize_1: 1 << exp_1,
            ..format
        })
    }

    fn read(reader: &mut BsIoSliceReader) -> io::Result<(u32, Self, (u8, u8), bool)> {
        let version = reader.get_u32_le()?;
        let format = Self {
            channels: reader.get_n(8)?,
            sample_rate: reader.get_u32_le()?,
            bitrate_maximum: reader.get_u32_le()? as i32,
            bitrate_nominal: reader.get_u32_le()? as i32,
            bitrate_minimum: reader.get_u32_le()? as i32,
            ..Default::default()
        };
        let exponents = (reader.get_n(4)?, reader.get_n(4)?);
        let framing = reader.get()?;

        Ok((version, format, exponents, framing))
    }

    /// Duration of `frames` frames in seconds.
    pub fn duration_secs(&self, frames: u64) -> f64 {
        frames as f64 / self.sample_rate as f64
    }
}

/// Comment header contents.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Comments {
    pub vendor: String,
    /// Raw `KEY=value` strings in stream order.
    pub comments: Vec<String>,
}

impl Comments {
    pub fn from_packet(packet: &[u8]) -> Result<Self> {
        expect_preamble(packet, PACKET_COMMENT, "comment")?;

        let mut reader = BsIoSliceReader::from_slice(&packet[PREAMBLE_LEN..]);
        let (comments, framing) = Self::read(&mut reader).map_err(truncated("comment"))?;

        if !framing {
            return Err(Error::malformed_header("comment framing bit not set"));
        }

        Ok(comments)
    }

    fn read(reader: &mut BsIoSliceReader) -> io::Result<(Self, bool)> {
        let vendor = read_string(reader)?;
        let count = reader.get_u32_le()?;

        // every entry needs at least its 4-byte length
        if count as u64 * 32 > reader.available()? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{count} comments do not fit the packet"),
            ));
        }

        let comments = (0..count)
            .map(|_| read_string(reader))
            .collect::<io::Result<Vec<_>>>()?;
        let framing = reader.get()?;

        Ok((Self { vendor, comments }, framing))
    }

    /// Values of every field whose key matches `key`, case-insensitively.
    pub fn get<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.comments.iter().filter_map(move |c| {
            let (k, v) = c.split_once('=')?;
            k.eq_ignore_ascii_case(key).then_some(v)
        })
    }
}

fn read_string(reader: &mut BsIoSliceReader) -> io::Result<String> {
    let len = reader.get_u32_le()? as usize;
    let bytes = reader.get_bytes(len)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Everything the packet decoder needs, fixed once the headers are parsed.
#[derive(Debug, Clone, Default)]
pub struct SetupState {
    pub format: Format,
    pub codebooks: u16,
    /// Raw identification header packet.
    pub identification: Vec<u8>,
    /// Raw setup header packet.
    pub setup: Vec<u8>,
}

fn check_setup(packet: &[u8]) -> Result<u16> {
    expect_preamble(packet, PACKET_SETUP, "setup")?;

    let mut reader = BsIoSliceReader::from_slice(&packet[PREAMBLE_LEN..]);
    let (codebooks, sync) = read_setup_start(&mut reader).map_err(truncated("setup"))?;

    if sync != CODEBOOK_SYNC {
        return Err(Error::malformed_header(format!(
            "invalid codebook sync {sync:#08X}"
        )));
    }

    Ok(codebooks)
}

fn read_setup_start(reader: &mut BsIoSliceReader) -> io::Result<(u16, u32)> {
    let codebooks = reader.get_n::<u16>(8)? + 1;
    let sync = reader.get_n::<u32>(24)?;
    Ok((codebooks, sync))
}

/// Outcome of feeding one header packet to the [`HeaderParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderUpdate {
    Format(Format),
    Comments,
    Setup,
}

/// Parses the three header packets of a stream, in order.
#[derive(Debug, Default)]
pub struct HeaderParser {
    format: Option<Format>,
    identification: Vec<u8>,
    comments: Option<Comments>,
    setup: Option<SetupState>,
}

impl HeaderParser {
    pub fn parse_header(&mut self, index: u64, packet: &[u8]) -> Result<HeaderUpdate> {
        match index {
            0 => {
                let format = Format::from_identification(packet)?;
                debug!(
                    "identification: {} channels, {} Hz, blocks {}/{}",
                    format.channels, format.sample_rate, format.blocksize_0, format.blocksize_1
                );
                self.format = Some(format);
                self.identification = packet.to_vec();
                Ok(HeaderUpdate::Format(format))
            }
            1 => {
                let comments = Comments::from_packet(packet)?;
                debug!(
                    "comment: vendor {:?}, {} fields",
                    comments.vendor,
                    comments.comments.len()
                );
                self.comments = Some(comments);
                Ok(HeaderUpdate::Comments)
            }
            2 => {
                let Some(format) = self.format else {
                    return Err(Error::malformed_header("setup header before identification"));
                };
                let codebooks = check_setup(packet)?;
                debug!("setup: {codebooks} codebooks, {} bytes", packet.len());
                self.setup = Some(SetupState {
                    format,
                    codebooks,
                    identification: std::mem::take(&mut self.identification),
                    setup: packet.to_vec(),
                });
                Ok(HeaderUpdate::Setup)
            }
            _ => Err(Error::malformed_header(format!(
                "packet {index} arrived before all headers were parsed"
            ))),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.setup.is_some() && self.comments.is_some()
    }

    /// Returns the parsed headers once all three were seen.
    pub fn finish(self) -> Result<(SetupState, Comments)> {
        match (self.setup, self.comments) {
            (Some(setup), Some(comments)) => Ok((setup, comments)),
            _ => Err(Error::malformed_header("stream ended inside the header packets")),
        }
    }
}
