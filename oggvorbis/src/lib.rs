#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! An Ogg physical stream is a sequence of pages, each carrying segments of
//! the packets of one logical stream. Pages of several logical streams can be
//! interleaved; this crate follows the first one whose first packet is a
//! Vorbis identification header and ignores the rest.
//!
//! ### Units
//!
//! Lengths and positions are counted in frames (one sample per channel).
//! [`Reader::read`](process::reader::Reader::read) fills a buffer of
//! interleaved samples and returns how many values it wrote, which need not
//! be a whole number of frames.
//!
//! ### Granule Positions
//!
//! The granule position of a page is the number of frames that are complete
//! once its last packet is decoded. Decoding is trimmed against it: frames
//! decoded before the first granule of the stream are dropped, as are frames
//! past the granule of the last page.
//!
//! ## Quick Start
//!
//! 1. Wrap the input in a [`source::Seekable`] or [`source::Sequential`]
//! 2. Open a [`process::reader::Reader`] over it
//! 3. Read samples, seeking with [`set_position`](process::reader::Reader::set_position)
//!
//! ```rust,no_run
//! use std::{fs::File, io::BufReader};
//!
//! use oggvorbis::process::reader::Reader;
//! use oggvorbis::source::Seekable;
//! use oggvorbis::utils::errors::Error;
//!
//! let file = BufReader::new(File::open("input.ogg")?);
//! let mut reader = Reader::new(Seekable::new(file))?;
//!
//! let format = reader.format();
//! println!("{} Hz, {} channels, {} frames", format.sample_rate, format.channels, reader.length());
//!
//! // Start two seconds in
//! reader.set_position(2 * format.sample_rate as u64)?;
//!
//! let mut buf = vec![0.0f32; 4096];
//! loop {
//!     match reader.read(&mut buf) {
//!         Ok(n) => {
//!             let samples = &buf[..n];
//!         }
//!         Err(Error::EndOfStream) => break,
//!         Err(e) => return Err(e.into()),
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Processing stages from bytes to PCM.
///
/// 1. **Pages** ([`process::page`]): Capture, checksum and resynchronisation.
///
/// 2. **Packets** ([`process::packet`]): Reassembly across page boundaries.
///
/// 3. **Headers** ([`process::header`]): Identification, comment and setup
///    packets.
///
/// 4. **Demuxing** ([`process::demux`]): Selection of the Vorbis stream.
///
/// 5. **Decoding** ([`process::decode`]): Audio packets to PCM.
///
/// 6. **Reading** ([`process::reader`], [`process::seek`]): Trimming,
///    buffering and random access.
pub mod process;

/// Byte sources the reader pulls from.
pub mod source;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading
/// - **CRC Validation** ([`utils::crc`]): Page checksums
/// - **Error Handling** ([`utils::errors`]): Error types
pub mod utils;

pub use process::reader::{Reader, ReaderOptions};
pub use process::scan::{get_format, get_length, read_all};
pub use utils::errors::{Error, Result};
