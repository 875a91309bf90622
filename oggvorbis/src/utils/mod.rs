//! Utility functions and supporting infrastructure.
//!
//! Provides bit-level reading, the Ogg page checksum and the crate's error
//! type.

pub mod bitstream_io;
pub mod crc;
pub mod errors;

#[cfg(test)]
pub(crate) mod testing;
