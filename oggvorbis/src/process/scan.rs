//! One-shot queries over a whole byte source.

use crate::process::decode::{PacketDecoder, VorbisDecoder};
use crate::process::demux::Demuxer;
use crate::process::header::Format;
use crate::process::reader::{Reader, ReaderOptions};
use crate::process::seek;
use crate::source::ByteSource;
use crate::utils::errors::{Error, Result};

const READ_ALL_CHUNK: usize = 16 * 1024;

/// Decodes every sample of the first Vorbis stream.
pub fn read_all<S: ByteSource>(source: S) -> Result<(Vec<f32>, Format)> {
    read_all_with(source, VorbisDecoder::new())
}

/// [`read_all`] with a custom packet decoder.
pub fn read_all_with<S: ByteSource, D: PacketDecoder>(
    source: S,
    decoder: D,
) -> Result<(Vec<f32>, Format)> {
    let mut reader = Reader::with_decoder(source, decoder, ReaderOptions::default())?;

    let channels = reader.format().channels as usize;
    let expected = (reader.length() as usize).saturating_mul(channels);
    let mut samples = Vec::with_capacity(expected.min(READ_ALL_CHUNK * 64));
    let mut buf = vec![0.0; READ_ALL_CHUNK];

    loop {
        match reader.read(&mut buf) {
            Ok(n) => samples.extend_from_slice(&buf[..n]),
            Err(Error::EndOfStream) => break,
            Err(e) => return Err(e),
        }
    }

    Ok((samples, reader.format()))
}

/// Runs `query` and moves the source cursor back to where it was.
///
/// Sequential sources cannot be rewound; the bytes read stay consumed.
fn restoring<S, T>(source: &mut S, query: impl FnOnce(&mut S) -> Result<T>) -> Result<T>
where
    S: ByteSource + ?Sized,
{
    let entry = if source.is_seekable() {
        Some(source.position()?)
    } else {
        None
    };

    let result = query(source);

    if let Some(entry) = entry {
        source.seek(entry)?;
    }
    result
}

/// Parses the header packets of the first Vorbis stream.
///
/// On a seekable source the cursor is restored before returning, on success
/// and on failure.
pub fn get_format<S: ByteSource + ?Sized>(source: &mut S) -> Result<Format> {
    restoring(source, |source| {
        let (_, setup, _) = Demuxer::open(source, &ReaderOptions::default())?;
        Ok(setup.format)
    })
}

/// Total number of frames of the first Vorbis stream, plus its format.
///
/// The length is the granule position of the last valid page of the stream.
/// A truncated or corrupted tail yields the length of the last intact page
/// instead of an error. Sequential sources are read to their end; seekable
/// ones are only checked near the tail and get their cursor restored.
pub fn get_length<S: ByteSource + ?Sized>(source: &mut S) -> Result<(u64, Format)> {
    restoring(source, |source| {
        let (mut demux, setup, _) = Demuxer::open(source, &ReaderOptions::default())?;

        let last = if demux.is_seekable() {
            seek::last_granule(&mut demux)?
        } else {
            let serial = demux.serial();
            seek::last_granule_from(&mut demux, serial)?
        };

        Ok((last.unwrap_or(0), setup.format))
    })
}
