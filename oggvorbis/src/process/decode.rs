//! Audio packet decoding.
//!
//! The demuxer and seek engine only ever talk to a [`PacketDecoder`], so the
//! framing, packetization and seeking logic stays independent of the
//! frequency-domain transform. [`VorbisDecoder`] is the default
//! implementation and is backed by symphonia's Vorbis codec.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_VORBIS, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::Packet;

use crate::process::header::SetupState;
use crate::utils::errors::{Error, Result};

/// Turns compressed audio packets into interleaved PCM.
///
/// Implementations may keep lapping state between calls: the samples
/// produced for a packet can depend on the packet decoded before it.
pub trait PacketDecoder {
    /// Decodes one audio packet, appending interleaved `f32` samples to `out`.
    ///
    /// The first packet after construction or [`reset`](PacketDecoder::reset)
    /// may legitimately produce no samples.
    fn decode(&mut self, packet: &[u8], setup: &SetupState, out: &mut Vec<f32>) -> Result<()>;

    /// Drops any state carried over from previously decoded packets.
    fn reset(&mut self);
}

impl<D: PacketDecoder + ?Sized> PacketDecoder for Box<D> {
    fn decode(&mut self, packet: &[u8], setup: &SetupState, out: &mut Vec<f32>) -> Result<()> {
        (**self).decode(packet, setup, out)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Vorbis I decoder backed by symphonia.
///
/// The codec instance is created lazily from the header packets on the first
/// call to [`decode`](PacketDecoder::decode).
#[derive(Default)]
pub struct VorbisDecoder {
    inner: Option<Box<dyn Decoder>>,
    samples: Option<SampleBuffer<f32>>,
}

impl std::fmt::Debug for VorbisDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VorbisDecoder")
            .field("initialized", &self.inner.is_some())
            .finish()
    }
}

fn decode_error(e: symphonia::core::errors::Error) -> Error {
    Error::Decode(e.to_string())
}

impl VorbisDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn make(setup: &SetupState) -> Result<Box<dyn Decoder>> {
        let mut extra_data = Vec::with_capacity(setup.identification.len() + setup.setup.len());
        extra_data.extend_from_slice(&setup.identification);
        extra_data.extend_from_slice(&setup.setup);

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_VORBIS)
            .with_sample_rate(setup.format.sample_rate)
            .with_extra_data(extra_data.into_boxed_slice());

        symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(decode_error)
    }
}

impl PacketDecoder for VorbisDecoder {
    fn decode(&mut self, packet: &[u8], setup: &SetupState, out: &mut Vec<f32>) -> Result<()> {
        let Self { inner, samples } = self;

        let decoder = match inner.take() {
            Some(decoder) => decoder,
            None => Self::make(setup)?,
        };
        let decoder = inner.insert(decoder);

        let decoded = decoder
            .decode(&Packet::new_from_slice(0, 0, 0, packet))
            .map_err(decode_error)?;
        if decoded.frames() == 0 {
            return Ok(());
        }

        let spec = *decoded.spec();
        if spec.channels.count() != setup.format.channels as usize {
            return Err(Error::Decode(format!(
                "decoder produced {} channels, header declares {}",
                spec.channels.count(),
                setup.format.channels
            )));
        }

        let buf = samples.get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, spec));
        buf.copy_interleaved_ref(decoded);
        out.extend_from_slice(buf.samples());

        Ok(())
    }

    fn reset(&mut self) {
        if let Some(decoder) = &mut self.inner {
            decoder.reset();
        }
    }
}
