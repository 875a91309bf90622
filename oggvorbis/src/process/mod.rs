/// Page capture and validation.
///
/// Provides the [`PageReader`](page::PageReader) for locating pages in a byte
/// source and resynchronising after damaged or foreign data.
pub mod page;

/// Packet reassembly across page boundaries.
///
/// Provides the [`PacketAssembler`](packet::PacketAssembler), which keeps one
/// continuation per logical stream.
pub mod packet;

/// Vorbis header packets.
pub mod header;

/// Audio packet decoding to interleaved PCM.
///
/// Provides the [`PacketDecoder`](decode::PacketDecoder) seam and the default
/// [`VorbisDecoder`](decode::VorbisDecoder).
pub mod decode;

/// Logical stream selection.
pub mod demux;

/// Granule bisection and length discovery.
pub mod seek;

/// Sample-accurate streaming reads.
///
/// Provides the [`Reader`](reader::Reader), which combines everything above.
pub mod reader;

/// Whole-source helpers.
pub mod scan;
