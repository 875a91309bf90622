use std::io::{self, BufWriter, Seek, SeekFrom, Write};

// W64 GUIDs as defined in Sony Wave64 specification
pub const W64_RIFF_GUID: [u8; 16] = [
    0x72, 0x69, 0x66, 0x66, 0x2E, 0x91, 0xCF, 0x11, 0xA5, 0xD6, 0x28, 0xDB, 0x04, 0xC1, 0x00, 0x00,
];
pub const W64_WAVE_GUID: [u8; 16] = [
    0x77, 0x61, 0x76, 0x65, 0xF3, 0xAC, 0xD3, 0x11, 0x8C, 0xD1, 0x00, 0xC0, 0x4F, 0x8E, 0xDB, 0x8A,
];
pub const W64_FMT_GUID: [u8; 16] = [
    0x66, 0x6D, 0x74, 0x20, 0xF3, 0xAC, 0xD3, 0x11, 0x8C, 0xD1, 0x00, 0xC0, 0x4F, 0x8E, 0xDB, 0x8A,
];
pub const W64_DATA_GUID: [u8; 16] = [
    0x64, 0x61, 0x74, 0x61, 0xF3, 0xAC, 0xD3, 0x11, 0x8C, 0xD1, 0x00, 0xC0, 0x4F, 0x8E, 0xDB, 0x8A,
];

const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;
const BYTES_PER_SAMPLE: u32 = 4;

/// Sony Wave64 writer for 32-bit float audio (.wav extension)
pub struct WAVWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    sample_rate: u32,
    channels: u32,
    riff_size_position: u64,
    data_size_position: u64,
    data_written: u64,
}

impl<W: Write + Seek> WAVWriter<W> {
    pub fn new(writer: W, sample_rate: u32, channels: u32) -> Self {
        Self {
            writer: BufWriter::new(writer),
            sample_rate,
            channels,
            riff_size_position: 0,
            data_size_position: 0,
            data_written: 0,
        }
    }

    /// Write W64 file header with placeholder sizes
    pub fn write_header(&mut self) -> io::Result<()> {
        self.writer.write_all(&W64_RIFF_GUID)?;
        self.riff_size_position = self.writer.stream_position()?;
        self.writer.write_all(&0u64.to_le_bytes())?;
        self.writer.write_all(&W64_WAVE_GUID)?;

        // fmt chunk: GUID + size + 16 bytes of WAVEFORMAT
        self.writer.write_all(&W64_FMT_GUID)?;
        self.writer.write_all(&(24u64 + 16).to_le_bytes())?;

        let block_align = self.channels * BYTES_PER_SAMPLE;
        self.writer.write_all(&WAVE_FORMAT_IEEE_FLOAT.to_le_bytes())?;
        self.writer.write_all(&(self.channels as u16).to_le_bytes())?;
        self.writer.write_all(&self.sample_rate.to_le_bytes())?;
        self.writer
            .write_all(&(self.sample_rate * block_align).to_le_bytes())?;
        self.writer.write_all(&(block_align as u16).to_le_bytes())?;
        self.writer
            .write_all(&((BYTES_PER_SAMPLE * 8) as u16).to_le_bytes())?;

        self.writer.write_all(&W64_DATA_GUID)?;
        self.data_size_position = self.writer.stream_position()?;
        self.writer.write_all(&0u64.to_le_bytes())?;

        Ok(())
    }

    /// Write interleaved samples as 32-bit float little-endian
    pub fn write_samples(&mut self, samples: &[f32]) -> io::Result<()> {
        for sample in samples {
            self.writer.write_all(&sample.to_le_bytes())?;
        }
        self.data_written += samples.len() as u64 * BYTES_PER_SAMPLE as u64;
        Ok(())
    }

    /// Patch the chunk sizes, padding the data chunk to 8 bytes
    pub fn finish(&mut self) -> io::Result<()> {
        let padding = (8 - self.data_written % 8) % 8;
        self.writer.write_all(&[0; 8][..padding as usize])?;

        let end = self.writer.stream_position()?;

        self.writer.seek(SeekFrom::Start(self.data_size_position))?;
        self.writer.write_all(&(self.data_written + 24).to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(self.riff_size_position))?;
        self.writer.write_all(&end.to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()
    }

    pub fn frames_written(&self) -> u64 {
        self.data_written / (self.channels.max(1) * BYTES_PER_SAMPLE) as u64
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn test_w64_float_header() -> io::Result<()> {
        let mut writer = WAVWriter::new(Cursor::new(Vec::new()), 44100, 2);
        writer.write_header()?;
        let buffer = writer.into_inner()?.into_inner();

        assert_eq!(&buffer[0..16], &W64_RIFF_GUID);
        assert_eq!(&buffer[24..40], &W64_WAVE_GUID);
        assert_eq!(&buffer[40..56], &W64_FMT_GUID);
        assert_eq!(&buffer[64..66], &3u16.to_le_bytes());
        assert_eq!(&buffer[66..68], &2u16.to_le_bytes());
        assert_eq!(&buffer[68..72], &44100u32.to_le_bytes());
        assert_eq!(&buffer[76..78], &8u16.to_le_bytes());
        assert_eq!(&buffer[78..80], &32u16.to_le_bytes());
        assert_eq!(&buffer[80..96], &W64_DATA_GUID);
        Ok(())
    }

    #[test]
    fn test_w64_sizes_patched() -> io::Result<()> {
        let mut writer = WAVWriter::new(tempfile::tempfile()?, 48000, 1);
        writer.write_header()?;
        writer.write_samples(&[0.5, -0.25, 1.0])?;
        assert_eq!(writer.frames_written(), 3);
        writer.finish()?;

        let mut file = writer.into_inner()?;
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        // 104-byte header, 12 bytes of samples, 4 bytes of padding
        assert_eq!(buffer.len(), 120);
        assert_eq!(&buffer[16..24], &120u64.to_le_bytes());
        assert_eq!(&buffer[96..104], &(24u64 + 12).to_le_bytes());
        assert_eq!(&buffer[104..108], &0.5f32.to_le_bytes());
        Ok(())
    }
}
