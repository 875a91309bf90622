//! Bitstream reading for codec header parsing.
//!
//! Vorbis packs fields least-significant bit first, so the reader wraps a
//! [`bitstream_io::BitReader`] in [`LittleEndian`] order and reports reads past
//! the end of the packet as [`io::ErrorKind::UnexpectedEof`].

use std::io;

use bitstream_io::{BitRead, BitReader, LittleEndian, UnsignedInteger};

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, LittleEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        if n as u64 > self.available()? {
            return Err(self.out_of_bounds("get_n", n.into()));
        }

        self.bs.read_unsigned_var(n)
    }

    #[inline(always)]
    pub fn get_u32_le(&mut self) -> io::Result<u32> {
        self.get_n(32)
    }

    /// Reads `len` whole bytes. The reader must be byte aligned.
    pub fn get_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        if (len as u64) << 3 > self.available()? {
            return Err(self.out_of_bounds("get_bytes", (len as u64) << 3));
        }

        let mut buf = vec![0; len];
        self.bs.read_bytes(&mut buf)?;
        Ok(buf)
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs
            .position_in_bits()
            .map(|pos| self.len.saturating_sub(pos))
    }

    fn out_of_bounds(&mut self, what: &str, n: u64) -> io::Error {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "{what}({n}): out of bounds bits at {}",
                self.bs.position_in_bits().unwrap_or(0)
            ),
        )
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_lsb_first() -> io::Result<()> {
        let data = [0b1010_0110u8, 0x34, 0x12, 0x00, 0x00];
        let mut reader = BsIoSliceReader::from_slice(&data);

        assert_eq!(reader.get_n::<u8>(4)?, 0b0110);
        assert_eq!(reader.get_n::<u8>(4)?, 0b1010);
        assert_eq!(reader.get_u32_le()?, 0x1234);
        assert_eq!(reader.available()?, 0);
        Ok(())
    }

    #[test]
    fn past_end_is_unexpected_eof() {
        let data = [0xFFu8];
        let mut reader = BsIoSliceReader::from_slice(&data);

        let err = reader.get_n::<u16>(9).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err = reader.get_bytes(2).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
