//! CRC validation for container pages.
//!
//! Pages carry a CRC-32 with polynomial `0x04C11DB7`, zero initial value, no
//! reflection and no final xor. The checksum covers the whole page with the
//! checksum field itself zeroed.

/// CRC algorithm specification with polynomial and initial value.
pub struct Algorithm<T> {
    poly: T,
    init: T,
}

/// CRC-32 algorithm used by page headers.
pub const CRC_PAGE_ALG: Algorithm<u32> = Algorithm {
    poly: 0x04c1_1db7,
    init: 0x0000_0000,
};

/// Byte range of the checksum field inside the fixed page header.
pub const CHECKSUM_RANGE: std::ops::Range<usize> = 22..26;

/// Computes CRC-32 of a single byte shifted through `len` bits.
#[inline(always)]
pub const fn crc32(poly: u32, value: u8, len: usize) -> u32 {
    let mut value = (value as u32) << 24;

    let mut i = 0;
    while i < len {
        value = (value << 1) ^ (((value >> 31) & 1) * poly);
        i += 1;
    }

    value
}

#[inline(always)]
const fn crc32_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc32(poly, i as u8, 8);
        i += 1;
    }

    table
}

#[derive(Debug)]
pub struct Crc32 {
    pub poly: u32,
    pub init: u32,
    table: [u32; 256],
}

/// Table for the page checksum, built at compile time.
pub static PAGE_CRC: Crc32 = Crc32::new(&CRC_PAGE_ALG);

impl Crc32 {
    pub const fn new(algorithm: &Algorithm<u32>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc32_table(algorithm.poly),
        }
    }

    const fn table_entry(&self, index: u32) -> u32 {
        self.table[(index & 0xFF) as usize]
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u32, bytes: &[u8]) -> u32 {
        let mut i = 0;

        while i < bytes.len() {
            crc = self.table_entry((crc >> 24) ^ bytes[i] as u32) ^ (crc << 8);
            i += 1;
        }

        crc
    }

    /// Checksum of a complete page as it appears on the wire.
    ///
    /// The four checksum bytes are fed as zeros regardless of their content.
    pub fn page_checksum(&self, page: &[u8]) -> u32 {
        let mut crc = self.init;
        crc = self.update(crc, &page[..CHECKSUM_RANGE.start]);
        crc = self.update(crc, &[0; 4]);
        self.update(crc, &page[CHECKSUM_RANGE.end..])
    }
}

#[test]
fn check_value() {
    assert_eq!(PAGE_CRC.update(PAGE_CRC.init, b"123456789"), 0x89a1_897f);
    assert_eq!(PAGE_CRC.table_entry(1), 0x04c1_1db7);
    assert_eq!(PAGE_CRC.table_entry(255), 0xb1f7_40b4);
}

#[test]
fn checksum_field_is_ignored() {
    let mut page = vec![0u8; 40];
    page[..4].copy_from_slice(b"OggS");
    page[30] = 0x5a;

    let clean = PAGE_CRC.page_checksum(&page);
    page[CHECKSUM_RANGE].copy_from_slice(&clean.to_le_bytes());
    assert_eq!(PAGE_CRC.page_checksum(&page), clean);

    page[31] ^= 1;
    assert_ne!(PAGE_CRC.page_checksum(&page), clean);
}
