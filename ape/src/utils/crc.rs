//! CRC validation utilities.
//!
//! Provides a table-driven CRC-32 used for per-frame sample checksums, the
//! whole-stream checksum and the container header checksum.
//!
//! The algorithm is the reflected IEEE 802.3 CRC-32 (the one used by zip and
//! PNG), so values can be cross-checked with any standard tool.

/// CRC parameters: polynomial, initial register and output mask.
pub struct Algorithm<T> {
    poly: T,
    init: T,
    xorout: T,
}

/// Reflected IEEE CRC-32.
pub const CRC32_IEEE_ALG: Algorithm<u32> = Algorithm {
    poly: 0xEDB8_8320,
    init: 0xFFFF_FFFF,
    xorout: 0xFFFF_FFFF,
};

/// Shifts `len` bits through a reflected CRC-32 register.
#[inline(always)]
pub const fn crc32(poly: u32, mut value: u32, len: usize) -> u32 {
    let mut i = 0;
    while i < len {
        value = (value >> 1) ^ ((value & 1) * poly);
        i += 1;
    }

    value
}

#[inline(always)]
const fn crc32_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc32(poly, i as u32, 8);
        i += 1;
    }

    table
}

#[derive(Debug, Clone)]
pub struct Crc32 {
    pub poly: u32,
    pub init: u32,
    pub xorout: u32,
    table: [u32; 256],
}

impl Crc32 {
    pub const fn new(algorithm: &Algorithm<u32>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            xorout: algorithm.xorout,
            table: crc32_table(algorithm.poly),
        }
    }

    const fn table_entry(&self, index: u32) -> u32 {
        self.table[(index & 0xFF) as usize]
    }

    /// Feeds `bytes` into a running (not yet finalized) register.
    #[inline(always)]
    pub const fn update(&self, mut crc: u32, bytes: &[u8]) -> u32 {
        let mut i = 0;

        while i < bytes.len() {
            crc = self.table_entry(crc ^ bytes[i] as u32) ^ (crc >> 8);
            i += 1;
        }

        crc
    }

    #[inline(always)]
    pub const fn finalize(&self, crc: u32) -> u32 {
        crc ^ self.xorout
    }

    pub const fn checksum(&self, bytes: &[u8]) -> u32 {
        self.finalize(self.update(self.init, bytes))
    }
}

/// Shared CRC-32 instance; the table is built at compile time.
pub static CRC32: Crc32 = Crc32::new(&CRC32_IEEE_ALG);

/// Incremental CRC-32 over PCM samples.
///
/// Each sample is hashed as `bytes_per_sample` little-endian bytes, which is
/// exactly how the samples would appear in an interleaved PCM buffer.
#[derive(Debug, Clone)]
pub struct SampleCrc {
    register: u32,
    bytes_per_sample: usize,
}

impl SampleCrc {
    pub fn new(bits_per_sample: u16) -> Self {
        Self {
            register: CRC32.init,
            bytes_per_sample: (bits_per_sample as usize).div_ceil(8),
        }
    }

    pub fn update(&mut self, samples: &[i32]) {
        let width = self.bytes_per_sample;
        for chunk in samples.chunks(64) {
            let mut buf = [0u8; 64 * 4];
            let mut len = 0;
            for &sample in chunk {
                buf[len..len + width].copy_from_slice(&sample.to_le_bytes()[..width]);
                len += width;
            }
            self.register = CRC32.update(self.register, &buf[..len]);
        }
    }

    pub fn value(&self) -> u32 {
        CRC32.finalize(self.register)
    }

    pub fn checksum(bits_per_sample: u16, samples: &[i32]) -> u32 {
        let mut crc = Self::new(bits_per_sample);
        crc.update(samples);
        crc.value()
    }
}
