//! Chunk checksum.
//!
//! CRC-16 with polynomial `0x1021`, zero seed, MSB-first per byte. UOF
//! chunk headers store it in a 32-bit field; SUOF and MOF store it over the
//! whole file past the checksum field.

const POLY: u32 = 0x1021;

/// Fold `data` into a running checksum.
#[must_use]
pub fn update(mut reg: u32, data: &[u8]) -> u32 {
    for &byte in data {
        reg ^= u32::from(byte) << 8;
        for _ in 0..8 {
            reg = if reg & 0x8000 != 0 {
                (reg << 1) ^ POLY
            } else {
                reg << 1
            };
        }
        reg &= 0xffff;
    }
    reg
}

/// Checksum of `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> u32 {
    update(0, data)
}
