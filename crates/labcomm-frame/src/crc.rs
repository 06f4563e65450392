//! Table-driven CRC16 (polynomial 0x1021, initial value 0x0000, no reflection).
//!
//! This is the CRC-16/XMODEM parameter set. The check value over the ASCII
//! string `"123456789"` is `0x31C3`.

/// Generator polynomial.
pub const POLYNOMIAL: u16 = 0x1021;

/// Lookup table, built at compile time.
pub static TABLE: [u16; 256] = build_table(POLYNOMIAL);

const fn build_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Compute the CRC16 of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    update(0x0000, data)
}

/// Continue a running CRC16 over more bytes.
pub fn update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        let index = ((crc >> 8) as u8 ^ byte) as usize;
        crc = (crc << 8) ^ TABLE[index];
    }
    crc
}

/// CRC16 of `data` in wire order (most significant byte first).
pub fn crc16_bytes(data: &[u8]) -> [u8; 2] {
    crc16(data).to_be_bytes()
}
