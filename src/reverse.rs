//! Bit order reversal for bitstream payloads.
//!
//! Quartus RPD images are stored LSB-first relative to how the ASMI core
//! shifts bytes into the flash, so every bitstream byte is reflected on the
//! way in and on the way out.

static REVERSE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut b = i as u8;
        let mut r = 0u8;
        let mut bit = 0;
        while bit < 8 {
            r = (r << 1) | (b & 1);
            b >>= 1;
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

/// Reflect the 8 bits of `byte`.
#[inline]
pub fn reverse_bits(byte: u8) -> u8 {
    REVERSE[byte as usize]
}

/// Reflect every byte of `buf` in place.
pub fn reverse_slice(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        *b = REVERSE[*b as usize];
    }
}
