// src/checksums.rs
//
// CRC-16/CCITT-FALSE protecting record frames on the serial link
// (poly 0x1021, init 0xFFFF, MSB first, no final XOR).

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

/// Byte-at-a-time lookup table, built at compile time.
static TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
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

/// Incremental CRC for data that arrives in pieces.
#[derive(Debug, Clone, Copy)]
pub struct Crc16Ccitt {
    crc: u16,
}

impl Default for Crc16Ccitt {
    fn default() -> Self {
        Self { crc: INIT }
    }
}

impl Crc16Ccitt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let index = ((self.crc >> 8) as u8 ^ byte) as usize;
            self.crc = (self.crc << 8) ^ TABLE[index];
        }
    }

    pub fn finish(self) -> u16 {
        self.crc
    }
}

pub fn crc16_ccitt_checksum(data: &[u8]) -> u16 {
    let mut crc = Crc16Ccitt::new();
    crc.update(data);
    crc.finish()
}
