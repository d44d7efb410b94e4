//! CRC-16/MCRF4XX ("X.25") as used by MAVLink.

/// Running MAVLink checksum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct X25Crc(u16);

impl Default for X25Crc {
    fn default() -> Self {
        Self(0xffff)
    }
}

impl X25Crc {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn accumulate(&mut self, byte: u8) {
        let mut tmp = byte ^ (self.0 & 0xff) as u8;
        tmp ^= tmp << 4;
        let tmp = tmp as u16;
        self.0 = (self.0 >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4);
    }

    pub fn accumulate_slice(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.accumulate(b);
        }
    }

    #[inline]
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Checksum of a frame body (bytes after the start marker) seeded with the
/// message's `CRC_EXTRA`.
pub fn frame_crc(body: &[u8], crc_extra: u8) -> u16 {
    let mut crc = X25Crc::new();
    crc.accumulate_slice(body);
    crc.accumulate(crc_extra);
    crc.value()
}
