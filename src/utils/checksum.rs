use byteorder::{BigEndian, ByteOrder};

/// Running RFC 1071 one's-complement sum.
///
/// Regions are added with [`Checksum::accumulate`] and the result is taken with
/// [`Checksum::finalize`], which also resets the accumulator. An odd trailing byte
/// of a region is treated as the high byte of a zero-padded word, so only the last
/// region of a multi-region sum may have odd length.
#[derive(Debug, Default, Clone)]
pub struct Checksum {
    sum: u32,
}

impl Checksum {
    #[must_use]
    pub fn new() -> Self {
        Checksum { sum: 0 }
    }

    pub fn accumulate(&mut self, data: &[u8]) -> &mut Self {
        let mut words = data.chunks_exact(2);
        for word in &mut words {
            self.add_u16(BigEndian::read_u16(word));
        }
        if let [last] = words.remainder() {
            self.add_u16(u16::from(*last) << 8);
        }
        self
    }

    pub fn add_u16(&mut self, word: u16) -> &mut Self {
        self.sum += u32::from(word);
        if self.sum & 0x8000_0000 != 0 {
            self.fold();
        }
        self
    }

    pub fn add_u32(&mut self, n: u32) -> &mut Self {
        self.add_u16((n >> 16) as u16);
        self.add_u16(n as u16)
    }

    #[must_use]
    pub fn finalize(&mut self) -> u16 {
        self.fold();
        let result = !(self.sum as u16);
        self.sum = 0;
        result
    }

    #[inline]
    fn fold(&mut self) {
        while self.sum >> 16 != 0 {
            self.sum = (self.sum & 0xFFFF) + (self.sum >> 16);
        }
    }
}

/// Internet checksum of a single region.
#[must_use]
pub fn checksum(data: &[u8]) -> u16 {
    Checksum::new().accumulate(data).finalize()
}
