use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};

use super::{
    decoding,
    ipv4::{pseudo_header, IpProtocol},
    DecodingError,
};
use crate::utils::Checksum;

pub const HEADER_LEN: usize = 8;

mod field {
    use std::ops::Range;

    pub const SRC_PORT: Range<usize> = 0..2;
    pub const DST_PORT: Range<usize> = 2..4;
    pub const LENGTH: Range<usize> = 4..6;
    pub const CHECKSUM: Range<usize> = 6..8;
}

pub struct UdpDatagram<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> UdpDatagram<T> {
    pub fn new_unchecked(buffer: T) -> Self {
        UdpDatagram { buffer }
    }

    /// The declared length must cover the header and fit in the buffer.
    pub fn new_checked(buffer: T) -> Result<Self, DecodingError> {
        let datagram = UdpDatagram { buffer };
        let len = datagram.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(decoding("udp header"));
        }
        let declared = usize::from(datagram.len());
        if declared < HEADER_LEN || declared > len {
            return Err(decoding("udp length"));
        }
        Ok(datagram)
    }

    #[must_use]
    pub fn src_port(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::SRC_PORT])
    }

    #[must_use]
    pub fn dst_port(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::DST_PORT])
    }

    #[allow(clippy::len_without_is_empty)]
    #[must_use]
    pub fn len(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::LENGTH])
    }

    #[must_use]
    pub fn checksum(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..usize::from(self.len())]
    }

    /// A zero checksum means the sender did not compute one and is accepted.
    #[must_use]
    pub fn verify_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        if self.checksum() == 0 {
            return true;
        }
        let len = self.len();
        let mut sum = Checksum::new();
        pseudo_header(&mut sum, src, dst, IpProtocol::Udp, len);
        sum.accumulate(&self.buffer.as_ref()[..usize::from(len)]);
        sum.finalize() == 0
    }
}

impl<'a> UdpDatagram<&'a [u8]> {
    #[must_use]
    pub fn into_payload(self) -> &'a [u8] {
        let end = usize::from(self.len());
        &self.buffer[HEADER_LEN..end]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> UdpDatagram<T> {
    pub fn set_src_port(&mut self, port: u16) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::SRC_PORT], port);
    }

    pub fn set_dst_port(&mut self, port: u16) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::DST_PORT], port);
    }

    pub fn set_len(&mut self, len: u16) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::LENGTH], len);
    }

    pub fn swap_ports(&mut self) {
        let src = self.src_port();
        let dst = self.dst_port();
        self.set_src_port(dst);
        self.set_dst_port(src);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let end = usize::from(self.len());
        &mut self.buffer.as_mut()[HEADER_LEN..end]
    }

    /// Computes the checksum over the pseudo-header and `len()` bytes.
    pub fn fill_checksum(&mut self, src: Ipv4Addr, dst: Ipv4Addr) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], 0);
        let len = self.len();
        let mut sum = Checksum::new();
        pseudo_header(&mut sum, src, dst, IpProtocol::Udp, len);
        sum.accumulate(&self.buffer.as_ref()[..usize::from(len)]);
        let value = match sum.finalize() {
            0 => 0xffff,
            v => v,
        };
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }
}
