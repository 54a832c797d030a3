use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{decoding, DecodingError};
use crate::utils::{checksum, Checksum};

pub const HEADER_LEN: usize = 20;
pub const DEFAULT_TTL: u8 = 0xff;
pub const FLAG_DONT_FRAGMENT: u16 = 0x4000;

mod field {
    use std::ops::Range;

    pub const VER_IHL: usize = 0;
    pub const TOS: usize = 1;
    pub const LENGTH: Range<usize> = 2..4;
    pub const IDENT: Range<usize> = 4..6;
    pub const FLG_OFF: Range<usize> = 6..8;
    pub const TTL: usize = 8;
    pub const PROTOCOL: usize = 9;
    pub const CHECKSUM: Range<usize> = 10..12;
    pub const SRC: Range<usize> = 12..16;
    pub const DST: Range<usize> = 16..20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum IpProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

/// Adds the TCP/UDP pseudo-header to a running checksum.
pub fn pseudo_header(
    sum: &mut Checksum,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: IpProtocol,
    length: u16,
) {
    sum.accumulate(&src.octets())
        .accumulate(&dst.octets())
        .add_u16(u16::from(u8::from(protocol)))
        .add_u16(length);
}

pub struct Ipv4Packet<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Ipv4Packet<T> {
    pub fn new_unchecked(buffer: T) -> Self {
        Ipv4Packet { buffer }
    }

    /// Validates version, header length and total length against the buffer.
    ///
    /// The buffer may be longer than the total length (Ethernet padding); the
    /// excess is excluded from [`Ipv4Packet::payload`].
    pub fn new_checked(buffer: T) -> Result<Self, DecodingError> {
        let packet = Ipv4Packet { buffer };
        let len = packet.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(decoding("ipv4 header"));
        }
        if packet.version() != 4 {
            return Err(decoding("version"));
        }
        let header_len = packet.header_len();
        if header_len < HEADER_LEN || header_len > len {
            return Err(decoding("ihl"));
        }
        let total_len = usize::from(packet.total_len());
        if total_len < header_len || total_len > len {
            return Err(decoding("total length"));
        }
        Ok(packet)
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[field::VER_IHL] >> 4
    }

    /// Header length in bytes.
    #[must_use]
    pub fn header_len(&self) -> usize {
        usize::from(self.buffer.as_ref()[field::VER_IHL] & 0x0f) * 4
    }

    #[must_use]
    pub fn tos(&self) -> u8 {
        self.buffer.as_ref()[field::TOS]
    }

    #[must_use]
    pub fn total_len(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::LENGTH])
    }

    #[must_use]
    pub fn ident(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::IDENT])
    }

    #[must_use]
    pub fn flags_frag(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::FLG_OFF])
    }

    #[must_use]
    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[field::TTL]
    }

    #[must_use]
    pub fn protocol_raw(&self) -> u8 {
        self.buffer.as_ref()[field::PROTOCOL]
    }

    #[must_use]
    pub fn protocol(&self) -> Option<IpProtocol> {
        IpProtocol::try_from(self.protocol_raw()).ok()
    }

    #[must_use]
    pub fn header_checksum(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    #[must_use]
    pub fn src_addr(&self) -> Ipv4Addr {
        let b = &self.buffer.as_ref()[field::SRC];
        Ipv4Addr::new(b[0], b[1], b[2], b[3])
    }

    #[must_use]
    pub fn dst_addr(&self) -> Ipv4Addr {
        let b = &self.buffer.as_ref()[field::DST];
        Ipv4Addr::new(b[0], b[1], b[2], b[3])
    }

    #[must_use]
    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..self.header_len()]
    }

    /// Bytes between the header and the declared total length.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let total_len = usize::from(self.total_len());
        &self.buffer.as_ref()[self.header_len()..total_len]
    }

    /// The header checksum over all `ihl * 4` bytes, options included, folds to zero.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        checksum(&self.buffer.as_ref()[..self.header_len()]) == 0
    }
}

impl<'a> Ipv4Packet<&'a [u8]> {
    /// Like [`Ipv4Packet::payload`] but borrowing from the underlying buffer.
    #[must_use]
    pub fn into_payload(self) -> &'a [u8] {
        let range = self.header_len()..usize::from(self.total_len());
        &self.buffer[range]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv4Packet<T> {
    /// Sets version 4 and a header length of `header_len` bytes.
    pub fn set_header_len(&mut self, header_len: usize) {
        self.buffer.as_mut()[field::VER_IHL] = 0x40 | ((header_len / 4) as u8 & 0x0f);
    }

    pub fn set_tos(&mut self, tos: u8) {
        self.buffer.as_mut()[field::TOS] = tos;
    }

    pub fn set_total_len(&mut self, len: u16) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::LENGTH], len);
    }

    pub fn set_ident(&mut self, ident: u16) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::IDENT], ident);
    }

    pub fn set_flags_frag(&mut self, value: u16) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::FLG_OFF], value);
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.buffer.as_mut()[field::TTL] = ttl;
    }

    pub fn set_protocol(&mut self, protocol: IpProtocol) {
        self.buffer.as_mut()[field::PROTOCOL] = protocol.into();
    }

    pub fn set_header_checksum(&mut self, value: u16) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        self.buffer.as_mut()[field::SRC].copy_from_slice(&addr.octets());
    }

    pub fn set_dst_addr(&mut self, addr: Ipv4Addr) {
        self.buffer.as_mut()[field::DST].copy_from_slice(&addr.octets());
    }

    pub fn swap_addresses(&mut self) {
        let src = self.src_addr();
        let dst = self.dst_addr();
        self.set_src_addr(dst);
        self.set_dst_addr(src);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let range = self.header_len()..usize::from(self.total_len());
        &mut self.buffer.as_mut()[range]
    }

    pub fn fill_checksum(&mut self) {
        self.set_header_checksum(0);
        let sum = checksum(&self.buffer.as_ref()[..self.header_len()]);
        self.set_header_checksum(sum);
    }
}

/// Header fields of an outgoing datagram without options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Repr {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: IpProtocol,
    pub ident: u16,
    pub ttl: u8,
    pub payload_len: usize,
}

impl Ipv4Repr {
    /// Writes a checksummed 20-byte header into `header`.
    pub fn emit(&self, header: &mut [u8]) {
        let mut packet = Ipv4Packet::new_unchecked(header);
        packet.set_header_len(HEADER_LEN);
        packet.set_tos(0);
        packet.set_total_len((HEADER_LEN + self.payload_len) as u16);
        packet.set_ident(self.ident);
        packet.set_flags_frag(0);
        packet.set_ttl(self.ttl);
        packet.set_protocol(self.protocol);
        packet.set_src_addr(self.src);
        packet.set_dst_addr(self.dst);
        packet.fill_checksum();
    }
}
