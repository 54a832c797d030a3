use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{decoding, DecodingError, MacAddress};

pub const PACKET_LEN: usize = 28;
const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;

mod field {
    use std::ops::Range;

    pub const HTYPE: Range<usize> = 0..2;
    pub const PTYPE: Range<usize> = 2..4;
    pub const HLEN: usize = 4;
    pub const PLEN: usize = 5;
    pub const OPER: Range<usize> = 6..8;
    pub const SHA: Range<usize> = 8..14;
    pub const SPA: Range<usize> = 14..18;
    pub const THA: Range<usize> = 18..24;
    pub const TPA: Range<usize> = 24..28;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum ArpOperation {
    Request = 1,
    Reply = 2,
}

/// Ethernet/IPv4 ARP packet.
pub struct ArpPacket<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> ArpPacket<T> {
    pub fn new_unchecked(buffer: T) -> Self {
        ArpPacket { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Self, DecodingError> {
        let packet = ArpPacket { buffer };
        let data = packet.buffer.as_ref();
        if data.len() < PACKET_LEN {
            return Err(decoding("arp packet"));
        }
        if BigEndian::read_u16(&data[field::HTYPE]) != HTYPE_ETHERNET
            || BigEndian::read_u16(&data[field::PTYPE]) != PTYPE_IPV4
            || data[field::HLEN] != 6
            || data[field::PLEN] != 4
        {
            return Err(decoding("arp address types"));
        }
        Ok(packet)
    }

    #[must_use]
    pub fn operation_raw(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::OPER])
    }

    #[must_use]
    pub fn operation(&self) -> Option<ArpOperation> {
        ArpOperation::try_from(self.operation_raw()).ok()
    }

    #[must_use]
    pub fn sender_mac(&self) -> MacAddress {
        let mut mac = [0; 6];
        mac.copy_from_slice(&self.buffer.as_ref()[field::SHA]);
        MacAddress(mac)
    }

    #[must_use]
    pub fn sender_ip(&self) -> Ipv4Addr {
        let b = &self.buffer.as_ref()[field::SPA];
        Ipv4Addr::new(b[0], b[1], b[2], b[3])
    }

    #[must_use]
    pub fn target_mac(&self) -> MacAddress {
        let mut mac = [0; 6];
        mac.copy_from_slice(&self.buffer.as_ref()[field::THA]);
        MacAddress(mac)
    }

    #[must_use]
    pub fn target_ip(&self) -> Ipv4Addr {
        let b = &self.buffer.as_ref()[field::TPA];
        Ipv4Addr::new(b[0], b[1], b[2], b[3])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpRepr {
    pub operation: ArpOperation,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddress,
    pub target_ip: Ipv4Addr,
}

impl ArpRepr {
    pub fn parse<T: AsRef<[u8]>>(packet: &ArpPacket<T>) -> Result<Self, DecodingError> {
        let operation = packet.operation().ok_or_else(|| decoding("operation"))?;
        Ok(ArpRepr {
            operation,
            sender_mac: packet.sender_mac(),
            sender_ip: packet.sender_ip(),
            target_mac: packet.target_mac(),
            target_ip: packet.target_ip(),
        })
    }

    /// Writes the 28-byte packet into the front of `buf`.
    pub fn emit(&self, buf: &mut [u8]) {
        let data = &mut buf[..PACKET_LEN];
        BigEndian::write_u16(&mut data[field::HTYPE], HTYPE_ETHERNET);
        BigEndian::write_u16(&mut data[field::PTYPE], PTYPE_IPV4);
        data[field::HLEN] = 6;
        data[field::PLEN] = 4;
        BigEndian::write_u16(&mut data[field::OPER], self.operation.into());
        data[field::SHA].copy_from_slice(&self.sender_mac.0);
        data[field::SPA].copy_from_slice(&self.sender_ip.octets());
        data[field::THA].copy_from_slice(&self.target_mac.0);
        data[field::TPA].copy_from_slice(&self.target_ip.octets());
    }
}
