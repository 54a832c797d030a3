use byteorder::{BigEndian, ByteOrder};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{decoding, DecodingError};
use crate::utils::checksum;

pub const HEADER_LEN: usize = 8;

mod field {
    use std::ops::Range;

    pub const TYPE: usize = 0;
    pub const CODE: usize = 1;
    pub const CHECKSUM: Range<usize> = 2..4;
    pub const IDENT: Range<usize> = 4..6;
    pub const SEQ: Range<usize> = 6..8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    EchoRequest = 8,
}

/// ICMP echo message: 8-byte header followed by opaque data.
pub struct IcmpPacket<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> IcmpPacket<T> {
    pub fn new_checked(buffer: T) -> Result<Self, DecodingError> {
        if buffer.as_ref().len() < HEADER_LEN {
            return Err(decoding("icmp header"));
        }
        Ok(IcmpPacket { buffer })
    }

    #[must_use]
    pub fn msg_type(&self) -> Option<IcmpType> {
        IcmpType::try_from(self.buffer.as_ref()[field::TYPE]).ok()
    }

    #[must_use]
    pub fn code(&self) -> u8 {
        self.buffer.as_ref()[field::CODE]
    }

    #[must_use]
    pub fn ident(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::IDENT])
    }

    #[must_use]
    pub fn seq_no(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::SEQ])
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..]
    }

    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        checksum(self.buffer.as_ref()) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> IcmpPacket<T> {
    pub fn set_msg_type(&mut self, msg_type: IcmpType) {
        self.buffer.as_mut()[field::TYPE] = msg_type.into();
    }

    pub fn set_code(&mut self, code: u8) {
        self.buffer.as_mut()[field::CODE] = code;
    }

    pub fn fill_checksum(&mut self) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], 0);
        let sum = checksum(self.buffer.as_ref());
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_request_to_reply() {
        let mut buf = vec![8, 0, 0, 0, 0x12, 0x34, 0x00, 0x01, b'a', b'b', b'c'];
        let mut packet = IcmpPacket::new_checked(&mut buf[..]).unwrap();
        packet.fill_checksum();
        assert!(packet.verify_checksum());
        assert_eq!(packet.msg_type(), Some(IcmpType::EchoRequest));

        packet.set_msg_type(IcmpType::EchoReply);
        packet.fill_checksum();
        assert!(packet.verify_checksum());
        assert_eq!(packet.ident(), 0x1234);
        assert_eq!(packet.seq_no(), 1);
        assert_eq!(packet.data(), b"abc");
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn truncated() {
        assert!(IcmpPacket::new_checked(&[8u8, 0, 0][..]).is_err());
    }
}
