use std::{fmt, net::Ipv4Addr};

use byteorder::{BigEndian, ByteOrder};

use super::{
    decoding,
    ipv4::{pseudo_header, IpProtocol},
    DecodingError,
};
use crate::utils::{Checksum, Seq32};

pub const HEADER_LEN: usize = 20;
/// Header length of a SYN carrying the MSS option.
pub const SYN_HEADER_LEN: usize = 24;
pub const DEFAULT_WINDOW: u16 = 1024;
pub const DEFAULT_MSS: u16 = 1460;

mod field {
    use std::ops::Range;

    pub const SRC_PORT: Range<usize> = 0..2;
    pub const DST_PORT: Range<usize> = 2..4;
    pub const SEQ: Range<usize> = 4..8;
    pub const ACK: Range<usize> = 8..12;
    pub const OFF_FLAGS: Range<usize> = 12..14;
    pub const WINDOW: Range<usize> = 14..16;
    pub const CHECKSUM: Range<usize> = 16..18;
    pub const URGENT: Range<usize> = 18..20;
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(u16);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x01);
    pub const SYN: TcpFlags = TcpFlags(0x02);
    pub const RST: TcpFlags = TcpFlags(0x04);
    pub const PSH: TcpFlags = TcpFlags(0x08);
    pub const ACK: TcpFlags = TcpFlags(0x10);
    pub const URG: TcpFlags = TcpFlags(0x20);

    const MASK: u16 = 0x01ff;

    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        TcpFlags(bits & Self::MASK)
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: TcpFlags) -> Self {
        TcpFlags(self.0 | other.0)
    }

    /// Classifies the flag set the way the session dispatches on it.
    #[must_use]
    pub fn control(self) -> TcpControl {
        if self.contains(Self::RST) {
            TcpControl::Rst
        } else if self.contains(Self::SYN.union(Self::ACK)) {
            TcpControl::SynAck
        } else if self.contains(Self::SYN) {
            TcpControl::Syn
        } else if self.contains(Self::FIN.union(Self::ACK)) {
            TcpControl::FinAck
        } else if self.contains(Self::PSH.union(Self::ACK)) {
            TcpControl::PshAck
        } else if self.contains(Self::ACK) {
            TcpControl::Ack
        } else {
            TcpControl::Other
        }
    }
}

impl std::ops::BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> TcpFlags {
        self.union(rhs)
    }
}

impl fmt::Debug for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(TcpFlags, &str); 6] = [
            (TcpFlags::SYN, "SYN"),
            (TcpFlags::FIN, "FIN"),
            (TcpFlags::RST, "RST"),
            (TcpFlags::PSH, "PSH"),
            (TcpFlags::ACK, "ACK"),
            (TcpFlags::URG, "URG"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpControl {
    Syn,
    SynAck,
    PshAck,
    FinAck,
    Ack,
    Rst,
    Other,
}

pub struct TcpSegment<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> TcpSegment<T> {
    pub fn new_unchecked(buffer: T) -> Self {
        TcpSegment { buffer }
    }

    /// `buffer` must be exactly the IPv4 payload so that the segment length is
    /// known.
    pub fn new_checked(buffer: T) -> Result<Self, DecodingError> {
        let segment = TcpSegment { buffer };
        let len = segment.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(decoding("tcp header"));
        }
        let header_len = segment.header_len();
        if header_len < HEADER_LEN || header_len > len {
            return Err(decoding("data offset"));
        }
        Ok(segment)
    }

    #[must_use]
    pub fn src_port(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::SRC_PORT])
    }

    #[must_use]
    pub fn dst_port(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::DST_PORT])
    }

    #[must_use]
    pub fn seq_number(&self) -> Seq32 {
        Seq32::from_u32(BigEndian::read_u32(&self.buffer.as_ref()[field::SEQ]))
    }

    #[must_use]
    pub fn ack_number(&self) -> Seq32 {
        Seq32::from_u32(BigEndian::read_u32(&self.buffer.as_ref()[field::ACK]))
    }

    /// Header length in bytes taken from the data offset.
    #[must_use]
    pub fn header_len(&self) -> usize {
        usize::from(self.buffer.as_ref()[field::OFF_FLAGS.start] >> 4) * 4
    }

    #[must_use]
    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_bits(BigEndian::read_u16(&self.buffer.as_ref()[field::OFF_FLAGS]))
    }

    #[must_use]
    pub fn window(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::WINDOW])
    }

    #[must_use]
    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..self.header_len()]
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..]
    }

    #[must_use]
    pub fn verify_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        let data = self.buffer.as_ref();
        let mut sum = Checksum::new();
        pseudo_header(&mut sum, src, dst, IpProtocol::Tcp, data.len() as u16);
        sum.accumulate(data);
        sum.finalize() == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> TcpSegment<T> {
    pub fn set_src_port(&mut self, port: u16) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::SRC_PORT], port);
    }

    pub fn set_dst_port(&mut self, port: u16) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::DST_PORT], port);
    }

    pub fn set_seq_number(&mut self, seq: Seq32) {
        BigEndian::write_u32(&mut self.buffer.as_mut()[field::SEQ], seq.to_u32());
    }

    pub fn set_ack_number(&mut self, ack: Seq32) {
        BigEndian::write_u32(&mut self.buffer.as_mut()[field::ACK], ack.to_u32());
    }

    pub fn set_header_len_and_flags(&mut self, header_len: usize, flags: TcpFlags) {
        let word = (((header_len / 4) as u16) << 12) | flags.bits();
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::OFF_FLAGS], word);
    }

    pub fn set_window(&mut self, window: u16) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::WINDOW], window);
    }

    pub fn set_urgent(&mut self, urgent: u16) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::URGENT], urgent);
    }

    pub fn swap_ports(&mut self) {
        let src = self.src_port();
        let dst = self.dst_port();
        self.set_src_port(dst);
        self.set_dst_port(src);
    }

    pub fn fill_checksum(&mut self, src: Ipv4Addr, dst: Ipv4Addr) {
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], 0);
        let data = self.buffer.as_ref();
        let mut sum = Checksum::new();
        pseudo_header(&mut sum, src, dst, IpProtocol::Tcp, data.len() as u16);
        sum.accumulate(data);
        let value = sum.finalize();
        BigEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }
}

/// Header of an outgoing segment. The checksum is filled separately once the
/// payload is in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpRepr {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: Seq32,
    pub ack: Seq32,
    pub flags: TcpFlags,
    pub window: u16,
    /// Advertised MSS; only written on SYN segments.
    pub mss: Option<u16>,
}

impl TcpRepr {
    #[must_use]
    pub fn header_len(&self) -> usize {
        match self.mss {
            Some(_) => SYN_HEADER_LEN,
            None => HEADER_LEN,
        }
    }

    pub fn emit(&self, header: &mut [u8]) {
        let header_len = self.header_len();
        let mut segment = TcpSegment::new_unchecked(&mut header[..header_len]);
        segment.set_src_port(self.src_port);
        segment.set_dst_port(self.dst_port);
        segment.set_seq_number(self.seq);
        segment.set_ack_number(self.ack);
        segment.set_header_len_and_flags(header_len, self.flags);
        segment.set_window(self.window);
        segment.set_urgent(0);
        if let Some(mss) = self.mss {
            let options = &mut header[HEADER_LEN..SYN_HEADER_LEN];
            options[0] = 2;
            options[1] = 4;
            BigEndian::write_u16(&mut options[2..4], mss);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 118);

    #[test]
    fn classify() {
        let f = TcpFlags::from_bits;
        assert_eq!(f(0x8012).control(), TcpControl::SynAck);
        assert_eq!(f(0x5018).control(), TcpControl::PshAck);
        assert_eq!(f(0x5011).control(), TcpControl::FinAck);
        assert_eq!(f(0x5019).control(), TcpControl::FinAck);
        assert_eq!(f(0x5010).control(), TcpControl::Ack);
        assert_eq!(f(0x6002).control(), TcpControl::Syn);
        assert_eq!(f(0x5014).control(), TcpControl::Rst);
        assert_eq!(f(0x5000).control(), TcpControl::Other);
    }

    #[test]
    fn flags_debug() {
        assert_eq!(format!("{:?}", TcpFlags::SYN | TcpFlags::ACK), "SYN|ACK");
        assert_eq!(format!("{:?}", TcpFlags::default()), "-");
    }

    #[test]
    fn emit_and_parse() {
        let repr = TcpRepr {
            src_port: 1883,
            dst_port: 50000,
            seq: Seq32::from_u32(100),
            ack: Seq32::from_u32(u32::MAX),
            flags: TcpFlags::PSH | TcpFlags::ACK,
            window: DEFAULT_WINDOW,
            mss: None,
        };
        let mut buf = vec![0u8; HEADER_LEN + 3];
        repr.emit(&mut buf);
        buf[HEADER_LEN..].copy_from_slice(b"abc");
        let mut segment = TcpSegment::new_checked(&mut buf[..]).unwrap();
        segment.fill_checksum(SRC, DST);
        assert!(segment.verify_checksum(SRC, DST));
        assert_eq!(segment.header_len(), 20);
        assert_eq!(segment.flags().control(), TcpControl::PshAck);
        assert_eq!(segment.seq_number(), Seq32::from_u32(100));
        assert_eq!(segment.ack_number().to_u32(), u32::MAX);
        assert_eq!(segment.payload(), b"abc");
        assert_eq!(&buf[12..14], &[0x50, 0x18]);
    }

    #[test]
    fn syn_carries_mss() {
        let repr = TcpRepr {
            src_port: 50000,
            dst_port: 1883,
            seq: Seq32::from_u32(1),
            ack: Seq32::from_u32(0),
            flags: TcpFlags::SYN,
            window: DEFAULT_WINDOW,
            mss: Some(DEFAULT_MSS),
        };
        let mut buf = vec![0u8; SYN_HEADER_LEN];
        repr.emit(&mut buf);
        let segment = TcpSegment::new_checked(&buf[..]).unwrap();
        assert_eq!(segment.header_len(), 24);
        assert_eq!(segment.options(), &[2, 4, 0x05, 0xb4]);
        assert!(segment.payload().is_empty());
    }

    #[test]
    fn bad_data_offset() {
        let mut buf = vec![0u8; 20];
        buf[12] = 0x40;
        assert!(TcpSegment::new_checked(&buf[..]).is_err());
        buf[12] = 0x60;
        assert!(TcpSegment::new_checked(&buf[..]).is_err());
        buf[12] = 0x50;
        assert!(TcpSegment::new_checked(&buf[..]).is_ok());
    }
}
