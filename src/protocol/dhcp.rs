use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{decoding, DecodingError, EncodingError, MacAddress};

pub const CLIENT_PORT: u16 = 68;
pub const SERVER_PORT: u16 = 67;
pub const MAGIC_COOKIE: u32 = 0x6382_5363;
/// BOOTP fixed part plus the magic cookie.
pub const FIXED_LEN: usize = 240;
pub const FLAG_BROADCAST: u16 = 0x8000;

const OP_BOOTREQUEST: u8 = 1;
const OP_BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;

mod field {
    use std::ops::Range;

    pub const OP: usize = 0;
    pub const HTYPE: usize = 1;
    pub const HLEN: usize = 2;
    pub const XID: Range<usize> = 4..8;
    pub const FLAGS: Range<usize> = 10..12;
    pub const CIADDR: Range<usize> = 12..16;
    pub const YIADDR: Range<usize> = 16..20;
    pub const SIADDR: Range<usize> = 20..24;
    pub const GIADDR: Range<usize> = 24..28;
    pub const CHADDR: Range<usize> = 28..44;
    pub const MAGIC: Range<usize> = 236..240;
}

pub mod option {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS_SERVER: u8 = 6;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const PARAMETER_REQUEST: u8 = 55;
    pub const CLIENT_ID: u8 = 61;
    pub const END: u8 = 255;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpOption<'a> {
    pub code: u8,
    pub data: &'a [u8],
}

/// Walks `{code, len, value}` triples, skipping each by its own length byte.
///
/// Stops after the END option. Yields one error and then stops if a length byte
/// runs past the buffer.
pub struct DhcpOptions<'a> {
    data: &'a [u8],
    done: bool,
}

impl<'a> DhcpOptions<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        DhcpOptions { data, done: false }
    }
}

impl<'a> Iterator for DhcpOptions<'a> {
    type Item = Result<DhcpOption<'a>, DecodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            let (&code, rest) = match self.data.split_first() {
                Some(x) => x,
                None => {
                    self.done = true;
                    return None;
                }
            };
            match code {
                option::PAD => {
                    self.data = rest;
                    continue;
                }
                option::END => {
                    self.done = true;
                    return None;
                }
                _ => (),
            }
            let len = match rest.first() {
                Some(&len) => usize::from(len),
                None => {
                    self.done = true;
                    return Some(Err(decoding("option length")));
                }
            };
            if rest.len() < 1 + len {
                self.done = true;
                return Some(Err(decoding("option value")));
            }
            let data = &rest[1..1 + len];
            self.data = &rest[1 + len..];
            return Some(Ok(DhcpOption { code, data }));
        }
    }
}

pub struct DhcpMessage<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> DhcpMessage<T> {
    /// `buffer` is the UDP payload.
    pub fn new_checked(buffer: T) -> Result<Self, DecodingError> {
        let message = DhcpMessage { buffer };
        let data = message.buffer.as_ref();
        if data.len() < FIXED_LEN {
            return Err(decoding("dhcp fixed part"));
        }
        if BigEndian::read_u32(&data[field::MAGIC]) != MAGIC_COOKIE {
            return Err(decoding("magic cookie"));
        }
        Ok(message)
    }

    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.buffer.as_ref()[field::OP] == OP_BOOTREPLY
    }

    #[must_use]
    pub fn xid(&self) -> u32 {
        BigEndian::read_u32(&self.buffer.as_ref()[field::XID])
    }

    #[must_use]
    pub fn flags(&self) -> u16 {
        BigEndian::read_u16(&self.buffer.as_ref()[field::FLAGS])
    }

    fn addr(&self, range: std::ops::Range<usize>) -> Ipv4Addr {
        let b = &self.buffer.as_ref()[range];
        Ipv4Addr::new(b[0], b[1], b[2], b[3])
    }

    #[must_use]
    pub fn ciaddr(&self) -> Ipv4Addr {
        self.addr(field::CIADDR)
    }

    #[must_use]
    pub fn yiaddr(&self) -> Ipv4Addr {
        self.addr(field::YIADDR)
    }

    #[must_use]
    pub fn siaddr(&self) -> Ipv4Addr {
        self.addr(field::SIADDR)
    }

    #[must_use]
    pub fn giaddr(&self) -> Ipv4Addr {
        self.addr(field::GIADDR)
    }

    /// First six bytes of `chaddr`.
    #[must_use]
    pub fn client_mac(&self) -> MacAddress {
        let mut mac = [0; 6];
        mac.copy_from_slice(&self.buffer.as_ref()[field::CHADDR][..6]);
        MacAddress(mac)
    }

    #[must_use]
    pub fn options(&self) -> DhcpOptions<'_> {
        DhcpOptions::new(&self.buffer.as_ref()[FIXED_LEN..])
    }

    /// Value of the first well-formed option with `code`.
    #[must_use]
    pub fn find_option(&self, code: u8) -> Option<&[u8]> {
        self.options()
            .map_while(Result::ok)
            .find(|opt| opt.code == code)
            .map(|opt| opt.data)
    }

    fn option_addr(&self, code: u8) -> Option<Ipv4Addr> {
        let data = self.find_option(code)?;
        let b = data.get(..4)?;
        Some(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
    }

    #[must_use]
    pub fn message_type(&self) -> Option<DhcpMessageType> {
        let data = self.find_option(option::MESSAGE_TYPE)?;
        DhcpMessageType::try_from(*data.first()?).ok()
    }

    #[must_use]
    pub fn server_id(&self) -> Option<Ipv4Addr> {
        self.option_addr(option::SERVER_ID)
    }

    #[must_use]
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.option_addr(option::REQUESTED_IP)
    }

    #[must_use]
    pub fn subnet_mask(&self) -> Option<Ipv4Addr> {
        self.option_addr(option::SUBNET_MASK)
    }

    /// First router in the list.
    #[must_use]
    pub fn router(&self) -> Option<Ipv4Addr> {
        self.option_addr(option::ROUTER)
    }

    /// First DNS server in the list.
    #[must_use]
    pub fn dns_server(&self) -> Option<Ipv4Addr> {
        self.option_addr(option::DNS_SERVER)
    }

    /// Lease time in seconds.
    #[must_use]
    pub fn lease_time(&self) -> Option<u32> {
        let data = self.find_option(option::LEASE_TIME)?;
        Some(BigEndian::read_u32(data.get(..4)?))
    }
}

/// A client message: BOOTREQUEST with a fixed option block per message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpRepr {
    pub message_type: DhcpMessageType,
    pub xid: u32,
    pub broadcast: bool,
    pub client_ip: Ipv4Addr,
    pub client_mac: MacAddress,
    pub requested_ip: Option<Ipv4Addr>,
    pub server_id: Option<Ipv4Addr>,
}

impl DhcpRepr {
    fn requests_parameters(&self) -> bool {
        matches!(
            self.message_type,
            DhcpMessageType::Discover | DhcpMessageType::Request
        )
    }

    /// Options 53, 61, then 50 and 54 when set, then 55 on DISCOVER/REQUEST, then 255.
    pub fn emit_options(&self, wtr: &mut Vec<u8>) -> Result<(), EncodingError> {
        wtr.write_u8(option::MESSAGE_TYPE)?;
        wtr.write_u8(1)?;
        wtr.write_u8(self.message_type.into())?;

        wtr.write_u8(option::CLIENT_ID)?;
        wtr.write_u8(7)?;
        wtr.write_u8(HTYPE_ETHERNET)?;
        wtr.extend_from_slice(&self.client_mac.0);

        if let Some(ip) = self.requested_ip {
            wtr.write_u8(option::REQUESTED_IP)?;
            wtr.write_u8(4)?;
            wtr.extend_from_slice(&ip.octets());
        }
        if let Some(ip) = self.server_id {
            wtr.write_u8(option::SERVER_ID)?;
            wtr.write_u8(4)?;
            wtr.extend_from_slice(&ip.octets());
        }
        if self.requests_parameters() {
            wtr.write_u8(option::PARAMETER_REQUEST)?;
            wtr.write_u8(4)?;
            wtr.extend_from_slice(&[
                option::SUBNET_MASK,
                option::ROUTER,
                option::LEASE_TIME,
                option::DNS_SERVER,
            ]);
        }
        wtr.write_u8(option::END)?;
        Ok(())
    }

    /// Serializes the whole message; its length follows from the options written.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = vec![0u8; FIXED_LEN];
        buf[field::OP] = OP_BOOTREQUEST;
        buf[field::HTYPE] = HTYPE_ETHERNET;
        buf[field::HLEN] = 6;
        BigEndian::write_u32(&mut buf[field::XID], self.xid);
        let flags = if self.broadcast { FLAG_BROADCAST } else { 0 };
        BigEndian::write_u16(&mut buf[field::FLAGS], flags);
        buf[field::CIADDR].copy_from_slice(&self.client_ip.octets());
        buf[field::CHADDR][..6].copy_from_slice(&self.client_mac.0);
        BigEndian::write_u32(&mut buf[field::MAGIC], MAGIC_COOKIE);
        self.emit_options(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const MAC: MacAddress = MacAddress([2, 3, 4, 5, 6, 0x76]);

    /// A server reply as a UDP payload.
    pub(crate) fn server_reply(
        message_type: DhcpMessageType,
        chaddr: MacAddress,
        yiaddr: Ipv4Addr,
        extra: &[(u8, &[u8])],
    ) -> Vec<u8> {
        let mut buf = vec![0u8; FIXED_LEN];
        buf[field::OP] = OP_BOOTREPLY;
        buf[field::HTYPE] = HTYPE_ETHERNET;
        buf[field::HLEN] = 6;
        BigEndian::write_u32(&mut buf[field::XID], 0x1234_5678);
        buf[field::YIADDR].copy_from_slice(&yiaddr.octets());
        buf[field::CHADDR][..6].copy_from_slice(&chaddr.0);
        BigEndian::write_u32(&mut buf[field::MAGIC], MAGIC_COOKIE);
        buf.extend_from_slice(&[option::MESSAGE_TYPE, 1, message_type.into()]);
        for (code, data) in extra {
            buf.push(*code);
            buf.push(data.len() as u8);
            buf.extend_from_slice(data);
        }
        buf.push(option::END);
        buf
    }

    #[test]
    fn parse_offer() {
        let buf = server_reply(
            DhcpMessageType::Offer,
            MAC,
            Ipv4Addr::new(192, 168, 1, 50),
            &[
                (option::SERVER_ID, &[192, 168, 1, 1]),
                (option::SUBNET_MASK, &[255, 255, 255, 0]),
                (option::ROUTER, &[192, 168, 1, 1, 192, 168, 1, 2]),
                (option::LEASE_TIME, &[0, 0, 0x0e, 0x10]),
            ],
        );
        let msg = DhcpMessage::new_checked(&buf[..]).unwrap();
        assert!(msg.is_reply());
        assert_eq!(msg.xid(), 0x1234_5678);
        assert_eq!(msg.client_mac(), MAC);
        assert_eq!(msg.message_type(), Some(DhcpMessageType::Offer));
        assert_eq!(msg.yiaddr(), Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(msg.server_id(), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(msg.subnet_mask(), Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(msg.router(), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(msg.lease_time(), Some(3600));
        assert_eq!(msg.dns_server(), None);
    }

    #[test]
    fn options_skip_by_length() {
        // pad, an unknown option whose value contains 53, then the real 53
        let data = [0, 200, 3, 53, 1, 6, 53, 1, 5, 255, 53, 1, 1];
        let opts: Vec<_> = DhcpOptions::new(&data).collect();
        assert_eq!(opts.len(), 2);
        assert_eq!(opts[1], Ok(DhcpOption { code: 53, data: &[5] }));
    }

    #[test]
    fn truncated_option() {
        let data = [53, 1, 2, 54, 4, 192, 168];
        let mut opts = DhcpOptions::new(&data);
        assert!(opts.next().unwrap().is_ok());
        assert!(opts.next().unwrap().is_err());
        assert!(opts.next().is_none());
    }

    #[test]
    fn missing_end_is_tolerated() {
        let data = [53, 1, 2];
        assert_eq!(DhcpOptions::new(&data).count(), 1);
    }

    #[test]
    fn bad_cookie() {
        let mut buf = server_reply(DhcpMessageType::Ack, MAC, Ipv4Addr::UNSPECIFIED, &[]);
        buf[236] = 0;
        assert!(DhcpMessage::new_checked(&buf[..]).is_err());
        assert!(DhcpMessage::new_checked(&[0u8; 239][..]).is_err());
    }

    #[test]
    fn discover_block() {
        let repr = DhcpRepr {
            message_type: DhcpMessageType::Discover,
            xid: 0x1234_5678,
            broadcast: true,
            client_ip: Ipv4Addr::UNSPECIFIED,
            client_mac: MAC,
            requested_ip: None,
            server_id: None,
        };
        let buf = repr.to_bytes().unwrap();
        assert_eq!(buf.len(), FIXED_LEN + 19);
        assert_eq!(
            &buf[FIXED_LEN..],
            &[53, 1, 1, 61, 7, 1, 2, 3, 4, 5, 6, 0x76, 55, 4, 1, 3, 51, 6, 255]
        );
        let msg = DhcpMessage::new_checked(&buf[..]).unwrap();
        assert!(!msg.is_reply());
        assert_eq!(msg.flags(), FLAG_BROADCAST);
        assert_eq!(msg.client_mac(), MAC);
    }

    #[test]
    fn request_block() {
        let repr = DhcpRepr {
            message_type: DhcpMessageType::Request,
            xid: 0x1234_5678,
            broadcast: true,
            client_ip: Ipv4Addr::UNSPECIFIED,
            client_mac: MAC,
            requested_ip: Some(Ipv4Addr::new(192, 168, 1, 50)),
            server_id: Some(Ipv4Addr::new(192, 168, 1, 1)),
        };
        let buf = repr.to_bytes().unwrap();
        assert_eq!(buf.len(), FIXED_LEN + 31);
        let msg = DhcpMessage::new_checked(&buf[..]).unwrap();
        assert_eq!(msg.requested_ip(), Some(Ipv4Addr::new(192, 168, 1, 50)));
        assert_eq!(msg.server_id(), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(msg.message_type(), Some(DhcpMessageType::Request));
    }

    #[test]
    fn release_has_no_parameter_request() {
        let repr = DhcpRepr {
            message_type: DhcpMessageType::Release,
            xid: 1,
            broadcast: false,
            client_ip: Ipv4Addr::new(192, 168, 1, 50),
            client_mac: MAC,
            requested_ip: None,
            server_id: Some(Ipv4Addr::new(192, 168, 1, 1)),
        };
        let buf = repr.to_bytes().unwrap();
        let msg = DhcpMessage::new_checked(&buf[..]).unwrap();
        assert_eq!(msg.find_option(option::PARAMETER_REQUEST), None);
        assert_eq!(msg.ciaddr(), Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(msg.flags(), 0);
    }
}
