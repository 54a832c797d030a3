use std::net::{Ipv4Addr, SocketAddrV4};

use thiserror::Error;

use crate::{
    protocol::{
        arp::{self, ArpOperation, ArpPacket, ArpRepr},
        dhcp::{self, DhcpMessageType, DhcpRepr},
        ethernet::{self, EtherType, EthernetFrame},
        icmp::{IcmpPacket, IcmpType},
        ipv4::{self, IpProtocol, Ipv4Packet, Ipv4Repr},
        mqtt::MqttPacket,
        tcp::{self, TcpFlags, TcpRepr, TcpSegment},
        udp::{self, UdpDatagram},
        DecodingError, EncodingError, MacAddress,
    },
    utils::{buf, BufWtr, OwnedBufWtr, Seq32},
};

const HEADROOM: usize = ethernet::HEADER_LEN + ipv4::HEADER_LEN + tcp::SYN_HEADER_LEN;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum BuildError {
    #[error("cannot reply to this frame: {0}")]
    Decoding(#[from] DecodingError),
    #[error("cannot encode frame: {0}")]
    Encoding(#[from] EncodingError),
}

impl From<buf::Error> for BuildError {
    fn from(e: buf::Error) -> Self {
        BuildError::Encoding(e.into())
    }
}

/// Addresses of the single TCP flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpFlow {
    /// Next-hop hardware address of the peer.
    pub remote_mac: MacAddress,
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
}

/// Assembles outgoing frames.
///
/// Replies are written in place over the received frame and return the length of
/// the reply. Initiated frames are built payload first in a buffer with front
/// headroom, prepending each header in turn.
#[derive(Debug)]
pub struct PacketBuilder {
    mac: MacAddress,
    next_ident: u16,
}

impl PacketBuilder {
    #[must_use]
    pub fn new(mac: MacAddress) -> Self {
        PacketBuilder { mac, next_ident: 1 }
    }

    #[must_use]
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn set_mac(&mut self, mac: MacAddress) {
        self.mac = mac;
    }

    fn next_ident(&mut self) -> u16 {
        let ident = self.next_ident;
        self.next_ident = self.next_ident.wrapping_add(1);
        ident
    }

    /// Turns the Ethernet header around so that the frame goes back to its sender.
    fn reply_ethernet(&self, frame: &mut [u8]) -> Result<(), BuildError> {
        let mut eth = EthernetFrame::new_checked(frame)?;
        let sender = eth.src();
        eth.set_dst(sender);
        eth.set_src(self.mac);
        Ok(())
    }

    /// Swaps addresses, assigns a fresh identification and shrinks the datagram to
    /// `header_len + payload_len` bytes. Returns the IPv4 header length.
    fn reply_ipv4(
        &mut self,
        frame: &mut [u8],
        payload_len: Option<usize>,
    ) -> Result<(usize, Ipv4Addr, Ipv4Addr), BuildError> {
        let ident = self.next_ident();
        let mut ip = Ipv4Packet::new_checked(&mut frame[ethernet::HEADER_LEN..])?;
        ip.swap_addresses();
        ip.set_ident(ident);
        ip.set_ttl(ipv4::DEFAULT_TTL);
        let header_len = ip.header_len();
        if let Some(payload_len) = payload_len {
            ip.set_total_len((header_len + payload_len) as u16);
        }
        ip.fill_checksum();
        Ok((header_len, ip.src_addr(), ip.dst_addr()))
    }

    fn ipv4_total_len(frame: &[u8]) -> Result<usize, BuildError> {
        let ip = Ipv4Packet::new_checked(&frame[ethernet::HEADER_LEN..])?;
        Ok(usize::from(ip.total_len()))
    }

    /// Answers an ARP request for `local_ip` in place.
    pub fn arp_reply(&self, frame: &mut [u8], local_ip: Ipv4Addr) -> Result<usize, BuildError> {
        let request = {
            let eth = EthernetFrame::new_checked(&*frame)?;
            let packet = ArpPacket::new_checked(eth.payload())?;
            ArpRepr::parse(&packet)?
        };
        self.reply_ethernet(frame)?;
        let reply = ArpRepr {
            operation: ArpOperation::Reply,
            sender_mac: self.mac,
            sender_ip: local_ip,
            target_mac: request.sender_mac,
            target_ip: request.sender_ip,
        };
        reply.emit(&mut frame[ethernet::HEADER_LEN..]);
        Ok(ethernet::HEADER_LEN + arp::PACKET_LEN)
    }

    /// Turns an ICMP echo request into its reply in place.
    pub fn echo_reply(&mut self, frame: &mut [u8]) -> Result<usize, BuildError> {
        let total_len = Self::ipv4_total_len(frame)?;
        self.reply_ethernet(frame)?;
        let (header_len, _, _) = self.reply_ipv4(frame, None)?;
        let start = ethernet::HEADER_LEN + header_len;
        let end = ethernet::HEADER_LEN + total_len;
        let mut icmp = IcmpPacket::new_checked(&mut frame[start..end])?;
        icmp.set_msg_type(IcmpType::EchoReply);
        icmp.set_code(0);
        icmp.fill_checksum();
        Ok(end)
    }

    /// Sends a UDP datagram back to its source with the same payload.
    ///
    /// The reply is cut to the UDP length, so bytes padding the received IPv4
    /// datagram past it are not echoed.
    pub fn udp_echo(&mut self, frame: &mut [u8]) -> Result<usize, BuildError> {
        let udp_len = {
            let ip = Ipv4Packet::new_checked(&frame[ethernet::HEADER_LEN..])?;
            usize::from(UdpDatagram::new_checked(ip.payload())?.len())
        };
        self.reply_ethernet(frame)?;
        let (header_len, src, dst) = self.reply_ipv4(frame, Some(udp_len))?;
        let start = ethernet::HEADER_LEN + header_len;
        let end = start + udp_len;
        let mut datagram = UdpDatagram::new_checked(&mut frame[start..end])?;
        datagram.swap_ports();
        datagram.fill_checksum(src, dst);
        Ok(end)
    }

    /// Rewrites a received segment into a header-only reply carrying `flags`.
    ///
    /// TCP options and payload of the received segment are dropped.
    pub fn tcp_reply(
        &mut self,
        frame: &mut [u8],
        flags: TcpFlags,
        seq: Seq32,
        ack: Seq32,
    ) -> Result<usize, BuildError> {
        {
            let ip = Ipv4Packet::new_checked(&frame[ethernet::HEADER_LEN..])?;
            TcpSegment::new_checked(ip.payload())?;
        }
        self.reply_ethernet(frame)?;
        let (header_len, src, dst) = self.reply_ipv4(frame, Some(tcp::HEADER_LEN))?;
        let start = ethernet::HEADER_LEN + header_len;
        let end = start + tcp::HEADER_LEN;
        let mut segment = TcpSegment::new_unchecked(&mut frame[start..end]);
        segment.swap_ports();
        segment.set_seq_number(seq);
        segment.set_ack_number(ack);
        segment.set_header_len_and_flags(tcp::HEADER_LEN, flags);
        segment.set_window(tcp::DEFAULT_WINDOW);
        segment.set_urgent(0);
        segment.fill_checksum(src, dst);
        Ok(end)
    }

    fn arp_frame(&self, dst: MacAddress, repr: &ArpRepr) -> Vec<u8> {
        let mut buf = vec![0u8; ethernet::HEADER_LEN + arp::PACKET_LEN];
        let mut eth = EthernetFrame::new_unchecked(&mut buf[..]);
        eth.set_dst(dst);
        eth.set_src(self.mac);
        eth.set_ethertype(EtherType::Arp);
        repr.emit(&mut buf[ethernet::HEADER_LEN..]);
        buf
    }

    #[must_use]
    pub fn arp_request(&self, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
        let repr = ArpRepr {
            operation: ArpOperation::Request,
            sender_mac: self.mac,
            sender_ip,
            target_mac: MacAddress::ZERO,
            target_ip,
        };
        self.arp_frame(MacAddress::BROADCAST, &repr)
    }

    /// Announces `ip` as ours: an ARP request whose sender and target address are
    /// both `ip`.
    #[must_use]
    pub fn gratuitous_arp(&self, ip: Ipv4Addr) -> Vec<u8> {
        self.arp_request(ip, ip)
    }

    fn payload_wtr(payload: &[u8]) -> Result<OwnedBufWtr, BuildError> {
        let mut wtr = OwnedBufWtr::new(HEADROOM + payload.len(), HEADROOM);
        wtr.append(payload)?;
        Ok(wtr)
    }

    fn finish_ipv4(
        &mut self,
        mut wtr: OwnedBufWtr,
        dst_mac: MacAddress,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: IpProtocol,
    ) -> Result<Vec<u8>, BuildError> {
        let payload_len = wtr.data_len();
        if ipv4::HEADER_LEN + payload_len > usize::from(u16::MAX) {
            return Err(EncodingError::OutOfRange {
                field: "total length",
            }
            .into());
        }
        let repr = Ipv4Repr {
            src,
            dst,
            protocol,
            ident: self.next_ident(),
            ttl: ipv4::DEFAULT_TTL,
            payload_len,
        };
        repr.emit(wtr.prepend_zeroed(ipv4::HEADER_LEN)?);

        let mut eth = EthernetFrame::new_unchecked(wtr.prepend_zeroed(ethernet::HEADER_LEN)?);
        eth.set_dst(dst_mac);
        eth.set_src(self.mac);
        eth.set_ethertype(EtherType::Ipv4);
        Ok(wtr.into_bytes())
    }

    pub fn udp_datagram(
        &mut self,
        dst_mac: MacAddress,
        src: SocketAddrV4,
        dst: SocketAddrV4,
        payload: &[u8],
    ) -> Result<Vec<u8>, BuildError> {
        let len = u16::try_from(udp::HEADER_LEN + payload.len())
            .map_err(|_| EncodingError::OutOfRange { field: "udp length" })?;
        let mut wtr = Self::payload_wtr(payload)?;
        wtr.prepend_zeroed(udp::HEADER_LEN)?;
        let mut datagram = UdpDatagram::new_unchecked(wtr.data_mut());
        datagram.set_src_port(src.port());
        datagram.set_dst_port(dst.port());
        datagram.set_len(len);
        datagram.fill_checksum(*src.ip(), *dst.ip());
        self.finish_ipv4(wtr, dst_mac, *src.ip(), *dst.ip(), IpProtocol::Udp)
    }

    pub fn tcp_segment(
        &mut self,
        flow: &TcpFlow,
        repr: &TcpRepr,
        payload: &[u8],
    ) -> Result<Vec<u8>, BuildError> {
        let mut wtr = Self::payload_wtr(payload)?;
        wtr.prepend_zeroed(repr.header_len())?;
        repr.emit(wtr.data_mut());
        TcpSegment::new_unchecked(wtr.data_mut()).fill_checksum(*flow.local.ip(), *flow.remote.ip());
        self.finish_ipv4(
            wtr,
            flow.remote_mac,
            *flow.local.ip(),
            *flow.remote.ip(),
            IpProtocol::Tcp,
        )
    }

    fn flow_repr(flow: &TcpFlow, flags: TcpFlags, seq: Seq32, ack: Seq32) -> TcpRepr {
        TcpRepr {
            src_port: flow.local.port(),
            dst_port: flow.remote.port(),
            seq,
            ack,
            flags,
            window: tcp::DEFAULT_WINDOW,
            mss: None,
        }
    }

    /// Active open towards `flow.remote`.
    pub fn tcp_syn(&mut self, flow: &TcpFlow, isn: Seq32) -> Result<Vec<u8>, BuildError> {
        let repr = TcpRepr {
            mss: Some(tcp::DEFAULT_MSS),
            ..Self::flow_repr(flow, TcpFlags::SYN, isn, Seq32::from_u32(0))
        };
        self.tcp_segment(flow, &repr, &[])
    }

    pub fn tcp_ack(&mut self, flow: &TcpFlow, seq: Seq32, ack: Seq32) -> Result<Vec<u8>, BuildError> {
        let repr = Self::flow_repr(flow, TcpFlags::ACK, seq, ack);
        self.tcp_segment(flow, &repr, &[])
    }

    pub fn tcp_fin_ack(
        &mut self,
        flow: &TcpFlow,
        seq: Seq32,
        ack: Seq32,
    ) -> Result<Vec<u8>, BuildError> {
        let repr = Self::flow_repr(flow, TcpFlags::FIN | TcpFlags::ACK, seq, ack);
        self.tcp_segment(flow, &repr, &[])
    }

    /// A PSH+ACK segment carrying `payload` at the given counters.
    pub fn tcp_data(
        &mut self,
        flow: &TcpFlow,
        seq: Seq32,
        ack: Seq32,
        payload: &[u8],
    ) -> Result<Vec<u8>, BuildError> {
        let repr = Self::flow_repr(flow, TcpFlags::PSH | TcpFlags::ACK, seq, ack);
        self.tcp_segment(flow, &repr, payload)
    }

    /// Encodes `packet` as the payload of a data segment. Returns the frame and the
    /// number of payload bytes the sequence number must advance by.
    pub fn mqtt(
        &mut self,
        flow: &TcpFlow,
        seq: Seq32,
        ack: Seq32,
        packet: &MqttPacket<'_>,
    ) -> Result<(Vec<u8>, usize), BuildError> {
        let payload = packet.to_bytes()?;
        let frame = self.tcp_data(flow, seq, ack, &payload)?;
        Ok((frame, payload.len()))
    }

    fn dhcp_frame(
        &mut self,
        repr: &DhcpRepr,
        dst_mac: MacAddress,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
    ) -> Result<Vec<u8>, BuildError> {
        let payload = repr.to_bytes()?;
        self.udp_datagram(
            dst_mac,
            SocketAddrV4::new(src_ip, dhcp::CLIENT_PORT),
            SocketAddrV4::new(dst_ip, dhcp::SERVER_PORT),
            &payload,
        )
    }

    fn dhcp_repr(&self, message_type: DhcpMessageType, xid: u32) -> DhcpRepr {
        DhcpRepr {
            message_type,
            xid,
            broadcast: true,
            client_ip: Ipv4Addr::UNSPECIFIED,
            client_mac: self.mac,
            requested_ip: None,
            server_id: None,
        }
    }

    pub fn dhcp_discover(&mut self, xid: u32) -> Result<Vec<u8>, BuildError> {
        let repr = self.dhcp_repr(DhcpMessageType::Discover, xid);
        self.dhcp_frame(
            &repr,
            MacAddress::BROADCAST,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
        )
    }

    /// Accepts an offer: broadcast REQUEST naming the offered address and server.
    pub fn dhcp_request_selecting(
        &mut self,
        xid: u32,
        offered: Ipv4Addr,
        server: Ipv4Addr,
    ) -> Result<Vec<u8>, BuildError> {
        let repr = DhcpRepr {
            requested_ip: Some(offered),
            server_id: Some(server),
            ..self.dhcp_repr(DhcpMessageType::Request, xid)
        };
        self.dhcp_frame(
            &repr,
            MacAddress::BROADCAST,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
        )
    }

    /// Extends the lease with the server that granted it, by unicast.
    pub fn dhcp_request_renewing(
        &mut self,
        xid: u32,
        leased: Ipv4Addr,
        server: Ipv4Addr,
        server_mac: MacAddress,
    ) -> Result<Vec<u8>, BuildError> {
        let repr = DhcpRepr {
            broadcast: false,
            client_ip: leased,
            ..self.dhcp_repr(DhcpMessageType::Request, xid)
        };
        self.dhcp_frame(&repr, server_mac, leased, server)
    }

    /// Extends the lease with any server, by broadcast.
    pub fn dhcp_request_rebinding(
        &mut self,
        xid: u32,
        leased: Ipv4Addr,
    ) -> Result<Vec<u8>, BuildError> {
        let repr = DhcpRepr {
            client_ip: leased,
            ..self.dhcp_repr(DhcpMessageType::Request, xid)
        };
        self.dhcp_frame(&repr, MacAddress::BROADCAST, leased, Ipv4Addr::BROADCAST)
    }

    pub fn dhcp_decline(
        &mut self,
        xid: u32,
        declined: Ipv4Addr,
        server: Ipv4Addr,
    ) -> Result<Vec<u8>, BuildError> {
        let repr = DhcpRepr {
            requested_ip: Some(declined),
            server_id: Some(server),
            ..self.dhcp_repr(DhcpMessageType::Decline, xid)
        };
        self.dhcp_frame(
            &repr,
            MacAddress::BROADCAST,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
        )
    }

    /// Broadcast like every other DHCP message except the renewing REQUEST;
    /// `ciaddr` and option 54 name the lease being given back.
    pub fn dhcp_release(
        &mut self,
        xid: u32,
        leased: Ipv4Addr,
        server: Ipv4Addr,
    ) -> Result<Vec<u8>, BuildError> {
        let repr = DhcpRepr {
            client_ip: leased,
            server_id: Some(server),
            ..self.dhcp_repr(DhcpMessageType::Release, xid)
        };
        self.dhcp_frame(&repr, MacAddress::BROADCAST, leased, Ipv4Addr::BROADCAST)
    }
}
