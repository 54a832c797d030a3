//! Stateless predicates over a received Ethernet frame.
//!
//! Every predicate re-parses the headers it needs from scratch, so they can be
//! evaluated in any order and any number of times.

use std::net::Ipv4Addr;

use crate::protocol::{
    arp::{ArpOperation, ArpPacket, ArpRepr},
    dhcp::{self, DhcpMessage, DhcpMessageType},
    ethernet::{EtherType, EthernetFrame},
    icmp::{IcmpPacket, IcmpType},
    ipv4::{IpProtocol, Ipv4Packet},
    tcp::{TcpControl, TcpSegment},
    udp::UdpDatagram,
    MacAddress,
};

/// IPv4 header with a valid checksum, or `None`.
#[must_use]
pub fn ipv4(frame: &[u8]) -> Option<Ipv4Packet<&[u8]>> {
    let eth = EthernetFrame::new_checked(frame).ok()?;
    if eth.ethertype() != Some(EtherType::Ipv4) {
        return None;
    }
    let ip = Ipv4Packet::new_checked(eth.into_payload()).ok()?;
    if !ip.verify_checksum() {
        log::trace!("ipv4 header checksum mismatch");
        return None;
    }
    Some(ip)
}

#[must_use]
pub fn is_ipv4(frame: &[u8]) -> bool {
    ipv4(frame).is_some()
}

#[must_use]
pub fn is_unicast_to(frame: &[u8], ip: Ipv4Addr) -> bool {
    ipv4(frame).map_or(false, |p| p.dst_addr() == ip)
}

/// Limited broadcast `255.255.255.255`.
#[must_use]
pub fn is_broadcast(frame: &[u8]) -> bool {
    ipv4(frame).map_or(false, |p| p.dst_addr().is_broadcast())
}

/// ARP packet carried by the frame.
#[must_use]
pub fn arp(frame: &[u8]) -> Option<ArpRepr> {
    let eth = EthernetFrame::new_checked(frame).ok()?;
    if eth.ethertype() != Some(EtherType::Arp) {
        return None;
    }
    let packet = ArpPacket::new_checked(eth.into_payload()).ok()?;
    ArpRepr::parse(&packet).ok()
}

#[must_use]
pub fn is_arp_request_for(frame: &[u8], ip: Ipv4Addr) -> bool {
    arp(frame).map_or(false, |a| {
        a.operation == ArpOperation::Request && a.target_ip == ip
    })
}

#[must_use]
pub fn is_arp_reply(frame: &[u8]) -> bool {
    arp(frame).map_or(false, |a| a.operation == ArpOperation::Reply)
}

#[must_use]
pub fn is_ping_request(frame: &[u8]) -> bool {
    let ip = match ipv4(frame) {
        Some(ip) => ip,
        None => return false,
    };
    if ip.protocol() != Some(IpProtocol::Icmp) {
        return false;
    }
    match IcmpPacket::new_checked(ip.payload()) {
        Ok(icmp) => icmp.msg_type() == Some(IcmpType::EchoRequest) && icmp.verify_checksum(),
        Err(_) => false,
    }
}

/// Checksum-valid UDP datagram together with its IP addresses.
#[must_use]
pub fn udp(frame: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr, UdpDatagram<&[u8]>)> {
    let ip = ipv4(frame)?;
    if ip.protocol() != Some(IpProtocol::Udp) {
        return None;
    }
    let (src, dst) = (ip.src_addr(), ip.dst_addr());
    let datagram = UdpDatagram::new_checked(ip.into_payload()).ok()?;
    if !datagram.verify_checksum(src, dst) {
        log::trace!("udp checksum mismatch from {src}");
        return None;
    }
    Some((src, dst, datagram))
}

#[must_use]
pub fn is_udp(frame: &[u8]) -> bool {
    udp(frame).is_some()
}

/// Checksum-valid TCP segment together with its IP addresses.
#[must_use]
pub fn tcp(frame: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr, TcpSegment<&[u8]>)> {
    let ip = ipv4(frame)?;
    if ip.protocol() != Some(IpProtocol::Tcp) {
        return None;
    }
    let (src, dst) = (ip.src_addr(), ip.dst_addr());
    let segment = TcpSegment::new_checked(ip.into_payload()).ok()?;
    if !segment.verify_checksum(src, dst) {
        log::trace!("tcp checksum mismatch from {src}");
        return None;
    }
    Some((src, dst, segment))
}

#[must_use]
pub fn is_tcp(frame: &[u8]) -> bool {
    tcp(frame).is_some()
}

#[must_use]
pub fn tcp_control(frame: &[u8]) -> Option<TcpControl> {
    tcp(frame).map(|(_, _, segment)| segment.flags().control())
}

/// Server-to-client DHCP reply addressed to `mac`.
#[must_use]
pub fn dhcp_reply(frame: &[u8], mac: MacAddress) -> Option<DhcpMessage<&[u8]>> {
    let (_, _, datagram) = udp(frame)?;
    if datagram.src_port() != dhcp::SERVER_PORT || datagram.dst_port() != dhcp::CLIENT_PORT {
        return None;
    }
    let message = DhcpMessage::new_checked(datagram.into_payload()).ok()?;
    if !message.is_reply() || message.client_mac() != mac {
        return None;
    }
    Some(message)
}

fn is_dhcp(frame: &[u8], mac: MacAddress, message_type: DhcpMessageType) -> bool {
    dhcp_reply(frame, mac).map_or(false, |m| m.message_type() == Some(message_type))
}

#[must_use]
pub fn is_dhcp_offer(frame: &[u8], mac: MacAddress) -> bool {
    is_dhcp(frame, mac, DhcpMessageType::Offer)
}

#[must_use]
pub fn is_dhcp_ack(frame: &[u8], mac: MacAddress) -> bool {
    is_dhcp(frame, mac, DhcpMessageType::Ack)
}

#[must_use]
pub fn is_dhcp_nak(frame: &[u8], mac: MacAddress) -> bool {
    is_dhcp(frame, mac, DhcpMessageType::Nak)
}
