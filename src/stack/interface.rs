use std::{fmt, net::Ipv4Addr, time::Instant};

use log::{debug, info, trace, warn};
use thiserror::Error;

use super::{
    builder::PacketBuilder,
    classifier,
    config::{DhcpConfig, IpConfig, MqttConfig, DEFAULT_MAC},
    dhcp_client::{DhcpClient, DhcpContext, DhcpError, DhcpLease, DhcpState, Outbox},
    session::{MqttSession, Pending, Publication, SessionContext, SessionError, TcpState},
    topics::TopicRegistry,
    transport::{RawTransport, TransportError},
    TimerEvent,
};
use crate::{
    protocol::{
        arp::ArpOperation,
        dhcp,
        ethernet::{EthernetFrame, MAX_FRAME_LEN},
        MacAddress,
    },
    utils::TimerScheduler,
};

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CommandError {
    #[error(transparent)]
    Dhcp(#[from] DhcpError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct InterfaceBuilder {
    pub mac: MacAddress,
    /// Static configuration; also the fallback when a lease is given up.
    pub ip: IpConfig,
    pub dhcp: DhcpConfig,
    pub mqtt: MqttConfig,
}

impl InterfaceBuilder {
    #[must_use]
    pub fn default() -> Self {
        InterfaceBuilder {
            mac: DEFAULT_MAC,
            ip: IpConfig::default(),
            dhcp: DhcpConfig::default(),
            mqtt: MqttConfig::default(),
        }
    }

    pub fn build<T: RawTransport>(self, transport: T, now: Instant) -> Interface<T> {
        let mut interface = Interface {
            transport,
            builder: PacketBuilder::new(self.mac),
            timers: TimerScheduler::new(),
            ip: self.ip,
            fallback: self.ip,
            dhcp: DhcpClient::new(self.dhcp),
            session: MqttSession::new(self.mqtt),
            output: false,
            overflows: 0,
            now,
        };
        if self.dhcp.enabled {
            if let Err(e) = interface.dhcp_enable() {
                warn!("dhcp start failed: {e}");
            }
        }
        info!("interface {} up at {}", interface.mac(), interface.ip.address);
        interface
    }
}

/// The whole stack behind one raw transport, driven by [`Interface::poll`].
pub struct Interface<T> {
    transport: T,
    builder: PacketBuilder,
    timers: TimerScheduler<TimerEvent>,
    ip: IpConfig,
    fallback: IpConfig,
    dhcp: DhcpClient,
    session: MqttSession,
    /// Local output switched by UDP `on`/`off`.
    output: bool,
    overflows: u64,
    now: Instant,
}

fn logged<E: fmt::Display>(what: &str, result: Result<Outbox, E>) -> Outbox {
    match result {
        Ok(out) => out,
        Err(e) => {
            warn!("{what}: {e}");
            Vec::new()
        }
    }
}

impl<T: RawTransport> Interface<T> {
    fn dhcp_parts(&mut self) -> (&mut DhcpClient, DhcpContext<'_>) {
        (
            &mut self.dhcp,
            DhcpContext {
                builder: &mut self.builder,
                timers: &mut self.timers,
                ip: &mut self.ip,
                fallback: self.fallback,
                now: self.now,
            },
        )
    }

    fn session_parts(&mut self) -> (&mut MqttSession, SessionContext<'_>) {
        (
            &mut self.session,
            SessionContext {
                builder: &mut self.builder,
                timers: &mut self.timers,
                local_ip: self.ip.address,
                now: self.now,
            },
        )
    }

    fn transmit(&mut self, out: Outbox) -> Result<(), TransportError> {
        for frame in out {
            self.transport.transmit_frame(&frame)?;
            trace!("sent {} bytes", frame.len());
        }
        Ok(())
    }

    /// Sends the session's frames and applies its changes only if all of them went out.
    fn transmit_session(&mut self, pending: Pending) -> Result<(), TransportError> {
        let Pending { frames, commit } = pending;
        self.transmit(frames)?;
        self.session.commit(commit, &mut self.timers);
        Ok(())
    }

    fn session_reply(&mut self, what: &str, result: Result<Pending, SessionError>) -> Outbox {
        match result.map(|pending| self.transmit_session(pending)) {
            Ok(Ok(())) => (),
            Ok(Err(e)) => warn!("transmit after {what} failed: {e}"),
            Err(e) => warn!("{what}: {e}"),
        }
        Vec::new()
    }

    /// Runs expired timers, then handles at most one received frame.
    ///
    /// Returns `true` if a frame was received.
    pub fn poll(&mut self, now: Instant) -> bool {
        self.now = now;
        while let Some((_, event)) = self.timers.pop_expired(now) {
            let out = self.on_timer(event);
            if let Err(e) = self.transmit(out) {
                warn!("transmit after {event:?} failed: {e}");
            }
        }

        if self.transport.overflow_occurred() {
            self.overflows += 1;
            warn!("receive overflow ({} so far)", self.overflows);
        }
        if !self.transport.link_is_up() || !self.transport.frame_available() {
            return false;
        }
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = match self.transport.receive_frame(&mut buf) {
            Some(len) => len,
            None => return false,
        };
        let out = self.on_frame(&mut buf[..len]);
        if let Err(e) = self.transmit(out) {
            warn!("transmit failed: {e}");
        }
        true
    }

    fn on_timer(&mut self, event: TimerEvent) -> Outbox {
        match event {
            TimerEvent::MqttKeepAlive => {
                let (session, mut ctx) = self.session_parts();
                let result = session.on_keep_alive(&mut ctx);
                self.session_reply("keep-alive", result)
            }
            _ => {
                let (dhcp, mut ctx) = self.dhcp_parts();
                logged("dhcp timer", dhcp.on_timer(&mut ctx, event))
            }
        }
    }

    fn on_frame(&mut self, frame: &mut [u8]) -> Outbox {
        if let Some(arp) = classifier::arp(frame) {
            return self.on_arp(frame, arp.operation, arp.sender_ip, arp.target_ip);
        }

        let (src, dst) = match classifier::ipv4(frame) {
            Some(ip) => (ip.src_addr(), ip.dst_addr()),
            None => {
                trace!("dropping non-ipv4 frame of {} bytes", frame.len());
                return Vec::new();
            }
        };

        let mac = self.builder.mac();
        if let Some(message) = classifier::dhcp_reply(frame, mac) {
            let server_mac = match EthernetFrame::new_checked(&*frame) {
                Ok(eth) => eth.src(),
                Err(_) => return Vec::new(),
            };
            let (dhcp, mut ctx) = self.dhcp_parts();
            return logged("dhcp reply", dhcp.on_reply(&mut ctx, server_mac, &message));
        }

        if !self.ip.is_configured() || dst != self.ip.address {
            if !dst.is_broadcast() {
                trace!("{src} -> {dst} not for us");
            }
            return Vec::new();
        }

        if classifier::is_ping_request(frame) {
            debug!("ping from {src}");
            return self.reply("echo reply", frame, PacketBuilder::echo_reply);
        }
        if let Some((_, _, datagram)) = classifier::udp(frame) {
            let port = datagram.dst_port();
            if port == dhcp::CLIENT_PORT || port == dhcp::SERVER_PORT {
                return Vec::new();
            }
            match std::str::from_utf8(datagram.payload()).map(str::trim) {
                Ok("on") => self.set_output(true),
                Ok("off") => self.set_output(false),
                _ => (),
            }
            return self.reply("udp echo", frame, PacketBuilder::udp_echo);
        }
        if classifier::is_tcp(frame) {
            let (session, mut ctx) = self.session_parts();
            let result = session.on_segment(&mut ctx, frame);
            return self.session_reply("tcp segment", result);
        }
        debug!("unhandled packet from {src}");
        Vec::new()
    }

    fn on_arp(
        &mut self,
        frame: &mut [u8],
        operation: ArpOperation,
        sender_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
    ) -> Outbox {
        match operation {
            ArpOperation::Request if self.ip.is_configured() && target_ip == self.ip.address => {
                debug!("arp who-has {target_ip} from {sender_ip}");
                match self.builder.arp_reply(frame, self.ip.address) {
                    Ok(len) => vec![frame[..len].to_vec()],
                    Err(e) => {
                        warn!("arp reply: {e}");
                        Vec::new()
                    }
                }
            }
            ArpOperation::Reply => {
                self.dhcp.on_arp_reply(sender_ip);
                Vec::new()
            }
            ArpOperation::Request => Vec::new(),
        }
    }

    fn reply<E: fmt::Display>(
        &mut self,
        what: &str,
        frame: &mut [u8],
        build: impl FnOnce(&mut PacketBuilder, &mut [u8]) -> Result<usize, E>,
    ) -> Outbox {
        match build(&mut self.builder, frame) {
            Ok(len) => vec![frame[..len].to_vec()],
            Err(e) => {
                warn!("{what}: {e}");
                Vec::new()
            }
        }
    }

    fn set_output(&mut self, on: bool) {
        if self.output != on {
            info!("output {}", if on { "on" } else { "off" });
        }
        self.output = on;
    }

    #[must_use]
    pub fn mac(&self) -> MacAddress {
        self.builder.mac()
    }

    pub fn set_mac(&mut self, mac: MacAddress) {
        self.builder.set_mac(mac);
    }

    #[must_use]
    pub fn ip_config(&self) -> IpConfig {
        self.ip
    }

    /// Sets the static address, applied now and kept as the fallback.
    pub fn set_address(&mut self, address: Ipv4Addr) {
        self.ip.address = address;
        self.fallback.address = address;
    }

    pub fn set_netmask(&mut self, netmask: Ipv4Addr) {
        self.ip.netmask = netmask;
        self.fallback.netmask = netmask;
    }

    pub fn set_gateway(&mut self, gateway: Ipv4Addr) {
        self.ip.gateway = gateway;
        self.fallback.gateway = gateway;
    }

    pub fn set_dns(&mut self, dns: Ipv4Addr) {
        self.ip.dns = dns;
        self.fallback.dns = dns;
    }

    #[must_use]
    pub fn dhcp_state(&self) -> DhcpState {
        self.dhcp.state()
    }

    #[must_use]
    pub fn dhcp_lease(&self) -> Option<&DhcpLease> {
        self.dhcp.lease()
    }

    pub fn dhcp_enable(&mut self) -> Result<(), CommandError> {
        let (dhcp, mut ctx) = self.dhcp_parts();
        let out = dhcp.enable(&mut ctx)?;
        Ok(self.transmit(out)?)
    }

    pub fn dhcp_disable(&mut self) {
        let (dhcp, mut ctx) = self.dhcp_parts();
        dhcp.disable(&mut ctx);
    }

    pub fn dhcp_refresh(&mut self) -> Result<(), CommandError> {
        let (dhcp, mut ctx) = self.dhcp_parts();
        let out = dhcp.refresh(&mut ctx)?;
        Ok(self.transmit(out)?)
    }

    pub fn dhcp_decline(&mut self) -> Result<(), CommandError> {
        let (dhcp, mut ctx) = self.dhcp_parts();
        let out = dhcp.decline(&mut ctx)?;
        Ok(self.transmit(out)?)
    }

    pub fn dhcp_release(&mut self) -> Result<(), CommandError> {
        let (dhcp, mut ctx) = self.dhcp_parts();
        let out = dhcp.release(&mut ctx)?;
        Ok(self.transmit(out)?)
    }

    #[must_use]
    pub fn tcp_state(&self) -> TcpState {
        self.session.state()
    }

    #[must_use]
    pub fn mqtt_connected(&self) -> bool {
        self.session.is_connected()
    }

    #[must_use]
    pub fn topics(&self) -> &TopicRegistry {
        self.session.topics()
    }

    pub fn mqtt_config_mut(&mut self) -> &mut MqttConfig {
        self.session.config_mut()
    }

    pub fn mqtt_connect(&mut self) -> Result<(), CommandError> {
        let (session, mut ctx) = self.session_parts();
        let pending = session.connect(&mut ctx)?;
        Ok(self.transmit_session(pending)?)
    }

    pub fn mqtt_subscribe(&mut self, topic: &str) -> Result<(), CommandError> {
        let (session, mut ctx) = self.session_parts();
        let pending = session.subscribe(&mut ctx, topic)?;
        Ok(self.transmit_session(pending)?)
    }

    pub fn mqtt_unsubscribe(&mut self, topic: &str) -> Result<(), CommandError> {
        let (session, mut ctx) = self.session_parts();
        let pending = session.unsubscribe(&mut ctx, topic)?;
        Ok(self.transmit_session(pending)?)
    }

    pub fn mqtt_publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), CommandError> {
        let (session, mut ctx) = self.session_parts();
        let pending = session.publish(&mut ctx, topic, payload)?;
        Ok(self.transmit_session(pending)?)
    }

    pub fn mqtt_ping(&mut self) -> Result<(), CommandError> {
        let (session, mut ctx) = self.session_parts();
        let pending = session.ping(&mut ctx)?;
        Ok(self.transmit_session(pending)?)
    }

    pub fn mqtt_disconnect(&mut self) -> Result<(), CommandError> {
        let (session, mut ctx) = self.session_parts();
        let pending = session.disconnect(&mut ctx)?;
        Ok(self.transmit_session(pending)?)
    }

    /// Drains publications received on subscribed topics.
    pub fn take_publications(&mut self) -> Vec<Publication> {
        std::iter::from_fn(|| self.session.take_publication()).collect()
    }

    #[must_use]
    pub fn output(&self) -> bool {
        self.output
    }

    #[must_use]
    pub fn overflow_count(&self) -> u64 {
        self.overflows
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddrV4, time::Duration};

    use super::*;
    use crate::{
        protocol::{
            dhcp::{option, tests::server_reply, DhcpMessage, DhcpMessageType},
            mqtt::MqttPacket,
            tcp::{TcpControl, TcpFlags},
        },
        stack::{
            builder::{
                tests::{ping_frame, tcp_frame, udp_frame, PEER_MAC},
                TcpFlow,
            },
            transport::MemoryTransport,
        },
        utils::Seq32,
    };

    const MAC: MacAddress = MacAddress([2, 3, 4, 5, 6, 0x76]);
    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 118);
    const PEER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);
    const SERVER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const OFFERED: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

    fn static_interface() -> Interface<MemoryTransport> {
        let mut builder = InterfaceBuilder::default();
        builder.mac = MAC;
        builder.dhcp.enabled = false;
        builder.mqtt.broker_mac = PEER_MAC;
        builder.mqtt.initial_seq = 7000;
        builder.build(MemoryTransport::new(), Instant::now())
    }

    fn dhcp_interface() -> (Interface<MemoryTransport>, Instant) {
        let now = Instant::now();
        let mut builder = InterfaceBuilder::default();
        builder.mac = MAC;
        (builder.build(MemoryTransport::new(), now), now)
    }

    fn server_frame(message_type: DhcpMessageType, extra: &[(u8, &[u8])]) -> Vec<u8> {
        let payload = server_reply(message_type, MAC, OFFERED, extra);
        udp_frame(
            MacAddress::BROADCAST,
            SERVER,
            Ipv4Addr::BROADCAST,
            dhcp::SERVER_PORT,
            dhcp::CLIENT_PORT,
            &payload,
        )
    }

    fn sent_dhcp(frame: &[u8]) -> (Ipv4Addr, DhcpMessage<&[u8]>) {
        let (_, dst, datagram) = classifier::udp(frame).unwrap();
        assert_eq!(datagram.dst_port(), dhcp::SERVER_PORT);
        (dst, DhcpMessage::new_checked(datagram.into_payload()).unwrap())
    }

    #[test]
    fn answers_arp_for_local_address() {
        let mut interface = static_interface();
        let request = PacketBuilder::new(PEER_MAC).arp_request(PEER, LOCAL);
        interface.transport_mut().inject(request);
        assert!(interface.poll(Instant::now()));

        let reply = interface.transport_mut().take_sent().unwrap();
        let arp = classifier::arp(&reply).unwrap();
        assert_eq!(arp.operation, ArpOperation::Reply);
        assert_eq!(arp.target_mac, PEER_MAC);
        assert_eq!(arp.sender_mac, MAC);
        assert_eq!(arp.sender_ip, LOCAL);

        let other = PacketBuilder::new(PEER_MAC).arp_request(PEER, Ipv4Addr::new(192, 168, 1, 9));
        interface.transport_mut().inject(other);
        interface.poll(Instant::now());
        assert!(interface.transport_mut().take_sent().is_none());
    }

    #[test]
    fn answers_ping() {
        let mut interface = static_interface();
        interface.transport_mut().inject(ping_frame(MAC, PEER, LOCAL));
        interface.poll(Instant::now());
        let reply = interface.transport_mut().take_sent().unwrap();
        assert!(classifier::is_ipv4(&reply));
        assert!(!classifier::is_ping_request(&reply));
        assert!(classifier::is_unicast_to(&reply, PEER));
    }

    #[test]
    fn udp_echo_drives_output() {
        let mut interface = static_interface();
        interface
            .transport_mut()
            .inject(udp_frame(MAC, PEER, LOCAL, 40000, 7, b"on\r\n"));
        interface.poll(Instant::now());
        assert!(interface.output());
        let echo = interface.transport_mut().take_sent().unwrap();
        let (src, dst, datagram) = classifier::udp(&echo).unwrap();
        assert_eq!((src, dst), (LOCAL, PEER));
        assert_eq!((datagram.src_port(), datagram.dst_port()), (7, 40000));
        assert_eq!(datagram.payload(), b"on\r\n");

        interface
            .transport_mut()
            .inject(udp_frame(MAC, PEER, LOCAL, 40000, 7, b"off"));
        interface.poll(Instant::now());
        assert!(!interface.output());
        assert!(interface.transport_mut().take_sent().is_some());
    }

    #[test]
    fn ignores_traffic_for_others() {
        let mut interface = static_interface();
        let elsewhere = Ipv4Addr::new(192, 168, 1, 9);
        interface
            .transport_mut()
            .inject(udp_frame(MAC, PEER, elsewhere, 40000, 7, b"on"));
        interface.transport_mut().inject(ping_frame(MAC, PEER, elsewhere));
        interface.poll(Instant::now());
        interface.poll(Instant::now());
        assert!(!interface.output());
        assert!(interface.transport_mut().take_sent().is_none());
    }

    #[test]
    fn counts_overflow() {
        let mut interface = static_interface();
        interface.transport_mut().overflow = true;
        assert!(!interface.poll(Instant::now()));
        interface.poll(Instant::now());
        assert_eq!(interface.overflow_count(), 1);
    }

    #[test]
    fn offer_to_request_end_to_end() {
        let (mut interface, _) = dhcp_interface();
        assert_eq!(interface.ip_config().address, Ipv4Addr::UNSPECIFIED);
        let discover = interface.transport_mut().take_sent().unwrap();
        let (dst, message) = sent_dhcp(&discover);
        assert_eq!(dst, Ipv4Addr::BROADCAST);
        assert_eq!(message.message_type(), Some(DhcpMessageType::Discover));

        let offer = server_frame(DhcpMessageType::Offer, &[(option::SERVER_ID, &[192, 168, 1, 1])]);
        interface.transport_mut().inject(offer);
        interface.poll(Instant::now());
        assert_eq!(interface.dhcp_state(), DhcpState::Requesting);

        let request = interface.transport_mut().take_sent().unwrap();
        let (dst, message) = sent_dhcp(&request);
        assert_eq!(dst, Ipv4Addr::BROADCAST);
        assert_eq!(message.message_type(), Some(DhcpMessageType::Request));
        assert_eq!(message.requested_ip(), Some(OFFERED));
        assert_eq!(message.server_id(), Some(SERVER));
    }

    #[test]
    fn lease_is_bound_and_renewed() {
        let (mut interface, start) = dhcp_interface();
        interface.transport_mut().take_sent();
        let offer = server_frame(DhcpMessageType::Offer, &[(option::SERVER_ID, &[192, 168, 1, 1])]);
        interface.transport_mut().inject(offer);
        interface.poll(start);
        interface.transport_mut().take_sent();

        let ack = server_frame(
            DhcpMessageType::Ack,
            &[
                (option::SERVER_ID, &[192, 168, 1, 1]),
                (option::SUBNET_MASK, &[255, 255, 255, 0]),
                (option::ROUTER, &[192, 168, 1, 1]),
                (option::DNS_SERVER, &[8, 8, 8, 8]),
                (option::LEASE_TIME, &[0, 0, 0x03, 0xe8]),
            ],
        );
        interface.transport_mut().inject(ack);
        interface.poll(start);
        assert_eq!(interface.dhcp_state(), DhcpState::Bound);
        assert_eq!(
            interface.ip_config(),
            IpConfig {
                address: OFFERED,
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: SERVER,
                dns: Ipv4Addr::new(8, 8, 8, 8),
            }
        );
        let announce = interface.transport_mut().take_sent().unwrap();
        assert_eq!(classifier::arp(&announce).unwrap().sender_ip, OFFERED);

        interface.poll(start + Duration::from_secs(499));
        assert!(interface.transport_mut().take_sent().is_none());
        interface.poll(start + Duration::from_secs(500));
        assert_eq!(interface.dhcp_state(), DhcpState::Renewing);
        let renew = interface.transport_mut().take_sent().unwrap();
        assert_eq!(EthernetFrame::new_checked(&renew[..]).unwrap().dst(), PEER_MAC);
        let (dst, message) = sent_dhcp(&renew);
        assert_eq!(dst, SERVER);
        assert_eq!(message.ciaddr(), OFFERED);

        interface.dhcp_release().unwrap();
        assert_eq!(interface.dhcp_state(), DhcpState::Init);
        assert_eq!(interface.ip_config(), IpConfig::default());
    }

    #[test]
    fn discover_is_retried() {
        let (mut interface, start) = dhcp_interface();
        interface.transport_mut().take_sent();
        interface.poll(start + Duration::from_secs(15));
        let sent = interface.transport_mut().take_sent().unwrap();
        let (_, message) = sent_dhcp(&sent);
        assert_eq!(message.message_type(), Some(DhcpMessageType::Discover));
    }

    #[test]
    fn mqtt_over_tcp() {
        let mut interface = static_interface();
        let broker = broker_flow();
        establish(&mut interface, &broker);

        interface.mqtt_subscribe("led").unwrap();
        let subscribe = interface.transport_mut().take_sent().unwrap();
        let (_, _, segment) = classifier::tcp(&subscribe).unwrap();
        let next = segment.seq_number().add_usize(segment.payload().len()).to_u32();

        let publish = [0x30, 7, 0, 3, b'l', b'e', b'd', b'o', b'n'];
        interface
            .transport_mut()
            .inject(tcp_frame(&broker, TcpFlags::PSH | TcpFlags::ACK, 305, next, &publish));
        interface.poll(Instant::now());
        assert_eq!(
            interface.take_publications(),
            vec![Publication {
                topic: "led".to_string(),
                payload: b"on".to_vec(),
            }]
        );
        assert!(interface.take_publications().is_empty());
    }

    #[test]
    fn failed_send_keeps_session_state() {
        let mut interface = static_interface();
        let next = establish(&mut interface, &broker_flow());

        interface.transport_mut().link_up = false;
        assert_eq!(
            interface.mqtt_subscribe("led"),
            Err(CommandError::Transport(TransportError::LinkDown))
        );
        assert!(!interface.topics().contains("led"));
        assert_eq!(
            interface.mqtt_disconnect(),
            Err(CommandError::Transport(TransportError::LinkDown))
        );
        assert!(interface.mqtt_connected());

        interface.transport_mut().link_up = true;
        interface.mqtt_subscribe("led").unwrap();
        let subscribe = interface.transport_mut().take_sent().unwrap();
        assert_eq!(classifier::tcp(&subscribe).unwrap().2.seq_number(), next);
        assert!(interface.topics().contains("led"));
    }

    /// The flow as the broker sees it.
    fn broker_flow() -> TcpFlow {
        TcpFlow {
            remote_mac: MAC,
            local: SocketAddrV4::new(SERVER, 1883),
            remote: SocketAddrV4::new(LOCAL, 50000),
        }
    }

    /// SYN, SYN+ACK, CONNECT, CONNACK. Returns the next sequence number to send.
    fn establish(interface: &mut Interface<MemoryTransport>, broker: &TcpFlow) -> Seq32 {
        interface.mqtt_connect().unwrap();
        let syn = interface.transport_mut().take_sent().unwrap();
        assert_eq!(classifier::tcp_control(&syn), Some(TcpControl::Syn));

        interface
            .transport_mut()
            .inject(tcp_frame(broker, TcpFlags::SYN | TcpFlags::ACK, 300, 7001, &[]));
        interface.poll(Instant::now());
        assert_eq!(interface.tcp_state(), TcpState::SynReceived);
        let syn_ack = interface.transport_mut().take_sent().unwrap();
        let (_, _, segment) = classifier::tcp(&syn_ack).unwrap();
        assert_eq!(segment.flags().control(), TcpControl::SynAck);
        assert_eq!(segment.ack_number().to_u32(), 301);
        let connect = interface.transport_mut().take_sent().unwrap();
        let (_, _, segment) = classifier::tcp(&connect).unwrap();
        let (packet, _) = MqttPacket::parse(segment.payload()).unwrap();
        assert!(matches!(packet, MqttPacket::Connect { .. }));
        let next = segment.seq_number().add_usize(segment.payload().len()).to_u32();

        interface
            .transport_mut()
            .inject(tcp_frame(broker, TcpFlags::PSH | TcpFlags::ACK, 301, next, &[0x20, 2, 0, 0]));
        interface.poll(Instant::now());
        assert!(interface.mqtt_connected());
        let ack = interface.transport_mut().take_sent().unwrap();
        let (_, _, segment) = classifier::tcp(&ack).unwrap();
        assert_eq!(segment.ack_number().to_u32(), 305);
        segment.seq_number()
    }

    #[test]
    fn commands_report_failures() {
        let mut interface = static_interface();
        assert_eq!(
            interface.mqtt_publish("led", b"on"),
            Err(CommandError::Session(SessionError::NotConnected))
        );
        assert_eq!(
            interface.dhcp_release(),
            Err(CommandError::Dhcp(DhcpError::NoLease))
        );
        interface.transport_mut().link_up = false;
        assert_eq!(
            interface.mqtt_connect(),
            Err(CommandError::Transport(TransportError::LinkDown))
        );
    }
}
