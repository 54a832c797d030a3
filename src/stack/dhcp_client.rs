use std::{
    net::Ipv4Addr,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use thiserror::Error;

use super::{
    builder::{BuildError, PacketBuilder},
    config::{DhcpConfig, IpConfig},
    TimerEvent,
};
use crate::{
    protocol::{
        dhcp::{DhcpMessage, DhcpMessageType},
        MacAddress,
    },
    utils::{TimerHandle, TimerScheduler},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpState {
    Init,
    Selecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
    Declining,
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum DhcpError {
    #[error("dhcp is disabled")]
    Disabled,
    #[error("no address is offered or leased")]
    NoLease,
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Configuration granted by the server's ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpLease {
    pub address: Ipv4Addr,
    pub server_id: Ipv4Addr,
    /// Source hardware address of the ACK; renewals are unicast to it.
    pub server_mac: MacAddress,
    pub subnet_mask: Option<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    pub dns: Option<Ipv4Addr>,
    pub lease_time: Option<Duration>,
    pub acquired_at: Instant,
}

impl DhcpLease {
    /// Renewal (T1) and rebinding (T2) delays, or `None` for an infinite lease.
    #[must_use]
    pub fn renewal_times(&self) -> Option<(Duration, Duration, Duration)> {
        let lease = self.lease_time?;
        Some((lease / 2, lease * 7 / 8, lease))
    }
}

/// What the state machine needs from its owner for one step.
pub struct DhcpContext<'a> {
    pub builder: &'a mut PacketBuilder,
    pub timers: &'a mut TimerScheduler<TimerEvent>,
    pub ip: &'a mut IpConfig,
    /// Applied when the lease is given up.
    pub fallback: IpConfig,
    pub now: Instant,
}

/// Frames a step wants transmitted, in order.
pub type Outbox = Vec<Vec<u8>>;

#[derive(Debug, Default)]
struct Timers {
    retry: Option<TimerHandle>,
    renew: Option<TimerHandle>,
    rebind: Option<TimerHandle>,
    expiry: Option<TimerHandle>,
    conflict: Option<TimerHandle>,
}

fn stop(slot: &mut Option<TimerHandle>, timers: &mut TimerScheduler<TimerEvent>) {
    if let Some(handle) = slot.take() {
        timers.stop(handle);
    }
}

pub struct DhcpClient {
    config: DhcpConfig,
    enabled: bool,
    state: DhcpState,
    offer: Option<(Ipv4Addr, Ipv4Addr)>,
    lease: Option<DhcpLease>,
    ack_seen: bool,
    arp_reply_seen: bool,
    timers: Timers,
}

impl DhcpClient {
    #[inline]
    fn check_rep(&self) {
        match self.state {
            DhcpState::Bound | DhcpState::Renewing | DhcpState::Rebinding => {
                assert!(self.lease.is_some())
            }
            DhcpState::Requesting => assert!(self.offer.is_some()),
            _ => (),
        }
        if !self.enabled {
            assert_eq!(self.state, DhcpState::Init);
        }
    }

    #[must_use]
    pub fn new(config: DhcpConfig) -> Self {
        let this = DhcpClient {
            config,
            enabled: false,
            state: DhcpState::Init,
            offer: None,
            lease: None,
            ack_seen: false,
            arp_reply_seen: false,
            timers: Timers::default(),
        };
        this.check_rep();
        this
    }

    #[must_use]
    pub fn state(&self) -> DhcpState {
        self.state
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn lease(&self) -> Option<&DhcpLease> {
        self.lease.as_ref()
    }

    /// Offered address and server id while a REQUEST is outstanding.
    #[must_use]
    pub fn offer(&self) -> Option<(Ipv4Addr, Ipv4Addr)> {
        self.offer
    }

    fn set_state(&mut self, state: DhcpState) {
        if self.state != state {
            debug!("dhcp {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.check_rep();
    }

    fn start_retry(&mut self, ctx: &mut DhcpContext<'_>) {
        stop(&mut self.timers.retry, ctx.timers);
        self.timers.retry = Some(ctx.timers.start_periodic(
            TimerEvent::DhcpRetry,
            self.config.retry_interval,
            ctx.now,
        ));
    }

    fn stop_all(&mut self, ctx: &mut DhcpContext<'_>) {
        stop(&mut self.timers.retry, ctx.timers);
        stop(&mut self.timers.renew, ctx.timers);
        stop(&mut self.timers.rebind, ctx.timers);
        stop(&mut self.timers.expiry, ctx.timers);
        stop(&mut self.timers.conflict, ctx.timers);
    }

    fn forget(&mut self) {
        self.offer = None;
        self.lease = None;
        self.ack_seen = false;
        self.arp_reply_seen = false;
    }

    /// Drops any address and broadcasts a DISCOVER, re-sent until an offer arrives.
    fn start_discover(&mut self, ctx: &mut DhcpContext<'_>) -> Result<Outbox, DhcpError> {
        self.stop_all(ctx);
        self.forget();
        *ctx.ip = IpConfig::unconfigured();
        let frame = ctx.builder.dhcp_discover(self.config.xid)?;
        self.start_retry(ctx);
        self.set_state(DhcpState::Selecting);
        Ok(vec![frame])
    }

    fn request_frame(&self, ctx: &mut DhcpContext<'_>) -> Result<Option<Vec<u8>>, DhcpError> {
        let xid = self.config.xid;
        let frame = match (self.state, self.offer, self.lease.as_ref()) {
            (DhcpState::Selecting, _, _) => ctx.builder.dhcp_discover(xid)?,
            (DhcpState::Requesting, Some((offered, server)), _) => {
                ctx.builder.dhcp_request_selecting(xid, offered, server)?
            }
            (DhcpState::Renewing, _, Some(lease)) => ctx.builder.dhcp_request_renewing(
                xid,
                lease.address,
                lease.server_id,
                lease.server_mac,
            )?,
            (DhcpState::Rebinding, _, Some(lease)) => {
                ctx.builder.dhcp_request_rebinding(xid, lease.address)?
            }
            _ => return Ok(None),
        };
        Ok(Some(frame))
    }

    pub fn enable(&mut self, ctx: &mut DhcpContext<'_>) -> Result<Outbox, DhcpError> {
        if self.enabled {
            return Ok(Vec::new());
        }
        self.enabled = true;
        info!("dhcp enabled");
        self.start_discover(ctx)
    }

    /// Stops the client and returns to the static configuration.
    pub fn disable(&mut self, ctx: &mut DhcpContext<'_>) {
        self.stop_all(ctx);
        self.forget();
        self.enabled = false;
        self.set_state(DhcpState::Init);
        *ctx.ip = ctx.fallback;
        info!("dhcp disabled, using {}", ctx.ip.address);
    }

    /// Renews a held lease now, or restarts acquisition when none is held.
    pub fn refresh(&mut self, ctx: &mut DhcpContext<'_>) -> Result<Outbox, DhcpError> {
        if !self.enabled {
            return Err(DhcpError::Disabled);
        }
        match self.state {
            DhcpState::Bound | DhcpState::Renewing | DhcpState::Rebinding => {
                self.set_state(DhcpState::Renewing);
                let frame = self.request_frame(ctx)?;
                self.start_retry(ctx);
                Ok(frame.into_iter().collect())
            }
            _ => self.start_discover(ctx),
        }
    }

    /// Declines the offered or leased address and starts over.
    pub fn decline(&mut self, ctx: &mut DhcpContext<'_>) -> Result<Outbox, DhcpError> {
        if !self.enabled {
            return Err(DhcpError::Disabled);
        }
        let (address, server) = match (self.lease.as_ref(), self.offer) {
            (Some(lease), _) => (lease.address, lease.server_id),
            (None, Some(offer)) => offer,
            (None, None) => return Err(DhcpError::NoLease),
        };
        self.send_decline(ctx, address, server)
    }

    fn send_decline(
        &mut self,
        ctx: &mut DhcpContext<'_>,
        address: Ipv4Addr,
        server: Ipv4Addr,
    ) -> Result<Outbox, DhcpError> {
        self.set_state(DhcpState::Declining);
        warn!("dhcp declining {address}");
        let decline = ctx.builder.dhcp_decline(self.config.xid, address, server)?;
        let mut out = vec![decline];
        out.extend(self.start_discover(ctx)?);
        Ok(out)
    }

    /// Gives the lease back and returns to the static configuration. The client
    /// stays idle until the next `refresh`.
    pub fn release(&mut self, ctx: &mut DhcpContext<'_>) -> Result<Outbox, DhcpError> {
        let lease = self.lease.ok_or(DhcpError::NoLease)?;
        let frame = ctx.builder.dhcp_release(
            self.config.xid,
            lease.address,
            lease.server_id,
        )?;
        self.stop_all(ctx);
        self.forget();
        self.set_state(DhcpState::Init);
        *ctx.ip = ctx.fallback;
        info!("dhcp released {}, using {}", lease.address, ctx.ip.address);
        Ok(vec![frame])
    }

    /// Handles an OFFER, ACK or NAK already matched against the local MAC.
    pub fn on_reply(
        &mut self,
        ctx: &mut DhcpContext<'_>,
        server_mac: MacAddress,
        message: &DhcpMessage<&[u8]>,
    ) -> Result<Outbox, DhcpError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let message_type = match message.message_type() {
            Some(t) => t,
            None => {
                debug!("dhcp reply without message type");
                return Ok(Vec::new());
            }
        };
        match (self.state, message_type) {
            (DhcpState::Selecting, DhcpMessageType::Offer) => self.on_offer(ctx, message),
            (
                DhcpState::Requesting | DhcpState::Renewing | DhcpState::Rebinding,
                DhcpMessageType::Ack,
            ) => self.on_ack(ctx, server_mac, message),
            (
                DhcpState::Requesting | DhcpState::Renewing | DhcpState::Rebinding,
                DhcpMessageType::Nak,
            ) => {
                warn!("dhcp nak in {:?}", self.state);
                self.start_discover(ctx)
            }
            (state, t) => {
                debug!("dhcp {t:?} ignored in {state:?}");
                Ok(Vec::new())
            }
        }
    }

    fn on_offer(
        &mut self,
        ctx: &mut DhcpContext<'_>,
        message: &DhcpMessage<&[u8]>,
    ) -> Result<Outbox, DhcpError> {
        let offered = message.yiaddr();
        let server = message.server_id().unwrap_or_else(|| message.siaddr());
        debug!("dhcp offer {offered} from {server}");
        stop(&mut self.timers.retry, ctx.timers);
        self.offer = Some((offered, server));
        self.set_state(DhcpState::Requesting);
        let frame = ctx
            .builder
            .dhcp_request_selecting(self.config.xid, offered, server)?;
        self.start_retry(ctx);
        Ok(vec![frame])
    }

    fn on_ack(
        &mut self,
        ctx: &mut DhcpContext<'_>,
        server_mac: MacAddress,
        message: &DhcpMessage<&[u8]>,
    ) -> Result<Outbox, DhcpError> {
        let first_bind = self.state == DhcpState::Requesting;
        let server_id = message
            .server_id()
            .or_else(|| self.lease.map(|l| l.server_id))
            .or_else(|| self.offer.map(|(_, server)| server))
            .unwrap_or_else(|| message.siaddr());
        let lease = DhcpLease {
            address: message.yiaddr(),
            server_id,
            server_mac,
            subnet_mask: message.subnet_mask(),
            router: message.router(),
            dns: message.dns_server(),
            lease_time: message
                .lease_time()
                .filter(|&secs| secs != u32::MAX)
                .map(|secs| Duration::from_secs(u64::from(secs))),
            acquired_at: ctx.now,
        };

        stop(&mut self.timers.retry, ctx.timers);
        stop(&mut self.timers.renew, ctx.timers);
        stop(&mut self.timers.rebind, ctx.timers);
        stop(&mut self.timers.expiry, ctx.timers);
        if let Some((t1, t2, expiry)) = lease.renewal_times() {
            self.timers.renew = Some(ctx.timers.start_one_shot(TimerEvent::DhcpRenew, t1, ctx.now));
            self.timers.rebind =
                Some(ctx.timers.start_one_shot(TimerEvent::DhcpRebind, t2, ctx.now));
            self.timers.expiry = Some(ctx.timers.start_one_shot(
                TimerEvent::DhcpLeaseExpired,
                expiry,
                ctx.now,
            ));
        }

        *ctx.ip = IpConfig {
            address: lease.address,
            netmask: lease.subnet_mask.unwrap_or(Ipv4Addr::UNSPECIFIED),
            gateway: lease.router.unwrap_or(Ipv4Addr::UNSPECIFIED),
            dns: lease.dns.unwrap_or(Ipv4Addr::UNSPECIFIED),
        };
        self.lease = Some(lease);
        self.offer = None;
        self.set_state(DhcpState::Bound);
        info!(
            "dhcp bound {} mask {} gw {} from {} for {:?}",
            ctx.ip.address, ctx.ip.netmask, ctx.ip.gateway, server_id, lease.lease_time
        );

        let mut out = Vec::new();
        if first_bind {
            self.ack_seen = true;
            self.arp_reply_seen = false;
            stop(&mut self.timers.conflict, ctx.timers);
            self.timers.conflict = Some(ctx.timers.start_one_shot(
                TimerEvent::DhcpConflictCheck,
                self.config.conflict_check,
                ctx.now,
            ));
            out.push(ctx.builder.gratuitous_arp(lease.address));
        }
        Ok(out)
    }

    /// Notes an ARP reply while the conflict check is pending.
    pub fn on_arp_reply(&mut self, sender_ip: Ipv4Addr) {
        let checking = self.timers.conflict.is_some() && self.ack_seen;
        match self.lease {
            Some(lease) if checking && lease.address == sender_ip => {
                warn!("arp reply claims leased address {sender_ip}");
                self.arp_reply_seen = true;
            }
            _ => (),
        }
    }

    pub fn on_timer(
        &mut self,
        ctx: &mut DhcpContext<'_>,
        event: TimerEvent,
    ) -> Result<Outbox, DhcpError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        match event {
            TimerEvent::DhcpRetry => {
                debug!("dhcp retry in {:?}", self.state);
                Ok(self.request_frame(ctx)?.into_iter().collect())
            }
            TimerEvent::DhcpRenew => {
                self.timers.renew = None;
                if self.state != DhcpState::Bound {
                    return Ok(Vec::new());
                }
                info!("dhcp renewing");
                self.set_state(DhcpState::Renewing);
                let frame = self.request_frame(ctx)?;
                self.start_retry(ctx);
                Ok(frame.into_iter().collect())
            }
            TimerEvent::DhcpRebind => {
                self.timers.rebind = None;
                if !matches!(self.state, DhcpState::Bound | DhcpState::Renewing) {
                    return Ok(Vec::new());
                }
                info!("dhcp rebinding");
                self.set_state(DhcpState::Rebinding);
                let frame = self.request_frame(ctx)?;
                self.start_retry(ctx);
                Ok(frame.into_iter().collect())
            }
            TimerEvent::DhcpLeaseExpired => {
                self.timers.expiry = None;
                warn!("dhcp lease expired");
                self.start_discover(ctx)
            }
            TimerEvent::DhcpConflictCheck => {
                self.timers.conflict = None;
                let conflict = self.ack_seen && self.arp_reply_seen;
                self.ack_seen = false;
                self.arp_reply_seen = false;
                match (conflict, self.lease) {
                    (true, Some(lease)) => self.send_decline(ctx, lease.address, lease.server_id),
                    _ => Ok(Vec::new()),
                }
            }
            TimerEvent::MqttKeepAlive => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::{
            dhcp::{option, tests::server_reply},
            ethernet::EthernetFrame,
        },
        stack::{
            builder::tests::{udp_frame, PEER_MAC},
            classifier,
        },
    };

    const MAC: MacAddress = MacAddress([2, 3, 4, 5, 6, 0x76]);
    const SERVER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const OFFERED: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

    struct Harness {
        builder: PacketBuilder,
        timers: TimerScheduler<TimerEvent>,
        ip: IpConfig,
        now: Instant,
        client: DhcpClient,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                builder: PacketBuilder::new(MAC),
                timers: TimerScheduler::new(),
                ip: IpConfig::default(),
                now: Instant::now(),
                client: DhcpClient::new(DhcpConfig::default()),
            }
        }

        fn ctx(&mut self) -> (DhcpContext<'_>, &mut DhcpClient) {
            (
                DhcpContext {
                    builder: &mut self.builder,
                    timers: &mut self.timers,
                    ip: &mut self.ip,
                    fallback: IpConfig::default(),
                    now: self.now,
                },
                &mut self.client,
            )
        }

        fn enable(&mut self) -> Outbox {
            let (mut ctx, client) = self.ctx();
            client.enable(&mut ctx).unwrap()
        }

        fn deliver(&mut self, message_type: DhcpMessageType, extra: &[(u8, &[u8])]) -> Outbox {
            let payload = server_reply(message_type, MAC, OFFERED, extra);
            let frame = udp_frame(MAC, SERVER, Ipv4Addr::BROADCAST, 67, 68, &payload);
            let message = classifier::dhcp_reply(&frame, MAC).unwrap();
            let (mut ctx, client) = self.ctx();
            client.on_reply(&mut ctx, PEER_MAC, &message).unwrap()
        }

        /// Advances the clock and fires every expired timer.
        fn advance(&mut self, by: Duration) -> Vec<(TimerEvent, Outbox)> {
            self.now += by;
            let mut fired = Vec::new();
            while let Some((_, event)) = self.timers.pop_expired(self.now) {
                let (mut ctx, client) = self.ctx();
                let out = client.on_timer(&mut ctx, event).unwrap();
                fired.push((event, out));
            }
            fired
        }

        fn bind(&mut self, lease_secs: u32) {
            self.enable();
            self.deliver(DhcpMessageType::Offer, &[(option::SERVER_ID, &[192, 168, 1, 1])]);
            self.deliver(
                DhcpMessageType::Ack,
                &[
                    (option::SERVER_ID, &[192, 168, 1, 1]),
                    (option::SUBNET_MASK, &[255, 255, 255, 0]),
                    (option::ROUTER, &[192, 168, 1, 1]),
                    (option::DNS_SERVER, &[8, 8, 8, 8]),
                    (option::LEASE_TIME, &lease_secs.to_be_bytes()),
                ],
            );
            assert_eq!(self.client.state(), DhcpState::Bound);
        }
    }

    fn dhcp_of(frame: &[u8]) -> (Ipv4Addr, Ipv4Addr, DhcpMessage<&[u8]>) {
        let (src, dst, udp) = classifier::udp(frame).unwrap();
        (src, dst, DhcpMessage::new_checked(udp.into_payload()).unwrap())
    }

    #[test]
    fn offer_leads_to_request() {
        let mut h = Harness::new();
        let out = h.enable();
        assert_eq!(h.ip.address, Ipv4Addr::UNSPECIFIED);
        assert_eq!(h.client.state(), DhcpState::Selecting);
        let (_, _, discover) = dhcp_of(&out[0]);
        assert_eq!(discover.message_type(), Some(DhcpMessageType::Discover));

        let out = h.deliver(DhcpMessageType::Offer, &[(option::SERVER_ID, &[192, 168, 1, 1])]);
        assert_eq!(h.client.state(), DhcpState::Requesting);
        assert_eq!(out.len(), 1);
        let (src, dst, request) = dhcp_of(&out[0]);
        assert_eq!(src, Ipv4Addr::UNSPECIFIED);
        assert_eq!(dst, Ipv4Addr::BROADCAST);
        assert_eq!(request.message_type(), Some(DhcpMessageType::Request));
        assert_eq!(request.requested_ip(), Some(OFFERED));
        assert_eq!(request.server_id(), Some(SERVER));
    }

    #[test]
    fn offer_for_other_mac_ignored() {
        let mut h = Harness::new();
        h.enable();
        let payload = server_reply(DhcpMessageType::Offer, MacAddress([1; 6]), OFFERED, &[]);
        let frame = udp_frame(MAC, SERVER, Ipv4Addr::BROADCAST, 67, 68, &payload);
        assert!(classifier::dhcp_reply(&frame, MAC).is_none());
        assert_eq!(h.client.state(), DhcpState::Selecting);
    }

    #[test]
    fn retry_resends_current_message() {
        let mut h = Harness::new();
        h.enable();
        let fired = h.advance(Duration::from_secs(15));
        assert_eq!(fired.len(), 1);
        let (_, _, msg) = dhcp_of(&fired[0].1[0]);
        assert_eq!(msg.message_type(), Some(DhcpMessageType::Discover));

        h.deliver(DhcpMessageType::Offer, &[(option::SERVER_ID, &[192, 168, 1, 1])]);
        assert!(h.advance(Duration::from_secs(14)).is_empty());
        let fired = h.advance(Duration::from_secs(1));
        let (_, _, msg) = dhcp_of(&fired[0].1[0]);
        assert_eq!(msg.message_type(), Some(DhcpMessageType::Request));
        assert_eq!(msg.requested_ip(), Some(OFFERED));
    }

    #[test]
    fn ack_binds_and_announces() {
        let mut h = Harness::new();
        h.enable();
        h.deliver(DhcpMessageType::Offer, &[(option::SERVER_ID, &[192, 168, 1, 1])]);
        let out = h.deliver(
            DhcpMessageType::Ack,
            &[
                (option::SUBNET_MASK, &[255, 255, 255, 0]),
                (option::ROUTER, &[192, 168, 1, 254]),
                (option::LEASE_TIME, &[0, 0, 0x0e, 0x10]),
            ],
        );
        assert_eq!(h.client.state(), DhcpState::Bound);
        assert_eq!(
            h.ip,
            IpConfig {
                address: OFFERED,
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Ipv4Addr::new(192, 168, 1, 254),
                dns: Ipv4Addr::UNSPECIFIED,
            }
        );
        let lease = h.client.lease().unwrap();
        assert_eq!(lease.server_id, SERVER);
        assert_eq!(lease.server_mac, PEER_MAC);
        assert_eq!(lease.lease_time, Some(Duration::from_secs(3600)));
        let arp = classifier::arp(&out[0]).unwrap();
        assert_eq!(arp.sender_ip, OFFERED);
        assert_eq!(arp.target_ip, OFFERED);
    }

    #[test]
    fn renewal_timers_follow_lease() {
        let mut h = Harness::new();
        h.bind(1000);
        // conflict check fires first and finds nothing
        let fired = h.advance(Duration::from_secs(2));
        assert_eq!(fired.len(), 1);
        assert!(fired[0].1.is_empty());

        assert!(h.advance(Duration::from_secs(497)).is_empty());
        let fired = h.advance(Duration::from_secs(1));
        assert_eq!(fired[0].0, TimerEvent::DhcpRenew);
        assert_eq!(h.client.state(), DhcpState::Renewing);
        let (src, dst, msg) = dhcp_of(&fired[0].1[0]);
        assert_eq!((src, dst), (OFFERED, SERVER));
        assert_eq!(msg.ciaddr(), OFFERED);
        assert_eq!(msg.flags(), 0);

        // retries every 15 s until T2 at 875 s
        let fired = h.advance(Duration::from_secs(374));
        assert!(fired.iter().all(|(e, _)| *e == TimerEvent::DhcpRetry));
        let fired = h.advance(Duration::from_secs(1));
        assert_eq!(fired.last().map(|f| f.0), Some(TimerEvent::DhcpRebind));
        assert_eq!(h.client.state(), DhcpState::Rebinding);
        let (_, dst, msg) = dhcp_of(&fired.last().unwrap().1[0]);
        assert_eq!(dst, Ipv4Addr::BROADCAST);
        assert_eq!(msg.flags(), crate::protocol::dhcp::FLAG_BROADCAST);

        let fired = h.advance(Duration::from_secs(125));
        assert!(fired.iter().any(|(e, _)| *e == TimerEvent::DhcpLeaseExpired));
        assert_eq!(h.client.state(), DhcpState::Selecting);
        assert!(!h.ip.is_configured());
    }

    #[test]
    fn renew_ack_rearms() {
        let mut h = Harness::new();
        h.bind(1000);
        h.advance(Duration::from_secs(500));
        assert_eq!(h.client.state(), DhcpState::Renewing);
        let out = h.deliver(
            DhcpMessageType::Ack,
            &[(option::LEASE_TIME, &1000u32.to_be_bytes())],
        );
        assert!(out.is_empty());
        assert_eq!(h.client.state(), DhcpState::Bound);
        assert!(h.advance(Duration::from_secs(499)).is_empty());
        let fired = h.advance(Duration::from_secs(1));
        assert_eq!(fired[0].0, TimerEvent::DhcpRenew);
    }

    #[test]
    fn no_lease_time_means_no_renewal() {
        let mut h = Harness::new();
        h.enable();
        h.deliver(DhcpMessageType::Offer, &[]);
        h.deliver(DhcpMessageType::Ack, &[]);
        assert_eq!(h.client.state(), DhcpState::Bound);
        assert_eq!(h.ip.netmask, Ipv4Addr::UNSPECIFIED);
        h.advance(Duration::from_secs(2));
        assert!(h.timers.is_empty());
    }

    #[test]
    fn conflict_declines_and_restarts() {
        let mut h = Harness::new();
        h.bind(3600);
        h.client.on_arp_reply(Ipv4Addr::new(192, 168, 1, 77));
        h.client.on_arp_reply(OFFERED);
        let fired = h.advance(Duration::from_secs(2));
        assert_eq!(fired[0].0, TimerEvent::DhcpConflictCheck);
        let out = &fired[0].1;
        assert_eq!(out.len(), 2);
        let (_, _, decline) = dhcp_of(&out[0]);
        assert_eq!(decline.message_type(), Some(DhcpMessageType::Decline));
        assert_eq!(decline.requested_ip(), Some(OFFERED));
        let (_, _, discover) = dhcp_of(&out[1]);
        assert_eq!(discover.message_type(), Some(DhcpMessageType::Discover));
        assert_eq!(h.client.state(), DhcpState::Selecting);
    }

    #[test]
    fn nak_restarts() {
        let mut h = Harness::new();
        h.enable();
        h.deliver(DhcpMessageType::Offer, &[]);
        let out = h.deliver(DhcpMessageType::Nak, &[]);
        assert_eq!(h.client.state(), DhcpState::Selecting);
        let (_, _, msg) = dhcp_of(&out[0]);
        assert_eq!(msg.message_type(), Some(DhcpMessageType::Discover));
    }

    #[test]
    fn release_restores_fallback() {
        let mut h = Harness::new();
        h.bind(3600);
        let (mut ctx, client) = h.ctx();
        let out = client.release(&mut ctx).unwrap();
        assert_eq!(client.state(), DhcpState::Init);
        let eth = EthernetFrame::new_checked(&out[0][..]).unwrap();
        assert_eq!(eth.dst(), MacAddress::BROADCAST);
        let (src, dst, msg) = dhcp_of(&out[0]);
        assert_eq!((src, dst), (OFFERED, Ipv4Addr::BROADCAST));
        assert_eq!(msg.message_type(), Some(DhcpMessageType::Release));
        assert_eq!(msg.flags(), crate::protocol::dhcp::FLAG_BROADCAST);
        assert_eq!(msg.ciaddr(), OFFERED);
        assert_eq!(msg.server_id(), Some(SERVER));
        assert_eq!(h.ip, IpConfig::default());
        assert!(h.timers.is_empty());

        let (mut ctx, client) = h.ctx();
        assert_eq!(client.release(&mut ctx), Err(DhcpError::NoLease));
    }

    #[test]
    fn refresh_renews_now() {
        let mut h = Harness::new();
        h.bind(3600);
        let (mut ctx, client) = h.ctx();
        let out = client.refresh(&mut ctx).unwrap();
        assert_eq!(client.state(), DhcpState::Renewing);
        let (_, dst, _) = dhcp_of(&out[0]);
        assert_eq!(dst, SERVER);
    }

    #[test]
    fn disabled_commands() {
        let mut h = Harness::new();
        let (mut ctx, client) = h.ctx();
        assert_eq!(client.refresh(&mut ctx), Err(DhcpError::Disabled));
        assert_eq!(client.decline(&mut ctx), Err(DhcpError::Disabled));

        h.bind(3600);
        let (mut ctx, client) = h.ctx();
        client.disable(&mut ctx);
        assert_eq!(client.state(), DhcpState::Init);
        assert_eq!(h.ip, IpConfig::default());
        assert!(h.timers.is_empty());
    }
}
