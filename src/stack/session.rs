use std::{
    collections::VecDeque,
    net::{Ipv4Addr, SocketAddrV4},
    time::Instant,
};

use log::{debug, info, trace, warn};
use thiserror::Error;

use super::{
    builder::{BuildError, PacketBuilder, TcpFlow},
    classifier,
    config::MqttConfig,
    dhcp_client::Outbox,
    topics::TopicRegistry,
    TimerEvent,
};
use crate::{
    protocol::{
        ethernet::EthernetFrame,
        mqtt::{MqttPacket, MqttPackets, QoS},
        tcp::{TcpControl, TcpFlags},
    },
    utils::{Seq32, TimerHandle, TimerScheduler},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    SynReceived,
    Established,
    FinWait,
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum SessionError {
    #[error("mqtt session is not connected")]
    NotConnected,
    #[error("tcp flow is already open")]
    AlreadyOpen,
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// A PUBLISH received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
enum TopicChange {
    Add(String),
    Remove(String),
}

/// Session changes carried by frames that have not been sent yet.
#[must_use]
#[derive(Debug, Default)]
pub struct Commit {
    sent: usize,
    topics: Option<TopicChange>,
    disconnect: bool,
}

/// Frames for the broker and the changes to apply once every one of them is sent.
#[must_use]
#[derive(Debug, Default)]
pub struct Pending {
    pub frames: Outbox,
    pub commit: Commit,
}

impl From<Outbox> for Pending {
    fn from(frames: Outbox) -> Self {
        Pending {
            frames,
            commit: Commit::default(),
        }
    }
}

pub struct SessionContext<'a> {
    pub builder: &'a mut PacketBuilder,
    pub timers: &'a mut TimerScheduler<TimerEvent>,
    pub local_ip: Ipv4Addr,
    pub now: Instant,
}

/// Fields of a received segment needed after the frame is rewritten.
struct Inbound {
    flow: TcpFlow,
    control: TcpControl,
    seq: Seq32,
    ack: Seq32,
    payload: Vec<u8>,
}

impl Inbound {
    fn parse(frame: &[u8]) -> Option<Self> {
        let remote_mac = EthernetFrame::new_checked(frame).ok()?.src();
        let (src, dst, segment) = classifier::tcp(frame)?;
        Some(Inbound {
            flow: TcpFlow {
                remote_mac,
                local: SocketAddrV4::new(dst, segment.dst_port()),
                remote: SocketAddrV4::new(src, segment.src_port()),
            },
            control: segment.flags().control(),
            seq: segment.seq_number(),
            ack: segment.ack_number(),
            payload: segment.payload().to_vec(),
        })
    }
}

/// The single TCP flow to the broker and the MQTT session carried over it.
pub struct MqttSession {
    config: MqttConfig,
    state: TcpState,
    flow: Option<TcpFlow>,
    isn: Seq32,
    /// Next sequence number to send.
    seq: Seq32,
    /// Next sequence number expected from the broker.
    ack: Seq32,
    connected: bool,
    next_packet_id: u16,
    topics: TopicRegistry,
    inbox: VecDeque<Publication>,
    keep_alive: Option<TimerHandle>,
}

impl MqttSession {
    #[inline]
    fn check_rep(&self) {
        if self.state != TcpState::Closed {
            assert!(self.flow.is_some());
        }
        if self.connected {
            assert_eq!(self.state, TcpState::Established);
        }
        assert!(self.inbox.len() <= self.config.inbox_capacity);
    }

    #[must_use]
    pub fn new(config: MqttConfig) -> Self {
        let isn = Seq32::from_u32(config.initial_seq);
        let this = MqttSession {
            config,
            state: TcpState::Closed,
            flow: None,
            isn,
            seq: isn,
            ack: Seq32::from_u32(0),
            connected: false,
            next_packet_id: 1,
            topics: TopicRegistry::new(),
            inbox: VecDeque::new(),
            keep_alive: None,
        };
        this.check_rep();
        this
    }

    #[must_use]
    pub fn state(&self) -> TcpState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    #[must_use]
    pub fn seq(&self) -> Seq32 {
        self.seq
    }

    #[must_use]
    pub fn ack(&self) -> Seq32 {
        self.ack
    }

    #[must_use]
    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    #[must_use]
    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut MqttConfig {
        &mut self.config
    }

    pub fn take_publication(&mut self) -> Option<Publication> {
        self.inbox.pop_front()
    }

    fn set_state(&mut self, state: TcpState) {
        if self.state != state {
            debug!("tcp {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.check_rep();
    }

    fn stop_keep_alive(&mut self, timers: &mut TimerScheduler<TimerEvent>) {
        if let Some(handle) = self.keep_alive.take() {
            timers.stop(handle);
        }
    }

    /// Forgets the flow and the subscriptions.
    fn reset(&mut self, timers: &mut TimerScheduler<TimerEvent>) {
        self.stop_keep_alive(timers);
        self.connected = false;
        self.flow = None;
        self.topics.clear();
        self.seq = self.isn;
        self.ack = Seq32::from_u32(0);
        self.set_state(TcpState::Closed);
    }

    /// Applies the changes of frames that were all transmitted.
    pub fn commit(&mut self, commit: Commit, timers: &mut TimerScheduler<TimerEvent>) {
        self.seq.advance(commit.sent);
        match commit.topics {
            Some(TopicChange::Add(topic)) => {
                self.topics.add(&topic);
            }
            Some(TopicChange::Remove(topic)) => {
                self.topics.remove(&topic);
            }
            None => (),
        }
        if commit.disconnect {
            self.stop_keep_alive(timers);
            self.connected = false;
            info!("mqtt disconnect sent");
        }
        self.check_rep();
    }

    fn is_our_flow(&self, flow: &TcpFlow) -> bool {
        match &self.flow {
            Some(ours) => ours.local == flow.local && ours.remote == flow.remote,
            None => flow.local.port() == self.config.local_port,
        }
    }

    /// Handles a checksum-valid TCP segment, rewriting `frame` into the reply.
    pub fn on_segment(
        &mut self,
        ctx: &mut SessionContext<'_>,
        frame: &mut [u8],
    ) -> Result<Pending, SessionError> {
        let inbound = match Inbound::parse(frame) {
            Some(inbound) => inbound,
            None => {
                trace!("malformed tcp segment");
                return Ok(Pending::default());
            }
        };
        if !self.is_our_flow(&inbound.flow) {
            debug!("tcp segment for {} not ours", inbound.flow.local);
            return Ok(Pending::default());
        }

        match (self.state, inbound.control) {
            (TcpState::Closed, TcpControl::SynAck) => self.on_syn_ack(ctx, frame, inbound),
            (TcpState::SynReceived | TcpState::Established, TcpControl::PshAck) => {
                self.on_data(ctx, frame, inbound)
            }
            (TcpState::SynReceived, TcpControl::Ack) => {
                self.set_state(TcpState::Established);
                Ok(Pending::default())
            }
            (TcpState::SynReceived | TcpState::Established | TcpState::FinWait, TcpControl::FinAck) => {
                self.on_fin(ctx, frame, inbound)
            }
            (TcpState::FinWait, TcpControl::Ack) => {
                info!("tcp closed");
                self.reset(ctx.timers);
                Ok(Pending::default())
            }
            (_, TcpControl::Rst) => {
                warn!("tcp reset by {}", inbound.flow.remote);
                self.reset(ctx.timers);
                Ok(Pending::default())
            }
            (state, control) => {
                debug!("tcp {control:?} ignored in {state:?}");
                Ok(Pending::default())
            }
        }
    }

    fn on_syn_ack(
        &mut self,
        ctx: &mut SessionContext<'_>,
        frame: &mut [u8],
        inbound: Inbound,
    ) -> Result<Pending, SessionError> {
        self.ack = inbound.seq.add_usize(1);
        self.seq = match inbound.ack.to_u32() {
            0 => self.isn.add_usize(1),
            _ => inbound.ack,
        };
        // the SYN flag occupies the sequence number just before our first data byte
        let syn_seq = Seq32::from_u32(self.seq.to_u32().wrapping_sub(1));
        let len = ctx
            .builder
            .tcp_reply(frame, TcpFlags::SYN | TcpFlags::ACK, syn_seq, self.ack)?;
        let mut frames = vec![frame[..len].to_vec()];
        self.flow = Some(inbound.flow);
        self.set_state(TcpState::SynReceived);
        info!("tcp flow to {} open", inbound.flow.remote);

        let connect = MqttPacket::Connect {
            client_id: &self.config.client_id,
            keep_alive: self.config.keep_alive.as_secs().min(u64::from(u16::MAX)) as u16,
            clean_session: true,
        };
        let (frame, sent) = ctx.builder.mqtt(&inbound.flow, self.seq, self.ack, &connect)?;
        frames.push(frame);
        Ok(Pending {
            frames,
            commit: Commit {
                sent,
                ..Commit::default()
            },
        })
    }

    fn on_data(
        &mut self,
        ctx: &mut SessionContext<'_>,
        frame: &mut [u8],
        inbound: Inbound,
    ) -> Result<Pending, SessionError> {
        self.seq = self.seq.max(inbound.ack);
        if inbound.seq < self.ack {
            // retransmission of data already delivered; only the ack is repeated
            debug!(
                "tcp duplicate of {} bytes at {}",
                self.ack.sub(inbound.seq).min(inbound.payload.len()),
                inbound.seq
            );
            let len = ctx.builder.tcp_reply(frame, TcpFlags::ACK, self.seq, self.ack)?;
            return Ok(vec![frame[..len].to_vec()].into());
        }
        self.ack = inbound.seq.add_usize(inbound.payload.len());
        let len = ctx.builder.tcp_reply(frame, TcpFlags::ACK, self.seq, self.ack)?;
        self.set_state(TcpState::Established);

        for packet in MqttPackets::new(&inbound.payload) {
            match packet {
                Ok(packet) => self.on_mqtt(ctx, &packet),
                Err(e) => {
                    trace!("undecodable mqtt data: {e}");
                    break;
                }
            }
        }
        Ok(vec![frame[..len].to_vec()].into())
    }

    fn on_mqtt(&mut self, ctx: &mut SessionContext<'_>, packet: &MqttPacket<'_>) {
        match *packet {
            MqttPacket::ConnAck { return_code: 0, .. } => {
                self.connected = true;
                self.stop_keep_alive(ctx.timers);
                if !self.config.keep_alive.is_zero() {
                    self.keep_alive = Some(ctx.timers.start_periodic(
                        TimerEvent::MqttKeepAlive,
                        self.config.keep_alive,
                        ctx.now,
                    ));
                }
                self.check_rep();
                info!("mqtt connected as `{}`", self.config.client_id);
            }
            MqttPacket::ConnAck { return_code, .. } => {
                warn!("mqtt connection refused with code {return_code}");
            }
            MqttPacket::Publish { topic, payload, .. } => {
                if !self.topics.contains(topic) {
                    debug!("publish on unsubscribed topic `{topic}`");
                    return;
                }
                info!(
                    "publish `{}`: {}",
                    topic,
                    String::from_utf8_lossy(payload)
                );
                if self.inbox.len() == self.config.inbox_capacity {
                    warn!("publication inbox full, dropping oldest");
                    self.inbox.pop_front();
                }
                if self.config.inbox_capacity > 0 {
                    self.inbox.push_back(Publication {
                        topic: topic.to_string(),
                        payload: payload.to_vec(),
                    });
                }
            }
            MqttPacket::SubAck {
                packet_id,
                return_code,
            } => debug!("suback {packet_id} code {return_code}"),
            MqttPacket::UnsubAck { packet_id } => debug!("unsuback {packet_id}"),
            MqttPacket::PingResp => debug!("pingresp"),
            ref other => debug!("unexpected {:?} from broker", other.packet_type()),
        }
    }

    fn on_fin(
        &mut self,
        ctx: &mut SessionContext<'_>,
        frame: &mut [u8],
        inbound: Inbound,
    ) -> Result<Pending, SessionError> {
        self.ack = inbound.seq.add_usize(inbound.payload.len() + 1);
        self.seq = self.seq.max(inbound.ack);
        let len = ctx
            .builder
            .tcp_reply(frame, TcpFlags::FIN | TcpFlags::ACK, self.seq, self.ack)?;
        self.stop_keep_alive(ctx.timers);
        if self.connected {
            info!("mqtt disconnected by broker");
        }
        self.connected = false;
        self.set_state(TcpState::FinWait);
        Ok(vec![frame[..len].to_vec()].into())
    }

    /// Opens the flow to the configured broker with a SYN.
    pub fn connect(&mut self, ctx: &mut SessionContext<'_>) -> Result<Pending, SessionError> {
        if self.state != TcpState::Closed {
            return Err(SessionError::AlreadyOpen);
        }
        let flow = TcpFlow {
            remote_mac: self.config.broker_mac,
            local: SocketAddrV4::new(ctx.local_ip, self.config.local_port),
            remote: self.config.broker,
        };
        let frame = ctx.builder.tcp_syn(&flow, self.isn)?;
        self.seq = self.isn;
        debug!("tcp syn to {}", flow.remote);
        Ok(Pending {
            frames: vec![frame],
            commit: Commit {
                sent: 1,
                ..Commit::default()
            },
        })
    }

    fn send(
        &mut self,
        ctx: &mut SessionContext<'_>,
        packet: &MqttPacket<'_>,
    ) -> Result<Pending, SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        let flow = self.flow.ok_or(SessionError::NotConnected)?;
        let (frame, sent) = ctx.builder.mqtt(&flow, self.seq, self.ack, packet)?;
        Ok(Pending {
            frames: vec![frame],
            commit: Commit {
                sent,
                ..Commit::default()
            },
        })
    }

    fn packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = match self.next_packet_id.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        id
    }

    pub fn subscribe(
        &mut self,
        ctx: &mut SessionContext<'_>,
        topic: &str,
    ) -> Result<Pending, SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        let packet_id = self.packet_id();
        let mut pending = self.send(
            ctx,
            &MqttPacket::Subscribe {
                packet_id,
                topic,
                qos: QoS::AtMostOnce,
            },
        )?;
        pending.commit.topics = Some(TopicChange::Add(topic.to_string()));
        Ok(pending)
    }

    pub fn unsubscribe(
        &mut self,
        ctx: &mut SessionContext<'_>,
        topic: &str,
    ) -> Result<Pending, SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        let packet_id = self.packet_id();
        let mut pending = self.send(ctx, &MqttPacket::Unsubscribe { packet_id, topic })?;
        pending.commit.topics = Some(TopicChange::Remove(topic.to_string()));
        Ok(pending)
    }

    pub fn publish(
        &mut self,
        ctx: &mut SessionContext<'_>,
        topic: &str,
        payload: &[u8],
    ) -> Result<Pending, SessionError> {
        self.send(
            ctx,
            &MqttPacket::Publish {
                topic,
                qos: QoS::AtMostOnce,
                retain: false,
                packet_id: None,
                payload,
            },
        )
    }

    pub fn ping(&mut self, ctx: &mut SessionContext<'_>) -> Result<Pending, SessionError> {
        self.send(ctx, &MqttPacket::PingReq)
    }

    /// Sends DISCONNECT; the broker then closes the flow.
    pub fn disconnect(&mut self, ctx: &mut SessionContext<'_>) -> Result<Pending, SessionError> {
        let mut pending = self.send(ctx, &MqttPacket::Disconnect)?;
        pending.commit.disconnect = true;
        Ok(pending)
    }

    pub fn on_keep_alive(&mut self, ctx: &mut SessionContext<'_>) -> Result<Pending, SessionError> {
        if !self.connected {
            return Ok(Pending::default());
        }
        self.ping(ctx)
    }
}
