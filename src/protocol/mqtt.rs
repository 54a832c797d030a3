use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{decoding, DecodingError, EncodingError};

pub const DEFAULT_PORT: u16 = 1883;
pub const PROTOCOL_LEVEL: u8 = 4;
pub const MAX_REMAINING_LEN: usize = 268_435_455;

const PROTOCOL_NAME: &[u8] = b"MQTT";
const CONNECT_CLEAN_SESSION: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MqttPacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttPacket<'a> {
    Connect {
        client_id: &'a str,
        keep_alive: u16,
        clean_session: bool,
    },
    ConnAck {
        session_present: bool,
        return_code: u8,
    },
    Publish {
        topic: &'a str,
        qos: QoS,
        retain: bool,
        packet_id: Option<u16>,
        payload: &'a [u8],
    },
    PubAck {
        packet_id: u16,
    },
    Subscribe {
        packet_id: u16,
        topic: &'a str,
        qos: QoS,
    },
    SubAck {
        packet_id: u16,
        return_code: u8,
    },
    Unsubscribe {
        packet_id: u16,
        topic: &'a str,
    },
    UnsubAck {
        packet_id: u16,
    },
    PingReq,
    PingResp,
    Disconnect,
}

impl<'a> MqttPacket<'a> {
    #[must_use]
    pub fn packet_type(&self) -> MqttPacketType {
        match self {
            MqttPacket::Connect { .. } => MqttPacketType::Connect,
            MqttPacket::ConnAck { .. } => MqttPacketType::ConnAck,
            MqttPacket::Publish { .. } => MqttPacketType::Publish,
            MqttPacket::PubAck { .. } => MqttPacketType::PubAck,
            MqttPacket::Subscribe { .. } => MqttPacketType::Subscribe,
            MqttPacket::SubAck { .. } => MqttPacketType::SubAck,
            MqttPacket::Unsubscribe { .. } => MqttPacketType::Unsubscribe,
            MqttPacket::UnsubAck { .. } => MqttPacketType::UnsubAck,
            MqttPacket::PingReq => MqttPacketType::PingReq,
            MqttPacket::PingResp => MqttPacketType::PingResp,
            MqttPacket::Disconnect => MqttPacketType::Disconnect,
        }
    }

    fn fixed_header_flags(&self) -> u8 {
        match *self {
            MqttPacket::Publish { qos, retain, .. } => (u8::from(qos) << 1) | u8::from(retain),
            MqttPacket::Subscribe { .. } | MqttPacket::Unsubscribe { .. } => 0x02,
            _ => 0,
        }
    }

    /// Serializes the packet with its fixed header.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        let mut body = Vec::new();
        match *self {
            MqttPacket::Connect {
                client_id,
                keep_alive,
                clean_session,
            } => {
                write_bytes(&mut body, PROTOCOL_NAME, "protocol name")?;
                body.write_u8(PROTOCOL_LEVEL)?;
                body.write_u8(if clean_session { CONNECT_CLEAN_SESSION } else { 0 })?;
                body.write_u16::<BigEndian>(keep_alive)?;
                write_bytes(&mut body, client_id.as_bytes(), "client id")?;
            }
            MqttPacket::ConnAck {
                session_present,
                return_code,
            } => {
                body.write_u8(u8::from(session_present))?;
                body.write_u8(return_code)?;
            }
            MqttPacket::Publish {
                topic,
                qos,
                packet_id,
                payload,
                ..
            } => {
                write_bytes(&mut body, topic.as_bytes(), "topic")?;
                if qos != QoS::AtMostOnce {
                    let id = packet_id.ok_or(EncodingError::OutOfRange { field: "packet id" })?;
                    body.write_u16::<BigEndian>(id)?;
                }
                body.extend_from_slice(payload);
            }
            MqttPacket::Subscribe {
                packet_id,
                topic,
                qos,
            } => {
                body.write_u16::<BigEndian>(packet_id)?;
                write_bytes(&mut body, topic.as_bytes(), "topic")?;
                body.write_u8(qos.into())?;
            }
            MqttPacket::SubAck {
                packet_id,
                return_code,
            } => {
                body.write_u16::<BigEndian>(packet_id)?;
                body.write_u8(return_code)?;
            }
            MqttPacket::Unsubscribe { packet_id, topic } => {
                body.write_u16::<BigEndian>(packet_id)?;
                write_bytes(&mut body, topic.as_bytes(), "topic")?;
            }
            MqttPacket::PubAck { packet_id } | MqttPacket::UnsubAck { packet_id } => {
                body.write_u16::<BigEndian>(packet_id)?;
            }
            MqttPacket::PingReq | MqttPacket::PingResp | MqttPacket::Disconnect => (),
        }

        let mut packet = Vec::with_capacity(body.len() + 5);
        packet.write_u8((u8::from(self.packet_type()) << 4) | self.fixed_header_flags())?;
        encode_remaining_len(body.len(), &mut packet)?;
        packet.extend_from_slice(&body);
        Ok(packet)
    }

    /// Parses one packet from the front of `buf` and returns it with the number of
    /// bytes it occupied.
    pub fn parse(buf: &'a [u8]) -> Result<(Self, usize), DecodingError> {
        let (&first, rest) = buf.split_first().ok_or_else(|| decoding("fixed header"))?;
        let (remaining, len_bytes) = decode_remaining_len(rest)?;
        let header_len = 1 + len_bytes;
        let body = buf
            .get(header_len..header_len + remaining)
            .ok_or_else(|| decoding("remaining length"))?;
        let packet_type =
            MqttPacketType::try_from(first >> 4).map_err(|_| decoding("packet type"))?;
        let flags = first & 0x0f;

        let mut rdr = Cursor::new(body);
        let packet = match packet_type {
            MqttPacketType::Connect => {
                let name = read_bytes(&mut rdr, "protocol name")?;
                if name != PROTOCOL_NAME {
                    return Err(decoding("protocol name"));
                }
                let _level = read_u8(&mut rdr, "protocol level")?;
                let connect_flags = read_u8(&mut rdr, "connect flags")?;
                let keep_alive = read_u16(&mut rdr, "keep alive")?;
                let client_id = read_str(&mut rdr, "client id")?;
                MqttPacket::Connect {
                    client_id,
                    keep_alive,
                    clean_session: connect_flags & CONNECT_CLEAN_SESSION != 0,
                }
            }
            MqttPacketType::ConnAck => {
                let ack_flags = read_u8(&mut rdr, "connack flags")?;
                let return_code = read_u8(&mut rdr, "return code")?;
                MqttPacket::ConnAck {
                    session_present: ack_flags & 0x01 != 0,
                    return_code,
                }
            }
            MqttPacketType::Publish => {
                let qos = QoS::try_from((flags >> 1) & 0x03).map_err(|_| decoding("qos"))?;
                let topic = read_str(&mut rdr, "topic")?;
                let packet_id = match qos {
                    QoS::AtMostOnce => None,
                    _ => Some(read_u16(&mut rdr, "packet id")?),
                };
                let payload = &body[rdr.position() as usize..];
                MqttPacket::Publish {
                    topic,
                    qos,
                    retain: flags & 0x01 != 0,
                    packet_id,
                    payload,
                }
            }
            MqttPacketType::PubAck => MqttPacket::PubAck {
                packet_id: read_u16(&mut rdr, "packet id")?,
            },
            MqttPacketType::Subscribe => {
                let packet_id = read_u16(&mut rdr, "packet id")?;
                let topic = read_str(&mut rdr, "topic")?;
                let qos = QoS::try_from(read_u8(&mut rdr, "qos")? & 0x03)
                    .map_err(|_| decoding("qos"))?;
                MqttPacket::Subscribe {
                    packet_id,
                    topic,
                    qos,
                }
            }
            MqttPacketType::SubAck => {
                let packet_id = read_u16(&mut rdr, "packet id")?;
                let return_code = read_u8(&mut rdr, "return code")?;
                MqttPacket::SubAck {
                    packet_id,
                    return_code,
                }
            }
            MqttPacketType::Unsubscribe => {
                let packet_id = read_u16(&mut rdr, "packet id")?;
                let topic = read_str(&mut rdr, "topic")?;
                MqttPacket::Unsubscribe { packet_id, topic }
            }
            MqttPacketType::UnsubAck => MqttPacket::UnsubAck {
                packet_id: read_u16(&mut rdr, "packet id")?,
            },
            MqttPacketType::PingReq => MqttPacket::PingReq,
            MqttPacketType::PingResp => MqttPacket::PingResp,
            MqttPacketType::Disconnect => MqttPacket::Disconnect,
        };
        Ok((packet, header_len + remaining))
    }
}

/// Consecutive packets carried in one TCP payload.
pub struct MqttPackets<'a> {
    data: &'a [u8],
}

impl<'a> MqttPackets<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        MqttPackets { data }
    }
}

impl<'a> Iterator for MqttPackets<'a> {
    type Item = Result<MqttPacket<'a>, DecodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        match MqttPacket::parse(self.data) {
            Ok((packet, used)) => {
                self.data = &self.data[used..];
                Some(Ok(packet))
            }
            Err(e) => {
                self.data = &[];
                Some(Err(e))
            }
        }
    }
}

/// Writes the variable-length "remaining length" field, 7 bits per byte.
pub fn encode_remaining_len(mut len: usize, wtr: &mut Vec<u8>) -> Result<(), EncodingError> {
    if len > MAX_REMAINING_LEN {
        return Err(EncodingError::OutOfRange {
            field: "remaining length",
        });
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        wtr.write_u8(byte)?;
        if len == 0 {
            return Ok(());
        }
    }
}

/// Returns the decoded length and the number of bytes it took.
pub fn decode_remaining_len(buf: &[u8]) -> Result<(usize, usize), DecodingError> {
    let mut value = 0usize;
    for (i, &byte) in buf.iter().take(4).enumerate() {
        value |= usize::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(decoding("remaining length"))
}

fn write_bytes(wtr: &mut Vec<u8>, bytes: &[u8], field: &'static str) -> Result<(), EncodingError> {
    let len = u16::try_from(bytes.len()).map_err(|_| EncodingError::OutOfRange { field })?;
    wtr.write_u16::<BigEndian>(len)?;
    wtr.extend_from_slice(bytes);
    Ok(())
}

fn read_u8(rdr: &mut Cursor<&[u8]>, field: &'static str) -> Result<u8, DecodingError> {
    rdr.read_u8().map_err(|_e| decoding(field))
}

fn read_u16(rdr: &mut Cursor<&[u8]>, field: &'static str) -> Result<u16, DecodingError> {
    rdr.read_u16::<BigEndian>().map_err(|_e| decoding(field))
}

fn read_bytes<'a>(
    rdr: &mut Cursor<&'a [u8]>,
    field: &'static str,
) -> Result<&'a [u8], DecodingError> {
    let len = usize::from(read_u16(rdr, field)?);
    let start = rdr.position() as usize;
    let data: &'a [u8] = *rdr.get_ref();
    let bytes = data.get(start..start + len).ok_or_else(|| decoding(field))?;
    rdr.set_position((start + len) as u64);
    Ok(bytes)
}

fn read_str<'a>(rdr: &mut Cursor<&'a [u8]>, field: &'static str) -> Result<&'a str, DecodingError> {
    let bytes = read_bytes(rdr, field)?;
    std::str::from_utf8(bytes).map_err(|_e| decoding(field))
}
