//! Wire formats of every protocol the stack speaks.
//!
//! Each header type is a thin view over a byte buffer (`T: AsRef<[u8]>`, plus
//! `AsMut<[u8]>` for setters). `new_checked` validates every length the header
//! declares against the buffer so that accessors never index out of bounds;
//! `new_unchecked` is for builders that size the buffer themselves.
//!
//! # Ethernet II
//!
//! ```text
//! 0           6           12    14 (BYTE)
//! +-----------+-----------+-----+---------
//! |    dst    |    src    |type | payload
//! +-----------+-----------+-----+---------
//! ```
//!
//! # IPv4
//!
//! ```text
//! 0   1   2       4       6       8   9   10      12              16              20
//! +---+---+-------+-------+-------+---+---+-------+---------------+---------------+
//! |v/l|tos| total | ident |flg/off|ttl|pro| cksum |      src      |      dst      |
//! +---+---+-------+-------+-------+---+---+-------+---------------+---------------+
//! ```
//!
//! # TCP
//!
//! ```text
//! 0       2       4               8               12      14      16      18      20
//! +-------+-------+---------------+---------------+-------+-------+-------+-------+
//! | sport | dport |      seq      |      ack      |off/flg|  wnd  | cksum |  urg  |
//! +-------+-------+---------------+---------------+-------+-------+-------+-------+
//! ```
//!
//! # DHCP
//!
//! ```text
//! 0   1   2   3   4       8   10  12  16  20  24  28          44          236 240
//! +---+---+---+---+-------+---+---+---+---+---+---+-----------+-----------+---+--------
//! |op |htp|hln|hop|  xid  |sec|flg|ci |yi |si |gi |  chaddr   |  legacy   |mc | options
//! +---+---+---+---+-------+---+---+---+---+---+---+-----------+-----------+---+--------
//! ```

use thiserror::Error;

use crate::utils::buf;

pub mod arp;
pub mod dhcp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod mqtt;
pub mod tcp;
pub mod udp;

pub use ethernet::MacAddress;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum DecodingError {
    #[error("malformed or truncated field `{field}`")]
    Decoding { field: &'static str },
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum EncodingError {
    #[error("not enough space in buffer")]
    NotEnoughSpace,
    #[error("field `{field}` does not fit its wire encoding")]
    OutOfRange { field: &'static str },
}

impl From<buf::Error> for EncodingError {
    fn from(e: buf::Error) -> Self {
        match e {
            buf::Error::NotEnoughSpace => EncodingError::NotEnoughSpace,
        }
    }
}

/// Writes through `byteorder::WriteBytesExt` only fail when the sink is full.
impl From<std::io::Error> for EncodingError {
    fn from(_: std::io::Error) -> Self {
        EncodingError::NotEnoughSpace
    }
}

#[inline]
pub(crate) fn decoding(field: &'static str) -> DecodingError {
    DecodingError::Decoding { field }
}
