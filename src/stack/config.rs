use std::{
    net::{Ipv4Addr, SocketAddrV4},
    time::Duration,
};

use crate::protocol::{mqtt, MacAddress};

pub const DEFAULT_MAC: MacAddress = MacAddress([0x02, 0x03, 0x04, 0x05, 0x06, 0x76]);

/// Active IPv4 configuration of the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpConfig {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
}

impl IpConfig {
    /// Static configuration used when DHCP is off or a lease is given up.
    #[must_use]
    pub fn default() -> Self {
        IpConfig {
            address: Ipv4Addr::new(192, 168, 1, 118),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            dns: Ipv4Addr::UNSPECIFIED,
        }
    }

    #[must_use]
    pub fn unconfigured() -> Self {
        IpConfig {
            address: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            dns: Ipv4Addr::UNSPECIFIED,
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.address.is_unspecified()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DhcpConfig {
    /// Start acquiring a lease as soon as the interface is built.
    pub enabled: bool,
    pub xid: u32,
    /// Period of DISCOVER/REQUEST re-sends while waiting for the server.
    pub retry_interval: Duration,
    /// How long after binding an ARP reply for the new address counts as a conflict.
    pub conflict_check: Duration,
}

impl DhcpConfig {
    #[must_use]
    pub fn default() -> Self {
        DhcpConfig {
            enabled: true,
            xid: 0x1234_5678,
            retry_interval: Duration::from_secs(15),
            conflict_check: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub client_id: String,
    pub broker: SocketAddrV4,
    /// Destination hardware address of every segment sent to the broker.
    pub broker_mac: MacAddress,
    pub local_port: u16,
    pub keep_alive: Duration,
    pub initial_seq: u32,
    /// Received publications kept for the shell to drain.
    pub inbox_capacity: usize,
}

impl MqttConfig {
    #[must_use]
    pub fn default() -> Self {
        MqttConfig {
            client_id: "tinystack".to_string(),
            broker: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), mqtt::DEFAULT_PORT),
            broker_mac: MacAddress::BROADCAST,
            local_port: 50000,
            keep_alive: Duration::from_secs(60),
            initial_seq: 0,
            inbox_capacity: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_configured() {
        let ip = IpConfig::default();
        assert!(ip.is_configured());
        assert_eq!(ip.address, Ipv4Addr::new(192, 168, 1, 118));
        assert!(!IpConfig::unconfigured().is_configured());
    }
}
