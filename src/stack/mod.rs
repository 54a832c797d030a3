pub mod builder;
pub mod classifier;
pub mod config;
pub mod dhcp_client;
pub mod interface;
pub mod session;
pub mod topics;
pub mod transport;

pub use builder::{BuildError, PacketBuilder, TcpFlow};
pub use config::{DhcpConfig, IpConfig, MqttConfig};
pub use dhcp_client::{DhcpClient, DhcpError, DhcpLease, DhcpState};
pub use interface::{CommandError, Interface, InterfaceBuilder};
pub use session::{Commit, MqttSession, Pending, Publication, SessionError, TcpState};
pub use topics::TopicRegistry;
pub use transport::{MemoryTransport, RawTransport, TransportError};

/// Everything the control loop schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    DhcpRetry,
    DhcpRenew,
    DhcpRebind,
    DhcpLeaseExpired,
    DhcpConflictCheck,
    MqttKeepAlive,
}
