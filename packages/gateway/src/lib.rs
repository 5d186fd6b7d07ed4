//! The gateway crate (spec §4.F–§4.I): Resource Directory, virtual IPv6
//! netif, Z/IP Bridge, router loop, and configuration. Grounded in the
//! teacher's `zwave-driver` crate, whose `driver`/`node`/`controller`
//! split this workspace's `resource_directory`/`router`/`zip` modules
//! play the same roles for.

pub mod config;
pub mod error;
pub mod netif;
pub mod resource_directory;
pub mod router;
pub mod zip;

pub mod prelude {
    pub use crate::config::GatewayConfig;
    pub use crate::error::{Error, Result};
    pub use crate::netif::{AddressState, Icmpv6Transport, NullIcmpv6Transport, VirtualNetif};
    pub use crate::resource_directory::{
        Endpoint, EndpointState, MemoryStore, NodeEntry, NodeMode, NodeState, RdEvent,
        ResourceDirectory, Store,
    };
    pub use crate::router::Router;
    pub use crate::zip::{NodeSecuritySupport, UdpTransport, ZipBridge, ZipPacket};
}
