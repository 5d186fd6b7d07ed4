//! `zwip-gatewayd`: wires the SHMP dispatcher, S0 transport, resource
//! directory, virtual netif, and Z/IP bridge into a runnable gateway.
//! Grounded in the teacher's `cli/src/rt.rs` `Runtime::run` (a
//! `tokio::select!` pump over the serial port, the dispatcher's
//! unsolicited queue, and a periodic tick), adapted: the teacher's
//! driver/serial-API actor pair collapses to [`zwip_serial::dispatcher`]'s
//! single mutex-guarded struct (see that crate's `DESIGN.md` entry), so
//! this loop selects over the UDP listener, the RA cadence, and the
//! router tick instead of separate actor mailboxes.

mod recvmsg;

use anyhow::{Context, Result};
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::{Arc, Mutex};
use zwip_gateway::config::GatewayConfig;
use zwip_gateway::netif::{Icmpv6Transport, NullIcmpv6Transport};
use zwip_gateway::resource_directory::{MemoryStore, ResourceDirectory, Store};
use zwip_gateway::router::{self, Router, ROUTER_IDLE_SLEEP};
use zwip_gateway::zip::{NodeSecuritySupport, UdpTransport, ZipBridge, ZipPacket};
use zwip_logging::{Channel, ImmutableLogger, LogEntry, Loglevel, TermLogger};
use zwip_security::prelude::S0Transport;
use zwip_serial::binding::{SerialBinding, TcpPort, UartPort};
use zwip_serial::prelude::{Dispatcher, FunctionType};

/// A single bit of `security_flags` marking S0 bootstrap (spec §4.D/§4.E).
const SECURITY_FLAG_S0: u8 = 0x01;

/// Node `1`: the controller itself, per Z-Wave convention.
const OUR_NODE: u8 = 1;

/// The UART or a TCP loopback stand-in, matching [`zwip_serial::binding`]'s
/// own split; an enum rather than `Box<dyn SerialBinding>` because
/// `SerialBinding`'s methods return `impl Future`, which isn't object-safe.
enum AnyBinding {
    Uart(UartPort),
    Tcp(TcpPort),
}

impl SerialBinding for AnyBinding {
    async fn write(&mut self, bytes: &[u8]) -> zwip_serial::error::Result<()> {
        match self {
            AnyBinding::Uart(p) => p.write(bytes).await,
            AnyBinding::Tcp(p) => p.write(bytes).await,
        }
    }

    async fn read(&mut self) -> Option<Vec<u8>> {
        match self {
            AnyBinding::Uart(p) => p.read().await,
            AnyBinding::Tcp(p) => p.read().await,
        }
    }
}

async fn open_binding(path: &str) -> Result<AnyBinding> {
    if let Some(addr) = path.strip_prefix("tcp://") {
        Ok(AnyBinding::Tcp(
            TcpPort::connect(addr).await.context("connecting to tcp port")?,
        ))
    } else {
        Ok(AnyBinding::Uart(
            UartPort::open(path, 115_200).context("opening serial port")?,
        ))
    }
}

/// Sends over the UDP socket the router loop also receives on, shared via
/// `Arc` since `tokio::net::UdpSocket`'s methods take `&self`.
struct TokioUdp(Arc<tokio::net::UdpSocket>);

impl UdpTransport for TokioUdp {
    async fn send_to(&self, payload: &[u8], dest: SocketAddrV6) -> zwip_gateway::error::Result<()> {
        self.0
            .send_to(payload, dest)
            .await
            .map_err(|e| zwip_core::error::Error::SerialFramingError(e.to_string()))?;
        Ok(())
    }
}

/// Consults the Resource Directory's per-node `security_flags` to decide
/// whether an inbound secure flag is honorable (spec §4.H step 2).
struct RouterSecurityView<S: Store, T: Icmpv6Transport>(Arc<Router<S, T>>);

impl<S: Store, T: Icmpv6Transport> NodeSecuritySupport for RouterSecurityView<S, T> {
    fn supports_s0(&self, nodeid: u16) -> bool {
        self.0
            .rd()
            .lock()
            .unwrap()
            .get(nodeid)
            .is_some_and(|e| e.security_flags & SECURITY_FLAG_S0 != 0)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env().context("loading gateway configuration")?;
    let logger = TermLogger::stderr(Loglevel::Info);

    let binding = open_binding(&config.port).await?;

    // Spec §4.C: the capability bitmap should come from `GetSerialApiCapabilities`,
    // but probing it requires a dispatcher already holding one. We start
    // optimistic (all commands enabled) and rely on `send`/`send_with_response`
    // surfacing `Unsupported` for anything the module actually rejects.
    let mut supported = zwip_serial::dispatcher::SupportedBitmask::ZERO;
    supported.fill(true);
    let (dispatcher, mut unsolicited_rx) =
        Dispatcher::with_logger(binding, supported, vec![], logger.clone());
    dispatcher.set_lr_enabled(config.lr_enabled);

    let s0 = Arc::new(Mutex::new(S0Transport::new(&config.network_key)));

    let rd = ResourceDirectory::new(MemoryStore::new());
    let netif = zwip_gateway::netif::VirtualNetif::new(
        config.pio_prefix,
        config.rio_prefix,
        config.ra_period,
        NullIcmpv6Transport,
    );
    let router = Arc::new(Router::with_logger(rd, netif, s0.clone(), logger.clone()));

    let udp_socket = Arc::new(
        tokio::net::UdpSocket::bind((Ipv6Addr::UNSPECIFIED, config.udp_listen_port))
            .await
            .context("binding udp listener")?,
    );
    recvmsg::enable_pktinfo(&udp_socket).context("enabling IPV6_RECVPKTINFO")?;

    let zip_bridge = Arc::new(ZipBridge::new(
        dispatcher.clone(),
        s0.clone(),
        TokioUdp(udp_socket.clone()),
        RouterSecurityView(router.clone()),
        config.unsolicited_dest,
        OUR_NODE,
    ));

    logger.log(LogEntry {
        channel: Channel::Router,
        level: Loglevel::Info,
        payload: format!("gateway up: zw netif {}", config.rio_prefix).into(),
    });

    let mut ra_interval = tokio::time::interval(config.ra_period);
    let mut udp_buf = [0u8; 1500];
    loop {
        tokio::select! {
            Some(frame) = unsolicited_rx.recv() => {
                if frame.function_type == FunctionType::ApplicationCommandHandler as u8 && frame.payload.len() >= 3 {
                    let src_node = frame.payload[0] as u16;
                    let raw_cc = &frame.payload[2..];
                    if let Err(e) = zip_bridge.handle_outbound(src_node, 0, 0, raw_cc).await {
                        logger.log(LogEntry {
                            channel: Channel::Router,
                            level: Loglevel::Warn,
                            payload: format!("outbound translation failed: {e}").into(),
                        });
                    }
                }
            }
            Ok((n, from, dest)) = recvmsg::recv_with_dest(&udp_socket, &mut udp_buf) => {
                match ZipPacket::parse(&udp_buf[..n]) {
                    Ok(packet) => {
                        let dst_node = router.netif().lock().unwrap().resolve(dest);
                        if let Some(dst_node) = dst_node {
                            let rn = if packet.secure {
                                router::request_nonce(&dispatcher, &s0, &mut unsolicited_rx, OUR_NODE, dst_node as u8)
                                    .await
                                    .ok()
                            } else {
                                None
                            };
                            if let Err(e) = zip_bridge.handle_inbound(from, dst_node, packet, rn, &mut unsolicited_rx).await {
                                logger.log(LogEntry {
                                    channel: Channel::Router,
                                    level: Loglevel::Warn,
                                    payload: format!("inbound translation failed: {e}").into(),
                                });
                            }
                        }
                    }
                    Err(e) => {
                        logger.log(LogEntry {
                            channel: Channel::Router,
                            level: Loglevel::Warn,
                            payload: format!("malformed Z/IP datagram: {e}").into(),
                        });
                    }
                }
            }
            _ = ra_interval.tick() => {
                router.netif().lock().unwrap().send_advertisement();
            }
            _ = zwip_pal::sleep(ROUTER_IDLE_SLEEP) => {
                router.tick(&dispatcher, &mut unsolicited_rx).await;
                if router.stopping() {
                    break;
                }
            }
        }
    }

    Ok(())
}
