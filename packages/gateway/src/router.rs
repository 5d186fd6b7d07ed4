//! The Router Loop (spec §4.I): a cooperative supervisor owning the
//! Resource Directory lifecycle, the S0 nonce TTL tick, and the
//! Nonce-Get/Nonce-Report handshake. Grounded in the teacher's
//! `driver/driver.rs` main loop (a `tokio::select!` over unsolicited
//! frames, queued tasks, and a periodic tick) and `node/mod.rs`'s
//! probe-step scheduling, collapsed here to a single `async fn tick`
//! a caller drives with a cooperative stop flag (spec §5 "subsystem
//! shutdown uses a cooperative stop flag checked each loop iteration").

use crate::error::{Error, Result};
use crate::netif::{Icmpv6Transport, VirtualNetif};
use crate::resource_directory::{NodeState, RdEvent, ResourceDirectory, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use zwip_core::error::Error as CoreError;
use zwip_logging::{Channel, ImmutableLogger, LogEntry, Loglevel, NullLogger};
use zwip_security::prelude::S0Transport;
use zwip_serial::binding::SerialBinding;
use zwip_serial::prelude::{CommandFrame, DispatcherHandle, FunctionType};

/// `SECURITY`, `NONCE_GET`, `NONCE_REPORT` (spec §4.E step 1: obtaining a
/// fresh receiver-nonce is a `SendData` round trip through a Command Class).
const SECURITY_CC: u8 = 0x98;
const NONCE_GET: u8 = 0x40;
const NONCE_REPORT: u8 = 0x80;

/// Manufacturer Specific CC (spec §4.G `ProbeProductId`).
const MANUFACTURER_SPECIFIC_CC: u8 = 0x72;
const MANUFACTURER_SPECIFIC_GET: u8 = 0x04;
const MANUFACTURER_SPECIFIC_REPORT: u8 = 0x05;

/// Multi Channel CC (spec §4.G `EnumerateEndpoints`/`FindEndpoints`).
const MULTI_CHANNEL_CC: u8 = 0x60;
const MULTI_CHANNEL_END_POINT_GET: u8 = 0x07;
const MULTI_CHANNEL_END_POINT_REPORT: u8 = 0x08;
const MULTI_CHANNEL_FIND: u8 = 0x09;
const MULTI_CHANNEL_FIND_REPORT: u8 = 0x0a;

/// Version CC (spec §4.G `CheckWucVersion`/`ProbeEndpoints`).
const VERSION_CC: u8 = 0x86;
const VERSION_CC_GET: u8 = 0x13;
const VERSION_CC_REPORT: u8 = 0x14;

/// Wake Up CC (spec §4.G `GetWakeUpCapabilities`/`SetWakeUpInterval`/`ProbeWakeUpInterval`).
const WAKE_UP_CC: u8 = 0x84;
const WAKE_UP_INTERVAL_SET: u8 = 0x04;
const WAKE_UP_INTERVAL_GET: u8 = 0x05;
const WAKE_UP_INTERVAL_REPORT: u8 = 0x06;
const WAKE_UP_CAPABILITIES_GET: u8 = 0x09;
const WAKE_UP_CAPABILITIES_REPORT: u8 = 0x0a;

const PROBE_STEP_BUDGET: Duration = Duration::from_secs(5);

pub const NONCE_TTL_TICK: Duration = Duration::from_secs(1);
pub const ROUTER_IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Sends `Security:Nonce-Get` to `nodeid` and awaits the `Nonce-Report` that
/// comes back through the dispatcher's unsolicited `ApplicationCommandHandler`
/// queue, registering the received nonce as a reply-nonce for `(us, nodeid)`
/// (spec §4.E step 1, pushed up from the security crate per its own module
/// doc comment since it needs the SHMP dispatcher).
pub async fn request_nonce<B: SerialBinding>(
    dispatcher: &DispatcherHandle<B>,
    s0: &Arc<Mutex<S0Transport>>,
    unsolicited: &mut tokio::sync::mpsc::Receiver<CommandFrame>,
    our_node: u8,
    nodeid: u8,
) -> Result<[u8; 8]> {
    let payload = vec![nodeid, 2, SECURITY_CC, NONCE_GET];
    dispatcher
        .send(FunctionType::SendData as u8, payload)
        .await
        .map_err(Into::<Error>::into)?;

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CoreError::NonceTimeout.into());
        }
        let Some(frame) = zwip_pal::timeout(remaining, unsolicited.recv()).await.flatten() else {
            return Err(CoreError::NonceTimeout.into());
        };
        if frame.function_type != FunctionType::ApplicationCommandHandler as u8 {
            continue;
        }
        // payload: srcNode, len, cc, cmd, nonce[8]
        if frame.payload.len() < 4 + 8 || frame.payload[0] != nodeid {
            continue;
        }
        if frame.payload[2] != SECURITY_CC || frame.payload[3] != NONCE_REPORT {
            continue;
        }
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&frame.payload[4..12]);
        s0.lock().unwrap().register_reply_nonce(our_node, nodeid, nonce);
        return Ok(nonce);
    }
}

/// Sends `cc`/`cmd` to `nodeid` via `SendData` and awaits the matching
/// `report_cmd` that comes back through the dispatcher's unsolicited
/// `ApplicationCommandHandler` queue (spec §4.G's probe steps), modeled
/// the same way [`request_nonce`] models Security:Nonce-Get. Returns the
/// report's payload past the CC/command header.
async fn send_cc_and_await_report<B: SerialBinding>(
    dispatcher: &DispatcherHandle<B>,
    unsolicited: &mut tokio::sync::mpsc::Receiver<CommandFrame>,
    nodeid: u8,
    cc: u8,
    cmd: u8,
    extra: &[u8],
    report_cmd: u8,
) -> Result<Vec<u8>> {
    let mut payload = vec![nodeid, 2 + extra.len() as u8, cc, cmd];
    payload.extend_from_slice(extra);
    dispatcher
        .send(FunctionType::SendData as u8, payload)
        .await
        .map_err(Into::<Error>::into)?;

    let deadline = Instant::now() + PROBE_STEP_BUDGET;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CoreError::SerialTimeout.into());
        }
        let Some(frame) = zwip_pal::timeout(remaining, unsolicited.recv()).await.flatten() else {
            return Err(CoreError::SerialTimeout.into());
        };
        if frame.function_type != FunctionType::ApplicationCommandHandler as u8 {
            continue;
        }
        if frame.payload.len() < 4 || frame.payload[0] != nodeid {
            continue;
        }
        if frame.payload[2] != cc || frame.payload[3] != report_cmd {
            continue;
        }
        return Ok(frame.payload[4..].to_vec());
    }
}

/// Fire-and-forget CC send (spec §4.G `SetWakeUpInterval`: no report expected).
async fn send_cc<B: SerialBinding>(
    dispatcher: &DispatcherHandle<B>,
    nodeid: u8,
    cc: u8,
    cmd: u8,
    extra: &[u8],
) -> Result<()> {
    let mut payload = vec![nodeid, 2 + extra.len() as u8, cc, cmd];
    payload.extend_from_slice(extra);
    dispatcher
        .send(FunctionType::SendData as u8, payload)
        .await
        .map_err(Into::into)
}

/// Call-out to the external mDNS service publisher (spec §1 names it as an
/// out-of-scope collaborator; `NullMdnsPublisher` is the in-tree default).
pub trait MdnsPublisher: Send + Sync {
    fn publish_node(&self, nodeid: u16);
    fn publish_endpoint(&self, nodeid: u16, endpoint_id: u8);
}

pub struct NullMdnsPublisher;

impl MdnsPublisher for NullMdnsPublisher {
    fn publish_node(&self, _nodeid: u16) {}
    fn publish_endpoint(&self, _nodeid: u16, _endpoint_id: u8) {}
}

/// Owns the RD lifecycle loop and the 1 Hz nonce tick (spec §4.I/§5).
pub struct Router<S: Store, T: Icmpv6Transport> {
    rd: Mutex<ResourceDirectory<S>>,
    netif: Mutex<VirtualNetif<T>>,
    s0: Arc<Mutex<S0Transport>>,
    last_tick: Mutex<Instant>,
    stop: AtomicBool,
    logger: Arc<dyn ImmutableLogger>,
    mdns: Arc<dyn MdnsPublisher>,
}

impl<S: Store, T: Icmpv6Transport> Router<S, T> {
    pub fn new(rd: ResourceDirectory<S>, netif: VirtualNetif<T>, s0: Arc<Mutex<S0Transport>>) -> Self {
        Self::with_logger(rd, netif, s0, Arc::new(NullLogger))
    }

    pub fn with_logger(
        rd: ResourceDirectory<S>,
        netif: VirtualNetif<T>,
        s0: Arc<Mutex<S0Transport>>,
        logger: Arc<dyn ImmutableLogger>,
    ) -> Self {
        Self::with_logger_and_mdns(rd, netif, s0, logger, Arc::new(NullMdnsPublisher))
    }

    pub fn with_logger_and_mdns(
        rd: ResourceDirectory<S>,
        netif: VirtualNetif<T>,
        s0: Arc<Mutex<S0Transport>>,
        logger: Arc<dyn ImmutableLogger>,
        mdns: Arc<dyn MdnsPublisher>,
    ) -> Self {
        Self {
            rd: Mutex::new(rd),
            netif: Mutex::new(netif),
            s0,
            last_tick: Mutex::new(Instant::now()),
            stop: AtomicBool::new(false),
            logger,
            mdns,
        }
    }

    fn log(&self, level: Loglevel, message: impl Into<zwip_core::log::LogPayload>) {
        self.logger.log(LogEntry {
            channel: Channel::Router,
            level,
            payload: message.into(),
        });
    }

    /// Cooperative shutdown (spec §5): checked once per `tick`.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn rd(&self) -> &Mutex<ResourceDirectory<S>> {
        &self.rd
    }

    pub fn netif(&self) -> &Mutex<VirtualNetif<T>> {
        &self.netif
    }

    /// Performs the SHMP I/O `nodeid`'s current probe state calls for, then
    /// advances the state machine on success (or fails the node on error),
    /// publishing/retracting its netif address on `Done`/`Failed` (spec
    /// §4.G/§4.I). Each step is a real serial round trip through
    /// `dispatcher`, not bookkeeping alone.
    pub async fn advance_node<B: SerialBinding>(
        &self,
        nodeid: u16,
        dispatcher: &DispatcherHandle<B>,
        unsolicited: &mut tokio::sync::mpsc::Receiver<CommandFrame>,
    ) -> Result<()> {
        let state = self
            .rd
            .lock()
            .unwrap()
            .get(nodeid)
            .ok_or(CoreError::NodeUnknown(nodeid))?
            .state;
        let node = nodeid as u8;

        let io_result: Result<()> = match state {
            NodeState::Created => Ok(()),
            NodeState::ProbeNodeInfo => dispatcher
                .send_with_response(FunctionType::GetNodeProtocolInfo as u8, vec![node])
                .await
                .map(|_| ())
                .map_err(Into::into),
            NodeState::ProbeProductId => send_cc_and_await_report(
                dispatcher,
                unsolicited,
                node,
                MANUFACTURER_SPECIFIC_CC,
                MANUFACTURER_SPECIFIC_GET,
                &[],
                MANUFACTURER_SPECIFIC_REPORT,
            )
            .await
            .map(|_| ()),
            NodeState::EnumerateEndpoints => send_cc_and_await_report(
                dispatcher,
                unsolicited,
                node,
                MULTI_CHANNEL_CC,
                MULTI_CHANNEL_END_POINT_GET,
                &[],
                MULTI_CHANNEL_END_POINT_REPORT,
            )
            .await
            .map(|_| ()),
            NodeState::FindEndpoints => send_cc_and_await_report(
                dispatcher,
                unsolicited,
                node,
                MULTI_CHANNEL_CC,
                MULTI_CHANNEL_FIND,
                &[0xff, 0xff],
                MULTI_CHANNEL_FIND_REPORT,
            )
            .await
            .map(|_| ()),
            NodeState::CheckWucVersion => send_cc_and_await_report(
                dispatcher,
                unsolicited,
                node,
                VERSION_CC,
                VERSION_CC_GET,
                &[WAKE_UP_CC],
                VERSION_CC_REPORT,
            )
            .await
            .map(|_| ()),
            NodeState::GetWakeUpCapabilities => send_cc_and_await_report(
                dispatcher,
                unsolicited,
                node,
                WAKE_UP_CC,
                WAKE_UP_CAPABILITIES_GET,
                &[],
                WAKE_UP_CAPABILITIES_REPORT,
            )
            .await
            .map(|_| ()),
            NodeState::SetWakeUpInterval => {
                send_cc(dispatcher, node, WAKE_UP_CC, WAKE_UP_INTERVAL_SET, &[0, 14, 16, node]).await
            }
            NodeState::AssignReturnRoute => dispatcher
                .send_with_response(FunctionType::AssignReturnRoute as u8, vec![node, 0])
                .await
                .map(|_| ())
                .map_err(Into::into),
            NodeState::ProbeWakeUpInterval => send_cc_and_await_report(
                dispatcher,
                unsolicited,
                node,
                WAKE_UP_CC,
                WAKE_UP_INTERVAL_GET,
                &[],
                WAKE_UP_INTERVAL_REPORT,
            )
            .await
            .map(|interval| {
                if interval.len() >= 3 {
                    let secs = u32::from_be_bytes([0, interval[0], interval[1], interval[2]]);
                    let _ = self.rd.lock().unwrap().set_wakeup_interval(nodeid, secs);
                }
            }),
            NodeState::ProbeEndpoints => {
                let first = self.rd.lock().unwrap().first_endpoint(nodeid).map(|e| e.endpoint_id);
                match first {
                    Some(_ep) => send_cc_and_await_report(
                        dispatcher,
                        unsolicited,
                        node,
                        VERSION_CC,
                        VERSION_CC_GET,
                        &[],
                        VERSION_CC_REPORT,
                    )
                    .await
                    .map(|_| ()),
                    None => Ok(()),
                }
            }
            NodeState::MdnsProbe => {
                self.mdns.publish_node(nodeid);
                Ok(())
            }
            NodeState::MdnsEndpointProbe => {
                let first = self.rd.lock().unwrap().first_endpoint(nodeid).map(|e| e.endpoint_id);
                if let Some(ep) = first {
                    self.mdns.publish_endpoint(nodeid, ep);
                }
                Ok(())
            }
            NodeState::Done | NodeState::ProbeFail | NodeState::Failing => Ok(()),
        };

        if let Err(e) = io_result {
            self.log(
                Loglevel::Warn,
                format!("probe step {state:?} for node {nodeid} failed: {e}"),
            );
            return self.fail_node(nodeid);
        }

        let event = self.rd.lock().unwrap().advance(nodeid)?;
        match event {
            Some(RdEvent::Done(n)) => {
                self.netif.lock().unwrap().publish(n);
                self.log(Loglevel::Info, format!("node {n} reached Done, address published"));
            }
            Some(RdEvent::Failed(n)) => {
                self.netif.lock().unwrap().retract(n);
            }
            None => {}
        }
        Ok(())
    }

    pub fn fail_node(&self, nodeid: u16) -> Result<()> {
        let RdEvent::Failed(n) = self.rd.lock().unwrap().fail(nodeid)? else {
            unreachable!("fail() always returns RdEvent::Failed")
        };
        self.netif.lock().unwrap().retract(n);
        self.log(Loglevel::Warn, format!("node {n} failed, address retracted"));
        Ok(())
    }

    /// One iteration of spec §4.I's loop: tick the nonce TTL at most once
    /// per second, run a single pending probe step (a real SHMP round trip
    /// through `dispatcher`), then return. The caller is expected to
    /// `zwip_pal::sleep(ROUTER_IDLE_SLEEP)` between calls and stop calling
    /// once [`Router::stopping`] is true.
    pub async fn tick<B: SerialBinding>(
        &self,
        dispatcher: &DispatcherHandle<B>,
        unsolicited: &mut tokio::sync::mpsc::Receiver<CommandFrame>,
    ) {
        let mut last_tick = self.last_tick.lock().unwrap();
        if last_tick.elapsed() >= NONCE_TTL_TICK {
            self.s0.lock().unwrap().nonces_mut().tick();
            *last_tick = Instant::now();
        }
        drop(last_tick);

        let pending = self.rd.lock().unwrap().first_pending();
        if let Some(nodeid) = pending {
            if let Err(e) = self.advance_node(nodeid, dispatcher, unsolicited).await {
                self.log(Loglevel::Warn, format!("probe step for node {nodeid} failed: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::netif::NullIcmpv6Transport;
    use crate::resource_directory::MemoryStore;
    use std::collections::VecDeque;
    use std::net::Ipv6Addr;
    use std::sync::Mutex as StdMutex;
    use zwip_core::prelude::CommandType;
    use zwip_serial::dispatcher::{Dispatcher, SupportedBitmask};

    fn router() -> Router<MemoryStore, NullIcmpv6Transport> {
        let mut rd = ResourceDirectory::new(MemoryStore::new());
        rd.alloc(7);
        let netif = VirtualNetif::new(
            "fd00:bbbb::".parse::<Ipv6Addr>().unwrap(),
            "fd00:bbbb:1::".parse::<Ipv6Addr>().unwrap(),
            Duration::from_secs(60),
            NullIcmpv6Transport,
        );
        let s0 = Arc::new(Mutex::new(S0Transport::new(&[0u8; 16])));
        Router::new(rd, netif, s0)
    }

    /// Feeds canned ACK/RESPONSE/REQUEST bytes to the dispatcher without a
    /// real UART, mirroring `zwip_serial::dispatcher`'s own test double.
    #[derive(Default, Clone)]
    struct FakeBinding {
        from_module: Arc<StdMutex<VecDeque<Vec<u8>>>>,
    }

    impl SerialBinding for FakeBinding {
        async fn write(&mut self, _bytes: &[u8]) -> zwip_serial::error::Result<()> {
            Ok(())
        }

        async fn read(&mut self) -> Option<Vec<u8>> {
            loop {
                if let Some(chunk) = self.from_module.lock().unwrap().pop_front() {
                    return Some(chunk);
                }
                tokio::task::yield_now().await;
            }
        }
    }

    fn all_supported() -> SupportedBitmask {
        let mut bits = SupportedBitmask::ZERO;
        bits.fill(true);
        bits
    }

    #[tokio::test]
    async fn advance_node_probes_node_info_then_advances_state() {
        let from_module = Arc::new(StdMutex::new(VecDeque::new()));
        let response = CommandFrame::new(
            CommandType::Response,
            FunctionType::GetNodeProtocolInfo as u8,
            vec![0x01],
        )
        .serialize();
        from_module.lock().unwrap().push_back(vec![zwip_serial::prelude::ACK]);
        from_module.lock().unwrap().push_back(response);

        let binding = FakeBinding { from_module };
        let (dispatcher, mut unsolicited) = Dispatcher::new(binding, all_supported(), vec![]);

        let router = router();
        // First call only advances the free `Created` bookkeeping step.
        router
            .advance_node(7, &dispatcher, &mut unsolicited)
            .await
            .unwrap();
        assert_eq!(router.rd.lock().unwrap().get(7).unwrap().state, NodeState::ProbeNodeInfo);

        // Second call performs the real GetNodeProtocolInfo round trip.
        router
            .advance_node(7, &dispatcher, &mut unsolicited)
            .await
            .unwrap();
        assert_eq!(router.rd.lock().unwrap().get(7).unwrap().state, NodeState::ProbeProductId);
    }

    #[tokio::test]
    async fn advance_node_fails_the_node_when_the_report_never_arrives() {
        let from_module = Arc::new(StdMutex::new(VecDeque::new()));
        from_module.lock().unwrap().push_back(vec![zwip_serial::prelude::ACK]);
        // No RESPONSE queued: send_with_response exhausts its budget and errors.

        let binding = FakeBinding { from_module };
        let (dispatcher, mut unsolicited) = Dispatcher::new(binding, all_supported(), vec![]);

        let router = router();
        // First call only advances the free `Created` bookkeeping step.
        router
            .advance_node(7, &dispatcher, &mut unsolicited)
            .await
            .unwrap();

        // Second call attempts the real GetNodeProtocolInfo round trip, which
        // times out since no RESPONSE was queued, and falls the node.
        router
            .advance_node(7, &dispatcher, &mut unsolicited)
            .await
            .unwrap();

        assert_eq!(router.rd.lock().unwrap().get(7).unwrap().state, NodeState::Failing);
        assert_eq!(
            router.netif.lock().unwrap().state_of(7),
            Some(crate::netif::AddressState::Invalid)
        );
    }

    #[test]
    fn failing_a_node_retracts_its_address() {
        let router = router();
        router.fail_node(7).unwrap();
        assert_eq!(
            router.netif.lock().unwrap().state_of(7),
            Some(crate::netif::AddressState::Invalid)
        );
    }

    #[test]
    fn request_stop_is_observed() {
        let router = router();
        assert!(!router.stopping());
        router.request_stop();
        assert!(router.stopping());
    }
}
