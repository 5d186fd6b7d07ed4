//! The SHMP Dispatcher (spec §4.C): request/response correlation, in-flight
//! collision handling, retry policy, and the capability-bitmap gate.
//!
//! Grounded in the teacher's actor/handle split (`driver/serial_api/actor.rs`,
//! `driver/serial_api/handle.rs`): a single owner holds the TX-lock and the
//! byte stream, callers go through a cheaply-clonable handle. Here the
//! "actor" collapses to an `async fn` guarded by a `tokio::sync::Mutex`
//! rather than a message-passing task (see `DESIGN.md`): since spec
//! invariant 5 already requires at most one in-flight request at a time,
//! the mutex *is* the TX-lock, and `send`/`send_with_response` are the
//! teacher's redesigned "per-call completion handle" (spec §9) expressed
//! directly as `async fn` return values instead of oneshot channels.

use crate::binding::SerialBinding;
use crate::consts::*;
use crate::error::{Error, Result};
use crate::frame::{CommandFrame, ParseOutcome, SerialFrame};
use crate::ring::RxRing;
use bitvec::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use zwip_core::prelude::{CommandType, NodeIdType};
use zwip_logging::{Channel, ImmutableLogger, LogEntry, LogPayload, Loglevel, NullLogger};

/// The 29-byte `supported_bitmask` from `GetCapabilities` (spec §8 scenario 1).
pub type SupportedBitmask = BitArray<[u8; 29], Msb0>;

struct Inner<B> {
    binding: B,
    ring: RxRing,
}

/// Budget for [`await_func_id_callback`] (spec §4.C: completion callbacks
/// are not bounded by [`RX_BYTE_TIMEOUT`], a caller like `SendData` may
/// take seconds to report transmission status).
pub const CALLBACK_BUDGET: Duration = Duration::from_secs(5);

impl<B: SerialBinding> Inner<B> {
    async fn fill_ring(&mut self) -> bool {
        match self.binding.read().await {
            Some(bytes) => {
                self.ring.put_buf(&bytes);
                true
            }
            None => false,
        }
    }

    fn try_take_unit(&mut self) -> Option<SerialFrame> {
        loop {
            let peek = self.ring.peek_all();
            match crate::frame::parse_one(&peek) {
                (ParseOutcome::Frame(frame), n) => {
                    self.ring.get_buf(n);
                    return Some(frame);
                }
                (ParseOutcome::Garbage, n) => {
                    self.ring.get_buf(n);
                    continue;
                }
                (ParseOutcome::Incomplete, _) => return None,
            }
        }
    }

    /// Pulls the next unit off the wire, reading more bytes as needed.
    /// Returns `None` only on binding disconnect (EOF).
    async fn next_unit(&mut self) -> Option<SerialFrame> {
        loop {
            if let Some(frame) = self.try_take_unit() {
                return Some(frame);
            }
            if !self.fill_ring().await {
                return None;
            }
        }
    }
}

enum AckOutcome {
    Ack,
    NakOrCan,
    Timeout,
}

/// Owns the serial link and enforces spec invariant 5 ("at most one
/// request in flight at a time") via its internal mutex.
pub struct Dispatcher<B: SerialBinding> {
    inner: Mutex<Inner<B>>,
    supported: SupportedBitmask,
    setup_supported: Vec<SerialApiSetupCommand>,
    lr_enabled: AtomicBool,
    unsolicited_tx: mpsc::Sender<CommandFrame>,
    dropped_unsolicited: AtomicU64,
    next_func_id: std::sync::atomic::AtomicU8,
    logger: Arc<dyn ImmutableLogger>,
}

/// A cheaply-clonable reference to a running [`Dispatcher`], analogous to
/// the teacher's `SerialApi` handle.
pub type DispatcherHandle<B> = Arc<Dispatcher<B>>;

impl<B: SerialBinding> Dispatcher<B> {
    pub fn new(
        binding: B,
        supported: SupportedBitmask,
        setup_supported: Vec<SerialApiSetupCommand>,
    ) -> (Arc<Self>, mpsc::Receiver<CommandFrame>) {
        Self::with_logger(binding, supported, setup_supported, Arc::new(NullLogger))
    }

    pub fn with_logger(
        binding: B,
        supported: SupportedBitmask,
        setup_supported: Vec<SerialApiSetupCommand>,
        logger: Arc<dyn ImmutableLogger>,
    ) -> (Arc<Self>, mpsc::Receiver<CommandFrame>) {
        let (unsolicited_tx, unsolicited_rx) = mpsc::channel(MAX_RXQUEUE_LEN);
        let dispatcher = Arc::new(Self {
            inner: Mutex::new(Inner {
                binding,
                ring: RxRing::default(),
            }),
            supported,
            setup_supported,
            lr_enabled: AtomicBool::new(false),
            unsolicited_tx,
            dropped_unsolicited: AtomicU64::new(0),
            next_func_id: std::sync::atomic::AtomicU8::new(1),
            logger,
        });
        (dispatcher, unsolicited_rx)
    }

    pub fn lr_enabled(&self) -> bool {
        self.lr_enabled.load(Ordering::SeqCst)
    }

    pub fn set_lr_enabled(&self, enabled: bool) {
        self.lr_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn node_id_type(&self) -> NodeIdType {
        if self.lr_enabled() {
            NodeIdType::NodeId16Bit
        } else {
            NodeIdType::NodeId8Bit
        }
    }

    pub fn supports(&self, function_type: FunctionType) -> bool {
        self.supported
            .get(function_type.capability_bit())
            .map(|b| *b)
            .unwrap_or(false)
    }

    pub fn supports_setup_command(&self, cmd: SerialApiSetupCommand) -> bool {
        self.setup_supported.contains(&cmd)
    }

    pub fn dropped_unsolicited_count(&self) -> u64 {
        self.dropped_unsolicited.load(Ordering::Relaxed)
    }

    /// Allocates the next funcID for a call expecting an asynchronous
    /// completion callback (spec §4.C: "the caller stamps...the module
    /// echoes...the dispatcher uses to correlate"). `0` is never issued,
    /// leaving it free for callers to use as a "no callback registered"
    /// sentinel.
    pub fn alloc_func_id(&self) -> u8 {
        let id = self.next_func_id.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            self.next_func_id.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }

    fn ensure_supported(&self, function_type: u8) -> Result<()> {
        match FunctionType::try_from(function_type) {
            Ok(ft) if self.supports(ft) => Ok(()),
            _ => Err(Error::Unsupported(function_type)),
        }
    }

    fn log(&self, level: Loglevel, payload: impl Into<LogPayload>) {
        self.logger.log(LogEntry {
            channel: Channel::Serial,
            level,
            payload: payload.into(),
        });
    }

    /// Hands an unsolicited (module-initiated) REQUEST to the bounded RX
    /// queue. Extras beyond `MAX_RXQUEUE_LEN` are dropped, per spec §7
    /// `QueueOverflow` / §9's recommendation to count the drops.
    fn enqueue_unsolicited(&self, frame: CommandFrame) {
        if self.unsolicited_tx.try_send(frame).is_err() {
            let total = self.dropped_unsolicited.fetch_add(1, Ordering::Relaxed) + 1;
            self.log(
                Loglevel::Warn,
                format!("RX queue full, dropped frame (total dropped: {total})"),
            );
        }
    }

    /// Waits for the ACK/NAK/CAN that follows a just-transmitted frame,
    /// queueing any REQUEST that arrives meanwhile instead of losing it
    /// (spec §4.C "in-flight collision", tested by spec §8 scenario 3).
    async fn await_ack(&self, guard: &mut Inner<B>) -> AckOutcome {
        let deadline = Instant::now() + ACK_WAIT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return AckOutcome::Timeout;
            }
            match zwip_pal::timeout(remaining, guard.next_unit()).await {
                Some(Some(SerialFrame::Ack)) => return AckOutcome::Ack,
                Some(Some(SerialFrame::Nak)) | Some(Some(SerialFrame::Can)) => {
                    return AckOutcome::NakOrCan
                }
                Some(Some(SerialFrame::Data(frame))) if frame.command_type == CommandType::Request => {
                    self.enqueue_unsolicited(frame);
                    continue;
                }
                Some(Some(SerialFrame::Data(_))) => continue,
                Some(None) | None => return AckOutcome::Timeout,
            }
        }
    }

    /// Transmits `frame`, retrying the ACK handshake up to
    /// [`MAX_SEND_RETRIES`] times (spec §8 "retry cap").
    async fn transmit_with_ack(&self, guard: &mut Inner<B>, frame: &CommandFrame) -> Result<()> {
        let mut attempt = 0u8;
        loop {
            attempt += 1;
            self.log(Loglevel::Debug, format!("-> {}", hex::encode(frame.serialize())));
            guard.binding.write(&frame.serialize()).await?;
            match self.await_ack(guard).await {
                AckOutcome::Ack => return Ok(()),
                AckOutcome::NakOrCan | AckOutcome::Timeout => {
                    if attempt >= MAX_SEND_RETRIES {
                        return Err(Error::Timeout);
                    }
                    if attempt % RETRY_BACKOFF_EVERY == 0 {
                        zwip_pal::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }
    }

    /// `send(cmd, params)` (spec §4.C): fire-and-forget REQUEST, waits
    /// only for the ACK.
    pub async fn send(&self, function_type: u8, payload: Vec<u8>) -> Result<()> {
        self.ensure_supported(function_type)?;
        let frame = CommandFrame::new(CommandType::Request, function_type, payload);
        let mut guard = self.inner.lock().await;
        self.transmit_with_ack(&mut guard, &frame).await
    }

    /// `send_with_response(cmd, params)` (spec §4.C): REQUEST followed by
    /// the matching RESPONSE, budgeted at [`RESPONSE_BUDGET_CYCLES`] read
    /// cycles; intervening REQUESTs are queued, not lost.
    pub async fn send_with_response(
        &self,
        function_type: u8,
        payload: Vec<u8>,
    ) -> Result<CommandFrame> {
        self.ensure_supported(function_type)?;
        let frame = CommandFrame::new(CommandType::Request, function_type, payload);
        let mut guard = self.inner.lock().await;
        self.transmit_with_ack(&mut guard, &frame).await?;

        for _ in 0..RESPONSE_BUDGET_CYCLES {
            match zwip_pal::timeout(RX_BYTE_TIMEOUT, guard.next_unit()).await {
                Some(Some(SerialFrame::Data(response)))
                    if response.command_type == CommandType::Response
                        && response.function_type == function_type =>
                {
                    return Ok(response);
                }
                Some(Some(SerialFrame::Data(other))) if other.command_type == CommandType::Request => {
                    self.enqueue_unsolicited(other);
                }
                _ => {}
            }
        }
        Err(Error::Timeout)
    }

    /// `send_with_response`, but with `func_id` stamped as the last
    /// payload byte before transmission — the wire convention `SendData`
    /// and friends use to let the module echo it back in a later
    /// completion `REQUEST` (spec §4.C). Pair with
    /// [`await_func_id_callback`] to pick that callback up.
    pub async fn send_with_func_id(
        &self,
        function_type: u8,
        mut payload: Vec<u8>,
        func_id: u8,
    ) -> Result<CommandFrame> {
        payload.push(func_id);
        self.send_with_response(function_type, payload).await
    }
}

/// Waits for the asynchronous completion `REQUEST` a prior
/// [`Dispatcher::send_with_func_id`] call promised: a `REQUEST` of the same
/// `function_type` whose payload's first byte echoes `func_id`. Frames that
/// don't match are dropped — the same collision policy
/// `zwip_gateway::router::request_nonce` uses while awaiting its own
/// callback off this same queue.
pub async fn await_func_id_callback(
    unsolicited: &mut mpsc::Receiver<CommandFrame>,
    function_type: u8,
    func_id: u8,
    budget: Duration,
) -> Option<CommandFrame> {
    let deadline = Instant::now() + budget;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let frame = match zwip_pal::timeout(remaining, unsolicited.recv()).await {
            Some(Some(frame)) => frame,
            _ => return None,
        };
        if frame.command_type == CommandType::Request
            && frame.function_type == function_type
            && frame.payload.first() == Some(&func_id)
        {
            return Some(frame);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// An in-memory binding the tests drive directly: `to_module` is what
    /// the dispatcher writes, `from_module` is queued bytes the dispatcher
    /// reads, one chunk per `read()` call.
    #[derive(Default)]
    struct FakeBinding {
        to_module: Arc<StdMutex<Vec<u8>>>,
        from_module: Arc<StdMutex<VecDeque<Vec<u8>>>>,
    }

    impl SerialBinding for FakeBinding {
        async fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.to_module.lock().unwrap().extend_from_slice(bytes);
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
    async fn send_with_response_resolves_on_matching_response() {
        let to_module = Arc::new(StdMutex::new(Vec::new()));
        let from_module = Arc::new(StdMutex::new(VecDeque::new()));

        // Queue: ACK, then the matching RESPONSE frame.
        let response = CommandFrame::new(CommandType::Response, 0x07, vec![1, 2, 3]).serialize();
        from_module.lock().unwrap().push_back(vec![ACK]);
        from_module.lock().unwrap().push_back(response);

        let binding = FakeBinding {
            to_module: to_module.clone(),
            from_module,
        };
        let (dispatcher, _rx) = Dispatcher::new(binding, all_supported(), vec![]);

        let result = dispatcher.send_with_response(0x07, vec![]).await.unwrap();
        assert_eq!(result.function_type, 0x07);
        assert_eq!(result.payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unsupported_command_never_touches_the_wire() {
        let to_module = Arc::new(StdMutex::new(Vec::new()));
        let binding = FakeBinding {
            to_module: to_module.clone(),
            from_module: Arc::new(StdMutex::new(VecDeque::new())),
        };
        let (dispatcher, _rx) = Dispatcher::new(binding, SupportedBitmask::ZERO, vec![]);

        let result = dispatcher.send(0x13, vec![]).await;
        assert!(matches!(result, Err(Error::Unsupported(0x13))));
        assert!(to_module.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_flight_request_is_queued_not_lost() {
        let from_module = Arc::new(StdMutex::new(VecDeque::new()));
        // An unsolicited REQUEST arrives before the ACK.
        let unsolicited =
            CommandFrame::new(CommandType::Request, 0x04, vec![0x25, 0x03, 0xff]).serialize();
        from_module.lock().unwrap().push_back(unsolicited);
        from_module.lock().unwrap().push_back(vec![ACK]);

        let binding = FakeBinding {
            to_module: Arc::new(StdMutex::new(Vec::new())),
            from_module,
        };
        let (dispatcher, mut rx) = Dispatcher::new(binding, all_supported(), vec![]);

        dispatcher.send(0x13, vec![]).await.unwrap();

        let queued = rx.try_recv().expect("the unsolicited frame should be queued");
        assert_eq!(queued.function_type, 0x04);
    }

    #[tokio::test]
    async fn alloc_func_id_never_issues_zero() {
        let binding = FakeBinding::default();
        let (dispatcher, _rx) = Dispatcher::new(binding, all_supported(), vec![]);
        for _ in 0..300 {
            assert_ne!(dispatcher.alloc_func_id(), 0);
        }
    }

    #[tokio::test]
    async fn await_func_id_callback_ignores_non_matching_frames_first() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(CommandFrame::new(CommandType::Request, 0x13, vec![0x01, 0x00]))
            .await
            .unwrap();
        tx.send(CommandFrame::new(CommandType::Request, 0x13, vec![0x07, 0x00]))
            .await
            .unwrap();

        let frame = await_func_id_callback(&mut rx, 0x13, 0x07, Duration::from_millis(500))
            .await
            .expect("matching callback should be found");
        assert_eq!(frame.payload[0], 0x07);
    }

    #[tokio::test]
    async fn await_func_id_callback_times_out_when_nothing_matches() {
        let (_tx, mut rx) = mpsc::channel(4);
        let result = await_func_id_callback(&mut rx, 0x13, 0x01, Duration::from_millis(20)).await;
        assert!(result.is_none());
    }
}
