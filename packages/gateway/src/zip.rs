//! The Z/IP Bridge (spec §4.H): translates between Z/IP-encapsulated UDP
//! datagrams and the module's `SendData` calls. Grounded in the teacher's
//! `driver/awaited.rs` (a table correlating an async reply back to its
//! origin) for the sequence-number correlation table, and in `frame.rs`'s
//! `nom`/`cookie_factory` idiom for the packet header itself.

use crate::error::{Error, Result};
use cookie_factory as cf;
use nom::number::complete::be_u8;
use std::collections::HashMap;
use std::net::SocketAddrV6;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use zwip_core::error::Error as CoreError;
use zwip_security::prelude::S0Transport;
use zwip_serial::binding::SerialBinding;
use zwip_serial::prelude::{
    await_func_id_callback, CommandFrame, DispatcherHandle, FunctionType, CALLBACK_BUDGET,
};

/// `COMMAND_CLASS_ZIP = 0x23`, `ZIP_PACKET = 0x02` (spec §4.H).
pub const ZIP_COMMAND_CLASS: u8 = 0x23;
pub const ZIP_PACKET: u8 = 0x02;
const SECURE_BIT: u8 = 0x80;
const HEADER_LEN: usize = 7;

/// `SECURITY_MESSAGE_ENCAPSULATION`, the CC:Cmd pair an S0-wrapped payload
/// from the module starts with.
const SECURITY_CC: u8 = 0x98;
const SECURITY_MESSAGE_ENCAPSULATION: u8 = 0x81;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipPacket {
    pub flags0: u8,
    pub secure: bool,
    pub seq_no: u8,
    pub source_endpoint: u8,
    pub dest_endpoint: u8,
    pub payload: Vec<u8>,
}

impl ZipPacket {
    pub fn new(seq_no: u8, source_endpoint: u8, dest_endpoint: u8, secure: bool, payload: Vec<u8>) -> Self {
        Self {
            flags0: 0,
            secure,
            seq_no,
            source_endpoint,
            dest_endpoint,
            payload,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::ZipFraming("Z/IP packet too short".into()));
        }
        let err = |_| Error::ZipFraming("malformed Z/IP header".into());
        let (i, cmd_class) = be_u8::<_, nom::error::Error<&[u8]>>(buf).map_err(err)?;
        let (i, cmd) = be_u8::<_, nom::error::Error<&[u8]>>(i).map_err(err)?;
        if cmd_class != ZIP_COMMAND_CLASS || cmd != ZIP_PACKET {
            return Err(Error::ZipFraming("not a Z/IP_PACKET frame".into()));
        }
        let (i, flags0) = be_u8::<_, nom::error::Error<&[u8]>>(i).map_err(err)?;
        let (i, flags1) = be_u8::<_, nom::error::Error<&[u8]>>(i).map_err(err)?;
        let (i, seq_no) = be_u8::<_, nom::error::Error<&[u8]>>(i).map_err(err)?;
        let (i, source_endpoint) = be_u8::<_, nom::error::Error<&[u8]>>(i).map_err(err)?;
        let (i, dest_endpoint) = be_u8::<_, nom::error::Error<&[u8]>>(i).map_err(err)?;
        Ok(Self {
            flags0,
            secure: flags1 & SECURE_BIT != 0,
            seq_no,
            source_endpoint,
            dest_endpoint,
            payload: i.to_vec(),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let flags1 = if self.secure { SECURE_BIT } else { 0 };
        let write = cf::sequence::tuple((
            cf::bytes::be_u8(ZIP_COMMAND_CLASS),
            cf::bytes::be_u8(ZIP_PACKET),
            cf::bytes::be_u8(self.flags0),
            cf::bytes::be_u8(flags1),
            cf::bytes::be_u8(self.seq_no),
            cf::bytes::be_u8(self.source_endpoint),
            cf::bytes::be_u8(self.dest_endpoint),
            cf::combinator::slice(&self.payload),
        ));
        cf::gen_simple(write, Vec::new()).expect("serialization is infallible")
    }
}

/// Whether a node's security bootstrap included S0 — the bridge consults
/// this to decide whether an inbound secure flag is honorable.
pub trait NodeSecuritySupport: Send + Sync {
    fn supports_s0(&self, nodeid: u16) -> bool;
}

/// Sends a UDP6 datagram, abstracted for the same reason
/// [`zwip_serial::binding::SerialBinding`] abstracts the UART.
pub trait UdpTransport: Send + Sync {
    fn send_to(&self, payload: &[u8], dest: SocketAddrV6) -> impl std::future::Future<Output = Result<()>> + Send;
}

fn strip_s0_if_present(payload: &[u8]) -> Option<&[u8]> {
    (payload.len() >= 2 && payload[0] == SECURITY_CC && payload[1] == SECURITY_MESSAGE_ENCAPSULATION)
        .then_some(&payload[2..])
}

/// Bi-directional Z/IP ↔ `SendData` translator (spec §4.H).
pub struct ZipBridge<B: SerialBinding, U: UdpTransport, N: NodeSecuritySupport> {
    dispatcher: DispatcherHandle<B>,
    /// Shared with the router loop, which ticks its TTL and drives the
    /// Nonce-Get/Report handshake (spec §4.I).
    s0: Arc<Mutex<S0Transport>>,
    udp: U,
    security: N,
    unsolicited_dest: SocketAddrV6,
    our_node: u8,
    next_seq: AtomicU8,
    seq_table: Mutex<HashMap<u8, SocketAddrV6>>,
}

impl<B: SerialBinding, U: UdpTransport, N: NodeSecuritySupport> ZipBridge<B, U, N> {
    pub fn new(
        dispatcher: DispatcherHandle<B>,
        s0: Arc<Mutex<S0Transport>>,
        udp: U,
        security: N,
        unsolicited_dest: SocketAddrV6,
        our_node: u8,
    ) -> Self {
        Self {
            dispatcher,
            s0,
            udp,
            security,
            unsolicited_dest,
            our_node,
            next_seq: AtomicU8::new(0),
            seq_table: Mutex::new(HashMap::new()),
        }
    }

    fn next_seq_no(&self) -> u8 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Outbound (node → IP), spec §4.H steps 1-3: strip S0, wrap in Z/IP,
    /// send to the configured unsolicited destination.
    pub async fn handle_outbound(&self, src_node: u16, src_endpoint: u8, dest_endpoint: u8, raw_cc: &[u8]) -> Result<()> {
        let (secure, plaintext) = match strip_s0_if_present(raw_cc) {
            Some(encrypted) => {
                let mut s0 = self.s0.lock().unwrap();
                let decrypted = s0.decrypt(src_node as u8, self.our_node, SECURITY_MESSAGE_ENCAPSULATION, encrypted)?;
                (true, decrypted)
            }
            None => (false, raw_cc.to_vec()),
        };
        let packet = ZipPacket::new(self.next_seq_no(), src_endpoint, dest_endpoint, secure, plaintext);
        self.udp.send_to(&packet.serialize(), self.unsolicited_dest).await
    }

    /// Inbound (IP → node), spec §4.H steps 1-4. `dst_node` is the node
    /// the destination address already resolved to (spec §4.G); `rn` is a
    /// receiver-nonce the caller obtained via Nonce-Get/Report when the
    /// packet's secure flag is set (the handshake itself is the router
    /// loop's job, spec §4.I: it sits between components C/E/H). The Z/IP
    /// packet's own sequence number doubles as the `SendData` funcID (spec
    /// §4.C/§4.H step 4), so `seq_table` also serves as the funcID → origin
    /// lookup [`ZipBridge::take_origin`] resolves once the module's
    /// asynchronous completion callback comes back through `unsolicited`.
    pub async fn handle_inbound(
        &self,
        from: SocketAddrV6,
        dst_node: u16,
        packet: ZipPacket,
        rn: Option<[u8; 8]>,
        unsolicited: &mut tokio::sync::mpsc::Receiver<CommandFrame>,
    ) -> Result<()> {
        self.seq_table.lock().unwrap().insert(packet.seq_no, from);

        let wire_payload = if packet.secure && self.security.supports_s0(dst_node) {
            let rn = rn.ok_or(CoreError::NonceTimeout)?;
            let mut s0 = self.s0.lock().unwrap();
            let encrypted = s0.encrypt(self.our_node, dst_node as u8, SECURITY_MESSAGE_ENCAPSULATION, rn, &packet.payload);
            [&[SECURITY_CC, SECURITY_MESSAGE_ENCAPSULATION][..], &encrypted].concat()
        } else {
            packet.payload.clone()
        };

        let mut send_data_payload = Vec::with_capacity(wire_payload.len() + 3);
        send_data_payload.push(dst_node as u8);
        send_data_payload.push(wire_payload.len() as u8);
        send_data_payload.extend_from_slice(&wire_payload);

        let queued = self
            .dispatcher
            .send_with_func_id(FunctionType::SendData as u8, send_data_payload, packet.seq_no)
            .await;

        if let Err(e) = queued {
            self.take_origin(packet.seq_no);
            return Err(e.into());
        }

        let completion = await_func_id_callback(
            unsolicited,
            FunctionType::SendData as u8,
            packet.seq_no,
            CALLBACK_BUDGET,
        )
        .await;

        self.take_origin(packet.seq_no);

        match completion {
            Some(frame) if frame.payload.get(1) == Some(&0) => Ok(()),
            Some(_) => Err(CoreError::SerialFramingError("SendData completion reported failure".into()).into()),
            None => Err(CoreError::SerialTimeout.into()),
        }
    }

    /// Looks up (and removes) the UDP peer a given Z/IP sequence number was
    /// originated from, for correlating a late completion status (spec
    /// §4.H step 4).
    pub fn take_origin(&self, seq_no: u8) -> Option<SocketAddrV6> {
        self.seq_table.lock().unwrap().remove(&seq_no)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use zwip_core::prelude::CommandType;
    use zwip_serial::dispatcher::{Dispatcher, SupportedBitmask};

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

    #[derive(Default)]
    struct FakeUdp {
        sent: StdMutex<Vec<(Vec<u8>, SocketAddrV6)>>,
    }

    impl UdpTransport for FakeUdp {
        async fn send_to(&self, payload: &[u8], dest: SocketAddrV6) -> Result<()> {
            self.sent.lock().unwrap().push((payload.to_vec(), dest));
            Ok(())
        }
    }

    struct AllInsecure;
    impl NodeSecuritySupport for AllInsecure {
        fn supports_s0(&self, _nodeid: u16) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn handle_inbound_clears_the_origin_once_the_completion_callback_arrives() {
        let from_module = Arc::new(StdMutex::new(VecDeque::new()));
        // ACK for the transmit, then the async completion REQUEST (arrives
        // while send_with_response is still waiting for its RESPONSE and
        // gets queued as unsolicited), then the immediate "queued OK" RESPONSE.
        let completion =
            CommandFrame::new(CommandType::Request, FunctionType::SendData as u8, vec![9, 0x00]).serialize();
        let queued_ack =
            CommandFrame::new(CommandType::Response, FunctionType::SendData as u8, vec![0x01]).serialize();
        from_module.lock().unwrap().push_back(vec![zwip_serial::prelude::ACK]);
        from_module.lock().unwrap().push_back(completion);
        from_module.lock().unwrap().push_back(queued_ack);

        let binding = FakeBinding { from_module };
        let (dispatcher, mut unsolicited) = Dispatcher::new(binding, all_supported(), vec![]);

        let s0 = Arc::new(Mutex::new(S0Transport::new(&[0u8; 16])));
        let bridge = ZipBridge::new(
            dispatcher,
            s0,
            FakeUdp::default(),
            AllInsecure,
            "[fd00:bbbb::1]:41230".parse().unwrap(),
            1,
        );

        let from: SocketAddrV6 = "[fd00:bbbb::2]:4123".parse().unwrap();
        let packet = ZipPacket::new(9, 0, 0, false, vec![0x20, 0x01]);

        bridge
            .handle_inbound(from, 7, packet, None, &mut unsolicited)
            .await
            .unwrap();

        assert_eq!(bridge.take_origin(9), None);
    }

    #[test]
    fn packet_roundtrips_through_serialize_and_parse() {
        let packet = ZipPacket::new(5, 0, 2, true, vec![0x20, 0x01, 0xff]);
        let bytes = packet.serialize();
        let parsed = ZipPacket::parse(&bytes).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn secure_flag_round_trips_through_flags1() {
        let insecure = ZipPacket::new(1, 0, 0, false, vec![]);
        let parsed = ZipPacket::parse(&insecure.serialize()).unwrap();
        assert!(!parsed.secure);
    }

    #[test]
    fn strip_s0_detects_the_security_encapsulation_header() {
        let wrapped = [SECURITY_CC, SECURITY_MESSAGE_ENCAPSULATION, 0xaa, 0xbb];
        assert_eq!(strip_s0_if_present(&wrapped), Some(&[0xaa, 0xbb][..]));
        assert_eq!(strip_s0_if_present(&[0x20, 0x01]), None);
    }
}
