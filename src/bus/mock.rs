//! Mock serial port and bridge simulator for testing
//!
//! [`MockSerialPort`] stands in for the RS485 adapter. Incoming data arrives
//! in bursts separated by line silence, so the transport's frame-gap logic
//! sees the same timing it sees on real hardware. Replies can be scripted
//! per request or produced by a responder that sees every flushed request.
//!
//! [`SimulatedBridge`] is such a responder: a register bank per slave
//! address that answers reads and writes the way the RF bridge does, with
//! knobs for silent slaves, rejected registers and corrupted replies.

use crate::constants::*;
use crate::device::BindingStatus;
use crate::protocol::{decode, encode, BindMode, ExceptionCode, ProtocolMessage};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

/// Silence before each reply burst; longer than the default frame gap.
pub const DEFAULT_BURST_GAP: Duration = Duration::from_millis(50);

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Burst {
    delay: Duration,
    data: Vec<u8>,
}

#[derive(Default)]
struct Shared {
    tx: Vec<u8>,
    tx_frames: Vec<Vec<u8>>,
    flushed_at: usize,
    rx: VecDeque<Burst>,
    script: VecDeque<Vec<Vec<u8>>>,
    responder: Option<Responder>,
    next_error: Option<io::Error>,
    read_waker: Option<Waker>,
}

/// Mock serial port that simulates bidirectional communication.
pub struct MockSerialPort {
    shared: Arc<Mutex<Shared>>,
    burst_gap: Duration,
    pending: Option<Pin<Box<Sleep>>>,
}

impl Default for MockSerialPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockSerialPort {
    /// Clones share buffers; each clone keeps its own read timer.
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            burst_gap: self.burst_gap,
            pending: None,
        }
    }
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            burst_gap: DEFAULT_BURST_GAP,
            pending: None,
        }
    }

    pub fn with_burst_gap(mut self, gap: Duration) -> Self {
        self.burst_gap = gap;
        self
    }

    /// Makes `data` available to read right away.
    pub fn queue_rx_data(&self, data: &[u8]) {
        self.push_burst(Duration::ZERO, data.to_vec());
    }

    /// Queues the bursts to answer the next flushed request with.
    ///
    /// An empty list means no answer. Scripted replies take precedence
    /// over the responder.
    pub fn queue_reply(&self, bursts: Vec<Vec<u8>>) {
        lock(&self.shared).script.push_back(bursts);
    }

    /// Installs a function that answers every flushed request.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        lock(&self.shared).responder = Some(Box::new(responder));
    }

    /// Fails the next read or write.
    pub fn set_next_error(&self, error: io::Error) {
        lock(&self.shared).next_error = Some(error);
    }

    /// Every byte written so far.
    pub fn get_tx_data(&self) -> Vec<u8> {
        lock(&self.shared).tx.clone()
    }

    /// Written bytes split at each flush.
    pub fn tx_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.shared).tx_frames.clone()
    }

    fn push_burst(&self, delay: Duration, data: Vec<u8>) {
        let mut shared = lock(&self.shared);
        shared.rx.push_back(Burst { delay, data });
        if let Some(waker) = shared.read_waker.take() {
            waker.wake();
        }
    }
}

#[async_trait::async_trait]
impl crate::bus::serial::SerialPort for MockSerialPort {
    async fn clear_input(&mut self) -> io::Result<()> {
        lock(&self.shared).rx.clear();
        self.pending = None;
        Ok(())
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Some(error) = lock(&this.shared).next_error.take() {
            return Poll::Ready(Err(error));
        }

        loop {
            if let Some(sleep) = this.pending.as_mut() {
                if sleep.as_mut().poll(cx).is_pending() {
                    return Poll::Pending;
                }
                this.pending = None;
                if let Some(front) = lock(&this.shared).rx.front_mut() {
                    front.delay = Duration::ZERO;
                }
            }

            let mut shared = lock(&this.shared);
            let Some(front) = shared.rx.front_mut() else {
                shared.read_waker = Some(cx.waker().clone());
                return Poll::Pending;
            };

            if !front.delay.is_zero() {
                this.pending = Some(Box::pin(tokio::time::sleep(front.delay)));
                continue;
            }

            let n = front.data.len().min(buf.remaining());
            buf.put_slice(&front.data[..n]);
            front.data.drain(..n);
            if front.data.is_empty() {
                shared.rx.pop_front();
            }
            return Poll::Ready(Ok(()));
        }
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut shared = lock(&self.shared);
        if let Some(error) = shared.next_error.take() {
            return Poll::Ready(Err(error));
        }
        shared.tx.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let bursts = {
            let mut shared = lock(&self.shared);
            if shared.flushed_at == shared.tx.len() {
                return Poll::Ready(Ok(()));
            }
            let request = shared.tx[shared.flushed_at..].to_vec();
            shared.flushed_at = shared.tx.len();
            shared.tx_frames.push(request.clone());

            match shared.script.pop_front() {
                Some(bursts) => bursts,
                None => match shared.responder.as_mut() {
                    Some(responder) => responder(&request),
                    None => Vec::new(),
                },
            }
        };

        for data in bursts {
            self.push_burst(self.burst_gap, data);
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ----------------------------------------------------------------------------
// Bridge simulator
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Slave {
    registers: HashMap<u16, u16>,
    rejected: HashMap<u16, ExceptionCode>,
    silent: bool,
    /// Writes to the key register are copied to the value register.
    mirrors: HashMap<u16, u16>,
}

#[derive(Debug)]
struct PendingBind {
    node: u8,
    product_id: u32,
    polls_left: u32,
    outcome: BindingStatus,
}

#[derive(Debug, Default)]
struct BridgeState {
    bridge_address: u8,
    slaves: HashMap<u8, Slave>,
    requests: Vec<ProtocolMessage>,
    corrupt_replies: u32,
    noisy_replies: u32,
    bind_outcome: Option<(BindingStatus, u32)>,
    pending_bind: Option<PendingBind>,
}

/// Register-level simulation of the RF bridge and its bound nodes.
#[derive(Clone)]
pub struct SimulatedBridge {
    state: Arc<Mutex<BridgeState>>,
}

impl SimulatedBridge {
    /// A BRDG-02R13 at `bridge_address` with RF address `rf_address`.
    pub fn new(bridge_address: u8, rf_address: u32) -> Self {
        let bridge = Self {
            state: Arc::new(Mutex::new(BridgeState {
                bridge_address,
                ..BridgeState::default()
            })),
        };
        bridge.add_node(bridge_address, PRODUCT_ID_BRDG_02R13, rf_address);
        bridge.set_register(bridge_address, REG_BINDING_STATUS, BindingStatus::Idle.raw());
        for register in [
            REG_SOFTWARE_VERSION,
            REG_RF_LOAD_CURRENT_HOUR,
            REG_RF_LOAD_LAST_HOUR,
            REG_MESSAGES_SENT_CURRENT_HOUR,
            REG_MESSAGES_SENT_LAST_HOUR,
        ] {
            bridge.set_register(bridge_address, register, 0);
        }
        bridge.set_u32(bridge_address, REG_UPTIME, 0);
        bridge
    }

    /// Adds a node answering the node information registers.
    pub fn add_node(&self, address: u8, product_id: u32, rf_address: u32) {
        let mut state = lock(&self.state);
        let slave = state.slaves.entry(address).or_default();
        write_u32(slave, REG_PRODUCT_ID, product_id);
        write_u32(slave, REG_RF_ADDRESS, rf_address);
        slave.registers.insert(REG_SOFTWARE_VERSION, 0x0100);
        slave.registers.insert(REG_FAULT_STATUS, 0);
        slave.registers.insert(REG_RF_COMM_STATUS, 0);
        slave.registers.insert(REG_BATTERY_LOW, 0);
    }

    pub fn set_register(&self, address: u8, register: u16, value: u16) {
        lock(&self.state)
            .slaves
            .entry(address)
            .or_default()
            .registers
            .insert(register, value);
    }

    pub fn set_u32(&self, address: u8, register: u16, value: u32) {
        let mut state = lock(&self.state);
        write_u32(state.slaves.entry(address).or_default(), register, value);
    }

    pub fn register(&self, address: u8, register: u16) -> Option<u16> {
        lock(&self.state)
            .slaves
            .get(&address)
            .and_then(|s| s.registers.get(&register).copied())
    }

    /// Makes a slave stop answering (or answer again).
    pub fn set_silent(&self, address: u8, silent: bool) {
        lock(&self.state).slaves.entry(address).or_default().silent = silent;
    }

    /// Answers any access to `register` with an exception.
    pub fn reject_register(&self, address: u8, register: u16, code: ExceptionCode) {
        lock(&self.state)
            .slaves
            .entry(address)
            .or_default()
            .rejected
            .insert(register, code);
    }

    /// Copies writes to `from` into `to`, as a unit applies a preset.
    pub fn mirror(&self, address: u8, from: u16, to: u16) {
        lock(&self.state)
            .slaves
            .entry(address)
            .or_default()
            .mirrors
            .insert(from, to);
    }

    /// Flips a byte in the next `count` replies.
    pub fn corrupt_replies(&self, count: u32) {
        lock(&self.state).corrupt_replies = count;
    }

    /// Precedes the next `count` replies with a burst of line noise.
    pub fn noisy_replies(&self, count: u32) {
        lock(&self.state).noisy_replies = count;
    }

    /// Result of the next bind: final status and the bound node's product id.
    ///
    /// The binding status reads as in progress twice before settling.
    pub fn set_bind_outcome(&self, outcome: BindingStatus, product_id: u32) {
        lock(&self.state).bind_outcome = Some((outcome, product_id));
    }

    pub fn has_node(&self, address: u8) -> bool {
        lock(&self.state).slaves.contains_key(&address)
    }

    /// Every decoded request received so far.
    pub fn requests(&self) -> Vec<ProtocolMessage> {
        lock(&self.state).requests.clone()
    }

    /// Requests received for `address`.
    pub fn requests_to(&self, address: u8) -> Vec<ProtocolMessage> {
        self.requests()
            .into_iter()
            .filter(|m| m.address() == address)
            .collect()
    }

    /// A mock port wired to this simulator.
    pub fn port(&self) -> MockSerialPort {
        let port = MockSerialPort::new();
        let bridge = self.clone();
        port.set_responder(move |request| bridge.respond(request));
        port
    }

    fn respond(&self, raw: &[u8]) -> Vec<Vec<u8>> {
        // Slaves ignore frames they cannot decode.
        let Ok(request) = decode(raw) else {
            return Vec::new();
        };

        let mut state = lock(&self.state);
        state.requests.push(request.clone());

        let Some(reply) = state.answer(&request) else {
            return Vec::new();
        };
        let Ok(bytes) = encode(&reply) else {
            return Vec::new();
        };
        let mut bytes = bytes.to_vec();

        if state.corrupt_replies > 0 {
            state.corrupt_replies -= 1;
            let middle = bytes.len() / 2;
            bytes[middle] ^= 0x5A;
        }

        let mut bursts = Vec::with_capacity(2);
        if state.noisy_replies > 0 {
            state.noisy_replies -= 1;
            bursts.push(vec![0x00, 0xFF, 0x13]);
        }
        bursts.push(bytes);
        bursts
    }
}

impl BridgeState {
    fn answer(&mut self, request: &ProtocolMessage) -> Option<ProtocolMessage> {
        let address = request.address();
        if self.slaves.get(&address).map_or(true, |s| s.silent) {
            return None;
        }

        match request {
            ProtocolMessage::ReadRequest {
                register, count, ..
            } => {
                if address == self.bridge_address && *register == REG_BINDING_STATUS {
                    self.advance_bind();
                }
                let slave = self.slaves.get(&address)?;
                let mut registers = Vec::with_capacity(usize::from(*count));
                for r in *register..register.saturating_add(*count) {
                    if let Some(code) = slave.rejected.get(&r) {
                        return Some(exception(request, *code));
                    }
                    match slave.registers.get(&r) {
                        Some(v) => registers.push(*v),
                        None => {
                            return Some(exception(request, ExceptionCode::IllegalDataAddress))
                        }
                    }
                }
                Some(ProtocolMessage::ReadResponse { address, registers })
            }
            ProtocolMessage::WriteRequest {
                register, values, ..
            } => {
                let slave = self.slaves.get(&address)?;
                let range = *register..register.saturating_add(values.len() as u16);
                if let Some(code) = range.clone().find_map(|r| slave.rejected.get(&r)) {
                    return Some(exception(request, *code));
                }

                if address == self.bridge_address && *register == REG_UNBIND_COMMAND {
                    let node = values.first().copied().unwrap_or(0) as u8;
                    if node != self.bridge_address {
                        self.slaves.remove(&node);
                    }
                }

                let slave = self.slaves.get_mut(&address)?;
                for (r, value) in range.zip(values) {
                    slave.registers.insert(r, *value);
                    if let Some(target) = slave.mirrors.get(&r).copied() {
                        slave.registers.insert(target, *value);
                    }
                }
                Some(ProtocolMessage::WriteAck {
                    address,
                    register: *register,
                    count: values.len() as u16,
                })
            }
            ProtocolMessage::BindRequest {
                mode,
                node,
                product_id,
                ..
            } => {
                if address != self.bridge_address {
                    return Some(exception(request, ExceptionCode::IllegalFunction));
                }
                if let BindMode::Accessory { controller } = mode {
                    if !self.slaves.contains_key(controller) {
                        return Some(exception(request, ExceptionCode::IllegalDataValue));
                    }
                }
                if self.slaves.contains_key(node) {
                    return Some(exception(request, ExceptionCode::IllegalDataValue));
                }
                let (outcome, bound_product) = self.bind_outcome.take().unwrap_or((
                    match mode {
                        BindMode::Controller => BindingStatus::OutgoingCompleted,
                        BindMode::Accessory { .. } => BindingStatus::IncomingCompleted,
                    },
                    *product_id,
                ));
                self.pending_bind = Some(PendingBind {
                    node: *node,
                    product_id: bound_product,
                    polls_left: 2,
                    outcome,
                });
                self.set_binding_status(match outcome {
                    BindingStatus::IncomingCompleted | BindingStatus::IncomingFailed => {
                        BindingStatus::IncomingInProgress
                    }
                    _ => BindingStatus::OutgoingInProgress,
                });
                Some(request.clone())
            }
            ProtocolMessage::ReadResponse { .. }
            | ProtocolMessage::WriteAck { .. }
            | ProtocolMessage::Error { .. } => None,
        }
    }

    fn advance_bind(&mut self) {
        let Some(pending) = self.pending_bind.as_mut() else {
            return;
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return;
        }

        let Some(pending) = self.pending_bind.take() else {
            return;
        };
        self.set_binding_status(pending.outcome);
        // A failed bind still leaves a half-bound node behind.
        let mut slave = Slave::default();
        write_u32(&mut slave, REG_PRODUCT_ID, pending.product_id);
        write_u32(&mut slave, REG_RF_ADDRESS, 0x00A0_0000 | u32::from(pending.node));
        slave.registers.insert(REG_SOFTWARE_VERSION, 0x0100);
        self.slaves.insert(pending.node, slave);
    }

    fn set_binding_status(&mut self, status: BindingStatus) {
        let bridge = self.bridge_address;
        self.slaves
            .entry(bridge)
            .or_default()
            .registers
            .insert(REG_BINDING_STATUS, status.raw());
    }
}

fn write_u32(slave: &mut Slave, register: u16, value: u32) {
    slave.registers.insert(register, (value >> 16) as u16);
    slave.registers.insert(register + 1, (value & 0xFFFF) as u16);
}

fn exception(request: &ProtocolMessage, code: ExceptionCode) -> ProtocolMessage {
    ProtocolMessage::Error {
        address: request.address(),
        function: request.function_code(),
        code,
    }
}
