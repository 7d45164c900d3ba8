//! ISO 15765-2 transport protocol.
//!
//! Messages up to 4095 bytes are segmented into 8 byte link frames on send
//! and reassembled on receive. Both state machines, the three protocol
//! timers and the negotiated flow control parameters live in one [`State`]
//! behind a mutex. Inbound frames (link context) and timer expiries (timer
//! thread) are both handled under that lock. Upward deliveries are collected
//! while the lock is held and dispatched after it is released.
//!
//! Consecutive Frames are sent by a transmit worker. The timer thread only
//! queues the session generation when STmin expires, and the worker waits
//! (bounded by N_As) for the link to complete the previous frame.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use crossbeam_channel::{select, unbounded, Receiver, Sender};

use super::frame::{
    st_min_to_duration, Addressing, Decoded, FlowStatus, FrameCodec, FrameKind, Pdu,
    MAX_DATA_LENGTH,
};
use super::timer::{Event, TimerKind, Timers};
use super::TransportLayer;
use crate::error::{Result, StackError};
use crate::physical::PhysicalLayer;
use crate::types::{Config, EndpointId, Status, Upper, UpperSlot};

/// ISO-TP Timing Parameters (in milliseconds)
#[derive(Debug, Clone)]
pub struct IsoTpTiming {
    pub n_as: u32, // Sender N_As timeout, link send completion
    pub n_bs: u32, // Sender N_Bs timeout, flow control reception
    pub n_cr: u32, // Receiver N_Cr timeout, consecutive frame reception
}

impl Default for IsoTpTiming {
    fn default() -> Self {
        Self {
            n_as: 1000, // Default 1 second
            n_bs: 1000,
            n_cr: 1000,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IsoTpOptions: u32 {
        const NONE = 0;
        const ZERO_PADDING = 1;        // pad every frame to 8 bytes
        const SEND_OVERFLOW_FC = 2;    // answer an oversize First Frame with FC(Overflow)
        const ABORT_ON_LINK_ERROR = 4; // abort instead of retrying a rejected Consecutive Frame
    }
}

/// ISO-TP configuration
#[derive(Debug, Clone)]
pub struct IsoTpConfig {
    /// STmin sent to the peer in our Flow Control frames
    pub st_min: u8,
    /// Block size sent to the peer, 0 = unlimited
    pub block_size: u8,
    /// Largest message accepted for sending and receiving
    pub max_data_length: u16,
    /// Receive buffer ceiling
    pub rx_buffer_size: u16,
    pub addressing: Addressing,
    pub options: IsoTpOptions,
    pub timing: IsoTpTiming,
}

impl IsoTpConfig {
    pub fn new(st_min: u8, block_size: u8, max_data_length: u16) -> Self {
        Self {
            st_min,
            block_size,
            max_data_length,
            ..Default::default()
        }
    }
}

impl Default for IsoTpConfig {
    fn default() -> Self {
        Self {
            st_min: 0,
            block_size: 0,
            max_data_length: MAX_DATA_LENGTH as u16,
            rx_buffer_size: MAX_DATA_LENGTH as u16,
            addressing: Addressing::normal(),
            options: IsoTpOptions::NONE,
            timing: IsoTpTiming::default(),
        }
    }
}

impl Config for IsoTpConfig {
    fn validate(&self) -> Result<()> {
        if self.max_data_length as usize > MAX_DATA_LENGTH {
            return Err(StackError::InvalidParameter("max_data_length above 4095"));
        }
        if self.rx_buffer_size == 0 || self.rx_buffer_size as usize > MAX_DATA_LENGTH {
            return Err(StackError::InvalidParameter("rx_buffer_size must be 1..=4095"));
        }
        if self.timing.n_as == 0 || self.timing.n_bs == 0 || self.timing.n_cr == 0 {
            return Err(StackError::InvalidParameter("timeouts must be non-zero"));
        }
        Ok(())
    }
}

fn millis(ms: u32) -> Duration {
    Duration::from_millis(ms as u64)
}

/// Outstanding segmented transmission
#[derive(Debug)]
struct TxSession {
    message: Vec<u8>,
    bytes_sent: usize,
    sn: u8,
    block_counter: u8,
    id: EndpointId,
    generation: u64,
}

/// Flow control parameters learned from the receiver
#[derive(Debug, Clone, Copy)]
struct PeerParams {
    block_size: u8,
    st_min: u8,
}

/// Outstanding reassembly
#[derive(Debug)]
struct RxSession {
    buffer: Vec<u8>,
    expected_len: usize,
    sn: u8,
    block_counter: u8,
    id: EndpointId,
}

impl RxSession {
    fn new(expected_len: usize, first: &[u8], id: EndpointId) -> Self {
        let mut buffer = Vec::with_capacity(expected_len);
        buffer.extend_from_slice(&first[..first.len().min(expected_len)]);
        Self {
            buffer,
            expected_len,
            sn: 1,
            block_counter: 0,
            id,
        }
    }

    /// Appends `chunk`, padding included. Returns `false` without appending
    /// anything if that would exceed `ceiling`.
    fn append(&mut self, chunk: &[u8], ceiling: usize) -> bool {
        if self.buffer.len() + chunk.len() > ceiling {
            return false;
        }
        self.buffer.extend_from_slice(chunk);
        true
    }

    fn is_complete(&self) -> bool {
        self.buffer.len() >= self.expected_len
    }

    /// The reassembled message without trailing padding
    fn into_message(mut self) -> Vec<u8> {
        self.buffer.truncate(self.expected_len);
        self.buffer
    }
}

enum Upcall {
    Receive(Vec<u8>, EndpointId),
    Indication(Status, EndpointId),
}

struct State {
    is_open: bool,
    shutdown: bool,
    codec: FrameCodec,
    tx: Option<TxSession>,
    peer: Option<PeerParams>,
    rx: Option<RxSession>,
    timers: Timers,
    generation: u64,
}

impl State {
    fn abort_tx(&mut self) -> Option<TxSession> {
        self.timers.stop(TimerKind::TxWaitForFlowControl);
        self.timers.stop(TimerKind::TxNextConsecutive);
        self.peer = None;
        self.tx.take()
    }

    fn reset(&mut self) {
        self.timers.stop_all();
        self.tx = None;
        self.peer = None;
        self.rx = None;
    }
}

struct Shared<P: PhysicalLayer> {
    config: IsoTpConfig,
    lower: Arc<P>,
    upper: UpperSlot,
    state: Mutex<State>,
    wake: Condvar,
    tx_done: Event,
    /// Consecutive Frame jobs for the transmit worker, by session generation
    jobs: Sender<u64>,
    /// Link indications held back while the state is locked
    deferred: Mutex<Option<Vec<(Status, EndpointId)>>>,
}

impl<P: PhysicalLayer> Shared<P> {
    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StackError::IsoTpError("protocol state poisoned".into()))
    }

    fn dispatch(&self, upcalls: Vec<Upcall>) {
        if upcalls.is_empty() {
            return;
        }
        let Some(upper) = self.upper.get() else {
            return;
        };
        for upcall in upcalls {
            match upcall {
                Upcall::Receive(data, id) => upper.receive(&data, id),
                Upcall::Indication(status, id) => upper.indication(status, id),
            }
        }
    }

    /// Releases the state lock, wakes the timer thread so it sees re-armed
    /// timers, then delivers the link indications held back by
    /// [`Shared::send_lower`] followed by `upcalls`.
    fn finish(&self, guard: MutexGuard<'_, State>, upcalls: Vec<Upcall>) {
        let deferred = self
            .deferred
            .lock()
            .ok()
            .and_then(|mut deferred| deferred.take())
            .unwrap_or_default();
        drop(guard);
        self.wake.notify_all();

        let mut all: Vec<Upcall> = deferred
            .into_iter()
            .map(|(status, id)| Upcall::Indication(status, id))
            .collect();
        all.extend(upcalls);
        self.dispatch(all);
    }

    /// Forwards a frame to the link with the state locked. Indications the
    /// link raises meanwhile are held back until [`Shared::finish`], so every
    /// caller must end in `finish`.
    fn send_lower(&self, frame: &[u8], id: EndpointId) -> Result<()> {
        if let Ok(mut deferred) = self.deferred.lock() {
            deferred.get_or_insert_with(Vec::new);
        }
        self.lower.send(frame, id)
    }

    fn send_flow_control(&self, state: &State, status: FlowStatus, id: EndpointId) {
        let frame = state
            .codec
            .encode_flow_control(status, self.config.block_size, self.config.st_min);
        tracing::trace!(?status, %id, "FC  -> {:02x?}", frame);
        if let Err(err) = self.send_lower(&frame, id) {
            tracing::warn!("flow control not sent: {}", err);
        }
    }

    // Reassembly

    fn on_frame(&self, data: &[u8], id: EndpointId) {
        let Ok(mut guard) = self.lock() else {
            return;
        };
        if !guard.is_open {
            tracing::trace!("layer closed, frame discarded");
            return;
        }
        let state = &mut *guard;
        let mut upcalls = Vec::new();
        let codec = state.codec;

        match codec.decode(data) {
            Ok(Decoded::Dropped) => {
                tracing::trace!(%id, "address mismatch, frame discarded");
            }
            Ok(Decoded::Frame(Pdu::SingleFrame { data })) => {
                tracing::trace!(%id, len = data.len(), "SF <-");
                upcalls.push(Upcall::Receive(data.to_vec(), id));
            }
            Ok(Decoded::Frame(Pdu::FirstFrame { len, data })) => {
                self.on_first_frame(state, len as usize, data, id, &mut upcalls);
            }
            Ok(Decoded::Frame(Pdu::ConsecutiveFrame { sn, data })) => {
                self.on_consecutive_frame(state, sn, data, id, &mut upcalls);
            }
            Ok(Decoded::Frame(Pdu::FlowControl {
                status,
                block_size,
                st_min,
            })) => {
                self.on_flow_control(state, status, block_size, st_min, id, &mut upcalls);
            }
            Err(err) => {
                match codec.frame_kind(data) {
                    Some(FrameKind::First) => {
                        tracing::warn!(%id, "first frame rejected: {}", err);
                        state.timers.stop(TimerKind::RxWaitForNextConsecutive);
                        state.rx = None;
                    }
                    Some(FrameKind::FlowControl) => {
                        tracing::warn!(%id, "flow control rejected, transmission aborted: {}", err);
                        state.abort_tx();
                    }
                    _ => tracing::warn!(%id, "frame rejected: {}", err),
                }
                upcalls.push(Upcall::Indication(Status::RxError, id));
            }
        }

        self.finish(guard, upcalls);
    }

    fn on_first_frame(
        &self,
        state: &mut State,
        len: usize,
        data: &[u8],
        id: EndpointId,
        upcalls: &mut Vec<Upcall>,
    ) {
        if len > self.config.max_data_length as usize || len > self.config.rx_buffer_size as usize
        {
            tracing::warn!(%id, len, "first frame announces too much data, discarded");
            state.timers.stop(TimerKind::RxWaitForNextConsecutive);
            state.rx = None;
            if self.config.options.contains(IsoTpOptions::SEND_OVERFLOW_FC) {
                self.send_flow_control(state, FlowStatus::Overflow, id);
            }
            upcalls.push(Upcall::Indication(Status::RxError, id));
            return;
        }

        if state.rx.is_some() {
            tracing::debug!(%id, "first frame restarts an unfinished reception");
        }
        tracing::trace!(%id, len, "FF <-");
        state.rx = Some(RxSession::new(len, data, id));
        self.send_flow_control(state, FlowStatus::ContinueToSend, id);
        state
            .timers
            .start(TimerKind::RxWaitForNextConsecutive, millis(self.config.timing.n_cr));
    }

    fn on_consecutive_frame(
        &self,
        state: &mut State,
        sn: u8,
        data: &[u8],
        id: EndpointId,
        upcalls: &mut Vec<Upcall>,
    ) {
        state.timers.stop(TimerKind::RxWaitForNextConsecutive);

        let Some(rx) = state.rx.as_mut() else {
            tracing::debug!(%id, sn, "consecutive frame without first frame");
            upcalls.push(Upcall::Indication(Status::RxError, id));
            return;
        };

        if sn != rx.sn {
            tracing::warn!(%id, expected = rx.sn, got = sn, "wrong sequence number, reception aborted");
            state.rx = None;
            upcalls.push(Upcall::Indication(Status::RxError, id));
            return;
        }
        rx.sn = (rx.sn + 1) & 0x0F;

        if !rx.append(data, self.config.rx_buffer_size as usize) {
            // frame is accepted but its data is lost, the session can only time out now
            tracing::warn!(%id, "receive buffer overrun");
            upcalls.push(Upcall::Indication(Status::RxOverrun, id));
        }
        tracing::trace!(%id, sn, "CF <- {}/{}", rx.buffer.len(), rx.expected_len);

        if rx.is_complete() {
            if let Some(rx) = state.rx.take() {
                let id = rx.id;
                let message = rx.into_message();
                tracing::debug!(%id, len = message.len(), "message received");
                upcalls.push(Upcall::Receive(message, id));
            }
            return;
        }

        let block_size = self.config.block_size;
        if block_size != 0 && rx.block_counter + 1 >= block_size {
            rx.block_counter = 0;
            self.send_flow_control(state, FlowStatus::ContinueToSend, id);
        } else {
            rx.block_counter = rx.block_counter.saturating_add(1);
        }

        state
            .timers
            .start(TimerKind::RxWaitForNextConsecutive, millis(self.config.timing.n_cr));
    }

    // Segmentation

    fn on_flow_control(
        &self,
        state: &mut State,
        status: FlowStatus,
        block_size: u8,
        st_min: u8,
        id: EndpointId,
        upcalls: &mut Vec<Upcall>,
    ) {
        state.timers.stop(TimerKind::TxWaitForFlowControl);

        let Some(tx) = state.tx.as_mut() else {
            tracing::debug!(%id, ?status, "flow control without transmission, ignored");
            return;
        };

        if status == FlowStatus::Overflow {
            tracing::warn!(%id, "receiver reported overflow, transmission aborted");
            state.abort_tx();
            upcalls.push(Upcall::Indication(Status::RxError, id));
            return;
        }

        tx.block_counter = 0;
        state.peer = Some(PeerParams { block_size, st_min });

        tracing::trace!(%id, ?status, block_size, st_min, "FC <-");
        if status == FlowStatus::ContinueToSend {
            state
                .timers
                .start(TimerKind::TxNextConsecutive, st_min_to_duration(st_min));
        } else {
            // Wait: the receiver must follow up within N_Bs
            state
                .timers
                .start(TimerKind::TxWaitForFlowControl, millis(self.config.timing.n_bs));
        }
    }

    fn send(&self, data: &[u8], id: EndpointId) -> Result<()> {
        let max = self.config.max_data_length as usize;
        if data.len() > max {
            tracing::error!(len = data.len(), max, "message too big");
            return Err(StackError::TooLarge {
                len: data.len(),
                max,
            });
        }

        let mut guard = self.lock()?;
        let state = &mut *guard;
        if !state.is_open {
            return Err(StackError::NotInitialized);
        }
        if state.tx.is_some() {
            tracing::error!(%id, "transmission already in progress");
            return Err(StackError::TransmissionInProgress);
        }

        if data.len() <= state.codec.addressing.sf_capacity() {
            let frame = state.codec.encode_single_frame(data)?;
            tracing::trace!(%id, "SF  -> {:02x?}", frame);
            let result = self.send_lower(&frame, id);
            self.finish(guard, Vec::new());
            return result;
        }

        let frame = state.codec.encode_first_frame(data)?;
        state.generation += 1;
        state.tx = Some(TxSession {
            message: data.to_vec(),
            bytes_sent: state.codec.addressing.ff_capacity(),
            sn: 1,
            block_counter: 0,
            id,
            generation: state.generation,
        });
        state.peer = None;
        self.tx_done.reset();

        tracing::trace!(%id, len = data.len(), "FF  -> {:02x?}", frame);
        let result = self.send_lower(&frame, id);
        match &result {
            Ok(()) => state
                .timers
                .start(TimerKind::TxWaitForFlowControl, millis(self.config.timing.n_bs)),
            Err(err) => {
                tracing::warn!(%id, "first frame not sent: {}", err);
                state.tx = None;
            }
        }
        self.finish(guard, Vec::new());
        result
    }

    /// Sends the next Consecutive Frame of the session identified by
    /// `generation`. `completed` tells whether the link completed the
    /// previous frame within N_As.
    fn send_next_consecutive(&self, generation: u64, completed: bool) {
        let Ok(mut guard) = self.lock() else {
            return;
        };
        let state = &mut *guard;
        let mut upcalls = Vec::new();

        let Some(tx) = state.tx.as_mut().filter(|tx| tx.generation == generation) else {
            // session ended while waiting for the link, the completion belongs to the next one
            if completed {
                self.tx_done.set();
            }
            return;
        };

        if !completed {
            let id = tx.id;
            tracing::error!(%id, "frame tx aborted, link did not complete the previous frame");
            state.abort_tx();
            upcalls.push(Upcall::Indication(Status::TxTimeout, id));
            return self.finish(guard, upcalls);
        }

        let codec = state.codec;
        let (peer_block_size, peer_st_min) = state
            .peer
            .map(|p| (p.block_size, p.st_min))
            .unwrap_or((0, 0));

        let end = (tx.bytes_sent + codec.addressing.cf_capacity()).min(tx.message.len());
        let frame = match codec.encode_consecutive_frame(tx.sn, &tx.message[tx.bytes_sent..end]) {
            Ok(frame) => frame,
            Err(err) => {
                let id = tx.id;
                tracing::error!(%id, "consecutive frame not encodable: {}", err);
                state.abort_tx();
                upcalls.push(Upcall::Indication(Status::TxError, id));
                return self.finish(guard, upcalls);
            }
        };

        tracing::trace!(id = %tx.id, sn = tx.sn, "CF  -> {:02x?}", frame);
        match self.send_lower(&frame, tx.id) {
            Ok(()) => {
                tx.sn = (tx.sn + 1) & 0x0F;
                tx.bytes_sent = end;

                if tx.bytes_sent >= tx.message.len() {
                    tracing::debug!(id = %tx.id, len = tx.message.len(), "message sent");
                    state.abort_tx();
                } else if peer_block_size != 0 && tx.block_counter + 1 >= peer_block_size {
                    // block complete, wait for the next flow control
                    tx.block_counter = 0;
                    state
                        .timers
                        .start(TimerKind::TxWaitForFlowControl, millis(self.config.timing.n_bs));
                } else {
                    tx.block_counter = tx.block_counter.saturating_add(1);
                    state
                        .timers
                        .start(TimerKind::TxNextConsecutive, st_min_to_duration(peer_st_min));
                }
            }
            Err(err) => {
                let id = tx.id;
                if self.config.options.contains(IsoTpOptions::ABORT_ON_LINK_ERROR) {
                    tracing::error!(%id, "consecutive frame rejected, transmission aborted: {}", err);
                    state.abort_tx();
                    upcalls.push(Upcall::Indication(Status::TxError, id));
                } else {
                    tracing::debug!(%id, "consecutive frame rejected, retrying: {}", err);
                    // nothing in flight
                    self.tx_done.set();
                    state
                        .timers
                        .start(TimerKind::TxNextConsecutive, st_min_to_duration(peer_st_min));
                }
            }
        }

        self.finish(guard, upcalls);
    }

    // Timers

    fn on_timeout(&self, state: &mut State, kind: TimerKind, upcalls: &mut Vec<Upcall>) {
        match kind {
            TimerKind::TxWaitForFlowControl => {
                if let Some(tx) = state.abort_tx() {
                    tracing::warn!(id = %tx.id, "no flow control from receiver, transmission aborted");
                    upcalls.push(Upcall::Indication(Status::RxTimeout, tx.id));
                }
            }
            TimerKind::RxWaitForNextConsecutive => {
                if let Some(rx) = state.rx.take() {
                    tracing::warn!(id = %rx.id, "consecutive frame timeout, reception aborted");
                    upcalls.push(Upcall::Indication(Status::RxTimeout, rx.id));
                }
            }
            TimerKind::TxNextConsecutive => {}
        }
    }

    fn run_timers(&self) {
        let Ok(mut guard) = self.state.lock() else {
            return;
        };
        loop {
            if guard.shutdown {
                return;
            }
            let now = Instant::now();
            let expired = guard.timers.take_expired(now);
            match expired {
                Some(TimerKind::TxNextConsecutive) => {
                    if let Some(tx) = guard.tx.as_ref() {
                        let _ = self.jobs.send(tx.generation);
                    }
                    continue;
                }
                Some(kind) => {
                    let mut upcalls = Vec::new();
                    self.on_timeout(&mut guard, kind, &mut upcalls);
                    drop(guard);
                    self.dispatch(upcalls);
                }
                None => {
                    let waited = match guard.timers.next_deadline() {
                        Some(deadline) => self
                            .wake
                            .wait_timeout(guard, deadline.saturating_duration_since(now))
                            .ok()
                            .map(|(guard, _)| guard),
                        None => self.wake.wait(guard).ok(),
                    };
                    match waited {
                        Some(g) => {
                            guard = g;
                            continue;
                        }
                        None => return,
                    }
                }
            }
            guard = match self.state.lock() {
                Ok(g) => g,
                Err(_) => return,
            };
        }
    }

    fn run_tx_worker(&self, jobs: Receiver<u64>, stop: Receiver<()>) {
        let link_done = self.tx_done.receiver().clone();
        let n_as = millis(self.config.timing.n_as);
        loop {
            let generation = select! {
                recv(jobs) -> job => match job {
                    Ok(generation) => generation,
                    Err(_) => return,
                },
                recv(stop) -> _ => return,
            };
            let completed = select! {
                recv(link_done) -> done => done.is_ok(),
                recv(stop) -> _ => return,
                default(n_as) => false,
            };
            self.send_next_consecutive(generation, completed);
        }
    }
}

impl<P: PhysicalLayer> Upper for Shared<P> {
    fn receive(&self, data: &[u8], id: EndpointId) {
        self.on_frame(data, id);
    }

    fn indication(&self, status: Status, id: EndpointId) {
        if status == Status::TxDone {
            // link is ready for the next segment
            self.tx_done.set();
        }
        if let Ok(mut deferred) = self.deferred.lock() {
            if let Some(held) = deferred.as_mut() {
                held.push((status, id));
                return;
            }
        }
        if let Some(upper) = self.upper.get() {
            upper.indication(status, id);
        }
    }
}

/// ISO-TP implementation
pub struct IsoTp<P: PhysicalLayer + 'static> {
    shared: Arc<Shared<P>>,
    timer_thread: Option<JoinHandle<()>>,
    tx_thread: Option<JoinHandle<()>>,
    stop_tx: Option<Sender<()>>,
}

impl<P: PhysicalLayer + 'static> IsoTp<P> {
    /// Creates a new ISO-TP instance on top of the given physical layer
    pub fn with_physical(config: IsoTpConfig, physical: Arc<P>) -> Result<Self> {
        config.validate()?;

        let codec = FrameCodec::new(
            config.addressing,
            config.options.contains(IsoTpOptions::ZERO_PADDING),
        );
        let (jobs, jobs_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();
        let shared = Arc::new(Shared {
            config,
            lower: physical,
            upper: UpperSlot::default(),
            state: Mutex::new(State {
                is_open: false,
                shutdown: false,
                codec,
                tx: None,
                peer: None,
                rx: None,
                timers: Timers::default(),
                generation: 0,
            }),
            wake: Condvar::new(),
            tx_done: Event::default(),
            jobs,
            deferred: Mutex::new(None),
        });
        let weak: Weak<Shared<P>> = Arc::downgrade(&shared);
        shared.lower.attach(weak);

        let worker = shared.clone();
        let timer_thread = std::thread::Builder::new()
            .name("isotp-timer".into())
            .spawn(move || worker.run_timers())
            .map_err(|e| StackError::IsoTpError(format!("timer thread: {}", e)))?;

        let worker = shared.clone();
        let tx_thread = std::thread::Builder::new()
            .name("isotp-tx".into())
            .spawn(move || worker.run_tx_worker(jobs_rx, stop_rx))
            .map_err(|e| StackError::IsoTpError(format!("transmit thread: {}", e)))?;

        Ok(Self {
            shared,
            timer_thread: Some(timer_thread),
            tx_thread: Some(tx_thread),
            stop_tx: Some(stop_tx),
        })
    }

    pub fn config(&self) -> &IsoTpConfig {
        &self.shared.config
    }

    pub fn physical(&self) -> &Arc<P> {
        &self.shared.lower
    }

    /// Extended addressing setup
    ///
    /// `source` is checked against the first byte of every received frame,
    /// `target` is prepended to every transmitted frame.
    pub fn set_extended_addressing(&self, extended: bool, source: u8, target: u8) -> Result<()> {
        let mut state = self.shared.lock()?;
        state.codec.addressing = Addressing {
            extended,
            source,
            target,
        };
        Ok(())
    }

    /// Pad every frame shorter than 8 bytes with zeros
    pub fn set_zero_padding(&self, enabled: bool) -> Result<()> {
        let mut state = self.shared.lock()?;
        state.codec.zero_padding = enabled;
        Ok(())
    }

    pub fn is_transmitting(&self) -> bool {
        self.shared.lock().map(|s| s.tx.is_some()).unwrap_or(false)
    }

    pub fn is_receiving(&self) -> bool {
        self.shared.lock().map(|s| s.rx.is_some()).unwrap_or(false)
    }
}

impl<P: PhysicalLayer + 'static> TransportLayer for IsoTp<P> {
    fn open(&self) -> Result<()> {
        if self.shared.upper.get().is_none() {
            return Err(StackError::NotInitialized);
        }

        // opening is done bottom-up, the lower layer first
        let result = self.shared.lower.open();

        let mut state = self.shared.lock()?;
        state.reset();
        state.is_open = result.is_ok();
        drop(state);
        self.shared.tx_done.reset();
        result
    }

    fn close(&self) {
        // closing is done top-down, this layer first
        if let Ok(mut state) = self.shared.lock() {
            state.reset();
            state.is_open = false;
        }
        self.shared.wake.notify_all();
        self.shared.lower.close();
    }

    fn send(&self, data: &[u8], id: EndpointId) -> Result<()> {
        self.shared.send(data, id)
    }

    fn attach(&self, upper: Weak<dyn Upper>) {
        self.shared.upper.set(upper);
    }
}

impl<P: PhysicalLayer + 'static> Drop for IsoTp<P> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.shutdown = true;
            state.reset();
        }
        self.shared.wake.notify_all();
        self.stop_tx.take();
        for thread in [self.timer_thread.take(), self.tx_thread.take()]
            .into_iter()
            .flatten()
        {
            let _ = thread.join();
        }
    }
}
