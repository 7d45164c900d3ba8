use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::{select, unbounded, Receiver, Sender};

use super::PhysicalLayer;
use crate::error::{Result, StackError};
use crate::types::{EndpointId, Status, Upper, UpperSlot};

struct Packet {
    data: Vec<u8>,
    id: EndpointId,
}

#[derive(Default)]
struct Port {
    upper: UpperSlot,
    is_open: AtomicBool,
}

/// One end of an in-memory link.
///
/// Frames sent on one end are delivered to the upper layer of the other end
/// by a worker thread, in order. Every accepted send is acknowledged with an
/// immediate `TxDone` indication on the sending end.
pub struct Loopback {
    name: &'static str,
    port: Arc<Port>,
    peer_tx: Sender<Packet>,
    stop_tx: Option<Sender<()>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Loopback {
    /// Creates two cross-connected links
    pub fn pair() -> (Arc<Loopback>, Arc<Loopback>) {
        let (a_to_b, b_from_a) = unbounded();
        let (b_to_a, a_from_b) = unbounded();
        let a = Self::new("L1", a_to_b, a_from_b);
        let b = Self::new("L2", b_to_a, b_from_a);
        (Arc::new(a), Arc::new(b))
    }

    fn new(name: &'static str, peer_tx: Sender<Packet>, inbound: Receiver<Packet>) -> Self {
        let port = Arc::new(Port::default());
        let (stop_tx, stop_rx) = unbounded::<()>();

        let worker_port = port.clone();
        let worker = std::thread::Builder::new()
            .name(format!("loopback-{}", name))
            .spawn(move || loop {
                let packet = select! {
                    recv(inbound) -> packet => packet.ok(),
                    recv(stop_rx) -> _ => None,
                };
                let Some(packet) = packet else {
                    break;
                };
                if !worker_port.is_open.load(Ordering::SeqCst) {
                    tracing::trace!(link = name, "closed, dropping frame");
                    continue;
                }
                if let Some(upper) = worker_port.upper.get() {
                    upper.receive(&packet.data, packet.id);
                }
            })
            .ok();

        Self {
            name,
            port,
            peer_tx,
            stop_tx: Some(stop_tx),
            worker: Mutex::new(worker),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_open(&self) -> bool {
        self.port.is_open.load(Ordering::SeqCst)
    }
}

impl PhysicalLayer for Loopback {
    fn open(&self) -> Result<()> {
        if self.port.upper.get().is_none() {
            return Err(StackError::LinkError(format!(
                "{}: no upper layer attached",
                self.name
            )));
        }
        if self.worker.lock().map(|w| w.is_none()).unwrap_or(true) {
            return Err(StackError::LinkError(format!(
                "{}: worker thread not running",
                self.name
            )));
        }
        self.port.is_open.store(true, Ordering::SeqCst);
        if let Some(upper) = self.port.upper.get() {
            upper.indication(Status::Connected, EndpointId::ANY);
        }
        Ok(())
    }

    fn close(&self) {
        self.port.is_open.store(false, Ordering::SeqCst);
    }

    fn send(&self, data: &[u8], id: EndpointId) -> Result<()> {
        if !self.is_open() {
            return Err(StackError::NotInitialized);
        }
        self.peer_tx
            .send(Packet {
                data: data.to_vec(),
                id,
            })
            .map_err(|_| StackError::LinkError(format!("{}: counterpart gone", self.name)))?;

        if let Some(upper) = self.port.upper.get() {
            upper.indication(Status::TxDone, id);
        }
        Ok(())
    }

    fn attach(&self, upper: Weak<dyn Upper>) {
        self.port.upper.set(upper);
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        self.port.is_open.store(false, Ordering::SeqCst);
        self.stop_tx.take();
        if let Some(worker) = self.worker.get_mut().ok().and_then(Option::take) {
            // the last reference may be released by a delivery on the worker itself
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
