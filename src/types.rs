use std::fmt;
use std::sync::{Arc, RwLock, Weak};

/// Endpoint identifier: a 16 byte address and a 32 bit port.
///
/// Layers pass it along untouched so a message can be routed to or from a
/// specific peer. The all-zero identifier means "any endpoint".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EndpointId {
    pub addr: [u8; 16],
    pub port: u32,
}

impl EndpointId {
    pub const ANY: EndpointId = EndpointId {
        addr: [0; 16],
        port: 0,
    };

    /// Endpoint that only carries a port (channel) number
    pub const fn port(port: u32) -> Self {
        Self {
            addr: [0; 16],
            port,
        }
    }

    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }
}

impl From<u32> for EndpointId {
    fn from(port: u32) -> Self {
        Self::port(port)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.addr == [0; 16] {
            write!(f, "#{}", self.port)
        } else {
            for b in self.addr.iter() {
                write!(f, "{:02x}", b)?;
            }
            write!(f, "#{}", self.port)
        }
    }
}

/// Status indication codes passed from a lower layer to its upper layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Connected,    // connection established, layer can be used now
    Disconnected, // interface or connection gone
    TxDone,       // data completely transmitted, next data is acceptable
    TxError,      // unrecoverable transmission error, transmission aborted
    TxTimeout,    // transmission timed out, upper layer may resend
    TxOverrun,    // transmitter overrun
    RxError,      // receive error
    RxTimeout,    // receive timeout
    RxOverrun,    // receiver overrun
}

impl Status {
    pub fn is_tx(&self) -> bool {
        matches!(
            self,
            Status::TxDone | Status::TxError | Status::TxTimeout | Status::TxOverrun
        )
    }
}

/// Configuration trait that must be implemented by all layer configurations
pub trait Config: Send + Sync {
    fn validate(&self) -> crate::error::Result<()>;
}

/// Upward half of the layer contract.
///
/// A lower layer hands inbound data and status changes to its upper layer
/// through this trait. Implementations must not block for long: they are
/// called from link worker threads and from protocol timer threads.
pub trait Upper: Send + Sync {
    fn receive(&self, data: &[u8], id: EndpointId);
    fn indication(&self, status: Status, id: EndpointId);
}

/// Slot holding the upper layer a layer reports to.
///
/// Held weakly: an upper layer owns the layers below it, not the other way
/// round.
#[derive(Default)]
pub struct UpperSlot(RwLock<Option<Weak<dyn Upper>>>);

impl UpperSlot {
    pub fn set(&self, upper: Weak<dyn Upper>) {
        if let Ok(mut slot) = self.0.write() {
            *slot = Some(upper);
        }
    }

    pub fn get(&self) -> Option<Arc<dyn Upper>> {
        self.0
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(Weak::upgrade))
    }
}
