//! Application layer: devices sitting at the top of a stack.
//!
//! A device owns the transport below it, opens and closes the whole stack
//! and exchanges complete messages with the application.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use libcantp::application::generic::GenericDevice;
//! use libcantp::physical::loopback::Loopback;
//! use libcantp::transport::isotp::{IsoTp, IsoTpConfig};
//! use libcantp::types::EndpointId;
//!
//! let (link, _peer) = Loopback::pair();
//! let isotp = IsoTp::with_physical(IsoTpConfig::new(50, 3, 4095), link).unwrap();
//! let device = GenericDevice::new(Arc::new(isotp));
//! device.open(EndpointId::ANY).unwrap();
//!
//! device.write(&[0x22, 0xF1, 0x90], EndpointId::port(0x7E0)).unwrap();
//! let (response, id) = device.read(Duration::from_secs(1)).unwrap();
//! ```

pub mod generic;

use std::time::Duration;

use crate::error::Result;
use crate::types::EndpointId;

pub use generic::GenericDevice;

/// Application layer trait implemented by devices
pub trait ApplicationLayer {
    fn open(&self, filter: EndpointId) -> Result<()>;
    fn close(&self);
    fn write(&self, data: &[u8], id: EndpointId) -> Result<()>;
    fn read(&self, timeout: Duration) -> Result<(Vec<u8>, EndpointId)>;
}
