//! Physical layer (link) implementations.
//!
//! A link is the bottom of a stack. It moves raw frames of at most 8 bytes and
//! reports completion of each transmission with a [`Status::TxDone`]
//! indication to the layer attached above it.
//!
//! - [`loopback`]: a pair of cross-connected in-memory links
//! - `mock`: a recording link for tests (`mock` feature)
//!
//! # Examples
//!
//! ```rust,no_run
//! use libcantp::physical::loopback::Loopback;
//! use libcantp::transport::isotp::{IsoTp, IsoTpConfig};
//!
//! // frames sent by `a` reach the layer stacked on `b` and vice versa
//! let (a, b) = Loopback::pair();
//! let near = IsoTp::with_physical(IsoTpConfig::default(), a).unwrap();
//! let far = IsoTp::with_physical(IsoTpConfig::default(), b).unwrap();
//! ```
//!
//! [`Status::TxDone`]: crate::types::Status::TxDone

pub mod loopback;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::sync::Weak;

use crate::error::Result;
use crate::types::{EndpointId, Upper};

/// Downward half of the layer contract, implemented by links and by any layer
/// that can sit on top of a link.
pub trait PhysicalLayer: Send + Sync {
    fn open(&self) -> Result<()>;
    fn close(&self);
    /// Accept or reject one outbound frame. Acceptance is reported
    /// synchronously; completion arrives later as a `TxDone` indication.
    /// Implementations must not call back into `Upper::receive` from inside
    /// `send`.
    fn send(&self, data: &[u8], id: EndpointId) -> Result<()>;
    /// Register the layer that receives inbound frames and indications.
    fn attach(&self, upper: Weak<dyn Upper>);
}
