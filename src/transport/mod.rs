pub mod frame;
pub mod isotp;
pub mod timer;

use std::sync::Weak;

use crate::error::Result;
use crate::types::{EndpointId, Upper};

/// Transport layer trait that must be implemented by ISO-TP.
///
/// Same contract as a link: open/close propagate through the stack, `send`
/// takes a whole message and inbound messages and indications go to the
/// attached upper layer.
pub trait TransportLayer: Send + Sync {
    fn open(&self) -> Result<()>;
    fn close(&self);
    fn send(&self, data: &[u8], id: EndpointId) -> Result<()>;
    fn attach(&self, upper: Weak<dyn Upper>);
}
