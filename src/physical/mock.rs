use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::PhysicalLayer;
use crate::error::{Result, StackError};
use crate::types::{EndpointId, Status, Upper, UpperSlot};

/// Mock link for testing.
///
/// Every accepted frame is recorded. Inbound traffic is injected by the test
/// with [`MockPhysical::inject`].
pub struct MockPhysical {
    sent: Mutex<Vec<(Vec<u8>, EndpointId)>>,
    upper: UpperSlot,
    is_open: AtomicBool,
    auto_tx_done: AtomicBool,
    reject_next: AtomicUsize,
}

impl Default for MockPhysical {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            upper: UpperSlot::default(),
            is_open: AtomicBool::new(false),
            auto_tx_done: AtomicBool::new(true),
            reject_next: AtomicUsize::new(0),
        }
    }
}

impl MockPhysical {
    /// Creates a mock link that acknowledges every frame with `TxDone`
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a mock link that never reports send completion
    pub fn new_silent() -> Arc<Self> {
        let mock = Self::default();
        mock.auto_tx_done.store(false, Ordering::SeqCst);
        Arc::new(mock)
    }

    /// Reject the next `count` frames passed to `send`
    pub fn reject_next(&self, count: usize) {
        self.reject_next.store(count, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    /// Frames accepted so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .map(|s| s.iter().map(|(data, _)| data.clone()).collect())
            .unwrap_or_default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Removes and returns the frames accepted so far
    pub fn take_sent(&self) -> Vec<(Vec<u8>, EndpointId)> {
        self.sent
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }

    /// Deliver a frame to the attached upper layer as if it came off the wire
    pub fn inject(&self, data: &[u8], id: EndpointId) {
        if let Some(upper) = self.upper.get() {
            upper.receive(data, id);
        }
    }

    /// Deliver a status indication to the attached upper layer
    pub fn indicate(&self, status: Status, id: EndpointId) {
        if let Some(upper) = self.upper.get() {
            upper.indication(status, id);
        }
    }
}

impl PhysicalLayer for MockPhysical {
    fn open(&self) -> Result<()> {
        self.is_open.store(true, Ordering::SeqCst);
        self.indicate(Status::Connected, EndpointId::ANY);
        Ok(())
    }

    fn close(&self) {
        self.is_open.store(false, Ordering::SeqCst);
    }

    fn send(&self, data: &[u8], id: EndpointId) -> Result<()> {
        if !self.is_open() {
            return Err(StackError::NotInitialized);
        }
        let rejected = self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(StackError::LinkError("mock rejected frame".into()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((data.to_vec(), id));
        }
        if self.auto_tx_done.load(Ordering::SeqCst) {
            self.indicate(Status::TxDone, id);
        }
        Ok(())
    }

    fn attach(&self, upper: Weak<dyn Upper>) {
        self.upper.set(upper);
    }
}
