use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::ApplicationLayer;
use crate::error::{Result, StackError};
use crate::transport::TransportLayer;
use crate::types::{EndpointId, Status, Upper};

/// Called with every message delivered to the device
pub type ReceiveCallback = Box<dyn Fn(&[u8], EndpointId) + Send + Sync>;

/// Receiving half of the device, attached to the transport
struct Inbox {
    is_open: AtomicBool,
    connected: Mutex<bool>,
    connected_cv: Condvar,
    filter: RwLock<EndpointId>,
    messages: (Sender<(Vec<u8>, EndpointId)>, Receiver<(Vec<u8>, EndpointId)>),
    indications: (Sender<(Status, EndpointId)>, Receiver<(Status, EndpointId)>),
    last_status: Mutex<Option<Status>>,
    callback: RwLock<Option<ReceiveCallback>>,
}

impl Inbox {
    fn new() -> Self {
        Self {
            is_open: AtomicBool::new(false),
            connected: Mutex::new(false),
            connected_cv: Condvar::new(),
            filter: RwLock::new(EndpointId::ANY),
            messages: unbounded(),
            indications: unbounded(),
            last_status: Mutex::new(None),
            callback: RwLock::new(None),
        }
    }

    fn accepts(&self, id: EndpointId) -> bool {
        let filter = self.filter.read().map(|f| *f).unwrap_or(EndpointId::ANY);
        filter.is_any() || id.is_any() || id == filter
    }

    fn set_connected(&self, connected: bool) {
        if let Ok(mut flag) = self.connected.lock() {
            *flag = connected;
        }
        self.connected_cv.notify_all();
    }
}

impl Upper for Inbox {
    fn receive(&self, data: &[u8], id: EndpointId) {
        if !self.is_open.load(Ordering::SeqCst) {
            return;
        }
        if !self.accepts(id) {
            tracing::trace!(%id, "message for another endpoint, ignored");
            return;
        }
        if let Ok(callback) = self.callback.read() {
            if let Some(callback) = callback.as_ref() {
                callback(data, id);
            }
        }
        let _ = self.messages.0.send((data.to_vec(), id));
    }

    fn indication(&self, status: Status, id: EndpointId) {
        if !self.accepts(id) {
            return;
        }
        if let Ok(mut last) = self.last_status.lock() {
            *last = Some(status);
        }
        match status {
            Status::Connected => self.set_connected(true),
            Status::Disconnected => {
                self.set_connected(false);
                let _ = self.indications.0.send((status, id));
            }
            Status::TxDone => {}
            _ => {
                tracing::debug!(%id, ?status, "indication");
                let _ = self.indications.0.send((status, id));
            }
        }
    }
}

/// Generic device at the top of a stack.
///
/// Writes whole messages through the transport below and queues every
/// received message until it is picked up with [`GenericDevice::read`].
pub struct GenericDevice<T: TransportLayer> {
    transport: Arc<T>,
    inbox: Arc<Inbox>,
}

impl<T: TransportLayer> GenericDevice<T> {
    pub fn new(transport: Arc<T>) -> Self {
        let inbox = Arc::new(Inbox::new());
        let weak: Weak<Inbox> = Arc::downgrade(&inbox);
        transport.attach(weak);
        Self { transport, inbox }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Opens the whole stack. Messages from endpoints other than `filter`
    /// are ignored unless `filter` is [`EndpointId::ANY`].
    pub fn open(&self, filter: EndpointId) -> Result<()> {
        if self.is_open() {
            tracing::warn!("device already open");
            return Err(StackError::DeviceError("device already open".into()));
        }
        if let Ok(mut f) = self.inbox.filter.write() {
            *f = filter;
        }
        // the inbox must accept the Connected indication raised while opening
        self.inbox.is_open.store(true, Ordering::SeqCst);
        if let Err(err) = self.transport.open() {
            self.inbox.is_open.store(false, Ordering::SeqCst);
            return Err(err);
        }
        Ok(())
    }

    pub fn close(&self) {
        self.inbox.is_open.store(false, Ordering::SeqCst);
        self.inbox.set_connected(false);
        self.transport.close();
    }

    pub fn is_open(&self) -> bool {
        self.inbox.is_open.load(Ordering::SeqCst)
    }

    /// Whether the link below reported `Connected`, waiting up to `timeout`
    pub fn is_connected(&self, timeout: Duration) -> bool {
        let Ok(connected) = self.inbox.connected.lock() else {
            return false;
        };
        self.inbox
            .connected_cv
            .wait_timeout_while(connected, timeout, |c| !*c)
            .map(|(c, _)| *c)
            .unwrap_or(false)
    }

    /// Hands a message to the transport. Errors detected later are reported
    /// as indications, see [`GenericDevice::next_indication`].
    pub fn write(&self, data: &[u8], id: EndpointId) -> Result<()> {
        if !self.is_open() {
            tracing::error!("device is not opened, sending not possible");
            return Err(StackError::NotInitialized);
        }
        if !self.is_connected(Duration::ZERO) {
            tracing::error!("device is not connected, sending not possible");
            return Err(StackError::DeviceError("not connected".into()));
        }
        self.transport.send(data, id)
    }

    /// Next received message, waiting up to `timeout`
    pub fn read(&self, timeout: Duration) -> Result<(Vec<u8>, EndpointId)> {
        match self.inbox.messages.1.recv_timeout(timeout) {
            Ok(message) => Ok(message),
            Err(RecvTimeoutError::Timeout) => Err(StackError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(StackError::NotInitialized),
        }
    }

    /// Next error or disconnect indication, waiting up to `timeout`
    pub fn next_indication(&self, timeout: Duration) -> Option<(Status, EndpointId)> {
        self.inbox.indications.1.recv_timeout(timeout).ok()
    }

    /// Most recent indication of any kind
    pub fn last_status(&self) -> Option<Status> {
        self.inbox.last_status.lock().ok().and_then(|s| *s)
    }

    pub fn set_receive_callback(&self, callback: ReceiveCallback) {
        if let Ok(mut slot) = self.inbox.callback.write() {
            *slot = Some(callback);
        }
    }
}

impl<T: TransportLayer> ApplicationLayer for GenericDevice<T> {
    fn open(&self, filter: EndpointId) -> Result<()> {
        GenericDevice::open(self, filter)
    }

    fn close(&self) {
        GenericDevice::close(self)
    }

    fn write(&self, data: &[u8], id: EndpointId) -> Result<()> {
        GenericDevice::write(self, data, id)
    }

    fn read(&self, timeout: Duration) -> Result<(Vec<u8>, EndpointId)> {
        GenericDevice::read(self, timeout)
    }
}

impl<T: TransportLayer> Drop for GenericDevice<T> {
    fn drop(&mut self) {
        if self.is_open() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::mock::MockPhysical;
    use crate::transport::isotp::{IsoTp, IsoTpConfig};
    use std::sync::atomic::AtomicUsize;

    fn device() -> (GenericDevice<IsoTp<MockPhysical>>, Arc<MockPhysical>) {
        let mock = MockPhysical::new();
        let isotp = IsoTp::with_physical(IsoTpConfig::default(), mock.clone()).unwrap();
        (GenericDevice::new(Arc::new(isotp)), mock)
    }

    #[test]
    fn test_device_open_twice() {
        let (dev, _mock) = device();
        dev.open(EndpointId::ANY).unwrap();
        assert!(dev.is_connected(Duration::from_millis(100)));
        assert!(matches!(
            dev.open(EndpointId::ANY),
            Err(StackError::DeviceError(_))
        ));
    }

    #[test]
    fn test_device_write_requires_open() {
        let (dev, mock) = device();
        assert!(matches!(
            dev.write(&[1, 2], EndpointId::ANY),
            Err(StackError::NotInitialized)
        ));
        dev.open(EndpointId::ANY).unwrap();
        dev.write(&[1, 2], EndpointId::port(3)).unwrap();
        assert_eq!(mock.sent(), vec![vec![0x02, 1, 2]]);
    }

    #[test]
    fn test_device_read_timeout() {
        let (dev, _mock) = device();
        dev.open(EndpointId::ANY).unwrap();
        assert!(matches!(
            dev.read(Duration::from_millis(20)),
            Err(StackError::Timeout)
        ));
    }

    #[test]
    fn test_device_filter_and_callback() {
        let (dev, mock) = device();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        dev.set_receive_callback(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        dev.open(EndpointId::port(5)).unwrap();

        mock.inject(&[0x01, 0xAA], EndpointId::port(6));
        mock.inject(&[0x01, 0xBB], EndpointId::port(5));

        let (data, id) = dev.read(Duration::from_millis(100)).unwrap();
        assert_eq!(data, vec![0xBB]);
        assert_eq!(id, EndpointId::port(5));
        assert!(dev.read(Duration::from_millis(20)).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_indications() {
        let (dev, mock) = device();
        dev.open(EndpointId::ANY).unwrap();

        mock.inject(&[0x21, 0, 0], EndpointId::port(1));
        assert_eq!(
            dev.next_indication(Duration::from_millis(100)),
            Some((Status::RxError, EndpointId::port(1)))
        );
        assert_eq!(dev.last_status(), Some(Status::RxError));

        dev.write(&[1], EndpointId::port(1)).unwrap();
        assert_eq!(dev.last_status(), Some(Status::TxDone));
        assert_eq!(dev.next_indication(Duration::from_millis(20)), None);
    }

    #[test]
    fn test_device_closed_ignores_messages() {
        let (dev, mock) = device();
        dev.open(EndpointId::ANY).unwrap();
        dev.close();
        mock.inject(&[0x01, 0xAA], EndpointId::ANY);
        assert!(dev.read(Duration::from_millis(20)).is_err());
    }
}
