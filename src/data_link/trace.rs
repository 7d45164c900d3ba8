use std::sync::{Arc, Mutex, Weak};

use super::LayerStats;
use crate::error::Result;
use crate::physical::PhysicalLayer;
use crate::types::{EndpointId, Status, Upper, UpperSlot};

/// Pass-through layer that logs every frame and indication crossing it and
/// keeps [`LayerStats`].
///
/// It looks like a link to the layer above and like an upper layer to the
/// link below, so it can be stacked anywhere a [`PhysicalLayer`] is expected.
pub struct TraceLayer<L: PhysicalLayer> {
    name: &'static str,
    lower: Arc<L>,
    upper: UpperSlot,
    stats: Mutex<LayerStats>,
}

impl<L: PhysicalLayer + 'static> TraceLayer<L> {
    pub fn new(name: &'static str, lower: Arc<L>) -> Arc<Self> {
        let layer = Arc::new(Self {
            name,
            lower,
            upper: UpperSlot::default(),
            stats: Mutex::new(LayerStats::default()),
        });
        let weak: Weak<Self> = Arc::downgrade(&layer);
        layer.lower.attach(weak);
        layer
    }

    pub fn stats(&self) -> LayerStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    pub fn reset_stats(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = LayerStats::default();
        }
    }

    pub fn lower(&self) -> &Arc<L> {
        &self.lower
    }

    fn update(&self, f: impl FnOnce(&mut LayerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

impl<L: PhysicalLayer + 'static> PhysicalLayer for TraceLayer<L> {
    fn open(&self) -> Result<()> {
        tracing::info!(layer = self.name, "open");
        self.lower.open()
    }

    fn close(&self) {
        tracing::info!(layer = self.name, "close");
        self.lower.close();
    }

    fn send(&self, data: &[u8], id: EndpointId) -> Result<()> {
        tracing::debug!(layer = self.name, %id, len = data.len(), "-> {:02x?}", data);
        let result = self.lower.send(data, id);
        match &result {
            Ok(()) => self.update(|s| {
                s.frames_out += 1;
                s.bytes_out += data.len() as u64;
            }),
            Err(err) => {
                tracing::warn!(layer = self.name, %id, "send failed: {}", err);
                self.update(|s| s.send_errors += 1);
            }
        }
        result
    }

    fn attach(&self, upper: Weak<dyn Upper>) {
        self.upper.set(upper);
    }
}

impl<L: PhysicalLayer + 'static> Upper for TraceLayer<L> {
    fn receive(&self, data: &[u8], id: EndpointId) {
        tracing::debug!(layer = self.name, %id, len = data.len(), "<- {:02x?}", data);
        self.update(|s| {
            s.frames_in += 1;
            s.bytes_in += data.len() as u64;
        });
        if let Some(upper) = self.upper.get() {
            upper.receive(data, id);
        }
    }

    fn indication(&self, status: Status, id: EndpointId) {
        match status {
            Status::Connected | Status::Disconnected => {
                tracing::info!(layer = self.name, %id, ?status, "indication")
            }
            Status::TxDone => tracing::trace!(layer = self.name, %id, "tx done"),
            _ => {
                tracing::warn!(layer = self.name, %id, ?status, "indication");
                self.update(|s| s.error_indications += 1);
            }
        }
        if let Some(upper) = self.upper.get() {
            upper.indication(status, id);
        }
    }
}
