//! Data link helpers: pass-through layers inserted between a link and the
//! transport.

pub mod trace;

pub use trace::TraceLayer;

/// Frame and byte counters kept by a pass-through layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    pub frames_out: u64,
    pub bytes_out: u64,
    pub frames_in: u64,
    pub bytes_in: u64,
    pub send_errors: u64,
    pub error_indications: u64,
}
