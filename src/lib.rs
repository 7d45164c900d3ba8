// OSI Layer modules
pub mod application; // Generic device
pub mod data_link; // Trace layer
pub mod physical; // Loopback link
pub mod transport; // ISO-TP implementation

// Re-exports for convenience
pub use application::generic;
pub use physical::loopback;
pub use transport::isotp;

// Common types and traits
pub mod error;
pub mod types;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
