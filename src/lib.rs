// OSI Layer modules
pub mod application; // Messages, dispatch and the local node registry
pub mod data_link; // Gridconnect framing
pub mod network; // Alias cache and the CAN interface
pub mod physical; // CAN frames and pipes
pub mod transport; // Addressed message segmentation

// Re-exports for convenience
pub use application::{Buffer, DispatchFlow, Interface, Mti, NmranetMessage, Node};
pub use data_link::GcAdapter;
pub use network::{AliasCache, CanInterface};
pub use physical::{can, pipe};

// Common types and traits
pub mod config;
pub mod error;
pub mod types;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
