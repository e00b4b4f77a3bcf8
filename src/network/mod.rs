//! Network layer: node identity virtualization on CAN.
//!
//! - [`alias_cache::AliasCache`] maps 48-bit node ids to 12-bit aliases and
//!   generates alias candidates
//! - [`can_if::CanInterface`] reserves aliases for local nodes, tracks the
//!   aliases of remote nodes, turns frames into messages and back
//!
//! # Examples
//!
//! ```rust,no_run
//! use libopenlcb::network::{CanIfConfig, CanInterface};
//! use libopenlcb::physical::pipe::Pipe;
//!
//! # async fn demo() -> libopenlcb::error::Result<()> {
//! let can_side = Pipe::new("can", 4);
//! let can_if = CanInterface::new(CanIfConfig::default(), can_side)?;
//! let handle = can_if.handle();
//! let task = tokio::spawn(can_if.run());
//! handle.shutdown();
//! let _ = task.await;
//! # Ok(())
//! # }
//! ```

pub mod alias_cache;
pub mod can_if;

pub use alias_cache::AliasCache;
pub use can_if::{CanIfConfig, CanIfHandle, CanInterface};
