//! Data link layer: gridconnect framing.
//!
//! Gridconnect carries CAN frames as ASCII text over serial lines and TCP
//! sockets. [`gc_adapter::GcAdapter`] joins a text pipe and a binary CAN
//! pipe:
//!
//! - text to binary is a synchronous byte-at-a-time parser that resyncs on
//!   every `:` and drops malformed or over-length frames silently
//! - binary to text is an asynchronous flow sending one frame at a time,
//!   waiting on the text pipe's buffer allocation for backpressure
//!
//! # Examples
//!
//! ```rust,no_run
//! use libopenlcb::data_link::{GcAdapter, GridConnectConfig};
//! use libopenlcb::physical::pipe::Pipe;
//!
//! # async fn demo() {
//! let gc_side = Pipe::new("gc", 4);
//! let can_side = Pipe::new("can", 4);
//! let _adapter = GcAdapter::new(gc_side.clone(), can_side, &GridConnectConfig::default());
//! gc_side.write_to_all(None, b":X195B4123N0102;");
//! # }
//! ```

pub mod gc_adapter;
pub mod gridconnect;

pub use gc_adapter::{GcAdapter, GcDecoder, GridConnectConfig};

#[cfg(test)]
mod tests;
