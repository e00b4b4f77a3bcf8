//! Application layer: protocol messages and their routing.
//!
//! This module holds everything above the wire representation:
//! - [`message::NmranetMessage`] and [`message::Mti`]: typed messages
//!   addressed by node id
//! - [`buffer::Buffer`]: shared, reference-counted message storage with a
//!   completion that resolves when the last holder lets go
//! - [`dispatcher::DispatchFlow`]: fan-out of incoming messages by MTI
//! - [`interface::Interface`]: local node registry plus the outbound write
//!   flows
//! - [`verify::VerifyNodeIdResponder`]: answers Verify Node ID on behalf of
//!   the local nodes
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use libopenlcb::application::{Buffer, Mti, MessageHandler, NmranetMessage};
//! use libopenlcb::types::NodeId;
//!
//! struct Printer;
//!
//! impl MessageHandler<NmranetMessage> for Printer {
//!     fn send(&self, message: Buffer<NmranetMessage>, _priority: u32) {
//!         println!("{:?}", *message);
//!     }
//! }
//!
//! # fn demo(iface: &mut libopenlcb::application::Interface) {
//! iface
//!     .dispatcher_mut()
//!     .register_handler(Arc::new(Printer), Mti::EVENT_REPORT.get() as u32, 0xFFFF);
//!
//! let msg = NmranetMessage::global(Mti::EVENT_REPORT, NodeId::new(0x0501_0101_2200), vec![0; 8]);
//! iface.global_message_write_flow().send(Buffer::new(msg), 0);
//! # }
//! ```

pub mod buffer;
pub mod dispatcher;
pub mod interface;
pub mod message;
pub mod verify;

pub use buffer::{Buffer, Completion};
pub use dispatcher::{DispatchFlow, Dispatchable, MessageHandler};
pub use interface::{Interface, MessageWriteFlow, Node};
pub use message::{
    buffer_to_node_id, error_to_buffer, node_id_to_buffer, DstFlags, Mti, NmranetMessage, Payload,
    SrcFlags,
};
pub use verify::VerifyNodeIdResponder;
