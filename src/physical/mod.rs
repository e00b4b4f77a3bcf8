//! Physical layer: native CAN frames and the byte transport they travel on.
//!
//! - [`can::CanFrame`] is the binary frame record exchanged on CAN-side pipes.
//! - [`pipe::Pipe`] is the duplex byte channel that gridconnect adapters,
//!   interfaces and hardware drivers attach to as members.
//!
//! # Examples
//!
//! ```rust,no_run
//! use libopenlcb::physical::can::CanFrame;
//! use libopenlcb::physical::pipe::Pipe;
//!
//! # async fn demo() {
//! let can_side = Pipe::new("can", 4);
//! let frame = CanFrame::new_extended(0x195B_4123, &[0x01, 0x02]).unwrap();
//! can_side.write_to_all(None, &frame.to_bytes());
//! # }
//! ```

pub mod can;
pub mod mock;
pub mod pipe;

pub use can::{CanFrame, CAN_FRAME_SIZE};
pub use pipe::{MemberId, Pipe, PipeBuffer, PipeMember};
