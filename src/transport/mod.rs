//! Transport layer
//!
//! Splitting addressed messages into CAN frames and putting them back
//! together on reception.

pub mod segmentation;

pub use segmentation::{
    parse_addressed, segment_addressed, Framing, Reassembler, ADDRESSED_SEGMENT_LEN,
    GLOBAL_MAX_PAYLOAD,
};
