use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use super::dispatcher::Dispatchable;
use super::interface::Node;
use crate::error::{LcbError, Result};
use crate::types::{NodeHandle, NodeId};

/// Message type indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mti(u16);

impl Mti {
    pub const INITIALIZATION_COMPLETE: Mti = Mti(0x0100);
    pub const VERIFY_NODE_ID_ADDRESSED: Mti = Mti(0x0488);
    pub const VERIFY_NODE_ID_GLOBAL: Mti = Mti(0x0490);
    pub const VERIFIED_NODE_ID: Mti = Mti(0x0170);
    pub const OPTIONAL_INTERACTION_REJECTED: Mti = Mti(0x0068);
    pub const TERMINATE_DUE_TO_ERROR: Mti = Mti(0x00A8);
    pub const PROTOCOL_SUPPORT_INQUIRY: Mti = Mti(0x0828);
    pub const EVENT_REPORT: Mti = Mti(0x05B4);

    /// Bit set in every MTI that carries a destination.
    pub const ADDRESS_PRESENT: u16 = 0x0008;

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    pub const fn is_addressed(self) -> bool {
        self.0 & Self::ADDRESS_PRESENT != 0
    }
}

impl fmt::Display for Mti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

bitflags! {
    /// Per-message state on the destination side.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DstFlags: u8 {
        /// Completion waits until local loopback processing finished.
        const WAIT_FOR_LOCAL_LOOPBACK = 1;
    }
}

bitflags! {
    /// Per-message state on the source side.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SrcFlags: u8 {
        /// The message was produced by a node on this interface and looped back.
        const LOCAL_LOOPBACK = 1;
    }
}

/// Message body.
pub type Payload = Vec<u8>;

/// A protocol message travelling between the wire and local handlers.
#[derive(Clone)]
pub struct NmranetMessage {
    pub mti: Mti,
    pub src: NodeHandle,
    pub dst: NodeHandle,
    /// Set when the destination is a node on this interface.
    pub dst_node: Option<Arc<dyn Node>>,
    pub payload: Payload,
    flags_src: SrcFlags,
    flags_dst: DstFlags,
}

impl NmranetMessage {
    /// Creates an unaddressed message.
    pub fn global(mti: Mti, src: NodeId, payload: Payload) -> Self {
        Self::addressed(mti, src, NodeHandle::default(), payload)
    }

    /// Creates a message addressed to `dst`.
    pub fn addressed(mti: Mti, src: NodeId, dst: NodeHandle, payload: Payload) -> Self {
        Self {
            mti,
            src: NodeHandle::from_id(src),
            dst,
            dst_node: None,
            payload,
            flags_src: SrcFlags::empty(),
            flags_dst: DstFlags::empty(),
        }
    }

    pub fn flags_src(&self) -> SrcFlags {
        self.flags_src
    }

    pub fn set_flag_src(&mut self, flags: SrcFlags) {
        self.flags_src |= flags;
    }

    pub fn clear_flag_src(&mut self, flags: SrcFlags) {
        self.flags_src &= !flags;
    }

    /// True if all of `flags` are set.
    pub fn has_flag_src(&self, flags: SrcFlags) -> bool {
        self.flags_src.contains(flags)
    }

    pub fn flags_dst(&self) -> DstFlags {
        self.flags_dst
    }

    pub fn set_flag_dst(&mut self, flags: DstFlags) {
        self.flags_dst |= flags;
    }

    pub fn clear_flag_dst(&mut self, flags: DstFlags) {
        self.flags_dst &= !flags;
    }

    /// True if all of `flags` are set.
    pub fn has_flag_dst(&self, flags: DstFlags) -> bool {
        self.flags_dst.contains(flags)
    }
}

impl Dispatchable for NmranetMessage {
    fn id(&self) -> u32 {
        self.mti.get() as u32
    }
}

impl fmt::Debug for NmranetMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NmranetMessage")
            .field("mti", &self.mti)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("dst_node", &self.dst_node.as_ref().map(|n| n.node_id()))
            .field("payload", &self.payload)
            .field("flags_src", &self.flags_src)
            .field("flags_dst", &self.flags_dst)
            .finish()
    }
}

/// Renders a node id as six big-endian bytes.
pub fn node_id_to_buffer(id: NodeId) -> Payload {
    id.get().to_be_bytes()[2..].to_vec()
}

/// Reads a node id from exactly six big-endian bytes.
pub fn buffer_to_node_id(buf: &[u8]) -> Result<NodeId> {
    if buf.len() != 6 {
        return Err(LcbError::InvalidParameter(format!(
            "node id needs 6 bytes, got {}",
            buf.len()
        )));
    }
    let mut raw = [0u8; 8];
    raw[2..].copy_from_slice(buf);
    Ok(NodeId::new(u64::from_be_bytes(raw)))
}

/// Payload of Optional Interaction Rejected / Terminate Due To Error.
pub fn error_to_buffer(error_code: u16, mti: Mti) -> Payload {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&error_code.to_be_bytes());
    out.extend_from_slice(&mti.get().to_be_bytes());
    out
}
