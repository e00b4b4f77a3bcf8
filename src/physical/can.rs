use std::fmt;

use bitflags::bitflags;

use crate::error::{LcbError, Result};

/// Size of one binary frame record as carried on a CAN-side pipe.
pub const CAN_FRAME_SIZE: usize = 16;

/// Maximum payload of a classic CAN frame.
pub const CAN_MAX_DLEN: usize = 8;

const CAN_SFF_MASK: u32 = 0x0000_07FF;
const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

bitflags! {
    /// Flag bits stored above the identifier in the binary layout.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CanIdFlags: u32 {
        const EFF = 0x8000_0000;
        const RTR = 0x4000_0000;
        const ERR = 0x2000_0000;
    }
}

/// Native CAN frame.
///
/// The binary representation follows the SocketCAN `can_frame` record:
/// identifier word with flag bits, length, three pad bytes and eight data
/// bytes, all little endian.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    flags: CanIdFlags,
    dlc: u8,
    data: [u8; CAN_MAX_DLEN],
}

impl CanFrame {
    /// Creates a 29-bit identifier data frame.
    pub fn new_extended(id: u32, data: &[u8]) -> Result<Self> {
        if id & !CAN_EFF_MASK != 0 {
            return Err(LcbError::InvalidFrame("extended identifier exceeds 29 bits"));
        }
        Self::build(id, CanIdFlags::EFF, data)
    }

    /// Creates an 11-bit identifier data frame.
    pub fn new_standard(id: u32, data: &[u8]) -> Result<Self> {
        if id & !CAN_SFF_MASK != 0 {
            return Err(LcbError::InvalidFrame("standard identifier exceeds 11 bits"));
        }
        Self::build(id, CanIdFlags::empty(), data)
    }

    fn build(id: u32, flags: CanIdFlags, data: &[u8]) -> Result<Self> {
        if data.len() > CAN_MAX_DLEN {
            return Err(LcbError::InvalidFrame("more than 8 data bytes"));
        }
        let mut buf = [0u8; CAN_MAX_DLEN];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            flags,
            dlc: data.len() as u8,
            data: buf,
        })
    }

    /// Turns this frame into a remote transmission request.
    pub fn into_remote(mut self) -> Self {
        self.flags |= CanIdFlags::RTR;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.flags.contains(CanIdFlags::EFF)
    }

    pub fn is_remote(&self) -> bool {
        self.flags.contains(CanIdFlags::RTR)
    }

    pub fn is_error(&self) -> bool {
        self.flags.contains(CanIdFlags::ERR)
    }

    pub fn len(&self) -> usize {
        self.dlc as usize
    }

    pub fn is_empty(&self) -> bool {
        self.dlc == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// Serializes the frame into its binary record.
    pub fn to_bytes(&self) -> [u8; CAN_FRAME_SIZE] {
        let mut out = [0u8; CAN_FRAME_SIZE];
        out[0..4].copy_from_slice(&(self.id | self.flags.bits()).to_le_bytes());
        out[4] = self.dlc;
        out[8..16].copy_from_slice(&self.data);
        out
    }

    /// Parses one binary record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CAN_FRAME_SIZE {
            return Err(LcbError::InvalidFrame("binary record has the wrong size"));
        }
        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let flags = CanIdFlags::from_bits_truncate(word);
        let id = if flags.contains(CanIdFlags::EFF) {
            word & CAN_EFF_MASK
        } else {
            word & CAN_SFF_MASK
        };
        let dlc = bytes[4];
        if dlc as usize > CAN_MAX_DLEN {
            return Err(LcbError::InvalidFrame("length field exceeds 8"));
        }
        let mut data = [0u8; CAN_MAX_DLEN];
        data.copy_from_slice(&bytes[8..16]);
        Ok(Self {
            id,
            flags,
            dlc,
            data,
        })
    }

    /// Serializes a batch of frames into consecutive binary records.
    pub fn encode_all(frames: &[CanFrame]) -> Vec<u8> {
        let mut out = Vec::with_capacity(frames.len() * CAN_FRAME_SIZE);
        for frame in frames {
            out.extend_from_slice(&frame.to_bytes());
        }
        out
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended() {
            write!(f, "CanFrame({:08X}", self.id)?;
        } else {
            write!(f, "CanFrame({:03X}", self.id)?;
        }
        if self.is_remote() {
            write!(f, " R")?;
        }
        write!(f, " [")?;
        for (i, b) in self.data().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        write!(f, "])")
    }
}
