use std::collections::HashMap;

use tracing::debug;

use crate::types::NodeAlias;

/// Payload bytes carried by one addressed message frame.
pub const ADDRESSED_SEGMENT_LEN: usize = 6;

/// Payload bytes carried by a global message; global messages are never
/// segmented.
pub const GLOBAL_MAX_PAYLOAD: usize = 8;

const FRAMING_SHIFT: u8 = 4;
const FRAMING_MASK: u8 = 0x30;

/// Position of a frame within an addressed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Only = 0,
    First = 1,
    Last = 2,
    Middle = 3,
}

impl Framing {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Framing::Only,
            1 => Framing::First,
            2 => Framing::Last,
            _ => Framing::Middle,
        }
    }
}

fn header(framing: Framing, dst: NodeAlias) -> [u8; 2] {
    let alias = dst.get();
    [
        ((framing as u8) << FRAMING_SHIFT) | (alias >> 8) as u8,
        (alias & 0xFF) as u8,
    ]
}

/// Splits an addressed payload into frame data fields, each starting with
/// the framing bits and the destination alias.
///
/// An empty payload still produces one frame.
pub fn segment_addressed(dst: NodeAlias, payload: &[u8]) -> Vec<Vec<u8>> {
    if payload.len() <= ADDRESSED_SEGMENT_LEN {
        let mut data = header(Framing::Only, dst).to_vec();
        data.extend_from_slice(payload);
        return vec![data];
    }

    let chunks: Vec<&[u8]> = payload.chunks(ADDRESSED_SEGMENT_LEN).collect();
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let framing = match i {
                0 => Framing::First,
                i if i == last => Framing::Last,
                _ => Framing::Middle,
            };
            let mut data = header(framing, dst).to_vec();
            data.extend_from_slice(chunk);
            data
        })
        .collect()
}

/// Reads the framing bits and destination alias of an addressed frame.
///
/// Returns `None` when the frame is too short to carry a destination.
pub fn parse_addressed(data: &[u8]) -> Option<(Framing, NodeAlias, &[u8])> {
    if data.len() < 2 {
        return None;
    }
    let framing = Framing::from_bits((data[0] & FRAMING_MASK) >> FRAMING_SHIFT);
    let alias = NodeAlias::new((((data[0] & 0x0F) as u16) << 8) | data[1] as u16);
    Some((framing, alias, &data[2..]))
}

type SegmentKey = (NodeAlias, NodeAlias, u16);

/// Collects the segments of addressed messages in flight.
///
/// Segments are keyed by source alias, destination alias and MTI. A middle
/// or last segment without a preceding first segment is dropped, as is a
/// message that grows past the length limit.
#[derive(Debug)]
pub struct Reassembler {
    pending: HashMap<SegmentKey, Vec<u8>>,
    max_len: usize,
}

impl Reassembler {
    pub fn new(max_len: usize) -> Self {
        Self {
            pending: HashMap::new(),
            max_len,
        }
    }

    /// Adds one segment. Returns the full payload once the message is complete.
    pub fn push(
        &mut self,
        src: NodeAlias,
        dst: NodeAlias,
        mti: u16,
        framing: Framing,
        data: &[u8],
    ) -> Option<Vec<u8>> {
        let key = (src, dst, mti);
        match framing {
            Framing::Only => {
                self.pending.remove(&key);
                Some(data.to_vec())
            }
            Framing::First => {
                if self.pending.insert(key, data.to_vec()).is_some() {
                    debug!(src = %src, dst = %dst, mti, "Restarting unfinished addressed message");
                }
                None
            }
            Framing::Middle | Framing::Last => {
                let Some(buffer) = self.pending.get_mut(&key) else {
                    debug!(src = %src, dst = %dst, mti, "Dropping segment without first frame");
                    return None;
                };
                if buffer.len() + data.len() > self.max_len {
                    debug!(src = %src, dst = %dst, mti, "Addressed message too long, dropped");
                    self.pending.remove(&key);
                    return None;
                }
                buffer.extend_from_slice(data);
                if framing == Framing::Last {
                    self.pending.remove(&key)
                } else {
                    None
                }
            }
        }
    }

    /// Number of messages with outstanding segments.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops all partial messages from `src`.
    pub fn forget_source(&mut self, src: NodeAlias) {
        self.pending.retain(|(from, _, _), _| *from != src);
    }
}
