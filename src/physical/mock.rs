use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use super::can::{CanFrame, CAN_FRAME_SIZE};
use super::pipe::PipeMember;

/// Pipe member that records everything written to it.
///
/// Every write is kept in order and also forwarded to the receiver returned
/// by [`RecordingMember::new`], so tests can await traffic.
pub struct RecordingMember {
    writes: Mutex<Vec<Vec<u8>>>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl RecordingMember {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let member = Arc::new(Self {
            writes: Mutex::new(Vec::new()),
            tx,
        });
        (member, rx)
    }

    /// All writes received so far.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All writes concatenated and read as text.
    pub fn received_text(&self) -> String {
        let bytes: Vec<u8> = self.received().concat();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// All writes decoded as binary CAN frame records.
    pub fn received_frames(&self) -> Vec<CanFrame> {
        self.received()
            .concat()
            .chunks_exact(CAN_FRAME_SIZE)
            .filter_map(|chunk| CanFrame::from_bytes(chunk).ok())
            .collect()
    }
}

impl PipeMember for RecordingMember {
    fn write(&self, data: &[u8]) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.to_vec());
        let _ = self.tx.send(data.to_vec());
    }
}
