use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::gridconnect::{self, GC_END, GC_START};
use crate::error::Result;
use crate::physical::can::{CanFrame, CAN_FRAME_SIZE};
use crate::physical::pipe::{MemberId, Pipe, PipeMember};
use crate::types::Config;

/// Size of the decoder's collection buffer. One byte is kept free, so the
/// longest accepted frame text is one byte shorter.
pub const GC_COLLECT_CAPACITY: usize = 32;

/// Gridconnect adapter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConnectConfig {
    /// Emit every rendered character twice.
    pub double_bytes: bool,
}

impl Config for GridConnectConfig {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Byte-at-a-time gridconnect frame decoder.
///
/// Bytes outside `:`...`;` are dropped. A `:` always restarts collection. A
/// frame that outgrows the collection buffer is abandoned and the decoder
/// goes back to searching for the next `:`.
#[derive(Debug)]
pub struct GcDecoder {
    buf: [u8; GC_COLLECT_CAPACITY],
    offset: Option<usize>,
}

impl Default for GcDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl GcDecoder {
    pub fn new() -> Self {
        Self {
            buf: [0; GC_COLLECT_CAPACITY],
            offset: None,
        }
    }

    /// True while between a start and an end delimiter.
    pub fn is_collecting(&self) -> bool {
        self.offset.is_some()
    }

    /// Feeds one byte. Returns a frame when `c` completed a valid one.
    pub fn consume_byte(&mut self, c: u8) -> Option<CanFrame> {
        if c == GC_START {
            self.offset = Some(0);
            return None;
        }
        let offset = self.offset?;
        if c == GC_END {
            self.offset = None;
            return match gridconnect::parse(&self.buf[..offset]) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    debug!(error = %e, "Dropping malformed gridconnect frame");
                    None
                }
            };
        }
        if offset >= GC_COLLECT_CAPACITY - 1 {
            debug!("Gridconnect frame overran the collection buffer");
            self.offset = None;
            return None;
        }
        self.buf[offset] = c;
        self.offset = Some(offset + 1);
        None
    }
}

/// Gridconnect-side member: parses text and writes binary frames to the
/// CAN side.
pub struct GcToBinaryMember {
    decoder: Mutex<GcDecoder>,
    destination: Arc<Pipe>,
    skip_member: MemberId,
}

impl GcToBinaryMember {
    fn new(destination: Arc<Pipe>, skip_member: MemberId) -> Self {
        Self {
            decoder: Mutex::new(GcDecoder::new()),
            destination,
            skip_member,
        }
    }

    pub fn destination(&self) -> &Arc<Pipe> {
        &self.destination
    }
}

impl PipeMember for GcToBinaryMember {
    fn write(&self, data: &[u8]) {
        let frames: Vec<CanFrame> = {
            let mut decoder = self.decoder.lock().unwrap_or_else(PoisonError::into_inner);
            data.iter().filter_map(|&c| decoder.consume_byte(c)).collect()
        };
        for frame in frames {
            trace!(?frame, "Gridconnect frame decoded");
            self.destination
                .write_to_all(Some(self.skip_member), &frame.to_bytes());
        }
    }
}

/// CAN-side member: renders binary frames as text onto the gridconnect side.
pub struct BinaryToGcMember {
    destination: Arc<Pipe>,
    skip_member: MemberId,
    double_bytes: bool,
}

impl BinaryToGcMember {
    fn new(destination: Arc<Pipe>, skip_member: MemberId, double_bytes: bool) -> Self {
        Self {
            destination,
            skip_member,
            double_bytes,
        }
    }

    pub fn destination(&self) -> &Arc<Pipe> {
        &self.destination
    }

    /// Encodes a buffer of binary frame records, one frame in flight at a time.
    ///
    /// Each rendered frame waits for a destination buffer and then for that
    /// buffer to be sent before the next frame starts. Returns once every
    /// complete record in `data` has been handed off.
    pub async fn write_frames(&self, data: &[u8]) {
        for record in data.chunks_exact(CAN_FRAME_SIZE) {
            let frame = match CanFrame::from_bytes(record) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "Skipping invalid binary frame");
                    continue;
                }
            };
            let text = gridconnect::render(&frame, self.double_bytes);
            if text.is_empty() {
                continue;
            }

            let mut buffer = match self.destination.allocate().await {
                Ok(buffer) => buffer,
                Err(e) => {
                    warn!(error = %e, "Gridconnect output unavailable");
                    return;
                }
            };
            buffer.set_data(text);
            buffer.set_skip_member(self.skip_member);
            let sent = buffer.notify_on_sent();
            self.destination.send_buffer(buffer);
            let _ = sent.await;
        }
    }
}

impl PipeMember for BinaryToGcMember {
    fn write(&self, data: &[u8]) {
        for record in data.chunks_exact(CAN_FRAME_SIZE) {
            if let Ok(frame) = CanFrame::from_bytes(record) {
                let text = gridconnect::render(&frame, self.double_bytes);
                self.destination.write_to_all(Some(self.skip_member), &text);
            }
        }
    }

    fn write_async<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, ()> {
        Box::pin(self.write_frames(data))
    }
}

/// Bridges a gridconnect text pipe and a binary CAN pipe in both directions.
///
/// Frames decoded from the text side are not echoed back to the encoder and
/// text rendered by the encoder is not fed back into the decoder. Both
/// members are unregistered when the adapter is dropped.
pub struct GcAdapter {
    parser: Arc<GcToBinaryMember>,
    parser_id: MemberId,
    formatter: Arc<BinaryToGcMember>,
    formatter_id: MemberId,
}

impl GcAdapter {
    pub fn new(gc_side: Arc<Pipe>, can_side: Arc<Pipe>, config: &GridConnectConfig) -> Self {
        let parser_id = MemberId::next();
        let formatter_id = MemberId::next();
        let parser = Arc::new(GcToBinaryMember::new(can_side.clone(), formatter_id));
        let formatter = Arc::new(BinaryToGcMember::new(
            gc_side.clone(),
            parser_id,
            config.double_bytes,
        ));
        gc_side.register_member(parser_id, parser.clone());
        can_side.register_member(formatter_id, formatter.clone());
        Self {
            parser,
            parser_id,
            formatter,
            formatter_id,
        }
    }

    pub fn parser(&self) -> &Arc<GcToBinaryMember> {
        &self.parser
    }

    pub fn formatter(&self) -> &Arc<BinaryToGcMember> {
        &self.formatter
    }

    /// Member id of the decoder on the gridconnect side.
    pub fn parser_id(&self) -> MemberId {
        self.parser_id
    }

    /// Member id of the encoder on the CAN side.
    pub fn formatter_id(&self) -> MemberId {
        self.formatter_id
    }
}

impl Drop for GcAdapter {
    fn drop(&mut self) {
        self.parser.destination().unregister_member(self.formatter_id);
        self.formatter.destination().unregister_member(self.parser_id);
    }
}
