use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use super::*;
use crate::physical::can::CanFrame;
use crate::physical::mock::RecordingMember;
use crate::physical::pipe::{MemberId, Pipe, PipeMember};

/// Wire that completes one asynchronous write per permit added to `gate`.
struct GatedWire {
    gate: Semaphore,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl GatedWire {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            writes: Mutex::new(Vec::new()),
        })
    }

    fn received(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }
}

impl PipeMember for GatedWire {
    fn write(&self, data: &[u8]) {
        self.writes.lock().unwrap().push(data.to_vec());
    }

    fn write_async<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.write(data);
        })
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn decode_all(decoder: &mut GcDecoder, input: &[u8]) -> Vec<CanFrame> {
    input.iter().filter_map(|&c| decoder.consume_byte(c)).collect()
}

#[test]
fn test_decoder_single_frame() {
    let mut decoder = GcDecoder::new();
    let frames = decode_all(&mut decoder, b":X195B4123N0102;");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].id(), 0x195B_4123);
    assert_eq!(frames[0].data(), &[1, 2]);
    assert!(!decoder.is_collecting());
}

#[test]
fn test_decoder_drops_bytes_outside_frames() {
    let mut decoder = GcDecoder::new();
    let frames = decode_all(&mut decoder, b"garbage;\r\n:S123N;\r\nmore");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].id(), 0x123);
}

#[test]
fn test_decoder_new_start_discards_partial_frame() {
    let mut decoder = GcDecoder::new();
    let frames = decode_all(&mut decoder, b":AAAA:X10N01;");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].id(), 0x10);
    assert_eq!(frames[0].data(), &[1]);
}

#[test]
fn test_decoder_resyncs_after_overrun() {
    let mut decoder = GcDecoder::new();
    let mut input = b":".to_vec();
    input.extend(std::iter::repeat(b'A').take(40));
    input.extend_from_slice(b";");
    assert!(decode_all(&mut decoder, &input).is_empty());
    assert!(!decoder.is_collecting());

    let frames = decode_all(&mut decoder, b":X1234N;");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].id(), 0x1234);
}

#[test]
fn test_decoder_overrun_then_valid_frame_in_one_write() {
    let mut decoder = GcDecoder::new();
    let mut input = b":".to_vec();
    input.extend(std::iter::repeat(b'A').take(64));
    input.extend_from_slice(b":X1234N55;");
    let frames = decode_all(&mut decoder, &input);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data(), &[0x55]);
}

#[test]
fn test_decoder_accepts_longest_frame() {
    let mut decoder = GcDecoder::new();
    let frames = decode_all(&mut decoder, b":X1FFFFFFFN0102030405060708;");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].len(), 8);
}

#[test]
fn test_decoder_discards_malformed_frame() {
    let mut decoder = GcDecoder::new();
    assert!(decode_all(&mut decoder, b":X12N0;").is_empty());
    assert!(!decoder.is_collecting());
    assert_eq!(decode_all(&mut decoder, b":X12N00;").len(), 1);
}

#[tokio::test]
async fn test_adapter_decodes_to_can_side() {
    let gc_side = Pipe::new("gc", 2);
    let can_side = Pipe::new("can", 2);
    let adapter = GcAdapter::new(gc_side.clone(), can_side.clone(), &GridConnectConfig::default());
    let (can_listener, _rx) = RecordingMember::new();
    can_side.register_member(MemberId::next(), can_listener.clone());

    gc_side.write_to_all(None, b":X195B41");
    gc_side.write_to_all(None, b"23N0102;");

    let frames = can_listener.received_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].id(), 0x195B_4123);
    drop(adapter);
}

#[tokio::test]
async fn test_adapter_round_trip_preserves_frame() {
    let gc_side = Pipe::new("gc", 2);
    let can_side = Pipe::new("can", 2);
    let _adapter = GcAdapter::new(gc_side.clone(), can_side.clone(), &GridConnectConfig::default());
    let (wire, mut wire_rx) = RecordingMember::new();
    gc_side.register_member(MemberId::next(), wire);
    let (can_listener, _rx) = RecordingMember::new();
    let can_listener_id = MemberId::next();
    can_side.register_member(can_listener_id, can_listener.clone());

    let original = CanFrame::new_extended(0x1949_0ABC, &[0x05, 0x01, 0x01, 0x01, 0x22, 0x00]).unwrap();
    let mut buffer = can_side.allocate().await.unwrap();
    buffer.set_data(original.to_bytes().to_vec());
    buffer.set_skip_member(can_listener_id);
    let sent = buffer.notify_on_sent();
    can_side.send_buffer(buffer);
    sent.await.unwrap();

    let text = wire_rx.recv().await.unwrap();
    assert_eq!(text, b":X19490ABCN050101012200;".to_vec());

    // Feed the rendered text back through the decoder.
    gc_side.write_to_all(None, &text);
    let decoded = can_listener.received_frames();
    assert_eq!(decoded, vec![original]);
}

#[tokio::test]
async fn test_adapter_suppresses_echo() {
    let gc_side = Pipe::new("gc", 2);
    let can_side = Pipe::new("can", 2);
    let _adapter = GcAdapter::new(gc_side.clone(), can_side.clone(), &GridConnectConfig::default());
    let (wire, _wire_rx) = RecordingMember::new();
    let wire_id = MemberId::next();
    gc_side.register_member(wire_id, wire.clone());

    // Text arriving from the wire must not be rendered back onto the wire.
    gc_side.write_to_all(Some(wire_id), b":X10N01;");
    tokio::task::yield_now().await;
    assert!(wire.received().is_empty());
}

#[tokio::test]
async fn test_adapter_sync_write_renders_immediately() {
    let gc_side = Pipe::new("gc", 1);
    let can_side = Pipe::new("can", 1);
    let _adapter = GcAdapter::new(gc_side.clone(), can_side.clone(), &GridConnectConfig { double_bytes: true });
    let (wire, _wire_rx) = RecordingMember::new();
    gc_side.register_member(MemberId::next(), wire.clone());

    let frame = CanFrame::new_standard(0x1, &[0x02]).unwrap();
    can_side.write_to_all(None, &frame.to_bytes());
    assert_eq!(wire.received_text(), "::SS000011NN0022;;");
}

#[tokio::test]
async fn test_encoder_flow_is_flow_controlled() {
    let gc_side = Pipe::new("gc", 1);
    let can_side = Pipe::new("can", 1);
    let adapter = GcAdapter::new(gc_side.clone(), can_side.clone(), &GridConnectConfig::default());
    let (wire, _wire_rx) = RecordingMember::new();
    gc_side.register_member(MemberId::next(), wire.clone());

    // Hold the only text-side slot so the flow must wait.
    let held = gc_side.allocate().await.unwrap();

    let frames = [
        CanFrame::new_standard(0x1, &[1]).unwrap(),
        CanFrame::new_standard(0x2, &[2]).unwrap(),
        CanFrame::new_standard(0x3, &[3]).unwrap(),
    ];
    let formatter = adapter.formatter().clone();
    let flow = tokio::spawn(async move {
        formatter.write_frames(&CanFrame::encode_all(&frames)).await;
    });

    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert!(wire.received().is_empty());
    assert!(!flow.is_finished());

    drop(held);
    tokio::time::timeout(Duration::from_secs(1), flow)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        wire.received(),
        vec![b":S001N01;".to_vec(), b":S002N02;".to_vec(), b":S003N03;".to_vec()]
    );
    assert_eq!(gc_side.available_buffers(), 1);
}

#[tokio::test]
async fn test_encoder_flow_waits_for_each_frame() {
    // Two slots, so only the flow itself can keep frame 2 back.
    let gc_side = Pipe::new("gc", 2);
    let can_side = Pipe::new("can", 1);
    let adapter = GcAdapter::new(gc_side.clone(), can_side.clone(), &GridConnectConfig::default());
    let wire = GatedWire::new();
    gc_side.register_member(MemberId::next(), wire.clone());

    let frames = [
        CanFrame::new_standard(0x1, &[1]).unwrap(),
        CanFrame::new_standard(0x2, &[2]).unwrap(),
        CanFrame::new_standard(0x3, &[3]).unwrap(),
    ];
    let formatter = adapter.formatter().clone();
    let flow = tokio::spawn(async move {
        formatter.write_frames(&CanFrame::encode_all(&frames)).await;
    });

    settle().await;
    assert!(wire.received().is_empty());
    assert_eq!(gc_side.available_buffers(), 1);

    wire.gate.add_permits(1);
    settle().await;
    assert_eq!(wire.received(), vec![b":S001N01;".to_vec()]);
    assert_eq!(gc_side.available_buffers(), 1);
    assert!(!flow.is_finished());

    wire.gate.add_permits(2);
    tokio::time::timeout(Duration::from_secs(1), flow)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        wire.received(),
        vec![b":S001N01;".to_vec(), b":S002N02;".to_vec(), b":S003N03;".to_vec()]
    );
    assert_eq!(gc_side.available_buffers(), 2);
}

#[tokio::test]
async fn test_encoder_ignores_trailing_partial_record() {
    let gc_side = Pipe::new("gc", 1);
    let can_side = Pipe::new("can", 1);
    let adapter = GcAdapter::new(gc_side.clone(), can_side.clone(), &GridConnectConfig::default());
    let (wire, _wire_rx) = RecordingMember::new();
    gc_side.register_member(MemberId::next(), wire.clone());

    let mut data = CanFrame::new_standard(0x7, &[]).unwrap().to_bytes().to_vec();
    data.extend_from_slice(&[0u8; 5]);
    adapter.formatter().write_frames(&data).await;

    assert_eq!(wire.received(), vec![b":S007N;".to_vec()]);
}

#[tokio::test]
async fn test_adapter_drop_unregisters_members() {
    let gc_side = Pipe::new("gc", 1);
    let can_side = Pipe::new("can", 1);
    let adapter = GcAdapter::new(gc_side.clone(), can_side.clone(), &GridConnectConfig::default());
    assert_eq!(gc_side.member_count(), 1);
    assert_eq!(can_side.member_count(), 1);
    drop(adapter);
    assert_eq!(gc_side.member_count(), 0);
    assert_eq!(can_side.member_count(), 0);
}
