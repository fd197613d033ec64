//! Loopback example: an emulated adapter that wires CAN1 to CAN2.
//!
//! Every frame the host transmits on one channel comes back as a received
//! frame on the other, and the activation command is acknowledged.
//!
//! Run with:
//!   cargo run --example loopback

use std::sync::Arc;
use std::time::Duration;

use emuccan::frame::{
    decode, Channel, IdType, LogicalFrame, WireFrame, HANDSHAKE_LEN, RECV_MARKER, WIRE_FRAME_LEN,
};
use emuccan::link::{Drain, FrameSink, LinkRegistry, QueueSink};
use emuccan::transport::MemoryTransport;

/// Turn host output into adapter input: crossed channels, receive marker.
fn emulate(written: &[u8]) -> Vec<u8> {
    let mut reply = Vec::new();
    let mut rest = written;
    while !rest.is_empty() {
        if rest.len() >= HANDSHAKE_LEN && rest[0] == 0x61 {
            reply.extend_from_slice(&[0x61, 0x00, 0x61, 0x0D, 0x0A]);
            rest = &rest[HANDSHAKE_LEN..];
            continue;
        }
        let Some(chunk) = rest.get(..WIRE_FRAME_LEN) else {
            break;
        };
        let mut wire: WireFrame = [0; WIRE_FRAME_LEN];
        wire.copy_from_slice(chunk);
        wire[0] = RECV_MARKER;
        wire[14] = wire[14].wrapping_add(1);
        if let Ok(frame) = decode(&wire) {
            let crossed = frame.with_channel(frame.channel().other());
            reply.extend_from_slice(&emuccan::frame::encode_inbound(&crossed));
        }
        rest = &rest[WIRE_FRAME_LEN..];
    }
    reply
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = LinkRegistry::default();
    let transport = Arc::new(MemoryTransport::with_write_limit("loop0", 7));
    let (can1, rx1) = QueueSink::new();
    let (can2, rx2) = QueueSink::new();
    let sinks: [Arc<dyn FrameSink>; 2] = [can1, can2];

    let attached = registry.attach(transport.clone(), sinks)?;
    for handle in attached.channels() {
        registry.open(handle)?;
    }
    attached.feed(&emulate(&transport.take_written()), None);
    let link = attached.link().ok_or("link released early")?;
    eprintln!("[host] activation: {:?}", link.activation());

    for id in 0..3u32 {
        let frame = LogicalFrame::new(Channel::Can1, IdType::Standard, 0x100 + id, &[id as u8; 4])?;
        registry.transmit(attached.channel(Channel::Can1), &frame)?;
        // Short writes: keep waking the drainer until the frame is out.
        while !matches!(attached.write_wakeup()?, Drain::Complete(_)) {}
        attached.feed(&emulate(&transport.take_written()), None);
    }

    for frame in rx2.recv_timeout(Duration::from_millis(100)).into_iter().chain(rx2.try_iter()) {
        eprintln!(
            "[host] {} <- id={:03X} data={:02X?}",
            attached.channel(Channel::Can2).name(),
            frame.id(),
            frame.data()
        );
    }
    assert!(rx1.try_recv().is_err());

    for row in registry.status() {
        eprintln!("[host] {} {:?}", row.name, row.stats);
    }
    for handle in attached.channels() {
        registry.teardown(handle)?;
    }
    Ok(())
}
