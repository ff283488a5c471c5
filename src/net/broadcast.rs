//! Non-blocking outbound fanout.
//!
//! Every connection owns a bounded frame queue drained by its writer task.
//! The room encodes each message once and try-sends the shared frame to
//! every queue; a full queue drops the frame rather than blocking the tick
//! loop. The per-connection queue is FIFO, which is what guarantees the
//! welcome packet precedes every broadcast for that connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::net::protocol::{encode, ServerMessage};

/// An encoded wire frame, shared across all receivers
pub type Frame = Arc<Vec<u8>>;

/// Depth of each connection's outbound queue. At 20 Hz this is several
/// seconds of backlog; beyond it the client is not keeping up.
const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Frames dropped across all connections since startup
static DROPPED_FRAMES: AtomicU64 = AtomicU64::new(0);
/// Payload bytes accepted into outbound queues since startup
static SENT_BYTES: AtomicU64 = AtomicU64::new(0);

pub fn dropped_frames() -> u64 {
    DROPPED_FRAMES.load(Ordering::Relaxed)
}

pub fn sent_bytes() -> u64 {
    SENT_BYTES.load(Ordering::Relaxed)
}

/// Sender half handed to the room for one connection
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Frame>,
}

/// Receiver half owned by the connection's writer task
pub struct OutboundRx {
    pub rx: mpsc::Receiver<Frame>,
}

pub fn outbound_channel() -> (Outbound, OutboundRx) {
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    (Outbound { tx }, OutboundRx { rx })
}

impl Outbound {
    /// Queue a frame; drops on backpressure and reports whether it was
    /// accepted
    pub fn try_send_frame(&self, frame: Frame) -> bool {
        let len = frame.len() as u64;
        match self.tx.try_send(frame) {
            Ok(()) => {
                SENT_BYTES.fetch_add(len, Ordering::Relaxed);
                true
            }
            Err(_) => {
                DROPPED_FRAMES.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Encode and queue a single message for this connection only
    pub fn send(&self, msg: &ServerMessage) -> bool {
        match encode(msg) {
            Ok(bytes) => self.try_send_frame(Arc::new(bytes)),
            Err(e) => {
                warn!("failed to encode message: {}", e);
                false
            }
        }
    }
}

/// Encode once, fan out to many connections. Returns how many sends were
/// dropped on backpressure.
pub fn fan_out<'a, I>(msg: &ServerMessage, targets: I) -> u64
where
    I: Iterator<Item = &'a Outbound>,
{
    let bytes = match encode(msg) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            warn!("failed to encode broadcast: {}", e);
            return 0;
        }
    };
    let mut dropped = 0;
    for out in targets {
        if !out.try_send_frame(bytes.clone()) {
            dropped += 1;
        }
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg() -> ServerMessage {
        ServerMessage::TuskChat {
            text: "hello".into(),
        }
    }

    #[test]
    fn test_send_and_receive_frame() {
        let (out, mut rx) = outbound_channel();
        assert!(out.send(&msg()));
        let frame = rx.rx.try_recv().unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(decoded["e"], "tusk-chat");
    }

    #[test]
    fn test_fifo_order() {
        let (out, mut rx) = outbound_channel();
        out.send(&ServerMessage::TuskChat { text: "a".into() });
        out.send(&ServerMessage::TuskChat { text: "b".into() });
        let first: serde_json::Value =
            serde_json::from_slice(&rx.rx.try_recv().unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_slice(&rx.rx.try_recv().unwrap()).unwrap();
        assert_eq!(first["d"]["text"], "a");
        assert_eq!(second["d"]["text"], "b");
    }

    #[test]
    fn test_fan_out_shares_encoding() {
        let (a, mut arx) = outbound_channel();
        let (b, mut brx) = outbound_channel();
        let dropped = fan_out(&msg(), [&a, &b].into_iter());
        assert_eq!(dropped, 0);
        let fa = arx.rx.try_recv().unwrap();
        let fb = brx.rx.try_recv().unwrap();
        assert!(Arc::ptr_eq(&fa, &fb), "frame must be encoded once");
    }

    #[test]
    fn test_backpressure_drops_not_blocks() {
        let (out, _rx) = outbound_channel();
        let mut accepted = 0u32;
        for _ in 0..(OUTBOUND_QUEUE_DEPTH + 10) {
            if out.send(&msg()) {
                accepted += 1;
            }
        }
        assert_eq!(accepted as usize, OUTBOUND_QUEUE_DEPTH);
        assert!(dropped_frames() >= 10);
    }
}
