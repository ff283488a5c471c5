//! Lock-free input path from connection handlers to the room tick loop.
//!
//! Connection tasks submit input frames without blocking; the room drains
//! everything pending at the start of each tick. Backpressure drops the
//! frame rather than stalling either side.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::game::state::PlayerId;
use crate::net::protocol::InputFrame;

/// One queued input frame from a connection
#[derive(Debug, Clone)]
pub struct InputMessage {
    pub player_id: PlayerId,
    pub frame: InputFrame,
}

/// Bounded MPSC input buffer shared between connections and the room
pub struct InputBuffer {
    sender: Sender<InputMessage>,
    receiver: Receiver<InputMessage>,
    capacity: usize,
}

impl InputBuffer {
    /// Capacity should absorb a full tick of input bursts from every
    /// connected client
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// New sender handle for a connection task
    pub fn sender(&self) -> InputSender {
        InputSender {
            sender: self.sender.clone(),
        }
    }

    /// Drain all pending inputs for this tick
    pub fn drain(&self) -> impl Iterator<Item = InputMessage> + '_ {
        self.receiver.try_iter()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        // Plenty for a full room sending at 60 Hz between 20 Hz ticks
        Self::new(1024)
    }
}

/// Clonable sender handle held by each connection
#[derive(Clone)]
pub struct InputSender {
    sender: Sender<InputMessage>,
}

impl InputSender {
    /// Non-blocking submit; a full buffer or stopped room drops the frame
    #[inline]
    pub fn try_send(&self, player_id: PlayerId, frame: InputFrame) -> Result<(), InputBufferError> {
        self.sender
            .try_send(InputMessage { player_id, frame })
            .map_err(|e| match e {
                TrySendError::Full(_) => InputBufferError::Full,
                TrySendError::Disconnected(_) => InputBufferError::Disconnected,
            })
    }
}

/// Input buffer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputBufferError {
    /// Buffer full (backpressure)
    Full,
    /// Room stopped
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn frame(seq: u64) -> InputFrame {
        InputFrame {
            seq,
            keys: 0,
            turret_angle: 0.0,
            dt: 0.05,
        }
    }

    #[test]
    fn test_submit_and_drain_in_order() {
        let buffer = InputBuffer::new(8);
        let sender = buffer.sender();
        let pid = Uuid::new_v4();

        for seq in 0..3 {
            sender.try_send(pid, frame(seq)).unwrap();
        }
        let drained: Vec<_> = buffer.drain().collect();
        assert_eq!(drained.len(), 3);
        let seqs: Vec<u64> = drained.iter().map(|m| m.frame.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_full_buffer_reports_backpressure() {
        let buffer = InputBuffer::new(2);
        let sender = buffer.sender();
        let pid = Uuid::new_v4();

        sender.try_send(pid, frame(0)).unwrap();
        sender.try_send(pid, frame(1)).unwrap();
        assert_eq!(sender.try_send(pid, frame(2)), Err(InputBufferError::Full));
    }

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = InputBuffer::new(4);
        let sender = buffer.sender();
        sender.try_send(Uuid::new_v4(), frame(0)).unwrap();
        assert_eq!(buffer.pending_count(), 1);
        let _ = buffer.drain().count();
        assert_eq!(buffer.pending_count(), 0);
    }

    #[test]
    fn test_disconnected_after_buffer_drop() {
        let buffer = InputBuffer::new(2);
        let sender = buffer.sender();
        drop(buffer);
        assert_eq!(
            sender.try_send(Uuid::new_v4(), frame(0)),
            Err(InputBufferError::Disconnected)
        );
    }
}
