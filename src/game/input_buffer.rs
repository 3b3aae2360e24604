//! Lock-free input buffer for high-performance input submission
//!
//! Uses crossbeam-channel for lock-free MPSC communication from
//! connection handlers to the simulation thread.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::game::entity::EntityHandle;
use crate::net::protocol::InputCommand;

/// Input addressed to one controlled entity
#[derive(Debug, Clone, Copy)]
pub struct InputMessage {
    pub entity: EntityHandle,
    pub command: InputCommand,
}

/// Bounded MPSC queue drained at the start of every tick
pub struct InputBuffer {
    sender: Sender<InputMessage>,
    receiver: Receiver<InputMessage>,
    capacity: usize,
}

impl InputBuffer {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Create a new sender handle for a connection
    pub fn sender(&self) -> InputSender {
        InputSender {
            sender: self.sender.clone(),
        }
    }

    /// Returns false if the buffer is full
    #[inline]
    pub fn try_submit(&self, entity: EntityHandle, command: InputCommand) -> bool {
        self.sender
            .try_send(InputMessage { entity, command })
            .is_ok()
    }

    /// Move every pending input into `out` (cleared first), reusing its allocation
    pub fn drain_into(&self, out: &mut Vec<InputMessage>) -> usize {
        out.clear();
        out.extend(self.receiver.try_iter());
        out.len()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Clonable sender handle for connection handlers
#[derive(Clone)]
pub struct InputSender {
    sender: Sender<InputMessage>,
}

impl InputSender {
    /// Submit an input (non-blocking)
    #[inline]
    pub fn try_send(&self, entity: EntityHandle, command: InputCommand) -> Result<(), InputBufferError> {
        self.sender
            .try_send(InputMessage { entity, command })
            .map_err(|e| match e {
                TrySendError::Full(_) => InputBufferError::Full,
                TrySendError::Disconnected(_) => InputBufferError::Disconnected,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputBufferError {
    /// Buffer is full (backpressure)
    #[error("input buffer full")]
    Full,
    /// Simulation stopped
    #[error("input buffer disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::vec2::Vec2;

    fn command(sequence: u32) -> InputCommand {
        InputCommand::new(sequence, sequence as u64, Vec2::new(1.0, 0.0), 0)
    }

    #[test]
    fn test_submit_and_drain_in_order() {
        let buffer = InputBuffer::new(10);
        let e = EntityHandle::new(0, 0);
        for seq in 1..=3 {
            assert!(buffer.try_submit(e, command(seq)));
        }
        assert_eq!(buffer.pending_count(), 3);

        let mut out = Vec::new();
        assert_eq!(buffer.drain_into(&mut out), 3);
        let seqs: Vec<u32> = out.iter().map(|m| m.command.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_backpressure() {
        let buffer = InputBuffer::new(2);
        let e = EntityHandle::new(0, 0);
        assert!(buffer.try_submit(e, command(1)));
        assert!(buffer.try_submit(e, command(2)));
        assert!(!buffer.try_submit(e, command(3)));

        let sender = buffer.sender();
        assert_eq!(sender.try_send(e, command(3)), Err(InputBufferError::Full));

        let mut out = Vec::new();
        buffer.drain_into(&mut out);
        assert!(sender.try_send(e, command(3)).is_ok());
    }

    #[test]
    fn test_senders_from_threads() {
        let buffer = InputBuffer::new(100);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sender = buffer.sender();
                std::thread::spawn(move || {
                    for seq in 0..10 {
                        sender.try_send(EntityHandle::new(t, 0), command(seq)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut out = Vec::new();
        assert_eq!(buffer.drain_into(&mut out), 40);
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(InputBuffer::default().capacity(), 1024);
    }
}
