//! Control-plane messages (reliable channel)
//!
//! The per-tick state stream uses the fixed binary layouts in `packets`; the
//! low-rate messages here go through serde + bincode.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "anticheat")]
use crate::anticheat::replay::{ReplaySubmission, ValidationResult};
use crate::game::entity::EntityHandle;
use crate::util::vec2::Vec2;

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Player input for one tick
    Input(InputCommand),
    /// Ping for latency measurement
    Ping { timestamp: u64 },
    /// Acknowledge receiving a snapshot
    SnapshotAck { tick: u64 },
    /// Recorded puzzle session for server-side audit
    #[cfg(feature = "anticheat")]
    SubmitReplay(ReplaySubmission),
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Session accepted; the client controls `entity`
    Welcome {
        session_id: Uuid,
        entity: EntityHandle,
        tick: u64,
    },
    /// Authoritative state of the client's own entity after processing
    /// every input up to and including `sequence`
    InputAck {
        sequence: u32,
        tick: u64,
        position: Vec2,
        velocity: Vec2,
    },
    /// Pong response with server timestamp
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
    /// Outcome of a replay audit
    #[cfg(feature = "anticheat")]
    ReplayVerdict(ValidationResult),
    /// Server is dropping the client
    Kicked { reason: String },
}

/// One tick of player input
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    /// Monotonic per-client sequence (for reconciliation)
    pub sequence: u32,
    /// Server tick this input was produced for
    pub tick: u64,
    /// World-space steering target
    pub target: Vec2,
    /// `schema::actions` bitmask
    pub actions: u32,
}

impl InputCommand {
    pub fn new(sequence: u32, tick: u64, target: Vec2, actions: u32) -> Self {
        Self {
            sequence,
            tick,
            target,
            actions,
        }
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_input() {
        let input = InputCommand::new(42, 100, Vec2::new(0.5, -0.3), 3);
        let encoded = encode(&ClientMessage::Input(input)).unwrap();
        let decoded: ClientMessage = decode(&encoded).unwrap();
        match decoded {
            ClientMessage::Input(i) => assert_eq!(i, input),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_server_message_welcome() {
        let session_id = Uuid::new_v4();
        let msg = ServerMessage::Welcome {
            session_id,
            entity: EntityHandle::new(7, 2),
            tick: 99,
        };
        let decoded: ServerMessage = decode(&encode(&msg).unwrap()).unwrap();
        match decoded {
            ServerMessage::Welcome {
                session_id: sid,
                entity,
                tick,
            } => {
                assert_eq!(sid, session_id);
                assert_eq!(entity, EntityHandle::new(7, 2));
                assert_eq!(tick, 99);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_input_ack() {
        let msg = ServerMessage::InputAck {
            sequence: 5,
            tick: 12,
            position: Vec2::new(1.0, 2.0),
            velocity: Vec2::new(-3.0, 0.0),
        };
        let decoded: ServerMessage = decode(&encode(&msg).unwrap()).unwrap();
        assert!(matches!(
            decoded,
            ServerMessage::InputAck { sequence: 5, tick: 12, .. }
        ));
    }

    #[cfg(feature = "anticheat")]
    #[test]
    fn test_replay_submission_message() {
        use crate::anticheat::replay::ReplayMove;

        let submission = ReplaySubmission {
            session_id: Uuid::nil(),
            seed: 12345,
            width: 5,
            height: 5,
            moves: vec![ReplayMove::new(0, (0, 0), (1, 0))],
            claimed_score: 300,
            claimed_checksum: 0xdead_beef,
        };
        let encoded = encode(&ClientMessage::SubmitReplay(submission.clone())).unwrap();
        match decode::<ClientMessage>(&encoded).unwrap() {
            ClientMessage::SubmitReplay(s) => assert_eq!(s, submission),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_invalid_decode() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        let result: Result<ClientMessage, _> = decode(&garbage);
        assert!(result.is_err());
    }
}
