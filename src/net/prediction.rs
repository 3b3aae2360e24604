//! Client-side prediction and reconciliation for the locally controlled
//! entity
//!
//! The predictor mirrors the World step for one entity instead of mutating a
//! World: it keeps its own `Kinematics` and advances them with the same
//! `steer` function `movement::update` runs on the server, so the results
//! agree bit for bit. Local inputs are applied immediately. When the server acknowledges a sequence, older inputs are
//! dropped and the rest are replayed on top of the authoritative state.
//! Small corrections are hidden behind a decaying visual offset; large ones
//! snap.

use std::collections::VecDeque;

use crate::config::SimConfig;
use crate::game::constants::net::{CORRECTION_DECAY, INPUT_HISTORY, SNAP_THRESHOLD};
use crate::game::systems::movement::{steer, Kinematics, SteerParams};
use crate::net::protocol::{InputCommand, ServerMessage};
use crate::util::vec2::Vec2;

/// Below this divergence a correction is not worth reporting
const CORRECTION_EPSILON: f32 = 1e-3;

/// Inputs sent but not yet acknowledged, oldest first
#[derive(Debug)]
pub struct PendingInputs {
    inputs: VecDeque<InputCommand>,
    capacity: usize,
}

impl PendingInputs {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inputs: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append; the oldest input is dropped when full
    pub fn push(&mut self, input: InputCommand) {
        if self.inputs.len() == self.capacity {
            self.inputs.pop_front();
        }
        self.inputs.push_back(input);
    }

    /// Drop every input with sequence <= `sequence`
    pub fn acknowledge(&mut self, sequence: u32) -> usize {
        let before = self.inputs.len();
        while self.inputs.front().is_some_and(|i| i.sequence <= sequence) {
            self.inputs.pop_front();
        }
        before - self.inputs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputCommand> {
        self.inputs.iter()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
    }
}

impl Default for PendingInputs {
    fn default() -> Self {
        Self::new(INPUT_HISTORY)
    }
}

/// Outcome of one reconciliation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Prediction matched, or the ack was stale
    None,
    /// Divergence under the threshold; hidden by the visual offset
    Blend(f32),
    /// Divergence over the threshold; state replaced outright
    Snap(f32),
}

pub struct ClientPredictor {
    state: Kinematics,
    params: SteerParams,
    dt: f32,
    pending: PendingInputs,
    next_sequence: u32,
    last_ack: Option<u32>,
    visual_offset: Vec2,
    snap_threshold: f32,
    correction_decay: f32,
}

impl ClientPredictor {
    pub fn new(position: Vec2, params: SteerParams, dt: f32) -> Self {
        Self {
            state: Kinematics {
                position,
                velocity: Vec2::ZERO,
            },
            params,
            dt,
            pending: PendingInputs::default(),
            next_sequence: 1,
            last_ack: None,
            visual_offset: Vec2::ZERO,
            snap_threshold: SNAP_THRESHOLD,
            correction_decay: CORRECTION_DECAY,
        }
    }

    pub fn with_snap_threshold(mut self, threshold: f32) -> Self {
        self.snap_threshold = threshold;
        self
    }

    /// Predictor for an entity in a room running `config`
    pub fn for_room(config: &SimConfig, position: Vec2, params: SteerParams) -> Self {
        Self::new(position, params, config.dt()).with_snap_threshold(config.snap_threshold)
    }

    pub fn state(&self) -> Kinematics {
        self.state
    }

    pub fn pending(&self) -> &PendingInputs {
        &self.pending
    }

    pub fn last_ack(&self) -> Option<u32> {
        self.last_ack
    }

    pub fn visual_offset(&self) -> Vec2 {
        self.visual_offset
    }

    /// Status effects change how steering behaves; keep them in sync with
    /// the server's view
    pub fn set_params(&mut self, params: SteerParams) {
        self.params = params;
    }

    /// Predict one tick of local input. Returns the command to send.
    pub fn apply_local_input(&mut self, tick: u64, target: Vec2, actions: u32) -> InputCommand {
        let cmd = InputCommand::new(self.next_sequence, tick, target, actions);
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.state = steer(self.state, target, actions, &self.params, self.dt);
        self.pending.push(cmd);
        cmd
    }

    /// Correct the prediction with the authoritative state after `sequence`
    pub fn reconcile(&mut self, sequence: u32, position: Vec2, velocity: Vec2) -> Correction {
        if self.last_ack.is_some_and(|last| sequence < last) {
            return Correction::None;
        }
        self.last_ack = Some(sequence);
        self.pending.acknowledge(sequence);

        let mut replayed = Kinematics { position, velocity };
        for cmd in self.pending.iter() {
            replayed = steer(replayed, cmd.target, cmd.actions, &self.params, self.dt);
        }

        let predicted = self.state.position;
        let error = (predicted - replayed.position).length();
        self.state = replayed;

        if error <= CORRECTION_EPSILON {
            Correction::None
        } else if error > self.snap_threshold {
            self.visual_offset = Vec2::ZERO;
            Correction::Snap(error)
        } else {
            // Keep the rendered position where it was and let it settle
            self.visual_offset += predicted - replayed.position;
            Correction::Blend(error)
        }
    }

    /// Feed a control-plane message; only `InputAck` matters here
    pub fn on_server_message(&mut self, msg: &ServerMessage) -> Option<Correction> {
        match *msg {
            ServerMessage::InputAck {
                sequence,
                position,
                velocity,
                ..
            } => Some(self.reconcile(sequence, position, velocity)),
            _ => None,
        }
    }

    /// Decay the visual offset by one render frame
    pub fn update_visual(&mut self, frame_dt: f32) {
        let keep = (-self.correction_decay * frame_dt.max(0.0)).exp();
        self.visual_offset = self.visual_offset * keep;
        if self.visual_offset.length_sq() < CORRECTION_EPSILON * CORRECTION_EPSILON {
            self.visual_offset = Vec2::ZERO;
        }
    }

    /// Where to draw the local entity this frame
    pub fn render_position(&self) -> Vec2 {
        self.state.position + self.visual_offset
    }
}
