use crate::game::schema::actions;
use crate::net::protocol::InputCommand;
use crate::util::vec2::Vec2;

/// Violations detected by live input validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheatViolation {
    #[error("NaN or Infinity in input target")]
    InvalidFloats,
    #[error("Target outside world: ({0}, {1})")]
    TargetOutOfBounds(f32, f32),
    #[error("Unknown action bits: {0:#x}")]
    UnknownActions(u32),
    #[error("Input from future tick: client={0}, server={1}")]
    FutureInput(u64, u64),
    #[error("Input too stale: client={0}, server={1}, max_delay={2}")]
    StaleInput(u64, u64, u64),
    #[error("Sequence number went backwards: prev={0}, current={1}")]
    SequenceRegression(u32, u32),
    #[error("Sequence jumped too far: prev={0}, current={1}")]
    SequenceJump(u32, u32),
}

/// Configuration for input validation
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Side length of the world; targets may overshoot by `target_margin`
    pub world_size: f32,
    pub target_margin: f32,
    /// Maximum ticks ahead of server time
    pub max_future_ticks: u64,
    /// Maximum ticks behind server time (plus RTT compensation)
    pub max_stale_ticks: u64,
    /// Maximum sequence jump allowed
    pub max_sequence_jump: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            world_size: crate::game::constants::world::SIZE,
            target_margin: 200.0,
            max_future_ticks: 2,
            max_stale_ticks: 60, // 1 second at 60 Hz
            max_sequence_jump: 120,
        }
    }
}

/// Input validator for anti-cheat
#[derive(Debug, Clone, Default)]
pub struct InputValidator {
    config: ValidationConfig,
}

impl InputValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate the payload of one input command
    pub fn validate_input(&self, input: &InputCommand) -> Result<(), CheatViolation> {
        self.validate_target(&input.target)?;
        if input.actions & !actions::ALL != 0 {
            return Err(CheatViolation::UnknownActions(input.actions & !actions::ALL));
        }
        Ok(())
    }

    /// Validate input timing against server state
    pub fn validate_timing(
        &self,
        input_tick: u64,
        server_tick: u64,
        rtt_ticks: u64,
    ) -> Result<(), CheatViolation> {
        if input_tick > server_tick + self.config.max_future_ticks {
            return Err(CheatViolation::FutureInput(input_tick, server_tick));
        }

        let max_delay = rtt_ticks + self.config.max_stale_ticks;
        if server_tick > input_tick + max_delay {
            return Err(CheatViolation::StaleInput(input_tick, server_tick, max_delay));
        }

        Ok(())
    }

    /// Validate sequence number progression
    pub fn validate_sequence(&self, prev: u32, current: u32) -> Result<(), CheatViolation> {
        if current < prev {
            return Err(CheatViolation::SequenceRegression(prev, current));
        }
        if current - prev > self.config.max_sequence_jump {
            return Err(CheatViolation::SequenceJump(prev, current));
        }
        Ok(())
    }

    fn validate_target(&self, target: &Vec2) -> Result<(), CheatViolation> {
        if !target.is_finite() {
            return Err(CheatViolation::InvalidFloats);
        }
        let lo = -self.config.target_margin;
        let hi = self.config.world_size + self.config.target_margin;
        if target.x < lo || target.x > hi || target.y < lo || target.y > hi {
            return Err(CheatViolation::TargetOutOfBounds(target.x, target.y));
        }
        Ok(())
    }
}

/// Clamp an input into the valid range after validation
pub fn sanitize_input(input: &mut InputCommand, world_size: f32) {
    if !input.target.is_finite() {
        input.target = Vec2::ZERO;
    }
    input.target.x = input.target.x.clamp(0.0, world_size);
    input.target.y = input.target.y.clamp(0.0, world_size);
    input.actions &= actions::ALL;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_input() -> InputCommand {
        InputCommand::new(1, 100, Vec2::new(500.0, 500.0), actions::BOOST)
    }

    #[test]
    fn test_valid_input() {
        let validator = InputValidator::default();
        assert!(validator.validate_input(&valid_input()).is_ok());
    }

    #[test]
    fn test_nan_target() {
        let validator = InputValidator::default();
        let mut input = valid_input();
        input.target = Vec2::new(f32::NAN, 0.0);
        assert_eq!(
            validator.validate_input(&input),
            Err(CheatViolation::InvalidFloats)
        );
    }

    #[test]
    fn test_target_far_outside_world() {
        let validator = InputValidator::default();
        let mut input = valid_input();
        input.target = Vec2::new(-5000.0, 10.0);
        assert!(matches!(
            validator.validate_input(&input),
            Err(CheatViolation::TargetOutOfBounds(..))
        ));

        // Slight overshoot (mouse past the edge) is fine
        input.target = Vec2::new(-10.0, 10.0);
        assert!(validator.validate_input(&input).is_ok());
    }

    #[test]
    fn test_unknown_action_bits() {
        let validator = InputValidator::default();
        let mut input = valid_input();
        input.actions = actions::FIRE | 0x80;
        assert_eq!(
            validator.validate_input(&input),
            Err(CheatViolation::UnknownActions(0x80))
        );
    }

    #[test]
    fn test_timing() {
        let validator = InputValidator::default();
        assert!(validator.validate_timing(100, 100, 0).is_ok());
        assert!(validator.validate_timing(102, 100, 0).is_ok());
        assert!(matches!(
            validator.validate_timing(110, 100, 0),
            Err(CheatViolation::FutureInput(110, 100))
        ));
        assert!(matches!(
            validator.validate_timing(10, 100, 0),
            Err(CheatViolation::StaleInput(..))
        ));
        // RTT widens the stale window
        assert!(validator.validate_timing(10, 100, 40).is_ok());
    }

    #[test]
    fn test_sequence() {
        let validator = InputValidator::default();
        assert!(validator.validate_sequence(10, 11).is_ok());
        assert!(validator.validate_sequence(10, 10).is_ok());
        assert_eq!(
            validator.validate_sequence(10, 5),
            Err(CheatViolation::SequenceRegression(10, 5))
        );
        assert_eq!(
            validator.validate_sequence(10, 500),
            Err(CheatViolation::SequenceJump(10, 500))
        );
    }

    #[test]
    fn test_sanitize_input() {
        let mut input = valid_input();
        input.target = Vec2::new(-10.0, 9000.0);
        input.actions = 0xFF;
        sanitize_input(&mut input, 4000.0);
        assert_eq!(input.target, Vec2::new(0.0, 4000.0));
        assert_eq!(input.actions, actions::ALL);

        input.target = Vec2::new(f32::INFINITY, 1.0);
        sanitize_input(&mut input, 4000.0);
        assert_eq!(input.target, Vec2::ZERO);
    }
}
