//! Anti-cheat: live input validation and replay auditing

pub mod replay;
pub mod validator;

pub use replay::{
    Anomaly, AnomalyKind, ReplayConfig, ReplayError, ReplayMove, ReplaySubmission,
    ReplayValidator, ValidationResult,
};
pub use validator::{CheatViolation, InputValidator, ValidationConfig};
