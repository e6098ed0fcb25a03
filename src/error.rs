//! # Errors
//!
//! The crate-wide error type.

use thiserror::Error;

/// Errors raised while building a simulation or handling its trajectory
/// stream. Stepping itself is infallible.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("world too small: {agents} agents need {required:.2} units of ground area but only {available:.2} are available")]
    WorldTooSmall {
        agents: usize,
        required: f64,
        available: f64,
    },
    #[error("scenario contains no agents")]
    EmptyScenario,
    #[error("i/o failed: {0}")]
    Recording(#[from] std::io::Error),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("malformed trajectory at line {line}: {reason}")]
    MalformedTrajectory { line: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SimulationError::InvalidConfig("time step must be positive");
        assert_eq!(
            err.to_string(),
            "invalid configuration: time step must be positive"
        );

        let err = SimulationError::WorldTooSmall {
            agents: 10,
            required: 4.0,
            available: 1.5,
        };
        assert!(err.to_string().contains("10 agents"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: SimulationError = io.into();
        assert!(matches!(err, SimulationError::Recording(_)));
    }
}
