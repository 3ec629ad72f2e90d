use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReverbError {
    /// Room snapshot cannot produce a response (bad RT60, point outside the room).
    #[error("parameter error: {0}")]
    Parameter(String),

    /// Impulse-response synthesis failed for an otherwise valid snapshot.
    #[error("acoustic simulation error: {0}")]
    AcousticSimulation(String),

    /// Internal contract violation between block and response shapes.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Capture or playback failure. Ends the stream.
    #[error("device error: {0}")]
    Device(String),
}

impl ReverbError {
    /// Errors that only cost one tick; the loop replays the last output.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReverbError::Parameter(_) | ReverbError::AcousticSimulation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReverbError>;

/// Helper for `map_err` on the many cpal error types.
pub fn device_err<E: std::fmt::Display>(e: E) -> ReverbError {
    ReverbError::Device(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ReverbError::Parameter("rt60".into()).is_transient());
        assert!(ReverbError::AcousticSimulation("alpha".into()).is_transient());
        assert!(!ReverbError::DimensionMismatch("empty".into()).is_transient());
        assert!(!ReverbError::Device("gone".into()).is_transient());
    }

    #[test]
    fn display_carries_message() {
        let e = device_err("stream closed");
        assert_eq!(e.to_string(), "device error: stream closed");
    }
}
