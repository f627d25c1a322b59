use thiserror::Error;

use crate::protocol::OperationType;

/// Errors raised while turning wire bytes back into typed structures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer is shorter than the structure's fixed wire size
    #[error("Too few bytes: got {actual}, expected at least {expected}")]
    TooFewBytes {
        /// Fixed wire size of the target structure
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// The frame's tag does not carry the requested structure
    #[error("Wrong operation type: expected {expected}, frame is tagged {actual}")]
    WrongOperationType {
        /// Operation the caller asked to interpret the payload as
        expected: OperationType,
        /// Operation the frame is actually tagged with
        actual: OperationType,
    },
}

/// Errors that can occur when talking to a greenhouse monitor
#[derive(Error, Debug)]
pub enum GreenhouseError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Device not found on any adapter
    #[error("Greenhouse device not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// The link to the device was lost
    #[error("Device disconnected")]
    Disconnected,

    /// A request was issued while no session is connected
    #[error("Not connected to a device")]
    NotConnected,

    /// Platform operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Invalid request parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A recognized frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Result type for greenhouse operations
pub type Result<T> = std::result::Result<T, GreenhouseError>;

impl GreenhouseError {
    /// Check if this error indicates the link to the device is gone
    ///
    /// The session turns these into a transition to
    /// [`ConnectionState::Disconnected`](crate::ConnectionState::Disconnected)
    /// instead of surfacing them as faults.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::ConnectionFailed(_)
                | Self::Disconnected
                | Self::DeviceNotFound
                | Self::Timeout { .. }
        )
    }

    /// Check if retrying the same call later may succeed
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::NotConnected | Self::Disconnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = GreenhouseError::ConnectionFailed("test".to_string());
        assert!(connection_error.is_connection_error());
        assert!(!connection_error.is_recoverable());

        let timeout_error = GreenhouseError::Timeout { timeout_ms: 5000 };
        assert!(timeout_error.is_connection_error());
        assert!(timeout_error.is_recoverable());

        let not_connected = GreenhouseError::NotConnected;
        assert!(!not_connected.is_connection_error());
        assert!(not_connected.is_recoverable());

        let decode = GreenhouseError::from(DecodeError::TooFewBytes {
            expected: 34,
            actual: 3,
        });
        assert!(!decode.is_connection_error());
        assert!(!decode.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = GreenhouseError::InvalidParameters("min_light above max_light".to_string());
        let error_string = format!("{error}");
        assert!(error_string.contains("Invalid parameters"));
        assert!(error_string.contains("min_light above max_light"));

        let error = DecodeError::WrongOperationType {
            expected: OperationType::ReadSettings,
            actual: OperationType::ReadValues,
        };
        let error_string = format!("{error}");
        assert!(error_string.contains("ReadSettings"));
        assert!(error_string.contains("ReadValues"));
    }
}
