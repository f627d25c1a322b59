use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    codec::WireFormat,
    error::DecodeError,
    types::{Information, Settings, Values},
};

/// Operation tags understood by the greenhouse firmware
///
/// Every frame starts with one of these ASCII bytes. Any other leading byte marks
/// the frame as unrecognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationType {
    /// Read the current sensor sample
    ReadValues = b'V',
    /// Read the device configuration
    ReadSettings = b'S',
    /// Read the per-channel error counters
    ReadInformation = b'I',
    /// Replace the device configuration
    SetSettings = b'W',
}

impl OperationType {
    /// Tag byte on the wire
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Convert from a tag byte
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            b'V' => Some(Self::ReadValues),
            b'S' => Some(Self::ReadSettings),
            b'I' => Some(Self::ReadInformation),
            b'W' => Some(Self::SetSettings),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadValues => "ReadValues",
            Self::ReadSettings => "ReadSettings",
            Self::ReadInformation => "ReadInformation",
            Self::SetSettings => "SetSettings",
        };
        write!(f, "{name} ('{}')", char::from(self.id()))
    }
}

/// A tagged frame: one operation byte followed by the operation's payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Operation tag
    pub operation: OperationType,
    /// Payload bytes following the tag
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from a tag and payload
    pub fn new(operation: OperationType, payload: impl Into<Bytes>) -> Self {
        Self {
            operation,
            payload: payload.into(),
        }
    }

    /// Create a frame with an empty payload, as used by the read requests
    #[must_use]
    pub const fn command(operation: OperationType) -> Self {
        Self {
            operation,
            payload: Bytes::new(),
        }
    }

    /// Create a `SetSettings` frame carrying the full encoded settings
    #[must_use]
    pub fn set_settings(settings: &Settings) -> Self {
        Self::new(OperationType::SetSettings, settings.encode())
    }

    /// Serialize the frame to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.payload.len());
        buf.put_u8(self.operation.id());
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Interpret the payload as [`Settings`]
    ///
    /// Both `ReadSettings` responses and `SetSettings` acknowledgements carry settings.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::WrongOperationType`] for any other tag, or
    /// [`DecodeError::TooFewBytes`] if the payload is short.
    pub fn as_settings(&self) -> Result<Settings, DecodeError> {
        match self.operation {
            OperationType::ReadSettings | OperationType::SetSettings => {
                Settings::decode(&self.payload)
            }
            actual => Err(DecodeError::WrongOperationType {
                expected: OperationType::ReadSettings,
                actual,
            }),
        }
    }

    /// Interpret the payload as [`Values`]
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::WrongOperationType`] unless tagged `ReadValues`, or
    /// [`DecodeError::TooFewBytes`] if the payload is short.
    pub fn as_values(&self) -> Result<Values, DecodeError> {
        self.check_operation(OperationType::ReadValues)?;
        Values::decode(&self.payload)
    }

    /// Interpret the payload as [`Information`]
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::WrongOperationType`] unless tagged `ReadInformation`, or
    /// [`DecodeError::TooFewBytes`] if the payload is short.
    pub fn as_information(&self) -> Result<Information, DecodeError> {
        self.check_operation(OperationType::ReadInformation)?;
        Information::decode(&self.payload)
    }

    fn check_operation(&self, expected: OperationType) -> Result<(), DecodeError> {
        if self.operation == expected {
            Ok(())
        } else {
            Err(DecodeError::WrongOperationType {
                expected,
                actual: self.operation,
            })
        }
    }
}

/// Result of parsing raw inbound bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// A frame with a recognized tag
    Frame(Frame),
    /// Empty input or an unrecognized tag byte
    Invalid,
}

impl Operation {
    /// Parse raw bytes into an operation
    ///
    /// Never fails: anything that does not start with a known tag is [`Operation::Invalid`].
    #[must_use]
    pub fn parse(data: &[u8]) -> Self {
        let Some((&tag, payload)) = data.split_first() else {
            return Self::Invalid;
        };

        OperationType::from_u8(tag).map_or(Self::Invalid, |operation| {
            Self::Frame(Frame::new(operation, Bytes::copy_from_slice(payload)))
        })
    }

    /// Operation tag, if recognized
    #[must_use]
    pub const fn operation_type(&self) -> Option<OperationType> {
        match self {
            Self::Frame(frame) => Some(frame.operation),
            Self::Invalid => None,
        }
    }
}

/// Outbound request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Ask for a sensor sample
    ReadValues,
    /// Ask for the current configuration
    ReadSettings,
    /// Ask for the error counters
    ReadInformation,
    /// Replace the configuration
    SetSettings(Settings),
}

impl Request {
    /// Operation tag of this request
    #[must_use]
    pub const fn operation_type(&self) -> OperationType {
        match self {
            Self::ReadValues => OperationType::ReadValues,
            Self::ReadSettings => OperationType::ReadSettings,
            Self::ReadInformation => OperationType::ReadInformation,
            Self::SetSettings(_) => OperationType::SetSettings,
        }
    }

    /// Build the frame for this request
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        match self {
            Self::SetSettings(settings) => Frame::set_settings(settings),
            other => Frame::command(other.operation_type()),
        }
    }

    /// Serialize the request to wire bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        self.to_frame().to_bytes()
    }
}

/// Inbound notification, demultiplexed by tag
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Sensor sample
    Values(Values),
    /// Device configuration
    Settings(Settings),
    /// Error counters
    Information(Information),
    /// `SetSettings` acknowledgement without a payload
    SettingsAcknowledged,
    /// Unrecognized frame, dropped by the session
    Invalid,
}

impl Response {
    /// Parse and decode an inbound notification
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::TooFewBytes`] when a recognized frame carries a
    /// payload shorter than its structure.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let frame = match Operation::parse(data) {
            Operation::Frame(frame) => frame,
            Operation::Invalid => return Ok(Self::Invalid),
        };

        match frame.operation {
            OperationType::ReadValues => frame.as_values().map(Self::Values),
            OperationType::ReadSettings => frame.as_settings().map(Self::Settings),
            OperationType::ReadInformation => frame.as_information().map(Self::Information),
            OperationType::SetSettings if frame.payload.is_empty() => {
                Ok(Self::SettingsAcknowledged)
            }
            OperationType::SetSettings => frame.as_settings().map(Self::Settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greenhouse_settings() -> Settings {
        Settings {
            expected_light_minutes: 120,
            min_light: 10.0,
            max_light: 90.0,
            min_humidity: 0.0,
            max_humidity: 100.0,
            min_soil_humidity: 0.0,
            max_soil_humidity: 100.0,
            min_temperature: 15.0,
            max_temperature: 35.0,
        }
    }

    #[test]
    fn test_operation_tags() {
        assert_eq!(OperationType::ReadValues.id(), 0x56);
        assert_eq!(OperationType::ReadSettings.id(), 0x53);
        assert_eq!(OperationType::ReadInformation.id(), 0x49);
        assert_eq!(OperationType::SetSettings.id(), 0x57);

        for byte in 0..=u8::MAX {
            let known = matches!(byte, b'V' | b'S' | b'I' | b'W');
            assert_eq!(OperationType::from_u8(byte).is_some(), known);
        }
    }

    #[test]
    fn test_read_request_serialization() {
        assert_eq!(Request::ReadValues.to_bytes().as_ref(), b"V");
        assert_eq!(Request::ReadSettings.to_bytes().as_ref(), b"S");
        assert_eq!(Request::ReadInformation.to_bytes().as_ref(), b"I");
    }

    #[test]
    fn test_set_settings_frame() {
        let settings = greenhouse_settings();
        let bytes = Request::SetSettings(settings).to_bytes();

        assert_eq!(bytes.len(), 35);
        assert_eq!(bytes[0], 0x57);
        assert_eq!(&bytes[1..], settings.encode().as_ref());
    }

    #[test]
    fn test_parse_keeps_tag() {
        for operation in [
            OperationType::ReadValues,
            OperationType::ReadSettings,
            OperationType::ReadInformation,
            OperationType::SetSettings,
        ] {
            let bytes = Frame::new(operation, vec![1u8, 2, 3]).to_bytes();
            let parsed = Operation::parse(&bytes);

            assert_eq!(parsed.operation_type(), Some(operation));
            if let Operation::Frame(frame) = parsed {
                assert_eq!(frame.payload.as_ref(), &[1, 2, 3]);
            }
        }
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(Operation::parse(&[]), Operation::Invalid);
        assert_eq!(Operation::parse(b"X"), Operation::Invalid);
        assert_eq!(Operation::parse(&[0x00, 1, 2, 3]), Operation::Invalid);
    }

    #[test]
    fn test_payload_accessors_check_tag() {
        let frame = Frame::new(OperationType::ReadValues, Values::default().encode());

        assert_eq!(
            frame.as_settings(),
            Err(DecodeError::WrongOperationType {
                expected: OperationType::ReadSettings,
                actual: OperationType::ReadValues,
            })
        );
        assert!(matches!(
            frame.as_information(),
            Err(DecodeError::WrongOperationType { .. })
        ));
        assert_eq!(frame.as_values(), Ok(Values::default()));
    }

    #[test]
    fn test_payload_accessors_check_length() {
        let frame = Frame::new(OperationType::ReadInformation, vec![0u8; 4]);
        assert_eq!(
            frame.as_information(),
            Err(DecodeError::TooFewBytes {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn test_response_demultiplexing() {
        let settings = greenhouse_settings();
        let values = Values::new(1.0, 2.0, 3.0, 4.0);
        let info = Information {
            light_errors: 3,
            ..Information::default()
        };

        let settings_frame = Frame::new(OperationType::ReadSettings, settings.encode());
        assert_eq!(
            Response::from_bytes(&settings_frame.to_bytes()),
            Ok(Response::Settings(settings))
        );

        let values_frame = Frame::new(OperationType::ReadValues, values.encode());
        assert_eq!(
            Response::from_bytes(&values_frame.to_bytes()),
            Ok(Response::Values(values))
        );

        let info_frame = Frame::new(OperationType::ReadInformation, info.encode());
        assert_eq!(
            Response::from_bytes(&info_frame.to_bytes()),
            Ok(Response::Information(info))
        );

        assert_eq!(
            Response::from_bytes(&Frame::set_settings(&settings).to_bytes()),
            Ok(Response::Settings(settings))
        );
        assert_eq!(
            Response::from_bytes(b"W"),
            Ok(Response::SettingsAcknowledged)
        );
        assert_eq!(Response::from_bytes(b"Zzz"), Ok(Response::Invalid));
        assert_eq!(Response::from_bytes(&[]), Ok(Response::Invalid));
    }

    #[test]
    fn test_response_short_payload() {
        assert_eq!(
            Response::from_bytes(b"V\x00\x00"),
            Err(DecodeError::TooFewBytes {
                expected: 16,
                actual: 2
            })
        );
    }
}
