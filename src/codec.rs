use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    error::DecodeError,
    types::{Information, Settings, Values},
};

/// A structure with a fixed little-endian wire layout
///
/// Layouts, in declaration order:
/// - [`Settings`]: `i16` expected light minutes followed by eight `f32` bounds
///   (light, humidity, soil humidity, temperature; min then max), 34 bytes
/// - [`Values`]: four `f32` readings (light, humidity, soil humidity, temperature), 16 bytes
/// - [`Information`]: four `i16` error counters in the same channel order, 8 bytes
///
/// Nothing is validated beyond length: a non-finite float is carried as-is.
pub trait WireFormat: Sized {
    /// Exact encoded size in bytes
    const WIRE_SIZE: usize;

    /// Append the encoded structure to `buf`
    fn encode_into(&self, buf: &mut BytesMut);

    /// Read the structure from the front of `buf`
    ///
    /// Callers guarantee `buf` holds at least [`Self::WIRE_SIZE`] bytes.
    fn decode_from(buf: &mut &[u8]) -> Self;

    /// Encode to exactly [`Self::WIRE_SIZE`] bytes
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_SIZE);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode from a buffer, ignoring anything past the fixed size
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::TooFewBytes`] if `data` is shorter than [`Self::WIRE_SIZE`].
    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < Self::WIRE_SIZE {
            return Err(DecodeError::TooFewBytes {
                expected: Self::WIRE_SIZE,
                actual: data.len(),
            });
        }

        let mut buf = data;
        Ok(Self::decode_from(&mut buf))
    }
}

impl WireFormat for Settings {
    const WIRE_SIZE: usize = 2 + 8 * 4;

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_i16_le(self.expected_light_minutes);
        buf.put_f32_le(self.min_light);
        buf.put_f32_le(self.max_light);
        buf.put_f32_le(self.min_humidity);
        buf.put_f32_le(self.max_humidity);
        buf.put_f32_le(self.min_soil_humidity);
        buf.put_f32_le(self.max_soil_humidity);
        buf.put_f32_le(self.min_temperature);
        buf.put_f32_le(self.max_temperature);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        Self {
            expected_light_minutes: buf.get_i16_le(),
            min_light: buf.get_f32_le(),
            max_light: buf.get_f32_le(),
            min_humidity: buf.get_f32_le(),
            max_humidity: buf.get_f32_le(),
            min_soil_humidity: buf.get_f32_le(),
            max_soil_humidity: buf.get_f32_le(),
            min_temperature: buf.get_f32_le(),
            max_temperature: buf.get_f32_le(),
        }
    }
}

impl WireFormat for Values {
    const WIRE_SIZE: usize = 4 * 4;

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_f32_le(self.light);
        buf.put_f32_le(self.humidity);
        buf.put_f32_le(self.soil_humidity);
        buf.put_f32_le(self.temperature);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        Self {
            light: buf.get_f32_le(),
            humidity: buf.get_f32_le(),
            soil_humidity: buf.get_f32_le(),
            temperature: buf.get_f32_le(),
        }
    }
}

impl WireFormat for Information {
    const WIRE_SIZE: usize = 4 * 2;

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_i16_le(self.light_errors);
        buf.put_i16_le(self.humidity_errors);
        buf.put_i16_le(self.soil_humidity_errors);
        buf.put_i16_le(self.temperature_errors);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        Self {
            light_errors: buf.get_i16_le(),
            humidity_errors: buf.get_i16_le(),
            soil_humidity_errors: buf.get_i16_le(),
            temperature_errors: buf.get_i16_le(),
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
    fn test_settings_layout() {
        let settings = greenhouse_settings();
        let bytes = settings.encode();

        assert_eq!(bytes.len(), 34);
        assert_eq!(&bytes[0..2], &120i16.to_le_bytes());
        assert_eq!(&bytes[2..6], &10.0f32.to_le_bytes());
        assert_eq!(&bytes[6..10], &90.0f32.to_le_bytes());
        assert_eq!(&bytes[26..30], &15.0f32.to_le_bytes());
        assert_eq!(&bytes[30..34], &35.0f32.to_le_bytes());

        assert_eq!(Settings::decode(&bytes), Ok(settings));
    }

    #[test]
    fn test_values_layout() {
        let values = Values::new(512.5, 61.0, 33.25, 22.5);
        let bytes = values.encode();

        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[12..16], &22.5f32.to_le_bytes());
        assert_eq!(Values::decode(&bytes), Ok(values));
    }

    #[test]
    fn test_values_keep_non_finite_readings() {
        let values = Values::new(f32::NAN, 1.0, f32::INFINITY, 2.0);
        let decoded = Values::decode(&values.encode()).unwrap();

        assert!(decoded.light.is_nan());
        assert!(decoded.soil_humidity.is_infinite());
        assert!((decoded.temperature - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_information_layout() {
        let info = Information {
            light_errors: 1,
            humidity_errors: -2,
            soil_humidity_errors: 300,
            temperature_errors: 0,
        };
        let bytes = info.encode();

        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[4..6], &300i16.to_le_bytes());
        assert_eq!(Information::decode(&bytes), Ok(info));
    }

    #[test]
    fn test_decode_too_few_bytes() {
        let bytes = greenhouse_settings().encode();

        assert_eq!(
            Settings::decode(&bytes[..33]),
            Err(DecodeError::TooFewBytes {
                expected: 34,
                actual: 33
            })
        );
        assert_eq!(
            Values::decode(&[]),
            Err(DecodeError::TooFewBytes {
                expected: 16,
                actual: 0
            })
        );
        assert!(Information::decode(&[0; 7]).is_err());
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = BytesMut::new();
        Values::new(1.0, 2.0, 3.0, 4.0).encode_into(&mut bytes);
        bytes.put_slice(&[0xFF; 5]);

        let values = Values::decode(&bytes).unwrap();
        assert_eq!(values, Values::new(1.0, 2.0, 3.0, 4.0));
    }
}
