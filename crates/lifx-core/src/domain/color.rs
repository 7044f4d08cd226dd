//! HSBK color: hue, saturation, brightness and color temperature.

use serde::{Deserialize, Serialize};

/// Size of an HSBK value on the wire, in bytes.
pub const COLOR_WIRE_SIZE: usize = 8;

/// A bulb color as transmitted on the wire.
///
/// All four channels use the full `u16` range: hue `0..=65535` maps onto
/// 0-360 degrees, saturation and brightness map onto 0-100 %.  `kelvin` is the
/// white point in degrees Kelvin (typically 2500-9000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

impl Color {
    pub const fn new(hue: u16, saturation: u16, brightness: u16, kelvin: u16) -> Self {
        Self {
            hue,
            saturation,
            brightness,
            kelvin,
        }
    }

    /// Appends the 8-byte little-endian HSBK encoding to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.hue.to_le_bytes());
        buf.extend_from_slice(&self.saturation.to_le_bytes());
        buf.extend_from_slice(&self.brightness.to_le_bytes());
        buf.extend_from_slice(&self.kelvin.to_le_bytes());
    }

    /// Reads an HSBK value from the first 8 bytes of `bytes`.
    ///
    /// Returns `None` when fewer than 8 bytes are available.
    pub fn read_from(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < COLOR_WIRE_SIZE {
            return None;
        }
        let word = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        Some(Self {
            hue: word(0),
            saturation: word(2),
            brightness: word(4),
            kelvin: word(6),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_wire_encoding_is_little_endian() {
        // Arrange
        let color = Color::new(0x0102, 0x0304, 0x0506, 0x0708);
        let mut buf = Vec::new();

        // Act
        color.write_to(&mut buf);

        // Assert
        assert_eq!(buf, vec![0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07]);
    }

    #[test]
    fn test_read_from_short_buffer_returns_none() {
        assert_eq!(Color::read_from(&[0u8; 7]), None);
    }

    #[test]
    fn test_read_from_ignores_trailing_bytes() {
        let bytes = [0xFF, 0xFF, 0x00, 0x00, 0x00, 0x80, 0xAC, 0x0D, 0x99];
        let color = Color::read_from(&bytes).expect("8 bytes available");
        assert_eq!(color, Color::new(u16::MAX, 0, 0x8000, 3500));
    }
}
