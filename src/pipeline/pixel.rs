/// 8-bit per channel color, the canonical pixel representation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const RED: Rgb = Rgb::new(255, 0, 0);
    pub const GREEN: Rgb = Rgb::new(0, 255, 0);
    pub const YELLOW: Rgb = Rgb::new(255, 255, 0);
    pub const BLUE: Rgb = Rgb::new(0, 128, 255);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Widen a 5-6-5 packed value by shifting, no lookup table.
///
/// Low bits stay zero, so full red is 248, not 255.
pub const fn rgb565_to_rgb(value: u16) -> Rgb {
    Rgb {
        r: (((value >> 11) & 0x1F) << 3) as u8,
        g: (((value >> 5) & 0x3F) << 2) as u8,
        b: ((value & 0x1F) << 3) as u8,
    }
}

/// Layout of pixel bytes in a buffer, row-major.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    /// Output of the on-device decoder.
    Rgb565Le,
    /// Compact format of the bridge service.
    Rgb565Be,
    Rgb888,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565Le | PixelFormat::Rgb565Be => 2,
            PixelFormat::Rgb888 => 3,
        }
    }

    /// Pixel number `index`, or `None` past the end of `buffer`.
    pub fn pixel_at(self, buffer: &[u8], index: usize) -> Option<Rgb> {
        let start = index.checked_mul(self.bytes_per_pixel())?;
        let end = start.checked_add(self.bytes_per_pixel())?;
        let bytes = buffer.get(start..end)?;

        Some(match self {
            PixelFormat::Rgb565Le => rgb565_to_rgb(u16::from_le_bytes([bytes[0], bytes[1]])),
            PixelFormat::Rgb565Be => rgb565_to_rgb(u16::from_be_bytes([bytes[0], bytes[1]])),
            PixelFormat::Rgb888 => Rgb::new(bytes[0], bytes[1], bytes[2]),
        })
    }

    /// Interpret an `X-Pixel-Format` header value.
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RGB565" | "RGB565BE" => Some(PixelFormat::Rgb565Be),
            "RGB565LE" => Some(PixelFormat::Rgb565Le),
            "RGB" | "RGB888" => Some(PixelFormat::Rgb888),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primaries_unpack_by_bit_shift() {
        // full channels widen to 248/252 because the low bits are not replicated
        assert_eq!(rgb565_to_rgb(0xF800), Rgb::new(248, 0, 0));
        assert_eq!(rgb565_to_rgb(0x07E0), Rgb::new(0, 252, 0));
        assert_eq!(rgb565_to_rgb(0x001F), Rgb::new(0, 0, 248));
        assert_eq!(rgb565_to_rgb(0xFFFF), Rgb::new(248, 252, 248));
        assert_eq!(rgb565_to_rgb(0x0000), Rgb::BLACK);
    }

    #[test]
    fn every_value_matches_the_shift_formula() {
        for value in 0..=u16::MAX {
            let rgb = rgb565_to_rgb(value);
            let r5 = value >> 11;
            let g6 = (value >> 5) & 0x3F;
            let b5 = value & 0x1F;

            assert_eq!(u16::from(rgb.r), r5 << 3);
            assert_eq!(u16::from(rgb.g), g6 << 2);
            assert_eq!(u16::from(rgb.b), b5 << 3);
        }
    }

    #[test]
    fn byte_order_matters() {
        let buffer = [0x00, 0xF8];
        assert_eq!(PixelFormat::Rgb565Le.pixel_at(&buffer, 0), Some(rgb565_to_rgb(0xF800)));
        assert_eq!(PixelFormat::Rgb565Be.pixel_at(&buffer, 0), Some(rgb565_to_rgb(0x00F8)));
    }

    #[test]
    fn reads_past_the_end_return_none() {
        let buffer = [1, 2, 3, 4, 5];
        assert_eq!(PixelFormat::Rgb888.pixel_at(&buffer, 0), Some(Rgb::new(1, 2, 3)));
        assert_eq!(PixelFormat::Rgb888.pixel_at(&buffer, 1), None);
        assert_eq!(PixelFormat::Rgb565Le.pixel_at(&buffer, 2), None);
        assert_eq!(PixelFormat::Rgb565Le.pixel_at(&buffer, usize::MAX), None);
    }

    #[test]
    fn header_names() {
        assert_eq!(PixelFormat::from_header("rgb565"), Some(PixelFormat::Rgb565Be));
        assert_eq!(PixelFormat::from_header("RGB"), Some(PixelFormat::Rgb888));
        assert_eq!(PixelFormat::from_header("yuv"), None);
    }
}
