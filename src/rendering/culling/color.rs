use std::fmt;
use std::str::FromStr;
use tracing::warn;

const COLOR_SPACE: u32 = 1 << 24;

/// Packed `0xRRGGBB` identity color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColorKey(u32);

impl ColorKey {
    /// Clear color of the visibility target; never assigned to an object
    pub const BACKGROUND: ColorKey = ColorKey(0);

    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self((r as u32) << 16 | (g as u32) << 8 | b as u32)
    }

    pub fn from_u32(value: u32) -> Self {
        Self(value & (COLOR_SPACE - 1))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn rgb(self) -> [u8; 3] {
        [(self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8]
    }

    pub fn is_background(self) -> bool {
        self == Self::BACKGROUND
    }

    /// Normalized RGBA for shaders; alpha is always 1
    pub fn to_rgba_f32(self) -> [f32; 4] {
        let [r, g, b] = self.rgb();
        [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, 1.0]
    }
}

impl fmt::Display for ColorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.rgb();
        write!(f, "{}-{}-{}", r, g, b)
    }
}

impl FromStr for ColorKey {
    type Err = String;

    /// Parses the canonical `"r-g-b"` form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-');
        let mut digit = || -> Result<u8, String> {
            parts
                .next()
                .ok_or_else(|| format!("missing component in color key '{}'", s))?
                .parse::<u8>()
                .map_err(|e| format!("invalid color key '{}': {}", s, e))
        };
        let (r, g, b) = (digit()?, digit()?, digit()?);
        if parts.next().is_some() {
            return Err(format!("too many components in color key '{}'", s));
        }
        Ok(Self::from_rgb(r, g, b))
    }
}

/// Hands out identity colors as a base-256 counter, b being the lowest digit.
///
/// Colors are unique as long as fewer than 2^24 - 1 have been handed out since
/// the last `reset`. Past that the counter wraps, skipping the background.
#[derive(Debug, Default)]
pub struct ColorAllocator {
    counter: u32,
    wraps: u32,
}

impl ColorAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> ColorKey {
        self.counter = (self.counter + 1) % COLOR_SPACE;
        if self.counter == 0 {
            self.wraps += 1;
            warn!("Color identity space exhausted, colors are being reused");
            self.counter = 1;
        }
        ColorKey(self.counter)
    }

    pub fn reset(&mut self) {
        self.counter = 0;
        self.wraps = 0;
    }

    /// Last color handed out, background if none
    pub fn current(&self) -> ColorKey {
        ColorKey(self.counter)
    }

    pub fn has_wrapped(&self) -> bool {
        self.wraps > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_allocations() {
        let mut colors = ColorAllocator::new();
        assert_eq!(colors.next().rgb(), [0, 0, 1]);
        assert_eq!(colors.next().rgb(), [0, 0, 2]);
    }

    #[test]
    fn test_b_digit_carries_into_g_then_r() {
        let mut colors = ColorAllocator::new();
        let keys: Vec<ColorKey> = (0..256).map(|_| colors.next()).collect();
        assert_eq!(keys[254].rgb(), [0, 0, 255]);
        assert_eq!(keys[255].rgb(), [0, 1, 0]);

        colors.counter = 0x00_ff_ff;
        assert_eq!(colors.next().rgb(), [1, 0, 0]);
    }

    #[test]
    fn test_wrap_skips_background() {
        let mut colors = ColorAllocator::new();
        colors.counter = COLOR_SPACE - 1;
        assert_eq!(colors.next(), ColorKey::from_rgb(0, 0, 1));
        assert!(colors.has_wrapped());

        colors.reset();
        assert_eq!(colors.current(), ColorKey::BACKGROUND);
        assert!(!colors.has_wrapped());
    }

    #[test]
    fn test_string_key() {
        let key = ColorKey::from_rgb(12, 0, 255);
        assert_eq!(key.to_string(), "12-0-255");
        assert_eq!(key.value(), 0x0c00ff);
        assert_eq!("12-0-255".parse::<ColorKey>().unwrap(), key);
        assert!("12-0".parse::<ColorKey>().is_err());
        assert!("1-2-3-4".parse::<ColorKey>().is_err());
        assert!("256-0-0".parse::<ColorKey>().is_err());
    }
}
