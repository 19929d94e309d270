//! Hex color parsing for tint values.
//!
//! Accepts `#rrggbb` and shorthand `#rgb` (case-insensitive, `#` optional).
//! Invalid input falls back to white — a tint the caller typed wrong should
//! neutralise the overlay, not fail the render.

use crate::types::TintColor;

fn normalize_hex(hex: &str) -> Option<[u8; 3]> {
    let trimmed = hex.trim().trim_start_matches('#');
    let expanded: Vec<u8> = match trimmed.len() {
        3 => trimmed
            .bytes()
            .flat_map(|byte| [byte, byte])
            .collect(),
        6 => trimmed.bytes().collect(),
        _ => return None,
    };
    if !expanded.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let channel = |index: usize| {
        let pair = std::str::from_utf8(&expanded[index * 2..index * 2 + 2]).ok()?;
        u8::from_str_radix(pair, 16).ok()
    };
    Some([channel(0)?, channel(1)?, channel(2)?])
}

impl TintColor {
    /// Parses a hex color string, or `None` when it is not one.
    pub fn try_from_hex(hex: &str) -> Option<Self> {
        normalize_hex(hex).map(|[red, green, blue]| Self {
            red: red as f32 / 255.0,
            green: green as f32 / 255.0,
            blue: blue as f32 / 255.0,
        })
    }

    /// Parses a hex color string, falling back to white on invalid input.
    pub fn from_hex(hex: &str) -> Self {
        Self::try_from_hex(hex).unwrap_or(Self::WHITE)
    }

    /// Renders the color as `#rrggbbaa` with the alpha clamped to `[0, 1]`.
    pub fn to_hex_with_alpha(&self, alpha: f32) -> String {
        let clamped = self.clamped();
        let byte = |channel: f32| (channel * 255.0).round() as u8;
        format!(
            "#{:02x}{:02x}{:02x}{:02x}",
            byte(clamped.red),
            byte(clamped.green),
            byte(clamped.blue),
            byte(alpha.clamp(0.0, 1.0)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_hex_to_normalized_rgb() {
        let color = TintColor::from_hex("#cd7f32");
        assert_eq!(color.red, 205.0 / 255.0);
        assert_eq!(color.green, 127.0 / 255.0);
        assert_eq!(color.blue, 50.0 / 255.0);
    }

    #[test]
    fn expands_shorthand_hex() {
        let color = TintColor::from_hex("#abc");
        assert_eq!(color.red, 0xaa as f32 / 255.0);
        assert_eq!(color.green, 0xbb as f32 / 255.0);
        assert_eq!(color.blue, 0xcc as f32 / 255.0);
    }

    #[test]
    fn accepts_uppercase_and_missing_hash() {
        assert_eq!(TintColor::from_hex("CD7F32"), TintColor::from_hex("#cd7f32"));
    }

    #[test]
    fn falls_back_to_white_on_invalid_input() {
        assert_eq!(TintColor::from_hex("not-a-color"), TintColor::WHITE);
        assert_eq!(TintColor::from_hex("#12345"), TintColor::WHITE);
        assert_eq!(TintColor::from_hex(""), TintColor::WHITE);
    }

    #[test]
    fn renders_hex_with_alpha() {
        let color = TintColor::from_hex("#cd7f32");
        assert_eq!(color.to_hex_with_alpha(0.5), "#cd7f3280");
        assert_eq!(color.to_hex_with_alpha(2.0), "#cd7f32ff");
    }
}
