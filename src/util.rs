use anyhow::anyhow;
use embedded_graphics::pixelcolor::Rgb888;
use std::{fmt::Display, str::FromStr};

/// 24-bit Red-Green-Blue color. Parses from and prints as HTML format
/// (#rrggbb), which is how colors are written in the environment.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const BLACK: Self = Self::new(0, 0, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

/// Unpack `0xrrggbb`. The top byte is ignored.
impl From<u32> for Color {
    fn from(value: u32) -> Self {
        let red = (value >> 16) as u8;
        let green = (value >> 8) as u8;
        let blue = value as u8;
        Self { red, green, blue }
    }
}

impl From<Color> for Rgb888 {
    fn from(color: Color) -> Self {
        Rgb888::new(color.red, color.green, color.blue)
    }
}

impl FromStr for Color {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('#') {
            Some(hex)
                if hex.len() == 6
                    && hex.chars().all(|c| c.is_ascii_hexdigit()) =>
            {
                let value = u32::from_str_radix(hex, 16)?;
                Ok(value.into())
            }
            _ => Err(anyhow!("Invalid color string: {s}")),
        }
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:0>2x}{:0>2x}{:0>2x}", self.red, self.green, self.blue)
    }
}

/// Shorten a response body so it can be stuck in an error message without
/// flooding the terminal
pub fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        // Back up to a char boundary so we don't slice a code point in half
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color() {
        assert_eq!(
            "#3a7bd5".parse::<Color>().unwrap(),
            Color::new(0x3a, 0x7b, 0xd5)
        );
        assert_eq!("#3A7BD5".parse::<Color>().unwrap().to_string(), "#3a7bd5");
        assert!("3a7bd5".parse::<Color>().is_err());
        assert!("#3a7bd".parse::<Color>().is_err());
        assert!("#3a7bzz".parse::<Color>().is_err());
        // Sign characters sneak past from_str_radix
        assert!("#+3a7bd".parse::<Color>().is_err());
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");
        let long = "é".repeat(150);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.len(), 200 + 3);
    }
}
