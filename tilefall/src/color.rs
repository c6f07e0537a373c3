#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Color representation.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Color {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

impl Color {
    /// Transparent color: `#00000000`
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    /// Black color: `#000000FF`
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    /// White color: `#FFFFFFFF`
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);
    /// Gray color: `#AAAAAAFF`
    pub const GRAY: Color = Color::rgba(170, 170, 170, 255);

    /// Reserved sentinel returned for pixels that lie outside the mapped world or for which no
    /// tile data has arrived yet. Equal to [`Color::TRANSPARENT`].
    pub const OUTSIDE: Color = Color::TRANSPARENT;

    /// Constructs color from its RGBA channels.
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Red channel value.
    pub const fn r(&self) -> u8 {
        self.r
    }

    /// Green channel value.
    pub const fn g(&self) -> u8 {
        self.g
    }

    /// Blue channel value.
    pub const fn b(&self) -> u8 {
        self.b
    }

    /// Alpha channel value.
    pub const fn a(&self) -> u8 {
        self.a
    }

    /// Converts the color into u8 array (RGBA).
    pub fn to_u8_array(&self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Returns a new color instance, copied from the base one but with the given alpha channel.
    pub fn with_alpha(&self, a: u8) -> Self {
        Self { a, ..*self }
    }

    /// Returns true if the color is fully transparent (`a == 0`).
    pub fn is_transparent(&self) -> bool {
        self.a == 0
    }

    /// Returns the color with all RGB channels scaled down by a quarter. Used to mark pixels that
    /// were filled in from a coarser or alternate-source tile.
    pub fn darkened(&self) -> Self {
        Self {
            r: (self.r as u16 * 3 / 4) as u8,
            g: (self.g as u16 * 3 / 4) as u8,
            b: (self.b as u16 * 3 / 4) as u8,
            a: self.a,
        }
    }

    /// Linearly blends this color toward `other`. `weight == 0` keeps the original color,
    /// `weight == 255` gives `other`.
    pub fn blend(&self, other: Color, weight: u8) -> Self {
        let mix = |from: u8, to: u8| {
            let w = weight as u16;
            ((from as u16 * (255 - w) + to as u16 * w) / 255) as u8
        };

        Self {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
            a: mix(self.a, other.a),
        }
    }
}
