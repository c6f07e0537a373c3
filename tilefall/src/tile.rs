//! Tile identifiers and immutable tile bitmaps.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::error::TilefallError;

/// A point in the normalized world square.
///
/// The whole mapped world spans `[0, 1) × [0, 1)`; points outside of the square are outside of
/// the mapped world and always resolve to [`Color::OUTSIDE`].
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct GeoPoint {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl GeoPoint {
    /// Creates a new point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns true if the point lies inside the mapped world square.
    pub fn is_inside_world(&self) -> bool {
        (0.0..1.0).contains(&self.x) && (0.0..1.0).contains(&self.y)
    }

    /// Returns the point moved by `step` scaled by `t`.
    pub fn offset(&self, step: GeoVector, t: f64) -> GeoPoint {
        GeoPoint {
            x: self.x + step.dx * t,
            y: self.y + step.dy * t,
        }
    }
}

/// Displacement between two [`GeoPoint`]s, typically the step between consecutive rows of one
/// output column.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct GeoVector {
    /// Horizontal component.
    pub dx: f64,
    /// Vertical component.
    pub dy: f64,
}

impl GeoVector {
    /// Creates a new vector.
    pub const fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    /// Euclidean length of the vector.
    pub fn norm(&self) -> f64 {
        (self.dx * self.dx + self.dy * self.dy).sqrt()
    }
}

/// Identifier of a single tile: zoom level, x/y indices and an optional sub-tile address for
/// compound raster sources that pack several tiles into one stored unit.
///
/// The key is a plain value: it carries no tile data and is used only for cache and map keying.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TileKey {
    zoom: u8,
    x: u64,
    y: u64,
    sub: u8,
}

impl TileKey {
    /// Creates a new key, checking that the indices exist at the given zoom level.
    pub fn new(zoom: u8, x: u64, y: u64) -> Result<Self, TilefallError> {
        if !(1..=31).contains(&zoom) {
            return Err(TilefallError::ZoomOutOfRange(zoom));
        }

        let side = 1u64 << zoom;
        if x >= side || y >= side {
            return Err(TilefallError::TileIndexOutOfRange { zoom, x, y });
        }

        Ok(Self { zoom, x, y, sub: 0 })
    }

    /// Returns the key of the tile containing `point` at the given zoom level, or `None` if the
    /// point is outside the mapped world.
    pub fn containing(point: GeoPoint, zoom: u8) -> Option<Self> {
        if !point.is_inside_world() || !(1..=31).contains(&zoom) {
            return None;
        }

        let side = (1u64 << zoom) as f64;
        let x = (point.x * side) as u64;
        let y = (point.y * side) as u64;
        TileKey::new(zoom, x, y).ok()
    }

    /// Returns the same key addressing the given sub-tile of a compound source.
    pub fn with_sub(self, sub: u8) -> Self {
        Self { sub, ..self }
    }

    /// Zoom level of the tile.
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// X index of the tile.
    pub fn x(&self) -> u64 {
        self.x
    }

    /// Y index of the tile.
    pub fn y(&self) -> u64 {
        self.y
    }

    /// Sub-tile address (0 for simple sources).
    pub fn sub(&self) -> u8 {
        self.sub
    }
}

/// An immutable square grid of pixels covering the extent of one tile.
///
/// The side length is a power of two, or 1 for the degenerate uniform tile that consists of a
/// single color.
#[derive(Debug, Clone)]
pub struct TileBitmap {
    side: u32,
    pixels: Vec<Color>,
}

impl TileBitmap {
    /// Creates a bitmap from its pixels, given in row-major order.
    pub fn new(side: u32, pixels: Vec<Color>) -> Result<Self, TilefallError> {
        if side == 0 || !side.is_power_of_two() || pixels.len() != (side as usize).pow(2) {
            return Err(TilefallError::MalformedBitmap {
                side,
                pixels: pixels.len(),
            });
        }

        Ok(Self { side, pixels })
    }

    /// Creates the degenerate 1×1 tile of a single uniform color.
    pub fn uniform(color: Color) -> Self {
        Self {
            side: 1,
            pixels: vec![color],
        }
    }

    /// Side length of the bitmap in pixels.
    pub fn side(&self) -> u32 {
        self.side
    }

    /// Returns the pixel at the given local indices, or [`Color::OUTSIDE`] if the indices are out
    /// of bounds.
    pub fn pixel(&self, ix: u32, iy: u32) -> Color {
        if ix >= self.side || iy >= self.side {
            return Color::OUTSIDE;
        }

        self.pixels[(iy * self.side + ix) as usize]
    }

    /// Local pixel indices of the given world point, assuming this bitmap covers the extent of
    /// the tile identified by `key`. `None` if the point lies outside that extent.
    pub fn pixel_index_at(&self, point: GeoPoint, key: TileKey) -> Option<(u32, u32)> {
        let scale = (1u64 << key.zoom()) as f64;
        let fx = point.x * scale - key.x() as f64;
        let fy = point.y * scale - key.y() as f64;
        if !(0.0..1.0).contains(&fx) || !(0.0..1.0).contains(&fy) {
            return None;
        }

        let ix = ((fx * self.side as f64) as u32).min(self.side - 1);
        let iy = ((fy * self.side as f64) as u32).min(self.side - 1);
        Some((ix, iy))
    }

    /// Returns the pixel covering the given world point, or [`Color::OUTSIDE`] if the point is
    /// not inside the extent of the tile identified by `key`.
    pub fn pixel_at(&self, point: GeoPoint, key: TileKey) -> Color {
        match self.pixel_index_at(point, key) {
            Some((ix, iy)) => self.pixel(ix, iy),
            None => Color::OUTSIDE,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn key_validation() {
        assert!(TileKey::new(1, 0, 1).is_ok());
        assert!(TileKey::new(10, 1023, 0).is_ok());
        assert_matches!(TileKey::new(0, 0, 0), Err(TilefallError::ZoomOutOfRange(0)));
        assert_matches!(TileKey::new(32, 0, 0), Err(TilefallError::ZoomOutOfRange(32)));
        assert_matches!(
            TileKey::new(1, 2, 0),
            Err(TilefallError::TileIndexOutOfRange { .. })
        );
    }

    #[test]
    fn key_containing() {
        let key = TileKey::containing(GeoPoint::new(0.5, 0.25), 2).expect("point is inside");
        assert_eq!((key.zoom(), key.x(), key.y()), (2, 2, 1));

        assert!(TileKey::containing(GeoPoint::new(1.0, 0.0), 2).is_none());
        assert!(TileKey::containing(GeoPoint::new(-0.001, 0.5), 2).is_none());
    }

    #[test]
    fn keys_with_sub_are_distinct() {
        let key = TileKey::new(3, 1, 2).expect("valid key");
        assert_ne!(key, key.with_sub(1));
        assert_eq!(key.with_sub(1), key.with_sub(1));
    }

    #[test]
    fn bitmap_validation() {
        assert!(TileBitmap::new(2, vec![Color::BLACK; 4]).is_ok());
        assert_matches!(
            TileBitmap::new(3, vec![Color::BLACK; 9]),
            Err(TilefallError::MalformedBitmap { .. })
        );
        assert_matches!(
            TileBitmap::new(2, vec![Color::BLACK; 3]),
            Err(TilefallError::MalformedBitmap { .. })
        );
    }

    #[test]
    fn uniform_tile_covers_whole_extent() {
        let color = Color::rgba(1, 2, 3, 255);
        let bitmap = TileBitmap::uniform(color);
        let key = TileKey::new(1, 0, 0).expect("valid key");

        assert_eq!(bitmap.pixel_at(GeoPoint::new(0.0, 0.0), key), color);
        assert_eq!(bitmap.pixel_at(GeoPoint::new(0.499, 0.499), key), color);
        assert_eq!(
            bitmap.pixel_at(GeoPoint::new(0.75, 0.25), key),
            Color::OUTSIDE
        );
    }

    #[test]
    fn absolute_lookup_picks_the_right_pixel() {
        let pixels = vec![
            Color::rgba(0, 0, 0, 255),
            Color::rgba(1, 0, 0, 255),
            Color::rgba(2, 0, 0, 255),
            Color::rgba(3, 0, 0, 255),
        ];
        let bitmap = TileBitmap::new(2, pixels).expect("valid bitmap");
        let key = TileKey::new(2, 1, 1).expect("valid key");

        // The tile covers [0.25, 0.5) in both axes; each pixel covers an eighth of the world.
        assert_eq!(
            bitmap.pixel_at(GeoPoint::new(0.26, 0.26), key),
            Color::rgba(0, 0, 0, 255)
        );
        assert_eq!(
            bitmap.pixel_at(GeoPoint::new(0.4, 0.26), key),
            Color::rgba(1, 0, 0, 255)
        );
        assert_eq!(
            bitmap.pixel_at(GeoPoint::new(0.26, 0.4), key),
            Color::rgba(2, 0, 0, 255)
        );
        assert_eq!(
            bitmap.pixel_at(GeoPoint::new(0.49, 0.49), key),
            Color::rgba(3, 0, 0, 255)
        );
    }
}
