//! Error types used by the crate.

use thiserror::Error;

/// Tilefall error type.
///
/// All variants indicate construction-time faults. The rendering path itself never fails: missing
/// tile data is represented by the outside sentinel color and dirty columns, and cooperative
/// cancellation uses [`Canceled`](crate::Canceled).
#[derive(Debug, Error)]
pub enum TilefallError {
    /// Zoom level outside of the supported `1..=31` range.
    #[error("zoom level {0} is out of range 1..=31")]
    ZoomOutOfRange(u8),
    /// Tile index that does not exist at the given zoom level.
    #[error("tile index ({x}, {y}) does not exist at zoom {zoom}")]
    TileIndexOutOfRange {
        /// Zoom level of the requested tile.
        zoom: u8,
        /// X index of the requested tile.
        x: u64,
        /// Y index of the requested tile.
        y: u64,
    },
    /// The primary tile source of a layer must be a real source.
    #[error("the primary tile source must be a usable source")]
    UnusableSource,
    /// More fallback attempts than a chain can hold.
    #[error("a fallback chain holds at most {max} attempts, got {got}")]
    ChainOverflow {
        /// Maximum number of attempts in a chain.
        max: usize,
        /// Number of attempts requested.
        got: usize,
    },
    /// Tile bitmap with an unsupported shape.
    #[error("a tile bitmap must be square with a power-of-two side, got side {side} with {pixels} pixels")]
    MalformedBitmap {
        /// Side length passed to the constructor.
        side: u32,
        /// Number of pixels passed to the constructor.
        pixels: usize,
    },
}
