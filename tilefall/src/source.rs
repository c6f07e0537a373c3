//! Tile sources and the external cache/downloader services the engine consumes.

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::tile::{TileBitmap, TileKey};

/// A named provider of tiles under a given zoom scheme.
///
/// The source is a plain value used for cache keying; actual tile retrieval goes through
/// [`TileCache`] and [`Downloader`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TileSource {
    id: u32,
    tile_side: u32,
}

impl TileSource {
    /// Distinguished "no usable source" value. Layers without a real alternate source use this
    /// sentinel, which degenerates all fallback parameters.
    pub const NONE: TileSource = TileSource {
        id: u32::MAX,
        tile_side: 1,
    };

    /// Creates a new source description. `tile_side` is the nominal side length of this source's
    /// tiles in pixels.
    pub fn new(id: u32, tile_side: u32) -> Self {
        Self {
            id,
            tile_side: tile_side.max(1),
        }
    }

    /// Identifier of the source.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Nominal side length of this source's tiles in pixels.
    pub fn tile_side(&self) -> u32 {
        self.tile_side
    }

    /// Returns true for the "no usable source" sentinel.
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    /// The finest zoom level at which one tile pixel of this source still covers at least one
    /// display pixel of the given geographic size, clamped to `1..=31`.
    ///
    /// The sentinel source always reports zoom 1.
    pub fn natural_zoom(&self, display_pixel_size: f64) -> u8 {
        if self.is_none() || !display_pixel_size.is_finite() || display_pixel_size <= 0.0 {
            return 1;
        }

        // One tile pixel at zoom z covers 1 / (2^z * tile_side) of the world, so the finest
        // acceptable zoom satisfies 2^z <= 1 / (tile_side * display_pixel_size).
        let limit = 1.0 / (self.tile_side as f64 * display_pixel_size);
        if limit < 2.0 {
            return 1;
        }

        (limit.log2().floor()).clamp(1.0, 31.0) as u8
    }
}

/// Storage tiers of the external tile cache, ordered from fastest to slowest.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CacheTier {
    /// Decoded tiles already held in memory.
    Memory,
    /// Tiles stored on local disk.
    Disk,
    /// Tiles that have arrived over the network.
    Network,
}

/// Read-only probe into the external tile store.
pub trait TileCache: Send + Sync {
    /// Returns the tile if it is available in any tier from [`CacheTier::Memory`] up to and
    /// including `tier`. The probe never triggers a fetch.
    fn get(&self, key: TileKey, source: TileSource, tier: CacheTier) -> Option<Arc<TileBitmap>>;

    /// Returns true if the given tier currently holds no tiles at all.
    fn tier_is_empty(&self, tier: CacheTier) -> bool;
}

/// Callback invoked by the external downloader when a tile fetch completes. Called at most once
/// per subscription, possibly from an arbitrary thread.
pub type TileCallback = Box<dyn FnOnce(Arc<TileBitmap>) + Send>;

/// Handle canceling one download or watch subscription.
///
/// Canceling is idempotent and becomes a no-op once the subscription has completed.
pub struct CancelHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl CancelHandle {
    /// Creates a handle that runs the given closure on the first cancel.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Creates a handle that does nothing when canceled.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Cancels the subscription. Subsequent calls do nothing.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// External tile fetching service.
///
/// The downloader reports only eventual success; there is no failure signal. A fetch that never
/// completes simply never invokes its callback, leaving the affected columns dirty.
pub trait Downloader: Send + Sync {
    /// Starts a new fetch for the tile, or joins one already in flight. The callback is invoked
    /// at most once, when the tile becomes available.
    fn request(&self, key: TileKey, source: TileSource, on_complete: TileCallback)
        -> CancelHandle;

    /// Subscribes to an in-flight fetch of the tile without starting a new one.
    fn watch(&self, key: TileKey, source: TileSource, on_complete: TileCallback) -> CancelHandle;
}
