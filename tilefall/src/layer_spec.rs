//! Immutable configuration of one rendered layer.

use std::sync::{Arc, OnceLock};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::TilefallError;
use crate::source::TileSource;
use crate::target::Projection;

/// Bitset of rendering behavior switches of a layer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RenderFlags(u32);

impl RenderFlags {
    /// No flags set.
    pub const NONE: RenderFlags = RenderFlags(0);
    /// Anti-alias pixels by averaging stochastic sub-pixel samples once refinement allows it.
    pub const SUPERSAMPLE: RenderFlags = RenderFlags(1);
    /// Darken pixels that were filled in from an alternate-source tile.
    pub const DARKEN_FALLBACK: RenderFlags = RenderFlags(1 << 1);
    /// Blend a diagnostic grid over tile borders.
    pub const GRID_OVERLAY: RenderFlags = RenderFlags(1 << 2);

    /// Returns true if every flag of `other` is set in `self`.
    pub fn contains(&self, other: RenderFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of the two flag sets.
    pub fn with(&self, other: RenderFlags) -> RenderFlags {
        RenderFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for RenderFlags {
    type Output = RenderFlags;

    fn bitor(self, rhs: RenderFlags) -> RenderFlags {
        self.with(rhs)
    }
}

/// Immutable specification of one rendered layer, consumed by everything downstream: the fallback
/// chain builder, the resolution engine and the render workers.
#[derive(Clone)]
pub struct LayerSpec {
    projection: Arc<dyn Projection>,
    target_zoom: u8,
    primary: TileSource,
    alternate: TileSource,
    flags: RenderFlags,
    window_diagonal: WindowDiagonal,
}

impl std::fmt::Debug for LayerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerSpec")
            .field("target_zoom", &self.target_zoom)
            .field("primary", &self.primary)
            .field("alternate", &self.alternate)
            .field("flags", &self.flags)
            .finish()
    }
}

impl LayerSpec {
    /// Creates a new specification.
    ///
    /// `window_diagonal` is evaluated lazily, at most once, when the diagonal is first needed.
    /// Fails if `target_zoom` is out of range or the primary source is the
    /// [`TileSource::NONE`] sentinel; both are programmer errors and callers are expected to
    /// fail fast on them.
    pub fn new(
        projection: Arc<dyn Projection>,
        target_zoom: u8,
        primary: TileSource,
        alternate: TileSource,
        flags: RenderFlags,
        window_diagonal: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Result<Self, TilefallError> {
        if !(1..=31).contains(&target_zoom) {
            return Err(TilefallError::ZoomOutOfRange(target_zoom));
        }

        if primary.is_none() {
            return Err(TilefallError::UnusableSource);
        }

        Ok(Self {
            projection,
            target_zoom,
            primary,
            alternate,
            flags,
            window_diagonal: WindowDiagonal::new(window_diagonal),
        })
    }

    /// Projection placing output pixels on the world.
    pub fn projection(&self) -> &Arc<dyn Projection> {
        &self.projection
    }

    /// The zoom level the layer wants to display.
    pub fn target_zoom(&self) -> u8 {
        self.target_zoom
    }

    /// The source tiles are primarily rendered from.
    pub fn primary(&self) -> TileSource {
        self.primary
    }

    /// The source consulted when the primary source has no usable tile. May be
    /// [`TileSource::NONE`].
    pub fn alternate(&self) -> TileSource {
        self.alternate
    }

    /// Rendering behavior switches.
    pub fn flags(&self) -> RenderFlags {
        self.flags
    }

    /// Diagonal of the output window in pixels, evaluated on first use.
    pub fn window_diagonal(&self) -> f64 {
        self.window_diagonal.get()
    }

    /// Freezes the specification into a hashable/equatable snapshot, so renderers can be cached
    /// by specification identity. Projection identity is by pointer.
    pub fn frozen(&self) -> FrozenSpec {
        FrozenSpec {
            projection: Arc::as_ptr(&self.projection) as *const () as usize,
            target_zoom: self.target_zoom,
            primary: self.primary,
            alternate: self.alternate,
            flags: self.flags,
        }
    }
}

/// Hashable/equatable snapshot of a [`LayerSpec`], used as a cache key for renderer instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrozenSpec {
    projection: usize,
    target_zoom: u8,
    primary: TileSource,
    alternate: TileSource,
    flags: RenderFlags,
}

struct WindowDiagonal {
    provider: Arc<dyn Fn() -> f64 + Send + Sync>,
    value: OnceLock<f64>,
}

impl WindowDiagonal {
    fn new(provider: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
            value: OnceLock::new(),
        }
    }

    fn get(&self) -> f64 {
        *self.value.get_or_init(|| (self.provider)())
    }
}

impl Clone for WindowDiagonal {
    fn clone(&self) -> Self {
        let value = OnceLock::new();
        if let Some(v) = self.value.get() {
            let _ = value.set(*v);
        }

        Self {
            provider: self.provider.clone(),
            value,
        }
    }
}
