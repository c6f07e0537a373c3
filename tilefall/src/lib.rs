//! Tilefall is a progressive, cache-aware raster tile resolution engine. Given a projection that
//! places output pixels on a normalized world square, it decides for every pixel which tile to
//! use, from which cache tier, at which fallback zoom level, and composes the final color —
//! refining the image over multiple passes as tiles arrive from slower storage or the network.
//!
//! The engine renders column by column and never blocks: missing tiles resolve to a transparent
//! sentinel and leave their column dirty, to be revisited by a later pass or woken up by an
//! asynchronous download completion. The external services it relies on — a tiered tile cache, a
//! downloader, and the render target itself — are injected through traits, so the crate contains
//! no I/O of its own.
//!
//! # Main components
//!
//! * [`LayerSpec`] describes one rendered layer: projection, target zoom, primary and alternate
//!   tile sources, and behavior flags.
//! * [`build_chains`] turns a specification into a packed [`FallbackChain`]: the ordered list of
//!   lookup attempts every pixel of the layer resolves through, from the finest primary zoom
//!   down to coarse alternate-source levels with throttled download permissions.
//! * [`MultiPassWorker`] drives the refinement passes over a render target and exposes the
//!   [`RenderWorker`] surface an external multi-layer compositor schedules by priority.
//! * [`WorkerCache`] reuses workers across redraws keyed by frozen specification.
//!
//! # Example
//!
//! Building the fallback chain of a layer:
//!
//! ```
//! use std::sync::Arc;
//!
//! use tilefall::{
//!     build_chains, GeoPoint, GeoVector, LayerSpec, Projection, RenderFlags, TileSource,
//! };
//!
//! const PIXEL_SIZE: f64 = 1.0 / (256.0 * 1024.0);
//!
//! struct Flat;
//!
//! impl Projection for Flat {
//!     fn locate(&self, x: f64, y: f64) -> (GeoPoint, GeoVector) {
//!         (
//!             GeoPoint::new(0.5 + x * PIXEL_SIZE, 0.5 + y * PIXEL_SIZE),
//!             GeoVector::new(0.0, PIXEL_SIZE),
//!         )
//!     }
//! }
//!
//! # fn main() -> Result<(), tilefall::error::TilefallError> {
//! let spec = LayerSpec::new(
//!     Arc::new(Flat),
//!     10,
//!     TileSource::new(0, 256),
//!     TileSource::NONE,
//!     RenderFlags::DARKEN_FALLBACK,
//!     || 1280.0,
//! )?;
//!
//! for attempt in build_chains(&spec, PIXEL_SIZE).main().attempts() {
//!     println!(
//!         "zoom {} alternate: {} may download: {}",
//!         attempt.zoom(),
//!         attempt.uses_alternate(),
//!         attempt.may_download()
//!     );
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;

mod chain;
mod color;
mod engine;
mod layer_spec;
mod source;
mod supersample;
mod target;
mod tile;
mod worker;
mod worker_cache;


pub use chain::{build_chains, Attempt, ChainSet, FallbackChain, MAX_ATTEMPTS};
pub use color::Color;
pub use layer_spec::{FrozenSpec, LayerSpec, RenderFlags};
pub use source::{CacheTier, CancelHandle, Downloader, TileCache, TileCallback, TileSource};
pub use target::{Canceled, Projection, RenderTarget, RenderWorker};
pub use tile::{GeoPoint, GeoVector, TileBitmap, TileKey};
pub use worker::MultiPassWorker;
pub use worker_cache::WorkerCache;
