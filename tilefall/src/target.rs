//! Contracts between the engine and its surroundings: the projection that places pixels on the
//! world, the render target the pixels go to, and the worker surface an external compositor
//! drives.

use crate::color::Color;
use crate::tile::{GeoPoint, GeoVector};

/// Mapping from output pixel coordinates to points of the mapped world.
///
/// Implementations must be deterministic and cheap: the engine consults the projection once per
/// output column and once per supersample baseline.
pub trait Projection: Send + Sync {
    /// Returns the world point of the pixel at `(x, y)` together with the step between
    /// consecutive rows of the same column.
    fn locate(&self, x: f64, y: f64) -> (GeoPoint, GeoVector);
}

/// Raised by [`RenderTarget::check_canceled`] when the view has become stale. Unwinds the
/// current pass; not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled;

/// The output surface a renderer draws into, together with the scheduling hooks of its owner.
pub trait RenderTarget: Send + Sync {
    /// Horizontal pixel offset of the viewport.
    fn x_offset(&self) -> f64;

    /// Vertical pixel offset of the viewport.
    fn y_offset(&self) -> f64;

    /// Number of output columns.
    fn columns(&self) -> u32;

    /// Number of output rows.
    fn rows(&self) -> u32;

    /// Stores one resolved pixel.
    fn put_pixel(&self, col: u32, row: u32, color: Color);

    /// Whether the view wants pixels as soon as possible, even low-quality ones.
    fn is_urgent(&self) -> bool;

    /// Checks whether the view has become stale. An `Err` unwinds the current pass after the
    /// column in progress completes.
    fn check_canceled(&self) -> Result<(), Canceled>;

    /// Whether the view has been stable long enough that expensive refinement (such as
    /// supersampling) is worth spending work on.
    fn is_mature(&self) -> bool;

    /// Called once every pixel of the view has resolved to real data.
    fn mark_resolved(&self);

    /// Asks the external scheduler to run this renderer again soon. May be called from any
    /// thread; must not block.
    fn wake_scheduler(&self);
}

/// The worker surface an external multi-layer compositor drives.
///
/// This three-operation contract is the entire public surface a compositor relies on: it
/// repeatedly calls [`do_some_work`](RenderWorker::do_some_work) on whichever ready worker
/// reports the highest non-negative [`priority`](RenderWorker::priority).
pub trait RenderWorker: Send + Sync {
    /// Advances rendering by exactly one bounded unit of progress and returns. Never blocks on
    /// I/O and never spawns threads.
    fn do_some_work(&self);

    /// Scheduling urgency of this worker: a high value while scheduled refinement passes remain,
    /// `1` while only waiting for asynchronous tile completions, `-1` once there is no further
    /// value in scheduling the worker at all.
    fn priority(&self) -> i32;

    /// Releases all subscriptions held by the worker. Idempotent, non-blocking and safe to call
    /// concurrently with an in-progress pass.
    fn dispose(&self);
}
