//! The multi-pass render worker: the scheduling shell around the resolution engine that an
//! external multi-layer compositor drives through the [`RenderWorker`] surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chain::{build_chains, FallbackChain};
use crate::color::Color;
use crate::engine::{ColumnStrategy, PassPolicy, ResolutionEngine};
use crate::layer_spec::{LayerSpec, RenderFlags};
use crate::source::{CacheTier, Downloader, TileCache};
use crate::supersample::SupersampleStrategy;
use crate::target::{RenderTarget, RenderWorker};

/// Priority reported while scheduled passes remain. Workers with guaranteed further work always
/// outrank ones that only wait for asynchronous completions.
const PASS_PRIORITY_BASE: i32 = 100;

struct Pass {
    policy: PassPolicy,
    /// A skippable pass is treated as already satisfied when the view is not urgent or its cache
    /// tier holds nothing.
    skippable: bool,
}

/// A renderer driving a bounded sequence of refinement passes over one layer.
///
/// Pass 0 consults only the in-memory cache tier and exists to get urgent views on screen
/// immediately. The final pass is the only one allowed to trigger downloads. When supersampling
/// is enabled a middle on-disk pass is inserted, and the final pass switches to the sampling
/// strategy once the view is mature. After the scheduled passes, further invocations rescan only
/// the columns re-dirtied by asynchronous tile completions.
pub struct MultiPassWorker {
    engine: ResolutionEngine,
    passes: Vec<Pass>,
    plain: PlainStrategy,
    supersample: Option<SupersampleStrategy>,
    /// Index of the next scheduled pass; saturates at `passes.len()` once all passes ran. Held
    /// locked for the whole of `do_some_work`, so at most one pass executes at a time.
    next_pass: Mutex<usize>,
    /// Set once any pass ends with unresolved columns; from then on every remaining scheduled
    /// pass rescans the full view instead of only the dirty columns.
    had_unresolved: AtomicBool,
}

impl MultiPassWorker {
    /// Creates a worker rendering the given layer into `target`.
    pub fn new(
        spec: LayerSpec,
        cache: Arc<dyn TileCache>,
        downloader: Arc<dyn Downloader>,
        target: Arc<dyn RenderTarget>,
    ) -> Self {
        let display_pixel_size = display_pixel_size(&spec, target.as_ref());
        let chains = build_chains(&spec, display_pixel_size);

        let supersampling = spec.flags().contains(RenderFlags::SUPERSAMPLE);
        let supersample = supersampling.then(|| {
            let oversampling = display_pixel_size
                * (1u64 << spec.target_zoom()) as f64
                * spec.primary().tile_side() as f64;
            SupersampleStrategy::new(chains, oversampling)
        });

        let mut passes = vec![Pass {
            policy: PassPolicy {
                tier: CacheTier::Memory,
                allow_downloads: false,
            },
            skippable: true,
        }];
        if supersampling {
            passes.push(Pass {
                policy: PassPolicy {
                    tier: CacheTier::Disk,
                    allow_downloads: false,
                },
                skippable: false,
            });
        }
        passes.push(Pass {
            policy: PassPolicy {
                tier: CacheTier::Network,
                allow_downloads: true,
            },
            skippable: false,
        });

        Self {
            engine: ResolutionEngine::new(spec, cache, downloader, target),
            passes,
            plain: PlainStrategy {
                chain: chains.main(),
            },
            supersample,
            next_pass: Mutex::new(0),
            had_unresolved: AtomicBool::new(false),
        }
    }

    fn strategy(&self, pass_index: usize) -> &dyn ColumnStrategy {
        // Sampling only starts after two refinement passes, and only once the view has settled:
        // earlier samples would be discarded by the next coarser-to-finer transition anyway.
        match &self.supersample {
            Some(supersample) if pass_index >= 2 && self.engine.target().is_mature() => {
                supersample
            }
            _ => &self.plain,
        }
    }
}

impl RenderWorker for MultiPassWorker {
    fn do_some_work(&self) {
        let mut next = self.next_pass.lock();
        if self.engine.is_disposed() {
            return;
        }

        if *next == 0 {
            let first = &self.passes[0];
            if first.skippable
                && (!self.engine.target().is_urgent()
                    || self.engine.cache().tier_is_empty(first.policy.tier))
            {
                *next = 1;
            }
        }

        let index = *next;
        if (1..self.passes.len()).contains(&index) && self.had_unresolved.load(Ordering::Acquire)
        {
            self.engine.mark_all_dirty();
        }

        if self.engine.is_fully_resolved() {
            return;
        }

        let policy = self.passes[index.min(self.passes.len() - 1)].policy;
        log::trace!("running pass {index} with {policy:?}");
        if self.engine.one_pass(policy, self.strategy(index)).is_err() {
            // Canceled mid-pass; the pass index stays put and the next invocation retries the
            // columns that were left dirty.
            return;
        }

        if !self.engine.is_fully_resolved() {
            self.had_unresolved.store(true, Ordering::Release);
        }
        if index < self.passes.len() {
            *next = index + 1;
        }
    }

    fn priority(&self) -> i32 {
        if self.engine.is_disposed() {
            return -1;
        }

        let next = *self.next_pass.lock();
        let passes_remain = next < self.passes.len();
        let rescan_pending = passes_remain && self.had_unresolved.load(Ordering::Acquire);
        if self.engine.is_fully_resolved() && !rescan_pending {
            return -1;
        }

        if passes_remain {
            PASS_PRIORITY_BASE + (self.passes.len() - next) as i32
        } else {
            1
        }
    }

    fn dispose(&self) {
        self.engine.dispose();
    }
}

impl Drop for MultiPassWorker {
    fn drop(&mut self) {
        self.engine.dispose();
    }
}

/// One plain center sample per pixel through the ordinary fallback chain.
struct PlainStrategy {
    chain: FallbackChain,
}

impl ColumnStrategy for PlainStrategy {
    fn render_column(&self, engine: &ResolutionEngine, policy: PassPolicy, col: u32) -> bool {
        let target = engine.target();
        let x = target.x_offset() + col as f64;
        let (base, step) = engine.spec().projection().locate(x, target.y_offset());

        let mut complete = true;
        for row in 0..target.rows() {
            let point = base.offset(step, row as f64);
            match engine.resolve(point, self.chain, policy, col) {
                Some(color) => target.put_pixel(col, row, color),
                None => {
                    target.put_pixel(col, row, Color::OUTSIDE);
                    complete = false;
                }
            }
        }

        complete
    }
}

/// Geographic size of one display pixel, probed at the center of the viewport. Falls back to the
/// window diagonal for degenerate projections.
fn display_pixel_size(spec: &LayerSpec, target: &dyn RenderTarget) -> f64 {
    let center_x = target.x_offset() + target.columns() as f64 / 2.0;
    let center_y = target.y_offset() + target.rows() as f64 / 2.0;
    let (_, step) = spec.projection().locate(center_x, center_y);

    let size = step.norm();
    if size.is_finite() && size > 0.0 {
        size
    } else {
        1.0 / spec.window_diagonal().max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::source::TileSource;
    use crate::tests::{uniform_tile, TestLayer};

    const RED: Color = Color::rgba(220, 0, 0, 255);
    const GREEN: Color = Color::rgba(0, 200, 0, 255);
    const YELLOW: Color = Color::rgba(200, 180, 40, 255);

    #[test]
    fn urgent_memory_hit_resolves_in_one_call() {
        crate::tests::init_logging();
        let layer = TestLayer::new(1, 1);
        layer.cache.put_memory(uniform_tile(RED));
        let worker = layer.worker();

        assert!(worker.priority() > 1);
        worker.do_some_work();

        assert_eq!(layer.target.put_pixels(), vec![(0, 0, RED)]);
        assert_eq!(worker.priority(), -1);
        assert_eq!(layer.target.resolved.load(Ordering::SeqCst), 1);

        // A resolved worker leaves previously written pixels untouched.
        worker.do_some_work();
        assert_eq!(layer.target.put_pixels().len(), 1);
    }

    #[test]
    fn async_completion_finishes_the_column() {
        // Memory tier empty, so the urgency pass is skipped and the downloading pass runs first.
        let layer = TestLayer::new(1, 1);
        let worker = layer.worker();

        worker.do_some_work();
        assert_eq!(worker.priority(), 1);
        assert!(layer.downloader.request_count() > 0);
        assert_eq!(layer.target.pixel(0, 0), Some(Color::OUTSIDE));

        let delivered = layer
            .downloader
            .deliver_where(uniform_tile(RED), |key, _| key.zoom() == 10);
        assert_eq!(delivered, 1);
        assert_eq!(layer.target.wakes.load(Ordering::SeqCst), 1);

        worker.do_some_work();
        assert_eq!(layer.target.pixel(0, 0), Some(RED));
        assert_eq!(worker.priority(), -1);
    }

    #[test]
    fn priority_reflects_remaining_passes() {
        let two_passes = TestLayer::new(2, 1);
        let three_passes = TestLayer::new(2, 1).with_flags(RenderFlags::SUPERSAMPLE);

        let low = two_passes.worker().priority();
        let high = three_passes.worker().priority();
        assert!(low > 1);
        assert!(high > low);
    }

    #[test]
    fn refinement_is_monotonic_per_column() {
        let layer = TestLayer::new(3, 1)
            .with_sources(TileSource::new(0, 1), TileSource::NONE)
            .with_scale(1.0 / 1024.0);
        let worker = layer.worker();

        // Every column lands in its own primary tile; nothing is cached, so the first pass
        // renders sentinels and subscribes downloads.
        worker.do_some_work();
        assert_eq!(layer.target.put_pixels().len(), 3);
        assert_eq!(worker.priority(), 1);

        // Only column 0's tile arrives: the next invocation rescans all dirty columns but
        // resolves just that one.
        layer
            .downloader
            .deliver_where(uniform_tile(RED), |key, _| key.zoom() == 10 && key.x() == 512);
        worker.do_some_work();
        assert_eq!(layer.target.pixel(0, 0), Some(RED));
        assert_eq!(layer.target.pixel(1, 0), Some(Color::OUTSIDE));
        assert_eq!(worker.priority(), 1);

        // The rest arrives; the final invocation touches only the still-dirty columns.
        layer
            .downloader
            .deliver_where(uniform_tile(GREEN), |key, _| key.zoom() == 10);
        let before = layer.target.put_count_for(0);
        worker.do_some_work();
        assert_eq!(layer.target.pixel(1, 0), Some(GREEN));
        assert_eq!(layer.target.pixel(2, 0), Some(GREEN));
        assert_eq!(layer.target.put_count_for(0), before);
        assert_eq!(worker.priority(), -1);
    }

    #[test]
    fn cancellation_unwinds_only_the_current_pass() {
        let layer = TestLayer::new(4, 1);
        layer.cache.put_memory(uniform_tile(RED));
        let worker = layer.worker();
        layer.target.set_cancel_after(2);

        worker.do_some_work();
        // Cancellation is observed after the third completed column; the fourth stays dirty.
        assert_eq!(layer.target.put_pixels().len(), 3);
        assert!(worker.priority() > 1);

        worker.do_some_work();
        assert_eq!(layer.target.put_pixels().len(), 4);
        assert_eq!(worker.priority(), -1);
    }

    #[test]
    fn disposed_worker_stops_scheduling() {
        let layer = TestLayer::new(1, 1);
        let worker = layer.worker();
        worker.do_some_work();

        worker.dispose();
        assert_eq!(worker.priority(), -1);

        let written = layer.target.put_pixels().len();
        worker.do_some_work();
        assert_eq!(layer.target.put_pixels().len(), written);
    }

    #[test]
    fn supersampling_polishes_after_refinement() {
        crate::tests::init_logging();
        let layer = TestLayer::new(1, 1)
            .with_flags(RenderFlags::SUPERSAMPLE)
            .with_sources(TileSource::new(0, 2), TileSource::NONE)
            .with_scale(1.0 / 1024.0);
        layer.target.mature.store(true, Ordering::SeqCst);
        // Memory holds unrelated tiles, so the urgency pass runs and misses.
        layer.cache.mark_memory_populated();
        layer.cache.put_zoom(9, CacheTier::Disk, uniform_tile(GREEN));
        layer.cache.put_zoom(10, CacheTier::Disk, uniform_tile(YELLOW));

        let worker = layer.worker();

        worker.do_some_work();
        assert_eq!(layer.target.pixel(0, 0), Some(Color::OUTSIDE));

        // The on-disk pass resolves through the plain chain: the primary source tops out one
        // level below the target zoom.
        worker.do_some_work();
        assert_eq!(layer.target.pixel(0, 0), Some(GREEN));
        assert_ne!(worker.priority(), -1);

        // The final pass supersamples through the look-ahead slot at the full target zoom.
        worker.do_some_work();
        assert_eq!(layer.target.pixel(0, 0), Some(YELLOW));
        assert_eq!(worker.priority(), -1);
    }

    #[test]
    fn immature_views_are_not_supersampled() {
        let layer = TestLayer::new(1, 1)
            .with_flags(RenderFlags::SUPERSAMPLE)
            .with_sources(TileSource::new(0, 2), TileSource::NONE)
            .with_scale(1.0 / 1024.0);
        layer.cache.mark_memory_populated();
        layer.cache.put_zoom(9, CacheTier::Disk, uniform_tile(GREEN));
        layer.cache.put_zoom(10, CacheTier::Disk, uniform_tile(YELLOW));

        let worker = layer.worker();
        worker.do_some_work();
        worker.do_some_work();
        worker.do_some_work();

        // The plain strategy keeps rendering from the primary source.
        assert_eq!(layer.target.pixel(0, 0), Some(GREEN));
        assert_eq!(worker.priority(), -1);
    }
}
