//! The column resolution engine: per-tile bookkeeping, the dirty-column set and the per-pixel
//! fallback-chain walk that turns a world coordinate into a color.
//!
//! One engine instance belongs to one visible rendered layer. Rendering passes run on the
//! scheduler's thread; the only other parties touching engine state are the completion callbacks
//! the external downloader invokes, possibly from arbitrary threads.

mod dirty;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::chain::{Attempt, FallbackChain, MAX_ATTEMPTS};
use crate::color::Color;
use crate::layer_spec::{LayerSpec, RenderFlags};
use crate::source::{CacheTier, CancelHandle, Downloader, TileCache, TileCallback, TileSource};
use crate::target::{Canceled, RenderTarget};
use crate::tile::{GeoPoint, TileBitmap, TileKey};
use dirty::DirtyColumns;

/// Cache willingness and download permission of one refinement pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct PassPolicy {
    /// Slowest cache tier the pass is willing to consult.
    pub tier: CacheTier,
    /// Whether the pass may trigger new downloads.
    pub allow_downloads: bool,
}

/// Per-column rendering strategy injected into a pass, so that pass policy and sampling strategy
/// stay independent.
pub(crate) trait ColumnStrategy: Send + Sync {
    /// Renders one output column; returns false if any pixel of the column exhausted its chain.
    fn render_column(&self, engine: &ResolutionEngine, policy: PassPolicy, col: u32) -> bool;
}

/// State shared between rendering passes and asynchronous tile completions.
struct EngineShared {
    /// Lock order invariant: a [`NeededTile`] state lock is always released before this lock is
    /// taken.
    dirty: Mutex<DirtyColumns>,
    target: Arc<dyn RenderTarget>,
    disposed: AtomicBool,
}

#[derive(Default)]
struct NeededTileState {
    /// Inclusive range of output columns that referenced this tile so far.
    columns: Option<(u32, u32)>,
    bitmap: Option<Arc<TileBitmap>>,
    download: Option<CancelHandle>,
    watch: Option<CancelHandle>,
}

/// Bookkeeping for one tile some pixel of the view needs. Owned exclusively by one engine
/// instance and resolved asynchronously.
struct NeededTile {
    source: TileSource,
    key: TileKey,
    state: Mutex<NeededTileState>,
}

impl NeededTile {
    fn new(source: TileSource, key: TileKey) -> Self {
        Self {
            source,
            key,
            state: Mutex::new(NeededTileState::default()),
        }
    }
}

struct LocalEntry {
    source: TileSource,
    key: TileKey,
    bitmap: Arc<TileBitmap>,
}

/// Small fixed-size cache of tile lookups, keyed by chain slot and two tile-coordinate parity
/// bits. Valid for a single pass only; neighboring pixels of a column almost always land in the
/// same tile per slot, so this skips the needed-map lock on the hot path.
struct LocalCache {
    ways: [[Option<LocalEntry>; 4]; MAX_ATTEMPTS],
}

impl LocalCache {
    fn new() -> Self {
        Self {
            ways: std::array::from_fn(|_| std::array::from_fn(|_| None)),
        }
    }

    fn get(
        &self,
        slot: usize,
        way: usize,
        source: TileSource,
        key: TileKey,
    ) -> Option<Arc<TileBitmap>> {
        let entry = self.ways[slot][way].as_ref()?;
        if entry.source == source && entry.key == key {
            Some(entry.bitmap.clone())
        } else {
            None
        }
    }

    fn put(
        &mut self,
        slot: usize,
        way: usize,
        source: TileSource,
        key: TileKey,
        bitmap: Arc<TileBitmap>,
    ) {
        self.ways[slot][way] = Some(LocalEntry {
            source,
            key,
            bitmap,
        });
    }

    fn clear(&mut self) {
        for slot in &mut self.ways {
            for way in slot {
                *way = None;
            }
        }
    }
}

/// Weight of the diagnostic grid overlay blended over tile-border pixels.
const GRID_WEIGHT: u8 = 128;

/// The per-layer engine resolving world coordinates to colors through a fallback chain, while
/// coordinating with the external tile cache and downloader.
pub(crate) struct ResolutionEngine {
    spec: LayerSpec,
    cache: Arc<dyn TileCache>,
    downloader: Arc<dyn Downloader>,
    shared: Arc<EngineShared>,
    needed: Mutex<HashMap<(TileSource, TileKey), Arc<NeededTile>>>,
    local: Mutex<LocalCache>,
}

impl ResolutionEngine {
    /// Creates an engine for the given layer and target. All columns start dirty.
    pub(crate) fn new(
        spec: LayerSpec,
        cache: Arc<dyn TileCache>,
        downloader: Arc<dyn Downloader>,
        target: Arc<dyn RenderTarget>,
    ) -> Self {
        let mut dirty = DirtyColumns::new(target.columns());
        dirty.mark_all();

        Self {
            spec,
            cache,
            downloader,
            shared: Arc::new(EngineShared {
                dirty: Mutex::new(dirty),
                target,
                disposed: AtomicBool::new(false),
            }),
            needed: Mutex::new(HashMap::new()),
            local: Mutex::new(LocalCache::new()),
        }
    }

    pub(crate) fn spec(&self) -> &LayerSpec {
        &self.spec
    }

    pub(crate) fn target(&self) -> &Arc<dyn RenderTarget> {
        &self.shared.target
    }

    pub(crate) fn cache(&self) -> &Arc<dyn TileCache> {
        &self.cache
    }

    pub(crate) fn dirty_count(&self) -> u32 {
        self.shared.dirty.lock().count()
    }

    pub(crate) fn is_fully_resolved(&self) -> bool {
        self.shared.dirty.lock().is_empty()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Re-marks every output column for scanning by the next pass.
    pub(crate) fn mark_all_dirty(&self) {
        self.shared.dirty.lock().mark_all();
    }

    /// Runs one refinement pass over the currently dirty columns.
    ///
    /// The dirty set is snapshotted and cleared atomically up front, so completions landing
    /// during the scan populate a fresh set instead of being lost. Cancellation is honored once
    /// per fully completed column; an unwind re-marks every column the pass did not get to.
    pub(crate) fn one_pass(
        &self,
        policy: PassPolicy,
        strategy: &dyn ColumnStrategy,
    ) -> Result<(), Canceled> {
        let snapshot = self.shared.dirty.lock().take();
        let columns: Vec<u32> = snapshot.iter().collect();

        for (index, &col) in columns.iter().enumerate() {
            let complete = strategy.render_column(self, policy, col);
            if !complete {
                self.shared.dirty.lock().mark(col);
            }

            if self.shared.target.check_canceled().is_err() {
                let mut dirty = self.shared.dirty.lock();
                for &left in &columns[index + 1..] {
                    dirty.mark(left);
                }
                drop(dirty);

                self.local.lock().clear();
                return Err(Canceled);
            }
        }

        self.local.lock().clear();

        if self.shared.dirty.lock().is_empty() {
            self.shared.target.mark_resolved();
        }

        Ok(())
    }

    /// Resolves one world coordinate to a color by walking the chain attempts low to high.
    ///
    /// Empty slots are skipped, not terminal, so interleaved look-ahead slots work. The first
    /// attempt with an available tile wins; later attempts are never consulted after a hit.
    /// Returns `None` when the chain is exhausted without data — the requesting column must then
    /// stay dirty. A point outside the mapped world resolves to the sentinel and counts as real
    /// data.
    pub(crate) fn resolve(
        &self,
        point: GeoPoint,
        chain: FallbackChain,
        policy: PassPolicy,
        col: u32,
    ) -> Option<Color> {
        if !point.is_inside_world() {
            return Some(Color::OUTSIDE);
        }

        for slot in 0..MAX_ATTEMPTS {
            let Some(attempt) = chain.slot(slot) else {
                continue;
            };

            let source = if attempt.uses_alternate() {
                self.spec.alternate()
            } else {
                self.spec.primary()
            };
            if source.is_none() {
                continue;
            }

            let Some(key) = TileKey::containing(point, attempt.zoom()) else {
                continue;
            };

            let way = ((key.x() & 1) << 1 | (key.y() & 1)) as usize;
            if let Some(bitmap) = self.local.lock().get(slot, way, source, key) {
                return Some(self.shade(&bitmap, attempt, point, key));
            }

            let record = self.needed_record(source, key);
            let bitmap = {
                let state = record.state.lock();
                state.bitmap.clone()
            };
            let bitmap = bitmap.or_else(|| self.cache.get(key, source, policy.tier));

            match bitmap {
                Some(bitmap) => {
                    {
                        let mut state = record.state.lock();
                        if state.bitmap.is_none() {
                            state.bitmap = Some(bitmap.clone());
                        }
                    }
                    self.local.lock().put(slot, way, source, key, bitmap.clone());
                    return Some(self.shade(&bitmap, attempt, point, key));
                }
                None => self.note_miss(&record, attempt, policy, col),
            }
        }

        None
    }

    /// Cancels every outstanding download and watch subscription. Idempotent, never blocks, and
    /// safe to call while a pass is executing: it only invalidates callback identity.
    pub(crate) fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        log::debug!("disposing renderer for {:?}", self.spec);

        let records: Vec<Arc<NeededTile>> =
            self.needed.lock().drain().map(|(_, record)| record).collect();
        for record in records {
            let (download, watch) = {
                let mut state = record.state.lock();
                (state.download.take(), state.watch.take())
            };

            if let Some(mut handle) = download {
                handle.cancel();
            }
            if let Some(mut handle) = watch {
                handle.cancel();
            }
        }
    }

    fn needed_record(&self, source: TileSource, key: TileKey) -> Arc<NeededTile> {
        self.needed
            .lock()
            .entry((source, key))
            .or_insert_with(|| Arc::new(NeededTile::new(source, key)))
            .clone()
    }

    /// Records that `col` depends on the missing tile, and ensures exactly one download or watch
    /// subscription exists for it.
    fn note_miss(&self, record: &Arc<NeededTile>, attempt: Attempt, policy: PassPolicy, col: u32) {
        let start_download;
        let start_watch;
        {
            let mut state = record.state.lock();
            state.columns = Some(match state.columns {
                None => (col, col),
                Some((min, max)) => (min.min(col), max.max(col)),
            });

            let download_wanted = attempt.may_download() && policy.allow_downloads;
            start_download = download_wanted && state.download.is_none();
            start_watch = !download_wanted && state.download.is_none() && state.watch.is_none();

            // Claim the subscription before releasing the lock so a concurrent resolve of the
            // same tile cannot start a second one. The real handle replaces the placeholder
            // below; the downloader may invoke the completion callback synchronously, which
            // takes this lock again, so it must not be held across the call.
            if start_download {
                state.download = Some(CancelHandle::noop());
            }
            if start_watch {
                state.watch = Some(CancelHandle::noop());
            }
        }

        if start_download {
            log::debug!(
                "requesting tile z{} ({}, {}) from source {}",
                record.key.zoom(),
                record.key.x(),
                record.key.y(),
                record.source.id()
            );
            let handle =
                self.downloader
                    .request(record.key, record.source, self.completion(record.clone()));
            record.state.lock().download = Some(handle);
        } else if start_watch {
            let handle =
                self.downloader
                    .watch(record.key, record.source, self.completion(record.clone()));
            record.state.lock().watch = Some(handle);
        }
    }

    /// Builds the completion callback for one needed tile. The callback stores the bitmap once,
    /// re-dirties the tile's recorded column span and wakes the external scheduler. The record
    /// lock is released before the dirty lock is taken.
    fn completion(&self, record: Arc<NeededTile>) -> TileCallback {
        let shared = Arc::downgrade(&self.shared);
        Box::new(move |bitmap| {
            let span = {
                let mut state = record.state.lock();
                if state.bitmap.is_some() {
                    return;
                }
                state.bitmap = Some(bitmap);
                state.columns
            };

            let Some(shared) = upgrade_live(&shared) else {
                return;
            };

            if let Some((min, max)) = span {
                shared.dirty.lock().mark_range(min, max);
            }
            shared.target.wake_scheduler();
        })
    }

    fn shade(&self, bitmap: &TileBitmap, attempt: Attempt, point: GeoPoint, key: TileKey) -> Color {
        let flags = self.spec.flags();
        let Some((ix, iy)) = bitmap.pixel_index_at(point, key) else {
            return Color::OUTSIDE;
        };

        let mut color = bitmap.pixel(ix, iy);
        if attempt.uses_alternate() && flags.contains(RenderFlags::DARKEN_FALLBACK) {
            color = color.darkened();
        }

        if flags.contains(RenderFlags::GRID_OVERLAY) && (ix == 0 || iy == 0) {
            color = color.blend(Color::BLACK, GRID_WEIGHT);
        }

        color
    }
}

fn upgrade_live(shared: &Weak<EngineShared>) -> Option<Arc<EngineShared>> {
    let shared = shared.upgrade()?;
    if shared.disposed.load(Ordering::Acquire) {
        return None;
    }
    Some(shared)
}
