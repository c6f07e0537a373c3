//! Reuse of render workers across repeated scheduling of the same layer.

use std::sync::Arc;

use quick_cache::sync::Cache;

use crate::layer_spec::{FrozenSpec, LayerSpec};
use crate::source::{Downloader, TileCache};
use crate::target::{RenderTarget, RenderWorker};
use crate::worker::MultiPassWorker;

/// Cache of render workers keyed by frozen layer specification.
///
/// A redraw whose specification is unchanged gets back the existing worker together with all of
/// its accumulated tile bookkeeping and dirty-column state; any change to the specification (or
/// its projection instance) produces a different key and a fresh worker. The caller must
/// [`invalidate`](WorkerCache::invalidate) an entry when its render target is replaced, since a
/// worker stays bound to the target it was created with. Workers dispose their download
/// subscriptions when dropped, so eviction needs no extra handling.
pub struct WorkerCache {
    workers: Cache<FrozenSpec, Arc<MultiPassWorker>>,
}

impl WorkerCache {
    /// Creates a cache holding at most `capacity` workers.
    pub fn new(capacity: usize) -> Self {
        Self {
            workers: Cache::new(capacity),
        }
    }

    /// Returns the worker rendering the given layer, building one on first use.
    pub fn get_or_create(
        &self,
        spec: &LayerSpec,
        tiles: &Arc<dyn TileCache>,
        downloader: &Arc<dyn Downloader>,
        target: &Arc<dyn RenderTarget>,
    ) -> Arc<MultiPassWorker> {
        let key = spec.frozen();
        if let Some(worker) = self.workers.get(&key) {
            return worker;
        }

        log::debug!("creating render worker for {spec:?}");
        let worker = Arc::new(MultiPassWorker::new(
            spec.clone(),
            tiles.clone(),
            downloader.clone(),
            target.clone(),
        ));
        self.workers.insert(key, worker.clone());
        worker
    }

    /// Removes and disposes the worker for the given layer, if one is cached.
    pub fn invalidate(&self, spec: &LayerSpec) {
        if let Some((_, worker)) = self.workers.remove(&spec.frozen()) {
            worker.dispose();
        }
    }
}
