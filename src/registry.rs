//! # Stream Registry
//!
//! Owns the catalogue slice and the `id → Worker` map. All mutations
//! take a single writer lock (`parking_lot::Mutex`); reads clone a masked
//! snapshot without ever touching the lock that guards workers. The `id → Worker`
//! map itself is a `dashmap::DashMap` so that MJPEG/SSE handlers can look up a
//! running worker's [`Hub`] without contending with catalogue writers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, instrument};

use crate::config::model::{validate_name, validate_rtsp_url};
use crate::config::{ConfigStore, Patch, Stream, StreamStatus};
use crate::error::AppError;
use crate::gpu::GpuRegistry;
use crate::hub::Hub;
use crate::metrics::SharedMetrics;
use crate::worker::{StatusSink, WorkerHandle};

const MAX_RUNNING_WORKERS: usize = 4;

struct WorkerEntry {
    handle: WorkerHandle,
    hub: Hub,
}

pub struct Registry {
    streams: Mutex<Vec<Stream>>,
    /// Unknown YAML keys carried on each catalogue record, keyed by stream id, so
    /// a field this binary doesn't understand still survives the next `save`.
    extras: Mutex<HashMap<String, serde_yaml::Mapping>>,
    /// Ids that have been deleted at least once this process lifetime, so a
    /// repeat `delete` is idempotent rather than 404.
    deleted_ids: Mutex<HashSet<String>>,
    workers: DashMap<String, WorkerEntry>,
    store: ConfigStore,
    gpu: Arc<GpuRegistry>,
    metrics: SharedMetrics,
    running_count: AtomicUsize,
}

impl Registry {
    /// Load the catalogue from disk. Any stream recorded as `running`/`starting`
    /// from a prior process (e.g. after a crash) comes back as `stopped` — workers
    /// never auto-start.
    pub fn load(store: ConfigStore, gpu: Arc<GpuRegistry>, metrics: SharedMetrics) -> Result<Arc<Registry>, AppError> {
        let records = store.load()?;
        let mut streams = Vec::with_capacity(records.len());
        let mut extras = HashMap::with_capacity(records.len());
        for (mut stream, extra) in records {
            stream.status = StreamStatus::Stopped;
            extras.insert(stream.id.clone(), extra);
            streams.push(stream);
        }
        let registry = Arc::new(Registry {
            streams: Mutex::new(streams.clone()),
            extras: Mutex::new(extras),
            deleted_ids: Mutex::new(HashSet::new()),
            workers: DashMap::new(),
            store,
            gpu,
            metrics,
            running_count: AtomicUsize::new(0),
        });
        if !streams.is_empty() {
            registry.persist(&streams)?;
        }
        Ok(registry)
    }

    /// Save the catalogue together with each record's preserved `extra` mapping.
    fn persist(&self, streams: &[Stream]) -> Result<(), AppError> {
        self.store.save(streams, &self.extras.lock())
    }

    /// Masked snapshot of the full catalogue, in persisted `order`.
    pub fn list(&self) -> Vec<Stream> {
        let guard = self.streams.lock();
        guard.iter().map(Stream::masked).collect()
    }

    pub fn get(&self, id: &str) -> Option<Stream> {
        let guard = self.streams.lock();
        guard.iter().find(|s| s.id == id).map(Stream::masked)
    }

    #[instrument(skip(self, ffmpeg_params))]
    pub fn create(
        &self,
        name: &str,
        rtsp_url: &str,
        ffmpeg_params: Vec<String>,
    ) -> Result<Stream, AppError> {
        let name = validate_name(name)?;
        validate_rtsp_url(rtsp_url)?;
        self.gpu.validate_params(&ffmpeg_params, true)?;

        let mut guard = self.streams.lock();
        if guard.iter().any(|s| s.name.eq_ignore_ascii_case(&name)) {
            return Err(AppError::duplicate_name(format!("a stream named '{name}' already exists")));
        }

        let order = guard.len() as u32;
        let stream = Stream::new(name, rtsp_url.to_string(), ffmpeg_params, order);
        guard.push(stream.clone());
        self.persist(&guard)?;
        info!(stream_id = %stream.id, "stream created");
        Ok(stream.masked())
    }

    #[instrument(skip(self, patch))]
    pub fn update(&self, id: &str, patch: Patch) -> Result<Stream, AppError> {
        if patch.is_empty() {
            return self.get(id).ok_or_else(|| AppError::not_found(format!("stream '{id}' not found")));
        }

        let mut guard = self.streams.lock();
        let index = guard
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| AppError::not_found(format!("stream '{id}' not found")))?;

        if let Some(name) = &patch.name {
            let name = validate_name(name)?;
            if guard.iter().enumerate().any(|(i, s)| i != index && s.name.eq_ignore_ascii_case(&name)) {
                return Err(AppError::duplicate_name(format!("a stream named '{name}' already exists")));
            }
        }
        if let Some(url) = &patch.rtsp_url {
            validate_rtsp_url(url)?;
        }
        let hw_accel_enabled = patch.hw_accel_enabled.unwrap_or(guard[index].hw_accel_enabled);
        if let Some(params) = &patch.ffmpeg_params {
            self.gpu.validate_params(params, hw_accel_enabled)?;
        }

        let needs_restart = patch.changes_command() && guard[index].status != StreamStatus::Stopped;

        if let Some(name) = patch.name {
            guard[index].name = validate_name(&name)?;
        }
        if let Some(url) = patch.rtsp_url {
            guard[index].rtsp_url = url;
        }
        if let Some(hw) = patch.hw_accel_enabled {
            guard[index].hw_accel_enabled = hw;
        }
        if let Some(params) = patch.ffmpeg_params {
            guard[index].ffmpeg_params = params;
        }
        if let Some(fps) = patch.target_fps {
            guard[index].target_fps = fps;
        }
        if let Some(zones) = patch.zones {
            guard[index].zones = zones;
        }

        let updated = guard[index].clone();
        self.persist(&guard)?;
        drop(guard);

        if needs_restart {
            self.restart_locked(&updated)?;
        }

        Ok(self.get(id).expect("stream present immediately after update"))
    }

    /// Idempotent: deleting an id a second time returns `Ok(())` rather than
    /// `NotFound`, since the id is known to have existed once. Only an id that
    /// never existed at all returns `NotFound`.
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<(), AppError> {
        self.stop_internal(id)?;

        let mut guard = self.streams.lock();
        let index = match guard.iter().position(|s| s.id == id) {
            Some(index) => index,
            None if self.deleted_ids.lock().contains(id) => return Ok(()),
            None => return Err(AppError::not_found(format!("stream '{id}' not found"))),
        };
        guard.remove(index);
        for (i, stream) in guard.iter_mut().enumerate() {
            stream.order = i as u32;
        }
        self.persist(&guard)?;
        drop(guard);
        self.extras.lock().remove(id);
        self.deleted_ids.lock().insert(id.to_string());
        info!(stream_id = %id, "stream deleted");
        Ok(())
    }

    #[instrument(skip(self, order))]
    pub fn reorder(&self, order: Vec<String>) -> Result<(), AppError> {
        let mut guard = self.streams.lock();
        if guard.len() <= 1 {
            return Ok(());
        }

        let mut unique = order.clone();
        unique.sort();
        unique.dedup();
        if unique.len() != order.len() || order.len() != guard.len() {
            return Err(AppError::invalid_order("order must list every stream id exactly once"));
        }
        for id in &order {
            if !guard.iter().any(|s| &s.id == id) {
                return Err(AppError::invalid_order(format!("unknown stream id '{id}' in order")));
            }
        }

        let mut reordered = Vec::with_capacity(guard.len());
        for (position, id) in order.iter().enumerate() {
            let mut stream = guard.iter().find(|s| &s.id == id).expect("id validated above").clone();
            stream.order = position as u32;
            reordered.push(stream);
        }
        *guard = reordered;
        self.persist(&guard)?;
        self.metrics.streams_reordered_total.inc();
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn start(self: &Arc<Self>, id: &str) -> Result<(), AppError> {
        // The existence check, the `workers` idempotency check, and the
        // concurrency-cap check-and-increment all happen under the same
        // `streams` lock so two concurrent `start()` calls for different ids can
        // never both observe room under `MAX_RUNNING_WORKERS` and both proceed.
        let stream = {
            let guard = self.streams.lock();
            let stream = guard
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or_else(|| AppError::not_found(format!("stream '{id}' not found")))?;

            if self.workers.contains_key(id) {
                return Ok(()); // already starting/running; Start is idempotent
            }
            if self.running_count.load(Ordering::SeqCst) >= MAX_RUNNING_WORKERS {
                return Err(AppError::concurrency_limit(MAX_RUNNING_WORKERS));
            }
            self.running_count.fetch_add(1, Ordering::SeqCst);
            stream
        };

        self.metrics.active_workers.set(self.running_count.load(Ordering::SeqCst) as i64);

        let hub = Hub::new(stream.id.clone(), self.metrics.clone());
        hub.spawn_scoring_task(Arc::new(crate::hub::MeanByteScoring));
        let sink: Arc<dyn StatusSink> = self.clone();
        let handle = WorkerHandle::spawn(stream, self.gpu.clone(), hub.clone(), self.metrics.clone(), sink);
        self.workers.insert(id.to_string(), WorkerEntry { handle, hub });
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn stop(&self, id: &str) -> Result<(), AppError> {
        {
            let guard = self.streams.lock();
            if !guard.iter().any(|s| s.id == id) {
                return Err(AppError::not_found(format!("stream '{id}' not found")));
            }
        }
        self.stop_internal(id)
    }

    pub fn hub(&self, id: &str) -> Option<Hub> {
        self.workers.get(id).map(|entry| entry.hub.clone())
    }

    pub fn worker_status(&self, id: &str) -> Option<StreamStatus> {
        self.workers.get(id).map(|entry| entry.handle.status())
    }

    pub fn gpu_backend(&self) -> crate::gpu::GpuBackend {
        self.gpu.backend()
    }

    pub fn ffmpeg_default_params(&self) -> Vec<String> {
        self.gpu.default_params()
    }

    fn stop_internal(&self, id: &str) -> Result<(), AppError> {
        if let Some((_, entry)) = self.workers.remove(id) {
            self.running_count.fetch_sub(1, Ordering::SeqCst);
            self.metrics.active_workers.set(self.running_count.load(Ordering::SeqCst) as i64);
            tokio::spawn(entry.handle.stop());
        }
        Ok(())
    }

    fn restart_locked(self: &Arc<Self>, stream: &Stream) -> Result<(), AppError> {
        self.stop_internal(&stream.id)?;
        self.start(&stream.id)
    }
}

impl StatusSink for Registry {
    fn on_transition(&self, stream_id: &str, status: StreamStatus) {
        let mut guard = self.streams.lock();
        if let Some(entry) = guard.iter_mut().find(|s| s.id == stream_id) {
            entry.status = status;
            let _ = self.persist(&guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuBackend;

    fn test_registry() -> (Arc<Registry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.yml"));
        let gpu = Arc::new(GpuRegistry::with_backend(GpuBackend::None));
        let metrics = Arc::new(crate::metrics::Metrics::new());
        let registry = Registry::load(store, gpu, metrics).unwrap();
        (registry, dir)
    }

    #[test]
    fn create_assigns_contiguous_order_and_persists_stopped() {
        let (registry, _dir) = test_registry();
        let s1 = registry.create("Front", "rtsp://10.0.0.5/a", vec![]).unwrap();
        let s2 = registry.create("Back", "rtsp://10.0.0.6/b", vec![]).unwrap();
        assert_eq!(s1.order, 0);
        assert_eq!(s2.order, 1);
        assert_eq!(s1.status, StreamStatus::Stopped);
    }

    #[test]
    fn create_rejects_case_insensitive_duplicate_name() {
        let (registry, _dir) = test_registry();
        registry.create("Front", "rtsp://10.0.0.5/a", vec![]).unwrap();
        let err = registry.create("FRONT", "rtsp://10.0.0.6/b", vec![]).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::DuplicateName);
    }

    #[test]
    fn delete_renumbers_remaining_orders_contiguously() {
        let (registry, _dir) = test_registry();
        let a = registry.create("A", "rtsp://h/a", vec![]).unwrap();
        let _b = registry.create("B", "rtsp://h/b", vec![]).unwrap();
        let c = registry.create("C", "rtsp://h/c", vec![]).unwrap();
        registry.delete(&a.id).unwrap();
        let remaining = registry.list();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining.iter().find(|s| s.id == c.id).unwrap().order, 1);
    }

    #[test]
    fn reorder_rejects_unknown_id() {
        let (registry, _dir) = test_registry();
        let a = registry.create("A", "rtsp://h/a", vec![]).unwrap();
        let _b = registry.create("B", "rtsp://h/b", vec![]).unwrap();
        let err = registry.reorder(vec![a.id, "does-not-exist".to_string()]).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidOrder);
    }

    #[test]
    fn reorder_applies_contiguous_order_matching_input() {
        let (registry, _dir) = test_registry();
        let a = registry.create("A", "rtsp://h/a", vec![]).unwrap();
        let b = registry.create("B", "rtsp://h/b", vec![]).unwrap();
        let c = registry.create("C", "rtsp://h/c", vec![]).unwrap();
        registry.reorder(vec![c.id.clone(), a.id.clone(), b.id.clone()]).unwrap();
        let list = registry.list();
        assert_eq!(list[0].id, c.id);
        assert_eq!(list[1].id, a.id);
        assert_eq!(list[2].id, b.id);
        assert_eq!(list[0].order, 0);
        assert_eq!(list[2].order, 2);
    }

    #[test]
    fn delete_unknown_id_is_not_found() {
        let (registry, _dir) = test_registry();
        let err = registry.delete("missing").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::NotFound);
    }

    #[test]
    fn deleting_a_known_id_twice_is_idempotent() {
        let (registry, _dir) = test_registry();
        let a = registry.create("A", "rtsp://h/a", vec![]).unwrap();
        registry.delete(&a.id).unwrap();
        registry.delete(&a.id).unwrap();
    }

    #[test]
    fn starting_the_fifth_stream_hits_the_concurrency_cap() {
        // A sequential sanity check on the cap arithmetic; the genuinely
        // concurrent race across real threads is covered by the integration
        // suite's `test_concurrency_cap`.
        let (registry, _dir) = test_registry();
        let ids: Vec<String> = (0..6)
            .map(|i| registry.create(&format!("Cam {i}"), &format!("rtsp://10.0.0.{i}/s"), vec![]).unwrap().id)
            .collect();

        let results: Vec<Result<(), AppError>> = ids.iter().map(|id| registry.start(id)).collect();
        let accepted = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results.iter().filter(|r| {
            matches!(r, Err(e) if e.code() == crate::error::ErrorCode::ConcurrencyLimit)
        }).count();
        assert_eq!(accepted, 4);
        assert_eq!(rejected, 2);

        for id in &ids {
            let _ = registry.stop(id);
        }
    }
}
