/// Load coordination: worker pool, request queue and geometry assembly
mod buffer_pool;
mod geometry;
mod handle;
mod load_state;
mod scheduler;

pub use buffer_pool::{BufferPool, PoolStats};
pub use geometry::{AttributeBuffer, AttributeKind, PointGeometry, compute_vertex_normals};
pub use handle::LoadHandle;
pub use load_state::LoadProgress;
pub use scheduler::{IdlePolicy, IdleScheduler, IdleTask, UpdateThrottle};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::chunk::Chunk;
use crate::config::{LoaderConfig, QualityMode};
use crate::downsample::format_count;
use crate::error::LoadError;
use crate::fetch::SourceFetcher;
use crate::listener::{LoadInfo, LoadListener};
use crate::worker::{
    LoadCommand, LoadId, ParseWorker, WorkerEvent, WorkerHandle, WorkerMessage, WorkerSettings,
};
use load_state::{LoadState, LoadTask};

/// Longest single wait inside [`LoadCoordinator::run_until_settled`].
const SETTLE_POLL: Duration = Duration::from_millis(50);

/// Owns the worker pool and turns streamed chunks into geometry.
///
/// Lives on the caller's thread. Workers report through a single channel
/// and nothing happens until the caller pumps it, so every listener callback
/// runs on the pumping thread.
pub struct LoadCoordinator {
    config: LoaderConfig,
    quality_mode: QualityMode,
    max_workers: usize,
    fetcher: Arc<dyn SourceFetcher>,
    listener: Box<dyn LoadListener>,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    queue: VecDeque<LoadTask>,
    active: HashMap<String, LoadState>,
    /// Cancelled workers that still hold a slot until their thread exits
    retiring: Vec<WorkerHandle>,
    pool: BufferPool,
    scheduler: IdleScheduler,
    throttle: UpdateThrottle,
    next_load_id: LoadId,
}

impl LoadCoordinator {
    pub fn new(
        config: LoaderConfig,
        fetcher: Arc<dyn SourceFetcher>,
        listener: Box<dyn LoadListener>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let policy = if config.use_idle_scheduling {
            IdlePolicy::Idle {
                timeout: config.idle_timeout(),
            }
        } else {
            IdlePolicy::Timer {
                delay: config.idle_fallback(),
            }
        };

        Self {
            quality_mode: config.quality_mode,
            max_workers: config.worker_limit(),
            pool: BufferPool::new(config.pool_max_bytes, config.pool_max_depth),
            scheduler: IdleScheduler::new(policy),
            throttle: UpdateThrottle::new(config.update_interval()),
            config,
            fetcher,
            listener,
            events_tx,
            events_rx,
            queue: VecDeque::new(),
            active: HashMap::new(),
            retiring: Vec::new(),
            next_load_id: 0,
        }
    }

    /// Quality mode applied to loads dispatched from now on.
    pub fn set_quality_mode(&mut self, mode: QualityMode) {
        self.quality_mode = mode;
    }

    pub fn quality_mode(&self) -> QualityMode {
        self.quality_mode
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Queue a file and start it if a worker slot is free.
    pub fn load_ply(&mut self, url: &str, filename: &str) -> LoadHandle {
        let (completion, handle) = handle::completion_pair(filename);
        self.queue.push_back(LoadTask {
            url: url.to_string(),
            filename: filename.to_string(),
            completion,
        });
        self.process_queue();
        handle
    }

    /// Start queued loads while slots are free. A request whose filename is
    /// already loading stays queued without blocking the ones behind it.
    fn process_queue(&mut self) {
        let mut index = 0;
        while self.busy_slots() < self.max_workers && index < self.queue.len() {
            if self.active.contains_key(&self.queue[index].filename) {
                index += 1;
                continue;
            }
            if let Some(task) = self.queue.remove(index) {
                self.start_load(task);
            }
        }
    }

    fn start_load(&mut self, task: LoadTask) {
        let load_id = self.next_load_id;
        self.next_load_id += 1;

        let command = LoadCommand {
            url: task.url.clone(),
            filename: task.filename.clone(),
            quality_mode: self.quality_mode,
        };
        let worker = ParseWorker::new(
            load_id,
            command,
            WorkerSettings::from(&self.config),
            Arc::clone(&self.fetcher),
            self.events_tx.clone(),
        );

        match worker.spawn() {
            Ok(handle) => {
                log::info!("Started loading {} from {}", task.filename, task.url);
                let filename = task.filename.clone();
                self.active
                    .insert(filename, LoadState::new(load_id, task, handle));
            }
            Err(e) => {
                let error = LoadError::WorkerFault(format!("failed to start worker: {}", e));
                log::warn!("[{}] {}", task.filename, error);
                self.listener.on_file_error(&task.filename, &error);
                task.completion.resolve(Err(error));
            }
        }
    }

    /// Handle worker events and due idle updates, waiting up to `timeout`
    /// for the first event. Returns the number of events handled.
    pub fn pump(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut handled = 0;

        loop {
            self.reap_retired();
            let finished = self.finished_workers();
            while let Ok(event) = self.events_rx.try_recv() {
                self.dispatch(event);
                handled += 1;
            }
            self.detect_faults(finished);
            self.run_idle_tasks(true);

            let now = Instant::now();
            if handled > 0 || now >= deadline || self.busy_slots() == 0 {
                return handled;
            }

            let wake = self
                .scheduler
                .next_deadline()
                .map_or(deadline, |due| due.min(deadline));
            match self
                .events_rx
                .recv_timeout(wake.saturating_duration_since(now))
            {
                Ok(event) => {
                    self.dispatch(event);
                    handled += 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return handled,
            }
        }
    }

    /// Pump until nothing is loading or queued.
    pub fn run_until_settled(&mut self) {
        while !self.is_settled() {
            self.pump(SETTLE_POLL);
        }
    }

    pub fn is_settled(&self) -> bool {
        self.active.is_empty() && self.queue.is_empty()
    }

    /// Loads with a running worker.
    pub fn active_workers(&self) -> usize {
        self.active.len()
    }

    /// Cancelled workers whose threads have not exited yet. They keep their
    /// slot, so queued loads wait for them.
    pub fn retiring_workers(&self) -> usize {
        self.retiring.len()
    }

    fn busy_slots(&self) -> usize {
        self.active.len() + self.retiring.len()
    }

    /// Free the slots of cancelled workers that have exited.
    fn reap_retired(&mut self) {
        let before = self.retiring.len();
        self.retiring.retain(|worker| !worker.is_finished());
        if self.retiring.len() < before {
            log::debug!("{} cancelled workers exited", before - self.retiring.len());
            self.process_queue();
        }
    }

    /// Requests waiting for a worker slot.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn progress(&self, filename: &str) -> Option<LoadProgress> {
        self.active.get(filename).map(LoadState::progress)
    }

    /// Hand geometry back so its storage can be reused by later builds.
    pub fn release_geometry(&mut self, geometry: PointGeometry) {
        self.pool.release_geometry(geometry);
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Stop every load. Active and queued handles resolve to
    /// [`LoadError::Cancelled`]; late messages from stopped workers are
    /// ignored. A stopped worker keeps its slot until its thread exits.
    pub fn cancel_all(&mut self) {
        let cancelled = self.active.len() + self.queue.len();

        for (_, mut state) in self.active.drain() {
            if let Some(worker) = state.worker.take() {
                worker.cancel();
                self.retiring.push(worker);
            }
            if let Some(live) = state.live_geometry.take() {
                self.pool.release_geometry(live);
            }
            state.completion.resolve(Err(LoadError::Cancelled));
        }
        for task in self.queue.drain(..) {
            task.completion.resolve(Err(LoadError::Cancelled));
        }
        self.scheduler.clear();

        if cancelled > 0 {
            log::info!("Cancelled {} loads", cancelled);
        }
    }

    fn filename_for(&self, load_id: LoadId) -> Option<String> {
        self.active
            .iter()
            .find(|(_, state)| state.load_id == load_id)
            .map(|(filename, _)| filename.clone())
    }

    /// Handle one event, then run any idle update that fell due meanwhile.
    fn dispatch(&mut self, event: WorkerEvent) {
        self.handle_event(event);
        self.run_idle_tasks(false);
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        let Some(filename) = self.filename_for(event.load_id) else {
            log::debug!("Dropping message from stale load {}", event.load_id);
            return;
        };

        match event.message {
            WorkerMessage::Metadata { total_points } => {
                if let Some(state) = self.active.get_mut(&filename) {
                    state.total_points = total_points;
                }
                log::info!("[{}] Total points: {}", filename, format_count(total_points));
            }
            WorkerMessage::Progress { message, progress } => {
                self.listener.on_file_progress(&filename, &message, progress);
            }
            WorkerMessage::Chunk(chunk) => self.handle_chunk(&filename, chunk),
            WorkerMessage::Complete => self.complete_load(&filename),
            WorkerMessage::Error(error) => self.fail_load(&filename, error),
        }
    }

    fn handle_chunk(&mut self, filename: &str, chunk: Chunk) {
        let Some(state) = self.active.get_mut(filename) else {
            return;
        };
        let now = Instant::now();
        let is_first = chunk.is_first;
        let is_last = chunk.is_last;
        let total = chunk.total_points;
        let chunk_end = chunk.chunk_end;

        log::debug!(
            "[{}] Chunk {}..{} of {}",
            filename,
            chunk.chunk_start,
            chunk_end,
            total
        );

        state.received_points = chunk_end;
        state.stream_total = total;
        state.was_downsampled = chunk.was_downsampled;
        state.chunks.push(chunk);

        if is_first {
            let preview = build_pooled(
                &state.chunks[..1],
                &mut self.pool,
                self.config.preallocation_factor,
            );
            let info = LoadInfo {
                is_preview: !is_last,
                total_expected_points: total,
                source_points: state.total_points,
                was_downsampled: state.was_downsampled,
                ..LoadInfo::default()
            };
            self.listener.on_file_loaded(filename, &preview, &info);
            self.pool.release_geometry(preview);
            state.last_update = Some(now);
        }

        let percent = if total > 0 {
            chunk_end as f32 / total as f32 * 100.0
        } else {
            100.0
        };
        self.listener.on_file_progress(
            filename,
            &format!(
                "Loading: {} / {} points",
                format_count(chunk_end),
                format_count(total)
            ),
            percent,
        );

        if !is_first && !is_last && self.throttle.admit(&mut state.last_update, now) {
            self.scheduler.schedule(filename, state.load_id, now);
        }
    }

    fn run_idle_tasks(&mut self, idle: bool) {
        for task in self.scheduler.take_due(Instant::now(), idle) {
            self.run_idle_update(task);
        }
    }

    /// First run builds pooled geometry from every chunk so far and keeps
    /// it; later runs append only the chunks that arrived since.
    fn run_idle_update(&mut self, task: IdleTask) {
        let Some(state) = self.active.get_mut(&task.filename) else {
            return;
        };
        if state.load_id != task.load_id {
            return;
        }

        let info = LoadInfo {
            is_preview: true,
            total_expected_points: state.stream_total,
            source_points: state.total_points,
            was_downsampled: state.was_downsampled,
            is_idle_update: true,
            is_incremental: false,
        };

        match state.live_geometry.as_mut() {
            Some(geometry) => {
                let fresh = &state.chunks[state.last_chunk_index..];
                if fresh.is_empty() {
                    return;
                }
                geometry.append_chunks(fresh);
                state.last_chunk_index = state.chunks.len();
                log::debug!(
                    "[{}] Grew live geometry to {} points",
                    task.filename,
                    geometry.point_count()
                );
                self.listener.on_file_loaded(
                    &task.filename,
                    geometry,
                    &LoadInfo {
                        is_incremental: true,
                        ..info
                    },
                );
            }
            None => {
                let geometry = build_pooled(
                    &state.chunks,
                    &mut self.pool,
                    self.config.preallocation_factor,
                );
                state.last_chunk_index = state.chunks.len();
                self.listener.on_file_loaded(&task.filename, &geometry, &info);
                state.live_geometry = Some(geometry);
            }
        }
    }

    fn complete_load(&mut self, filename: &str) {
        let Some(mut state) = self.active.remove(filename) else {
            return;
        };
        self.scheduler.discard(state.load_id);

        if let Some(live) = state.live_geometry.take() {
            self.pool.release_geometry(live);
        }

        let geometry = build_pooled(
            &state.chunks,
            &mut self.pool,
            self.config.preallocation_factor,
        );

        log::info!(
            "[{}] Loaded in {:.2}s - {} points",
            filename,
            state.started.elapsed().as_secs_f64(),
            format_count(state.received_points)
        );

        let info = LoadInfo {
            is_preview: false,
            total_expected_points: state.stream_total,
            source_points: state.total_points,
            was_downsampled: state.was_downsampled,
            is_idle_update: false,
            is_incremental: false,
        };
        self.listener.on_file_loaded(filename, &geometry, &info);
        state.completion.resolve(Ok(geometry));

        self.process_queue();
    }

    fn fail_load(&mut self, filename: &str, error: LoadError) {
        let Some(mut state) = self.active.remove(filename) else {
            return;
        };
        self.scheduler.discard(state.load_id);

        if let Some(live) = state.live_geometry.take() {
            self.pool.release_geometry(live);
        }

        log::warn!("[{}] Error loading {}: {}", filename, state.url, error);
        self.listener.on_file_error(filename, &error);
        state.completion.resolve(Err(error));

        self.process_queue();
    }

    /// Loads whose worker thread has already exited.
    fn finished_workers(&self) -> Vec<(String, LoadId)> {
        self.active
            .iter()
            .filter(|(_, state)| state.worker.as_ref().is_some_and(|w| w.is_finished()))
            .map(|(filename, state)| (filename.clone(), state.load_id))
            .collect()
    }

    /// A worker that had exited before the channel was drained, yet whose
    /// load is still active, went away without a final message.
    fn detect_faults(&mut self, finished: Vec<(String, LoadId)>) {
        for (filename, load_id) in finished {
            let still_active = self
                .active
                .get(&filename)
                .is_some_and(|state| state.load_id == load_id);
            if still_active {
                self.fail_load(
                    &filename,
                    LoadError::WorkerFault("worker exited without completing".into()),
                );
            }
        }
    }
}

impl Drop for LoadCoordinator {
    fn drop(&mut self) {
        for state in self.active.values() {
            if let Some(worker) = &state.worker {
                worker.cancel();
            }
        }
    }
}

fn build_pooled(
    chunks: &[Chunk],
    pool: &mut BufferPool,
    preallocation_factor: f64,
) -> PointGeometry {
    PointGeometry::assemble(chunks, true, |kind, floats| {
        pool.acquire(kind, (floats as f64 * preallocation_factor).ceil() as usize)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkTransmitter;
    use crate::error::LoadResult;
    use crate::fetch::MemoryFetcher;
    use crate::ply::write_binary_ply;
    use crate::point_set::PointSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Loaded(String, usize, LoadInfo),
        Error(String, LoadError),
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Seen>>>);

    impl LoadListener for Recorder {
        fn on_file_loaded(&mut self, filename: &str, geometry: &PointGeometry, info: &LoadInfo) {
            self.0.lock().unwrap().push(Seen::Loaded(
                filename.to_string(),
                geometry.point_count(),
                *info,
            ));
        }

        fn on_file_error(&mut self, filename: &str, error: &LoadError) {
            self.0
                .lock()
                .unwrap()
                .push(Seen::Error(filename.to_string(), error.clone()));
        }
    }

    fn cloud(count: usize) -> Vec<u8> {
        let positions = (0..count).map(|i| [i as f32, 0.0, (i % 5) as f32]).collect();
        let mut bytes = Vec::new();
        write_binary_ply(&PointSet::new(positions, None, None), &mut bytes).unwrap();
        bytes
    }

    /// Fetch that blocks until the gate opens.
    struct GatedFetcher {
        inner: MemoryFetcher,
        open: Arc<AtomicBool>,
    }

    impl GatedFetcher {
        fn new(inner: MemoryFetcher) -> (Arc<Self>, Arc<AtomicBool>) {
            let open = Arc::new(AtomicBool::new(false));
            let fetcher = Arc::new(Self {
                inner,
                open: Arc::clone(&open),
            });
            (fetcher, open)
        }
    }

    impl SourceFetcher for GatedFetcher {
        fn fetch(&self, url: &str) -> LoadResult<Vec<u8>> {
            while !self.open.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.inner.fetch(url)
        }
    }

    fn config(chunk_size: usize) -> LoaderConfig {
        LoaderConfig {
            max_workers: Some(2),
            chunk_size,
            update_interval_ms: 0,
            ..LoaderConfig::default()
        }
    }

    #[test]
    fn single_chunk_file_is_delivered_final_twice() {
        let fetcher = Arc::new(MemoryFetcher::new().with_file("a.ply", cloud(10)));
        let recorder = Recorder::default();
        let mut coordinator =
            LoadCoordinator::new(config(100), fetcher, Box::new(recorder.clone()));

        let mut handle = coordinator.load_ply("a.ply", "a.ply");
        coordinator.run_until_settled();

        assert_eq!(handle.try_take().unwrap().unwrap().point_count(), 10);
        let seen = recorder.0.lock().unwrap();
        let flags: Vec<bool> = seen
            .iter()
            .map(|s| match s {
                Seen::Loaded(_, _, info) => info.is_preview,
                Seen::Error(..) => panic!("unexpected error"),
            })
            .collect();
        assert_eq!(flags, vec![false, false]);
    }

    #[test]
    fn duplicate_filename_waits_for_running_load() {
        let fetcher = Arc::new(MemoryFetcher::new().with_file("a.ply", cloud(10)));
        let mut coordinator = LoadCoordinator::new(config(100), fetcher, Box::new(()));

        let mut first = coordinator.load_ply("a.ply", "a.ply");
        let mut second = coordinator.load_ply("a.ply", "a.ply");
        assert_eq!(coordinator.active_workers(), 1);
        assert_eq!(coordinator.queued(), 1);

        coordinator.run_until_settled();
        assert!(first.try_take().unwrap().is_ok());
        assert!(second.try_take().unwrap().is_ok());
    }

    #[test]
    fn stale_events_are_ignored() {
        let mut coordinator =
            LoadCoordinator::new(config(100), Arc::new(MemoryFetcher::new()), Box::new(()));
        coordinator.handle_event(WorkerEvent {
            load_id: 99,
            message: WorkerMessage::Complete,
        });
        assert!(coordinator.is_settled());
    }

    #[test]
    fn progress_reports_received_over_total() {
        let fetcher = Arc::new(MemoryFetcher::new().with_file("a.ply", cloud(10)));
        let mut coordinator = LoadCoordinator::new(config(4), fetcher, Box::new(()));
        let _handle = coordinator.load_ply("a.ply", "a.ply");

        assert_eq!(coordinator.progress("a.ply").map(|p| p.received), Some(0));
        assert!(coordinator.progress("b.ply").is_none());

        coordinator.run_until_settled();
        assert!(coordinator.progress("a.ply").is_none());
    }

    #[test]
    fn build_pooled_reserves_half_again() {
        let mut pool = BufferPool::default();
        let set = PointSet::new(vec![[0.0; 3]; 10], None, None);
        let chunks: Vec<Chunk> = crate::chunk::ChunkTransmitter::new(10)
            .chunks(&set, false)
            .collect();

        let geometry = build_pooled(&chunks, &mut pool, 1.5);
        assert_eq!(geometry.positions().capacity(), 45);
        assert_eq!(geometry.positions().len(), 30);
        assert!(geometry.is_pooled());
    }

    #[test]
    fn worker_exiting_without_final_message_is_a_fault() {
        let (fetcher, open) = GatedFetcher::new(MemoryFetcher::new().with_file("a.ply", cloud(10)));
        let recorder = Recorder::default();
        let mut coordinator =
            LoadCoordinator::new(config(100), fetcher, Box::new(recorder.clone()));
        let mut handle = coordinator.load_ply("a.ply", "a.ply");

        // A worker stopped behind the coordinator's back exits without a word
        let worker = coordinator.active.get("a.ply").and_then(|s| s.worker.as_ref());
        worker.unwrap().cancel();
        open.store(true, Ordering::SeqCst);
        coordinator.run_until_settled();

        let fault = LoadError::WorkerFault("worker exited without completing".into());
        assert_eq!(handle.try_take(), Some(Err(fault.clone())));
        assert_eq!(*recorder.0.lock().unwrap(), vec![Seen::Error("a.ply".into(), fault)]);
    }

    #[test]
    fn idle_updates_wait_for_the_event_queue_to_drain() {
        let (fetcher, open) = GatedFetcher::new(MemoryFetcher::new());
        let recorder = Recorder::default();
        let config = LoaderConfig {
            idle_timeout_ms: 60_000,
            ..config(10)
        };
        let mut coordinator = LoadCoordinator::new(config, fetcher, Box::new(recorder.clone()));
        let mut handle = coordinator.load_ply("a.ply", "a.ply");

        // Feed the stream by hand while the real worker sits at the gate
        let load_id = coordinator.active["a.ply"].load_id;
        let events = coordinator.events_tx.clone();
        let send = |message| events.send(WorkerEvent { load_id, message }).unwrap();
        let set = PointSet::new((0..50).map(|i| [i as f32, 0.0, 0.0]).collect(), None, None);
        let mut chunks = ChunkTransmitter::new(10).chunks(&set, false);
        let mut next_chunk = || WorkerMessage::Chunk(chunks.next().unwrap());

        send(WorkerMessage::Metadata { total_points: 50 });
        send(next_chunk());
        coordinator.pump(Duration::ZERO);

        // Both chunks are drained before the single pending update runs
        send(next_chunk());
        send(next_chunk());
        coordinator.pump(Duration::ZERO);

        send(next_chunk());
        coordinator.pump(Duration::ZERO);

        send(next_chunk());
        send(WorkerMessage::Complete);
        coordinator.pump(Duration::ZERO);
        open.store(true, Ordering::SeqCst);

        let seen: Vec<(usize, bool, bool, bool)> = recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|s| match s {
                Seen::Loaded(_, points, info) => (
                    *points,
                    info.is_preview,
                    info.is_idle_update,
                    info.is_incremental,
                ),
                Seen::Error(_, error) => panic!("unexpected error {}", error),
            })
            .collect();
        assert_eq!(
            seen,
            vec![
                (10, true, false, false),
                (30, true, true, false),
                (40, true, true, true),
                (50, false, false, false),
            ]
        );
        assert_eq!(handle.try_take().unwrap().unwrap().point_count(), 50);
    }
}
