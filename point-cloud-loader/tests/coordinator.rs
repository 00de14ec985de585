use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use point_cloud_loader::{
    LoadCoordinator, LoadError, LoadInfo, LoadListener, LoadResult, LoaderConfig, MemoryFetcher,
    PointGeometry, PointSet, QualityMode, SourceFetcher, write_binary_ply,
};

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone)]
struct Delivery {
    filename: String,
    points: usize,
    capacity: usize,
    reallocations: usize,
    info: LoadInfo,
}

#[derive(Clone, Default)]
struct Recorder {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    errors: Arc<Mutex<Vec<(String, LoadError)>>>,
    log: Log,
}

impl Recorder {
    fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    fn finals(&self) -> Vec<Delivery> {
        self.deliveries()
            .into_iter()
            .filter(|d| !d.info.is_preview)
            .collect()
    }
}

impl LoadListener for Recorder {
    fn on_file_loaded(&mut self, filename: &str, geometry: &PointGeometry, info: &LoadInfo) {
        if !info.is_preview {
            self.log.lock().unwrap().push(format!("done:{}", filename));
        }
        self.deliveries.lock().unwrap().push(Delivery {
            filename: filename.to_string(),
            points: geometry.point_count(),
            capacity: geometry.positions().capacity() / 3,
            reallocations: geometry.positions().reallocations(),
            info: *info,
        });
    }

    fn on_file_error(&mut self, filename: &str, error: &LoadError) {
        self.log.lock().unwrap().push(format!("error:{}", filename));
        self.errors
            .lock()
            .unwrap()
            .push((filename.to_string(), error.clone()));
    }
}

/// Memory source that sleeps inside fetch and tracks overlapping calls.
struct SlowFetcher {
    inner: MemoryFetcher,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    log: Log,
}

impl SlowFetcher {
    fn new(inner: MemoryFetcher, delay: Duration, log: Log) -> Self {
        Self {
            inner,
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            log,
        }
    }
}

impl SourceFetcher for SlowFetcher {
    fn fetch(&self, url: &str) -> LoadResult<Vec<u8>> {
        self.log.lock().unwrap().push(format!("fetch:{}", url));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.fetch(url)
    }
}

fn line_cloud(count: usize) -> Vec<u8> {
    let positions = (0..count)
        .map(|i| [i as f32 * 0.5, (i % 3) as f32, (i % 11) as f32])
        .collect();
    let mut bytes = Vec::new();
    write_binary_ply(&PointSet::new(positions, None, None), &mut bytes).unwrap();
    bytes
}

fn lattice_cloud(side: usize) -> Vec<u8> {
    let mut positions = Vec::with_capacity(side * side * side);
    for x in 0..side {
        for y in 0..side {
            for z in 0..side {
                positions.push([x as f32, y as f32, z as f32]);
            }
        }
    }
    let colors = Some(vec![[0.2, 0.4, 0.6]; positions.len()]);
    let mut bytes = Vec::new();
    write_binary_ply(&PointSet::new(positions, colors, None), &mut bytes).unwrap();
    bytes
}

fn config(max_workers: usize, chunk_size: usize) -> LoaderConfig {
    LoaderConfig {
        max_workers: Some(max_workers),
        chunk_size,
        update_interval_ms: 0,
        ..LoaderConfig::default()
    }
}

#[test]
fn preview_then_incremental_updates_then_final() {
    let fetcher = Arc::new(MemoryFetcher::new().with_file("scan.ply", line_cloud(50)));
    let recorder = Recorder::default();
    let config = LoaderConfig {
        use_idle_scheduling: false,
        idle_fallback_ms: 0,
        ..config(1, 10)
    };
    let mut coordinator = LoadCoordinator::new(config, fetcher, Box::new(recorder.clone()));

    let mut handle = coordinator.load_ply("scan.ply", "scan.ply");
    coordinator.run_until_settled();

    let deliveries = recorder.deliveries();
    let summary: Vec<(usize, bool, bool, bool)> = deliveries
        .iter()
        .map(|d| {
            (
                d.points,
                d.info.is_preview,
                d.info.is_idle_update,
                d.info.is_incremental,
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (10, true, false, false),
            (20, true, true, false),
            (30, true, true, true),
            (40, true, true, true),
            (50, false, false, false),
        ]
    );

    // 20 points pooled at 1.5x leave room for the third chunk, not the fourth
    assert_eq!(deliveries[1].capacity, 30);
    assert_eq!(deliveries[2].reallocations, 0);
    assert_eq!(deliveries[3].reallocations, 1);
    assert_eq!(deliveries[3].capacity, 60);

    let geometry = handle.try_take().unwrap().unwrap();
    assert_eq!(geometry.point_count(), 50);
    assert!(!geometry.normals_from_source());
    assert_eq!(deliveries[4].info.total_expected_points, 50);
    assert!(!deliveries[4].info.was_downsampled);
}

#[test]
fn throttle_suppresses_updates_inside_interval() {
    let fetcher = Arc::new(MemoryFetcher::new().with_file("scan.ply", line_cloud(50)));
    let recorder = Recorder::default();
    let config = LoaderConfig {
        update_interval_ms: 60_000,
        use_idle_scheduling: false,
        idle_fallback_ms: 0,
        ..config(1, 10)
    };
    let mut coordinator = LoadCoordinator::new(config, fetcher, Box::new(recorder.clone()));

    let _handle = coordinator.load_ply("scan.ply", "scan.ply");
    coordinator.run_until_settled();

    let points: Vec<usize> = recorder.deliveries().iter().map(|d| d.points).collect();
    assert_eq!(points, vec![10, 50]);
}

#[test]
fn incremental_growth_keeps_merged_prefix() {
    let fetcher = Arc::new(MemoryFetcher::new().with_file("scan.ply", line_cloud(97)));
    let captured: Arc<Mutex<Vec<Vec<f32>>>> = Arc::default();

    struct Capture(Arc<Mutex<Vec<Vec<f32>>>>);
    impl LoadListener for Capture {
        fn on_file_loaded(&mut self, _: &str, geometry: &PointGeometry, info: &LoadInfo) {
            if info.is_idle_update {
                self.0
                    .lock()
                    .unwrap()
                    .push(geometry.positions().as_slice().to_vec());
            }
        }
    }

    let config = LoaderConfig {
        use_idle_scheduling: false,
        idle_fallback_ms: 0,
        ..config(1, 7)
    };
    let mut coordinator =
        LoadCoordinator::new(config, fetcher, Box::new(Capture(Arc::clone(&captured))));
    let mut handle = coordinator.load_ply("scan.ply", "scan.ply");
    coordinator.run_until_settled();

    let snapshots = captured.lock().unwrap();
    assert!(snapshots.len() > 3);
    for pair in snapshots.windows(2) {
        assert!(pair[1].len() > pair[0].len());
        assert_eq!(&pair[1][..pair[0].len()], pair[0].as_slice());
    }

    let geometry = handle.try_take().unwrap().unwrap();
    let last = snapshots.last().unwrap();
    assert_eq!(&geometry.positions().as_slice()[..last.len()], last.as_slice());
    assert_eq!(geometry.point_count(), 97);
}

#[test]
fn concurrent_workers_never_exceed_pool_size() {
    let log = Log::default();
    let mut inner = MemoryFetcher::new();
    for i in 0..6 {
        inner = inner.with_file(format!("f{}.ply", i), line_cloud(20 + i));
    }
    let fetcher = Arc::new(SlowFetcher::new(inner, Duration::from_millis(30), log));
    let mut coordinator = LoadCoordinator::new(
        config(2, 100),
        Arc::clone(&fetcher) as Arc<dyn SourceFetcher>,
        Box::new(()),
    );

    let mut handles: Vec<_> = (0..6)
        .map(|i| coordinator.load_ply(&format!("f{}.ply", i), &format!("f{}.ply", i)))
        .collect();
    assert_eq!(coordinator.active_workers(), 2);
    assert_eq!(coordinator.queued(), 4);

    coordinator.run_until_settled();

    assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 2);
    for (i, handle) in handles.iter_mut().enumerate() {
        assert_eq!(handle.try_take().unwrap().unwrap().point_count(), 20 + i);
    }
}

#[test]
fn pool_of_one_fetches_next_file_only_after_completion() {
    let log = Log::default();
    let inner = MemoryFetcher::new()
        .with_file("a.ply", line_cloud(30))
        .with_file("b.ply", line_cloud(40));
    let fetcher = Arc::new(SlowFetcher::new(inner, Duration::from_millis(20), Arc::clone(&log)));
    let recorder = Recorder {
        log: Arc::clone(&log),
        ..Recorder::default()
    };
    let mut coordinator = LoadCoordinator::new(config(1, 10), fetcher, Box::new(recorder.clone()));

    let _a = coordinator.load_ply("a.ply", "a.ply");
    let _b = coordinator.load_ply("b.ply", "b.ply");
    coordinator.run_until_settled();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["fetch:a.ply", "done:a.ply", "fetch:b.ply", "done:b.ply"]
    );
    let finals: Vec<String> = recorder.finals().into_iter().map(|d| d.filename).collect();
    assert_eq!(finals, vec!["a.ply", "b.ply"]);
}

#[test]
fn failures_stay_scoped_to_their_file() {
    let fetcher = Arc::new(
        MemoryFetcher::new()
            .with_file("good.ply", line_cloud(12))
            .with_file(
                "flat.ply",
                b"ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nend_header\n1 2\n".to_vec(),
            )
            .with_file("junk.ply", b"not a ply file at all".to_vec()),
    );
    let recorder = Recorder::default();
    let mut coordinator = LoadCoordinator::new(config(1, 10), fetcher, Box::new(recorder.clone()));

    let mut missing = coordinator.load_ply("missing.ply", "missing.ply");
    let mut flat = coordinator.load_ply("flat.ply", "flat.ply");
    let mut junk = coordinator.load_ply("junk.ply", "junk.ply");
    let mut good = coordinator.load_ply("good.ply", "good.ply");
    coordinator.run_until_settled();

    assert_eq!(
        missing.try_take().unwrap(),
        Err(LoadError::Fetch {
            url: "missing.ply".into(),
            status: 404
        })
    );
    assert!(matches!(
        flat.try_take().unwrap(),
        Err(LoadError::MissingPositionAttribute(_))
    ));
    assert!(matches!(
        junk.try_take().unwrap(),
        Err(LoadError::MalformedHeader(_))
    ));
    assert_eq!(good.try_take().unwrap().unwrap().point_count(), 12);

    let errored: Vec<String> = recorder
        .errors
        .lock()
        .unwrap()
        .iter()
        .map(|(f, _)| f.clone())
        .collect();
    assert_eq!(errored, vec!["missing.ply", "flat.ply", "junk.ply"]);
}

#[test]
fn cancel_all_rejects_active_and_queued_loads() {
    let log = Log::default();
    let inner = MemoryFetcher::new()
        .with_file("a.ply", line_cloud(30))
        .with_file("b.ply", line_cloud(30))
        .with_file("c.ply", line_cloud(30));
    let fetcher = Arc::new(SlowFetcher::new(inner, Duration::from_millis(150), log));
    let recorder = Recorder::default();
    let mut coordinator = LoadCoordinator::new(config(1, 10), fetcher, Box::new(recorder.clone()));

    let mut handles = vec![
        coordinator.load_ply("a.ply", "a.ply"),
        coordinator.load_ply("b.ply", "b.ply"),
        coordinator.load_ply("c.ply", "c.ply"),
    ];
    coordinator.cancel_all();

    assert!(coordinator.is_settled());
    for handle in handles.iter_mut() {
        assert_eq!(handle.try_take().unwrap(), Err(LoadError::Cancelled));
    }

    // Anything the stopped worker still sends is dropped.
    thread::sleep(Duration::from_millis(250));
    coordinator.pump(Duration::from_millis(10));
    assert!(recorder.deliveries().is_empty());
    assert!(recorder.errors.lock().unwrap().is_empty());
}

#[test]
fn reload_after_cancel_waits_for_the_stopped_worker() {
    let log = Log::default();
    let inner = MemoryFetcher::new()
        .with_file("a.ply", line_cloud(30))
        .with_file("b.ply", line_cloud(40));
    let fetcher = Arc::new(SlowFetcher::new(inner, Duration::from_millis(200), Arc::clone(&log)));
    let recorder = Recorder {
        log: Arc::clone(&log),
        ..Recorder::default()
    };
    let mut coordinator = LoadCoordinator::new(
        config(1, 10),
        Arc::clone(&fetcher) as Arc<dyn SourceFetcher>,
        Box::new(recorder.clone()),
    );

    let mut a = coordinator.load_ply("a.ply", "a.ply");
    coordinator.cancel_all();
    coordinator.set_quality_mode(QualityMode::Original);
    let mut b = coordinator.load_ply("b.ply", "b.ply");

    // The stopped worker is still inside its fetch and keeps the only slot
    assert_eq!(coordinator.active_workers(), 0);
    assert_eq!(coordinator.retiring_workers(), 1);
    assert_eq!(coordinator.queued(), 1);

    coordinator.run_until_settled();

    assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.retiring_workers(), 0);
    assert_eq!(a.try_take().unwrap(), Err(LoadError::Cancelled));
    assert_eq!(b.try_take().unwrap().unwrap().point_count(), 40);
    assert_eq!(*log.lock().unwrap(), vec!["fetch:a.ply", "fetch:b.ply", "done:b.ply"]);
}

#[test]
fn oversized_file_is_downsampled_and_streamed_in_chunks() {
    let fetcher = Arc::new(MemoryFetcher::new().with_file("big.ply", lattice_cloud(37)));
    let recorder = Recorder::default();
    let config = LoaderConfig {
        downsample_threshold: 40_000,
        target_point_count: 30_000,
        ..config(1, 5_000)
    };
    let mut coordinator = LoadCoordinator::new(config, fetcher, Box::new(recorder.clone()));

    let mut handle = coordinator.load_ply("big.ply", "big.ply");
    coordinator.run_until_settled();
    let geometry = handle.try_take().unwrap().unwrap();

    let source = 37 * 37 * 37;
    let kept = geometry.point_count();
    assert!(kept < source);
    assert!((25_000..=40_000).contains(&kept));

    let deliveries = recorder.deliveries();
    assert_eq!(deliveries[0].points, 5_000);
    assert!(deliveries[0].info.is_preview);

    let last = deliveries.last().unwrap();
    assert!(!last.info.is_preview);
    assert!(last.info.was_downsampled);
    assert_eq!(last.info.total_expected_points, kept);
    assert_eq!(last.info.source_points, source);
    for colour in geometry.colors().as_points() {
        for (got, want) in colour.iter().zip([0.2f32, 0.4, 0.6]) {
            assert!((got - want).abs() < 1e-6);
        }
    }
}

#[test]
fn original_quality_streams_every_point() {
    let fetcher = Arc::new(MemoryFetcher::new().with_file("big.ply", lattice_cloud(37)));
    let recorder = Recorder::default();
    let config = LoaderConfig {
        downsample_threshold: 40_000,
        target_point_count: 30_000,
        ..config(1, 5_000)
    };
    let mut coordinator = LoadCoordinator::new(config, fetcher, Box::new(recorder.clone()));
    coordinator.set_quality_mode(QualityMode::Original);

    let mut handle = coordinator.load_ply("big.ply", "big.ply");
    coordinator.run_until_settled();

    assert_eq!(handle.try_take().unwrap().unwrap().point_count(), 37 * 37 * 37);
    let last = recorder.finals().pop().unwrap();
    assert!(!last.info.was_downsampled);
}

#[test]
fn released_geometry_storage_is_reused() {
    let fetcher = Arc::new(
        MemoryFetcher::new()
            .with_file("a.ply", line_cloud(40))
            .with_file("b.ply", line_cloud(40)),
    );
    let mut coordinator = LoadCoordinator::new(config(1, 100), fetcher, Box::new(()));

    let mut a = coordinator.load_ply("a.ply", "a.ply");
    coordinator.run_until_settled();
    let geometry = a.try_take().unwrap().unwrap();
    coordinator.release_geometry(geometry);

    let reused_before = coordinator.pool().stats().reused;
    let mut b = coordinator.load_ply("b.ply", "b.ply");
    coordinator.run_until_settled();

    assert!(b.try_take().unwrap().is_ok());
    assert!(coordinator.pool().stats().reused > reused_before);
}
