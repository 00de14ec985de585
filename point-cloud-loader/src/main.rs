/// Point cloud loader command line entry point
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use point_cloud_loader::{
    HttpFetcher, LoadCoordinator, LoadError, LoadInfo, LoadListener, LoaderConfig,
    PointCloudBounds, PointGeometry, QualityMode, write_binary_ply,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "point-cloud-loader",
    about = "Stream PLY point clouds through the worker pool and report what arrived"
)]
struct Args {
    /// PLY files, file:// or http(s) URLs
    #[arg(required = true)]
    sources: Vec<String>,

    #[arg(long, value_enum)]
    quality: Option<QualityMode>,

    /// Concurrent parse workers
    #[arg(long)]
    workers: Option<usize>,

    /// JSON loader config; missing keys keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a JSON load summary here
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Write each loaded cloud as binary PLY into this directory
    #[arg(long)]
    export: Option<PathBuf>,
}

type FinalInfos = Arc<Mutex<HashMap<String, LoadInfo>>>;

/// One progress bar per file, fed by coordinator callbacks
struct ProgressListener {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: HashMap<String, ProgressBar>,
    final_infos: FinalInfos,
}

impl ProgressListener {
    fn new(final_infos: FinalInfos) -> Result<Self, Box<dyn std::error::Error>> {
        let style = ProgressStyle::default_bar()
            .template("[{bar:40.green/blue}] {percent:>3}% {prefix} {msg}")?
            .progress_chars("▉▊▋▌▍▎▏ ");
        Ok(Self {
            multi: MultiProgress::new(),
            style,
            bars: HashMap::new(),
            final_infos,
        })
    }

    fn bar(&mut self, filename: &str) -> &ProgressBar {
        self.bars.entry(filename.to_string()).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new(100));
            pb.set_style(self.style.clone());
            pb.set_prefix(filename.to_string());
            pb
        })
    }
}

impl LoadListener for ProgressListener {
    fn on_file_loaded(&mut self, filename: &str, geometry: &PointGeometry, info: &LoadInfo) {
        if info.is_preview {
            return;
        }
        let message = format!("{} points", geometry.point_count());
        self.bar(filename).finish_with_message(message);
        if let Ok(mut infos) = self.final_infos.lock() {
            infos.insert(filename.to_string(), *info);
        }
    }

    fn on_file_progress(&mut self, filename: &str, message: &str, percent: f32) {
        let pb = self.bar(filename);
        pb.set_position(percent.clamp(0.0, 100.0) as u64);
        pb.set_message(message.to_string());
    }

    fn on_file_error(&mut self, filename: &str, error: &LoadError) {
        self.bar(filename).abandon_with_message(error.to_string());
    }
}

#[derive(Serialize)]
struct FileSummary {
    source: String,
    filename: String,
    points: usize,
    source_points: usize,
    was_downsampled: bool,
    normals_from_source: bool,
    bounds: Option<PointCloudBounds>,
    error: Option<String>,
}

#[derive(Serialize)]
struct LoadSummary {
    quality_mode: QualityMode,
    workers: usize,
    elapsed_seconds: f64,
    files: Vec<FileSummary>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_json_file(path)?,
        None => LoaderConfig::default(),
    };
    if let Some(quality) = args.quality {
        config.quality_mode = quality;
    }
    if let Some(workers) = args.workers {
        config.max_workers = Some(workers);
    }
    if let Some(dir) = &args.export {
        std::fs::create_dir_all(dir)?;
    }

    let final_infos = FinalInfos::default();
    let listener = ProgressListener::new(Arc::clone(&final_infos))?;
    let mut coordinator =
        LoadCoordinator::new(config, Arc::new(HttpFetcher::new()?), Box::new(listener));

    println!(
        "Loading {} files with up to {} workers ({:?} quality)",
        args.sources.len(),
        coordinator.max_workers(),
        coordinator.quality_mode()
    );

    let start = Instant::now();
    let handles: Vec<_> = args
        .sources
        .iter()
        .map(|source| {
            let filename = file_name(source);
            (source.clone(), coordinator.load_ply(source, &filename))
        })
        .collect();
    coordinator.run_until_settled();
    let elapsed = start.elapsed().as_secs_f64();

    let mut files = Vec::with_capacity(handles.len());
    for (source, mut handle) in handles {
        let filename = handle.filename().to_string();
        let result = handle.try_take().unwrap_or(Err(LoadError::Cancelled));

        match result {
            Ok(geometry) => {
                let info = final_infos
                    .lock()
                    .ok()
                    .and_then(|infos| infos.get(&filename).copied())
                    .unwrap_or_default();

                println!(
                    "{}: {} points{}",
                    filename,
                    geometry.point_count(),
                    if info.was_downsampled {
                        format!(" (downsampled from {})", info.source_points)
                    } else {
                        String::new()
                    }
                );

                if let Some(dir) = &args.export {
                    let path = export_path(dir, &filename);
                    let mut out = BufWriter::new(File::create(&path)?);
                    write_binary_ply(&geometry.to_point_set(), &mut out)?;
                    println!("Saved {}", path.display());
                }

                files.push(FileSummary {
                    source,
                    filename,
                    points: geometry.point_count(),
                    source_points: info.source_points,
                    was_downsampled: info.was_downsampled,
                    normals_from_source: geometry.normals_from_source(),
                    bounds: (!geometry.is_empty()).then(|| *geometry.bounds()),
                    error: None,
                });
                coordinator.release_geometry(geometry);
            }
            Err(error) => {
                println!("{}: failed - {}", filename, error);
                files.push(FileSummary {
                    source,
                    filename,
                    points: 0,
                    source_points: 0,
                    was_downsampled: false,
                    normals_from_source: false,
                    bounds: None,
                    error: Some(error.to_string()),
                });
            }
        }
    }

    let loaded = files.iter().filter(|f| f.error.is_none()).count();
    println!("Processing complete:");
    println!("  Loaded {} of {} files in {:.2}s", loaded, files.len(), elapsed);
    println!(
        "  Total points: {}",
        files.iter().map(|f| f.points).sum::<usize>()
    );

    if let Some(path) = &args.summary {
        let summary = LoadSummary {
            quality_mode: coordinator.quality_mode(),
            workers: coordinator.max_workers(),
            elapsed_seconds: elapsed,
            files,
        };
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
        println!("Saved {}", path.display());
    }

    Ok(())
}

/// Last path segment of a path or URL
fn file_name(source: &str) -> String {
    let trimmed = source.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

fn export_path(dir: &Path, filename: &str) -> PathBuf {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cloud");
    dir.join(format!("{}.ply", stem))
}
