/// Per-file parse worker streaming owned chunks back to the coordinator
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use crate::chunk::{Chunk, ChunkTransmitter};
use crate::config::{LoaderConfig, QualityMode};
use crate::downsample::Downsampler;
use crate::error::{LoadError, LoadResult};
use crate::fetch::SourceFetcher;
use crate::ply::parse_ply_cancellable;

/// Identifies one dispatch of a file; messages carrying an older id are stale.
pub type LoadId = u64;

/// Request handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCommand {
    pub url: String,
    pub filename: String,
    pub quality_mode: QualityMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetching,
    Parsing,
    Downsampling,
    Streaming,
    Complete,
    Error,
}

/// Worker to coordinator messages.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Metadata { total_points: usize },
    Progress { message: String, progress: f32 },
    Chunk(Chunk),
    Complete,
    Error(LoadError),
}

impl WorkerMessage {
    /// Whether the worker sends nothing after this message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerMessage::Complete | WorkerMessage::Error(_))
    }
}

/// A message tagged with the load it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
    pub load_id: LoadId,
    pub message: WorkerMessage,
}

/// Tuning a worker needs, copied out of the loader config at dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerSettings {
    pub chunk_size: usize,
    pub downsample_threshold: usize,
    pub target_point_count: usize,
    pub max_header_bytes: usize,
}

impl From<&LoaderConfig> for WorkerSettings {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            downsample_threshold: config.downsample_threshold,
            target_point_count: config.target_point_count,
            max_header_bytes: config.max_header_bytes,
        }
    }
}

/// Owning side of a running worker thread.
pub struct WorkerHandle {
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Ask the worker to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the thread to exit. Returns `false` if it panicked outside
    /// the guarded pipeline.
    pub fn join(self) -> bool {
        self.join.join().is_ok()
    }
}

pub struct ParseWorker {
    load_id: LoadId,
    command: LoadCommand,
    settings: WorkerSettings,
    fetcher: Arc<dyn SourceFetcher>,
    events: Sender<WorkerEvent>,
    cancel: Arc<AtomicBool>,
    state: WorkerState,
}

impl ParseWorker {
    pub fn new(
        load_id: LoadId,
        command: LoadCommand,
        settings: WorkerSettings,
        fetcher: Arc<dyn SourceFetcher>,
        events: Sender<WorkerEvent>,
    ) -> Self {
        Self {
            load_id,
            command,
            settings,
            fetcher,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
            state: WorkerState::Idle,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run the pipeline on a dedicated thread.
    ///
    /// Panics inside the pipeline are caught and reported as
    /// [`LoadError::WorkerFault`].
    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        let cancel = Arc::clone(&self.cancel);
        let fault_events = self.events.clone();
        let load_id = self.load_id;

        let join = thread::Builder::new()
            .name(format!("ply-worker-{}", self.command.filename))
            .spawn(move || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.run())) {
                    let reason = panic_message(payload.as_ref());
                    log::warn!("Parse worker for load {} panicked: {}", load_id, reason);
                    let _ = fault_events.send(WorkerEvent {
                        load_id,
                        message: WorkerMessage::Error(LoadError::WorkerFault(reason)),
                    });
                }
            })?;

        Ok(WorkerHandle { cancel, join })
    }

    /// Run the pipeline on the current thread, ending with `Complete` or
    /// `Error` unless cancelled.
    pub fn run(mut self) {
        match self.execute() {
            Ok(()) => {
                self.transition(WorkerState::Complete);
                self.send(WorkerMessage::Complete);
            }
            Err(LoadError::Cancelled) => {
                log::debug!("Worker for {} stopped after cancel", self.command.filename);
            }
            Err(error) => {
                self.transition(WorkerState::Error);
                self.send(WorkerMessage::Error(error));
            }
        }
    }

    fn execute(&mut self) -> LoadResult<()> {
        self.transition(WorkerState::Fetching);
        let bytes = self.fetcher.fetch(&self.command.url)?;
        self.checkpoint()?;

        self.transition(WorkerState::Parsing);
        let parsed = parse_ply_cancellable(&bytes, self.settings.max_header_bytes, &self.cancel)?;
        drop(bytes);
        self.checkpoint()?;

        let total_points = parsed.len();
        if !self.send(WorkerMessage::Metadata { total_points }) {
            return Err(LoadError::Cancelled);
        }

        let needs_downsampling = self.command.quality_mode == QualityMode::Downsampled
            && total_points > self.settings.downsample_threshold;

        let points = if needs_downsampling {
            self.transition(WorkerState::Downsampling);
            let events = self.events.clone();
            let load_id = self.load_id;
            let mut report = |message: &str, progress: f32| {
                let _ = events.send(WorkerEvent {
                    load_id,
                    message: WorkerMessage::Progress {
                        message: message.to_string(),
                        progress,
                    },
                });
            };
            Downsampler::new(self.settings.target_point_count)
                .with_cancel(Arc::clone(&self.cancel))
                .downsample(&parsed, &mut report)?
                .points
        } else {
            parsed
        };
        self.checkpoint()?;

        self.transition(WorkerState::Streaming);
        let transmitter = ChunkTransmitter::new(self.settings.chunk_size);
        let expected = transmitter.chunk_count(points.len());
        let delivered = transmitter.transmit(&points, needs_downsampling, |chunk| {
            !self.is_cancelled() && self.send(WorkerMessage::Chunk(chunk))
        });

        if delivered < expected {
            return Err(LoadError::Cancelled);
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn checkpoint(&self) -> LoadResult<()> {
        if self.is_cancelled() {
            Err(LoadError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Returns `false` once the coordinator has hung up.
    fn send(&self, message: WorkerMessage) -> bool {
        self.events
            .send(WorkerEvent {
                load_id: self.load_id,
                message,
            })
            .is_ok()
    }

    fn transition(&mut self, next: WorkerState) {
        log::debug!(
            "Worker {} ({}): {:?} -> {:?}",
            self.load_id,
            self.command.filename,
            self.state,
            next
        );
        self.state = next;
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
