use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};

use super::geometry::PointGeometry;
use crate::error::{LoadError, LoadResult};

/// Resolving side of a pending load.
pub(crate) struct Completion {
    sender: SyncSender<LoadResult<PointGeometry>>,
}

impl Completion {
    pub fn resolve(self, result: LoadResult<PointGeometry>) {
        // The caller may have dropped its handle.
        let _ = self.sender.send(result);
    }
}

/// Pending result of [`LoadCoordinator::load_ply`](super::LoadCoordinator::load_ply).
///
/// Resolves once with the final geometry or the error that ended the load.
/// A coordinator dropped before resolving counts as a cancel.
pub struct LoadHandle {
    filename: String,
    receiver: Receiver<LoadResult<PointGeometry>>,
    settled: bool,
}

pub(crate) fn completion_pair(filename: &str) -> (Completion, LoadHandle) {
    let (sender, receiver) = mpsc::sync_channel(1);
    (
        Completion { sender },
        LoadHandle {
            filename: filename.to_string(),
            receiver,
            settled: false,
        },
    )
}

impl LoadHandle {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The result if the load has ended; `None` while pending or once taken.
    pub fn try_take(&mut self) -> Option<LoadResult<PointGeometry>> {
        if self.settled {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.settled = true;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.settled = true;
                Some(Err(LoadError::Cancelled))
            }
        }
    }

    /// Block until the load ends. The coordinator must be pumped from
    /// another thread, or already settled.
    ///
    /// `None` if [`try_take`](Self::try_take) already handed the result out.
    pub fn wait(self) -> Option<LoadResult<PointGeometry>> {
        if self.settled {
            return None;
        }
        Some(self.receiver.recv().unwrap_or(Err(LoadError::Cancelled)))
    }
}
