use serde::Serialize;

use crate::coordinator::PointGeometry;
use crate::error::LoadError;

/// Flags describing a geometry delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadInfo {
    /// More points are still on the way
    pub is_preview: bool,
    /// Points in the stream, after any reduction
    pub total_expected_points: usize,
    /// Points in the file as parsed
    pub source_points: usize,
    pub was_downsampled: bool,
    pub is_idle_update: bool,
    /// Same geometry as the previous idle update, grown in place
    pub is_incremental: bool,
}

/// Callbacks the coordinator drives from its own thread.
///
/// Geometry is lent for the duration of the call. Preview and incremental
/// deliveries are rebuilt or recycled afterwards, so copy out anything that
/// must outlive the callback.
pub trait LoadListener: Send {
    fn on_file_loaded(&mut self, _filename: &str, _geometry: &PointGeometry, _info: &LoadInfo) {}

    fn on_file_progress(&mut self, _filename: &str, _message: &str, _percent: f32) {}

    fn on_file_error(&mut self, _filename: &str, _error: &LoadError) {}
}

impl LoadListener for () {}
