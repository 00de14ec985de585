/// Parsed point data in structure-of-arrays layout
use crate::bounds::PointCloudBounds;

/// Opaque white used wherever a source carries no colour
pub const DEFAULT_COLOUR: [f32; 3] = [1.0, 1.0, 1.0];

/// Ordered point sequence produced by the codec.
/// Colour and normal arrays, when present, hold exactly one entry per position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    pub positions: Vec<[f32; 3]>,
    /// RGB normalised to 0-1
    pub colors: Option<Vec<[f32; 3]>>,
    pub normals: Option<Vec<[f32; 3]>>,
}

impl PointSet {
    pub fn new(
        positions: Vec<[f32; 3]>,
        colors: Option<Vec<[f32; 3]>>,
        normals: Option<Vec<[f32; 3]>>,
    ) -> Self {
        debug_assert!(colors.as_ref().is_none_or(|c| c.len() == positions.len()));
        debug_assert!(normals.as_ref().is_none_or(|n| n.len() == positions.len()));
        Self {
            positions,
            colors,
            normals,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn bounds(&self) -> PointCloudBounds {
        PointCloudBounds::from_positions(&self.positions)
    }

    /// Colour of a point, white when the set has no colour data
    pub fn color_at(&self, index: usize) -> [f32; 3] {
        self.colors
            .as_ref()
            .map_or(DEFAULT_COLOUR, |colors| colors[index])
    }
}
