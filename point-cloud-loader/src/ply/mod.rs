/// PLY decoding into typed point arrays, binary or ASCII bodies
mod ascii;
mod binary;

/// Header directives, scalar types and vertex layout.
pub mod header;

/// Binary little endian serialisation of point sets.
pub mod writer;

pub use header::{PlyFormat, PlyHeader, PlyProperty, ScalarType};
pub use writer::write_binary_ply;

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{LoadError, LoadResult};
use crate::point_set::PointSet;
use constants::ply::{END_HEADER, MAX_HEADER_BYTES};

const COLOUR_NAMES: [[&str; 2]; 3] = [
    ["red", "diffuse_red"],
    ["green", "diffuse_green"],
    ["blue", "diffuse_blue"],
];

/// Parse a complete PLY file using the default header scan limit.
pub fn parse_ply(bytes: &[u8]) -> LoadResult<PointSet> {
    parse_ply_with_limit(bytes, MAX_HEADER_BYTES)
}

/// Parse a complete PLY file, failing if `end_header` is not found within
/// the first `max_header_bytes`.
pub fn parse_ply_with_limit(bytes: &[u8], max_header_bytes: usize) -> LoadResult<PointSet> {
    parse_ply_cancellable(bytes, max_header_bytes, &AtomicBool::new(false))
}

/// As [`parse_ply_with_limit`], but gives up with [`LoadError::Cancelled`]
/// once `cancel` is set. The flag is polled between blocks of records.
pub fn parse_ply_cancellable(
    bytes: &[u8],
    max_header_bytes: usize,
    cancel: &AtomicBool,
) -> LoadResult<PointSet> {
    let body_offset = find_body_offset(bytes, max_header_bytes)?;
    let header_text = String::from_utf8_lossy(&bytes[..body_offset]);
    let header = PlyHeader::parse(&header_text)?;
    let body = &bytes[body_offset..];

    log::debug!(
        "PLY header: {:?}, {} vertices, {} faces, {} properties",
        header.format,
        header.vertex_count,
        header.face_count,
        header.properties.len()
    );

    match header.format {
        PlyFormat::BinaryLittleEndian => binary::parse_binary(&header, body, true, cancel),
        PlyFormat::BinaryBigEndian => binary::parse_binary(&header, body, false, cancel),
        PlyFormat::Ascii => ascii::parse_ascii(&header, body, cancel),
    }
}

/// Shared cancel poll for the body decoders.
pub(crate) fn check_cancelled(cancel: &AtomicBool) -> LoadResult<()> {
    if cancel.load(Ordering::Relaxed) {
        Err(LoadError::Cancelled)
    } else {
        Ok(())
    }
}

/// Byte offset just past the `end_header` line terminator.
pub fn find_body_offset(bytes: &[u8], max_header_bytes: usize) -> LoadResult<usize> {
    let scan = &bytes[..bytes.len().min(max_header_bytes)];

    let mut from = 0;
    while let Some(pos) = scan[from..]
        .windows(END_HEADER.len())
        .position(|w| w == END_HEADER)
    {
        let after = from + pos + END_HEADER.len();
        match &scan[after..] {
            [b'\n', ..] => return Ok(after + 1),
            [b'\r', b'\n', ..] => return Ok(after + 2),
            _ => from = after,
        }
    }

    Err(LoadError::MalformedHeader(format!(
        "no end_header terminator within the first {} bytes",
        max_header_bytes
    )))
}

/// Property indices for the attributes the codec understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VertexAttributes {
    pub position: [Option<usize>; 3],
    /// Present when any red channel name is declared
    pub colour: Option<[Option<usize>; 3]>,
    pub normal: Option<[usize; 3]>,
}

impl VertexAttributes {
    pub fn resolve(header: &PlyHeader) -> Self {
        let position = [
            header.property_index(&["x"]),
            header.property_index(&["y"]),
            header.property_index(&["z"]),
        ];

        let colour = header.property_index(&COLOUR_NAMES[0]).map(|red| {
            [
                Some(red),
                header.property_index(&COLOUR_NAMES[1]),
                header.property_index(&COLOUR_NAMES[2]),
            ]
        });

        let normal = match (
            header.property_index(&["nx"]),
            header.property_index(&["ny"]),
            header.property_index(&["nz"]),
        ) {
            (Some(nx), Some(ny), Some(nz)) => Some([nx, ny, nz]),
            _ => None,
        };

        Self {
            position,
            colour,
            normal,
        }
    }

    /// All three position indices or the name of the first missing axis.
    pub fn require_position(&self) -> LoadResult<[usize; 3]> {
        match self.position {
            [Some(x), Some(y), Some(z)] => Ok([x, y, z]),
            _ => {
                let missing = ["x", "y", "z"]
                    .iter()
                    .zip(self.position)
                    .find(|(_, index)| index.is_none())
                    .map_or("x", |(name, _)| *name);
                Err(LoadError::MissingPositionAttribute(format!(
                    "no '{}' property on vertex element",
                    missing
                )))
            }
        }
    }
}

/// Bring a colour triple into 0-1.
/// 8-bit integer storage or any channel above 1 means 0-255 range.
pub(crate) fn normalize_colour(rgb: [f64; 3], eight_bit: bool) -> [f32; 3] {
    if eight_bit || rgb.iter().any(|c| *c > 1.0) {
        [
            (rgb[0] / 255.0) as f32,
            (rgb[1] / 255.0) as f32,
            (rgb[2] / 255.0) as f32,
        ]
    } else {
        [rgb[0] as f32, rgb[1] as f32, rgb[2] as f32]
    }
}
