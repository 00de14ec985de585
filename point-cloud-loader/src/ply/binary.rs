use std::sync::atomic::AtomicBool;

use constants::ply::CANCEL_CHECK_RECORDS;
use rayon::prelude::*;

use super::{PlyHeader, ScalarType, VertexAttributes, check_cancelled, normalize_colour};
use crate::error::{LoadError, LoadResult};
use crate::point_set::PointSet;

/// Byte offset and type of one field inside a vertex record.
#[derive(Debug, Clone, Copy)]
struct Field {
    offset: usize,
    scalar: ScalarType,
}

impl Field {
    fn at(header: &PlyHeader, index: usize) -> Self {
        Self {
            offset: header.property_offset(index),
            scalar: header.properties[index].scalar,
        }
    }

    #[inline]
    fn read(&self, vertex: &[u8], little_endian: bool) -> f64 {
        self.scalar.read(&vertex[self.offset..], little_endian)
    }
}

#[inline]
fn read_triple(fields: &[Field; 3], vertex: &[u8], little_endian: bool) -> [f64; 3] {
    [
        fields[0].read(vertex, little_endian),
        fields[1].read(vertex, little_endian),
        fields[2].read(vertex, little_endian),
    ]
}

fn to_f32(v: [f64; 3]) -> [f32; 3] {
    [v[0] as f32, v[1] as f32, v[2] as f32]
}

/// Decode a fixed-stride binary vertex body.
/// Records are decoded in parallel blocks; output order follows record
/// order and `cancel` is polled between blocks.
pub(super) fn parse_binary(
    header: &PlyHeader,
    body: &[u8],
    little_endian: bool,
    cancel: &AtomicBool,
) -> LoadResult<PointSet> {
    let attributes = VertexAttributes::resolve(header);
    let position = attributes
        .require_position()?
        .map(|index| Field::at(header, index));

    let stride = header.stride();
    let expected = header
        .vertex_count
        .checked_mul(stride)
        .ok_or_else(|| LoadError::MalformedHeader("vertex count overflows body size".into()))?;
    if body.len() < expected {
        return Err(LoadError::TruncatedBody {
            expected,
            actual: body.len(),
        });
    }
    let records = &body[..expected];

    // Colour only when all three channels resolve
    let colour = match attributes.colour {
        Some([Some(r), Some(g), Some(b)]) => {
            let fields = [r, g, b].map(|index| Field::at(header, index));
            Some((fields, fields[0].scalar.is_8bit_integer()))
        }
        _ => None,
    };
    let normal = attributes
        .normal
        .map(|indices| indices.map(|index| Field::at(header, index)));

    let count = header.vertex_count;
    let mut positions: Vec<[f32; 3]> = Vec::with_capacity(count);
    let mut colors: Option<Vec<[f32; 3]>> = colour.map(|_| Vec::with_capacity(count));
    let mut normals: Option<Vec<[f32; 3]>> = normal.map(|_| Vec::with_capacity(count));

    for block in records.chunks(stride * CANCEL_CHECK_RECORDS) {
        check_cancelled(cancel)?;

        positions.par_extend(
            block
                .par_chunks_exact(stride)
                .map(|vertex| to_f32(read_triple(&position, vertex, little_endian))),
        );
        if let (Some(out), Some((fields, eight_bit))) = (colors.as_mut(), colour) {
            out.par_extend(block.par_chunks_exact(stride).map(|vertex| {
                normalize_colour(read_triple(&fields, vertex, little_endian), eight_bit)
            }));
        }
        if let (Some(out), Some(fields)) = (normals.as_mut(), normal) {
            out.par_extend(
                block
                    .par_chunks_exact(stride)
                    .map(|vertex| to_f32(read_triple(&fields, vertex, little_endian))),
            );
        }
    }

    Ok(PointSet::new(positions, colors, normals))
}
