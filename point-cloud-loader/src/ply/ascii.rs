use std::sync::atomic::AtomicBool;

use constants::ply::CANCEL_CHECK_RECORDS;

use super::{PlyHeader, VertexAttributes, check_cancelled, normalize_colour};
use crate::error::LoadResult;
use crate::point_set::{DEFAULT_COLOUR, PointSet};

/// Token positions used when the header does not name them
const FALLBACK_POSITION: [usize; 3] = [0, 1, 2];
const FALLBACK_COLOUR: [usize; 3] = [3, 4, 5];

/// Decode a whitespace separated ASCII vertex body.
/// Unparsable or non-finite tokens read as 0 instead of failing the load.
pub(super) fn parse_ascii(
    header: &PlyHeader,
    body: &[u8],
    cancel: &AtomicBool,
) -> LoadResult<PointSet> {
    let attributes = VertexAttributes::resolve(header);

    let position = if header.properties.is_empty() {
        FALLBACK_POSITION
    } else {
        attributes.require_position()?
    };

    let colour = attributes.colour.map(|channels| {
        let mut indices = FALLBACK_COLOUR;
        for (slot, index) in indices.iter_mut().zip(channels) {
            if let Some(index) = index {
                *slot = index;
            }
        }
        indices
    });
    let eight_bit = colour
        .and_then(|[r, _, _]| header.properties.get(r))
        .is_some_and(|p| p.scalar.is_8bit_integer());

    let text = String::from_utf8_lossy(body);
    let capacity = header.vertex_count.min(body.len() / 6);

    let mut positions = Vec::with_capacity(capacity);
    let mut colors = colour.map(|_| Vec::with_capacity(capacity));
    let mut normals = attributes.normal.map(|_| Vec::with_capacity(capacity));
    let mut values: Vec<f64> = Vec::with_capacity(header.properties.len().max(6));

    for (line_number, line) in text.lines().enumerate() {
        if positions.len() >= header.vertex_count {
            break;
        }
        if line_number % CANCEL_CHECK_RECORDS == 0 {
            check_cancelled(cancel)?;
        }

        values.clear();
        values.extend(
            line.split_whitespace()
                .map(|token| token.parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0)),
        );
        if values.len() < 3 {
            continue;
        }

        let value = |index: usize| values.get(index).copied();
        let triple = |indices: [usize; 3]| -> Option<[f64; 3]> {
            Some([value(indices[0])?, value(indices[1])?, value(indices[2])?])
        };

        let p = indices_or_zero(&values, position);
        positions.push([p[0] as f32, p[1] as f32, p[2] as f32]);

        if let (Some(colors), Some(indices)) = (colors.as_mut(), colour) {
            let rgb =
                triple(indices).map_or(DEFAULT_COLOUR, |rgb| normalize_colour(rgb, eight_bit));
            colors.push(rgb);
        }

        if let (Some(normals), Some(indices)) = (normals.as_mut(), attributes.normal) {
            let n = triple(indices).unwrap_or([0.0; 3]);
            normals.push([n[0] as f32, n[1] as f32, n[2] as f32]);
        }
    }

    if positions.len() < header.vertex_count {
        log::warn!(
            "ASCII body holds {} of {} declared vertices",
            positions.len(),
            header.vertex_count
        );
    }

    Ok(PointSet::new(positions, colors, normals))
}

fn indices_or_zero(values: &[f64], indices: [usize; 3]) -> [f64; 3] {
    indices.map(|index| values.get(index).copied().unwrap_or(0.0))
}
