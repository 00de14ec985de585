use std::io::{self, Write};

use crate::point_set::PointSet;

/// Serialise a point set as binary little endian PLY.
/// Positions and normals are float32, colours are quantised to uchar.
pub fn write_binary_ply<W: Write>(set: &PointSet, out: &mut W) -> io::Result<()> {
    let mut header = format!(
        "ply\nformat binary_little_endian 1.0\nelement vertex {}\n\
         property float x\nproperty float y\nproperty float z\n",
        set.len()
    );
    if set.has_normals() {
        header.push_str("property float nx\nproperty float ny\nproperty float nz\n");
    }
    if set.has_colors() {
        header.push_str("property uchar red\nproperty uchar green\nproperty uchar blue\n");
    }
    header.push_str("end_header\n");
    out.write_all(header.as_bytes())?;

    let mut record = Vec::with_capacity(27);
    for (i, position) in set.positions.iter().enumerate() {
        record.clear();
        for v in position {
            record.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(normals) = &set.normals {
            for v in &normals[i] {
                record.extend_from_slice(&v.to_le_bytes());
            }
        }
        if let Some(colors) = &set.colors {
            record.extend(colors[i].map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8));
        }
        out.write_all(&record)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ply::parse_ply;

    #[test]
    fn parse_reproduces_written_points() {
        let set = PointSet::new(
            vec![[0.1, -2.5, 1e6], [f32::MIN_POSITIVE, 3.25, -0.0]],
            Some(vec![[1.0, 0.0, 128.0 / 255.0], [0.2, 0.4, 0.6]]),
            Some(vec![[0.0, 0.0, 1.0], [0.6, 0.8, 0.0]]),
        );

        let mut bytes = Vec::new();
        write_binary_ply(&set, &mut bytes).unwrap();
        let parsed = parse_ply(&bytes).unwrap();

        assert_eq!(parsed.positions, set.positions);
        assert_eq!(parsed.normals, set.normals);

        // uchar quantisation: exact for 8-bit inputs, within half a step otherwise
        let colors = parsed.colors.unwrap();
        assert_eq!(colors[0], [1.0, 0.0, (128.0f64 / 255.0) as f32]);
        for (got, want) in colors[1].iter().zip([0.2f32, 0.4, 0.6]) {
            assert!((got - want).abs() <= 0.5 / 255.0 + f32::EPSILON);
        }
    }
}
