use crate::error::{LoadError, LoadResult};

/// On-disk body encoding declared by the `format` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl PlyFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ascii" => Some(Self::Ascii),
            "binary_little_endian" => Some(Self::BinaryLittleEndian),
            "binary_big_endian" => Some(Self::BinaryBigEndian),
            _ => None,
        }
    }

    pub fn is_binary(self) -> bool {
        !matches!(self, Self::Ascii)
    }
}

/// Fixed-width scalar property types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Float32,
    Float64,
    Int32,
    UInt32,
    Int16,
    UInt16,
    Int8,
    UInt8,
}

impl ScalarType {
    /// Resolve both the classic and the sized type names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "float" | "float32" => Some(Self::Float32),
            "double" | "float64" => Some(Self::Float64),
            "int" | "int32" => Some(Self::Int32),
            "uint" | "uint32" => Some(Self::UInt32),
            "short" | "int16" => Some(Self::Int16),
            "ushort" | "uint16" => Some(Self::UInt16),
            "char" | "int8" => Some(Self::Int8),
            "uchar" | "uint8" => Some(Self::UInt8),
            _ => None,
        }
    }

    /// Width in bytes of one value.
    pub fn size(self) -> usize {
        match self {
            Self::Float64 => 8,
            Self::Float32 | Self::Int32 | Self::UInt32 => 4,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int8 | Self::UInt8 => 1,
        }
    }

    pub fn is_8bit_integer(self) -> bool {
        matches!(self, Self::Int8 | Self::UInt8)
    }

    /// Decode one value from the start of `bytes`.
    ///
    /// Callers guarantee `bytes.len() >= self.size()`.
    pub fn read(self, bytes: &[u8], little_endian: bool) -> f64 {
        macro_rules! decode {
            ($ty:ty, $n:literal) => {{
                let raw = take::<$n>(bytes);
                if little_endian {
                    <$ty>::from_le_bytes(raw) as f64
                } else {
                    <$ty>::from_be_bytes(raw) as f64
                }
            }};
        }

        match self {
            Self::Float32 => decode!(f32, 4),
            Self::Float64 => decode!(f64, 8),
            Self::Int32 => decode!(i32, 4),
            Self::UInt32 => decode!(u32, 4),
            Self::Int16 => decode!(i16, 2),
            Self::UInt16 => decode!(u16, 2),
            Self::Int8 => bytes[0] as i8 as f64,
            Self::UInt8 => bytes[0] as f64,
        }
    }
}

fn take<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&bytes[..N]);
    raw
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyProperty {
    pub name: String,
    pub scalar: ScalarType,
}

/// Parsed header: format, element counts and the vertex property layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyHeader {
    pub format: PlyFormat,
    pub vertex_count: usize,
    /// Parsed for completeness, faces are never decoded
    pub face_count: usize,
    /// Vertex element properties in declaration order
    pub properties: Vec<PlyProperty>,
}

impl PlyHeader {
    /// Parse header text up to and including `end_header`.
    /// Properties of elements other than `vertex` are skipped.
    pub fn parse(text: &str) -> LoadResult<Self> {
        let mut format = None;
        let mut vertex_count = 0;
        let mut face_count = 0;
        let mut properties = Vec::new();
        let mut current_element: Option<String> = None;

        for line in text.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();

            match parts.as_slice() {
                [] | ["ply"] | ["comment", ..] | ["obj_info", ..] => {}
                ["end_header", ..] => break,
                ["format", name, ..] => {
                    format = Some(PlyFormat::from_name(name).ok_or_else(|| {
                        LoadError::MalformedHeader(format!("unsupported format '{}'", name))
                    })?);
                }
                ["element", kind, count, ..] => {
                    let count = count.parse::<usize>().map_err(|_| {
                        LoadError::MalformedHeader(format!(
                            "invalid element count '{}' for '{}'",
                            count, kind
                        ))
                    })?;
                    match *kind {
                        "vertex" => vertex_count = count,
                        "face" => face_count = count,
                        _ => {}
                    }
                    current_element = Some(kind.to_string());
                }
                ["property", "list", ..] => {
                    if current_element.as_deref() == Some("vertex") {
                        return Err(LoadError::MalformedHeader(
                            "list properties are not supported on vertices".into(),
                        ));
                    }
                }
                ["property", ty, name, ..] => match current_element.as_deref() {
                    Some("vertex") => {
                        let scalar = ScalarType::from_name(ty).ok_or_else(|| {
                            LoadError::MalformedHeader(format!(
                                "unknown property type '{}' for '{}'",
                                ty, name
                            ))
                        })?;
                        properties.push(PlyProperty {
                            name: name.to_string(),
                            scalar,
                        });
                    }
                    Some(_) => {}
                    None => log::warn!("Ignoring property '{}' declared outside an element", name),
                },
                [directive, ..] => log::warn!("Ignoring unknown PLY directive '{}'", directive),
            }
        }

        let format = format
            .ok_or_else(|| LoadError::MalformedHeader("missing format directive".into()))?;

        Ok(Self {
            format,
            vertex_count,
            face_count,
            properties,
        })
    }

    /// Bytes per vertex record in a binary body.
    pub fn stride(&self) -> usize {
        self.properties.iter().map(|p| p.scalar.size()).sum()
    }

    /// Index of the first property matching any of `names`.
    pub fn property_index(&self, names: &[&str]) -> Option<usize> {
        names
            .iter()
            .find_map(|name| self.properties.iter().position(|p| p.name == *name))
    }

    /// Byte offset of a property inside one vertex record.
    pub fn property_offset(&self, index: usize) -> usize {
        self.properties[..index].iter().map(|p| p.scalar.size()).sum()
    }
}
