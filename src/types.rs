//! Chunk element types and the tag → byte-size table.

/// Element type of the values stored in a data chunk.
///
/// The on-disk tag values are part of the file format and must not change.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Uint8 = 1,
    Uint16 = 2,
    Uint32 = 3,
    Uint64 = 4,
    Int8 = 5,
    Int16 = 6,
    Int32 = 7,
    Int64 = 8,
    Float = 9,
    Double = 10,
}

impl ElementType {
    /// Decodes an on-disk type tag. Returns `None` for unknown tags.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ElementType::Uint8),
            2 => Some(ElementType::Uint16),
            3 => Some(ElementType::Uint32),
            4 => Some(ElementType::Uint64),
            5 => Some(ElementType::Int8),
            6 => Some(ElementType::Int16),
            7 => Some(ElementType::Int32),
            8 => Some(ElementType::Int64),
            9 => Some(ElementType::Float),
            10 => Some(ElementType::Double),
            _ => None,
        }
    }

    /// On-disk tag for this element type.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementType::Uint8 | ElementType::Int8 => 1,
            ElementType::Uint16 | ElementType::Int16 => 2,
            ElementType::Uint32 | ElementType::Int32 | ElementType::Float => 4,
            ElementType::Uint64 | ElementType::Int64 | ElementType::Double => 8,
        }
    }
}

/// Byte size of the element type identified by `tag`.
///
/// Returns 0 for unknown tags; callers treat a zero size as invalid.
pub fn size_of_type(tag: u8) -> usize {
    ElementType::from_tag(tag).map_or(0, ElementType::size)
}
