//! Heap cell identities and mark colors

/// Kind of heap cell an edge points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GcKind {
    /// Compiled stub code
    Code,
    /// A script-visible object
    Object,
    /// An object group (structural type class)
    Group,
    /// A shape (hidden class)
    Shape,
}

/// Identity of a heap cell as seen by a tracer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcThing {
    /// What kind of cell this is
    pub kind: GcKind,
    /// Stable identity within its kind
    pub id: u64,
}

impl GcThing {
    /// Edge to compiled stub code
    pub const fn code(id: u64) -> Self {
        Self {
            kind: GcKind::Code,
            id,
        }
    }

    /// Edge to an object
    pub const fn object(id: u64) -> Self {
        Self {
            kind: GcKind::Object,
            id,
        }
    }

    /// Edge to an object group
    pub const fn group(id: u64) -> Self {
        Self {
            kind: GcKind::Group,
            id,
        }
    }

    /// Edge to a shape
    pub const fn shape(id: u64) -> Self {
        Self {
            kind: GcKind::Shape,
            id,
        }
    }
}

/// Mark state for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkColor {
    /// Not yet visited (potentially garbage)
    #[default]
    White = 0,
    /// Reached, children not yet scanned
    Gray = 1,
    /// Reached and scanned
    Black = 2,
}

impl MarkColor {
    /// Convert from a raw mark byte
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MarkColor::White,
            1 => MarkColor::Gray,
            _ => MarkColor::Black,
        }
    }
}
