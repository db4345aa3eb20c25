//! `pg_type.typcategory` values.

/// Broad classification of a type, from `pg_type.typcategory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Array,
    Boolean,
    Composite,
    DateTime,
    Enumeration,
    Geometry,
    NetworkAddress,
    Numeric,
    Pseudo,
    Range,
    String,
    Timespan,
    User,
    BitString,
    Unknown,
}

impl Category {
    /// Map a catalog category code. Unrecognized codes map to `Unknown`.
    pub fn from_code(code: char) -> Self {
        match code {
            'A' => Category::Array,
            'B' => Category::Boolean,
            'C' => Category::Composite,
            'D' => Category::DateTime,
            'E' => Category::Enumeration,
            'G' => Category::Geometry,
            'I' => Category::NetworkAddress,
            'N' => Category::Numeric,
            'P' => Category::Pseudo,
            'R' => Category::Range,
            'S' => Category::String,
            'T' => Category::Timespan,
            'U' => Category::User,
            'V' => Category::BitString,
            _ => Category::Unknown,
        }
    }

    pub fn code(self) -> char {
        match self {
            Category::Array => 'A',
            Category::Boolean => 'B',
            Category::Composite => 'C',
            Category::DateTime => 'D',
            Category::Enumeration => 'E',
            Category::Geometry => 'G',
            Category::NetworkAddress => 'I',
            Category::Numeric => 'N',
            Category::Pseudo => 'P',
            Category::Range => 'R',
            Category::String => 'S',
            Category::Timespan => 'T',
            Category::User => 'U',
            Category::BitString => 'V',
            Category::Unknown => 'X',
        }
    }
}
