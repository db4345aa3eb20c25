//! Catalog queries and their rows.
//!
//! All catalog queries return text columns so they can be read before any
//! type is known.

use std::future::Future;

use crate::error::{Error, Result};
use crate::protocol::types::Oid;
use crate::server::Version;

/// Statement name of the by-OID type query.
pub const REFRESH_TYPE: &str = "refresh-type";
/// Statement name of the by-name type query.
pub const REFRESH_NAMED_TYPE: &str = "refresh-named-type";
/// Statement name of the by-relation type query.
pub const REFRESH_RELATION_TYPE: &str = "refresh-reltype";

/// Variant of a `pg_type` row, decided by `typtype` and the array test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Base,
    Array { element: Oid },
    Composite { relation: Oid },
    Domain { base: Oid },
    Enumeration,
    Pseudo,
    Range { subtype: Oid },
    MultiRange { range: Oid },
}

/// One row of the type query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRow {
    pub oid: Oid,
    pub name: String,
    pub namespace: String,
    pub length: i16,
    pub alignment: char,
    pub category: char,
    pub delimiter: char,
    /// `typtype`
    pub discriminator: char,
    pub element_oid: Oid,
    pub array_oid: Oid,
    pub relation_oid: Oid,
    pub base_type_oid: Oid,
    pub not_null: bool,
    pub input: String,
    pub output: String,
    pub receive: String,
    pub send: String,
    pub modin: String,
    pub range_subtype: Oid,
    pub multirange_range: Oid,
}

/// One row of the attribute query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRow {
    pub name: String,
    pub type_oid: Oid,
    pub number: i16,
    pub not_null: bool,
}

const TYPE_COLUMNS: usize = 20;

fn column<'a>(row: &'a [Option<Vec<u8>>], index: usize) -> Result<&'a str> {
    let bytes = row
        .get(index)
        .ok_or_else(|| Error::Decode(format!("catalog row is missing column {}", index)))?
        .as_deref()
        .unwrap_or_default();
    simdutf8::basic::from_utf8(bytes).map_err(|e| Error::Decode(format!("catalog column: {e}")))
}

fn number<T: std::str::FromStr>(row: &[Option<Vec<u8>>], index: usize) -> Result<T> {
    let text = column(row, index)?;
    if text.is_empty() {
        return "0"
            .parse()
            .map_err(|_| Error::Decode(format!("catalog column {} is empty", index)));
    }
    text.parse()
        .map_err(|_| Error::Decode(format!("invalid catalog number {:?}", text)))
}

fn character(row: &[Option<Vec<u8>>], index: usize) -> Result<char> {
    Ok(column(row, index)?.chars().next().unwrap_or('\0'))
}

fn boolean(row: &[Option<Vec<u8>>], index: usize) -> Result<bool> {
    Ok(column(row, index)? == "t")
}

/// `-` is the catalog spelling of "no function".
fn proc_name(row: &[Option<Vec<u8>>], index: usize) -> Result<String> {
    let name = column(row, index)?;
    Ok(if name == "-" { String::new() } else { name.to_string() })
}

impl TypeRow {
    /// Read a row of the type query, columns in [`type_query`] order.
    pub fn from_row(row: &[Option<Vec<u8>>]) -> Result<TypeRow> {
        if row.len() != TYPE_COLUMNS {
            return Err(Error::Decode(format!(
                "type row has {} columns, expected {}",
                row.len(),
                TYPE_COLUMNS
            )));
        }
        Ok(TypeRow {
            oid: number(row, 0)?,
            name: column(row, 1)?.to_string(),
            namespace: column(row, 2)?.to_string(),
            length: number(row, 3)?,
            alignment: character(row, 4)?,
            category: character(row, 5)?,
            delimiter: character(row, 6)?,
            discriminator: character(row, 7)?,
            element_oid: number(row, 8)?,
            array_oid: number(row, 9)?,
            relation_oid: number(row, 10)?,
            base_type_oid: number(row, 11)?,
            not_null: boolean(row, 12)?,
            input: proc_name(row, 13)?,
            output: proc_name(row, 14)?,
            receive: proc_name(row, 15)?,
            send: proc_name(row, 16)?,
            modin: proc_name(row, 17)?,
            range_subtype: number(row, 18)?,
            multirange_range: number(row, 19)?,
        })
    }

    /// Arrays are base types with an element and the array category.
    pub fn is_array(&self) -> bool {
        self.element_oid != 0 && self.category == 'A'
    }

    pub fn variant(&self) -> Result<Variant> {
        if self.is_array() {
            return Ok(Variant::Array {
                element: self.element_oid,
            });
        }
        Ok(match self.discriminator {
            'b' => Variant::Base,
            'c' => Variant::Composite {
                relation: self.relation_oid,
            },
            'd' => Variant::Domain {
                base: self.base_type_oid,
            },
            'e' => Variant::Enumeration,
            'p' => Variant::Pseudo,
            'r' => Variant::Range {
                subtype: self.range_subtype,
            },
            'm' => Variant::MultiRange {
                range: self.multirange_range,
            },
            other => {
                return Err(Error::Decode(format!(
                    "unknown type discriminator {:?} for type {}",
                    other, self.name
                )));
            }
        })
    }

    /// Type that must be resolved before this one can be built.
    pub fn referenced_oid(&self) -> Option<Oid> {
        match self.variant().ok()? {
            Variant::Array { element } => Some(element),
            Variant::Domain { base } => Some(base),
            Variant::Range { subtype } => Some(subtype),
            Variant::MultiRange { range } => Some(range),
            Variant::Base | Variant::Composite { .. } | Variant::Enumeration | Variant::Pseudo => {
                None
            }
        }
    }

    pub fn is_base(&self) -> bool {
        self.discriminator == 'b' && !self.is_array()
    }

    pub fn is_pseudo(&self) -> bool {
        self.discriminator == 'p'
    }
}

impl AttributeRow {
    pub fn from_row(row: &[Option<Vec<u8>>]) -> Result<AttributeRow> {
        Ok(AttributeRow {
            name: column(row, 0)?.to_string(),
            type_oid: number(row, 1)?,
            number: number(row, 2)?,
            not_null: boolean(row, 3)?,
        })
    }
}

/// Multirange types appeared in PostgreSQL 14.
fn has_multiranges(version: Option<&Version>) -> bool {
    version.is_none_or(|v| v.is_minimum(14, 0))
}

/// `SELECT ... FROM pg_type` with the given `WHERE` clause.
pub fn type_query(version: Option<&Version>, filter: &str) -> String {
    let (multirange_column, multirange_join) = if has_multiranges(version) {
        (
            "COALESCE(m.rngtypid, 0)",
            " LEFT JOIN pg_catalog.pg_range m ON m.rngmultitypid = t.oid",
        )
    } else {
        ("0", "")
    };
    format!(
        "SELECT t.oid, t.typname, n.nspname, t.typlen, t.typalign, t.typcategory, \
         t.typdelim, t.typtype, t.typelem, t.typarray, t.typrelid, t.typbasetype, \
         t.typnotnull, t.typinput::text, t.typoutput::text, t.typreceive::text, \
         t.typsend::text, t.typmodin::text, COALESCE(r.rngsubtype, 0), {} \
         FROM pg_catalog.pg_type t \
         JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace \
         LEFT JOIN pg_catalog.pg_range r ON r.rngtypid = t.oid{} \
         WHERE {}",
        multirange_column, multirange_join, filter
    )
}

pub fn type_by_oid_query(version: Option<&Version>) -> String {
    type_query(version, "t.oid = $1")
}

pub fn type_by_name_query(version: Option<&Version>) -> String {
    type_query(version, "t.oid = $1::text::regtype")
}

pub fn type_by_relation_query(version: Option<&Version>) -> String {
    type_query(version, "t.typrelid = $1")
}

/// Seeding passes, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedStage {
    /// Base types that are not arrays
    Base,
    /// Arrays, domains and ranges; only those over a loaded type are kept
    Referencing,
    Pseudo,
}

impl SeedStage {
    pub const ALL: [SeedStage; 3] = [SeedStage::Base, SeedStage::Referencing, SeedStage::Pseudo];

    pub fn query(self, version: Option<&Version>) -> String {
        let filter = match self {
            SeedStage::Base => "t.typtype = 'b' AND (t.typelem = 0 OR t.typcategory <> 'A')",
            SeedStage::Referencing => {
                "t.typtype IN ('d', 'r') OR (t.typelem <> 0 AND t.typcategory = 'A')"
            }
            SeedStage::Pseudo => "t.typtype = 'p'",
        };
        format!("{} ORDER BY t.oid", type_query(version, filter))
    }
}

pub const ATTRIBUTES_QUERY: &str = "SELECT a.attname, a.atttypid, a.attnum, a.attnotnull \
     FROM pg_catalog.pg_attribute a \
     WHERE a.attrelid = $1 AND a.attnum > 0 AND NOT a.attisdropped \
     ORDER BY a.attnum";

pub const ENUM_LABELS_QUERY: &str = "SELECT e.enumlabel FROM pg_catalog.pg_enum e \
     WHERE e.enumtypid = $1 ORDER BY e.enumsortorder";

/// Source of catalog rows for type resolution.
///
/// Implemented over a live connection; tests use an in-memory catalog.
pub trait TypeLoader: Send {
    fn load_type(&mut self, oid: Oid) -> impl Future<Output = Result<Option<TypeRow>>> + Send;

    fn load_named_type(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Option<TypeRow>>> + Send;

    fn load_relation_type(
        &mut self,
        relation_oid: Oid,
    ) -> impl Future<Output = Result<Option<TypeRow>>> + Send;

    fn load_attributes(
        &mut self,
        relation_oid: Oid,
    ) -> impl Future<Output = Result<Vec<AttributeRow>>> + Send;

    fn load_enum_labels(
        &mut self,
        type_oid: Oid,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn load_stage(&mut self, stage: SeedStage)
    -> impl Future<Output = Result<Vec<TypeRow>>> + Send;
}

/// (oid, name, typlen, typalign, typcategory, typelem, typarray)
type Builtin = (Oid, &'static str, i16, char, char, Oid, Oid);

const BUILTINS: [Builtin; 15] = {
    use crate::protocol::types::oid;
    [
        (oid::BOOL, "bool", 1, 'c', 'B', 0, oid::BOOL_ARRAY),
        (oid::BYTEA, "bytea", -1, 'i', 'U', 0, 1001),
        (oid::CHAR, "char", 1, 'c', 'Z', 0, 1002),
        (oid::NAME, "name", 64, 'c', 'S', oid::CHAR, 1003),
        (oid::INT8, "int8", 8, 'd', 'N', 0, oid::INT8_ARRAY),
        (oid::INT2, "int2", 2, 's', 'N', 0, oid::INT2_ARRAY),
        (oid::INT2VECTOR, "int2vector", -1, 'i', 'A', oid::INT2, 1006),
        (oid::INT4, "int4", 4, 'i', 'N', 0, oid::INT4_ARRAY),
        (oid::REGPROC, "regproc", 4, 'i', 'N', 0, 1008),
        (oid::TEXT, "text", -1, 'i', 'S', 0, oid::TEXT_ARRAY),
        (oid::OID, "oid", 4, 'i', 'N', 0, 1028),
        (oid::TID, "tid", 6, 's', 'U', 0, 1010),
        (oid::XID, "xid", 4, 'i', 'U', 0, 1011),
        (oid::CID, "cid", 4, 'i', 'U', 0, 1012),
        (oid::OIDVECTOR, "oidvector", -1, 'i', 'A', oid::OID, 1013),
    ]
};

/// Rows for the fixed OIDs 16 to 30, known before any catalog query runs.
pub fn bootstrap_rows() -> Vec<TypeRow> {
    BUILTINS
        .iter()
        .map(
            |&(oid, name, length, alignment, category, element_oid, array_oid)| TypeRow {
                oid,
                name: name.to_string(),
                namespace: crate::types::name::CATALOG_NAMESPACE.to_string(),
                length,
                alignment,
                category,
                delimiter: ',',
                discriminator: 'b',
                element_oid,
                array_oid,
                relation_oid: 0,
                base_type_oid: 0,
                not_null: false,
                input: format!("{}in", name),
                output: format!("{}out", name),
                receive: format!("{}recv", name),
                send: format!("{}send", name),
                modin: String::new(),
                range_subtype: 0,
                multirange_range: 0,
            },
        )
        .collect()
}
