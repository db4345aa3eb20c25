//! PostgreSQL type model.
//!
//! A [`Type`] is built once per OID from its `pg_type` row and never changes
//! afterwards, except that a composite type's attribute list is filled in the
//! first time that relation is requested. Types are shared as [`TypeRef`]s
//! owned by a [`shared::SharedRegistry`].

pub mod catalog;
pub mod category;
pub mod modifiers;
pub mod name;
pub mod registry;
pub mod shared;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use crate::codec::CodecKind;
use crate::protocol::types::{FieldFormat, Oid};

pub use category::Category;
pub use modifiers::{ModifierKind, Modifiers};
pub use name::QualifiedName;
pub use registry::Registry;
pub use shared::{SharedRegistry, SharedRegistryFactory};

/// Shared handle to a registered type.
pub type TypeRef = Arc<Type>;

/// Attribute of a composite type, in attribute-number order.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub type_: TypeRef,
    /// `pg_attribute.attnum`, starting at 1
    pub number: i16,
    pub not_null: bool,
}

/// Variant-specific part of a type, selected by `pg_type.typtype`.
#[derive(Debug)]
pub enum TypeKind {
    Base,
    Array {
        element: TypeRef,
    },
    Composite {
        /// Filled on first use of the relation
        attributes: OnceLock<Vec<Attribute>>,
    },
    Domain {
        base: TypeRef,
        not_null: bool,
    },
    Enumeration {
        labels: Vec<String>,
    },
    Pseudo,
    Range {
        subtype: TypeRef,
    },
    MultiRange {
        range: TypeRef,
    },
}

impl TypeKind {
    pub fn name(&self) -> &'static str {
        match self {
            TypeKind::Base => "base",
            TypeKind::Array { .. } => "array",
            TypeKind::Composite { .. } => "composite",
            TypeKind::Domain { .. } => "domain",
            TypeKind::Enumeration { .. } => "enum",
            TypeKind::Pseudo => "pseudo",
            TypeKind::Range { .. } => "range",
            TypeKind::MultiRange { .. } => "multirange",
        }
    }
}

/// A resolved PostgreSQL type.
#[derive(Debug)]
pub struct Type {
    pub oid: Oid,
    pub name: QualifiedName,
    /// `typlen`: fixed size in bytes, -1 for varlena, -2 for C strings
    pub length: i16,
    /// Alignment in bytes (1, 2, 4 or 8)
    pub alignment: u8,
    pub category: Category,
    /// Element separator in array text output
    pub delimiter: char,
    pub array_oid: Oid,
    /// `typrelid` of composite types, 0 otherwise
    pub relation_oid: Oid,
    pub kind: TypeKind,
    pub text_codec: CodecKind,
    pub binary_codec: Option<CodecKind>,
    pub modifier_kind: ModifierKind,
    /// Format requested for parameters and results when both are possible
    pub preferred_format: FieldFormat,
}

/// Map `typalign` to a byte count.
pub fn alignment_bytes(code: char) -> u8 {
    match code {
        's' => 2,
        'i' => 4,
        'd' => 8,
        _ => 1,
    }
}

impl Type {
    /// True if values of this type can be sent and received in binary.
    pub fn supports_binary(&self) -> bool {
        match (self.binary_codec, &self.kind) {
            (None, _) => false,
            (Some(_), TypeKind::Domain { base, .. }) => base.supports_binary(),
            (Some(_), TypeKind::Array { element }) => element.supports_binary(),
            (Some(_), TypeKind::Range { subtype }) => subtype.supports_binary(),
            (Some(CodecKind::Record), TypeKind::Composite { attributes }) => attributes
                .get()
                .is_some_and(|attrs| attrs.iter().all(|a| a.type_.supports_binary())),
            // Anonymous records name their field types only at runtime
            (Some(CodecKind::Record), _) => false,
            (Some(_), _) => true,
        }
    }

    fn select_format(&self) -> FieldFormat {
        if self.category == Category::String {
            return FieldFormat::Text;
        }
        match self.preferred_format {
            FieldFormat::Binary if self.supports_binary() => FieldFormat::Binary,
            _ => FieldFormat::Text,
        }
    }

    /// Wire format for parameters of this type.
    ///
    /// String-category types always go as text so the server can apply its
    /// implicit casts.
    pub fn parameter_format(&self) -> FieldFormat {
        self.select_format()
    }

    /// Wire format requested for result columns of this type.
    pub fn result_format(&self) -> FieldFormat {
        self.select_format()
    }

    pub fn modifiers(&self, typmod: i32) -> Modifiers {
        self.modifier_kind.parse(typmod)
    }

    /// Follow domains down to the underlying type.
    pub fn base_type(&self) -> &Type {
        match &self.kind {
            TypeKind::Domain { base, .. } => base.base_type(),
            _ => self,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    pub fn element(&self) -> Option<&TypeRef> {
        match &self.kind {
            TypeKind::Array { element } => Some(element),
            _ => None,
        }
    }

    /// Attributes of a composite type, once loaded.
    pub fn attributes(&self) -> Option<&[Attribute]> {
        match &self.kind {
            TypeKind::Composite { attributes } => attributes.get().map(Vec::as_slice),
            _ => None,
        }
    }

    /// Composite type whose attribute list is not loaded yet.
    pub fn needs_attributes(&self) -> bool {
        matches!(&self.kind, TypeKind::Composite { attributes } if attributes.get().is_none())
    }

    /// Fill in the attribute list. Returns false if it was already set.
    pub fn set_attributes(&self, attrs: Vec<Attribute>) -> bool {
        match &self.kind {
            TypeKind::Composite { attributes } => attributes.set(attrs).is_ok(),
            _ => false,
        }
    }

    pub fn enum_labels(&self) -> Option<&[String]> {
        match &self.kind {
            TypeKind::Enumeration { labels } => Some(labels),
            _ => None,
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.oid == other.oid
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.oid.hash(state);
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Array { element } => write!(f, "{}[]", element),
            _ => write!(f, "{}", self.name.local),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Types built without a server, for codec and statement tests.

    use super::*;
    use crate::protocol::types::oid;

    pub fn base(oid: Oid, name: &str, category: Category, codec: CodecKind) -> TypeRef {
        Arc::new(Type {
            oid,
            name: QualifiedName::new(Some(name::CATALOG_NAMESPACE), name),
            length: -1,
            alignment: 4,
            category,
            delimiter: ',',
            array_oid: 0,
            relation_oid: 0,
            kind: TypeKind::Base,
            text_codec: codec,
            binary_codec: Some(codec),
            modifier_kind: ModifierKind::None,
            preferred_format: FieldFormat::Binary,
        })
    }

    pub fn array_of(oid: Oid, element: &TypeRef) -> TypeRef {
        Arc::new(Type {
            oid,
            name: QualifiedName::new(
                Some(name::CATALOG_NAMESPACE),
                format!("_{}", element.name.local),
            ),
            length: -1,
            alignment: 4,
            category: Category::Array,
            delimiter: ',',
            array_oid: 0,
            relation_oid: 0,
            kind: TypeKind::Array {
                element: Arc::clone(element),
            },
            text_codec: CodecKind::Array,
            binary_codec: Some(CodecKind::Array),
            modifier_kind: ModifierKind::None,
            preferred_format: FieldFormat::Binary,
        })
    }

    pub fn composite(oid: Oid, name: &str, fields: &[(&str, &TypeRef)]) -> TypeRef {
        let ty = Arc::new(Type {
            oid,
            name: QualifiedName::new(Some("public"), name),
            length: -1,
            alignment: 8,
            category: Category::Composite,
            delimiter: ',',
            array_oid: 0,
            relation_oid: oid + 1,
            kind: TypeKind::Composite {
                attributes: OnceLock::new(),
            },
            text_codec: CodecKind::Record,
            binary_codec: Some(CodecKind::Record),
            modifier_kind: ModifierKind::None,
            preferred_format: FieldFormat::Binary,
        });
        let attrs = fields
            .iter()
            .zip(1..)
            .map(|((name, type_), number)| Attribute {
                name: name.to_string(),
                type_: Arc::clone(type_),
                number,
                not_null: false,
            })
            .collect();
        ty.set_attributes(attrs);
        ty
    }

    pub fn int4() -> TypeRef {
        base(oid::INT4, "int4", Category::Numeric, CodecKind::Int4)
    }

    pub fn int8() -> TypeRef {
        base(oid::INT8, "int8", Category::Numeric, CodecKind::Int8)
    }

    pub fn text() -> TypeRef {
        base(oid::TEXT, "text", Category::String, CodecKind::Text)
    }

    pub fn bool() -> TypeRef {
        base(oid::BOOL, "bool", Category::Boolean, CodecKind::Bool)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn string_category_is_always_text() {
        let text = text();
        assert!(text.supports_binary());
        assert_eq!(text.parameter_format(), FieldFormat::Text);
        assert_eq!(text.result_format(), FieldFormat::Text);
        assert_eq!(int4().parameter_format(), FieldFormat::Binary);
    }

    #[test]
    fn missing_binary_codec_falls_back_to_text() {
        let ty = Type {
            oid: 600,
            name: QualifiedName::new(Some("pg_catalog"), "point"),
            length: 16,
            alignment: 8,
            category: Category::Geometry,
            delimiter: ',',
            array_oid: 1017,
            relation_oid: 0,
            kind: TypeKind::Base,
            text_codec: CodecKind::Unknown,
            binary_codec: None,
            modifier_kind: ModifierKind::None,
            preferred_format: FieldFormat::Binary,
        };
        assert_eq!(ty.parameter_format(), FieldFormat::Text);
        assert_eq!(ty.result_format(), FieldFormat::Text);
    }

    #[test]
    fn composite_binary_needs_attributes() {
        let int4 = int4();
        let loaded = composite(90_000, "pair", &[("a", &int4), ("b", &int4)]);
        assert_eq!(loaded.result_format(), FieldFormat::Binary);
        assert_eq!(loaded.attributes().map(<[Attribute]>::len), Some(2));
        assert!(!loaded.set_attributes(Vec::new()));

        let array = array_of(oid::INT4_ARRAY, &int4);
        assert_eq!(array.to_string(), "int4[]");
        assert_eq!(array.result_format(), FieldFormat::Binary);
    }

    #[test]
    fn alignment_codes() {
        assert_eq!(alignment_bytes('c'), 1);
        assert_eq!(alignment_bytes('s'), 2);
        assert_eq!(alignment_bytes('i'), 4);
        assert_eq!(alignment_bytes('d'), 8);
    }
}
