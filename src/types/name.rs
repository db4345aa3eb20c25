//! Schema-qualified type names and SQL-standard spelling aliases.

use std::fmt;

/// Schema the built-in types live in.
pub const CATALOG_NAMESPACE: &str = "pg_catalog";

/// A possibly schema-qualified type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub namespace: Option<String>,
    pub local: String,
}

impl QualifiedName {
    pub fn new(namespace: Option<&str>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            local: local.into(),
        }
    }

    /// Split `schema.name` on the first unquoted dot.
    ///
    /// Quoted identifiers keep their case and may contain dots.
    pub fn parse(name: &str) -> Self {
        let mut parts = Vec::with_capacity(2);
        let mut current = String::new();
        let mut quoted = false;
        let mut chars = name.trim().chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' if quoted && chars.peek() == Some(&'"') => {
                    current.push('"');
                    chars.next();
                }
                '"' => quoted = !quoted,
                '.' if !quoted && parts.is_empty() => parts.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        parts.push(current);

        let mut parts = parts.into_iter();
        match (parts.next(), parts.next()) {
            (Some(namespace), Some(local)) => Self {
                namespace: Some(namespace),
                local,
            },
            (Some(local), None) => Self {
                namespace: None,
                local,
            },
            _ => Self {
                namespace: None,
                local: String::new(),
            },
        }
    }

    /// True if both names refer to the same type, treating a missing
    /// namespace as a wildcard.
    pub fn matches(&self, other: &QualifiedName) -> bool {
        self.local == other.local
            && match (&self.namespace, &other.namespace) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}.{}", namespace, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

/// Catalog name for an SQL-standard spelling, if it has one.
pub fn alias(name: &str) -> Option<&'static str> {
    Some(match name {
        "smallint" | "smallserial" => "int2",
        "integer" | "int" | "serial" => "int4",
        "bigint" | "bigserial" => "int8",
        "decimal" => "numeric",
        "real" => "float4",
        "double precision" | "float" => "float8",
        "boolean" => "bool",
        "character varying" => "varchar",
        "character" => "bpchar",
        _ => return None,
    })
}

/// Normalize a user-supplied type name to its catalog spelling.
///
/// `T[]` becomes the array type name `_T`, with `T` itself aliased first.
pub fn catalog_name(name: &str) -> String {
    let name = name.trim();
    match name.strip_suffix("[]") {
        Some(element) => {
            let element = element.trim_end();
            format!("_{}", alias(element).unwrap_or(element))
        }
        None => alias(name).unwrap_or(name).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        let name = QualifiedName::parse("pg_catalog.int4");
        assert_eq!(name.namespace.as_deref(), Some("pg_catalog"));
        assert_eq!(name.local, "int4");
        assert_eq!(name.to_string(), "pg_catalog.int4");

        let name = QualifiedName::parse("\"My.Schema\".\"Point\"");
        assert_eq!(name.namespace.as_deref(), Some("My.Schema"));
        assert_eq!(name.local, "Point");

        assert_eq!(QualifiedName::parse("text").namespace, None);
    }

    #[test]
    fn unqualified_matches_any_namespace() {
        let full = QualifiedName::new(Some("public"), "money_t");
        assert!(QualifiedName::parse("money_t").matches(&full));
        assert!(!QualifiedName::parse("other.money_t").matches(&full));
    }

    #[test]
    fn aliases() {
        assert_eq!(catalog_name("integer"), "int4");
        assert_eq!(catalog_name("double precision"), "float8");
        assert_eq!(catalog_name("bigint[]"), "_int8");
        assert_eq!(catalog_name("text[]"), "_text");
        assert_eq!(catalog_name("character varying"), "varchar");
        assert_eq!(catalog_name("uuid"), "uuid");
    }
}
