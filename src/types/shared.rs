//! Type cache shared by connections to the same server.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;

use crate::codec::CodecKind;
use crate::error::{Error, Result};
use crate::protocol::types::{FieldFormat, Oid};
use crate::server::ServerConnectionInfo;

use super::catalog::{SeedStage, TypeLoader, TypeRow, Variant, bootstrap_rows};
use super::name::CATALOG_NAMESPACE;
use super::{Category, ModifierKind, QualifiedName, Type, TypeKind, TypeRef, alignment_bytes};

#[derive(Default)]
struct Maps {
    by_oid: HashMap<Oid, TypeRef>,
    /// Keyed by local name; several schemas may define the same name
    by_name: HashMap<String, Vec<TypeRef>>,
    by_relation: HashMap<Oid, TypeRef>,
}

/// OID, name and relation index of every type loaded from one server.
///
/// Entries are only ever added. The first insert for an OID wins, so every
/// lookup of that OID returns the same [`TypeRef`].
pub struct SharedRegistry {
    maps: RwLock<Maps>,
    seeded: OnceCell<()>,
}

impl std::fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegistry")
            .field("types", &self.len())
            .field("seeded", &self.is_seeded())
            .finish()
    }
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedRegistry {
    /// A registry holding only the fixed built-in types.
    pub fn new() -> Self {
        let registry = Self {
            maps: RwLock::new(Maps::default()),
            seeded: OnceCell::new(),
        };
        registry.insert_rows(bootstrap_rows());
        registry
    }

    pub fn get(&self, oid: Oid) -> Option<TypeRef> {
        self.maps.read().by_oid.get(&oid).cloned()
    }

    /// Look up by name. An unqualified name prefers `pg_catalog`.
    pub fn get_by_name(&self, name: &QualifiedName) -> Option<TypeRef> {
        let maps = self.maps.read();
        let candidates = maps.by_name.get(&name.local)?;
        let mut matching = candidates.iter().filter(|ty| name.matches(&ty.name));
        let first = matching.next()?;
        if name.namespace.is_some() {
            return Some(Arc::clone(first));
        }
        std::iter::once(first)
            .chain(matching)
            .find(|ty| ty.name.namespace.as_deref() == Some(CATALOG_NAMESPACE))
            .or(Some(first))
            .cloned()
    }

    pub fn get_by_relation(&self, relation_oid: Oid) -> Option<TypeRef> {
        self.maps.read().by_relation.get(&relation_oid).cloned()
    }

    pub fn len(&self) -> usize {
        self.maps.read().by_oid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded.initialized()
    }

    /// Register `ty`, or return the type already registered for its OID.
    pub fn insert(&self, ty: Type) -> TypeRef {
        let mut maps = self.maps.write();
        if let Some(existing) = maps.by_oid.get(&ty.oid) {
            return Arc::clone(existing);
        }
        let ty = Arc::new(ty);
        maps.by_oid.insert(ty.oid, Arc::clone(&ty));
        maps.by_name
            .entry(ty.name.local.clone())
            .or_default()
            .push(Arc::clone(&ty));
        if ty.relation_oid != 0 {
            maps.by_relation.insert(ty.relation_oid, Arc::clone(&ty));
        }
        ty
    }

    /// Build and register the type described by `row`.
    ///
    /// `reference` must be the resolved type named by
    /// [`TypeRow::referenced_oid`], if the row has one.
    pub fn insert_row(
        &self,
        row: &TypeRow,
        reference: Option<TypeRef>,
        labels: Vec<String>,
    ) -> Result<TypeRef> {
        if let Some(existing) = self.get(row.oid) {
            return Ok(existing);
        }
        Ok(self.insert(build_type(row, reference, labels)?))
    }

    /// Insert rows whose references are registered or inserted earlier in
    /// the batch. Returns the number of types added; rows that still miss a
    /// reference are skipped.
    fn insert_rows(&self, rows: Vec<TypeRow>) -> usize {
        let mut pending = rows;
        let mut added = 0;
        loop {
            let before = pending.len();
            pending.retain(|row| {
                if self.get(row.oid).is_some() {
                    return false;
                }
                let reference = match row.referenced_oid() {
                    Some(oid) => match self.get(oid) {
                        Some(ty) => Some(ty),
                        None => return true,
                    },
                    None => None,
                };
                match self.insert_row(row, reference, Vec::new()) {
                    Ok(_) => added += 1,
                    Err(e) => tracing::debug!("skipping type {}: {}", row.name, e),
                }
                false
            });
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }
        if !pending.is_empty() {
            tracing::trace!("{} types left for lazy loading", pending.len());
        }
        added
    }

    /// Load base, referencing and pseudo types, once per registry.
    ///
    /// Concurrent callers wait for the first pass; a failed pass leaves the
    /// registry unseeded so the next caller retries.
    pub async fn seed<L: TypeLoader>(&self, loader: &mut L) -> Result<()> {
        self.seeded
            .get_or_try_init(|| async {
                let started = Instant::now();
                let mut added = 0;
                for stage in SeedStage::ALL {
                    let rows = loader.load_stage(stage).await?;
                    added += self.insert_rows(rows);
                }
                tracing::debug!("seeded {} types in {:?}", added, started.elapsed());
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }
}

/// Build the variant selected by the row's discriminator.
pub fn build_type(row: &TypeRow, reference: Option<TypeRef>, labels: Vec<String>) -> Result<Type> {
    let variant = row.variant()?;
    let missing = || {
        Error::UnknownType(format!(
            "type {} references unloaded type {}",
            row.name,
            row.referenced_oid().unwrap_or(0)
        ))
    };
    let kind = match variant {
        Variant::Base => TypeKind::Base,
        Variant::Array { .. } => TypeKind::Array {
            element: reference.ok_or_else(missing)?,
        },
        Variant::Composite { .. } => TypeKind::Composite {
            attributes: OnceLock::new(),
        },
        Variant::Domain { .. } => TypeKind::Domain {
            base: reference.ok_or_else(missing)?,
            not_null: row.not_null,
        },
        Variant::Enumeration => TypeKind::Enumeration { labels },
        Variant::Pseudo => TypeKind::Pseudo,
        Variant::Range { .. } => TypeKind::Range {
            subtype: reference.ok_or_else(missing)?,
        },
        Variant::MultiRange { .. } => TypeKind::MultiRange {
            range: reference.ok_or_else(missing)?,
        },
    };

    let text_codec = CodecKind::from_input_proc(&row.input);
    let binary_codec = CodecKind::from_receive_proc(&row.receive);
    let preferred_format = match (&kind, binary_codec) {
        (TypeKind::Enumeration { .. }, _) | (_, None) => FieldFormat::Text,
        (_, Some(_)) => FieldFormat::Binary,
    };

    Ok(Type {
        oid: row.oid,
        name: QualifiedName::new(Some(&row.namespace), row.name.clone()),
        length: row.length,
        alignment: alignment_bytes(row.alignment),
        category: Category::from_code(row.category),
        delimiter: row.delimiter,
        array_oid: row.array_oid,
        relation_oid: row.relation_oid,
        kind,
        text_codec,
        binary_codec,
        modifier_kind: ModifierKind::from_proc(&row.modin),
        preferred_format,
    })
}

/// Hands out one [`SharedRegistry`] per server identity.
#[derive(Debug, Default)]
pub struct SharedRegistryFactory {
    registries: Mutex<HashMap<ServerConnectionInfo, Arc<SharedRegistry>>>,
}

static GLOBAL_FACTORY: LazyLock<SharedRegistryFactory> = LazyLock::new(SharedRegistryFactory::new);

impl SharedRegistryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide factory.
    pub fn global() -> &'static SharedRegistryFactory {
        &GLOBAL_FACTORY
    }

    /// Registry for `info`, created on first request.
    pub fn get(&self, info: &ServerConnectionInfo) -> Arc<SharedRegistry> {
        let mut registries = self.registries.lock();
        Arc::clone(
            registries
                .entry(info.clone())
                .or_insert_with(|| Arc::new(SharedRegistry::new())),
        )
    }

    pub fn remove(&self, info: &ServerConnectionInfo) -> Option<Arc<SharedRegistry>> {
        self.registries.lock().remove(info)
    }

    pub fn len(&self) -> usize {
        self.registries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod test_loader {
    //! In-memory catalog for registry tests.

    use std::collections::HashMap;

    use super::*;
    use crate::types::catalog::AttributeRow;

    pub fn row(oid: Oid, name: &str, discriminator: char, category: char, procs: &str) -> TypeRow {
        TypeRow {
            oid,
            name: name.to_string(),
            namespace: "pg_catalog".to_string(),
            length: -1,
            alignment: 'i',
            category,
            delimiter: ',',
            discriminator,
            element_oid: 0,
            array_oid: 0,
            relation_oid: 0,
            base_type_oid: 0,
            not_null: false,
            input: format!("{}_in", procs),
            output: format!("{}_out", procs),
            receive: format!("{}_recv", procs),
            send: format!("{}_send", procs),
            modin: String::new(),
            range_subtype: 0,
            multirange_range: 0,
        }
    }

    #[derive(Default)]
    pub struct MemoryCatalog {
        pub types: Vec<TypeRow>,
        pub attributes: HashMap<Oid, Vec<AttributeRow>>,
        pub labels: HashMap<Oid, Vec<String>>,
        pub queries: usize,
    }

    impl MemoryCatalog {
        pub fn with(types: Vec<TypeRow>) -> Self {
            Self {
                types,
                ..Self::default()
            }
        }
    }

    impl TypeLoader for MemoryCatalog {
        async fn load_type(&mut self, oid: Oid) -> Result<Option<TypeRow>> {
            self.queries += 1;
            Ok(self.types.iter().find(|r| r.oid == oid).cloned())
        }

        async fn load_named_type(&mut self, name: &str) -> Result<Option<TypeRow>> {
            self.queries += 1;
            let name = QualifiedName::parse(name);
            Ok(self
                .types
                .iter()
                .find(|r| name.matches(&QualifiedName::new(Some(&r.namespace), r.name.clone())))
                .cloned())
        }

        async fn load_relation_type(&mut self, relation_oid: Oid) -> Result<Option<TypeRow>> {
            self.queries += 1;
            Ok(self
                .types
                .iter()
                .find(|r| r.relation_oid == relation_oid)
                .cloned())
        }

        async fn load_attributes(&mut self, relation_oid: Oid) -> Result<Vec<AttributeRow>> {
            self.queries += 1;
            Ok(self.attributes.get(&relation_oid).cloned().unwrap_or_default())
        }

        async fn load_enum_labels(&mut self, type_oid: Oid) -> Result<Vec<String>> {
            self.queries += 1;
            Ok(self.labels.get(&type_oid).cloned().unwrap_or_default())
        }

        async fn load_stage(&mut self, stage: SeedStage) -> Result<Vec<TypeRow>> {
            self.queries += 1;
            Ok(self
                .types
                .iter()
                .filter(|r| match stage {
                    SeedStage::Base => r.is_base(),
                    SeedStage::Referencing => {
                        r.is_array() || matches!(r.discriminator, 'd' | 'r')
                    }
                    SeedStage::Pseudo => r.is_pseudo(),
                })
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_loader::*;
    use super::*;
    use crate::opts::ServerAddress;
    use crate::protocol::types::oid;
    use crate::server::{ServerInfo, Version};

    fn catalog() -> MemoryCatalog {
        let mut float8 = row(oid::FLOAT8, "float8", 'b', 'N', "float8");
        float8.input = "float8in".into();
        float8.receive = "float8recv".into();
        let mut array = row(1022, "_float8", 'b', 'A', "array");
        array.element_oid = oid::FLOAT8;
        // Domain listed before its base array to exercise ordering
        let mut domain = row(90_001, "prices", 'd', 'A', "domain");
        domain.base_type_oid = 1022;
        let mut record = row(oid::RECORD, "record", 'p', 'P', "record");
        record.input = "record_in".into();
        MemoryCatalog::with(vec![domain, float8, array, record])
    }

    #[tokio::test]
    async fn seeding_orders_dependencies() {
        let registry = SharedRegistry::new();
        let builtins = registry.len();
        let mut loader = catalog();
        registry.seed(&mut loader).await.unwrap();

        assert!(registry.is_seeded());
        assert_eq!(registry.len(), builtins + 4);
        let domain = registry.get(90_001).unwrap();
        assert_eq!(domain.base_type().oid, 1022);
        let array = registry.get(1022).unwrap();
        assert!(Arc::ptr_eq(array.element().unwrap(), &registry.get(oid::FLOAT8).unwrap()));
        assert_eq!(loader.queries, 3);
    }

    #[tokio::test]
    async fn seeding_runs_once() {
        let registry = SharedRegistry::new();
        let mut loader = catalog();
        registry.seed(&mut loader).await.unwrap();
        let first = registry.get(oid::FLOAT8).unwrap();
        let count = registry.len();

        registry.seed(&mut loader).await.unwrap();
        assert_eq!(loader.queries, 3);
        assert_eq!(registry.len(), count);
        assert!(Arc::ptr_eq(&first, &registry.get(oid::FLOAT8).unwrap()));
    }

    #[test]
    fn first_insert_wins() {
        let registry = SharedRegistry::new();
        let int4 = registry.get(oid::INT4).unwrap();
        let row = bootstrap_rows()
            .into_iter()
            .find(|r| r.oid == oid::INT4)
            .unwrap();
        let again = registry.insert_row(&row, None, Vec::new()).unwrap();
        assert!(Arc::ptr_eq(&int4, &again));
        assert_eq!(int4.binary_codec, Some(CodecKind::Int4));
        assert_eq!(int4.alignment, 4);
    }

    #[test]
    fn builtins_resolve_by_name() {
        let registry = SharedRegistry::new();
        let text = registry.get_by_name(&QualifiedName::parse("text")).unwrap();
        assert_eq!(text.oid, oid::TEXT);
        let vector = registry.get(oid::OIDVECTOR).unwrap();
        assert_eq!(vector.element().map(|e| e.oid), Some(oid::OID));
        assert!(registry.get_by_name(&QualifiedName::parse("public.text")).is_none());
    }

    #[test]
    fn factory_shares_by_identity() {
        let factory = SharedRegistryFactory::new();
        let info = |port| {
            ServerConnectionInfo::new(
                ServerInfo {
                    version: Version::new(16, Some(0), None),
                    encoding: "UTF8".into(),
                    integer_datetimes: true,
                },
                ServerAddress::Tcp {
                    host: "db".into(),
                    port,
                },
                "app",
            )
        };
        let a = factory.get(&info(5432));
        let b = factory.get(&info(5432));
        let c = factory.get(&info(5433));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(factory.len(), 2);
    }

    #[test]
    fn enum_prefers_text() {
        let mut row = row(90_010, "mood", 'e', 'E', "enum");
        row.namespace = "public".into();
        let ty = build_type(&row, None, vec!["sad".into(), "ok".into()]).unwrap();
        assert_eq!(ty.parameter_format(), FieldFormat::Text);
        assert_eq!(ty.enum_labels().map(<[String]>::len), Some(2));

        let mut array = super::test_loader::row(90_011, "_mood", 'b', 'A', "array");
        array.element_oid = 90_010;
        assert!(build_type(&array, None, Vec::new()).is_err());
    }
}
