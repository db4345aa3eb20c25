//! Per-connection type resolution.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::types::Oid;

use super::catalog::{TypeLoader, TypeRow};
use super::name::catalog_name;
use super::{Attribute, QualifiedName, SharedRegistry, TypeKind, TypeRef};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Resolves OIDs and names against a [`SharedRegistry`], loading misses
/// through a [`TypeLoader`].
#[derive(Debug, Clone)]
pub struct Registry {
    shared: Arc<SharedRegistry>,
}

impl Registry {
    pub fn new(shared: Arc<SharedRegistry>) -> Self {
        Self { shared }
    }

    pub fn shared(&self) -> &Arc<SharedRegistry> {
        &self.shared
    }

    /// Cached type for `oid`, without loading.
    pub fn cached(&self, oid: Oid) -> Option<TypeRef> {
        self.shared.get(oid)
    }

    pub async fn seed<L: TypeLoader>(&self, loader: &mut L) -> Result<()> {
        self.shared.seed(loader).await
    }

    /// Type for `oid`, loading it and anything it references on a miss.
    pub fn resolve<'a, L: TypeLoader>(
        &'a self,
        oid: Oid,
        loader: &'a mut L,
    ) -> BoxFuture<'a, Result<TypeRef>> {
        Box::pin(async move {
            if let Some(ty) = self.shared.get(oid) {
                return Ok(ty);
            }
            if oid == 0 {
                return Err(Error::UnknownType("oid 0".into()));
            }
            tracing::trace!("loading type {}", oid);
            let row = loader
                .load_type(oid)
                .await?
                .ok_or_else(|| Error::UnknownType(format!("oid {}", oid)))?;
            self.materialize(row, loader).await
        })
    }

    /// Type named `name`: `int4`, `integer`, `public.mood`, `text[]`, ...
    pub async fn resolve_name<L: TypeLoader>(&self, name: &str, loader: &mut L) -> Result<TypeRef> {
        let parsed = QualifiedName::parse(name);
        let normalized = QualifiedName {
            local: catalog_name(&parsed.local),
            namespace: parsed.namespace,
        };
        if let Some(ty) = self.shared.get_by_name(&normalized) {
            return Ok(ty);
        }
        let row = loader
            .load_named_type(name)
            .await?
            .ok_or_else(|| Error::UnknownType(name.to_string()))?;
        self.materialize(row, loader).await
    }

    /// Resolve `name` and strip any domains from the result.
    pub async fn load_base_type<L: TypeLoader>(&self, name: &str, loader: &mut L) -> Result<TypeRef> {
        let mut ty = self.resolve_name(name, loader).await?;
        while let TypeKind::Domain { base, .. } = &ty.kind {
            ty = Arc::clone(base);
        }
        Ok(ty)
    }

    /// Composite type of a relation, with its attributes loaded.
    pub async fn resolve_relation<L: TypeLoader>(
        &self,
        relation_oid: Oid,
        loader: &mut L,
    ) -> Result<TypeRef> {
        let ty = match self.shared.get_by_relation(relation_oid) {
            Some(ty) => ty,
            None => {
                let row = loader.load_relation_type(relation_oid).await?.ok_or_else(|| {
                    Error::UnknownType(format!("relation {}", relation_oid))
                })?;
                self.materialize(row, loader).await?
            }
        };
        self.ensure_attributes(&ty, loader).await?;
        Ok(ty)
    }

    /// Load attribute lists of every composite reachable from `ty`.
    pub fn ensure_attributes<'a, L: TypeLoader>(
        &'a self,
        ty: &'a TypeRef,
        loader: &'a mut L,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match &ty.kind {
                TypeKind::Composite { .. } => {
                    if ty.needs_attributes() {
                        let rows = loader.load_attributes(ty.relation_oid).await?;
                        let mut attrs = Vec::with_capacity(rows.len());
                        for row in rows {
                            attrs.push(Attribute {
                                name: row.name,
                                type_: self.resolve(row.type_oid, loader).await?,
                                number: row.number,
                                not_null: row.not_null,
                            });
                        }
                        ty.set_attributes(attrs);
                    }
                    if let Some(attrs) = ty.attributes() {
                        for attr in attrs {
                            self.ensure_attributes(&attr.type_, loader).await?;
                        }
                    }
                    Ok(())
                }
                TypeKind::Array { element: inner }
                | TypeKind::Domain { base: inner, .. }
                | TypeKind::Range { subtype: inner }
                | TypeKind::MultiRange { range: inner } => self.ensure_attributes(inner, loader).await,
                TypeKind::Base
                | TypeKind::Enumeration { .. }
                | TypeKind::Pseudo => Ok(()),
            }
        })
    }

    fn materialize<'a, L: TypeLoader>(
        &'a self,
        row: TypeRow,
        loader: &'a mut L,
    ) -> BoxFuture<'a, Result<TypeRef>> {
        Box::pin(async move {
            let reference = match row.referenced_oid() {
                Some(oid) if oid == row.oid => {
                    return Err(Error::UnknownType(format!(
                        "type {} references itself",
                        row.name
                    )));
                }
                Some(oid) => Some(self.resolve(oid, loader).await?),
                None => None,
            };
            let labels = if row.discriminator == 'e' {
                loader.load_enum_labels(row.oid).await?
            } else {
                Vec::new()
            };
            self.shared.insert_row(&row, reference, labels)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;
    use crate::types::catalog::AttributeRow;
    use crate::types::shared::test_loader::{MemoryCatalog, row};

    fn user_types() -> MemoryCatalog {
        let mut mood = row(90_100, "mood", 'e', 'E', "enum");
        mood.namespace = "public".into();
        mood.array_oid = 90_101;
        let mut moods = row(90_101, "_mood", 'b', 'A', "array");
        moods.namespace = "public".into();
        moods.element_oid = 90_100;
        let mut item = row(90_200, "item", 'c', 'C', "record");
        item.namespace = "public".into();
        item.relation_oid = 90_201;
        let mut items = row(90_202, "_item", 'b', 'A', "array");
        items.namespace = "public".into();
        items.element_oid = 90_200;

        let mut catalog = MemoryCatalog::with(vec![mood, moods, item, items]);
        catalog
            .labels
            .insert(90_100, vec!["sad".into(), "ok".into(), "happy".into()]);
        catalog.attributes.insert(
            90_201,
            vec![
                AttributeRow {
                    name: "id".into(),
                    type_oid: oid::INT4,
                    number: 1,
                    not_null: true,
                },
                AttributeRow {
                    name: "moods".into(),
                    type_oid: 90_101,
                    number: 2,
                    not_null: false,
                },
            ],
        );
        catalog
    }

    #[tokio::test]
    async fn resolve_is_stable() {
        let registry = Registry::new(Arc::new(SharedRegistry::new()));
        let mut loader = user_types();
        let first = registry.resolve(90_101, &mut loader).await.unwrap();
        let queries = loader.queries;
        let second = registry.resolve(90_101, &mut loader).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.queries, queries);
        assert_eq!(first.element().unwrap().enum_labels().unwrap()[2], "happy");
    }

    #[tokio::test]
    async fn unknown_oid_is_an_error() {
        let registry = Registry::new(Arc::new(SharedRegistry::new()));
        let err = registry.resolve(123_456, &mut user_types()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownType(_)));
    }

    #[tokio::test]
    async fn attributes_load_with_the_relation() {
        let registry = Registry::new(Arc::new(SharedRegistry::new()));
        let mut loader = user_types();

        let items = registry.resolve(90_202, &mut loader).await.unwrap();
        let item = Arc::clone(items.element().unwrap());
        assert!(item.needs_attributes());
        assert!(!items.supports_binary());

        let by_relation = registry.resolve_relation(90_201, &mut loader).await.unwrap();
        assert!(Arc::ptr_eq(&item, &by_relation));
        let attrs = item.attributes().unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[1].type_.oid, 90_101);
        assert!(items.supports_binary());
    }

    #[tokio::test]
    async fn names_and_aliases() {
        let registry = Registry::new(Arc::new(SharedRegistry::new()));
        let mut loader = user_types();
        assert_eq!(registry.resolve_name("integer", &mut loader).await.unwrap().oid, oid::INT4);
        assert_eq!(registry.resolve_name("bigint", &mut loader).await.unwrap().oid, oid::INT8);
        assert_eq!(loader.queries, 0);

        let mood = registry.resolve_name("public.mood", &mut loader).await.unwrap();
        assert_eq!(mood.oid, 90_100);
        let base = registry.load_base_type("mood", &mut loader).await.unwrap();
        assert!(Arc::ptr_eq(&mood, &base));
    }
}
