//! Catalog queries over a live connection.

use std::time::Duration;

use crate::error::Result;
use crate::protocol::types::{FieldFormat, Oid, oid};
use crate::server::Version;
use crate::state::ExtendedStep;
use crate::types::catalog::{
    ATTRIBUTES_QUERY, AttributeRow, ENUM_LABELS_QUERY, REFRESH_NAMED_TYPE, REFRESH_RELATION_TYPE,
    REFRESH_TYPE, SeedStage, TypeLoader, TypeRow, type_by_name_query, type_by_oid_query,
    type_by_relation_query,
};

use super::executor::RequestExecutor;

type Rows = Vec<Vec<Option<Vec<u8>>>>;

/// [`TypeLoader`] issuing catalog queries through a [`RequestExecutor`].
///
/// Once [`CatalogLoader::prepare`] has run, type lookups go through the
/// connection's named utility statements instead of being parsed each time.
#[derive(Debug, Clone)]
pub struct CatalogLoader {
    executor: RequestExecutor,
    timeout: Duration,
    version: Option<Version>,
    prepared: bool,
}

impl CatalogLoader {
    pub fn new(executor: RequestExecutor, timeout: Duration, version: Option<Version>) -> Self {
        Self {
            executor,
            timeout,
            version,
            prepared: false,
        }
    }

    /// Create the utility statements on the server.
    pub async fn prepare(&mut self) -> Result<()> {
        let version = self.version.as_ref();
        let statements = [
            (REFRESH_TYPE, type_by_oid_query(version), oid::OID),
            (REFRESH_NAMED_TYPE, type_by_name_query(version), oid::TEXT),
            (REFRESH_RELATION_TYPE, type_by_relation_query(version), oid::OID),
        ];
        let steps = statements
            .into_iter()
            .map(|(name, sql, param)| ExtendedStep::Parse {
                name: name.to_string(),
                sql,
                param_oids: vec![param],
            })
            .collect();
        let response = self.executor.extended(steps).wait(self.timeout).await?;
        response.result?;
        self.prepared = true;
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Run `sql` with one text parameter and return text rows.
    ///
    /// `utility` names the prepared statement to use instead, once prepared.
    async fn fetch(&self, utility: Option<&str>, sql: String, param: String) -> Result<Rows> {
        let mut steps = Vec::with_capacity(3);
        let statement = match utility {
            Some(name) if self.prepared => name.to_string(),
            _ => {
                steps.push(ExtendedStep::Parse {
                    name: String::new(),
                    sql,
                    param_oids: Vec::new(),
                });
                String::new()
            }
        };
        steps.push(ExtendedStep::Bind {
            portal: String::new(),
            statement,
            param_formats: vec![FieldFormat::Text],
            params: vec![Some(param.into_bytes())],
            result_formats: vec![FieldFormat::Text],
        });
        steps.push(ExtendedStep::Execute {
            portal: String::new(),
            max_rows: 0,
        });
        let response = self.executor.extended(steps).wait(self.timeout).await?;
        for warning in &response.warnings {
            tracing::debug!("catalog query warning: {}", warning);
        }
        Ok(response.result?.result.rows)
    }

    async fn fetch_type(&self, utility: &str, sql: String, param: String) -> Result<Option<TypeRow>> {
        let rows = self.fetch(Some(utility), sql, param).await?;
        rows.first().map(|row| TypeRow::from_row(row)).transpose()
    }
}

impl TypeLoader for CatalogLoader {
    async fn load_type(&mut self, type_oid: Oid) -> Result<Option<TypeRow>> {
        let sql = type_by_oid_query(self.version.as_ref());
        self.fetch_type(REFRESH_TYPE, sql, type_oid.to_string()).await
    }

    async fn load_named_type(&mut self, name: &str) -> Result<Option<TypeRow>> {
        let sql = type_by_name_query(self.version.as_ref());
        self.fetch_type(REFRESH_NAMED_TYPE, sql, name.to_string()).await
    }

    async fn load_relation_type(&mut self, relation_oid: Oid) -> Result<Option<TypeRow>> {
        let sql = type_by_relation_query(self.version.as_ref());
        self.fetch_type(REFRESH_RELATION_TYPE, sql, relation_oid.to_string())
            .await
    }

    async fn load_attributes(&mut self, relation_oid: Oid) -> Result<Vec<AttributeRow>> {
        let rows = self
            .fetch(None, ATTRIBUTES_QUERY.to_string(), relation_oid.to_string())
            .await?;
        rows.iter().map(|row| AttributeRow::from_row(row)).collect()
    }

    async fn load_enum_labels(&mut self, type_oid: Oid) -> Result<Vec<String>> {
        let rows = self
            .fetch(None, ENUM_LABELS_QUERY.to_string(), type_oid.to_string())
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.pop().flatten())
            .map(|label| String::from_utf8_lossy(&label).into_owned())
            .collect())
    }

    async fn load_stage(&mut self, stage: SeedStage) -> Result<Vec<TypeRow>> {
        let sql = stage.query(self.version.as_ref());
        let response = self.executor.query(&sql).wait(self.timeout).await?;
        let outcomes = response.result?;
        let mut rows = Vec::new();
        for outcome in outcomes {
            for row in &outcome.rows {
                rows.push(TypeRow::from_row(row)?);
            }
        }
        tracing::trace!("{:?} stage returned {} types", stage, rows.len());
        Ok(rows)
    }
}
