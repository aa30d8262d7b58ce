use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::StorageError;
use crate::model::{
    Entity, EntityType, Id, NavigationEdge, NavigationGraph, OrderBy, Page, Predicate, PropertyRef,
};
use crate::store::sql::{self, relation, table, Relation, SqlArg, SqlStatement};
use crate::store::traits::{EntityReadStore, EntityWriteStore, FetchPage};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    graph: Arc<NavigationGraph>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32, graph: Arc<NavigationGraph>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool, graph })
    }

    /// Run the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::from)
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn references(&self, entity: &Entity) -> Result<Vec<(NavigationEdge, Vec<Id>)>, StorageError> {
        entity
            .related
            .iter()
            .map(|(segment, ids)| {
                let edge = self
                    .graph
                    .resolve_segment(entity.entity_type(), segment)
                    .ok_or_else(|| {
                        StorageError::Unsupported(format!("{} has no relation {}", entity.entity_type(), segment))
                    })?;
                Ok((*edge, ids.clone()))
            })
            .collect()
    }
}

fn bind_all<'q>(mut query: PgQuery<'q>, args: &'q [SqlArg]) -> PgQuery<'q> {
    for arg in args {
        query = match arg {
            SqlArg::BigInt(v) => query.bind(*v),
            SqlArg::BigIntArray(v) => query.bind(v.as_slice()),
            SqlArg::Numeric(v) | SqlArg::Text(v) => query.bind(v.as_str()),
            SqlArg::TextArray(v) => query.bind(v.as_slice()),
            SqlArg::Boolean(v) => query.bind(*v),
            SqlArg::Timestamp(v) => query.bind(*v),
            SqlArg::Json(v) => query.bind(v),
        };
    }
    query
}

async fn fetch_all(pool: &PgPool, statement: &SqlStatement) -> Result<Vec<PgRow>, StorageError> {
    log::debug!("sql: {}", statement.sql);
    Ok(bind_all(sqlx::query(&statement.sql), &statement.args)
        .fetch_all(pool)
        .await?)
}

fn entity_from_row(entity_type: EntityType, row: &PgRow) -> Result<Entity, StorageError> {
    let id: i64 = row.try_get("id")?;
    let data: Value = row.try_get("data")?;
    Entity::from_stored(entity_type, id, data).map_err(|e| StorageError::Corrupt {
        entity_type,
        id,
        reason: e.to_string(),
    })
}

fn document(entity: &Entity) -> Value {
    Value::Object(entity.data().scalars())
}

/// Fails with the first id in `ids` that has no row in the table of `entity_type`.
async fn ensure_exist(conn: &mut PgConnection, entity_type: EntityType, ids: &[Id]) -> Result<(), StorageError> {
    let sql = format!("SELECT id FROM {} WHERE id = ANY($1)", table(entity_type));
    let found: HashSet<i64> = sqlx::query(&sql)
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| row.try_get::<i64, _>("id"))
        .collect::<Result<_, _>>()?;
    match ids.iter().find(|id| !found.contains(id)) {
        Some(id) => Err(StorageError::UnknownReference { entity_type, id: *id }),
        None => Ok(()),
    }
}

/// Points `id` at the referenced entities. A to-one reference keeps only the
/// last id given; a to-many list replaces the links held before wherever the
/// graph allows releasing them.
async fn link(
    conn: &mut PgConnection,
    graph: &NavigationGraph,
    entity_type: EntityType,
    id: Id,
    references: &[(NavigationEdge, Vec<Id>)],
) -> Result<(), StorageError> {
    for (edge, targets) in references {
        if graph.releases_links(edge) {
            if let Some(statement) = sql::release_links(edge, id, targets) {
                log::debug!("sql: {}", statement.sql);
                bind_all(sqlx::query(&statement.sql), &statement.args)
                    .execute(&mut *conn)
                    .await?;
            }
        }
        match relation(edge) {
            Relation::SourceColumn(column) => {
                if let Some(target) = targets.last() {
                    let sql = format!("UPDATE {} SET {} = $1 WHERE id = $2", table(entity_type), column);
                    sqlx::query(&sql).bind(*target).bind(id).execute(&mut *conn).await?;
                }
            }
            Relation::TargetColumn(column) => {
                let sql = format!("UPDATE {} SET {} = $1 WHERE id = ANY($2)", table(edge.to), column);
                sqlx::query(&sql)
                    .bind(id)
                    .bind(targets.as_slice())
                    .execute(&mut *conn)
                    .await?;
            }
            Relation::LinkTable {
                table,
                source_column,
                target_column,
            } => {
                let sql = format!(
                    "INSERT INTO {} ({}, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                    table, source_column, target_column
                );
                for target in targets {
                    sqlx::query(&sql).bind(id).bind(*target).execute(&mut *conn).await?;
                }
            }
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl EntityReadStore for PostgresStore {
    async fn fetch_by_id(&self, entity_type: EntityType, id: Id) -> Result<Option<Entity>, StorageError> {
        let rows = fetch_all(&self.pool, &sql::select_by_id(entity_type, id)).await?;
        rows.first().map(|row| entity_from_row(entity_type, row)).transpose()
    }

    async fn fetch_collection(
        &self,
        entity_type: EntityType,
        predicate: &Predicate,
        order_by: &[OrderBy<PropertyRef>],
        page: Page,
    ) -> Result<FetchPage, StorageError> {
        let statement = sql::select_collection(entity_type, predicate, order_by, page);
        let rows = fetch_all(&self.pool, &statement).await?;
        let mut entities = rows
            .iter()
            .map(|row| entity_from_row(entity_type, row))
            .collect::<Result<Vec<_>, _>>()?;
        let has_more = entities.len() > page.top;
        entities.truncate(page.top);
        Ok(FetchPage { entities, has_more })
    }

    async fn fetch_related(
        &self,
        edge: &NavigationEdge,
        parent_ids: &[Id],
        predicate: &Predicate,
        order_by: &[OrderBy<PropertyRef>],
        page: Page,
    ) -> Result<HashMap<Id, FetchPage>, StorageError> {
        let statement = sql::select_related(edge, parent_ids, predicate, order_by, page);
        let rows = fetch_all(&self.pool, &statement).await?;
        let last = sql::sql_bound(page.skip.saturating_add(page.top));

        let mut pages: HashMap<Id, FetchPage> = HashMap::new();
        for row in &rows {
            let parent: i64 = row.try_get("parent_id")?;
            let rank: i64 = row.try_get("rn")?;
            let page = pages.entry(parent).or_default();
            if rank > last {
                page.has_more = true;
            } else {
                page.entities.push(entity_from_row(edge.to, row)?);
            }
        }
        Ok(pages)
    }

    async fn count_related(
        &self,
        edge: &NavigationEdge,
        parent_ids: &[Id],
        predicate: &Predicate,
    ) -> Result<HashMap<Id, u64>, StorageError> {
        let rows = fetch_all(&self.pool, &sql::count_related(edge, parent_ids, predicate)).await?;
        rows.iter()
            .map(|row| -> Result<(Id, u64), StorageError> {
                let parent: i64 = row.try_get("parent_id")?;
                let count: i64 = row.try_get("n")?;
                Ok((parent, count.max(0) as u64))
            })
            .collect()
    }

    async fn count(&self, entity_type: EntityType, predicate: &Predicate) -> Result<u64, StorageError> {
        let rows = fetch_all(&self.pool, &sql::count(entity_type, predicate)).await?;
        let count: i64 = match rows.first() {
            Some(row) => row.try_get(0)?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }
}

#[async_trait::async_trait]
impl EntityWriteStore for PostgresStore {
    async fn insert(&self, entity: &Entity) -> Result<Entity, StorageError> {
        let references = self.references(entity)?;
        let mut tx = self.pool.begin().await?;
        for (edge, ids) in &references {
            ensure_exist(&mut tx, edge.to, ids).await?;
        }

        // to-one references are columns of the new row and must be set on insert
        let mut columns = vec!["data"];
        let mut values = Vec::new();
        for (edge, ids) in &references {
            if let (Relation::SourceColumn(column), Some(id)) = (relation(edge), ids.last()) {
                columns.push(column);
                values.push(*id);
            }
        }
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
            table(entity.entity_type()),
            columns.join(", "),
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql).bind(document(entity));
        for value in &values {
            query = query.bind(*value);
        }
        let id: i64 = query.fetch_one(&mut *tx).await?.try_get("id")?;

        let remaining: Vec<(NavigationEdge, Vec<Id>)> = references
            .into_iter()
            .filter(|(edge, _)| !matches!(relation(edge), Relation::SourceColumn(_)))
            .collect();
        link(&mut tx, &self.graph, entity.entity_type(), id, &remaining).await?;
        tx.commit().await?;

        log::debug!("inserted {}({})", entity.entity_type(), id);
        let mut stored = Entity::with_id(id, entity.data().clone());
        stored.related = entity.related.clone();
        Ok(stored)
    }

    async fn update(&self, entity: &Entity) -> Result<bool, StorageError> {
        let Some(id) = entity.id() else {
            return Ok(false);
        };
        let references = self.references(entity)?;
        let mut tx = self.pool.begin().await?;
        for (edge, ids) in &references {
            ensure_exist(&mut tx, edge.to, ids).await?;
        }

        let sql = format!("UPDATE {} SET data = $1 WHERE id = $2", table(entity.entity_type()));
        let updated = sqlx::query(&sql)
            .bind(document(entity))
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        link(&mut tx, &self.graph, entity.entity_type(), id, &references).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete(&self, entity_type: EntityType, id: Id) -> Result<bool, StorageError> {
        // dependants go through the ON DELETE rules of the schema
        let sql = format!("DELETE FROM {} WHERE id = $1", table(entity_type));
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
