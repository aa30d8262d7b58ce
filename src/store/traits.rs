use std::collections::HashMap;

use crate::error::StorageError;
use crate::model::{Entity, EntityType, Id, NavigationEdge, OrderBy, Page, Predicate, PropertyRef};

/// One window of a collection and whether rows exist beyond it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchPage {
    pub entities: Vec<Entity>,
    pub has_more: bool,
}

/// Read side of the storage collaborator. Implementations own the table
/// layout; the engine only speaks in entity types, edges and predicates.
#[async_trait::async_trait]
pub trait EntityReadStore: Send + Sync {
    async fn fetch_by_id(&self, entity_type: EntityType, id: Id) -> Result<Option<Entity>, StorageError>;

    async fn fetch_collection(
        &self,
        entity_type: EntityType,
        predicate: &Predicate,
        order_by: &[OrderBy<PropertyRef>],
        page: Page,
    ) -> Result<FetchPage, StorageError>;

    /// Entities reachable through `edge` from each of `parent_ids`, paged per
    /// parent. Parents without related entities may be absent from the map.
    async fn fetch_related(
        &self,
        edge: &NavigationEdge,
        parent_ids: &[Id],
        predicate: &Predicate,
        order_by: &[OrderBy<PropertyRef>],
        page: Page,
    ) -> Result<HashMap<Id, FetchPage>, StorageError>;

    /// Number of entities matching `predicate` behind `edge`, for every
    /// parent in one round trip. Parents without matches may be absent.
    async fn count_related(
        &self,
        edge: &NavigationEdge,
        parent_ids: &[Id],
        predicate: &Predicate,
    ) -> Result<HashMap<Id, u64>, StorageError>;

    async fn count(&self, entity_type: EntityType, predicate: &Predicate) -> Result<u64, StorageError>;
}

/// Write side. References in `Entity::related` are keyed by navigation
/// segment and must point at existing entities.
#[async_trait::async_trait]
pub trait EntityWriteStore: Send + Sync {
    /// Stores a new entity and returns it with its assigned id.
    async fn insert(&self, entity: &Entity) -> Result<Entity, StorageError>;

    /// Overwrites the scalars of an existing entity and applies any
    /// references it carries. Returns false if the entity does not exist.
    async fn update(&self, entity: &Entity) -> Result<bool, StorageError>;

    async fn delete(&self, entity_type: EntityType, id: Id) -> Result<bool, StorageError>;
}

pub trait EntityStore: EntityReadStore + EntityWriteStore + Send + Sync {}
impl<T: EntityReadStore + EntityWriteStore + Send + Sync> EntityStore for T {}
