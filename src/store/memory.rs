use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::StorageError;
use crate::logic::instance_filter::{extract_property, sort_order, EntityFilterEvaluator, RelatedLookup};
use crate::model::{
    mandatory_relations, Cardinality, Entity, EntityData, EntityType, Id, NavigationEdge,
    NavigationGraph, OrderBy, Page, Predicate, PropertyRef,
};
use crate::store::traits::{EntityReadStore, EntityWriteStore, FetchPage};

type Key = (EntityType, Id);

/// Unordered link between two entities, stored with the smaller key first.
fn link(a: Key, b: Key) -> (Key, Key) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: Id,
    entities: HashMap<EntityType, BTreeMap<Id, EntityData>>,
    links: BTreeSet<(Key, Key)>,
}

impl MemoryState {
    fn get(&self, entity_type: EntityType, id: Id) -> Option<Entity> {
        self.entities
            .get(&entity_type)
            .and_then(|table| table.get(&id))
            .map(|data| Entity::with_id(id, data.clone()))
    }

    fn exists(&self, key: Key) -> bool {
        self.entities
            .get(&key.0)
            .map(|table| table.contains_key(&key.1))
            .unwrap_or(false)
    }

    /// Ids of `target` entities linked to `key`, ascending.
    fn linked(&self, key: Key, target: EntityType) -> Vec<Id> {
        let mut ids: Vec<Id> = self
            .links
            .iter()
            .filter_map(|(a, b)| {
                if *a == key && b.0 == target {
                    Some(b.1)
                } else if *b == key && a.0 == target {
                    Some(a.1)
                } else {
                    None
                }
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn unlink_all(&mut self, key: Key, target: EntityType) {
        self.links.retain(|(a, b)| {
            !((*a == key && b.0 == target) || (*b == key && a.0 == target))
        });
    }

    /// Links `source` to `target` through `edge`; a to-one side keeps only
    /// its newest partner.
    fn connect(&mut self, source: Key, edge: &NavigationEdge, target: Key) {
        match edge.cardinality {
            Cardinality::ManyToOne => self.unlink_all(source, edge.to),
            Cardinality::OneToMany => self.unlink_all(target, edge.from),
            Cardinality::ManyToMany => {}
        }
        self.links.insert(link(source, target));
    }

    fn apply_references(
        &mut self,
        graph: &NavigationGraph,
        entity: &Entity,
        id: Id,
    ) -> Result<(), StorageError> {
        let source = (entity.entity_type(), id);
        for (segment, ids) in &entity.related {
            let edge = *graph
                .resolve_segment(entity.entity_type(), segment)
                .ok_or_else(|| {
                    StorageError::Unsupported(format!(
                        "{} has no relation {}",
                        entity.entity_type(),
                        segment
                    ))
                })?;
            if graph.releases_links(&edge) {
                self.unlink_all(source, edge.to);
            }
            for target in ids {
                self.connect(source, &edge, (edge.to, *target));
            }
        }
        Ok(())
    }

    fn check_references(&self, graph: &NavigationGraph, entity: &Entity) -> Result<(), StorageError> {
        for (segment, ids) in &entity.related {
            let Some(edge) = graph.resolve_segment(entity.entity_type(), segment) else {
                continue;
            };
            for id in ids {
                if !self.exists((edge.to, *id)) {
                    return Err(StorageError::UnknownReference {
                        entity_type: edge.to,
                        id: *id,
                    });
                }
            }
        }
        Ok(())
    }

    fn remove(&mut self, graph: &NavigationGraph, key: Key) -> bool {
        let removed = self
            .entities
            .get_mut(&key.0)
            .and_then(|table| table.remove(&key.1))
            .is_some();
        if !removed {
            return false;
        }

        let mut dependants = Vec::new();
        for edge in graph.edges_from(key.0) {
            let Some(inverse) = graph.inverse(edge) else {
                continue;
            };
            let mandatory = inverse.cardinality == Cardinality::ManyToOne
                && mandatory_relations(inverse.from).contains(&inverse.segment);
            if mandatory {
                dependants.extend(self.linked(key, edge.to).into_iter().map(|id| (edge.to, id)));
            }
        }
        self.links.retain(|(a, b)| *a != key && *b != key);
        for dependant in dependants {
            self.remove(graph, dependant);
        }
        true
    }
}

struct StateLookup<'a> {
    state: &'a MemoryState,
}

impl RelatedLookup for StateLookup<'_> {
    fn related(&self, entity: &Entity, edge: &NavigationEdge) -> Vec<Entity> {
        let Some(id) = entity.id() else {
            return Vec::new();
        };
        self.state
            .linked((entity.entity_type(), id), edge.to)
            .into_iter()
            .filter_map(|related| self.state.get(edge.to, related))
            .collect()
    }
}

/// Process-local store used by tests and the `memory` backend. Filters are
/// evaluated in process.
pub struct MemoryStore {
    graph: Arc<NavigationGraph>,
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new(graph: Arc<NavigationGraph>) -> Self {
        Self {
            graph,
            state: RwLock::new(MemoryState::default()),
        }
    }

    fn select(
        &self,
        state: &MemoryState,
        candidates: Vec<Entity>,
        predicate: &Predicate,
        order_by: &[OrderBy<PropertyRef>],
    ) -> Result<Vec<Entity>, StorageError> {
        let lookup = StateLookup { state };
        let evaluator = EntityFilterEvaluator::new(&lookup);

        let mut selected = Vec::new();
        for entity in candidates {
            if predicate.id.is_some() && entity.id() != predicate.id {
                continue;
            }
            if let Some(scope) = &predicate.related {
                let related = lookup.related(&entity, &scope.via);
                if !related.iter().any(|r| r.id().is_some_and(|id| scope.ids.contains(&id))) {
                    continue;
                }
            }
            if let Some(filter) = &predicate.filter {
                if !evaluator.evaluate(&entity, filter)? {
                    continue;
                }
            }
            selected.push(entity);
        }

        if !order_by.is_empty() {
            let key_of = |entity: &Entity| -> Vec<serde_json::Value> {
                order_by
                    .iter()
                    .map(|key| match &key.property.via {
                        None => extract_property(Some(entity), &key.property),
                        Some(edge) => {
                            let related = lookup.related(entity, edge);
                            extract_property(related.first(), &key.property)
                        }
                    })
                    .collect()
            };
            let mut keyed: Vec<(Vec<serde_json::Value>, Entity)> =
                selected.into_iter().map(|e| (key_of(&e), e)).collect();
            keyed.sort_by(|(a, _), (b, _)| {
                for ((left, right), key) in a.iter().zip(b.iter()).zip(order_by) {
                    let ordering = sort_order(left, right);
                    let ordering = if key.descending { ordering.reverse() } else { ordering };
                    if ordering != std::cmp::Ordering::Equal {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
            selected = keyed.into_iter().map(|(_, e)| e).collect();
        }
        Ok(selected)
    }

    fn window(entities: Vec<Entity>, page: Page) -> FetchPage {
        let total = entities.len();
        FetchPage {
            has_more: total > page.skip.saturating_add(page.top),
            entities: entities.into_iter().skip(page.skip).take(page.top).collect(),
        }
    }

    fn all(state: &MemoryState, entity_type: EntityType) -> Vec<Entity> {
        state
            .entities
            .get(&entity_type)
            .map(|table| {
                table
                    .iter()
                    .map(|(id, data)| Entity::with_id(*id, data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl EntityReadStore for MemoryStore {
    async fn fetch_by_id(&self, entity_type: EntityType, id: Id) -> Result<Option<Entity>, StorageError> {
        Ok(self.state.read().get(entity_type, id))
    }

    async fn fetch_collection(
        &self,
        entity_type: EntityType,
        predicate: &Predicate,
        order_by: &[OrderBy<PropertyRef>],
        page: Page,
    ) -> Result<FetchPage, StorageError> {
        let state = self.state.read();
        let candidates = Self::all(&state, entity_type);
        let selected = self.select(&state, candidates, predicate, order_by)?;
        Ok(Self::window(selected, page))
    }

    async fn fetch_related(
        &self,
        edge: &NavigationEdge,
        parent_ids: &[Id],
        predicate: &Predicate,
        order_by: &[OrderBy<PropertyRef>],
        page: Page,
    ) -> Result<HashMap<Id, FetchPage>, StorageError> {
        let state = self.state.read();
        let mut pages = HashMap::new();
        for parent in parent_ids {
            let candidates: Vec<Entity> = state
                .linked((edge.from, *parent), edge.to)
                .into_iter()
                .filter_map(|id| state.get(edge.to, id))
                .collect();
            let selected = self.select(&state, candidates, predicate, order_by)?;
            pages.insert(*parent, Self::window(selected, page));
        }
        Ok(pages)
    }

    async fn count_related(
        &self,
        edge: &NavigationEdge,
        parent_ids: &[Id],
        predicate: &Predicate,
    ) -> Result<HashMap<Id, u64>, StorageError> {
        let state = self.state.read();
        let mut counts = HashMap::new();
        for parent in parent_ids {
            let candidates: Vec<Entity> = state
                .linked((edge.from, *parent), edge.to)
                .into_iter()
                .filter_map(|id| state.get(edge.to, id))
                .collect();
            let matched = self.select(&state, candidates, predicate, &[])?.len();
            counts.insert(*parent, matched as u64);
        }
        Ok(counts)
    }

    async fn count(&self, entity_type: EntityType, predicate: &Predicate) -> Result<u64, StorageError> {
        let state = self.state.read();
        let candidates = Self::all(&state, entity_type);
        Ok(self.select(&state, candidates, predicate, &[])?.len() as u64)
    }
}

#[async_trait::async_trait]
impl EntityWriteStore for MemoryStore {
    async fn insert(&self, entity: &Entity) -> Result<Entity, StorageError> {
        let mut state = self.state.write();
        state.check_references(&self.graph, entity)?;

        state.next_id += 1;
        let id = state.next_id;
        state
            .entities
            .entry(entity.entity_type())
            .or_default()
            .insert(id, entity.data().clone());
        state.apply_references(&self.graph, entity, id)?;

        log::debug!("inserted {}({})", entity.entity_type(), id);
        let mut stored = Entity::with_id(id, entity.data().clone());
        stored.related = entity.related.clone();
        Ok(stored)
    }

    async fn update(&self, entity: &Entity) -> Result<bool, StorageError> {
        let Some(id) = entity.id() else {
            return Ok(false);
        };
        let mut state = self.state.write();
        if !state.exists((entity.entity_type(), id)) {
            return Ok(false);
        }
        state.check_references(&self.graph, entity)?;
        state
            .entities
            .entry(entity.entity_type())
            .or_default()
            .insert(id, entity.data().clone());
        state.apply_references(&self.graph, entity, id)?;
        Ok(true)
    }

    async fn delete(&self, entity_type: EntityType, id: Id) -> Result<bool, StorageError> {
        let mut state = self.state.write();
        Ok(state.remove(&self.graph, (entity_type, id)))
    }
}
