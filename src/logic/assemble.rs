//! Executes a query plan against the store and builds the response graph.

use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::{ApiError, StorageError};
use crate::logic::cancel::Cancellation;
use crate::logic::translate::{DataAccess, PlannedOperation, QueryPlan, Role};
use crate::model::{
    self_link, CollectionPage, Entity, EntityNode, Expanded, Id, NavigationGraph, Outcome,
    ResolutionChain, Terminal,
};
use crate::store::{EntityReadStore, FetchPage};

/// Rows produced by one operation.
#[derive(Debug, Default)]
struct OperationResult {
    /// Every distinct entity returned, in order.
    entities: Vec<Entity>,
    has_more: bool,
    /// Per-parent pages, for expand operations.
    by_parent: HashMap<Id, FetchPage>,
    count: Option<u64>,
    per_parent_count: HashMap<Id, u64>,
}

impl OperationResult {
    fn ids(&self) -> Vec<Id> {
        self.entities.iter().filter_map(Entity::id).collect()
    }
}

pub struct ResultAssembler<'a, S: EntityReadStore + ?Sized> {
    store: &'a S,
    graph: &'a NavigationGraph,
    /// Service root, e.g. `http://host/v1.0`.
    base_url: &'a str,
    cancellation: &'a Cancellation,
}

impl<'a, S: EntityReadStore + ?Sized> ResultAssembler<'a, S> {
    pub fn new(
        store: &'a S,
        graph: &'a NavigationGraph,
        base_url: &'a str,
        cancellation: &'a Cancellation,
    ) -> Self {
        Self {
            store,
            graph,
            base_url,
            cancellation,
        }
    }

    /// Runs a storage call under the request's cancellation signal.
    async fn guarded<T>(
        &self,
        operation: impl std::future::Future<Output = Result<T, StorageError>>,
    ) -> Result<T, ApiError> {
        Ok(self.cancellation.guard(operation).await??)
    }

    /// Executes `plan` for the request at `request_url` (service root plus
    /// path, no query string).
    pub async fn assemble(
        &self,
        plan: &QueryPlan,
        chain: &ResolutionChain,
        request_url: &str,
    ) -> Result<Outcome, ApiError> {
        let mut results: Vec<OperationResult> = Vec::with_capacity(plan.operations.len());

        for (index, op) in plan.operations.iter().enumerate() {
            let parent_ids = match op.depends_on {
                Some(parent) => results[parent].ids(),
                None => Vec::new(),
            };
            if op.depends_on.is_some() && parent_ids.is_empty() {
                if matches!(op.role, Role::Expand { .. }) {
                    results.push(OperationResult::default());
                    continue;
                }
                // a path step addressed nothing
                return Ok(Outcome::NotFound);
            }

            let result = self.execute(op, &parent_ids).await?;
            if op.role == Role::Locate && result.entities.is_empty() {
                return Ok(Outcome::NotFound);
            }
            log::debug!(
                "operation {} returned {} {}",
                index,
                result.entities.len(),
                op.access.entity_type().entity_set()
            );
            results.push(result);
        }

        let root_op = &plan.operations[plan.root];
        let root = &results[plan.root];
        let single = matches!(root_op.role, Role::Root { single: true });

        if single && root.entities.is_empty() {
            return Ok(Outcome::NotFound);
        }

        match &chain.terminal {
            Terminal::Property { name, raw_value } => {
                let Some(entity) = root.entities.first() else {
                    return Ok(Outcome::NotFound);
                };
                let value = entity.property(name).unwrap_or(serde_json::Value::Null);
                // an unset property has no raw value to return
                if *raw_value && value.is_null() {
                    return Ok(Outcome::NotFound);
                }
                Ok(Outcome::Property {
                    name: name.clone(),
                    value,
                    raw: *raw_value,
                })
            }
            Terminal::Reference => Ok(Outcome::References {
                links: root
                    .entities
                    .iter()
                    .filter_map(|e| e.id().map(|id| self_link(self.base_url, e.entity_type(), id)))
                    .collect(),
                single,
                next_link: self.root_next_link(root_op, root, request_url),
                count: root.count,
            }),
            Terminal::Resource => {
                let nodes: Vec<EntityNode> = root
                    .entities
                    .iter()
                    .map(|entity| self.build_node(plan, &results, plan.root, entity.clone()))
                    .collect();
                if single {
                    match nodes.into_iter().next() {
                        Some(node) => Ok(Outcome::Entity(Box::new(node))),
                        None => Ok(Outcome::NotFound),
                    }
                } else {
                    Ok(Outcome::Collection(CollectionPage {
                        items: nodes,
                        next_link: self.root_next_link(root_op, root, request_url),
                        count: root.count,
                    }))
                }
            }
        }
    }

    async fn execute(&self, op: &PlannedOperation, parent_ids: &[Id]) -> Result<OperationResult, ApiError> {
        let mut result = OperationResult::default();
        match &op.access {
            DataAccess::FetchById { entity_type, id } => {
                let entity = self.guarded(self.store.fetch_by_id(*entity_type, *id)).await?;
                result.entities.extend(entity);
            }
            DataAccess::FetchCollection {
                entity_type,
                scope,
                predicate,
                order_by,
                page,
            } => {
                let predicate = match scope {
                    Some(via) => predicate.clone().with_related(*via, parent_ids.to_vec()),
                    None => predicate.clone(),
                };
                let fetched = self
                    .guarded(self.store.fetch_collection(*entity_type, &predicate, order_by, *page))
                    .await?;
                result.entities = fetched.entities;
                result.has_more = fetched.has_more;
                if op.count {
                    result.count = Some(self.guarded(self.store.count(*entity_type, &predicate)).await?);
                }
            }
            DataAccess::FetchRelated {
                edge,
                predicate,
                order_by,
                page,
            } => {
                let by_parent = self
                    .guarded(self.store.fetch_related(edge, parent_ids, predicate, order_by, *page))
                    .await?;
                let mut seen = HashSet::new();
                for parent in parent_ids {
                    if let Some(fetched) = by_parent.get(parent) {
                        for entity in &fetched.entities {
                            if entity.id().map(|id| seen.insert(id)).unwrap_or(false) {
                                result.entities.push(entity.clone());
                            }
                        }
                    }
                }
                if op.count {
                    result.per_parent_count = self
                        .guarded(self.store.count_related(edge, parent_ids, predicate))
                        .await?;
                }
                result.by_parent = by_parent;
            }
        }
        Ok(result)
    }

    fn root_next_link(&self, op: &PlannedOperation, result: &OperationResult, url: &str) -> Option<String> {
        if !result.has_more {
            return None;
        }
        let page = match &op.access {
            DataAccess::FetchCollection { page, .. } => *page,
            _ => return None,
        };
        next_link(url, &op.source, page.top, page.skip)
    }

    fn build_node(
        &self,
        plan: &QueryPlan,
        results: &[OperationResult],
        op_index: usize,
        mut entity: Entity,
    ) -> EntityNode {
        let op = &plan.operations[op_index];
        let id = entity.id();
        let mut expanded = BTreeMap::new();

        for (child_index, child) in plan.children(op_index) {
            let Role::Expand { edge, .. } = child.role else {
                continue;
            };
            let child_result = &results[child_index];
            let page = id.and_then(|id| child_result.by_parent.get(&id));
            let items: Vec<EntityNode> = page
                .map(|p| {
                    p.entities
                        .iter()
                        .map(|e| self.build_node(plan, results, child_index, e.clone()))
                        .collect()
                })
                .unwrap_or_default();

            let value = if edge.is_to_many() {
                let next = match (page, id, &child.access) {
                    (Some(p), Some(id), DataAccess::FetchRelated { page: window, .. }) if p.has_more => {
                        let url = format!(
                            "{}/{}",
                            self_link(self.base_url, entity.entity_type(), id),
                            edge.segment
                        );
                        next_link(&url, &child.source, window.top, window.skip)
                    }
                    _ => None,
                };
                Expanded::Collection(CollectionPage {
                    items,
                    next_link: next,
                    count: if child.count {
                        Some(id.and_then(|id| child_result.per_parent_count.get(&id).copied()).unwrap_or(0))
                    } else {
                        None
                    },
                })
            } else {
                Expanded::Entity(items.into_iter().next().map(Box::new))
            };
            expanded.insert(edge.segment, value);
        }

        let expanded_segments: BTreeSet<&str> = expanded.keys().copied().collect();
        let mut links = entity
            .compute_links(self.base_url, self.graph.edges_from(entity.entity_type()), &expanded_segments)
            .unwrap_or_default();

        if let Some(selection) = &op.selection {
            entity.retain_properties(&selection.properties);
            links
                .navigation
                .retain(|segment, _| selection.navigation.contains(segment));
        }

        EntityNode {
            entity,
            links,
            expanded,
        }
    }
}

/// `url` with the given options, `$top` kept and `$skip` advanced by one page.
/// An empty page (`$top=0`) has no successor.
pub fn next_link(url: &str, source: &[(String, String)], top: usize, skip: usize) -> Option<String> {
    if top == 0 {
        return None;
    }
    let query = source
        .iter()
        .filter(|(key, _)| key != "$top" && key != "$skip")
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .chain([format!("$top={}", top), format!("$skip={}", skip.saturating_add(top))])
        .join("&");
    Some(format!("{}?{}", url, query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_link_advances_skip_and_keeps_options() {
        let source = vec![
            ("$select".to_string(), "name".to_string()),
            ("$top".to_string(), "1".to_string()),
        ];
        let link = next_link("http://host/v1.0/Things(5)/Datastreams", &source, 1, 0);
        assert_eq!(
            link.as_deref(),
            Some("http://host/v1.0/Things(5)/Datastreams?$select=name&$top=1&$skip=1")
        );

        let source = vec![("$filter".to_string(), "name eq 'A'".to_string())];
        let link = next_link("http://host/v1.0/Things", &source, 10, 20);
        assert_eq!(
            link.as_deref(),
            Some("http://host/v1.0/Things?$filter=name%20eq%20%27A%27&$top=10&$skip=30")
        );
    }

    #[test]
    fn test_empty_page_has_no_next_link() {
        let source = vec![("$top".to_string(), "0".to_string())];
        assert_eq!(next_link("http://host/v1.0/Things", &source, 0, 5), None);
    }
}
