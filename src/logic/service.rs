//! Request pipeline: query options and path are parsed independently, bound,
//! translated into a plan and assembled against the store. Writes reuse the
//! same path resolution and entity contract.

use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{ApiError, ParseError, StorageError};
use crate::logic::assemble::ResultAssembler;
use crate::logic::cancel::Cancellation;
use crate::logic::path_resolver::resolve_path;
use crate::logic::query_parser::{bind, parse_query, QuerySettings};
use crate::logic::serialize::{serialize, serialize_node, Payload};
use crate::logic::translate::translate;
use crate::model::{
    self_link, Entity, EntityNode, EntityType, NavigationGraph, Outcome, QueryOptions,
    ResolutionChain, Terminal,
};
use crate::store::EntityStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Service root as seen by clients, e.g. `http://host:8080/v1.0`.
    pub base_url: String,
    pub query: QuerySettings,
    pub max_expand_depth: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1.0".to_string(),
            query: QuerySettings::default(),
            max_expand_depth: 5,
        }
    }
}

/// Result of a successful POST.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Self link of the new entity
    pub location: String,
    pub body: Value,
}

pub struct SensorThingsService<S: EntityStore + ?Sized> {
    store: Arc<S>,
    graph: Arc<NavigationGraph>,
    settings: ServiceSettings,
}

impl<S: EntityStore + ?Sized> SensorThingsService<S> {
    pub fn new(store: Arc<S>, graph: Arc<NavigationGraph>, settings: ServiceSettings) -> Self {
        Self {
            store,
            graph,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn base_url(&self) -> &str {
        self.settings.base_url.trim_end_matches('/')
    }

    fn request_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_matches('/'))
    }

    /// Lists every entity set with its URL.
    pub fn resource_root(&self) -> Value {
        let sets: Vec<Value> = EntityType::ALL
            .iter()
            .map(|t| json!({ "name": t.entity_set(), "url": format!("{}/{}", self.base_url(), t.entity_set()) }))
            .collect();
        json!({ "value": sets })
    }

    /// Answers a read request. `path` is relative to the service root and
    /// `raw_query` is the undecoded query string.
    pub async fn get(
        &self,
        path: &str,
        raw_query: Option<&str>,
        cancellation: &Cancellation,
    ) -> Result<Payload, ApiError> {
        let parsed = parse_query(raw_query.unwrap_or(""), self.settings.query.permissive);
        let (chain, parsed) = match (resolve_path(&self.graph, path), parsed) {
            (Ok(chain), Ok(parsed)) => (chain, parsed),
            (chain, parsed) => {
                return Err(ApiError::Query {
                    path: chain.err(),
                    options: parsed.err().unwrap_or_default(),
                })
            }
        };
        let options = bind(parsed, chain.entity_type()?, &self.graph, &self.settings.query)
            .map_err(ApiError::query)?;
        let plan = translate(&self.graph, &chain, &options, self.settings.max_expand_depth)?;

        let assembler = ResultAssembler::new(&*self.store, &self.graph, self.base_url(), cancellation);
        let outcome = assembler.assemble(&plan, &chain, &self.request_url(path)).await?;
        Ok(serialize(&outcome))
    }

    /// Fetches the single entity addressed by the first `len` steps of `chain`.
    async fn locate(&self, chain: &ResolutionChain, len: usize) -> Result<Option<Entity>, ApiError> {
        let prefix = ResolutionChain {
            steps: chain.steps.iter().take(len).copied().collect(),
            terminal: Terminal::Resource,
        };
        let options = QueryOptions::new(prefix.entity_type()?, 1);
        let plan = translate(&self.graph, &prefix, &options, self.settings.max_expand_depth)?;
        let cancellation = Cancellation::detached(None);
        let assembler = ResultAssembler::new(&*self.store, &self.graph, self.base_url(), &cancellation);
        match assembler.assemble(&plan, &prefix, "").await? {
            Outcome::Entity(node) => Ok(Some(node.entity)),
            _ => Ok(None),
        }
    }

    fn render(&self, entity: Entity) -> Value {
        let links = entity
            .compute_links(self.base_url(), self.graph.edges_from(entity.entity_type()), &BTreeSet::new())
            .unwrap_or_default();
        serialize_node(&EntityNode {
            entity,
            links,
            expanded: Default::default(),
        })
    }

    /// Every reference must name a navigation segment, and a to-one
    /// segment takes a single id.
    fn check_references(&self, entity: &Entity) -> Result<(), ApiError> {
        for (segment, ids) in &entity.related {
            let edge = self
                .graph
                .resolve_segment(entity.entity_type(), segment)
                .ok_or_else(|| ParseError::body(entity.entity_type(), Some(segment.as_str()), "is not a navigation property"))?;
            if !edge.is_to_many() && ids.len() > 1 {
                return Err(ParseError::body(entity.entity_type(), Some(segment.as_str()), "takes a single reference").into());
            }
        }
        Ok(())
    }

    fn single_entity_target(&self, chain: &ResolutionChain, method: &str) -> Result<(), ApiError> {
        if chain.terminal != Terminal::Resource || !chain.returns_single()? {
            return Err(ApiError::MethodNotAllowed(format!(
                "{} requires a path to a single entity",
                method
            )));
        }
        Ok(())
    }

    pub async fn create(&self, path: &str, body: &[u8]) -> Result<Created, ApiError> {
        let chain = resolve_path(&self.graph, path)?;
        if chain.terminal != Terminal::Resource || chain.returns_single()? {
            return Err(ApiError::MethodNotAllowed(
                "POST requires a path to a collection".to_string(),
            ));
        }
        let entity_type = chain.entity_type()?;
        let mut entity = Entity::parse(entity_type, body)?;

        if let Some(edge) = chain.last()?.edge {
            let parent = self
                .locate(&chain, chain.steps.len().saturating_sub(1))
                .await?
                .and_then(|p| p.id())
                .ok_or_else(|| ApiError::NotFound(format!("parent {} not found", edge.from)))?;
            let inverse = self.graph.inverse(&edge).ok_or_else(|| {
                ApiError::MethodNotAllowed(format!("cannot create {} through {}", entity_type, edge.segment))
            })?;
            entity.related.insert(inverse.segment.to_string(), vec![parent]);
        }

        self.check_references(&entity)?;
        entity.validate().map_err(ApiError::Validation)?;

        let stored = self.store.insert(&entity).await?;
        let id = stored
            .id()
            .ok_or_else(|| StorageError::Unsupported("store assigned no id".to_string()))?;
        log::info!("created {}({})", entity_type, id);
        Ok(Created {
            location: self_link(self.base_url(), entity_type, id),
            body: self.render(stored),
        })
    }

    /// PATCH merges present scalars; PUT (`replace`) swaps them wholesale
    /// and must carry every mandatory scalar.
    pub async fn update(&self, path: &str, body: &[u8], replace: bool) -> Result<Value, ApiError> {
        let chain = resolve_path(&self.graph, path)?;
        self.single_entity_target(&chain, if replace { "PUT" } else { "PATCH" })?;
        let entity_type = chain.entity_type()?;
        let patch = Entity::parse(entity_type, body)?;
        self.check_references(&patch)?;

        let mut entity = self
            .locate(&chain, chain.steps.len())
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("{} not found", entity_type)))?;

        let mut errors = Vec::new();
        if replace {
            if let Err(missing) = patch.data().validate_mandatory() {
                errors.extend(missing);
            }
            entity.replace_data(patch.data().clone())?;
        } else {
            entity.merge(patch.data())?;
        }
        errors.extend(entity.data().validate_values());
        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }

        entity.related = patch.related;
        if !self.store.update(&entity).await? {
            return Err(ApiError::NotFound(format!("{} not found", entity_type)));
        }
        log::info!("updated {}({:?})", entity_type, entity.id());
        Ok(self.render(entity))
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let chain = resolve_path(&self.graph, path)?;
        self.single_entity_target(&chain, "DELETE")?;
        let entity_type = chain.entity_type()?;
        let id = self
            .locate(&chain, chain.steps.len())
            .await?
            .and_then(|e| e.id())
            .ok_or_else(|| ApiError::NotFound(format!("{} not found", entity_type)))?;

        if !self.store.delete(entity_type, id).await? {
            return Err(ApiError::NotFound(format!("{} not found", entity_type)));
        }
        log::info!("deleted {}({})", entity_type, id);
        Ok(())
    }
}
