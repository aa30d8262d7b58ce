use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{Entity, EntityLinks};

/// An entity in the assembled response graph, with its computed links and
/// any inlined relations.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityNode {
    pub entity: Entity,
    pub links: EntityLinks,
    pub expanded: BTreeMap<&'static str, Expanded>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expanded {
    /// To-one relation; `None` when the optional reference is unset.
    Entity(Option<Box<EntityNode>>),
    Collection(CollectionPage),
}

/// One page of a collection with its pagination metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionPage {
    pub items: Vec<EntityNode>,
    /// Present iff more rows exist beyond the window.
    pub next_link: Option<String>,
    pub count: Option<u64>,
}

/// Structured result of a read, handed to the serializer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Entity(Box<EntityNode>),
    Collection(CollectionPage),
    Property {
        name: String,
        value: Value,
        raw: bool,
    },
    References {
        links: Vec<String>,
        single: bool,
        next_link: Option<String>,
        count: Option<u64>,
    },
    NotFound,
}
