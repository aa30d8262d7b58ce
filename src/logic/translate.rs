//! Turns a resolution chain and bound query options into an ordered list of
//! data-access operations. Operations only ever depend on earlier ones.

use crate::error::TranslateError;
use crate::model::{
    EntityType, Id, NavigationEdge, NavigationGraph, OrderBy, Page, Predicate, PropertyRef,
    QueryOptions, ResolutionChain, Selection, Terminal,
};

#[derive(Debug, Clone, PartialEq)]
pub enum DataAccess {
    FetchById {
        entity_type: EntityType,
        id: Id,
    },
    /// Filtered collection. With a `scope`, only entities related through it
    /// to the single entity produced by the dependency are returned.
    FetchCollection {
        entity_type: EntityType,
        scope: Option<NavigationEdge>,
        predicate: Predicate,
        order_by: Vec<OrderBy<PropertyRef>>,
        page: Page,
    },
    /// Entities related through `edge` to every entity of the dependency,
    /// paged per parent.
    FetchRelated {
        edge: NavigationEdge,
        predicate: Predicate,
        order_by: Vec<OrderBy<PropertyRef>>,
        page: Page,
    },
}

impl DataAccess {
    pub fn entity_type(&self) -> EntityType {
        match self {
            DataAccess::FetchById { entity_type, .. } => *entity_type,
            DataAccess::FetchCollection { entity_type, .. } => *entity_type,
            DataAccess::FetchRelated { edge, .. } => edge.to,
        }
    }
}

/// How the result of an operation is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Intermediate path step; must yield exactly one entity.
    Locate,
    Root { single: bool },
    /// Inlined under the entities of operation `parent`.
    Expand { parent: usize, edge: NavigationEdge },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOperation {
    pub access: DataAccess,
    pub depends_on: Option<usize>,
    pub role: Role,
    pub count: bool,
    pub selection: Option<Selection>,
    /// Decoded options of this level, for paging links.
    pub source: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub operations: Vec<PlannedOperation>,
    pub root: usize,
}

impl QueryPlan {
    /// Expand operations hanging directly off `parent`.
    pub fn children(&self, parent: usize) -> impl Iterator<Item = (usize, &PlannedOperation)> {
        self.operations
            .iter()
            .enumerate()
            .filter(move |(_, op)| matches!(op.role, Role::Expand { parent: p, .. } if p == parent))
    }
}

pub fn translate(
    graph: &NavigationGraph,
    chain: &ResolutionChain,
    options: &QueryOptions,
    max_expand_depth: usize,
) -> Result<QueryPlan, TranslateError> {
    let depth = options.expand_depth();
    if depth > max_expand_depth {
        return Err(TranslateError::ExpandTooDeep {
            depth,
            max: max_expand_depth,
        });
    }
    let target = chain
        .entity_type()
        .map_err(|e| TranslateError::InvalidTarget(e.to_string()))?;
    if options.entity_type != target {
        return Err(TranslateError::InvalidTarget(format!(
            "options bound to {} but the path addresses {}",
            options.entity_type, target
        )));
    }

    let mut operations: Vec<PlannedOperation> = Vec::new();
    for (index, step) in chain.steps.iter().enumerate() {
        let is_root = index + 1 == chain.steps.len();
        if !is_root && !step.is_single() {
            return Err(TranslateError::InvalidTarget(format!(
                "navigation from a collection of {} requires an id",
                step.entity_type.entity_set()
            )));
        }

        let single = step.is_single();
        let role = if is_root { Role::Root { single } } else { Role::Locate };
        let predicate = if is_root && !single {
            Predicate::by_filter(options.filter.clone())
        } else {
            Predicate::default()
        };
        let (order_by, page) = if is_root && !single {
            (options.order_by.clone(), options.page())
        } else {
            (Vec::new(), Page::single())
        };

        let access = match (step.edge, step.id) {
            (None, Some(id)) => DataAccess::FetchById {
                entity_type: step.entity_type,
                id,
            },
            (None, None) => DataAccess::FetchCollection {
                entity_type: step.entity_type,
                scope: None,
                predicate,
                order_by,
                page,
            },
            (Some(edge), id) => {
                let inverse = graph.inverse(&edge).ok_or_else(|| {
                    TranslateError::InvalidTarget(format!(
                        "edge {}/{} has no inverse",
                        edge.from, edge.segment
                    ))
                })?;
                DataAccess::FetchCollection {
                    entity_type: step.entity_type,
                    scope: Some(*inverse),
                    predicate: predicate.with_id(id),
                    order_by,
                    page,
                }
            }
        };

        let wants_entities = is_root && matches!(chain.terminal, Terminal::Resource);
        operations.push(PlannedOperation {
            access,
            depends_on: index.checked_sub(1),
            role,
            count: is_root && !single && options.count,
            selection: if wants_entities { options.select.clone() } else { None },
            source: if is_root { options.source.clone() } else { Vec::new() },
        });
    }

    let root = operations.len() - 1;
    if chain.terminal == Terminal::Resource {
        plan_expands(&mut operations, root, options);
    }

    let plan = QueryPlan { operations, root };
    log::debug!("translated {} operation(s): {:?}", plan.operations.len(), plan.operations);
    Ok(plan)
}

fn plan_expands(operations: &mut Vec<PlannedOperation>, parent: usize, options: &QueryOptions) {
    for expand in &options.expand {
        let nested = &expand.options;
        let to_many = expand.edge.is_to_many();
        operations.push(PlannedOperation {
            access: DataAccess::FetchRelated {
                edge: expand.edge,
                predicate: Predicate::by_filter(nested.filter.clone()),
                order_by: nested.order_by.clone(),
                page: if to_many { nested.page() } else { Page::single() },
            },
            depends_on: Some(parent),
            role: Role::Expand {
                parent,
                edge: expand.edge,
            },
            count: to_many && nested.count,
            selection: nested.select.clone(),
            source: nested.source.clone(),
        });
        let index = operations.len() - 1;
        plan_expands(operations, index, nested);
    }
}
