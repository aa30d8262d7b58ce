use std::collections::BTreeSet;

use crate::model::{EntityType, FilterExpr, NavigationEdge, OrderBy, PropertyPath, PropertyRef};

/// Query options as written, before they are checked against an entity type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedOptions {
    pub select: Option<Vec<PropertyPath>>,
    pub filter: Option<FilterExpr<PropertyPath>>,
    pub order_by: Vec<OrderBy<PropertyPath>>,
    pub expand: Vec<ParsedExpand>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub count: Option<bool>,
    /// Decoded key/value pairs as received, used to rebuild paging links.
    pub source: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedExpand {
    pub segment: String,
    pub options: ParsedOptions,
}

/// Selected scalars and selected navigation segments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    pub properties: BTreeSet<String>,
    pub navigation: BTreeSet<&'static str>,
}

/// Query options bound to `entity_type`: every property and expand segment
/// has been resolved, `top` is defaulted and clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub entity_type: EntityType,
    pub select: Option<Selection>,
    pub filter: Option<FilterExpr<PropertyRef>>,
    pub order_by: Vec<OrderBy<PropertyRef>>,
    pub expand: Vec<Expand>,
    pub top: usize,
    pub skip: usize,
    pub count: bool,
    pub source: Vec<(String, String)>,
}

impl QueryOptions {
    pub fn new(entity_type: EntityType, top: usize) -> Self {
        Self {
            entity_type,
            select: None,
            filter: None,
            order_by: Vec::new(),
            expand: Vec::new(),
            top,
            skip: 0,
            count: false,
            source: Vec::new(),
        }
    }

    pub fn page(&self) -> Page {
        Page {
            top: self.top,
            skip: self.skip,
        }
    }

    /// Deepest expand nesting below this level.
    pub fn expand_depth(&self) -> usize {
        self.expand
            .iter()
            .map(|e| 1 + e.options.expand_depth())
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expand {
    pub edge: NavigationEdge,
    pub options: QueryOptions,
}

/// Pagination window of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub top: usize,
    pub skip: usize,
}

impl Page {
    pub fn single() -> Self {
        Self { top: 1, skip: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cardinality;

    #[test]
    fn test_expand_depth() {
        let mut root = QueryOptions::new(EntityType::Thing, 100);
        assert_eq!(root.expand_depth(), 0);

        let mut datastreams = QueryOptions::new(EntityType::Datastream, 100);
        datastreams.expand.push(Expand {
            edge: NavigationEdge::new(
                EntityType::Datastream,
                EntityType::Observation,
                Cardinality::OneToMany,
                "Observations",
            ),
            options: QueryOptions::new(EntityType::Observation, 100),
        });
        root.expand.push(Expand {
            edge: NavigationEdge::new(
                EntityType::Thing,
                EntityType::Datastream,
                Cardinality::OneToMany,
                "Datastreams",
            ),
            options: datastreams,
        });
        root.expand.push(Expand {
            edge: NavigationEdge::new(
                EntityType::Thing,
                EntityType::Location,
                Cardinality::ManyToMany,
                "Locations",
            ),
            options: QueryOptions::new(EntityType::Location, 100),
        });
        assert_eq!(root.expand_depth(), 2);
    }
}
