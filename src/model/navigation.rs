use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::GraphError;
use crate::model::{mandatory_relations, EntityType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Cardinality {
    pub fn is_to_many(&self) -> bool {
        !matches!(self, Cardinality::ManyToOne)
    }

    pub fn inverse(&self) -> Cardinality {
        match self {
            Cardinality::OneToMany => Cardinality::ManyToOne,
            Cardinality::ManyToOne => Cardinality::OneToMany,
            Cardinality::ManyToMany => Cardinality::ManyToMany,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cardinality::OneToMany => "one-to-many",
            Cardinality::ManyToOne => "many-to-one",
            Cardinality::ManyToMany => "many-to-many",
        };
        f.write_str(name)
    }
}

/// A declared relation from one entity type to another, addressed in URLs and
/// payloads by `segment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NavigationEdge {
    pub from: EntityType,
    pub to: EntityType,
    pub cardinality: Cardinality,
    pub segment: &'static str,
}

impl NavigationEdge {
    pub const fn new(
        from: EntityType,
        to: EntityType,
        cardinality: Cardinality,
        segment: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            cardinality,
            segment,
        }
    }

    pub fn is_to_many(&self) -> bool {
        self.cardinality.is_to_many()
    }
}

/// Read-only map of entity type to its navigation edges. Built once at
/// startup and shared by reference; construction fails on any inconsistency.
#[derive(Debug, Clone)]
pub struct NavigationGraph {
    edges: HashMap<EntityType, Vec<NavigationEdge>>,
}

impl NavigationGraph {
    pub fn new(edges: Vec<NavigationEdge>) -> Result<Self, GraphError> {
        let mut by_type: HashMap<EntityType, Vec<NavigationEdge>> = HashMap::new();
        let mut seen = HashSet::new();
        for edge in edges {
            if !seen.insert((edge.from, edge.segment)) {
                return Err(GraphError::DuplicateSegment {
                    from: edge.from,
                    segment: edge.segment,
                });
            }
            let expected = if edge.is_to_many() {
                edge.to.entity_set()
            } else {
                edge.to.name()
            };
            if edge.segment != expected {
                return Err(GraphError::SegmentName {
                    from: edge.from,
                    segment: edge.segment,
                    expected,
                });
            }
            by_type.entry(edge.from).or_default().push(edge);
        }

        let graph = Self { edges: by_type };
        for edge in graph.edges.values().flatten() {
            let inverse = graph.inverse(edge).ok_or(GraphError::MissingInverse {
                from: edge.from,
                segment: edge.segment,
            })?;
            if inverse.cardinality != edge.cardinality.inverse() {
                return Err(GraphError::CardinalityMismatch {
                    from: edge.from,
                    segment: edge.segment,
                    cardinality: edge.cardinality.to_string(),
                    inverse: inverse.cardinality.to_string(),
                });
            }
        }
        Ok(graph)
    }

    /// The SensorThings relations between the eight entity types.
    pub fn sensorthings() -> Result<Self, GraphError> {
        use Cardinality::*;
        use EntityType::*;

        Self::new(vec![
            NavigationEdge::new(Thing, Location, ManyToMany, "Locations"),
            NavigationEdge::new(Thing, HistoricalLocation, OneToMany, "HistoricalLocations"),
            NavigationEdge::new(Thing, Datastream, OneToMany, "Datastreams"),
            NavigationEdge::new(Location, Thing, ManyToMany, "Things"),
            NavigationEdge::new(Location, HistoricalLocation, ManyToMany, "HistoricalLocations"),
            NavigationEdge::new(HistoricalLocation, Thing, ManyToOne, "Thing"),
            NavigationEdge::new(HistoricalLocation, Location, ManyToMany, "Locations"),
            NavigationEdge::new(Datastream, Thing, ManyToOne, "Thing"),
            NavigationEdge::new(Datastream, Sensor, ManyToOne, "Sensor"),
            NavigationEdge::new(Datastream, ObservedProperty, ManyToOne, "ObservedProperty"),
            NavigationEdge::new(Datastream, Observation, OneToMany, "Observations"),
            NavigationEdge::new(Sensor, Datastream, OneToMany, "Datastreams"),
            NavigationEdge::new(ObservedProperty, Datastream, OneToMany, "Datastreams"),
            NavigationEdge::new(Observation, Datastream, ManyToOne, "Datastream"),
            NavigationEdge::new(Observation, FeatureOfInterest, ManyToOne, "FeatureOfInterest"),
            NavigationEdge::new(FeatureOfInterest, Observation, OneToMany, "Observations"),
        ])
    }

    pub fn edges_from(&self, entity_type: EntityType) -> &[NavigationEdge] {
        self.edges
            .get(&entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn resolve_segment(&self, entity_type: EntityType, segment: &str) -> Option<&NavigationEdge> {
        self.edges_from(entity_type)
            .iter()
            .find(|edge| edge.segment == segment)
    }

    /// The edge declared in the opposite direction.
    pub fn inverse(&self, edge: &NavigationEdge) -> Option<&NavigationEdge> {
        self.edges_from(edge.to)
            .iter()
            .find(|candidate| candidate.to == edge.from)
    }

    /// Whether replacing the references along the to-many `edge` may drop
    /// existing links. Children that cannot exist without their parent are
    /// never detached; they move only when another parent claims them.
    pub fn releases_links(&self, edge: &NavigationEdge) -> bool {
        match edge.cardinality {
            Cardinality::ManyToMany => true,
            Cardinality::OneToMany => self
                .inverse(edge)
                .is_some_and(|inverse| !mandatory_relations(edge.to).contains(&inverse.segment)),
            Cardinality::ManyToOne => false,
        }
    }

    /// Entity types that can start a path.
    pub fn entity_types(&self) -> Vec<EntityType> {
        EntityType::ALL
            .into_iter()
            .filter(|t| self.edges.contains_key(t))
            .collect()
    }
}
