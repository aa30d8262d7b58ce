use crate::error::PathError;
use crate::model::{EntityType, Id, NavigationEdge};

/// One validated step of a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStep {
    pub entity_type: EntityType,
    pub id: Option<Id>,
    /// Edge taken from the previous step; `None` for the root entity set.
    pub edge: Option<NavigationEdge>,
}

impl ChainStep {
    /// Whether this step addresses at most one entity.
    pub fn is_single(&self) -> bool {
        self.id.is_some() || self.edge.map(|e| !e.is_to_many()).unwrap_or(false)
    }
}

/// What the path asks for once the entity steps are walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Resource,
    /// `.../name` or `.../name/$value`
    Property { name: String, raw_value: bool },
    /// `.../$ref`
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionChain {
    pub steps: Vec<ChainStep>,
    pub terminal: Terminal,
}

impl ResolutionChain {
    pub fn last(&self) -> Result<&ChainStep, PathError> {
        self.steps.last().ok_or(PathError::Empty)
    }

    /// Entity type of the response root.
    pub fn entity_type(&self) -> Result<EntityType, PathError> {
        Ok(self.last()?.entity_type)
    }

    pub fn returns_single(&self) -> Result<bool, PathError> {
        Ok(self.last()?.is_single())
    }

    /// Id the request explicitly targets, if the terminal step names one.
    pub fn target_id(&self) -> Result<Option<Id>, PathError> {
        Ok(self.last()?.id)
    }
}
