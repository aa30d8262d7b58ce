use serde::{Deserialize, Serialize};

use crate::model::{EntityContract, EntityType, PropertyDef, PropertyKind};

/// The phenomenon a Datastream observes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedProperty {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

const PROPERTIES: &[PropertyDef] = &[
    PropertyDef::required("name", PropertyKind::Text),
    PropertyDef::required("definition", PropertyKind::Text),
    PropertyDef::required("description", PropertyKind::Text),
];

impl EntityContract for ObservedProperty {
    const ENTITY_TYPE: EntityType = EntityType::ObservedProperty;

    fn property_defs() -> &'static [PropertyDef] {
        PROPERTIES
    }
}
