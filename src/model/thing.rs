use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{EntityContract, EntityType, PropertyDef, PropertyKind};

/// An object of the physical or information world that is identified and
/// integrated into a sensor network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

const PROPERTIES: &[PropertyDef] = &[
    PropertyDef::required("name", PropertyKind::Text),
    PropertyDef::required("description", PropertyKind::Text),
    PropertyDef::optional("properties", PropertyKind::Json),
];

impl EntityContract for Thing {
    const ENTITY_TYPE: EntityType = EntityType::Thing;

    fn property_defs() -> &'static [PropertyDef] {
        PROPERTIES
    }
}
