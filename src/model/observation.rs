use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{EntityContract, EntityType, PropertyDef, PropertyKind};

/// A single measured value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phenomenon_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_quality: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

const PROPERTIES: &[PropertyDef] = &[
    PropertyDef::optional("phenomenonTime", PropertyKind::Time),
    PropertyDef::required("result", PropertyKind::Any),
    PropertyDef::optional("resultTime", PropertyKind::Time),
    PropertyDef::optional("resultQuality", PropertyKind::Any),
    PropertyDef::optional("validTime", PropertyKind::Time),
    PropertyDef::optional("parameters", PropertyKind::Json),
];

impl EntityContract for Observation {
    const ENTITY_TYPE: EntityType = EntityType::Observation;

    fn property_defs() -> &'static [PropertyDef] {
        PROPERTIES
    }

    fn mandatory_relations() -> &'static [&'static str] {
        &["Datastream"]
    }
}
