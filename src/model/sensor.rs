use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{EncodingType, EntityContract, EntityType, PropertyDef, PropertyKind};

/// Instrument that observes a property. Its metadata may be any document
/// encoding, referenced or inline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

const PROPERTIES: &[PropertyDef] = &[
    PropertyDef::required("name", PropertyKind::Text),
    PropertyDef::required("description", PropertyKind::Text),
    PropertyDef::required("encodingType", PropertyKind::Text),
    PropertyDef::required("metadata", PropertyKind::Any),
];

impl EntityContract for Sensor {
    const ENTITY_TYPE: EntityType = EntityType::Sensor;

    fn property_defs() -> &'static [PropertyDef] {
        PROPERTIES
    }

    fn supported_encodings() -> BTreeMap<u8, EncodingType> {
        [
            EncodingType::Pdf,
            EncodingType::SensorMl,
            EncodingType::Html,
            EncodingType::PlainText,
        ]
        .into_iter()
        .map(|e| (e.code(), e))
        .collect()
    }
}
