use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{EncodingType, EntityContract, EntityType, PropertyDef, PropertyKind};

/// Last known position of a Thing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
}

const PROPERTIES: &[PropertyDef] = &[
    PropertyDef::required("name", PropertyKind::Text),
    PropertyDef::required("description", PropertyKind::Text),
    PropertyDef::required("encodingType", PropertyKind::Text),
    PropertyDef::required("location", PropertyKind::Geometry),
];

impl EntityContract for Location {
    const ENTITY_TYPE: EntityType = EntityType::Location;

    fn property_defs() -> &'static [PropertyDef] {
        PROPERTIES
    }

    fn supported_encodings() -> BTreeMap<u8, EncodingType> {
        BTreeMap::from([(EncodingType::GeoJson.code(), EncodingType::GeoJson)])
    }
}
