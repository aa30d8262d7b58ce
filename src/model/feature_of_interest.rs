use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{EncodingType, EntityContract, EntityType, PropertyDef, PropertyKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureOfInterest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<Value>,
}

const PROPERTIES: &[PropertyDef] = &[
    PropertyDef::required("name", PropertyKind::Text),
    PropertyDef::required("description", PropertyKind::Text),
    PropertyDef::required("encodingType", PropertyKind::Text),
    PropertyDef::required("feature", PropertyKind::Geometry),
];

impl EntityContract for FeatureOfInterest {
    const ENTITY_TYPE: EntityType = EntityType::FeatureOfInterest;

    fn property_defs() -> &'static [PropertyDef] {
        PROPERTIES
    }

    fn supported_encodings() -> BTreeMap<u8, EncodingType> {
        BTreeMap::from([(EncodingType::GeoJson.code(), EncodingType::GeoJson)])
    }
}
