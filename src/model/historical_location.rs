use serde::{Deserialize, Serialize};

use crate::model::{EntityContract, EntityType, PropertyDef, PropertyKind};

/// Time at which a Thing was known to be at its then-current Locations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

const PROPERTIES: &[PropertyDef] = &[PropertyDef::required("time", PropertyKind::Time)];

impl EntityContract for HistoricalLocation {
    const ENTITY_TYPE: EntityType = EntityType::HistoricalLocation;

    fn property_defs() -> &'static [PropertyDef] {
        PROPERTIES
    }

    fn mandatory_relations() -> &'static [&'static str] {
        &["Thing"]
    }
}
