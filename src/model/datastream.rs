use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::model::{encoding_violations, EntityContract, EntityType, PropertyDef, PropertyKind};

pub const OBSERVATION_TYPES: &[&str] = &[
    "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_CategoryObservation",
    "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_CountObservation",
    "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Measurement",
    "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Observation",
    "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_TruthObservation",
];

/// Groups Observations of one ObservedProperty made by one Sensor on one Thing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datastream {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_area: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phenomenon_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_time: Option<String>,
}

const PROPERTIES: &[PropertyDef] = &[
    PropertyDef::required("name", PropertyKind::Text),
    PropertyDef::required("description", PropertyKind::Text),
    PropertyDef::required("unitOfMeasurement", PropertyKind::Json),
    PropertyDef::required("observationType", PropertyKind::Text),
    PropertyDef::optional("observedArea", PropertyKind::Geometry),
    PropertyDef::optional("phenomenonTime", PropertyKind::Time),
    PropertyDef::optional("resultTime", PropertyKind::Time),
];

impl EntityContract for Datastream {
    const ENTITY_TYPE: EntityType = EntityType::Datastream;

    fn property_defs() -> &'static [PropertyDef] {
        PROPERTIES
    }

    fn mandatory_relations() -> &'static [&'static str] {
        &["Thing", "Sensor", "ObservedProperty"]
    }

    fn validate_values(&self) -> Vec<ValidationError> {
        let mut errors = encoding_violations(self);
        if let Some(observation_type) = &self.observation_type {
            if !OBSERVATION_TYPES.contains(&observation_type.as_str()) {
                errors.push(ValidationError::invalid(
                    EntityType::Datastream,
                    "observationType",
                    format!("unknown observationType {}", observation_type),
                ));
            }
        }
        errors
    }
}
