use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Storage-assigned entity identifier.
pub type Id = i64;

/// The fixed set of entity types served by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Thing,
    Location,
    HistoricalLocation,
    Datastream,
    Sensor,
    ObservedProperty,
    Observation,
    FeatureOfInterest,
}

impl EntityType {
    pub const ALL: [EntityType; 8] = [
        EntityType::Thing,
        EntityType::Location,
        EntityType::HistoricalLocation,
        EntityType::Datastream,
        EntityType::Sensor,
        EntityType::ObservedProperty,
        EntityType::Observation,
        EntityType::FeatureOfInterest,
    ];

    /// Singular name, also the segment name of a to-one navigation.
    pub fn name(&self) -> &'static str {
        match self {
            EntityType::Thing => "Thing",
            EntityType::Location => "Location",
            EntityType::HistoricalLocation => "HistoricalLocation",
            EntityType::Datastream => "Datastream",
            EntityType::Sensor => "Sensor",
            EntityType::ObservedProperty => "ObservedProperty",
            EntityType::Observation => "Observation",
            EntityType::FeatureOfInterest => "FeatureOfInterest",
        }
    }

    /// Entity set name, used as the root path segment and for to-many navigation.
    pub fn entity_set(&self) -> &'static str {
        match self {
            EntityType::Thing => "Things",
            EntityType::Location => "Locations",
            EntityType::HistoricalLocation => "HistoricalLocations",
            EntityType::Datastream => "Datastreams",
            EntityType::Sensor => "Sensors",
            EntityType::ObservedProperty => "ObservedProperties",
            EntityType::Observation => "Observations",
            EntityType::FeatureOfInterest => "FeaturesOfInterest",
        }
    }

    pub fn from_entity_set(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.entity_set() == name)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encodings accepted by `encodingType` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncodingType {
    GeoJson,
    Pdf,
    SensorMl,
    Html,
    PlainText,
}

impl EncodingType {
    pub fn code(&self) -> u8 {
        match self {
            EncodingType::GeoJson => 1,
            EncodingType::Pdf => 2,
            EncodingType::SensorMl => 3,
            EncodingType::Html => 4,
            EncodingType::PlainText => 5,
        }
    }

    pub fn value(&self) -> &'static str {
        match self {
            EncodingType::GeoJson => "application/vnd.geo+json",
            EncodingType::Pdf => "application/pdf",
            EncodingType::SensorMl => "http://www.opengis.net/doc/IS/SensorML/2.0",
            EncodingType::Html => "text/html",
            EncodingType::PlainText => "text/plain",
        }
    }
}

/// JSON shape a scalar property must have on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Text,
    /// JSON object
    Json,
    /// ISO-8601 instant or `start/end` interval
    Time,
    /// GeoJSON object
    Geometry,
    Any,
}

impl PropertyKind {
    /// Checks a present, non-null value. Returns the reason on mismatch.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (PropertyKind::Any, _) => Ok(()),
            (PropertyKind::Text, Value::String(_)) => Ok(()),
            (PropertyKind::Text, _) => Err("must be a string".to_string()),
            (PropertyKind::Json, Value::Object(_)) => Ok(()),
            (PropertyKind::Json, _) => Err("must be a JSON object".to_string()),
            (PropertyKind::Time, Value::String(s)) => {
                if parse_time(s).is_some() {
                    Ok(())
                } else {
                    Err(format!("'{}' is not an ISO 8601 time or interval", s))
                }
            }
            (PropertyKind::Time, _) => Err("must be an ISO 8601 string".to_string()),
            (PropertyKind::Geometry, Value::Object(obj)) if obj.contains_key("type") => Ok(()),
            (PropertyKind::Geometry, _) => Err("must be a GeoJSON object".to_string()),
        }
    }

    /// Whether a filter path may continue into the value's members.
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            PropertyKind::Json | PropertyKind::Geometry | PropertyKind::Any
        )
    }
}

/// Declared scalar property of an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub required: bool,
}

impl PropertyDef {
    pub const fn required(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Parses an instant, or the start of an interval.
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    let mut parts = value.splitn(2, '/');
    let start = parts.next()?;
    let parsed = DateTime::parse_from_rfc3339(start.trim()).ok()?;
    if let Some(end) = parts.next() {
        DateTime::parse_from_rfc3339(end.trim()).ok()?;
    }
    Some(parsed.with_timezone(&Utc))
}
