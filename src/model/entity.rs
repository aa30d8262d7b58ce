use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ParseError, ValidationError};
use crate::model::{
    Datastream, EncodingType, EntityType, FeatureOfInterest, HistoricalLocation, Id, Location,
    NavigationEdge, Observation, ObservedProperty, PropertyDef, Sensor, Thing,
};

pub const ID_KEY: &str = "@iot.id";
pub const SELF_LINK_KEY: &str = "@iot.selfLink";
pub const NAVIGATION_LINK_SUFFIX: &str = "@iot.navigationLink";

/// Capabilities every concrete entity type provides. Most behaviour derives
/// from the static property table, so implementors usually only declare it.
pub trait EntityContract: Serialize + DeserializeOwned + Default + Clone + PartialEq {
    const ENTITY_TYPE: EntityType;

    fn property_defs() -> &'static [PropertyDef];

    /// Navigation segments that must reference an existing entity on insert.
    fn mandatory_relations() -> &'static [&'static str] {
        &[]
    }

    fn supported_encodings() -> BTreeMap<u8, EncodingType> {
        BTreeMap::new()
    }

    fn property_names() -> BTreeSet<&'static str> {
        std::iter::once("id")
            .chain(Self::property_defs().iter().map(|def| def.name))
            .collect()
    }

    fn scalars(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Builds the entity from declared scalars. Unknown keys are ignored; a
    /// declared key of the wrong JSON kind is rejected by name.
    fn from_scalars(mut map: Map<String, Value>) -> Result<Self, ParseError> {
        let defs = Self::property_defs();
        map.retain(|key, _| defs.iter().any(|def| def.name == key));
        for def in defs {
            match map.get(def.name) {
                None | Some(Value::Null) => {}
                Some(value) => def
                    .kind
                    .check(value)
                    .map_err(|reason| ParseError::body(Self::ENTITY_TYPE, Some(def.name), reason))?,
            }
        }
        serde_json::from_value(Value::Object(map))
            .map_err(|e| ParseError::body(Self::ENTITY_TYPE, None, e.to_string()))
    }

    /// Reports every missing mandatory scalar at once.
    fn validate_mandatory(&self) -> Result<(), Vec<ValidationError>> {
        let scalars = self.scalars();
        let errors: Vec<ValidationError> = Self::property_defs()
            .iter()
            .filter(|def| def.required)
            .filter(|def| matches!(scalars.get(def.name), None | Some(Value::Null)))
            .map(|def| ValidationError::missing(Self::ENTITY_TYPE, def.name))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_values(&self) -> Vec<ValidationError> {
        encoding_violations(self)
    }
}

/// A present `encodingType` must be one the type supports.
pub fn encoding_violations<T: EntityContract>(entity: &T) -> Vec<ValidationError> {
    let supported = T::supported_encodings();
    if supported.is_empty() {
        return Vec::new();
    }
    match entity.scalars().get("encodingType") {
        Some(Value::String(encoding)) if !supported.values().any(|e| e.value() == encoding) => {
            vec![ValidationError::invalid(
                T::ENTITY_TYPE,
                "encodingType",
                format!("{} does not support encodingType {}", T::ENTITY_TYPE, encoding),
            )]
        }
        _ => Vec::new(),
    }
}

macro_rules! with_data {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            EntityData::Thing($inner) => $body,
            EntityData::Location($inner) => $body,
            EntityData::HistoricalLocation($inner) => $body,
            EntityData::Datastream($inner) => $body,
            EntityData::Sensor($inner) => $body,
            EntityData::ObservedProperty($inner) => $body,
            EntityData::Observation($inner) => $body,
            EntityData::FeatureOfInterest($inner) => $body,
        }
    };
}

macro_rules! with_type {
    ($entity_type:expr, $ty:ident => $body:expr) => {
        match $entity_type {
            EntityType::Thing => {
                type $ty = Thing;
                $body
            }
            EntityType::Location => {
                type $ty = Location;
                $body
            }
            EntityType::HistoricalLocation => {
                type $ty = HistoricalLocation;
                $body
            }
            EntityType::Datastream => {
                type $ty = Datastream;
                $body
            }
            EntityType::Sensor => {
                type $ty = Sensor;
                $body
            }
            EntityType::ObservedProperty => {
                type $ty = ObservedProperty;
                $body
            }
            EntityType::Observation => {
                type $ty = Observation;
                $body
            }
            EntityType::FeatureOfInterest => {
                type $ty = FeatureOfInterest;
                $body
            }
        }
    };
}

/// Scalar payload of one entity, tagged by type.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Thing(Thing),
    Location(Location),
    HistoricalLocation(HistoricalLocation),
    Datastream(Datastream),
    Sensor(Sensor),
    ObservedProperty(ObservedProperty),
    Observation(Observation),
    FeatureOfInterest(FeatureOfInterest),
}

impl EntityData {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityData::Thing(_) => EntityType::Thing,
            EntityData::Location(_) => EntityType::Location,
            EntityData::HistoricalLocation(_) => EntityType::HistoricalLocation,
            EntityData::Datastream(_) => EntityType::Datastream,
            EntityData::Sensor(_) => EntityType::Sensor,
            EntityData::ObservedProperty(_) => EntityType::ObservedProperty,
            EntityData::Observation(_) => EntityType::Observation,
            EntityData::FeatureOfInterest(_) => EntityType::FeatureOfInterest,
        }
    }

    pub fn empty(entity_type: EntityType) -> Self {
        with_type!(entity_type, T => T::default().into())
    }

    pub fn from_scalars(entity_type: EntityType, map: Map<String, Value>) -> Result<Self, ParseError> {
        with_type!(entity_type, T => T::from_scalars(map).map(Into::into))
    }

    pub fn scalars(&self) -> Map<String, Value> {
        with_data!(self, inner => inner.scalars())
    }

    pub fn validate_mandatory(&self) -> Result<(), Vec<ValidationError>> {
        with_data!(self, inner => inner.validate_mandatory())
    }

    pub fn validate_values(&self) -> Vec<ValidationError> {
        with_data!(self, inner => inner.validate_values())
    }
}

macro_rules! impl_from_variant {
    ($($variant:ident),*) => {
        $(impl From<$variant> for EntityData {
            fn from(value: $variant) -> Self {
                EntityData::$variant(value)
            }
        })*
    };
}

impl_from_variant!(
    Thing,
    Location,
    HistoricalLocation,
    Datastream,
    Sensor,
    ObservedProperty,
    Observation,
    FeatureOfInterest
);

/// Per-type metadata, without needing an instance.
pub fn property_defs(entity_type: EntityType) -> &'static [PropertyDef] {
    with_type!(entity_type, T => T::property_defs())
}

pub fn property_names(entity_type: EntityType) -> BTreeSet<&'static str> {
    with_type!(entity_type, T => T::property_names())
}

pub fn mandatory_relations(entity_type: EntityType) -> &'static [&'static str] {
    with_type!(entity_type, T => T::mandatory_relations())
}

pub fn supported_encodings(entity_type: EntityType) -> BTreeMap<u8, EncodingType> {
    with_type!(entity_type, T => T::supported_encodings())
}

/// Self link and the navigation links of relations that are not inlined.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityLinks {
    pub self_link: String,
    pub navigation: BTreeMap<&'static str, String>,
}

pub fn self_link(base_url: &str, entity_type: EntityType, id: Id) -> String {
    format!(
        "{}/{}({})",
        base_url.trim_end_matches('/'),
        entity_type.entity_set(),
        id
    )
}

/// One entity: immutable identity plus scalars and lazily populated
/// references to related entities, keyed by navigation segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: Option<Id>,
    data: EntityData,
    pub related: BTreeMap<String, Vec<Id>>,
}

impl Entity {
    pub fn new(data: impl Into<EntityData>) -> Self {
        Self {
            id: None,
            data: data.into(),
            related: BTreeMap::new(),
        }
    }

    pub fn with_id(id: Id, data: impl Into<EntityData>) -> Self {
        Self {
            id: Some(id),
            data: data.into(),
            related: BTreeMap::new(),
        }
    }

    /// Rebuilds a stored entity from its scalar document.
    pub fn from_stored(entity_type: EntityType, id: Id, data: Value) -> Result<Self, ParseError> {
        let map = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(ParseError::body(entity_type, None, "stored data is not an object")),
        };
        Ok(Self::with_id(id, EntityData::from_scalars(entity_type, map)?))
    }

    pub fn id(&self) -> Option<Id> {
        self.id
    }

    pub fn entity_type(&self) -> EntityType {
        self.data.entity_type()
    }

    pub fn data(&self) -> &EntityData {
        &self.data
    }

    pub fn into_data(self) -> EntityData {
        self.data
    }

    /// Parses a request payload. `@iot.id` is honoured, `{"@iot.id": n}`
    /// objects (or arrays of them) under a capitalised key become related
    /// references, and unknown scalar keys are ignored.
    pub fn parse(entity_type: EntityType, bytes: &[u8]) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ParseError::body(entity_type, None, format!("invalid JSON: {}", e)))?;
        let Value::Object(object) = value else {
            return Err(ParseError::body(entity_type, None, "expected a JSON object"));
        };

        let mut id = None;
        let mut scalars = Map::new();
        let mut related = BTreeMap::new();
        for (key, value) in object {
            if key == ID_KEY {
                id = Some(parse_reference_id(entity_type, &key, &value)?);
            } else if key.contains("@iot.") {
                continue;
            } else if key.starts_with(|c: char| c.is_ascii_uppercase()) {
                related.insert(key.clone(), parse_references(entity_type, &key, &value)?);
            } else {
                scalars.insert(key, value);
            }
        }

        Ok(Self {
            id,
            data: EntityData::from_scalars(entity_type, scalars)?,
            related,
        })
    }

    /// Every missing mandatory scalar and relation, one error per field.
    pub fn validate_mandatory(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = self.data.validate_mandatory().err().unwrap_or_default();
        for relation in mandatory_relations(self.entity_type()) {
            let present = self
                .related
                .get(*relation)
                .map(|ids| !ids.is_empty())
                .unwrap_or(false);
            if !present {
                errors.push(ValidationError::missing(self.entity_type(), relation));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Mandatory checks plus value checks, all collected.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = self.validate_mandatory().err().unwrap_or_default();
        errors.extend(self.data.validate_values());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn property_names(&self) -> BTreeSet<&'static str> {
        property_names(self.entity_type())
    }

    pub fn supported_encodings(&self) -> BTreeMap<u8, EncodingType> {
        supported_encodings(self.entity_type())
    }

    /// Deterministic links for a stored entity; `None` before an id is assigned.
    pub fn compute_links(
        &self,
        base_url: &str,
        edges: &[NavigationEdge],
        expanded: &BTreeSet<&str>,
    ) -> Option<EntityLinks> {
        let id = self.id?;
        let self_link = self_link(base_url, self.entity_type(), id);
        let navigation = edges
            .iter()
            .filter(|edge| !expanded.contains(edge.segment))
            .map(|edge| (edge.segment, format!("{}/{}", self_link, edge.segment)))
            .collect();
        Some(EntityLinks {
            self_link,
            navigation,
        })
    }

    /// Value of a scalar property; `id` resolves to the identifier.
    pub fn property(&self, name: &str) -> Option<Value> {
        if name == "id" {
            return self.id.map(Value::from);
        }
        self.data.scalars().remove(name)
    }

    /// Drops scalars not named in `names`. The identifier is never pruned.
    pub fn retain_properties(&mut self, names: &BTreeSet<String>) {
        let mut scalars = self.data.scalars();
        scalars.retain(|key, _| names.contains(key));
        if let Ok(data) = EntityData::from_scalars(self.entity_type(), scalars) {
            self.data = data;
        }
    }

    /// Overwrites the scalars present in `patch`, keeping the rest.
    pub fn merge(&mut self, patch: &EntityData) -> Result<(), ParseError> {
        let mut scalars = self.data.scalars();
        scalars.extend(patch.scalars());
        self.data = EntityData::from_scalars(self.entity_type(), scalars)?;
        Ok(())
    }

    pub fn replace_data(&mut self, data: EntityData) -> Result<(), ParseError> {
        if data.entity_type() != self.entity_type() {
            return Err(ParseError::body(
                self.entity_type(),
                None,
                format!("cannot replace with a {}", data.entity_type()),
            ));
        }
        self.data = data;
        Ok(())
    }
}

fn parse_reference_id(entity_type: EntityType, key: &str, value: &Value) -> Result<Id, ParseError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ParseError::body(entity_type, Some(key), "must be an integer id")),
        Value::String(s) => s
            .parse()
            .map_err(|_| ParseError::body(entity_type, Some(key), "must be an integer id")),
        _ => Err(ParseError::body(entity_type, Some(key), "must be an integer id")),
    }
}

fn parse_references(entity_type: EntityType, key: &str, value: &Value) -> Result<Vec<Id>, ParseError> {
    let single = |value: &Value| -> Result<Id, ParseError> {
        match value.get(ID_KEY) {
            Some(id) => parse_reference_id(entity_type, key, id),
            None => Err(ParseError::body(
                entity_type,
                Some(key),
                "must reference an existing entity by @iot.id",
            )),
        }
    };
    match value {
        Value::Array(items) => items.iter().map(single).collect(),
        Value::Object(_) => Ok(vec![single(value)?]),
        _ => Err(ParseError::body(
            entity_type,
            Some(key),
            "must be an object or array of objects with @iot.id",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationErrorType;
    use crate::model::Cardinality;
    use serde_json::json;

    #[test]
    fn test_parse_collects_references_and_ignores_unknown_fields() {
        let body = json!({
            "name": "Temperature",
            "description": "Air temperature",
            "unitOfMeasurement": {"name": "Celsius", "symbol": "C"},
            "observationType": "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Measurement",
            "colour": "blue",
            "Thing": {"@iot.id": 5},
            "Sensor": {"@iot.id": "7"},
            "Thing@iot.navigationLink": "ignored"
        });
        let entity = Entity::parse(EntityType::Datastream, body.to_string().as_bytes()).unwrap();
        assert_eq!(entity.entity_type(), EntityType::Datastream);
        assert_eq!(entity.id(), None);
        assert_eq!(entity.related.get("Thing"), Some(&vec![5]));
        assert_eq!(entity.related.get("Sensor"), Some(&vec![7]));
        assert!(entity.data().scalars().get("colour").is_none());
    }

    #[test]
    fn test_parse_malformed_field_names_field() {
        let body = json!({"name": "x", "description": "y", "properties": "not an object"});
        let err = Entity::parse(EntityType::Thing, body.to_string().as_bytes()).unwrap_err();
        match err {
            ParseError::Body { field, .. } => assert_eq!(field.as_deref(), Some("properties")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_nested_entity_without_id() {
        let body = json!({"name": "x", "description": "y", "Locations": [{"name": "new"}]});
        let err = Entity::parse(EntityType::Thing, body.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Locations"));
    }

    #[test]
    fn test_validate_mandatory_reports_every_missing_field() {
        let entity = Entity::parse(EntityType::Datastream, br#"{"name": "only name"}"#).unwrap();
        let errors = entity.validate_mandatory().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "description",
                "unitOfMeasurement",
                "observationType",
                "Thing",
                "Sensor",
                "ObservedProperty"
            ]
        );
        assert!(errors
            .iter()
            .all(|e| e.error_type == ValidationErrorType::MissingMandatory
                && e.entity_type == EntityType::Datastream));
    }

    #[test]
    fn test_validate_rejects_unsupported_encoding() {
        let body = json!({
            "name": "loc",
            "description": "d",
            "encodingType": "application/pdf",
            "location": {"type": "Point", "coordinates": [4.9, 52.3]}
        });
        let entity = Entity::parse(EntityType::Location, body.to_string().as_bytes()).unwrap();
        assert!(entity.validate_mandatory().is_ok());
        let errors = entity.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "encodingType");
    }

    #[test]
    fn test_compute_links_skips_expanded_relations() {
        let entity = Entity::with_id(
            3,
            Thing {
                name: Some("t".into()),
                ..Default::default()
            },
        );
        let edges = [
            NavigationEdge::new(EntityType::Thing, EntityType::Datastream, Cardinality::OneToMany, "Datastreams"),
            NavigationEdge::new(EntityType::Thing, EntityType::Location, Cardinality::ManyToMany, "Locations"),
        ];
        let expanded = BTreeSet::from(["Locations"]);
        let links = entity
            .compute_links("http://host/v1.0/", &edges, &expanded)
            .unwrap();
        assert_eq!(links.self_link, "http://host/v1.0/Things(3)");
        assert_eq!(
            links.navigation.get("Datastreams").map(String::as_str),
            Some("http://host/v1.0/Things(3)/Datastreams")
        );
        assert!(!links.navigation.contains_key("Locations"));

        let again = entity
            .compute_links("http://host/v1.0/", &edges, &expanded)
            .unwrap();
        assert_eq!(links, again);
    }

    #[test]
    fn test_retain_properties_and_merge() {
        let mut entity = Entity::with_id(
            1,
            Thing {
                name: Some("a".into()),
                description: Some("b".into()),
                properties: Some(json!({"k": 1})),
            },
        );
        entity.retain_properties(&BTreeSet::from(["name".to_string()]));
        assert_eq!(entity.property("name"), Some(json!("a")));
        assert_eq!(entity.property("description"), None);
        assert_eq!(entity.property("id"), Some(json!(1)));

        let patch = EntityData::from(Thing {
            description: Some("new".into()),
            ..Default::default()
        });
        entity.merge(&patch).unwrap();
        assert_eq!(entity.property("name"), Some(json!("a")));
        assert_eq!(entity.property("description"), Some(json!("new")));
        assert_eq!(entity.id(), Some(1));
    }
}
