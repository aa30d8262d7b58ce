//! Wire rendering of assembled outcomes. Nothing here branches on the
//! concrete entity type.

use serde_json::{json, Map, Value};

use crate::model::{
    CollectionPage, EntityNode, Expanded, Outcome, ID_KEY, NAVIGATION_LINK_SUFFIX, SELF_LINK_KEY,
};

pub const COUNT_KEY: &str = "@iot.count";
pub const NEXT_LINK_KEY: &str = "@iot.nextLink";

/// Serialized response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// `$value` of a property
    Text(String),
    /// Addressed entity does not exist
    NotFound,
}

pub fn serialize_node(node: &EntityNode) -> Value {
    let mut object = Map::new();
    if let Some(id) = node.entity.id() {
        object.insert(ID_KEY.to_string(), Value::from(id));
    }
    object.insert(SELF_LINK_KEY.to_string(), Value::String(node.links.self_link.clone()));
    object.extend(node.entity.data().scalars());

    for (segment, link) in &node.links.navigation {
        object.insert(
            format!("{}{}", segment, NAVIGATION_LINK_SUFFIX),
            Value::String(link.clone()),
        );
    }

    for (segment, expanded) in &node.expanded {
        match expanded {
            Expanded::Entity(entity) => {
                let value = entity.as_deref().map(serialize_node).unwrap_or(Value::Null);
                object.insert(segment.to_string(), value);
            }
            Expanded::Collection(page) => {
                if let Some(count) = page.count {
                    object.insert(format!("{}{}", segment, COUNT_KEY), Value::from(count));
                }
                object.insert(
                    segment.to_string(),
                    Value::Array(page.items.iter().map(serialize_node).collect()),
                );
                if let Some(next) = &page.next_link {
                    object.insert(format!("{}{}", segment, NEXT_LINK_KEY), Value::String(next.clone()));
                }
            }
        }
    }
    Value::Object(object)
}

fn envelope(count: Option<u64>, next_link: Option<&String>, value: Vec<Value>) -> Value {
    let mut object = Map::new();
    if let Some(count) = count {
        object.insert(COUNT_KEY.to_string(), Value::from(count));
    }
    if let Some(next) = next_link {
        object.insert(NEXT_LINK_KEY.to_string(), Value::String(next.clone()));
    }
    object.insert("value".to_string(), Value::Array(value));
    Value::Object(object)
}

pub fn serialize_collection(page: &CollectionPage) -> Value {
    envelope(
        page.count,
        page.next_link.as_ref(),
        page.items.iter().map(serialize_node).collect(),
    )
}

pub fn serialize(outcome: &Outcome) -> Payload {
    match outcome {
        Outcome::Entity(node) => Payload::Json(serialize_node(node)),
        Outcome::Collection(page) => Payload::Json(serialize_collection(page)),
        Outcome::Property { value, raw: true, .. } => Payload::Text(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        Outcome::Property { name, value, raw: false } => Payload::Json(json!({ name: value })),
        Outcome::References {
            links,
            single,
            next_link,
            count,
        } => {
            let refs: Vec<Value> = links.iter().map(|l| json!({ SELF_LINK_KEY: l })).collect();
            if *single {
                Payload::Json(refs.into_iter().next().unwrap_or(Value::Null))
            } else {
                Payload::Json(envelope(*count, next_link.as_ref(), refs))
            }
        }
        Outcome::NotFound => Payload::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{property_defs, Entity, EntityLinks, EntityType, Thing};
    use std::collections::BTreeMap;

    fn thing_node(id: i64, name: &str) -> EntityNode {
        let self_link = format!("http://h/v1.0/Things({})", id);
        EntityNode {
            entity: Entity::with_id(
                id,
                Thing {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
            ),
            links: EntityLinks {
                navigation: BTreeMap::from([("Locations", format!("{}/Locations", self_link))]),
                self_link,
            },
            expanded: BTreeMap::new(),
        }
    }

    #[test]
    fn test_entity_shape() {
        let value = serialize_node(&thing_node(1, "a"));
        assert_eq!(
            value,
            json!({
                "@iot.id": 1,
                "@iot.selfLink": "http://h/v1.0/Things(1)",
                "name": "a",
                "Locations@iot.navigationLink": "http://h/v1.0/Things(1)/Locations"
            })
        );
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys[0], "@iot.id");
        assert_eq!(keys[1], "@iot.selfLink");
    }

    #[test]
    fn test_expanded_collection_and_envelope() {
        let mut node = thing_node(1, "a");
        node.expanded.insert(
            "Datastreams",
            Expanded::Collection(CollectionPage {
                items: vec![],
                next_link: Some("http://h/next".to_string()),
                count: Some(4),
            }),
        );
        node.expanded.insert("Sensor", Expanded::Entity(None));
        let value = serialize_node(&node);
        assert_eq!(value["Datastreams"], json!([]));
        assert_eq!(value["Datastreams@iot.count"], json!(4));
        assert_eq!(value["Datastreams@iot.nextLink"], json!("http://h/next"));
        assert_eq!(value["Sensor"], Value::Null);

        let page = CollectionPage {
            items: vec![thing_node(2, "b")],
            next_link: None,
            count: Some(1),
        };
        let value = serialize_collection(&page);
        assert_eq!(value["@iot.count"], json!(1));
        assert!(value.get("@iot.nextLink").is_none());
        assert_eq!(value["value"][0]["name"], json!("b"));
    }

    #[test]
    fn test_property_and_references() {
        let raw = serialize(&Outcome::Property {
            name: "result".into(),
            value: json!(21.5),
            raw: true,
        });
        assert_eq!(raw, Payload::Text("21.5".into()));

        let wrapped = serialize(&Outcome::Property {
            name: "name".into(),
            value: json!("a"),
            raw: false,
        });
        assert_eq!(wrapped, Payload::Json(json!({"name": "a"})));

        let refs = serialize(&Outcome::References {
            links: vec!["http://h/v1.0/Things(1)".into()],
            single: false,
            next_link: None,
            count: None,
        });
        assert_eq!(
            refs,
            Payload::Json(json!({"value": [{"@iot.selfLink": "http://h/v1.0/Things(1)"}]}))
        );
    }

    fn populated(entity_type: EntityType) -> Value {
        let point = json!({"type": "Point", "coordinates": [11.97, 57.70]});
        match entity_type {
            EntityType::Thing => json!({
                "name": "station",
                "description": "rooftop",
                "properties": {"owner": "lab", "floors": 4}
            }),
            EntityType::Location => json!({
                "name": "roof",
                "description": "north corner",
                "encodingType": "application/vnd.geo+json",
                "location": point
            }),
            EntityType::HistoricalLocation => json!({"time": "2024-05-01T10:00:00Z"}),
            EntityType::Datastream => json!({
                "name": "air temperature",
                "description": "hourly mean",
                "unitOfMeasurement": {"name": "degree Celsius", "symbol": "degC"},
                "observationType": "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Measurement",
                "observedArea": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]},
                "phenomenonTime": "2024-05-01T00:00:00Z/2024-05-02T00:00:00Z",
                "resultTime": "2024-05-02T00:00:00Z"
            }),
            EntityType::Sensor => json!({
                "name": "thermometer",
                "description": "PT100",
                "encodingType": "application/pdf",
                "metadata": "http://h/datasheet.pdf"
            }),
            EntityType::ObservedProperty => json!({
                "name": "temperature",
                "definition": "http://h/temperature",
                "description": "air temperature"
            }),
            EntityType::Observation => json!({
                "phenomenonTime": "2024-05-01T10:00:00Z",
                "result": 3.5,
                "resultTime": "2024-05-01T10:00:05Z",
                "resultQuality": ["checked"],
                "validTime": "2024-05-01T10:00:00Z/2024-05-01T11:00:00Z",
                "parameters": {"k": "v"}
            }),
            EntityType::FeatureOfInterest => json!({
                "name": "roof air",
                "description": "air above the roof",
                "encodingType": "application/vnd.geo+json",
                "feature": point
            }),
        }
    }

    #[test]
    fn test_parse_of_serialized_entity_round_trips_scalars() {
        for entity_type in EntityType::ALL {
            let sample = populated(entity_type);
            let entity = Entity::from_stored(entity_type, 9, sample.clone()).unwrap();
            let defs = property_defs(entity_type);
            assert_eq!(
                entity.data().scalars().len(),
                defs.len(),
                "{} sample leaves a property unset",
                entity_type.name()
            );

            let node = EntityNode {
                links: EntityLinks {
                    self_link: format!("http://h/v1.0/{}(9)", entity_type.entity_set()),
                    navigation: BTreeMap::new(),
                },
                entity: entity.clone(),
                expanded: BTreeMap::new(),
            };
            let bytes = serde_json::to_vec(&serialize_node(&node)).unwrap();
            let parsed = Entity::parse(entity_type, &bytes).unwrap();
            assert_eq!(parsed, entity, "{} did not round trip", entity_type.name());
            assert_eq!(Value::Object(parsed.data().scalars()), sample);
        }
    }
}
