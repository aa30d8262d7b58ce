use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::logic::service::SensorThingsService;
use crate::model::{Id, ID_KEY};
use crate::store::EntityStore;

/// Posts `body` to `path` and returns the id of the created entity.
async fn create<S: EntityStore + ?Sized>(service: &SensorThingsService<S>, path: &str, body: Value) -> Result<Id> {
    let created = service
        .create(path, body.to_string().as_bytes())
        .await
        .with_context(|| format!("Failed to seed {}", path))?;
    created.body[ID_KEY]
        .as_i64()
        .with_context(|| format!("Seeded {} has no id", path))
}

/// Loads a small rooftop weather station: one Thing with a Location, two
/// Datastreams and a handful of Observations.
pub async fn load_seed_data<S: EntityStore + ?Sized>(service: &SensorThingsService<S>) -> Result<()> {
    let location = create(
        service,
        "Locations",
        json!({
            "name": "Rooftop",
            "description": "Roof of building 4",
            "encodingType": "application/vnd.geo+json",
            "location": {"type": "Point", "coordinates": [11.97, 57.70]}
        }),
    )
    .await?;

    let thing = create(
        service,
        "Things",
        json!({
            "name": "Weather station",
            "description": "Rooftop weather station",
            "properties": {"owner": "facilities"},
            "Locations": [{ "@iot.id": location }]
        }),
    )
    .await?;

    let sensor = create(
        service,
        "Sensors",
        json!({
            "name": "DHT22",
            "description": "Temperature and humidity sensor",
            "encodingType": "application/pdf",
            "metadata": "https://example.org/dht22.pdf"
        }),
    )
    .await?;

    let feature = create(
        service,
        "FeaturesOfInterest",
        json!({
            "name": "Roof air",
            "description": "Air above the roof",
            "encodingType": "application/vnd.geo+json",
            "feature": {"type": "Point", "coordinates": [11.97, 57.70]}
        }),
    )
    .await?;

    let series = [
        ("Air temperature", "degree Celsius", "°C", [12.5, 13.1, 13.8]),
        ("Relative humidity", "percent", "%", [81.0, 78.5, 74.0]),
    ];
    for (name, unit, symbol, values) in series {
        let observed_property = create(
            service,
            "ObservedProperties",
            json!({
                "name": name,
                "definition": format!("https://example.org/def/{}", name.to_lowercase().replace(' ', "-")),
                "description": name
            }),
        )
        .await?;

        let datastream = create(
            service,
            &format!("Things({})/Datastreams", thing),
            json!({
                "name": name,
                "description": format!("{} on the roof", name),
                "unitOfMeasurement": {"name": unit, "symbol": symbol},
                "observationType": "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Measurement",
                "Sensor": { "@iot.id": sensor },
                "ObservedProperty": { "@iot.id": observed_property }
            }),
        )
        .await?;

        for (hour, value) in values.iter().enumerate() {
            create(
                service,
                &format!("Datastreams({})/Observations", datastream),
                json!({
                    "result": value,
                    "phenomenonTime": format!("2024-05-01T{:02}:00:00Z", 8 + hour),
                    "FeatureOfInterest": { "@iot.id": feature }
                }),
            )
            .await?;
        }
    }

    log::info!("seed data loaded: Thing({})", thing);
    Ok(())
}
