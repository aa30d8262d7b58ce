use reqwest::{Client, StatusCode};
use sensorthings_db_rust::config::{AppConfig, StoreBackend};
use sensorthings_db_rust::model::NavigationGraph;
use sensorthings_db_rust::store::MemoryStore;
use sensorthings_db_rust::{build_app, SensorThingsService};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

// Test client wrapper for making API calls
struct TestClient {
    client: Client,
    base_url: String,
}

impl TestClient {
    /// Starts a server over a fresh in-memory store on an ephemeral port.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let mut config = AppConfig::default();
        config.server.port = address.port();
        config.store.backend = StoreBackend::Memory;

        let graph = Arc::new(NavigationGraph::sensorthings().unwrap());
        let store = Arc::new(MemoryStore::new(graph.clone()));
        let service = SensorThingsService::new(store, graph, config.service_settings());
        let app = build_app(service, &config);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            client: Client::new(),
            base_url: format!("http://{}", address),
        }
    }

    fn root(&self) -> String {
        format!("{}/v1.0", self.base_url)
    }

    async fn post(&self, path: &str, json: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.root(), path))
            .json(&json)
            .send()
            .await
            .unwrap()
    }

    async fn put(&self, path: &str, json: Value) -> reqwest::Response {
        self.client
            .put(format!("{}{}", self.root(), path))
            .json(&json)
            .send()
            .await
            .unwrap()
    }

    async fn patch(&self, path: &str, json: Value) -> reqwest::Response {
        self.client
            .patch(format!("{}{}", self.root(), path))
            .json(&json)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.root(), path))
            .send()
            .await
            .unwrap()
    }

    async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let response = self.get(path).await;
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(format!("{}{}", self.root(), path))
            .send()
            .await
            .unwrap()
    }

    /// Thing 1 carrying datastreams 4 and 5 through sensor 2 and property 3.
    async fn seed_station(&self) {
        let status = self
            .post("/Things", json!({"name": "station", "description": "roof"}))
            .await
            .status();
        assert_eq!(status, StatusCode::CREATED);
        self.post(
            "/Sensors",
            json!({"name": "dht22", "description": "d", "encodingType": "application/pdf", "metadata": "m"}),
        )
        .await;
        self.post(
            "/ObservedProperties",
            json!({"name": "temperature", "definition": "d", "description": "d"}),
        )
        .await;
        for name in ["indoor", "outdoor"] {
            let response = self
                .post(
                    "/Things(1)/Datastreams",
                    json!({
                        "name": name,
                        "description": "d",
                        "unitOfMeasurement": {"name": "degree Celsius", "symbol": "C"},
                        "observationType": "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Measurement",
                        "Sensor": {"@iot.id": 2},
                        "ObservedProperty": {"@iot.id": 3}
                    }),
                )
                .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }
    }
}

#[tokio::test]
async fn test_health_and_resource_root() {
    let client = TestClient::start().await;

    let health: Value = client
        .client
        .get(format!("{}/health", client.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], json!("healthy"));

    let (status, root) = client.get_json("").await;
    assert_eq!(status, StatusCode::OK);
    let sets = root["value"].as_array().unwrap();
    assert_eq!(sets.len(), 8);
    assert!(sets
        .iter()
        .any(|s| s["url"] == json!(format!("{}/Things", client.root()))));
}

#[tokio::test]
async fn test_navigated_collection_pages_with_next_link() {
    let client = TestClient::start().await;
    client.seed_station().await;

    let (status, body) = client.get_json("/Things(1)/Datastreams?$select=name&$top=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"].as_array().unwrap().len(), 1);
    assert_eq!(body["value"][0]["name"], json!("indoor"));
    assert!(body["value"][0].get("description").is_none());
    let next = body["@iot.nextLink"].as_str().unwrap().to_string();
    assert_eq!(
        next,
        format!("{}/Things(1)/Datastreams?$select=name&$top=1&$skip=1", client.root())
    );

    // following the link yields the last page
    let page: Value = client.client.get(&next).send().await.unwrap().json().await.unwrap();
    assert_eq!(page["value"][0]["name"], json!("outdoor"));
    assert_eq!(page["value"].as_array().unwrap().len(), 1);
    assert!(page.get("@iot.nextLink").is_none());
}

#[tokio::test]
async fn test_query_errors_use_the_error_envelope() {
    let client = TestClient::start().await;
    client.seed_station().await;

    let (status, body) = client
        .get_json("/Things?$filter=colour%20eq%20%27red%27&$orderby=shade")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!(400));
    assert!(body["error"]["message"].as_str().unwrap().contains("colour"));
    let errors = body["error"]["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors[1].as_str().unwrap().contains("shade"));

    let (status, body) = client.get_json("/Things(99)").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!(404));

    let (status, _) = client.get_json("/Things(99)/Datastreams").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = client.get_json("/Gadgets").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expand_counts_related_entities() {
    let client = TestClient::start().await;
    client.seed_station().await;

    let (status, body) = client
        .get_json("/Things?$expand=Datastreams($select=name;$count=true)")
        .await;
    assert_eq!(status, StatusCode::OK);
    let thing = &body["value"][0];
    assert_eq!(thing["Datastreams@iot.count"], json!(2));
    assert_eq!(thing["Datastreams"][1]["name"], json!("outdoor"));

    let (status, body) = client
        .get_json("/Things?$filter=name%20eq%20%27nobody%27&$expand=Datastreams")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], json!([]));
}

#[tokio::test]
async fn test_property_value_and_references() {
    let client = TestClient::start().await;
    client.seed_station().await;

    let response = client.get("/Datastreams(4)/name/$value").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "indoor");

    let (_, thing) = client.get_json("/Datastreams(5)/Thing").await;
    assert_eq!(thing["@iot.id"], json!(1));

    let (_, refs) = client.get_json("/Things(1)/Datastreams/$ref").await;
    assert_eq!(
        refs["value"][0],
        json!({"@iot.selfLink": format!("{}/Datastreams(4)", client.root())})
    );
}

#[tokio::test]
async fn test_create_reports_every_violation_and_sets_location() {
    let client = TestClient::start().await;

    let response = client.post("/Things", json!({"properties": {}})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["errors"].as_array().unwrap().len(), 2);

    let response = client
        .post("/Things", json!({"name": "station", "description": "roof"}))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response.headers()["location"].to_str().unwrap().to_string();
    assert_eq!(location, format!("{}/Things(1)", client.root()));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["@iot.id"], json!(1));
    assert_eq!(body["@iot.selfLink"], json!(location));

    let response = client
        .post("/Things", json!({"name": "n", "description": "d", "Locations": [{"@iot.id": 77}]}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_and_delete_cascade() {
    let client = TestClient::start().await;
    client.seed_station().await;

    let response = client.patch("/Things(1)", json!({"description": "attic"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], json!("station"));
    assert_eq!(body["description"], json!("attic"));

    let response = client.put("/Things(1)", json!({"name": "renamed"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .put("/Things(1)", json!({"name": "renamed", "description": "cellar"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let location = response.headers()["location"].to_str().unwrap().to_string();
    assert_eq!(location, format!("{}/Things(1)", client.root()));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["@iot.selfLink"], json!(location));

    let response = client.patch("/Things", json!({"name": "all"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(client.delete("/Things(1)").await.status(), StatusCode::OK);
    assert_eq!(client.get("/Things(1)").await.status(), StatusCode::NOT_FOUND);
    // datastreams cannot outlive their thing
    assert_eq!(client.get("/Datastreams(4)").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(client.delete("/Things(1)").await.status(), StatusCode::NOT_FOUND);

    let (_, sensors) = client.get_json("/Sensors").await;
    assert_eq!(sensors["value"].as_array().unwrap().len(), 1);
}
