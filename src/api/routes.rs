use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;

use crate::api::handlers::{self, AppState};
use crate::store::EntityStore;

pub fn create_router<S: EntityStore + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/v1.0", get(handlers::resource_root::<S>))
        .route(
            "/v1.0/*path",
            get(handlers::get_resource::<S>)
                .post(handlers::create_entity::<S>)
                .patch(handlers::patch_entity::<S>)
                .put(handlers::replace_entity::<S>)
                .delete(handlers::delete_entity::<S>),
        )
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::ApiState;
    use crate::logic::service::{SensorThingsService, ServiceSettings};
    use crate::model::NavigationGraph;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let graph = Arc::new(NavigationGraph::sensorthings().unwrap());
        let store = Arc::new(MemoryStore::new(graph.clone()));
        let state = Arc::new(ApiState {
            service: SensorThingsService::new(store, graph, ServiceSettings::default()),
            indent_json: false,
            query_timeout: None,
        });
        create_router::<MemoryStore>().with_state(state)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let response = app()
            .oneshot(Request::get("/v1.0/Things").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["value"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let request = Request::post("/v1.0/Things")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], serde_json::json!(400));
    }
}
