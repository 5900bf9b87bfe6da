//! Dashboard router.
//!
//! Everything is read-only. CORS allows any origin to `GET` so a dashboard
//! served from elsewhere can poll the snapshot.

use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api::{endpoints, websocket, ApiContext};
use crate::core_state::CoreState;

pub fn dashboard_router(core: Arc<CoreState>) -> Router {
    let ctx = ApiContext::new(core);

    // Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/states", get(endpoints::states::snapshot))
        .route("/states/:state_key", get(endpoints::states::members))
        .with_state(ctx.clone());

    let ws_routes = Router::new()
        .route("/ws/states", get(websocket::ws_upgrade))
        .with_state(ctx);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_origin(Any);

    Router::new()
        .nest("/api", api)
        .merge(ws_routes)
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::core_state::tests::test_core;
    use crate::forms::FormId;

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn response_json(response: axum::http::Response<Body>) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_response_shape() {
        let (core, _) = test_core();
        let response = dashboard_router(core).oneshot(get_request("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["database"], true);
        assert_eq!(json["active_forms"], 0);
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn snapshot_lists_every_key_and_counter() {
        let (core, _) = test_core();
        let key = core.registry.all_state_keys()[1].clone();
        core.states.enter(7, &key).unwrap();

        let response = dashboard_router(core.clone())
            .oneshot(get_request("/api/states"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json[format!("state:{key}")], serde_json::json!([7]));
        assert_eq!(json["user_state:7"], key.as_str());
        assert_eq!(json["incr_value"], 1);
        let first = &core.registry.all_state_keys()[0];
        assert_eq!(json[format!("state:{first}")], serde_json::json!([]));
    }

    #[tokio::test]
    async fn members_of_known_state() {
        let (core, _) = test_core();
        let key = FormId::Pressure.state_key(0).unwrap();
        core.states.enter(3, &key).unwrap();
        core.states.enter(1, &key).unwrap();

        let response = dashboard_router(core)
            .oneshot(get_request(&format!("/api/states/{key}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await, serde_json::json!([1, 3]));
    }

    #[tokio::test]
    async fn empty_known_state_is_not_404() {
        let (core, _) = test_core();
        let key = FormId::AddDrug.state_key(0).unwrap();

        let response = dashboard_router(core)
            .oneshot(get_request(&format!("/api/states/{key}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn unknown_state_is_404() {
        let (core, _) = test_core();
        let response = dashboard_router(core)
            .oneshot(get_request("/api/states/NoSuchForm:0:x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = response_json(response).await;
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (core, _) = test_core();
        let response = dashboard_router(core)
            .oneshot(get_request("/api/records"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_header_present() {
        let (core, _) = test_core();
        let request = Request::builder()
            .method("GET")
            .uri("/api/health")
            .header("Origin", "http://dashboard.local")
            .body(Body::empty())
            .unwrap();
        let response = dashboard_router(core).oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }
}
