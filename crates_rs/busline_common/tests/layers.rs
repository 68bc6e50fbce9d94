use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use busline_common::gateway_auth::GatewayAuthLayer;
use busline_common::identity::Requester;
use busline_common::request_id::RequestIdLayer;
use tower::ServiceExt;

async fn whoami(requester: Requester) -> String {
    requester.user_id
}

fn identity_app(layer: GatewayAuthLayer) -> Router {
    Router::new().route("/me", get(whoami)).layer(layer)
}

#[tokio::test]
async fn gateway_not_required_still_marks_request_verified() {
    let app = identity_app(GatewayAuthLayer::new(false, None));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/me")
                .header("x-auth-user-id", "user-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"user-7");
}

#[tokio::test]
async fn requester_without_gateway_layer_is_rejected() {
    let app = Router::new().route("/me", get(whoami));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/me")
                .header("x-auth-user-id", "user-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_identity_is_401() {
    let app = identity_app(GatewayAuthLayer::new(false, None));

    let resp = app
        .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn gateway_required_without_secret_is_503() {
    let app = identity_app(GatewayAuthLayer::new(true, None));

    let resp = app
        .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn gateway_required_checks_secret_and_caller() {
    let app = identity_app(
        GatewayAuthLayer::new(true, Some("gw-secret".to_string()))
            .with_allowed_callers(vec![" Gateway ".to_string(), "gateway".to_string()]),
    );

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/me")
                .header("x-gateway-secret", "wrong")
                .header("x-gateway-caller", "gateway")
                .header("x-auth-user-id", "user-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/me")
                .header("x-gateway-secret", "gw-secret")
                .header("x-gateway-caller", "mobile")
                .header("x-auth-user-id", "user-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/me")
                .header("x-gateway-secret", "gw-secret")
                .header("x-gateway-caller", "GATEWAY")
                .header("x-auth-user-id", "user-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn request_id_generated_when_missing() {
    let app = Router::new()
        .route("/x", get(|| async { "ok" }))
        .layer(RequestIdLayer::x_request_id());

    let resp = app
        .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let rid = resp
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert_eq!(rid.len(), 32);
}

#[tokio::test]
async fn request_id_replaces_unprintable_inbound_value() {
    let app = Router::new()
        .route("/x", get(|| async { "ok" }))
        .layer(RequestIdLayer::x_request_id());

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/x")
                .header("x-request-id", "trace-abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("trace-abc")
    );

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/x")
                .header("x-request-id", "has space")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let rid = resp
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert_ne!(rid, "has space");
    assert_eq!(rid.len(), 32);
}
