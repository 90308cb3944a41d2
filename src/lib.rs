use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use std::error::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handler::{AppState, get_product, healthcheck, scan};

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod lookup;
pub mod model;
pub mod sheets;

pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(healthcheck))
        .route("/scan", post(scan))
        .route("/product/:ean", get(get_product))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DedupCache;
    use crate::config::ImageCells;
    use crate::lookup::{LookupOutcome, ProductLookup, UnreachableReason};
    use crate::model::Barcode;
    use crate::sheets::memory::MemorySheet;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Offline;

    #[async_trait]
    impl ProductLookup for Offline {
        async fn lookup(&self, _barcode: &Barcode) -> LookupOutcome {
            LookupOutcome::Unreachable(UnreachableReason::Transport)
        }
    }

    fn app(sheet: Arc<MemorySheet>) -> Router {
        routes(AppState {
            cache: Arc::new(DedupCache::new()),
            lookup: Arc::new(Offline),
            sheet,
            image_cells: ImageCells::Url,
        })
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_scan(body: &str) -> Request<Body> {
        Request::post("/scan")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let (status, body) = send(
            app(Arc::new(MemorySheet::default())),
            Request::get("/").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_scan_and_fetch_over_http() {
        let sheet = Arc::new(MemorySheet::default());
        let app = app(sheet.clone());

        let (status, body) = send(app.clone(), post_scan(r#"{"ean": "5701234567890"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "added");
        assert_eq!(body["reason"], "api_unreachable");

        let (_, body) = send(app.clone(), post_scan(r#"{"ean": "5701234567890"}"#)).await;
        assert_eq!(body, json!({"status": "already_exists", "ean": "5701234567890"}));

        let (status, body) = send(
            app.clone(),
            Request::get("/product/5701234567890").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "status": "success",
                "product": {
                    "ean": "5701234567890",
                    "title": "N/A",
                    "brand": "N/A",
                    "manufacturer": "N/A",
                    "description": "N/A",
                    "images": []
                }
            })
        );

        let (_, body) = send(
            app,
            Request::get("/product/4001234567891").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(body["status"], "not_found");
        assert_eq!(sheet.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_scan_reports_error() {
        let sheet = Arc::new(MemorySheet::default());

        let (status, body) = send(app(sheet.clone()), post_scan(r#"{"ean": "12345"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "error", "message": "Invalid barcode format"}));

        let (status, body) = send(app(sheet.clone()), post_scan(r#"{"barcode": 1}"#)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], "error");

        assert!(sheet.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_error_status() {
        let sheet = Arc::new(MemorySheet::default());
        sheet
            .fail_appends
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let (status, body) = send(app(sheet), post_scan(r#"{"ean": "5701234567890"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "persistence_error");
    }
}
