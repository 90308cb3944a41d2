use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use tracing::info;

use crate::api::{AddedReason, HealthResponse, ProductResponse, ScanRequest, ScanResponse};
use crate::cache::DedupCache;
use crate::config::ImageCells;
use crate::lookup::{LookupOutcome, ProductLookup};
use crate::model::{Barcode, ProductRecord, SheetRow};
use crate::sheets::SheetStore;
use crate::unpack_error;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<DedupCache>,
    pub lookup: Arc<dyn ProductLookup>,
    pub sheet: Arc<dyn SheetStore>,
    pub image_cells: ImageCells,
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(HealthResponse { status: "ok" })
}

pub async fn scan(
    State(state): State<AppState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            info!(error = %rejection, "rejected scan body");
            let body = ScanResponse::Error {
                message: rejection.body_text(),
            };
            return (rejection.status(), Json(body)).into_response();
        }
    };

    let response = process_scan(&state, &req.ean).await;
    (response.status_code(), Json(response)).into_response()
}

pub async fn get_product(State(state): State<AppState>, Path(ean): Path<String>) -> Response {
    let response = find_product(&state, &ean).await;
    (response.status_code(), Json(response)).into_response()
}

/// Validate, dedup, look up, append, then record the barcode as known.
///
/// The barcode only enters the cache after its row is stored, so a failed
/// append leaves the scan repeatable.
pub async fn process_scan(state: &AppState, raw: &str) -> ScanResponse {
    let Some(barcode) = Barcode::parse(raw) else {
        info!(ean = raw.trim(), "invalid barcode format");
        return ScanResponse::invalid_format();
    };

    if state.cache.contains(&barcode) {
        info!(ean = %barcode, "barcode already recorded");
        return ScanResponse::AlreadyExists {
            ean: barcode.to_string(),
        };
    }

    let _guard = state.cache.lock(&barcode).await;
    // a concurrent scan of the same barcode may have finished while we waited
    if state.cache.contains(&barcode) {
        info!(ean = %barcode, "barcode recorded by concurrent scan");
        return ScanResponse::AlreadyExists {
            ean: barcode.to_string(),
        };
    }

    let (record, response) = match state.lookup.lookup(&barcode).await {
        LookupOutcome::Found(record) => {
            let response = ScanResponse::Success {
                ean: barcode.to_string(),
                title: record.title.clone(),
                brand: record.brand.clone(),
            };
            (record, response)
        }
        LookupOutcome::NotFound => (
            ProductRecord::barcode_only(&barcode),
            ScanResponse::added(barcode.as_str(), AddedReason::NotFound),
        ),
        LookupOutcome::Unreachable(reason) => {
            info!(ean = %barcode, ?reason, "lookup unavailable, storing barcode only");
            (
                ProductRecord::barcode_only(&barcode),
                ScanResponse::added(barcode.as_str(), AddedReason::ApiUnreachable),
            )
        }
    };

    let row = SheetRow::from_record(&record, state.image_cells);
    if let Err(e) = state.sheet.append_row(&row).await {
        tracing::error!(ean = %barcode, error = %unpack_error(&e), "failed to append row");
        return ScanResponse::PersistenceError {
            ean: barcode.to_string(),
            message: "failed to store product".to_string(),
        };
    }

    state.cache.insert(&barcode);
    info!(ean = %barcode, title = %record.title, "scan recorded");
    response
}

pub async fn find_product(state: &AppState, raw: &str) -> ProductResponse {
    let ean = raw.trim();
    if ean.is_empty() {
        return ProductResponse::not_found(ean);
    }

    match state.sheet.find_row(ean).await {
        Ok(Some(cells)) => ProductResponse::Success {
            product: ProductRecord::from_cells(&cells),
        },
        Ok(None) => {
            info!(ean, "product not found");
            ProductResponse::not_found(ean)
        }
        Err(e) => {
            tracing::error!(ean, error = %unpack_error(&e), "failed to read product");
            ProductResponse::Error {
                message: "failed to read product".to_string(),
            }
        }
    }
}
