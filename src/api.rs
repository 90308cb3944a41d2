use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::model::ProductRecord;

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub ean: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddedReason {
    ApiUnreachable,
    NotFound,
}

impl AddedReason {
    pub fn info(&self) -> &'static str {
        match self {
            AddedReason::ApiUnreachable => "barcode_only (API unreachable)",
            AddedReason::NotFound => "barcode_only (not found in UPCitemdb)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanResponse {
    Error {
        message: String,
    },
    AlreadyExists {
        ean: String,
    },
    Added {
        ean: String,
        reason: AddedReason,
        info: String,
    },
    Success {
        ean: String,
        title: String,
        brand: String,
    },
    PersistenceError {
        ean: String,
        message: String,
    },
}

impl ScanResponse {
    pub fn invalid_format() -> Self {
        ScanResponse::Error {
            message: "Invalid barcode format".to_string(),
        }
    }

    pub fn added(ean: &str, reason: AddedReason) -> Self {
        ScanResponse::Added {
            ean: ean.to_string(),
            reason,
            info: reason.info().to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ScanResponse::PersistenceError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProductResponse {
    NotFound { message: String },
    Success { product: ProductRecord },
    Error { message: String },
}

impl ProductResponse {
    pub fn not_found(ean: &str) -> Self {
        ProductResponse::NotFound {
            message: format!("EAN {} not found", ean),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProductResponse::Error { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scan_response_shapes() {
        assert_eq!(
            serde_json::to_value(ScanResponse::invalid_format()).unwrap(),
            json!({"status": "error", "message": "Invalid barcode format"})
        );
        assert_eq!(
            serde_json::to_value(ScanResponse::added("5701234567890", AddedReason::NotFound)).unwrap(),
            json!({
                "status": "added",
                "ean": "5701234567890",
                "reason": "not_found",
                "info": "barcode_only (not found in UPCitemdb)"
            })
        );
        assert_eq!(
            serde_json::to_value(ScanResponse::PersistenceError {
                ean: "5701234567890".into(),
                message: "x".into()
            })
            .unwrap()["status"],
            "persistence_error"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ScanResponse::invalid_format().status_code(), StatusCode::OK);
        assert_eq!(
            ScanResponse::AlreadyExists { ean: "1".into() }.status_code(),
            StatusCode::OK
        );
        assert_eq!(ProductResponse::not_found("1").status_code(), StatusCode::OK);
    }
}
