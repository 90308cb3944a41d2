use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::Lookup as LookupConfig;
use crate::error::LookupError;
use crate::model::{Barcode, MAX_IMAGES, NOT_AVAILABLE, ProductRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreachableReason {
    Transport,
    Timeout,
    Status(u16),
    Decode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(ProductRecord),
    NotFound,
    Unreachable(UnreachableReason),
}

/// One attempt at resolving a barcode to product metadata. Implementations
/// must not retry and must not fail past this boundary.
#[async_trait]
pub trait ProductLookup: Send + Sync {
    async fn lookup(&self, barcode: &Barcode) -> LookupOutcome;
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    items: Vec<LookupItem>,
}

#[derive(Debug, Default, Deserialize)]
struct LookupItem {
    title: Option<String>,
    brand: Option<String>,
    manufacturer: Option<String>,
    description: Option<String>,
    #[serde(default)]
    images: Vec<String>,
}

impl LookupItem {
    fn into_record(self, barcode: &Barcode) -> ProductRecord {
        fn or_sentinel(value: Option<String>) -> String {
            match value {
                Some(v) if !v.trim().is_empty() => v,
                _ => NOT_AVAILABLE.to_string(),
            }
        }

        ProductRecord {
            ean: barcode.to_string(),
            title: or_sentinel(self.title),
            brand: or_sentinel(self.brand),
            manufacturer: or_sentinel(self.manufacturer),
            description: or_sentinel(self.description),
            images: self.images.into_iter().take(MAX_IMAGES).collect(),
        }
    }
}

fn outcome_from_body(barcode: &Barcode, body: &str) -> Result<LookupOutcome, LookupError> {
    let response: LookupResponse = serde_json::from_str(body).map_err(LookupError::Decode)?;
    Ok(match response.items.into_iter().next() {
        Some(item) => LookupOutcome::Found(item.into_record(barcode)),
        None => LookupOutcome::NotFound,
    })
}

/// Client for the UPCitemdb lookup API.
pub struct UpcItemDb {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl UpcItemDb {
    pub fn new(cfg: &LookupConfig) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }

    async fn fetch(&self, barcode: &Barcode) -> Result<LookupOutcome, LookupError> {
        let mut request = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .query(&[("upc", barcode.as_str())]);

        if let Some(key) = &self.api_key {
            request = request.header("user_key", key).header("key_type", "3scale");
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        outcome_from_body(barcode, &body)
    }
}

#[async_trait]
impl ProductLookup for UpcItemDb {
    async fn lookup(&self, barcode: &Barcode) -> LookupOutcome {
        match self.fetch(barcode).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    ean = %barcode,
                    error = %crate::unpack_error(&e),
                    "product lookup failed"
                );
                let reason = match e {
                    LookupError::Transport(ref err) if err.is_timeout() => UnreachableReason::Timeout,
                    LookupError::Transport(_) => UnreachableReason::Transport,
                    LookupError::Status(code) => UnreachableReason::Status(code),
                    LookupError::Decode(_) => UnreachableReason::Decode,
                };
                LookupOutcome::Unreachable(reason)
            }
        }
    }
}
