use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use tokio::sync::Mutex;

use crate::config::Sheets as SheetsConfig;
use crate::error::SheetError;
use crate::model::{ROW_WIDTH, SheetRow};

const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// The append-only backing store. Column 1 holds the barcode.
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Every value of column 1, top to bottom, header rows included.
    async fn column_values(&self) -> Result<Vec<String>, SheetError>;

    /// Appends `row` after the last row of the sheet.
    async fn append_row(&self, row: &SheetRow) -> Result<(), SheetError>;

    /// Cells of the first data row whose column 1 equals `barcode`. Header
    /// rows never match.
    async fn find_row(&self, barcode: &str) -> Result<Option<Vec<String>>, SheetError>;
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    TOKEN_LIFETIME_SECS
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct AppendBody<'a> {
    values: [&'a [String]; 1],
}

/// Google Sheets v4 client authenticated as a service account.
pub struct GoogleSheets {
    client: reqwest::Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    api_base: String,
    spreadsheet_id: String,
    worksheet: String,
    header_rows: usize,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheets {
    pub fn new(cfg: &SheetsConfig) -> Result<Self, SheetError> {
        let raw = fs::read_to_string(&cfg.credentials_path)
            .map_err(|e| SheetError::Credentials(Box::new(e)))?;
        let key: ServiceAccountKey =
            serde_json::from_str(&raw).map_err(|e| SheetError::Credentials(Box::new(e)))?;
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
            key,
            signing_key,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            spreadsheet_id: cfg.spreadsheet_id.clone(),
            worksheet: cfg.worksheet.clone(),
            header_rows: cfg.header_rows,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, SheetError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let now = Utc::now();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + TOKEN_LIFETIME_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetError::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = token.expires_in, "obtained sheets access token");

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in - TOKEN_REFRESH_MARGIN_SECS),
        });
        Ok(value)
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.api_base,
            urlencoding::encode(&self.spreadsheet_id),
            urlencoding::encode(&a1_range(&self.worksheet, range)),
        )
    }

    async fn get_values(&self, range: &str, query: &[(&str, &str)]) -> Result<ValueRange, SheetError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.values_url(range))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let response = check_status(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SheetError::UnexpectedResponse(e.to_string()))
    }
}

#[async_trait]
impl SheetStore for GoogleSheets {
    async fn column_values(&self) -> Result<Vec<String>, SheetError> {
        let range = self
            .get_values("A:A", &[("majorDimension", "COLUMNS")])
            .await?;

        Ok(range
            .values
            .into_iter()
            .next()
            .unwrap_or_default()
            .iter()
            .map(cell_text)
            .collect())
    }

    async fn append_row(&self, row: &SheetRow) -> Result<(), SheetError> {
        let token = self.access_token().await?;
        let cells = encode_row(row);
        let url = format!("{}:append", self.values_url(&format!("A:{}", last_column())));

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&AppendBody { values: [cells.as_slice()] })
            .send()
            .await?;

        check_status(response).await?;
        tracing::debug!(ean = row.barcode(), "row appended");
        Ok(())
    }

    async fn find_row(&self, barcode: &str) -> Result<Option<Vec<String>>, SheetError> {
        let column = self.column_values().await?;
        let Some(index) = data_row_index(&column, self.header_rows, barcode) else {
            return Ok(None);
        };

        let row_number = index + 1;
        let range = format!("A{row_number}:{}{row_number}", last_column());
        let values = self
            .get_values(&range, &[("valueRenderOption", "FORMULA")])
            .await?;

        let cells = values
            .values
            .into_iter()
            .next()
            .unwrap_or_default()
            .iter()
            .map(cell_text)
            .collect();
        Ok(Some(cells))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SheetError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SheetError::Api {
        status: status.as_u16(),
        body,
    })
}

/// Zero-based position of `barcode` in column 1, ignoring header rows.
fn data_row_index(column: &[String], header_rows: usize, barcode: &str) -> Option<usize> {
    column
        .iter()
        .enumerate()
        .skip(header_rows)
        .find(|(_, v)| v.trim() == barcode)
        .map(|(i, _)| i)
}

fn last_column() -> char {
    (b'A' + (ROW_WIDTH as u8) - 1) as char
}

fn a1_range(worksheet: &str, range: &str) -> String {
    format!("'{}'!{}", worksheet.replace('\'', "''"), range)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Cells as sent with `USER_ENTERED`. The barcode always gets a leading
/// apostrophe so it stays text: as a number the sheet would drop leading
/// zeros and round anything past 15 digits. Upstream text starting with `=`,
/// `+` or `@` is quoted too so it is not parsed as a formula. Image cells pass
/// through untouched.
fn encode_row(row: &SheetRow) -> Vec<String> {
    row.cells()
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let forced = match i {
                0 => true,
                1..=4 => cell.starts_with(['=', '+', '@']),
                _ => false,
            };
            if forced {
                format!("'{cell}")
            } else {
                cell.clone()
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory stand-in for the spreadsheet.
    #[derive(Default)]
    pub struct MemorySheet {
        pub rows: StdMutex<Vec<Vec<String>>>,
        pub fail_appends: AtomicBool,
        pub fail_reads: AtomicBool,
        pub appends: AtomicUsize,
        pub header_rows: usize,
    }

    impl MemorySheet {
        pub fn with_rows(rows: Vec<Vec<&str>>) -> Self {
            let sheet = MemorySheet::default();
            *sheet.rows.lock().unwrap() = rows
                .into_iter()
                .map(|r| r.into_iter().map(String::from).collect())
                .collect();
            sheet
        }

        pub fn with_header(mut self, header_rows: usize) -> Self {
            self.header_rows = header_rows;
            self
        }

        pub fn snapshot(&self) -> Vec<Vec<String>> {
            self.rows.lock().unwrap().clone()
        }

        fn read_guard(&self) -> Result<(), SheetError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(SheetError::Api {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SheetStore for MemorySheet {
        async fn column_values(&self) -> Result<Vec<String>, SheetError> {
            self.read_guard()?;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.first().cloned().unwrap_or_default())
                .collect())
        }

        async fn append_row(&self, row: &SheetRow) -> Result<(), SheetError> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(SheetError::Api {
                    status: 429,
                    body: "quota exceeded".into(),
                });
            }
            self.appends.fetch_add(1, Ordering::SeqCst);
            self.rows.lock().unwrap().push(row.cells().to_vec());
            Ok(())
        }

        async fn find_row(&self, barcode: &str) -> Result<Option<Vec<String>>, SheetError> {
            self.read_guard()?;
            let rows = self.rows.lock().unwrap();
            let column: Vec<String> = rows
                .iter()
                .map(|r| r.first().cloned().unwrap_or_default())
                .collect();
            Ok(data_row_index(&column, self.header_rows, barcode).map(|i| rows[i].clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageCells;
    use crate::model::{Barcode, ProductRecord};
    use serde_json::json;

    fn row(ean: &str, title: &str) -> SheetRow {
        let mut record = ProductRecord::barcode_only(&Barcode::parse(ean).unwrap());
        record.title = title.into();
        SheetRow::from_record(&record, ImageCells::Url)
    }

    #[test]
    fn test_a1_range_quotes_worksheet() {
        assert_eq!(a1_range("Sheet1", "A:A"), "'Sheet1'!A:A");
        assert_eq!(a1_range("Bob's puzzles", "A2:H2"), "'Bob''s puzzles'!A2:H2");
        assert_eq!(last_column(), 'H');
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&json!("abc")), "abc");
        assert_eq!(cell_text(&json!(5701234567890u64)), "5701234567890");
        assert_eq!(cell_text(&json!(null)), "");
        assert_eq!(cell_text(&json!(true)), "true");
    }

    #[test]
    fn test_encode_row_forces_text_where_needed() {
        let encoded = encode_row(&row("0012345678905", "=HYPERLINK(\"x\")"));
        assert_eq!(encoded[0], "'0012345678905");
        assert_eq!(encoded[1], "'=HYPERLINK(\"x\")");
        assert_eq!(encoded[2], "N/A");
        assert_eq!(encoded.len(), ROW_WIDTH);

        let plain = encode_row(&row("5701234567890", "Puzzle X"));
        assert_eq!(plain[0], "'5701234567890");
        assert_eq!(plain[1], "Puzzle X");

        let long = encode_row(&row("12345678901234567", "Puzzle Y"));
        assert_eq!(long[0], "'12345678901234567");
    }

    #[test]
    fn test_data_row_index_skips_header() {
        let column: Vec<String> = ["EAN", "5701234567890", " 4001234567891 "]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(data_row_index(&column, 1, "EAN"), None);
        assert_eq!(data_row_index(&column, 0, "EAN"), Some(0));
        assert_eq!(data_row_index(&column, 1, "4001234567891"), Some(2));
        assert_eq!(data_row_index(&column, 5, "5701234567890"), None);
    }

    #[test]
    fn test_value_range_without_values() {
        let range: ValueRange = serde_json::from_str(r#"{"range":"'Sheet1'!A1:H1"}"#).unwrap();
        assert!(range.values.is_empty());
    }

    #[test]
    fn test_append_body_shape() {
        let cells = vec!["a".to_string(), "b".to_string()];
        let body = serde_json::to_value(AppendBody { values: [cells.as_slice()] }).unwrap();
        assert_eq!(body, json!({"values": [["a", "b"]]}));
    }
}
