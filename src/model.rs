use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ImageCells;

/// Placeholder for any product field the upstream did not provide.
pub const NOT_AVAILABLE: &str = "N/A";

pub const MIN_BARCODE_LEN: usize = 13;
pub const MAX_IMAGES: usize = 3;
pub const ROW_WIDTH: usize = 5 + MAX_IMAGES;

/// A validated, all-digit barcode of at least 13 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Barcode(String);

impl Barcode {
    /// Trims surrounding whitespace and validates the remainder.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.len() < MIN_BARCODE_LEN || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Barcode(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Barcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub ean: String,
    pub title: String,
    pub brand: String,
    pub manufacturer: String,
    pub description: String,
    pub images: Vec<String>,
}

impl ProductRecord {
    /// A record carrying only the barcode, every other field set to the sentinel.
    pub fn barcode_only(barcode: &Barcode) -> Self {
        ProductRecord {
            ean: barcode.to_string(),
            title: NOT_AVAILABLE.to_string(),
            brand: NOT_AVAILABLE.to_string(),
            manufacturer: NOT_AVAILABLE.to_string(),
            description: NOT_AVAILABLE.to_string(),
            images: vec![],
        }
    }

    /// Rebuilds a record from the cells of a stored row. Columns past the end
    /// of the row fall back to the sentinel, empty image cells are dropped.
    pub fn from_cells(cells: &[String]) -> Self {
        let field = |i: usize| {
            cells
                .get(i)
                .cloned()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };

        let images = cells
            .iter()
            .skip(5)
            .take(MAX_IMAGES)
            .map(|cell| unwrap_image_formula(cell))
            .filter(|url| !url.is_empty())
            .collect();

        ProductRecord {
            ean: field(0),
            title: field(1),
            brand: field(2),
            manufacturer: field(3),
            description: field(4),
            images,
        }
    }
}

/// The positional representation of a product in the sheet. Column 1 is
/// always the barcode and the three image slots are always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow([String; ROW_WIDTH]);

impl SheetRow {
    pub fn from_record(record: &ProductRecord, image_cells: ImageCells) -> Self {
        let image = |i: usize| match record.images.get(i) {
            Some(url) if !url.is_empty() => match image_cells {
                ImageCells::Url => url.clone(),
                ImageCells::Formula => format!("=IMAGE(\"{}\")", url.replace('"', "\"\"")),
            },
            _ => String::new(),
        };

        SheetRow([
            record.ean.clone(),
            record.title.clone(),
            record.brand.clone(),
            record.manufacturer.clone(),
            record.description.clone(),
            image(0),
            image(1),
            image(2),
        ])
    }

    pub fn cells(&self) -> &[String] {
        &self.0
    }

    pub fn barcode(&self) -> &str {
        &self.0[0]
    }
}

/// Turns `=IMAGE("url", ...)` back into `url`. Anything else is returned as is.
fn unwrap_image_formula(cell: &str) -> String {
    let trimmed = cell.trim();
    let upper = trimmed.to_ascii_uppercase();
    if !upper.starts_with("=IMAGE(\"") {
        return trimmed.to_string();
    }

    let rest = &trimmed["=IMAGE(\"".len()..];
    let mut url = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                url.push('"');
                chars.next();
                continue;
            }
            return url;
        }
        url.push(c);
    }

    trimmed.to_string()
}
