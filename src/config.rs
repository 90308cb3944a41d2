use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_LOOKUP_ENDPOINT: &str = "https://api.upcitemdb.com/prod/trial/lookup";
pub const DEFAULT_SHEETS_API: &str = "https://sheets.googleapis.com/v4";

#[derive(Parser, Debug)]
#[command(name = "skannr")]
#[command(about = "Receives barcode scans and records products in a spreadsheet", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".skannr")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    #[serde(default = "default_host")]
    pub host: String,
    port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl App {
    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.get_port())
    }
}

/// How image references are written into the sheet.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageCells {
    /// The bare URL.
    #[default]
    Url,
    /// An `=IMAGE("...")` formula, rendered inline by the spreadsheet.
    Formula,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Sheets {
    pub credentials_path: String,
    pub spreadsheet_id: String,
    #[serde(default = "default_worksheet")]
    pub worksheet: String,
    #[serde(default = "default_header_rows")]
    pub header_rows: usize,
    #[serde(default)]
    pub image_cells: ImageCells,
    #[serde(default = "default_sheets_api")]
    pub api_base: String,
}

fn default_worksheet() -> String {
    "Sheet1".to_string()
}

fn default_header_rows() -> usize {
    1
}

fn default_sheets_api() -> String {
    DEFAULT_SHEETS_API.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Lookup {
    #[serde(default = "default_lookup_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for Lookup {
    fn default() -> Self {
        Lookup {
            endpoint: default_lookup_endpoint(),
            api_key: None,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_lookup_endpoint() -> String {
    DEFAULT_LOOKUP_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: App,
    pub sheets: Sheets,
    #[serde(default)]
    pub lookup: Lookup,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    /// Rejects configurations that cannot serve traffic. Runs before any
    /// network call is made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.port == 0 {
            return Err(ConfigError::Invalid("app.port must be non-zero".into()));
        }
        if self.sheets.spreadsheet_id.trim().is_empty() {
            return Err(ConfigError::Missing("sheets.spreadsheet_id"));
        }
        if self.sheets.worksheet.trim().is_empty() {
            return Err(ConfigError::Missing("sheets.worksheet"));
        }
        if self.sheets.credentials_path.trim().is_empty() {
            return Err(ConfigError::Missing("sheets.credentials_path"));
        }
        if !Path::new(&self.sheets.credentials_path).is_file() {
            return Err(ConfigError::CredentialsNotFound(
                self.sheets.credentials_path.clone(),
            ));
        }
        if self.lookup.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("lookup.endpoint"));
        }
        if self.lookup.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "lookup.timeout_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find("}") {
                let var_name = &result[actual_start + 2..actual_start + end];

                // ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!(variable = var_name, "environment variable not found");
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}
