//! Runtime configuration.
//!
//! Values come from an optional JSON file and are then overridden by
//! environment variables, so a deployment can run without any file at all.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PosError, Result};

/// Environment keys recognised by [`Config::apply_env`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEnv {
    Workbook,
    Bind,
    CacheTtlSecs,
    StoreName,
}

impl ConfigEnv {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Workbook => "PHARMACY_WORKBOOK",
            Self::Bind => "PHARMACY_BIND",
            Self::CacheTtlSecs => "PHARMACY_CACHE_TTL_SECS",
            Self::StoreName => "PHARMACY_STORE_NAME",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Gzip-compressed workbook file
    pub workbook_path: PathBuf,
    /// Address the web API listens on
    pub bind_addr: String,
    /// How long inventory reads are served from cache
    pub cache_ttl_secs: u64,
    /// Low-stock threshold for products without their own TonToiThieu
    pub default_min_stock: f64,
    /// Shop name shown in reports
    pub store_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workbook_path: PathBuf::from("pharmacy.bin.gz"),
            bind_addr: "127.0.0.1:3000".to_string(),
            cache_ttl_secs: 60,
            default_min_stock: 10.0,
            store_name: "MinhChau".to_string(),
        }
    }
}

impl Config {
    /// Load from `path` when given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PosError::io(path, e))?;
        Config::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text).map_err(|e| PosError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment values supplied by `lookup`
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: ConfigEnv| {
            lookup(key.as_str())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(path) = read(ConfigEnv::Workbook) {
            self.workbook_path = PathBuf::from(path);
        }
        if let Some(bind) = read(ConfigEnv::Bind) {
            self.bind_addr = bind;
        }
        if let Some(ttl) = read(ConfigEnv::CacheTtlSecs) {
            self.cache_ttl_secs = ttl.parse().map_err(|_| PosError::Config {
                message: format!(
                    "{} must be a whole number of seconds, got {:?}",
                    ConfigEnv::CacheTtlSecs.as_str(),
                    ttl
                ),
            })?;
        }
        if let Some(name) = read(ConfigEnv::StoreName) {
            self.store_name = name;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.workbook_path.as_os_str().is_empty() {
            return Err(PosError::Config {
                message: "workbook_path must not be empty".to_string(),
            });
        }
        if !self.default_min_stock.is_finite() || self.default_min_stock < 0.0 {
            return Err(PosError::Config {
                message: format!(
                    "default_min_stock must be a non-negative number, got {}",
                    self.default_min_stock
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_json(r#"{ "cache_ttl_secs": 5 }"#).unwrap();
        assert_eq!(config.cache_ttl_secs, 5);
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(matches!(
            Config::from_json(r#"{ "sheet_url": "x" }"#),
            Err(PosError::Config { .. })
        ));
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PHARMACY_WORKBOOK", "/tmp/shop.bin.gz"),
            ("PHARMACY_CACHE_TTL_SECS", "0"),
            ("PHARMACY_BIND", "  "),
        ]);
        let config = Config::default()
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.workbook_path, PathBuf::from("/tmp/shop.bin.gz"));
        assert_eq!(config.cache_ttl_secs, 0);
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
    }

    #[test]
    fn bad_ttl_from_env() {
        let result = Config::default().apply_env(|k| {
            (k == "PHARMACY_CACHE_TTL_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(PosError::Config { .. })));
    }
}
