use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_COLLECTION, DEFAULT_CONFIG_FILE, DEFAULT_PORT, DEFAULT_RATE_LIMIT_MAX,
    DEFAULT_SERVER_KEY, DEFAULT_STORE_PATH, RATE_LIMIT_WINDOW,
};
use crate::error::{IntakeError, Result};
use crate::rate_limiter::AdmissionLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    None,
    Memory,
    Ndjson,
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(StoreKind::None),
            "memory" => Ok(StoreKind::Memory),
            "ndjson" => Ok(StoreKind::Ndjson),
            "sqlite" => Ok(StoreKind::Sqlite),
            other => Err(IntakeError::Config(format!("unknown store kind '{other}'"))),
        }
    }
}

/// Process configuration: optional TOML file, then environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub rate_limit_max: u32,
    /// Key for outbound config blobs. Independent of the per-request `v` key.
    pub server_key: String,
    pub store: StoreKind,
    pub store_path: PathBuf,
    pub collection: String,
    pub store_timeout_ms: Option<u64>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            server_key: DEFAULT_SERVER_KEY.to_string(),
            store: StoreKind::None,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            collection: DEFAULT_COLLECTION.to_string(),
            store_timeout_ms: None,
            metrics_port: None,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| IntakeError::Config(format!("{name} has an invalid value '{raw}'")))
}

impl Config {
    /// Load `.env`, then the TOML file named by `INTAKE_CONFIG` (default
    /// `intake.toml`, skipped when missing), then apply environment overrides.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        let path = std::env::var("INTAKE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            IntakeError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Override fields from a variable lookup. Unset or empty variables keep the current value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PORT") {
            self.port = parse_var("PORT", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_MAX") {
            self.rate_limit_max = parse_var("RATE_LIMIT_MAX", &v)?;
        }
        if let Some(v) = get("SERVER_KEY") {
            self.server_key = v;
        }
        if let Some(v) = get("TELEMETRY_STORE") {
            self.store = v.parse()?;
        }
        if let Some(v) = get("TELEMETRY_STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        if let Some(v) = get("TELEMETRY_COLLECTION") {
            self.collection = v;
        }
        if let Some(v) = get("STORE_TIMEOUT_MS") {
            self.store_timeout_ms = Some(parse_var("STORE_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("METRICS_PORT") {
            self.metrics_port = Some(parse_var("METRICS_PORT", &v)?);
        }
        Ok(())
    }

    pub fn admission_limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            max_per_window: self.rate_limit_max,
            window: RATE_LIMIT_WINDOW,
        }
    }

    pub fn store_timeout(&self) -> Option<Duration> {
        self.store_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.rate_limit_max, 300);
        assert_eq!(config.server_key, "calypso");
        assert_eq!(config.store, StoreKind::None);
        assert_eq!(config.collection, "telemetry");
        assert_eq!(config.admission_limits().window, Duration::from_secs(60));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_env(lookup(&[
                ("PORT", "8081"),
                ("RATE_LIMIT_MAX", "5"),
                ("TELEMETRY_STORE", "SQLite"),
                ("STORE_TIMEOUT_MS", "250"),
                ("SERVER_KEY", "other"),
            ]))
            .unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.rate_limit_max, 5);
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.store_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.server_key, "other");
    }

    #[test]
    fn empty_env_values_keep_defaults() {
        let mut config = Config::default();
        config.apply_env(lookup(&[("RATE_LIMIT_MAX", "")])).unwrap();
        assert_eq!(config.rate_limit_max, 300);
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        let mut config = Config::default();
        let err = config
            .apply_env(lookup(&[("RATE_LIMIT_MAX", "lots")]))
            .unwrap_err();
        assert!(matches!(err, IntakeError::Config(_)));
    }

    #[test]
    fn reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intake.toml");
        fs::write(
            &path,
            "port = 4000\nstore = \"ndjson\"\nstore_path = \"/tmp/telemetry\"\n",
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.store, StoreKind::Ndjson);
        assert_eq!(config.rate_limit_max, 300);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::from_file(Path::new("/nonexistent/intake.toml")).unwrap();
        assert_eq!(config.port, 3000);
    }
}
