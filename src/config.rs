use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::types::TimeFilter;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    pub backend_url: String,
    pub data_center: String,
    #[serde(default)]
    pub filter: TimeFilter,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend_url: "http://localhost:8000".to_string(),
            data_center: "openlab".to_string(),
            filter: TimeFilter::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        let backend_url = env::var("BACKEND_URL").unwrap_or(defaults.backend_url);
        let data_center = env::var("DATA_CENTER").unwrap_or(defaults.data_center);

        let mut filter = defaults.filter;
        if let Some(start) = get_env_var_date("START_DATE")? {
            filter.start_date = start;
        }
        if let Some(end) = get_env_var_date("END_DATE")? {
            filter.end_date = end;
        }
        filter.aggregation_window_secs =
            get_env_var_u64("AGGREGATION_WINDOW_SECS", filter.aggregation_window_secs);
        if let Ok(aggregation_fn) = env::var("AGGREGATION_FN") {
            filter.aggregation_fn = aggregation_fn;
        }

        Ok(Config {
            backend_url,
            data_center,
            filter,
        })
    }

    /// Config file wins when present; otherwise the environment.
    pub fn load() -> Result<Self> {
        let path = Self::get_config_file_path();
        if path.exists() {
            log::info!("Loading config from {}", path.display());
            Self::load_from_file()
        } else {
            Self::from_env()
        }
    }

    pub fn get_config_file_path() -> PathBuf {
        let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(config_dir).join("admin_config.json")
    }

    pub fn load_from_file() -> Result<Self> {
        let config_file_path = Self::get_config_file_path();
        let contents = fs::read_to_string(&config_file_path)
            .with_context(|| format!("reading {}", config_file_path.display()))?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_file(&self) -> Result<PathBuf> {
        let config_file_path = Self::get_config_file_path();
        if let Some(parent) = config_file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        let mut file = fs::File::create(&config_file_path)?;
        file.write_all(contents.as_bytes())?;
        Ok(config_file_path)
    }
}

fn get_env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

fn get_env_var_date(key: &str) -> Result<Option<NaiveDate>> {
    match env::var(key) {
        Ok(val) => {
            let date = NaiveDate::parse_from_str(val.trim(), "%Y-%m-%d")
                .with_context(|| format!("{} must be YYYY-MM-DD, got {:?}", key, val))?;
            Ok(Some(date))
        }
        Err(_) => Ok(None),
    }
}
