use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::address::StoreAddress;
use crate::error::{StoreError, StoreResult};

/// Number of concurrent workers a batch retrieval uses by default.
pub const DEFAULT_GET_CONCURRENCY: usize = 32;

/// Environment variable holding the store address.
pub const ENV_ADDRESS: &str = "CAS_STORE_ADDRESS";
/// Environment variable that disables the existence check before writes.
pub const ENV_DISABLE_HEAD_CHECK: &str = "CAS_DISABLE_HEAD_CHECK";
/// Environment variable overriding the batch retrieval pool size.
pub const ENV_GET_CONCURRENCY: &str = "CAS_GET_CONCURRENCY";

/// Tunables for an [`ObjectStoreClient`](crate::ObjectStoreClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Always write on `store`, without first asking the backend whether the
    /// object exists. Trades bandwidth for round trips.
    pub disable_head_check: bool,
    /// Worker pool size for batch retrieval.
    pub get_concurrency: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            disable_head_check: false,
            get_concurrency: DEFAULT_GET_CONCURRENCY,
        }
    }
}

impl StoreOptions {
    pub fn validate(&self) -> StoreResult<()> {
        if self.get_concurrency == 0 {
            return Err(StoreError::InvalidConfig(
                "get_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to build a client apart from the backend itself.
///
/// ```toml
/// address = "s3://my-bucket/objects"
///
/// [options]
/// disable_head_check = false
/// get_concurrency = 32
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub address: String,
    #[serde(default)]
    pub options: StoreOptions,
}

impl StoreConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            options: StoreOptions::default(),
        }
    }

    pub fn from_toml_str(raw: &str) -> StoreResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML configuration file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| StoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `CAS_STORE_ADDRESS` (required)
    /// - `CAS_DISABLE_HEAD_CHECK` (`1`/`true`/`yes`, default: false)
    /// - `CAS_GET_CONCURRENCY` (default: 32)
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StoreResult<Self> {
        let address = lookup(ENV_ADDRESS).ok_or_else(|| {
            StoreError::InvalidConfig(format!("{ENV_ADDRESS} environment variable is required"))
        })?;
        let mut options = StoreOptions::default();
        if let Some(raw) = lookup(ENV_DISABLE_HEAD_CHECK) {
            options.disable_head_check = parse_flag(ENV_DISABLE_HEAD_CHECK, &raw)?;
        }
        if let Some(raw) = lookup(ENV_GET_CONCURRENCY) {
            options.get_concurrency = raw.trim().parse().map_err(|_| {
                StoreError::InvalidConfig(format!("{ENV_GET_CONCURRENCY}: not a number: {raw:?}"))
            })?;
        }
        let config = Self { address, options };
        config.validate()?;
        Ok(config)
    }

    /// Check the address and options without building a client.
    pub fn validate(&self) -> StoreResult<()> {
        StoreAddress::parse(&self.address)?;
        self.options.validate()
    }

    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::InvalidConfig(e.to_string()))
    }
}

fn parse_flag(name: &str, raw: &str) -> StoreResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(StoreError::InvalidConfig(format!(
            "{name}: expected a boolean, got {raw:?}"
        ))),
    }
}
