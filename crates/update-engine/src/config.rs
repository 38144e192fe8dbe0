//! Engine configuration
//!
//! Every setting has a documented default so the engine can run in tests
//! without any external configuration. TOML files override defaults
//! key-by-key, including individual entries of `default_params`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::codec::CodecKind;
use crate::error::{Result, UpdateError};

/// Default update server endpoint
pub const DEFAULT_ENDPOINT: &str = "https://updates.example.com/service/update2";
/// Default wire protocol version
pub const DEFAULT_PROTOCOL_VERSION: &str = "3.0";

/// Global parameter keys understood by the request builder
pub mod params {
    pub const LANGUAGE: &str = "lang";
    pub const PLATFORM: &str = "platform";
    pub const MACHINE_ID: &str = "machineid";
    pub const USER_ID: &str = "userid";
    pub const SESSION_ID: &str = "sessionid";
    pub const REQUEST_ID: &str = "requestid";
}

/// Whether `key` can be written as an XML attribute name.
///
/// Accepts the ASCII subset of the XML `Name` production, minus the colon
/// that would turn the key into a namespace prefix.
pub fn is_valid_param_key(key: &str) -> bool {
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Fails on the first key [`is_valid_param_key`] refuses
pub fn check_param_keys<'a, I>(keys: I) -> Result<()>
where
    I: IntoIterator<Item = &'a String>,
{
    match keys.into_iter().find(|k| !is_valid_param_key(k)) {
        Some(key) => Err(UpdateError::InvalidParamKey { key: key.clone() }),
        None => Ok(()),
    }
}

/// The built-in global parameter table
pub fn default_params() -> BTreeMap<String, String> {
    let nil = Uuid::nil().to_string();
    BTreeMap::from([
        (params::LANGUAGE.to_string(), "en".to_string()),
        (params::PLATFORM.to_string(), "unknown".to_string()),
        (params::MACHINE_ID.to_string(), nil.clone()),
        (params::USER_ID.to_string(), nil),
    ])
}

/// Configuration shared by request building, parsing and orchestration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Update server endpoint the transport posts to
    pub endpoint: String,
    /// Protocol version emitted in requests and required in responses
    pub protocol_version: String,
    /// Global parameters written into every request
    pub default_params: BTreeMap<String, String>,
    /// Wire protocol variant
    pub codec: CodecKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            default_params: default_params(),
            codec: CodecKind::default(),
        }
    }
}

/// On-disk form where every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEngineConfig {
    endpoint: Option<String>,
    protocol_version: Option<String>,
    #[serde(default)]
    default_params: BTreeMap<String, String>,
    codec: Option<CodecKind>,
}

impl EngineConfig {
    /// Parse a TOML document, filling unspecified keys with defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let raw: RawEngineConfig = toml::from_str(source)?;
        let mut config = Self::default();

        if let Some(endpoint) = raw.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(protocol_version) = raw.protocol_version {
            config.protocol_version = protocol_version;
        }
        if let Some(codec) = raw.codec {
            config.codec = codec;
        }
        config.default_params.extend(raw.default_params);

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading engine configuration from {}", path.display());
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.default_params.insert(key.into(), value.into());
        self
    }

    /// The endpoint as a parsed URL
    pub fn endpoint_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.endpoint)?)
    }

    /// Check the configuration for values no request could be built from
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.endpoint_url()?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(UpdateError::config(format!(
                "endpoint must use http or https, got '{}'",
                endpoint.scheme()
            )));
        }

        if self.protocol_version.trim().is_empty() {
            return Err(UpdateError::config("protocol_version must not be empty"));
        }

        check_param_keys(self.default_params.keys())
    }

    /// Global parameters for one request: defaults overridden key-by-key
    pub fn merged_params(
        &self,
        overrides: Option<&BTreeMap<String, String>>,
    ) -> BTreeMap<String, String> {
        let mut merged = self.default_params.clone();
        if let Some(overrides) = overrides {
            merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }
}
