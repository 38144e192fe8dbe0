//! Core data models for update checks

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::version::ProductVersion;

/// Verdicts keyed by ticket identity
pub type VerdictMap = BTreeMap<String, UpdateVerdict>;

/// Client-side record of one installed, updatable product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Opaque product identity, usually a GUID string
    pub id: String,
    /// Installed version, if known
    pub version: Option<String>,
    /// Release channel or brand tag
    pub tag: Option<String>,
    /// Extra per-ticket parameters sent verbatim
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Ticket {
    /// Create a ticket for an installed product
    pub fn new<I: Into<String>, V: Into<String>>(id: I, version: V) -> Self {
        Self {
            id: id.into(),
            version: Some(version.into()),
            tag: None,
            params: BTreeMap::new(),
        }
    }

    /// Create a ticket with no installed version
    pub fn unversioned<I: Into<String>>(id: I) -> Self {
        Self {
            id: id.into(),
            version: None,
            tag: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// One install step handed to the install-action consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallAction {
    /// Action kind tag, e.g. `preinstall`, `install`, `postinstall`
    pub kind: String,
    /// Action-specific parameters
    pub params: BTreeMap<String, String>,
}

/// Server-supplied description of an available update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Version the update installs
    pub version: ProductVersion,
    /// Candidate download URLs, first preference first
    pub urls: Vec<Url>,
    /// Expected artifact size in bytes
    pub size: u64,
    /// Expected content hash
    pub hash: String,
    /// Artifact file name, when the server names it
    pub package_name: Option<String>,
    /// Install steps in execution order
    pub actions: Vec<InstallAction>,
}

/// Classification of a per-ticket error verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum VerdictCode {
    /// The installed version did not parse, so the ticket was never sent
    InvalidVersion,
    /// The server's entry for this ticket violated the protocol
    MalformedResponse,
    /// The server did not answer for this ticket
    MissingInResponse,
    /// The server reported its own status string for this ticket
    ServerReported(String),
}

impl fmt::Display for VerdictCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVersion => f.write_str("invalid_version"),
            Self::MalformedResponse => f.write_str("malformed_response"),
            Self::MissingInResponse => f.write_str("missing_in_response"),
            Self::ServerReported(code) => write!(f, "server_reported:{}", code),
        }
    }
}

/// Per-ticket outcome of an update check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum UpdateVerdict {
    /// The ticket is up to date
    NoUpdate,
    /// A newer version is available
    UpdateAvailable { manifest: Manifest },
    /// The check could not produce an answer for this ticket
    Error { code: VerdictCode, message: String },
}

impl UpdateVerdict {
    pub fn error<S: Into<String>>(code: VerdictCode, message: S) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        match self {
            Self::UpdateAvailable { manifest } => Some(manifest),
            _ => None,
        }
    }
}

/// Why a ticket was left out of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidVersion { version: String },
}

/// Diagnostic for a ticket omitted from a built request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTicket {
    pub ticket_id: String,
    pub reason: SkipReason,
}

impl SkippedTicket {
    /// The verdict reported for this ticket in a check result
    pub fn verdict(&self) -> UpdateVerdict {
        match &self.reason {
            SkipReason::InvalidVersion { version } => UpdateVerdict::error(
                VerdictCode::InvalidVersion,
                format!("installed version {:?} is not a valid version", version),
            ),
        }
    }
}

/// What an outbound document is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    UpdateCheck,
    Stats,
}

/// A serialized outbound protocol document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequestDocument {
    /// Purpose of the document
    pub kind: DocumentKind,
    /// Protocol version written into the envelope
    pub protocol_version: String,
    /// MIME type of `body`
    pub content_type: &'static str,
    /// Serialized envelope
    pub body: String,
    /// Identities of the tickets actually written, in document order
    pub ticket_ids: Vec<String>,
}

impl UpdateRequestDocument {
    pub fn as_bytes(&self) -> &[u8] {
        self.body.as_bytes()
    }
}

/// Result of building an update-check request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltRequest {
    pub document: UpdateRequestDocument,
    /// Tickets left out of the document
    pub skipped: Vec<SkippedTicket>,
}

/// Envelope-level information the server sent alongside its verdicts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Seconds elapsed since the start of the server's day
    pub elapsed_seconds: Option<u64>,
}

/// Decoded update-check response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Exactly one verdict per expected identity
    pub verdicts: VerdictMap,
    pub server: ServerInfo,
}

/// A single statistic value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl StatValue {
    /// Type tag written on the wire
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Text(_) => "string",
        }
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for StatValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for StatValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for StatValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for StatValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for StatValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Usage statistics supplied wholesale by the owner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsCollection {
    stats: BTreeMap<String, StatValue>,
}

impl StatsCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a stat, replacing any previous value under the same name
    pub fn set<N: Into<String>, V: Into<StatValue>>(&mut self, name: N, value: V) {
        self.stats.insert(name.into(), value.into());
    }

    pub fn with<N: Into<String>, V: Into<StatValue>>(mut self, name: N, value: V) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&StatValue> {
        self.stats.get(name)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Stats in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &StatValue)> {
        self.stats.iter()
    }
}

/// An update ready for the install-action consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAction {
    pub ticket_id: String,
    pub installed_version: Option<String>,
    pub manifest: Manifest,
}
