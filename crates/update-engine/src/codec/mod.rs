//! Protocol codecs
//!
//! A codec turns ticket batches and stats into outbound documents and
//! decodes the server's reply. Codecs are selected through
//! [`EngineConfig::codec`]; each protocol variant is a sibling
//! implementation of [`ProtocolCodec`].

pub mod omaha;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::{BuiltRequest, ParsedResponse, StatsCollection, Ticket, UpdateRequestDocument};

pub use omaha::OmahaCodec;

/// Build-request / parse-response capability of one wire protocol
pub trait ProtocolCodec: Send + Sync {
    /// Short protocol name for logs
    fn name(&self) -> &'static str;

    /// Serialize a ticket batch into one update-check request.
    ///
    /// Tickets with invalid versions are left out and reported in
    /// [`BuiltRequest::skipped`]; duplicate identities fail the call.
    fn build_update_request(
        &self,
        tickets: &[Ticket],
        overrides: Option<&BTreeMap<String, String>>,
    ) -> Result<BuiltRequest>;

    /// Decode a response into exactly one verdict per expected identity.
    ///
    /// Envelope problems fail the whole call and no verdicts are returned.
    fn parse_update_response(
        &self,
        document: &[u8],
        expected_ids: &BTreeSet<String>,
    ) -> Result<ParsedResponse>;

    /// Serialize a stats upload. An empty collection yields a minimal envelope.
    fn build_stats_request(&self, stats: &StatsCollection) -> Result<UpdateRequestDocument>;
}

/// Wire protocol variants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum CodecKind {
    /// Omaha-style XML envelopes
    #[default]
    Omaha,
}

/// Instantiate the codec the configuration selects
pub fn codec_for(config: &EngineConfig) -> Arc<dyn ProtocolCodec> {
    match config.codec {
        CodecKind::Omaha => Arc::new(OmahaCodec::new(config.clone())),
    }
}
