//! Omaha-style XML protocol
//!
//! Requests look like:
//!
//! ```xml
//! <request protocol="3.0" requestid="..." sessionid="...">
//!   <client lang="en" machineid="..." platform="..." userid="..."/>
//!   <app appid="{GUID}" version="1.2.3.4" tag="beta">
//!     <param name="brand" value="GGLS"/>
//!     <updatecheck/>
//!   </app>
//! </request>
//! ```
//!
//! and responses like:
//!
//! ```xml
//! <response protocol="3.0">
//!   <daystart elapsed_seconds="43200"/>
//!   <app appid="{GUID}" status="ok">
//!     <updatecheck status="ok">
//!       <urls><url codebase="https://dl.example.com/"/></urls>
//!       <manifest version="1.3">
//!         <packages><package name="app.pkg" size="1024" hash_sha256="..."/></packages>
//!         <actions><action event="install" run="app.pkg"/></actions>
//!       </manifest>
//!     </updatecheck>
//!   </app>
//! </response>
//! ```
//!
//! Stats uploads reuse the request envelope with a `<stats>` block.

mod request;
mod response;
mod stats;
mod xml;

use std::collections::{BTreeMap, BTreeSet};

use super::ProtocolCodec;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::{BuiltRequest, ParsedResponse, StatsCollection, Ticket, UpdateRequestDocument};

pub use request::CONTENT_TYPE;

const ELEMENT_REQUEST: &str = "request";
const ELEMENT_RESPONSE: &str = "response";
const ELEMENT_CLIENT: &str = "client";
const ELEMENT_APP: &str = "app";
const ELEMENT_PARAM: &str = "param";
const ELEMENT_UPDATECHECK: &str = "updatecheck";
const ELEMENT_DAYSTART: &str = "daystart";
const ELEMENT_URLS: &str = "urls";
const ELEMENT_URL: &str = "url";
const ELEMENT_MANIFEST: &str = "manifest";
const ELEMENT_PACKAGES: &str = "packages";
const ELEMENT_PACKAGE: &str = "package";
const ELEMENT_ACTIONS: &str = "actions";
const ELEMENT_ACTION: &str = "action";
const ELEMENT_STATS: &str = "stats";
const ELEMENT_STAT: &str = "stat";

const STATUS_OK: &str = "ok";
const STATUS_NO_UPDATE: &str = "noupdate";

/// Omaha protocol codec
#[derive(Debug, Clone, Default)]
pub struct OmahaCodec {
    config: EngineConfig,
}

impl OmahaCodec {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl ProtocolCodec for OmahaCodec {
    fn name(&self) -> &'static str {
        "omaha"
    }

    fn build_update_request(
        &self,
        tickets: &[Ticket],
        overrides: Option<&BTreeMap<String, String>>,
    ) -> Result<BuiltRequest> {
        request::build_update_request(&self.config, tickets, overrides)
    }

    fn parse_update_response(
        &self,
        document: &[u8],
        expected_ids: &BTreeSet<String>,
    ) -> Result<ParsedResponse> {
        response::parse_update_response(&self.config, document, expected_ids)
    }

    fn build_stats_request(&self, stats: &StatsCollection) -> Result<UpdateRequestDocument> {
        stats::build_stats_request(&self.config, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UpdateVerdict;

    /// Answers "noupdate" for every app in a request
    fn echo_no_update(request: &str) -> String {
        let root = xml::parse_document(request.as_bytes()).unwrap();
        let apps: String = root
            .children_named(ELEMENT_APP)
            .filter_map(|a| a.attr("appid"))
            .map(|id| {
                format!(
                    r#"<app appid="{}" status="ok"><updatecheck status="noupdate"/></app>"#,
                    quick_xml::escape::escape(id)
                )
            })
            .collect();
        format!(r#"<response protocol="3.0">{}</response>"#, apps)
    }

    #[test]
    fn test_request_response_round_trip() {
        let codec = OmahaCodec::default();
        let tickets = vec![
            Ticket::new("{A}", "1.0"),
            Ticket::new("{B & C}", "2.0.1").with_tag("dev"),
        ];

        let built = codec.build_update_request(&tickets, None).unwrap();
        let reply = echo_no_update(&built.document.body);
        let expected: BTreeSet<String> = built.document.ticket_ids.iter().cloned().collect();
        let parsed = codec.parse_update_response(reply.as_bytes(), &expected).unwrap();

        assert_eq!(parsed.verdicts.len(), 2);
        assert!(parsed.verdicts.values().all(|v| *v == UpdateVerdict::NoUpdate));
    }

    #[test]
    fn test_protocol_version_follows_config() {
        let config = EngineConfig {
            protocol_version: "3.1".to_string(),
            ..Default::default()
        };
        let codec = OmahaCodec::new(config);

        let built = codec.build_update_request(&[], None).unwrap();
        assert!(built.document.body.contains(r#"protocol="3.1""#));
        assert_eq!(built.document.protocol_version, "3.1");

        let result =
            codec.parse_update_response(br#"<response protocol="3.0"/>"#, &BTreeSet::new());
        assert!(matches!(
            result,
            Err(crate::error::UpdateError::ProtocolVersionMismatch { .. })
        ));
    }
}
