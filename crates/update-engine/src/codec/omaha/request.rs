//! Update-check request building

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use super::xml::DocumentWriter;
use super::{ELEMENT_APP, ELEMENT_CLIENT, ELEMENT_PARAM, ELEMENT_REQUEST, ELEMENT_UPDATECHECK};
use crate::config::{check_param_keys, params, EngineConfig};
use crate::error::{Result, UpdateError};
use crate::models::{
    BuiltRequest, DocumentKind, SkipReason, SkippedTicket, Ticket, UpdateRequestDocument,
};
use crate::version;

/// Content type of every Omaha document
pub const CONTENT_TYPE: &str = "application/xml";

/// Keys written on the envelope root instead of the client block
const ENVELOPE_KEYS: [&str; 2] = [params::REQUEST_ID, params::SESSION_ID];

/// Opens `<request>` and writes the `<client>` parameter block
pub(super) fn write_envelope_start(
    doc: &mut DocumentWriter,
    config: &EngineConfig,
    overrides: Option<&BTreeMap<String, String>>,
) -> Result<()> {
    let merged = config.merged_params(overrides);
    check_param_keys(merged.keys())?;

    let mut root_attrs = vec![("protocol", config.protocol_version.as_str())];
    root_attrs.extend(
        ENVELOPE_KEYS
            .iter()
            .filter_map(|key| merged.get(*key).map(|v| (*key, v.as_str()))),
    );
    doc.start(ELEMENT_REQUEST, &root_attrs)?;

    let client_attrs: Vec<(&str, &str)> = merged
        .iter()
        .filter(|(k, _)| !ENVELOPE_KEYS.iter().any(|key| *key == k.as_str()))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    doc.empty(ELEMENT_CLIENT, &client_attrs)
}

fn write_ticket(doc: &mut DocumentWriter, ticket: &Ticket) -> Result<()> {
    let mut attrs = vec![("appid", ticket.id.as_str())];
    if let Some(version) = &ticket.version {
        attrs.push(("version", version.as_str()));
    }
    if let Some(tag) = &ticket.tag {
        attrs.push(("tag", tag.as_str()));
    }
    doc.start(ELEMENT_APP, &attrs)?;

    for (name, value) in &ticket.params {
        doc.empty(ELEMENT_PARAM, &[("name", name.as_str()), ("value", value.as_str())])?;
    }
    doc.empty(ELEMENT_UPDATECHECK, &[])?;

    doc.end(ELEMENT_APP)
}

/// Serialize a ticket batch in input order
pub(super) fn build_update_request(
    config: &EngineConfig,
    tickets: &[Ticket],
    overrides: Option<&BTreeMap<String, String>>,
) -> Result<BuiltRequest> {
    let mut seen = HashSet::with_capacity(tickets.len());
    if let Some(dup) = tickets.iter().find(|t| !seen.insert(t.id.as_str())) {
        return Err(UpdateError::DuplicateTicketIdentity { id: dup.id.clone() });
    }

    let mut doc = DocumentWriter::new()?;
    write_envelope_start(&mut doc, config, overrides)?;

    let mut ticket_ids = Vec::with_capacity(tickets.len());
    let mut skipped = Vec::new();

    for ticket in tickets {
        if let Some(v) = ticket.version.as_deref().filter(|v| !version::is_valid(v)) {
            warn!("Skipping ticket {}: invalid version {:?}", ticket.id, v);
            skipped.push(SkippedTicket {
                ticket_id: ticket.id.clone(),
                reason: SkipReason::InvalidVersion {
                    version: v.to_string(),
                },
            });
            continue;
        }

        write_ticket(&mut doc, ticket)?;
        ticket_ids.push(ticket.id.clone());
    }

    doc.end(ELEMENT_REQUEST)?;
    let body = doc.finish()?;

    debug!(
        "Built update request with {} tickets ({} skipped)",
        ticket_ids.len(),
        skipped.len()
    );

    Ok(BuiltRequest {
        document: UpdateRequestDocument {
            kind: DocumentKind::UpdateCheck,
            protocol_version: config.protocol_version.clone(),
            content_type: CONTENT_TYPE,
            body,
            ticket_ids,
        },
        skipped,
    })
}
