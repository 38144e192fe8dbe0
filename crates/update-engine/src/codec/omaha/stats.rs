//! Usage-statistics upload documents

use tracing::debug;

use super::request::{write_envelope_start, CONTENT_TYPE};
use super::xml::DocumentWriter;
use super::{ELEMENT_REQUEST, ELEMENT_STAT, ELEMENT_STATS};
use crate::config::EngineConfig;
use crate::error::{Result, UpdateError};
use crate::models::{DocumentKind, StatValue, StatsCollection, UpdateRequestDocument};

fn check_stat(name: &str, value: &StatValue) -> Result<()> {
    if name.trim().is_empty() {
        return Err(UpdateError::invalid_stat(name, "stat names must not be empty"));
    }
    if let StatValue::Float(v) = value {
        if !v.is_finite() {
            return Err(UpdateError::invalid_stat(
                name,
                format!("{} is not a finite number", v),
            ));
        }
    }
    Ok(())
}

/// Serialize a stats collection; an empty one still yields a valid envelope
pub(super) fn build_stats_request(
    config: &EngineConfig,
    stats: &StatsCollection,
) -> Result<UpdateRequestDocument> {
    for (name, value) in stats.iter() {
        check_stat(name, value)?;
    }

    let mut doc = DocumentWriter::new()?;
    write_envelope_start(&mut doc, config, None)?;

    if !stats.is_empty() {
        doc.start(ELEMENT_STATS, &[])?;
        for (name, value) in stats.iter() {
            let rendered = value.to_string();
            doc.empty(
                ELEMENT_STAT,
                &[
                    ("name", name.as_str()),
                    ("type", value.type_name()),
                    ("value", rendered.as_str()),
                ],
            )?;
        }
        doc.end(ELEMENT_STATS)?;
    }

    doc.end(ELEMENT_REQUEST)?;
    debug!("Built stats request with {} entries", stats.len());

    Ok(UpdateRequestDocument {
        kind: DocumentKind::Stats,
        protocol_version: config.protocol_version.clone(),
        content_type: CONTENT_TYPE,
        body: doc.finish()?,
        ticket_ids: Vec::new(),
    })
}
